//! Authentication (§4.6): two credential channels, API key then JWT, tried
//! in order until one succeeds. Exposed as a plain async check rather than
//! an `actix_web::dev::Transform` — routes are resolved dynamically via
//! [`crate::utils::route_matcher::RouteMatcher`] rather than registered
//! one-by-one at `App` build time, so the fixed stage order from §4.2 is
//! driven by `routes::dispatch::GatewayDispatcher` instead of by stacking
//! actix middlewares per route.

use actix_web::HttpRequest;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::models::settings::AuthSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Identity established by either credential channel, stashed in request
/// extensions for downstream consumers (role enforcement, rate-limit
/// `key_for` hook).
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    pub subject: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiKeyValidationResponse {
    valid: bool,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug)]
pub enum AuthError {
    Missing,
    Invalid(String),
    UpstreamError(String),
}

impl AuthError {
    pub fn message(&self) -> String {
        match self {
            AuthError::Missing => "Authentication required".to_string(),
            AuthError::Invalid(_) => "Invalid token".to_string(),
            AuthError::UpstreamError(message) => message.clone(),
        }
    }
}

/// `true` if `role` satisfies `allowed` (empty = unrestricted, `"any"` = wildcard).
pub fn role_allowed(allowed: &[String], role: &Option<String>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    if allowed.iter().any(|r| r == "any") {
        return true;
    }
    match role {
        Some(r) => allowed.iter().any(|a| a == r),
        None => false,
    }
}

fn query_param(query_string: &str, name: &str) -> Option<String> {
    query_string.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        if key == name {
            parts.next().map(|v| v.to_string())
        } else {
            None
        }
    })
}

fn extract_api_key(req: &HttpRequest, settings: &AuthSettings) -> Option<String> {
    req.headers()
        .get(settings.api_key_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| query_param(req.query_string(), "api_key"))
        .or_else(|| query_param(req.query_string(), "key"))
}

fn extract_jwt(req: &HttpRequest, settings: &AuthSettings) -> Option<String> {
    req.headers()
        .get(settings.jwt_header.as_str())
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
        .or_else(|| query_param(req.query_string(), "token"))
        .or_else(|| query_param(req.query_string(), "access_token"))
}

/// Runs both credential channels in order (API key, then JWT) per §4.6.
pub async fn authenticate(
    req: &HttpRequest,
    settings: &AuthSettings,
    http_client: &reqwest::Client,
) -> Result<AuthIdentity, AuthError> {
    if let Some(api_key) = extract_api_key(req, settings) {
        return validate_api_key(&api_key, settings, http_client).await;
    }

    if let Some(token) = extract_jwt(req, settings) {
        return validate_jwt(&token, settings);
    }

    Err(AuthError::Missing)
}

async fn validate_api_key(
    key: &str,
    settings: &AuthSettings,
    http_client: &reqwest::Client,
) -> Result<AuthIdentity, AuthError> {
    let url = settings
        .api_key_validation_url
        .as_ref()
        .ok_or(AuthError::Missing)?;

    let response = http_client
        .post(url)
        .header("x-api-key", key)
        .send()
        .await
        .map_err(|e| AuthError::UpstreamError(e.to_string()))?;

    let body: ApiKeyValidationResponse = response
        .json()
        .await
        .map_err(|e| AuthError::UpstreamError(e.to_string()))?;

    if !body.valid {
        return Err(AuthError::Invalid("api key rejected".to_string()));
    }

    Ok(AuthIdentity {
        subject: body.user_id.unwrap_or_default(),
        role: body.role,
    })
}

fn validate_jwt(token: &str, settings: &AuthSettings) -> Result<AuthIdentity, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
    if let Some(issuer) = &settings.issuer {
        validation.set_issuer(&[issuer]);
    }
    if let Some(audience) = &settings.audience {
        validation.set_audience(&[audience]);
    }

    let decoding_key = DecodingKey::from_secret(settings.jwt_secret.as_bytes());
    let data = decode::<Claims>(token, &decoding_key, &validation)
        .map_err(|e| AuthError::Invalid(e.to_string()))?;

    Ok(AuthIdentity {
        subject: data.claims.sub,
        role: data.claims.role,
    })
}
