//! The per-request dispatcher (§4.2): a single catch-all handler that
//! resolves the matched route dynamically via
//! [`crate::utils::route_matcher::RouteMatcher`] and drives the fixed
//! middleware pipeline (IP filter, auth, rate limit, cache, proxy) around
//! it. Routes are config-driven, so they cannot be registered one-by-one
//! as `actix_web::App` services at build time the way a static site would;
//! this dispatcher plays the role an `App::configure` closure would play
//! for a fixed route table.

use actix_web::{web, Error as ActixError, HttpRequest, HttpResponse};
use ahash::HashMap as AHashMap;
use log::warn;

use crate::middleware::auth::{authenticate, role_allowed, AuthError};
use crate::middleware::cache::{self, ResponseCacheState};
use crate::middleware::rate_limit::{key_for, RateLimiterState};
use crate::models::error::GatewayError;
use crate::models::protocol::Protocol;
use crate::models::route::Route;
use crate::models::settings::{AuthSettings, Settings};
use crate::routes::metrics::MetricsRegistry;
use crate::services::http::RouteHandler;
use crate::utils::route_matcher::{RouteMatchError, RouteMatcher};
use std::sync::Arc;

fn ip_allowed(route: &Route, req: &HttpRequest) -> bool {
    let remote = req.connection_info().realip_remote_addr().map(|s| s.to_string());
    let Some(remote) = remote else {
        return route.ip_whitelist.is_empty();
    };

    if route.ip_blacklist.iter().any(|ip| ip == &remote) {
        return false;
    }
    if !route.ip_whitelist.is_empty() && !route.ip_whitelist.iter().any(|ip| ip == &remote) {
        return false;
    }
    true
}

/// Owns the compiled route table and every piece of shared per-route state
/// (rate limiters, caches) needed to run the §4.2 pipeline for a request.
pub struct GatewayDispatcher {
    matcher: RouteMatcher,
    route_handler: RouteHandler,
    auth_settings: AuthSettings,
    auth_http_client: reqwest::Client,
    rate_limiters: AHashMap<String, RateLimiterState>,
    caches: AHashMap<String, ResponseCacheState>,
    pub metrics: Arc<MetricsRegistry>,
}

impl GatewayDispatcher {
    pub fn new(settings: &Settings) -> Result<Self, RouteMatchError> {
        let routes = &settings.routers;
        let metrics = Arc::new(MetricsRegistry::new());
        let route_handler = RouteHandler::new(routes, &settings.grpc, metrics.clone());

        let mut rate_limiters = AHashMap::default();
        let mut caches = AHashMap::default();
        for route in routes {
            if let Some(rate_limit) = &route.middlewares.rate_limit {
                rate_limiters.insert(route.path.clone(), RateLimiterState::new(rate_limit));
            }
            if let Some(cache_config) = &route.middlewares.cache {
                caches.insert(route.path.clone(), ResponseCacheState::new(cache_config));
            }
        }

        let matcher = RouteMatcher::new(routes.clone())?;

        Ok(Self {
            matcher,
            route_handler,
            auth_settings: settings.auth.clone(),
            auth_http_client: reqwest::Client::new(),
            rate_limiters,
            caches,
            metrics,
        })
    }

    /// Runs the full request pipeline of §4.2: route match, IP filter,
    /// auth, rate limit, cache lookup, then proxy (HTTP, gRPC, or
    /// WebSocket upgrade).
    pub async fn dispatch(
        &self,
        req: HttpRequest,
        payload: web::Payload,
    ) -> Result<HttpResponse, ActixError> {
        let route_match = match self.matcher.find_match(req.method().as_str(), req.path()) {
            Ok(m) => m,
            Err(_) => {
                return Ok(GatewayError::RouteNotFound {
                    method: req.method().to_string(),
                    path: req.path().to_string(),
                }
                .error_response())
            }
        };
        let route = route_match.route.clone();

        if !ip_allowed(&route, &req) {
            self.metrics.record_ip_rejected(&route.path);
            return Ok(actix_web::HttpResponse::Forbidden()
                .json(serde_json::json!({ "error": "Forbidden" })));
        }

        if route.middlewares.auth {
            match authenticate(&req, &self.auth_settings, &self.auth_http_client).await {
                Ok(identity) => {
                    if !role_allowed(&route.middlewares.allowed_roles, &identity.role) {
                        return Ok(HttpResponse::Forbidden()
                            .json(serde_json::json!({ "error": "Forbidden" })));
                    }
                }
                Err(e @ AuthError::Missing) => {
                    return Ok(HttpResponse::Unauthorized().json(serde_json::json!({ "error": e.message() })));
                }
                Err(e @ AuthError::Invalid(_)) => {
                    return Ok(HttpResponse::Unauthorized().json(serde_json::json!({ "error": e.message() })));
                }
                Err(e @ AuthError::UpstreamError(_)) => {
                    warn!("auth upstream error on {}: {}", route.path, e.message());
                    return Ok(HttpResponse::Unauthorized().json(serde_json::json!({ "error": e.message() })));
                }
            }
        }

        if let Some(limiter) = self.rate_limiters.get(&route.path) {
            let key = key_for(&req);
            if let Err(retry_after) = limiter.try_acquire(&key) {
                self.metrics.record_rate_limited(&route.path);
                return Ok(HttpResponse::TooManyRequests()
                    .insert_header(("Retry-After", retry_after.to_string()))
                    .json(serde_json::json!({ "error": "Rate limit exceeded" })));
            }
        }

        if route.protocol == Protocol::Socket {
            return self
                .route_handler
                .forward_websocket(&route_match, &req, payload)
                .await;
        }

        let body = buffer_payload(payload).await?;

        if let Some(cache) = self.caches.get(&route.path) {
            if req.method() == actix_web::http::Method::GET {
                let key = cache.build_key(&req);
                if let Some(cached) = cache.get(&key) {
                    self.metrics.record_cache_hit(&route.path);
                    return Ok(cache::to_http_response(&cached));
                }
                self.metrics.record_cache_miss(&route.path);

                let response = self.route_handler.forward(&route_match, &req, body).await?;
                let (response, to_store) = cache::capture(response, cache.ttl()).await;
                if let Some(entry) = to_store {
                    cache.put(key, entry);
                }
                return Ok(response);
            }
        }

        self.route_handler.forward(&route_match, &req, body).await
    }
}

async fn buffer_payload(mut payload: web::Payload) -> Result<web::Bytes, ActixError> {
    use futures_util::StreamExt;

    let mut buf = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::protocol::Protocol;
    use crate::models::route::MiddlewaresConfig;

    fn route_with_ip_lists(whitelist: Vec<&str>, blacklist: Vec<&str>) -> Route {
        Route {
            path: "/api/*".to_string(),
            methods: vec!["GET".to_string()],
            protocol: Protocol::Http,
            endpoints_protocol: Protocol::Http,
            upstream: Some("http://backend".to_string()),
            strip_prefix: false,
            timeout_seconds: 30,
            load_balancing: None,
            websocket: None,
            middlewares: MiddlewaresConfig::default(),
            compression: false,
            ip_whitelist: whitelist.into_iter().map(|s| s.to_string()).collect(),
            ip_blacklist: blacklist.into_iter().map(|s| s.to_string()).collect(),
            error_handling: None,
        }
    }

    #[actix_web::test]
    async fn no_lists_allows_everyone() {
        let route = route_with_ip_lists(vec![], vec![]);
        let req = actix_web::test::TestRequest::default().to_http_request();
        assert!(ip_allowed(&route, &req));
    }
}
