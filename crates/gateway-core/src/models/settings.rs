//! Top-level configuration document (§6 "Configuration inputs").

use crate::models::route::Route;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_read_timeout() -> u64 {
    30
}
fn default_idle_timeout() -> u64 {
    90
}
fn default_max_header_bytes() -> usize {
    16 * 1024
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub address: String,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,
    #[serde(default = "default_read_timeout")]
    pub write_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    #[serde(default = "default_true")]
    pub http2: bool,
    #[serde(default = "default_true")]
    pub compression: bool,
    /// 10s typical (§5 "Cancellation and timeouts").
    #[serde(default = "default_shutdown_deadline")]
    pub shutdown_deadline_seconds: u64,
}

fn default_host() -> String {
    "0.0.0.0:5900".to_string()
}

fn default_shutdown_deadline() -> u64 {
    10
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: default_host(),
            read_timeout_seconds: default_read_timeout(),
            write_timeout_seconds: default_read_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
            max_header_bytes: default_max_header_bytes(),
            http2: true,
            compression: true,
            shutdown_deadline_seconds: default_shutdown_deadline(),
        }
    }
}

fn default_jwt_header() -> String {
    "Authorization".to_string()
}
fn default_api_key_header() -> String {
    "X-API-Auth-Token".to_string()
}
fn default_jwt_expiry_hours() -> i64 {
    24
}

/// Authentication configuration: the two credential channels of §4.6.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthSettings {
    #[serde(default = "jwt_secret_from_env")]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_header")]
    pub jwt_header: String,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    #[serde(default)]
    pub api_key_validation_url: Option<String>,
    #[serde(default = "default_jwt_expiry_hours")]
    pub jwt_expiry_hours: i64,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

fn jwt_secret_from_env() -> String {
    std::env::var("JWT_SECRET").unwrap_or_else(|_| "please-change-this-secret".to_string())
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: jwt_secret_from_env(),
            jwt_header: default_jwt_header(),
            api_key_header: default_api_key_header(),
            api_key_validation_url: std::env::var("API_VALIDATION_URL").ok(),
            jwt_expiry_hours: default_jwt_expiry_hours(),
            issuer: None,
            audience: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CacheSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub default_ttl_seconds: u64,
    #[serde(default)]
    pub max_size: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CorsSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cors_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default)]
    pub expose_headers: Vec<String>,
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_cors_methods() -> Vec<String> {
    vec![
        "GET".to_string(),
        "POST".to_string(),
        "PUT".to_string(),
        "DELETE".to_string(),
        "OPTIONS".to_string(),
        "PATCH".to_string(),
    ]
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: default_cors_origins(),
            allowed_methods: default_cors_methods(),
            allow_credentials: false,
            expose_headers: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SecuritySettings {
    #[serde(default)]
    pub hsts: bool,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
}

fn default_metrics_endpoint() -> String {
    "/metrics".to_string()
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_metrics_endpoint(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TracingSettings {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub sample_rate: f64,
}

fn default_grpc_max_message_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_grpc_keepalive_seconds() -> u64 {
    30
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GrpcSettings {
    /// Optional dedicated gRPC listener; defaults to HTTP port + 1.
    #[serde(default)]
    pub server_address: Option<String>,
    #[serde(default = "default_grpc_max_message_bytes")]
    pub max_recv_message_bytes: usize,
    #[serde(default = "default_grpc_max_message_bytes")]
    pub max_send_message_bytes: usize,
    #[serde(default = "default_grpc_keepalive_seconds")]
    pub keepalive_seconds: u64,
    #[serde(default)]
    pub reflection_enabled: bool,
    /// Path to a compiled `FileDescriptorSet` used to resolve method
    /// descriptors for HTTP↔gRPC bridging (§4.9 "process-wide registry").
    #[serde(default)]
    pub descriptor_set_path: Option<String>,
    #[serde(default)]
    pub pool_max_idle_seconds: u64,
}

impl Default for GrpcSettings {
    fn default() -> Self {
        Self {
            server_address: None,
            max_recv_message_bytes: default_grpc_max_message_bytes(),
            max_send_message_bytes: default_grpc_max_message_bytes(),
            keepalive_seconds: default_grpc_keepalive_seconds(),
            reflection_enabled: false,
            descriptor_set_path: None,
            pool_max_idle_seconds: 300,
        }
    }
}

/// Top-level configuration document loaded once at startup.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    pub version: u8,
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default)]
    pub service: Option<String>,

    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub cors: CorsSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub tracing: TracingSettings,
    #[serde(default)]
    pub grpc: GrpcSettings,

    /// Route table. Declaration order matters: it breaks ties among
    /// equal-length prefix routes (§4.1).
    pub routers: Vec<Route>,
}

impl Settings {
    /// Validates every route plus the cross-cutting auth requirement: any
    /// route requiring auth needs either a JWT secret or a configured
    /// `api_key_validation_url`.
    pub fn validate(&self) -> Result<(), String> {
        let has_auth_routes = self.routers.iter().any(|r| r.middlewares.auth);

        if has_auth_routes {
            let has_jwt = !self.auth.jwt_secret.is_empty()
                && self.auth.jwt_secret != "please-change-this-secret";
            let has_api_key = self.auth.api_key_validation_url.is_some();
            if !has_jwt && !has_api_key {
                return Err(
                    "routes require auth but neither jwt_secret nor api_key_validation_url is configured"
                        .to_string(),
                );
            }
            if has_jwt && self.auth.jwt_secret.len() < 32 {
                return Err("jwt_secret should be at least 32 characters for security".to_string());
            }
        }

        for route in &self.routers {
            route.validate()?;
        }

        Ok(())
    }
}
