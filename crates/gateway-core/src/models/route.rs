//! Route configuration: the declarative binding of a path+method pair to an
//! upstream and a per-route middleware pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::protocol::Protocol;

/// Upstream selection policy when a route has more than one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingMethod {
    RoundRobin,
    Random,
}

impl Default for LoadBalancingMethod {
    fn default() -> Self {
        LoadBalancingMethod::RoundRobin
    }
}

/// Backend for discovering the endpoint set of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryDriver {
    Static,
    Etcd,
    Consul,
}

impl Default for DiscoveryDriver {
    fn default() -> Self {
        DiscoveryDriver::Static
    }
}

fn default_health_interval() -> u64 {
    10
}

fn default_health_timeout() -> u64 {
    2
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// Active health-check parameters for a route's load balancer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_health_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_health_path")]
    pub path: String,
    /// Carried through but not enforced beyond single-probe transitions
    /// (§4.3 permits but does not require hysteresis).
    #[serde(default)]
    pub healthy_threshold: Option<u32>,
    #[serde(default)]
    pub unhealthy_threshold: Option<u32>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: default_health_interval(),
            timeout_seconds: default_health_timeout(),
            path: default_health_path(),
            healthy_threshold: None,
            unhealthy_threshold: None,
        }
    }
}

/// Upstream selection configuration: endpoint set, balancing method and
/// discovery driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancingConfig {
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub method: LoadBalancingMethod,
    #[serde(default)]
    pub driver: DiscoveryDriver,
    /// Key prefix for discovery watches: `prefix/service-name/*`.
    #[serde(default)]
    pub discovery_prefix: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
}

/// WebSocket bridging parameters (only consulted when `protocol = SOCKET`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub client_path: Option<String>,
    #[serde(default)]
    pub upstream_path: Option<String>,
}

/// A single request-side header mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HeaderTransformRule {
    Set { name: String, value: String },
    Add { name: String, value: String },
    Remove { name: String },
    /// Regex-based value replacement: first match of `pattern` in the
    /// header's current value is replaced with `replacement`.
    Replace {
        name: String,
        pattern: String,
        replacement: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderTransformConfig {
    #[serde(default)]
    pub request: Vec<HeaderTransformRule>,
    #[serde(default)]
    pub response: Vec<HeaderTransformRule>,
}

fn default_rate_limit_period_seconds() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Token bucket capacity (requests per `period`).
    pub requests: u64,
    #[serde(default = "default_rate_limit_period_seconds")]
    pub period_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRouteConfig {
    #[serde(default)]
    pub ttl_seconds: u64,
    #[serde(default)]
    pub max_size: Option<usize>,
    #[serde(default)]
    pub cache_authenticated: bool,
    #[serde(default = "default_vary_headers")]
    pub vary_headers: Vec<String>,
}

fn default_vary_headers() -> Vec<String> {
    vec!["Accept".to_string(), "Accept-Encoding".to_string()]
}

fn default_cb_threshold() -> u64 {
    5
}

fn default_cb_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerRouteConfig {
    #[serde(default = "default_cb_threshold")]
    pub threshold: u64,
    #[serde(default = "default_cb_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

impl Default for CircuitBreakerRouteConfig {
    fn default() -> Self {
        Self {
            threshold: default_cb_threshold(),
            timeout_seconds: default_cb_timeout_seconds(),
            max_concurrent: None,
        }
    }
}

fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_initial_ms() -> u64 {
    100
}
fn default_retry_max_ms() -> u64 {
    2000
}
fn default_retry_multiplier() -> f64 {
    2.0
}
fn default_retry_on() -> Vec<u16> {
    vec![502, 503, 504]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_backoff_ms: default_retry_initial_ms(),
            max_backoff_ms: default_retry_max_ms(),
            multiplier: default_retry_multiplier(),
            retry_on: default_retry_on(),
        }
    }
}

impl RetryPolicy {
    /// A single-attempt policy for routes that configured no `retry_policy`.
    /// Retry is opt-in (§4.2/§7 "retry (if enabled)"): omitting the block
    /// must not silently grant the 3-attempt default.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: default_retry_initial_ms(),
            max_backoff_ms: default_retry_max_ms(),
            multiplier: default_retry_multiplier(),
            retry_on: vec![],
        }
    }
}

/// Per-route middleware configuration block (stage 2-7 of §4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiddlewaresConfig {
    #[serde(default)]
    pub auth: bool,
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub cache: Option<CacheRouteConfig>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerRouteConfig>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub header_transform: Option<HeaderTransformConfig>,
    /// Ordered `(match, replacement)` pairs; first prefix match wins,
    /// replace-first is performed (§4.7 "URL rewrite").
    #[serde(default)]
    pub url_rewrite: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    #[serde(default)]
    pub default_message: Option<String>,
    #[serde(default)]
    pub status_messages: HashMap<u16, String>,
}

fn default_timeout_seconds() -> u64 {
    30
}

/// A declarative route. Immutable once loaded (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Exact path, or a prefix ending in `/*`.
    pub path: String,
    /// Allowed methods; empty means "all methods".
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub protocol: Protocol,
    /// Upstream-side protocol; usually equal to `protocol`.
    #[serde(default)]
    pub endpoints_protocol: Protocol,
    /// Single-endpoint fallback when `load_balancing` is absent.
    #[serde(default)]
    pub upstream: Option<String>,
    #[serde(default)]
    pub strip_prefix: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub load_balancing: Option<LoadBalancingConfig>,
    #[serde(default)]
    pub websocket: Option<WebSocketConfig>,
    #[serde(default)]
    pub middlewares: MiddlewaresConfig,
    #[serde(default)]
    pub compression: bool,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    #[serde(default)]
    pub ip_blacklist: Vec<String>,
    #[serde(default)]
    pub error_handling: Option<ErrorHandlingConfig>,
}

impl Route {
    /// Structural validation of a single route (I2 and basic shape checks).
    /// Cross-route invariant I1 is checked over the whole route table by
    /// `utils::route_matcher::RouteMatcher::new`.
    pub fn validate(&self) -> Result<(), String> {
        if self.path.is_empty() || !self.path.starts_with('/') {
            return Err(format!("route path must start with '/': {}", self.path));
        }

        let valid_methods = [
            "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE",
        ];
        for method in &self.methods {
            if !valid_methods.contains(&method.to_uppercase().as_str()) {
                return Err(format!("invalid HTTP method: {}", method));
            }
        }

        if self.upstream.is_none() && self.load_balancing.is_none() {
            return Err(format!(
                "route {} must specify either upstream or load_balancing",
                self.path
            ));
        }

        if let Some(lb) = &self.load_balancing {
            if lb.endpoints.is_empty() && lb.driver == DiscoveryDriver::Static {
                return Err(format!(
                    "route {} has a static load_balancing block with no endpoints",
                    self.path
                ));
            }
        }

        match self.protocol {
            Protocol::Grpc => {
                if self.endpoints_protocol != Protocol::Grpc {
                    return Err(format!(
                        "route {}: GRPC route requires endpoints_protocol=GRPC",
                        self.path
                    ));
                }
            }
            Protocol::Socket => {
                let ws_ok = self
                    .websocket
                    .as_ref()
                    .map(|w| w.enabled)
                    .unwrap_or(false);
                if !ws_ok {
                    return Err(format!(
                        "route {}: SOCKET route requires websocket.enabled=true",
                        self.path
                    ));
                }
            }
            Protocol::Http => {}
        }

        if let Some(retry) = self.middlewares.retry_policy.as_ref() {
            if retry.multiplier < 1.0 {
                return Err("retry_policy.multiplier must be >= 1.0".to_string());
            }
        }

        Ok(())
    }

    /// `true` if `path` is a wildcard prefix (`"/x/*"`).
    pub fn is_prefix(&self) -> bool {
        self.path.ends_with("/*")
    }

    /// The bare prefix with the trailing `/*` stripped, e.g. `"/x/*"` → `"/x"`.
    pub fn prefix(&self) -> &str {
        self.path.trim_end_matches("/*")
    }

    /// `true` if this route has any `url_rewrite` rules configured.
    pub fn url_rewrite_active(&self) -> bool {
        !self.middlewares.url_rewrite.is_empty()
    }

    /// Endpoint URLs for this route, resolving the legacy single-`upstream`
    /// shorthand into a one-element list.
    pub fn endpoint_urls(&self) -> Vec<String> {
        if let Some(lb) = &self.load_balancing {
            if !lb.endpoints.is_empty() {
                return lb.endpoints.clone();
            }
        }
        self.upstream.clone().into_iter().collect()
    }
}
