//! HTTP reverse-proxy dispatch (§4.7): director rewrites, upstream selection,
//! circuit breaker + retry, response shaping, and the HTTP↔gRPC bridge for
//! `protocol: GRPC` routes.

use actix_web::{
    http::{Method as ActixMethod, StatusCode},
    web, Error as ActixError, HttpRequest, HttpResponse,
};
use log::{debug, warn};
use reqwest::{
    header::{HeaderMap as ReqwestHeaderMap, HeaderName, HeaderValue},
    Client, Method as ReqwestMethod,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::error::GatewayError;
use crate::models::protocol::Protocol;
use crate::models::route::{RetryPolicy, Route};
use crate::models::settings::GrpcSettings;
use crate::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::services::discovery::{DiscoveryDriver, EtcdDriver};
use crate::services::grpc::GrpcBridge;
use crate::services::load_balancer::{self, LoadBalancer};
use crate::routes::metrics::MetricsRegistry;
use crate::utils::path::join_url;
use crate::utils::route_matcher::RouteMatch;

const SKIP_REQUEST_HEADERS: &[&str] = &["host", "connection", "upgrade", "proxy-connection"];

/// Forwards requests matched by the route table to their upstream, applying
/// the director/URL rewrites, circuit breaker, and retry policy of §4.7.
pub struct RouteHandler {
    client: Client,
    circuit_breakers: HashMap<String, Arc<CircuitBreaker>>,
    load_balancers: HashMap<String, Arc<LoadBalancer>>,
    grpc: Option<GrpcBridge>,
}

impl RouteHandler {
    pub fn new(routes: &[Route], grpc_settings: &GrpcSettings, metrics: Arc<MetricsRegistry>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .build()
            .expect("failed to build upstream HTTP client");

        let mut circuit_breakers = HashMap::new();
        let mut load_balancers = HashMap::new();

        for route in routes {
            let cb_config = route
                .middlewares
                .circuit_breaker
                .as_ref()
                .map(CircuitBreakerConfig::from)
                .unwrap_or_default();
            circuit_breakers.insert(
                route.path.clone(),
                CircuitBreaker::new(route.path.clone(), cb_config, metrics.clone()),
            );

            // A discovery-driven route (driver != Static) typically starts
            // with zero or one seed endpoint and is populated later by the
            // watcher, so the balancer must exist from the start regardless
            // of how many endpoints are configured up front.
            if let Some(lb_config) = &route.load_balancing {
                let balancer = LoadBalancer::new(lb_config);
                load_balancer::spawn_health_checks(
                    route.path.clone(),
                    balancer.clone(),
                    lb_config.health_check.clone(),
                    client.clone(),
                    metrics.clone(),
                );
                spawn_discovery(route, lb_config, balancer.clone());
                load_balancers.insert(route.path.clone(), balancer);
            }
        }

        let grpc = if routes.iter().any(|r| r.protocol == Protocol::Grpc) {
            let pool = crate::services::grpc::GrpcPool::new(grpc_settings.clone(), metrics.clone());
            crate::services::grpc::spawn_pool_cleanup(pool.clone());
            let descriptors =
                crate::services::grpc::load_descriptor_pool(grpc_settings.descriptor_set_path.as_deref());
            Some(GrpcBridge::new(pool, descriptors, metrics.clone()))
        } else {
            None
        };

        Self {
            client,
            circuit_breakers,
            load_balancers,
            grpc,
        }
    }

    fn select_upstream(&self, route_match: &RouteMatch) -> Result<String, GatewayError> {
        if let Some(balancer) = self.load_balancers.get(&route_match.route.path) {
            return balancer
                .select()
                .ok_or_else(|| GatewayError::Config(format!(
                    "route {} has no available upstream endpoints",
                    route_match.route.path
                )));
        }
        route_match
            .route
            .endpoint_urls()
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Config(format!(
                "route {} has no upstream configured",
                route_match.route.path
            )))
    }

    /// Selects an upstream and bridges `req` into a WebSocket connection to
    /// it (§4.8). Only called for routes already known to be `SOCKET`.
    pub async fn forward_websocket(
        &self,
        route_match: &RouteMatch,
        req: &HttpRequest,
        payload: web::Payload,
    ) -> Result<HttpResponse, ActixError> {
        let upstream = self.select_upstream(route_match)?;
        crate::services::websocket::bridge(
            req,
            payload,
            &route_match.route,
            &upstream,
            &route_match.forwarded_path,
        )
        .await
    }

    /// Dispatches a matched, already-authenticated/rate-limited request to
    /// its upstream. Handles both `HTTP` and `GRPC` routes; `SOCKET` routes
    /// are never dispatched here (they go through the WebSocket bridge).
    pub async fn forward(
        &self,
        route_match: &RouteMatch,
        req: &HttpRequest,
        body: web::Bytes,
    ) -> Result<HttpResponse, ActixError> {
        match route_match.route.protocol {
            Protocol::Grpc => self.forward_grpc(route_match, req, body).await,
            Protocol::Http | Protocol::Socket => self.forward_http(route_match, req, body).await,
        }
    }

    async fn forward_grpc(
        &self,
        route_match: &RouteMatch,
        req: &HttpRequest,
        body: web::Bytes,
    ) -> Result<HttpResponse, ActixError> {
        let bridge = self
            .grpc
            .as_ref()
            .ok_or_else(|| GatewayError::Config("gRPC bridge not initialized".to_string()))?;
        let target = self.select_upstream(route_match)?;
        let route = &route_match.route;
        let retry = route
            .middlewares
            .retry_policy
            .clone()
            .unwrap_or_else(RetryPolicy::disabled);
        let timeout = Duration::from_secs(route.timeout_seconds);

        match bridge
            .call(&target, req.path(), &body, timeout, &retry)
            .await
        {
            Ok(json_bytes) => Ok(HttpResponse::Ok()
                .content_type("application/json")
                .body(json_bytes)),
            Err(e) => {
                let status = e.http_status();
                Ok(GatewayError::GrpcStatus {
                    code: 2, // Unknown; callers rely on http_status() above for the actual code
                    message: e.to_string(),
                }
                .render_with_template(status, route_error_template(route, status).as_deref()))
            }
        }
    }

    async fn forward_http(
        &self,
        route_match: &RouteMatch,
        req: &HttpRequest,
        body: web::Bytes,
    ) -> Result<HttpResponse, ActixError> {
        let route = route_match.route.clone();
        let circuit_breaker = self
            .circuit_breakers
            .get(&route.path)
            .cloned()
            .ok_or_else(|| GatewayError::Config(format!("no circuit breaker for {}", route.path)))?;

        let retry = route
            .middlewares
            .retry_policy
            .clone()
            .unwrap_or_else(RetryPolicy::disabled);
        let reqwest_method = to_reqwest_method(req.method());
        let headers = build_request_headers(req.headers());
        let mut headers = {
            let mut actix_map = actix_header_map_from_reqwest(&headers);
            if let Some(request_rules) = route
                .middlewares
                .header_transform
                .as_ref()
                .map(|h| &h.request)
            {
                crate::middleware::transform::apply_header_rules(&mut actix_map, request_rules);
            }
            reqwest_header_map_from_actix(&actix_map)
        };

        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(retry.initial_backoff_ms);

        loop {
            attempt += 1;
            let upstream = self.select_upstream(route_match)?;
            let path = if route.url_rewrite_active() {
                crate::middleware::transform::rewrite_url(
                    &route_match.forwarded_path,
                    &route.middlewares.url_rewrite,
                )
            } else {
                route_match.forwarded_path.clone()
            };
            let target_url = join_url(&upstream, &path);

            let mut outgoing_headers = headers.clone();
            director_rewrite_headers(&mut outgoing_headers, req, &upstream);

            debug!(
                "forwarding {} {} -> {} (attempt {}/{})",
                req.method(),
                req.path(),
                target_url,
                attempt,
                retry.max_attempts
            );

            let request_builder = self
                .client
                .request(reqwest_method.clone(), &target_url)
                .headers(outgoing_headers)
                .timeout(Duration::from_secs(route.timeout_seconds))
                .body(body.to_vec());

            // §4.4: a response status >= 500 counts as a circuit-breaker
            // failure exactly like a dial/timeout error, so both are folded
            // into the same `Err` arm of the protected operation.
            let call_result = circuit_breaker
                .call(async {
                    let response = request_builder
                        .send()
                        .await
                        .map_err(classify_reqwest_error)?;
                    if response.status().as_u16() >= 500 {
                        Err(UpstreamOutcome::ServerError(response))
                    } else {
                        Ok(response)
                    }
                })
                .await;

            match call_result {
                Ok(response) => {
                    return Ok(build_client_response(response, &route).await?);
                }
                Err(CircuitBreakerError::CircuitOpen) => {
                    return Err(GatewayError::CircuitOpen.into());
                }
                Err(CircuitBreakerError::TooManyInFlight) => {
                    return Err(GatewayError::TooManyInFlight.into());
                }
                Err(CircuitBreakerError::OperationFailed(UpstreamOutcome::ServerError(response))) => {
                    let status = response.status().as_u16();
                    if retry.retry_on.contains(&status) && attempt < retry.max_attempts {
                        warn!("retryable status {} from {}, retrying", status, target_url);
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff, &retry);
                        continue;
                    }
                    return Ok(build_client_response(response, &route).await?);
                }
                Err(CircuitBreakerError::OperationFailed(UpstreamOutcome::Dial(gateway_error))) => {
                    let retryable = matches!(
                        gateway_error,
                        GatewayError::DialFailed(_) | GatewayError::Timeout
                    );
                    if retryable && attempt < retry.max_attempts {
                        warn!("upstream error for {}: {}, retrying", target_url, gateway_error);
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff, &retry);
                        continue;
                    }
                    let status = match &gateway_error {
                        GatewayError::Timeout => 504,
                        _ => 502,
                    };
                    return Ok(gateway_error
                        .render_with_template(status, route_error_template(&route, status).as_deref()));
                }
            }
        }
    }
}

/// The two ways a protected upstream call can fail the circuit breaker: a
/// dial/timeout error, or a response the breaker should count against it
/// (any status >= 500). Kept separate from [`GatewayError`] because it
/// carries a live `reqwest::Response` that still needs its body read.
enum UpstreamOutcome {
    Dial(GatewayError),
    ServerError(reqwest::Response),
}

impl From<GatewayError> for UpstreamOutcome {
    fn from(e: GatewayError) -> Self {
        UpstreamOutcome::Dial(e)
    }
}

fn spawn_discovery(
    route: &Route,
    lb_config: &crate::models::route::LoadBalancingConfig,
    balancer: Arc<LoadBalancer>,
) {
    use crate::models::route::DiscoveryDriver as ConfigDriver;
    let driver = match lb_config.driver {
        ConfigDriver::Static | ConfigDriver::Consul => DiscoveryDriver::Static,
        ConfigDriver::Etcd => {
            let endpoints = lb_config.endpoints.clone();
            let prefix = lb_config
                .discovery_prefix
                .clone()
                .unwrap_or_else(|| "/gateway/services".to_string());
            let service_name = lb_config
                .service_name
                .clone()
                .unwrap_or_else(|| route.path.clone());
            DiscoveryDriver::Etcd(EtcdDriver::new(endpoints, prefix, service_name))
        }
    };
    tokio::spawn(async move {
        driver.start(balancer).await;
    });
}

fn to_reqwest_method(method: &ActixMethod) -> ReqwestMethod {
    ReqwestMethod::from_bytes(method.as_str().as_bytes()).unwrap_or(ReqwestMethod::GET)
}

fn build_request_headers(original: &actix_web::http::header::HeaderMap) -> ReqwestHeaderMap {
    let mut headers = ReqwestHeaderMap::with_capacity(original.len());
    for (name, value) in original {
        let name_lower = name.as_str().to_lowercase();
        if SKIP_REQUEST_HEADERS.iter().any(|h| name_lower.starts_with(h)) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_ref()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.insert(name, value);
        }
    }
    headers
}

/// Adapts the reqwest header map into an actix one so header_transform rules
/// (defined against `actix_web::http::header::HeaderMap`) can run once over
/// the outgoing request. Values that fail to convert are dropped silently,
/// matching the permissive behavior of the original header copy.
fn actix_header_map_from_reqwest(
    headers: &ReqwestHeaderMap,
) -> actix_web::http::header::HeaderMap {
    let mut map = actix_web::http::header::HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            actix_web::http::header::HeaderName::from_bytes(name.as_ref()),
            actix_web::http::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            map.insert(name, value);
        }
    }
    map
}

/// Converts back after `header_transform.request` rules have run on the
/// actix-side map, so the result can be handed to the reqwest request
/// builder.
fn reqwest_header_map_from_actix(
    headers: &actix_web::http::header::HeaderMap,
) -> ReqwestHeaderMap {
    let mut map = ReqwestHeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_ref()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            map.insert(name, value);
        }
    }
    map
}

/// Sets the director headers (§4.7 "Director rewrites"): `Host` rewritten to
/// the upstream's authority, `X-Forwarded-*` populated from the original
/// request, and `X-Gateway-Proxy: true` added as a provenance marker.
fn director_rewrite_headers(headers: &mut ReqwestHeaderMap, req: &HttpRequest, upstream: &str) {
    if let Ok(upstream_uri) = upstream.parse::<actix_web::http::Uri>() {
        if let Some(authority) = upstream_uri.authority() {
            if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
                headers.insert(HeaderName::from_static("host"), value);
            }
        }
    }

    let client_ip = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("")
        .to_string();
    if !client_ip.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&client_ip) {
            headers.insert(HeaderName::from_static("x-forwarded-for"), value);
        }
    }
    if let Some(host) = req.connection_info().host().split(':').next() {
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), value);
        }
    }
    let scheme = req.connection_info().scheme().to_string();
    if let Ok(value) = HeaderValue::from_str(&scheme) {
        headers.insert(HeaderName::from_static("x-forwarded-proto"), value);
    }
    headers.insert(
        HeaderName::from_static("x-gateway-proxy"),
        HeaderValue::from_static("true"),
    );
}

fn classify_reqwest_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::DialFailed(e.to_string())
    }
}

fn next_backoff(current: Duration, retry: &crate::models::route::RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64) * retry.multiplier;
    Duration::from_millis(next_ms as u64).min(Duration::from_millis(retry.max_backoff_ms))
}

fn route_error_template(route: &Route, status: u16) -> Option<String> {
    route.error_handling.as_ref().and_then(|cfg| {
        cfg.status_messages
            .get(&status)
            .cloned()
            .or_else(|| cfg.default_message.clone())
    })
}

/// Rebuilds the client-facing response from the upstream one: applies
/// response-side `header_transform` rules and, on 5xx, substitutes the
/// configured error template while fixing up `Content-Length` (§4.7
/// "Response shaping").
async fn build_client_response(
    response: reqwest::Response,
    route: &Route,
) -> Result<HttpResponse, ActixError> {
    let status = response.status().as_u16();

    if status >= 500 {
        if let Some(template) = route_error_template(route, status) {
            let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            return Ok(HttpResponse::build(status_code)
                .content_type("text/plain")
                .insert_header(("Content-Length", template.len().to_string()))
                .body(template));
        }
    }

    let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status_code);
    let mut header_map = actix_web::http::header::HeaderMap::new();
    for (name, value) in response.headers() {
        if name.as_str().eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            actix_web::http::header::HeaderName::from_bytes(name.as_ref()),
            actix_web::http::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            header_map.insert(name, value);
        }
    }
    if let Some(response_rules) = route
        .middlewares
        .header_transform
        .as_ref()
        .map(|h| &h.response)
    {
        crate::middleware::transform::apply_header_rules(&mut header_map, response_rules);
    }
    for (name, value) in header_map.iter() {
        builder.insert_header((name.clone(), value.clone()));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| GatewayError::DialFailed(e.to_string()))?;
    Ok(builder.body(bytes))
}
