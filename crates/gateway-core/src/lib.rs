//! # gateway-core
//!
//! Request-processing fabric for the gateway: route matching, a per-route
//! ordered middleware pipeline (auth, rate limiting, caching, circuit
//! breaking, retry, header/URL transforms, CORS), upstream selection with
//! active health checks and pluggable discovery, and protocol bridges for
//! HTTP, WebSocket and gRPC.
//!
//! # Module Organization
//!
//! - [`models`] - configuration document types, route definitions, error taxonomy
//! - [`config`] - configuration loading and validation
//! - [`utils`] - route matching and path helpers
//! - [`middleware`] - auth, rate limiting, caching, CORS, header/URL transforms
//! - [`services`] - circuit breaker, load balancer, discovery, HTTP/WS/gRPC proxies
//! - [`routes`] - reserved admin endpoints and the per-request dispatcher
//! - [`logs`] - structured log formatting

pub mod config;
pub mod logs;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
