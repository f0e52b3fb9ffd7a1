//! Service layer: upstream selection, resilience primitives, and the three
//! protocol bridges (HTTP, WebSocket, gRPC).
//!
//! # Module organization
//!
//! - [`circuit_breaker`] - per-route failure tracking and trip/recover state machine (§4.4)
//! - [`load_balancer`] - endpoint selection and active health checks (§4.3)
//! - [`discovery`] - dynamic endpoint discovery drivers (§4.3)
//! - [`http`] - the HTTP reverse-proxy dispatch path (§4.7)
//! - [`websocket`] - bidirectional WebSocket bridging (§4.8)
//! - [`grpc`] - HTTP↔gRPC bridging over a pooled channel (§4.9)

pub mod circuit_breaker;
pub mod discovery;
pub mod grpc;
pub mod http;
pub mod load_balancer;
pub mod websocket;
