//! Data models and domain types for the gateway.
//!
//! This module contains all the core data structures used throughout the
//! gateway, including configuration models, error types, and domain entities.
//! These models provide type safety, serialization support, and validation
//! logic for the gateway's operation.
//!
//! # Module Organization
//!
//! - [`error`] - Gateway-specific error types with HTTP response mapping
//! - [`protocol`] - The `Protocol` a route speaks on its client-facing side
//! - [`route`] - Route configuration and validation logic
//! - [`settings`] - Application configuration and settings management
//!
//! # Examples
//!
//! ```rust
//! use gateway_core::models::{route::Route, protocol::Protocol, error::GatewayError};
//!
//! let route = Route {
//!     path: "/api/users/*".to_string(),
//!     methods: vec!["GET".to_string(), "PUT".to_string()],
//!     protocol: Protocol::Http,
//!     endpoints_protocol: Protocol::Http,
//!     upstream: Some("http://backend:8080".to_string()),
//!     strip_prefix: true,
//!     timeout_seconds: 30,
//!     load_balancing: None,
//!     websocket: None,
//!     middlewares: Default::default(),
//!     compression: false,
//!     ip_whitelist: Vec::new(),
//!     ip_blacklist: Vec::new(),
//!     error_handling: None,
//! };
//!
//! route.validate().expect("invalid route configuration");
//!
//! let error = GatewayError::RouteNotFound {
//!     method: "GET".to_string(),
//!     path: "/unknown/path".to_string(),
//! };
//! ```

pub mod error;
pub mod protocol;
pub mod route;
pub mod settings;
