//! Per-route middleware: the fixed pipeline of §4.2 stages 2-7 (auth, rate
//! limit, cache, header/URL transform, circuit breaker, retry). Each
//! route gets its own instance of the middleware it enables, wrapped
//! around that route's service in the order declared in
//! [`crate::routes::dispatch`].

pub mod auth;
pub mod cache;
pub mod rate_limit;
pub mod transform;
