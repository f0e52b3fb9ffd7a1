//! Reserved endpoints and the request dispatcher (§6, §4.2).
//!
//! - [`dispatch`] — the catch-all handler driving route match → middleware
//!   pipeline → proxy for every non-reserved path.
//! - [`health`] — `/health`, `/ready`, `/live`.
//! - [`metrics`] — `/metrics` text exposition.
//! - [`admin`] — `/docs/swagger/*` and `/test-ip`.

pub mod admin;
pub mod dispatch;
pub mod health;
pub mod metrics;
