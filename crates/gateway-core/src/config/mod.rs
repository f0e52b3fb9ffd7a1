//! Configuration loading and validation.
//!
//! Configuration is loaded exactly once at process startup (§6, §9 Non-goals
//! — no hot reload). `${VAR}` occurrences in the raw document are substituted
//! against the process environment before JSON parsing.

pub mod settings;
pub mod validation;
