//! Route matching and path-manipulation helpers.

pub mod path;
pub mod route_matcher;
