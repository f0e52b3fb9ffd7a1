//! Route matcher: exact-match table plus a prefix table sorted by
//! descending prefix length (§4.1, invariant I1).

use crate::models::route::Route;
use ahash::HashMap as AHashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RouteMatchError {
    #[error("no matching route found for {method} {path}")]
    NoMatch { method: String, path: String },
    #[error("duplicate route: method {method} path {path}")]
    DuplicateExact { method: String, path: String },
}

/// A resolved match: the route, plus the (possibly prefix-stripped) path to
/// hand to the upstream.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub forwarded_path: String,
}

#[derive(Debug, Clone)]
struct PrefixEntry {
    prefix: String,
    methods: Vec<String>,
    route: Arc<Route>,
    declaration_order: usize,
}

/// Compiled route table. Immutable once built (§3 "Route ... immutable
/// after load").
#[derive(Debug)]
pub struct RouteMatcher {
    exact: AHashMap<(String, String), Arc<Route>>,
    prefixes: Vec<PrefixEntry>,
}

fn normalize_method(m: &str) -> String {
    m.to_uppercase()
}

impl RouteMatcher {
    /// Builds exact and prefix tables from `routes`. Prefix routes are
    /// sorted by descending prefix length; ties are broken by declaration
    /// order (a stable sort preserves original order for equal keys).
    pub fn new(routes: Vec<Route>) -> Result<Self, RouteMatchError> {
        let mut exact: AHashMap<(String, String), Arc<Route>> = AHashMap::default();
        let mut prefixes = Vec::new();

        for (i, route) in routes.into_iter().enumerate() {
            let route = Arc::new(route);
            if route.is_prefix() {
                let methods = route
                    .methods
                    .iter()
                    .map(|m| normalize_method(m))
                    .collect::<Vec<_>>();
                prefixes.push(PrefixEntry {
                    prefix: route.prefix().to_string(),
                    methods,
                    route,
                    declaration_order: i,
                });
            } else {
                let methods = if route.methods.is_empty() {
                    vec!["*".to_string()]
                } else {
                    route.methods.iter().map(|m| normalize_method(m)).collect()
                };
                for method in methods {
                    let key = (method.clone(), route.path.clone());
                    if exact.insert(key.clone(), route.clone()).is_some() {
                        return Err(RouteMatchError::DuplicateExact {
                            method: key.0,
                            path: key.1,
                        });
                    }
                }
            }
        }

        prefixes.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then(a.declaration_order.cmp(&b.declaration_order))
        });

        Ok(Self { exact, prefixes })
    }

    /// Finds the route matching `(method, path)` per §4.1: exact hit wins;
    /// otherwise the first (in sorted order) prefix route whose method set
    /// matches (empty means "all"). A wildcard route `"/x/*"` matches any
    /// path beginning with `/x/` and also the bare `/x`.
    pub fn find_match(&self, method: &str, path: &str) -> Result<RouteMatch, RouteMatchError> {
        let method_norm = normalize_method(method);

        if let Some(route) = self
            .exact
            .get(&(method_norm.clone(), path.to_string()))
            .or_else(|| self.exact.get(&("*".to_string(), path.to_string())))
        {
            return Ok(RouteMatch {
                route: route.clone(),
                forwarded_path: self.resolve_forwarded_path(route, path),
            });
        }

        for entry in &self.prefixes {
            let matches_path = path == entry.prefix || path.starts_with(&format!("{}/", entry.prefix));
            if !matches_path {
                continue;
            }
            let matches_method = entry.methods.is_empty()
                || entry.methods.iter().any(|m| m == &method_norm);
            if matches_method {
                return Ok(RouteMatch {
                    route: entry.route.clone(),
                    forwarded_path: self.resolve_forwarded_path(&entry.route, path),
                });
            }
        }

        Err(RouteMatchError::NoMatch {
            method: method.to_string(),
            path: path.to_string(),
        })
    }

    fn resolve_forwarded_path(&self, route: &Route, path: &str) -> String {
        if route.strip_prefix && route.is_prefix() {
            crate::utils::path::strip_prefix(path, route.prefix())
        } else {
            path.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::protocol::Protocol;
    use crate::models::route::MiddlewaresConfig;

    fn route(path: &str, methods: &[&str], strip_prefix: bool) -> Route {
        Route {
            path: path.to_string(),
            methods: methods.iter().map(|s| s.to_string()).collect(),
            protocol: Protocol::Http,
            endpoints_protocol: Protocol::Http,
            upstream: Some("http://backend".to_string()),
            strip_prefix,
            timeout_seconds: 30,
            load_balancing: None,
            websocket: None,
            middlewares: MiddlewaresConfig::default(),
            compression: false,
            ip_whitelist: Vec::new(),
            ip_blacklist: Vec::new(),
            error_handling: None,
        }
    }

    #[test]
    fn exact_match_wins_over_prefix() {
        let matcher = RouteMatcher::new(vec![
            route("/api/*", &["GET"], false),
            route("/api/special", &["GET"], false),
        ])
        .unwrap();
        let m = matcher.find_match("GET", "/api/special").unwrap();
        assert_eq!(m.route.path, "/api/special");
    }

    #[test]
    fn strip_prefix_rewrites_forwarded_path() {
        let matcher = RouteMatcher::new(vec![route("/api/*", &["GET"], true)]).unwrap();
        let m = matcher.find_match("GET", "/api/test").unwrap();
        assert_eq!(m.forwarded_path, "/test");

        let matcher_no_strip = RouteMatcher::new(vec![route("/api/*", &["GET"], false)]).unwrap();
        let m2 = matcher_no_strip.find_match("GET", "/api/test").unwrap();
        assert_eq!(m2.forwarded_path, "/api/test");
    }

    #[test]
    fn wildcard_matches_bare_prefix_too() {
        let matcher = RouteMatcher::new(vec![route("/x/*", &["GET"], false)]).unwrap();
        assert!(matcher.find_match("GET", "/x").is_ok());
        assert!(matcher.find_match("GET", "/x/anything").is_ok());
    }

    #[test]
    fn longer_prefix_wins_ties_by_declaration_order() {
        let matcher = RouteMatcher::new(vec![
            route("/api/*", &["GET"], false),
            route("/api/v2/*", &["GET"], false),
        ])
        .unwrap();
        let m = matcher.find_match("GET", "/api/v2/users").unwrap();
        assert_eq!(m.route.path, "/api/v2/*");
    }

    #[test]
    fn method_filter_on_prefix_routes() {
        let matcher = RouteMatcher::new(vec![route("/api/*", &["POST"], false)]).unwrap();
        assert!(matcher.find_match("GET", "/api/test").is_err());
        assert!(matcher.find_match("POST", "/api/test").is_ok());
    }

    #[test]
    fn rejects_duplicate_exact_route() {
        let err = RouteMatcher::new(vec![route("/a", &["GET"], false), route("/a", &["GET"], false)])
            .unwrap_err();
        assert!(matches!(err, RouteMatchError::DuplicateExact { .. }));
    }

    #[test]
    fn no_match_is_an_error() {
        let matcher = RouteMatcher::new(vec![route("/a", &["GET"], false)]).unwrap();
        assert!(matcher.find_match("GET", "/b").is_err());
    }
}
