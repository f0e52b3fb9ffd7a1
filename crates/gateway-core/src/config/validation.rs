//! Comprehensive configuration validation with detailed error reporting.
//!
//! Beyond the structural checks in [`crate::models::route::Route::validate`],
//! this module checks the cross-route invariant I1 (no two routes share the
//! same (method, exact path)) and raises warnings/recommendations for
//! configuration that is legal but likely a mistake.

use crate::models::route::Route;
use crate::models::settings::Settings;
use std::collections::HashSet;

/// Result of configuration validation containing errors, warnings, and
/// recommendations, categorized by severity.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }
}

/// Stateless comprehensive validator for a loaded [`Settings`] document.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates structure (I1/I2 + per-route shape), security posture and
    /// performance-relevant configuration.
    pub fn validate_comprehensive(settings: &Settings) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(e) = settings.validate() {
            result.add_error(e);
        }

        Self::check_route_conflicts(&settings.routers, &mut result);
        Self::check_security(settings, &mut result);
        Self::check_performance(&settings.routers, &mut result);

        result
    }

    /// Invariant I1: no two routes may share the same (method, exact path).
    /// Prefix routes are not subject to I1 (their priority is resolved by
    /// descending prefix length, §4.1), but we still flag an exact duplicate
    /// prefix declaration as a likely mistake.
    fn check_route_conflicts(routes: &[Route], result: &mut ValidationResult) {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for route in routes {
            let methods: Vec<String> = if route.methods.is_empty() {
                vec!["*".to_string()]
            } else {
                route.methods.iter().map(|m| m.to_uppercase()).collect()
            };
            for method in methods {
                let key = (method, route.path.clone());
                if !seen.insert(key.clone()) {
                    result.add_error(format!(
                        "duplicate route: method {} path {} declared more than once",
                        key.0, key.1
                    ));
                }
            }
        }
    }

    fn check_security(settings: &Settings, result: &mut ValidationResult) {
        for route in &settings.routers {
            if route.middlewares.auth && route.ip_whitelist.is_empty() && route.ip_blacklist.is_empty() {
                result.add_recommendation(format!(
                    "route {} requires auth but has no IP allow/deny list configured",
                    route.path
                ));
            }
            for url in route.endpoint_urls() {
                if url.starts_with("http://") {
                    result.add_warning(format!(
                        "route {} upstream {} uses plaintext HTTP",
                        route.path, url
                    ));
                }
            }
        }

        if settings.auth.jwt_secret == "please-change-this-secret" {
            result.add_warning("auth.jwt_secret is using the insecure default value".to_string());
        }
    }

    fn check_performance(routes: &[Route], result: &mut ValidationResult) {
        if routes.len() > 500 {
            result.add_recommendation(
                "large route table (>500 entries); verify prefix-match ordering is still O(log n)-ish in practice"
                    .to_string(),
            );
        }
        for route in routes {
            if let Some(lb) = &route.load_balancing {
                if lb.endpoints.len() > 1
                    && lb
                        .health_check
                        .as_ref()
                        .map(|h| !h.enabled)
                        .unwrap_or(true)
                {
                    result.add_recommendation(format!(
                        "route {} load-balances across {} endpoints without active health checks",
                        route.path,
                        lb.endpoints.len()
                    ));
                }
            }
        }
    }
}
