//! Observability interface (§6 "Observability interface (collaborator)").
//!
//! The gateway itself only needs counters/gauges, not a full metrics
//! client; [`MetricsRegistry`] tracks the named series directly with
//! atomics and per-key maps, and [`metrics_endpoint`] renders them in
//! Prometheus text exposition format for `GET /metrics`.

use actix_web::{web, HttpResponse, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Histogram {
    count: AtomicU64,
    sum_millis: AtomicU64,
}

impl Histogram {
    fn observe(&self, millis: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_millis.fetch_add(millis, Ordering::Relaxed);
    }
}

/// Process-wide counters/gauges enumerated in §6: gRPC pool health, RPC
/// duration/errors by method, LB health-check status by target, circuit
/// breaker state/failures, rate-limit rejections, cache hit/miss.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    grpc_pool_active_connections: AtomicU64,
    grpc_pool_connection_errors: AtomicU64,
    rpc_duration_by_method: Mutex<HashMap<String, Histogram>>,
    rpc_errors_by_method: Mutex<HashMap<String, AtomicU64>>,
    health_check_status_by_target: Mutex<HashMap<String, AtomicU64>>,
    circuit_breaker_state_by_route: Mutex<HashMap<String, AtomicU64>>,
    circuit_breaker_failures_by_route: Mutex<HashMap<String, AtomicU64>>,
    rate_limit_rejections_by_route: Mutex<HashMap<String, AtomicU64>>,
    cache_hits_by_route: Mutex<HashMap<String, AtomicU64>>,
    cache_misses_by_route: Mutex<HashMap<String, AtomicU64>>,
    ip_rejections_by_route: Mutex<HashMap<String, AtomicU64>>,
}

fn bump(map: &Mutex<HashMap<String, AtomicU64>>, key: &str) {
    let mut guard = map.lock().expect("metrics map poisoned");
    guard
        .entry(key.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn set(map: &Mutex<HashMap<String, AtomicU64>>, key: &str, value: u64) {
    let mut guard = map.lock().expect("metrics map poisoned");
    guard
        .entry(key.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .store(value, Ordering::Relaxed);
}

fn render_map(out: &mut String, name: &str, help: &str, map: &Mutex<HashMap<String, AtomicU64>>, label: &str) {
    let guard = map.lock().expect("metrics map poisoned");
    if guard.is_empty() {
        return;
    }
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    for (key, value) in guard.iter() {
        let _ = writeln!(
            out,
            "{name}{{{label}=\"{key}\"}} {value}",
            value = value.load(Ordering::Relaxed)
        );
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ip_rejected(&self, route: &str) {
        bump(&self.ip_rejections_by_route, route);
    }

    pub fn record_rate_limited(&self, route: &str) {
        bump(&self.rate_limit_rejections_by_route, route);
    }

    pub fn record_cache_hit(&self, route: &str) {
        bump(&self.cache_hits_by_route, route);
    }

    pub fn record_cache_miss(&self, route: &str) {
        bump(&self.cache_misses_by_route, route);
    }

    pub fn record_circuit_state(&self, route: &str, state: crate::services::circuit_breaker::CircuitState) {
        set(&self.circuit_breaker_state_by_route, route, state as u8 as u64);
    }

    pub fn record_circuit_failure(&self, route: &str) {
        bump(&self.circuit_breaker_failures_by_route, route);
    }

    pub fn record_health_check(&self, target: &str, healthy: bool) {
        set(&self.health_check_status_by_target, target, healthy as u64);
    }

    pub fn record_grpc_pool_connection_opened(&self) {
        self.grpc_pool_active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_grpc_pool_connection_closed(&self) {
        self.grpc_pool_active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_grpc_pool_connection_error(&self) {
        self.grpc_pool_connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rpc(&self, method: &str, duration_millis: u64, failed: bool) {
        {
            let mut guard = self.rpc_duration_by_method.lock().expect("metrics map poisoned");
            guard
                .entry(method.to_string())
                .or_insert_with(Histogram::default)
                .observe(duration_millis);
        }
        if failed {
            bump(&self.rpc_errors_by_method, method);
        }
    }

    /// Renders every tracked series in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# HELP gateway_grpc_pool_active_connections Active pooled gRPC connections.");
        let _ = writeln!(out, "# TYPE gateway_grpc_pool_active_connections gauge");
        let _ = writeln!(
            out,
            "gateway_grpc_pool_active_connections {}",
            self.grpc_pool_active_connections.load(Ordering::Relaxed)
        );

        let _ = writeln!(out, "# HELP gateway_grpc_pool_connection_errors_total gRPC pool dial/connect errors.");
        let _ = writeln!(out, "# TYPE gateway_grpc_pool_connection_errors_total counter");
        let _ = writeln!(
            out,
            "gateway_grpc_pool_connection_errors_total {}",
            self.grpc_pool_connection_errors.load(Ordering::Relaxed)
        );

        {
            let guard = self.rpc_duration_by_method.lock().expect("metrics map poisoned");
            if !guard.is_empty() {
                let _ = writeln!(out, "# HELP gateway_rpc_duration_milliseconds_sum RPC duration by method.");
                let _ = writeln!(out, "# TYPE gateway_rpc_duration_milliseconds_sum counter");
                for (method, hist) in guard.iter() {
                    let _ = writeln!(
                        out,
                        "gateway_rpc_duration_milliseconds_sum{{method=\"{}\"}} {}",
                        method,
                        hist.sum_millis.load(Ordering::Relaxed)
                    );
                    let _ = writeln!(
                        out,
                        "gateway_rpc_duration_milliseconds_count{{method=\"{}\"}} {}",
                        method,
                        hist.count.load(Ordering::Relaxed)
                    );
                }
            }
        }

        render_map(
            &mut out,
            "gateway_rpc_errors_total",
            "RPC error count by method.",
            &self.rpc_errors_by_method,
            "method",
        );
        render_map(
            &mut out,
            "gateway_health_check_status",
            "Last active health-check result by target (1=healthy, 0=unhealthy).",
            &self.health_check_status_by_target,
            "target",
        );
        render_map(
            &mut out,
            "gateway_circuit_breaker_state",
            "Circuit breaker state by route (0=closed, 1=open, 2=half-open).",
            &self.circuit_breaker_state_by_route,
            "route",
        );
        render_map(
            &mut out,
            "gateway_circuit_breaker_failures_total",
            "Circuit breaker recorded failures by route.",
            &self.circuit_breaker_failures_by_route,
            "route",
        );
        render_map(
            &mut out,
            "gateway_rate_limit_rejections_total",
            "Rate-limit rejections by route.",
            &self.rate_limit_rejections_by_route,
            "route",
        );
        render_map(
            &mut out,
            "gateway_cache_hits_total",
            "Cache hits by route.",
            &self.cache_hits_by_route,
            "route",
        );
        render_map(
            &mut out,
            "gateway_cache_misses_total",
            "Cache misses by route.",
            &self.cache_misses_by_route,
            "route",
        );
        render_map(
            &mut out,
            "gateway_ip_rejections_total",
            "Requests rejected by IP allow/deny list, by route.",
            &self.ip_rejections_by_route,
            "route",
        );

        out
    }
}

pub async fn metrics_endpoint(
    registry: web::Data<std::sync::Arc<MetricsRegistry>>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(registry.render()))
}

pub fn configure_metrics(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_endpoint));
}
