//! Upstream selection and liveness tracking (§4.3).
//!
//! Each route with more than one endpoint gets one [`LoadBalancer`], built
//! from its `load_balancing` block. Endpoint health lives in a
//! [`ConnectivityMap`] updated by an optional background probe task; picking
//! an endpoint never blocks on that task, it only reads the last known
//! state.

use log::{debug, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::models::route::{HealthCheckConfig, LoadBalancingConfig, LoadBalancingMethod};
use crate::routes::metrics::MetricsRegistry;

/// Shared healthy/unhealthy state per endpoint URL.
#[derive(Debug, Default)]
pub struct ConnectivityMap {
    state: RwLock<HashMap<String, bool>>,
}

impl ConnectivityMap {
    pub fn new(endpoints: &[String]) -> Self {
        let state = endpoints.iter().map(|e| (e.clone(), true)).collect();
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn set_healthy(&self, endpoint: &str, healthy: bool) {
        let mut state = self.state.write().expect("connectivity map poisoned");
        if let Some(entry) = state.get_mut(endpoint) {
            if *entry != healthy {
                info!(
                    "endpoint {} is now {}",
                    endpoint,
                    if healthy { "healthy" } else { "unhealthy" }
                );
            }
            *entry = healthy;
        }
    }

    /// Endpoints currently marked healthy, preserving `endpoints`' order.
    fn healthy_subset(&self, endpoints: &[String]) -> Vec<String> {
        let state = self.state.read().expect("connectivity map poisoned");
        endpoints
            .iter()
            .filter(|e| state.get(e.as_str()).copied().unwrap_or(true))
            .cloned()
            .collect()
    }
}

/// Per-route upstream selector.
pub struct LoadBalancer {
    endpoints: RwLock<Vec<String>>,
    method: LoadBalancingMethod,
    connectivity: Arc<ConnectivityMap>,
    counter: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(config: &LoadBalancingConfig) -> Arc<Self> {
        let endpoints = config.endpoints.clone();
        Arc::new(Self {
            connectivity: Arc::new(ConnectivityMap::new(&endpoints)),
            endpoints: RwLock::new(endpoints),
            method: config.method,
            counter: AtomicUsize::new(0),
        })
    }

    pub fn connectivity(&self) -> Arc<ConnectivityMap> {
        self.connectivity.clone()
    }

    /// Replaces the endpoint set, e.g. after a discovery watch event.
    pub fn set_endpoints(&self, endpoints: Vec<String>) {
        let mut guard = self.endpoints.write().expect("load balancer poisoned");
        *guard = endpoints;
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.read().expect("load balancer poisoned").clone()
    }

    /// Selects an endpoint among the healthy subset, falling back to the
    /// full endpoint list if none are currently known healthy (§4.3 "no
    /// healthy endpoint" edge case).
    pub fn select(&self) -> Option<String> {
        let all = self.endpoints();
        if all.is_empty() {
            return None;
        }
        let healthy = self.connectivity.healthy_subset(&all);
        let candidates = if healthy.is_empty() { &all } else { &healthy };

        match self.method {
            LoadBalancingMethod::RoundRobin => {
                let idx = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(candidates[idx].clone())
            }
            LoadBalancingMethod::Random => {
                let idx = rand::thread_rng().gen_range(0..candidates.len());
                Some(candidates[idx].clone())
            }
        }
    }
}

/// Spawns the active health-check loop for one route's load balancer.
/// No-op when `health_check` is absent or disabled.
pub fn spawn_health_checks(
    route_label: String,
    balancer: Arc<LoadBalancer>,
    health_check: Option<HealthCheckConfig>,
    http_client: reqwest::Client,
    metrics: Arc<MetricsRegistry>,
) {
    let Some(config) = health_check else {
        return;
    };
    if !config.enabled {
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_seconds.max(1)));
        loop {
            ticker.tick().await;
            let endpoints = balancer.endpoints();
            for endpoint in endpoints {
                let url = crate::utils::path::join_url(&endpoint, &config.path);
                let healthy = match tokio::time::timeout(
                    Duration::from_secs(config.timeout_seconds.max(1)),
                    http_client.get(&url).send(),
                )
                .await
                {
                    Ok(Ok(resp)) => {
                        let status = resp.status().as_u16();
                        (200..300).contains(&status)
                    }
                    Ok(Err(e)) => {
                        debug!("health check {} for {}: {}", url, route_label, e);
                        false
                    }
                    Err(_) => {
                        warn!("health check {} for {} timed out", url, route_label);
                        false
                    }
                };
                balancer.connectivity().set_healthy(&endpoint, healthy);
                metrics.record_health_check(&endpoint, healthy);
            }
        }
    });
}
