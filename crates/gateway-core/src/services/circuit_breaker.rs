//! Circuit breaker implementation for upstream service protection (§4.4).
//!
//! A three-state machine (CLOSED, OPEN, HALF_OPEN) guarding a single
//! upstream group. All transitions are atomic under a single lock; the
//! read path (`is_open`) takes a shared lock, writes take an exclusive one.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};

use crate::models::route::CircuitBreakerRouteConfig;
use crate::routes::metrics::MetricsRegistry;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub threshold: u64,
    pub timeout: Duration,
    pub max_concurrent: Option<usize>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_secs(30),
            max_concurrent: None,
        }
    }
}

impl From<&CircuitBreakerRouteConfig> for CircuitBreakerConfig {
    fn from(config: &CircuitBreakerRouteConfig) -> Self {
        Self {
            threshold: config.threshold,
            timeout: Duration::from_secs(config.timeout_seconds),
            max_concurrent: config.max_concurrent,
        }
    }
}

/// Per-(route, upstream-group) circuit breaker instance.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: RwLock<u64>,
    last_failure_at: RwLock<Option<Instant>>,
    concurrency: Option<Semaphore>,
    /// Gates HALF_OPEN to exactly one in-flight probe (§4.4).
    half_open_probe_in_flight: AtomicBool,
    name: String,
    metrics: Arc<MetricsRegistry>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig, metrics: Arc<MetricsRegistry>) -> Arc<Self> {
        let concurrency = config.max_concurrent.map(Semaphore::new);
        Arc::new(Self {
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: RwLock::new(0),
            last_failure_at: RwLock::new(None),
            concurrency,
            half_open_probe_in_flight: AtomicBool::new(false),
            name,
            metrics,
        })
    }

    /// Runs `operation` under circuit-breaker protection. If `max_concurrent`
    /// is configured and exhausted, fails fast with `TooManyInFlight`
    /// without consuming the breaker's failure budget.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let _permit = match &self.concurrency {
            Some(sem) => match sem.try_acquire() {
                Ok(permit) => Some(permit),
                Err(_) => return Err(CircuitBreakerError::TooManyInFlight),
            },
            None => None,
        };

        if self.is_open().await {
            debug!("circuit breaker {} is open, failing fast", self.name);
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(error) => {
                self.on_failure().await;
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    async fn is_open(&self) -> bool {
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => self
                .half_open_probe_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err(),
            CircuitState::Open => {
                let last_failure = *self.last_failure_at.read().await;
                match last_failure {
                    Some(at) if at.elapsed() >= self.config.timeout => {
                        self.transition_to_half_open().await;
                        false
                    }
                    _ => true,
                }
            }
        }
    }

    async fn on_success(&self) {
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                *self.consecutive_failures.write().await = 0;
            }
            CircuitState::HalfOpen => {
                self.transition_to_closed().await;
            }
            CircuitState::Open => {
                debug!("unexpected success while open for circuit {}", self.name);
            }
        }
    }

    async fn on_failure(&self) {
        self.metrics.record_circuit_failure(&self.name);
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                let mut failures = self.consecutive_failures.write().await;
                *failures += 1;
                if *failures >= self.config.threshold {
                    drop(failures);
                    self.transition_to_open().await;
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to_open().await;
            }
            CircuitState::Open => {
                *self.last_failure_at.write().await = Some(Instant::now());
            }
        }
    }

    async fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.half_open_probe_in_flight.store(false, Ordering::Release);
        *self.last_failure_at.write().await = Some(Instant::now());
        self.metrics.record_circuit_state(&self.name, CircuitState::Open);
        warn!("circuit breaker {} opened", self.name);
    }

    async fn transition_to_half_open(&self) {
        self.half_open_probe_in_flight.store(false, Ordering::Release);
        self.state.store(CircuitState::HalfOpen as u8, Ordering::Release);
        self.metrics.record_circuit_state(&self.name, CircuitState::HalfOpen);
        info!("circuit breaker {} half-open: allowing one probe", self.name);
    }

    async fn transition_to_closed(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.half_open_probe_in_flight.store(false, Ordering::Release);
        *self.consecutive_failures.write().await = 0;
        self.metrics.record_circuit_state(&self.name, CircuitState::Closed);
        info!("circuit breaker {} closed: service recovered", self.name);
    }

    pub fn get_state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Too many in-flight requests")]
    TooManyInFlight,
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u64, timeout_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            threshold,
            timeout: Duration::from_millis(timeout_ms),
            max_concurrent: None,
        }
    }

    fn metrics() -> Arc<MetricsRegistry> {
        Arc::new(MetricsRegistry::new())
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("svc".to_string(), config(2, 10_000), metrics());
        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(cb.get_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn rejects_fast_while_open() {
        let cb = CircuitBreaker::new("svc".to_string(), config(1, 10_000), metrics());
        let _ = cb.call(async { Err::<(), _>("boom") }).await;
        let result = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_circuit() {
        let cb = CircuitBreaker::new("svc".to_string(), config(1, 1), metrics());
        let _ = cb.call(async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.get_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let cb = CircuitBreaker::new("svc".to_string(), config(1, 1), metrics());
        let _ = cb.call(async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = cb.call(async { Err::<(), _>("still broken") }).await;
        assert!(result.is_err());
        assert_eq!(cb.get_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_admits_only_one_probe() {
        let cb = CircuitBreaker::new("svc".to_string(), config(1, 1), metrics());
        let _ = cb.call(async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        let cb2 = cb.clone();
        let probe = tokio::spawn(async move {
            cb2.call(async move {
                let _ = rx.await;
                Ok::<_, &str>(())
            })
            .await
        });
        tokio::task::yield_now().await;

        let second = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(second, Err(CircuitBreakerError::CircuitOpen)));

        let _ = tx.send(());
        let first = probe.await.unwrap();
        assert!(first.is_ok());
        assert_eq!(cb.get_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn max_concurrent_rejects_without_touching_failure_budget() {
        let mut cfg = config(5, 10_000);
        cfg.max_concurrent = Some(1);
        let cb = CircuitBreaker::new("svc".to_string(), cfg.clone(), metrics());
        let cb2 = cb.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            let _ = cb2
                .call(async move {
                    let _ = rx.await;
                    Ok::<_, &str>(())
                })
                .await;
        });
        tokio::task::yield_now().await;
        let result = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::TooManyInFlight)));
        let _ = tx.send(());
        handle.await.unwrap();
    }
}
