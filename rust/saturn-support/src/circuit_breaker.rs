// saturn-support: per-endpoint circuit breaker.
//
// Used by the resource injector when it calls out to the external proxy
// pool and credential pool -- a pool that is failing fast should not be
// hammered by every dispatch activity in the worker.

// Mutex poisoning here means a prior holder panicked mid-update; there is
// no sane partial state to recover, so we propagate the panic.
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{SupportError, SupportResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// A single endpoint's circuit breaker.
///
/// Closed -> Open after `failure_threshold` consecutive failures.
/// Open -> HalfOpen once `reset_timeout` has elapsed.
/// HalfOpen -> Closed on the next success, or back to Open on failure.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    endpoint: String,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(endpoint: String, failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
            endpoint,
            failure_threshold,
            reset_timeout: Duration::from_millis(reset_timeout_ms),
        }
    }

    /// Current state, after letting an expired Open circuit fall through
    /// to HalfOpen.
    pub fn state(&self) -> CircuitState {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.maybe_half_open(&mut guard);
        guard.state
    }

    fn maybe_half_open(&self, guard: &mut Inner) {
        if guard.state == CircuitState::Open {
            if let Some(opened_at) = guard.opened_at {
                if opened_at.elapsed() >= self.reset_timeout {
                    guard.state = CircuitState::HalfOpen;
                }
            }
        }
    }

    /// Check whether a call may proceed, without running it. Call
    /// `record_success`/`record_failure` with the outcome afterward.
    pub fn allow(&self) -> SupportResult<()> {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.maybe_half_open(&mut guard);
        match guard.state {
            CircuitState::Open => Err(SupportError::CircuitBreakerOpen(self.endpoint.clone())),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    pub fn record_success(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        guard.failure_count = 0;
        guard.state = CircuitState::Closed;
        guard.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        guard.failure_count += 1;
        if guard.state == CircuitState::HalfOpen || guard.failure_count >= self.failure_threshold {
            guard.state = CircuitState::Open;
            guard.opened_at = Some(Instant::now());
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Lazily creates and shares one `CircuitBreaker` per endpoint string.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    failure_threshold: u32,
    reset_timeout_ms: u64,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            failure_threshold,
            reset_timeout_ms,
        }
    }

    pub fn get_or_create(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("registry mutex poisoned");
        breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    endpoint.to_string(),
                    self.failure_threshold,
                    self.reset_timeout_ms,
                ))
            })
            .clone()
    }

    /// True if any endpoint tracked by this registry currently has its
    /// circuit open. Used to roll many per-endpoint breakers up into one
    /// component health signal.
    pub fn any_open(&self) -> bool {
        self.breakers
            .lock()
            .expect("registry mutex poisoned")
            .values()
            .any(|b| b.state() == CircuitState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_and_half_opens_after_timeout() {
        let cb = CircuitBreaker::new("proxy-pool".into(), 2, 10);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.allow().is_err());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow().is_ok());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_shares_breaker_per_endpoint() {
        let registry = CircuitBreakerRegistry::new(1, 1000);
        let a = registry.get_or_create("proxy-pool");
        let b = registry.get_or_create("proxy-pool");
        a.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn any_open_reflects_worst_tracked_endpoint() {
        let registry = CircuitBreakerRegistry::new(1, 1000);
        assert!(!registry.any_open());
        registry.get_or_create("credential_pool:CN").record_failure();
        assert!(registry.any_open());
    }
}
