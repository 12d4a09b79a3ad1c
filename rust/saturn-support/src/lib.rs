// saturn-support: ambient runtime support shared across the crawler
// worker fleet -- error taxonomy, retry, circuit breaking, health
// checks, metrics and config loading.

// CRITICAL: Enforce proper error handling - no unwrap/expect in production code
// EXCEPTION: Mutex poisoning expect() calls are acceptable (see metrics.rs, health.rs, circuit_breaker.rs)
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use error::{is_retryable, SupportError, SupportResult};
pub use health::{ComponentHealth, HealthChecker, HealthStatus};
pub use metrics::{LatencyMetrics, LatencyTimer, MetricsCollector, MetricsSnapshot, WorkerStats};
pub use retry::{handler_failure_backoff_secs, RetryConfig, RetryExecutor, TIMEOUT_RETRY_DELAY_SECS};

/// Install the process-wide tracing subscriber. Every binary in the fleet
/// calls this once at startup before doing anything else.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}
