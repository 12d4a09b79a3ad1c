// saturn-support: error taxonomy shared by every worker subsystem.
//
// Every error is classified locally and resolved locally (retry, re-queue,
// or terminal) -- nothing here propagates a raw exception type upward.

use thiserror::Error;

pub type SupportResult<T> = Result<T, SupportError>;

/// Errors that can occur in the ambient runtime layer (retry, circuit
/// breaker, config, health, metrics). Subsystem-specific errors (broker,
/// injector, consumer) define their own enums and convert into this one
/// at the boundary where they cross into shared infrastructure.
#[derive(Debug, Clone, Error)]
pub enum SupportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("circuit breaker is open for {0}")]
    CircuitBreakerOpen(String),

    #[error("retries exhausted: {0}")]
    RetryExhausted(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Whether an error is transient and worth retrying.
pub fn is_retryable(err: &SupportError) -> bool {
    matches!(
        err,
        SupportError::Network(_) | SupportError::Timeout(_) | SupportError::CircuitBreakerOpen(_)
    )
}
