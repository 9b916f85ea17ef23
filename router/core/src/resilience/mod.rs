//! Resilience primitives
//!
//! Provider-agnostic protection for outbound calls:
//!
//! ```text
//! execute(thunk) --> [ breaker ] --open--> CircuitOpen
//!                        |
//!                        v
//!                  [ timeout(thunk) ] --retryable--> backoff --> retry
//!                        |
//!                        v
//!                   Ok / Timeout / Failed
//! ```

mod circuit_breaker;
mod executor;
mod retry;

use serde::{Deserialize, Serialize};

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
};
pub use executor::{CallOptions, ResilienceError, ResilienceExecutor, RetryClassify};
pub use retry::RetryConfig;

/// Retry and breaker settings shared by every provider
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Backoff between retries
    pub retry: RetryConfig,
    /// Breaker thresholds
    pub breaker: CircuitBreakerConfig,
}
