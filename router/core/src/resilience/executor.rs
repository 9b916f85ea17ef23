//! Resilient call execution
//!
//! Wraps an arbitrary async operation with a per-provider circuit breaker,
//! bounded retry with backoff, and a per-attempt timeout. The executor knows
//! nothing about chat; operations are opaque thunks and errors only need to
//! say whether they are worth retrying.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use super::retry::RetryConfig;
use super::ResilienceConfig;

/// How an operation's error should be treated
pub trait RetryClassify {
    /// Worth another attempt (transient)
    fn is_retryable(&self) -> bool;

    /// Counts toward tripping the provider's breaker
    fn trips_breaker(&self) -> bool {
        self.is_retryable()
    }

    /// Minimum delay requested by the upstream
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Per-call parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallOptions {
    /// Breaker key
    pub provider: String,
    /// Operation label for logs and errors
    pub operation: String,
    /// Deadline for each attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl CallOptions {
    /// Options with a 60s timeout and 2 retries
    pub fn new(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            operation: operation.into(),
            timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Why a resilient call gave up
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// Breaker is open; the operation was not attempted
    #[error("circuit open for {provider}; retry in {}ms", retry_in.as_millis())]
    CircuitOpen {
        /// Provider key
        provider: String,
        /// Remaining cooldown
        retry_in: Duration,
    },

    /// Final attempt exceeded its deadline
    #[error("{operation} on {provider} timed out after {}ms ({attempts} attempts)", timeout.as_millis())]
    Timeout {
        /// Provider key
        provider: String,
        /// Operation label
        operation: String,
        /// Per-attempt deadline
        timeout: Duration,
        /// Attempts made
        attempts: u32,
    },

    /// Final attempt failed with the operation's own error
    #[error("{source} ({attempts} attempts)")]
    Failed {
        /// Provider key
        provider: String,
        /// Operation label
        operation: String,
        /// Attempts made
        attempts: u32,
        /// Last error
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E> {
    /// Whether the call was short-circuited without an attempt
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

enum AttemptOutcome<E> {
    Failed(E),
    TimedOut,
}

/// Runs operations under breaker, retry and timeout protection
#[derive(Debug)]
pub struct ResilienceExecutor {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    breaker_config: CircuitBreakerConfig,
    retry: RetryConfig,
}

impl Default for ResilienceExecutor {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}

impl ResilienceExecutor {
    /// Create an executor
    #[must_use]
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            breaker_config: config.breaker,
            retry: config.retry,
        }
    }

    /// Breaker for `provider`, created on first use
    pub fn breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(provider) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(provider.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(provider, self.breaker_config.clone()))
        });
        Arc::clone(entry.value())
    }

    /// Snapshots of every breaker created so far, sorted by provider
    #[must_use]
    pub fn breaker_snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }

    /// Remaining wait if `provider`'s breaker would reject a call right now
    #[must_use]
    pub fn rejection(&self, provider: &str) -> Option<Duration> {
        self.breakers.get(provider).and_then(|b| b.rejection())
    }

    /// Force a provider's breaker closed
    pub fn reset_breaker(&self, provider: &str) {
        if let Some(breaker) = self.breakers.get(provider) {
            breaker.reset();
        }
    }

    /// Run `operation` with protection
    ///
    /// Each attempt is bounded by `options.timeout`; a timed-out attempt's
    /// future is dropped. Dropping the returned future mid-call gives a
    /// half-open trial back to the breaker. Retryable failures back off and retry up to
    /// `options.max_retries` times. The breaker sees one outcome per call.
    ///
    /// # Errors
    ///
    /// [`ResilienceError::CircuitOpen`] when the breaker rejects the call,
    /// [`ResilienceError::Timeout`] when the final attempt timed out, and
    /// [`ResilienceError::Failed`] with the final error otherwise.
    pub async fn execute<T, E, F, Fut>(
        &self,
        options: &CallOptions,
        mut operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClassify + std::fmt::Display,
    {
        let breaker = self.breaker(&options.provider);
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(retry_in) => {
                tracing::debug!(
                    provider = %options.provider,
                    operation = %options.operation,
                    retry_in_ms = retry_in.as_millis(),
                    "Circuit open, skipping call"
                );
                return Err(ResilienceError::CircuitOpen {
                    provider: options.provider.clone(),
                    retry_in,
                });
            }
        };

        let mut attempt: u32 = 0;
        loop {
            let outcome = match tokio::time::timeout(options.timeout, operation()).await {
                Ok(Ok(value)) => {
                    permit.record_success();
                    return Ok(value);
                }
                Ok(Err(error)) => AttemptOutcome::Failed(error),
                Err(_elapsed) => AttemptOutcome::TimedOut,
            };

            let (retryable, retry_after) = match &outcome {
                AttemptOutcome::Failed(error) => (error.is_retryable(), error.retry_after()),
                AttemptOutcome::TimedOut => (true, None),
            };

            if retryable && attempt < options.max_retries {
                let mut delay = self.retry.backoff_for_attempt(attempt);
                if let Some(after) = retry_after {
                    delay = delay.max(after.min(self.retry.max_backoff()));
                }
                tracing::debug!(
                    provider = %options.provider,
                    operation = %options.operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    error = %describe(&outcome),
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let attempts = attempt + 1;
            return Err(match outcome {
                AttemptOutcome::TimedOut => {
                    permit.record_failure();
                    ResilienceError::Timeout {
                        provider: options.provider.clone(),
                        operation: options.operation.clone(),
                        timeout: options.timeout,
                        attempts,
                    }
                }
                AttemptOutcome::Failed(source) => {
                    if source.trips_breaker() {
                        permit.record_failure();
                    } else {
                        permit.release();
                    }
                    ResilienceError::Failed {
                        provider: options.provider.clone(),
                        operation: options.operation.clone(),
                        attempts,
                        source,
                    }
                }
            });
        }
    }
}

fn describe<E: std::fmt::Display>(outcome: &AttemptOutcome<E>) -> String {
    match outcome {
        AttemptOutcome::Failed(error) => error.to_string(),
        AttemptOutcome::TimedOut => "timed out".to_string(),
    }
}
