//! Router error types
//!
//! [`RouterError`] is what callers of `invoke` see. [`DispatchError`] is the
//! per-family failure that drives fallback and never escapes on its own.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::CallError;
use crate::rate_limit::DenialReason;
use crate::registry::ProviderFamily;
use crate::resilience::ResilienceError;

// ============================================================================
// Attempt Records
// ============================================================================

/// Coarse classification of a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptFailure {
    /// Local rate limiter denied the call
    RateLimited,
    /// Circuit breaker short-circuited the call
    CircuitOpen,
    /// Call exceeded its deadline
    Timeout,
    /// Backend returned an error
    Backend,
    /// Family or model is not usable as configured
    Misconfigured,
}

/// One failed family within an invocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    /// Family that was attempted
    pub provider: ProviderFamily,
    /// Backend model id, when one was resolved
    pub backend_model: Option<String>,
    /// Failure classification
    pub failure: AttemptFailure,
    /// Human-readable reason
    pub reason: String,
}

// ============================================================================
// Router Error
// ============================================================================

/// Errors surfaced by `ModelRouter::invoke`
#[derive(Debug, Error)]
pub enum RouterError {
    /// No registry entry for the requested id
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Primary and every eligible fallback failed
    #[error("all providers failed for {model_id}: {}", summarize(.attempts))]
    AllProvidersFailed {
        /// Requested logical model
        model_id: String,
        /// Every attempted family with its reason, in attempt order
        attempts: Vec<ProviderAttempt>,
    },
}

impl RouterError {
    /// Families attempted before giving up
    #[must_use]
    pub fn attempted_providers(&self) -> Vec<ProviderFamily> {
        match self {
            Self::UnknownModel(_) => Vec::new(),
            Self::AllProvidersFailed { attempts, .. } => {
                attempts.iter().map(|a| a.provider).collect()
            }
        }
    }
}

fn summarize(attempts: &[ProviderAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.provider, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Dispatch Error
// ============================================================================

/// Failure of a single dispatch to one family
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Local budget exhausted; no call was made
    #[error("rate limit exceeded for {provider} ({reason}, limit {limit}); resets in {}ms", reset_in.as_millis())]
    RateLimited {
        /// Denied family
        provider: ProviderFamily,
        /// Which budget was exhausted
        reason: DenialReason,
        /// Budget size
        limit: u64,
        /// Time until the budget refills
        reset_in: Duration,
    },

    /// No adapter registered for the family
    #[error("no adapter configured for {0}")]
    NoAdapter(ProviderFamily),

    /// Model has no backend id under the family
    #[error("model {model_id} has no backend id for {provider}")]
    NoBackendId {
        /// Logical model
        model_id: String,
        /// Target family
        provider: ProviderFamily,
    },

    /// Model is switched off in configuration
    #[error("model {0} is disabled")]
    ModelDisabled(String),

    /// Resilience layer gave up
    #[error(transparent)]
    Resilience(#[from] ResilienceError<CallError>),
}

impl DispatchError {
    /// Classification recorded in the attempt list
    #[must_use]
    pub fn failure(&self) -> AttemptFailure {
        match self {
            Self::RateLimited { .. } => AttemptFailure::RateLimited,
            Self::NoAdapter(_) | Self::NoBackendId { .. } | Self::ModelDisabled(_) => {
                AttemptFailure::Misconfigured
            }
            Self::Resilience(ResilienceError::CircuitOpen { .. }) => AttemptFailure::CircuitOpen,
            Self::Resilience(ResilienceError::Timeout { .. }) => AttemptFailure::Timeout,
            Self::Resilience(ResilienceError::Failed { source, .. }) => match source {
                CallError::MissingCredentials { .. } => AttemptFailure::Misconfigured,
                CallError::Timeout => AttemptFailure::Timeout,
                _ => AttemptFailure::Backend,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(provider: ProviderFamily, reason: &str) -> ProviderAttempt {
        ProviderAttempt {
            provider,
            backend_model: None,
            failure: AttemptFailure::Backend,
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_all_failed_message_lists_every_provider() {
        let err = RouterError::AllProvidersFailed {
            model_id: "m".to_string(),
            attempts: vec![
                attempt(ProviderFamily::OpenAi, "network error: refused"),
                attempt(ProviderFamily::LiteLlm, "upstream returned 503"),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("openai (network error: refused)"));
        assert!(message.contains("litellm (upstream returned 503)"));
        assert_eq!(
            err.attempted_providers(),
            vec![ProviderFamily::OpenAi, ProviderFamily::LiteLlm]
        );
    }

    #[test]
    fn test_rate_limit_message_carries_reset_time() {
        let err = DispatchError::RateLimited {
            provider: ProviderFamily::Groq,
            reason: DenialReason::RequestsPerMinute,
            limit: 30,
            reset_in: Duration::from_millis(1500),
        };
        assert!(err.to_string().contains("resets in 1500ms"));
        assert_eq!(err.failure(), AttemptFailure::RateLimited);
    }

    #[test]
    fn test_circuit_open_is_distinct() {
        let err = DispatchError::from(ResilienceError::<CallError>::CircuitOpen {
            provider: "openai".to_string(),
            retry_in: Duration::from_secs(3),
        });
        assert_eq!(err.failure(), AttemptFailure::CircuitOpen);
    }

    #[test]
    fn test_backend_failure_classified() {
        let err = DispatchError::from(ResilienceError::Failed {
            provider: "openai".to_string(),
            operation: "chat".to_string(),
            attempts: 3,
            source: CallError::Network("connection reset".to_string()),
        });
        assert_eq!(err.failure(), AttemptFailure::Backend);
    }
}
