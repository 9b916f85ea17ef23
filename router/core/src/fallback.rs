//! Fallback Chain Management
//!
//! Maps each primary provider family to the ordered families tried after it
//! fails. The chain is a policy, swappable through [`FallbackPolicy`]; the
//! default is a static table.
//!
//! # Architecture
//!
//! ```text
//! Primary family (openai) fails
//!         |
//!         v
//! FallbackPolicy::chain(openai)
//!         |
//!         v
//! litellm     (if eligible and not yet tried)
//!         |
//!         v
//! openrouter  (if eligible and not yet tried)
//!         |
//!         v
//! bedrock     (last resort)
//! ```

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use thiserror::Error;

use crate::error::{DispatchError, ProviderAttempt, RouterError};
use crate::registry::ProviderFamily;

/// Longest chain a table accepts, primary excluded
pub const MAX_CHAIN_DEPTH: usize = ProviderFamily::ALL.len() - 1;

/// Source of fallback orderings
pub trait FallbackPolicy: Send + Sync {
    /// Families to try after `primary`, most preferred first
    fn chain(&self, primary: ProviderFamily) -> Vec<ProviderFamily>;
}

/// Errors from editing a fallback table
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FallbackChainError {
    /// Chain lists its own primary
    #[error("fallback chain for {0} lists itself")]
    SelfReference(ProviderFamily),

    /// Family appears twice
    #[error("fallback chain for {primary} repeats {family}")]
    Duplicate {
        /// Chain owner
        primary: ProviderFamily,
        /// Repeated entry
        family: ProviderFamily,
    },

    /// Chain exceeds the maximum depth
    #[error("chain depth {depth} exceeds maximum {max}")]
    ChainTooDeep {
        /// Requested depth
        depth: usize,
        /// Allowed depth
        max: usize,
    },
}

// ============================================================================
// Static Table
// ============================================================================

/// Fixed primary-to-fallbacks table, editable at runtime
#[derive(Debug)]
pub struct StaticFallbackTable {
    chains: RwLock<HashMap<ProviderFamily, Vec<ProviderFamily>>>,
}

impl Default for StaticFallbackTable {
    fn default() -> Self {
        use ProviderFamily::{Anthropic, Bedrock, Groq, LiteLlm, Ollama, OpenAi, OpenRouter, Perplexity};

        let chains = HashMap::from([
            (Bedrock, vec![LiteLlm, Anthropic, OpenAi]),
            (LiteLlm, vec![Bedrock, OpenAi, Anthropic]),
            (OpenAi, vec![LiteLlm, OpenRouter, Bedrock]),
            (Anthropic, vec![Bedrock, LiteLlm, OpenRouter]),
            (Groq, vec![OpenAi, LiteLlm, OpenRouter]),
            (Perplexity, vec![OpenRouter, OpenAi, LiteLlm]),
            (OpenRouter, vec![LiteLlm, OpenAi, Bedrock]),
            (Ollama, vec![LiteLlm, Groq, OpenAi]),
        ]);
        Self {
            chains: RwLock::new(chains),
        }
    }
}

impl StaticFallbackTable {
    /// Table with no chains; every primary is tried alone
    #[must_use]
    pub fn empty() -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
        }
    }

    /// Validate a chain without installing it
    ///
    /// # Errors
    ///
    /// Self references, duplicates and chains deeper than
    /// [`MAX_CHAIN_DEPTH`] are rejected.
    pub fn validate_chain(
        primary: ProviderFamily,
        fallbacks: &[ProviderFamily],
    ) -> Result<(), FallbackChainError> {
        if fallbacks.len() > MAX_CHAIN_DEPTH {
            return Err(FallbackChainError::ChainTooDeep {
                depth: fallbacks.len(),
                max: MAX_CHAIN_DEPTH,
            });
        }
        let mut seen = HashSet::new();
        for &family in fallbacks {
            if family == primary {
                return Err(FallbackChainError::SelfReference(primary));
            }
            if !seen.insert(family) {
                return Err(FallbackChainError::Duplicate { primary, family });
            }
        }
        Ok(())
    }

    /// Replace the chain for `primary`
    ///
    /// # Errors
    ///
    /// See [`Self::validate_chain`]; the table is unchanged on error.
    pub fn set_chain(
        &self,
        primary: ProviderFamily,
        fallbacks: Vec<ProviderFamily>,
    ) -> Result<(), FallbackChainError> {
        Self::validate_chain(primary, &fallbacks)?;
        tracing::debug!(primary = %primary, ?fallbacks, "Fallback chain updated");
        self.chains.write().insert(primary, fallbacks);
        Ok(())
    }

    /// Builder form of [`Self::set_chain`]
    ///
    /// # Errors
    ///
    /// See [`Self::validate_chain`].
    pub fn with_chain(
        self,
        primary: ProviderFamily,
        fallbacks: Vec<ProviderFamily>,
    ) -> Result<Self, FallbackChainError> {
        self.set_chain(primary, fallbacks)?;
        Ok(self)
    }

    /// Remove the chain for `primary`
    pub fn remove_chain(&self, primary: ProviderFamily) {
        self.chains.write().remove(&primary);
    }
}

impl FallbackPolicy for StaticFallbackTable {
    fn chain(&self, primary: ProviderFamily) -> Vec<ProviderFamily> {
        self.chains.read().get(&primary).cloned().unwrap_or_default()
    }
}

/// Fallbacks for `primary` that pass `is_eligible`, in chain order
pub fn healthy_fallbacks<F>(
    policy: &dyn FallbackPolicy,
    primary: ProviderFamily,
    is_eligible: F,
) -> Vec<ProviderFamily>
where
    F: Fn(ProviderFamily) -> bool,
{
    policy
        .chain(primary)
        .into_iter()
        .filter(|&family| family != primary && is_eligible(family))
        .collect()
}

// ============================================================================
// Fallback Context
// ============================================================================

/// Tracks one invocation's walk down the chain
#[derive(Clone, Debug)]
pub struct FallbackContext {
    /// Logical model requested
    pub model_id: String,
    /// Family tried first
    pub primary: ProviderFamily,
    /// Failures so far, in order
    pub attempts: Vec<ProviderAttempt>,
    tried: Vec<ProviderFamily>,
}

impl FallbackContext {
    /// Start a walk at `primary`
    pub fn new(model_id: impl Into<String>, primary: ProviderFamily) -> Self {
        Self {
            model_id: model_id.into(),
            primary,
            attempts: Vec::new(),
            tried: Vec::new(),
        }
    }

    /// Note that a family is about to be attempted
    pub fn begin(&mut self, family: ProviderFamily) {
        if !self.tried.contains(&family) {
            self.tried.push(family);
        }
    }

    /// Whether a family has already been attempted
    #[must_use]
    pub fn has_tried(&self, family: ProviderFamily) -> bool {
        self.tried.contains(&family)
    }

    /// Record a failed dispatch
    pub fn record_failure(
        &mut self,
        family: ProviderFamily,
        backend_model: Option<String>,
        error: &DispatchError,
    ) {
        self.begin(family);
        self.attempts.push(ProviderAttempt {
            provider: family,
            backend_model,
            failure: error.failure(),
            reason: error.to_string(),
        });
    }

    /// Number of fallbacks attempted after the primary
    #[must_use]
    pub fn fallback_count(&self) -> usize {
        self.tried.iter().filter(|&&f| f != self.primary).count()
    }

    /// Give up
    #[must_use]
    pub fn into_error(self) -> RouterError {
        RouterError::AllProvidersFailed {
            model_id: self.model_id,
            attempts: self.attempts,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::rate_limit::DenialReason;

    #[test]
    fn test_default_chains_are_valid() {
        let table = StaticFallbackTable::default();
        for family in ProviderFamily::ALL {
            let chain = table.chain(family);
            assert!(!chain.is_empty(), "{family} has no fallbacks");
            assert!(StaticFallbackTable::validate_chain(family, &chain).is_ok());
        }
    }

    #[test]
    fn test_set_chain_rejects_self_reference() {
        let table = StaticFallbackTable::default();
        let err = table
            .set_chain(ProviderFamily::OpenAi, vec![ProviderFamily::OpenAi])
            .unwrap_err();
        assert_eq!(err, FallbackChainError::SelfReference(ProviderFamily::OpenAi));
        assert_eq!(
            table.chain(ProviderFamily::OpenAi)[0],
            ProviderFamily::LiteLlm
        );
    }

    #[test]
    fn test_set_chain_rejects_duplicates() {
        let table = StaticFallbackTable::empty();
        let err = table
            .set_chain(
                ProviderFamily::Groq,
                vec![ProviderFamily::OpenAi, ProviderFamily::OpenAi],
            )
            .unwrap_err();
        assert!(matches!(err, FallbackChainError::Duplicate { .. }));
    }

    #[test]
    fn test_healthy_fallbacks_filters_in_order() {
        let table = StaticFallbackTable::default();
        let eligible = healthy_fallbacks(&table, ProviderFamily::OpenAi, |f| {
            f != ProviderFamily::LiteLlm
        });
        assert_eq!(
            eligible,
            vec![ProviderFamily::OpenRouter, ProviderFamily::Bedrock]
        );
    }

    #[test]
    fn test_empty_table_has_no_fallbacks() {
        let table = StaticFallbackTable::empty();
        assert!(healthy_fallbacks(&table, ProviderFamily::Bedrock, |_| true).is_empty());
    }

    #[test]
    fn test_fallback_context() {
        let mut ctx = FallbackContext::new("gpt-4o", ProviderFamily::OpenAi);
        ctx.begin(ProviderFamily::OpenAi);
        assert!(ctx.has_tried(ProviderFamily::OpenAi));
        assert_eq!(ctx.fallback_count(), 0);

        let denied = DispatchError::RateLimited {
            provider: ProviderFamily::LiteLlm,
            reason: DenialReason::RequestsPerMinute,
            limit: 1,
            reset_in: Duration::from_secs(1),
        };
        ctx.record_failure(ProviderFamily::LiteLlm, None, &denied);
        assert_eq!(ctx.fallback_count(), 1);

        let err = ctx.into_error();
        assert_eq!(err.attempted_providers(), vec![ProviderFamily::LiteLlm]);
    }
}
