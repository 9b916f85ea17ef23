//! Model Registry
//!
//! Static catalogue mapping logical model ids to routing metadata. The
//! registry is validated once at startup and shared read-only afterwards;
//! availability toggles arrive through configuration, never through the
//! router itself.
//!
//! # Families
//!
//! Each [`ProviderFamily`] speaks exactly one [`WireProtocol`]. Several
//! families share the OpenAI chat envelope but differ in base URL,
//! credentials, timeouts and rate limits.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Provider Family
// ============================================================================

/// A backend family the router can dispatch to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// Managed inference gateway (Converse API)
    Bedrock,
    /// Self-hosted routing proxy with an OpenAI-compatible surface
    LiteLlm,
    /// OpenAI direct
    OpenAi,
    /// Anthropic direct
    Anthropic,
    /// Low-latency inference
    Groq,
    /// Retrieval-augmented search models
    Perplexity,
    /// Hosted routing proxy
    OpenRouter,
    /// Local Ollama daemon
    Ollama,
}

/// Message envelope a family expects on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireProtocol {
    /// `/chat/completions` with a `system` role
    OpenAiChat,
    /// `/v1/messages` with a top-level `system` field
    AnthropicMessages,
    /// `/model/{id}/converse` with a `system` block list
    BedrockConverse,
    /// `/api/generate` with a single prompt string; no system role
    OllamaGenerate,
}

impl ProviderFamily {
    /// Every family, in routing-table order
    pub const ALL: [ProviderFamily; 8] = [
        Self::Bedrock,
        Self::LiteLlm,
        Self::OpenAi,
        Self::Anthropic,
        Self::Groq,
        Self::Perplexity,
        Self::OpenRouter,
        Self::Ollama,
    ];

    /// Stable lowercase name used in config keys, logs and telemetry
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bedrock => "bedrock",
            Self::LiteLlm => "litellm",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Groq => "groq",
            Self::Perplexity => "perplexity",
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
        }
    }

    /// Wire protocol spoken by this family
    #[must_use]
    pub fn protocol(self) -> WireProtocol {
        match self {
            Self::Bedrock => WireProtocol::BedrockConverse,
            Self::Anthropic => WireProtocol::AnthropicMessages,
            Self::Ollama => WireProtocol::OllamaGenerate,
            Self::LiteLlm | Self::OpenAi | Self::Groq | Self::Perplexity | Self::OpenRouter => {
                WireProtocol::OpenAiChat
            }
        }
    }

    /// Whether the wire protocol carries a dedicated system prompt
    #[must_use]
    pub fn has_system_role(self) -> bool {
        self.protocol() != WireProtocol::OllamaGenerate
    }

    /// Per-call timeout: fast families get less, search families more
    #[must_use]
    pub fn default_timeout(self) -> Duration {
        match self {
            Self::Groq => Duration::from_secs(30),
            Self::Perplexity => Duration::from_secs(120),
            _ => Duration::from_secs(60),
        }
    }

    /// Default API base URL
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Bedrock => "https://bedrock-runtime.us-east-1.amazonaws.com",
            Self::LiteLlm => "http://localhost:4000/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Perplexity => "https://api.perplexity.ai",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }

    /// Environment variable holding the family's credential, if it needs one
    #[must_use]
    pub fn default_api_key_env(self) -> Option<&'static str> {
        match self {
            Self::Bedrock => Some("AWS_BEARER_TOKEN_BEDROCK"),
            Self::LiteLlm => Some("LITELLM_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Perplexity => Some("PERPLEXITY_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::Ollama => None,
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised family name
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown provider family: {0}")]
pub struct ParseFamilyError(pub String);

impl FromStr for ProviderFamily {
    type Err = ParseFamilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|family| family.as_str() == normalized)
            .ok_or_else(|| ParseFamilyError(s.to_string()))
    }
}

// ============================================================================
// Model Config
// ============================================================================

fn default_available() -> bool {
    true
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_latency_ms() -> u64 {
    1000
}

/// Routing metadata for one logical model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Logical model id (registry key)
    pub id: String,

    /// Family this entry dispatches to
    pub family: ProviderFamily,

    /// Backend-specific model identifier per family
    pub backend_ids: BTreeMap<ProviderFamily, String>,

    /// Capability tags such as `reasoning` or `vision`
    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    /// Upper bound on generated tokens
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Price per 1K input tokens (dollars)
    #[serde(default)]
    pub input_price_per_1k: f64,

    /// Price per 1K output tokens (dollars)
    #[serde(default)]
    pub output_price_per_1k: f64,

    /// Seed latency estimate in milliseconds
    #[serde(default = "default_latency_ms")]
    pub avg_latency_ms: u64,

    /// Operational availability toggle
    #[serde(default = "default_available")]
    pub available: bool,
}

impl ModelConfig {
    /// Create an entry served by `family` under `backend_id`
    pub fn new(
        id: impl Into<String>,
        family: ProviderFamily,
        backend_id: impl Into<String>,
    ) -> Self {
        let mut backend_ids = BTreeMap::new();
        backend_ids.insert(family, backend_id.into());
        Self {
            id: id.into(),
            family,
            backend_ids,
            capabilities: BTreeSet::new(),
            max_output_tokens: default_max_output_tokens(),
            input_price_per_1k: 0.0,
            output_price_per_1k: 0.0,
            avg_latency_ms: default_latency_ms(),
            available: true,
        }
    }

    /// Add an alternate backend id for another family
    #[must_use]
    pub fn with_backend(mut self, family: ProviderFamily, backend_id: impl Into<String>) -> Self {
        self.backend_ids.insert(family, backend_id.into());
        self
    }

    /// Add capability tags
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Set prices per 1K input and output tokens
    #[must_use]
    pub fn with_pricing(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_price_per_1k = input_per_1k;
        self.output_price_per_1k = output_per_1k;
        self
    }

    /// Set the seed latency estimate
    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.avg_latency_ms = latency_ms;
        self
    }

    /// Set the output token ceiling
    #[must_use]
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Set the availability flag
    #[must_use]
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Backend id under `family`, if this model can run there
    #[must_use]
    pub fn backend_id(&self, family: ProviderFamily) -> Option<&str> {
        self.backend_ids.get(&family).map(String::as_str)
    }

    /// Backend id for the primary family
    #[must_use]
    pub fn primary_backend_id(&self) -> Option<&str> {
        self.backend_id(self.family)
    }

    /// Check for a capability tag
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Number of capability tags shared with `other`
    #[must_use]
    pub fn capability_overlap(&self, other: &ModelConfig) -> usize {
        self.capabilities.intersection(&other.capabilities).count()
    }

    /// Same model, re-pointed at another family it already maps to
    #[must_use]
    pub fn for_family(&self, family: ProviderFamily) -> Option<ModelConfig> {
        self.backend_ids.contains_key(&family).then(|| {
            let mut variant = self.clone();
            variant.family = family;
            variant
        })
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry validation failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    /// Entry with an empty id
    #[error("model entry with empty id")]
    EmptyId,

    /// Two entries share an id
    #[error("duplicate model id: {0}")]
    DuplicateId(String),

    /// Primary family has no usable backend id
    #[error("model {model_id} has no backend id for its primary family {family}")]
    MissingPrimaryBackend {
        /// Offending model
        model_id: String,
        /// Its primary family
        family: ProviderFamily,
    },

    /// Negative or non-finite price
    #[error("model {0} has an invalid price")]
    InvalidPrice(String),
}

/// Validated, immutable model catalogue
#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelConfig>,
}

impl ModelRegistry {
    /// Validate and index a set of model entries
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] for empty or duplicate ids, a primary
    /// family with no backend id, or an invalid price.
    pub fn new(models: impl IntoIterator<Item = ModelConfig>) -> Result<Self, RegistryError> {
        let mut indexed = HashMap::new();
        for model in models {
            if model.id.trim().is_empty() {
                return Err(RegistryError::EmptyId);
            }
            if !model
                .primary_backend_id()
                .is_some_and(|id| !id.trim().is_empty())
            {
                return Err(RegistryError::MissingPrimaryBackend {
                    model_id: model.id,
                    family: model.family,
                });
            }
            let prices = [model.input_price_per_1k, model.output_price_per_1k];
            if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
                return Err(RegistryError::InvalidPrice(model.id));
            }
            if indexed.contains_key(&model.id) {
                return Err(RegistryError::DuplicateId(model.id));
            }
            indexed.insert(model.id.clone(), model);
        }
        Ok(Self { models: indexed })
    }

    /// Registry seeded with the built-in catalogue
    ///
    /// # Errors
    ///
    /// Only fails if the built-in catalogue itself is inconsistent.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(builtin_models())
    }

    /// Look up a model by logical id
    #[must_use]
    pub fn get(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.get(model_id)
    }

    /// Check whether a model id is registered
    #[must_use]
    pub fn contains(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    /// Number of registered models
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// All entries, sorted by id
    #[must_use]
    pub fn models(&self) -> Vec<&ModelConfig> {
        let mut models: Vec<_> = self.models.values().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    /// Closest registry model served by `family`
    ///
    /// Candidates must be available and carry a backend id for `family`.
    /// Ranked by capability overlap (descending), then latency, then id.
    /// When `config` declares capabilities, at least one must be shared.
    #[must_use]
    pub fn most_similar(&self, config: &ModelConfig, family: ProviderFamily) -> Option<&ModelConfig> {
        let mut candidates: Vec<(&ModelConfig, usize)> = self
            .models
            .values()
            .filter(|m| m.id != config.id && m.available && m.backend_id(family).is_some())
            .map(|m| (m, config.capability_overlap(m)))
            .filter(|(_, overlap)| config.capabilities.is_empty() || *overlap > 0)
            .collect();

        candidates.sort_by(|(a, a_overlap), (b, b_overlap)| {
            b_overlap
                .cmp(a_overlap)
                .then(a.avg_latency_ms.cmp(&b.avg_latency_ms))
                .then_with(|| a.id.cmp(&b.id))
        });

        candidates.first().map(|(m, _)| *m)
    }

    /// Find or synthesize a variant of `config` pointing at `family`
    ///
    /// Uses the model's own backend id when it has one. Otherwise borrows the
    /// backend id of the most similar model on that family, keeping the
    /// requested model's capabilities and pricing.
    #[must_use]
    pub fn variant_for(&self, config: &ModelConfig, family: ProviderFamily) -> Option<ModelConfig> {
        if let Some(variant) = config.for_family(family) {
            return Some(variant);
        }

        let similar = self.most_similar(config, family)?;
        let backend_id = similar.backend_id(family)?.to_string();
        let mut variant = config.clone();
        variant.family = family;
        variant.backend_ids.insert(family, backend_id);
        Some(variant)
    }
}

// ============================================================================
// Built-in Catalogue
// ============================================================================

/// Models shipped with the router when no `[[models]]` section is configured
#[must_use]
pub fn builtin_models() -> Vec<ModelConfig> {
    use ProviderFamily::{Anthropic, Bedrock, Groq, LiteLlm, Ollama, OpenAi, OpenRouter, Perplexity};

    vec![
        ModelConfig::new("claude-sonnet-4", Anthropic, "claude-sonnet-4-20250514")
            .with_backend(Bedrock, "anthropic.claude-sonnet-4-20250514-v1:0")
            .with_backend(OpenRouter, "anthropic/claude-sonnet-4")
            .with_backend(LiteLlm, "claude-sonnet-4")
            .with_capabilities(["reasoning", "coding", "vision", "analysis", "chat"])
            .with_pricing(0.003, 0.015)
            .with_latency_ms(1800)
            .with_max_output_tokens(8192),
        ModelConfig::new("claude-haiku-3.5", Anthropic, "claude-3-5-haiku-20241022")
            .with_backend(Bedrock, "anthropic.claude-3-5-haiku-20241022-v1:0")
            .with_backend(OpenRouter, "anthropic/claude-3.5-haiku")
            .with_capabilities(["chat", "coding", "fast"])
            .with_pricing(0.0008, 0.004)
            .with_latency_ms(700)
            .with_max_output_tokens(8192),
        ModelConfig::new("gpt-4o", OpenAi, "gpt-4o")
            .with_backend(OpenRouter, "openai/gpt-4o")
            .with_backend(LiteLlm, "gpt-4o")
            .with_capabilities(["reasoning", "coding", "vision", "chat"])
            .with_pricing(0.0025, 0.01)
            .with_latency_ms(1500)
            .with_max_output_tokens(16384),
        ModelConfig::new("gpt-4o-mini", OpenAi, "gpt-4o-mini")
            .with_backend(OpenRouter, "openai/gpt-4o-mini")
            .with_backend(LiteLlm, "gpt-4o-mini")
            .with_capabilities(["chat", "coding", "fast"])
            .with_pricing(0.000_15, 0.0006)
            .with_latency_ms(600)
            .with_max_output_tokens(16384),
        ModelConfig::new("llama-3.3-70b", Groq, "llama-3.3-70b-versatile")
            .with_backend(Bedrock, "meta.llama3-3-70b-instruct-v1:0")
            .with_backend(OpenRouter, "meta-llama/llama-3.3-70b-instruct")
            .with_backend(Ollama, "llama3.3:70b")
            .with_capabilities(["chat", "coding", "fast"])
            .with_pricing(0.000_59, 0.000_79)
            .with_latency_ms(400)
            .with_max_output_tokens(8192),
        ModelConfig::new("sonar-pro", Perplexity, "sonar-pro")
            .with_backend(OpenRouter, "perplexity/sonar-pro")
            .with_capabilities(["search", "research", "citations"])
            .with_pricing(0.003, 0.015)
            .with_latency_ms(4000)
            .with_max_output_tokens(8192),
        ModelConfig::new("nova-pro", Bedrock, "amazon.nova-pro-v1:0")
            .with_capabilities(["chat", "vision", "analysis"])
            .with_pricing(0.0008, 0.0032)
            .with_latency_ms(1200)
            .with_max_output_tokens(5120),
        ModelConfig::new("llama3.2-local", Ollama, "llama3.2")
            .with_capabilities(["chat"])
            .with_latency_ms(900)
            .with_max_output_tokens(2048),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_family_round_trips_through_str() {
        for family in ProviderFamily::ALL {
            assert_eq!(family.as_str().parse::<ProviderFamily>(), Ok(family));
        }
        assert_eq!("Lite-LLM".parse::<ProviderFamily>(), Ok(ProviderFamily::LiteLlm));
        assert!("mystery".parse::<ProviderFamily>().is_err());
    }

    #[test]
    fn test_family_timeouts() {
        assert_eq!(ProviderFamily::Groq.default_timeout(), Duration::from_secs(30));
        assert_eq!(ProviderFamily::Perplexity.default_timeout(), Duration::from_secs(120));
        assert_eq!(ProviderFamily::OpenAi.default_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_only_ollama_lacks_system_role() {
        let without: Vec<_> = ProviderFamily::ALL
            .into_iter()
            .filter(|f| !f.has_system_role())
            .collect();
        assert_eq!(without, vec![ProviderFamily::Ollama]);
    }

    #[test]
    fn test_builtin_registry_is_valid() {
        let registry = ModelRegistry::builtin().unwrap();
        assert_eq!(registry.len(), builtin_models().len());
        assert!(registry.contains("claude-sonnet-4"));
    }

    #[test]
    fn test_registry_rejects_missing_primary_backend() {
        let mut model = ModelConfig::new("broken", ProviderFamily::OpenAi, "gpt-4o");
        model.family = ProviderFamily::Groq;

        let err = ModelRegistry::new([model]).unwrap_err();
        assert_eq!(
            err,
            RegistryError::MissingPrimaryBackend {
                model_id: "broken".to_string(),
                family: ProviderFamily::Groq,
            }
        );
    }

    #[test]
    fn test_registry_rejects_duplicates_and_bad_prices() {
        let a = ModelConfig::new("dup", ProviderFamily::OpenAi, "x");
        let b = ModelConfig::new("dup", ProviderFamily::Groq, "y");
        assert_eq!(
            ModelRegistry::new([a, b]).unwrap_err(),
            RegistryError::DuplicateId("dup".to_string())
        );

        let priced = ModelConfig::new("neg", ProviderFamily::OpenAi, "x").with_pricing(-1.0, 0.0);
        assert_eq!(
            ModelRegistry::new([priced]).unwrap_err(),
            RegistryError::InvalidPrice("neg".to_string())
        );
    }

    #[test]
    fn test_variant_uses_own_backend_mapping() {
        let registry = ModelRegistry::builtin().unwrap();
        let sonnet = registry.get("claude-sonnet-4").unwrap();

        let variant = registry.variant_for(sonnet, ProviderFamily::Bedrock).unwrap();
        assert_eq!(variant.family, ProviderFamily::Bedrock);
        assert_eq!(
            variant.primary_backend_id(),
            Some("anthropic.claude-sonnet-4-20250514-v1:0")
        );
        assert_eq!(variant.output_price_per_1k, sonnet.output_price_per_1k);
    }

    #[test]
    fn test_variant_borrows_similar_model_backend() {
        let primary = ModelConfig::new("primary", ProviderFamily::OpenAi, "p")
            .with_capabilities(["reasoning", "coding"])
            .with_pricing(0.01, 0.03);
        let close = ModelConfig::new("close", ProviderFamily::Groq, "close-groq")
            .with_capabilities(["reasoning", "coding"])
            .with_latency_ms(800);
        let faster_but_further = ModelConfig::new("far", ProviderFamily::Groq, "far-groq")
            .with_capabilities(["coding"])
            .with_latency_ms(100);
        let registry =
            ModelRegistry::new([primary.clone(), close, faster_but_further]).unwrap();

        let variant = registry.variant_for(&primary, ProviderFamily::Groq).unwrap();
        assert_eq!(variant.id, "primary");
        assert_eq!(variant.backend_id(ProviderFamily::Groq), Some("close-groq"));
        assert_eq!(variant.input_price_per_1k, 0.01);
        assert!(registry.variant_for(&primary, ProviderFamily::Ollama).is_none());
    }

    #[test]
    fn test_similar_lookup_skips_unavailable_and_disjoint() {
        let primary = ModelConfig::new("primary", ProviderFamily::OpenAi, "p")
            .with_capabilities(["vision"]);
        let disabled = ModelConfig::new("disabled", ProviderFamily::Groq, "d")
            .with_capabilities(["vision"])
            .with_available(false);
        let disjoint = ModelConfig::new("disjoint", ProviderFamily::Groq, "j")
            .with_capabilities(["search"]);
        let registry = ModelRegistry::new([primary.clone(), disabled, disjoint]).unwrap();

        assert!(registry.most_similar(&primary, ProviderFamily::Groq).is_none());
    }
}
