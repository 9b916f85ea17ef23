//! TOML Configuration File Support
//!
//! Router settings load from `$XDG_CONFIG_HOME/radiant/router.toml`
//! (typically `~/.config/radiant/router.toml`).
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. `RADIANT_*` environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! health_path = "/var/lib/radiant/provider-health.json"
//! usage_log_path = "/var/log/radiant/usage.jsonl"
//!
//! [resilience]
//! max_retries = 2
//! initial_backoff_ms = 1000
//! max_backoff_ms = 10000
//! failure_threshold = 5
//! cooldown_secs = 30
//!
//! [providers.groq]
//! timeout_secs = 30
//! requests_per_minute = 30
//! daily_requests = 14400
//!
//! [providers.ollama]
//! enabled = false
//!
//! [fallback]
//! openai = ["litellm", "bedrock"]
//!
//! [[models]]
//! id = "house-model"
//! family = "litellm"
//! backend_ids = { litellm = "house/gpt-4o" }
//! capabilities = ["chat", "code"]
//! input_price_per_1k = 0.0025
//! output_price_per_1k = 0.01
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fallback::StaticFallbackTable;
use crate::rate_limit::RateLimitConfig;
use crate::registry::{ModelConfig, ProviderFamily};
use crate::resilience::ResilienceConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Shared HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where configuration values came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Resolved Settings
// =============================================================================

/// Connection and budget settings for one family
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Whether an adapter is created for the family
    pub enabled: bool,
    /// API root
    pub base_url: String,
    /// Environment variable holding the credential
    pub api_key_env: Option<String>,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Local request and token budgets
    pub rate_limit: RateLimitConfig,
}

impl ProviderSettings {
    /// Defaults for a family
    #[must_use]
    pub fn for_family(family: ProviderFamily) -> Self {
        Self {
            enabled: true,
            base_url: family.default_base_url().to_string(),
            api_key_env: family.default_api_key_env().map(str::to_string),
            timeout: family.default_timeout(),
            max_retries: 2,
            rate_limit: RateLimitConfig::for_family(family),
        }
    }
}

/// Everything needed to build a router
#[derive(Clone, Debug)]
pub struct RouterSettings {
    /// Per-family settings; every family has an entry
    pub providers: BTreeMap<ProviderFamily, ProviderSettings>,

    /// Breaker and backoff thresholds
    pub resilience: ResilienceConfig,

    /// Replacement fallback chains keyed by primary family
    pub fallback_overrides: BTreeMap<ProviderFamily, Vec<ProviderFamily>>,

    /// Model catalogue; `None` means the built-in one
    pub models: Option<Vec<ModelConfig>>,

    /// Health snapshot file; `None` disables persistence
    pub health_path: Option<PathBuf>,

    /// JSON-lines usage log; `None` logs usage through tracing
    pub usage_log_path: Option<PathBuf>,

    /// Background job queue depth
    pub housekeeping_capacity: usize,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            providers: ProviderFamily::ALL
                .into_iter()
                .map(|family| (family, ProviderSettings::for_family(family)))
                .collect(),
            resilience: ResilienceConfig::default(),
            fallback_overrides: BTreeMap::new(),
            models: None,
            health_path: default_health_path(),
            usage_log_path: None,
            housekeeping_capacity: 1024,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RouterSettings {
    /// Create settings with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for a family
    #[must_use]
    pub fn provider(&self, family: ProviderFamily) -> ProviderSettings {
        self.providers
            .get(&family)
            .cloned()
            .unwrap_or_else(|| ProviderSettings::for_family(family))
    }

    /// Mutable settings for a family
    pub fn provider_mut(&mut self, family: ProviderFamily) -> &mut ProviderSettings {
        self.providers
            .entry(family)
            .or_insert_with(|| ProviderSettings::for_family(family))
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.resilience.breaker.failure_threshold == 0 {
            return invalid("failure_threshold must be at least 1".into());
        }
        if self.resilience.retry.backoff_multiplier < 1.0 {
            return invalid("backoff_multiplier must be at least 1.0".into());
        }
        if self.resilience.retry.initial_backoff_ms > self.resilience.retry.max_backoff_ms {
            return invalid("initial_backoff_ms exceeds max_backoff_ms".into());
        }
        for (family, provider) in &self.providers {
            if provider.timeout.is_zero() {
                return invalid(format!("{family}: timeout must be positive"));
            }
            if provider.enabled && provider.base_url.trim().is_empty() {
                return invalid(format!("{family}: base_url is empty"));
            }
        }
        for (primary, chain) in &self.fallback_overrides {
            StaticFallbackTable::validate_chain(*primary, chain)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        if self.housekeeping_capacity == 0 {
            return invalid("housekeeping_capacity must be positive".into());
        }
        Ok(())
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[resilience]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceToml {
    /// Retries after the first attempt, for every family
    pub max_retries: Option<u32>,
    /// Delay before the first retry
    pub initial_backoff_ms: Option<u64>,
    /// Ceiling for any retry delay
    pub max_backoff_ms: Option<u64>,
    /// Backoff growth per attempt
    pub backoff_multiplier: Option<f64>,
    /// Random jitter on backoff
    pub use_jitter: Option<bool>,
    /// Failures that open a breaker
    pub failure_threshold: Option<u32>,
    /// Window in which failures count
    pub failure_window_secs: Option<u64>,
    /// Open duration before a trial
    pub cooldown_secs: Option<u64>,
}

/// `[providers.<family>]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    /// Create an adapter for this family
    pub enabled: Option<bool>,
    /// API root
    pub base_url: Option<String>,
    /// Credential variable name
    pub api_key_env: Option<String>,
    /// Per-attempt timeout
    pub timeout_secs: Option<u64>,
    /// Retries after the first attempt
    pub max_retries: Option<u32>,
    /// Request budget
    pub requests_per_minute: Option<u32>,
    /// Token budget
    pub tokens_per_minute: Option<u64>,
    /// Daily request cap
    pub daily_requests: Option<u32>,
    /// Enforce budgets
    pub rate_limit_enabled: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// Health snapshot file
    pub health_path: Option<PathBuf>,
    /// Usage log file
    pub usage_log_path: Option<PathBuf>,
    /// Background queue depth
    pub housekeeping_capacity: Option<usize>,
    /// Resilience section
    pub resilience: ResilienceToml,
    /// Per-family sections keyed by family name
    pub providers: HashMap<String, ProviderToml>,
    /// Fallback chains keyed by primary family name
    pub fallback: HashMap<String, Vec<String>>,
    /// Replacement model catalogue
    pub models: Option<Vec<ModelConfig>>,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Default configuration file location
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("radiant").join("router.toml"))
}

/// Default health snapshot location
#[must_use]
pub fn default_health_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("radiant").join("provider-health.json"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed or holds
/// invalid values. A missing file is not an error.
pub fn load_config() -> Result<RouterSettings, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the merged
/// settings fail [`RouterSettings::validate`].
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RouterSettings, ConfigError> {
    let mut config = RouterSettings::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RouterToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config_from(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn parse_family(name: &str) -> Result<ProviderFamily, ConfigError> {
    name.parse()
        .map_err(|e: crate::registry::ParseFamilyError| ConfigError::ValidationError(e.to_string()))
}

/// Apply TOML configuration values to the settings
///
/// # Errors
///
/// Unknown family names in `[providers]` or `[fallback]`.
pub fn apply_toml_config(config: &mut RouterSettings, toml: RouterToml) -> Result<(), ConfigError> {
    if toml.health_path.is_some() {
        config.health_path = toml.health_path;
    }
    if toml.usage_log_path.is_some() {
        config.usage_log_path = toml.usage_log_path;
    }
    if let Some(capacity) = toml.housekeeping_capacity {
        config.housekeeping_capacity = capacity;
    }

    let r = &toml.resilience;
    if let Some(retries) = r.max_retries {
        for provider in config.providers.values_mut() {
            provider.max_retries = retries;
        }
    }
    if let Some(ms) = r.initial_backoff_ms {
        config.resilience.retry.initial_backoff_ms = ms;
    }
    if let Some(ms) = r.max_backoff_ms {
        config.resilience.retry.max_backoff_ms = ms;
    }
    if let Some(multiplier) = r.backoff_multiplier {
        config.resilience.retry.backoff_multiplier = multiplier;
    }
    if let Some(jitter) = r.use_jitter {
        config.resilience.retry.use_jitter = jitter;
    }
    if let Some(threshold) = r.failure_threshold {
        config.resilience.breaker.failure_threshold = threshold;
    }
    if let Some(secs) = r.failure_window_secs {
        config.resilience.breaker.failure_window = Duration::from_secs(secs);
    }
    if let Some(secs) = r.cooldown_secs {
        config.resilience.breaker.cooldown = Duration::from_secs(secs);
    }

    for (name, section) in toml.providers {
        let family = parse_family(&name)?;
        let provider = config.provider_mut(family);
        if let Some(enabled) = section.enabled {
            provider.enabled = enabled;
        }
        if let Some(url) = section.base_url {
            provider.base_url = url;
        }
        if let Some(var) = section.api_key_env {
            provider.api_key_env = (!var.is_empty()).then_some(var);
        }
        if let Some(secs) = section.timeout_secs {
            provider.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = section.max_retries {
            provider.max_retries = retries;
        }
        if let Some(rpm) = section.requests_per_minute {
            provider.rate_limit.requests_per_minute = rpm;
        }
        if section.tokens_per_minute.is_some() {
            provider.rate_limit.tokens_per_minute = section.tokens_per_minute;
        }
        if section.daily_requests.is_some() {
            provider.rate_limit.daily_requests = section.daily_requests;
        }
        if let Some(enabled) = section.rate_limit_enabled {
            provider.rate_limit.enabled = enabled;
        }
    }

    for (primary, chain) in toml.fallback {
        let primary = parse_family(&primary)?;
        let chain = chain
            .iter()
            .map(|name| parse_family(name))
            .collect::<Result<Vec<_>, _>>()?;
        config.fallback_overrides.insert(primary, chain);
    }

    if toml.models.is_some() {
        config.models = toml.models;
    }
    Ok(())
}

fn parse_bool(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply `RADIANT_*` overrides read through `lookup`
///
/// Recognised variables:
/// - `RADIANT_HEALTH_PATH`, `RADIANT_USAGE_LOG`
/// - `RADIANT_MAX_RETRIES`, `RADIANT_BREAKER_THRESHOLD`, `RADIANT_BREAKER_COOLDOWN_SECS`
/// - `RADIANT_RATE_LIMITS` (`0`/`false` turns every budget off)
/// - `RADIANT_<FAMILY>_ENABLED`, `RADIANT_<FAMILY>_BASE_URL`,
///   `RADIANT_<FAMILY>_TIMEOUT_SECS`, `RADIANT_<FAMILY>_RPM`
///
/// Unparseable values are ignored.
pub fn apply_env_config_from<F>(config: &mut RouterSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup("RADIANT_HEALTH_PATH") {
        config.health_path = (!path.is_empty()).then(|| PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    if let Some(path) = lookup("RADIANT_USAGE_LOG") {
        config.usage_log_path = (!path.is_empty()).then(|| PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    if let Some(Ok(retries)) = lookup("RADIANT_MAX_RETRIES").map(|v| v.parse::<u32>()) {
        for provider in config.providers.values_mut() {
            provider.max_retries = retries;
        }
        config.source = ConfigSource::Env;
    }
    if let Some(Ok(threshold)) = lookup("RADIANT_BREAKER_THRESHOLD").map(|v| v.parse::<u32>()) {
        config.resilience.breaker.failure_threshold = threshold;
        config.source = ConfigSource::Env;
    }
    if let Some(Ok(secs)) = lookup("RADIANT_BREAKER_COOLDOWN_SECS").map(|v| v.parse::<u64>()) {
        config.resilience.breaker.cooldown = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(value) = lookup("RADIANT_RATE_LIMITS") {
        let enabled = parse_bool(&value);
        for provider in config.providers.values_mut() {
            provider.rate_limit.enabled = enabled && provider.rate_limit.enabled;
        }
        config.source = ConfigSource::Env;
    }

    for family in ProviderFamily::ALL {
        let prefix = format!("RADIANT_{}", family.as_str().to_ascii_uppercase());
        let mut touched = false;
        let provider = config.provider_mut(family);

        if let Some(value) = lookup(&format!("{prefix}_ENABLED")) {
            provider.enabled = parse_bool(&value);
            touched = true;
        }
        if let Some(url) = lookup(&format!("{prefix}_BASE_URL")) {
            provider.base_url = url;
            touched = true;
        }
        if let Some(Ok(secs)) = lookup(&format!("{prefix}_TIMEOUT_SECS")).map(|v| v.parse::<u64>()) {
            provider.timeout = Duration::from_secs(secs);
            touched = true;
        }
        if let Some(Ok(rpm)) = lookup(&format!("{prefix}_RPM")).map(|v| v.parse::<u32>()) {
            provider.rate_limit.requests_per_minute = rpm;
            touched = true;
        }
        if touched {
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Health snapshot file
    pub health_path: Option<PathBuf>,
    /// Usage log file
    pub usage_log_path: Option<PathBuf>,
    /// Retry budget for every family
    pub max_retries: Option<u32>,
    /// Restrict adapters to these families
    pub only_families: Option<Vec<ProviderFamily>>,
}

impl ConfigOverrides {
    /// Create empty overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the health snapshot path
    #[must_use]
    pub fn with_health_path(mut self, path: PathBuf) -> Self {
        self.health_path = Some(path);
        self
    }

    /// Override the usage log path
    #[must_use]
    pub fn with_usage_log_path(mut self, path: PathBuf) -> Self {
        self.usage_log_path = Some(path);
        self
    }

    /// Override the retry budget
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Enable only the listed families
    #[must_use]
    pub fn with_only_families(mut self, families: Vec<ProviderFamily>) -> Self {
        self.only_families = Some(families);
        self
    }

    /// Apply overrides; the source becomes CLI if anything changed
    pub fn apply(&self, config: &mut RouterSettings) {
        let mut changed = false;
        if let Some(path) = &self.health_path {
            config.health_path = Some(path.clone());
            changed = true;
        }
        if let Some(path) = &self.usage_log_path {
            config.usage_log_path = Some(path.clone());
            changed = true;
        }
        if let Some(retries) = self.max_retries {
            for provider in config.providers.values_mut() {
                provider.max_retries = retries;
            }
            changed = true;
        }
        if let Some(only) = &self.only_families {
            for (family, provider) in &mut config.providers {
                provider.enabled = only.contains(family);
            }
            changed = true;
        }
        if changed {
            config.source = ConfigSource::Cli;
        }
    }
}
