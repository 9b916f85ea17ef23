//! Model Router
//!
//! The entry point for running a logical model. Coordinates the registry,
//! rate limiter, resilience executor, health store and fallback policy.
//!
//! # Flow
//!
//! ```text
//! invoke(request)
//!     |
//!     v
//! registry lookup ----unknown----> UnknownModel
//!     |
//!     v
//! dispatch(primary) --ok--> record success, queue usage --> response
//!     |
//!     | failed
//!     v
//! for family in eligible fallbacks:
//!     variant_for(family) -> dispatch --ok--> response
//!     |
//!     v
//! AllProvidersFailed { attempts }
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let router = Arc::new(ModelRouter::from_config(&load_config()?)?);
//! router.load_persisted_health().await;
//!
//! let response = router
//!     .invoke(InvocationRequest::new("gpt-4o").with_user("Hello"))
//!     .await?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::adapters::{create_adapter, ProviderAdapter, ProviderCall};
use crate::background::{Housekeeper, HousekeepingStats};
use crate::config::{ConfigError, RouterSettings};
use crate::error::{DispatchError, RouterError};
use crate::fallback::{healthy_fallbacks, FallbackContext, FallbackPolicy, StaticFallbackTable};
use crate::health::{
    HealthPersistence, JsonFileHealthPersistence, NoopHealthPersistence, ProviderHealth,
    ProviderHealthStore,
};
use crate::metrics::{MetricsSnapshot, RouterMetrics};
use crate::pricing::{compute_cost_cents, estimate_tokens};
use crate::rate_limit::{DenialReason, RateLimitStatus, RateLimiter};
use crate::registry::{ModelConfig, ModelRegistry, ProviderFamily};
use crate::resilience::{
    CallOptions, CircuitSnapshot, ResilienceConfig, ResilienceError, ResilienceExecutor,
};
use crate::telemetry::{JsonLinesUsageSink, TracingUsageSink, UsageRecord, UsageSink};
use crate::types::{InvocationRequest, InvocationResponse};

// ============================================================================
// Settings and Constraints
// ============================================================================

/// Timeout and retry budget for dispatches to one family
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Per-attempt deadline
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl DispatchSettings {
    /// Family timeout with two retries
    #[must_use]
    pub fn for_family(family: ProviderFamily) -> Self {
        Self {
            timeout: family.default_timeout(),
            max_retries: 2,
        }
    }
}

/// Filters for [`ModelRouter::get_best_model`]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ModelConstraints {
    /// Highest acceptable average latency
    pub max_latency_ms: Option<u64>,
    /// Highest acceptable output price per 1K tokens (dollars)
    pub max_cost_per_1k: Option<f64>,
}

impl ModelConstraints {
    /// No constraints
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap average latency
    #[must_use]
    pub fn with_max_latency_ms(mut self, ms: u64) -> Self {
        self.max_latency_ms = Some(ms);
        self
    }

    /// Cap output price
    #[must_use]
    pub fn with_max_cost_per_1k(mut self, dollars: f64) -> Self {
        self.max_cost_per_1k = Some(dollars);
        self
    }

    fn admits(&self, model: &ModelConfig) -> bool {
        self.max_latency_ms
            .map_or(true, |max| model.avg_latency_ms <= max)
            && self
                .max_cost_per_1k
                .map_or(true, |max| model.output_price_per_1k <= max)
    }
}

// ============================================================================
// Router
// ============================================================================

/// Routes invocations across provider families with fallback
///
/// One instance owns all routing state; share it as `Arc<ModelRouter>`.
pub struct ModelRouter {
    registry: Arc<ModelRegistry>,
    adapters: HashMap<ProviderFamily, Arc<dyn ProviderAdapter>>,
    dispatch_settings: HashMap<ProviderFamily, DispatchSettings>,
    fallback: Arc<dyn FallbackPolicy>,
    health: ProviderHealthStore,
    rate_limiter: RateLimiter,
    executor: ResilienceExecutor,
    usage: Arc<dyn UsageSink>,
    housekeeper: Housekeeper,
    metrics: RouterMetrics,
}

impl ModelRouter {
    /// Start building a router over `registry`
    #[must_use]
    pub fn builder(registry: ModelRegistry) -> ModelRouterBuilder {
        ModelRouterBuilder::new(registry)
    }

    /// Build a router with HTTP adapters for every enabled family
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Invalid settings, an inconsistent model catalogue, or an HTTP client
    /// that cannot be constructed.
    pub fn from_config(settings: &RouterSettings) -> Result<Self, ConfigError> {
        settings.validate()?;

        let registry = match &settings.models {
            Some(models) => ModelRegistry::new(models.iter().cloned()),
            None => ModelRegistry::builtin(),
        }
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let fallback = StaticFallbackTable::default();
        for (primary, chain) in &settings.fallback_overrides {
            fallback
                .set_chain(*primary, chain.clone())
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }

        let persistence: Arc<dyn HealthPersistence> = match &settings.health_path {
            Some(path) => Arc::new(JsonFileHealthPersistence::new(path)),
            None => Arc::new(NoopHealthPersistence),
        };
        let usage: Arc<dyn UsageSink> = match &settings.usage_log_path {
            Some(path) => Arc::new(JsonLinesUsageSink::new(path)),
            None => Arc::new(TracingUsageSink),
        };

        let mut limiter = RateLimiter::new();
        let mut builder = Self::builder(registry)
            .with_resilience(settings.resilience.clone())
            .with_fallback_policy(Arc::new(fallback))
            .with_health_persistence(persistence)
            .with_usage_sink(usage)
            .with_housekeeping_capacity(settings.housekeeping_capacity);

        for (&family, provider) in &settings.providers {
            limiter = limiter.with_config(family, provider.rate_limit.clone());
            if !provider.enabled {
                tracing::debug!(provider = %family, "Provider disabled in configuration");
                continue;
            }
            builder = builder
                .with_adapter(create_adapter(family, provider, client.clone()))
                .with_dispatch_settings(
                    family,
                    DispatchSettings {
                        timeout: provider.timeout,
                        max_retries: provider.max_retries,
                    },
                );
        }

        let router = builder.with_rate_limiter(limiter).build();
        tracing::info!(
            models = router.registry.len(),
            providers = router.adapters.len(),
            source = %settings.source(),
            "Model router configured"
        );
        Ok(router)
    }

    // ------------------------------------------------------------------------
    // Invocation
    // ------------------------------------------------------------------------

    /// Run a logical model, falling back across families on failure
    ///
    /// # Errors
    ///
    /// [`RouterError::UnknownModel`] for ids missing from the registry and
    /// [`RouterError::AllProvidersFailed`] once the primary and every
    /// eligible fallback have failed.
    pub async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResponse, RouterError> {
        let config = self
            .registry
            .get(&request.model_id)
            .ok_or_else(|| RouterError::UnknownModel(request.model_id.clone()))?
            .clone();

        tracing::debug!(
            request_id = %request.request_id,
            model_id = %config.id,
            primary = %config.family,
            "Invoking model"
        );

        let mut ctx = FallbackContext::new(&config.id, config.family);
        if let Some(response) = self.attempt(&config, &request, &mut ctx).await {
            return Ok(response);
        }

        let candidates = healthy_fallbacks(self.fallback.as_ref(), config.family, |family| {
            self.health.is_eligible(family)
        });
        for family in candidates {
            // Earlier attempts in this walk may have changed eligibility.
            if ctx.has_tried(family) || !self.health.is_eligible(family) {
                continue;
            }
            let Some(variant) = self.registry.variant_for(&config, family) else {
                tracing::debug!(model_id = %config.id, provider = %family, "No variant for fallback family");
                continue;
            };

            tracing::info!(
                request_id = %request.request_id,
                model_id = %config.id,
                from = %config.family,
                to = %family,
                "Falling back"
            );
            if let Some(response) = self.attempt(&variant, &request, &mut ctx).await {
                return Ok(response);
            }
        }

        self.metrics.record_invocation(false, false, 0);
        let error = ctx.into_error();
        tracing::warn!(request_id = %request.request_id, error = %error, "Invocation failed");
        Err(error)
    }

    /// Dispatch once and record the outcome
    async fn attempt(
        &self,
        config: &ModelConfig,
        request: &InvocationRequest,
        ctx: &mut FallbackContext,
    ) -> Option<InvocationResponse> {
        let family = config.family;
        let backend_model = config.primary_backend_id().map(str::to_string);
        let fallback = family != ctx.primary;
        ctx.begin(family);

        let started = Instant::now();
        match self.dispatch(config, request).await {
            Ok(mut response) => {
                self.health.record_success(family, response.latency_ms);
                self.metrics.record_dispatch_success(
                    family,
                    response.latency_ms,
                    response.input_tokens + response.output_tokens,
                    fallback,
                );
                self.metrics
                    .record_invocation(true, fallback, response.cost_cents);
                self.emit_usage(UsageRecord {
                    request_id: request.request_id,
                    model_id: config.id.clone(),
                    provider: family,
                    backend_model,
                    success: true,
                    latency_ms: response.latency_ms,
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                    cost_cents: response.cost_cents,
                    error: None,
                    recorded_at: Utc::now(),
                });

                response.failed_attempts = ctx.attempts.clone();
                Some(response)
            }
            Err(error) => {
                let reason = error.to_string();
                tracing::debug!(
                    request_id = %request.request_id,
                    provider = %family,
                    error = %reason,
                    "Dispatch failed"
                );
                self.health.record_failure(family, &reason);
                self.metrics.record_dispatch_failure(family, error.failure());
                self.emit_usage(UsageRecord {
                    request_id: request.request_id,
                    model_id: config.id.clone(),
                    provider: family,
                    backend_model: backend_model.clone(),
                    success: false,
                    latency_ms: elapsed_ms(started),
                    input_tokens: 0,
                    output_tokens: 0,
                    cost_cents: 0,
                    error: Some(reason),
                    recorded_at: Utc::now(),
                });
                ctx.record_failure(family, backend_model, &error);
                None
            }
        }
    }

    /// Send `request` to the family named by `config`
    ///
    /// No fallback, health or telemetry side effects; rate-limit budget and
    /// breaker state are consumed. An open breaker is checked before the
    /// rate limiter, and every retry is charged one request slot.
    ///
    /// # Errors
    ///
    /// A [`DispatchError`] for local denials, missing configuration, or the
    /// resilience layer giving up.
    pub async fn dispatch(
        &self,
        config: &ModelConfig,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, DispatchError> {
        let family = config.family;
        if !config.available {
            return Err(DispatchError::ModelDisabled(config.id.clone()));
        }
        let backend_model = config
            .primary_backend_id()
            .ok_or_else(|| DispatchError::NoBackendId {
                model_id: config.id.clone(),
                provider: family,
            })?;
        let adapter = self
            .adapters
            .get(&family)
            .ok_or(DispatchError::NoAdapter(family))?;

        if let Some(retry_in) = self.executor.rejection(family.as_str()) {
            return Err(DispatchError::Resilience(ResilienceError::CircuitOpen {
                provider: family.as_str().to_string(),
                retry_in,
            }));
        }

        let decision = self.rate_limiter.check(family);
        if !decision.allowed {
            return Err(DispatchError::RateLimited {
                provider: family,
                reason: decision.reason.unwrap_or(DenialReason::RequestsPerMinute),
                limit: decision.limit,
                reset_in: decision.reset_in,
            });
        }

        let call = ProviderCall::from_request(request, backend_model, config.max_output_tokens);
        let settings = self.dispatch_settings(family);
        let options = CallOptions::new(family.as_str(), "complete")
            .with_timeout(settings.timeout)
            .with_max_retries(settings.max_retries);

        // The limiter check above paid for the first upstream call.
        let upstream_calls = AtomicU32::new(0);
        let started = Instant::now();
        let result = self
            .executor
            .execute(&options, || {
                upstream_calls.fetch_add(1, Ordering::Relaxed);
                adapter.complete(&call)
            })
            .await;
        let retries = upstream_calls.load(Ordering::Relaxed).saturating_sub(1);
        if retries > 0 {
            self.rate_limiter.record_requests(family, u64::from(retries));
        }
        let output = result?;
        let latency_ms = elapsed_ms(started);

        let input_tokens = output
            .input_tokens
            .unwrap_or_else(|| estimate_tokens(&call.input_text()));
        let output_tokens = output
            .output_tokens
            .unwrap_or_else(|| estimate_tokens(&output.content));
        self.rate_limiter
            .record_tokens(family, input_tokens + output_tokens);

        Ok(InvocationResponse {
            request_id: request.request_id,
            content: output.content,
            model_id: config.id.clone(),
            model_used: backend_model.to_string(),
            provider: family,
            input_tokens,
            output_tokens,
            latency_ms,
            cost_cents: compute_cost_cents(
                input_tokens,
                output_tokens,
                config.input_price_per_1k,
                config.output_price_per_1k,
            ),
            cached: false,
            failed_attempts: Vec::new(),
        })
    }

    fn emit_usage(&self, record: UsageRecord) {
        let sink = Arc::clone(&self.usage);
        self.housekeeper.submit("record_model_usage", async move {
            sink.record_model_usage(&record).await
        });
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Best available, healthy model with `capability`
    ///
    /// Ranked by consecutive failures, then average latency, then output
    /// price, then id.
    #[must_use]
    pub fn get_best_model(&self, capability: &str, constraints: &ModelConstraints) -> Option<ModelConfig> {
        let mut candidates: Vec<(&ModelConfig, u32)> = self
            .registry
            .models()
            .into_iter()
            .filter(|m| m.available && m.has_capability(capability) && constraints.admits(m))
            .filter(|m| self.health.is_healthy(m.family))
            .map(|m| (m, self.health.consecutive_failures(m.family)))
            .collect();

        candidates.sort_by(|(a, a_failures), (b, b_failures)| {
            a_failures
                .cmp(b_failures)
                .then(a.avg_latency_ms.cmp(&b.avg_latency_ms))
                .then(a.output_price_per_1k.total_cmp(&b.output_price_per_1k))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.first().map(|(m, _)| (*m).clone())
    }

    /// Whether the model exists, is enabled, and its primary family is healthy
    #[must_use]
    pub fn is_model_available(&self, model_id: &str) -> bool {
        self.registry
            .get(model_id)
            .is_some_and(|m| m.available && self.health.is_healthy(m.family))
    }

    /// Health of every family
    #[must_use]
    pub fn get_provider_status(&self) -> Vec<ProviderHealth> {
        self.health.all()
    }

    /// Rate-limit usage of every family
    #[must_use]
    pub fn get_rate_limit_status(&self) -> BTreeMap<ProviderFamily, RateLimitStatus> {
        self.rate_limiter.status()
    }

    /// Breaker state of every family that has been called
    #[must_use]
    pub fn breaker_status(&self) -> Vec<CircuitSnapshot> {
        self.executor.breaker_snapshots()
    }

    /// Router counters
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Background job counters
    #[must_use]
    pub fn housekeeping_stats(&self) -> HousekeepingStats {
        self.housekeeper.stats()
    }

    /// The model catalogue
    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Warm provider health from persistence; never fails
    pub async fn load_persisted_health(&self) -> usize {
        self.health.load_persisted_health().await
    }

    /// Clear a family's failure streak and close its breaker
    pub fn reset_provider(&self, family: ProviderFamily) -> ProviderHealth {
        self.executor.reset_breaker(family.as_str());
        self.health.reset(family)
    }

    /// Wait for queued telemetry and persistence to finish
    pub async fn flush_housekeeping(&self) {
        self.housekeeper.flush().await;
    }

    fn dispatch_settings(&self, family: ProviderFamily) -> DispatchSettings {
        self.dispatch_settings
            .get(&family)
            .copied()
            .unwrap_or_else(|| DispatchSettings::for_family(family))
    }
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut adapters: Vec<_> = self.adapters.keys().map(|f| f.as_str()).collect();
        adapters.sort_unstable();
        f.debug_struct("ModelRouter")
            .field("models", &self.registry.len())
            .field("adapters", &adapters)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`ModelRouter`] from parts
pub struct ModelRouterBuilder {
    registry: ModelRegistry,
    adapters: HashMap<ProviderFamily, Arc<dyn ProviderAdapter>>,
    dispatch_settings: HashMap<ProviderFamily, DispatchSettings>,
    fallback: Arc<dyn FallbackPolicy>,
    persistence: Arc<dyn HealthPersistence>,
    usage: Arc<dyn UsageSink>,
    rate_limiter: RateLimiter,
    resilience: ResilienceConfig,
    housekeeping_capacity: usize,
}

impl ModelRouterBuilder {
    fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            adapters: HashMap::new(),
            dispatch_settings: HashMap::new(),
            fallback: Arc::new(StaticFallbackTable::default()),
            persistence: Arc::new(NoopHealthPersistence),
            usage: Arc::new(TracingUsageSink),
            rate_limiter: RateLimiter::new(),
            resilience: ResilienceConfig::default(),
            housekeeping_capacity: Housekeeper::DEFAULT_CAPACITY,
        }
    }

    /// Register the adapter for its family, replacing any previous one
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.family(), adapter);
        self
    }

    /// Timeout and retries for one family
    #[must_use]
    pub fn with_dispatch_settings(mut self, family: ProviderFamily, settings: DispatchSettings) -> Self {
        self.dispatch_settings.insert(family, settings);
        self
    }

    /// Replace the fallback policy
    #[must_use]
    pub fn with_fallback_policy(mut self, policy: Arc<dyn FallbackPolicy>) -> Self {
        self.fallback = policy;
        self
    }

    /// Replace health persistence
    #[must_use]
    pub fn with_health_persistence(mut self, persistence: Arc<dyn HealthPersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    /// Replace the usage sink
    #[must_use]
    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage = sink;
        self
    }

    /// Replace the rate limiter
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = limiter;
        self
    }

    /// Breaker and backoff settings
    #[must_use]
    pub fn with_resilience(mut self, config: ResilienceConfig) -> Self {
        self.resilience = config;
        self
    }

    /// Background queue depth
    #[must_use]
    pub fn with_housekeeping_capacity(mut self, capacity: usize) -> Self {
        self.housekeeping_capacity = capacity;
        self
    }

    /// Finish; spawns the housekeeping worker on the current runtime
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn build(self) -> ModelRouter {
        let housekeeper = Housekeeper::spawn(self.housekeeping_capacity);
        ModelRouter {
            registry: Arc::new(self.registry),
            adapters: self.adapters,
            dispatch_settings: self.dispatch_settings,
            fallback: self.fallback,
            health: ProviderHealthStore::new(self.persistence, housekeeper.clone()),
            rate_limiter: self.rate_limiter,
            executor: ResilienceExecutor::new(self.resilience),
            usage: self.usage,
            housekeeper,
            metrics: RouterMetrics::new(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
