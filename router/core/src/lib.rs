//! RADIANT Router Core - Provider Invocation with Resilience and Fallback
//!
//! Runs a logical model id against one of several upstream provider families,
//! protecting each call with rate limits, a circuit breaker, retries and a
//! timeout, and walking a fallback chain when the primary family fails.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         ModelRouter                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────────┐ │
//! │  │ModelRegistry │  │FallbackPolicy│  │ ProviderHealthStore │ │
//! │  └──────┬───────┘  └──────┬───────┘  └──────────┬──────────┘ │
//! │         └─────────────────┼─────────────────────┘            │
//! │                           │ dispatch                         │
//! │  ┌────────────┐  ┌────────┴──────────┐  ┌──────────────────┐ │
//! │  │RateLimiter │->│ResilienceExecutor │->│ ProviderAdapter  │ │
//! │  └────────────┘  │breaker/retry/time │  │ openai/anthropic │ │
//! │                  └───────────────────┘  │ bedrock/ollama   │ │
//! │                                         └──────────────────┘ │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │ fire and forget
//!                  ┌──────────┴──────────┐
//!                  │     Housekeeper     │
//!                  │ usage + health I/O  │
//!                  └─────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use radiant_router::{load_config, InvocationRequest, ModelRouter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let router = ModelRouter::from_config(&load_config()?)?;
//!     router.load_persisted_health().await;
//!
//!     let response = router
//!         .invoke(InvocationRequest::new("claude-sonnet-4").with_user("Hello"))
//!         .await?;
//!     println!("{} (via {})", response.content, response.provider);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`router`]: Invocation, fallback walk and status queries
//! - [`registry`]: Provider families and the model catalogue
//! - [`adapters`]: Wire protocols for each family
//! - [`resilience`]: Circuit breaker, retry with backoff, timeouts
//! - [`rate_limit`]: Sliding-window request and token budgets
//! - [`health`]: Consecutive-failure health tracking and persistence
//! - [`fallback`]: Fallback chains and the per-invocation walk
//! - [`telemetry`]: Usage records and sinks
//! - [`metrics`]: In-process counters and latency histograms
//! - [`background`]: Bounded fire-and-forget job queue
//! - [`config`]: TOML, environment and CLI configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapters;
pub mod background;
pub mod config;
pub mod error;
pub mod fallback;
pub mod health;
pub mod metrics;
pub mod pricing;
pub mod rate_limit;
pub mod registry;
pub mod resilience;
pub mod router;
pub mod telemetry;
pub mod types;

pub use router::{DispatchSettings, ModelConstraints, ModelRouter, ModelRouterBuilder};

pub use error::{AttemptFailure, DispatchError, ProviderAttempt, RouterError};
pub use registry::{ModelConfig, ModelRegistry, ProviderFamily, RegistryError};
pub use types::{ChatMessage, ChatRole, InvocationRequest, InvocationResponse};

// Provider exports
pub use adapters::{AdapterOutput, CallError, ProviderAdapter, ProviderCall};
pub use health::{HealthPersistence, ProviderHealth, ProviderHealthStore, UNHEALTHY_THRESHOLD};
pub use rate_limit::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use resilience::{CircuitBreakerConfig, CircuitState, ResilienceConfig, RetryConfig};

// Fallback exports
pub use fallback::{FallbackPolicy, StaticFallbackTable};

// Telemetry exports
pub use metrics::MetricsSnapshot;
pub use telemetry::{UsageRecord, UsageSink};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, ProviderSettings, RouterSettings,
};

pub use pricing::{compute_cost_cents, estimate_tokens};
