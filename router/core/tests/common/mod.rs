//! Shared fixtures for router integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use radiant_router::adapters::{AdapterOutput, CallError, ProviderAdapter, ProviderCall};
use radiant_router::fallback::StaticFallbackTable;
use radiant_router::health::{HealthPersistence, ProviderHealth};
use radiant_router::resilience::{CircuitBreakerConfig, ResilienceConfig, RetryConfig};
use radiant_router::telemetry::{UsageRecord, UsageSink};
use radiant_router::{ModelConfig, ModelRegistry, ModelRouterBuilder, ModelRouter, ProviderFamily};

// =============================================================================
// Mock Adapter
// =============================================================================

/// One scripted adapter outcome
#[derive(Clone, Debug)]
pub enum Step {
    Reply {
        content: &'static str,
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
    },
    Fail(CallError),
    Hang(Duration),
}

impl Step {
    pub fn reply(content: &'static str, input_tokens: u64, output_tokens: u64) -> Self {
        Self::Reply {
            content,
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
        }
    }

    pub fn network() -> Self {
        Self::Fail(CallError::Network("connection refused".into()))
    }
}

/// Adapter that plays back a script, repeating the last step forever
pub struct MockAdapter {
    family: ProviderFamily,
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicUsize,
    seen: Mutex<Vec<ProviderCall>>,
}

impl MockAdapter {
    pub fn new(family: ProviderFamily, steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        let script: VecDeque<Step> = steps.into_iter().collect();
        let last = script.back().cloned().unwrap_or_else(Step::network);
        Arc::new(Self {
            family,
            script: Mutex::new(script),
            last: Mutex::new(last),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(family: ProviderFamily, content: &'static str) -> Arc<Self> {
        Self::new(family, [Step::reply(content, 10, 5)])
    }

    pub fn failing(family: ProviderFamily) -> Arc<Self> {
        Self::new(family, [Step::network()])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<ProviderCall> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn family(&self) -> ProviderFamily {
        self.family
    }

    async fn complete(&self, call: &ProviderCall) -> Result<AdapterOutput, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(call.clone());

        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.last.lock().clone());
        match step {
            Step::Reply {
                content,
                input_tokens,
                output_tokens,
            } => Ok(AdapterOutput {
                content: content.to_string(),
                input_tokens,
                output_tokens,
            }),
            Step::Fail(error) => Err(error),
            Step::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(AdapterOutput {
                    content: "too late".into(),
                    input_tokens: None,
                    output_tokens: None,
                })
            }
        }
    }
}

// =============================================================================
// Sinks and Persistence
// =============================================================================

/// Usage sink that keeps every record
#[derive(Default)]
pub struct RecordingUsageSink {
    pub records: Mutex<Vec<UsageRecord>>,
}

#[async_trait]
impl UsageSink for RecordingUsageSink {
    async fn record_model_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Persistence that loads a fixed snapshot and counts writes
#[derive(Default)]
pub struct FixedHealthPersistence {
    pub snapshot: Option<Vec<ProviderHealth>>,
    pub writes: AtomicUsize,
}

impl FixedHealthPersistence {
    pub fn with_snapshot(snapshot: Vec<ProviderHealth>) -> Self {
        Self {
            snapshot: Some(snapshot),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn unreadable() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthPersistence for FixedHealthPersistence {
    async fn persist_success(&self, _health: &ProviderHealth) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn persist_failure(&self, _health: &ProviderHealth, _reason: &str) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("disk full")
    }

    async fn load_persisted_health(&self) -> anyhow::Result<Vec<ProviderHealth>> {
        self.snapshot
            .clone()
            .ok_or_else(|| anyhow::anyhow!("snapshot store unreachable"))
    }
}

// =============================================================================
// Router Fixtures
// =============================================================================

/// `chat` served by OpenAI, with LiteLLM and Bedrock variants
pub fn registry() -> ModelRegistry {
    ModelRegistry::new([
        ModelConfig::new("chat", ProviderFamily::OpenAi, "gpt-4o")
            .with_backend(ProviderFamily::LiteLlm, "litellm/gpt-4o")
            .with_backend(ProviderFamily::Bedrock, "bedrock/gpt-4o")
            .with_capabilities(["chat"])
            .with_pricing(0.003, 0.015),
        ModelConfig::new("local", ProviderFamily::Ollama, "llama3.2").with_capabilities(["chat"]),
    ])
    .unwrap()
}

/// OpenAI falls back to LiteLLM, then Bedrock
pub fn fallback_table() -> Arc<StaticFallbackTable> {
    Arc::new(
        StaticFallbackTable::empty()
            .with_chain(
                ProviderFamily::OpenAi,
                vec![ProviderFamily::LiteLlm, ProviderFamily::Bedrock],
            )
            .unwrap(),
    )
}

/// Immediate retries and a breaker that will not trip during a test
pub fn quick_resilience() -> ResilienceConfig {
    ResilienceConfig {
        retry: RetryConfig::immediate(),
        breaker: CircuitBreakerConfig {
            failure_threshold: 100,
            ..CircuitBreakerConfig::default()
        },
    }
}

pub fn builder() -> ModelRouterBuilder {
    ModelRouter::builder(registry())
        .with_fallback_policy(fallback_table())
        .with_resilience(quick_resilience())
}
