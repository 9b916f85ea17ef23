//! Usage telemetry
//!
//! One [`UsageRecord`] is emitted per dispatch attempt, success or failure.
//! Records go through the housekeeping queue, so a slow or broken sink never
//! shows up in request latency or results.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::registry::ProviderFamily;

/// Usage of one dispatch attempt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Invocation the attempt belongs to
    pub request_id: Uuid,
    /// Logical model requested
    pub model_id: String,
    /// Family attempted
    pub provider: ProviderFamily,
    /// Backend model id sent upstream, when resolved
    pub backend_model: Option<String>,
    /// Whether the attempt produced a response
    pub success: bool,
    /// Wall time of the attempt
    pub latency_ms: u64,
    /// Prompt tokens (reported or estimated)
    pub input_tokens: u64,
    /// Completion tokens (reported or estimated)
    pub output_tokens: u64,
    /// Cost in whole cents, rounded up
    pub cost_cents: u64,
    /// Failure reason for unsuccessful attempts
    pub error: Option<String>,
    /// When the record was produced
    pub recorded_at: DateTime<Utc>,
}

/// Destination for usage records
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Store one record
    async fn record_model_usage(&self, record: &UsageRecord) -> anyhow::Result<()>;
}

/// Sink that discards records
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record_model_usage(&self, _record: &UsageRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sink that emits each record as a structured `tracing` event
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record_model_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        tracing::info!(
            target: "radiant::usage",
            request_id = %record.request_id,
            model_id = %record.model_id,
            provider = %record.provider,
            backend_model = record.backend_model.as_deref().unwrap_or("-"),
            success = record.success,
            latency_ms = record.latency_ms,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cost_cents = record.cost_cents,
            error = record.error.as_deref().unwrap_or(""),
            "model usage"
        );
        Ok(())
    }
}

/// Sink that appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonLinesUsageSink {
    path: PathBuf,
    // Serializes appends so lines never interleave.
    write_lock: Mutex<()>,
}

impl JsonLinesUsageSink {
    /// Append to `path`, creating it (and its parents) on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Log file location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UsageSink for JsonLinesUsageSink {
    async fn record_model_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
