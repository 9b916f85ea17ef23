//! Health persistence backends

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::ProviderHealth;
use crate::registry::ProviderFamily;

/// Durable store for provider health
///
/// Writes are issued from the housekeeping queue; implementations may be
/// slow or fail without affecting requests.
#[async_trait]
pub trait HealthPersistence: Send + Sync {
    /// Store the state after a success
    async fn persist_success(&self, health: &ProviderHealth) -> anyhow::Result<()>;

    /// Store the state after a failure
    async fn persist_failure(&self, health: &ProviderHealth, reason: &str) -> anyhow::Result<()>;

    /// Read back everything previously stored
    async fn load_persisted_health(&self) -> anyhow::Result<Vec<ProviderHealth>>;
}

/// Persistence that stores nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHealthPersistence;

#[async_trait]
impl HealthPersistence for NoopHealthPersistence {
    async fn persist_success(&self, _health: &ProviderHealth) -> anyhow::Result<()> {
        Ok(())
    }

    async fn persist_failure(&self, _health: &ProviderHealth, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn load_persisted_health(&self) -> anyhow::Result<Vec<ProviderHealth>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// JSON File
// ============================================================================

const FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct HealthFile {
    version: u32,
    saved_at: DateTime<Utc>,
    providers: Vec<ProviderHealth>,
}

/// Whole-table JSON snapshot on disk
///
/// Every write replaces the file through a temporary sibling and a rename,
/// so readers never observe a half-written table.
#[derive(Debug)]
pub struct JsonFileHealthPersistence {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<ProviderFamily, ProviderHealth>>>,
}

impl JsonFileHealthPersistence {
    /// Persist to `path`; parent directories are created on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// File location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> anyhow::Result<Vec<ProviderHealth>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading {}", self.path.display()));
            }
        };
        let file: HealthFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        if file.version != FILE_VERSION {
            anyhow::bail!(
                "unsupported health file version {} in {}",
                file.version,
                self.path.display()
            );
        }
        Ok(file.providers)
    }

    async fn upsert(&self, health: &ProviderHealth) -> anyhow::Result<()> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            // A corrupt file is replaced rather than blocking future writes.
            let existing = self.read_file().await.unwrap_or_default();
            *cache = Some(existing.into_iter().map(|h| (h.provider, h)).collect());
        }
        let table = cache.get_or_insert_with(BTreeMap::new);
        table.insert(health.provider, health.clone());

        let file = HealthFile {
            version: FILE_VERSION,
            saved_at: Utc::now(),
            providers: table.values().cloned().collect(),
        };
        let body = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl HealthPersistence for JsonFileHealthPersistence {
    async fn persist_success(&self, health: &ProviderHealth) -> anyhow::Result<()> {
        self.upsert(health).await
    }

    async fn persist_failure(&self, health: &ProviderHealth, reason: &str) -> anyhow::Result<()> {
        tracing::trace!(provider = %health.provider, reason, "Persisting provider failure");
        self.upsert(health).await
    }

    async fn load_persisted_health(&self) -> anyhow::Result<Vec<ProviderHealth>> {
        let records = self.read_file().await?;
        let mut cache = self.cache.lock().await;
        *cache = Some(records.iter().map(|h| (h.provider, h.clone())).collect());
        Ok(records)
    }
}
