//! Provider Health Tracking
//!
//! Authoritative in-process view of per-family health, used to prune
//! fallback chains and to answer status queries.
//!
//! # Rules
//!
//! - A family turns unhealthy once it accumulates
//!   [`UNHEALTHY_THRESHOLD`] consecutive failures.
//! - Any success makes it healthy again and clears the streak.
//! - Every update is persisted through the [`Housekeeper`]; the caller never
//!   waits for the write and never sees its errors.
//!
//! # Thread Safety
//!
//! Entries live in a `DashMap` keyed by family, so each update holds only
//! that family's shard lock. Snapshots are cloned out before anything is
//! handed to the background queue.

mod persistence;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::background::Housekeeper;
use crate::registry::ProviderFamily;

pub use persistence::{HealthPersistence, JsonFileHealthPersistence, NoopHealthPersistence};

/// Consecutive failures after which a family is marked unhealthy
pub const UNHEALTHY_THRESHOLD: u32 = 3;

// ============================================================================
// Provider Health
// ============================================================================

/// Health of one provider family
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Family this entry describes
    pub provider: ProviderFamily,

    /// False once the failure streak reaches the threshold
    pub healthy: bool,

    /// Current failure streak
    pub consecutive_failures: u32,

    /// Latency of the last successful call
    pub last_latency_ms: Option<u64>,

    /// When the family was last attempted
    pub last_checked: Option<DateTime<Utc>>,

    /// Failures since the process (or persisted record) started counting
    pub lifetime_errors: u64,

    /// Reason attached to the most recent failure
    pub last_error: Option<String>,
}

impl ProviderHealth {
    /// Fresh, healthy entry
    #[must_use]
    pub fn new(provider: ProviderFamily) -> Self {
        Self {
            provider,
            healthy: true,
            consecutive_failures: 0,
            last_latency_ms: None,
            last_checked: None,
            lifetime_errors: 0,
            last_error: None,
        }
    }

    /// Whether this family may be chosen as a fallback candidate
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.healthy && self.consecutive_failures < UNHEALTHY_THRESHOLD
    }
}

// ============================================================================
// Health Store
// ============================================================================

/// Per-family health with best-effort persistence
pub struct ProviderHealthStore {
    entries: DashMap<ProviderFamily, ProviderHealth>,
    persistence: Arc<dyn HealthPersistence>,
    housekeeper: Housekeeper,
}

impl ProviderHealthStore {
    /// Store with every family healthy
    pub fn new(persistence: Arc<dyn HealthPersistence>, housekeeper: Housekeeper) -> Self {
        let entries = DashMap::new();
        for family in ProviderFamily::ALL {
            entries.insert(family, ProviderHealth::new(family));
        }
        Self {
            entries,
            persistence,
            housekeeper,
        }
    }

    /// Record a successful call
    pub fn record_success(&self, provider: ProviderFamily, latency_ms: u64) -> ProviderHealth {
        let snapshot = {
            let mut entry = self
                .entries
                .entry(provider)
                .or_insert_with(|| ProviderHealth::new(provider));
            let recovered = !entry.healthy;

            entry.healthy = true;
            entry.consecutive_failures = 0;
            entry.last_latency_ms = Some(latency_ms);
            entry.last_checked = Some(Utc::now());

            if recovered {
                tracing::info!(provider = %provider, latency_ms, "Provider recovered");
            }
            entry.clone()
        };

        let persistence = Arc::clone(&self.persistence);
        let record = snapshot.clone();
        self.housekeeper
            .submit("persist_provider_success", async move {
                persistence.persist_success(&record).await
            });

        snapshot
    }

    /// Record a failed call
    pub fn record_failure(&self, provider: ProviderFamily, reason: &str) -> ProviderHealth {
        let snapshot = {
            let mut entry = self
                .entries
                .entry(provider)
                .or_insert_with(|| ProviderHealth::new(provider));

            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            entry.lifetime_errors = entry.lifetime_errors.saturating_add(1);
            entry.last_checked = Some(Utc::now());
            entry.last_error = Some(reason.to_string());

            if entry.healthy && entry.consecutive_failures >= UNHEALTHY_THRESHOLD {
                entry.healthy = false;
                tracing::warn!(
                    provider = %provider,
                    consecutive_failures = entry.consecutive_failures,
                    reason,
                    "Provider marked unhealthy"
                );
            }
            entry.clone()
        };

        let persistence = Arc::clone(&self.persistence);
        let record = snapshot.clone();
        let reason = reason.to_string();
        self.housekeeper
            .submit("persist_provider_failure", async move {
                persistence.persist_failure(&record, &reason).await
            });

        snapshot
    }

    /// Clear a family's failure streak (operator action)
    pub fn reset(&self, provider: ProviderFamily) -> ProviderHealth {
        let snapshot = {
            let mut entry = self
                .entries
                .entry(provider)
                .or_insert_with(|| ProviderHealth::new(provider));
            entry.healthy = true;
            entry.consecutive_failures = 0;
            entry.last_error = None;
            entry.clone()
        };
        tracing::info!(provider = %provider, "Provider health reset");

        // The stored record is the whole snapshot, so the success path fits.
        let persistence = Arc::clone(&self.persistence);
        let record = snapshot.clone();
        self.housekeeper.submit("persist_provider_reset", async move {
            persistence.persist_success(&record).await
        });

        snapshot
    }

    /// Warm the store from persistence
    ///
    /// Returns how many records were applied. Any failure leaves every family
    /// at the healthy default; startup is never blocked by bad state.
    pub async fn load_persisted_health(&self) -> usize {
        let records = match self.persistence.load_persisted_health().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load persisted provider health, assuming healthy");
                self.reset_all();
                return 0;
            }
        };

        let mut restored: HashMap<ProviderFamily, ProviderHealth> = ProviderFamily::ALL
            .into_iter()
            .map(|family| (family, ProviderHealth::new(family)))
            .collect();
        let mut applied = 0;
        for mut record in records {
            record.healthy = record.consecutive_failures < UNHEALTHY_THRESHOLD;
            restored.insert(record.provider, record);
            applied += 1;
        }
        for (family, health) in restored {
            self.entries.insert(family, health);
        }

        tracing::info!(records = applied, "Loaded persisted provider health");
        applied
    }

    /// Whether the family is currently healthy
    #[must_use]
    pub fn is_healthy(&self, provider: ProviderFamily) -> bool {
        self.entries.get(&provider).map_or(true, |e| e.healthy)
    }

    /// Whether the family may be chosen as a fallback
    #[must_use]
    pub fn is_eligible(&self, provider: ProviderFamily) -> bool {
        self.entries
            .get(&provider)
            .map_or(true, |e| e.is_eligible())
    }

    /// Current failure streak
    #[must_use]
    pub fn consecutive_failures(&self, provider: ProviderFamily) -> u32 {
        self.entries
            .get(&provider)
            .map_or(0, |e| e.consecutive_failures)
    }

    /// Snapshot of one family
    #[must_use]
    pub fn get(&self, provider: ProviderFamily) -> ProviderHealth {
        self.entries
            .get(&provider)
            .map_or_else(|| ProviderHealth::new(provider), |e| e.clone())
    }

    /// Snapshot of every family, in routing-table order
    #[must_use]
    pub fn all(&self) -> Vec<ProviderHealth> {
        ProviderFamily::ALL
            .into_iter()
            .map(|family| self.get(family))
            .collect()
    }

    fn reset_all(&self) {
        for family in ProviderFamily::ALL {
            self.entries.insert(family, ProviderHealth::new(family));
        }
    }
}

impl std::fmt::Debug for ProviderHealthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHealthStore")
            .field("providers", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingPersistence {
        writes: Mutex<Vec<(ProviderFamily, u32)>>,
        stored: Mutex<Vec<ProviderHealth>>,
        fail_load: bool,
    }

    #[async_trait]
    impl HealthPersistence for RecordingPersistence {
        async fn persist_success(&self, health: &ProviderHealth) -> anyhow::Result<()> {
            self.writes
                .lock()
                .push((health.provider, health.consecutive_failures));
            Ok(())
        }

        async fn persist_failure(&self, health: &ProviderHealth, _reason: &str) -> anyhow::Result<()> {
            self.writes
                .lock()
                .push((health.provider, health.consecutive_failures));
            anyhow::bail!("disk full")
        }

        async fn load_persisted_health(&self) -> anyhow::Result<Vec<ProviderHealth>> {
            if self.fail_load {
                anyhow::bail!("store unreachable");
            }
            Ok(self.stored.lock().clone())
        }
    }

    fn store(persistence: Arc<RecordingPersistence>) -> (ProviderHealthStore, Housekeeper) {
        let keeper = Housekeeper::spawn(64);
        (ProviderHealthStore::new(persistence, keeper.clone()), keeper)
    }

    #[tokio::test]
    async fn test_three_failures_mark_unhealthy() {
        let (health, _) = store(Arc::default());
        let family = ProviderFamily::OpenAi;

        health.record_failure(family, "503");
        health.record_failure(family, "503");
        assert!(health.is_healthy(family));
        assert!(health.is_eligible(family));

        let snapshot = health.record_failure(family, "503");
        assert!(!snapshot.healthy);
        assert_eq!(snapshot.consecutive_failures, 3);
        assert_eq!(snapshot.lifetime_errors, 3);
        assert!(!health.is_eligible(family));
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let (health, _) = store(Arc::default());
        let family = ProviderFamily::Groq;
        for _ in 0..5 {
            health.record_failure(family, "timeout");
        }

        let snapshot = health.record_success(family, 120);
        assert!(snapshot.healthy);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.lifetime_errors, 5);
        assert_eq!(snapshot.last_latency_ms, Some(120));
    }

    #[tokio::test]
    async fn test_persistence_runs_in_background_and_errors_are_swallowed() {
        let persistence = Arc::new(RecordingPersistence::default());
        let (health, keeper) = store(Arc::clone(&persistence));

        health.record_failure(ProviderFamily::Bedrock, "boom");
        health.record_success(ProviderFamily::Bedrock, 40);
        keeper.flush().await;

        let writes = persistence.writes.lock().clone();
        assert_eq!(
            writes,
            vec![(ProviderFamily::Bedrock, 1), (ProviderFamily::Bedrock, 0)]
        );
        assert_eq!(keeper.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_failed_load_defaults_to_healthy() {
        let persistence = Arc::new(RecordingPersistence {
            fail_load: true,
            ..Default::default()
        });
        let (health, _) = store(persistence);
        for _ in 0..3 {
            health.record_failure(ProviderFamily::Anthropic, "auth");
        }

        assert_eq!(health.load_persisted_health().await, 0);
        assert!(health.all().iter().all(|h| h.healthy && h.consecutive_failures == 0));
    }

    #[tokio::test]
    async fn test_load_restores_records() {
        let mut stale = ProviderHealth::new(ProviderFamily::Perplexity);
        stale.consecutive_failures = 4;
        stale.lifetime_errors = 9;
        let persistence = Arc::new(RecordingPersistence::default());
        persistence.stored.lock().push(stale);

        let (health, _) = store(Arc::clone(&persistence));
        assert_eq!(health.load_persisted_health().await, 1);

        let restored = health.get(ProviderFamily::Perplexity);
        assert!(!restored.healthy);
        assert_eq!(restored.lifetime_errors, 9);
        assert!(health.is_healthy(ProviderFamily::OpenAi));
    }

    #[tokio::test]
    async fn test_reset_clears_streak() {
        let (health, _) = store(Arc::default());
        for _ in 0..3 {
            health.record_failure(ProviderFamily::OpenRouter, "502");
        }
        let snapshot = health.reset(ProviderFamily::OpenRouter);
        assert!(snapshot.healthy);
        assert!(health.is_eligible(ProviderFamily::OpenRouter));
        assert_eq!(snapshot.lifetime_errors, 3);
    }

    #[tokio::test]
    async fn test_status_lists_every_family() {
        let (health, _) = store(Arc::default());
        let all = health.all();
        assert_eq!(all.len(), ProviderFamily::ALL.len());
        assert_eq!(all[0].provider, ProviderFamily::Bedrock);
    }
}
