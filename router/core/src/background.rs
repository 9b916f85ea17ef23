//! Fire-and-forget housekeeping
//!
//! Telemetry writes and health persistence must never block or fail a
//! request. Callers hand jobs to a [`Housekeeper`], which queues them on a
//! bounded channel drained by a single spawned worker. Submission never
//! awaits: when the queue is full the job is dropped and counted. Job errors
//! and panics are logged at debug level and go no further.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

enum Message {
    Run {
        label: &'static str,
        job: BoxFuture<'static, anyhow::Result<()>>,
    },
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Counts of housekeeping outcomes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct HousekeepingStats {
    /// Jobs that finished successfully
    pub completed: u64,
    /// Jobs that returned an error or panicked
    pub failed: u64,
    /// Jobs discarded because the queue was full or closed
    pub dropped: u64,
}

/// Handle to the background housekeeping worker
///
/// Cloning is cheap; all clones feed the same worker. The worker stops once
/// every handle has been dropped and the queue is drained.
#[derive(Clone, Debug)]
pub struct Housekeeper {
    tx: mpsc::Sender<Message>,
    counters: Arc<Counters>,
}

impl Housekeeper {
    /// Default queue depth
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Start the worker on the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        tokio::spawn(run_worker(rx, Arc::clone(&counters)));
        Self { tx, counters }
    }

    /// Queue a job without waiting
    pub fn submit<F>(&self, label: &'static str, job: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let message = Message::Run {
            label,
            job: job.boxed(),
        };
        if let Err(e) = self.tx.try_send(message) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "worker stopped",
            };
            tracing::debug!(job = label, reason, "Dropped housekeeping job");
        }
    }

    /// Wait until every job queued before this call has run
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Outcome counters
    #[must_use]
    pub fn stats(&self) -> HousekeepingStats {
        HousekeepingStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(mut rx: mpsc::Receiver<Message>, counters: Arc<Counters>) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Run { label, job } => match AssertUnwindSafe(job).catch_unwind().await {
                Ok(Ok(())) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(job = label, error = %e, "Housekeeping job failed");
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(job = label, "Housekeeping job panicked");
                }
            },
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Housekeeping worker stopped");
}
