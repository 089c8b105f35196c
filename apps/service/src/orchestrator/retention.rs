//! Automatic retention of probe evidence.
//!
//! Hits and failures older than the retention window are deleted by a
//! background task that runs every hour until shutdown.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::{Store, StoreError};

const CLEANUP_PERIOD: Duration = Duration::from_secs(3600);

/// How long evidence is kept
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days to keep hits and failures
    pub days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { days: 90 }
    }
}

impl RetentionPolicy {
    /// Evidence created before this instant is expired
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - ChronoDuration::days(self.days.max(0))
    }
}

/// Cleanup manager for expired evidence
pub struct RetentionCleanup {
    store: Arc<dyn Store>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(store: Arc<dyn Store>, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    /// Delete expired hits and failures, returning how many rows went
    pub async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let cutoff = self.policy.cutoff(Utc::now());
        debug!("Cleaning up evidence older than {} days (cutoff: {})", self.policy.days, cutoff);

        let removed = self.store.prune_before(cutoff).await?;
        info!("Retention cleanup completed: {} rows deleted", removed);
        Ok(removed)
    }

    /// Start background cleanup task (runs every hour)
    pub fn start_periodic_cleanup(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_PERIOD);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if let Err(e) = self.cleanup_expired().await {
                    warn!("Periodic retention cleanup failed: {}", e);
                }
            }
        })
    }
}
