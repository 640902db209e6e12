use crate::storage::{BlobStore, StorageError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A pending deletion of an analysed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupTask {
    pub target_url: String,
    pub fire_at: DateTime<Utc>,
}

impl CleanupTask {
    pub fn after(target_url: impl Into<String>, delay: Duration) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            target_url: target_url.into(),
            fire_at: Utc::now() + delay,
        }
    }

    /// Time left until the task is due, zero if already overdue.
    pub fn remaining(&self) -> Duration {
        (self.fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Error, Debug)]
pub enum CleanupError {
    #[error("{url} is not managed by this service")]
    NotOwned { url: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Cancels a scheduled cleanup. Dropping the handle does not cancel it.
#[derive(Debug, Clone)]
pub struct CleanupHandle {
    token: CancellationToken,
}

impl CleanupHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub trait CleanupScheduler: Send + Sync {
    /// Schedule `task` without waiting for it. The request that scheduled it never observes the result.
    fn schedule(&self, task: CleanupTask) -> CleanupHandle;
}

/// Runs each cleanup on its own tokio timer.
///
/// Timers are children of the shutdown token, so they are dropped (not fired) on graceful shutdown.
pub struct TokioCleanupScheduler {
    store: Arc<dyn BlobStore>,
    shutdown: CancellationToken,
}

impl TokioCleanupScheduler {
    pub fn new(store: Arc<dyn BlobStore>, shutdown: CancellationToken) -> Self {
        Self { store, shutdown }
    }
}

async fn delete_target(store: &dyn BlobStore, url: &str) -> Result<(), CleanupError> {
    let pathname = store
        .pathname_for(url)
        .ok_or_else(|| CleanupError::NotOwned { url: url.to_string() })?;
    store.delete(&pathname).await?;
    Ok(())
}

impl CleanupScheduler for TokioCleanupScheduler {
    fn schedule(&self, task: CleanupTask) -> CleanupHandle {
        let token = self.shutdown.child_token();
        let handle = CleanupHandle::new(token.clone());
        let store = self.store.clone();

        debug!(url = %task.target_url, fire_at = %task.fire_at, "Scheduling cleanup");

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(url = %task.target_url, "Cleanup cancelled");
                    return;
                }
                _ = tokio::time::sleep(task.remaining()) => {}
            }

            let outcome = match delete_target(store.as_ref(), &task.target_url).await {
                Ok(()) => {
                    info!(url = %task.target_url, "Deleted analysed file");
                    "deleted"
                }
                Err(CleanupError::NotOwned { url }) => {
                    debug!(url = %url, "Skipping cleanup of external file");
                    "skipped"
                }
                Err(e) => {
                    warn!(url = %task.target_url, error = %e, "Cleanup failed");
                    "failed"
                }
            };
            metrics::counter!(crate::metrics::CLEANUPS_TOTAL, "outcome" => outcome).increment(1);
        });

        handle
    }
}
