//! In-process sync queue.
//!
//! Sync requests (from the API or an OAuth callback) are enqueued onto an
//! unbounded channel and drained by a single worker task, so at most one
//! sync runs at a time and HTTP handlers never block on provider I/O.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::db::DbPool;

/// One queued sync request.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub account_id: String,
    /// Restrict the run to one connected mailbox when set.
    pub email: Option<String>,
}

/// Cloneable handle for enqueueing sync jobs.
#[derive(Clone)]
pub struct SyncQueue {
    tx: mpsc::UnboundedSender<SyncJob>,
}

impl SyncQueue {
    /// Enqueue a job. Infallible from the caller's perspective; a closed
    /// channel (worker task gone) is logged and the job dropped.
    pub fn enqueue(&self, job: SyncJob) {
        tracing::debug!("Queueing sync for account {}", job.account_id);
        if let Err(e) = self.tx.send(job) {
            tracing::error!("Sync queue is closed, dropping job: {}", e);
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> (Self, mpsc::UnboundedReceiver<SyncJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Spawn the worker task and return the queue handle.
pub fn start_sync_worker(
    pool: DbPool,
    config: Arc<AppConfig>,
    http: reqwest::Client,
) -> SyncQueue {
    let (tx, mut rx) = mpsc::unbounded_channel::<SyncJob>();

    tokio::spawn(async move {
        tracing::info!("Sync worker started");
        while let Some(job) = rx.recv().await {
            let account_id = job.account_id.clone();
            match super::sync_account(&pool, &config, &http, &job.account_id, job.email.as_deref())
                .await
            {
                Ok(reports) => {
                    for report in &reports {
                        tracing::info!(
                            "Sync for {} ({}): processed={} saved={} failed={}",
                            account_id,
                            report.provider,
                            report.processed,
                            report.saved,
                            report.failed
                        );
                    }
                    if reports.is_empty() {
                        tracing::info!("Sync for {}: no syncable connections", account_id);
                    }
                }
                Err(e) => {
                    tracing::error!("Sync for {} failed before fan-out: {}", account_id, e);
                }
            }
        }
        tracing::warn!("Sync worker stopped: queue closed");
    });

    SyncQueue { tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueued_jobs_are_delivered_in_order() {
        let (queue, mut rx) = SyncQueue::for_tests();
        queue.enqueue(SyncJob {
            account_id: "acc1".to_string(),
            email: None,
        });
        queue.enqueue(SyncJob {
            account_id: "acc2".to_string(),
            email: Some("jane@example.com".to_string()),
        });

        assert_eq!(rx.recv().await.unwrap().account_id, "acc1");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.account_id, "acc2");
        assert_eq!(second.email.as_deref(), Some("jane@example.com"));
    }

    #[tokio::test]
    async fn enqueue_after_receiver_dropped_does_not_panic() {
        let (queue, rx) = SyncQueue::for_tests();
        drop(rx);
        queue.enqueue(SyncJob {
            account_id: "acc1".to_string(),
            email: None,
        });
    }
}
