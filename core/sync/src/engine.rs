//! Core sync engine that replays queued mutations against the remote API.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use repsync_common::{Error, Mutation, MutationId, MutationKind, Result};
use repsync_storage::{MutationQueue, PendingMutation};

use crate::clock::{Clock, SystemClock};
use crate::remote::RemoteEndpoint;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::status::{StatusPublisher, Subscription, SyncStatus};

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval of the periodic drain trigger.
    pub poll_interval: Duration,
    /// Backoff and attempt cap.
    pub retry: RetryConfig,
    /// Delete synced records at the end of each drain.
    pub purge_synced: bool,
    /// Let the periodic trigger drain while connectivity is down.
    pub sync_while_offline: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            retry: RetryConfig::default(),
            purge_synced: true,
            sync_while_offline: false,
        }
    }
}

/// What one drain cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Submissions attempted.
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Skipped because their backoff has not elapsed.
    pub deferred: usize,
    /// Skipped because their attempts are exhausted.
    pub abandoned: usize,
    /// Synced records removed by cleanup.
    pub purged: usize,
    pub duration: Duration,
}

/// Result of a `sync()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// This call ran a drain cycle.
    Completed(SyncReport),
    /// Another drain was in flight; this call did nothing.
    AlreadyRunning,
}

impl DrainOutcome {
    /// The report, if this call drained.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            DrainOutcome::Completed(report) => Some(report),
            DrainOutcome::AlreadyRunning => None,
        }
    }
}

/// Clears the in-flight flag when a drain ends, even if it is cancelled.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Main sync engine coordinating the queue, the retry policy and the
/// remote endpoint.
pub struct SyncEngine {
    queue: Arc<dyn MutationQueue>,
    remote: Arc<dyn RemoteEndpoint>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    publisher: StatusPublisher,
    // Held across count and publish so a stale count never lands last.
    status_lock: Mutex<()>,
    draining: AtomicBool,
    online: AtomicBool,
    config: SyncConfig,
}

impl SyncEngine {
    /// Create a new sync engine reading time from the system clock.
    pub fn new(
        queue: Arc<dyn MutationQueue>,
        remote: Arc<dyn RemoteEndpoint>,
        config: SyncConfig,
    ) -> Self {
        Self::with_clock(queue, remote, config, Arc::new(SystemClock))
    }

    /// Create a new sync engine with an explicit clock.
    pub fn with_clock(
        queue: Arc<dyn MutationQueue>,
        remote: Arc<dyn RemoteEndpoint>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            remote,
            policy: RetryPolicy::new(config.retry.clone()),
            clock,
            publisher: StatusPublisher::new(),
            status_lock: Mutex::new(()),
            draining: AtomicBool::new(false),
            online: AtomicBool::new(true),
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Record a write. Never contacts the network.
    pub async fn enqueue(&self, kind: MutationKind, payload: serde_json::Value) -> Result<MutationId> {
        let id = self.queue.enqueue(kind, payload, self.clock.now()).await?;
        debug!("Enqueued {} #{}", kind, id);
        self.refresh_status().await;
        Ok(id)
    }

    /// Validate and record a typed write.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] if the payload fails validation
    pub async fn enqueue_mutation(&self, mutation: Mutation) -> Result<MutationId> {
        mutation.validate()?;
        let (kind, payload) = mutation.into_parts()?;
        self.enqueue(kind, payload).await
    }

    /// Run one drain cycle over every kind.
    ///
    /// Returns [`DrainOutcome::AlreadyRunning`] without touching the queue
    /// if another drain is in flight. Per-record failures are recorded in
    /// the queue, never returned.
    pub async fn sync(&self) -> DrainOutcome {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already in progress, skipping");
            return DrainOutcome::AlreadyRunning;
        }

        let report = {
            let _guard = DrainGuard(&self.draining);
            self.refresh_status().await;
            self.drain().await
        };

        self.refresh_status().await;
        DrainOutcome::Completed(report)
    }

    async fn drain(&self) -> SyncReport {
        let start = Instant::now();
        let mut report = SyncReport::default();

        debug!("Starting drain");
        for kind in MutationKind::ALL {
            self.drain_kind(kind, &mut report).await;
        }

        if self.config.purge_synced {
            match self.cleanup().await {
                Ok(purged) => report.purged = purged,
                Err(e) => warn!("Failed to purge synced records: {}", e),
            }
        }

        report.duration = start.elapsed();
        if report.submitted > 0 || report.abandoned > 0 {
            info!(
                "Drain completed in {:?}: {} submitted, {} succeeded, {} failed, {} deferred, {} abandoned",
                report.duration,
                report.submitted,
                report.succeeded,
                report.failed,
                report.deferred,
                report.abandoned
            );
        }
        report
    }

    async fn drain_kind(&self, kind: MutationKind, report: &mut SyncReport) {
        let pending = match self.queue.list_pending(kind).await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Failed to list pending {}: {}", kind, e);
                return;
            }
        };

        for record in pending {
            if self.policy.is_exhausted(record.retry_count) {
                report.abandoned += 1;
                continue;
            }
            if !self
                .policy
                .eligible(record.retry_count, record.last_attempt_at, self.clock.now())
            {
                report.deferred += 1;
                continue;
            }

            report.submitted += 1;
            match self.remote.submit(kind, &record.payload).await {
                Ok(()) => match self.queue.mark_synced(kind, record.id).await {
                    Ok(()) => {
                        report.succeeded += 1;
                        debug!("Synced {} #{}", kind, record.id);
                    }
                    Err(e) => error!("Failed to mark {} #{} synced: {}", kind, record.id, e),
                },
                Err(e) => {
                    report.failed += 1;
                    self.record_failure(kind, &record, &e).await;
                }
            }
        }
    }

    async fn record_failure(&self, kind: MutationKind, record: &PendingMutation, err: &Error) {
        let message = describe_failure(err);
        debug!("Submitting {} #{} failed: {}", kind, record.id, message);

        if let Err(e) = self
            .queue
            .mark_failed(kind, record.id, &message, self.clock.now())
            .await
        {
            error!("Failed to record failure of {} #{}: {}", kind, record.id, e);
            return;
        }

        let attempts = record.retry_count.saturating_add(1);
        if self.policy.is_exhausted(attempts) {
            warn!(
                "Giving up on {} #{} after {} attempts: {}",
                kind, record.id, attempts, message
            );
        }
    }

    /// Recompute status from the queue and publish it.
    pub async fn refresh_status(&self) -> SyncStatus {
        let _serialized = self.status_lock.lock().await;
        let previous = self.publisher.current();
        let pending_count = match self.queue.count_all_pending().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count pending records: {}", e);
                previous.pending_count
            }
        };

        let status = SyncStatus {
            is_syncing: self.draining.load(Ordering::Acquire),
            pending_count,
        };
        self.publisher.publish(status);
        status
    }

    /// Current status, recomputed from the queue.
    pub async fn get_status(&self) -> SyncStatus {
        self.refresh_status().await
    }

    /// Last published status, without touching the queue.
    pub fn status(&self) -> SyncStatus {
        self.publisher.current()
    }

    /// Subscribe to status changes. The current status is delivered
    /// immediately.
    pub fn on_status_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(SyncStatus) + Send + Sync + 'static,
    {
        self.publisher.subscribe(listener)
    }

    /// Remove synced records of every kind.
    pub async fn cleanup(&self) -> Result<usize> {
        let mut purged = 0;
        for kind in MutationKind::ALL {
            purged += self.queue.purge_synced(kind).await?;
        }
        if purged > 0 {
            debug!("Purged {} synced records", purged);
        }
        Ok(purged)
    }

    /// Records of a kind that will not be retried again.
    pub async fn abandoned(&self, kind: MutationKind) -> Result<Vec<PendingMutation>> {
        self.queue
            .list_abandoned(kind, self.policy.config().max_retries)
            .await
    }

    /// Record connectivity. Returns the previous state.
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::AcqRel);
        if previous != online {
            info!("Connectivity {}", if online { "restored" } else { "lost" });
        }
        previous
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Whether the periodic trigger should drain right now.
    pub fn should_poll(&self) -> bool {
        self.is_online() || self.config.sync_while_offline
    }
}

fn describe_failure(err: &Error) -> String {
    let class = if err.is_transient() {
        "transient"
    } else {
        "permanent"
    };
    format!("[{}] {}", class, err)
}
