//! Drain triggers: periodic timer, connectivity changes and manual requests.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use repsync_common::{Error, Result};

use crate::engine::{DrainOutcome, SyncEngine};

/// Requests handled by the scheduler task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    /// Drain now.
    Drain,
    /// Connectivity changed; an offline to online transition drains.
    ConnectivityChanged(bool),
    /// Shutdown the scheduler.
    Shutdown,
}

type Envelope = (SyncRequest, Option<oneshot::Sender<DrainOutcome>>);

/// Sends drain triggers to a running [`SyncSchedulerHandle`].
#[derive(Clone)]
pub struct SyncScheduler {
    /// Channel to send sync requests.
    request_tx: mpsc::Sender<Envelope>,
    /// Shutdown signal.
    shutdown: Arc<RwLock<bool>>,
}

impl SyncScheduler {
    /// Create a scheduler polling every `poll_interval`.
    pub fn new(poll_interval: Duration) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);
        let shutdown = Arc::new(RwLock::new(false));

        let scheduler = Self {
            request_tx,
            shutdown: shutdown.clone(),
        };

        let handle = SyncSchedulerHandle {
            poll_interval,
            request_rx,
            shutdown,
        };

        (scheduler, handle)
    }

    /// Request a drain and wait for its outcome.
    ///
    /// # Errors
    /// - [`Error::Config`] if the scheduler task is not running
    pub async fn request_sync(&self) -> Result<DrainOutcome> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((SyncRequest::Drain, Some(response_tx)))
            .await
            .map_err(|_| Error::Config("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Config("Failed to receive sync result".to_string()))
    }

    /// Report a connectivity transition from the host environment.
    pub async fn connectivity_changed(&self, online: bool) -> Result<()> {
        self.request_tx
            .send((SyncRequest::ConnectivityChanged(online), None))
            .await
            .map_err(|_| Error::Config("Scheduler not running".to_string()))
    }

    /// Shutdown the scheduler.
    pub async fn shutdown(&self) {
        let mut is_shutdown = self.shutdown.write().await;
        *is_shutdown = true;

        let _ = self.request_tx.send((SyncRequest::Shutdown, None)).await;
    }
}

/// Handle for the scheduler background task.
pub struct SyncSchedulerHandle {
    poll_interval: Duration,
    request_rx: mpsc::Receiver<Envelope>,
    shutdown: Arc<RwLock<bool>>,
}

impl SyncSchedulerHandle {
    /// Run the scheduler background task until shutdown.
    ///
    /// Each trigger drains on its own task, so a trigger that fires while a
    /// drain is in flight gets [`DrainOutcome::AlreadyRunning`] instead of
    /// waiting for a second pass. Connectivity changes apply immediately.
    /// In-flight drains are awaited on shutdown.
    ///
    /// This should be spawned in a tokio task.
    pub async fn run(mut self, engine: Arc<SyncEngine>) {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut drains = JoinSet::new();

        info!("Sync scheduler started ({:?} poll)", self.poll_interval);

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                request = self.request_rx.recv() => {
                    let Some((request, response_tx)) = request else {
                        debug!("All schedulers dropped");
                        break;
                    };
                    match request {
                        SyncRequest::Shutdown => break,
                        SyncRequest::Drain => {
                            debug!("Manual drain requested");
                            spawn_drain(&mut drains, &engine, response_tx);
                        }
                        SyncRequest::ConnectivityChanged(online) => {
                            let was_online = engine.set_online(online);
                            if online && !was_online {
                                spawn_drain(&mut drains, &engine, response_tx);
                            }
                        }
                    }
                }

                _ = ticker.tick() => {
                    if engine.should_poll() {
                        spawn_drain(&mut drains, &engine, None);
                    }
                }

                Some(joined) = drains.join_next(), if !drains.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Drain task failed: {}", e);
                    }
                }
            }
        }

        while drains.join_next().await.is_some() {}
        info!("Sync scheduler shutting down");
    }
}

fn spawn_drain(
    drains: &mut JoinSet<()>,
    engine: &Arc<SyncEngine>,
    response_tx: Option<oneshot::Sender<DrainOutcome>>,
) {
    let engine = engine.clone();
    drains.spawn(async move {
        let outcome = engine.sync().await;
        if outcome == DrainOutcome::AlreadyRunning {
            debug!("Trigger skipped, drain already running");
        }
        if let Some(tx) = response_tx {
            let _ = tx.send(outcome);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use repsync_common::MutationKind;
    use repsync_storage::SqliteQueue;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    use crate::engine::SyncConfig;
    use crate::remote::RemoteEndpoint;

    #[derive(Default)]
    struct CountingRemote {
        submissions: AtomicUsize,
        gate: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RemoteEndpoint for CountingRemote {
        async fn submit(&self, _kind: MutationKind, _payload: &serde_json::Value) -> Result<()> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            if self.gate.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(())
        }
    }

    fn engine(remote: Arc<CountingRemote>) -> Arc<SyncEngine> {
        let queue = Arc::new(SqliteQueue::in_memory().unwrap());
        Arc::new(SyncEngine::new(queue, remote, SyncConfig::default()))
    }

    #[tokio::test]
    async fn test_manual_request_returns_report() {
        let remote = Arc::new(CountingRemote::default());
        let engine = engine(remote.clone());
        engine
            .enqueue(MutationKind::SetWrite, json!({"reps": 3}))
            .await
            .unwrap();

        let (scheduler, handle) = SyncScheduler::new(Duration::from_secs(3600));
        let task = tokio::spawn(handle.run(engine.clone()));

        let outcome = scheduler.request_sync().await.unwrap();
        assert_eq!(outcome.report().map(|r| r.succeeded), Some(1));
        assert_eq!(remote.submissions.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_blocks_polling_until_reconnect() {
        let remote = Arc::new(CountingRemote::default());
        let engine = engine(remote.clone());
        engine.set_online(false);
        engine
            .enqueue(MutationKind::WeightLogWrite, json!({"weightKg": 79.0}))
            .await
            .unwrap();

        let (scheduler, handle) = SyncScheduler::new(Duration::from_secs(2));
        let task = tokio::spawn(handle.run(engine.clone()));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(remote.submissions.load(Ordering::SeqCst), 0);

        scheduler.connectivity_changed(true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(remote.submissions.load(Ordering::SeqCst), 1);
        assert_eq!(engine.status().pending_count, 0);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_tick_drains_new_writes() {
        let remote = Arc::new(CountingRemote::default());
        let engine = engine(remote.clone());

        let (scheduler, handle) = SyncScheduler::new(Duration::from_secs(2));
        let task = tokio::spawn(handle.run(engine.clone()));

        engine
            .enqueue(MutationKind::SessionAction, json!({"action": "complete"}))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(remote.submissions.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_after_shutdown_fails() {
        let (scheduler, handle) = SyncScheduler::new(Duration::from_secs(3600));
        let task = tokio::spawn(handle.run(engine(Arc::new(CountingRemote::default()))));

        scheduler.shutdown().await;
        task.await.unwrap();

        assert!(scheduler.request_sync().await.is_err());
    }

    #[tokio::test]
    async fn test_request_during_drain_is_not_queued() {
        let remote = Arc::new(CountingRemote::default());
        let engine = engine(remote.clone());
        engine
            .enqueue(MutationKind::SetWrite, json!({"reps": 4}))
            .await
            .unwrap();
        remote.gate.store(true, Ordering::SeqCst);

        let (scheduler, handle) = SyncScheduler::new(Duration::from_secs(3600));
        let task = tokio::spawn(handle.run(engine.clone()));

        let first_scheduler = scheduler.clone();
        let first = tokio::spawn(async move { first_scheduler.request_sync().await });
        remote.entered.notified().await;

        let second = scheduler.request_sync().await.unwrap();
        assert_eq!(second, DrainOutcome::AlreadyRunning);

        // Connectivity is recorded while the drain is still in flight.
        scheduler.connectivity_changed(false).await.unwrap();
        while engine.is_online() {
            tokio::task::yield_now().await;
        }

        remote.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.report().map(|r| r.succeeded), Some(1));
        assert_eq!(remote.submissions.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await;
        task.await.unwrap();
    }
}
