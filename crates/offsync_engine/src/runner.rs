//! Background sync loop.

use crate::coordinator::SyncCoordinator;
use crate::error::SyncResult;
use crate::network::SubscriptionId;
use crate::transport::RemoteEndpoint;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncTrigger {
    Interval,
    NetworkOnline,
}

impl<E: RemoteEndpoint> SyncCoordinator<E> {
    /// Spawns the background sync loop on the current tokio runtime.
    ///
    /// The loop runs a cycle every `sync_interval_ms` and whenever the
    /// network observer reports a transition to online, in both cases only
    /// if the queue is non-empty. Stop it with [`SyncHandle::shutdown`].
    pub fn start(self: &Arc<Self>) -> SyncHandle<E> {
        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
        let subscription = self.network().subscribe(Arc::new(move |online: bool| {
            if online {
                let _ = trigger_tx.send(SyncTrigger::NetworkOnline);
            }
        }));

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            info!("sync loop started");
            loop {
                let interval = engine.config().sync_interval();
                let trigger = tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(interval) => SyncTrigger::Interval,
                    Some(trigger) = trigger_rx.recv() => trigger,
                };
                engine.tick(trigger).await;
            }
            info!("sync loop stopped");
        });

        SyncHandle {
            engine: Arc::clone(self),
            stop: Some(stop_tx),
            task,
            subscription,
        }
    }

    async fn tick(&self, trigger: SyncTrigger) {
        if self.queue_len() == 0 {
            return;
        }
        debug!(?trigger, "sync triggered");
        let summary = self.perform_sync().await;
        if !summary.is_empty() {
            debug!(?trigger, ?summary, "triggered cycle finished");
        }
    }
}

/// Handle to a running background sync loop.
///
/// Dropping the handle aborts the loop without flushing.
pub struct SyncHandle<E: RemoteEndpoint> {
    engine: Arc<SyncCoordinator<E>>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    subscription: SubscriptionId,
}

impl<E: RemoteEndpoint> SyncHandle<E> {
    /// Returns true while the loop task is running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the loop and flushes state to the adapter.
    ///
    /// Waits at most `grace` for an in-flight cycle to finish, then aborts
    /// it. Records caught mid-upload are persisted as `syncing` and return
    /// to `pending` on the next load.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`](crate::SyncError::Persistence) if
    /// the final flush fails.
    pub async fn shutdown(mut self, grace: Duration) -> SyncResult<()> {
        self.engine.network().unsubscribe(self.subscription);
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            warn!(?grace, "sync loop did not stop in time, aborting");
            self.task.abort();
        }

        self.engine.flush()
    }
}

impl<E: RemoteEndpoint> Drop for SyncHandle<E> {
    fn drop(&mut self) {
        self.task.abort();
        self.engine.network().unsubscribe(self.subscription);
    }
}

impl<E: RemoteEndpoint> std::fmt::Debug for SyncHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
