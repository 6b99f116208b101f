//! Outbound queued-sender state machine.
//!
//! A sender accepts payloads for delivery and transmits them from a
//! background drain loop, retrying or quarantining each item independently
//! of the caller. One control, `sending_paused`, gates both intake and the
//! loop; it starts paused until `setup` completes.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{AcceptError, QueueError, TransmitError};
use crate::registry::{Direction, QueueControl};
use crate::stats::{SizeProbe, StatsRegistry};

use super::pending::{ErrorEntry, PendingEntry, PendingQueue, QueueSizes};

/// Transmit callback invoked by the drain loop, one item at a time.
///
/// Only `TransmitError::Busy` and `TransmitError::RetriesExhausted` are
/// retryable; any other failure quarantines the item immediately with the
/// error's description as the reason.
#[async_trait]
pub trait Transmit<T>: Send + Sync {
    async fn transmit(&self, id: Uuid, payload: T) -> Result<(), TransmitError>;
}

pub struct QueuedSender<T> {
    inner: Arc<SenderInner<T>>,
}

impl<T> Clone for QueuedSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SenderInner<T> {
    route_key: String,
    config: QueueConfig,
    callback: Arc<dyn Transmit<T>>,
    stats: Arc<StatsRegistry>,
    queue: Mutex<Option<PendingQueue<T>>>,
    sending_paused: AtomicBool,
    drain_active: AtomicBool,
    shutdown_requested: AtomicBool,
    done: watch::Sender<bool>,
}

impl<T> QueuedSender<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Create a sender for one route key. Sending starts paused; call
    /// `setup` before `enqueue`.
    pub fn new(
        route_key: impl Into<String>,
        config: QueueConfig,
        callback: Arc<dyn Transmit<T>>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(SenderInner {
                route_key: route_key.into(),
                config,
                callback,
                stats,
                queue: Mutex::new(None),
                sending_paused: AtomicBool::new(true),
                drain_active: AtomicBool::new(false),
                shutdown_requested: AtomicBool::new(false),
                done: watch::channel(false).0,
            }),
        }
    }

    pub fn route_key(&self) -> &str {
        &self.inner.route_key
    }

    /// Open the queue files, register the size probe, unpause sending and
    /// kick the drain loop. Must run once before `enqueue`.
    pub async fn setup(
        &self,
        dir: &Path,
        app_name: &str,
        instance_id: &str,
    ) -> Result<(), QueueError> {
        let base = format!(
            "{}-{}-{}-{}",
            app_name,
            instance_id,
            self.inner.route_key,
            Direction::Outbound.as_str()
        );
        let queue = PendingQueue::open(
            &dir.join(format!("{base}-pending")),
            &dir.join(format!("{base}-error")),
            &self.inner.config,
        )?;
        *self.inner.queue.lock().await = Some(queue);

        self.inner
            .stats
            .register(&base, Arc::clone(&self.inner) as Arc<dyn SizeProbe>);

        self.inner.sending_paused.store(false, Ordering::Release);
        info!(route = %self.inner.route_key, "queued sender ready");
        self.inner.trigger_drain();
        Ok(())
    }

    /// Accept a payload for delivery, generating an id when the caller does
    /// not supply one. Fails with `Busy` while sending is paused. The push
    /// is fire-and-forget; once this returns the caller gets no further
    /// signal about delivery.
    pub fn enqueue(&self, payload: T, id: Option<Uuid>) -> Result<Uuid, AcceptError> {
        if self.inner.sending_paused.load(Ordering::Acquire)
            || self.inner.shutdown_requested.load(Ordering::Acquire)
        {
            return Err(AcceptError::Busy);
        }
        let id = id.unwrap_or_else(Uuid::new_v4);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            {
                let mut guard = inner.queue.lock().await;
                match guard.as_mut() {
                    Some(queue) => {
                        if let Err(e) = queue.push_pending(id, payload, 0) {
                            error!(id = %id, error = %e, "failed to enqueue outbound payload");
                        }
                    }
                    None if inner.shutdown_requested.load(Ordering::Acquire) => {
                        warn!(id = %id, "payload raced shutdown finalization, dropped")
                    }
                    None => warn!(id = %id, "payload enqueued before setup completed, dropped"),
                }
            }
            inner.trigger_drain();
        });
        Ok(id)
    }

    pub fn pause_sending(&self) {
        self.inner.sending_paused.store(true, Ordering::Release);
    }

    /// Unpause sending and re-kick the drain loop in case items piled up.
    pub fn unpause_sending(&self) {
        self.inner.sending_paused.store(false, Ordering::Release);
        self.inner.trigger_drain();
    }

    pub async fn sizes(&self) -> Result<QueueSizes, QueueError> {
        self.inner.with_queue(|q| q.sizes()).await
    }

    pub async fn pending_size(&self) -> Result<usize, QueueError> {
        Ok(self.sizes().await?.pending)
    }

    pub async fn error_size(&self) -> Result<usize, QueueError> {
        Ok(self.sizes().await?.error)
    }

    pub async fn clear_error(&self) -> Result<(), QueueError> {
        self.inner.with_queue(|q| q.clear_error()).await
    }

    pub async fn first_n_error_ids(&self, n: usize) -> Result<Vec<Uuid>, QueueError> {
        self.inner.with_queue(|q| Ok(q.first_n_error_ids(n))).await
    }

    pub async fn pop_error_by_id(&self, id: Uuid) -> Result<Option<ErrorEntry<T>>, QueueError> {
        self.inner.with_queue(|q| q.pop_error_by_id(&id)).await
    }

    pub async fn inspect_error_by_id(&self, id: Uuid) -> Result<Option<ErrorEntry<T>>, QueueError> {
        self.inner.with_queue(|q| q.inspect_error_by_id(&id)).await
    }

    /// Move every quarantined item back to pending with a fresh retry budget.
    /// Sending is paused for the duration of the move so the drain loop never
    /// observes a half-moved queue; an operator pause that was already in
    /// effect stays in effect afterwards.
    pub async fn reprocess_all_errors(&self) -> Result<usize, QueueError> {
        let was_paused = self.inner.sending_paused.swap(true, Ordering::AcqRel);
        let moved = self.inner.with_queue(|q| q.move_all_error_to_pending()).await;
        self.inner.sending_paused.store(was_paused, Ordering::Release);
        self.inner.trigger_drain();
        moved
    }

    /// Move one quarantined item back to pending, returning its payload.
    pub async fn reprocess_error_by_id(&self, id: Uuid) -> Result<Option<T>, QueueError> {
        let was_paused = self.inner.sending_paused.swap(true, Ordering::AcqRel);
        let moved = self
            .inner
            .with_queue(|q| q.move_one_error_to_pending(&id))
            .await;
        self.inner.sending_paused.store(was_paused, Ordering::Release);
        self.inner.trigger_drain();
        moved
    }

    /// Pause sending and request shutdown. If no drain loop is active the
    /// queue is flushed and the completion signal resolved here; otherwise
    /// the running loop finalizes on its own exit.
    pub async fn shut_down(&self) {
        self.inner.sending_paused.store(true, Ordering::Release);
        self.inner.shutdown_requested.store(true, Ordering::Release);
        if self
            .inner
            .drain_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.finalize_shutdown().await;
        }
    }

    /// Block until shutdown finalization has completed. Any number of
    /// concurrent waiters may block here; late waiters return immediately.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.inner.done.subscribe();
        let _ = rx.wait_for(|finished| *finished).await;
    }
}

impl<T> SenderInner<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    async fn with_queue<R>(
        &self,
        f: impl FnOnce(&mut PendingQueue<T>) -> Result<R, QueueError>,
    ) -> Result<R, QueueError> {
        let mut guard = self.queue.lock().await;
        match guard.as_mut() {
            Some(queue) => f(queue),
            None => Err(QueueError::Closed),
        }
    }

    fn trigger_drain(self: &Arc<Self>) {
        if self.shutdown_requested.load(Ordering::Acquire)
            || self.sending_paused.load(Ordering::Acquire)
        {
            return;
        }
        if self
            .drain_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                inner.drain_loop().await;
            });
        }
    }

    async fn drain_loop(self: Arc<Self>) {
        let mut faulted = false;
        loop {
            if self.sending_paused.load(Ordering::Acquire) {
                break;
            }
            let entry = {
                let mut guard = self.queue.lock().await;
                match guard.as_mut() {
                    Some(queue) => match queue.pop() {
                        Ok(entry) => entry,
                        Err(e) => {
                            error!(route = %self.route_key, error = %e, "drain loop pop failed");
                            faulted = true;
                            None
                        }
                    },
                    None => None,
                }
            };
            let Some(entry) = entry else { break };

            if !self.config.wait_period.is_zero() {
                tokio::time::sleep(self.config.wait_period).await;
            }

            match self
                .callback
                .transmit(entry.unique_id, entry.payload.clone())
                .await
            {
                Ok(()) => {
                    debug!(route = %self.route_key, id = %entry.unique_id, "payload transmitted");
                }
                Err(e) if e.is_retryable() => self.requeue_failed(entry, &e).await,
                Err(e) => self.quarantine(entry, e.to_string()).await,
            }
        }

        self.drain_active.store(false, Ordering::Release);
        if self.shutdown_requested.load(Ordering::Acquire) {
            self.finalize_shutdown().await;
            return;
        }

        // A storage fault would make an immediate re-trigger spin; leave the
        // backlog for the next enqueue or unpause instead.
        if faulted {
            return;
        }

        // A push may have landed between the last empty pop and the flag
        // clear above; re-check so the wakeup is not lost.
        let backlog = {
            let guard = self.queue.lock().await;
            guard
                .as_ref()
                .and_then(|q| q.sizes().ok())
                .map_or(0, |s| s.pending)
        };
        if backlog > 0 {
            self.trigger_drain();
        }
    }

    /// Retryable transmit failure: bump the retry count, re-queue at the
    /// back or quarantine once the budget is spent.
    async fn requeue_failed(&self, entry: PendingEntry<T>, cause: &TransmitError) {
        let retry_count = entry.retry_count + 1;
        if retry_count >= self.config.max_retries {
            self.quarantine(
                PendingEntry {
                    retry_count,
                    ..entry
                },
                "max retries reached".to_string(),
            )
            .await;
            return;
        }
        debug!(route = %self.route_key, id = %entry.unique_id, retry = retry_count,
               cause = %cause, "transmit failed, re-queued");
        let mut guard = self.queue.lock().await;
        let Some(queue) = guard.as_mut() else { return };
        if let Err(e) = queue.push_pending(entry.unique_id, entry.payload, retry_count) {
            error!(route = %self.route_key, id = %entry.unique_id, error = %e,
                   "failed to re-queue outbound payload");
        }
    }

    async fn quarantine(&self, entry: PendingEntry<T>, reason: String) {
        let mut guard = self.queue.lock().await;
        let Some(queue) = guard.as_mut() else { return };
        if let Err(e) = queue.push_error(entry.unique_id, entry.payload, reason) {
            error!(route = %self.route_key, id = %entry.unique_id, error = %e,
                   "failed to quarantine outbound payload");
        }
    }

    /// Flush and close the queue, then resolve the completion signal.
    /// Tolerates being reached twice when a loop exit races `shut_down`.
    async fn finalize_shutdown(&self) {
        let taken = self.queue.lock().await.take();
        if let Some(mut queue) = taken {
            if let Err(e) = queue.shut_down() {
                error!(route = %self.route_key, error = %e, "queue flush on shutdown failed");
            }
        }
        if !self.done.send_replace(true) {
            info!(route = %self.route_key, "queued sender shut down");
        }
    }
}

#[async_trait]
impl<T> SizeProbe for SenderInner<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    async fn sizes(&self) -> QueueSizes {
        let guard = self.queue.lock().await;
        guard
            .as_ref()
            .and_then(|q| q.sizes().ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl<T> QueueControl for QueuedSender<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn route_key(&self) -> &str {
        &self.inner.route_key
    }

    fn direction(&self) -> Direction {
        Direction::Outbound
    }

    fn pause_receiving(&self) {
        self.pause_sending();
    }

    fn unpause_receiving(&self) {
        self.unpause_sending();
    }

    fn pause_processing(&self) {
        self.pause_sending();
    }

    fn unpause_processing(&self) {
        self.unpause_sending();
    }

    async fn sizes(&self) -> Result<QueueSizes, QueueError> {
        QueuedSender::sizes(self).await
    }

    async fn first_n_error_ids(&self, n: usize) -> Result<Vec<Uuid>, QueueError> {
        QueuedSender::first_n_error_ids(self, n).await
    }

    async fn clear_error(&self) -> Result<(), QueueError> {
        QueuedSender::clear_error(self).await
    }

    async fn pop_error_by_id(&self, id: Uuid) -> Result<Option<Value>, QueueError> {
        match QueuedSender::pop_error_by_id(self, id).await? {
            Some(entry) => Ok(Some(serde_json::to_value(entry)?)),
            None => Ok(None),
        }
    }

    async fn inspect_error_by_id(&self, id: Uuid) -> Result<Option<Value>, QueueError> {
        match QueuedSender::inspect_error_by_id(self, id).await? {
            Some(entry) => Ok(Some(serde_json::to_value(entry)?)),
            None => Ok(None),
        }
    }

    async fn reprocess_all_errors(&self) -> Result<usize, QueueError> {
        QueuedSender::reprocess_all_errors(self).await
    }

    async fn reprocess_error_by_id(&self, id: Uuid) -> Result<Option<Value>, QueueError> {
        match QueuedSender::reprocess_error_by_id(self, id).await? {
            Some(payload) => Ok(Some(serde_json::to_value(payload)?)),
            None => Ok(None),
        }
    }

    async fn shut_down(&self) {
        QueuedSender::shut_down(self).await;
    }

    async fn wait_for_shutdown(&self) {
        QueuedSender::wait_for_shutdown(self).await;
    }
}
