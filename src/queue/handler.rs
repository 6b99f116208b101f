//! Inbound queued-request state machine.
//!
//! A handler acknowledges each accepted request immediately and processes it
//! later from a background drain loop. Receiving and processing are paused
//! independently; both start paused until `setup` completes.

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
use crate::error::{AcceptError, QueueError};
use crate::registry::{Direction, QueueControl};
use crate::stats::{SizeProbe, StatsRegistry};

use super::pending::{ErrorEntry, PendingEntry, PendingQueue, QueueSizes};

/// Processing callback invoked by the drain loop, one item at a time.
///
/// Returning `false` re-queues the item for another attempt (at the back of
/// the pending queue) until the retry budget is exhausted. The loop
/// deliberately adds no failure boundary beyond the boolean: callbacks are
/// framework-internal, and a panic inside one surfaces through the drain
/// task instead of being misclassified as a retryable failure.
#[async_trait]
pub trait ProcessHandler<T>: Send + Sync {
    async fn process(&self, id: Uuid, payload: T) -> bool;
}

pub struct QueuedRequestHandler<T> {
    inner: Arc<HandlerInner<T>>,
}

impl<T> Clone for QueuedRequestHandler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct HandlerInner<T> {
    route_key: String,
    config: QueueConfig,
    callback: Arc<dyn ProcessHandler<T>>,
    stats: Arc<StatsRegistry>,
    queue: Mutex<Option<PendingQueue<T>>>,
    receiving_paused: AtomicBool,
    processing_paused: AtomicBool,
    drain_active: AtomicBool,
    shutdown_requested: AtomicBool,
    done: watch::Sender<bool>,
}

impl<T> QueuedRequestHandler<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Create a handler for one route key. Both controls start paused; call
    /// `setup` before `accept`.
    pub fn new(
        route_key: impl Into<String>,
        config: QueueConfig,
        callback: Arc<dyn ProcessHandler<T>>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                route_key: route_key.into(),
                config,
                callback,
                stats,
                queue: Mutex::new(None),
                receiving_paused: AtomicBool::new(true),
                processing_paused: AtomicBool::new(true),
                drain_active: AtomicBool::new(false),
                shutdown_requested: AtomicBool::new(false),
                done: watch::channel(false).0,
            }),
        }
    }

    pub fn route_key(&self) -> &str {
        &self.inner.route_key
    }

    /// Open the queue files, register the size probe, unpause both controls
    /// and kick the drain loop. Must run once before `accept`.
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
            Direction::Inbound.as_str()
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

        self.inner.receiving_paused.store(false, Ordering::Release);
        self.inner.processing_paused.store(false, Ordering::Release);
        info!(route = %self.inner.route_key, "queued request handler ready");
        self.inner.trigger_drain();
        Ok(())
    }

    /// Accept a request: acknowledge immediately and enqueue it for later
    /// processing. Fails with `Busy` while receiving is paused, without
    /// touching the queue. The push itself is fire-and-forget; once this
    /// returns, the caller gets no further signal about the outcome.
    pub fn accept(&self, id: Uuid, payload: T) -> Result<(), AcceptError> {
        if self.inner.receiving_paused.load(Ordering::Acquire)
            || self.inner.shutdown_requested.load(Ordering::Acquire)
        {
            return Err(AcceptError::Busy);
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            {
                let mut guard = inner.queue.lock().await;
                match guard.as_mut() {
                    Some(queue) => {
                        if let Err(e) = queue.push_pending(id, payload, 0) {
                            error!(id = %id, error = %e, "failed to enqueue accepted request");
                        }
                    }
                    None if inner.shutdown_requested.load(Ordering::Acquire) => {
                        warn!(id = %id, "request raced shutdown finalization, dropped")
                    }
                    None => warn!(id = %id, "request accepted before setup completed, dropped"),
                }
            }
            inner.trigger_drain();
        });
        Ok(())
    }

    pub fn pause_receiving(&self) {
        self.inner.receiving_paused.store(true, Ordering::Release);
    }

    pub fn unpause_receiving(&self) {
        self.inner.receiving_paused.store(false, Ordering::Release);
    }

    pub fn pause_processing(&self) {
        self.inner.processing_paused.store(true, Ordering::Release);
    }

    /// Unpause processing and re-kick the drain loop in case items piled up.
    pub fn unpause_processing(&self) {
        self.inner.processing_paused.store(false, Ordering::Release);
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
    /// Processing is paused for the duration of the move so the drain loop
    /// never observes a half-moved queue; an operator pause that was already
    /// in effect stays in effect afterwards.
    pub async fn reprocess_all_errors(&self) -> Result<usize, QueueError> {
        let was_paused = self.inner.processing_paused.swap(true, Ordering::AcqRel);
        let moved = self.inner.with_queue(|q| q.move_all_error_to_pending()).await;
        self.inner.processing_paused.store(was_paused, Ordering::Release);
        self.inner.trigger_drain();
        moved
    }

    /// Move one quarantined item back to pending, returning its payload.
    pub async fn reprocess_error_by_id(&self, id: Uuid) -> Result<Option<T>, QueueError> {
        let was_paused = self.inner.processing_paused.swap(true, Ordering::AcqRel);
        let moved = self
            .inner
            .with_queue(|q| q.move_one_error_to_pending(&id))
            .await;
        self.inner.processing_paused.store(was_paused, Ordering::Release);
        self.inner.trigger_drain();
        moved
    }

    /// Pause both controls and request shutdown. If no drain loop is active
    /// the queue is flushed and the completion signal resolved here;
    /// otherwise the running loop finalizes on its own exit.
    pub async fn shut_down(&self) {
        self.inner.receiving_paused.store(true, Ordering::Release);
        self.inner.processing_paused.store(true, Ordering::Release);
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

impl<T> HandlerInner<T>
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

    /// Start a drain loop unless one is already active. The compare-and-set
    /// guarantees at most one loop per route; a trigger that loses the race
    /// is absorbed by the exiting loop's backlog re-check.
    fn trigger_drain(self: &Arc<Self>) {
        if self.shutdown_requested.load(Ordering::Acquire)
            || self.processing_paused.load(Ordering::Acquire)
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
            if self.processing_paused.load(Ordering::Acquire) {
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

            let processed = self
                .callback
                .process(entry.unique_id, entry.payload.clone())
                .await;
            if processed {
                debug!(route = %self.route_key, id = %entry.unique_id, "request processed");
                continue;
            }
            self.requeue_failed(entry).await;
        }

        self.drain_active.store(false, Ordering::Release);
        if self.shutdown_requested.load(Ordering::Acquire) {
            self.finalize_shutdown().await;
            return;
        }

        // A storage fault would make an immediate re-trigger spin; leave the
        // backlog for the next accept or unpause instead.
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

    /// Failed item: bump the retry count, then re-queue at the back (retries
    /// do not preserve original position) or quarantine once the budget is
    /// spent.
    async fn requeue_failed(&self, entry: PendingEntry<T>) {
        let retry_count = entry.retry_count + 1;
        let mut guard = self.queue.lock().await;
        let Some(queue) = guard.as_mut() else { return };
        let result = if retry_count >= self.config.max_retries {
            queue
                .push_error(
                    entry.unique_id,
                    entry.payload,
                    "max retries reached".to_string(),
                )
                .map(|_| ())
        } else {
            queue
                .push_pending(entry.unique_id, entry.payload, retry_count)
                .map(|_| ())
        };
        if let Err(e) = result {
            error!(route = %self.route_key, id = %entry.unique_id, error = %e,
                   "failed to re-queue failed request");
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
            info!(route = %self.route_key, "queued request handler shut down");
        }
    }
}

#[async_trait]
impl<T> SizeProbe for HandlerInner<T>
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
impl<T> QueueControl for QueuedRequestHandler<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn route_key(&self) -> &str {
        &self.inner.route_key
    }

    fn direction(&self) -> Direction {
        Direction::Inbound
    }

    fn pause_receiving(&self) {
        QueuedRequestHandler::pause_receiving(self);
    }

    fn unpause_receiving(&self) {
        QueuedRequestHandler::unpause_receiving(self);
    }

    fn pause_processing(&self) {
        QueuedRequestHandler::pause_processing(self);
    }

    fn unpause_processing(&self) {
        QueuedRequestHandler::unpause_processing(self);
    }

    async fn sizes(&self) -> Result<QueueSizes, QueueError> {
        QueuedRequestHandler::sizes(self).await
    }

    async fn first_n_error_ids(&self, n: usize) -> Result<Vec<Uuid>, QueueError> {
        QueuedRequestHandler::first_n_error_ids(self, n).await
    }

    async fn clear_error(&self) -> Result<(), QueueError> {
        QueuedRequestHandler::clear_error(self).await
    }

    async fn pop_error_by_id(&self, id: Uuid) -> Result<Option<Value>, QueueError> {
        match QueuedRequestHandler::pop_error_by_id(self, id).await? {
            Some(entry) => Ok(Some(serde_json::to_value(entry)?)),
            None => Ok(None),
        }
    }

    async fn inspect_error_by_id(&self, id: Uuid) -> Result<Option<Value>, QueueError> {
        match QueuedRequestHandler::inspect_error_by_id(self, id).await? {
            Some(entry) => Ok(Some(serde_json::to_value(entry)?)),
            None => Ok(None),
        }
    }

    async fn reprocess_all_errors(&self) -> Result<usize, QueueError> {
        QueuedRequestHandler::reprocess_all_errors(self).await
    }

    async fn reprocess_error_by_id(&self, id: Uuid) -> Result<Option<Value>, QueueError> {
        match QueuedRequestHandler::reprocess_error_by_id(self, id).await? {
            Some(payload) => Ok(Some(serde_json::to_value(payload)?)),
            None => Ok(None),
        }
    }

    async fn shut_down(&self) {
        QueuedRequestHandler::shut_down(self).await;
    }

    async fn wait_for_shutdown(&self) {
        QueuedRequestHandler::wait_for_shutdown(self).await;
    }
}
