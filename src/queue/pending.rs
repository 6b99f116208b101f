//! Pending/error queue pair shared by both processing state machines.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;

use super::paginated::PaginatedQueue;

/// An item waiting to be processed or transmitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry<T> {
    pub unique_id: Uuid,
    pub retry_count: u32,
    pub payload: T,
}

/// An item quarantined after exceeding its retry budget or failing
/// permanently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry<T> {
    pub unique_id: Uuid,
    pub payload: T,
    pub reason: String,
}

/// Sizes of the two sub-queues, polled by the telemetry collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSizes {
    pub pending: usize,
    pub error: usize,
}

/// Two paginated queues sharing one lifecycle: `pending` feeds the drain
/// loop, `error` quarantines items for operator inspection and reprocessing.
pub struct PendingQueue<T> {
    pending: PaginatedQueue<PendingEntry<T>>,
    error: PaginatedQueue<ErrorEntry<T>>,
}

impl<T> PendingQueue<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn open(
        pending_path: &Path,
        error_path: &Path,
        config: &QueueConfig,
    ) -> Result<Self, QueueError> {
        Ok(Self {
            pending: PaginatedQueue::open(pending_path, config)?,
            error: PaginatedQueue::open(error_path, config)?,
        })
    }

    pub fn push_pending(
        &mut self,
        id: Uuid,
        payload: T,
        retry_count: u32,
    ) -> Result<Uuid, QueueError> {
        self.pending.push(
            id,
            PendingEntry {
                unique_id: id,
                retry_count,
                payload,
            },
        )
    }

    /// Quarantine an item. Logged at warning level so operators see every
    /// entry that leaves the normal path.
    pub fn push_error(&mut self, id: Uuid, payload: T, reason: String) -> Result<Uuid, QueueError> {
        warn!(id = %id, reason = %reason, "entry moved to error queue");
        self.error.push(
            id,
            ErrorEntry {
                unique_id: id,
                payload,
                reason,
            },
        )
    }

    pub fn pop(&mut self) -> Result<Option<PendingEntry<T>>, QueueError> {
        Ok(self.pending.pop()?.map(|(_, entry)| entry))
    }

    pub fn pop_pending_by_id(&mut self, id: &Uuid) -> Result<Option<PendingEntry<T>>, QueueError> {
        self.pending.pop_by_id(id)
    }

    pub fn inspect_pending_by_id(&self, id: &Uuid) -> Result<Option<PendingEntry<T>>, QueueError> {
        self.pending.inspect_by_id(id)
    }

    pub fn pop_error_by_id(&mut self, id: &Uuid) -> Result<Option<ErrorEntry<T>>, QueueError> {
        self.error.pop_by_id(id)
    }

    pub fn inspect_error_by_id(&self, id: &Uuid) -> Result<Option<ErrorEntry<T>>, QueueError> {
        self.error.inspect_by_id(id)
    }

    /// Drain the error queue entirely, re-queueing every item with a fresh
    /// retry budget. Returns how many items moved.
    pub fn move_all_error_to_pending(&mut self) -> Result<usize, QueueError> {
        let mut moved = 0;
        while let Some((id, entry)) = self.error.pop()? {
            self.push_pending(id, entry.payload, 0)?;
            moved += 1;
        }
        Ok(moved)
    }

    /// Move a single quarantined item back to pending with a fresh retry
    /// budget, returning the payload moved.
    pub fn move_one_error_to_pending(&mut self, id: &Uuid) -> Result<Option<T>, QueueError> {
        match self.error.pop_by_id(id)? {
            Some(entry) => {
                self.push_pending(*id, entry.payload.clone(), 0)?;
                Ok(Some(entry.payload))
            }
            None => Ok(None),
        }
    }

    pub fn clear_error(&mut self) -> Result<(), QueueError> {
        self.error.clear()
    }

    pub fn first_n_error_ids(&self, n: usize) -> Vec<Uuid> {
        self.error.first_n_ids(n)
    }

    pub fn sizes(&self) -> Result<QueueSizes, QueueError> {
        Ok(QueueSizes {
            pending: self.pending.size()?,
            error: self.error.size()?,
        })
    }

    /// Flush and close both sub-queues.
    pub fn shut_down(&mut self) -> Result<(), QueueError> {
        self.pending.shut_down()?;
        self.error.shut_down()
    }
}
