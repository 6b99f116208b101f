//! Error types for the queue engine.

use std::fmt;

/// Engine-level fault raised by the storage and queue layers.
///
/// Storage I/O failures are never retried internally; they propagate to the
/// caller unchanged.
#[derive(Debug)]
pub enum QueueError {
    /// SQLite error from the persistent store.
    Storage(rusqlite::Error),
    /// Payload could not be serialized or deserialized.
    Serialization(serde_json::Error),
    /// The queue was never set up, or has already been shut down.
    Closed,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Storage(e) => write!(f, "storage error: {}", e),
            QueueError::Serialization(e) => write!(f, "serialization error: {}", e),
            QueueError::Closed => write!(f, "queue is closed"),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::Storage(e) => Some(e),
            QueueError::Serialization(e) => Some(e),
            QueueError::Closed => None,
        }
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Storage(e)
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Serialization(e)
    }
}

/// Synchronous rejection returned by `accept`/`enqueue`.
///
/// The protocol layer maps this to an application-busy status; the queue is
/// never touched when it is returned.
#[derive(Debug, PartialEq, Eq)]
pub enum AcceptError {
    /// Receiving (or sending) is paused.
    Busy,
}

impl fmt::Display for AcceptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptError::Busy => write!(f, "queue is busy"),
        }
    }
}

impl std::error::Error for AcceptError {}

/// Failure raised by an outbound transmit callback.
///
/// Only `Busy` and `RetriesExhausted` are retryable; every `Other` failure is
/// permanent and quarantines the item immediately with its description as the
/// reason.
#[derive(Debug, PartialEq, Eq)]
pub enum TransmitError {
    /// The remote side reported it is busy.
    Busy,
    /// The transport gave up after its own retry budget.
    RetriesExhausted,
    /// Any other failure; treated as permanent.
    Other(String),
}

impl TransmitError {
    /// Whether the drain loop may re-push the item for another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransmitError::Busy | TransmitError::RetriesExhausted)
    }
}

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransmitError::Busy => write!(f, "server busy"),
            TransmitError::RetriesExhausted => write!(f, "retries exhausted at transport"),
            TransmitError::Other(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for TransmitError {}
