//! relayq - durable, at-least-once work-queue engine.
//!
//! Decouples request acceptance from request processing/delivery and survives
//! process restarts without losing queued work. Two symmetric state machines
//! are built on the same storage engine:
//!
//! - [`QueuedRequestHandler`] (inbound): acknowledge a request immediately,
//!   process it asynchronously in a background drain loop.
//! - [`QueuedSender`] (outbound): accept a payload for delivery, retry or
//!   quarantine it independently of the caller.
//!
//! Both sit on a [`PendingQueue`] (a pending/error queue pair), which in turn
//! sits on [`PaginatedQueue`]: a hybrid FIFO that keeps a bounded front and
//! back page in memory and spills the middle of the queue to a per-queue
//! SQLite file, preserving push order and uuid uniqueness across all tiers.
//!
//! Failed items are retried up to a configured budget, then moved to the
//! error queue for operator inspection and reprocessing. Once `accept` or
//! `enqueue` has returned its acknowledgment the producer receives no further
//! signal; outcomes are visible only through the error-queue surface.

pub mod config;
pub mod error;
pub mod queue;
pub mod registry;
pub mod stats;

pub use config::QueueConfig;
pub use error::{AcceptError, QueueError, TransmitError};
pub use queue::handler::{ProcessHandler, QueuedRequestHandler};
pub use queue::page::PageBuffer;
pub use queue::paginated::PaginatedQueue;
pub use queue::pending::{ErrorEntry, PendingEntry, PendingQueue, QueueSizes};
pub use queue::sender::{QueuedSender, Transmit};
pub use registry::{Direction, QueueControl, QueueRegistry};
pub use stats::{SizeProbe, StatsRegistry};
