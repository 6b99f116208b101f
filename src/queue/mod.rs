//! Queue engine - paginated durable storage plus the two processing state
//! machines built on it.
//!
//! ## Module Organization
//!
//! - `page.rs` - PageBuffer, the in-memory ordered page with O(1) id lookup
//! - `sqlite.rs` - QueueStore, one SQLite file per logical queue
//! - `paginated.rs` - PaginatedQueue, the front-page/store/back-page FIFO
//! - `pending.rs` - PendingQueue, the pending/error queue pair
//! - `handler.rs` - QueuedRequestHandler, the inbound accept-and-defer machine
//! - `sender.rs` - QueuedSender, the outbound enqueue-and-defer machine
//!
//! A PaginatedQueue assumes single-task access and performs no locking of its
//! own; the state machines own each queue behind a `tokio::sync::Mutex`.

pub mod handler;
pub mod page;
pub mod paginated;
pub mod pending;
pub mod sender;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use handler::QueuedRequestHandler;
pub use paginated::PaginatedQueue;
pub use pending::PendingQueue;
pub use sender::QueuedSender;
