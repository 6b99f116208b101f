//! Explicit registry of queue state machines.
//!
//! The router and management tooling reach queues through this object, which
//! is constructed once at startup and passed by reference. Payloads cross the
//! type-erased boundary as JSON values.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::pending::QueueSizes;

/// Which side of the framework a queue serves. Also selects the
/// `endpoint`/`sender` segment of its file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "endpoint",
            Direction::Outbound => "sender",
        }
    }
}

/// Object-safe management facade implemented by both state machines.
///
/// For an outbound sender, the receiving and processing controls both map to
/// its single sending control.
#[async_trait]
pub trait QueueControl: Send + Sync {
    fn route_key(&self) -> &str;
    fn direction(&self) -> Direction;

    fn pause_receiving(&self);
    fn unpause_receiving(&self);
    fn pause_processing(&self);
    fn unpause_processing(&self);

    async fn sizes(&self) -> Result<QueueSizes, QueueError>;
    async fn first_n_error_ids(&self, n: usize) -> Result<Vec<Uuid>, QueueError>;
    async fn clear_error(&self) -> Result<(), QueueError>;
    async fn pop_error_by_id(&self, id: Uuid) -> Result<Option<Value>, QueueError>;
    async fn inspect_error_by_id(&self, id: Uuid) -> Result<Option<Value>, QueueError>;
    async fn reprocess_all_errors(&self) -> Result<usize, QueueError>;
    async fn reprocess_error_by_id(&self, id: Uuid) -> Result<Option<Value>, QueueError>;

    async fn shut_down(&self);
    async fn wait_for_shutdown(&self);
}

/// Route-keyed registry handed to the router and the management layer.
#[derive(Default)]
pub struct QueueRegistry {
    routes: RwLock<HashMap<(String, Direction), Arc<dyn QueueControl>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, control: Arc<dyn QueueControl>) {
        let key = (control.route_key().to_string(), control.direction());
        self.routes.write().insert(key, control);
    }

    pub fn get(&self, route_key: &str, direction: Direction) -> Option<Arc<dyn QueueControl>> {
        self.routes
            .read()
            .get(&(route_key.to_string(), direction))
            .cloned()
    }

    pub fn remove(&self, route_key: &str, direction: Direction) -> Option<Arc<dyn QueueControl>> {
        self.routes
            .write()
            .remove(&(route_key.to_string(), direction))
    }

    pub fn list(&self) -> Vec<(String, Direction)> {
        self.routes.read().keys().cloned().collect()
    }

    /// Shut every registered queue down and wait for each to finalize.
    pub async fn shut_down_all(&self) {
        let controls: Vec<Arc<dyn QueueControl>> =
            self.routes.read().values().cloned().collect();
        for control in &controls {
            control.shut_down().await;
        }
        for control in &controls {
            control.wait_for_shutdown().await;
        }
    }
}
