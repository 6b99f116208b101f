//! Size-polling surface for the external telemetry collaborator.
//!
//! The queue engine never pushes metrics. During `setup` each state machine
//! registers a probe here; the collaborator polls `snapshot` on its own
//! schedule.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::queue::pending::QueueSizes;

/// Something whose pending/error sizes can be polled.
#[async_trait]
pub trait SizeProbe: Send + Sync {
    async fn sizes(&self) -> QueueSizes;
}

/// Registry of size probes, keyed by queue base name
/// (`{app}-{instance}-{route}-{endpoint|sender}`).
#[derive(Default)]
pub struct StatsRegistry {
    probes: RwLock<HashMap<String, Arc<dyn SizeProbe>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, probe: Arc<dyn SizeProbe>) {
        self.probes.write().insert(name.to_string(), probe);
    }

    pub fn unregister(&self, name: &str) {
        self.probes.write().remove(name);
    }

    pub fn names(&self) -> Vec<String> {
        self.probes.read().keys().cloned().collect()
    }

    /// Poll every registered probe once.
    pub async fn snapshot(&self) -> Vec<(String, QueueSizes)> {
        let probes: Vec<(String, Arc<dyn SizeProbe>)> = self
            .probes
            .read()
            .iter()
            .map(|(name, probe)| (name.clone(), Arc::clone(probe)))
            .collect();

        let mut sizes = Vec::with_capacity(probes.len());
        for (name, probe) in probes {
            sizes.push((name, probe.sizes().await));
        }
        sizes
    }
}
