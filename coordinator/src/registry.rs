//! Worker registry.
//!
//! Tracks every worker that has announced itself and its last-reported
//! free memory. The address is the identity: a repeat announcement from
//! the same address refreshes the entry in place. Workers are never
//! removed (no leave or health-check path exists).

use protocol::WorkerAddress;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

/// A known worker and its last-reported free memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub address: WorkerAddress,
    pub free_memory_bytes: u64,
}

/// Registry of joined workers.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerAddress, WorkerInfo>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker or refresh its free-memory report.
    pub fn join(&self, address: WorkerAddress, free_memory_bytes: u64) {
        let mut workers = self.workers.write().expect("worker registry poisoned");
        let refreshed = workers.contains_key(&address);
        workers.insert(
            address.clone(),
            WorkerInfo {
                address: address.clone(),
                free_memory_bytes,
            },
        );
        info!(
            worker = %address,
            free_memory_bytes,
            refreshed,
            "Worker joined"
        );
    }

    /// Snapshot of the current pool, in unspecified order.
    pub fn snapshot(&self) -> Vec<WorkerInfo> {
        let workers = self.workers.read().expect("worker registry poisoned");
        workers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.read().expect("worker registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_snapshot() {
        let registry = WorkerRegistry::new();
        registry.join(WorkerAddress::new("http://a:9000"), 1000);
        registry.join(WorkerAddress::new("http://b:9000"), 2000);

        let mut snapshot = registry.snapshot();
        snapshot.sort_by(|a, b| a.address.cmp(&b.address));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].free_memory_bytes, 1000);
    }

    #[test]
    fn rejoin_updates_in_place() {
        let registry = WorkerRegistry::new();
        let addr = WorkerAddress::new("http://a:9000");
        registry.join(addr.clone(), 1000);
        registry.join(addr.clone(), 5000);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].free_memory_bytes, 5000);
    }
}
