//! Worker registry: membership changes and round-start snapshots (§3, §5).
//!
//! A single mutex protects membership; the engines never hold it while doing
//! I/O (§5 "The engines never hold membership locks while performing I/O").

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use qrd_core::{WorkerEndpoint, WorkerId, WorkerState};

/// The registry's view of one worker: its endpoint, lifecycle state, and the
/// token that is cancelled only when the worker itself is removed or the
/// coordinator shuts down (never by a single round's abort — §5).
#[derive(Clone)]
pub struct WorkerHandle {
    pub endpoint: WorkerEndpoint,
    pub state: WorkerState,
    pub token: CancellationToken,
}

/// One worker as captured in a round-start snapshot (§4.5): the round never
/// observes membership changes made after this point.
#[derive(Clone)]
pub struct WorkerSnapshotEntry {
    pub id: WorkerId,
    pub endpoint: WorkerEndpoint,
    pub token: CancellationToken,
}

/// Thread-safe worker membership table owned by the coordinator.
pub struct WorkerRegistry {
    next_id: AtomicU64,
    workers: Mutex<BTreeMap<WorkerId, WorkerHandle>>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        WorkerRegistry { next_id: AtomicU64::new(1), workers: Mutex::new(BTreeMap::new()) }
    }

    /// Register a newly started worker and return its assigned id. Ids are
    /// unique and monotonic for the lifetime of the registry (§3).
    pub fn add(&self, host: impl Into<String>, port: u16) -> (WorkerId, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let endpoint = WorkerEndpoint { id, host: host.into(), port };
        let handle = WorkerHandle { endpoint, state: WorkerState::Idle, token: token.clone() };
        self.workers.lock().expect("registry mutex poisoned").insert(id, handle);
        (id, token)
    }

    /// Register a worker whose id was already decided by the caller (the
    /// coordinator derives a worker's port from its id, so it must pick the
    /// id before binding). Advances the internal id counter so later
    /// [`WorkerRegistry::add`] calls never collide with it.
    pub fn insert(&self, id: WorkerId, endpoint: WorkerEndpoint) -> CancellationToken {
        let token = CancellationToken::new();
        let handle = WorkerHandle { endpoint, state: WorkerState::Idle, token: token.clone() };
        self.workers.lock().expect("registry mutex poisoned").insert(id, handle);
        self.next_id.fetch_max(id + 1, Ordering::SeqCst);
        token
    }

    /// Remove a worker, cancelling its token so any in-flight handler and its
    /// accept loop stop. Returns the removed endpoint, or `None` if unknown.
    /// A remove that leaves zero workers is observable via [`WorkerRegistry::len`] (§3 invariant).
    pub fn remove(&self, id: WorkerId) -> Option<WorkerEndpoint> {
        let mut workers = self.workers.lock().expect("registry mutex poisoned");
        let handle = workers.remove(&id)?;
        handle.token.cancel();
        Some(handle.endpoint)
    }

    /// Round-start snapshot (§4.5): isolates a round from concurrent
    /// membership changes made after this call returns.
    pub fn snapshot(&self) -> Vec<WorkerSnapshotEntry> {
        self.workers
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .map(|(&id, handle)| WorkerSnapshotEntry {
                id,
                endpoint: handle.endpoint.clone(),
                token: handle.token.clone(),
            })
            .collect()
    }

    /// Comma-separated ids in ascending order, empty string if none (§6 `LIST_WORKERS`).
    pub fn list_ids_line(&self) -> String {
        self.workers
            .lock()
            .expect("registry mutex poisoned")
            .keys()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn len(&self) -> usize {
        self.workers.lock().expect("registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every worker's token, e.g. on coordinator shutdown (§6 "Exit behavior").
    pub fn cancel_all(&self) {
        for handle in self.workers.lock().expect("registry mutex poisoned").values() {
            handle.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let registry = WorkerRegistry::new();
        let (first, _) = registry.add("127.0.0.1", 8100);
        let (second, _) = registry.add("127.0.0.1", 8101);
        assert!(second > first);
    }

    #[test]
    fn remove_cancels_token_and_shrinks_registry() {
        let registry = WorkerRegistry::new();
        let (id, token) = registry.add("127.0.0.1", 8100);
        assert_eq!(registry.len(), 1);
        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.port, 8100);
        assert!(token.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_unknown_id_returns_none() {
        let registry = WorkerRegistry::new();
        assert!(registry.remove(999).is_none());
    }

    #[test]
    fn list_ids_line_is_sorted_and_comma_separated() {
        let registry = WorkerRegistry::new();
        registry.add("127.0.0.1", 8100);
        registry.add("127.0.0.1", 8101);
        assert_eq!(registry.list_ids_line(), "1,2");
    }

    #[test]
    fn snapshot_is_unaffected_by_later_membership_changes() {
        let registry = WorkerRegistry::new();
        let (id, _) = registry.add("127.0.0.1", 8100);
        let snapshot = registry.snapshot();
        registry.remove(id);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
    }
}
