//! Binds the coordinator's worker registry (`qrd-engine`) to the worker
//! runtime library (`qrd-worker`): the coordinator-owned half of the
//! in-process topology resolved in SPEC_FULL.md §2.1.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use qrd_core::{FaultSpec, WorkerEndpoint, WorkerId};
use qrd_engine::registry::WorkerSnapshotEntry;
use qrd_engine::WorkerRegistry;
use qrd_worker::runtime::WorkerRuntimeConfig;
use qrd_worker::WorkerRuntime;

pub struct WorkerFleetConfig {
    pub host: String,
    pub base_port: u16,
    pub accept_read_timeout: std::time::Duration,
    pub max_stagger_ms: u64,
    pub seed: Option<u64>,
}

/// Spawns and tracks in-process workers, keeping the `qrd-engine` registry
/// (network-facing view) and the `qrd-worker` runtimes (actual listeners)
/// in lockstep.
pub struct WorkerFleet {
    registry: WorkerRegistry,
    runtimes: Mutex<HashMap<WorkerId, WorkerRuntime>>,
    next_id: AtomicU64,
    config: WorkerFleetConfig,
}

impl WorkerFleet {
    pub fn new(config: WorkerFleetConfig) -> Self {
        WorkerFleet {
            registry: WorkerRegistry::new(),
            runtimes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Start a new worker with the given fault configuration, assigning it
    /// the next id and the corresponding `base_port + id` listening port
    /// (§4.4.2 `ADD_WORKER`).
    pub async fn add_worker(&self, fault: FaultSpec) -> std::io::Result<WorkerId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let port = self.config.base_port + id as u16;
        let endpoint = WorkerEndpoint { id, host: self.config.host.clone(), port };
        let token = self.registry.insert(id, endpoint);

        let runtime_config = WorkerRuntimeConfig {
            id,
            host: self.config.host.clone(),
            port,
            accept_read_timeout: self.config.accept_read_timeout,
            max_stagger_ms: self.config.max_stagger_ms,
            seed: self.config.seed.map(|seed| seed.wrapping_add(id)),
        };

        let runtime = match WorkerRuntime::bind_with_token(runtime_config, fault, token).await {
            Ok(runtime) => runtime,
            Err(err) => {
                self.registry.remove(id);
                return Err(err);
            }
        };
        self.runtimes.lock().expect("runtimes mutex poisoned").insert(id, runtime);
        Ok(id)
    }

    /// Stop and forget a worker (§4.4.2 `REMOVE_WORKER`). Returns `true` if
    /// the id was known.
    pub async fn remove_worker(&self, id: WorkerId) -> bool {
        let Some(_endpoint) = self.registry.remove(id) else {
            return false;
        };
        let runtime = self.runtimes.lock().expect("runtimes mutex poisoned").remove(&id);
        if let Some(runtime) = runtime {
            runtime.shutdown().await;
        }
        true
    }

    pub fn list_ids_line(&self) -> String {
        self.registry.list_ids_line()
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshotEntry> {
        self.registry.snapshot()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Stop every worker (§6 "Exit behavior").
    pub async fn shutdown_all(&self) {
        let runtimes = std::mem::take(&mut *self.runtimes.lock().expect("runtimes mutex poisoned"));
        for (_, runtime) in runtimes {
            runtime.shutdown().await;
        }
    }
}
