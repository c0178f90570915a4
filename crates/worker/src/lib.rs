//! Worker-replica runtime: fault injection and the per-connection handler
//! shape shared by in-process workers and the standalone `qrd-worker`
//! binary (§2.1, §4.2, §4.3).

pub mod fault;
pub mod runtime;

pub use fault::FaultSampler;
pub use runtime::{FaultControl, WorkerRuntime, WorkerRuntimeConfig};
