//! Shared data model and wire framing for the quorum/replication coordination core.
//!
//! This crate has no `tokio::spawn` or accept loops of its own — it is the
//! dependency-light bottom of the crate graph, consumed by both `qrd-engine`
//! (coordinator-side orchestration) and `qrd-worker` (replica runtime).

pub mod operation;
pub mod response;
pub mod wire;
pub mod worker;

pub use operation::{Opcode, OperationKey, OperationRecord, OperationRecordError};
pub use response::{classify, ConsensusOutcome, ResponseClass};
pub use wire::WireError;
pub use worker::{FaultSpec, WorkerEndpoint, WorkerId, WorkerState};
