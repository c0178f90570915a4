//! Follower-side state machine for the replication engine (§4.6 "Follower side").
//!
//! Each replica owns an in-memory `BTreeMap<String, String>` (§4.6.1). A
//! proposal is held pending until a matching commit or abort arrives;
//! commits without a preceding accept fail.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use qrd_core::operation::{Opcode, OperationKey, OperationRecord};

use crate::log::{LoggedRecord, OperationLog};

/// A follower's local replica: pending proposals plus the committed
/// key/value state the opcodes mutate.
pub struct ReplicaState {
    state: Mutex<BTreeMap<String, String>>,
    pending: Mutex<HashMap<OperationKey, OperationRecord>>,
    log: Arc<OperationLog>,
}

impl ReplicaState {
    pub fn new(log: Arc<OperationLog>) -> Self {
        ReplicaState { state: Mutex::new(BTreeMap::new()), pending: Mutex::new(HashMap::new()), log }
    }

    /// Validate and hold a proposal pending a commit or abort. `Ok(())` is an
    /// accept; `Err(reason)` is an explicit reject (§4.6 follower validation).
    pub fn propose(&self, record: OperationRecord) -> Result<(), String> {
        if record.target.is_empty() {
            return Err("target name must not be empty".to_string());
        }
        if self.log.contains_key(&record.key) {
            return Err(format!("operation key {} already committed", record.key));
        }
        let mut pending = self.pending.lock().expect("pending mutex poisoned");
        if pending.contains_key(&record.key) {
            return Err(format!("operation key {} already proposed", record.key));
        }
        pending.insert(record.key.clone(), record);
        Ok(())
    }

    /// Execute a previously accepted proposal against local state and append
    /// it to the log. `Err(reason)` is `OPERATION_FAILED`; this includes a
    /// commit with no preceding accept (§4.6: "commits arriving without a
    /// preceding accept fail").
    pub fn commit(&self, key: &OperationKey) -> Result<u64, String> {
        let record = {
            let mut pending = self.pending.lock().expect("pending mutex poisoned");
            pending.remove(key).ok_or_else(|| format!("no accepted proposal for key {key}"))?
        };

        let mut state = self.state.lock().expect("state mutex poisoned");
        match record.opcode {
            Opcode::Put => {
                state.insert(record.target.clone(), record.content.clone());
            }
            Opcode::Delete => {
                state.remove(&record.target);
            }
        }
        drop(state);

        Ok(self.log.append(record))
    }

    /// Discard a pending proposal without applying it (§4.6 "Abort").
    pub fn abort(&self, key: &OperationKey) {
        self.pending.lock().expect("pending mutex poisoned").remove(key);
    }

    /// Snapshot of the committed key/value state, for tests and diagnostics.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    /// Records a reconnecting follower missed, in ascending sequence order (§4.7).
    pub fn replay_since(&self, last_known: u64) -> Vec<LoggedRecord> {
        self.log.replay_since(last_known)
    }

    /// The highest sequence this replica has committed, for a rejoining peer
    /// to report back as `last_known` (§4.7).
    pub fn latest_sequence(&self) -> u64 {
        self.log.latest_sequence()
    }
}
