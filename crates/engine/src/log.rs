//! Operation log: committed records indexed by sequence number, with replay
//! for reconnecting followers (§4.7).

use std::collections::VecDeque;
use std::sync::Mutex;

use qrd_core::operation::{OperationKey, OperationRecord};

/// One committed record as stored in the log, tagged with the monotonic
/// sequence number the log assigned it at commit time. Sequence numbers are
/// separate from operation keys (§4.6, §4.7) and order commits as seen by
/// the log owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedRecord {
    pub sequence: u64,
    pub record: OperationRecord,
}

/// Append-only log of committed operations (§3 "Operation log").
pub struct OperationLog {
    inner: Mutex<Inner>,
}

struct Inner {
    next_sequence: u64,
    entries: VecDeque<LoggedRecord>,
    seen_keys: std::collections::HashSet<OperationKey>,
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationLog {
    pub fn new() -> Self {
        OperationLog {
            inner: Mutex::new(Inner {
                next_sequence: 1,
                entries: VecDeque::new(),
                seen_keys: std::collections::HashSet::new(),
            }),
        }
    }

    /// `true` if `key` has already been committed — used for duplicate
    /// detection during proposal (§3, §4.6 follower validation).
    pub fn contains_key(&self, key: &OperationKey) -> bool {
        self.inner.lock().expect("log mutex poisoned").seen_keys.contains(key)
    }

    /// Append a committed record, assigning it the next sequence number.
    /// Returns the assigned sequence.
    pub fn append(&self, record: OperationRecord) -> u64 {
        let mut inner = self.inner.lock().expect("log mutex poisoned");
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.seen_keys.insert(record.key.clone());
        inner.entries.push_back(LoggedRecord { sequence, record });
        sequence
    }

    /// The highest assigned sequence number, or 0 if the log is empty.
    pub fn latest_sequence(&self) -> u64 {
        self.inner.lock().expect("log mutex poisoned").next_sequence.saturating_sub(1)
    }

    /// Every committed record with sequence strictly greater than
    /// `last_known`, in ascending order — the replay set for a reconnecting
    /// follower (§4.7).
    pub fn replay_since(&self, last_known: u64) -> Vec<LoggedRecord> {
        self.inner
            .lock()
            .expect("log mutex poisoned")
            .entries
            .iter()
            .filter(|entry| entry.sequence > last_known)
            .cloned()
            .collect()
    }
}
