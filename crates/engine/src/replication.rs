//! Origin-side two-phase replication engine (§4.6).
//!
//! Propose fans out to every peer in parallel; only on strict unanimity does
//! the engine move to commit. A rejection, a timeout, or the overall
//! deadline elapsing triggers a fire-and-forget abort to every peer and a
//! single failure outcome to the caller (§7 item 5: "no partial commit is
//! surfaced").

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use qrd_core::operation::{Opcode, OperationKey, OperationRecord};
use qrd_core::wire::{self, WireError};

/// Which phase a [`ReplicationError`] occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationPhase {
    Propose,
    Commit,
}

/// The boolean-like outcome from §7 item 5, with typed detail for logging.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("peer {peer} rejected the operation: {reason}")]
    Rejected { peer: String, reason: String },
    #[error("peer {peer} timed out during {phase:?}")]
    Timeout { peer: String, phase: ReplicationPhase },
    #[error("peer {peer} was unreachable")]
    PeerUnreachable { peer: String },
    #[error("peer {peer} sent a malformed reply: {detail}")]
    MalformedReply { peer: String, detail: String },
}

/// A persistent outbound connection to one peer replica (§4.6: "each is a
/// persistent outbound connection"). Calls are serialized per peer — this
/// engine never pipelines two in-flight requests on the same connection, so
/// operation keys stay in per-origin total order (§5).
pub struct PeerLink {
    pub peer_id: String,
    addr: SocketAddr,
    conn: AsyncMutex<Option<(BufReader<OwnedReadHalf>, OwnedWriteHalf)>>,
}

impl PeerLink {
    pub fn new(peer_id: impl Into<String>, addr: SocketAddr) -> Self {
        PeerLink { peer_id: peer_id.into(), addr, conn: AsyncMutex::new(None) }
    }

    async fn round_trip(&self, line: &str, timeout: Duration) -> Result<String, WireError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let stream = wire::connect_with_timeout(self.addr, timeout).await?;
            let (read_half, write_half) = stream.into_split();
            *guard = Some((BufReader::new(read_half), write_half));
        }
        let (reader, writer) = guard.as_mut().expect("just populated");

        if let Err(err) = wire::write_line(writer, line).await {
            *guard = None;
            return Err(WireError::Unreachable(err));
        }
        match wire::read_line_with_timeout(reader, timeout).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                *guard = None;
                Err(err)
            }
        }
    }
}

fn map_transport_error(peer: &str, phase: ReplicationPhase, err: WireError) -> ReplicationError {
    match err {
        WireError::Timeout => ReplicationError::Timeout { peer: peer.to_string(), phase },
        WireError::Unreachable(_) | WireError::Dropped => {
            ReplicationError::PeerUnreachable { peer: peer.to_string() }
        }
        WireError::Protocol(detail) => ReplicationError::MalformedReply { peer: peer.to_string(), detail },
    }
}

/// Per-phase deadlines (§4.1: 15s default for the replication engine).
#[derive(Debug, Clone, Copy)]
pub struct ReplicationConfig {
    pub propose_timeout: Duration,
    pub commit_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig { propose_timeout: Duration::from_secs(15), commit_timeout: Duration::from_secs(15) }
    }
}

/// Drives propose/commit/abort against a fixed set of peers for one origin.
pub struct ReplicationEngine {
    origin_id: String,
    counter: AtomicU64,
    peers: Vec<Arc<PeerLink>>,
    config: ReplicationConfig,
}

impl ReplicationEngine {
    /// `origin_id` must be unique across the cluster (§9.1 Open Question
    /// decision: operator-assigned origin ids are required to be globally
    /// unique; this engine does not add a process-unique nonce on top).
    pub fn new(origin_id: impl Into<String>, peers: Vec<Arc<PeerLink>>, config: ReplicationConfig) -> Self {
        ReplicationEngine { origin_id: origin_id.into(), counter: AtomicU64::new(1), peers, config }
    }

    fn next_key(&self) -> OperationKey {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        OperationKey::new(self.origin_id.clone(), counter)
    }

    /// Replicate one mutation to unanimity. On success, every peer has
    /// committed; on error, every peer has been sent (or attempted) an abort
    /// and none has applied the operation.
    pub async fn replicate(
        &self,
        target: &str,
        opcode: Opcode,
        content: &str,
        timestamp: u64,
    ) -> Result<OperationRecord, ReplicationError> {
        let record = OperationRecord {
            key: self.next_key(),
            target: target.to_string(),
            opcode,
            content: content.to_string(),
            origin: self.origin_id.clone(),
            timestamp,
        };

        if let Err(err) = self.propose(&record).await {
            self.abort(&record.key).await;
            return Err(err);
        }

        if let Err(err) = self.commit(&record.key).await {
            return Err(err);
        }

        info!(operation_key = %record.key, "replication unanimous commit");
        Ok(record)
    }

    async fn propose(&self, record: &OperationRecord) -> Result<(), ReplicationError> {
        let line = format!("OPERATION_PROPOSAL|{}", record.encode_line());
        let mut calls: JoinSet<(String, Result<String, WireError>)> = JoinSet::new();
        for peer in &self.peers {
            let peer = Arc::clone(peer);
            let line = line.clone();
            let timeout = self.config.propose_timeout;
            calls.spawn(async move {
                let result = peer.round_trip(&line, timeout).await;
                (peer.peer_id.clone(), result)
            });
        }

        // Drain every subtask before deciding, same as abort()'s drain below —
        // an early return here would drop `calls` and abort-via-cancel any
        // sibling still awaiting its reply, leaving that reply unread on a
        // `PeerLink` connection this engine reuses for every later call.
        let mut outcome: Result<(), ReplicationError> = Ok(());
        while let Some(joined) = calls.join_next().await {
            let (peer_id, result) = joined.expect("propose subtask panicked");
            let verdict = result
                .map_err(|err| map_transport_error(&peer_id, ReplicationPhase::Propose, err))
                .and_then(|reply| {
                    if let Some(reason) = reply.strip_prefix("OPERATION_REJECTED|") {
                        Err(ReplicationError::Rejected { peer: peer_id.clone(), reason: reason.to_string() })
                    } else if !reply.starts_with("OPERATION_ACCEPTED|") {
                        Err(ReplicationError::MalformedReply { peer: peer_id.clone(), detail: reply })
                    } else {
                        Ok(())
                    }
                });
            if outcome.is_ok() {
                outcome = verdict;
            }
        }
        outcome
    }

    async fn commit(&self, key: &OperationKey) -> Result<(), ReplicationError> {
        let line = format!("OPERATION_COMMIT|{key}");
        let mut calls: JoinSet<(String, Result<String, WireError>)> = JoinSet::new();
        for peer in &self.peers {
            let peer = Arc::clone(peer);
            let line = line.clone();
            let timeout = self.config.commit_timeout;
            calls.spawn(async move {
                let result = peer.round_trip(&line, timeout).await;
                (peer.peer_id.clone(), result)
            });
        }

        // Same full-drain discipline as propose(): never return while a
        // sibling subtask may still be mid-flight on a reused connection.
        let mut outcome: Result<(), ReplicationError> = Ok(());
        while let Some(joined) = calls.join_next().await {
            let (peer_id, result) = joined.expect("commit subtask panicked");
            let verdict = result
                .map_err(|err| map_transport_error(&peer_id, ReplicationPhase::Commit, err))
                .and_then(|reply| {
                    if let Some(reason) = reply.strip_prefix("OPERATION_FAILED|") {
                        Err(ReplicationError::Rejected { peer: peer_id.clone(), reason: reason.to_string() })
                    } else if !reply.starts_with("OPERATION_COMMITTED|") {
                        Err(ReplicationError::MalformedReply { peer: peer_id.clone(), detail: reply })
                    } else {
                        Ok(())
                    }
                });
            if outcome.is_ok() {
                outcome = verdict;
            }
        }
        outcome
    }

    /// Fire-and-forget abort to every peer (§4.6 step 5). Best-effort: a
    /// peer that cannot be reached simply never sees it, same as any other
    /// dropped message in this protocol.
    async fn abort(&self, key: &OperationKey) {
        let line = format!("OPERATION_ABORT|{key}");
        let mut calls: JoinSet<()> = JoinSet::new();
        for peer in &self.peers {
            let peer = Arc::clone(peer);
            let line = line.clone();
            let timeout = self.config.commit_timeout;
            calls.spawn(async move {
                if let Err(err) = peer.round_trip(&line, timeout).await {
                    warn!(peer = %peer.peer_id, error = %err, "abort delivery failed");
                }
            });
        }
        while calls.join_next().await.is_some() {}
    }
}
