//! Follower side of the replication channel (§4.6 "Follower side", §4.7
//! "Operation log and replay"): accepts persistent inbound connections from
//! other coordinators acting as replication origins, applies their
//! propose/commit/abort traffic against local [`ReplicaState`], and serves
//! `REPLAY_REQUEST` catch-up for a rejoining peer on the same connection —
//! replay and live commits share one channel, so once caught up a follower
//! just keeps reading the connection it replayed on.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::warn;

use qrd_core::operation::{OperationKey, OperationRecord};
use qrd_core::wire;
use qrd_engine::ReplicaState;

/// No single call has a deadline shorter than this on an otherwise idle
/// persistent connection; only the read itself is bounded, to notice a dead peer.
const PEER_IDLE_READ_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn handle_peer_connection(stream: TcpStream, replica: Arc<ReplicaState>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let line = match wire::read_line_with_timeout(&mut reader, PEER_IDLE_READ_TIMEOUT).await {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "peer connection closed");
                return;
            }
        };

        if let Some(rest) = line.strip_prefix("REPLAY_REQUEST|") {
            if let Err(err) = send_replay(&mut write_half, &replica, rest).await {
                warn!(error = %err, "replay send failed");
                return;
            }
            continue;
        }

        let Some(reply) = handle_line(&line, &replica) else { continue };
        if let Err(err) = wire::write_line(&mut write_half, &reply).await {
            warn!(error = %err, "peer reply write failed");
            return;
        }
    }
}

/// Returns `None` for `OPERATION_ABORT` (fire-and-forget, no reply per §4.6).
/// `REPLAY_REQUEST` is intercepted by the caller before this is reached.
fn handle_line(line: &str, replica: &ReplicaState) -> Option<String> {
    if let Some(payload) = line.strip_prefix("OPERATION_PROPOSAL|") {
        return Some(handle_proposal(payload, replica));
    }
    if let Some(key_str) = line.strip_prefix("OPERATION_COMMIT|") {
        return Some(handle_commit(key_str, replica));
    }
    if let Some(key_str) = line.strip_prefix("OPERATION_ABORT|") {
        handle_abort(key_str, replica);
        return None;
    }
    Some(format!("OPERATION_REJECTED|unrecognized message: {line}").replace(' ', "_"))
}

fn handle_proposal(payload: &str, replica: &ReplicaState) -> String {
    let record = match OperationRecord::decode_line(payload) {
        Ok(record) => record,
        Err(err) => return format!("OPERATION_REJECTED|malformed record: {err}").replace(' ', "_"),
    };
    let key = record.key.clone();
    match replica.propose(record) {
        Ok(()) => format!("OPERATION_ACCEPTED|{key}"),
        Err(reason) => format!("OPERATION_REJECTED|{reason}").replace(' ', "_"),
    }
}

fn handle_commit(key_str: &str, replica: &ReplicaState) -> String {
    let Ok(key) = key_str.parse::<OperationKey>() else {
        return format!("OPERATION_FAILED|malformed key: {key_str}").replace(' ', "_");
    };
    match replica.commit(&key) {
        Ok(_sequence) => format!("OPERATION_COMMITTED|{key}"),
        Err(_reason) => format!("OPERATION_FAILED|{key}"),
    }
}

fn handle_abort(key_str: &str, replica: &ReplicaState) {
    if let Ok(key) = key_str.parse::<OperationKey>() {
        replica.abort(&key);
    }
}

async fn send_replay(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    replica: &ReplicaState,
    last_known_str: &str,
) -> std::io::Result<()> {
    let last_known: u64 = last_known_str.trim().parse().unwrap_or(0);
    for entry in replica.replay_since(last_known) {
        let line = format!("REPLAY_RECORD|{}|{}", entry.sequence, entry.record.encode_line());
        wire::write_line(write_half, &line).await?;
    }
    wire::write_line(write_half, "REPLAY_DONE").await?;
    write_half.flush().await
}
