//! Client-port dispatcher: one request line in, one response line out
//! (§4.4). Routes `WRITE <target> <opcode> <payload...>` to the replication
//! engine (§4.4.1); everything else to the quorum engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use qrd_core::operation::Opcode;
use qrd_core::wire;
use qrd_engine::{QuorumEngine, ReplicationEngine};

use crate::workers::WorkerFleet;

pub struct Dispatcher {
    pub fleet: Arc<WorkerFleet>,
    pub quorum: QuorumEngine,
    pub replication: Option<Arc<ReplicationEngine>>,
    pub client_read_timeout: Duration,
    next_round_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        fleet: Arc<WorkerFleet>,
        quorum: QuorumEngine,
        replication: Option<Arc<ReplicationEngine>>,
        client_read_timeout: Duration,
    ) -> Self {
        Dispatcher { fleet, quorum, replication, client_read_timeout, next_round_id: AtomicU64::new(1) }
    }

    /// Handle one client connection end to end: read one line, run a round,
    /// write exactly one reply, close (§4.4, §3 invariant 1).
    pub async fn handle_connection(&self, stream: TcpStream, round_token: CancellationToken) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let request = match wire::read_line_with_timeout(&mut reader, self.client_read_timeout).await {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "client request read failed");
                return;
            }
        };

        let reply = self.route(&request, round_token).await;
        let Some(reply) = reply else {
            // `N = 0`: dispatcher closes without reply (§4.4, §8 boundary case).
            return;
        };

        if let Err(err) = wire::write_line(&mut write_half, &reply).await {
            warn!(error = %err, "client reply write failed");
        }
        let _ = write_half.shutdown().await;
    }

    async fn route(&self, request: &str, round_token: CancellationToken) -> Option<String> {
        if let Some(rest) = request.strip_prefix("WRITE ") {
            return Some(self.route_write(rest).await);
        }
        self.route_read(request, round_token).await
    }

    /// `None` means "close without reply" — the `N = 0` boundary case (§4.4, §8).
    async fn route_read(&self, request: &str, round_token: CancellationToken) -> Option<String> {
        let snapshot = self.fleet.snapshot();
        if snapshot.is_empty() {
            return None;
        }
        if snapshot.len() < 3 {
            return Some("ERROR_INSUFFICIENT_WORKERS".to_string());
        }
        let round_id = self.next_round_id.fetch_add(1, Ordering::SeqCst);
        info!(round_id, workers = snapshot.len(), "starting quorum round");
        let outcome = self.quorum.run(round_id, request, &snapshot, round_token).await;
        Some(outcome.to_client_line())
    }

    async fn route_write(&self, rest: &str) -> String {
        let Some(engine) = &self.replication else {
            return "ERROR_REPLICATION_DISABLED".to_string();
        };
        let mut parts = rest.splitn(3, ' ');
        let (Some(target), Some(opcode_token)) = (parts.next(), parts.next()) else {
            return "ERROR_MALFORMED_WRITE".to_string();
        };
        let payload = parts.next().unwrap_or("");
        let opcode = match opcode_token {
            "PUT" => Opcode::Put,
            "DELETE" => Opcode::Delete,
            other => return format!("ERROR_UNKNOWN_OPCODE_{other}"),
        };
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        match engine.replicate(target, opcode, payload, timestamp).await {
            Ok(record) => format!("ACK_COMMITTED_{}", record.key),
            Err(err) => format!("ERROR_REPLICATION_{err}").replace(' ', "_"),
        }
    }
}
