//! Quorum-vote fan-out engine (§4.5).
//!
//! One subtask per worker in the round-start snapshot. Completions are
//! tallied by normalized class as they arrive; the first class to reach
//! `floor(N/2)+1` wins and every other in-flight subtask is dropped, which
//! closes its socket and is the abort signal a worker observes (§4.2: a
//! worker's injected delay races the peer closing the connection, so
//! dropping the coordinator's end is what collapses it — there is no
//! separate out-of-band abort channel, which also has to work for workers
//! running as a genuinely separate process, not just in-process ones).

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use qrd_core::response::{classify, ConsensusOutcome, ResponseClass};
use qrd_core::wire;

use crate::registry::WorkerSnapshotEntry;

/// Per-call and overall-round deadlines for the quorum engine (§4.1, §5).
#[derive(Debug, Clone, Copy)]
pub struct QuorumConfig {
    pub per_call_timeout: Duration,
    pub round_timeout: Duration,
}

impl Default for QuorumConfig {
    /// Matches §4.1's stated default: 35s per worker call.
    fn default() -> Self {
        QuorumConfig { per_call_timeout: Duration::from_secs(35), round_timeout: Duration::from_secs(40) }
    }
}

pub struct QuorumEngine {
    config: QuorumConfig,
}

impl QuorumEngine {
    pub fn new(config: QuorumConfig) -> Self {
        QuorumEngine { config }
    }

    /// Run one fan-out round against `snapshot` with `request` as the line
    /// sent to every worker. `round_token` lets an external caller (e.g.
    /// coordinator shutdown) cut the round short.
    pub async fn run(
        &self,
        round_id: u64,
        request: &str,
        snapshot: &[WorkerSnapshotEntry],
        round_token: CancellationToken,
    ) -> ConsensusOutcome {
        let n = snapshot.len();
        if n < 3 {
            return ConsensusOutcome::InsufficientWorkers;
        }
        let required_majority = n / 2 + 1;

        let mut subtasks: JoinSet<(u64, Result<String, wire::WireError>)> = JoinSet::new();
        for entry in snapshot {
            let addr = format!("{}:{}", entry.endpoint.host, entry.endpoint.port);
            let request = request.to_string();
            let timeout = self.config.per_call_timeout;
            let worker_id = entry.id;
            subtasks.spawn(async move {
                let result = match addr.parse() {
                    Ok(addr) => wire::call_once(addr, &request, timeout).await,
                    Err(_) => Err(wire::WireError::Protocol(format!("bad worker address: {addr}"))),
                };
                (worker_id, result)
            });
        }

        let mut tally: HashMap<ResponseClass, (usize, String)> = HashMap::new();
        let mut received = 0usize;

        let outcome = tokio::time::timeout(self.config.round_timeout, async {
            loop {
                tokio::select! {
                    biased;
                    _ = round_token.cancelled() => {
                        break None;
                    }
                    joined = subtasks.join_next() => {
                        let Some(joined) = joined else {
                            break Some(ConsensusOutcome::NoConsensus { received, total: n });
                        };
                        let (worker_id, result) = match joined {
                            Ok(pair) => pair,
                            Err(_join_err) => continue,
                        };
                        received += 1;
                        match result {
                            Ok(raw) => {
                                let class = classify(&raw);
                                debug!(round_id, worker_id, %raw, "worker replied");
                                let slot = tally.entry(class.clone()).or_insert_with(|| (0, raw.clone()));
                                slot.0 += 1;
                                if slot.0 >= required_majority {
                                    let (_, first_raw) = slot.clone();
                                    let decision = match class {
                                        ResponseClass::AckSuccess => ConsensusOutcome::ConsensusAck(first_raw),
                                        ResponseClass::ErrorResponse => ConsensusOutcome::ConsensusError(first_raw),
                                        ResponseClass::Other(_) => ConsensusOutcome::ConsensusOther(first_raw),
                                    };
                                    break Some(decision);
                                }
                            }
                            Err(err) => {
                                debug!(round_id, worker_id, error = %err, "worker did not vote");
                            }
                        }
                    }
                }
            }
        })
        .await;

        subtasks.abort_all();

        match outcome {
            Ok(Some(decision)) => {
                info!(round_id, ?decision, received, total = n, "round decided");
                decision
            }
            Ok(None) => ConsensusOutcome::NoConsensus { received, total: n },
            Err(_elapsed) => ConsensusOutcome::CoordinatorTimeout,
        }
    }
}
