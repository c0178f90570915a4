//! End-to-end coverage of the client dispatcher's routing decisions (§4.4,
//! §8): the `N = 0` / insufficient-workers boundary cases on the read path,
//! and `WRITE `-prefix routing to the replication engine on the write path.
//! Every test binds a real `127.0.0.1:0` listener and drives it over an
//! actual `TcpStream`, the same way a client would.
//!
//! An integration test binary only exercises the subset of the package's
//! dependencies its own scenarios need, not the full set `main.rs` uses.
#![allow(unused_crate_dependencies)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use qrd_core::FaultSpec;
use qrd_coordinator::dispatch::Dispatcher;
use qrd_coordinator::workers::{WorkerFleet, WorkerFleetConfig};
use qrd_engine::replication::{PeerLink, ReplicationConfig};
use qrd_engine::{QuorumConfig, QuorumEngine, ReplicationEngine};

/// `WorkerFleet` derives each worker's port as `base_port + id` rather than
/// letting the OS assign one per worker, so tests need a run of `count`
/// contiguous free ports up front. Ephemeral ports are handed out
/// sequentially on the same host in practice, so a handful of probe rounds
/// is enough.
async fn contiguous_free_port_run(count: u16) -> u16 {
    for _ in 0..25 {
        let mut listeners = Vec::with_capacity(count as usize);
        let mut ports = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            ports.push(listener.local_addr().unwrap().port());
            listeners.push(listener);
        }
        drop(listeners);
        ports.sort_unstable();
        if ports.windows(2).all(|pair| pair[1] == pair[0] + 1) {
            return ports[0];
        }
    }
    panic!("could not find a contiguous run of {count} free ports");
}

async fn build_fleet(worker_count: u32) -> Arc<WorkerFleet> {
    let base_port = if worker_count == 0 {
        0
    } else {
        contiguous_free_port_run(worker_count as u16).await - 1
    };
    let fleet = Arc::new(WorkerFleet::new(WorkerFleetConfig {
        host: "127.0.0.1".to_string(),
        base_port,
        accept_read_timeout: Duration::from_secs(5),
        max_stagger_ms: 0,
        seed: Some(1),
    }));
    for _ in 0..worker_count {
        fleet.add_worker(FaultSpec::none()).await.unwrap();
    }
    fleet
}

fn build_dispatcher(fleet: Arc<WorkerFleet>, replication: Option<Arc<ReplicationEngine>>) -> Arc<Dispatcher> {
    let quorum =
        QuorumEngine::new(QuorumConfig { per_call_timeout: Duration::from_secs(2), round_timeout: Duration::from_secs(3) });
    Arc::new(Dispatcher::new(fleet, quorum, replication, Duration::from_secs(2)))
}

/// Sends one request line through a dispatcher over a real socket and
/// returns the reply line, or `None` if the connection closed without one
/// (the `N = 0` boundary case).
async fn send_request(dispatcher: Arc<Dispatcher>, request: &str) -> Option<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _peer) = listener.accept().await.unwrap();
        dispatcher.handle_connection(stream, CancellationToken::new()).await;
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(format!("{request}\n").as_bytes()).await.unwrap();
    let mut reader = BufReader::new(client);
    let mut line = String::new();
    let n = tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("dispatcher did not respond in time")
        .unwrap();
    server.await.unwrap();
    if n == 0 {
        None
    } else {
        Some(line.trim_end().to_string())
    }
}

async fn spawn_compliant_replication_peer() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _peer) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                return;
            }
            let line = line.trim_end();
            if let Some(payload) = line.strip_prefix("OPERATION_PROPOSAL|") {
                let key = payload.split('|').next().unwrap();
                write_half.write_all(format!("OPERATION_ACCEPTED|{key}\n").as_bytes()).await.unwrap();
            } else if let Some(key) = line.strip_prefix("OPERATION_COMMIT|") {
                write_half.write_all(format!("OPERATION_COMMITTED|{key}\n").as_bytes()).await.unwrap();
            }
        }
    });
    addr
}

#[tokio::test]
async fn zero_workers_closes_the_connection_without_a_reply() {
    let fleet = build_fleet(0).await;
    let dispatcher = build_dispatcher(fleet, None);
    let reply = send_request(dispatcher, "REQ_1").await;
    assert_eq!(reply, None);
}

#[tokio::test]
async fn one_worker_is_below_the_insufficient_workers_threshold() {
    let fleet = build_fleet(1).await;
    let dispatcher = build_dispatcher(fleet, None);
    let reply = send_request(dispatcher, "REQ_1").await;
    assert_eq!(reply, Some("ERROR_INSUFFICIENT_WORKERS".to_string()));
}

#[tokio::test]
async fn two_workers_is_still_below_the_insufficient_workers_threshold() {
    let fleet = build_fleet(2).await;
    let dispatcher = build_dispatcher(fleet, None);
    let reply = send_request(dispatcher, "REQ_1").await;
    assert_eq!(reply, Some("ERROR_INSUFFICIENT_WORKERS".to_string()));
}

#[tokio::test]
async fn three_healthy_workers_reach_quorum_and_reply_with_an_ack() {
    let fleet = build_fleet(3).await;
    let dispatcher = build_dispatcher(fleet, None);
    let reply = send_request(dispatcher, "REQ_1").await.expect("expected a reply");
    assert!(reply.starts_with("ACK_W"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn write_prefixed_request_without_replication_configured_is_rejected() {
    let fleet = build_fleet(0).await;
    let dispatcher = build_dispatcher(fleet, None);
    let reply = send_request(dispatcher, "WRITE mykey PUT hello").await.expect("expected a reply");
    assert_eq!(reply, "ERROR_REPLICATION_DISABLED");
}

#[tokio::test]
async fn write_prefixed_request_commits_through_the_replication_engine() {
    let peer_addr = spawn_compliant_replication_peer().await;
    let replication = Arc::new(ReplicationEngine::new(
        "origin-test",
        vec![Arc::new(PeerLink::new("peer-0", peer_addr))],
        ReplicationConfig::default(),
    ));
    let fleet = build_fleet(0).await;
    let dispatcher = build_dispatcher(fleet, Some(replication));
    let reply = send_request(dispatcher, "WRITE mykey PUT hello").await.expect("expected a reply");
    assert!(reply.starts_with("ACK_COMMITTED_"), "unexpected reply: {reply}");
}

#[tokio::test]
async fn write_with_an_unknown_opcode_is_rejected_before_replication() {
    let peer_addr = spawn_compliant_replication_peer().await;
    let replication = Arc::new(ReplicationEngine::new(
        "origin-test",
        vec![Arc::new(PeerLink::new("peer-0", peer_addr))],
        ReplicationConfig::default(),
    ));
    let fleet = build_fleet(0).await;
    let dispatcher = build_dispatcher(fleet, Some(replication));
    let reply = send_request(dispatcher, "WRITE mykey PATCH hello").await.expect("expected a reply");
    assert_eq!(reply, "ERROR_UNKNOWN_OPCODE_PATCH");
}

#[tokio::test]
async fn a_request_line_not_prefixed_with_write_always_takes_the_quorum_path() {
    // Even with replication configured, anything not starting with `WRITE `
    // goes to the quorum engine (§4.4.1).
    let peer_addr = spawn_compliant_replication_peer().await;
    let replication = Arc::new(ReplicationEngine::new(
        "origin-test",
        vec![Arc::new(PeerLink::new("peer-0", peer_addr))],
        ReplicationConfig::default(),
    ));
    let fleet = build_fleet(3).await;
    let dispatcher = build_dispatcher(fleet, Some(replication));
    let reply = send_request(dispatcher, "REQ_1").await.expect("expected a reply");
    assert!(reply.starts_with("ACK_W"), "unexpected reply: {reply}");
}
