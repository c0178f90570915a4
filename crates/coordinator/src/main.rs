//! Coordinator entry point (§4.4, §6): client port, admin port, initial
//! worker fleet, optional replication peers, graceful shutdown.
//!
//! Grounded on `crates/client/src/main.rs`'s `tokio::select!` main loop and
//! `crates/client/src/shutdown.rs`'s two-stage Ctrl+C handling.

mod admin;
mod cli;
mod dispatch;
mod peer;
mod shutdown;
mod workers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use qrd_core::FaultSpec;
use qrd_engine::replication::{PeerLink, ReplicationConfig};
use qrd_engine::{OperationLog, QuorumConfig, QuorumEngine, ReplicaState, ReplicationEngine};

use crate::cli::Cli;
use crate::dispatch::Dispatcher;
use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};
use crate::workers::{WorkerFleet, WorkerFleetConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let initial_fault = FaultSpec::new(
        cli.initial_drop_pct,
        cli.initial_delay_pct,
        cli.initial_wrong_pct,
        cli.initial_delay_min_ms,
        cli.initial_delay_max_ms,
    )
    .context("invalid initial fault configuration")?;

    let fleet = Arc::new(WorkerFleet::new(WorkerFleetConfig {
        host: "127.0.0.1".to_string(),
        base_port: cli.base_worker_port,
        accept_read_timeout: Duration::from_secs(35),
        max_stagger_ms: cli.max_stagger_ms,
        seed: cli.seed,
    }));

    let fleet_size = 2 * cli.k;
    for _ in 0..fleet_size {
        fleet.add_worker(initial_fault).await.context("failed to start initial worker")?;
    }
    info!(fleet_size, "initial worker fleet started");

    let quorum = QuorumEngine::new(QuorumConfig {
        per_call_timeout: Duration::from_millis(cli.per_call_timeout_ms),
        round_timeout: Duration::from_millis(cli.round_timeout_ms),
    });

    let replication = if cli.peers.is_empty() {
        None
    } else {
        let mut peers = Vec::with_capacity(cli.peers.len());
        for (index, peer) in cli.peers.iter().enumerate() {
            let addr: SocketAddr =
                peer.parse().with_context(|| format!("invalid peer address: {peer}"))?;
            peers.push(Arc::new(PeerLink::new(format!("peer-{index}"), addr)));
        }
        Some(Arc::new(ReplicationEngine::new(
            cli.origin_id.clone(),
            peers,
            ReplicationConfig {
                propose_timeout: Duration::from_millis(cli.replication_propose_timeout_ms),
                commit_timeout: Duration::from_millis(cli.replication_commit_timeout_ms),
            },
        )))
    };

    let replica = Arc::new(ReplicaState::new(Arc::new(OperationLog::new())));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&fleet),
        quorum,
        replication,
        Duration::from_millis(cli.round_timeout_ms + cli.per_call_timeout_ms),
    ));

    let root_token = CancellationToken::new();
    let shutdown = ShutdownController::new();
    spawn_ctrl_c_handler(Arc::clone(&shutdown));

    let client_listener = TcpListener::bind(("127.0.0.1", cli.client_port))
        .await
        .with_context(|| format!("failed to bind client port {}", cli.client_port))?;
    let admin_listener = TcpListener::bind(("127.0.0.1", cli.admin_port))
        .await
        .with_context(|| format!("failed to bind admin port {}", cli.admin_port))?;
    let peer_listener = TcpListener::bind(("127.0.0.1", cli.replication_port))
        .await
        .with_context(|| format!("failed to bind replication port {}", cli.replication_port))?;
    info!(
        client_addr = %client_listener.local_addr()?,
        admin_addr = %admin_listener.local_addr()?,
        peer_addr = %peer_listener.local_addr()?,
        "coordinator listening"
    );

    let client_task = tokio::spawn(run_client_accept_loop(
        client_listener,
        dispatcher,
        root_token.clone(),
        shutdown.subscribe(),
    ));
    let admin_task =
        tokio::spawn(run_admin_accept_loop(admin_listener, Arc::clone(&fleet), root_token.clone()));
    let peer_task =
        tokio::spawn(run_peer_accept_loop(peer_listener, Arc::clone(&replica), root_token.clone()));

    let mut events = shutdown.subscribe();
    loop {
        match events.recv().await {
            Ok(ShutdownEvent::Graceful) => {
                info!("graceful shutdown requested, draining outstanding rounds");
            }
            Ok(ShutdownEvent::Immediate) => {
                warn!("immediate shutdown requested");
                root_token.cancel();
                break;
            }
            Err(_) => break,
        }
    }

    let _ = client_task.await;
    root_token.cancel();
    admin_task.abort();
    peer_task.abort();
    fleet.shutdown_all().await;
    info!("coordinator stopped");
    Ok(())
}

async fn run_client_accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    root_token: CancellationToken,
    mut shutdown_events: tokio::sync::broadcast::Receiver<ShutdownEvent>,
) {
    let mut connections: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            event = shutdown_events.recv() => {
                if matches!(event, Ok(ShutdownEvent::Graceful) | Err(_)) {
                    break;
                }
            }
            _ = root_token.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let dispatcher = Arc::clone(&dispatcher);
                        let round_token = root_token.child_token();
                        connections.spawn(async move {
                            dispatcher.handle_connection(stream, round_token).await;
                        });
                    }
                    Err(err) => warn!(error = %err, "client accept failed"),
                }
            }
        }
    }
    while connections.join_next().await.is_some() {}
}

async fn run_peer_accept_loop(listener: TcpListener, replica: Arc<ReplicaState>, root_token: CancellationToken) {
    let mut connections: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            _ = root_token.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let replica = Arc::clone(&replica);
                        connections.spawn(async move {
                            peer::handle_peer_connection(stream, replica).await;
                        });
                    }
                    Err(err) => warn!(error = %err, "peer accept failed"),
                }
            }
        }
    }
    while connections.join_next().await.is_some() {}
}

async fn run_admin_accept_loop(listener: TcpListener, fleet: Arc<WorkerFleet>, root_token: CancellationToken) {
    let mut connections: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            _ = root_token.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let fleet = Arc::clone(&fleet);
                        connections.spawn(async move {
                            admin::handle_admin_connection(stream, fleet).await;
                        });
                    }
                    Err(err) => warn!(error = %err, "admin accept failed"),
                }
            }
        }
    }
    while connections.join_next().await.is_some() {}
}
