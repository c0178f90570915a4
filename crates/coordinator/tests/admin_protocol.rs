//! End-to-end coverage of the admin port protocol (§4.4.2, §6):
//! `ADD_WORKER` / `REMOVE_WORKER` / `LIST_WORKERS`, success and error paths.
//! Each test binds a real `127.0.0.1:0` listener and drives
//! `handle_admin_connection` over an actual `TcpStream`.
//!
//! An integration test binary only exercises the subset of the package's
//! dependencies its own scenarios need, not the full set `main.rs` uses.
#![allow(unused_crate_dependencies)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use qrd_core::FaultSpec;
use qrd_coordinator::admin::handle_admin_connection;
use qrd_coordinator::workers::{WorkerFleet, WorkerFleetConfig};

/// `WorkerFleet` derives each worker's port as `base_port + id`, so tests
/// that actually bind a worker need a run of contiguous free ports.
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

fn new_fleet(base_port: u16) -> Arc<WorkerFleet> {
    Arc::new(WorkerFleet::new(WorkerFleetConfig {
        host: "127.0.0.1".to_string(),
        base_port,
        accept_read_timeout: Duration::from_secs(5),
        max_stagger_ms: 0,
        seed: Some(1),
    }))
}

/// Sends one admin command line and returns the reply line.
async fn send_admin_command(fleet: Arc<WorkerFleet>, command: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _peer) = listener.accept().await.unwrap();
        handle_admin_connection(stream, fleet).await;
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(format!("{command}\n").as_bytes()).await.unwrap();
    let mut reader = BufReader::new(client);
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("admin connection did not reply in time")
        .unwrap();
    server.await.unwrap();
    line.trim_end().to_string()
}

#[tokio::test]
async fn add_worker_starts_and_registers_a_new_worker() {
    let base_port = contiguous_free_port_run(1).await - 1;
    let fleet = new_fleet(base_port);
    let reply = send_admin_command(Arc::clone(&fleet), "ADD_WORKER 0 0 0 0 0").await;
    assert_eq!(reply, "ADDED_WORKER_1");
    assert_eq!(fleet.len(), 1);
    fleet.shutdown_all().await;
}

#[tokio::test]
async fn add_worker_rejects_an_out_of_range_fault_rate() {
    let fleet = new_fleet(0);
    let reply = send_admin_command(Arc::clone(&fleet), "ADD_WORKER 150 0 0 0 0").await;
    assert!(reply.starts_with("ERROR_INVALID_FAULT_SPEC_"), "unexpected reply: {reply}");
    assert_eq!(fleet.len(), 0);
}

#[tokio::test]
async fn add_worker_rejects_a_malformed_command() {
    let fleet = new_fleet(0);
    let reply = send_admin_command(Arc::clone(&fleet), "ADD_WORKER not enough args").await;
    assert_eq!(reply, "ERROR_MALFORMED_ADD_WORKER");
    assert_eq!(fleet.len(), 0);
}

#[tokio::test]
async fn remove_worker_removes_a_known_worker() {
    let base_port = contiguous_free_port_run(1).await - 1;
    let fleet = new_fleet(base_port);
    let id = fleet.add_worker(FaultSpec::none()).await.unwrap();
    let reply = send_admin_command(Arc::clone(&fleet), &format!("REMOVE_WORKER {id}")).await;
    assert_eq!(reply, format!("REMOVED_WORKER_{id}"));
    assert_eq!(fleet.len(), 0);
}

#[tokio::test]
async fn remove_worker_reports_an_unknown_worker() {
    let fleet = new_fleet(0);
    let reply = send_admin_command(Arc::clone(&fleet), "REMOVE_WORKER 999").await;
    assert_eq!(reply, "ERROR_UNKNOWN_WORKER");
}

#[tokio::test]
async fn remove_worker_rejects_a_malformed_id() {
    let fleet = new_fleet(0);
    let reply = send_admin_command(Arc::clone(&fleet), "REMOVE_WORKER not-a-number").await;
    assert_eq!(reply, "ERROR_MALFORMED_REMOVE_WORKER");
}

#[tokio::test]
async fn list_workers_is_empty_with_no_workers() {
    let fleet = new_fleet(0);
    let reply = send_admin_command(Arc::clone(&fleet), "LIST_WORKERS").await;
    assert_eq!(reply, "");
}

#[tokio::test]
async fn list_workers_reports_comma_separated_ascending_ids() {
    let base_port = contiguous_free_port_run(2).await - 1;
    let fleet = new_fleet(base_port);
    fleet.add_worker(FaultSpec::none()).await.unwrap();
    fleet.add_worker(FaultSpec::none()).await.unwrap();
    let reply = send_admin_command(Arc::clone(&fleet), "LIST_WORKERS").await;
    assert_eq!(reply, "1,2");
    fleet.shutdown_all().await;
}

#[tokio::test]
async fn unknown_command_reports_an_error() {
    let fleet = new_fleet(0);
    let reply = send_admin_command(fleet, "FROBNICATE").await;
    assert_eq!(reply, "ERROR_UNKNOWN_COMMAND_FROBNICATE");
}
