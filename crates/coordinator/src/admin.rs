//! Admin port: worker membership (§4.4.2, §6).
//!
//! `ADD_WORKER <drop> <delay> <wrong> <min_ms> <max_ms>` → `ADDED_WORKER_<id>`
//! `REMOVE_WORKER <id>` → `REMOVED_WORKER_<id>` | `ERROR_UNKNOWN_WORKER`
//! `LIST_WORKERS` → comma-separated ids, empty line if none

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::warn;

use qrd_core::{FaultSpec, WorkerId};
use qrd_core::wire;

use crate::workers::WorkerFleet;

pub async fn handle_admin_connection(stream: TcpStream, fleet: Arc<WorkerFleet>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let line = match wire::read_line_with_timeout(&mut reader, std::time::Duration::from_secs(30)).await {
        Ok(line) => line,
        Err(err) => {
            warn!(error = %err, "admin request read failed");
            return;
        }
    };

    let reply = handle_command(&line, &fleet).await;
    if let Err(err) = wire::write_line(&mut write_half, &reply).await {
        warn!(error = %err, "admin reply write failed");
    }
    let _ = write_half.shutdown().await;
}

async fn handle_command(line: &str, fleet: &WorkerFleet) -> String {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("ADD_WORKER") => add_worker(parts, fleet).await,
        Some("REMOVE_WORKER") => remove_worker(parts, fleet).await,
        Some("LIST_WORKERS") => fleet.list_ids_line(),
        _ => format!("ERROR_UNKNOWN_COMMAND_{line}").replace(' ', "_"),
    }
}

async fn add_worker<'a>(mut parts: impl Iterator<Item = &'a str>, fleet: &WorkerFleet) -> String {
    let parsed: Option<(u8, u8, u8, u64, u64)> = (|| {
        Some((
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
        ))
    })();
    let Some((drop_pct, delay_pct, wrong_pct, delay_min_ms, delay_max_ms)) = parsed else {
        return "ERROR_MALFORMED_ADD_WORKER".to_string();
    };
    let fault = match FaultSpec::new(drop_pct, delay_pct, wrong_pct, delay_min_ms, delay_max_ms) {
        Ok(fault) => fault,
        Err(err) => return format!("ERROR_INVALID_FAULT_SPEC_{err}").replace(' ', "_"),
    };
    match fleet.add_worker(fault).await {
        Ok(id) => format!("ADDED_WORKER_{id}"),
        Err(err) => format!("ERROR_ADD_WORKER_FAILED_{err}").replace(' ', "_"),
    }
}

async fn remove_worker<'a>(mut parts: impl Iterator<Item = &'a str>, fleet: &WorkerFleet) -> String {
    let Some(id) = parts.next().and_then(|token| token.parse::<WorkerId>().ok()) else {
        return "ERROR_MALFORMED_REMOVE_WORKER".to_string();
    };
    if fleet.remove_worker(id).await {
        format!("REMOVED_WORKER_{id}")
    } else {
        "ERROR_UNKNOWN_WORKER".to_string()
    }
}
