//! Standalone worker-replica process (§2.1): the same runtime the
//! coordinator spawns in-process, pointed at a real port so it can run as a
//! genuinely separate OS process.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use qrd_worker::{WorkerRuntime, WorkerRuntimeConfig};
use qrd_core::FaultSpec;

/// Run one quorum/replication worker replica.
#[derive(Parser, Debug)]
#[command(name = "qrd-worker", about = "Quorum/replication worker replica")]
struct Cli {
    /// Worker id reported in ACK replies (`ACK_W<id>_<request>`).
    #[arg(long, env = "QRD_WORKER_ID")]
    id: u64,

    /// Address to listen on.
    #[arg(long, env = "QRD_WORKER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "QRD_WORKER_PORT")]
    port: u16,

    /// Percent chance (0-100) of dropping a connection without replying.
    #[arg(long, env = "QRD_WORKER_DROP_PCT", default_value_t = 0)]
    drop_pct: u8,

    /// Percent chance (0-100) of sleeping before replying.
    #[arg(long, env = "QRD_WORKER_DELAY_PCT", default_value_t = 0)]
    delay_pct: u8,

    /// Percent chance (0-100) of replying with a wrong/lying line.
    #[arg(long, env = "QRD_WORKER_WRONG_PCT", default_value_t = 0)]
    wrong_pct: u8,

    /// Minimum injected delay in milliseconds.
    #[arg(long, env = "QRD_WORKER_DELAY_MIN_MS", default_value_t = 0)]
    delay_min_ms: u64,

    /// Maximum injected delay in milliseconds.
    #[arg(long, env = "QRD_WORKER_DELAY_MAX_MS", default_value_t = 0)]
    delay_max_ms: u64,

    /// How long to wait for the request line before closing.
    #[arg(long, env = "QRD_WORKER_ACCEPT_TIMEOUT_MS", default_value_t = 5_000)]
    accept_read_timeout_ms: u64,

    /// Upper bound of the per-worker randomized delay stagger (§4.3).
    #[arg(long, env = "QRD_WORKER_MAX_STAGGER_MS", default_value_t = 50)]
    max_stagger_ms: u64,

    /// Seed the fault RNG for reproducible runs instead of OS entropy.
    #[arg(long, env = "QRD_WORKER_SEED")]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let fault = FaultSpec::new(cli.drop_pct, cli.delay_pct, cli.wrong_pct, cli.delay_min_ms, cli.delay_max_ms)
        .context("invalid fault configuration")?;

    let worker = WorkerRuntime::bind(
        WorkerRuntimeConfig {
            id: cli.id,
            host: cli.host.clone(),
            port: cli.port,
            accept_read_timeout: Duration::from_millis(cli.accept_read_timeout_ms),
            max_stagger_ms: cli.max_stagger_ms,
            seed: cli.seed,
        },
        fault,
    )
    .await
    .with_context(|| format!("failed to bind worker on {}:{}", cli.host, cli.port))?;

    tracing::info!(worker_id = cli.id, addr = %worker.local_addr, "worker running, ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!(worker_id = cli.id, "shutdown requested");
    worker.shutdown().await;
    Ok(())
}
