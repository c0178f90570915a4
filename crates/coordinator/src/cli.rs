//! Operator-facing configuration (§6 "Configuration"), grounded on
//! `crates/client/src/cli.rs`'s `clap::Parser` derive with `env` fallbacks.

use clap::Parser;

/// Quorum-vote / active-replication coordinator.
#[derive(Parser, Debug)]
#[command(name = "qrd-coordinator", about = "Fault-tolerant quorum + replication coordinator")]
pub struct Cli {
    /// Client-facing port (§6 "Coordinator client port").
    #[arg(long, env = "QRD_CLIENT_PORT", default_value_t = 8080)]
    pub client_port: u16,

    /// Operator worker-membership port (§4.4.2 "Admin port").
    #[arg(long, env = "QRD_ADMIN_PORT", default_value_t = 8099)]
    pub admin_port: u16,

    /// First port used for coordinator-owned workers; worker `id` listens on `base_worker_port + id`.
    #[arg(long, env = "QRD_BASE_WORKER_PORT", default_value_t = 8100)]
    pub base_worker_port: u16,

    /// K: half the initial fleet size. The coordinator starts with `2*k` workers.
    #[arg(long, env = "QRD_K", default_value_t = 2)]
    pub k: u32,

    /// Initial per-worker drop percentage (0-100), mutable later via the admin port.
    #[arg(long, env = "QRD_INITIAL_DROP_PCT", default_value_t = 0)]
    pub initial_drop_pct: u8,

    /// Initial per-worker delay percentage (0-100).
    #[arg(long, env = "QRD_INITIAL_DELAY_PCT", default_value_t = 0)]
    pub initial_delay_pct: u8,

    /// Initial per-worker wrong-reply percentage (0-100).
    #[arg(long, env = "QRD_INITIAL_WRONG_PCT", default_value_t = 0)]
    pub initial_wrong_pct: u8,

    /// Initial minimum injected delay in milliseconds.
    #[arg(long, env = "QRD_INITIAL_DELAY_MIN_MS", default_value_t = 0)]
    pub initial_delay_min_ms: u64,

    /// Initial maximum injected delay in milliseconds.
    #[arg(long, env = "QRD_INITIAL_DELAY_MAX_MS", default_value_t = 0)]
    pub initial_delay_max_ms: u64,

    /// Per-worker call deadline for the quorum engine, in milliseconds (§4.1 default 35s).
    #[arg(long, env = "QRD_PER_CALL_TIMEOUT_MS", default_value_t = 35_000)]
    pub per_call_timeout_ms: u64,

    /// Overall fan-out round deadline, in milliseconds.
    #[arg(long, env = "QRD_ROUND_TIMEOUT_MS", default_value_t = 40_000)]
    pub round_timeout_ms: u64,

    /// Per-peer propose-phase deadline for the replication engine, in milliseconds (§4.1 default 15s).
    #[arg(long, env = "QRD_REPLICATION_PROPOSE_TIMEOUT_MS", default_value_t = 15_000)]
    pub replication_propose_timeout_ms: u64,

    /// Per-peer commit-phase deadline for the replication engine, in milliseconds.
    #[arg(long, env = "QRD_REPLICATION_COMMIT_TIMEOUT_MS", default_value_t = 15_000)]
    pub replication_commit_timeout_ms: u64,

    /// This coordinator's origin id for operation keys (§4.6). Must be unique across the cluster.
    #[arg(long, env = "QRD_ORIGIN_ID", default_value = "origin-1")]
    pub origin_id: String,

    /// Peer replica addresses (`host:port`) for the replication engine. Empty disables replication.
    #[arg(long = "peer", env = "QRD_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Port this coordinator listens on for inbound peer replication traffic
    /// (propose/commit/abort/replay), as the follower side of §4.6/§4.7.
    #[arg(long, env = "QRD_REPLICATION_PORT", default_value_t = 8199)]
    pub replication_port: u16,

    /// Upper bound of the per-worker randomized delay stagger (§4.3).
    #[arg(long, env = "QRD_MAX_STAGGER_MS", default_value_t = 50)]
    pub max_stagger_ms: u64,

    /// Seed the fault RNG for reproducible runs instead of OS entropy (§8.1).
    #[arg(long, env = "QRD_SEED")]
    pub seed: Option<u64>,
}
