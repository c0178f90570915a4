//! Library mirror of the coordinator binary's modules: the client
//! dispatcher, admin protocol, peer/replication listener, worker fleet, CLI,
//! and shutdown controller. `main.rs` compiles these same files directly as
//! its own module tree; this crate re-exposes them under `qrd_coordinator`
//! so `tests/` integration suites can drive the real TCP surfaces without
//! spawning the binary itself.

#[path = "admin.rs"]
pub mod admin;
#[path = "cli.rs"]
pub mod cli;
#[path = "dispatch.rs"]
pub mod dispatch;
#[path = "peer.rs"]
pub mod peer;
#[path = "shutdown.rs"]
pub mod shutdown;
#[path = "workers.rs"]
pub mod workers;

pub use cli::Cli;
pub use dispatch::Dispatcher;
pub use shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};
pub use workers::{WorkerFleet, WorkerFleetConfig};
