//! Worker runtime: one listening endpoint, one handler per accepted
//! connection (§4.2).
//!
//! Shared by the in-process worker tasks the coordinator owns and the
//! standalone `qrd-worker` binary (§2.1) — both bind a real `TcpListener` on
//! `127.0.0.1` and run the identical handler code.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use qrd_core::wire;
use qrd_core::{FaultSpec, WorkerId};

use crate::fault::FaultSampler;

/// Shared, runtime-mutable fault configuration for one worker (§4.2: "Fault
/// rates and delay range are mutable at runtime via a setter path that does
/// not interrupt in-flight handlers").
#[derive(Clone)]
pub struct FaultControl {
    spec: Arc<Mutex<FaultSpec>>,
}

impl FaultControl {
    pub fn new(initial: FaultSpec) -> Self {
        FaultControl { spec: Arc::new(Mutex::new(initial)) }
    }

    pub fn get(&self) -> FaultSpec {
        *self.spec.lock().expect("fault spec mutex poisoned")
    }

    pub fn set(&self, spec: FaultSpec) {
        *self.spec.lock().expect("fault spec mutex poisoned") = spec;
    }
}

/// Knobs fixed at worker creation (§3, §4.3).
#[derive(Debug, Clone)]
pub struct WorkerRuntimeConfig {
    pub id: WorkerId,
    pub host: String,
    pub port: u16,
    /// How long the handler waits for the request line before closing (§4.2 step 1).
    pub accept_read_timeout: Duration,
    /// Upper bound for the per-worker randomized stagger added to injected delays (§4.3).
    pub max_stagger_ms: u64,
    /// Deterministic RNG seed for tests (§8.1); `None` uses OS entropy.
    pub seed: Option<u64>,
}

/// A running worker: its accept loop and the handle a coordinator (or the
/// standalone binary's shutdown path) uses to control and later stop it.
pub struct WorkerRuntime {
    pub id: WorkerId,
    pub local_addr: SocketAddr,
    pub fault: FaultControl,
    pub token: CancellationToken,
    accept_task: tokio::task::JoinHandle<()>,
}

impl WorkerRuntime {
    /// Bind with a fresh, independent lifetime token — what the standalone
    /// `qrd-worker` binary uses.
    pub async fn bind(config: WorkerRuntimeConfig, initial_fault: FaultSpec) -> std::io::Result<Self> {
        Self::bind_with_token(config, initial_fault, CancellationToken::new()).await
    }

    /// Bind sharing `token` as the worker's lifetime cancellation — what the
    /// coordinator uses so its registry entry and this runtime's accept loop
    /// are cancelled together on removal or shutdown.
    pub async fn bind_with_token(
        config: WorkerRuntimeConfig,
        initial_fault: FaultSpec,
        token: CancellationToken,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        let fault = FaultControl::new(initial_fault);

        let mut stagger_sampler = match config.seed {
            Some(seed) => FaultSampler::seeded(seed),
            None => FaultSampler::from_entropy(),
        };
        let stagger_ms = stagger_sampler.sample_stagger_ms(config.max_stagger_ms);

        let id = config.id;
        let accept_read_timeout = config.accept_read_timeout;
        let seed = config.seed;
        let accept_token = token.clone();
        let accept_fault = fault.clone();
        let accept_task = tokio::spawn(async move {
            accept_loop(listener, id, accept_fault, accept_token, stagger_ms, accept_read_timeout, seed).await;
        });

        info!(worker_id = id, %local_addr, stagger_ms, "worker listening");
        Ok(WorkerRuntime { id, local_addr, fault, token, accept_task })
    }

    /// Stop accepting new connections and cancel every in-flight handler
    /// (§4.2 "Abort path", §3 "graceful stop closes the accept loop and any
    /// in-flight handler"). Idempotent.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.accept_task.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop(
    listener: TcpListener,
    id: WorkerId,
    fault: FaultControl,
    token: CancellationToken,
    stagger_ms: u64,
    accept_read_timeout: Duration,
    seed: Option<u64>,
) {
    let mut handler_counter: u64 = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(worker_id = id, "accept loop stopping");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _peer_addr)) => {
                        handler_counter += 1;
                        let handler_token = token.child_token();
                        let handler_fault = fault.clone();
                        let handler_seed = seed.map(|s| s.wrapping_add(handler_counter));
                        tokio::spawn(handle_connection(
                            stream,
                            id,
                            handler_fault,
                            handler_token,
                            stagger_ms,
                            accept_read_timeout,
                            handler_seed,
                        ));
                    }
                    Err(err) => {
                        warn!(worker_id = id, error = %err, "accept failed");
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    stream: tokio::net::TcpStream,
    id: WorkerId,
    fault: FaultControl,
    token: CancellationToken,
    stagger_ms: u64,
    accept_read_timeout: Duration,
    seed: Option<u64>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = tokio::io::BufReader::new(read_half);

    let request = tokio::select! {
        _ = token.cancelled() => return,
        line = wire::read_line_with_timeout(&mut reader, accept_read_timeout) => {
            match line {
                Ok(line) => line,
                Err(_) => return,
            }
        }
    };

    let mut sampler = match seed {
        Some(seed) => FaultSampler::seeded(seed),
        None => FaultSampler::from_entropy(),
    };
    let spec = fault.get();

    if sampler.sample_drop(&spec) {
        debug!(worker_id = id, %request, "dropping connection");
        return;
    }

    if let Some(delay) = sampler.sample_delay(&spec, stagger_ms) {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(worker_id = id, %request, "delay aborted");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let reply = if sampler.sample_wrong(&spec) {
        format!("ERROR_{}", sampler.wrong_suffix())
    } else {
        format!("ACK_W{id}_{request}")
    };

    if token.is_cancelled() {
        return;
    }
    if let Err(err) = wire::write_line(&mut write_half, &reply).await {
        debug!(worker_id = id, error = %err, "reply write failed");
    }
}
