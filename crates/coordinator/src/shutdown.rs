//! Two-stage Ctrl+C handling, grounded on `crates/client/src/shutdown.rs`:
//! the first signal asks the coordinator to drain outstanding rounds, the
//! second forces an immediate exit (§6 "Exit behavior").

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    /// Stop accepting new connections; let in-flight rounds finish or time out.
    Graceful,
    /// Stop immediately, abandoning any in-flight round.
    Immediate,
}

pub struct ShutdownController {
    signal_count: AtomicU8,
    events: broadcast::Sender<ShutdownEvent>,
}

impl ShutdownController {
    pub fn new() -> Arc<Self> {
        let (events, _rx) = broadcast::channel(8);
        Arc::new(ShutdownController { signal_count: AtomicU8::new(0), events })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownEvent> {
        self.events.subscribe()
    }

    fn on_signal(&self) {
        let previous = self.signal_count.fetch_add(1, Ordering::SeqCst);
        let event = if previous == 0 { ShutdownEvent::Graceful } else { ShutdownEvent::Immediate };
        let _ = self.events.send(event);
    }
}

/// Spawns a task that listens for Ctrl+C forever, broadcasting [`ShutdownEvent`]s.
pub fn spawn_ctrl_c_handler(controller: Arc<ShutdownController>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            controller.on_signal();
        }
    });
}
