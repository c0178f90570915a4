//! Worker identity, fault configuration, and lifecycle state (§4.2, §4.3, GLOSSARY).

use std::fmt;

/// Integer id, unique and monotonic within the coordinator's registry (§4.2).
pub type WorkerId = u64;

/// A worker's network endpoint as tracked by the registry (§4.2, §4.4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub id: WorkerId,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Top-level worker lifecycle state (§4.2). Per-handler abort state is tracked
/// separately by the round's cancellation token, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Serving,
    Aborted,
    Stopped,
}

/// Parameterized fault-injection probabilities and delay range for one worker
/// (§4.3). All three rates are percentages in `[0, 100]`; `delay_min_ms` must
/// not exceed `delay_max_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultSpec {
    pub drop_pct: u8,
    pub delay_pct: u8,
    pub wrong_pct: u8,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
}

/// A [`FaultSpec`] value that failed validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FaultSpecError {
    #[error("fault rate must be in 0..=100, got {0}")]
    RateOutOfRange(u8),
    #[error("delay_min_ms ({min}) exceeds delay_max_ms ({max})")]
    DelayRangeInverted { min: u64, max: u64 },
}

impl FaultSpec {
    pub fn new(
        drop_pct: u8,
        delay_pct: u8,
        wrong_pct: u8,
        delay_min_ms: u64,
        delay_max_ms: u64,
    ) -> Result<Self, FaultSpecError> {
        for rate in [drop_pct, delay_pct, wrong_pct] {
            if rate > 100 {
                return Err(FaultSpecError::RateOutOfRange(rate));
            }
        }
        if delay_min_ms > delay_max_ms {
            return Err(FaultSpecError::DelayRangeInverted { min: delay_min_ms, max: delay_max_ms });
        }
        Ok(FaultSpec { drop_pct, delay_pct, wrong_pct, delay_min_ms, delay_max_ms })
    }

    /// No faults: never drops, never delays, never lies.
    pub fn none() -> Self {
        FaultSpec { drop_pct: 0, delay_pct: 0, wrong_pct: 0, delay_min_ms: 0, delay_max_ms: 0 }
    }
}
