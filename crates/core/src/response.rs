//! Response normalization and the client-visible consensus envelope (§3, §4.4, §4.5).

/// The class a raw worker reply collapses to for vote tallying (§3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResponseClass {
    /// Any reply starting with `ACK_`.
    AckSuccess,
    /// Any reply starting with `ERROR_`.
    ErrorResponse,
    /// Anything else, keyed by its exact text — each distinct string is its own class.
    Other(String),
}

/// Normalize a raw reply to its voting class (§4.5 "Normalization rules").
pub fn classify(raw: &str) -> ResponseClass {
    if raw.starts_with("ACK_") {
        ResponseClass::AckSuccess
    } else if raw.starts_with("ERROR_") {
        ResponseClass::ErrorResponse
    } else {
        ResponseClass::Other(raw.to_string())
    }
}

/// The quorum engine's decision for one fan-out round (§3 "Consensus outcome").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusOutcome {
    /// `ACK_SUCCESS` reached the required majority; carries the first raw ack observed.
    ConsensusAck(String),
    /// `ERROR_RESPONSE` reached the required majority; carries the first raw error observed.
    ConsensusError(String),
    /// An `Other` class (neither `ACK_*` nor `ERROR_*`) reached the required majority; carries
    /// the first raw reply observed. Kept distinct from `ConsensusAck` so a caller that branches
    /// on variant rather than rendering `to_client_line` cannot mistake a majority of
    /// unrecognized replies for a genuine acknowledgement.
    ConsensusOther(String),
    /// No class reached the required majority before the round's deadline or full completion.
    NoConsensus { received: usize, total: usize },
    /// The snapshot had fewer than 3 workers; no fan-out was attempted.
    InsufficientWorkers,
    /// The round's overall deadline elapsed before any decision.
    CoordinatorTimeout,
}

impl ConsensusOutcome {
    /// Render the client-visible reply line per the dispatcher envelope (§4.4).
    pub fn to_client_line(&self) -> String {
        match self {
            ConsensusOutcome::ConsensusAck(payload) => payload.clone(),
            ConsensusOutcome::ConsensusError(payload) => payload.clone(),
            ConsensusOutcome::ConsensusOther(payload) => payload.clone(),
            ConsensusOutcome::NoConsensus { received, total } => {
                format!("NO_CONSENSUS_{received}_OF_{total}")
            }
            ConsensusOutcome::InsufficientWorkers => "ERROR_INSUFFICIENT_WORKERS".to_string(),
            ConsensusOutcome::CoordinatorTimeout => "TIMEOUT_COORDINATOR".to_string(),
        }
    }
}
