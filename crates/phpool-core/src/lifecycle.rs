use crate::CoreError;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Phase of one pool mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Validating,
    Resolving,
    Writing,
    Persisting,
    Reloading,
    Committed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Validating => "validating",
            Phase::Resolving => "resolving",
            Phase::Writing => "writing",
            Phase::Persisting => "persisting",
            Phase::Reloading => "reloading",
            Phase::Committed => "committed",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Committed | Phase::Failed)
    }
}

/// Create runs writing, persisting, reloading. Delete removes the file,
/// reloads, then drops the row, so reloading may precede persisting.
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (Phase::Validating, Phase::Resolving)
            | (Phase::Resolving, Phase::Writing)
            | (Phase::Writing, Phase::Persisting | Phase::Reloading)
            | (Phase::Persisting, Phase::Reloading | Phase::Committed)
            | (Phase::Reloading, Phase::Persisting | Phase::Committed)
    ) || (!from.is_terminal() && to == Phase::Failed);

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Tracks the phase of one operation and logs each transition.
#[derive(Debug)]
pub struct PhaseTracker {
    operation: &'static str,
    subject: String,
    phase: Phase,
}

impl PhaseTracker {
    pub fn new(operation: &'static str, subject: &str) -> Self {
        debug!("{operation} {subject}: {}", Phase::Validating);
        Self {
            operation,
            subject: subject.to_owned(),
            phase: Phase::Validating,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn advance(&mut self, to: Phase) -> Result<(), CoreError> {
        validate_transition(self.phase, to)?;
        debug!("{} {}: {} -> {to}", self.operation, self.subject, self.phase);
        self.phase = to;
        Ok(())
    }

    /// Mark the operation failed unless it already finished.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            debug!("{} {}: {} -> failed", self.operation, self.subject, self.phase);
            self.phase = Phase::Failed;
        }
    }
}
