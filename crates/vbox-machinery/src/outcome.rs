//! Outcome of secondary, best-effort actions.

use crate::error::{MachineryError, Result};

/// Result of an action whose failure is logged rather than raised.
///
/// NIC tracing and poweroff confirmation never fail the lifecycle operation
/// that triggered them. The outcome is still handed back so callers can opt
/// into strict handling with [`into_strict`](Self::into_strict).
#[derive(Debug)]
#[must_use]
pub enum BestEffort {
    /// The action was not requested for this machine.
    Skipped,
    /// The action completed.
    Done,
    /// The action failed; the failure was already logged.
    Failed(MachineryError),
}

impl BestEffort {
    /// Check if the action completed.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Check if the action failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&MachineryError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Turn a failure into an error.
    pub fn into_strict(self) -> Result<()> {
        match self {
            Self::Failed(err) => Err(err),
            Self::Skipped | Self::Done => Ok(()),
        }
    }
}
