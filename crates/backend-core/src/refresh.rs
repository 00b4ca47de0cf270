use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Phase of the credential refresh guard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RefreshPhase {
    #[default]
    Idle,
    Refreshing,
}

/// What to do with a failed attempt of a guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Acquire a new credential and replay the call.
    Refresh,
    /// Give up and report this error to the caller.
    Surface(ErrorKind),
}

/// Bounds how many credential refreshes one logical call may trigger.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    max_refreshes: u32,
}

impl RefreshPolicy {
    pub fn new(max_refreshes: u32) -> Self {
        Self { max_refreshes }
    }

    pub fn max_refreshes(&self) -> u32 {
        self.max_refreshes
    }

    /// Classify a failed attempt after `refreshes_done` refreshes for the same call.
    ///
    /// Only `InvalidToken` is recoverable. Once the budget is spent a further
    /// `InvalidToken` is reported as `Unknown`.
    pub fn decide(&self, error: ErrorKind, refreshes_done: u32) -> RefreshDecision {
        match error {
            ErrorKind::InvalidToken if refreshes_done < self.max_refreshes => {
                RefreshDecision::Refresh
            }
            ErrorKind::InvalidToken => RefreshDecision::Surface(ErrorKind::Unknown),
            other => RefreshDecision::Surface(other),
        }
    }

    /// Error reported when the identity provider itself fails.
    pub fn refresh_failed(&self) -> ErrorKind {
        ErrorKind::Unknown
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::new(1)
    }
}
