//! Extension lifecycle state machine and restart policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one helper process.
///
/// ```text
/// NotFound -> Idle -> Running -> Idle
///               ^         \
///               |          -> Crashed -> Idle      (restart succeeded)
///               |                     -> NotFound  (restart limit reached)
///             probe
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionState {
    NotFound,
    Idle,
    Running,
    Crashed,
}

impl ExtensionState {
    pub fn can_transition_to(self, next: ExtensionState) -> bool {
        use ExtensionState::*;
        matches!(
            (self, next),
            (NotFound, Idle)
                | (Idle, NotFound)
                | (Idle, Running)
                | (Running, Idle)
                | (Running, Crashed)
                | (Crashed, Idle)
                | (Crashed, NotFound)
        )
    }

    pub fn transition(self, next: ExtensionState) -> Result<ExtensionState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }

    /// Whether deliveries can be attempted without a probe or restart first.
    pub fn is_available(self) -> bool {
        matches!(self, ExtensionState::Idle | ExtensionState::Running)
    }
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionState::NotFound => write!(f, "not_found"),
            ExtensionState::Idle => write!(f, "idle"),
            ExtensionState::Running => write!(f, "running"),
            ExtensionState::Crashed => write!(f, "crashed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ExtensionState,
    pub to: ExtensionState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid extension transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Try again; `attempt` is the restart count after this attempt.
    Restart { attempt: u32 },
    /// Give up and park the extension in `NotFound`.
    Abandon,
}

/// Bounded restarts for crashed extensions. The count is never reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub limit: u32,
}

impl RestartPolicy {
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }

    pub fn decide(&self, restarts_so_far: u32) -> RestartDecision {
        if restarts_so_far < self.limit {
            RestartDecision::Restart { attempt: restarts_so_far + 1 }
        } else {
            RestartDecision::Abandon
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
