//! Per-call deadlines for blocking operations.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{OdError, Result};

/// Absolute point in time after which an operation gives up.
///
/// Dropping the guarded future on expiry means any state change that happens
/// at the end of the future (clearing a dirty flag, stamping a send time) is
/// skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
            budget: Some(budget),
        }
    }

    pub fn from_option(budget: Option<Duration>) -> Self {
        budget.map(Self::after).unwrap_or_default()
    }

    /// Use `self` if it is bounded, otherwise `fallback`.
    pub fn or(self, fallback: Option<Duration>) -> Self {
        if self.at.is_some() {
            self
        } else {
            Self::from_option(fallback)
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.at.is_some()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Drive `fut` to completion or fail with [`OdError::Timeout`].
    pub async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.at {
            None => fut.await,
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(out) => out,
                Err(_) => Err(OdError::Timeout {
                    operation,
                    elapsed: self.budget.unwrap_or_default(),
                }),
            },
        }
    }
}
