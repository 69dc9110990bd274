//! Periodic housekeeping: idle eviction, recovery cleanup, extension probes.

use od_core::deadline::Deadline;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::manager::SessionStore;
use crate::session::EvictionReport;
use od_storage::CleanupReport;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub eviction: EvictionReport,
    pub cleanup: Option<CleanupReport>,
}

pub struct Maintenance {
    sessions: Arc<SessionStore>,
}

impl Maintenance {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    /// One pass of every housekeeping job.
    pub async fn run_once(&self, cleanup_budget: Option<Duration>) -> MaintenanceReport {
        let eviction = self.sessions.evict_idle().await;
        let cleanup = match self
            .sessions
            .recovery()
            .cleanup(Deadline::from_option(cleanup_budget))
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "recovery cleanup failed");
                None
            }
        };
        self.sessions.extensions().probe_all().await;
        debug!(?eviction, ?cleanup, "maintenance pass done");
        MaintenanceReport { eviction, cleanup }
    }

    /// Run [`run_once`](Self::run_once) every `period` until the handle is stopped.
    pub fn spawn(self, period: Duration) -> MaintenanceHandle {
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_secs = period.as_secs(), "maintenance started");
            loop {
                ticker.tick().await;
                // A pass may take at most one period so cleanup stays resumable.
                self.run_once(Some(period)).await;
            }
        });
        MaintenanceHandle { task }
    }
}

pub struct MaintenanceHandle {
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub fn stop(self) {
        self.task.abort();
        info!("maintenance stopped");
    }
}
