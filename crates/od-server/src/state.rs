//! Application state shared across all handlers.

use od_core::clock::SharedClock;
use od_core::config::DeskConfig;
use od_core::error::Result;
use od_core::text::TextToolkit;
use od_core::toolkit::ToolkitSet;
use od_dispatch::{builtin, Dispatcher};
use od_extension::{ExtensionSupervisor, ExtensionTransport, RestartPolicy};
use od_session::SessionStore;
use od_storage::RecoveryStore;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(sessions: Arc<SessionStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            sessions,
            dispatcher,
            start_time: Instant::now(),
        }
    }

    /// Wire the stores together with the text toolkit and built-in handlers.
    pub async fn build(
        config: &DeskConfig,
        transport: Arc<dyn ExtensionTransport>,
        clock: SharedClock,
    ) -> Result<Self> {
        let recovery = Arc::new(RecoveryStore::open(&config.recovery, clock.clone()).await?);
        let supervisor = Arc::new(ExtensionSupervisor::new(
            config.extensions.clone(),
            transport,
            RestartPolicy::new(config.supervisor.restart_limit),
            clock.clone(),
        ));
        let sessions = Arc::new(SessionStore::new(
            config,
            ToolkitSet::uniform(Arc::new(TextToolkit)),
            recovery,
            supervisor,
            clock,
        ));
        let dispatcher = Arc::new(Dispatcher::new(builtin::registries()?, sessions.clone())?);
        Ok(Self::new(sessions, dispatcher))
    }

    pub fn recovery(&self) -> &Arc<RecoveryStore> {
        self.sessions.recovery()
    }

    pub fn extensions(&self) -> &Arc<ExtensionSupervisor> {
        self.sessions.extensions()
    }
}
