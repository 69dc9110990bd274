use od_core::clock::SharedClock;
use od_core::config::{DeskConfig, PushMode, SessionConfig};
use od_core::deadline::Deadline;
use od_core::error::{OdError, Result};
use od_core::toolkit::{Document, ToolkitSet};
use od_core::types::{new_session_id, AccessMode, DocumentType};
use od_extension::{Binding, ExtensionSupervisor, PushReport};
use od_storage::{RecoveryMeta, RecoveryStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::session::{
    DisconnectResult, EvictionReport, LockedExport, PushOutcome, SaveResult, SessionGuard,
    SessionInfo, SessionSlot,
};

const SESSION: &str = "session";

/// Owns every open session and its document handle.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    toolkits: ToolkitSet,
    recovery: Arc<RecoveryStore>,
    extensions: Arc<ExtensionSupervisor>,
    config: SessionConfig,
    prompt_on_reconnect: bool,
    clock: SharedClock,
}

impl SessionStore {
    pub fn new(
        config: &DeskConfig,
        toolkits: ToolkitSet,
        recovery: Arc<RecoveryStore>,
        extensions: Arc<ExtensionSupervisor>,
        clock: SharedClock,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            toolkits,
            recovery,
            extensions,
            config: config.session.clone(),
            prompt_on_reconnect: config.recovery.prompt_on_reconnect,
            clock,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn toolkits(&self) -> &ToolkitSet {
        &self.toolkits
    }

    pub fn recovery(&self) -> &Arc<RecoveryStore> {
        &self.recovery
    }

    pub fn extensions(&self) -> &Arc<ExtensionSupervisor> {
        &self.extensions
    }

    fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| OdError::not_found(SESSION, session_id))
    }

    fn deadline(&self, deadline: Deadline) -> Deadline {
        deadline.or(self.config.operation_timeout())
    }

    /// Load `path` and register a new clean session for it.
    pub async fn open(
        &self,
        path: impl AsRef<Path>,
        document_type: DocumentType,
        mode: AccessMode,
        deadline: Deadline,
    ) -> Result<SessionInfo> {
        let path = path.as_ref();
        let toolkit = self.toolkits.get(document_type)?;
        let document = self
            .deadline(deadline)
            .run("open", toolkit.load(path, document_type))
            .await?;
        Ok(self.insert(document, path.to_path_buf(), document_type, mode, false))
    }

    /// Register an already loaded document as a session.
    pub fn adopt(
        &self,
        document: Box<dyn Document>,
        source_path: PathBuf,
        mode: AccessMode,
        dirty: bool,
    ) -> SessionInfo {
        let document_type = document.document_type();
        self.insert(document, source_path, document_type, mode, dirty)
    }

    fn insert(
        &self,
        document: Box<dyn Document>,
        source_path: PathBuf,
        document_type: DocumentType,
        mode: AccessMode,
        dirty: bool,
    ) -> SessionInfo {
        let now = self.clock.now();
        let info = SessionInfo {
            id: new_session_id(),
            document_type,
            source_path,
            mode,
            dirty,
            opened_at: now,
            last_accessed_at: now,
            estimated_size: document.estimated_size(),
        };
        let slot = Arc::new(SessionSlot::new(info.clone(), document));
        self.sessions.write().insert(info.id.clone(), slot);
        info!(
            session_id = %info.id,
            document_type = %document_type,
            path = %info.source_path.display(),
            mode = ?mode,
            "session opened"
        );
        info
    }

    pub fn get(&self, session_id: &str) -> Result<SessionInfo> {
        let slot = self.slot(session_id)?;
        slot.touch(self.clock.now());
        debug!(session_id, "session lookup");
        Ok(slot.info())
    }

    /// Keep-alive without reading the session.
    pub fn touch(&self, session_id: &str) -> Result<()> {
        self.slot(session_id)?.touch(self.clock.now());
        Ok(())
    }

    /// Wait for exclusive access to the session's document.
    pub async fn lock(&self, session_id: &str) -> Result<SessionGuard> {
        let slot = self.slot(session_id)?;
        let guard = slot.lock().await;
        if slot.is_closed() {
            return Err(OdError::not_found(SESSION, session_id));
        }
        slot.touch(self.clock.now());
        Ok(guard)
    }

    pub async fn mark_dirty(&self, session_id: &str) -> Result<()> {
        self.lock(session_id).await?.mark_dirty();
        Ok(())
    }

    /// Persist the document, clear the dirty flag, then push to bound extensions.
    ///
    /// Push problems are reported in the result and never fail the save.
    pub async fn save(
        &self,
        session_id: &str,
        output_path: Option<PathBuf>,
        deadline: Deadline,
    ) -> Result<SaveResult> {
        let deadline = self.deadline(deadline);
        let guard = self.lock(session_id).await?;
        let info = guard.info();
        let target = output_path.unwrap_or_else(|| info.source_path.clone());
        if !info.mode.is_writable() && target == info.source_path {
            return Err(OdError::argument(format!(
                "session {session_id} is read-only; save to a different path"
            )));
        }
        let format = info.document_type.save_format(&target);
        let toolkit = self.toolkits.get(info.document_type)?;

        deadline
            .run("save", async {
                toolkit.save(guard.document(), &target, &format).await?;
                guard.mark_clean();
                Ok::<(), OdError>(())
            })
            .await?;
        info!(session_id, path = %target.display(), format = %format, "session saved");

        let push = if self.extensions.has_bindings(session_id) {
            let source = LockedExport {
                guard: &guard,
                toolkit: toolkit.clone(),
            };
            let prepared = self.extensions.prepare(session_id, &source).await;
            drop(guard);
            let push_deadline = Deadline::from_option(self.config.operation_timeout());
            match self.config.push_mode {
                PushMode::Sync => {
                    PushOutcome::Delivered(self.extensions.deliver(prepared, push_deadline).await)
                }
                PushMode::Background => {
                    let deliveries = prepared.deliveries.len();
                    let extensions = self.extensions.clone();
                    let sid = session_id.to_string();
                    tokio::spawn(async move {
                        let report = extensions.deliver(prepared, push_deadline).await;
                        if !report.is_clean() {
                            warn!(session_id = %sid, failures = report.failures.len(), "background push had failures");
                        }
                    });
                    PushOutcome::Scheduled { deliveries }
                }
            }
        } else {
            PushOutcome::NotBound
        };

        Ok(SaveResult {
            session_id: session_id.to_string(),
            path: target,
            format,
            push,
        })
    }

    /// Remove the session and its bindings.
    pub async fn close(&self, session_id: &str, discard: bool) -> Result<()> {
        let guard = self.lock(session_id).await?;
        if guard.is_dirty() && !discard {
            return Err(OdError::UnsavedChanges {
                session_id: session_id.to_string(),
            });
        }
        self.teardown(guard, "closed");
        Ok(())
    }

    fn teardown(&self, guard: SessionGuard, reason: &'static str) {
        let info = guard.info();
        guard.close();
        {
            let mut sessions = self.sessions.write();
            if sessions
                .get(&info.id)
                .is_some_and(|slot| Arc::ptr_eq(slot, &guard.slot))
            {
                sessions.remove(&info.id);
            }
        }
        let unbound = self.extensions.unbind(&info.id, None);
        drop(guard);
        info!(session_id = %info.id, reason, dirty = info.dirty, unbound, "session removed");
    }

    pub fn list_active(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.read().values().map(|slot| slot.info()).collect();
        sessions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Tear down a session whose client went away.
    ///
    /// A dirty session is first written to the recovery store. If that fails
    /// the session stays open and the error is returned.
    pub async fn handle_disconnect(&self, session_id: &str) -> Result<DisconnectResult> {
        let guard = self.lock(session_id).await?;
        self.disconnect_locked(guard, "disconnected").await
    }

    async fn disconnect_locked(
        &self,
        guard: SessionGuard,
        reason: &'static str,
    ) -> Result<DisconnectResult> {
        let info = guard.info();
        let recovery = if info.dirty {
            let toolkit = self.toolkits.get(info.document_type)?;
            let bytes = self
                .deadline(Deadline::none())
                .run(
                    "disconnect",
                    toolkit.export(guard.document(), info.document_type.native_format()),
                )
                .await?;
            let meta = RecoveryMeta {
                document_type: info.document_type,
                original_path: info.source_path.clone(),
                prompt_on_reconnect: self.prompt_on_reconnect,
            };
            Some(self.recovery.persist(&info.id, &bytes, meta).await?)
        } else {
            None
        };
        self.teardown(guard, reason);
        Ok(DisconnectResult {
            session_id: info.id,
            recovery,
        })
    }

    /// Disconnect every session idle for longer than the configured timeout.
    pub async fn evict_idle(&self) -> EvictionReport {
        let mut report = EvictionReport::default();
        let Some(timeout) = self.config.idle_timeout() else {
            return report;
        };
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return report;
        };
        let candidates: Vec<(String, Arc<SessionSlot>)> = self
            .sessions
            .read()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();
        report.scanned = candidates.len();

        for (id, slot) in candidates {
            if self.clock.now() - slot.last_accessed_at() < timeout {
                continue;
            }
            let guard = slot.lock().await;
            // Re-check under the lock: the session may have been used or closed meanwhile.
            if slot.is_closed() || self.clock.now() - slot.last_accessed_at() < timeout {
                continue;
            }
            match self.disconnect_locked(guard, "idle").await {
                Ok(result) => {
                    report.evicted += 1;
                    if result.recovery.is_some() {
                        report.recovered += 1;
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(session_id = %id, error = %e, "idle eviction failed");
                }
            }
        }
        if report.evicted > 0 {
            info!(evicted = report.evicted, recovered = report.recovered, "idle sessions evicted");
        }
        report
    }

    /// Bind an open session to an extension.
    ///
    /// Holds the session lock so a concurrent close cannot strand the binding.
    pub async fn bind_extension(&self, session_id: &str, extension_id: &str, format: &str) -> Result<Binding> {
        let guard = self.lock(session_id).await?;
        let binding = self
            .extensions
            .bind(session_id, guard.document_type(), extension_id, format)?;
        drop(guard);
        Ok(binding)
    }

    pub fn unbind_extension(&self, session_id: &str, extension_id: Option<&str>) -> usize {
        self.extensions.unbind(session_id, extension_id)
    }

    /// Push the current document state to bound extensions without saving.
    pub async fn push(&self, session_id: &str, deadline: Deadline) -> Result<PushReport> {
        let guard = self.lock(session_id).await?;
        let toolkit = self.toolkits.get(guard.document_type())?;
        let prepared = {
            let source = LockedExport {
                guard: &guard,
                toolkit,
            };
            self.extensions.prepare(session_id, &source).await
        };
        drop(guard);
        Ok(self.extensions.deliver(prepared, self.deadline(deadline)).await)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Disconnect every open session, persisting dirty ones. Used on shutdown.
    pub async fn disconnect_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        let mut done = 0;
        for id in ids {
            match self.handle_disconnect(&id).await {
                Ok(_) => done += 1,
                Err(e) => warn!(session_id = %id, error = %e, "disconnect on shutdown failed"),
            }
        }
        done
    }
}
