//! Extension supervisor: process health, bindings, and export pushes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use od_core::clock::SharedClock;
use od_core::config::ExtensionConfig;
use od_core::deadline::Deadline;
use od_core::error::{OdError, Result};
use od_core::types::DocumentType;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::{ExtensionState, RestartDecision, RestartPolicy};
use crate::transport::{Delivery, ExtensionTransport};

/// Standing request that a session push exports to an extension on save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub session_id: String,
    pub extension_id: String,
    pub format: String,
    pub created_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub document_types: Vec<DocumentType>,
    pub formats: Vec<String>,
    pub available: bool,
    pub unavailable_reason: Option<String>,
    pub state: ExtensionState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionStatus {
    pub extension_id: String,
    pub state: ExtensionState,
    pub unavailable_reason: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub active_bindings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFailure {
    pub extension_id: String,
    pub reason: String,
}

/// Outcome of one push. Never surfaced as an error to the saving caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    pub delivered: usize,
    /// Deliveries skipped because a newer export already reached the extension.
    #[serde(default)]
    pub superseded: usize,
    pub failures: Vec<PushFailure>,
}

impl PushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, extension_id: &str, reason: impl Into<String>) {
        self.failures.push(PushFailure {
            extension_id: extension_id.to_string(),
            reason: reason.into(),
        });
    }
}

/// Produces exports of a session's current document.
#[async_trait]
pub trait ExportSource: Send + Sync {
    fn document_type(&self) -> DocumentType;

    async fn export(&self, format: &str) -> Result<Vec<u8>>;
}

/// Exports taken at save time, ready to hand to extensions.
#[derive(Debug, Clone, Default)]
pub struct PreparedPush {
    pub session_id: String,
    /// Issue order of `prepare`; older exports never overwrite newer ones.
    pub sequence: u64,
    pub deliveries: Vec<Delivery>,
    pub export_failures: Vec<PushFailure>,
}

impl PreparedPush {
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty() && self.export_failures.is_empty()
    }
}

struct ExtensionEntry {
    config: ExtensionConfig,
    state: ExtensionState,
    unavailable_reason: Option<String>,
    last_activity: Option<DateTime<Utc>>,
    restart_count: u32,
    /// Parked after the restart limit; only `reset` brings it back.
    abandoned: bool,
    delivery_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ExtensionEntry {
    fn new(config: ExtensionConfig) -> Self {
        Self {
            config,
            state: ExtensionState::NotFound,
            unavailable_reason: Some("not probed yet".into()),
            last_activity: None,
            restart_count: 0,
            abandoned: false,
            delivery_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn set_state(&mut self, next: ExtensionState, reason: Option<String>) {
        match self.state.transition(next) {
            Ok(state) => {
                debug!(extension_id = %self.config.id, from = %self.state, to = %state, "extension transition");
                self.state = state;
                self.unavailable_reason = if state.is_available() { None } else { reason };
            }
            Err(e) => warn!(extension_id = %self.config.id, error = %e, "ignoring extension transition"),
        }
    }
}

pub struct ExtensionSupervisor {
    extensions: RwLock<BTreeMap<String, ExtensionEntry>>,
    bindings: RwLock<HashMap<(String, String), Binding>>,
    /// Sequence of the newest export delivered per `(session, extension)`.
    delivered: RwLock<HashMap<(String, String), u64>>,
    next_sequence: AtomicU64,
    transport: Arc<dyn ExtensionTransport>,
    policy: RestartPolicy,
    clock: SharedClock,
}

impl ExtensionSupervisor {
    pub fn new(
        configs: Vec<ExtensionConfig>,
        transport: Arc<dyn ExtensionTransport>,
        policy: RestartPolicy,
        clock: SharedClock,
    ) -> Self {
        let extensions = configs
            .into_iter()
            .map(|c| (c.id.clone(), ExtensionEntry::new(c)))
            .collect();
        Self {
            extensions: RwLock::new(extensions),
            bindings: RwLock::new(HashMap::new()),
            delivered: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(1),
            transport,
            policy,
            clock,
        }
    }

    fn config_of(&self, extension_id: &str) -> Option<ExtensionConfig> {
        self.extensions
            .read()
            .get(extension_id)
            .map(|e| e.config.clone())
    }

    /// Health-probe every configured extension, moving `NotFound <-> Idle`.
    ///
    /// Abandoned extensions are skipped.
    pub async fn probe_all(&self) {
        let configs: Vec<ExtensionConfig> = self
            .extensions
            .read()
            .values()
            .filter(|e| !e.abandoned)
            .map(|e| e.config.clone())
            .collect();
        for config in configs {
            let outcome = self.transport.probe(&config).await;
            let Some((state, _)) = self.snapshot(&config.id) else {
                continue;
            };
            match (state, outcome) {
                (ExtensionState::NotFound, Ok(())) => {
                    if let Err(reason) = self.launch(&config).await {
                        warn!(extension_id = %config.id, %reason, "extension reachable but failed to start");
                    } else {
                        info!(extension_id = %config.id, "extension reachable");
                    }
                }
                (ExtensionState::NotFound, Err(reason)) => {
                    self.update(&config.id, |e| e.unavailable_reason = Some(reason));
                }
                (ExtensionState::Idle, Err(reason)) => {
                    warn!(extension_id = %config.id, %reason, "extension no longer reachable");
                    self.update(&config.id, |e| e.set_state(ExtensionState::NotFound, Some(reason)));
                }
                // Running and Crashed are owned by the delivery path.
                _ => {}
            }
        }
    }

    /// Clear an abandoned extension's restart history and probe it again.
    ///
    /// Returns `NotFound` for unknown ids.
    pub async fn reset(&self, extension_id: &str) -> Result<ExtensionStatus> {
        let (config, lock) = self
            .extensions
            .read()
            .get(extension_id)
            .map(|e| (e.config.clone(), e.delivery_lock.clone()))
            .ok_or_else(|| OdError::not_found("extension", extension_id))?;
        let _serial = lock.lock().await;

        self.update(extension_id, |e| {
            e.abandoned = false;
            e.restart_count = 0;
        });
        info!(extension_id, "extension reset");
        match self.transport.probe(&config).await {
            Ok(()) => {
                if self.snapshot(extension_id).map(|(state, _)| state) == Some(ExtensionState::NotFound) {
                    if let Err(reason) = self.launch(&config).await {
                        warn!(extension_id, %reason, "extension failed to start after reset");
                    }
                }
            }
            Err(reason) => self.update(extension_id, |e| e.unavailable_reason = Some(reason)),
        }
        Ok(self.status(extension_id))
    }

    /// Start the extension and mark it `Idle`. Not counted as a restart.
    async fn launch(&self, config: &ExtensionConfig) -> std::result::Result<(), String> {
        match self.transport.start(config).await {
            Ok(()) => {
                self.update(&config.id, |e| e.set_state(ExtensionState::Idle, None));
                Ok(())
            }
            Err(e) => {
                let reason = format!("start failed: {e}");
                self.update(&config.id, |entry| entry.unavailable_reason = Some(reason.clone()));
                Err(reason)
            }
        }
    }

    pub fn list_extensions(&self) -> Vec<ExtensionInfo> {
        self.extensions
            .read()
            .values()
            .map(|e| ExtensionInfo {
                id: e.config.id.clone(),
                name: e.config.name.clone(),
                version: e.config.version.clone(),
                document_types: e.config.document_types.clone(),
                formats: e.config.formats.clone(),
                available: e.state.is_available(),
                unavailable_reason: e.unavailable_reason.clone(),
                state: e.state,
            })
            .collect()
    }

    /// Create or update the binding for `(session_id, extension_id)`.
    ///
    /// The caller is responsible for checking that the session exists.
    pub fn bind(
        &self,
        session_id: &str,
        document_type: DocumentType,
        extension_id: &str,
        format: &str,
    ) -> Result<Binding> {
        let config = self
            .config_of(extension_id)
            .ok_or_else(|| OdError::not_found("extension", extension_id))?;
        if !config.accepts_format(format) {
            return Err(OdError::argument(format!(
                "extension {extension_id} does not accept '{format}' (accepts: {})",
                config.formats.join(", ")
            )));
        }
        if !config.document_types.is_empty() && !config.document_types.contains(&document_type) {
            return Err(OdError::argument(format!(
                "extension {extension_id} does not handle {document_type} documents"
            )));
        }
        let key = (session_id.to_string(), extension_id.to_string());
        let now = self.clock.now();
        let mut bindings = self.bindings.write();
        let binding = bindings
            .entry(key)
            .and_modify(|b| {
                if !b.format.eq_ignore_ascii_case(format) {
                    b.format = format.to_string();
                    b.last_sent_at = None;
                }
            })
            .or_insert_with(|| Binding {
                session_id: session_id.to_string(),
                extension_id: extension_id.to_string(),
                format: format.to_string(),
                created_at: now,
                last_sent_at: None,
            })
            .clone();
        info!(session_id, extension_id, format, "extension bound");
        Ok(binding)
    }

    /// Remove one binding, or every binding of the session when `extension_id` is `None`.
    pub fn unbind(&self, session_id: &str, extension_id: Option<&str>) -> usize {
        let mut bindings = self.bindings.write();
        let removed = match extension_id {
            Some(ext) => {
                let key = (session_id.to_string(), ext.to_string());
                self.delivered.write().remove(&key);
                usize::from(bindings.remove(&key).is_some())
            }
            None => {
                let before = bindings.len();
                bindings.retain(|(sid, _), _| sid != session_id);
                self.delivered.write().retain(|(sid, _), _| sid != session_id);
                before - bindings.len()
            }
        };
        if removed > 0 {
            info!(session_id, extension_id = ?extension_id, removed, "extension bindings removed");
        }
        removed
    }

    pub fn bindings_for(&self, session_id: &str) -> Vec<Binding> {
        let mut out: Vec<Binding> = self
            .bindings
            .read()
            .values()
            .filter(|b| b.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.extension_id.cmp(&b.extension_id));
        out
    }

    pub fn has_bindings(&self, session_id: &str) -> bool {
        self.bindings.read().keys().any(|(sid, _)| sid == session_id)
    }

    /// Export the document once per binding.
    ///
    /// Callers hold the session lock while this runs so the exports reflect
    /// the state that was just saved.
    pub async fn prepare(&self, session_id: &str, source: &dyn ExportSource) -> PreparedPush {
        let mut prepared = PreparedPush {
            session_id: session_id.to_string(),
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            ..Default::default()
        };
        for binding in self.bindings_for(session_id) {
            match source.export(&binding.format).await {
                Ok(payload) => prepared.deliveries.push(Delivery {
                    session_id: session_id.to_string(),
                    extension_id: binding.extension_id.clone(),
                    document_type: source.document_type(),
                    format: binding.format.clone(),
                    created_at: self.clock.now(),
                    payload,
                }),
                Err(e) => {
                    warn!(session_id, extension_id = %binding.extension_id, error = %e, "export for extension failed");
                    prepared.export_failures.push(PushFailure {
                        extension_id: binding.extension_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        prepared
    }

    /// Hand prepared exports to their extensions.
    pub async fn deliver(&self, prepared: PreparedPush, deadline: Deadline) -> PushReport {
        let mut report = PushReport {
            failures: prepared.export_failures,
            ..Default::default()
        };
        for delivery in prepared.deliveries {
            match self.deliver_one(&delivery, prepared.sequence, deadline).await {
                Ok(true) => report.delivered += 1,
                Ok(false) => report.superseded += 1,
                Err(reason) => report.fail(&delivery.extension_id, reason),
            }
        }
        report
    }

    /// Export and deliver to every binding of the session.
    pub async fn push(&self, session_id: &str, source: &dyn ExportSource, deadline: Deadline) -> PushReport {
        let prepared = self.prepare(session_id, source).await;
        self.deliver(prepared, deadline).await
    }

    /// `Ok(false)` when a newer export for the same binding was already delivered.
    async fn deliver_one(
        &self,
        delivery: &Delivery,
        sequence: u64,
        deadline: Deadline,
    ) -> std::result::Result<bool, String> {
        let ext_id = delivery.extension_id.as_str();
        let (config, lock) = {
            let extensions = self.extensions.read();
            let entry = extensions
                .get(ext_id)
                .ok_or_else(|| format!("extension {ext_id} is not configured"))?;
            (entry.config.clone(), entry.delivery_lock.clone())
        };
        let _serial = lock.lock().await;

        let key = (delivery.session_id.clone(), ext_id.to_string());
        if self.delivered.read().get(&key).is_some_and(|&newest| newest > sequence) {
            debug!(extension_id = ext_id, session_id = %delivery.session_id, sequence, "skipping superseded export");
            return Ok(false);
        }
        self.ensure_ready(&config).await?;
        self.update(ext_id, |e| e.set_state(ExtensionState::Running, None));

        let outcome = deadline
            .run("push", self.transport.deliver(&config, delivery))
            .await;
        let now = self.clock.now();
        match outcome {
            Ok(()) => {
                self.update(ext_id, |e| {
                    e.set_state(ExtensionState::Idle, None);
                    e.last_activity = Some(now);
                });
                if let Some(binding) = self.bindings.write().get_mut(&key) {
                    binding.last_sent_at = Some(now);
                }
                self.delivered.write().insert(key, sequence);
                Ok(true)
            }
            Err(e) => {
                let reason = format!("unhealthy: {e}");
                warn!(extension_id = ext_id, session_id = %delivery.session_id, error = %e, "extension delivery failed");
                self.update(ext_id, |entry| {
                    entry.set_state(ExtensionState::Crashed, Some(reason.clone()));
                    entry.last_activity = Some(now);
                });
                Err(reason)
            }
        }
    }

    /// Bring the extension to `Idle`, probing or restarting as needed.
    async fn ensure_ready(&self, config: &ExtensionConfig) -> std::result::Result<(), String> {
        let ext_id = config.id.as_str();
        let (state, restarts) = self
            .snapshot(ext_id)
            .ok_or_else(|| format!("extension {ext_id} is not configured"))?;
        if self.is_abandoned(ext_id) {
            return Err(format!("restart limit of {} reached", self.policy.limit));
        }
        match state {
            ExtensionState::Idle => Ok(()),
            // Another delivery path left it running; deliveries are serialized so this is stale.
            ExtensionState::Running => {
                self.update(ext_id, |e| e.set_state(ExtensionState::Idle, None));
                Ok(())
            }
            ExtensionState::NotFound => match self.transport.probe(config).await {
                Ok(()) => self.launch(config).await,
                Err(reason) => {
                    self.update(ext_id, |e| e.unavailable_reason = Some(reason.clone()));
                    Err(reason)
                }
            },
            ExtensionState::Crashed => match self.policy.decide(restarts) {
                RestartDecision::Restart { attempt } => {
                    self.update(ext_id, |e| e.restart_count = attempt);
                    info!(extension_id = ext_id, attempt, "restarting crashed extension");
                    match self.transport.start(config).await {
                        Ok(()) => {
                            self.update(ext_id, |e| e.set_state(ExtensionState::Idle, None));
                            Ok(())
                        }
                        Err(e) => {
                            let reason = format!("restart failed: {e}");
                            self.update(ext_id, |entry| entry.unavailable_reason = Some(reason.clone()));
                            Err(reason)
                        }
                    }
                }
                RestartDecision::Abandon => {
                    let reason = format!("restart limit of {} reached", self.policy.limit);
                    warn!(extension_id = ext_id, "abandoning crashed extension");
                    self.update(ext_id, |e| {
                        e.set_state(ExtensionState::NotFound, Some(reason.clone()));
                        e.abandoned = true;
                    });
                    Err(reason)
                }
            },
        }
    }

    fn is_abandoned(&self, extension_id: &str) -> bool {
        self.extensions
            .read()
            .get(extension_id)
            .is_some_and(|e| e.abandoned)
    }

    fn snapshot(&self, extension_id: &str) -> Option<(ExtensionState, u32)> {
        self.extensions
            .read()
            .get(extension_id)
            .map(|e| (e.state, e.restart_count))
    }

    fn update(&self, extension_id: &str, f: impl FnOnce(&mut ExtensionEntry)) {
        if let Some(entry) = self.extensions.write().get_mut(extension_id) {
            f(entry);
        }
    }

    /// Current status. Unknown ids report `NotFound` rather than failing.
    pub fn status(&self, extension_id: &str) -> ExtensionStatus {
        let active_bindings = self
            .bindings
            .read()
            .keys()
            .filter(|(_, ext)| ext == extension_id)
            .count();
        match self.extensions.read().get(extension_id) {
            Some(e) => ExtensionStatus {
                extension_id: extension_id.to_string(),
                state: e.state,
                unavailable_reason: e.unavailable_reason.clone(),
                last_activity: e.last_activity,
                restart_count: e.restart_count,
                active_bindings,
            },
            None => ExtensionStatus {
                extension_id: extension_id.to_string(),
                state: ExtensionState::NotFound,
                unavailable_reason: Some("not configured".into()),
                last_activity: None,
                restart_count: 0,
                active_bindings,
            },
        }
    }

    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.extensions.read().keys().cloned().collect();
        for id in ids {
            self.transport.stop(&id).await;
        }
    }
}
