use async_trait::async_trait;
use chrono::{DateTime, Utc};
use od_core::error::Result;
use od_core::toolkit::{Document, DocumentToolkit};
use od_core::types::{AccessMode, DocumentType};
use od_extension::{ExportSource, PushReport};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Snapshot of one open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub document_type: DocumentType,
    pub source_path: PathBuf,
    pub mode: AccessMode,
    pub dirty: bool,
    pub opened_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub estimated_size: u64,
}

/// What happened to bound extensions after a save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PushOutcome {
    /// The session has no bindings.
    NotBound,
    Delivered(PushReport),
    /// Handed to a background task; failures are only logged.
    Scheduled { deliveries: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResult {
    pub session_id: String,
    pub path: PathBuf,
    pub format: String,
    pub push: PushOutcome,
}

/// Outcome of a disconnect or idle eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectResult {
    pub session_id: String,
    pub recovery: Option<od_storage::RecoveryRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvictionReport {
    pub scanned: usize,
    pub evicted: usize,
    pub recovered: usize,
    pub errors: usize,
}

pub(crate) struct SessionSlot {
    info: RwLock<SessionInfo>,
    document: Arc<Mutex<Box<dyn Document>>>,
    closed: AtomicBool,
}

impl SessionSlot {
    pub(crate) fn new(info: SessionInfo, document: Box<dyn Document>) -> Self {
        Self {
            info: RwLock::new(info),
            document: Arc::new(Mutex::new(document)),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn info(&self) -> SessionInfo {
        self.info.read().clone()
    }

    pub(crate) fn last_accessed_at(&self) -> DateTime<Utc> {
        self.info.read().last_accessed_at
    }

    pub(crate) fn touch(&self, now: DateTime<Utc>) {
        self.info.write().last_accessed_at = now;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) async fn lock(self: &Arc<Self>) -> SessionGuard {
        let document = self.document.clone().lock_owned().await;
        SessionGuard {
            slot: self.clone(),
            document,
        }
    }
}

/// Exclusive access to a session's document.
///
/// Holding the guard serializes every other caller on the same session in
/// arrival order. Other sessions are unaffected.
pub struct SessionGuard {
    pub(crate) slot: Arc<SessionSlot>,
    document: OwnedMutexGuard<Box<dyn Document>>,
}

impl SessionGuard {
    pub fn info(&self) -> SessionInfo {
        self.slot.info()
    }

    pub fn id(&self) -> String {
        self.slot.info.read().id.clone()
    }

    pub fn document_type(&self) -> DocumentType {
        self.slot.info.read().document_type
    }

    pub fn mode(&self) -> AccessMode {
        self.slot.info.read().mode
    }

    pub fn is_dirty(&self) -> bool {
        self.slot.info.read().dirty
    }

    pub fn document(&self) -> &dyn Document {
        &**self.document
    }

    pub fn document_mut(&mut self) -> &mut dyn Document {
        &mut **self.document
    }

    pub fn mark_dirty(&self) {
        let mut info = self.slot.info.write();
        info.dirty = true;
        info.estimated_size = self.document.estimated_size();
    }

    pub(crate) fn mark_clean(&self) {
        let mut info = self.slot.info.write();
        info.dirty = false;
        info.estimated_size = self.document.estimated_size();
    }

    pub(crate) fn close(&self) {
        self.slot.closed.store(true, Ordering::Release);
    }
}

/// Exports a locked document through its toolkit.
pub(crate) struct LockedExport<'a> {
    pub(crate) guard: &'a SessionGuard,
    pub(crate) toolkit: Arc<dyn DocumentToolkit>,
}

#[async_trait]
impl ExportSource for LockedExport<'_> {
    fn document_type(&self) -> DocumentType {
        self.guard.document_type()
    }

    async fn export(&self, format: &str) -> Result<Vec<u8>> {
        self.toolkit.export(self.guard.document(), format).await
    }
}
