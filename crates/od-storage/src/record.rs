use chrono::{DateTime, Duration, Utc};
use od_core::types::DocumentType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Durable stand-in for a session that ended without an explicit close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub session_id: String,
    pub document_type: DocumentType,
    pub original_path: PathBuf,
    pub saved_at: DateTime<Utc>,
    pub retention_hours: u32,
    pub expires_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub prompt_on_reconnect: bool,
}

impl RecoveryRecord {
    pub fn new(
        session_id: impl Into<String>,
        meta: RecoveryMeta,
        saved_at: DateTime<Utc>,
        retention_hours: u32,
        size_bytes: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            document_type: meta.document_type,
            original_path: meta.original_path,
            saved_at,
            retention_hours,
            expires_at: saved_at + Duration::hours(i64::from(retention_hours)),
            size_bytes,
            prompt_on_reconnect: meta.prompt_on_reconnect,
        }
    }

    /// The one definition of expiry used by list, stats, recover and cleanup.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Caller-supplied part of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryMeta {
    pub document_type: DocumentType,
    pub original_path: PathBuf,
    pub prompt_on_reconnect: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverOptions {
    /// Where to write the document. Defaults to the record's original path.
    pub target_path: Option<PathBuf>,
    /// Caller has confirmed that a changed original file may be overwritten.
    #[serde(default)]
    pub confirm_overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveredFile {
    pub session_id: String,
    pub document_type: DocumentType,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Whether the record was removed as part of the recovery.
    pub record_deleted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub scanned: usize,
    pub deleted: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub total_count: usize,
    pub total_size_mb: f64,
    pub expired_count: usize,
    pub retention_hours: u32,
}
