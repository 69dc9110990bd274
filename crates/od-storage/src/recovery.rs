//! Recovery store: TTL-bounded snapshots of abandoned sessions.

use od_core::clock::SharedClock;
use od_core::config::RecoveryConfig;
use od_core::deadline::Deadline;
use od_core::error::{OdError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::local_fs::{is_safe_key, write_atomic, RecordFiles};
use crate::record::{
    CleanupReport, RecoverOptions, RecoveredFile, RecoveryMeta, RecoveryRecord, RecoveryStats,
};

const RECORD: &str = "recovery record";

pub struct RecoveryStore {
    files: RecordFiles,
    retention_hours: u32,
    delete_on_recover: bool,
    clock: SharedClock,
    index: RwLock<HashMap<String, RecoveryRecord>>,
}

impl RecoveryStore {
    /// Open the store, indexing every readable record already on disk.
    ///
    /// Unreadable metadata is left on disk for [`cleanup`](Self::cleanup) to
    /// count and remove.
    pub async fn open(config: &RecoveryConfig, clock: SharedClock) -> Result<Self> {
        let files = RecordFiles::new(&config.dir);
        files.ensure_root().await?;
        let mut index = HashMap::new();
        for key in files.keys().await? {
            match read_record(&files, &key).await {
                Ok(record) => {
                    index.insert(key, record);
                }
                Err(e) => warn!(session_id = %key, error = %e, "skipping unreadable recovery record"),
            }
        }
        info!(dir = %files.root().display(), records = index.len(), "recovery store opened");
        Ok(Self {
            files,
            retention_hours: config.retention_hours,
            delete_on_recover: config.delete_on_recover,
            clock,
            index: RwLock::new(index),
        })
    }

    pub fn retention_hours(&self) -> u32 {
        self.retention_hours
    }

    pub fn dir(&self) -> &Path {
        self.files.root()
    }

    /// Store `document` for `session_id`, replacing any earlier record.
    pub async fn persist(
        &self,
        session_id: &str,
        document: &[u8],
        meta: RecoveryMeta,
    ) -> Result<RecoveryRecord> {
        if !is_safe_key(session_id) {
            return Err(OdError::argument(format!("invalid session id for recovery: {session_id}")));
        }
        let record = RecoveryRecord::new(
            session_id,
            meta,
            self.clock.now(),
            self.retention_hours,
            document.len() as u64,
        );
        let meta_bytes = serde_json::to_vec_pretty(&record)?;
        self.files.write(session_id, &meta_bytes, document).await?;
        self.index.write().insert(session_id.to_string(), record.clone());
        info!(
            session_id,
            size = record.size_bytes,
            expires_at = %record.expires_at,
            "recovery record persisted"
        );
        Ok(record)
    }

    /// Non-expired records, newest first.
    pub fn list(&self) -> Vec<RecoveryRecord> {
        let now = self.clock.now();
        let mut records: Vec<RecoveryRecord> = self
            .index
            .read()
            .values()
            .filter(|r| !r.is_expired(now))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        records
    }

    pub fn get(&self, session_id: &str) -> Option<RecoveryRecord> {
        let now = self.clock.now();
        self.index
            .read()
            .get(session_id)
            .filter(|r| !r.is_expired(now))
            .cloned()
    }

    /// Write the stored document back to disk.
    pub async fn recover(
        &self,
        session_id: &str,
        options: RecoverOptions,
        deadline: Deadline,
    ) -> Result<RecoveredFile> {
        deadline
            .run("recover", self.recover_inner(session_id, options))
            .await
    }

    async fn recover_inner(&self, session_id: &str, options: RecoverOptions) -> Result<RecoveredFile> {
        let record = self
            .get(session_id)
            .ok_or_else(|| OdError::not_found(RECORD, session_id))?;
        let document = match self.files.read_doc(session_id).await {
            Ok(bytes) if bytes.len() as u64 == record.size_bytes => bytes,
            Ok(bytes) => {
                warn!(session_id, expected = record.size_bytes, got = bytes.len(), "recovery document truncated");
                return Err(OdError::not_found(RECORD, session_id));
            }
            Err(e) => {
                warn!(session_id, error = %e, "recovery document unreadable");
                return Err(OdError::not_found(RECORD, session_id));
            }
        };

        let target = options
            .target_path
            .clone()
            .unwrap_or_else(|| record.original_path.clone());
        if record.prompt_on_reconnect
            && !options.confirm_overwrite
            && same_file(&target, &record.original_path).await
        {
            match tokio::fs::read(&target).await {
                Ok(existing) if existing != document => {
                    return Err(OdError::argument(format!(
                        "{} changed since the session was abandoned; set confirm_overwrite to replace it",
                        target.display()
                    )));
                }
                _ => {}
            }
        }

        write_atomic(&target, &document)
            .await
            .map_err(|e| OdError::Storage(format!("recover {session_id} to {}: {e}", target.display())))?;

        let record_deleted = if self.delete_on_recover {
            self.delete(session_id).await?
        } else {
            false
        };
        info!(session_id, path = %target.display(), record_deleted, "recovery record restored");
        Ok(RecoveredFile {
            session_id: session_id.to_string(),
            document_type: record.document_type,
            path: target,
            size_bytes: record.size_bytes,
            record_deleted,
        })
    }

    /// Remove one record. Returns `false` when there was nothing to remove.
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        // Claim the index entry first so a concurrent sweep skips it, and a
        // sweep that already claimed it makes this call a no-op.
        let Some(record) = self.index.write().remove(session_id) else {
            debug!(session_id, "recovery record already absent");
            return Ok(false);
        };
        if let Err(e) = self.files.remove_lenient(session_id).await {
            self.index.write().insert(session_id.to_string(), record);
            return Err(OdError::Storage(format!("delete {session_id}: {e}")));
        }
        debug!(session_id, "recovery record deleted");
        Ok(true)
    }

    /// Delete every expired record and anything unreadable.
    ///
    /// The sweep works from a snapshot of keys taken up front; each record is
    /// handled independently, so a sweep cut short by the deadline can simply
    /// be run again.
    pub async fn cleanup(&self, deadline: Deadline) -> Result<CleanupReport> {
        let indexed: BTreeSet<String> = self.index.read().keys().cloned().collect();
        let on_disk = self.files.keys().await?;
        let snapshot: BTreeSet<String> = indexed.union(&on_disk).cloned().collect();

        let mut report = CleanupReport {
            scanned: snapshot.len(),
            ..Default::default()
        };
        deadline
            .run("cleanup", async {
                for key in &snapshot {
                    if indexed.contains(key) {
                        self.sweep_indexed(key, &mut report).await;
                    } else {
                        self.sweep_unindexed(key, &mut report).await;
                    }
                }
                Ok(())
            })
            .await?;
        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            errors = report.errors,
            "recovery cleanup finished"
        );
        Ok(report)
    }

    async fn sweep_indexed(&self, key: &str, report: &mut CleanupReport) {
        let now = self.clock.now();
        let claimed = {
            let mut index = self.index.write();
            match index.get(key) {
                // Deleted or recovered by a concurrent caller.
                None => return,
                Some(record) if !record.is_expired(now) => return,
                Some(_) => index.remove(key),
            }
        };
        if claimed.is_none() {
            return;
        }
        match self.files.remove_strict(key).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!(session_id = key, error = %e, "expired recovery record could not be removed cleanly");
                report.errors += 1;
            }
        }
    }

    async fn sweep_unindexed(&self, key: &str, report: &mut CleanupReport) {
        if self.index.read().contains_key(key) {
            // Persisted after the snapshot was taken.
            return;
        }
        match read_record(&self.files, key).await {
            Ok(record) if record.is_expired(self.clock.now()) => match self.files.remove_strict(key).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    warn!(session_id = key, error = %e, "expired recovery record could not be removed");
                    report.errors += 1;
                }
            },
            Ok(record) => {
                self.index.write().entry(key.to_string()).or_insert(record);
            }
            Err(e) => {
                warn!(session_id = key, error = %e, "removing corrupt recovery record");
                report.errors += 1;
                if let Err(e) = self.files.remove_lenient(key).await {
                    warn!(session_id = key, error = %e, "corrupt recovery record could not be removed");
                }
            }
        }
    }

    pub fn stats(&self) -> RecoveryStats {
        let now = self.clock.now();
        let index = self.index.read();
        let total_bytes: u64 = index.values().map(|r| r.size_bytes).sum();
        RecoveryStats {
            total_count: index.len(),
            total_size_mb: total_bytes as f64 / (1024.0 * 1024.0),
            expired_count: index.values().filter(|r| r.is_expired(now)).count(),
            retention_hours: self.retention_hours,
        }
    }
}

async fn read_record(files: &RecordFiles, key: &str) -> Result<RecoveryRecord> {
    let raw = files.read_meta(key).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => OdError::Storage(format!("{key}: metadata missing")),
        _ => OdError::Storage(format!("{key}: {e}")),
    })?;
    let record: RecoveryRecord = serde_json::from_slice(&raw)?;
    if record.session_id != key {
        return Err(OdError::Storage(format!(
            "{key}: metadata belongs to {}",
            record.session_id
        )));
    }
    Ok(record)
}

/// Path equality after resolving symlinks and relative segments.
///
/// Falls back to plain comparison when either path cannot be resolved.
async fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
