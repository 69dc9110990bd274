//! On-disk layout for recovery records.
//!
//! Each record is two files under the recovery directory:
//! `<session_id>.meta.json` and `<session_id>.doc`. Writes go through a
//! temp file and a rename so a crash never leaves a half-written record.

use od_core::error::{OdError, Result};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const META_SUFFIX: &str = ".meta.json";
pub const DOC_SUFFIX: &str = ".doc";

/// Session ids become file names, so only a conservative alphabet is allowed.
pub fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Write `data` to `path` via `<path>.tmp` + rename.
pub async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let result = async {
        let mut f = fs::File::create(&tmp).await?;
        f.write_all(data).await?;
        f.flush().await?;
        f.sync_all().await?;
        fs::rename(&tmp, path).await
    }
    .await;
    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    result
}

/// File-per-record store rooted at one directory.
#[derive(Debug, Clone)]
pub struct RecordFiles {
    root: PathBuf,
}

impl RecordFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| OdError::Storage(format!("mkdir {}: {e}", self.root.display())))
    }

    pub fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{META_SUFFIX}"))
    }

    pub fn doc_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{DOC_SUFFIX}"))
    }

    pub async fn read_meta(&self, key: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.meta_path(key)).await
    }

    pub async fn read_doc(&self, key: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.doc_path(key)).await
    }

    /// Write the document first, then the metadata that makes it visible.
    pub async fn write(&self, key: &str, meta: &[u8], doc: &[u8]) -> Result<()> {
        write_atomic(&self.doc_path(key), doc)
            .await
            .map_err(|e| OdError::Storage(format!("write document {key}: {e}")))?;
        write_atomic(&self.meta_path(key), meta)
            .await
            .map_err(|e| OdError::Storage(format!("write metadata {key}: {e}")))
    }

    /// Remove both files. Fails if either is missing or cannot be removed;
    /// the other file is still attempted.
    pub async fn remove_strict(&self, key: &str) -> std::io::Result<()> {
        let meta = fs::remove_file(self.meta_path(key)).await;
        let doc = fs::remove_file(self.doc_path(key)).await;
        meta.and(doc)
    }

    /// Remove both files, treating already-absent files as success.
    pub async fn remove_lenient(&self, key: &str) -> std::io::Result<()> {
        for path in [self.meta_path(key), self.doc_path(key)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Keys that have at least one file on disk.
    pub async fn keys(&self) -> Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        let mut rd = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(OdError::Storage(format!("ls {}: {e}", self.root.display()))),
        };
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| OdError::Storage(format!("ls entry: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let key = name
                .strip_suffix(META_SUFFIX)
                .or_else(|| name.strip_suffix(DOC_SUFFIX));
            if let Some(key) = key.filter(|k| is_safe_key(k)) {
                keys.insert(key.to_string());
            }
        }
        Ok(keys)
    }
}
