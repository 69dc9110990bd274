use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::OdError;

/// Document family handled by a toolkit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Word,
    Excel,
    PowerPoint,
    Pdf,
    Email,
}

impl DocumentType {
    pub const ALL: [DocumentType; 5] = [
        DocumentType::Word,
        DocumentType::Excel,
        DocumentType::PowerPoint,
        DocumentType::Pdf,
        DocumentType::Email,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Word => "word",
            DocumentType::Excel => "excel",
            DocumentType::PowerPoint => "powerpoint",
            DocumentType::Pdf => "pdf",
            DocumentType::Email => "email",
        }
    }

    /// Format the toolkit writes when no other format is requested.
    pub fn native_format(self) -> &'static str {
        match self {
            DocumentType::Word => "docx",
            DocumentType::Excel => "xlsx",
            DocumentType::PowerPoint => "pptx",
            DocumentType::Pdf => "pdf",
            DocumentType::Email => "eml",
        }
    }

    /// Format implied by the extension of `path`, or the native one when it has none.
    pub fn save_format(self, path: &Path) -> String {
        path.extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| self.native_format().to_string())
    }

    /// Guess the document type from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "doc" | "docx" | "docm" | "rtf" | "odt" | "txt" => Some(DocumentType::Word),
            "xls" | "xlsx" | "xlsm" | "csv" | "ods" => Some(DocumentType::Excel),
            "ppt" | "pptx" | "pptm" | "odp" => Some(DocumentType::PowerPoint),
            "pdf" => Some(DocumentType::Pdf),
            "eml" | "msg" | "mht" => Some(DocumentType::Email),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = OdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "word" => Ok(DocumentType::Word),
            "excel" => Ok(DocumentType::Excel),
            "powerpoint" | "ppt" => Ok(DocumentType::PowerPoint),
            "pdf" => Ok(DocumentType::Pdf),
            "email" => Ok(DocumentType::Email),
            other => Err(OdError::argument(format!("unknown document type: {other}"))),
        }
    }
}

/// Access mode fixed when a session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl AccessMode {
    pub fn is_writable(self) -> bool {
        self == AccessMode::ReadWrite
    }
}

/// Generate a fresh session identifier.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
