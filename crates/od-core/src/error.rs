use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Caller-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Argument,
    NotFound,
    Format,
    UnsavedChanges,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Whether a caller may retry the same request unchanged.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Timeout)
    }
}

#[derive(Error, Debug)]
pub enum OdError {
    #[error("Invalid argument: {0}")]
    Argument(String),
    #[error("Missing required parameter: {key}")]
    MissingParameter { key: String },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("Unknown operation '{operation}' for {document_type}")]
    UnknownOperation { document_type: String, operation: String },
    #[error("Format error: {0}")]
    Format(String),
    #[error("Session {session_id} has unsaved changes")]
    UnsavedChanges { session_id: String },
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout { operation: &'static str, elapsed: Duration },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Toolkit error: {0}")]
    Toolkit(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OdError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        OdError::NotFound { kind, id: id.into() }
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        OdError::Argument(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OdError::Argument(_) | OdError::MissingParameter { .. } => ErrorKind::Argument,
            OdError::NotFound { .. } | OdError::UnknownOperation { .. } => ErrorKind::NotFound,
            OdError::Format(_) => ErrorKind::Format,
            OdError::UnsavedChanges { .. } => ErrorKind::UnsavedChanges,
            OdError::Timeout { .. } => ErrorKind::Timeout,
            OdError::Config(_)
            | OdError::Toolkit(_)
            | OdError::Storage(_)
            | OdError::Io(_)
            | OdError::Serialization(_)
            | OdError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Stable error code for structured logging and API bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            OdError::Argument(_) => "invalid_argument",
            OdError::MissingParameter { .. } => "missing_parameter",
            OdError::NotFound { .. } => "not_found",
            OdError::UnknownOperation { .. } => "unknown_operation",
            OdError::Format(_) => "format_error",
            OdError::UnsavedChanges { .. } => "unsaved_changes",
            OdError::Timeout { .. } => "timeout",
            OdError::Config(_) => "config_error",
            OdError::Toolkit(_) => "toolkit_error",
            OdError::Storage(_) => "storage_error",
            OdError::Io(_) => "io_error",
            OdError::Serialization(_) => "serialization_error",
            OdError::Other(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, OdError>;
