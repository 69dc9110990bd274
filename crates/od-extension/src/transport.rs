//! How exports reach an extension process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use od_core::config::ExtensionConfig;
use od_core::error::Result;
use od_core::types::DocumentType;
use serde::{Deserialize, Serialize};

/// One export destined for one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub session_id: String,
    pub extension_id: String,
    pub document_type: DocumentType,
    pub format: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait ExtensionTransport: Send + Sync {
    /// Check that the extension can be reached. `Err` carries a human-readable reason.
    async fn probe(&self, extension: &ExtensionConfig) -> std::result::Result<(), String>;

    /// (Re)start the extension process.
    async fn start(&self, extension: &ExtensionConfig) -> Result<()>;

    async fn deliver(&self, extension: &ExtensionConfig, delivery: &Delivery) -> Result<()>;

    /// Stop the process if one is running.
    async fn stop(&self, extension_id: &str);
}
