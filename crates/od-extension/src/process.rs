//! Extension transport backed by child processes.
//!
//! Each extension runs as one long-lived child, spawned by `start`. Every
//! delivery is a single JSON line on the child's stdin with the export
//! base64-encoded in `data`.
//! A child that has exited, or a broken pipe, is reported as a failure and
//! the supervisor marks the extension crashed.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use od_core::config::ExtensionConfig;
use od_core::error::{OdError, Result};
use serde_json::json;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::transport::{Delivery, ExtensionTransport};

struct RunningChild {
    child: Child,
    stdin: ChildStdin,
}

#[derive(Default)]
pub struct ProcessTransport {
    children: Mutex<HashMap<String, RunningChild>>,
}

impl ProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn(extension: &ExtensionConfig) -> Result<RunningChild> {
        let command = extension
            .command
            .as_ref()
            .ok_or_else(|| OdError::Config(format!("extension {} has no command", extension.id)))?;
        let mut child = Command::new(command)
            .args(&extension.args)
            .env("OFFICEDESK_EXTENSION_ID", &extension.id)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OdError::Storage(format!("spawn {}: {e}", command.display())))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OdError::Storage(format!("extension {} has no stdin", extension.id)))?;
        info!(extension_id = %extension.id, pid = ?child.id(), "extension process started");
        Ok(RunningChild { child, stdin })
    }

    fn encode(delivery: &Delivery) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(&json!({
            "session_id": delivery.session_id,
            "document_type": delivery.document_type,
            "format": delivery.format,
            "created_at": delivery.created_at,
            "data": BASE64.encode(&delivery.payload),
        }))?;
        line.push(b'\n');
        Ok(line)
    }
}

#[async_trait]
impl ExtensionTransport for ProcessTransport {
    async fn probe(&self, extension: &ExtensionConfig) -> std::result::Result<(), String> {
        let Some(command) = extension.command.as_ref() else {
            return Err("misconfigured: no command".into());
        };
        if !command.is_file() {
            return Err(format!("not found: {}", command.display()));
        }
        let mut children = self.children.lock().await;
        if let Some(running) = children.get_mut(&extension.id) {
            match running.child.try_wait() {
                Ok(None) => {}
                Ok(Some(status)) => {
                    children.remove(&extension.id);
                    return Err(format!("unhealthy: process exited with {status}"));
                }
                Err(e) => return Err(format!("unhealthy: {e}")),
            }
        }
        Ok(())
    }

    async fn start(&self, extension: &ExtensionConfig) -> Result<()> {
        let mut children = self.children.lock().await;
        if let Some(mut old) = children.remove(&extension.id) {
            let _ = old.child.kill().await;
        }
        let running = Self::spawn(extension)?;
        children.insert(extension.id.clone(), running);
        Ok(())
    }

    async fn deliver(&self, extension: &ExtensionConfig, delivery: &Delivery) -> Result<()> {
        let line = Self::encode(delivery)?;
        let mut children = self.children.lock().await;
        // Only `start` spawns.
        let Some(running) = children.get_mut(&extension.id) else {
            return Err(OdError::Storage(format!("extension {} not running", extension.id)));
        };
        if let Ok(Some(status)) = running.child.try_wait() {
            children.remove(&extension.id);
            return Err(OdError::Storage(format!(
                "extension {} exited with {status}",
                extension.id
            )));
        }
        let written = async {
            running.stdin.write_all(&line).await?;
            running.stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(extension_id = %extension.id, error = %e, "extension pipe closed");
            children.remove(&extension.id);
            return Err(OdError::Io(e));
        }
        debug!(
            extension_id = %extension.id,
            session_id = %delivery.session_id,
            bytes = delivery.payload.len(),
            "export delivered"
        );
        Ok(())
    }

    async fn stop(&self, extension_id: &str) {
        if let Some(mut running) = self.children.lock().await.remove(extension_id) {
            let _ = running.child.kill().await;
            info!(extension_id, "extension process stopped");
        }
    }
}
