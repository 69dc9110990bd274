use od_core::deadline::Deadline;
use od_core::error::{OdError, Result};
use od_core::params::ParameterBag;
use od_core::types::{AccessMode, DocumentType};
use od_session::SessionStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::{ContextSource, DocumentContext};
use crate::handler::OperationOutput;
use crate::registry::HandlerRegistry;

/// What an operation runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchTarget {
    Session {
        session_id: String,
    },
    /// One-shot call: load, execute, save if dirty, drop.
    File {
        path: PathBuf,
        #[serde(default)]
        output_path: Option<PathBuf>,
        /// Keep the document open as a new session afterwards.
        #[serde(default)]
        retain_session: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub document_type: DocumentType,
    pub operation: String,
    #[serde(default)]
    pub params: ParameterBag,
    pub target: DispatchTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub operation: String,
    pub output: OperationOutput,
    pub dirty: bool,
    /// Set when a one-shot call wrote its result.
    pub saved_to: Option<PathBuf>,
    /// Set for session calls and for retained one-shot calls.
    pub session_id: Option<String>,
}

pub struct Dispatcher {
    registries: HashMap<DocumentType, HandlerRegistry>,
    sessions: Arc<SessionStore>,
}

impl Dispatcher {
    pub fn new(
        registries: impl IntoIterator<Item = HandlerRegistry>,
        sessions: Arc<SessionStore>,
    ) -> Result<Self> {
        let mut by_type = HashMap::new();
        for registry in registries {
            let ty = registry.document_type();
            if by_type.insert(ty, registry).is_some() {
                return Err(OdError::Config(format!("duplicate handler registry for {ty}")));
            }
        }
        Ok(Self {
            registries: by_type,
            sessions,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn registry(&self, document_type: DocumentType) -> Result<&HandlerRegistry> {
        self.registries
            .get(&document_type)
            .ok_or_else(|| OdError::not_found("handler registry", document_type.as_str()))
    }

    pub async fn dispatch(&self, request: DispatchRequest, deadline: Deadline) -> Result<DispatchResponse> {
        let DispatchRequest {
            document_type,
            operation,
            params,
            target,
        } = request;
        let handler = self.registry(document_type)?.get_handler(&operation)?;
        debug!(document_type = %document_type, operation = %operation, "dispatching");

        match target {
            DispatchTarget::Session { session_id } => {
                let mut guard = self.sessions.lock(&session_id).await?;
                let session_type = guard.document_type();
                if session_type != document_type {
                    return Err(OdError::argument(format!(
                        "session {session_id} holds a {session_type} document, not {document_type}"
                    )));
                }
                if handler.is_mutating() && !guard.mode().is_writable() {
                    return Err(OdError::argument(format!(
                        "operation '{operation}' modifies the document but session {session_id} is read-only"
                    )));
                }
                let source = ContextSource::Session {
                    session_id: session_id.clone(),
                };
                let mut ctx = DocumentContext::new(guard.document_mut(), source);
                let result = handler.execute(&mut ctx, &params);
                // A handler may edit and then fail; the edit still has to reach save or recovery.
                let dirty = ctx.is_dirty();
                if dirty {
                    guard.mark_dirty();
                }
                let output = result?;
                Ok(DispatchResponse {
                    operation,
                    output,
                    dirty,
                    saved_to: None,
                    session_id: Some(session_id),
                })
            }
            DispatchTarget::File {
                path,
                output_path,
                retain_session,
            } => {
                let toolkit = self.sessions.toolkits().get(document_type)?;
                let deadline = deadline.or(self.sessions.config().operation_timeout());
                let mut document = deadline
                    .run("open", toolkit.load(&path, document_type))
                    .await?;

                let source = ContextSource::File {
                    path: path.clone(),
                    output_path: output_path.clone(),
                };
                let mut ctx = DocumentContext::new(document.as_mut(), source);
                // On failure the loaded copy is dropped unsaved, so the file is untouched.
                let output = handler.execute(&mut ctx, &params)?;
                let dirty = ctx.is_dirty();

                let saved_to = if dirty {
                    let target = output_path.unwrap_or_else(|| path.clone());
                    let format = document_type.save_format(&target);
                    deadline
                        .run("save", toolkit.save(document.as_ref(), &target, &format))
                        .await?;
                    info!(operation = %operation, path = %target.display(), "one-shot result saved");
                    Some(target)
                } else {
                    None
                };

                let session_id = if retain_session {
                    let source_path = saved_to.clone().unwrap_or(path);
                    let info = self
                        .sessions
                        .adopt(document, source_path, AccessMode::ReadWrite, false);
                    Some(info.id)
                } else {
                    None
                };

                Ok(DispatchResponse {
                    operation,
                    output,
                    dirty,
                    saved_to,
                    session_id,
                })
            }
        }
    }
}
