//! Plain-text toolkit.
//!
//! Treats every document as UTF-8 text. It backs the default server build and
//! the test suites, where byte-exact round trips matter more than format
//! fidelity.

use async_trait::async_trait;
use std::any::Any;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

use crate::error::{OdError, Result};
use crate::toolkit::{Document, DocumentToolkit};
use crate::types::DocumentType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub document_type: DocumentType,
    pub content: String,
}

impl TextDocument {
    pub fn new(document_type: DocumentType, content: impl Into<String>) -> Self {
        Self {
            document_type,
            content: content.into(),
        }
    }
}

impl Document for TextDocument {
    fn document_type(&self) -> DocumentType {
        self.document_type
    }

    fn estimated_size(&self) -> u64 {
        self.content.capacity() as u64
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextToolkit;

impl TextToolkit {
    fn text_of(document: &dyn Document) -> Result<&TextDocument> {
        document
            .downcast_ref::<TextDocument>()
            .ok_or_else(|| OdError::Toolkit("document was not loaded by the text toolkit".into()))
    }

    // Plain text has no layout, so every native office format is the raw text.
    fn is_raw_format(format: &str) -> bool {
        format.eq_ignore_ascii_case("txt")
            || DocumentType::ALL
                .iter()
                .any(|ty| format.eq_ignore_ascii_case(ty.native_format()))
    }

    fn escape_html(text: &str) -> String {
        text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
    }
}

#[async_trait]
impl DocumentToolkit for TextToolkit {
    async fn load(&self, path: &Path, document_type: DocumentType) -> Result<Box<dyn Document>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OdError::not_found("file", path.display().to_string()))
            }
            Err(e) => return Err(OdError::Io(e)),
        };
        let content = String::from_utf8(bytes)
            .map_err(|e| OdError::Format(format!("{}: {e}", path.display())))?;
        Ok(Box::new(TextDocument::new(document_type, content)))
    }

    async fn save(&self, document: &dyn Document, path: &Path, format: &str) -> Result<()> {
        let bytes = self.export(document, format).await?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, bytes).await?;
        Ok(())
    }

    async fn export(&self, document: &dyn Document, format: &str) -> Result<Vec<u8>> {
        let doc = Self::text_of(document)?;
        if Self::is_raw_format(format) {
            return Ok(doc.content.as_bytes().to_vec());
        }
        if format.eq_ignore_ascii_case("html") {
            let html = format!("<pre>{}</pre>", Self::escape_html(&doc.content));
            return Ok(html.into_bytes());
        }
        if format.eq_ignore_ascii_case("json") {
            let body = serde_json::json!({
                "document_type": doc.document_type,
                "content": doc.content,
            });
            return Ok(serde_json::to_vec(&body)?);
        }
        Err(OdError::Format(format!(
            "{} documents cannot be exported as '{format}'",
            doc.document_type
        )))
    }
}
