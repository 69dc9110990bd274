use od_core::error::{OdError, Result};
use od_core::toolkit::Document;
use od_core::types::DocumentType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the document behind a context came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextSource {
    Session { session_id: String },
    File { path: PathBuf, output_path: Option<PathBuf> },
}

/// A loaded document handed to a handler, plus its dirty flag.
pub struct DocumentContext<'a> {
    document: &'a mut dyn Document,
    source: ContextSource,
    dirty: bool,
}

impl<'a> DocumentContext<'a> {
    pub fn new(document: &'a mut dyn Document, source: ContextSource) -> Self {
        Self {
            document,
            source,
            dirty: false,
        }
    }

    pub fn document_type(&self) -> DocumentType {
        self.document.document_type()
    }

    pub fn source(&self) -> &ContextSource {
        &self.source
    }

    pub fn session_id(&self) -> Option<&str> {
        match &self.source {
            ContextSource::Session { session_id } => Some(session_id),
            ContextSource::File { .. } => None,
        }
    }

    pub fn document(&self) -> &dyn Document {
        &*self.document
    }

    pub fn document_mut(&mut self) -> &mut dyn Document {
        &mut *self.document
    }

    /// Borrow the document as the toolkit's concrete type.
    pub fn document_as<T: Document>(&self) -> Result<&T> {
        let ty = self.document_type();
        self.document
            .downcast_ref::<T>()
            .ok_or_else(|| OdError::Toolkit(format!("{ty} document has an unexpected representation")))
    }

    pub fn document_as_mut<T: Document>(&mut self) -> Result<&mut T> {
        let ty = self.document_type();
        self.document
            .downcast_mut::<T>()
            .ok_or_else(|| OdError::Toolkit(format!("{ty} document has an unexpected representation")))
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
