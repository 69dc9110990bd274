//! Boundary to the document-manipulation toolkit.
//!
//! The core only needs three capabilities per document type: load a file,
//! save a loaded document, and export it to bytes in some format. Everything
//! else about the toolkit's object model stays behind [`Document`].

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{OdError, Result};
use crate::types::DocumentType;

/// An in-memory document owned by exactly one session or one-shot call.
pub trait Document: Send + Sync + 'static {
    fn document_type(&self) -> DocumentType;

    /// Rough in-memory footprint in bytes.
    fn estimated_size(&self) -> u64;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Document {
    pub fn downcast_ref<T: Document>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Document>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

#[async_trait]
pub trait DocumentToolkit: Send + Sync {
    /// Load `path`. Missing files are `NotFound`, unparseable content is `Format`.
    async fn load(&self, path: &Path, document_type: DocumentType) -> Result<Box<dyn Document>>;

    async fn save(&self, document: &dyn Document, path: &Path, format: &str) -> Result<()>;

    async fn export(&self, document: &dyn Document, format: &str) -> Result<Vec<u8>>;
}

/// Toolkit lookup by document type.
#[derive(Clone, Default)]
pub struct ToolkitSet {
    toolkits: HashMap<DocumentType, Arc<dyn DocumentToolkit>>,
}

impl ToolkitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve every document type with the same toolkit.
    pub fn uniform(toolkit: Arc<dyn DocumentToolkit>) -> Self {
        let mut set = Self::new();
        for ty in DocumentType::ALL {
            set.insert(ty, toolkit.clone());
        }
        set
    }

    pub fn insert(&mut self, document_type: DocumentType, toolkit: Arc<dyn DocumentToolkit>) {
        self.toolkits.insert(document_type, toolkit);
    }

    pub fn get(&self, document_type: DocumentType) -> Result<Arc<dyn DocumentToolkit>> {
        self.toolkits
            .get(&document_type)
            .cloned()
            .ok_or_else(|| OdError::not_found("toolkit", document_type.as_str()))
    }
}
