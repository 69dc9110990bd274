use od_core::error::{OdError, Result};
use od_core::types::DocumentType;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::handler::OperationHandler;

/// Builds one handler. Registration tables are plain slices of these.
pub type HandlerFactory = fn() -> Arc<dyn OperationHandler>;

/// Factory for any default-constructible handler.
pub fn factory<H: OperationHandler + Default + 'static>() -> Arc<dyn OperationHandler> {
    Arc::new(H::default())
}

/// Operation name to handler, for one document type.
pub struct HandlerRegistry {
    document_type: DocumentType,
    handlers: BTreeMap<&'static str, Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    pub fn new(document_type: DocumentType) -> Self {
        Self {
            document_type,
            handlers: BTreeMap::new(),
        }
    }

    /// Build a registry from an explicit table, failing on the first duplicate name.
    pub fn from_table(document_type: DocumentType, table: &[HandlerFactory]) -> Result<Self> {
        let mut registry = Self::new(document_type);
        registry.register_all(table.iter().map(|factory| factory()))?;
        Ok(registry)
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn register(&mut self, handler: Arc<dyn OperationHandler>) -> Result<()> {
        let name = handler.operation();
        if self.handlers.contains_key(name) {
            return Err(OdError::Config(format!(
                "duplicate handler '{name}' for {}",
                self.document_type
            )));
        }
        debug!(document_type = %self.document_type, operation = name, "handler registered");
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn register_all(
        &mut self,
        handlers: impl IntoIterator<Item = Arc<dyn OperationHandler>>,
    ) -> Result<()> {
        for handler in handlers {
            self.register(handler)?;
        }
        Ok(())
    }

    pub fn get_handler(&self, operation: &str) -> Result<Arc<dyn OperationHandler>> {
        self.handlers
            .get(operation)
            .cloned()
            .ok_or_else(|| OdError::UnknownOperation {
                document_type: self.document_type.to_string(),
                operation: operation.to_string(),
            })
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
