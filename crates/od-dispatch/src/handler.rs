use od_core::error::Result;
use od_core::params::ParameterBag;
use serde::{Deserialize, Serialize};

use crate::context::DocumentContext;

/// Result of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OperationOutput {
    Empty,
    Text(String),
    Json(serde_json::Value),
}

impl OperationOutput {
    pub fn json(value: impl Serialize) -> Result<Self> {
        Ok(OperationOutput::Json(serde_json::to_value(value)?))
    }
}

/// One named operation against one document type.
///
/// Handlers signal mutation through [`DocumentContext::mark_dirty`]; the
/// dispatcher decides what that means for the target.
pub trait OperationHandler: Send + Sync {
    fn operation(&self) -> &'static str;

    /// Whether the operation may change the document. Read-only sessions reject these.
    fn is_mutating(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &mut DocumentContext<'_>, params: &ParameterBag) -> Result<OperationOutput>;
}
