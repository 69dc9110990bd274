//! Operation dispatch for OfficeDesk.
//!
//! Each document type has a [`HandlerRegistry`] built from an explicit table
//! of handler factories. The [`Dispatcher`] resolves a request to a handler,
//! runs it against a session or a one-shot file, and applies the dirty flag
//! the handler left behind.

pub mod builtin;
pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod registry;

pub use context::{ContextSource, DocumentContext};
pub use dispatcher::{DispatchRequest, DispatchResponse, DispatchTarget, Dispatcher};
pub use handler::{OperationHandler, OperationOutput};
pub use registry::{factory, HandlerFactory, HandlerRegistry};
