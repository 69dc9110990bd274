//! Shared types for OfficeDesk: errors, configuration, parameters, and the
//! toolkit boundary.

pub mod clock;
pub mod config;
pub mod deadline;
pub mod error;
pub mod params;
pub mod text;
pub mod toolkit;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::DeskConfig;
pub use deadline::Deadline;
pub use error::{ErrorKind, OdError, Result};
pub use params::ParameterBag;
pub use text::{TextDocument, TextToolkit};
pub use toolkit::{Document, DocumentToolkit, ToolkitSet};
pub use types::{AccessMode, DocumentType};
