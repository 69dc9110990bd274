//! Extension supervision for OfficeDesk.
//!
//! Extensions are helper processes that receive exports of a session's
//! document whenever it is saved. The supervisor tracks each one through
//! `NotFound -> Idle -> Running -> Idle | Crashed`, restarts crashed
//! extensions up to a bounded count, and keeps per-session bindings.

pub mod process;
pub mod state;
pub mod supervisor;
pub mod transport;

pub use process::ProcessTransport;
pub use state::{ExtensionState, InvalidTransition, RestartDecision, RestartPolicy};
pub use supervisor::{
    Binding, ExportSource, ExtensionInfo, ExtensionStatus, ExtensionSupervisor, PreparedPush,
    PushFailure, PushReport,
};
pub use transport::{Delivery, ExtensionTransport};

#[cfg(test)]
mod tests;
