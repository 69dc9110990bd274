//! Document sessions for OfficeDesk.
//!
//! A session owns one loaded document behind its own lock. The store ties
//! sessions to the recovery store (abandoned dirty sessions) and to the
//! extension supervisor (pushes on save).

pub mod maintenance;
pub mod manager;
pub mod session;

pub use maintenance::{Maintenance, MaintenanceHandle, MaintenanceReport};
pub use manager::SessionStore;
pub use session::{
    DisconnectResult, EvictionReport, PushOutcome, SaveResult, SessionGuard, SessionInfo,
};
