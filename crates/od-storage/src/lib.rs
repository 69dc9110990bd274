//! OfficeDesk storage layer: durable recovery records for abandoned sessions.

pub mod local_fs;
pub mod record;
pub mod recovery;

pub use local_fs::RecordFiles;
pub use record::{
    CleanupReport, RecoverOptions, RecoveredFile, RecoveryMeta, RecoveryRecord, RecoveryStats,
};
pub use recovery::RecoveryStore;
