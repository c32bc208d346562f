//! Domain types
//!
//! - Sync modes per source
//! - Progress events emitted while a sync runs
//! - Reports of finished syncs and the bounded report log
//! - Domain-specific error types

pub mod errors;
pub mod progress;
pub mod report;
pub mod sync_mode;

pub use errors::DomainError;
pub use progress::{ProgressEvent, ProgressKind};
pub use report::{ReportLog, SourceStats, SyncReport, SyncStatus};
pub use sync_mode::SyncMode;
