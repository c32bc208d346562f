//! Port definitions
//!
//! - [`SyncEngine`] - starts syncs with a SyncML server
//! - [`SyncRun`] - one running sync, advanced step by step

pub mod sync_engine;

pub use sync_engine::{SourceRequest, StepOutcome, SyncEngine, SyncRun};
