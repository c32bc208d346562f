//! SyncEvolution Core - configuration, domain types and the sync engine port
//!
//! - **Configuration** - `Config` with server and template sections, loaded
//!   from YAML
//! - **Domain** - `SyncMode`, `ProgressEvent`, `SyncReport`, `ReportLog`
//! - **Ports** - `SyncEngine` / `SyncRun`, the interface to the engine that
//!   actually talks to a SyncML server
//! - **Simulated engine** - deterministic `SyncEngine` used by the CLI demo
//!   and the tests
//!
//! Nothing in this crate knows about D-Bus; the service crate maps these
//! types onto the bus.

pub mod config;
pub mod domain;
pub mod ports;
pub mod simulated;
