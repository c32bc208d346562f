//! D-Bus service for SyncEvolution
//!
//! Exports the `org.syncevolution.Server` interface on top of the
//! `syncevo-gdbus` binding layer and provides the matching client proxy:
//!
//! - [`SyncServer`] - configuration access, sync reports and sync control
//! - [`SyncevoService`] - typed client calls and signal callbacks
//!
//! Signals: `Progress`, `ServerMessage` and `NeedPassword`.

pub mod client;
pub mod error;
pub mod service;
pub mod types;

pub use client::SyncevoService;
pub use error::ServerError;
pub use service::{SyncServer, DBUS_INTERFACE, DBUS_NAME, DBUS_PATH};
pub use types::{ConfigOption, SourceSelection};
