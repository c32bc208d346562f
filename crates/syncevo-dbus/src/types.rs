//! Structured argument types of the server interface

use syncevo_core::config::ConfigEntry;
use syncevo_core::domain::{DomainError, SyncMode};
use syncevo_core::ports::SourceRequest;
use syncevo_gdbus::dbus_struct;

/// One configuration option, `(sss)` on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOption {
    /// Source name; empty for server-level options
    pub source: String,
    pub key: String,
    pub value: String,
}

dbus_struct!(ConfigOption {
    source: String,
    key: String,
    value: String,
});

impl ConfigOption {
    pub fn new(source: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

impl From<ConfigEntry> for ConfigOption {
    fn from(entry: ConfigEntry) -> Self {
        Self {
            source: entry.source,
            key: entry.key,
            value: entry.value,
        }
    }
}

impl From<ConfigOption> for ConfigEntry {
    fn from(option: ConfigOption) -> Self {
        ConfigEntry::new(option.source, option.key, option.value)
    }
}

/// A source to sync and its mode, `(si)` on the wire
///
/// Mode 0 keeps the mode from the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSelection {
    pub source: String,
    pub mode: i32,
}

dbus_struct!(SourceSelection {
    source: String,
    mode: i32,
});

impl SourceSelection {
    pub fn new(source: impl Into<String>, mode: Option<SyncMode>) -> Self {
        Self {
            source: source.into(),
            mode: mode.map_or(0, |mode| mode.code()),
        }
    }

    pub fn to_request(&self) -> Result<SourceRequest, DomainError> {
        let mode = match self.mode {
            0 => None,
            code => Some(SyncMode::from_code(code)?),
        };
        Ok(SourceRequest::new(self.source.clone(), mode))
    }
}
