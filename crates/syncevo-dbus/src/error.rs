//! Service error types
//!
//! Every [`ServerError`] travels as an `org.syncevolution.Exception.*`
//! error reply.

use syncevo_core::domain::DomainError;
use syncevo_gdbus::DBusError;
use thiserror::Error;

/// Prefix of all service error names
pub const ERROR_PREFIX: &str = "org.syncevolution.Exception";

/// Errors reported by the sync service
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Another sync is running
    #[error("a sync of {0} is already running")]
    Busy(String),

    /// The named server is not configured
    #[error("no such server: {0}")]
    NoSuchServer(String),

    /// The operation needs a running sync of that server
    #[error("no sync of {0} is running")]
    NotRunning(String),

    /// Options or source selections that cannot be applied
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The sync ended with an error
    #[error("sync failed: {0}")]
    SyncFailed(String),

    /// The sync was aborted before it finished
    #[error("sync of {0} was aborted")]
    Aborted(String),

    /// The configuration could not be written
    #[error("cannot store configuration: {0}")]
    Storage(String),

    /// The service object no longer exists
    #[error("service is shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// The dotted error name used on the wire
    pub fn dbus_name(&self) -> String {
        let suffix = match self {
            ServerError::Busy(_) => "Busy",
            ServerError::NoSuchServer(_) => "NoSuchServer",
            ServerError::NotRunning(_) => "NotRunning",
            ServerError::InvalidConfig(_) => "InvalidConfig",
            ServerError::SyncFailed(_) => "SyncFailed",
            ServerError::Aborted(_) => "Aborted",
            ServerError::Storage(_) | ServerError::ShuttingDown => "Exception",
        };
        format!("{ERROR_PREFIX}.{suffix}")
    }
}

impl From<DomainError> for ServerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NoSuchServer(name) => ServerError::NoSuchServer(name),
            DomainError::SyncFailed(msg) => ServerError::SyncFailed(msg),
            other => ServerError::InvalidConfig(other.to_string()),
        }
    }
}

impl From<ServerError> for DBusError {
    fn from(err: ServerError) -> Self {
        DBusError::callable(err.dbus_name(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names() {
        assert_eq!(
            ServerError::Busy("a".to_string()).dbus_name(),
            "org.syncevolution.Exception.Busy"
        );
        assert_eq!(
            ServerError::NoSuchServer("a".to_string()).dbus_name(),
            "org.syncevolution.Exception.NoSuchServer"
        );
        assert_eq!(
            ServerError::ShuttingDown.dbus_name(),
            "org.syncevolution.Exception.Exception"
        );
    }

    #[test]
    fn test_conversion_to_dbus_error() {
        let err: DBusError = ServerError::NoSuchServer("work".to_string()).into();
        assert_eq!(err.dbus_name(), "org.syncevolution.Exception.NoSuchServer");
        assert_eq!(err.wire_message(), "no such server: work");
    }

    #[test]
    fn test_domain_errors() {
        assert_eq!(
            ServerError::from(DomainError::NoSuchServer("x".to_string())),
            ServerError::NoSuchServer("x".to_string())
        );
        assert!(matches!(
            ServerError::from(DomainError::InvalidSyncMode("y".to_string())),
            ServerError::InvalidConfig(_)
        ));
    }
}
