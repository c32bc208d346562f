//! Error taxonomy of the binding layer
//!
//! Every error carries a dotted D-Bus error name (see [`DBusError::dbus_name`])
//! and a human-readable message. Errors raised while dispatching an inbound
//! call are converted into error replies; errors of outbound operations
//! (signal emission, remote calls) are returned to the calling code.

use thiserror::Error;

use crate::message::{Message, MessageType};

/// Generic fallback name for native errors without a name of their own.
pub const GENERIC_ERROR: &str = "org.syncevolution.gdbus-cxx.Exception";

/// Error name used when a call names a method that is not registered.
pub const NO_MATCHING_METHOD: &str = "org.SyncEvolution.NoMatchingMethodName";

/// Error name for malformed or mistyped call arguments.
pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";

/// Error name for failures of the underlying transport.
pub const TRANSPORT_FAILED: &str = "org.freedesktop.DBus.Error.Failed";

/// Errors of the D-Bus binding layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DBusError {
    /// A wire value had the wrong type, or a required value was missing
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The dispatch table has no entry for the called method
    #[error("No methods registered with this name: {method}")]
    NoMatchingMethod {
        /// Name of the method that was called
        method: String,
    },

    /// A method handler failed with its own error name
    #[error("{message}")]
    Callable {
        /// Dotted D-Bus error name
        name: String,
        /// Error text sent to the caller
        message: String,
    },

    /// A native error without a symbolic name of its own
    #[error("{0}")]
    Failed(String),

    /// Sending or receiving a message failed
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote side answered a call with an error reply
    #[error("{name}: {message}")]
    Remote {
        /// Error name from the reply
        name: String,
        /// Error text from the reply, empty if there was none
        message: String,
    },

    /// A result handle was completed more than once
    #[error("reply for this method call was already sent")]
    AlreadyReplied,

    /// A bus name, interface name, member name or object path is malformed
    #[error("invalid name: {0}")]
    InvalidName(String),
}

impl DBusError {
    /// Creates a handler error with an explicit D-Bus error name
    pub fn callable(name: impl Into<String>, message: impl Into<String>) -> Self {
        DBusError::Callable {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The dotted error name used on the wire
    pub fn dbus_name(&self) -> &str {
        match self {
            DBusError::InvalidArgument(_) | DBusError::InvalidName(_) => INVALID_ARGS,
            DBusError::NoMatchingMethod { .. } => NO_MATCHING_METHOD,
            DBusError::Callable { name, .. } | DBusError::Remote { name, .. } => name,
            DBusError::Failed(_) | DBusError::AlreadyReplied => GENERIC_ERROR,
            DBusError::Transport(_) => TRANSPORT_FAILED,
        }
    }

    /// The error text used on the wire
    ///
    /// Unlike `to_string()` this does not repeat the error name for
    /// [`DBusError::Remote`] and omits the method name of
    /// [`DBusError::NoMatchingMethod`], matching what D-Bus peers expect.
    pub fn wire_message(&self) -> String {
        match self {
            DBusError::NoMatchingMethod { .. } => "No methods registered with this name".to_string(),
            DBusError::Callable { message, .. } | DBusError::Remote { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }

    /// Builds the error carried by an error reply message
    ///
    /// Returns `None` if `msg` is not an error reply.
    pub fn from_reply(msg: &Message) -> Option<Self> {
        if msg.message_type() != MessageType::Error {
            return None;
        }
        Some(DBusError::Remote {
            name: msg.error_name().unwrap_or(GENERIC_ERROR).to_string(),
            message: msg.error_text().unwrap_or_default().to_string(),
        })
    }
}

impl From<zbus::zvariant::Error> for DBusError {
    fn from(err: zbus::zvariant::Error) -> Self {
        DBusError::InvalidArgument(err.to_string())
    }
}

impl From<zbus::names::Error> for DBusError {
    fn from(err: zbus::names::Error) -> Self {
        DBusError::InvalidName(err.to_string())
    }
}

impl From<zbus::Error> for DBusError {
    fn from(err: zbus::Error) -> Self {
        match err {
            zbus::Error::Variant(err) => err.into(),
            zbus::Error::Names(err) => err.into(),
            zbus::Error::MethodError(name, message, _) => DBusError::Remote {
                name: name.to_string(),
                message: message.unwrap_or_default(),
            },
            other => DBusError::Transport(other.to_string()),
        }
    }
}

impl From<zbus::fdo::Error> for DBusError {
    fn from(err: zbus::fdo::Error) -> Self {
        match err {
            zbus::fdo::Error::ZBus(err) => err.into(),
            other => DBusError::Transport(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for DBusError {
    fn from(err: anyhow::Error) -> Self {
        DBusError::Failed(format!("{err:#}"))
    }
}

/// Result alias used throughout the binding layer
pub type Result<T, E = DBusError> = std::result::Result<T, E>;
