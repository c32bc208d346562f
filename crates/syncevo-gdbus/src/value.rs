//! Dynamically typed wire values
//!
//! [`Value`] is zvariant's dynamic value, fixed to owned data. Message
//! bodies are sequences of values; the [`crate::marshal`] registry converts
//! between values and native Rust types, the [`crate::codec`] between values
//! and bytes.

use std::fmt;

use zbus::zvariant;

use crate::error::{DBusError, Result};
use crate::signature::Signature;

/// One D-Bus value together with enough type information to marshal it
pub type Value = zvariant::Value<'static>;

/// Signature and description helpers on [`Value`]
pub trait ValueExt {
    /// Signature of this value
    fn wire_signature(&self) -> Signature;

    /// Short description of the value's kind, for error messages
    fn kind(&self) -> &'static str;

    /// Copies the value
    ///
    /// Only values carrying file descriptors can fail to copy, and those
    /// never pass the codec.
    fn duplicate(&self) -> Result<Value>;
}

impl ValueExt for Value {
    fn wire_signature(&self) -> Signature {
        Signature::from(&self.value_signature())
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::U8(_) => "byte",
            Value::Bool(_) => "boolean",
            Value::I16(_) => "int16",
            Value::U16(_) => "uint16",
            Value::I32(_) => "int32",
            Value::U32(_) => "uint32",
            Value::I64(_) => "int64",
            Value::U64(_) => "uint64",
            Value::F64(_) => "double",
            Value::Str(_) => "string",
            Value::ObjectPath(_) => "object path",
            Value::Signature(_) => "signature",
            Value::Value(_) => "variant",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
            Value::Structure(_) => "struct",
            #[allow(unreachable_patterns)]
            _ => "file descriptor",
        }
    }

    fn duplicate(&self) -> Result<Value> {
        Ok(self.try_clone()?)
    }
}

/// Signature of a sequence of values, as found in a message header
pub fn body_signature(values: &[Value]) -> Signature {
    let parts: Vec<Signature> = values.iter().map(Value::wire_signature).collect();
    Signature::concat(&parts)
}

/// Copies a sequence of values
pub fn duplicate_all(values: &[Value]) -> Result<Vec<Value>> {
    values.iter().map(Value::duplicate).collect()
}

/// A string validated against the D-Bus object path syntax
///
/// Paths start with `/`, consist of `/`-separated elements made of
/// `[A-Za-z0-9_]` and must not end with `/` (except the root path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        zvariant::ObjectPath::try_from(path.as_str())
            .map_err(|e| DBusError::InvalidName(format!("object path '{path}': {e}")))?;
        Ok(ObjectPath(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// The zvariant form, for building values
    pub fn to_zvariant(&self) -> zvariant::ObjectPath<'static> {
        zvariant::ObjectPath::from_string_unchecked(self.0.clone())
    }
}

impl Default for ObjectPath {
    fn default() -> Self {
        ObjectPath("/".to_string())
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = DBusError;

    fn try_from(path: &str) -> Result<Self> {
        ObjectPath::new(path)
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = DBusError;

    fn try_from(path: String) -> Result<Self> {
        ObjectPath::new(path)
    }
}

impl From<&zvariant::ObjectPath<'_>> for ObjectPath {
    fn from(path: &zvariant::ObjectPath<'_>) -> Self {
        ObjectPath(path.as_str().to_string())
    }
}
