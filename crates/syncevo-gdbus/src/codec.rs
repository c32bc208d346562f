//! Message body encoding
//!
//! Bodies are marshaled by zvariant in the D-Bus format, little endian. The
//! serializer asserts on lengths that do not fit their wire prefix, so
//! [`encode_body`] checks signatures and strings first and reports those as
//! errors. Decoding relies on zvariant's container depth limits and bounds
//! checks; anything it rejects surfaces as `InvalidArgument`.

use zbus::zvariant::{self, serialized, OwnedStructure, Structure, StructureBuilder, LE};

use crate::error::{DBusError, Result};
use crate::signature::{Signature, MAX_SIGNATURE_LEN};
use crate::value::{body_signature, Value, ValueExt};

/// Longest message the bus accepts, and so the longest possible string
pub const MAX_MESSAGE_LEN: usize = 128 * 1024 * 1024;

fn context() -> serialized::Context {
    serialized::Context::new_dbus(LE, 0)
}

/// Checks that `values` can be written as a message body
pub fn check_encodable(values: &[Value]) -> Result<()> {
    let signature = body_signature(values);
    if signature.len() > MAX_SIGNATURE_LEN {
        return Err(DBusError::InvalidArgument(format!(
            "body signature of {} bytes exceeds {MAX_SIGNATURE_LEN}",
            signature.len()
        )));
    }
    values.iter().try_for_each(check_value)
}

fn check_value(value: &Value) -> Result<()> {
    match value {
        Value::Str(s) => check_string_len("string", s.len()),
        Value::ObjectPath(path) => check_string_len("object path", path.len()),
        Value::Signature(s) => check_signature_len(s.len()),
        Value::Value(inner) => {
            check_signature_len(inner.wire_signature().len())?;
            check_value(inner)
        }
        Value::Array(array) => array.iter().try_for_each(check_value),
        Value::Dict(dict) => dict.iter().try_for_each(|(key, value)| {
            check_value(key)?;
            check_value(value)
        }),
        Value::Structure(s) => s.fields().iter().try_for_each(check_value),
        _ => Ok(()),
    }
}

fn check_signature_len(len: usize) -> Result<()> {
    if len > MAX_SIGNATURE_LEN {
        return Err(DBusError::InvalidArgument(format!(
            "signature of {len} bytes exceeds {MAX_SIGNATURE_LEN}"
        )));
    }
    Ok(())
}

fn check_string_len(kind: &str, len: usize) -> Result<()> {
    if len > MAX_MESSAGE_LEN {
        return Err(DBusError::InvalidArgument(format!(
            "{kind} of {len} bytes does not fit in a message"
        )));
    }
    Ok(())
}

/// Copies `values` into the struct form a message body is serialized from
///
/// Fails if the values cannot be written; see [`check_encodable`].
pub fn body_structure(values: &[Value]) -> Result<Structure<'static>> {
    check_encodable(values)?;
    let mut builder = StructureBuilder::new();
    for value in values {
        builder.push_value(value.duplicate()?);
    }
    Ok(builder.build())
}

/// Encodes a sequence of values as a message body
pub fn encode_body(values: &[Value]) -> Result<Vec<u8>> {
    if values.is_empty() {
        check_encodable(values)?;
        return Ok(Vec::new());
    }
    let body = body_structure(values)?;
    let data = zvariant::to_bytes(context(), &body)?;
    Ok(data.bytes().to_vec())
}

/// Decodes a message body with the given signature
///
/// The whole of `bytes` must be consumed.
pub fn decode_body(signature: &Signature, bytes: &[u8]) -> Result<Vec<Value>> {
    decode_data(signature, &serialized::Data::new(bytes, context()))
}

pub(crate) fn decode_data(signature: &Signature, data: &serialized::Data<'_, '_>) -> Result<Vec<Value>> {
    if signature.is_empty() {
        if !data.is_empty() {
            return Err(DBusError::InvalidArgument(format!(
                "{} bytes of body without signature",
                data.len()
            )));
        }
        return Ok(Vec::new());
    }
    if signature.as_str().contains('h') {
        return Err(DBusError::InvalidArgument(format!(
            "signature '{signature}': file descriptors are not supported"
        )));
    }
    let wrapped = format!("({signature})");
    let (body, used) = data
        .deserialize_for_dynamic_signature::<_, OwnedStructure>(wrapped.as_str())
        .map_err(|e| DBusError::InvalidArgument(format!("body '{signature}': {e}")))?;
    if used != data.len() {
        return Err(DBusError::InvalidArgument(format!(
            "body '{signature}': {} trailing bytes",
            data.len() - used
        )));
    }
    Ok(body.0.into_fields())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::{structure, DBusType};
    use std::collections::HashMap;

    fn sig(s: &str) -> Signature {
        Signature::new(s).unwrap()
    }

    #[test]
    fn body_roundtrip() {
        let mut options = HashMap::new();
        options.insert("peer".to_string(), "addr".to_string());
        let body = vec![
            Value::from("server"),
            options.to_value().unwrap(),
            Value::Value(Box::new(Value::I32(3))),
            Value::Bool(true),
        ];
        let bytes = encode_body(&body).unwrap();
        let decoded = decode_body(&sig("sa{ss}vb"), &bytes).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn empty_body() {
        assert!(encode_body(&[]).unwrap().is_empty());
        assert!(decode_body(&Signature::empty(), &[]).unwrap().is_empty());
        assert!(decode_body(&Signature::empty(), &[0]).is_err());
    }

    #[test]
    fn truncated_and_trailing_bytes_are_rejected() {
        let bytes = encode_body(&[Value::from("hello")]).unwrap();
        let err = decode_body(&sig("s"), &bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, DBusError::InvalidArgument(_)));

        let mut longer = bytes.clone();
        longer.extend_from_slice(&[0, 0, 0, 0]);
        let err = decode_body(&sig("s"), &longer).unwrap_err();
        assert!(matches!(err, DBusError::InvalidArgument(_)));
    }

    #[test]
    fn deeply_nested_variants_are_rejected() {
        let mut bytes = Vec::new();
        for _ in 0..100 {
            bytes.extend_from_slice(&[1, b'v', 0]);
        }
        bytes.extend_from_slice(&[1, b'y', 0, 7]);

        let err = decode_body(&sig("v"), &bytes).unwrap_err();
        assert!(matches!(err, DBusError::InvalidArgument(_)));
    }

    #[test]
    fn shallow_variants_decode() {
        let bytes = [1, b'v', 0, 1, b'y', 0, 7];
        let decoded = decode_body(&sig("v"), &bytes).unwrap();
        let expected = Value::Value(Box::new(Value::Value(Box::new(Value::U8(7)))));
        assert_eq!(decoded, vec![expected]);
    }

    #[test]
    fn array_element_past_declared_length_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(b"hello\0");

        let err = decode_body(&sig("as"), &bytes).unwrap_err();
        assert!(matches!(err, DBusError::InvalidArgument(_)));
    }

    #[test]
    fn file_descriptors_are_rejected() {
        let err = decode_body(&sig("h"), &[0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, DBusError::InvalidArgument(_)));
    }

    #[test]
    fn oversized_variant_signature_is_an_error() {
        let fields = (0..300).map(Value::I32).collect();
        let wide = Value::Value(Box::new(structure(fields)));

        let err = encode_body(&[wide]).unwrap_err();
        assert!(matches!(err, DBusError::InvalidArgument(_)));
    }

    #[test]
    fn oversized_body_signature_is_an_error() {
        let body: Vec<Value> = (0..300).map(Value::U32).collect();
        let err = encode_body(&body).unwrap_err();
        assert!(matches!(err, DBusError::InvalidArgument(_)));
        assert!(check_encodable(&body[..255]).is_ok());
    }

    #[test]
    fn oversized_signature_value_is_an_error() {
        let long = zvariant::Signature::from_string_unchecked("i".repeat(MAX_SIGNATURE_LEN + 1));
        let err = encode_body(&[Value::Signature(long)]).unwrap_err();
        assert!(matches!(err, DBusError::InvalidArgument(_)));
    }
}
