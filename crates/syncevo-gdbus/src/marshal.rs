//! Type marshaling registry
//!
//! [`DBusType`] maps a native type to its wire signature and converts values
//! in both directions. Implementations exist for the basic types, arrays,
//! dictionaries, tuples (as structs) and the one-of containers [`Variant`]
//! and [`Variant2`]; records are added with [`dbus_struct!`](crate::dbus_struct).

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use tracing::debug;
use zbus::zvariant::{Array, Dict, Str, StructureBuilder};

use crate::error::{DBusError, Result};
use crate::signature::Signature;
use crate::value::{ObjectPath, Value, ValueExt};

/// A native type with a D-Bus wire representation
pub trait DBusType: Sized {
    /// Wire signature of the type; always a single complete type
    fn signature() -> Signature;

    /// Encodes the value
    fn to_value(&self) -> Result<Value>;

    /// Decodes a value, failing with `InvalidArgument` on a type mismatch
    fn from_value(value: &Value) -> Result<Self>;

    /// Decodes a value into `self`
    ///
    /// The default replaces `self`. Variants override it to leave `self`
    /// untouched when the wire value has none of the accepted types.
    fn merge_from(&mut self, value: &Value) -> Result<()> {
        *self = Self::from_value(value)?;
        Ok(())
    }
}

/// Marker for types that may be used as dictionary keys (basic types only)
pub trait DictKey: DBusType {}

pub(crate) fn mismatch(expected: &Signature, got: &Value) -> DBusError {
    DBusError::InvalidArgument(format!(
        "expected value of type '{expected}', got {} of type '{}'",
        got.kind(),
        got.wire_signature()
    ))
}

macro_rules! basic_type {
    ($ty:ty, $sig:literal, $variant:ident) => {
        impl DBusType for $ty {
            fn signature() -> Signature {
                Signature::raw($sig)
            }

            fn to_value(&self) -> Result<Value> {
                Ok(Value::$variant(*self))
            }

            fn from_value(value: &Value) -> Result<Self> {
                match value {
                    Value::$variant(v) => Ok(*v),
                    other => Err(mismatch(&Self::signature(), other)),
                }
            }
        }

        impl DictKey for $ty {}
    };
}

basic_type!(bool, "b", Bool);
basic_type!(u8, "y", U8);
basic_type!(i16, "n", I16);
basic_type!(u16, "q", U16);
basic_type!(i32, "i", I32);
basic_type!(u32, "u", U32);
basic_type!(i64, "x", I64);
basic_type!(u64, "t", U64);
basic_type!(f64, "d", F64);

impl DBusType for String {
    fn signature() -> Signature {
        Signature::raw("s")
    }

    fn to_value(&self) -> Result<Value> {
        Ok(Value::Str(Str::from(self.clone())))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s.as_str().to_string()),
            other => Err(mismatch(&Self::signature(), other)),
        }
    }
}

impl DictKey for String {}

impl DBusType for ObjectPath {
    fn signature() -> Signature {
        Signature::raw("o")
    }

    fn to_value(&self) -> Result<Value> {
        Ok(Value::ObjectPath(self.to_zvariant()))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::ObjectPath(path) => Ok(ObjectPath::from(path)),
            other => Err(mismatch(&Self::signature(), other)),
        }
    }
}

impl DictKey for ObjectPath {}

impl DBusType for Signature {
    fn signature() -> Signature {
        Signature::raw("g")
    }

    fn to_value(&self) -> Result<Value> {
        Ok(Value::Signature(self.as_zvariant().clone()))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Signature(signature) => Ok(Signature::from(signature)),
            other => Err(mismatch(&Self::signature(), other)),
        }
    }
}

impl DictKey for Signature {}

/// Signed bytes travel as D-Bus bytes, reinterpreting the bits
impl DBusType for i8 {
    fn signature() -> Signature {
        Signature::raw("y")
    }

    fn to_value(&self) -> Result<Value> {
        Ok(Value::U8(*self as u8))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::U8(v) => Ok(*v as i8),
            other => Err(mismatch(&Self::signature(), other)),
        }
    }
}

impl DictKey for i8 {}

impl<T: DBusType> DBusType for Vec<T> {
    fn signature() -> Signature {
        Signature::array(&T::signature())
    }

    fn to_value(&self) -> Result<Value> {
        let mut array = Array::new(T::signature().into());
        for item in self {
            array.append(item.to_value()?)?;
        }
        Ok(Value::Array(array))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Array(array) if *array.element_signature() == T::signature().as_str() => {
                array.iter().map(T::from_value).collect()
            }
            other => Err(mismatch(&Self::signature(), other)),
        }
    }
}

fn dict_to_value<'a, K, V>(entries: impl Iterator<Item = (&'a K, &'a V)>) -> Result<Value>
where
    K: DBusType + 'a,
    V: DBusType + 'a,
{
    let mut dict = Dict::new(K::signature().into(), V::signature().into());
    for (key, value) in entries {
        dict.append(key.to_value()?, value.to_value()?)?;
    }
    Ok(Value::Dict(dict))
}

fn dict_entries<'a>(
    value: &'a Value,
    key_sig: Signature,
    value_sig: Signature,
) -> Result<impl Iterator<Item = (&'a Value, &'a Value)>> {
    let expected = Signature::dict(&key_sig, &value_sig);
    match value {
        Value::Dict(dict) if *dict.full_signature() == expected.as_str() => Ok(dict.iter()),
        other => Err(mismatch(&expected, other)),
    }
}

impl<K: DictKey + Eq + Hash, V: DBusType> DBusType for HashMap<K, V> {
    fn signature() -> Signature {
        Signature::dict(&K::signature(), &V::signature())
    }

    fn to_value(&self) -> Result<Value> {
        dict_to_value(self.iter())
    }

    fn from_value(value: &Value) -> Result<Self> {
        dict_entries(value, K::signature(), V::signature())?
            .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }
}

impl<K: DictKey + Ord, V: DBusType> DBusType for BTreeMap<K, V> {
    fn signature() -> Signature {
        Signature::dict(&K::signature(), &V::signature())
    }

    fn to_value(&self) -> Result<Value> {
        dict_to_value(self.iter())
    }

    fn from_value(value: &Value) -> Result<Self> {
        dict_entries(value, K::signature(), V::signature())?
            .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }
}

/// Builds a struct value from encoded fields
pub fn structure(fields: Vec<Value>) -> Value {
    let mut builder = StructureBuilder::new();
    for field in fields {
        builder.push_value(field);
    }
    Value::Structure(builder.build())
}

/// Positional reader over the fields of a struct value
///
/// Used by tuple implementations and by [`dbus_struct!`](crate::dbus_struct).
pub struct StructFields<'a> {
    type_name: &'static str,
    fields: &'a [Value],
    pos: usize,
}

impl<'a> StructFields<'a> {
    /// Checks that `value` is a struct with exactly `expected` fields
    pub fn new(value: &'a Value, type_name: &'static str, expected: usize) -> Result<Self> {
        match value {
            Value::Structure(s) if s.fields().len() == expected => Ok(StructFields {
                type_name,
                fields: s.fields(),
                pos: 0,
            }),
            Value::Structure(s) => Err(DBusError::InvalidArgument(format!(
                "{type_name}: expected struct with {expected} fields, got {}",
                s.fields().len()
            ))),
            other => Err(DBusError::InvalidArgument(format!(
                "{type_name}: expected struct, got {} of type '{}'",
                other.kind(),
                other.wire_signature()
            ))),
        }
    }

    /// Decodes the next field
    pub fn next<T: DBusType>(&mut self, field: &str) -> Result<T> {
        let value = self.fields.get(self.pos).ok_or_else(|| {
            DBusError::InvalidArgument(format!("{}: missing field {field}", self.type_name))
        })?;
        self.pos += 1;
        T::from_value(value).map_err(|e| match e {
            DBusError::InvalidArgument(msg) => {
                DBusError::InvalidArgument(format!("{}.{field}: {msg}", self.type_name))
            }
            other => other,
        })
    }
}

macro_rules! tuple_type {
    ($($T:ident),+) => {
        impl<$($T: DBusType),+> DBusType for ($($T,)+) {
            fn signature() -> Signature {
                Signature::structure(&[$($T::signature()),+])
            }

            #[allow(non_snake_case)]
            fn to_value(&self) -> Result<Value> {
                let ($($T,)+) = self;
                Ok(structure(vec![$($T.to_value()?),+]))
            }

            fn from_value(value: &Value) -> Result<Self> {
                let count = [$(stringify!($T)),+].len();
                let mut fields = StructFields::new(value, "tuple", count)?;
                Ok(($(fields.next::<$T>(stringify!($T))?,)+))
            }
        }
    };
}

tuple_type!(A);
tuple_type!(A, B);
tuple_type!(A, B, C);
tuple_type!(A, B, C, D);
tuple_type!(A, B, C, D, E);
tuple_type!(A, B, C, D, E, F);
tuple_type!(A, B, C, D, E, F, G);
tuple_type!(A, B, C, D, E, F, G, H);
tuple_type!(A, B, C, D, E, F, G, H, I);
tuple_type!(A, B, C, D, E, F, G, H, I, J);

fn ignored_variant(expected: &str, inner: &Value) {
    debug!(
        target: "syncevo_gdbus::variant",
        expected,
        received = %inner.wire_signature(),
        "Ignoring variant value of unexpected type"
    );
}

/// Placeholder sent for a variant that holds no value
fn unset_variant() -> Value {
    Value::Value(Box::new(Value::from("")))
}

fn variant(inner: Value) -> Value {
    Value::Value(Box::new(inner))
}

/// A variant restricted to one native type
///
/// Decoding a variant whose content has another type is not an error: the
/// result is [`Variant::Unset`] (or, with `merge_from`, the target keeps its
/// previous value).
#[derive(Debug, Clone, PartialEq)]
pub enum Variant<V> {
    Unset,
    Value(V),
}

impl<V> Default for Variant<V> {
    fn default() -> Self {
        Variant::Unset
    }
}

impl<V> Variant<V> {
    pub fn get(&self) -> Option<&V> {
        match self {
            Variant::Unset => None,
            Variant::Value(v) => Some(v),
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Variant::Value(_))
    }
}

impl<V: DBusType> Variant<V> {
    /// Decodes the inner value, `None` if its type is not `V`
    fn decode_inner(inner: &Value) -> Result<Option<V>> {
        if inner.wire_signature() == V::signature() {
            V::from_value(inner).map(Some)
        } else {
            ignored_variant(V::signature().as_str(), inner);
            Ok(None)
        }
    }
}

impl<V: DBusType> DBusType for Variant<V> {
    fn signature() -> Signature {
        Signature::raw("v")
    }

    fn to_value(&self) -> Result<Value> {
        match self {
            Variant::Unset => Ok(unset_variant()),
            Variant::Value(v) => Ok(variant(v.to_value()?)),
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Value(inner) => Ok(Self::decode_inner(inner)?
                .map(Variant::Value)
                .unwrap_or_default()),
            other => Err(mismatch(&Self::signature(), other)),
        }
    }

    fn merge_from(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Value(inner) => {
                if let Some(v) = Self::decode_inner(inner)? {
                    *self = Variant::Value(v);
                }
                Ok(())
            }
            other => Err(mismatch(&Self::signature(), other)),
        }
    }
}

/// A variant holding one of two native types
///
/// When both alternatives share a signature the first one wins.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant2<A, B> {
    Unset,
    First(A),
    Second(B),
}

impl<A, B> Default for Variant2<A, B> {
    fn default() -> Self {
        Variant2::Unset
    }
}

impl<A: DBusType, B: DBusType> Variant2<A, B> {
    fn decode_inner(inner: &Value) -> Result<Option<Self>> {
        let signature = inner.wire_signature();
        if signature == A::signature() {
            Ok(Some(Variant2::First(A::from_value(inner)?)))
        } else if signature == B::signature() {
            Ok(Some(Variant2::Second(B::from_value(inner)?)))
        } else {
            let expected = format!("{} or {}", A::signature(), B::signature());
            ignored_variant(&expected, inner);
            Ok(None)
        }
    }
}

impl<A: DBusType, B: DBusType> DBusType for Variant2<A, B> {
    fn signature() -> Signature {
        Signature::raw("v")
    }

    fn to_value(&self) -> Result<Value> {
        match self {
            Variant2::Unset => Ok(unset_variant()),
            Variant2::First(a) => Ok(variant(a.to_value()?)),
            Variant2::Second(b) => Ok(variant(b.to_value()?)),
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Value(inner) => Ok(Self::decode_inner(inner)?.unwrap_or_default()),
            other => Err(mismatch(&Self::signature(), other)),
        }
    }

    fn merge_from(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Value(inner) => {
                if let Some(v) = Self::decode_inner(inner)? {
                    *self = v;
                }
                Ok(())
            }
            other => Err(mismatch(&Self::signature(), other)),
        }
    }
}

/// Implements [`DBusType`] for a record, encoded as a struct of its fields
///
/// Fields are listed with their types, in wire order:
///
/// ```
/// use syncevo_gdbus::{dbus_struct, DBusType};
///
/// #[derive(Debug, Default, PartialEq)]
/// struct Progress {
///     source: String,
///     kind: i32,
/// }
///
/// dbus_struct!(Progress { source: String, kind: i32 });
///
/// assert_eq!(Progress::signature(), "(si)");
/// ```
#[macro_export]
macro_rules! dbus_struct {
    ($ty:ident { $($field:ident : $fty:ty),+ $(,)? }) => {
        impl $crate::DBusType for $ty {
            fn signature() -> $crate::Signature {
                $crate::Signature::structure(&[
                    $(<$fty as $crate::DBusType>::signature()),+
                ])
            }

            fn to_value(&self) -> $crate::Result<$crate::Value> {
                Ok($crate::marshal::structure(vec![
                    $($crate::DBusType::to_value(&self.$field)?),+
                ]))
            }

            fn from_value(value: &$crate::Value) -> $crate::Result<Self> {
                let count = [$(stringify!($field)),+].len();
                let mut fields =
                    $crate::marshal::StructFields::new(value, stringify!($ty), count)?;
                Ok($ty {
                    $($field: fields.next::<$fty>(stringify!($field))?,)+
                })
            }
        }
    };
}
