//! Wire signatures
//!
//! A [`Signature`] is the compact D-Bus type descriptor of one or more wire
//! values (`"s"`, `"a{sv}"`, `"(ssiiii)"`, ...). It wraps the zvariant
//! signature type, which does the parsing and validation.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use zbus::zvariant;

use crate::error::{DBusError, Result};

/// Longest signature the wire format can carry
pub const MAX_SIGNATURE_LEN: usize = 255;

/// A D-Bus type signature, possibly describing several complete types
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(zvariant::Signature<'static>);

impl Signature {
    /// Parses and validates a signature string
    pub fn new(signature: impl Into<String>) -> Result<Self> {
        let signature = signature.into();
        zvariant::Signature::try_from(signature.clone())
            .map(Signature)
            .map_err(|e| DBusError::InvalidArgument(format!("signature '{signature}': {e}")))
    }

    /// The empty signature: no wire values at all
    pub fn empty() -> Self {
        Signature(zvariant::Signature::from_static_str_unchecked(""))
    }

    /// Wraps a signature known to be well-formed
    pub(crate) fn raw(signature: &str) -> Self {
        Signature(zvariant::Signature::from_string_unchecked(signature.to_string()))
    }

    /// Signature of an array with elements of type `element`
    pub fn array(element: &Signature) -> Self {
        Signature::raw(&format!("a{element}"))
    }

    /// Signature of a dictionary from `key` to `value`
    pub fn dict(key: &Signature, value: &Signature) -> Self {
        Signature::raw(&format!("a{{{key}{value}}}"))
    }

    /// Signature of a struct with the given fields, in order
    pub fn structure(fields: &[Signature]) -> Self {
        let inner: String = fields.iter().map(Signature::as_str).collect();
        Signature::raw(&format!("({inner})"))
    }

    /// Concatenates signatures; empty parts contribute nothing
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a Signature>) -> Self {
        let joined: String = parts.into_iter().map(Signature::as_str).collect();
        Signature::raw(&joined)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The zvariant form, for building containers
    pub fn as_zvariant(&self) -> &zvariant::Signature<'static> {
        &self.0
    }

    /// Splits the signature into its complete types
    ///
    /// Each complete type is the shortest prefix of the remainder that is
    /// itself a valid single-type signature.
    pub fn types(&self) -> Result<Vec<Signature>> {
        self.0
            .n_complete_types()
            .map_err(|e| DBusError::InvalidArgument(format!("signature '{self}': {e}")))?;
        let mut types = Vec::new();
        let mut rest = self.as_str();
        while !rest.is_empty() {
            let end = (1..=rest.len())
                .find(|&end| {
                    zvariant::Signature::try_from(&rest[..end])
                        .and_then(|s| s.n_complete_types())
                        .map_or(false, |n| n == 1)
                })
                .ok_or_else(|| {
                    DBusError::InvalidArgument(format!("signature '{self}': incomplete type '{rest}'"))
                })?;
            types.push(Signature::raw(&rest[..end]));
            rest = &rest[end..];
        }
        Ok(types)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Signature::empty()
    }
}

impl From<&zvariant::Signature<'_>> for Signature {
    fn from(signature: &zvariant::Signature<'_>) -> Self {
        Signature(signature.to_owned())
    }
}

impl From<Signature> for zvariant::Signature<'static> {
    fn from(signature: Signature) -> Self {
        signature.0
    }
}

impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl PartialOrd for Signature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Signature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&self.as_str()).finish()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Signature {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<str> for Signature {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Signature {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_nested_types() {
        let types = Signature::new("sa{s(iv)}aao").unwrap().types().unwrap();
        let types: Vec<&str> = types.iter().map(Signature::as_str).collect();
        assert_eq!(types, ["s", "a{s(iv)}", "aao"]);
        assert!(Signature::empty().types().unwrap().is_empty());
    }

    #[test]
    fn reject_malformed_signatures() {
        for bad in ["a", "(", "()", "a{", "z", "(s", "s)"] {
            assert!(Signature::new(bad).is_err(), "accepted '{bad}'");
        }
        assert!(Signature::new("i".repeat(MAX_SIGNATURE_LEN + 1)).is_err());
    }

    #[test]
    fn signature_builders() {
        let s = Signature::raw("s");
        let i = Signature::raw("i");
        assert_eq!(Signature::array(&s), "as");
        assert_eq!(Signature::dict(&s, &i), "a{si}");
        assert_eq!(Signature::structure(&[s.clone(), i.clone()]), "(si)");
        assert_eq!(Signature::concat([&s, &Signature::empty(), &i]), "si");
    }

    #[test]
    fn new_validates() {
        assert!(Signature::new("a{sv}").is_ok());
        assert!(Signature::new("").is_ok());
        assert!(Signature::new("a{").is_err());
    }

    #[test]
    fn equality_ignores_storage() {
        let built = Signature::array(&Signature::raw("s"));
        let parsed = Signature::new("as").unwrap();
        assert_eq!(built, parsed);
        assert_eq!(
            Signature::from(&zvariant::Signature::from_static_str_unchecked("as")),
            parsed
        );
    }
}
