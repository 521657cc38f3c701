//! Human-readable account names.
//!
//! Meridian identifies accounts by name rather than by address. Producer
//! schedules, vote records, and header coinbases all carry [`Name`] values,
//! so the validity rules here are consensus-relevant.

use crate::{Error, Result};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Maximum length of an account name in bytes.
pub const NAME_MAX_LEN: usize = 31;

/// Minimum length of an account name in bytes.
pub const NAME_MIN_LEN: usize = 2;

/// A validated account name.
///
/// Names are 2 to 31 bytes, start with a lowercase ASCII letter, and contain
/// only lowercase letters, digits, and dots. Dotted suffixes are used for
/// system accounts (e.g. `meridian.dpos`).
///
/// # Example
///
/// ```rust
/// use meridian_types::Name;
///
/// let name: Name = "alice".parse().unwrap();
/// assert_eq!(name.as_str(), "alice");
/// assert!("0bad".parse::<Name>().is_err());
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Name(String);

impl Name {
    /// Creates a name, validating the account-name rules.
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if !Self::is_valid_str(&s) {
            return Err(Error::InvalidName(s));
        }
        Ok(Self(s))
    }

    /// Checks whether a string is a well-formed account name.
    pub fn is_valid_str(s: &str) -> bool {
        let bytes = s.as_bytes();
        if bytes.len() < NAME_MIN_LEN || bytes.len() > NAME_MAX_LEN {
            return false;
        }
        if !bytes[0].is_ascii_lowercase() {
            return false;
        }
        bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'.')
    }

    /// Returns the name as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the raw bytes of the name.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Name {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl Encodable for Name {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.encoder().encode_value(self.0.as_bytes());
    }
}

impl Decodable for Name {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        let bytes: Vec<u8> = rlp.as_val()?;
        let s = String::from_utf8(bytes).map_err(|_| DecoderError::Custom("non-utf8 name"))?;
        Self::new(s).map_err(|_| DecoderError::Custom("invalid account name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validity() {
        assert!(Name::is_valid_str("alice"));
        assert!(Name::is_valid_str("meridian.dpos"));
        assert!(Name::is_valid_str("a1"));

        assert!(!Name::is_valid_str("a")); // too short
        assert!(!Name::is_valid_str("1abc")); // leading digit
        assert!(!Name::is_valid_str(".abc")); // leading dot
        assert!(!Name::is_valid_str("Alice")); // uppercase
        assert!(!Name::is_valid_str("al ice")); // whitespace
        assert!(!Name::is_valid_str(&"a".repeat(32))); // too long
    }

    #[test]
    fn test_name_rlp_roundtrip() {
        let name: Name = "meridian.dpos".parse().unwrap();
        let encoded = rlp::encode(&name);
        let decoded: Name = rlp::decode(&encoded).unwrap();
        assert_eq!(name, decoded);
    }

    #[test]
    fn test_name_ordering() {
        let a: Name = "alice".parse().unwrap();
        let b: Name = "bob".parse().unwrap();
        assert!(a < b);
    }
}
