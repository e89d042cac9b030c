use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{DepotError, Result};

pub const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const IDENTIFIER_LEN: usize = 16;

/// A 16-character base-62 token naming an item or a tier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier([u8; IDENTIFIER_LEN]);

impl Identifier {
    /// Draws a fresh 128-bit random value and keeps its 16 lowest base-62 digits.
    /// No uniqueness check is made against existing identifiers.
    pub fn generate() -> Self {
        Self::from_u128(uuid::Uuid::new_v4().as_u128())
    }

    pub fn from_u128(mut value: u128) -> Self {
        let mut digits = [0u8; IDENTIFIER_LEN];
        for digit in digits.iter_mut() {
            *digit = ALPHABET[(value % 62) as usize];
            value /= 62;
        }
        Self(digits)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != IDENTIFIER_LEN || !bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
            return Err(DepotError::InvalidIdentifier(s.to_string()));
        }
        let mut digits = [0u8; IDENTIFIER_LEN];
        digits.copy_from_slice(bytes);
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        // Only ever built from ALPHABET bytes.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.as_str())
    }
}

impl FromStr for Identifier {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn generated_identifiers_parse_back() {
        for _ in 0..200 {
            let id = Identifier::generate();
            assert_eq!(id.as_str().len(), IDENTIFIER_LEN);
            assert_eq!(Identifier::parse(&id.to_string()).unwrap(), id);
        }
    }

    #[test]
    fn digits_are_taken_lowest_first() {
        assert_eq!(Identifier::from_u128(0).as_str(), "0000000000000000");
        assert_eq!(Identifier::from_u128(61).as_str(), "Z000000000000000");
        assert_eq!(Identifier::from_u128(62).as_str(), "0100000000000000");
    }

    #[test]
    fn parse_rejects_wrong_length() {
        for s in ["", "abc", "0123456789abcdef0", "0123456789abcde"] {
            assert!(matches!(
                Identifier::parse(s),
                Err(DepotError::InvalidIdentifier(_))
            ));
        }
    }

    #[test]
    fn parse_rejects_foreign_characters() {
        for s in ["0123456789abcde-", "0123456789abcde_", "0123456789abcdé", "0123456789 abcde"] {
            assert!(Identifier::parse(s).is_err(), "{s} should be rejected");
        }
    }

    #[test]
    fn serde_uses_the_plain_token() {
        let id = Identifier::parse("aB3dE5gH7jK9mN1p").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"aB3dE5gH7jK9mN1p\"");
        assert_eq!(serde_json::from_str::<Identifier>(&json).unwrap(), id);
    }
}
