//! SHA-256 digests over canonical bytes.
//!
//! Deterministic: the same byte sequence produces the same lowercase 64-hex
//! string on every platform. Every checksum that crosses a trust boundary in
//! this system is one of these.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Compute lowercase 64-hex SHA-256 of raw bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash a concatenation of parts without materializing it.
#[must_use]
pub(crate) fn sha256_hex_parts(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error)]
pub enum Sha256HexError {
    #[error("checksum must be exactly 64 characters, got {got}")]
    BadLength { got: usize },
    #[error("checksum must be lowercase hex")]
    NotHex,
}

/// A validated lowercase 64-hex SHA-256 digest.
///
/// The inner string is guaranteed well-formed at construction, so comparisons
/// between stored and recomputed checksums are plain string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Hex(String);

impl Sha256Hex {
    pub const LEN: usize = 64;

    /// Digest raw bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(sha256_hex(bytes))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, Sha256HexError> {
        let value = value.into();
        if value.len() != Self::LEN {
            return Err(Sha256HexError::BadLength { got: value.len() });
        }
        if !value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(Sha256HexError::NotHex);
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Sha256Hex {
    type Error = Sha256HexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Sha256Hex> for String {
    fn from(value: Sha256Hex) -> Self {
        value.0
    }
}

impl fmt::Display for Sha256Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Sha256Hex, sha256_hex};

    #[test]
    fn known_vector() {
        // sha256("Alpha")
        assert_eq!(
            sha256_hex(b"Alpha"),
            "b1a96dd646bccaa24cef7a3db22a6f995f05658f4f1c3272913e258c03e6fb24"
        );
    }

    #[test]
    fn of_matches_parse_roundtrip() {
        let digest = Sha256Hex::of(b"hello");
        let parsed = Sha256Hex::parse(digest.as_str().to_string()).expect("valid digest");
        assert_eq!(digest, parsed);
    }

    #[test]
    fn parse_rejects_uppercase() {
        let upper = sha256_hex(b"x").to_uppercase();
        assert!(Sha256Hex::parse(upper).is_err());
    }

    #[test]
    fn empty_input_digest() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
