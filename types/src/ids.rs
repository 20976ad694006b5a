use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier for one ingested document.
///
/// Assigned at ingestion and immutable afterwards; unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for one execution (a finite sequence of steps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(uuid::Uuid);

impl ExecutionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ToolHandleError {
    #[error("tool handle must be exactly {expected} characters, got {got}", expected = ToolHandle::LEN)]
    BadLength { got: usize },
    #[error("tool handle must be lowercase hex")]
    NotHex,
}

/// Idempotency key for a tool request.
///
/// The first 16 hex digits of `sha256(kind || canonical_json(args))`. Two
/// requests with identical kind and arguments always produce the same handle,
/// within a step and across steps of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolHandle(String);

impl ToolHandle {
    pub const LEN: usize = 16;

    pub fn parse(value: impl Into<String>) -> Result<Self, ToolHandleError> {
        let value = value.into();
        if value.len() != Self::LEN {
            return Err(ToolHandleError::BadLength { got: value.len() });
        }
        if !value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(ToolHandleError::NotHex);
        }
        Ok(Self(value))
    }

    /// Derive the handle for a request from its kind tag and canonical args.
    #[must_use]
    pub fn derive(kind: &str, canonical_args: &str) -> Self {
        let digest = crate::hash::sha256_hex_parts(&[kind.as_bytes(), canonical_args.as_bytes()]);
        Self(digest[..Self::LEN].to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ToolHandle {
    type Error = ToolHandleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ToolHandle> for String {
    fn from(value: ToolHandle) -> Self {
        value.0
    }
}

impl fmt::Display for ToolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{ToolHandle, ToolHandleError};

    #[test]
    fn derive_is_stable_and_sixteen_hex() {
        let a = ToolHandle::derive("subcall", r#"{"prompt":"q"}"#);
        let b = ToolHandle::derive("subcall", r#"{"prompt":"q"}"#);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), ToolHandle::LEN);
        assert!(a.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn derive_separates_kind_from_args() {
        let a = ToolHandle::derive("subcall", r#"{"q":1}"#);
        let b = ToolHandle::derive("search", r#"{"q":1}"#);
        assert_ne!(a, b);
    }

    #[test]
    fn parse_rejects_uppercase_and_short() {
        assert!(matches!(
            ToolHandle::parse("ABCD"),
            Err(ToolHandleError::BadLength { got: 4 })
        ));
        assert!(matches!(
            ToolHandle::parse("ABCDEF0123456789"),
            Err(ToolHandleError::NotHex)
        ));
        assert!(ToolHandle::parse("abcdef0123456789").is_ok());
    }
}
