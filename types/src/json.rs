//! Canonical JSON and the state object that crosses the sandbox boundary.
//!
//! Canonical form: object keys recursively sorted bytewise, minimal
//! separators, scalar encoding delegated to `serde_json`. Same value, same
//! bytes, on every platform. Tool handles and state snapshots are hashed and
//! sized over this encoding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Render a JSON value in canonical form.
#[must_use]
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json::to_string on a str cannot fail
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            out.push_str(&serde_json::to_string(scalar).unwrap_or_default());
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state must be a JSON object at the top level")]
    NotAnObject,
    #[error("state is {size} bytes, cap is {cap}")]
    TooLarge { size: usize, cap: usize },
    #[error("state is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The JSON state a step program reads and mutates.
///
/// Always an object at the top level and always within the configured byte
/// cap when measured in canonical form. State crosses the sandbox boundary
/// by value only; both ends hold independent copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepState(Map<String, Value>);

impl StepState {
    /// Reserved key under which resolved tool results are injected.
    pub const TOOL_RESULTS_KEY: &'static str = "__tool_results__";

    #[must_use]
    pub fn empty() -> Self {
        Self(Map::new())
    }

    /// Validate a JSON value as step state against the size cap.
    pub fn from_value(value: Value, max_bytes: usize) -> Result<Self, StateError> {
        let Value::Object(map) = value else {
            return Err(StateError::NotAnObject);
        };
        let state = Self(map);
        let size = state.canonical_len();
        if size > max_bytes {
            return Err(StateError::TooLarge {
                size,
                cap: max_bytes,
            });
        }
        Ok(state)
    }

    /// Parse and validate a JSON document as step state.
    pub fn from_json(text: &str, max_bytes: usize) -> Result<Self, StateError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value, max_bytes)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Overwrite one top-level entry. Used by the orchestrator side to merge
    /// resolved tool results before a step runs; never called from inside
    /// the sandbox.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Canonical encoding of this state.
    #[must_use]
    pub fn canonical(&self) -> String {
        to_canonical_string(&Value::Object(self.0.clone()))
    }

    /// Byte length of the canonical encoding.
    #[must_use]
    pub fn canonical_len(&self) -> usize {
        self.canonical().len()
    }
}

impl Default for StepState {
    fn default() -> Self {
        Self::empty()
    }
}
