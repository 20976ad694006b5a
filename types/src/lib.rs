//! Core domain types for the RLM runtime.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the system:
//! identifiers, span records, step limits and outcomes, tool requests, the
//! JSON state that crosses the sandbox boundary, and the execution record.
//!
//! Shapes that cross a trust boundary (`SpanEntry`, `SpanRef`, `ToolRequest`,
//! `StepResult`) serialize bit-exactly: canonical JSON with recursively
//! sorted object keys, lowercase 64-hex checksums.

mod exec;
mod hash;
mod ids;
mod json;
mod limits;
mod span;
mod step;

pub use exec::{Execution, ExecutionSealed, ExecutionStatus};
pub use hash::{Sha256Hex, Sha256HexError, sha256_hex};
pub use ids::{DocumentId, ExecutionId, SessionId, ToolHandle, ToolHandleError};
pub use json::{StateError, StepState, to_canonical_string};
pub use limits::{LimitKind, LimitsError, StepLimits};
pub use span::{SpanEntry, SpanEntryError, SpanLog, SpanLogError, SpanRef, SpanRefCandidate};
pub use step::{StepOutcome, StepResult, ToolKind, ToolRequest};
