//! Resource caps for one sandbox step.
//!
//! Every cap is enforced at a capability boundary; the executor maps an
//! overrun to `limit_exceeded` with the matching [`LimitKind`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which cap a step ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Time,
    Stdout,
    Stderr,
    StateBytes,
    SpanCount,
    ToolCount,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LimitKind::Time => "time",
            LimitKind::Stdout => "stdout",
            LimitKind::Stderr => "stderr",
            LimitKind::StateBytes => "state_bytes",
            LimitKind::SpanCount => "span_count",
            LimitKind::ToolCount => "tool_count",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LimitsError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Validated resource caps for one step.
///
/// All caps are strictly positive; a zero cap would make every program fail
/// before its first statement, which is never what a caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLimits {
    pub wall_clock_ms: u64,
    pub max_stdout_bytes: usize,
    pub max_stderr_bytes: usize,
    pub max_state_bytes: usize,
    pub max_span_entries: usize,
    pub max_tool_requests: usize,
}

impl StepLimits {
    pub fn new(
        wall_clock_ms: u64,
        max_stdout_bytes: usize,
        max_stderr_bytes: usize,
        max_state_bytes: usize,
        max_span_entries: usize,
        max_tool_requests: usize,
    ) -> Result<Self, LimitsError> {
        let limits = Self {
            wall_clock_ms,
            max_stdout_bytes,
            max_stderr_bytes,
            max_state_bytes,
            max_span_entries,
            max_tool_requests,
        };
        limits.validate()?;
        Ok(limits)
    }

    fn validate(&self) -> Result<(), LimitsError> {
        let fields: [(&'static str, u64); 6] = [
            ("wall_clock_ms", self.wall_clock_ms),
            ("max_stdout_bytes", self.max_stdout_bytes as u64),
            ("max_stderr_bytes", self.max_stderr_bytes as u64),
            ("max_state_bytes", self.max_state_bytes as u64),
            ("max_span_entries", self.max_span_entries as u64),
            ("max_tool_requests", self.max_tool_requests as u64),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(LimitsError::Zero { field });
            }
        }
        Ok(())
    }
}

impl Default for StepLimits {
    fn default() -> Self {
        Self {
            wall_clock_ms: 2_000,
            max_stdout_bytes: 64 * 1024,
            max_stderr_bytes: 16 * 1024,
            max_state_bytes: 256 * 1024,
            max_span_entries: 4_096,
            max_tool_requests: 32,
        }
    }
}
