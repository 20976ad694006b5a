//! Tool requests and the result of one sandbox step.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ToolHandle;
use crate::json::{StepState, to_canonical_string};
use crate::limits::LimitKind;
use crate::span::SpanEntry;

/// The typed message kinds a program can enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Subcall,
    Search,
    Final,
}

impl ToolKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::Subcall => "subcall",
            ToolKind::Search => "search",
            ToolKind::Final => "final",
        }
    }
}

/// One queued tool request, resolved externally between steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub kind: ToolKind,
    pub args: Value,
    pub handle: ToolHandle,
}

impl ToolRequest {
    /// Build a request, deriving its idempotency handle from the canonical
    /// encoding of `args`.
    #[must_use]
    pub fn new(kind: ToolKind, args: Value) -> Self {
        let handle = ToolHandle::derive(kind.as_str(), &to_canonical_string(&args));
        Self { kind, args, handle }
    }
}

/// Terminal disposition of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Ran to completion without calling `FINAL`.
    Ok,
    /// The program raised, or the state failed validation.
    StepError {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        trace: Option<String>,
    },
    /// The program text failed the AST policy; nothing executed.
    PolicyReject { code: String, message: String },
    /// A resource cap was hit.
    LimitExceeded { limit: LimitKind },
    /// The program called `tool.FINAL`.
    Final,
}

impl StepOutcome {
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, StepOutcome::Final)
    }

    #[must_use]
    pub fn is_terminal_for_execution(&self) -> bool {
        matches!(self, StepOutcome::Final)
    }
}

/// Everything one step invocation produced.
///
/// `stdout`/`stderr` are capture-path text: UTF-8 with lossy replacement,
/// truncated at their caps. `state_out` is the state the next step should
/// start from: the snapshot on success, the unchanged entry state when the
/// step failed (mutations are discarded), and `None` only when the incoming
/// state itself failed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub stdout: String,
    pub stderr: String,
    pub state_out: Option<StepState>,
    pub span_log: Vec<SpanEntry>,
    pub tool_requests: Vec<ToolRequest>,
    pub outcome: StepOutcome,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{StepOutcome, ToolKind, ToolRequest};
    use crate::limits::LimitKind;

    #[test]
    fn identical_args_identical_handle() {
        let a = ToolRequest::new(ToolKind::Subcall, json!({"prompt": "q", "max_tokens": null}));
        let b = ToolRequest::new(ToolKind::Subcall, json!({"max_tokens": null, "prompt": "q"}));
        assert_eq!(a.handle, b.handle);
    }

    #[test]
    fn different_kind_different_handle() {
        let a = ToolRequest::new(ToolKind::Subcall, json!({"q": "x"}));
        let b = ToolRequest::new(ToolKind::Search, json!({"q": "x"}));
        assert_ne!(a.handle, b.handle);
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let outcome = StepOutcome::LimitExceeded {
            limit: LimitKind::Time,
        };
        let text = serde_json::to_string(&outcome).expect("serialize");
        assert_eq!(text, r#"{"kind":"limit_exceeded","limit":"time"}"#);
    }

    #[test]
    fn final_is_terminal() {
        assert!(StepOutcome::Final.is_terminal_for_execution());
        assert!(!StepOutcome::Ok.is_terminal_for_execution());
    }
}
