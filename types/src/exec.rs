//! The execution record: an ordered sequence of steps with a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ExecutionId, SessionId};
use crate::span::SpanRef;
use crate::step::StepResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    /// Sealed by a `FINAL` tool request with verified citations.
    Final,
    /// Sealed by a fatal error (uncovered citation, orchestrator abort).
    Failed { reason: String },
}

#[derive(Debug, Error)]
#[error("execution {id} is sealed")]
pub struct ExecutionSealed {
    pub id: ExecutionId,
}

/// One execution: a finite, strictly ordered sequence of step results.
///
/// Step indices are monotonic; the record is append-only while running and
/// immutable once sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub session: SessionId,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepResult>,
    pub citations: Vec<SpanRef>,
    pub status: ExecutionStatus,
}

impl Execution {
    #[must_use]
    pub fn new(session: SessionId) -> Self {
        Self {
            id: ExecutionId::new(),
            session,
            started_at: Utc::now(),
            sealed_at: None,
            steps: Vec::new(),
            citations: Vec::new(),
            status: ExecutionStatus::Running,
        }
    }

    /// Append a step result; returns its index.
    pub fn record_step(&mut self, step: StepResult) -> Result<usize, ExecutionSealed> {
        if !matches!(self.status, ExecutionStatus::Running) {
            return Err(ExecutionSealed { id: self.id });
        }
        self.steps.push(step);
        Ok(self.steps.len() - 1)
    }

    /// Seal on a successful `FINAL` with derived citations.
    pub fn seal_final(&mut self, citations: Vec<SpanRef>) -> Result<(), ExecutionSealed> {
        if !matches!(self.status, ExecutionStatus::Running) {
            return Err(ExecutionSealed { id: self.id });
        }
        self.citations = citations;
        self.status = ExecutionStatus::Final;
        self.sealed_at = Some(Utc::now());
        Ok(())
    }

    /// Seal on a fatal error. Fatal errors fail the execution, not merely a
    /// step; an uncovered citation lands here.
    pub fn seal_failed(&mut self, reason: impl Into<String>) -> Result<(), ExecutionSealed> {
        if !matches!(self.status, ExecutionStatus::Running) {
            return Err(ExecutionSealed { id: self.id });
        }
        self.status = ExecutionStatus::Failed {
            reason: reason.into(),
        };
        self.sealed_at = Some(Utc::now());
        Ok(())
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        !matches!(self.status, ExecutionStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::{Execution, ExecutionStatus};
    use crate::ids::SessionId;
    use crate::step::{StepOutcome, StepResult};

    fn step(outcome: StepOutcome) -> StepResult {
        StepResult {
            stdout: String::new(),
            stderr: String::new(),
            state_out: Some(crate::json::StepState::empty()),
            span_log: Vec::new(),
            tool_requests: Vec::new(),
            outcome,
        }
    }

    #[test]
    fn indices_are_monotonic() {
        let mut exec = Execution::new(SessionId::new("s"));
        assert_eq!(exec.record_step(step(StepOutcome::Ok)).expect("record"), 0);
        assert_eq!(exec.record_step(step(StepOutcome::Ok)).expect("record"), 1);
    }

    #[test]
    fn sealed_execution_rejects_steps() {
        let mut exec = Execution::new(SessionId::new("s"));
        exec.record_step(step(StepOutcome::Final)).expect("record");
        exec.seal_final(Vec::new()).expect("seal");
        assert!(matches!(exec.status, ExecutionStatus::Final));
        assert!(exec.record_step(step(StepOutcome::Ok)).is_err());
        assert!(exec.seal_failed("late").is_err());
    }
}
