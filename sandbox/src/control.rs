//! Unwind channel for the interpreter.
//!
//! One `Result` error type carries everything that can interrupt straight-
//! line execution. Only [`Unwind::Exc`] is catchable by `try`/`except`;
//! `FINAL`, limit overruns, and deadline expiry always reach the executor.

use rlm_types::LimitKind;

use rlm_lang::Pos;

/// A catchable runtime exception, identified by its allowlisted type name.
#[derive(Debug, Clone)]
pub struct RuntimeExc {
    pub kind: &'static str,
    pub message: String,
    pub pos: Option<Pos>,
}

impl RuntimeExc {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            pos: None,
        }
    }

    #[must_use]
    pub fn at(mut self, pos: Pos) -> Self {
        if self.pos.is_none() {
            self.pos = Some(pos);
        }
        self
    }

    /// One-line traceback summary for stderr and the step outcome.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.pos {
            Some(pos) => format!("{}: {} ({pos})", self.kind, self.message),
            None => format!("{}: {}", self.kind, self.message),
        }
    }
}

#[derive(Debug)]
pub enum Unwind {
    /// Program-level exception; `except` clauses may catch it by name.
    Exc(RuntimeExc),
    /// `tool.FINAL` was called; the step's normal terminal condition.
    Final,
    /// A resource cap was hit. Never catchable.
    Limit(LimitKind),
    /// Second `FINAL` in one step.
    MultiFinal,
    /// `break`/`continue`/`return` in flight; consumed by the enclosing
    /// loop or call frame, never observed by the executor.
    Break,
    Continue,
    Return(crate::value::Value),
    /// Interpreter-internal failure; surfaces as a step error.
    Internal(String),
}

impl Unwind {
    pub fn exc(kind: &'static str, message: impl Into<String>) -> Self {
        Unwind::Exc(RuntimeExc::new(kind, message))
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::exc("ValueError", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::exc("TypeError", message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::exc("KeyError", message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::exc("IndexError", message)
    }
}

pub type ExecResult = Result<(), Unwind>;
pub type EvalResult = Result<crate::value::Value, Unwind>;
