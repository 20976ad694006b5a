//! The step executor: one program, one sandbox, one result.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value as Json};

use rlm_corpus::{CanonicalReader, ContextDescriptor, ReaderError};
use rlm_lang::Policy;
use rlm_types::{
    LimitKind, SpanLog, StateError, StepLimits, StepOutcome, StepResult, StepState,
};

use crate::capture::Capture;
use crate::control::Unwind;
use crate::ctx::ContextView;
use crate::interp::Interp;
use crate::toolapi::ToolApi;
use crate::value::{Value, from_json, to_json};

/// Merge resolved tool results into the state a step will start from.
///
/// The orchestrator calls this between steps; inside the sandbox the merged
/// map is only reachable through `tool.get`.
pub fn merge_tool_results(state: &mut StepState, results: Map<String, Json>) {
    let mut merged = match state.get(StepState::TOOL_RESULTS_KEY) {
        Some(Json::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };
    for (handle, result) in results {
        merged.insert(handle, result);
    }
    state.insert(StepState::TOOL_RESULTS_KEY, Json::Object(merged));
}

/// Run one step to completion or cap.
///
/// Pure given a fixed corpus: the returned result is byte-identical across
/// invocations with the same `(program_text, state_in, descriptor, limits)`.
/// Never panics on program behavior; everything a program can do wrong maps
/// to an outcome.
pub fn run_step<R: CanonicalReader + ?Sized>(
    program_text: &str,
    state_in: Json,
    descriptor: &ContextDescriptor,
    reader: &R,
    limits: &StepLimits,
) -> StepResult {
    // 1. Static policy. A rejected program never executes: no span log, no
    //    state mutation, no tool requests.
    let module = match Policy::new().validate_source(program_text) {
        Ok(module) => module,
        Err(violation) => {
            tracing::debug!(code = violation.code.as_str(), "program rejected by policy");
            return StepResult {
                stdout: String::new(),
                stderr: String::new(),
                state_out: StepState::from_value(state_in, limits.max_state_bytes).ok(),
                span_log: Vec::new(),
                tool_requests: Vec::new(),
                outcome: StepOutcome::PolicyReject {
                    code: violation.code.as_str().to_string(),
                    message: violation.to_string(),
                },
            };
        }
    };

    // 2. Entry-state validation.
    let entry_state = match StepState::from_value(state_in, limits.max_state_bytes) {
        Ok(state) => state,
        Err(err) => {
            return bare_result(StepOutcome::StepError {
                code: bad_state_code(&err).to_string(),
                message: err.to_string(),
                trace: None,
            });
        }
    };

    // 3. Fresh per-step capabilities bound to one span log.
    let log = Rc::new(RefCell::new(SpanLog::with_cap(limits.max_span_entries)));
    let view = match ContextView::new(descriptor, reader, Rc::clone(&log)) {
        Ok(view) => view,
        Err(err) => {
            return StepResult {
                state_out: Some(entry_state),
                ..bare_result(StepOutcome::StepError {
                    code: reader_code(&err).to_string(),
                    message: err.to_string(),
                    trace: None,
                })
            };
        }
    };
    let tool = Rc::new(ToolApi::new(
        limits.max_tool_requests,
        descriptor.docs().to_vec(),
        &entry_state,
    ));
    let stdout = Rc::new(RefCell::new(Capture::with_cap(limits.max_stdout_bytes)));
    let mut stderr = Capture::with_cap(limits.max_stderr_bytes);

    // 4. The frame: exactly ctx, tool, state. Builtins resolve by name
    //    inside the interpreter against the fixed allowlist.
    let mut globals = HashMap::new();
    globals.insert("ctx".to_string(), Value::Ctx(Rc::new(view)));
    globals.insert("tool".to_string(), Value::Tool(Rc::clone(&tool)));
    globals.insert(
        "state".to_string(),
        from_json(&entry_state.clone().into_value()),
    );

    // 5. Execute under the wall-clock deadline.
    let deadline = Instant::now() + Duration::from_millis(limits.wall_clock_ms);
    let mut interp = Interp::new(globals, Rc::clone(&stdout), deadline);
    let started = Instant::now();
    let run_result = interp.run(&module);
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let state_binding = interp.global("state");
    drop(interp);

    // 6.-7. Outcome mapping and the outgoing state snapshot.
    let (outcome, state_out) = match run_result {
        Ok(()) => snapshot(state_binding, &entry_state, limits),
        Err(Unwind::Final) => {
            let (outcome, state_out) = snapshot(state_binding, &entry_state, limits);
            match outcome {
                StepOutcome::Ok => (StepOutcome::Final, state_out),
                failed => (failed, state_out),
            }
        }
        Err(Unwind::Exc(exc)) => {
            let summary = exc.summary();
            let _ = stderr.write(&summary);
            let _ = stderr.write("\n");
            (
                StepOutcome::StepError {
                    code: exc.kind.to_string(),
                    message: exc.message,
                    trace: Some(summary),
                },
                Some(entry_state.clone()),
            )
        }
        Err(Unwind::Limit(limit)) => (
            StepOutcome::LimitExceeded { limit },
            Some(entry_state.clone()),
        ),
        Err(Unwind::MultiFinal) => (
            StepOutcome::StepError {
                code: "MultiFinal".to_string(),
                message: "FINAL called more than once in one step".to_string(),
                trace: None,
            },
            Some(entry_state.clone()),
        ),
        Err(Unwind::Internal(message)) => (
            StepOutcome::StepError {
                code: "Internal".to_string(),
                message,
                trace: None,
            },
            Some(entry_state.clone()),
        ),
        Err(Unwind::Break | Unwind::Continue | Unwind::Return(_)) => (
            StepOutcome::StepError {
                code: "Internal".to_string(),
                message: "control-flow unwind escaped the program".to_string(),
                trace: None,
            },
            Some(entry_state.clone()),
        ),
    };

    // 8. Seal and assemble.
    log.borrow_mut().seal();
    let span_log = log.borrow().entries().to_vec();
    let (tool_requests, _) = tool.take_parts();

    tracing::debug!(
        elapsed_ms,
        spans = span_log.len(),
        tools = tool_requests.len(),
        outcome = outcome_tag(&outcome),
        "step finished"
    );

    StepResult {
        stdout: drain(&stdout),
        stderr: stderr.into_string(),
        state_out,
        span_log,
        tool_requests,
        outcome,
    }
}

/// Snapshot the program's `state` binding by JSON round-trip.
fn snapshot(
    binding: Option<Value>,
    entry_state: &StepState,
    limits: &StepLimits,
) -> (StepOutcome, Option<StepState>) {
    let Some(value) = binding else {
        return (
            StepOutcome::StepError {
                code: "Internal".to_string(),
                message: "state binding disappeared".to_string(),
                trace: None,
            },
            Some(entry_state.clone()),
        );
    };
    let json = match to_json(&value) {
        Ok(json) => json,
        Err(_) => {
            return (
                StepOutcome::StepError {
                    code: "NonJsonState".to_string(),
                    message: "state is not JSON-serializable".to_string(),
                    trace: None,
                },
                Some(entry_state.clone()),
            );
        }
    };
    match StepState::from_value(json, limits.max_state_bytes) {
        Ok(state) => (StepOutcome::Ok, Some(state)),
        Err(StateError::TooLarge { .. }) => (
            StepOutcome::LimitExceeded {
                limit: LimitKind::StateBytes,
            },
            Some(entry_state.clone()),
        ),
        Err(err) => (
            StepOutcome::StepError {
                code: "NonJsonState".to_string(),
                message: err.to_string(),
                trace: None,
            },
            Some(entry_state.clone()),
        ),
    }
}

fn bare_result(outcome: StepOutcome) -> StepResult {
    StepResult {
        stdout: String::new(),
        stderr: String::new(),
        state_out: None,
        span_log: Vec::new(),
        tool_requests: Vec::new(),
        outcome,
    }
}

fn bad_state_code(err: &StateError) -> &'static str {
    match err {
        StateError::TooLarge { .. } | StateError::NotAnObject | StateError::Parse(_) => "BadState",
    }
}

fn reader_code(err: &ReaderError) -> &'static str {
    match err {
        ReaderError::NotFound { .. } => "DocNotFound",
        ReaderError::OutOfRange { .. } => "OutOfRange",
        ReaderError::Transport { .. } => "ReaderTransport",
    }
}

fn outcome_tag(outcome: &StepOutcome) -> &'static str {
    match outcome {
        StepOutcome::Ok => "ok",
        StepOutcome::StepError { .. } => "step_error",
        StepOutcome::PolicyReject { .. } => "policy_reject",
        StepOutcome::LimitExceeded { .. } => "limit_exceeded",
        StepOutcome::Final => "final",
    }
}

fn drain(capture: &Rc<RefCell<Capture>>) -> String {
    let mut borrow = capture.borrow_mut();
    std::mem::replace(&mut *borrow, Capture::with_cap(0)).into_string()
}
