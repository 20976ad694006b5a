//! The `tool` capability: a bounded queue of typed, idempotent requests.
//!
//! Requests are not resolved here; the orchestrator drains the queue between
//! steps and injects results under the reserved state key for `tool.get` to
//! read on a later step. `FINAL` is the terminal request: it unwinds the
//! program with [`Unwind::Final`] and may happen at most once per step.

use std::cell::{Cell, RefCell};

use serde_json::{Map, Value as Json, json};

use rlm_types::{DocumentId, LimitKind, SpanRefCandidate, StepState, ToolKind, ToolRequest};

use crate::control::Unwind;

pub struct ToolApi {
    queue: RefCell<Vec<ToolRequest>>,
    cap: usize,
    final_called: Cell<bool>,
    /// Resolved results injected by the orchestrator, keyed by handle.
    results: Map<String, Json>,
    /// Descriptor order, for resolving integer document references in
    /// `FINAL` span candidates.
    doc_order: Vec<DocumentId>,
    final_answer: RefCell<Option<String>>,
    candidates: RefCell<Vec<SpanRefCandidate>>,
}

impl std::fmt::Debug for ToolApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ToolApi({} queued)", self.queue.borrow().len())
    }
}

impl ToolApi {
    #[must_use]
    pub fn new(cap: usize, doc_order: Vec<DocumentId>, state: &StepState) -> Self {
        let results = match state.get(StepState::TOOL_RESULTS_KEY) {
            Some(Json::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        Self {
            queue: RefCell::new(Vec::new()),
            cap,
            final_called: Cell::new(false),
            results,
            doc_order,
            final_answer: RefCell::new(None),
            candidates: RefCell::new(Vec::new()),
        }
    }

    /// Enqueue a request unless an identical one is already queued; either
    /// way, return the handle.
    fn enqueue(&self, kind: ToolKind, args: Json) -> Result<String, Unwind> {
        let request = ToolRequest::new(kind, args);
        let handle = request.handle.to_string();
        let mut queue = self.queue.borrow_mut();
        if queue.iter().any(|r| r.handle == request.handle) {
            return Ok(handle);
        }
        if queue.len() >= self.cap {
            return Err(Unwind::Limit(LimitKind::ToolCount));
        }
        tracing::debug!(kind = kind.as_str(), handle = %handle, "tool request queued");
        queue.push(request);
        Ok(handle)
    }

    pub fn subcall(
        &self,
        prompt: &str,
        model_hint: Option<&str>,
        max_tokens: Option<i64>,
    ) -> Result<String, Unwind> {
        self.enqueue(
            ToolKind::Subcall,
            json!({
                "prompt": prompt,
                "model_hint": model_hint,
                "max_tokens": max_tokens,
            }),
        )
    }

    pub fn search(&self, query: &str, k: i64) -> Result<String, Unwind> {
        self.enqueue(ToolKind::Search, json!({ "query": query, "k": k }))
    }

    /// Resolved result for a handle, or `None` if the request has not been
    /// resolved yet (always the case on the step that enqueued it).
    #[must_use]
    pub fn get(&self, handle: &str) -> Option<&Json> {
        self.results.get(handle)
    }

    /// Record the terminal request and unwind. Never returns `Ok`.
    pub fn finalize(&self, answer: &str, spans: Vec<Json>) -> Result<(), Unwind> {
        if self.final_called.get() {
            return Err(Unwind::MultiFinal);
        }
        let mut candidates = Vec::with_capacity(spans.len());
        for span in &spans {
            candidates.push(self.candidate_from_json(span)?);
        }
        let normalized: Vec<Json> = candidates
            .iter()
            .map(|c| {
                json!({
                    "doc": c.doc.as_str(),
                    "start": c.start,
                    "end": c.end,
                    "label": c.label,
                })
            })
            .collect();
        self.enqueue(
            ToolKind::Final,
            json!({ "answer": answer, "spans": normalized }),
        )?;
        self.final_called.set(true);
        *self.final_answer.borrow_mut() = Some(answer.to_string());
        *self.candidates.borrow_mut() = candidates;
        Err(Unwind::Final)
    }

    /// Parse one program-supplied span candidate. `doc` may be a document id
    /// string or an index into the step's document order.
    fn candidate_from_json(&self, span: &Json) -> Result<SpanRefCandidate, Unwind> {
        let Json::Object(map) = span else {
            return Err(Unwind::type_error("span candidate must be a dict"));
        };
        let doc = match map.get("doc").or_else(|| map.get("doc_id")) {
            Some(Json::String(id)) => DocumentId::new(id.clone()),
            Some(Json::Number(n)) => {
                let index = n
                    .as_u64()
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| Unwind::value_error("span 'doc' index must be non-negative"))?;
                self.doc_order
                    .get(index)
                    .cloned()
                    .ok_or_else(|| {
                        Unwind::value_error(format!("span 'doc' index {index} out of range"))
                    })?
            }
            _ => return Err(Unwind::value_error("span candidate needs a 'doc' field")),
        };
        let field = |name: &str| -> Result<u64, Unwind> {
            map.get(name)
                .and_then(Json::as_u64)
                .ok_or_else(|| {
                    Unwind::value_error(format!("span '{name}' must be a non-negative integer"))
                })
        };
        let start = field("start")?;
        let end = field("end")?;
        if start > end {
            return Err(Unwind::value_error(format!(
                "span start {start} exceeds end {end}"
            )));
        }
        let label = match map.get("label") {
            Some(Json::String(s)) => Some(s.clone()),
            _ => None,
        };
        Ok(SpanRefCandidate {
            doc,
            start,
            end,
            label,
        })
    }

    /// Drain the queued requests and, if `FINAL` was called, the answer with
    /// its span candidates. Called once by the executor after the program
    /// has finished.
    #[must_use]
    pub fn take_parts(&self) -> (Vec<ToolRequest>, Option<(String, Vec<SpanRefCandidate>)>) {
        let queue = self.queue.take();
        let final_part = self
            .final_answer
            .take()
            .map(|answer| (answer, self.candidates.take()));
        (queue, final_part)
    }
}
