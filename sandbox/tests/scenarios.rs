//! End-to-end step scenarios: program in, StepResult and citations out.

use std::time::Instant;

use serde_json::{Map, json};

use rlm_cite::{CitationConfig, CiteError, derive_citations, final_from_request, verify};
use rlm_corpus::{ContextDescriptor, InMemoryCorpus};
use rlm_sandbox::{merge_tool_results, run_step};
use rlm_types::{
    DocumentId, LimitKind, Sha256Hex, SessionId, StepLimits, StepOutcome, StepState, ToolKind,
};

fn corpus_one(text: &[u8]) -> (InMemoryCorpus, ContextDescriptor) {
    let mut corpus = InMemoryCorpus::new();
    corpus.insert(DocumentId::from("doc-0"), text);
    let descriptor = ContextDescriptor::new(
        SessionId::new("session-0"),
        vec![DocumentId::from("doc-0")],
    )
    .expect("descriptor");
    (corpus, descriptor)
}

fn limits() -> StepLimits {
    StepLimits::default()
}

#[test]
fn minimum_citation() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let program = r#"
text = ctx.docs()[0].slice(0, 5)
tool.FINAL("A", [{"doc": 0, "start": 0, "end": 5}])
"#;
    let result = run_step(program, json!({}), &descriptor, &corpus, &limits());
    assert_eq!(result.outcome, StepOutcome::Final);

    let final_request = result
        .tool_requests
        .iter()
        .find(|r| r.kind == ToolKind::Final)
        .expect("final request");
    let (answer, candidates) = final_from_request(final_request).expect("final parts");
    assert_eq!(answer, "A");

    let refs = derive_citations(
        &candidates,
        &result.span_log,
        &corpus,
        CitationConfig::default(),
    )
    .expect("citations");
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].sha256, Sha256Hex::of(b"Alpha"));
    assert!(verify(&refs[0], &corpus).is_valid());
}

#[test]
fn uncovered_citation_fails_derivation() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let program = r#"
text = ctx.docs()[0].slice(0, 5)
tool.FINAL("B", [{"doc": 0, "start": 6, "end": 10}])
"#;
    let result = run_step(program, json!({}), &descriptor, &corpus, &limits());
    assert_eq!(result.outcome, StepOutcome::Final);

    let (_, candidates) = final_from_request(&result.tool_requests[0]).expect("final parts");
    let err = derive_citations(
        &candidates,
        &result.span_log,
        &corpus,
        CitationConfig::default(),
    )
    .expect_err("unseen span");
    assert!(matches!(err, CiteError::UnseenSpan { .. }));
}

#[test]
fn banned_import_is_rejected_before_execution() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let result = run_step("import os\n", json!({}), &descriptor, &corpus, &limits());
    let StepOutcome::PolicyReject { code, message } = &result.outcome else {
        panic!("expected policy reject, got {:?}", result.outcome);
    };
    assert_eq!(code, "BannedConstruct");
    assert!(message.contains("import"));
    assert!(result.span_log.is_empty());
    assert!(result.tool_requests.is_empty());
    assert!(result.stdout.is_empty());
}

#[test]
fn infinite_loop_hits_the_wall_clock() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let limits = StepLimits::new(50, 65_536, 16_384, 262_144, 4_096, 32).expect("limits");
    let started = Instant::now();
    let result = run_step(
        "while True: pass\n",
        json!({}),
        &descriptor,
        &corpus,
        &limits,
    );
    let elapsed = started.elapsed();
    assert_eq!(
        result.outcome,
        StepOutcome::LimitExceeded {
            limit: LimitKind::Time
        }
    );
    // Generous margin over the 50ms cap; the probe fires every few dozen
    // statements.
    assert!(elapsed.as_millis() < 1_000, "took {elapsed:?}");
}

#[test]
fn determinism_across_runs() {
    let mut corpus = InMemoryCorpus::new();
    corpus.insert(DocumentId::from("a.txt"), &b"alpha one\nalpha two\n"[..]);
    corpus.insert(DocumentId::from("b.txt"), &b"beta\n"[..]);
    corpus.insert(DocumentId::from("c.txt"), &b"gamma gamma gamma"[..]);
    let descriptor = ContextDescriptor::new(
        SessionId::new("session-0"),
        vec![
            DocumentId::from("a.txt"),
            DocumentId::from("b.txt"),
            DocumentId::from("c.txt"),
        ],
    )
    .expect("descriptor");
    let program = r#"
seen = []
total = 0
for d in ctx.docs():
    for start, line in d.iter_lines():
        if len(line) > 0:
            seen.append([d.id, start, line])
            total += len(line)
hit = ctx.docs()[2].find("gamma", 6)
counts = {d.id: d.length for d in ctx.docs()}
state["seen"] = seen
state["total"] = total
state["hit"] = hit
state["counts"] = counts
print("docs:", len(ctx.docs()), "total:", total)
"#;
    let first = run_step(program, json!({}), &descriptor, &corpus, &limits());
    let second = run_step(program, json!({}), &descriptor, &corpus, &limits());
    assert_eq!(first.outcome, StepOutcome::Ok);
    assert_eq!(first, second);
    assert!(!first.span_log.is_empty());
    let state = first.state_out.expect("state");
    // Canonical JSON of the state is byte-stable too.
    assert_eq!(state.canonical(), second.state_out.expect("state").canonical());
}

#[test]
fn tool_idempotency_within_one_step() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let program = r#"
a = tool.subcall("q")
b = tool.subcall("q")
state["same"] = a == b
state["pending"] = tool.get(a) is None
"#;
    let result = run_step(program, json!({}), &descriptor, &corpus, &limits());
    assert_eq!(result.outcome, StepOutcome::Ok);
    assert_eq!(result.tool_requests.len(), 1);
    let state = result.state_out.expect("state");
    assert_eq!(state.get("same"), Some(&json!(true)));
    assert_eq!(state.get("pending"), Some(&json!(true)));
}

#[test]
fn tool_results_flow_into_the_next_step() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let enqueue = r#"
h = tool.subcall("summarize")
state["h"] = h
"#;
    let first = run_step(enqueue, json!({}), &descriptor, &corpus, &limits());
    assert_eq!(first.outcome, StepOutcome::Ok);
    let handle = first.tool_requests[0].handle.to_string();

    // The orchestrator resolves the request between steps.
    let mut state = first.state_out.expect("state");
    let mut resolved = Map::new();
    resolved.insert(handle, json!({"answer": 42}));
    merge_tool_results(&mut state, resolved);

    let consume = r#"
r = tool.get(state["h"])
state["r"] = r
"#;
    let second = run_step(consume, state.into_value(), &descriptor, &corpus, &limits());
    assert_eq!(second.outcome, StepOutcome::Ok);
    let state = second.state_out.expect("state");
    assert_eq!(state.get("r"), Some(&json!({"answer": 42})));
}

#[test]
fn stdout_cap_terminates_the_step() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let limits = StepLimits::new(2_000, 64, 16_384, 262_144, 4_096, 32).expect("limits");
    let result = run_step(
        "while True:\n    print(\"xxxxxxxxxx\")\n",
        json!({}),
        &descriptor,
        &corpus,
        &limits,
    );
    assert_eq!(
        result.outcome,
        StepOutcome::LimitExceeded {
            limit: LimitKind::Stdout
        }
    );
    assert!(result.stdout.len() <= 64);
}

#[test]
fn state_growth_hits_the_byte_cap() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let limits = StepLimits::new(2_000, 65_536, 16_384, 128, 4_096, 32).expect("limits");
    let result = run_step(
        "state[\"big\"] = \"a\" * 1000\n",
        json!({}),
        &descriptor,
        &corpus,
        &limits,
    );
    assert_eq!(
        result.outcome,
        StepOutcome::LimitExceeded {
            limit: LimitKind::StateBytes
        }
    );
    // The mutation was discarded.
    assert_eq!(result.state_out.expect("state"), StepState::empty());
}

#[test]
fn span_cap_terminates_the_step() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let limits = StepLimits::new(2_000, 65_536, 16_384, 262_144, 2, 32).expect("limits");
    let program = r#"
d = ctx.docs()[0]
a = d.slice(0, 1)
b = d.slice(1, 2)
c = d.slice(2, 3)
"#;
    let result = run_step(program, json!({}), &descriptor, &corpus, &limits);
    assert_eq!(
        result.outcome,
        StepOutcome::LimitExceeded {
            limit: LimitKind::SpanCount
        }
    );
    assert_eq!(result.span_log.len(), 2);
}

#[test]
fn tool_cap_terminates_the_step() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let limits = StepLimits::new(2_000, 65_536, 16_384, 262_144, 4_096, 1).expect("limits");
    let program = r#"
a = tool.subcall("one")
b = tool.subcall("two")
"#;
    let result = run_step(program, json!({}), &descriptor, &corpus, &limits);
    assert_eq!(
        result.outcome,
        StepOutcome::LimitExceeded {
            limit: LimitKind::ToolCount
        }
    );
}

#[test]
fn final_is_not_catchable() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let program = r#"
text = ctx.docs()[0].slice(0, 5)
try:
    tool.FINAL("A", [{"doc": 0, "start": 0, "end": 5}])
except ValueError as e:
    state["caught"] = True
"#;
    let result = run_step(program, json!({}), &descriptor, &corpus, &limits());
    assert_eq!(result.outcome, StepOutcome::Final);
    assert_eq!(result.state_out.expect("state").get("caught"), None);
}

#[test]
fn second_final_fails_the_step() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let program = r#"
try:
    tool.FINAL("first", [])
finally:
    tool.FINAL("second", [])
"#;
    let result = run_step(program, json!({}), &descriptor, &corpus, &limits());
    let StepOutcome::StepError { code, .. } = &result.outcome else {
        panic!("expected step error, got {:?}", result.outcome);
    };
    assert_eq!(code, "MultiFinal");
}

#[test]
fn runtime_exceptions_are_catchable_and_reported() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let caught = r#"
d = ctx.docs()[0]
try:
    text = d.slice(0, 999)
except RangeError as e:
    state["error"] = str(e)
"#;
    let result = run_step(caught, json!({}), &descriptor, &corpus, &limits());
    assert_eq!(result.outcome, StepOutcome::Ok);
    assert!(result.span_log.is_empty());

    let uncaught = "d = ctx.docs()[0]\ntext = d.slice(0, 999)\n";
    let result = run_step(uncaught, json!({}), &descriptor, &corpus, &limits());
    let StepOutcome::StepError { code, .. } = &result.outcome else {
        panic!("expected step error, got {:?}", result.outcome);
    };
    assert_eq!(code, "RangeError");
    assert!(result.stderr.contains("RangeError"));
}

#[test]
fn state_mutation_is_discarded_on_step_error() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let program = r#"
state["touched"] = True
x = 1 // 0
"#;
    let result = run_step(
        program,
        json!({"prior": "kept"}),
        &descriptor,
        &corpus,
        &limits(),
    );
    let StepOutcome::StepError { code, .. } = &result.outcome else {
        panic!("expected step error, got {:?}", result.outcome);
    };
    assert_eq!(code, "ZeroDivisionError");
    let state = result.state_out.expect("state");
    assert_eq!(state.get("prior"), Some(&json!("kept")));
    assert_eq!(state.get("touched"), None);
}

#[test]
fn state_rebinding_is_honored() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let program = "state = {\"fresh\": 1}\n";
    let result = run_step(program, json!({"old": true}), &descriptor, &corpus, &limits());
    assert_eq!(result.outcome, StepOutcome::Ok);
    let state = result.state_out.expect("state");
    assert_eq!(state.get("fresh"), Some(&json!(1)));
    assert_eq!(state.get("old"), None);
}

#[test]
fn non_object_state_rebinding_is_rejected() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let result = run_step("state = [1, 2]\n", json!({}), &descriptor, &corpus, &limits());
    let StepOutcome::StepError { code, .. } = &result.outcome else {
        panic!("expected step error, got {:?}", result.outcome);
    };
    assert_eq!(code, "NonJsonState");
}

#[test]
fn bad_entry_state_is_rejected() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    let result = run_step("x = 1\n", json!([1, 2]), &descriptor, &corpus, &limits());
    let StepOutcome::StepError { code, .. } = &result.outcome else {
        panic!("expected step error, got {:?}", result.outcome);
    };
    assert_eq!(code, "BadState");
    assert_eq!(result.state_out, None);
}

#[test]
fn isolation_no_ambient_names_resolve() {
    let (corpus, descriptor) = corpus_one(b"Alpha Beta Gamma");
    for name in ["open", "eval", "exec", "__import__", "globals", "vars", "input"] {
        let result = run_step(
            &format!("x = {name}\n"),
            json!({}),
            &descriptor,
            &corpus,
            &limits(),
        );
        assert!(
            matches!(result.outcome, StepOutcome::PolicyReject { .. }),
            "{name} must not be reachable"
        );
    }
}

#[test]
fn missing_document_is_a_step_error() {
    let corpus = InMemoryCorpus::new();
    let descriptor = ContextDescriptor::new(
        SessionId::new("session-0"),
        vec![DocumentId::from("ghost")],
    )
    .expect("descriptor");
    let result = run_step("x = 1\n", json!({}), &descriptor, &corpus, &limits());
    let StepOutcome::StepError { code, .. } = &result.outcome else {
        panic!("expected step error, got {:?}", result.outcome);
    };
    assert_eq!(code, "DocNotFound");
}
