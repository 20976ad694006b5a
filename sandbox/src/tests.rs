//! Language-behavior tests: small programs through the full executor.

use serde_json::{Value as Json, json};

use rlm_corpus::{ContextDescriptor, InMemoryCorpus};
use rlm_types::{DocumentId, SessionId, StepLimits, StepOutcome, StepResult};

use crate::run_step;

fn exec(program: &str) -> StepResult {
    exec_with_state(program, json!({}))
}

fn exec_with_state(program: &str, state: Json) -> StepResult {
    let mut corpus = InMemoryCorpus::new();
    corpus.insert(DocumentId::from("doc-0"), &b"Alpha Beta Gamma\nSecond line\n"[..]);
    let descriptor =
        ContextDescriptor::new(SessionId::new("t"), vec![DocumentId::from("doc-0")])
            .expect("descriptor");
    run_step(program, state, &descriptor, &corpus, &StepLimits::default())
}

/// Run a program and return its outgoing state, asserting success.
fn state_after(program: &str) -> Json {
    let result = exec(program);
    assert_eq!(result.outcome, StepOutcome::Ok, "stderr: {}", result.stderr);
    result.state_out.expect("state").into_value()
}

fn stdout_of(program: &str) -> String {
    let result = exec(program);
    assert_eq!(result.outcome, StepOutcome::Ok, "stderr: {}", result.stderr);
    result.stdout
}

#[test]
fn arithmetic_and_precedence() {
    let state = state_after(
        "state[\"a\"] = 2 + 3 * 4\n\
         state[\"b\"] = (2 + 3) * 4\n\
         state[\"c\"] = 2 ** 3 ** 2\n\
         state[\"d\"] = 7 // 2\n\
         state[\"e\"] = -7 // 2\n\
         state[\"f\"] = -7 % 2\n\
         state[\"g\"] = 7 / 2\n",
    );
    assert_eq!(state["a"], json!(14));
    assert_eq!(state["b"], json!(20));
    assert_eq!(state["c"], json!(512));
    assert_eq!(state["d"], json!(3));
    assert_eq!(state["e"], json!(-4));
    assert_eq!(state["f"], json!(1));
    assert_eq!(state["g"], json!(3.5));
}

#[test]
fn string_operations() {
    let state = state_after(
        "s = \"Alpha Beta\"\n\
         state[\"lower\"] = s.lower()\n\
         state[\"split\"] = s.split(\" \")\n\
         state[\"joined\"] = \"-\".join([\"a\", \"b\", \"c\"])\n\
         state[\"sub\"] = s[0:5]\n\
         state[\"neg\"] = s[-4:]\n\
         state[\"has\"] = \"Beta\" in s\n\
         state[\"replaced\"] = s.replace(\"Beta\", \"Gamma\")\n",
    );
    assert_eq!(state["lower"], json!("alpha beta"));
    assert_eq!(state["split"], json!(["Alpha", "Beta"]));
    assert_eq!(state["joined"], json!("a-b-c"));
    assert_eq!(state["sub"], json!("Alpha"));
    assert_eq!(state["neg"], json!("Beta"));
    assert_eq!(state["has"], json!(true));
    assert_eq!(state["replaced"], json!("Alpha Gamma"));
}

#[test]
fn while_loop_with_break_and_continue() {
    let state = state_after(
        "total = 0\n\
         i = 0\n\
         while True:\n\
             i += 1\n\
             if i > 10:\n\
                 break\n\
             if i % 2 == 0:\n\
                 continue\n\
             total += i\n\
         state[\"total\"] = total\n",
    );
    assert_eq!(state["total"], json!(25));
}

#[test]
fn functions_defaults_and_recursion() {
    let state = state_after(
        "def fib(n):\n\
             if n < 2:\n\
                 return n\n\
             return fib(n - 1) + fib(n - 2)\n\
         def greet(name, punct=\"!\"):\n\
             return \"hi \" + name + punct\n\
         state[\"fib\"] = fib(10)\n\
         state[\"a\"] = greet(\"x\")\n\
         state[\"b\"] = greet(\"y\", punct=\"?\")\n",
    );
    assert_eq!(state["fib"], json!(55));
    assert_eq!(state["a"], json!("hi x!"));
    assert_eq!(state["b"], json!("hi y?"));
}

#[test]
fn runaway_recursion_is_contained() {
    let result = exec("def f(n):\n    return f(n + 1)\nx = f(0)\n");
    let StepOutcome::StepError { code, .. } = &result.outcome else {
        panic!("expected step error, got {:?}", result.outcome);
    };
    assert_eq!(code, "RecursionError");
}

#[test]
fn comprehensions() {
    let state = state_after(
        "state[\"squares\"] = [i * i for i in range(5)]\n\
         state[\"evens\"] = [i for i in range(10) if i % 2 == 0]\n\
         state[\"pairs\"] = [[i, j] for i in range(2) for j in range(2)]\n\
         state[\"lengths\"] = {w: len(w) for w in [\"a\", \"bb\"]}\n",
    );
    assert_eq!(state["squares"], json!([0, 1, 4, 9, 16]));
    assert_eq!(state["evens"], json!([0, 2, 4, 6, 8]));
    assert_eq!(state["pairs"], json!([[0, 0], [0, 1], [1, 0], [1, 1]]));
    assert_eq!(state["lengths"], json!({"a": 1, "bb": 2}));
}

#[test]
fn dict_iteration_is_insertion_ordered() {
    let out = stdout_of(
        "d = {}\n\
         d[\"z\"] = 1\n\
         d[\"a\"] = 2\n\
         d[\"m\"] = 3\n\
         for k in d:\n\
             print(k)\n",
    );
    assert_eq!(out, "z\na\nm\n");
}

#[test]
fn set_iteration_is_sorted() {
    let out = stdout_of(
        "s = {3, 1, 2}\n\
         s.add(0)\n\
         for x in s:\n\
             print(x)\n",
    );
    assert_eq!(out, "0\n1\n2\n3\n");
}

#[test]
fn aliasing_is_visible_through_both_names() {
    let state = state_after(
        "a = [1]\n\
         b = a\n\
         b.append(2)\n\
         state[\"a\"] = a\n\
         state[\"same\"] = a is b\n",
    );
    assert_eq!(state["a"], json!([1, 2]));
    assert_eq!(state["same"], json!(true));
}

#[test]
fn builtin_conversions_and_aggregates() {
    let state = state_after(
        "state[\"n\"] = int(\" 42 \")\n\
         state[\"f\"] = float(\"2.5\")\n\
         state[\"s\"] = str(17)\n\
         state[\"mx\"] = max([3, 9, 1])\n\
         state[\"mn\"] = min(4, 2, 8)\n\
         state[\"sm\"] = sum(range(5))\n\
         state[\"srt\"] = sorted([3, 1, 2])\n\
         state[\"rev\"] = sorted([1, 3, 2], reverse=True)\n\
         state[\"anyv\"] = any([False, True])\n\
         state[\"allv\"] = all([True, False])\n",
    );
    assert_eq!(state["n"], json!(42));
    assert_eq!(state["f"], json!(2.5));
    assert_eq!(state["s"], json!("17"));
    assert_eq!(state["mx"], json!(9));
    assert_eq!(state["mn"], json!(2));
    assert_eq!(state["sm"], json!(10));
    assert_eq!(state["srt"], json!([1, 2, 3]));
    assert_eq!(state["rev"], json!([3, 2, 1]));
    assert_eq!(state["anyv"], json!(true));
    assert_eq!(state["allv"], json!(false));
}

#[test]
fn enumerate_zip_map_filter() {
    let state = state_after(
        "state[\"en\"] = [list(p) for p in enumerate([\"a\", \"b\"])]\n\
         state[\"zp\"] = [list(p) for p in zip([1, 2], [\"x\", \"y\"])]\n\
         def double(v):\n\
             return v * 2\n\
         state[\"mp\"] = map(double, [1, 2, 3])\n\
         def positive(v):\n\
             return v > 0\n\
         state[\"fl\"] = filter(positive, [-1, 2, -3, 4])\n",
    );
    assert_eq!(state["en"], json!([[0, "a"], [1, "b"]]));
    assert_eq!(state["zp"], json!([[1, "x"], [2, "y"]]));
    assert_eq!(state["mp"], json!([2, 4, 6]));
    assert_eq!(state["fl"], json!([2, 4]));
}

#[test]
fn generator_expressions_feed_aggregates() {
    let state = state_after(
        "state[\"bytes\"] = sum(d.length for d in ctx.docs())\n\
         state[\"caps\"] = sorted(w.upper() for w in [\"b\", \"a\"])\n",
    );
    assert_eq!(state["bytes"], json!(29));
    assert_eq!(state["caps"], json!(["A", "B"]));
}

#[test]
fn chained_comparisons_and_bool_values() {
    let state = state_after(
        "state[\"in_range\"] = 0 <= 5 < 10\n\
         state[\"out\"] = 0 <= 15 < 10\n\
         state[\"or_value\"] = \"\" or \"fallback\"\n\
         state[\"and_value\"] = \"x\" and \"y\"\n",
    );
    assert_eq!(state["in_range"], json!(true));
    assert_eq!(state["out"], json!(false));
    assert_eq!(state["or_value"], json!("fallback"));
    assert_eq!(state["and_value"], json!("y"));
}

#[test]
fn try_except_finally_ordering() {
    let out = stdout_of(
        "try:\n\
             print(\"body\")\n\
             x = [1][5]\n\
             print(\"unreached\")\n\
         except IndexError as e:\n\
             print(\"caught\")\n\
         finally:\n\
             print(\"finally\")\n",
    );
    assert_eq!(out, "body\ncaught\nfinally\n");
}

#[test]
fn uncaught_kind_propagates_through_mismatched_handler() {
    let result = exec(
        "try:\n\
             x = 1 // 0\n\
         except KeyError:\n\
             x = 0\n",
    );
    let StepOutcome::StepError { code, .. } = &result.outcome else {
        panic!("expected step error, got {:?}", result.outcome);
    };
    assert_eq!(code, "ZeroDivisionError");
}

#[test]
fn conditional_expression_and_ternary_nesting() {
    let state = state_after(
        "x = 7\n\
         state[\"kind\"] = \"big\" if x > 5 else \"small\"\n\
         state[\"n\"] = (1 if x > 9 else 2) + 10\n",
    );
    assert_eq!(state["kind"], json!("big"));
    assert_eq!(state["n"], json!(12));
}

#[test]
fn tuple_unpacking_in_for_and_assignment() {
    let state = state_after(
        "a, b = [1, 2]\n\
         total = 0\n\
         for k, v in {\"x\": 1, \"y\": 2}.items():\n\
             total += v\n\
         state[\"a\"] = a\n\
         state[\"b\"] = b\n\
         state[\"total\"] = total\n",
    );
    assert_eq!(state["a"], json!(1));
    assert_eq!(state["b"], json!(2));
    assert_eq!(state["total"], json!(3));
}

#[test]
fn print_formats_like_the_source_language() {
    let out = stdout_of(
        "print(\"a\", 1, True, None)\n\
         print([1, \"x\"], {\"k\": 2.0})\n\
         print(\"no newline\", end=\"\")\n",
    );
    assert_eq!(out, "a 1 True None\n[1, 'x'] {'k': 2.0}\nno newline");
}

#[test]
fn integer_overflow_is_an_error_not_a_wrap() {
    let result = exec("x = 9223372036854775807 + 1\n");
    let StepOutcome::StepError { code, .. } = &result.outcome else {
        panic!("expected step error, got {:?}", result.outcome);
    };
    assert_eq!(code, "ValueError");
}

#[test]
fn key_and_index_errors_carry_detail() {
    let result = exec("d = {\"a\": 1}\nx = d[\"missing\"]\n");
    let StepOutcome::StepError { code, message, .. } = &result.outcome else {
        panic!("expected step error, got {:?}", result.outcome);
    };
    assert_eq!(code, "KeyError");
    assert!(message.contains("missing"));
}

#[test]
fn state_dict_methods_work_on_injected_state() {
    let state = state_after(
        "state[\"count\"] = state.get(\"count\", 0) + 1\n\
         keys = state.keys()\n\
         state[\"n_keys\"] = len(keys)\n",
    );
    assert_eq!(state["count"], json!(1));
    assert_eq!(state["n_keys"], json!(1));
}

#[test]
fn injected_state_round_trips() {
    let result = exec_with_state(
        "state[\"next\"] = state[\"cursor\"] + 10\n",
        json!({"cursor": 5, "nested": {"keep": [1, 2, {"deep": true}]}}),
    );
    assert_eq!(result.outcome, StepOutcome::Ok);
    let state = result.state_out.expect("state").into_value();
    assert_eq!(state["next"], json!(15));
    assert_eq!(state["nested"], json!({"keep": [1, 2, {"deep": true}]}));
}

#[test]
fn docs_are_reachable_inside_functions() {
    let state = state_after(
        "def head(doc, n):\n\
             return doc.slice(0, n)\n\
         state[\"head\"] = head(ctx.docs()[0], 5)\n",
    );
    assert_eq!(state["head"], json!("Alpha"));
}

#[test]
fn stdout_and_spans_on_error_are_still_returned() {
    let result = exec(
        "print(\"before\")\n\
         d = ctx.docs()[0]\n\
         x = d.slice(0, 5)\n\
         y = 1 // 0\n",
    );
    assert!(matches!(result.outcome, StepOutcome::StepError { .. }));
    assert_eq!(result.stdout, "before\n");
    assert_eq!(result.span_log.len(), 1);
}
