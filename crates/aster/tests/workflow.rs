//! Workflow scheduler tests: dependency diamonds, failure cascade,
//! compensation order, retries, determinism, timeout, and DAG rejection.

use std::sync::Arc;

use aster::{CollectStringPrint, ErrorKind, NoPrint, Object, PrintWriter, RunResult, Runner};
use pretty_assertions::assert_eq;
use serde_json::{Value as Json, json};

fn int(value: i32) -> Json {
    json!({"kind": "Int", "value": value})
}

fn name(name: &str) -> Json {
    json!({"kind": "Name", "name": name})
}

fn call(target: &str, args: Vec<Json>) -> Json {
    json!({"kind": "Call", "target": {"kind": "Name", "name": target}, "args": args})
}

fn ret(expr: Json) -> Json {
    json!({"kind": "Return", "expr": expr})
}

fn print_stmt(expr: Json) -> Json {
    json!({"kind": "Let", "name": "_", "expr": call("print", vec![expr])})
}

/// A statement that always fails at run time: `set` of an unbound name.
fn fail_stmt(marker: &str) -> Json {
    json!({"kind": "Set", "name": marker, "expr": int(0)})
}

fn step(name: &str, deps: Vec<&str>, body: Vec<Json>) -> Json {
    json!({"name": name, "dependencies": deps, "body": body})
}

fn workflow(steps: Vec<Json>) -> Json {
    json!({"kind": "Workflow", "steps": steps})
}

/// Entry named `main` with the given effects and body.
fn entry_module(effects: Vec<&str>, body: Vec<Json>) -> Json {
    json!({"name": "test", "decls": [
        {"kind": "Func", "name": "main", "params": [],
         "ret": {"kind": "TypeName", "name": "Int"},
         "effects": effects, "body": body},
    ]})
}

fn run(module: &Json) -> RunResult<Object> {
    Runner::from_json(&module.to_string(), vec![])?.run_with_printer("main", Arc::new(NoPrint))
}

fn run_collecting(module: &Json) -> (RunResult<Object>, String) {
    let printer = Arc::new(CollectStringPrint::new());
    let result = Runner::from_json(&module.to_string(), vec![])
        .and_then(|runner| runner.run_with_printer("main", Arc::clone(&printer) as Arc<dyn PrintWriter>));
    (result, printer.take())
}

// === Diamond ===

#[test]
fn diamond_merges_both_branches() {
    let wf = workflow(vec![
        step("seed", vec![], vec![ret(int(5))]),
        step("left", vec!["seed"], vec![ret(call("add", vec![name("seed"), int(10)]))]),
        step("right", vec!["seed"], vec![ret(call("add", vec![name("seed"), int(20)]))]),
        step(
            "merge",
            vec!["left", "right"],
            vec![ret(call("add", vec![name("left"), name("right")]))],
        ),
    ]);
    // The loader appends Async to workflow-bearing functions, so no effects
    // need declaring.
    let module = entry_module(vec![], vec![wf, ret(name("merge"))]);
    assert_eq!(run(&module).unwrap(), Object::Int(40));
}

#[test]
fn step_results_are_published_into_the_owning_scope() {
    let wf = workflow(vec![
        step("a", vec![], vec![ret(int(1))]),
        step("b", vec!["a"], vec![ret(call("add", vec![name("a"), int(1)]))]),
    ]);
    let module = entry_module(vec![], vec![wf, ret(call("add", vec![name("a"), name("b")]))]);
    assert_eq!(run(&module).unwrap(), Object::Int(3));
}

// === Failure cascade ===

#[test]
fn failure_cascades_to_dependents_and_spares_siblings() {
    let wf = workflow(vec![
        step("a", vec![], vec![print_stmt(json!({"kind": "String", "value": "a-ran"})), ret(int(1))]),
        step("b", vec!["a"], vec![fail_stmt("boom")]),
        step("c", vec!["b"], vec![print_stmt(json!({"kind": "String", "value": "c-ran"})), ret(int(3))]),
    ]);
    let module = entry_module(vec!["IO"], vec![wf, ret(int(0))]);
    let (result, output) = run_collecting(&module);
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkflowFailure);
    assert!(err.message().contains("boom"), "failure keeps the original payload: {err}");
    assert_eq!(err.cause().unwrap().kind(), ErrorKind::UnboundName);
    // a completed, b failed, c never started.
    assert!(output.contains("a-ran"));
    assert!(!output.contains("c-ran"));
}

#[test]
fn sibling_branches_keep_running_after_a_failure() {
    let wf = workflow(vec![
        step("bad", vec![], vec![fail_stmt("boom")]),
        step("good", vec![], vec![print_stmt(json!({"kind": "String", "value": "good-ran"})), ret(int(1))]),
    ]);
    let module = entry_module(vec!["IO"], vec![wf, ret(int(0))]);
    let (result, output) = run_collecting(&module);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::WorkflowFailure);
    assert!(output.contains("good-ran"));
}

// === Compensation ===

#[test]
fn compensation_runs_in_reverse_completion_order() {
    let wf = json!({"kind": "Workflow", "steps": [
        {"name": "a", "dependencies": [], "body": [ret(int(1))],
         "compensate": [print_stmt(json!({"kind": "String", "value": "undo-a"}))]},
        {"name": "b", "dependencies": ["a"], "body": [ret(int(2))],
         "compensate": [print_stmt(json!({"kind": "String", "value": "undo-b"}))]},
        {"name": "fail", "dependencies": ["a", "b"], "body": [fail_stmt("boom")]},
    ]});
    let module = entry_module(vec!["IO"], vec![wf, ret(int(0))]);
    let (result, output) = run_collecting(&module);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::WorkflowFailure);
    // b completed after a, so it compensates first.
    assert_eq!(output, "undo-b\nundo-a\n");
}

#[test]
fn compensation_failures_are_suppressed_beneath_the_primary() {
    let wf = json!({"kind": "Workflow", "steps": [
        {"name": "a", "dependencies": [], "body": [ret(int(1))],
         "compensate": [fail_stmt("undo-broke")]},
        {"name": "fail", "dependencies": ["a"], "body": [fail_stmt("boom")]},
    ]});
    let module = entry_module(vec![], vec![wf, ret(int(0))]);
    let err = run(&module).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkflowFailure);
    assert!(err.message().contains("boom"));
    assert_eq!(err.suppressed().len(), 1);
    assert!(err.suppressed()[0].message().contains("undo-broke"));
}

// === Retries ===

#[test]
fn retries_exhaust_then_fail_permanently() {
    // Zero base delay keeps the test fast; three attempts print three times.
    let wf = json!({"kind": "Workflow", "steps": [
        {"name": "flaky", "dependencies": [],
         "body": [print_stmt(json!({"kind": "String", "value": "attempt"})), fail_stmt("boom")],
         "retry": {"maxAttempts": 3, "strategy": "exponential", "baseDelayMs": 0}},
    ]});
    let module = entry_module(vec!["IO"], vec![wf, ret(int(0))]);
    let (result, output) = run_collecting(&module);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::WorkflowFailure);
    assert_eq!(output, "attempt\nattempt\nattempt\n");
}

#[test]
fn recorded_jitter_replays_identically() {
    let wf = json!({"kind": "Workflow", "steps": [
        {"name": "flaky", "dependencies": [], "body": [fail_stmt("boom")],
         "retry": {"maxAttempts": 3, "strategy": "linear", "baseDelayMs": 4}},
    ]});
    let module = entry_module(vec![], vec![wf, ret(int(0))]);
    let source = module.to_string();

    let ir = aster::ir::Module::from_json(&source).unwrap();
    let recorder = Runner::new(&ir, vec![]).unwrap();
    recorder.run_with_printer("main", Arc::new(NoPrint)).unwrap_err();
    let log = recorder.determinism_log();
    // Two retries, one jitter draw each.
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|jitter| *jitter < 2), "jitter is bounded by base/2");

    let replayer = Runner::with_replay(&ir, vec![], log.clone()).unwrap();
    replayer.run_with_printer("main", Arc::new(NoPrint)).unwrap_err();
    assert_eq!(replayer.determinism_log(), log);
}

// === Timeout ===

#[test]
fn timeout_cancels_and_surfaces_timeout_error() {
    // The only step keeps failing with a long backoff, so the workflow sits
    // in retry delays until the deadline fires.
    let wf = json!({"kind": "Workflow",
        "timeout": {"milliseconds": 40},
        "steps": [
            {"name": "slow", "dependencies": [], "body": [fail_stmt("boom")],
             "retry": {"maxAttempts": 100, "strategy": "linear", "baseDelayMs": 200}},
        ]});
    let module = entry_module(vec![], vec![wf, ret(int(0))]);
    assert_eq!(run(&module).unwrap_err().kind(), ErrorKind::TimeoutError);
}

#[test]
fn zero_timeout_means_unbounded() {
    let wf = json!({"kind": "Workflow", "timeout": {"milliseconds": 0}, "steps": [
        {"name": "only", "dependencies": [], "body": [ret(int(9))]},
    ]});
    let module = entry_module(vec![], vec![wf, ret(name("only"))]);
    assert_eq!(run(&module).unwrap(), Object::Int(9));
}

// === Registration errors ===

#[test]
fn cyclic_dependencies_are_rejected() {
    let wf = workflow(vec![
        step("a", vec!["b"], vec![ret(int(1))]),
        step("b", vec!["a"], vec![ret(int(2))]),
    ]);
    let module = entry_module(vec![], vec![wf, ret(int(0))]);
    assert_eq!(run(&module).unwrap_err().kind(), ErrorKind::CycleError);
}

#[test]
fn self_dependency_is_rejected() {
    let wf = workflow(vec![step("a", vec!["a"], vec![ret(int(1))])]);
    let module = entry_module(vec![], vec![wf, ret(int(0))]);
    assert_eq!(run(&module).unwrap_err().kind(), ErrorKind::CycleError);
}

#[test]
fn unresolved_dependency_is_rejected() {
    let wf = workflow(vec![step("a", vec!["ghost"], vec![ret(int(1))])]);
    let module = entry_module(vec![], vec![wf, ret(int(0))]);
    let err = run(&module).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownTask);
    assert!(err.message().contains("ghost"));
}

#[test]
fn duplicate_step_names_are_rejected() {
    let wf = workflow(vec![
        step("a", vec![], vec![ret(int(1))]),
        step("a", vec![], vec![ret(int(2))]),
    ]);
    let module = entry_module(vec![], vec![wf, ret(int(0))]);
    assert_eq!(run(&module).unwrap_err().kind(), ErrorKind::ArgumentError);
}

// === Forward references resolve ===

#[test]
fn dependencies_may_be_declared_before_their_targets() {
    let wf = workflow(vec![
        step("late", vec!["early"], vec![ret(call("add", vec![name("early"), int(1)]))]),
        step("early", vec![], vec![ret(int(10))]),
    ]);
    let module = entry_module(vec![], vec![wf, ret(name("late"))]);
    assert_eq!(run(&module).unwrap(), Object::Int(11));
}
