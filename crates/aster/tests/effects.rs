//! Effect-gate tests: seeding, swap/restore across calls, Async gating of
//! start/await/wait, and builtin effect declarations.

use std::sync::Arc;

use aster::{CollectStringPrint, ErrorKind, NoPrint, Object, RunResult, Runner};
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

fn ty(name: &str) -> Json {
    json!({"kind": "TypeName", "name": name})
}

fn func(name: &str, effects: Vec<&str>, body: Vec<Json>) -> Json {
    json!({"kind": "Func", "name": name, "params": [], "ret": ty("Int"),
           "effects": effects, "body": body})
}

fn module(decls: Vec<Json>) -> Json {
    json!({"name": "test", "decls": decls})
}

fn run(module: &Json) -> RunResult<Object> {
    Runner::from_json(&module.to_string(), vec![])?.run_with_printer("main", Arc::new(NoPrint))
}

#[test]
fn start_without_async_is_rejected_before_the_task_runs() {
    let start = json!({"kind": "Start", "name": "t", "expr": int(42)});
    let module = module(vec![func("main", vec![], vec![start, ret(int(0))])]);
    let err = run(&module).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EffectViolation);
    assert!(err.message().contains("Async"));
}

#[test]
fn await_and_wait_require_async() {
    let move_on = json!({"kind": "Wait", "names": ["t"]});
    let module = module(vec![func("main", vec![], vec![move_on, ret(int(0))])]);
    let err = run(&module).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EffectViolation);
    assert!(err.message().contains("Async"));
}

#[test]
fn start_await_round_trip() {
    let start = json!({"kind": "Start", "name": "t", "expr": call("add", vec![int(1), int(2)])});
    let await_t = json!({"kind": "Await", "expr": name("t")});
    let module = module(vec![func("main", vec!["Async"], vec![start, ret(await_t)])]);
    assert_eq!(run(&module).unwrap(), Object::Int(3));
}

#[test]
fn wait_publishes_completed_results_by_name() {
    let start = json!({"kind": "Start", "name": "t", "expr": int(42)});
    let wait = json!({"kind": "Wait", "names": ["t"]});
    // After wait, the task name reads as its published result.
    let module = module(vec![func("main", vec!["Async"], vec![start, wait, ret(name("t"))])]);
    assert_eq!(run(&module).unwrap(), Object::Int(42));
}

#[test]
fn print_requires_io() {
    let print = json!({"kind": "Let", "name": "_", "expr": call("print", vec![int(1)])});
    let module = module(vec![func("main", vec![], vec![print, ret(int(0))])]);
    let err = run(&module).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EffectViolation);
    assert!(err.message().contains("IO"));
}

#[test]
fn callee_effects_replace_the_callers() {
    // main has IO, helper declares nothing: the print inside helper is
    // rejected even though the caller could print.
    let print = json!({"kind": "Let", "name": "_", "expr": call("print", vec![int(1)])});
    let module = module(vec![
        func("helper", vec![], vec![print, ret(int(0))]),
        func("main", vec!["IO"], vec![ret(call("helper", vec![]))]),
    ]);
    let err = run(&module).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EffectViolation);
}

#[test]
fn caller_permissions_are_restored_after_the_call() {
    let helper_body = vec![ret(int(5))];
    let print = json!({"kind": "Let", "name": "_", "expr": call("print", vec![name("v")])});
    let module = module(vec![
        func("helper", vec![], helper_body),
        json!({"kind": "Func", "name": "main", "params": [], "ret": ty("Int"), "effects": ["IO"],
               "body": [
                   json!({"kind": "Let", "name": "v", "expr": call("helper", vec![])}),
                   print,
                   ret(name("v")),
               ]}),
    ]);
    let printer = Arc::new(CollectStringPrint::new());
    let runner = Runner::from_json(&module.to_string(), vec![]).unwrap();
    let result = runner.run_with_printer("main", Arc::clone(&printer) as Arc<dyn aster::PrintWriter>).unwrap();
    assert_eq!(result, Object::Int(5));
    assert_eq!(printer.take(), "5\n");
}

#[test]
fn spawned_tasks_inherit_the_start_site_permissions() {
    // The started body prints; main holds IO + Async at the start site, so
    // the worker inherits both.
    let start = json!({"kind": "Start", "name": "t", "expr": call("print", vec![int(7)])});
    let await_t = json!({"kind": "Await", "expr": name("t")});
    let module = module(vec![json!({
        "kind": "Func", "name": "main", "params": [], "ret": ty("Int"),
        "effects": ["Async", "IO"],
        "body": [start, json!({"kind": "Let", "name": "_", "expr": await_t}), ret(int(0))],
    })]);
    let printer = Arc::new(CollectStringPrint::new());
    let runner = Runner::from_json(&module.to_string(), vec![]).unwrap();
    runner.run_with_printer("main", Arc::clone(&printer) as Arc<dyn aster::PrintWriter>).unwrap();
    assert_eq!(printer.take(), "7\n");
}

#[test]
fn purity_analyzer_records_declared_effects() {
    let module = module(vec![
        func("pure_helper", vec![], vec![ret(int(1))]),
        func("io_helper", vec!["IO"], vec![ret(int(2))]),
        func("main", vec![], vec![ret(call("pure_helper", vec![]))]),
    ]);
    let runner = Runner::from_json(&module.to_string(), vec![]).unwrap();
    assert_eq!(runner.purity().is_pure("pure_helper"), Some(true));
    assert_eq!(runner.purity().is_pure("io_helper"), Some(false));
    assert_eq!(runner.purity().is_pure("missing"), None);
}

#[test]
fn each_lambda_gets_its_own_purity_record() {
    // Lambdas inherit their enclosing function's declared effects, so the
    // one built in pure_maker is pure and the one in io_maker is not; each
    // gets its own call-target entry rather than sharing one.
    let pure_lambda = json!({"kind": "Lambda", "params": [], "ret": ty("Int"), "captures": [],
                             "body": [ret(int(1))]});
    let io_lambda = json!({"kind": "Lambda", "params": [], "ret": ty("Int"), "captures": [],
                           "body": [ret(int(2))]});
    let module = module(vec![
        func(
            "pure_maker",
            vec![],
            vec![json!({"kind": "Let", "name": "f", "expr": pure_lambda}), ret(int(1))],
        ),
        func(
            "io_maker",
            vec!["IO"],
            vec![json!({"kind": "Let", "name": "g", "expr": io_lambda}), ret(int(2))],
        ),
        func(
            "main",
            vec![],
            vec![
                json!({"kind": "Let", "name": "a", "expr": call("pure_maker", vec![])}),
                json!({"kind": "Let", "name": "b", "expr": call("io_maker", vec![])}),
                ret(int(0)),
            ],
        ),
    ]);
    let runner = Runner::from_json(&module.to_string(), vec![]).unwrap();
    runner.run_with_printer("main", Arc::new(NoPrint)).unwrap();
    // Call-target names are generated in preparation order.
    assert_eq!(runner.purity().is_pure("<lambda#0>"), Some(true));
    assert_eq!(runner.purity().is_pure("<lambda#1>"), Some(false));
}
