//! Property tests over random workflow DAG shapes.
//!
//! Each generated step sums its dependencies' published results, so a
//! successful run proves every task terminated and observed its
//! predecessors' results (an order consistent with a topological sort).
//! Cyclic registrations must reject at insert.

use std::sync::Arc;

use aster::{ErrorKind, NoPrint, Object, Runner};
use proptest::prelude::*;
use serde_json::{Value as Json, json};

fn step_name(index: usize) -> String {
    format!("s{index}")
}

/// Body expression for step `index`: `index + sum(deps)`.
fn step_expr(index: usize, deps: &[usize]) -> Json {
    let mut expr = json!({"kind": "Int", "value": i32::try_from(index).unwrap()});
    for dep in deps {
        expr = json!({"kind": "Call", "target": {"kind": "Name", "name": "add"},
                      "args": [expr, {"kind": "Name", "name": step_name(*dep)}]});
    }
    expr
}

fn dag_module(deps: &[Vec<usize>]) -> Json {
    let steps: Vec<Json> = deps
        .iter()
        .enumerate()
        .map(|(index, deps)| {
            let dep_names: Vec<String> = deps.iter().map(|dep| step_name(*dep)).collect();
            json!({"name": step_name(index), "dependencies": dep_names,
                   "body": [{"kind": "Return", "expr": step_expr(index, deps)}]})
        })
        .collect();
    // The entry returns the sum of every step's published result.
    let mut total = json!({"kind": "Int", "value": 0});
    for index in 0..deps.len() {
        total = json!({"kind": "Call", "target": {"kind": "Name", "name": "add"},
                       "args": [total, {"kind": "Name", "name": step_name(index)}]});
    }
    json!({"name": "dag", "decls": [
        {"kind": "Func", "name": "main", "params": [],
         "ret": {"kind": "TypeName", "name": "Int"}, "effects": [],
         "body": [
             {"kind": "Workflow", "steps": steps},
             {"kind": "Return", "expr": total},
         ]},
    ]})
}

/// The value each step publishes, computed independently of the runtime.
fn expected_values(deps: &[Vec<usize>]) -> Vec<i32> {
    let mut values = vec![0i32; deps.len()];
    for (index, deps) in deps.iter().enumerate() {
        // Dependencies only point at earlier indices, so this order works.
        values[index] = i32::try_from(index).unwrap() + deps.iter().map(|dep| values[*dep]).sum::<i32>();
    }
    values
}

/// Normalizes raw fuzz data into an acyclic dependency list: step `i` may
/// only depend on steps `0..i`.
fn normalize(raw: &[Vec<usize>]) -> Vec<Vec<usize>> {
    raw.iter()
        .enumerate()
        .map(|(index, deps)| {
            if index == 0 {
                return Vec::new();
            }
            let mut deps: Vec<usize> = deps.iter().map(|dep| dep % index).collect();
            deps.sort_unstable();
            deps.dedup();
            deps
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn random_dags_terminate_in_dependency_order(
        raw in prop::collection::vec(prop::collection::vec(any::<usize>(), 0..3), 1..10),
    ) {
        let deps = normalize(&raw);
        let module = dag_module(&deps);
        let runner = Runner::from_json(&module.to_string(), vec![]).unwrap();
        let result = runner.run_with_printer("main", Arc::new(NoPrint)).unwrap();
        let expected: i32 = expected_values(&deps).iter().sum();
        prop_assert_eq!(result, Object::Int(expected));
    }

    #[test]
    fn dependency_rings_reject_at_registration(n in 2usize..6) {
        let deps: Vec<Vec<usize>> = (0..n)
            .map(|index| if index == 0 { vec![n - 1] } else { vec![index - 1] })
            .collect();
        let module = dag_module(&deps);
        let runner = Runner::from_json(&module.to_string(), vec![]).unwrap();
        let err = runner.run_with_printer("main", Arc::new(NoPrint)).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::CycleError);
    }
}
