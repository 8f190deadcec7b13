//! The workflow scheduler.
//!
//! Drives a workflow's dependency DAG to termination on a bounded worker
//! pool. Workers pull ready task ids, re-enter the interpreter on a frame
//! snapshot under the inherited permission set, publish results into the
//! owning environment, and feed completions back into the graph. Failed
//! steps retry with deterministic backoff or cascade cancellation to their
//! transitive dependents; a wall-clock timeout cancels everything
//! non-terminal. After a permanent failure, compensation bodies of completed
//! steps run in reverse completion order before the failure propagates.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::Instant,
};

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::{
    env::{Env, Frame},
    error::{RunError, RunResult},
    eval::{Vm, eval_block},
    graph::DependencyGraph,
    nodes::{Node, WorkflowSpec, WorkflowStepDef},
    tasks::{Task, TaskRegistry, TaskState},
    value::Value,
};

/// Ready/delayed bookkeeping shared by the workers and the driver.
///
/// `terminal` mirrors the registry's terminal-task count so the driver can
/// check for completion without taking the registry lock inside its wait
/// loop; the two locks are never held together.
struct Queues {
    ready: VecDeque<Arc<str>>,
    /// Retrying tasks sleeping out their backoff: `(due, id)`.
    delayed: Vec<(Instant, Arc<str>)>,
    active: usize,
    terminal: usize,
    total: usize,
    shutdown: bool,
}

struct Shared<'a> {
    queues: Mutex<Queues>,
    work: Condvar,
    registry: &'a TaskRegistry,
    graph: Mutex<DependencyGraph>,
    env: &'a Arc<Env>,
    deadline: Option<Instant>,
}

/// Executes a workflow node to completion. Returns Null on success; a
/// permanent failure surfaces as `WorkflowFailure` wrapping the original
/// error, a timeout as `TimeoutError`.
pub(crate) fn execute(spec: &WorkflowSpec, frame: &Frame, env: &Arc<Env>, vm: &Vm) -> RunResult<Value> {
    let registry = TaskRegistry::default();
    let mut graph = DependencyGraph::new();
    for step in &spec.steps {
        registry.register(Task::new(
            Arc::clone(&step.name),
            step.dependencies.clone(),
            step.retry,
        ))?;
        graph.insert(&step.name, &step.dependencies)?;
    }
    graph.verify_resolved()?;

    let total = spec.steps.len();
    if total == 0 {
        return Ok(Value::Null);
    }
    let initial = graph.initial_ready();
    for id in &initial {
        registry.set_state(id, TaskState::Ready);
    }

    let step_index: AHashMap<Arc<str>, &WorkflowStepDef> = spec
        .steps
        .iter()
        .map(|step| (Arc::clone(&step.name), step))
        .collect();
    let ids: Vec<Arc<str>> = spec.steps.iter().map(|step| Arc::clone(&step.name)).collect();

    // The timeout budget starts when the scheduler begins driving the DAG;
    // retry backoffs consume the same budget.
    let deadline = spec.timeout.map(|timeout| Instant::now() + timeout);
    let pool = num_cpus::get().clamp(1, total);
    info!(steps = total, workers = pool, "workflow started");

    let shared = Shared {
        queues: Mutex::new(Queues {
            ready: initial.into(),
            delayed: Vec::new(),
            active: 0,
            terminal: 0,
            total,
            shutdown: false,
        }),
        work: Condvar::new(),
        registry: &registry,
        graph: Mutex::new(graph),
        env,
        deadline,
    };

    let timed_out = std::thread::scope(|scope| {
        for _ in 0..pool {
            scope.spawn(|| worker_loop(&shared, frame, vm, &step_index));
        }
        drive(&shared, &ids)
    });

    if timed_out {
        warn!("workflow timed out");
        return Err(RunError::timeout(format!(
            "workflow exceeded its timeout of {}ms",
            spec.timeout.map_or(0, |timeout| timeout.as_millis())
        )));
    }
    if let Some((failed_id, failure)) = registry.first_failure() {
        warn!(task = %failed_id, "workflow failed, compensating");
        let suppressed = compensate(&registry, &step_index, frame, env, vm);
        return Err(RunError::workflow_failure(failure).with_suppressed(suppressed));
    }
    info!("workflow completed");
    Ok(Value::Null)
}

/// The driver: waits for every task to reach a terminal state or for the
/// deadline to pass. Returns whether the workflow timed out.
fn drive(shared: &Shared<'_>, ids: &[Arc<str>]) -> bool {
    let mut queues = shared.queues.lock();
    loop {
        if queues.shutdown {
            return false;
        }
        let idle = queues.active == 0 && queues.ready.is_empty() && queues.delayed.is_empty();
        if queues.terminal == queues.total || idle {
            queues.shutdown = true;
            shared.work.notify_all();
            return false;
        }
        match shared.deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    drop(queues);
                    let mut cancelled = 0;
                    for id in ids {
                        if shared.registry.cancel_if_not_terminal(id) {
                            cancelled += 1;
                        }
                    }
                    queues = shared.queues.lock();
                    queues.terminal += cancelled;
                    queues.shutdown = true;
                    shared.work.notify_all();
                    return true;
                }
                let _ = shared.work.wait_until(&mut queues, deadline);
            }
            None => shared.work.wait(&mut queues),
        }
    }
}

fn worker_loop(shared: &Shared<'_>, base_frame: &Frame, vm: &Vm, steps: &AHashMap<Arc<str>, &WorkflowStepDef>) {
    loop {
        // `next_task` increments `active` under its lock so the driver never
        // observes an in-flight task as idleness.
        let Some(id) = next_task(shared) else {
            return;
        };
        if !shared.registry.begin_running(&id) {
            // Cancelled while sitting in the ready queue; never starts.
            shared.queues.lock().active -= 1;
            shared.work.notify_all();
            continue;
        }

        let step = steps[&id];
        let result = run_body(&step.body, base_frame, shared.env, vm);

        match result {
            Ok(value) => {
                // Publish before marking Completed so dependents released by
                // this completion observe the result.
                shared.env.declare(Arc::clone(&id), value.clone());
                if shared.registry.complete(&id, value) {
                    let newly_ready = shared.graph.lock().mark_completed(&id);
                    for ready_id in &newly_ready {
                        shared.registry.set_state(ready_id, TaskState::Ready);
                    }
                    let mut queues = shared.queues.lock();
                    queues.active -= 1;
                    queues.terminal += 1;
                    queues.ready.extend(newly_ready);
                } else {
                    // The workflow timed out while this body ran; the result
                    // is discarded.
                    shared.queues.lock().active -= 1;
                }
            }
            Err(error) => {
                let attempt = shared.registry.attempt(&id);
                let retry = shared
                    .registry
                    .retry_policy(&id)
                    .filter(|policy| attempt < policy.max_attempts);
                if let Some(policy) = retry {
                    let delay = {
                        let mut ctx = vm.determinism.lock();
                        policy.delay_for(attempt, &mut ctx)
                    };
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    debug!(task = %id, attempt, delay_ms, "task retrying");
                    shared.registry.set_state(&id, TaskState::Ready);
                    let mut queues = shared.queues.lock();
                    queues.active -= 1;
                    queues.delayed.push((Instant::now() + delay, Arc::clone(&id)));
                } else if shared.registry.fail(&id, error) {
                    // Failure cascade: transitive dependents never start.
                    let downstream = shared.graph.lock().transitive_dependents(&id);
                    let mut cancelled = 0;
                    for dep_id in &downstream {
                        if shared.registry.cancel_if_not_terminal(dep_id) {
                            cancelled += 1;
                        }
                    }
                    let mut queues = shared.queues.lock();
                    queues.active -= 1;
                    queues.terminal += 1 + cancelled;
                } else {
                    shared.queues.lock().active -= 1;
                }
            }
        }
        shared.work.notify_all();
    }
}

/// Blocks until a task id is ready or the scheduler shuts down.
fn next_task(shared: &Shared<'_>) -> Option<Arc<str>> {
    let mut queues = shared.queues.lock();
    loop {
        if queues.shutdown {
            return None;
        }
        let now = Instant::now();
        let mut index = 0;
        while index < queues.delayed.len() {
            if queues.delayed[index].0 <= now {
                let (_, id) = queues.delayed.swap_remove(index);
                queues.ready.push_back(id);
            } else {
                index += 1;
            }
        }
        if let Some(id) = queues.ready.pop_front() {
            queues.active += 1;
            return Some(id);
        }
        if queues.active == 0 && queues.delayed.is_empty() {
            // Nothing can become ready without outside help; wake the
            // driver and wait for its verdict.
            shared.work.notify_all();
            shared.work.wait(&mut queues);
            continue;
        }
        match queues.delayed.iter().map(|(due, _)| *due).min() {
            Some(due) => {
                let _ = shared.work.wait_until(&mut queues, due);
            }
            None => shared.work.wait(&mut queues),
        }
    }
}

/// Evaluates a step (or compensation) body on a frame snapshot with a fresh
/// context inheriting the permission set captured at the workflow site.
fn run_body(body: &[Node], base: &Frame, env: &Arc<Env>, vm: &Vm) -> RunResult<Value> {
    let mut frame = base.snapshot();
    let mut worker_vm = vm.clone();
    match eval_block(body, &mut frame, env, &mut worker_vm) {
        Ok(value) => Ok(value),
        Err(flow) => flow.into_call_result(),
    }
}

/// Runs compensation bodies of completed steps in reverse completion order,
/// collecting failures as suppressed causes.
fn compensate(
    registry: &TaskRegistry,
    steps: &AHashMap<Arc<str>, &WorkflowStepDef>,
    frame: &Frame,
    env: &Arc<Env>,
    vm: &Vm,
) -> Vec<RunError> {
    let mut suppressed = Vec::new();
    for id in registry.completion_order().iter().rev() {
        let Some(compensate) = steps.get(id).and_then(|step| step.compensate.as_ref()) else {
            continue;
        };
        debug!(task = %id, "running compensation");
        if let Err(error) = run_body(compensate, frame, env, vm) {
            suppressed.push(error);
        }
    }
    suppressed
}
