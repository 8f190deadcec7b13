//! Named async tasks and the registry that owns their state.
//!
//! The registry is the single authority for task state: every transition is
//! serialized through its lock, and a condvar wakes anything blocked in
//! `await`/`wait`. Workflow execution drives a registry through the
//! scheduler; `start` spawns detached tasks on the ambient registry owned by
//! the current run.

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::{
    determinism::DeterminismContext,
    error::{RunError, RunResult},
    value::Value,
};

/// Lifecycle of a task.
///
/// ```text
/// Pending --(deps=0)-> Ready --(worker picks)-> Running --success-> Completed
///                                            '--error---> (retry? Ready) | Failed
/// Ready/Pending --(upstream Failed)-> Cancelled
/// Running --(timeout)-> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Completed, Failed, and Cancelled are terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// `wait` unblocks once a task leaves the Pending/Ready/Running states.
    #[must_use]
    pub fn is_settled(self) -> bool {
        self.is_terminal()
    }
}

/// Backoff growth strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryStrategy {
    Exponential,
    Linear,
}

impl RetryStrategy {
    pub fn parse(name: &str) -> RunResult<Self> {
        match name {
            "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            other => Err(RunError::load(format!("unknown retry strategy '{other}'"))),
        }
    }
}

/// A per-step retry policy.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Computes the backoff before retry attempt `attempt` (1-based):
    /// `base * k + jitter` where `k` is `2^(attempt-1)` for exponential and
    /// `attempt` for linear, and jitter is drawn uniformly from
    /// `[0, base/2)` out of the determinism context. A zero base yields a
    /// zero delay.
    pub fn delay_for(&self, attempt: u32, ctx: &mut DeterminismContext) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let k = match self.strategy {
            RetryStrategy::Exponential => 1u64 << u64::from(attempt.saturating_sub(1).min(62)),
            RetryStrategy::Linear => u64::from(attempt),
        };
        let jitter = ctx.next_jitter_ms(base_ms / 2);
        Duration::from_millis(base_ms.saturating_mul(k).saturating_add(jitter))
    }
}

/// One named task.
#[derive(Debug)]
pub(crate) struct Task {
    pub id: Arc<str>,
    pub state: TaskState,
    pub result: Option<Value>,
    pub failure: Option<RunError>,
    /// Number of attempts already executed.
    pub attempt: u32,
    pub retry: Option<RetryPolicy>,
    pub deps: Vec<Arc<str>>,
}

impl Task {
    pub fn new(id: Arc<str>, deps: Vec<Arc<str>>, retry: Option<RetryPolicy>) -> Self {
        Self {
            id,
            state: TaskState::Pending,
            result: None,
            failure: None,
            attempt: 0,
            retry,
            deps,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    tasks: IndexMap<Arc<str>, Task>,
    /// Task ids in the order they completed; compensation runs in reverse.
    completion_order: Vec<Arc<str>>,
}

/// Registry of named tasks. All state transitions go through here.
#[derive(Debug, Default)]
pub(crate) struct TaskRegistry {
    inner: Mutex<RegistryInner>,
    cond: Condvar,
}

impl TaskRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a task; duplicate ids are rejected.
    pub fn register(&self, task: Task) -> RunResult<()> {
        let mut inner = self.inner.lock();
        if inner.tasks.contains_key(&task.id) {
            return Err(RunError::argument(format!("duplicate task '{}'", task.id)));
        }
        debug!(task = %task.id, deps = task.deps.len(), "task registered");
        inner.tasks.insert(Arc::clone(&task.id), task);
        Ok(())
    }

    pub fn set_state(&self, id: &str, state: TaskState) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(id) {
            debug!(task = %id, from = %task.state, to = %state, "task transition");
            task.state = state;
        }
        self.cond.notify_all();
    }

    /// Ready -> Running. Returns `false` when the task was cancelled (or
    /// otherwise moved on) while sitting in the ready queue.
    pub fn begin_running(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get_mut(id) else {
            return false;
        };
        if task.state != TaskState::Ready {
            return false;
        }
        task.state = TaskState::Running;
        task.attempt += 1;
        debug!(task = %id, attempt = task.attempt, "task running");
        true
    }

    /// Marks `id` Completed with its result and records completion order.
    /// Returns `false` if the task already reached a terminal state (a body
    /// that outlived a timeout cancellation); the result is then discarded.
    pub fn complete(&self, id: &str, value: Value) -> bool {
        let mut inner = self.inner.lock();
        let transitioned = if let Some(task) = inner.tasks.get_mut(id) {
            if task.state.is_terminal() {
                false
            } else {
                task.state = TaskState::Completed;
                task.result = Some(value);
                let id = Arc::clone(&task.id);
                debug!(task = %id, "task completed");
                inner.completion_order.push(id);
                true
            }
        } else {
            false
        };
        drop(inner);
        self.cond.notify_all();
        transitioned
    }

    /// Marks `id` permanently Failed with the caught error. Returns `false`
    /// if the task was already terminal.
    pub fn fail(&self, id: &str, error: RunError) -> bool {
        let mut inner = self.inner.lock();
        let transitioned = match inner.tasks.get_mut(id) {
            Some(task) if !task.state.is_terminal() => {
                debug!(task = %id, error = %error, "task failed");
                task.state = TaskState::Failed;
                task.failure = Some(error);
                true
            }
            _ => false,
        };
        drop(inner);
        self.cond.notify_all();
        transitioned
    }

    /// Cancels `id` unless it already reached a terminal state. Returns
    /// whether this call performed the cancellation.
    pub fn cancel_if_not_terminal(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let cancelled = match inner.tasks.get_mut(id) {
            Some(task) if !task.state.is_terminal() => {
                debug!(task = %id, from = %task.state, "task cancelled");
                task.state = TaskState::Cancelled;
                true
            }
            _ => false,
        };
        drop(inner);
        if cancelled {
            self.cond.notify_all();
        }
        cancelled
    }

    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.inner.lock().tasks.get(id).map(|task| task.state)
    }

    pub fn attempt(&self, id: &str) -> u32 {
        self.inner.lock().tasks.get(id).map_or(0, |task| task.attempt)
    }

    pub fn retry_policy(&self, id: &str) -> Option<RetryPolicy> {
        self.inner.lock().tasks.get(id).and_then(|task| task.retry)
    }

    /// First permanently failed task, in registration order.
    pub fn first_failure(&self) -> Option<(Arc<str>, RunError)> {
        let inner = self.inner.lock();
        inner.tasks.values().find_map(|task| {
            (task.state == TaskState::Failed)
                .then(|| task.failure.clone().map(|failure| (Arc::clone(&task.id), failure)))
                .flatten()
        })
    }

    pub fn completion_order(&self) -> Vec<Arc<str>> {
        self.inner.lock().completion_order.clone()
    }

    pub fn all_terminal(&self) -> bool {
        self.inner.lock().tasks.values().all(|task| task.state.is_terminal())
    }

    /// Spawns a detached task for `start`: registered, immediately Running
    /// on its own thread, completed or failed when the body returns.
    pub fn spawn(
        registry: &Arc<Self>,
        id: Arc<str>,
        body: impl FnOnce() -> RunResult<Value> + Send + 'static,
    ) -> RunResult<()> {
        let mut task = Task::new(Arc::clone(&id), Vec::new(), None);
        task.state = TaskState::Running;
        task.attempt = 1;
        registry.register(task)?;
        let registry = Arc::clone(registry);
        std::thread::spawn(move || match body() {
            Ok(value) => registry.complete(&id, value),
            Err(error) => registry.fail(&id, error),
        });
        Ok(())
    }

    /// Blocks until `id` is terminal: yields the result of a Completed task,
    /// re-raises the stored failure of a Failed one, and raises
    /// `CancelledError` for a Cancelled one.
    pub fn wait_terminal(&self, id: &str) -> RunResult<Value> {
        let mut inner = self.inner.lock();
        loop {
            let Some(task) = inner.tasks.get(id) else {
                return Err(RunError::unknown_task(id));
            };
            match task.state {
                TaskState::Completed => return Ok(task.result.clone().unwrap_or(Value::Null)),
                TaskState::Failed => {
                    let failure = task.failure.clone();
                    return Err(failure.unwrap_or_else(|| RunError::workflow_failure_value(Value::Null)));
                }
                TaskState::Cancelled => return Err(RunError::cancelled(id)),
                TaskState::Pending | TaskState::Ready | TaskState::Running => {
                    self.cond.wait(&mut inner);
                }
            }
        }
    }

    /// Blocks until `id` settles, yielding `Some(result)` for a Completed
    /// task and `None` otherwise. Used by `wait`, which publishes results
    /// but does not raise on failure.
    pub fn wait_settled(&self, id: &str) -> RunResult<Option<Value>> {
        let mut inner = self.inner.lock();
        loop {
            let Some(task) = inner.tasks.get(id) else {
                return Err(RunError::unknown_task(id));
            };
            if task.state.is_settled() {
                return Ok((task.state == TaskState::Completed).then(|| task.result.clone().unwrap_or(Value::Null)));
            }
            self.cond.wait(&mut inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn policy(strategy: RetryStrategy, base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            strategy,
            base_delay: Duration::from_millis(base_ms),
        }
    }

    #[test]
    fn exponential_backoff_stays_within_bounds() {
        let policy = policy(RetryStrategy::Exponential, 20);
        let mut ctx = DeterminismContext::record(11);
        for attempt in 1..=4u32 {
            let delay = u64::try_from(policy.delay_for(attempt, &mut ctx).as_millis()).unwrap();
            let floor = 20 * (1u64 << (attempt - 1));
            assert!(
                delay >= floor && delay < floor + 10,
                "attempt {attempt}: delay {delay} outside [{floor}, {})",
                floor + 10
            );
        }
    }

    #[test]
    fn linear_backoff_stays_within_bounds() {
        let policy = policy(RetryStrategy::Linear, 10);
        let mut ctx = DeterminismContext::record(7);
        for attempt in 1..=4u32 {
            let delay = u64::try_from(policy.delay_for(attempt, &mut ctx).as_millis()).unwrap();
            let floor = 10 * u64::from(attempt);
            assert!(delay >= floor && delay < floor + 5);
        }
    }

    #[test]
    fn zero_base_delay_is_zero_and_draws_nothing() {
        let policy = policy(RetryStrategy::Exponential, 0);
        let mut ctx = DeterminismContext::record(1);
        assert_eq!(policy.delay_for(3, &mut ctx), Duration::ZERO);
        assert!(ctx.log().is_empty());
    }

    #[test]
    fn completion_order_is_recorded() {
        let registry = TaskRegistry::new();
        for id in ["a", "b"] {
            registry.register(Task::new(id.into(), Vec::new(), None)).unwrap();
        }
        registry.complete("b", Value::Int(2));
        registry.complete("a", Value::Int(1));
        let order: Vec<String> = registry.completion_order().iter().map(ToString::to_string).collect();
        assert_eq!(order, ["b", "a"]);
        assert!(registry.all_terminal());
    }

    #[test]
    fn awaiting_a_cancelled_task_raises_cancelled() {
        let registry = TaskRegistry::new();
        registry.register(Task::new("t".into(), Vec::new(), None)).unwrap();
        assert!(registry.cancel_if_not_terminal("t"));
        let err = registry.wait_terminal("t").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CancelledError);
    }
}
