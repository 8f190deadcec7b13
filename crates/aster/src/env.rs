use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::value::Value;

/// A per-call indexed slot array.
///
/// The layout is fixed by the loader when the function is prepared:
/// ```text
/// [params 0..P][captures P..P+C][locals P+C..]
/// ```
/// Local slots cover every `let`-binding reachable in the body *excluding*
/// those introduced inside inner `scope` blocks, which bind in runtime child
/// environments instead. Slots start as `Undefined` and reads of an
/// unassigned slot surface as `UnboundName`.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    slots: Vec<Value>,
}

impl Frame {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![Value::Undefined; size],
        }
    }

    pub fn get(&self, slot: usize) -> &Value {
        &self.slots[slot]
    }

    pub fn set(&mut self, slot: usize, value: Value) {
        self.slots[slot] = value;
    }

    /// Returns `true` if the slot has been assigned.
    pub fn is_bound(&self, slot: usize) -> bool {
        !matches!(self.slots[slot], Value::Undefined)
    }

    /// Copies the frame for a task body about to run on a worker thread.
    ///
    /// Mutations inside the task stay local to the copy; the only channel
    /// back to the parent is the published task result.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }
}

/// A lexically chained, name-addressed environment.
///
/// Holds the bindings that do not live in frame slots: pre-populated
/// top-level function bindings, `scope`-locals, and task-name bindings
/// published by the scheduler. Lookups walk parent-ward; assignments bind in
/// the innermost environment owning the name.
///
/// The map is lock-guarded because workflow workers publish step results
/// into the owning frame's environment while sibling steps read from it.
#[derive(Debug)]
pub(crate) struct Env {
    parent: Option<Arc<Env>>,
    vars: RwLock<AHashMap<Arc<str>, Value>>,
}

impl Env {
    /// Creates a root environment (the module's global scope).
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            vars: RwLock::new(AHashMap::new()),
        })
    }

    /// Creates a child environment chained to `parent`.
    pub fn child(parent: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(Arc::clone(parent)),
            vars: RwLock::new(AHashMap::new()),
        })
    }

    /// Binds `name` in *this* environment, shadowing any outer binding.
    pub fn declare(&self, name: Arc<str>, value: Value) {
        self.vars.write().insert(name, value);
    }

    /// Looks up `name`, walking parent-ward. Returns a clone of the value.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.read().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    /// Overwrites the innermost existing binding of `name`.
    ///
    /// Returns `false` if no reachable environment owns the name; the caller
    /// raises `UnboundName`.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        {
            let mut vars = self.vars.write();
            if let Some(slot) = vars.get_mut(name) {
                *slot = value;
                return true;
            }
        }
        self.parent.as_ref().is_some_and(|parent| parent.assign(name, value))
    }
}
