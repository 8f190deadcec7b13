//! Executable nodes produced by the loader.
//!
//! Every IR construct compiles to one of these nodes with all name
//! resolution already done: frame-slot reads carry their slot index,
//! environment reads carry the name, builtin calls are lowered to dedicated
//! nodes, and enum constants are pre-built values. The tree is immutable
//! after preparation and shared via `Arc` from closures and task bodies.

use std::{sync::Arc, time::Duration};

use crate::{builtins::BuiltinId, effect::EffectSet, tasks::RetryPolicy, value::Value};

/// A prepared, evaluable node.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    /// A constant: literals and load-time-resolved enum variants.
    Literal(Value),
    /// Read of a frame slot resolved at load time.
    LoadSlot { slot: usize, name: Arc<str> },
    /// Read through the chained environment (top-level names, scope locals,
    /// published task results).
    LoadEnv { name: Arc<str> },
    /// Member-access chain: the base resolves to a value, each path segment
    /// reads a record field or map key.
    Member { base: Box<Node>, path: Vec<Arc<str>> },
    /// `let` binding. `slot` is `None` inside `scope` blocks, which bind in
    /// the runtime child environment instead of the frame.
    Let {
        slot: Option<usize>,
        name: Arc<str>,
        expr: Box<Node>,
    },
    /// `set` targeting a frame slot.
    SetSlot {
        slot: usize,
        name: Arc<str>,
        expr: Box<Node>,
    },
    /// `set` targeting an environment binding.
    SetEnv { name: Arc<str>, expr: Box<Node> },
    /// Call lowered to a registered builtin at load time.
    CallBuiltin {
        builtin: BuiltinId,
        name: Arc<str>,
        args: Vec<Node>,
    },
    /// Call of an arbitrary expression evaluating to a closure.
    CallClosure { target: Box<Node>, args: Vec<Node> },
    If {
        cond: Box<Node>,
        then_block: Vec<Node>,
        else_block: Vec<Node>,
    },
    Match {
        scrutinee: Box<Node>,
        cases: Vec<MatchCase>,
    },
    /// A `scope` block: runs its body in a fresh child environment.
    Scope { body: Vec<Node> },
    /// Non-local exit carrying a value to the enclosing call boundary.
    Return { expr: Box<Node> },
    /// Record construction, validated against the declared field list.
    Construct {
        data_type: Arc<DataType>,
        fields: Vec<(Arc<str>, Node)>,
    },
    WrapOk(Box<Node>),
    WrapErr(Box<Node>),
    WrapSome(Box<Node>),
    NoneConst,
    /// `await expr`; requires `Async`.
    Await { expr: Box<Node> },
    /// `start name = expr`; requires `Async`. The body is `Arc`-shared with
    /// the worker thread that evaluates it.
    Start { name: Arc<str>, expr: Arc<Node> },
    /// `wait names`; requires `Async`.
    Wait { names: Vec<Arc<str>> },
    Workflow(Arc<WorkflowSpec>),
    /// Lambda creation; capture snapshots are evaluated at this site.
    Lambda(Arc<LambdaDef>),
}

/// One arm of a prepared `match`.
#[derive(Debug, Clone)]
pub(crate) struct MatchCase {
    pub pattern: Pattern,
    pub body: Vec<Node>,
}

/// A prepared pattern. Binding patterns carry their resolved frame slot, or
/// `None` inside `scope` blocks (environment-bound).
#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    Wildcard,
    Bind { slot: Option<usize>, name: Arc<str> },
    Int(i64),
    Null,
    Constructor {
        name: Arc<str>,
        fields: Vec<(Option<Arc<str>>, Pattern)>,
    },
}

/// A record type, indexed by the loader from a `Data` declaration.
#[derive(Debug)]
pub(crate) struct DataType {
    pub name: Arc<str>,
    /// Field names in declaration order.
    pub fields: Vec<Arc<str>>,
}

/// PII annotation lifted off a function's declared return type.
#[derive(Debug, Clone)]
pub(crate) struct PiiAnnotation {
    pub category: String,
    pub sensitivity: String,
}

/// A call target: everything needed to execute a function or lambda body.
///
/// The frame layout is `[params][captures][locals]`; `frame_size` covers all
/// three regions. Bodies reference their slots directly, so a `FunctionDef`
/// is only valid together with the layout it was prepared against.
#[derive(Debug)]
pub(crate) struct FunctionDef {
    pub name: Arc<str>,
    /// Parameter names in declaration order (slots `0..P`).
    pub params: Vec<Arc<str>>,
    /// Capture names in declaration order (slots `P..P+C`); empty for
    /// top-level functions.
    pub captures: Vec<Arc<str>>,
    pub frame_size: usize,
    /// Declared required effects, including the `Async` the loader appends
    /// to workflow-bearing functions.
    pub effects: EffectSet,
    pub body: Vec<Node>,
    /// Present when the declared return type is PII-annotated; returned
    /// values are wrapped at the call boundary.
    pub ret_pii: Option<PiiAnnotation>,
}

/// A prepared lambda expression.
#[derive(Debug)]
pub(crate) struct LambdaDef {
    pub def: Arc<FunctionDef>,
    /// Capture snapshot expressions, evaluated in the enclosing frame at
    /// lambda-creation time. Aligned with `def.captures`.
    pub capture_exprs: Vec<Node>,
}

/// A prepared `workflow` construct.
#[derive(Debug)]
pub(crate) struct WorkflowSpec {
    pub steps: Vec<WorkflowStepDef>,
    /// `None` means unbounded (declared timeout of zero milliseconds).
    pub timeout: Option<Duration>,
}

/// One prepared workflow step.
#[derive(Debug)]
pub(crate) struct WorkflowStepDef {
    pub name: Arc<str>,
    pub body: Arc<Vec<Node>>,
    pub dependencies: Vec<Arc<str>>,
    pub compensate: Option<Arc<Vec<Node>>>,
    pub retry: Option<RetryPolicy>,
}
