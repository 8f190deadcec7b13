//! The tree-walking evaluator.
//!
//! Evaluation is single-threaded per call frame: one [`Frame`] plus the
//! chained environment active at the node, threaded through a [`Vm`] context
//! that carries the permission set, registries, and print writer. Workflow
//! and `start` bodies clone the `Vm` (and snapshot the frame) to re-enter
//! the evaluator on worker threads under the inherited permission set.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
    builtins::{BuiltinRegistry, call_builtin},
    determinism::DeterminismContext,
    effect::{Effect, EffectSet},
    env::{Env, Frame},
    error::{EvalResult, Flow, RunError, RunResult},
    io::PrintWriter,
    nodes::{Node, Pattern},
    purity::PurityAnalyzer,
    scheduler,
    tasks::TaskRegistry,
    value::{ClosureValue, RecordValue, Value},
};

/// Default recursion-depth limit for closure calls.
pub(crate) const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Evaluation context. Cloning is cheap (shared handles plus the permission
/// set) and hands a worker thread its own context with the permission set
/// captured at the spawn site.
#[derive(Clone)]
pub(crate) struct Vm {
    pub globals: Arc<Env>,
    pub builtins: Arc<BuiltinRegistry>,
    /// The currently-permitted effects; replaced for the duration of each
    /// closure call.
    pub permitted: EffectSet,
    /// Registry receiving `start` tasks for this run.
    pub ambient: Arc<TaskRegistry>,
    pub purity: Arc<PurityAnalyzer>,
    pub determinism: Arc<Mutex<DeterminismContext>>,
    pub printer: Arc<dyn PrintWriter>,
    pub depth: usize,
    pub max_depth: usize,
}

/// Evaluates statements in order, yielding the last statement's value
/// (Null for an empty block).
pub(crate) fn eval_block(nodes: &[Node], frame: &mut Frame, env: &Arc<Env>, vm: &mut Vm) -> EvalResult {
    let mut last = Value::Null;
    for node in nodes {
        last = eval(node, frame, env, vm)?;
    }
    Ok(last)
}

pub(crate) fn eval(node: &Node, frame: &mut Frame, env: &Arc<Env>, vm: &mut Vm) -> EvalResult {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::LoadSlot { slot, name } => {
            if frame.is_bound(*slot) {
                Ok(frame.get(*slot).clone())
            } else {
                Err(RunError::unbound(name).into())
            }
        }
        Node::LoadEnv { name } => env.lookup(name).ok_or_else(|| RunError::unbound(name).into()),
        Node::Member { base, path } => {
            let mut value = eval(base, frame, env, vm)?;
            for segment in path {
                value = member(&value, segment)?;
            }
            Ok(value)
        }
        Node::Let { slot, name, expr } => {
            let value = eval(expr, frame, env, vm)?;
            match slot {
                Some(slot) => frame.set(*slot, value),
                None => env.declare(Arc::clone(name), value),
            }
            Ok(Value::Null)
        }
        Node::SetSlot { slot, name, expr } => {
            let value = eval(expr, frame, env, vm)?;
            if frame.is_bound(*slot) {
                frame.set(*slot, value);
                Ok(Value::Null)
            } else {
                Err(RunError::unbound(name).into())
            }
        }
        Node::SetEnv { name, expr } => {
            let value = eval(expr, frame, env, vm)?;
            if env.assign(name, value) {
                Ok(Value::Null)
            } else {
                Err(RunError::unbound(name).into())
            }
        }
        Node::CallBuiltin { builtin, name: _, args } => {
            let mut values: SmallVec<[Value; 4]> = SmallVec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, frame, env, vm)?);
            }
            for effect in builtin.required_effects() {
                vm.permitted.check(&effect)?;
            }
            call_builtin(builtin, &values, vm.printer.as_ref()).map_err(Flow::from)
        }
        Node::CallClosure { target, args } => {
            let target = eval(target, frame, env, vm)?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, frame, env, vm)?);
            }
            match target {
                Value::Closure(closure) => call_closure(&closure, values, vm).map_err(Flow::from),
                other => Err(RunError::type_error(format!("cannot call a {} value", other.type_name())).into()),
            }
        }
        Node::If {
            cond,
            then_block,
            else_block,
        } => match eval(cond, frame, env, vm)? {
            Value::Bool(true) => eval_block(then_block, frame, env, vm),
            Value::Bool(false) => eval_block(else_block, frame, env, vm),
            other => Err(RunError::type_error(format!(
                "if condition must be Bool, got {}",
                other.type_name()
            ))
            .into()),
        },
        Node::Match { scrutinee, cases } => {
            let value = eval(scrutinee, frame, env, vm)?;
            for case in cases {
                let mut binds = Vec::new();
                if match_pattern(&case.pattern, &value, &mut binds) {
                    for (slot, name, bound) in binds {
                        match slot {
                            Some(slot) => frame.set(slot, bound),
                            None => env.declare(name, bound),
                        }
                    }
                    return eval_block(&case.body, frame, env, vm);
                }
            }
            Err(RunError::match_error(format!("no pattern matched {value}")).into())
        }
        Node::Scope { body } => {
            let child = Env::child(env);
            eval_block(body, frame, &child, vm)
        }
        Node::Return { expr } => {
            let value = eval(expr, frame, env, vm)?;
            Err(Flow::Return(value))
        }
        Node::Construct { data_type, fields } => {
            for (name, _) in fields {
                if !data_type.fields.contains(name) {
                    return Err(RunError::argument(format!(
                        "'{}' has no field '{name}'",
                        data_type.name
                    ))
                    .into());
                }
            }
            let mut record_fields: IndexMap<String, Value> = IndexMap::with_capacity(data_type.fields.len());
            // Evaluate in the Data declaration's field order.
            for declared in &data_type.fields {
                let mut initializers = fields.iter().filter(|(name, _)| name == declared);
                let Some((_, expr)) = initializers.next() else {
                    return Err(RunError::argument(format!(
                        "missing field '{declared}' constructing '{}'",
                        data_type.name
                    ))
                    .into());
                };
                if initializers.next().is_some() {
                    return Err(RunError::argument(format!(
                        "duplicate field '{declared}' constructing '{}'",
                        data_type.name
                    ))
                    .into());
                }
                record_fields.insert(declared.to_string(), eval(expr, frame, env, vm)?);
            }
            Ok(Value::Record(Arc::new(RecordValue {
                type_name: Arc::clone(&data_type.name),
                fields: record_fields,
            })))
        }
        Node::WrapOk(expr) => Ok(Value::Ok(Arc::new(eval(expr, frame, env, vm)?))),
        Node::WrapErr(expr) => Ok(Value::Err(Arc::new(eval(expr, frame, env, vm)?))),
        Node::WrapSome(expr) => Ok(Value::Some(Arc::new(eval(expr, frame, env, vm)?))),
        Node::NoneConst => Ok(Value::None),
        Node::Await { expr } => {
            vm.permitted.check(&Effect::Async)?;
            match eval(expr, frame, env, vm)? {
                Value::TaskHandle(name) => vm.ambient.wait_terminal(&name).map_err(Flow::from),
                other => Err(RunError::type_error(format!(
                    "await expects a TaskHandle, got {}",
                    other.type_name()
                ))
                .into()),
            }
        }
        Node::Start { name, expr } => {
            vm.permitted.check(&Effect::Async)?;
            let body = Arc::clone(expr);
            let snapshot = frame.snapshot();
            let task_env = Arc::clone(env);
            // The spawned body inherits the permission set captured here.
            let mut worker = vm.clone();
            TaskRegistry::spawn(&vm.ambient, Arc::clone(name), move || {
                let mut frame = snapshot;
                match eval(&body, &mut frame, &task_env, &mut worker) {
                    Ok(value) => Ok(value),
                    Err(flow) => flow.into_call_result(),
                }
            })?;
            env.declare(Arc::clone(name), Value::TaskHandle(Arc::clone(name)));
            Ok(Value::Null)
        }
        Node::Wait { names } => {
            vm.permitted.check(&Effect::Async)?;
            for name in names {
                if let Some(value) = vm.ambient.wait_settled(name)? {
                    env.declare(Arc::clone(name), value);
                }
            }
            Ok(Value::Null)
        }
        Node::Workflow(spec) => scheduler::execute(spec, frame, env, vm).map_err(Flow::from),
        Node::Lambda(lambda) => {
            let mut captured = Vec::with_capacity(lambda.capture_exprs.len());
            for expr in &lambda.capture_exprs {
                captured.push(eval(expr, frame, env, vm)?);
            }
            vm.purity.record(&lambda.def.name, &lambda.def.effects);
            Ok(Value::Closure(Arc::new(ClosureValue {
                effects: lambda.def.effects.clone(),
                captured,
                target: Arc::clone(&lambda.def),
            })))
        }
    }
}

/// Invokes a closure: fresh frame, positional arguments in slots `0..P`,
/// stored captures in `P..P+C`, the callee's declared effects installed for
/// the duration of the body, and the caller's set restored afterwards.
/// A `return` unwinding out of the body is delivered here.
pub(crate) fn call_closure(closure: &ClosureValue, args: Vec<Value>, vm: &mut Vm) -> RunResult<Value> {
    let def = &closure.target;
    if args.len() != def.params.len() {
        return Err(RunError::arity(&def.name, def.params.len(), args.len()));
    }
    if vm.depth >= vm.max_depth {
        return Err(RunError::resource(format!(
            "call depth limit of {} exceeded in '{}'",
            vm.max_depth, def.name
        )));
    }
    let mut frame = Frame::new(def.frame_size);
    let mut slot = 0;
    for arg in args {
        frame.set(slot, arg);
        slot += 1;
    }
    for capture in &closure.captured {
        frame.set(slot, capture.clone());
        slot += 1;
    }
    let env = Env::child(&vm.globals);
    let caller_permitted = std::mem::replace(&mut vm.permitted, closure.effects.clone());
    vm.depth += 1;
    let outcome = eval_block(&def.body, &mut frame, &env, vm);
    vm.depth -= 1;
    vm.permitted = caller_permitted;
    let value = match outcome {
        Ok(value) => value,
        Err(flow) => flow.into_call_result()?,
    };
    Ok(match &def.ret_pii {
        Some(pii) => Value::wrap_pii(value, &pii.category, &pii.sensitivity),
        None => value,
    })
}

fn member(value: &Value, segment: &str) -> EvalResult {
    match value {
        Value::Record(record) => record.fields.get(segment).cloned().ok_or_else(|| {
            RunError::type_error(format!("record '{}' has no field '{segment}'", record.type_name)).into()
        }),
        Value::Map(entries) => entries
            .get(segment)
            .cloned()
            .ok_or_else(|| RunError::type_error(format!("map has no key '{segment}'")).into()),
        other => Err(RunError::type_error(format!("member access on {} value", other.type_name())).into()),
    }
}

/// Tries to match `value` against `pattern`. Bindings are collected and only
/// applied by the caller once the whole pattern matched, so a failing case
/// leaves no partial bindings behind.
fn match_pattern(pattern: &Pattern, value: &Value, binds: &mut Vec<(Option<usize>, Arc<str>, Value)>) -> bool {
    match pattern {
        Pattern::Wildcard => true,
        Pattern::Bind { slot, name } => {
            binds.push((*slot, Arc::clone(name), value.clone()));
            true
        }
        Pattern::Int(expected) => match value {
            Value::Int(v) => i64::from(*v) == *expected,
            Value::Long(v) => v == expected,
            _ => false,
        },
        Pattern::Null => matches!(value, Value::Null),
        Pattern::Constructor { name, fields } => match_constructor(name, fields, value, binds),
    }
}

fn match_constructor(
    name: &str,
    fields: &[(Option<Arc<str>>, Pattern)],
    value: &Value,
    binds: &mut Vec<(Option<usize>, Arc<str>, Value)>,
) -> bool {
    match value {
        Value::Ok(inner) if name == "Ok" => match_single(fields, inner, binds),
        Value::Err(inner) if name == "Err" => match_single(fields, inner, binds),
        Value::Some(inner) if name == "Some" => match_single(fields, inner, binds),
        Value::None => name == "None" && fields.is_empty(),
        Value::Record(record) => {
            if *record.type_name != *name {
                return false;
            }
            for (index, (field_name, sub)) in fields.iter().enumerate() {
                let target = match field_name {
                    Some(field_name) => record.fields.get(field_name.as_ref()),
                    None => record.fields.get_index(index).map(|(_, value)| value),
                };
                match target {
                    Some(target) if match_pattern(sub, target, binds) => {}
                    _ => return false,
                }
            }
            true
        }
        Value::Enum(enum_value) => {
            fields.is_empty()
                && name
                    .split_once('.')
                    .is_some_and(|(enum_name, variant)| {
                        *enum_value.enum_name == *enum_name && *enum_value.variant == *variant
                    })
        }
        _ => false,
    }
}

/// Matches the single positional payload of an Ok/Err/Some shape. An empty
/// field list matches the shape alone.
fn match_single(fields: &[(Option<Arc<str>>, Pattern)], inner: &Value, binds: &mut Vec<(Option<usize>, Arc<str>, Value)>) -> bool {
    match fields {
        [] => true,
        [(None, pattern)] => match_pattern(pattern, inner, binds),
        _ => false,
    }
}
