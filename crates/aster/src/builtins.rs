//! Built-in function registry.
//!
//! Builtins are looked up by name during call compilation: the loader lowers
//! a call whose target is a `Name` matching the registry to a dedicated
//! builtin node, so dispatch at run time is a direct match. The registry is
//! open: hosts can register additional arity-tagged functions with declared
//! effects, which the effect gate checks before invocation.

use std::{fmt, sync::Arc};

use ahash::AHashMap;

use crate::{
    effect::Effect,
    error::{RunError, RunResult},
    io::PrintWriter,
    object::Object,
    value::Value,
};

/// The builtins the core recognizes by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CoreBuiltin {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    TextConcat,
    TextLength,
    TextContains,
    TextRedact,
    ListEmpty,
    ListAppend,
    ResultIsOk,
    ResultIsErr,
    ResultUnwrap,
    OptionIsSome,
    OptionIsNone,
    OptionUnwrap,
    Print,
}

impl CoreBuiltin {
    pub fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "add" => Self::Add,
            "sub" => Self::Sub,
            "mul" => Self::Mul,
            "div" => Self::Div,
            "eq" => Self::Eq,
            "lt" => Self::Lt,
            "gt" => Self::Gt,
            "le" => Self::Le,
            "ge" => Self::Ge,
            "Text.concat" => Self::TextConcat,
            "Text.length" => Self::TextLength,
            "Text.contains" => Self::TextContains,
            "Text.redact" => Self::TextRedact,
            "List.empty" => Self::ListEmpty,
            "List.append" => Self::ListAppend,
            "Result.isOk" => Self::ResultIsOk,
            "Result.isErr" => Self::ResultIsErr,
            "Result.unwrap" => Self::ResultUnwrap,
            "Option.isSome" => Self::OptionIsSome,
            "Option.isNone" => Self::OptionIsNone,
            "Option.unwrap" => Self::OptionUnwrap,
            "print" => Self::Print,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Eq => "eq",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Le => "le",
            Self::Ge => "ge",
            Self::TextConcat => "Text.concat",
            Self::TextLength => "Text.length",
            Self::TextContains => "Text.contains",
            Self::TextRedact => "Text.redact",
            Self::ListEmpty => "List.empty",
            Self::ListAppend => "List.append",
            Self::ResultIsOk => "Result.isOk",
            Self::ResultIsErr => "Result.isErr",
            Self::ResultUnwrap => "Result.unwrap",
            Self::OptionIsSome => "Option.isSome",
            Self::OptionIsNone => "Option.isNone",
            Self::OptionUnwrap => "Option.unwrap",
            Self::Print => "print",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Self::ListEmpty => 0,
            Self::TextLength
            | Self::TextRedact
            | Self::ResultIsOk
            | Self::ResultIsErr
            | Self::ResultUnwrap
            | Self::OptionIsSome
            | Self::OptionIsNone
            | Self::OptionUnwrap
            | Self::Print => 1,
            _ => 2,
        }
    }
}

/// Signature of a host-registered builtin body.
type HostFn = Arc<dyn Fn(&[Object]) -> Result<Object, String> + Send + Sync>;

/// A host-registered builtin: name, arity, declared effects, function.
pub struct HostBuiltin {
    name: String,
    arity: usize,
    effects: Vec<Effect>,
    func: HostFn,
}

impl HostBuiltin {
    pub fn new(
        name: impl Into<String>,
        arity: usize,
        effects: Vec<Effect>,
        func: impl Fn(&[Object]) -> Result<Object, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            effects,
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for HostBuiltin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuiltin")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("effects", &self.effects)
            .finish_non_exhaustive()
    }
}

/// A builtin resolved at load time.
#[derive(Debug, Clone)]
pub(crate) enum BuiltinId {
    Core(CoreBuiltin),
    Host(Arc<HostBuiltin>),
}

impl BuiltinId {
    pub fn arity(&self) -> usize {
        match self {
            Self::Core(core) => core.arity(),
            Self::Host(host) => host.arity,
        }
    }

    /// Effects the gate must verify before the builtin runs.
    pub fn required_effects(&self) -> Vec<Effect> {
        match self {
            Self::Core(CoreBuiltin::Print) => vec![Effect::Io],
            Self::Core(_) => Vec::new(),
            Self::Host(host) => host.effects.clone(),
        }
    }
}

/// Name -> builtin lookup used during call compilation.
#[derive(Debug, Default)]
pub(crate) struct BuiltinRegistry {
    host: AHashMap<String, Arc<HostBuiltin>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host builtin. A host entry shadows a core builtin of the
    /// same name.
    pub fn register(&mut self, builtin: HostBuiltin) {
        self.host.insert(builtin.name.clone(), Arc::new(builtin));
    }

    pub fn resolve(&self, name: &str) -> Option<BuiltinId> {
        if let Some(host) = self.host.get(name) {
            return Some(BuiltinId::Host(Arc::clone(host)));
        }
        CoreBuiltin::lookup(name).map(BuiltinId::Core)
    }
}

/// Invokes a builtin. Arity was checked at load time; effects were checked
/// by the gate before this call.
pub(crate) fn call_builtin(id: &BuiltinId, args: &[Value], printer: &dyn PrintWriter) -> RunResult<Value> {
    match id {
        BuiltinId::Core(core) => call_core(*core, args, printer),
        BuiltinId::Host(host) => {
            let host_args: Vec<Object> = args.iter().map(Object::from_value).collect::<RunResult<_>>()?;
            match (host.func)(&host_args) {
                Ok(object) => Ok(object.into_value()),
                Err(message) => Err(RunError::argument(format!("{}: {message}", host.name))),
            }
        }
    }
}

fn call_core(builtin: CoreBuiltin, args: &[Value], printer: &dyn PrintWriter) -> RunResult<Value> {
    match builtin {
        CoreBuiltin::Add | CoreBuiltin::Sub | CoreBuiltin::Mul | CoreBuiltin::Div => {
            arith(builtin, &args[0], &args[1])
        }
        CoreBuiltin::Eq => Ok(Value::Bool(args[0] == args[1])),
        CoreBuiltin::Lt | CoreBuiltin::Le | CoreBuiltin::Gt | CoreBuiltin::Ge => {
            compare(builtin, &args[0], &args[1])
        }
        CoreBuiltin::TextConcat => match (&args[0], &args[1]) {
            (Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{a}{b}").into())),
            (a, b) => Err(RunError::type_error(format!(
                "Text.concat expects Text arguments, got {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
        CoreBuiltin::TextLength => match &args[0] {
            Value::Text(text) => Ok(Value::Int(i32::try_from(text.chars().count()).unwrap_or(i32::MAX))),
            other => Err(type_mismatch("Text.length", "Text", other)),
        },
        CoreBuiltin::TextContains => match (&args[0], &args[1]) {
            (Value::Text(haystack), Value::Text(needle)) => Ok(Value::Bool(haystack.contains(needle.as_ref()))),
            (a, _) => Err(type_mismatch("Text.contains", "Text", a)),
        },
        CoreBuiltin::TextRedact => match &args[0] {
            Value::Pii(pii) => Ok(Value::Text(pii.redacted().into())),
            other => Ok(Value::Text(other.to_string().into())),
        },
        CoreBuiltin::ListEmpty => Ok(Value::List(Arc::new(Vec::new()))),
        CoreBuiltin::ListAppend => match &args[0] {
            Value::List(items) => {
                let mut next = items.as_ref().clone();
                next.push(args[1].clone());
                Ok(Value::List(Arc::new(next)))
            }
            other => Err(type_mismatch("List.append", "List", other)),
        },
        CoreBuiltin::ResultIsOk => match &args[0] {
            Value::Ok(_) => Ok(Value::Bool(true)),
            Value::Err(_) => Ok(Value::Bool(false)),
            other => Err(type_mismatch("Result.isOk", "Result", other)),
        },
        CoreBuiltin::ResultIsErr => match &args[0] {
            Value::Ok(_) => Ok(Value::Bool(false)),
            Value::Err(_) => Ok(Value::Bool(true)),
            other => Err(type_mismatch("Result.isErr", "Result", other)),
        },
        CoreBuiltin::ResultUnwrap => match &args[0] {
            Value::Ok(inner) => Ok(inner.as_ref().clone()),
            Value::Err(inner) => Err(RunError::type_error(format!("Result.unwrap on Err({inner})"))),
            other => Err(type_mismatch("Result.unwrap", "Result", other)),
        },
        CoreBuiltin::OptionIsSome => match &args[0] {
            Value::Some(_) => Ok(Value::Bool(true)),
            Value::None => Ok(Value::Bool(false)),
            other => Err(type_mismatch("Option.isSome", "Option", other)),
        },
        CoreBuiltin::OptionIsNone => match &args[0] {
            Value::Some(_) => Ok(Value::Bool(false)),
            Value::None => Ok(Value::Bool(true)),
            other => Err(type_mismatch("Option.isNone", "Option", other)),
        },
        CoreBuiltin::OptionUnwrap => match &args[0] {
            Value::Some(inner) => Ok(inner.as_ref().clone()),
            Value::None => Err(RunError::type_error("Option.unwrap on None")),
            other => Err(type_mismatch("Option.unwrap", "Option", other)),
        },
        CoreBuiltin::Print => {
            printer.print(&args[0].to_string());
            Ok(Value::Null)
        }
    }
}

fn type_mismatch(builtin: &str, expected: &str, got: &Value) -> RunError {
    RunError::type_error(format!("{builtin} expects {expected}, got {}", got.type_name()))
}

fn arith(op: CoreBuiltin, a: &Value, b: &Value) -> RunResult<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => int_arith(op, *x, *y),
        (Value::Double(_), _) | (_, Value::Double(_)) if a.is_numeric() && b.is_numeric() => {
            let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
            Ok(Value::Double(match op {
                CoreBuiltin::Add => x + y,
                CoreBuiltin::Sub => x - y,
                CoreBuiltin::Mul => x * y,
                _ => {
                    if y == 0.0 {
                        return Err(RunError::type_error("division by zero"));
                    }
                    x / y
                }
            }))
        }
        _ if a.is_numeric() && b.is_numeric() => {
            let (x, y) = (widen(a), widen(b));
            long_arith(op, x, y)
        }
        _ => Err(RunError::type_error(format!(
            "{} expects numeric arguments, got {} and {}",
            op.name(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn widen(value: &Value) -> i64 {
    match value {
        Value::Int(v) => i64::from(*v),
        Value::Long(v) => *v,
        _ => unreachable!("widen called on non-integer"),
    }
}

fn int_arith(op: CoreBuiltin, x: i32, y: i32) -> RunResult<Value> {
    Ok(Value::Int(match op {
        CoreBuiltin::Add => x.wrapping_add(y),
        CoreBuiltin::Sub => x.wrapping_sub(y),
        CoreBuiltin::Mul => x.wrapping_mul(y),
        _ => {
            if y == 0 {
                return Err(RunError::type_error("division by zero"));
            }
            x.wrapping_div(y)
        }
    }))
}

fn long_arith(op: CoreBuiltin, x: i64, y: i64) -> RunResult<Value> {
    Ok(Value::Long(match op {
        CoreBuiltin::Add => x.wrapping_add(y),
        CoreBuiltin::Sub => x.wrapping_sub(y),
        CoreBuiltin::Mul => x.wrapping_mul(y),
        _ => {
            if y == 0 {
                return Err(RunError::type_error("division by zero"));
            }
            x.wrapping_div(y)
        }
    }))
}

fn compare(op: CoreBuiltin, a: &Value, b: &Value) -> RunResult<Value> {
    let ordering = match (a, b) {
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        _ if a.is_numeric() && b.is_numeric() => {
            let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
            let Some(ordering) = x.partial_cmp(&y) else {
                return Ok(Value::Bool(false));
            };
            ordering
        }
        _ => {
            return Err(RunError::type_error(format!(
                "{} cannot compare {} and {}",
                op.name(),
                a.type_name(),
                b.type_name()
            )));
        }
    };
    Ok(Value::Bool(match op {
        CoreBuiltin::Lt => ordering.is_lt(),
        CoreBuiltin::Le => ordering.is_le(),
        CoreBuiltin::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }))
}
