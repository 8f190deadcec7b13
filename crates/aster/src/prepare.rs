//! The loader: turns an IR module into executable structures.
//!
//! Preparation walks the module once, indexes `Data` and `Enum`
//! declarations, selects one canonical overload per function name, builds a
//! frame layout per function, and lowers every body to a [`Node`] tree with
//! name resolution already done. Builtin calls are recognized here so the
//! evaluator never performs name-based builtin lookup.
//!
//! # Frame layout
//!
//! Parameters take slots `0..P`, captures `P..P+C`, then one slot per
//! `let`-binding (and match-pattern binding) reachable through `if`,
//! `match`, and `workflow` bodies. `scope` blocks are *not* recursed into:
//! their locals live in runtime child environments, keeping shadowing
//! semantics intact.

use std::{cell::Cell, sync::Arc, time::Duration};

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use tracing::debug;

use crate::{
    args::score_overload,
    builtins::BuiltinRegistry,
    effect::{Effect, EffectSet},
    env::Env,
    error::{RunError, RunResult},
    ir,
    nodes::{
        DataType, FunctionDef, LambdaDef, MatchCase, Node, Pattern, PiiAnnotation, WorkflowSpec, WorkflowStepDef,
    },
    purity::PurityAnalyzer,
    tasks::{RetryPolicy, RetryStrategy},
    value::{ClosureValue, EnumValue, Value},
};

/// A loaded module: the global environment with every canonical function
/// pre-bound as a closure.
#[derive(Debug)]
pub(crate) struct PreparedModule {
    pub name: String,
    pub globals: Arc<Env>,
}

/// Prepares `module` for execution.
///
/// `cli_args` drives overload scoring: when present, each function name's
/// overloads are scored against the raw arguments and the best one becomes
/// canonical; otherwise the overload with the most parameters wins. Ties go
/// to the earliest declaration either way.
pub(crate) fn prepare(
    module: &ir::Module,
    cli_args: &[String],
    builtins: &BuiltinRegistry,
    purity: &PurityAnalyzer,
) -> RunResult<PreparedModule> {
    let mut data: AHashMap<Arc<str>, Arc<DataType>> = AHashMap::new();
    let mut enums: AHashMap<Arc<str>, Vec<Arc<str>>> = AHashMap::new();
    let mut overloads: IndexMap<&str, Vec<&ir::FuncDecl>> = IndexMap::new();

    for decl in &module.decls {
        match decl {
            ir::Decl::Data(decl) => {
                let mut fields: Vec<Arc<str>> = Vec::with_capacity(decl.fields.len());
                for field in &decl.fields {
                    if fields.iter().any(|existing| **existing == *field.name) {
                        return Err(RunError::load(format!(
                            "duplicate field '{}' in Data type '{}'",
                            field.name, decl.name
                        )));
                    }
                    fields.push(field.name.as_str().into());
                }
                let name: Arc<str> = decl.name.as_str().into();
                if data
                    .insert(
                        Arc::clone(&name),
                        Arc::new(DataType {
                            name: Arc::clone(&name),
                            fields,
                        }),
                    )
                    .is_some()
                {
                    return Err(RunError::load(format!("duplicate Data type '{}'", decl.name)));
                }
            }
            ir::Decl::Enum(decl) => {
                let variants = decl.variants.iter().map(|variant| variant.as_str().into()).collect();
                if enums.insert(decl.name.as_str().into(), variants).is_some() {
                    return Err(RunError::load(format!("duplicate Enum '{}'", decl.name)));
                }
            }
            ir::Decl::Func(decl) => overloads.entry(decl.name.as_str()).or_default().push(decl),
        }
    }

    let function_names: AHashSet<&str> = overloads.keys().copied().collect();
    let shared = SharedIndices {
        data: &data,
        enums: &enums,
        builtins,
        functions: &function_names,
        lambdas: Cell::new(0),
    };

    let globals = Env::root();
    for (name, candidates) in &overloads {
        let canonical = select_canonical(candidates, cli_args);
        debug!(function = name, overloads = candidates.len(), "preparing canonical overload");
        let effects = EffectSet::from_names(canonical.effects.iter().map(String::as_str));
        let def = build_function_def(
            name,
            &canonical.params,
            &[],
            &canonical.body,
            effects,
            Some(&canonical.ret),
            &shared,
        )?;
        let name: Arc<str> = (*name).into();
        purity.record(&name, &def.effects);
        let closure = ClosureValue {
            effects: def.effects.clone(),
            captured: Vec::new(),
            target: Arc::clone(&def),
        };
        globals.declare(name, Value::Closure(Arc::new(closure)));
    }

    Ok(PreparedModule {
        name: module.name.clone(),
        globals,
    })
}

/// Selects the canonical overload for one function name.
fn select_canonical<'a>(candidates: &[&'a ir::FuncDecl], cli_args: &[String]) -> &'a ir::FuncDecl {
    let mut best = candidates[0];
    let mut best_score = overload_score(best, cli_args);
    for candidate in &candidates[1..] {
        let score = overload_score(candidate, cli_args);
        // Strictly greater keeps the earliest declaration on ties.
        if score > best_score {
            best = *candidate;
            best_score = score;
        }
    }
    best
}

fn overload_score(decl: &ir::FuncDecl, cli_args: &[String]) -> i64 {
    if cli_args.is_empty() {
        i64::try_from(decl.params.len()).unwrap_or(i64::MAX)
    } else {
        let types: Vec<&ir::TypeRef> = decl.params.iter().map(|param| &param.ty).collect();
        i64::from(score_overload(cli_args, &types))
    }
}

/// Indices shared by every resolver of one module.
struct SharedIndices<'a> {
    data: &'a AHashMap<Arc<str>, Arc<DataType>>,
    enums: &'a AHashMap<Arc<str>, Vec<Arc<str>>>,
    builtins: &'a BuiltinRegistry,
    functions: &'a AHashSet<&'a str>,
    /// Module-wide lambda counter, so every lambda gets a distinct
    /// call-target name (`<lambda#0>`, `<lambda#1>`, ...) and purity records
    /// never collapse onto a shared key.
    lambdas: Cell<usize>,
}

impl SharedIndices<'_> {
    fn next_lambda_name(&self) -> String {
        let index = self.lambdas.get();
        self.lambdas.set(index + 1);
        format!("<lambda#{index}>")
    }
}

/// Builds the executable definition for a function or lambda body.
fn build_function_def(
    name: &str,
    params: &[ir::Param],
    captures: &[String],
    body: &[ir::Stmt],
    effects: EffectSet,
    ret: Option<&ir::TypeRef>,
    shared: &SharedIndices<'_>,
) -> RunResult<Arc<FunctionDef>> {
    let param_names: Vec<Arc<str>> = params.iter().map(|param| param.name.as_str().into()).collect();
    let capture_names: Vec<Arc<str>> = captures.iter().map(|capture| capture.as_str().into()).collect();

    let mut layout: AHashMap<Arc<str>, usize> = AHashMap::new();
    for name in param_names.iter().chain(&capture_names) {
        layout.insert(Arc::clone(name), layout.len());
    }
    let mut locals = Vec::new();
    collect_locals(body, &mut locals);
    for local in locals {
        let local: Arc<str> = local.into();
        let next = layout.len();
        layout.entry(local).or_insert(next);
    }
    let frame_size = layout.len();

    // Workflow-bearing bodies need Async even if the declaration omits it.
    let effects = if contains_workflow(body) {
        effects.with(Effect::Async)
    } else {
        effects
    };

    let mut resolver = Resolver {
        layout,
        scopes: Vec::new(),
        effects: &effects,
        shared,
    };
    let body = resolver.resolve_block(body)?;

    let ret_pii = match ret {
        Some(ir::TypeRef::PiiType {
            category, sensitivity, ..
        }) => Some(PiiAnnotation {
            category: category.clone(),
            sensitivity: sensitivity.clone(),
        }),
        _ => None,
    };

    Ok(Arc::new(FunctionDef {
        name: name.into(),
        params: param_names,
        captures: capture_names,
        frame_size,
        effects,
        body,
        ret_pii,
    }))
}

/// Collects `let` and match-pattern names reachable in the body, recursing
/// through `if`, `match`, and `workflow` bodies but not `scope` blocks.
fn collect_locals<'a>(body: &'a [ir::Stmt], out: &mut Vec<&'a str>) {
    for stmt in body {
        match stmt {
            ir::Stmt::Let { name, .. } => out.push(name),
            ir::Stmt::If {
                then_block, else_block, ..
            } => {
                collect_locals(then_block, out);
                collect_locals(else_block, out);
            }
            ir::Stmt::Match { cases, .. } => {
                for case in cases {
                    collect_pattern_binds(&case.pattern, out);
                    collect_locals(&case.body, out);
                }
            }
            ir::Stmt::Workflow { steps, .. } => {
                for step in steps {
                    collect_locals(&step.body, out);
                    if let Some(compensate) = &step.compensate {
                        collect_locals(compensate, out);
                    }
                }
            }
            ir::Stmt::Scope { .. }
            | ir::Stmt::Return { .. }
            | ir::Stmt::Set { .. }
            | ir::Stmt::Start { .. }
            | ir::Stmt::Wait { .. } => {}
        }
    }
}

fn collect_pattern_binds<'a>(pattern: &'a ir::Pattern, out: &mut Vec<&'a str>) {
    match pattern {
        ir::Pattern::Name { name } => out.push(name),
        ir::Pattern::Constructor { fields, .. } => {
            for field in fields {
                collect_pattern_binds(&field.pattern, out);
            }
        }
        ir::Pattern::Wildcard | ir::Pattern::Int { .. } | ir::Pattern::Null => {}
    }
}

fn contains_workflow(body: &[ir::Stmt]) -> bool {
    body.iter().any(|stmt| match stmt {
        ir::Stmt::Workflow { .. } => true,
        ir::Stmt::If {
            then_block, else_block, ..
        } => contains_workflow(then_block) || contains_workflow(else_block),
        ir::Stmt::Match { cases, .. } => cases.iter().any(|case| contains_workflow(&case.body)),
        ir::Stmt::Scope { statements } => contains_workflow(statements),
        _ => false,
    })
}

/// Per-body name resolver.
///
/// `scopes` tracks the names introduced by `let` inside active `scope`
/// blocks: those shadow frame slots for the rest of the block, so reads and
/// writes of a shadowed name go through the environment.
struct Resolver<'a> {
    layout: AHashMap<Arc<str>, usize>,
    scopes: Vec<AHashSet<Arc<str>>>,
    effects: &'a EffectSet,
    shared: &'a SharedIndices<'a>,
}

impl Resolver<'_> {
    fn resolve_block(&mut self, stmts: &[ir::Stmt]) -> RunResult<Vec<Node>> {
        stmts.iter().map(|stmt| self.resolve_stmt(stmt)).collect()
    }

    fn resolve_stmt(&mut self, stmt: &ir::Stmt) -> RunResult<Node> {
        match stmt {
            ir::Stmt::Return { expr } => Ok(Node::Return {
                expr: Box::new(self.resolve_expr(expr)?),
            }),
            ir::Stmt::Let { name, expr } => {
                // The initializer sees the outer binding: `let x = add(x, 1)`
                // inside a scope reads the pre-shadow x.
                let expr = Box::new(self.resolve_expr(expr)?);
                let name: Arc<str> = name.as_str().into();
                let slot = if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(Arc::clone(&name));
                    None
                } else {
                    Some(self.layout[&name])
                };
                Ok(Node::Let { slot, name, expr })
            }
            ir::Stmt::Set { name, expr } => {
                let expr = Box::new(self.resolve_expr(expr)?);
                let name: Arc<str> = name.as_str().into();
                if self.shadowed(&name) {
                    Ok(Node::SetEnv { name, expr })
                } else if let Some(slot) = self.layout.get(&name).copied() {
                    Ok(Node::SetSlot { slot, name, expr })
                } else {
                    Ok(Node::SetEnv { name, expr })
                }
            }
            ir::Stmt::If {
                cond,
                then_block,
                else_block,
            } => Ok(Node::If {
                cond: Box::new(self.resolve_expr(cond)?),
                then_block: self.resolve_block(then_block)?,
                else_block: self.resolve_block(else_block)?,
            }),
            ir::Stmt::Match { expr, cases } => {
                let scrutinee = Box::new(self.resolve_expr(expr)?);
                let cases = cases
                    .iter()
                    .map(|case| {
                        let pattern = self.resolve_pattern(&case.pattern);
                        let body = self.resolve_block(&case.body)?;
                        Ok(MatchCase { pattern, body })
                    })
                    .collect::<RunResult<Vec<_>>>()?;
                Ok(Node::Match { scrutinee, cases })
            }
            ir::Stmt::Scope { statements } => {
                self.scopes.push(AHashSet::new());
                let body = self.resolve_block(statements);
                self.scopes.pop();
                Ok(Node::Scope { body: body? })
            }
            ir::Stmt::Start { name, expr } => Ok(Node::Start {
                name: name.as_str().into(),
                expr: Arc::new(self.resolve_expr(expr)?),
            }),
            ir::Stmt::Wait { names } => Ok(Node::Wait {
                names: names.iter().map(|name| name.as_str().into()).collect(),
            }),
            ir::Stmt::Workflow { steps, timeout } => {
                let steps = steps
                    .iter()
                    .map(|step| self.resolve_step(step))
                    .collect::<RunResult<Vec<_>>>()?;
                let timeout = timeout
                    .filter(|timeout| timeout.milliseconds > 0)
                    .map(|timeout| Duration::from_millis(timeout.milliseconds));
                Ok(Node::Workflow(Arc::new(WorkflowSpec { steps, timeout })))
            }
        }
    }

    fn resolve_step(&mut self, step: &ir::WorkflowStep) -> RunResult<WorkflowStepDef> {
        let retry = match &step.retry {
            Some(retry) => Some(RetryPolicy {
                max_attempts: retry.max_attempts,
                strategy: RetryStrategy::parse(&retry.strategy)?,
                base_delay: Duration::from_millis(retry.base_delay_ms),
            }),
            None => None,
        };
        let compensate = match &step.compensate {
            Some(compensate) => Some(Arc::new(self.resolve_block(compensate)?)),
            None => None,
        };
        Ok(WorkflowStepDef {
            name: step.name.as_str().into(),
            body: Arc::new(self.resolve_block(&step.body)?),
            dependencies: step.dependencies.iter().map(|dep| dep.as_str().into()).collect(),
            compensate,
            retry,
        })
    }

    fn resolve_pattern(&mut self, pattern: &ir::Pattern) -> Pattern {
        match pattern {
            ir::Pattern::Wildcard => Pattern::Wildcard,
            ir::Pattern::Name { name } => {
                let name: Arc<str> = name.as_str().into();
                let slot = if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(Arc::clone(&name));
                    None
                } else {
                    Some(self.layout[&name])
                };
                Pattern::Bind { slot, name }
            }
            ir::Pattern::Int { value } => Pattern::Int(*value),
            ir::Pattern::Null => Pattern::Null,
            ir::Pattern::Constructor { name, fields } => Pattern::Constructor {
                name: name.as_str().into(),
                fields: fields
                    .iter()
                    .map(|field| {
                        (
                            field.name.as_deref().map(Into::into),
                            self.resolve_pattern(&field.pattern),
                        )
                    })
                    .collect(),
            },
        }
    }

    fn resolve_expr(&mut self, expr: &ir::Expr) -> RunResult<Node> {
        match expr {
            ir::Expr::String { value } => Ok(Node::Literal(Value::Text(value.as_str().into()))),
            ir::Expr::Int { value } => Ok(Node::Literal(Value::Int(*value))),
            ir::Expr::Long { value } => Ok(Node::Literal(Value::Long(*value))),
            ir::Expr::Double { value } => Ok(Node::Literal(Value::Double(*value))),
            ir::Expr::Bool { value } => Ok(Node::Literal(Value::Bool(*value))),
            ir::Expr::Null => Ok(Node::Literal(Value::Null)),
            ir::Expr::Name { name } => Ok(self.resolve_name(name)),
            ir::Expr::Call { target, args } => self.resolve_call(target, args),
            ir::Expr::Lambda {
                params,
                ret,
                captures,
                body,
            } => self.resolve_lambda(params, ret.as_ref(), captures, body),
            ir::Expr::Await { expr } => Ok(Node::Await {
                expr: Box::new(self.resolve_expr(expr)?),
            }),
            ir::Expr::Ok { expr } => Ok(Node::WrapOk(Box::new(self.resolve_expr(expr)?))),
            ir::Expr::Err { expr } => Ok(Node::WrapErr(Box::new(self.resolve_expr(expr)?))),
            ir::Expr::Some { expr } => Ok(Node::WrapSome(Box::new(self.resolve_expr(expr)?))),
            ir::Expr::None => Ok(Node::NoneConst),
            ir::Expr::Construct { type_name, fields } => {
                let Some(data_type) = self.shared.data.get(type_name.as_str()) else {
                    return Err(RunError::load(format!("unknown Data type '{type_name}' in Construct")));
                };
                let fields = fields
                    .iter()
                    .map(|field| Ok((field.name.as_str().into(), self.resolve_expr(&field.expr)?)))
                    .collect::<RunResult<Vec<_>>>()?;
                Ok(Node::Construct {
                    data_type: Arc::clone(data_type),
                    fields,
                })
            }
        }
    }

    /// Resolves a name reference: enum variants become pre-built constants,
    /// dotted names become member-access chains, everything else reads a
    /// frame slot when one is active at build time, else the environment.
    fn resolve_name(&self, name: &str) -> Node {
        if name.contains('.') {
            let segments: Vec<&str> = name.split('.').collect();
            if segments.len() == 2
                && let Some(variants) = self.shared.enums.get(segments[0])
                && variants.iter().any(|variant| **variant == *segments[1])
            {
                return Node::Literal(Value::Enum(Arc::new(EnumValue {
                    enum_name: segments[0].into(),
                    variant: segments[1].into(),
                })));
            }
            let base = Box::new(self.resolve_plain_name(segments[0]));
            return Node::Member {
                base,
                path: segments[1..].iter().map(|segment| (*segment).into()).collect(),
            };
        }
        self.resolve_plain_name(name)
    }

    fn resolve_plain_name(&self, name: &str) -> Node {
        if self.shadowed(name) {
            return Node::LoadEnv { name: name.into() };
        }
        if let Some(slot) = self.layout.get(name).copied() {
            return Node::LoadSlot {
                slot,
                name: name.into(),
            };
        }
        Node::LoadEnv { name: name.into() }
    }

    fn shadowed(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(name))
    }

    /// Whether a call-target name refers to a local binding or user function
    /// rather than a builtin of the same name.
    fn is_user_binding(&self, name: &str) -> bool {
        self.shadowed(name) || self.layout.contains_key(name) || self.shared.functions.contains(name)
    }

    fn resolve_call(&mut self, target: &ir::Expr, args: &[ir::Expr]) -> RunResult<Node> {
        // Builtin calls are selected at load time: a Name target matching the
        // registry lowers to a dedicated builtin node unless a user binding
        // shadows the name.
        if let ir::Expr::Name { name } = target
            && !self.is_user_binding(name)
            && let Some(builtin) = self.shared.builtins.resolve(name)
        {
            if builtin.arity() != args.len() {
                return Err(RunError::arity(name, builtin.arity(), args.len()));
            }
            let args = args
                .iter()
                .map(|arg| self.resolve_expr(arg))
                .collect::<RunResult<Vec<_>>>()?;
            return Ok(Node::CallBuiltin {
                builtin,
                name: name.as_str().into(),
                args,
            });
        }
        let target = Box::new(self.resolve_expr(target)?);
        let args = args
            .iter()
            .map(|arg| self.resolve_expr(arg))
            .collect::<RunResult<Vec<_>>>()?;
        Ok(Node::CallClosure { target, args })
    }

    fn resolve_lambda(
        &mut self,
        params: &[ir::Param],
        ret: Option<&ir::TypeRef>,
        captures: &[String],
        body: &[ir::Stmt],
    ) -> RunResult<Node> {
        // Capture snapshots are plain name reads in the enclosing frame,
        // evaluated when the lambda expression itself is evaluated.
        let capture_exprs: Vec<Node> = captures.iter().map(|capture| self.resolve_name(capture)).collect();
        let name = self.shared.next_lambda_name();
        let def = build_function_def(
            &name,
            params,
            captures,
            body,
            self.effects.clone(),
            ret,
            self.shared,
        )?;
        Ok(Node::Lambda(Arc::new(LambdaDef { def, capture_exprs })))
    }
}
