//! Serde model of the Core IR consumed by the loader.
//!
//! The core executes already-lowered IR arriving as structured data; this
//! module mirrors that wire shape one-to-one. Declaration, statement,
//! expression, type, and pattern nodes are internally tagged by `kind`.
//! Unknown fields are ignored (serde's default); missing required fields
//! surface as `LoadError` from [`Module::from_json`].

use serde::Deserialize;

use crate::error::{RunError, RunResult};

/// A Core IR module: a name plus an ordered list of declarations.
#[derive(Debug, Clone, Deserialize)]
pub struct Module {
    pub name: String,
    pub decls: Vec<Decl>,
}

impl Module {
    /// Deserializes a module from its JSON form.
    pub fn from_json(src: &str) -> RunResult<Self> {
        serde_json::from_str(src).map_err(|err| RunError::load(format!("malformed module: {err}")))
    }
}

/// A top-level declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Decl {
    Func(FuncDecl),
    Data(DataDecl),
    Enum(EnumDecl),
}

/// A function declaration. Several declarations may share a name; the loader
/// selects one canonical overload per name.
#[derive(Debug, Clone, Deserialize)]
pub struct FuncDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    pub ret: TypeRef,
    #[serde(default)]
    pub effects: Vec<String>,
    pub body: Vec<Stmt>,
}

/// A typed parameter or record field.
#[derive(Debug, Clone, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
}

/// A record type declaration with ordered fields.
#[derive(Debug, Clone, Deserialize)]
pub struct DataDecl {
    pub name: String,
    pub fields: Vec<Param>,
}

/// An enum declaration: a name and its variant names.
#[derive(Debug, Clone, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<String>,
}

/// A statement inside a block.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Stmt {
    Return {
        expr: Expr,
    },
    Let {
        name: String,
        expr: Expr,
    },
    Set {
        name: String,
        expr: Expr,
    },
    If {
        cond: Expr,
        #[serde(default, rename = "thenBlock")]
        then_block: Vec<Stmt>,
        #[serde(default, rename = "elseBlock")]
        else_block: Vec<Stmt>,
    },
    Match {
        expr: Expr,
        cases: Vec<MatchCase>,
    },
    Scope {
        statements: Vec<Stmt>,
    },
    Start {
        name: String,
        expr: Expr,
    },
    Wait {
        names: Vec<String>,
    },
    Workflow {
        steps: Vec<WorkflowStep>,
        #[serde(default)]
        timeout: Option<Timeout>,
    },
}

/// One arm of a `match` statement.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchCase {
    pub pattern: Pattern,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

/// One named step of a `workflow`.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub compensate: Option<Vec<Stmt>>,
    #[serde(default)]
    pub retry: Option<Retry>,
}

/// Workflow-level wall-clock timeout. Zero means unbounded.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Timeout {
    pub milliseconds: u64,
}

/// Per-step retry policy as declared in IR.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retry {
    pub max_attempts: u32,
    /// `"exponential"` or `"linear"`.
    pub strategy: String,
    #[serde(default)]
    pub base_delay_ms: u64,
}

/// An expression.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Expr {
    String {
        value: String,
    },
    Int {
        value: i32,
    },
    Long {
        value: i64,
    },
    Double {
        value: f64,
    },
    Bool {
        value: bool,
    },
    Null,
    Name {
        name: String,
    },
    Call {
        target: Box<Expr>,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Lambda {
        #[serde(default)]
        params: Vec<Param>,
        #[serde(default)]
        ret: Option<TypeRef>,
        #[serde(default)]
        captures: Vec<String>,
        body: Vec<Stmt>,
    },
    Await {
        expr: Box<Expr>,
    },
    Ok {
        expr: Box<Expr>,
    },
    Err {
        expr: Box<Expr>,
    },
    Some {
        expr: Box<Expr>,
    },
    None,
    Construct {
        #[serde(rename = "typeName")]
        type_name: String,
        #[serde(default)]
        fields: Vec<ConstructField>,
    },
}

/// A named field initializer inside a `Construct` expression.
#[derive(Debug, Clone, Deserialize)]
pub struct ConstructField {
    pub name: String,
    pub expr: Expr,
}

/// A type reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum TypeRef {
    TypeName {
        name: String,
    },
    TypeVar {
        name: String,
    },
    TypeApp {
        base: Box<TypeRef>,
        #[serde(default)]
        args: Vec<TypeRef>,
    },
    FuncType {
        #[serde(default)]
        params: Vec<TypeRef>,
        ret: Box<TypeRef>,
    },
    Option {
        #[serde(rename = "type")]
        inner: Box<TypeRef>,
    },
    Maybe {
        #[serde(rename = "type")]
        inner: Box<TypeRef>,
    },
    Result {
        ok: Box<TypeRef>,
        err: Box<TypeRef>,
    },
    ListT {
        element: Box<TypeRef>,
    },
    MapT {
        key: Box<TypeRef>,
        value: Box<TypeRef>,
    },
    PiiType {
        #[serde(rename = "baseType")]
        base: Box<TypeRef>,
        category: String,
        sensitivity: String,
    },
}

/// A pattern inside a `match` case.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum Pattern {
    /// Matches anything, binds nothing.
    Wildcard,
    /// Matches anything, binds the value to `name`.
    Name { name: String },
    /// Matches integers by equality (Int and Long values alike).
    Int { value: i64 },
    Null,
    /// Matches records by type name and the Ok/Err/Some/None shapes.
    Constructor {
        name: String,
        #[serde(default)]
        fields: Vec<PatternField>,
    },
}

/// A field sub-pattern: named when `name` is present, positional otherwise.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternField {
    #[serde(default)]
    pub name: Option<String>,
    pub pattern: Pattern,
}
