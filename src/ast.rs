//! Abstract Syntax Tree for the hyphae agent-network language
//!
//! One `network NAME { ... }` block per source file (spec.md §6):
//! `types`, `frequencies`, `hyphae` (agent type definitions) and a
//! `topology` block of spawns, fruiting bodies and sockets.

use std::path::PathBuf;

/// Source location for error reporting, one line or a span, mirroring
/// the teacher's `SourceLocation` but kept 1-indexed to match the
/// `ERROR ... at file:line:col` surface this compiler emits directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub file: PathBuf,
    pub line: usize,
    pub col: usize,
}

impl Span {
    pub fn new(file: PathBuf, line: usize, col: usize) -> Self {
        Span { file, line, col }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub name: String,
    pub types: Vec<TypeDef>,
    pub frequencies: Vec<FrequencyDef>,
    pub hyphae: Vec<HyphalDef>,
    pub topology: Topology,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    Struct(StructDef),
    Enum(EnumDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<Field>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<EnumVariant>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumVariant {
    pub name: String,
    /// `None` for a unit variant (`Ping`); `Some(ty)` for a tagged
    /// one-field variant (`Hello(string)`).
    pub data: Option<TypeExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    I64,
    U32,
    Bool,
    String,
    Named(String),
    Vec(Box<TypeExpr>),
    Map(Box<TypeExpr>, Box<TypeExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyDef {
    pub name: String,
    pub fields: Vec<Field>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HyphalDef {
    pub name: String,
    pub state: Vec<StateField>,
    pub rules: Vec<RuleDef>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateField {
    pub name: String,
    pub ty: TypeExpr,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleDef {
    /// `on signal(FREQ, BIND) [where GUARD] { BODY }`
    Signal {
        frequency: String,
        binding: String,
        guard: Option<Expr>,
        body: Vec<Stmt>,
        span: Span,
    },
    /// `on rest { BODY }`, run once at startup.
    Rest { body: Vec<Stmt>, span: Span },
    /// `on cycle(NAME) { BODY }`, a timer handler.
    Cycle {
        name: String,
        body: Vec<Stmt>,
        span: Span,
    },
    /// `rule NAME(params) -> T { BODY }`, a named helper callable from
    /// other rules in the same agent.
    Helper {
        name: String,
        params: Vec<Field>,
        ret: Option<TypeExpr>,
        body: Vec<Stmt>,
        span: Span,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub spawns: Vec<Spawn>,
    pub fruiting_bodies: Vec<FruitingBody>,
    pub sockets: Vec<Socket>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spawn {
    pub hyphal_type: String,
    pub instance: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FruitingBody {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Socket {
    pub source: String,
    pub destination: String,
    /// `None` for a wildcard socket (all frequencies).
    pub frequency: Option<String>,
    pub span: Span,
}

// ---------------------------------------------------------------- statements

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: String,
        ty: Option<TypeExpr>,
        value: Expr,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    ForRange {
        var: String,
        start: Expr,
        end: Expr,
        body: Vec<Stmt>,
    },
    ForIn {
        var: String,
        collection: Expr,
        body: Vec<Stmt>,
    },
    ForKv {
        key: String,
        value: String,
        collection: Expr,
        body: Vec<Stmt>,
    },
    Emit {
        frequency: String,
        fields: Vec<(String, Expr)>,
        span: Span,
    },
    Match {
        scrutinee: Expr,
        arms: Vec<MatchArm>,
        span: Span,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Report(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub patterns: Vec<Pattern>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Wildcard,
    /// `Variant` or `Variant(binding)`.
    EnumVariant { variant: String, binding: Option<String> },
    Literal(Expr),
}

// ---------------------------------------------------------------- expressions

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    StrLit(String),
    Ident(String),
    /// `state.F`
    StateField(String),
    /// `BIND.F` — signal binding field access.
    BindingField(String, String),
    /// general `E.F` for struct field access / method-like chains.
    FieldAccess(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Range(Box<Expr>, Box<Expr>),
    Tuple(Vec<Expr>),
    StructLit(String, Vec<(String, Expr)>),
    EnumLit(String, String, Option<Box<Expr>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl Network {
    pub fn find_frequency(&self, name: &str) -> Option<&FrequencyDef> {
        self.frequencies.iter().find(|f| f.name == name)
    }

    pub fn find_hyphal(&self, name: &str) -> Option<&HyphalDef> {
        self.hyphae.iter().find(|h| h.name == name)
    }
}
