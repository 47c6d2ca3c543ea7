//! Type checker (spec.md §4.3)
//!
//! Walks expressions and statements with an environment stack (local
//! scope -> signal binding -> agent state -> module). Grounded on the
//! teacher's `TypeChecker` (`typechecker.rs`): a struct walking a
//! `Program` with a `HashMap`-based environment — generalized here from
//! row-polymorphic stack effects to a nominal, fully-declared type
//! system (no unification needed, see `types.rs`). Every error is
//! appended to the shared `Diagnostics` sink rather than returned on
//! first failure (spec.md invariant 6); `infer_expr` is reused verbatim
//! by HIR construction so both stages agree on every node's type.

use std::collections::HashMap;

use crate::ast::*;
use crate::builtins::builtin_signature;
use crate::errors::{Diagnostics, ErrorCode, Location};
use crate::symbols::SymbolTable;
use crate::types::Type;

const STAGE: u8 = 4;

pub struct TypeChecker<'a> {
    pub symbols: &'a SymbolTable,
    locals: Vec<HashMap<String, Type>>,
    /// `(binding name, frequency name)` while checking a signal rule body.
    binding: Option<(String, String)>,
    current_hyphal: Option<String>,
    loop_depth: usize,
}

impl<'a> TypeChecker<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        TypeChecker {
            symbols,
            locals: vec![HashMap::new()],
            binding: None,
            current_hyphal: None,
            loop_depth: 0,
        }
    }

    fn push_scope(&mut self) {
        self.locals.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.locals.pop();
    }

    fn declare_local(&mut self, name: &str, ty: Type) {
        self.locals.last_mut().unwrap().insert(name.to_string(), ty);
    }

    fn lookup_local(&self, name: &str) -> Option<Type> {
        self.locals.iter().rev().find_map(|scope| scope.get(name).cloned())
    }

    /// Re-entry points used by HIR construction, which drives the same
    /// checker across a whole rule body after the diagnostic pass.
    pub fn declare_local_pub(&mut self, name: &str, ty: Type) {
        self.declare_local(name, ty);
    }

    /// Re-entry point used by HIR construction to scope `StateField`
    /// resolution to the hyphal type currently being lowered.
    pub fn set_current_hyphal(&mut self, name: &str) {
        self.current_hyphal = Some(name.to_string());
    }

    pub fn current_hyphal_name(&self) -> Option<&str> {
        self.current_hyphal.as_deref()
    }

    pub fn declare_params(&mut self, params: &[Field]) {
        for p in params {
            let ty = self.symbols.types.resolve(&p.ty);
            self.declare_local(&p.name, ty);
        }
    }

    pub fn bind_signal(&mut self, binding: &str, frequency: &str) {
        self.binding = Some((binding.to_string(), frequency.to_string()));
    }

    pub fn unbind_signal(&mut self) {
        self.binding = None;
    }
}

pub fn check_network(net: &Network, symbols: &SymbolTable, diags: &mut Diagnostics) {
    let mut checker = TypeChecker::new(symbols);
    for hyphal in &net.hyphae {
        checker.current_hyphal = Some(hyphal.name.clone());
        for rule in &hyphal.rules {
            checker.check_rule(hyphal, rule, diags);
        }
    }
}

impl<'a> TypeChecker<'a> {
    fn check_rule(&mut self, hyphal: &HyphalDef, rule: &RuleDef, diags: &mut Diagnostics) {
        self.push_scope();
        match rule {
            RuleDef::Signal {
                frequency,
                binding,
                guard,
                body,
                span,
            } => {
                if !self.symbols.frequency_ids.contains_key(frequency) {
                    diags.push(
                        ErrorCode::Semantic,
                        STAGE,
                        loc(span),
                        format!("signal rule references unknown frequency '{frequency}'"),
                    );
                }
                self.binding = Some((binding.clone(), frequency.clone()));
                if let Some(guard) = guard {
                    if let Ok(t) = self.infer_expr(guard, diags) {
                        if t != Type::Bool {
                            diags.push(ErrorCode::Semantic, STAGE, loc(span), "guard expression must be boolean");
                        }
                    }
                }
                self.check_stmts(body, diags, span);
                self.binding = None;
            }
            RuleDef::Rest { body, span } => self.check_stmts(body, diags, span),
            RuleDef::Cycle { body, span, .. } => self.check_stmts(body, diags, span),
            RuleDef::Helper { params, body, span, .. } => {
                for p in params {
                    let ty = self.symbols.types.resolve(&p.ty);
                    self.declare_local(&p.name, ty);
                }
                self.check_stmts(body, diags, span);
            }
        }
        self.pop_scope();
        let _ = hyphal;
    }

    fn check_stmts(&mut self, body: &[Stmt], diags: &mut Diagnostics, span: &Span) {
        self.push_scope();
        for stmt in body {
            self.check_stmt(stmt, diags, span);
        }
        self.pop_scope();
    }

    fn check_stmt(&mut self, stmt: &Stmt, diags: &mut Diagnostics, span: &Span) {
        match stmt {
            Stmt::Let { name, ty, value } => {
                let inferred = self.infer_expr(value, diags).ok();
                let declared = ty.as_ref().map(|t| self.symbols.types.resolve(t));
                let final_ty = declared.or(inferred).unwrap_or(Type::I64);
                self.declare_local(name, final_ty);
            }
            Stmt::Assign { target, value } => {
                let _ = self.infer_expr(target, diags);
                let _ = self.infer_expr(value, diags);
            }
            Stmt::Expr(e) => {
                let _ = self.infer_expr(e, diags);
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if let Ok(t) = self.infer_expr(cond, diags) {
                    if t != Type::Bool {
                        diags.push(ErrorCode::Semantic, STAGE, loc(span), "'if' condition must be boolean");
                    }
                }
                self.check_stmts(then_branch, diags, span);
                if let Some(else_b) = else_branch {
                    self.check_stmts(else_b, diags, span);
                }
            }
            Stmt::While { cond, body } => {
                if let Ok(t) = self.infer_expr(cond, diags) {
                    if t != Type::Bool {
                        diags.push(ErrorCode::Semantic, STAGE, loc(span), "'while' condition must be boolean");
                    }
                }
                self.loop_depth += 1;
                self.check_stmts(body, diags, span);
                self.loop_depth -= 1;
            }
            Stmt::ForRange { var, start, end, body } => {
                let _ = self.infer_expr(start, diags);
                let _ = self.infer_expr(end, diags);
                self.push_scope();
                self.declare_local(var, Type::I64);
                self.loop_depth += 1;
                for s in body {
                    self.check_stmt(s, diags, span);
                }
                self.loop_depth -= 1;
                self.pop_scope();
            }
            Stmt::ForIn { var, collection, body } => {
                let elem_ty = match self.infer_expr(collection, diags) {
                    Ok(Type::Vec(inner)) => *inner,
                    _ => Type::I64,
                };
                self.push_scope();
                self.declare_local(var, elem_ty);
                self.loop_depth += 1;
                for s in body {
                    self.check_stmt(s, diags, span);
                }
                self.loop_depth -= 1;
                self.pop_scope();
            }
            Stmt::ForKv {
                key,
                value,
                collection,
                body,
            } => {
                let (k_ty, v_ty) = match self.infer_expr(collection, diags) {
                    Ok(Type::Map(k, v)) => (*k, *v),
                    _ => (Type::String, Type::I64),
                };
                self.push_scope();
                self.declare_local(key, k_ty);
                self.declare_local(value, v_ty);
                self.loop_depth += 1;
                for s in body {
                    self.check_stmt(s, diags, span);
                }
                self.loop_depth -= 1;
                self.pop_scope();
            }
            Stmt::Emit { frequency, fields, span } => self.check_emit(frequency, fields, span, diags),
            Stmt::Match { scrutinee, arms, span } => self.check_match(scrutinee, arms, span, diags),
            Stmt::Return(value) => {
                if let Some(v) = value {
                    let _ = self.infer_expr(v, diags);
                }
            }
            Stmt::Break => {
                if self.loop_depth == 0 {
                    diags.push(ErrorCode::Semantic, STAGE, loc(span), "'break' outside of a loop");
                }
            }
            Stmt::Continue => {
                if self.loop_depth == 0 {
                    diags.push(ErrorCode::Semantic, STAGE, loc(span), "'continue' outside of a loop");
                }
            }
            Stmt::Report(e) => {
                let _ = self.infer_expr(e, diags);
            }
        }
    }

    fn check_emit(
        &mut self,
        frequency: &str,
        fields: &[(String, Expr)],
        span: &Span,
        diags: &mut Diagnostics,
    ) {
        let Some(freq_def) = self.symbols.frequencies.iter().find(|f| f.name == frequency) else {
            diags.push(
                ErrorCode::Semantic,
                STAGE,
                loc(span),
                format!("emit of unknown frequency '{frequency}'"),
            );
            return;
        };
        let declared: Vec<&str> = freq_def.fields.iter().map(|f| f.name.as_str()).collect();
        let mut seen: Vec<&str> = Vec::new();
        for (name, value) in fields {
            let _ = self.infer_expr(value, diags);
            if !declared.contains(&name.as_str()) {
                diags.push(
                    ErrorCode::Semantic,
                    STAGE,
                    loc(span),
                    format!("emit of '{frequency}' has extra field '{name}'"),
                );
                continue;
            }
            if seen.contains(&name.as_str()) {
                diags.push(
                    ErrorCode::Semantic,
                    STAGE,
                    loc(span),
                    format!("emit of '{frequency}' sets field '{name}' more than once"),
                );
                continue;
            }
            seen.push(name.as_str());
        }
        for d in &declared {
            if !seen.contains(d) {
                diags.push(
                    ErrorCode::Semantic,
                    STAGE,
                    loc(span),
                    format!("emit of '{frequency}' is missing field '{d}'"),
                );
            }
        }
    }

    fn check_match(&mut self, scrutinee: &Expr, arms: &[MatchArm], span: &Span, diags: &mut Diagnostics) {
        let scrutinee_ty = self.infer_expr(scrutinee, diags).ok();
        let mut has_wildcard = false;
        let mut covered = Vec::new();
        for arm in arms {
            self.push_scope();
            for pat in &arm.patterns {
                match pat {
                    Pattern::Wildcard => has_wildcard = true,
                    Pattern::EnumVariant { variant, binding } => {
                        covered.push(variant.clone());
                        if let Some(Type::Enum(enum_name)) = &scrutinee_ty {
                            if let Some(enum_def) = self.symbols.types.enums.get(enum_name) {
                                if enum_def.ordinal(variant).is_none() {
                                    diags.push(
                                        ErrorCode::Semantic,
                                        STAGE,
                                        loc(span),
                                        format!("'{variant}' is not a variant of enum '{enum_name}'"),
                                    );
                                }
                                if let Some(b) = binding {
                                    let payload_ty = enum_def.payload_type(variant).cloned().unwrap_or(Type::I64);
                                    self.declare_local(b, payload_ty);
                                }
                            }
                        }
                    }
                    Pattern::Literal(e) => {
                        let _ = self.infer_expr(e, diags);
                    }
                }
            }
            for s in &arm.body {
                self.check_stmt(s, diags, span);
            }
            self.pop_scope();
        }
        if !has_wildcard {
            match &scrutinee_ty {
                Some(Type::Enum(enum_name)) => {
                    if let Some(enum_def) = self.symbols.types.enums.get(enum_name) {
                        let all_covered = enum_def.variants.iter().all(|(v, _)| covered.contains(v));
                        if !all_covered {
                            diags.push(
                                ErrorCode::Semantic,
                                STAGE,
                                loc(span),
                                format!("match on '{enum_name}' is not exhaustive (add a wildcard arm `_ => ...`)"),
                            );
                        }
                    }
                }
                Some(_) => {
                    diags.push(
                        ErrorCode::Semantic,
                        STAGE,
                        loc(span),
                        "match is not exhaustive (add a wildcard arm `_ => ...`)",
                    );
                }
                None => {}
            }
        }
    }

    /// Infer (and validate) the type of an expression.
    pub fn infer_expr(&mut self, expr: &Expr, diags: &mut Diagnostics) -> Result<Type, ()> {
        match expr {
            Expr::IntLit(_) => Ok(Type::I64),
            Expr::FloatLit(_) => Ok(Type::I64),
            Expr::BoolLit(_) => Ok(Type::Bool),
            Expr::StrLit(_) => Ok(Type::String),
            Expr::Ident(name) => match self.lookup_local(name) {
                Some(t) => Ok(t),
                None => {
                    diags.push(
                        ErrorCode::Semantic,
                        STAGE,
                        Location::synthetic(),
                        format!("undefined symbol '{name}'"),
                    );
                    Err(())
                }
            },
            Expr::StateField(field) => {
                let Some(hyphal) = self.current_hyphal.clone() else {
                    return Err(());
                };
                let Some(hdef) = self.symbols.hyphal_types.get(&hyphal) else {
                    return Err(());
                };
                match hdef.state.iter().find(|f| &f.name == field) {
                    Some(f) => Ok(self.symbols.types.resolve(&f.ty)),
                    None => {
                        diags.push(
                            ErrorCode::Semantic,
                            STAGE,
                            Location::synthetic(),
                            format!("'{hyphal}' has no state field '{field}'"),
                        );
                        Err(())
                    }
                }
            }
            Expr::BindingField(base, field) => {
                let Some((bind_name, freq)) = self.binding.clone() else {
                    diags.push(
                        ErrorCode::Semantic,
                        STAGE,
                        Location::synthetic(),
                        format!("'{base}' is not a signal binding in this context"),
                    );
                    return Err(());
                };
                if base != &bind_name {
                    diags.push(
                        ErrorCode::Semantic,
                        STAGE,
                        Location::synthetic(),
                        format!("undefined symbol '{base}'"),
                    );
                    return Err(());
                }
                let Some(freq_def) = self.symbols.frequencies.iter().find(|f| f.name == freq) else {
                    return Err(());
                };
                match freq_def.fields.iter().find(|f| &f.name == field) {
                    Some(f) => Ok(self.symbols.types.resolve(&f.ty)),
                    None => {
                        diags.push(
                            ErrorCode::Semantic,
                            STAGE,
                            Location::synthetic(),
                            format!("frequency '{freq}' has no field '{field}'"),
                        );
                        Err(())
                    }
                }
            }
            Expr::FieldAccess(base, field) => {
                let base_ty = self.infer_expr(base, diags)?;
                match base_ty {
                    Type::Struct(name) => {
                        let Some(sdef) = self.symbols.types.structs.get(&name) else {
                            return Err(());
                        };
                        sdef.field_type(field).cloned().ok_or(())
                    }
                    _ => Err(()),
                }
            }
            Expr::Index(base, idx) => {
                let base_ty = self.infer_expr(base, diags)?;
                let _ = self.infer_expr(idx, diags);
                match base_ty {
                    Type::Vec(inner) => Ok(*inner),
                    Type::Map(_, v) => Ok(*v),
                    _ => Err(()),
                }
            }
            Expr::Call(name, args) => {
                for a in args {
                    let _ = self.infer_expr(a, diags);
                }
                if let Some(sig) = builtin_signature(name) {
                    return Ok(sig.ret);
                }
                if let Some(extra) = self.symbols.extra_builtin(name) {
                    return Ok(extra.ret.clone());
                }
                if let Some(hyphal) = self.current_hyphal.clone() {
                    if let Some(hdef) = self.symbols.hyphal_types.get(&hyphal) {
                        if let Some(RuleDef::Helper { ret, .. }) = hdef
                            .rules
                            .iter()
                            .find(|r| matches!(r, RuleDef::Helper { name: n, .. } if n == name))
                        {
                            return Ok(ret.as_ref().map(|t| self.symbols.types.resolve(t)).unwrap_or(Type::Unit));
                        }
                    }
                }
                diags.push(
                    ErrorCode::Semantic,
                    STAGE,
                    Location::synthetic(),
                    format!("call to undefined rule or built-in '{name}'"),
                );
                Err(())
            }
            Expr::MethodCall(base, _name, args) => {
                let _ = self.infer_expr(base, diags);
                for a in args {
                    let _ = self.infer_expr(a, diags);
                }
                Ok(Type::I64)
            }
            Expr::Unary(op, inner) => {
                let t = self.infer_expr(inner, diags)?;
                match op {
                    UnaryOp::Neg => Ok(t),
                    UnaryOp::Not => {
                        if t != Type::Bool {
                            diags.push(
                                ErrorCode::Semantic,
                                STAGE,
                                Location::synthetic(),
                                "'!' requires a boolean operand",
                            );
                        }
                        Ok(Type::Bool)
                    }
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let lt = self.infer_expr(lhs, diags);
                let rt = self.infer_expr(rhs, diags);
                let (lt, rt) = match (lt, rt) {
                    (Ok(l), Ok(r)) => (l, r),
                    _ => return Err(()),
                };
                match op {
                    BinOp::Add if lt == Type::String || rt == Type::String => Ok(Type::String),
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                        if !lt.is_numeric() || !rt.is_numeric() {
                            diags.push(
                                ErrorCode::Semantic,
                                STAGE,
                                Location::synthetic(),
                                "arithmetic operator requires numeric operands",
                            );
                        }
                        Ok(if lt == Type::I64 || rt == Type::I64 { Type::I64 } else { Type::U32 })
                    }
                    BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => Ok(Type::Bool),
                    BinOp::And | BinOp::Or => {
                        if lt != Type::Bool || rt != Type::Bool {
                            diags.push(
                                ErrorCode::Semantic,
                                STAGE,
                                Location::synthetic(),
                                "logical operator requires boolean operands",
                            );
                        }
                        Ok(Type::Bool)
                    }
                }
            }
            Expr::Range(_, _) => Ok(Type::I64),
            Expr::Tuple(items) => {
                for i in items {
                    let _ = self.infer_expr(i, diags);
                }
                Ok(Type::I64)
            }
            Expr::StructLit(name, fields) => {
                for (_, v) in fields {
                    let _ = self.infer_expr(v, diags);
                }
                if self.symbols.types.structs.contains_key(name) {
                    Ok(Type::Struct(name.clone()))
                } else {
                    diags.push(
                        ErrorCode::Semantic,
                        STAGE,
                        Location::synthetic(),
                        format!("undefined struct type '{name}'"),
                    );
                    Err(())
                }
            }
            Expr::EnumLit(name, variant, data) => {
                if let Some(d) = data {
                    let _ = self.infer_expr(d, diags);
                }
                if let Some(enum_def) = self.symbols.types.enums.get(name) {
                    if enum_def.ordinal(variant).is_none() {
                        diags.push(
                            ErrorCode::Semantic,
                            STAGE,
                            Location::synthetic(),
                            format!("'{variant}' is not a variant of enum '{name}'"),
                        );
                    }
                    Ok(Type::Enum(name.clone()))
                } else {
                    diags.push(
                        ErrorCode::Semantic,
                        STAGE,
                        Location::synthetic(),
                        format!("undefined enum type '{name}'"),
                    );
                    Err(())
                }
            }
        }
    }
}

fn loc(span: &Span) -> Location {
    Location::new(span.file.clone(), span.line, span.col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Diagnostics;
    use crate::parser::Parser;
    use crate::symbols::build_symbol_table;
    use std::path::Path;

    fn check(src: &str) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let mut parser = Parser::new(src, Path::new("<test>"), &mut diags);
        let net = parser.parse(&mut diags).expect("parse failed");
        let symbols = build_symbol_table(&net, &mut diags);
        check_network(&net, &symbols, &mut diags);
        diags
    }

    #[test]
    fn emit_missing_field_is_an_error() {
        let diags = check(
            r#"
            network N {
                frequencies { greeting { name: string, loud: bool } }
                hyphae {
                    greeter { on rest { emit greeting { name: "hi" }; } }
                }
                topology { spawn greeter as g1 }
            }
            "#,
        );
        assert!(diags.iter().any(|d| d.message.contains("missing field")));
    }

    #[test]
    fn emit_extra_field_is_an_error() {
        let diags = check(
            r#"
            network N {
                frequencies { greeting { name: string } }
                hyphae {
                    greeter { on rest { emit greeting { name: "hi", extra: "x" }; } }
                }
                topology { spawn greeter as g1 }
            }
            "#,
        );
        assert!(diags.iter().any(|d| d.message.contains("extra field")));
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let diags = check(
            r#"
            network N {
                hyphae { a { on rest { break; } } }
                topology { spawn a as a1 }
            }
            "#,
        );
        assert!(diags.iter().any(|d| d.message.contains("'break'")));
    }

    #[test]
    fn non_exhaustive_enum_match_is_an_error() {
        let diags = check(
            r#"
            network N {
                types { enum Msg { Hello(string), Ping, Pong } }
                frequencies { in_msg { m: Msg } }
                hyphae {
                    a {
                        on signal(in_msg, s) {
                            match s.m {
                                Hello(x) => { report x; };
                            }
                        }
                    }
                }
                topology { spawn a as a1 }
            }
            "#,
        );
        assert!(diags.iter().any(|d| d.message.contains("not exhaustive")));
    }
}
