//! Recursive-descent parser: token stream -> `ast::Network`
//!
//! Mirrors the teacher's `Parser` shape (a cursor over a token vector,
//! `Result<T, String>`-returning helpers) generalized to the source
//! language's curly-brace grammar. Errors carry line/column (spec.md
//! §4.1) and parsing does not attempt recovery beyond skipping to the
//! next top-level declaration, also per spec.md §4.1.

use std::path::{Path, PathBuf};

use crate::ast::*;
use crate::errors::{Diagnostics, ErrorCode, Location};
use crate::lexer::{Lexer, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: PathBuf,
}

type PResult<T> = Result<T, String>;

impl Parser {
    pub fn new(source: &str, file: &Path, diags: &mut Diagnostics) -> Self {
        let lexer = Lexer::new(source, file);
        let tokens = lexer.tokenize(diags);
        Parser {
            tokens,
            pos: 0,
            file: file.to_path_buf(),
        }
    }

    fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn loc(&self) -> Location {
        let t = self.cur();
        Location::new(self.file.clone(), t.line, t.col)
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.cur().kind == kind
    }

    fn bump(&mut self) -> Token {
        let t = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.cur().kind == kind {
            Ok(self.bump())
        } else {
            Err(format!("expected {:?}, found {:?}", kind, self.cur().kind))
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match &self.cur().kind {
            TokenKind::Ident(s) => {
                let s = s.clone();
                self.bump();
                Ok(s)
            }
            other => Err(format!("expected identifier, found {other:?}")),
        }
    }

    /// Parse the single `network NAME { ... }` declaration in this file,
    /// collecting diagnostics rather than stopping at the first error.
    pub fn parse(&mut self, diags: &mut Diagnostics) -> Option<Network> {
        match self.parse_network() {
            Ok(net) => Some(net),
            Err(msg) => {
                diags.push(ErrorCode::Parse, 2, self.loc(), msg);
                None
            }
        }
    }

    fn parse_network(&mut self) -> PResult<Network> {
        self.expect(TokenKind::Network)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;

        let mut types = Vec::new();
        let mut frequencies = Vec::new();
        let mut hyphae = Vec::new();
        let mut topology = None;

        while !self.at(&TokenKind::RBrace) {
            match self.cur().kind.clone() {
                TokenKind::Types => {
                    self.bump();
                    types.extend(self.parse_types_block()?);
                }
                TokenKind::Frequencies => {
                    self.bump();
                    frequencies.extend(self.parse_frequencies_block()?);
                }
                TokenKind::Hyphae => {
                    self.bump();
                    hyphae.extend(self.parse_hyphae_block()?);
                }
                TokenKind::Topology => {
                    self.bump();
                    topology = Some(self.parse_topology_block()?);
                }
                other => return Err(format!("unexpected top-level token {other:?}")),
            }
        }
        self.expect(TokenKind::RBrace)?;

        Ok(Network {
            name,
            types,
            frequencies,
            hyphae,
            topology: topology.unwrap_or(Topology {
                spawns: Vec::new(),
                fruiting_bodies: Vec::new(),
                sockets: Vec::new(),
            }),
        })
    }

    fn parse_types_block(&mut self) -> PResult<Vec<TypeDef>> {
        self.expect(TokenKind::LBrace)?;
        let mut defs = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            match self.cur().kind {
                TokenKind::Struct => defs.push(TypeDef::Struct(self.parse_struct_def()?)),
                TokenKind::Enum => defs.push(TypeDef::Enum(self.parse_enum_def()?)),
                _ => return Err(format!("expected struct or enum, found {:?}", self.cur().kind)),
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(defs)
    }

    fn parse_struct_def(&mut self) -> PResult<StructDef> {
        let span = self.span_here();
        self.expect(TokenKind::Struct)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;
        let fields = self.parse_field_list()?;
        self.expect(TokenKind::RBrace)?;
        Ok(StructDef { name, fields, span })
    }

    fn parse_enum_def(&mut self) -> PResult<EnumDef> {
        let span = self.span_here();
        self.expect(TokenKind::Enum)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;
        let mut variants = Vec::new();
        loop {
            if self.at(&TokenKind::RBrace) {
                break;
            }
            let vname = self.expect_ident()?;
            let data = if self.at(&TokenKind::LParen) {
                self.bump();
                let ty = self.parse_type_expr()?;
                self.expect(TokenKind::RParen)?;
                Some(ty)
            } else {
                None
            };
            variants.push(EnumVariant { name: vname, data });
            if self.at(&TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(EnumDef { name, variants, span })
    }

    fn parse_frequencies_block(&mut self) -> PResult<Vec<FrequencyDef>> {
        self.expect(TokenKind::LBrace)?;
        let mut defs = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let span = self.span_here();
            let name = self.expect_ident()?;
            self.expect(TokenKind::LBrace)?;
            let fields = self.parse_field_list()?;
            self.expect(TokenKind::RBrace)?;
            defs.push(FrequencyDef { name, fields, span });
        }
        self.expect(TokenKind::RBrace)?;
        Ok(defs)
    }

    fn parse_field_list(&mut self) -> PResult<Vec<Field>> {
        let mut fields = Vec::new();
        loop {
            if self.at(&TokenKind::RBrace) {
                break;
            }
            let name = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_expr()?;
            fields.push(Field { name, ty });
            if self.at(&TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        Ok(fields)
    }

    fn parse_type_expr(&mut self) -> PResult<TypeExpr> {
        let name = self.expect_ident()?;
        let ty = match name.as_str() {
            "i64" => TypeExpr::I64,
            "u32" => TypeExpr::U32,
            "bool" => TypeExpr::Bool,
            "string" => TypeExpr::String,
            "vec" => {
                self.expect(TokenKind::Lt)?;
                let inner = self.parse_type_expr()?;
                self.expect(TokenKind::Gt)?;
                TypeExpr::Vec(Box::new(inner))
            }
            "map" => {
                self.expect(TokenKind::Lt)?;
                let k = self.parse_type_expr()?;
                self.expect(TokenKind::Comma)?;
                let v = self.parse_type_expr()?;
                self.expect(TokenKind::Gt)?;
                TypeExpr::Map(Box::new(k), Box::new(v))
            }
            other => TypeExpr::Named(other.to_string()),
        };
        Ok(ty)
    }

    fn parse_hyphae_block(&mut self) -> PResult<Vec<HyphalDef>> {
        self.expect(TokenKind::LBrace)?;
        let mut defs = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            defs.push(self.parse_hyphal_def()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(defs)
    }

    fn parse_hyphal_def(&mut self) -> PResult<HyphalDef> {
        let span = self.span_here();
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;
        let mut state = Vec::new();
        let mut rules = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            match self.cur().kind {
                TokenKind::State => {
                    self.bump();
                    self.expect(TokenKind::LBrace)?;
                    state.extend(self.parse_state_fields()?);
                    self.expect(TokenKind::RBrace)?;
                }
                TokenKind::On => rules.push(self.parse_on_rule()?),
                TokenKind::Rule => rules.push(self.parse_helper_rule()?),
                ref other => return Err(format!("unexpected token in hyphal body: {other:?}")),
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(HyphalDef { name, state, rules, span })
    }

    fn parse_state_fields(&mut self) -> PResult<Vec<StateField>> {
        let mut fields = Vec::new();
        loop {
            if self.at(&TokenKind::RBrace) {
                break;
            }
            let name = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_expr()?;
            let init = if self.at(&TokenKind::Eq) {
                self.bump();
                Some(self.parse_expr()?)
            } else {
                None
            };
            fields.push(StateField { name, ty, init });
            if self.at(&TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        Ok(fields)
    }

    fn parse_on_rule(&mut self) -> PResult<RuleDef> {
        let span = self.span_here();
        self.expect(TokenKind::On)?;
        match self.cur().kind.clone() {
            TokenKind::Signal => {
                self.bump();
                self.expect(TokenKind::LParen)?;
                let frequency = self.expect_ident()?;
                self.expect(TokenKind::Comma)?;
                let binding = self.expect_ident()?;
                self.expect(TokenKind::RParen)?;
                let guard = if self.at(&TokenKind::Where) {
                    self.bump();
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                let body = self.parse_block()?;
                Ok(RuleDef::Signal {
                    frequency,
                    binding,
                    guard,
                    body,
                    span,
                })
            }
            TokenKind::Rest => {
                self.bump();
                let body = self.parse_block()?;
                Ok(RuleDef::Rest { body, span })
            }
            TokenKind::Cycle => {
                self.bump();
                self.expect(TokenKind::LParen)?;
                let name = self.expect_ident()?;
                self.expect(TokenKind::RParen)?;
                let body = self.parse_block()?;
                Ok(RuleDef::Cycle { name, body, span })
            }
            other => Err(format!("expected 'signal', 'rest' or 'cycle' after 'on', found {other:?}")),
        }
    }

    fn parse_helper_rule(&mut self) -> PResult<RuleDef> {
        let span = self.span_here();
        self.expect(TokenKind::Rule)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let pname = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_expr()?;
            params.push(Field { name: pname, ty });
            if self.at(&TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let ret = if self.at(&TokenKind::Arrow) {
            self.bump();
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(RuleDef::Helper {
            name,
            params,
            ret,
            body,
            span,
        })
    }

    fn parse_topology_block(&mut self) -> PResult<Topology> {
        self.expect(TokenKind::LBrace)?;
        let mut spawns = Vec::new();
        let mut fruiting_bodies = Vec::new();
        let mut sockets = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let span = self.span_here();
            match self.cur().kind {
                TokenKind::Spawn => {
                    self.bump();
                    let hyphal_type = self.expect_ident()?;
                    self.expect(TokenKind::As)?;
                    let instance = self.expect_ident()?;
                    spawns.push(Spawn {
                        hyphal_type,
                        instance,
                        span,
                    });
                }
                TokenKind::FruitingBody => {
                    self.bump();
                    let name = self.expect_ident()?;
                    fruiting_bodies.push(FruitingBody { name, span });
                }
                TokenKind::Socket => {
                    self.bump();
                    let source = self.expect_ident()?;
                    self.expect(TokenKind::Arrow)?;
                    let destination = self.expect_ident()?;
                    let frequency = if self.at(&TokenKind::Colon) {
                        self.bump();
                        Some(self.expect_ident()?)
                    } else {
                        None
                    };
                    sockets.push(Socket {
                        source,
                        destination,
                        frequency,
                        span,
                    });
                }
                ref other => return Err(format!("unexpected token in topology block: {other:?}")),
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Topology {
            spawns,
            fruiting_bodies,
            sockets,
        })
    }

    // ------------------------------------------------------------ statements

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        match self.cur().kind.clone() {
            TokenKind::Let => {
                self.bump();
                let name = self.expect_ident()?;
                let ty = if self.at(&TokenKind::Colon) {
                    self.bump();
                    Some(self.parse_type_expr()?)
                } else {
                    None
                };
                self.expect(TokenKind::Eq)?;
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Let { name, ty, value })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.bump();
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body })
            }
            TokenKind::For => self.parse_for(),
            TokenKind::Emit => self.parse_emit(),
            TokenKind::Match => self.parse_match(),
            TokenKind::Return => {
                self.bump();
                let value = if self.at(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Return(value))
            }
            TokenKind::Break => {
                self.bump();
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Break)
            }
            TokenKind::Continue => {
                self.bump();
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Continue)
            }
            TokenKind::Report => {
                self.bump();
                let e = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Report(e))
            }
            _ => {
                let expr = self.parse_expr()?;
                if self.at(&TokenKind::Eq) {
                    self.bump();
                    let value = self.parse_expr()?;
                    self.expect(TokenKind::Semi)?;
                    Ok(Stmt::Assign { target: expr, value })
                } else {
                    self.expect(TokenKind::Semi)?;
                    Ok(Stmt::Expr(expr))
                }
            }
        }
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.expect(TokenKind::If)?;
        let cond = self.parse_expr()?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.at(&TokenKind::Else) {
            self.bump();
            if self.at(&TokenKind::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.expect(TokenKind::For)?;
        let first = self.expect_ident()?;
        if self.at(&TokenKind::Comma) {
            // for-kv: for k, v in map { }
            self.bump();
            let value = self.expect_ident()?;
            self.expect(TokenKind::In)?;
            let collection = self.parse_expr()?;
            let body = self.parse_block()?;
            return Ok(Stmt::ForKv {
                key: first,
                value,
                collection,
                body,
            });
        }
        self.expect(TokenKind::In)?;
        let start = self.parse_expr()?;
        if self.at(&TokenKind::DotDot) {
            self.bump();
            let end = self.parse_expr()?;
            let body = self.parse_block()?;
            Ok(Stmt::ForRange {
                var: first,
                start,
                end,
                body,
            })
        } else {
            let body = self.parse_block()?;
            Ok(Stmt::ForIn {
                var: first,
                collection: start,
                body,
            })
        }
    }

    fn parse_emit(&mut self) -> PResult<Stmt> {
        let span = self.span_here();
        self.expect(TokenKind::Emit)?;
        let frequency = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let name = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expr()?;
            fields.push((name, value));
            if self.at(&TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        self.expect(TokenKind::Semi)?;
        Ok(Stmt::Emit { frequency, fields, span })
    }

    fn parse_match(&mut self) -> PResult<Stmt> {
        let span = self.span_here();
        self.expect(TokenKind::Match)?;
        let scrutinee = self.parse_expr()?;
        self.expect(TokenKind::LBrace)?;
        let mut arms = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let mut patterns = vec![self.parse_pattern()?];
            while self.at(&TokenKind::Pipe) {
                self.bump();
                patterns.push(self.parse_pattern()?);
            }
            self.expect(TokenKind::FatArrow)?;
            let body = if self.at(&TokenKind::LBrace) {
                self.parse_block()?
            } else {
                let e = self.parse_expr()?;
                vec![Stmt::Expr(e)]
            };
            if self.at(&TokenKind::Semi) {
                self.bump();
            }
            arms.push(MatchArm { patterns, body });
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Stmt::Match { scrutinee, arms, span })
    }

    fn parse_pattern(&mut self) -> PResult<Pattern> {
        if self.at(&TokenKind::Underscore) {
            self.bump();
            return Ok(Pattern::Wildcard);
        }
        if let TokenKind::Ident(name) = self.cur().kind.clone() {
            self.bump();
            if self.at(&TokenKind::LParen) {
                self.bump();
                let binding = self.expect_ident()?;
                self.expect(TokenKind::RParen)?;
                return Ok(Pattern::EnumVariant {
                    variant: name,
                    binding: Some(binding),
                });
            }
            return Ok(Pattern::EnumVariant {
                variant: name,
                binding: None,
            });
        }
        let e = self.parse_primary()?;
        Ok(Pattern::Literal(e))
    }

    // ------------------------------------------------------------ expressions
    // Precedence climbing, lowest to highest: range, ||, &&, equality,
    // relational, additive, multiplicative, unary, postfix, primary.

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_range()
    }

    fn parse_range(&mut self) -> PResult<Expr> {
        let lhs = self.parse_or()?;
        if self.at(&TokenKind::DotDot) {
            self.bump();
            let rhs = self.parse_or()?;
            return Ok(Expr::Range(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.at(&TokenKind::PipePipe) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.at(&TokenKind::AmpAmp) {
            self.bump();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.cur().kind {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.cur().kind {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.cur().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.cur().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        match self.cur().kind {
            TokenKind::Minus => {
                self.bump();
                let e = self.parse_unary()?;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(e)))
            }
            TokenKind::Bang => {
                self.bump();
                let e = self.parse_unary()?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(e)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.cur().kind {
                TokenKind::Dot => {
                    self.bump();
                    let name = self.expect_ident()?;
                    if self.at(&TokenKind::LParen) {
                        self.bump();
                        let args = self.parse_arg_list()?;
                        self.expect(TokenKind::RParen)?;
                        expr = Expr::MethodCall(Box::new(expr), name, args);
                    } else {
                        expr = match expr {
                            Expr::Ident(ref base) if base == "state" => Expr::StateField(name),
                            Expr::Ident(base) => Expr::BindingField(base, name),
                            other => Expr::FieldAccess(Box::new(other), name),
                        };
                    }
                }
                TokenKind::LBracket => {
                    self.bump();
                    let idx = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_arg_list(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.at(&TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if self.at(&TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        match self.cur().kind.clone() {
            TokenKind::Int(n) => {
                self.bump();
                Ok(Expr::IntLit(n))
            }
            TokenKind::Float(f) => {
                self.bump();
                Ok(Expr::FloatLit(f))
            }
            TokenKind::Bool(b) => {
                self.bump();
                Ok(Expr::BoolLit(b))
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Expr::StrLit(s))
            }
            TokenKind::LParen => {
                self.bump();
                let mut items = vec![self.parse_expr()?];
                let mut is_tuple = false;
                while self.at(&TokenKind::Comma) {
                    is_tuple = true;
                    self.bump();
                    if self.at(&TokenKind::RParen) {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                self.expect(TokenKind::RParen)?;
                if is_tuple {
                    Ok(Expr::Tuple(items))
                } else {
                    Ok(items.remove(0))
                }
            }
            TokenKind::Ident(name) => {
                self.bump();
                if self.at(&TokenKind::LParen) {
                    self.bump();
                    let args = self.parse_arg_list()?;
                    self.expect(TokenKind::RParen)?;
                    return Ok(Expr::Call(name, args));
                }
                if self.at(&TokenKind::ColonColon) {
                    self.bump();
                    let variant = self.expect_ident()?;
                    let data = if self.at(&TokenKind::LParen) {
                        self.bump();
                        let e = self.parse_expr()?;
                        self.expect(TokenKind::RParen)?;
                        Some(Box::new(e))
                    } else {
                        None
                    };
                    return Ok(Expr::EnumLit(name, variant, data));
                }
                if self.at(&TokenKind::LBrace) && self.looks_like_struct_lit() {
                    self.bump();
                    let mut fields = Vec::new();
                    while !self.at(&TokenKind::RBrace) {
                        let fname = self.expect_ident()?;
                        self.expect(TokenKind::Colon)?;
                        let fval = self.parse_expr()?;
                        fields.push((fname, fval));
                        if self.at(&TokenKind::Comma) {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    self.expect(TokenKind::RBrace)?;
                    return Ok(Expr::StructLit(name, fields));
                }
                Ok(Expr::Ident(name))
            }
            other => Err(format!("unexpected token in expression: {other:?}")),
        }
    }

    /// Disambiguates `Name { field: expr }` struct-literal syntax from a
    /// following control-flow block by peeking for a `field:` shape
    /// before committing (match scrutinees and loop headers are always
    /// parsed through `parse_expr`, so a bare `{` after an identifier is
    /// otherwise ambiguous).
    fn looks_like_struct_lit(&self) -> bool {
        matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Ident(_)))
            && matches!(self.tokens.get(self.pos + 2).map(|t| &t.kind), Some(TokenKind::Colon))
    }

    fn span_here(&self) -> Span {
        let t = self.cur();
        Span::new(self.file.clone(), t.line, t.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Network {
        let mut diags = Diagnostics::new();
        let mut parser = Parser::new(src, Path::new("<test>"), &mut diags);
        let net = parser.parse(&mut diags);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags.iter().collect::<Vec<_>>());
        net.expect("parse failed")
    }

    #[test]
    fn parses_minimal_network() {
        let net = parse_ok("network Empty { topology { } }");
        assert_eq!(net.name, "Empty");
    }

    #[test]
    fn parses_frequencies_and_hyphae() {
        let src = r#"
            network Greet {
                frequencies {
                    greeting { name: string }
                    response { message: string }
                }
                hyphae {
                    greeter {
                        on signal(greeting, g) {
                            emit response { message: g.name };
                        }
                    }
                }
                topology {
                    spawn greeter as greeter1
                    fruiting_body input
                    fruiting_body output
                    socket input -> greeter1 : greeting
                    socket greeter1 -> output : response
                }
            }
        "#;
        let net = parse_ok(src);
        assert_eq!(net.frequencies.len(), 2);
        assert_eq!(net.hyphae.len(), 1);
        assert_eq!(net.topology.spawns.len(), 1);
        assert_eq!(net.topology.sockets.len(), 2);
    }

    #[test]
    fn parses_for_range_and_emit() {
        let src = r#"
            network R {
                hyphae {
                    counter {
                        on rest {
                            for i in 0..5 {
                                emit out { n: i };
                            }
                        }
                    }
                }
                topology { spawn counter as c1 }
            }
        "#;
        let net = parse_ok(src);
        let h = &net.hyphae[0];
        match &h.rules[0] {
            RuleDef::Rest { body, .. } => match &body[0] {
                Stmt::ForRange { var, .. } => assert_eq!(var, "i"),
                other => panic!("expected ForRange, got {other:?}"),
            },
            other => panic!("expected Rest rule, got {other:?}"),
        }
    }

    #[test]
    fn reports_parse_error_with_location() {
        let mut diags = Diagnostics::new();
        let mut parser = Parser::new("network { }", Path::new("f.hy"), &mut diags);
        let net = parser.parse(&mut diags);
        assert!(net.is_none());
        assert_eq!(diags.len(), 1);
    }
}
