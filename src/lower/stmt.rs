//! Statement Compiler (spec.md §4.6)

use crate::errors::Diagnostics;
use crate::hir::{HirExpr, HirExprKind, HirMatchArm, HirRule, HirStmt};
use crate::lir::{LirInstr, Operand};
use crate::types::Type;

use super::expr::{lower_expr, materialize};
use super::LowerCtx;

/// Lower one rule's body into `ctx.func`, wiring up the payload vreg for
/// signal rules and helper parameters for helper rules.
pub fn lower_rule_body(ctx: &mut LowerCtx, rule: &HirRule, diags: &mut Diagnostics) {
    match rule {
        HirRule::Signal { binding, body, frequency, guard, .. } => {
            // Entered via the per-instance dispatch trampoline with
            // r12 = state_ptr, %rsi = payload_ptr (spec.md §4.10).
            let payload = ctx.func.fresh();
            ctx.func.push(LirInstr::LoadArg { dst: payload, index: 1 });
            ctx.payload_vreg = Some(payload);
            ctx.current_frequency = Some(frequency.clone());
            ctx.locals.insert(binding.clone(), payload);
            // spec.md §4.3 invariant 5: a signal rule matches only if its
            // guard (when present) evaluates true; a false guard skips
            // the body without running it.
            match guard {
                Some(guard) => {
                    let cond = lower_expr(ctx, guard);
                    let cond_v = materialize(ctx, cond);
                    let skip = ctx.func.fresh_label("guard_skip");
                    ctx.func.push(LirInstr::JmpIfZero { cond: Operand::Reg(cond_v), label: skip.clone() });
                    lower_block(ctx, body, diags);
                    ctx.func.push(LirInstr::Label(skip));
                }
                None => lower_block(ctx, body, diags),
            }
        }
        HirRule::Rest { body, .. } => lower_block(ctx, body, diags),
        HirRule::Cycle { body, .. } => lower_block(ctx, body, diags),
        HirRule::Helper { params, body, .. } => {
            for (i, p) in params.iter().enumerate() {
                let v = ctx.func.fresh();
                ctx.func.push(LirInstr::LoadArg { dst: v, index: i as u8 });
                ctx.locals.insert(p.name.clone(), v);
            }
            lower_block(ctx, body, diags);
        }
    }
    ctx.func.push(LirInstr::Ret(None));
}

fn lower_block(ctx: &mut LowerCtx, body: &[HirStmt], diags: &mut Diagnostics) {
    for stmt in body {
        lower_stmt(ctx, stmt, diags);
    }
}

fn lower_stmt(ctx: &mut LowerCtx, stmt: &HirStmt, diags: &mut Diagnostics) {
    match stmt {
        HirStmt::Let { name, value, .. } => {
            let op = lower_expr(ctx, value);
            let v = materialize(ctx, op);
            ctx.locals.insert(name.clone(), v);
        }
        HirStmt::Assign { target, value } => lower_assign(ctx, target, value),
        HirStmt::Expr(e) => {
            let _ = lower_expr(ctx, e);
        }
        HirStmt::If {
            cond,
            then_branch,
            else_branch,
        } => lower_if(ctx, cond, then_branch, else_branch.as_deref(), diags),
        HirStmt::While { cond, body } => lower_while(ctx, cond, body, diags),
        HirStmt::ForRange { var, start, end, body } => lower_for_range(ctx, var, start, end, body, diags),
        HirStmt::ForIn { var, collection, body, .. } => lower_for_in(ctx, var, collection, body, diags),
        HirStmt::ForKv {
            key,
            value,
            collection,
            body,
            ..
        } => lower_for_kv(ctx, key, value, collection, body, diags),
        HirStmt::Emit {
            frequency,
            freq_id,
            fields,
            destinations,
        } => lower_emit(ctx, frequency, *freq_id, fields, destinations),
        HirStmt::Match { scrutinee, arms } => lower_match(ctx, scrutinee, arms, diags),
        HirStmt::Return(value) => {
            let op = value.as_ref().map(|v| lower_expr(ctx, v));
            ctx.func.push(LirInstr::Ret(op));
        }
        HirStmt::Break => {
            if let Some((_, brk)) = ctx.loop_stack.last().cloned() {
                ctx.func.push(LirInstr::Jmp(brk));
            }
        }
        HirStmt::Continue => {
            if let Some((cont, _)) = ctx.loop_stack.last().cloned() {
                ctx.func.push(LirInstr::Jmp(cont));
            }
        }
        HirStmt::Report(e) => lower_report(ctx, e),
    }
}

fn lower_assign(ctx: &mut LowerCtx, target: &HirExpr, value: &HirExpr) {
    let value_op = lower_expr(ctx, value);
    match &target.kind {
        HirExprKind::StateField(field) => {
            let offset = ctx.state_offset(field);
            let width = target.ty.store_width();
            ctx.func.push(LirInstr::StoreState {
                offset,
                src: value_op,
                width,
            });
        }
        HirExprKind::Ident(name) => {
            let v = materialize(ctx, value_op);
            ctx.locals.insert(name.clone(), v);
        }
        HirExprKind::FieldAccess(base, field) => {
            let base_op = lower_expr(ctx, base);
            let offset = match &base.ty {
                Type::Struct(name) => ctx
                    .symbols
                    .types
                    .structs
                    .get(name)
                    .and_then(|s| s.field_offset(field))
                    .unwrap_or(0),
                _ => 0,
            };
            ctx.func.push(LirInstr::Store {
                base: base_op,
                offset: offset as i32,
                src: value_op,
            });
        }
        HirExprKind::Index(base, idx) => {
            let base_op = lower_expr(ctx, base);
            let base_v = materialize(ctx, base_op);
            let packed = ctx.packed_of(base_v);
            let idx_op = lower_expr(ctx, idx);
            let symbol = match &base.ty {
                Type::Map(_, _) => "builtin_map_set",
                _ => "builtin_vec_set",
            };
            let new_packed = ctx.func.fresh();
            ctx.func.push(LirInstr::Call {
                dst: Some(new_packed),
                dst2: None,
                symbol: symbol.to_string(),
                args: vec![Operand::Reg(base_v), packed, idx_op, value_op],
            });
            ctx.record_packed(base_v, Operand::Reg(new_packed));
        }
        _ => {}
    }
}

fn lower_if(
    ctx: &mut LowerCtx,
    cond: &HirExpr,
    then_branch: &[HirStmt],
    else_branch: Option<&[HirStmt]>,
    diags: &mut Diagnostics,
) {
    let cond_op = lower_expr(ctx, cond);
    let else_label = ctx.func.fresh_label("if_else");
    let end_label = ctx.func.fresh_label("if_end");
    ctx.func.push(LirInstr::JmpIfZero {
        cond: cond_op,
        label: else_label.clone(),
    });
    lower_block(ctx, then_branch, diags);
    ctx.func.push(LirInstr::Jmp(end_label.clone()));
    ctx.func.push(LirInstr::Label(else_label));
    if let Some(else_b) = else_branch {
        lower_block(ctx, else_b, diags);
    }
    ctx.func.push(LirInstr::Label(end_label));
}

fn lower_while(ctx: &mut LowerCtx, cond: &HirExpr, body: &[HirStmt], diags: &mut Diagnostics) {
    let top_label = ctx.func.fresh_label("while_top");
    let step_label = ctx.func.fresh_label("while_step");
    let end_label = ctx.func.fresh_label("while_end");
    ctx.func.push(LirInstr::Label(top_label.clone()));
    let cond_op = lower_expr(ctx, cond);
    ctx.func.push(LirInstr::JmpIfZero {
        cond: cond_op,
        label: end_label.clone(),
    });
    ctx.loop_stack.push((step_label.clone(), end_label.clone()));
    lower_block(ctx, body, diags);
    ctx.loop_stack.pop();
    ctx.func.push(LirInstr::Label(step_label));
    ctx.func.push(LirInstr::Jmp(top_label));
    ctx.func.push(LirInstr::Label(end_label));
}

fn lower_for_range(
    ctx: &mut LowerCtx,
    var: &str,
    start: &HirExpr,
    end: &HirExpr,
    body: &[HirStmt],
    diags: &mut Diagnostics,
) {
    let start_op = lower_expr(ctx, start);
    let iv = materialize(ctx, start_op);
    ctx.locals.insert(var.to_string(), iv);
    let end_op = lower_expr(ctx, end);
    let end_v = materialize(ctx, end_op);

    let top_label = ctx.func.fresh_label("for_top");
    let step_label = ctx.func.fresh_label("for_step");
    let end_label = ctx.func.fresh_label("for_end");
    ctx.func.push(LirInstr::Label(top_label.clone()));
    let cond = ctx.func.fresh();
    ctx.func.push(LirInstr::Cmp {
        dst: cond,
        op: crate::lir::CmpOp::Lt,
        lhs: Operand::Reg(iv),
        rhs: Operand::Reg(end_v),
    });
    ctx.func.push(LirInstr::JmpIfZero {
        cond: Operand::Reg(cond),
        label: end_label.clone(),
    });
    ctx.loop_stack.push((step_label.clone(), end_label.clone()));
    lower_block(ctx, body, diags);
    ctx.loop_stack.pop();
    ctx.func.push(LirInstr::Label(step_label));
    ctx.func.push(LirInstr::Arith {
        dst: iv,
        op: crate::lir::ArithOp::Add,
        lhs: Operand::Reg(iv),
        rhs: Operand::Imm(1),
    });
    ctx.func.push(LirInstr::Jmp(top_label));
    ctx.func.push(LirInstr::Label(end_label));
}

fn lower_for_in(ctx: &mut LowerCtx, var: &str, collection: &HirExpr, body: &[HirStmt], diags: &mut Diagnostics) {
    let coll_op = lower_expr(ctx, collection);
    let coll_v = materialize(ctx, coll_op);
    let packed = ctx.packed_of(coll_v);
    let len = ctx.func.fresh();
    ctx.func.push(LirInstr::Call {
        dst: Some(len),
        dst2: None,
        symbol: "builtin_vec_len".to_string(),
        args: vec![Operand::Reg(coll_v), packed.clone()],
    });
    let idx = ctx.func.fresh();
    ctx.func.push(LirInstr::Mov { dst: idx, src: Operand::Imm(0) });
    let elem = ctx.func.fresh();
    ctx.locals.insert(var.to_string(), elem);

    let top_label = ctx.func.fresh_label("forin_top");
    let step_label = ctx.func.fresh_label("forin_step");
    let end_label = ctx.func.fresh_label("forin_end");
    ctx.func.push(LirInstr::Label(top_label.clone()));
    let cond = ctx.func.fresh();
    ctx.func.push(LirInstr::Cmp {
        dst: cond,
        op: crate::lir::CmpOp::Lt,
        lhs: Operand::Reg(idx),
        rhs: Operand::Reg(len),
    });
    ctx.func.push(LirInstr::JmpIfZero {
        cond: Operand::Reg(cond),
        label: end_label.clone(),
    });
    ctx.func.push(LirInstr::Call {
        dst: Some(elem),
        dst2: None,
        symbol: "builtin_vec_get".to_string(),
        args: vec![Operand::Reg(coll_v), packed.clone(), Operand::Reg(idx)],
    });
    ctx.loop_stack.push((step_label.clone(), end_label.clone()));
    lower_block(ctx, body, diags);
    ctx.loop_stack.pop();
    ctx.func.push(LirInstr::Label(step_label));
    ctx.func.push(LirInstr::Arith {
        dst: idx,
        op: crate::lir::ArithOp::Add,
        lhs: Operand::Reg(idx),
        rhs: Operand::Imm(1),
    });
    ctx.func.push(LirInstr::Jmp(top_label));
    ctx.func.push(LirInstr::Label(end_label));
}

fn lower_for_kv(
    ctx: &mut LowerCtx,
    key: &str,
    value: &str,
    collection: &HirExpr,
    body: &[HirStmt],
    diags: &mut Diagnostics,
) {
    // map entries are 16-byte (key, value) pairs, not the 8-byte stride
    // a vec uses, so iteration goes through `builtin_map_keys` to get a
    // proper keys vec first, then looks each value up by key.
    let coll_op = lower_expr(ctx, collection);
    let coll_v = materialize(ctx, coll_op);
    let coll_packed = ctx.packed_of(coll_v);
    let keys_ptr = ctx.func.fresh();
    let keys_packed_v = ctx.func.fresh();
    ctx.func.push(LirInstr::Call {
        dst: Some(keys_ptr),
        dst2: Some(keys_packed_v),
        symbol: "builtin_map_keys".to_string(),
        args: vec![Operand::Reg(coll_v), coll_packed.clone()],
    });
    let keys_packed = Operand::Reg(keys_packed_v);
    let len = ctx.func.fresh();
    ctx.func.push(LirInstr::Call {
        dst: Some(len),
        dst2: None,
        symbol: "builtin_vec_len".to_string(),
        args: vec![Operand::Reg(keys_ptr), keys_packed.clone()],
    });
    let idx = ctx.func.fresh();
    ctx.func.push(LirInstr::Mov { dst: idx, src: Operand::Imm(0) });
    let key_v = ctx.func.fresh();
    let val_v = ctx.func.fresh();
    ctx.locals.insert(key.to_string(), key_v);
    ctx.locals.insert(value.to_string(), val_v);

    let top_label = ctx.func.fresh_label("forkv_top");
    let step_label = ctx.func.fresh_label("forkv_step");
    let end_label = ctx.func.fresh_label("forkv_end");
    ctx.func.push(LirInstr::Label(top_label.clone()));
    let cond = ctx.func.fresh();
    ctx.func.push(LirInstr::Cmp {
        dst: cond,
        op: crate::lir::CmpOp::Lt,
        lhs: Operand::Reg(idx),
        rhs: Operand::Reg(len),
    });
    ctx.func.push(LirInstr::JmpIfZero {
        cond: Operand::Reg(cond),
        label: end_label.clone(),
    });
    ctx.func.push(LirInstr::Call {
        dst: Some(key_v),
        dst2: None,
        symbol: "builtin_vec_get".to_string(),
        args: vec![Operand::Reg(keys_ptr), keys_packed.clone(), Operand::Reg(idx)],
    });
    ctx.func.push(LirInstr::Call {
        dst: Some(val_v),
        dst2: None,
        symbol: "builtin_map_get".to_string(),
        args: vec![Operand::Reg(coll_v), coll_packed.clone(), Operand::Reg(key_v)],
    });
    ctx.loop_stack.push((step_label.clone(), end_label.clone()));
    lower_block(ctx, body, diags);
    ctx.loop_stack.pop();
    ctx.func.push(LirInstr::Label(step_label));
    ctx.func.push(LirInstr::Arith {
        dst: idx,
        op: crate::lir::ArithOp::Add,
        lhs: Operand::Reg(idx),
        rhs: Operand::Imm(1),
    });
    ctx.func.push(LirInstr::Jmp(top_label));
    ctx.func.push(LirInstr::Label(end_label));
}

/// `emit F { fields... }` (spec.md §4.6): allocate a payload, store the
/// frequency id and each field, then enqueue once per compile-time-known
/// destination from the routing table.
fn lower_emit(
    ctx: &mut LowerCtx,
    frequency: &str,
    freq_id: u32,
    fields: &[(String, HirExpr)],
    destinations: &[String],
) {
    let freq_def = ctx.symbols.frequencies.iter().find(|f| f.name == frequency).cloned();
    let size = freq_def
        .as_ref()
        .map(|f| {
            let mut total = 8u32;
            for field in &f.fields {
                total += ctx.symbols.types.resolve(&field.ty).slot_size();
            }
            total
        })
        .unwrap_or(8);

    let ptr = ctx.func.fresh();
    ctx.func.push(LirInstr::Call {
        dst: Some(ptr),
        dst2: None,
        symbol: "runtime_alloc".to_string(),
        args: vec![Operand::Imm(size as i64)],
    });
    ctx.func.push(LirInstr::Store {
        base: Operand::Reg(ptr),
        offset: 0,
        src: Operand::Imm(freq_id as i64),
    });

    if let Some(freq_def) = &freq_def {
        let mut offset = 8u32;
        for field in &freq_def.fields {
            let field_ty = ctx.symbols.types.resolve(&field.ty);
            if let Some((_, value)) = fields.iter().find(|(n, _)| n == &field.name) {
                let value_op = lower_expr(ctx, value);
                ctx.func.push(LirInstr::Store {
                    base: Operand::Reg(ptr),
                    offset: offset as i32,
                    src: value_op,
                });
            }
            offset += field_ty.slot_size();
        }
    }

    for dest in destinations {
        ctx.func.push(LirInstr::Enqueue {
            queue_label: format!("signal_queue_{dest}_{frequency}"),
            payload: Operand::Reg(ptr),
        });
    }
}

fn lower_match(ctx: &mut LowerCtx, scrutinee: &HirExpr, arms: &[HirMatchArm], diags: &mut Diagnostics) {
    use crate::ast::Pattern;

    let scrutinee_op = lower_expr(ctx, scrutinee);
    let scrutinee_v = materialize(ctx, scrutinee_op);
    let end_label = ctx.func.fresh_label("match_end");
    let is_enum = matches!(scrutinee.ty, Type::Enum(_));

    let tag = if is_enum {
        let t = ctx.func.fresh();
        ctx.func.push(LirInstr::Load {
            dst: t,
            base: Operand::Reg(scrutinee_v),
            offset: 0,
        });
        Some(t)
    } else {
        None
    };

    for arm in arms {
        let arm_label = ctx.func.fresh_label("match_arm");
        let next_label = ctx.func.fresh_label("match_next");
        let mut matched_wildcard = false;
        let mut pending_bind: Option<String> = None;
        for pat in &arm.patterns {
            match pat {
                Pattern::Wildcard => {
                    matched_wildcard = true;
                }
                Pattern::EnumVariant { variant, binding } => {
                    if let (Some(tag), Type::Enum(enum_name)) = (tag, &scrutinee.ty) {
                        let ordinal = ctx
                            .symbols
                            .types
                            .enums
                            .get(enum_name)
                            .and_then(|e| e.ordinal(variant))
                            .unwrap_or(0);
                        let cmp = ctx.func.fresh();
                        ctx.func.push(LirInstr::Cmp {
                            dst: cmp,
                            op: crate::lir::CmpOp::Eq,
                            lhs: Operand::Reg(tag),
                            rhs: Operand::Imm(ordinal as i64),
                        });
                        ctx.func.push(LirInstr::JmpIfNonZero {
                            cond: Operand::Reg(cmp),
                            label: arm_label.clone(),
                        });
                        if let Some(bind_name) = binding {
                            pending_bind = Some(bind_name.clone());
                        }
                    }
                }
                Pattern::Literal(_) => {
                    // literal patterns are compared by value equality;
                    // out of scope for the tagged-union fast path above.
                }
            }
        }
        if !matched_wildcard {
            ctx.func.push(LirInstr::Jmp(next_label.clone()));
        }
        ctx.func.push(LirInstr::Label(arm_label));
        if let Some(bind_name) = pending_bind {
            let data = ctx.func.fresh();
            ctx.func.push(LirInstr::Load {
                dst: data,
                base: Operand::Reg(scrutinee_v),
                offset: 8,
            });
            ctx.locals.insert(bind_name, data);
        }
        lower_block(ctx, &arm.body, diags);
        ctx.func.push(LirInstr::Jmp(end_label.clone()));
        ctx.func.push(LirInstr::Label(next_label));
    }
    ctx.func.push(LirInstr::Label(end_label));
}

fn lower_report(ctx: &mut LowerCtx, expr: &HirExpr) {
    let op = lower_expr(ctx, expr);
    let symbol = if expr.ty == Type::String {
        "builtin_println"
    } else {
        "builtin_print_i64"
    };
    ctx.func.push(LirInstr::Call {
        dst: None,
        dst2: None,
        symbol: symbol.to_string(),
        args: vec![op],
    });
}
