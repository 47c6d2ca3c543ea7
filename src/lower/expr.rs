//! Expression Compiler (spec.md §4.5)

use crate::ast::{BinOp, UnaryOp};
use crate::hir::{HirExpr, HirExprKind};
use crate::lir::{ArithOp, CmpOp, LirInstr, Operand, VReg};
use crate::types::Type;

use super::LowerCtx;

/// Lower an expression, appending instructions to `ctx.func` and
/// returning the operand holding its value.
pub fn lower_expr(ctx: &mut LowerCtx, expr: &HirExpr) -> Operand {
    match &expr.kind {
        HirExprKind::IntLit(v) => Operand::Imm(*v),
        HirExprKind::FloatLit(v) => Operand::Imm(*v as i64),
        HirExprKind::BoolLit(v) => Operand::Imm(if *v { 1 } else { 0 }),
        HirExprKind::StrLit(s) => {
            let label = ctx.intern_string(s);
            Operand::Label(label)
        }
        HirExprKind::Ident(name) => match ctx.locals.get(name) {
            Some(v) => Operand::Reg(*v),
            None => Operand::Imm(0), // unresolved; type checker already reported this
        },
        HirExprKind::StateField(field) => {
            let offset = ctx.state_offset(field);
            let dst = ctx.func.fresh();
            ctx.func.push(LirInstr::LoadState { dst, offset });
            Operand::Reg(dst)
        }
        HirExprKind::BindingField(_base, field) => lower_binding_field(ctx, expr, field),
        HirExprKind::FieldAccess(base, field) => lower_field_access(ctx, base, field, &expr.ty),
        HirExprKind::Index(base, idx) => lower_index(ctx, base, idx, &expr.ty),
        HirExprKind::Call(name, args) => lower_call(ctx, name, args, &expr.ty),
        HirExprKind::MethodCall(base, name, args) => lower_method_call(ctx, base, name, args),
        HirExprKind::Unary(op, inner) => lower_unary(ctx, *op, inner),
        HirExprKind::Binary(op, lhs, rhs) => lower_binary(ctx, *op, lhs, rhs),
        HirExprKind::Range(a, _b) => lower_expr(ctx, a),
        HirExprKind::Tuple(items) => lower_tuple(ctx, items),
        HirExprKind::StructLit(name, fields) => lower_struct_lit(ctx, name, fields),
        HirExprKind::EnumLit(name, variant, data) => lower_enum_lit(ctx, name, variant, data.as_deref()),
    }
}

fn lower_binding_field(ctx: &mut LowerCtx, _expr: &HirExpr, field: &str) -> Operand {
    let Some(payload) = ctx.payload_vreg else {
        return Operand::Imm(0);
    };
    // every field after the 8-byte freq_id header, in declaration order.
    let offset = field_offset_in_frequency(ctx, field);
    let dst = ctx.func.fresh();
    ctx.func.push(LirInstr::Load {
        dst,
        base: Operand::Reg(payload),
        offset: offset as i32,
    });
    Operand::Reg(dst)
}

fn field_offset_in_frequency(ctx: &LowerCtx, field: &str) -> u32 {
    let Some(freq_name) = &ctx.current_frequency else {
        return 8;
    };
    let Some(freq) = ctx.symbols.frequencies.iter().find(|f| &f.name == freq_name) else {
        return 8;
    };
    let mut offset = 8u32; // 4-byte freq_id + 4-byte padding
    for f in &freq.fields {
        if f.name == field {
            return offset;
        }
        offset += ctx.symbols.types.resolve(&f.ty).slot_size();
    }
    offset
}

fn lower_field_access(ctx: &mut LowerCtx, base: &HirExpr, field: &str, _result_ty: &Type) -> Operand {
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
    let dst = ctx.func.fresh();
    ctx.func.push(LirInstr::Load {
        dst,
        base: base_op,
        offset: offset as i32,
    });
    Operand::Reg(dst)
}

fn lower_index(ctx: &mut LowerCtx, base: &HirExpr, idx: &HirExpr, _result_ty: &Type) -> Operand {
    let base_op = lower_expr(ctx, base);
    let base_v = materialize(ctx, base_op);
    let packed = ctx.packed_of(base_v);
    let idx_op = lower_expr(ctx, idx);
    let symbol = match &base.ty {
        Type::Map(_, _) => "builtin_map_get",
        _ => "builtin_vec_get",
    };
    let dst = ctx.func.fresh();
    ctx.func.push(LirInstr::Call {
        dst: Some(dst),
        dst2: None,
        symbol: symbol.to_string(),
        args: vec![Operand::Reg(base_v), packed, idx_op],
    });
    Operand::Reg(dst)
}

fn lower_call(ctx: &mut LowerCtx, name: &str, args: &[HirExpr], ret_ty: &Type) -> Operand {
    if let Some(op) = lower_collection_builtin(ctx, name, args) {
        return op;
    }
    let arg_ops: Vec<Operand> = args.iter().map(|a| lower_expr(ctx, a)).collect();
    let symbol = crate::builtins::builtin_signature(name)
        .map(|s| s.symbol.to_string())
        .or_else(|| ctx.symbols.extra_builtin(name).map(|b| b.symbol.clone()))
        .unwrap_or_else(|| format!("helper_{}_{}", ctx.current_hyphal, name));
    if matches!(ret_ty, Type::Unit) {
        ctx.func.push(LirInstr::Call {
            dst: None,
            dst2: None,
            symbol,
            args: arg_ops,
        });
        Operand::Imm(0)
    } else {
        let dst = ctx.func.fresh();
        ctx.func.push(LirInstr::Call {
            dst: Some(dst),
            dst2: None,
            symbol,
            args: arg_ops,
        });
        Operand::Reg(dst)
    }
}

/// Every vec/map builtin in `builtins.rs` takes or returns a 16-byte
/// `(ptr, packed)` pair per the runtime ABI (`runtime.rs`), so each one
/// needs the tracked packed companion threaded in alongside the data
/// pointer and, where the helper hands back an updated packed word
/// (`vec_push`, `vec_pop`, `vec_set`, `map_set`), re-recorded against the
/// same pointer vreg — unlike every other builtin, which is a plain
/// single-value call the generic path in `lower_call` already handles.
/// Returns `None` for any other name so `lower_call` falls through.
fn lower_collection_builtin(ctx: &mut LowerCtx, name: &str, args: &[HirExpr]) -> Option<Operand> {
    match name {
        "vec_new" => {
            let ptr = ctx.func.fresh();
            let packed = ctx.func.fresh();
            ctx.func.push(LirInstr::Call {
                dst: Some(ptr),
                dst2: Some(packed),
                symbol: "builtin_vec_new".to_string(),
                args: vec![Operand::Imm(crate::runtime::DEFAULT_COLLECTION_CAPACITY as i64)],
            });
            ctx.record_packed(ptr, Operand::Reg(packed));
            Some(Operand::Reg(ptr))
        }
        "map_new" => {
            let ptr = ctx.func.fresh();
            let packed = ctx.func.fresh();
            ctx.func.push(LirInstr::Call {
                dst: Some(ptr),
                dst2: Some(packed),
                symbol: "builtin_map_new".to_string(),
                args: vec![Operand::Imm(crate::runtime::DEFAULT_COLLECTION_CAPACITY as i64)],
            });
            ctx.record_packed(ptr, Operand::Reg(packed));
            Some(Operand::Reg(ptr))
        }
        "vec_push" | "vec_set" | "map_set" => {
            let coll_op = lower_expr(ctx, &args[0]);
            let coll_v = materialize(ctx, coll_op);
            let packed = ctx.packed_of(coll_v);
            let rest: Vec<Operand> = args[1..].iter().map(|a| lower_expr(ctx, a)).collect();
            let symbol = match name {
                "vec_push" => "builtin_vec_push",
                "vec_set" => "builtin_vec_set",
                _ => "builtin_map_set",
            };
            let mut call_args = vec![Operand::Reg(coll_v), packed];
            call_args.extend(rest);
            let new_packed = ctx.func.fresh();
            ctx.func.push(LirInstr::Call {
                dst: Some(new_packed),
                dst2: None,
                symbol: symbol.to_string(),
                args: call_args,
            });
            ctx.record_packed(coll_v, Operand::Reg(new_packed));
            Some(Operand::Imm(0))
        }
        "vec_pop" => {
            let coll_op = lower_expr(ctx, &args[0]);
            let coll_v = materialize(ctx, coll_op);
            let packed = ctx.packed_of(coll_v);
            let value = ctx.func.fresh();
            let new_packed = ctx.func.fresh();
            ctx.func.push(LirInstr::Call {
                dst: Some(value),
                dst2: Some(new_packed),
                symbol: "builtin_vec_pop".to_string(),
                args: vec![Operand::Reg(coll_v), packed],
            });
            ctx.record_packed(coll_v, Operand::Reg(new_packed));
            Some(Operand::Reg(value))
        }
        "vec_len" | "map_len" => {
            let coll_op = lower_expr(ctx, &args[0]);
            let coll_v = materialize(ctx, coll_op);
            let packed = ctx.packed_of(coll_v);
            let symbol = if name == "vec_len" { "builtin_vec_len" } else { "builtin_map_len" };
            let dst = ctx.func.fresh();
            ctx.func.push(LirInstr::Call {
                dst: Some(dst),
                dst2: None,
                symbol: symbol.to_string(),
                args: vec![Operand::Reg(coll_v), packed],
            });
            Some(Operand::Reg(dst))
        }
        "vec_get" | "map_get" => {
            let coll_op = lower_expr(ctx, &args[0]);
            let coll_v = materialize(ctx, coll_op);
            let packed = ctx.packed_of(coll_v);
            let key = lower_expr(ctx, &args[1]);
            let symbol = if name == "vec_get" { "builtin_vec_get" } else { "builtin_map_get" };
            let dst = ctx.func.fresh();
            ctx.func.push(LirInstr::Call {
                dst: Some(dst),
                dst2: None,
                symbol: symbol.to_string(),
                args: vec![Operand::Reg(coll_v), packed, key],
            });
            Some(Operand::Reg(dst))
        }
        _ => None,
    }
}

fn lower_method_call(ctx: &mut LowerCtx, base: &HirExpr, name: &str, args: &[HirExpr]) -> Operand {
    let base_op = lower_expr(ctx, base);
    let mut arg_ops = vec![base_op];
    arg_ops.extend(args.iter().map(|a| lower_expr(ctx, a)));
    let symbol = crate::builtins::builtin_signature(name)
        .map(|s| s.symbol.to_string())
        .unwrap_or_else(|| format!("builtin_{name}"));
    let dst = ctx.func.fresh();
    ctx.func.push(LirInstr::Call {
        dst: Some(dst),
        dst2: None,
        symbol,
        args: arg_ops,
    });
    Operand::Reg(dst)
}

fn lower_unary(ctx: &mut LowerCtx, op: UnaryOp, inner: &HirExpr) -> Operand {
    let src = lower_expr(ctx, inner);
    let dst = ctx.func.fresh();
    match op {
        UnaryOp::Neg => ctx.func.push(LirInstr::Neg { dst, src }),
        UnaryOp::Not => ctx.func.push(LirInstr::Not { dst, src }),
    }
    Operand::Reg(dst)
}

fn lower_binary(ctx: &mut LowerCtx, op: BinOp, lhs: &HirExpr, rhs: &HirExpr) -> Operand {
    match op {
        BinOp::And => return lower_short_circuit_and(ctx, lhs, rhs),
        BinOp::Or => return lower_short_circuit_or(ctx, lhs, rhs),
        _ => {}
    }
    if op == BinOp::Add && (lhs.ty == Type::String || rhs.ty == Type::String) {
        let lhs_op = lower_expr(ctx, lhs);
        let rhs_op = lower_expr(ctx, rhs);
        let dst = ctx.func.fresh();
        ctx.func.push(LirInstr::Call {
            dst: Some(dst),
            dst2: None,
            symbol: "builtin_string_concat".to_string(),
            args: vec![lhs_op, rhs_op],
        });
        return Operand::Reg(dst);
    }
    let lhs_op = lower_expr(ctx, lhs);
    let rhs_op = lower_expr(ctx, rhs);
    let dst = ctx.func.fresh();
    match arith_op(op) {
        Some(arith) => ctx.func.push(LirInstr::Arith {
            dst,
            op: arith,
            lhs: lhs_op,
            rhs: rhs_op,
        }),
        None => ctx.func.push(LirInstr::Cmp {
            dst,
            op: cmp_op(op),
            lhs: lhs_op,
            rhs: rhs_op,
        }),
    }
    Operand::Reg(dst)
}

fn arith_op(op: BinOp) -> Option<ArithOp> {
    Some(match op {
        BinOp::Add => ArithOp::Add,
        BinOp::Sub => ArithOp::Sub,
        BinOp::Mul => ArithOp::Mul,
        BinOp::Div => ArithOp::Div,
        BinOp::Mod => ArithOp::Mod,
        _ => return None,
    })
}

fn cmp_op(op: BinOp) -> CmpOp {
    match op {
        BinOp::Eq => CmpOp::Eq,
        BinOp::Ne => CmpOp::Ne,
        BinOp::Lt => CmpOp::Lt,
        BinOp::Le => CmpOp::Le,
        BinOp::Gt => CmpOp::Gt,
        BinOp::Ge => CmpOp::Ge,
        _ => unreachable!("arithmetic/logical ops handled separately"),
    }
}

fn lower_short_circuit_and(ctx: &mut LowerCtx, lhs: &HirExpr, rhs: &HirExpr) -> Operand {
    let dst = ctx.func.fresh();
    let lhs_op = lower_expr(ctx, lhs);
    ctx.func.push(LirInstr::Mov { dst, src: lhs_op });
    let false_label = ctx.func.fresh_label("and_false");
    let end_label = ctx.func.fresh_label("and_end");
    ctx.func.push(LirInstr::JmpIfZero {
        cond: Operand::Reg(dst),
        label: false_label.clone(),
    });
    let rhs_op = lower_expr(ctx, rhs);
    ctx.func.push(LirInstr::Mov { dst, src: rhs_op });
    ctx.func.push(LirInstr::Jmp(end_label.clone()));
    ctx.func.push(LirInstr::Label(false_label));
    ctx.func.push(LirInstr::Mov { dst, src: Operand::Imm(0) });
    ctx.func.push(LirInstr::Label(end_label));
    Operand::Reg(dst)
}

fn lower_short_circuit_or(ctx: &mut LowerCtx, lhs: &HirExpr, rhs: &HirExpr) -> Operand {
    let dst = ctx.func.fresh();
    let lhs_op = lower_expr(ctx, lhs);
    ctx.func.push(LirInstr::Mov { dst, src: lhs_op });
    let true_label = ctx.func.fresh_label("or_true");
    let end_label = ctx.func.fresh_label("or_end");
    ctx.func.push(LirInstr::JmpIfNonZero {
        cond: Operand::Reg(dst),
        label: true_label.clone(),
    });
    let rhs_op = lower_expr(ctx, rhs);
    ctx.func.push(LirInstr::Mov { dst, src: rhs_op });
    ctx.func.push(LirInstr::Jmp(end_label.clone()));
    ctx.func.push(LirInstr::Label(true_label));
    ctx.func.push(LirInstr::Mov { dst, src: Operand::Imm(1) });
    ctx.func.push(LirInstr::Label(end_label));
    Operand::Reg(dst)
}

fn lower_tuple(ctx: &mut LowerCtx, items: &[HirExpr]) -> Operand {
    let vec_ptr = ctx.func.fresh();
    let mut packed = ctx.func.fresh();
    ctx.func.push(LirInstr::Call {
        dst: Some(vec_ptr),
        dst2: Some(packed),
        symbol: "builtin_vec_new".to_string(),
        args: vec![Operand::Imm(items.len() as i64)],
    });
    for item in items {
        let v = lower_expr(ctx, item);
        let next_packed = ctx.func.fresh();
        ctx.func.push(LirInstr::Call {
            dst: Some(next_packed),
            dst2: None,
            symbol: "builtin_vec_push".to_string(),
            args: vec![Operand::Reg(vec_ptr), Operand::Reg(packed), v],
        });
        packed = next_packed;
    }
    ctx.record_packed(vec_ptr, Operand::Reg(packed));
    Operand::Reg(vec_ptr)
}

fn lower_struct_lit(ctx: &mut LowerCtx, name: &str, fields: &[(String, HirExpr)]) -> Operand {
    let size = ctx
        .symbols
        .types
        .structs
        .get(name)
        .map(|s| s.size())
        .unwrap_or(8);
    let ptr = ctx.func.fresh();
    ctx.func.push(LirInstr::Call {
        dst: Some(ptr),
        dst2: None,
        symbol: "runtime_alloc".to_string(),
        args: vec![Operand::Imm(size as i64)],
    });
    let struct_def = ctx.symbols.types.structs.get(name).cloned();
    for (fname, fexpr) in fields {
        let value = lower_expr(ctx, fexpr);
        let offset = struct_def
            .as_ref()
            .and_then(|s| s.field_offset(fname))
            .unwrap_or(0);
        ctx.func.push(LirInstr::Store {
            base: Operand::Reg(ptr),
            offset: offset as i32,
            src: value,
        });
    }
    Operand::Reg(ptr)
}

fn lower_enum_lit(ctx: &mut LowerCtx, name: &str, variant: &str, data: Option<&HirExpr>) -> Operand {
    let ordinal = ctx
        .symbols
        .types
        .enums
        .get(name)
        .and_then(|e| e.ordinal(variant))
        .unwrap_or(0);
    let ptr = ctx.func.fresh();
    ctx.func.push(LirInstr::Call {
        dst: Some(ptr),
        dst2: None,
        symbol: "runtime_alloc".to_string(),
        args: vec![Operand::Imm(16)],
    });
    ctx.func.push(LirInstr::Store {
        base: Operand::Reg(ptr),
        offset: 0,
        src: Operand::Imm(ordinal as i64),
    });
    if let Some(d) = data {
        let value = lower_expr(ctx, d);
        ctx.func.push(LirInstr::Store {
            base: Operand::Reg(ptr),
            offset: 8,
            src: value,
        });
    }
    Operand::Reg(ptr)
}

/// Load a `VReg` operand into `dst` when the caller needs a concrete
/// register rather than a possibly-immediate `Operand` (used by the
/// statement compiler for assignment targets).
pub fn materialize(ctx: &mut LowerCtx, op: Operand) -> VReg {
    match op {
        Operand::Reg(v) => v,
        other => {
            let dst = ctx.func.fresh();
            ctx.func.push(LirInstr::Mov { dst, src: other });
            dst
        }
    }
}
