//! Register Allocator + Instruction Selector (spec.md §4.7)
//!
//! A straight linear scan over each function's virtual temps. Ten
//! general-purpose registers are allocatable; `r12` is reserved for the
//! agent state base, `rbp`/`rsp` for the frame, and the six System V
//! argument registers are left free for call sites. Live intervals are
//! computed flow-insensitively (first def to last use, ignoring basic
//! block boundaries, per spec.md §4.7's "usual flow-insensitive
//! extension"). Spills get additional 8-byte-aligned stack slots.
//! Selection rewrites each two-operand LIR op as `mov dst, a; op dst, b`
//! and renders the result as AT&T-syntax text for the assembler.

use std::collections::HashMap;

use crate::errors::{Diagnostics, ErrorCode, Location};
use crate::lir::{ArithOp, CmpOp, LirFunction, LirInstr, Operand, VReg};

/// Ten allocatable GPRs (spec.md §4.7); `r12`/`rbp`/`rsp` and the six
/// System V argument registers are excluded so call sites never need to
/// shuffle a live value out of the way first.
const ALLOCATABLE: [&str; 10] = ["rax", "rbx", "rcx", "r8", "r9", "r10", "r11", "r13", "r14", "r15"];

const ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assignment {
    Reg(usize),
    /// Stack slot at `-offset(%rbp)`.
    Spill(u32),
}

struct Interval {
    vreg: VReg,
    start: usize,
    end: usize,
}

/// Allocate registers for one function and render it to assembly text
/// lines (one instruction/label/directive per line, AT&T syntax).
/// Registers the allocator hands out that System V requires a callee to
/// preserve; any of these actually assigned must be saved/restored around
/// the body (spec.md invariant 5), since `r12`/`rbp`/`rsp` are excluded
/// from `ALLOCATABLE` and saved by the fixed prologue/epilogue already.
const CALLEE_SAVED: [&str; 4] = ["rbx", "r13", "r14", "r15"];

pub fn allocate_and_render(func: &LirFunction, diags: &mut Diagnostics) -> Vec<String> {
    let intervals = compute_intervals(func);
    let (assignment, spill_bytes) = linear_scan(&intervals);

    let used_callee_saved: Vec<&str> = CALLEE_SAVED
        .iter()
        .copied()
        .filter(|name| assignment.values().any(|a| matches!(a, Assignment::Reg(idx) if ALLOCATABLE[*idx] == *name)))
        .collect();

    let mut lines = Vec::new();
    lines.push(format!("{}:", func.name));
    lines.push("push %rbp".to_string());
    lines.push("mov %rsp, %rbp".to_string());
    for r in &used_callee_saved {
        lines.push(format!("push %{r}"));
    }
    if spill_bytes > 0 {
        lines.push(format!("sub ${}, %rsp", align8(spill_bytes)));
    }

    for instr in &func.instrs {
        render_instr(instr, &assignment, &mut lines, diags, &func.name);
    }

    lines.push(format!("{}_epilogue:", func.name));
    if spill_bytes > 0 {
        lines.push(format!("add ${}, %rsp", align8(spill_bytes)));
    }
    for r in used_callee_saved.iter().rev() {
        lines.push(format!("pop %{r}"));
    }
    lines.push("pop %rbp".to_string());
    lines.push("ret".to_string());
    lines
}

fn align8(n: u32) -> u32 {
    (n + 7) & !7
}

fn compute_intervals(func: &LirFunction) -> Vec<Interval> {
    let mut first_def: HashMap<u32, usize> = HashMap::new();
    let mut last_use: HashMap<u32, usize> = HashMap::new();

    let mut touch_def = |v: VReg, idx: usize, first_def: &mut HashMap<u32, usize>, last_use: &mut HashMap<u32, usize>| {
        first_def.entry(v.0).or_insert(idx);
        let e = last_use.entry(v.0).or_insert(idx);
        *e = (*e).max(idx);
    };
    let mut touch_use = |op: &Operand, idx: usize, first_def: &mut HashMap<u32, usize>, last_use: &mut HashMap<u32, usize>| {
        if let Operand::Reg(v) = op {
            first_def.entry(v.0).or_insert(idx);
            let e = last_use.entry(v.0).or_insert(idx);
            *e = (*e).max(idx);
        }
    };

    for (idx, instr) in func.instrs.iter().enumerate() {
        match instr {
            LirInstr::Mov { dst, src } => {
                touch_def(*dst, idx, &mut first_def, &mut last_use);
                touch_use(src, idx, &mut first_def, &mut last_use);
            }
            LirInstr::Arith { dst, lhs, rhs, .. } => {
                touch_def(*dst, idx, &mut first_def, &mut last_use);
                touch_use(lhs, idx, &mut first_def, &mut last_use);
                touch_use(rhs, idx, &mut first_def, &mut last_use);
            }
            LirInstr::Neg { dst, src } | LirInstr::Not { dst, src } => {
                touch_def(*dst, idx, &mut first_def, &mut last_use);
                touch_use(src, idx, &mut first_def, &mut last_use);
            }
            LirInstr::Cmp { dst, lhs, rhs, .. } => {
                touch_def(*dst, idx, &mut first_def, &mut last_use);
                touch_use(lhs, idx, &mut first_def, &mut last_use);
                touch_use(rhs, idx, &mut first_def, &mut last_use);
            }
            LirInstr::LoadState { dst, .. } | LirInstr::LoadArg { dst, .. } => touch_def(*dst, idx, &mut first_def, &mut last_use),
            LirInstr::StoreState { src, .. } => touch_use(src, idx, &mut first_def, &mut last_use),
            LirInstr::Load { dst, base, .. } => {
                touch_def(*dst, idx, &mut first_def, &mut last_use);
                touch_use(base, idx, &mut first_def, &mut last_use);
            }
            LirInstr::Store { base, src, .. } => {
                touch_use(base, idx, &mut first_def, &mut last_use);
                touch_use(src, idx, &mut first_def, &mut last_use);
            }
            LirInstr::LoadAddr { dst, .. } => touch_def(*dst, idx, &mut first_def, &mut last_use),
            LirInstr::Call { dst, dst2, args, .. } => {
                if let Some(d) = dst {
                    touch_def(*d, idx, &mut first_def, &mut last_use);
                }
                if let Some(d) = dst2 {
                    touch_def(*d, idx, &mut first_def, &mut last_use);
                }
                for a in args {
                    touch_use(a, idx, &mut first_def, &mut last_use);
                }
            }
            LirInstr::JmpIfZero { cond, .. } | LirInstr::JmpIfNonZero { cond, .. } => {
                touch_use(cond, idx, &mut first_def, &mut last_use);
            }
            LirInstr::Enqueue { payload, .. } => touch_use(payload, idx, &mut first_def, &mut last_use),
            LirInstr::Ret(Some(op)) => touch_use(op, idx, &mut first_def, &mut last_use),
            LirInstr::Ret(None) | LirInstr::Label(_) | LirInstr::Jmp(_) => {}
        }
    }

    let mut intervals: Vec<Interval> = first_def
        .into_iter()
        .map(|(v, start)| Interval {
            vreg: VReg(v),
            start,
            end: last_use[&v],
        })
        .collect();
    intervals.sort_by_key(|iv| iv.start);
    intervals
}

/// Classic linear scan: active list kept sorted by end point; when it
/// overflows the register budget, the interval ending furthest in the
/// future is spilled (Poletto & Sarkar).
fn linear_scan(intervals: &[Interval]) -> (HashMap<u32, Assignment>, u32) {
    let mut assignment = HashMap::new();
    let mut active: Vec<(usize, usize)> = Vec::new(); // (end, register index)
    let mut next_spill_offset = 8u32;

    for iv in intervals {
        active.retain(|(end, _)| *end >= iv.start);
        if active.len() < ALLOCATABLE.len() {
            let used: Vec<usize> = active.iter().map(|(_, r)| *r).collect();
            let reg = (0..ALLOCATABLE.len()).find(|r| !used.contains(r)).unwrap();
            assignment.insert(iv.vreg.0, Assignment::Reg(reg));
            active.push((iv.end, reg));
        } else {
            active.sort_by_key(|(end, _)| *end);
            let spill_candidate = active.last().copied();
            match spill_candidate {
                Some((end, reg)) if end > iv.end => {
                    active.pop();
                    assignment.insert(iv.vreg.0, Assignment::Reg(reg));
                    active.push((iv.end, reg));
                }
                _ => {
                    assignment.insert(iv.vreg.0, Assignment::Spill(next_spill_offset));
                    next_spill_offset += 8;
                }
            }
        }
    }
    (assignment, next_spill_offset)
}

/// An entry missing from `assignment` means `compute_intervals` never
/// saw that vreg defined or used, which is an internal-consistency bug
/// in the lowering stage, not a user-facing error; report it as such.
fn reg_of(v: VReg, assignment: &HashMap<u32, Assignment>, func_name: &str, diags: &mut Diagnostics) -> String {
    match assignment.get(&v.0) {
        Some(Assignment::Reg(r)) => format!("%{}", ALLOCATABLE[*r]),
        Some(Assignment::Spill(off)) => format!("-{off}(%rbp)"),
        None => {
            diags.push(
                ErrorCode::Compilation,
                6,
                Location::synthetic(),
                format!("{func_name}: unresolved virtual register {v}"),
            );
            "%rax".to_string()
        }
    }
}

fn operand_str(op: &Operand, assignment: &HashMap<u32, Assignment>, func_name: &str, diags: &mut Diagnostics) -> String {
    match op {
        Operand::Reg(v) => reg_of(*v, assignment, func_name, diags),
        Operand::Imm(i) => format!("${i}"),
        Operand::Label(l) => format!("{l}(%rip)"),
    }
}

fn arith_mnemonic(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "add",
        ArithOp::Sub => "sub",
        ArithOp::Mul => "imul",
        ArithOp::Div => "idiv",
        ArithOp::Mod => "idiv", // quotient/remainder handled via cqo+idiv sequence below
        ArithOp::And => "and",
        ArithOp::Or => "or",
        ArithOp::Xor => "xor",
    }
}

fn setcc_mnemonic(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "sete",
        CmpOp::Ne => "setne",
        CmpOp::Lt => "setl",
        CmpOp::Le => "setle",
        CmpOp::Gt => "setg",
        CmpOp::Ge => "setge",
        CmpOp::Below => "setb",
        CmpOp::BelowEq => "setbe",
        CmpOp::Above => "seta",
        CmpOp::AboveEq => "setae",
    }
}

fn render_instr(
    instr: &LirInstr,
    assignment: &HashMap<u32, Assignment>,
    lines: &mut Vec<String>,
    diags: &mut Diagnostics,
    func_name: &str,
) {
    match instr {
        LirInstr::Mov { dst, src } => {
            let s = operand_str(src, assignment, func_name, diags);
            lines.push(format!("mov {s}, {}", reg_of(*dst, assignment, func_name, diags)));
        }
        LirInstr::LoadArg { dst, index } => {
            let d = reg_of(*dst, assignment, func_name, diags);
            lines.push(format!("mov %{}, {d}", ARG_REGS[*index as usize]));
        }
        LirInstr::Arith { dst, op: aop, lhs, rhs } => {
            let dst_r = reg_of(*dst, assignment, func_name, diags);
            let l = operand_str(lhs, assignment, func_name, diags);
            let r = operand_str(rhs, assignment, func_name, diags);
            lines.push(format!("mov {l}, {dst_r}"));
            match aop {
                ArithOp::Div => {
                    lines.push("cqo".to_string());
                    lines.push(format!("idiv {r}"));
                }
                ArithOp::Mod => {
                    lines.push("cqo".to_string());
                    lines.push(format!("idiv {r}"));
                    lines.push(format!("mov %rdx, {dst_r}"));
                }
                _ => lines.push(format!("{} {r}, {dst_r}", arith_mnemonic(*aop))),
            }
        }
        LirInstr::Neg { dst, src } => {
            let s = operand_str(src, assignment, func_name, diags);
            let d = reg_of(*dst, assignment, func_name, diags);
            lines.push(format!("mov {s}, {d}"));
            lines.push(format!("neg {d}"));
        }
        LirInstr::Not { dst, src } => {
            let s = operand_str(src, assignment, func_name, diags);
            let d = reg_of(*dst, assignment, func_name, diags);
            lines.push(format!("mov {s}, {d}"));
            lines.push(format!("xor $1, {d}"));
        }
        LirInstr::Cmp { dst, op: cop, lhs, rhs } => {
            let l = operand_str(lhs, assignment, func_name, diags);
            let r = operand_str(rhs, assignment, func_name, diags);
            let d = reg_of(*dst, assignment, func_name, diags);
            lines.push(format!("mov {l}, %rax"));
            lines.push(format!("cmp {r}, %rax"));
            lines.push(format!("{} %al", setcc_mnemonic(*cop)));
            lines.push(format!("movzx %al, {d}"));
        }
        LirInstr::LoadState { dst, offset } => {
            lines.push(format!("mov {}(%r12), {}", offset, reg_of(*dst, assignment, func_name, diags)));
        }
        LirInstr::StoreState { offset, src, .. } => {
            let s = operand_str(src, assignment, func_name, diags);
            lines.push(format!("mov {s}, {}(%r12)", offset));
        }
        LirInstr::Load { dst, base, offset } => {
            let b = operand_str(base, assignment, func_name, diags);
            lines.push(format!("mov {offset}({b}), {}", reg_of(*dst, assignment, func_name, diags)));
        }
        LirInstr::Store { base, offset, src } => {
            let b = operand_str(base, assignment, func_name, diags);
            let s = operand_str(src, assignment, func_name, diags);
            lines.push(format!("mov {s}, {offset}({b})"));
        }
        LirInstr::LoadAddr { dst, label } => {
            lines.push(format!("lea {label}(%rip), {}", reg_of(*dst, assignment, func_name, diags)));
        }
        LirInstr::Call { dst, dst2, symbol, args } => {
            for (i, a) in args.iter().enumerate().take(ARG_REGS.len()) {
                let v = operand_str(a, assignment, func_name, diags);
                lines.push(format!("mov {v}, %{}", ARG_REGS[i]));
            }
            lines.push(format!("call {symbol}"));
            if let Some(d) = dst {
                lines.push(format!("mov %rax, {}", reg_of(*d, assignment, func_name, diags)));
            }
            if let Some(d) = dst2 {
                lines.push(format!("mov %rdx, {}", reg_of(*d, assignment, func_name, diags)));
            }
        }
        LirInstr::Label(l) => lines.push(format!("{l}:")),
        LirInstr::Jmp(l) => lines.push(format!("jmp {l}")),
        LirInstr::JmpIfZero { cond, label } => {
            // `test` cannot take the same spilled memory operand twice;
            // always stage the condition through %rax first.
            let c = operand_str(cond, assignment, func_name, diags);
            lines.push(format!("mov {c}, %rax"));
            lines.push("test %rax, %rax".to_string());
            lines.push(format!("je {label}"));
        }
        LirInstr::JmpIfNonZero { cond, label } => {
            let c = operand_str(cond, assignment, func_name, diags);
            lines.push(format!("mov {c}, %rax"));
            lines.push("test %rax, %rax".to_string());
            lines.push(format!("jne {label}"));
        }
        LirInstr::Enqueue { queue_label, payload } => {
            let p = operand_str(payload, assignment, func_name, diags);
            lines.push(format!("lea {queue_label}(%rip), %rdi"));
            lines.push(format!("mov {p}, %rsi"));
            lines.push("call queue_enqueue".to_string());
        }
        LirInstr::Ret(value) => {
            if let Some(v) = value {
                let s = operand_str(v, assignment, func_name, diags);
                lines.push(format!("mov {s}, %rax"));
            }
            lines.push(format!("jmp {func_name}_epilogue"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::LirFunction;

    #[test]
    fn spills_when_more_live_values_than_registers() {
        let mut func = LirFunction::new("f");
        let mut regs = Vec::new();
        for _ in 0..12 {
            let v = func.fresh();
            func.push(LirInstr::Mov { dst: v, src: Operand::Imm(1) });
            regs.push(v);
        }
        func.push(LirInstr::Ret(Some(Operand::Reg(regs[0]))));
        let intervals = compute_intervals(&func);
        let (assignment, spill_bytes) = linear_scan(&intervals);
        assert!(spill_bytes > 0);
        assert_eq!(assignment.len(), 12);
    }

    #[test]
    fn renders_state_load_with_r12_base() {
        let mut diags = Diagnostics::new();
        let mut func = LirFunction::new("rule_counter_tick");
        let dst = func.fresh();
        func.push(LirInstr::LoadState { dst, offset: 0 });
        func.push(LirInstr::Ret(Some(Operand::Reg(dst))));
        let lines = allocate_and_render(&func, &mut diags);
        assert!(lines.iter().any(|l| l.contains("(%r12)")));
    }
}
