//! Lowering: HIR → LIR (spec.md §4.5–§4.6)
//!
//! One `LirFunction` per rule. State reads/writes use the current
//! hyphal type's fixed offsets from `symbols.state_offsets`; string
//! literals are interned into a shared `.rodata` pool collected across
//! the whole lowering pass and handed to the assembler/ELF stages
//! alongside the emitted functions.

mod expr;
mod stmt;

use std::collections::HashMap;

use crate::errors::Diagnostics;
use crate::hir::{HirHyphal, HirNetwork, HirRule};
use crate::lir::{LirFunction, LirProgram, Operand, VReg};
use crate::symbols::SymbolTable;

pub struct LowerCtx<'a> {
    pub symbols: &'a SymbolTable,
    pub current_hyphal: String,
    pub func: LirFunction,
    pub locals: HashMap<String, VReg>,
    /// `(continue_label, break_label)` stack, innermost last.
    pub loop_stack: Vec<(String, String)>,
    /// Vreg holding the signal payload pointer (`rsi` on entry), set
    /// only while lowering a signal rule's body.
    pub payload_vreg: Option<VReg>,
    /// Frequency of the signal rule currently being lowered, used to
    /// resolve `BIND.field` offsets; `None` outside a signal rule.
    pub current_frequency: Option<String>,
    pub rodata: Vec<(String, String)>,
    /// A vec/map value is a 16-byte `(data ptr, packed cap/len)` pair per
    /// the runtime ABI (`runtime.rs`), but `Operand`/`Call` only ever
    /// carry one value at a time. This side table remembers, for every
    /// VReg currently holding a collection's data pointer, the operand
    /// holding its packed word, keyed by the pointer VReg's id.
    pub packed: HashMap<u32, Operand>,
}

impl<'a> LowerCtx<'a> {
    fn new(symbols: &'a SymbolTable, hyphal: &str, func_name: &str) -> Self {
        LowerCtx {
            symbols,
            current_hyphal: hyphal.to_string(),
            func: LirFunction::new(func_name),
            locals: HashMap::new(),
            loop_stack: Vec::new(),
            payload_vreg: None,
            current_frequency: None,
            rodata: Vec::new(),
            packed: HashMap::new(),
        }
    }

    /// Records `packed` as the companion packed word for the collection
    /// whose data pointer lives in `ptr`.
    pub fn record_packed(&mut self, ptr: VReg, packed: Operand) {
        self.packed.insert(ptr.0, packed);
    }

    /// The packed `(cap<<32)|len` word belonging to the collection whose
    /// data pointer lives in `ptr`. Every collection value in scope is
    /// produced by a site that calls `record_packed`, so a miss here
    /// means the pointer never held a vec/map value.
    pub fn packed_of(&self, ptr: VReg) -> Operand {
        self.packed.get(&ptr.0).cloned().unwrap_or(Operand::Imm(0))
    }

    pub fn intern_string(&mut self, s: &str) -> String {
        if let Some((label, _)) = self.rodata.iter().find(|(_, v)| v == s) {
            return label.clone();
        }
        let label = format!("str_{}_{}", self.func.name, self.rodata.len());
        self.rodata.push((label.clone(), s.to_string()));
        label
    }

    pub fn state_offset(&self, field: &str) -> u32 {
        self.symbols
            .state_offsets
            .get(&self.current_hyphal)
            .and_then(|m| m.get(field))
            .copied()
            .unwrap_or(0)
    }
}

/// Lower every rule of every agent type into its own LIR function,
/// named `rule_<hyphal>_<freq>`, `rest_<hyphal>`, `cycle_<hyphal>_<name>`
/// or `helper_<hyphal>_<name>` (spec.md §4.10 names the per-instance
/// trampolines that call these shared, type-level bodies).
pub fn lower_network(hir: &HirNetwork, symbols: &SymbolTable, diags: &mut Diagnostics) -> (LirProgram, Vec<(String, String)>) {
    let mut program = LirProgram::default();
    let mut rodata = Vec::new();
    for hyphal in &hir.hyphae {
        for rule in &hyphal.rules {
            let func_name = rule_function_name(hyphal, rule);
            let mut ctx = LowerCtx::new(symbols, &hyphal.name, &func_name);
            stmt::lower_rule_body(&mut ctx, rule, diags);
            rodata.extend(ctx.rodata);
            program.functions.push(ctx.func);
        }
    }
    (program, rodata)
}

fn rule_function_name(hyphal: &HirHyphal, rule: &HirRule) -> String {
    match rule {
        HirRule::Signal { frequency, .. } => format!("rule_{}_{}", hyphal.name, frequency),
        HirRule::Rest { .. } => format!("rest_{}", hyphal.name),
        HirRule::Cycle { name, .. } => format!("cycle_{}_{}", hyphal.name, name),
        HirRule::Helper { name, .. } => format!("helper_{}_{}", hyphal.name, name),
    }
}
