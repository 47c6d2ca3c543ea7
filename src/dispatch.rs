//! Dispatch Synthesizer (spec.md §4.10)
//!
//! Grounded on the teacher's pattern of a small driver module emitting a
//! fixed textual routine per declared entity, generalized from "one
//! function per top-level program item" to "one queue/init/dispatch set
//! per spawned instance, synthesized from the symbol table and HIR
//! rather than hand-written." Produces raw AT&T assembly lines in the
//! same convention `runtime.rs` uses, concatenated with the compiled
//! program's own lines before a single `assembler::assemble` call.
//!
//! Emits, per spawned instance:
//! - `state_<instance>` / `signal_queue_<instance>_<frequency>` in `.bss`;
//! - `init_<instance>`: points `%r12` at the state slab, calls the rest
//!   handler (if any) then every cycle/timer handler once (spec.md §4
//!   leaves timer-handler recurrence unspecified beyond "no OS sleep is
//!   required unless the program inserts one"; running them once at
//!   startup is the only interpretation that keeps the halting scenarios
//!   in spec.md §8 actually halt);
//! - `dispatch_<instance>(state_ptr=%rdi, payload_ptr=%rsi)`: a linear
//!   `cmp`/`je` chain over the frequencies this instance actually
//!   handles (first match wins, matching spec.md §4.3 invariant 5 now
//!   that the statement compiler threads guards through instead of
//!   dropping them);
//! - one `rule_<instance>_<freq>` trampoline per matching rule, handing
//!   off to the shared per-hyphal-type body `lower.rs` already emitted.
//!
//! Fruiting bodies are "external I/O endpoints" (spec.md glossary), not
//! agents — they have no rest/signal/cycle handlers of their own. A
//! fruiting body that is a socket destination gets a direct per-frequency
//! `sink_<fruiting_body>_<frequency>` routine instead of an `init_`/
//! `dispatch_` pair: it prints the payload's fields to stdout, which is
//! the only I/O this compiler can synthesize for a handler-less endpoint
//! (spec.md §8 scenario c's "stdout-wrapper" fruiting body).
//!
//! The generated scheduler is fully unrolled, one drain loop per
//! `(instance, frequency)` and per sink, rather than a data-driven loop
//! over a runtime table — there is no instance/frequency list at
//! runtime, only the static set this compilation produced.

use std::collections::HashMap;

use crate::hir::{HirHyphal, HirNetwork, HirRule};
use crate::runtime::QUEUE_BYTES;
use crate::symbols::{HyphalInstance, SymbolTable};
use crate::types::Type;

struct InstancePlan {
    name: String,
    hyphal_type: String,
    state_size: u32,
    /// Frequencies with a declared incoming socket (every one gets a
    /// queue, whether or not a rule exists to consume it).
    queues: Vec<String>,
    /// Subset of `queues` this hyphal type has a signal rule for,
    /// paired with the rule's frequency id, in rule declaration order.
    handled: Vec<(String, u32)>,
    has_rest: bool,
    cycles: Vec<String>,
}

struct SinkPlan {
    fruiting_body: String,
    frequency: String,
}

/// Builds every per-instance/per-sink plan, then renders the whole
/// dispatch layer (`.bss` layout, `init_`/`dispatch_`/`rule_` trampolines,
/// sinks, `_start`, and the scheduler) as assembly text lines.
pub fn synthesize(hir: &HirNetwork, symbols: &SymbolTable) -> Vec<String> {
    let freq_order: Vec<String> = symbols.frequencies.iter().map(|f| f.name.clone()).collect();
    let hir_by_type: HashMap<&str, &HirHyphal> = hir.hyphae.iter().map(|h| (h.name.as_str(), h)).collect();

    let mut instances: Vec<&HyphalInstance> = symbols.instances.values().collect();
    instances.sort_by_key(|i| i.id);

    let plans: Vec<InstancePlan> = instances.iter().map(|inst| build_instance_plan(inst, symbols, &freq_order, &hir_by_type)).collect();

    let mut fruiting_bodies: Vec<(&String, &u32)> = symbols.fruiting_bodies.iter().collect();
    fruiting_bodies.sort_by_key(|(_, id)| **id);
    let sinks: Vec<SinkPlan> = fruiting_bodies
        .iter()
        .flat_map(|(name, _)| {
            freq_order
                .iter()
                .filter(|freq| symbols.routing.iter().any(|r| &r.destination == *name && &r.frequency == *freq))
                .map(|freq| SinkPlan { fruiting_body: (*name).clone(), frequency: freq.clone() })
        })
        .collect();

    let mut lines = Vec::new();
    lines.extend(render_bss(&plans, &sinks));
    lines.push(".text".to_string());
    for p in &plans {
        lines.extend(render_init(p));
        lines.extend(render_dispatch(p));
        lines.extend(render_trampolines(p));
    }
    for s in &sinks {
        lines.extend(render_sink(s, symbols));
    }
    lines.extend(render_start(&plans));
    lines.extend(render_scheduler(&plans, &sinks));
    lines
}

fn build_instance_plan(
    inst: &HyphalInstance,
    symbols: &SymbolTable,
    freq_order: &[String],
    hir_by_type: &HashMap<&str, &HirHyphal>,
) -> InstancePlan {
    let state_size = symbols.state_sizes.get(&inst.hyphal_type).copied().unwrap_or(0).max(8);

    let queues: Vec<String> = freq_order
        .iter()
        .filter(|freq| symbols.routing.iter().any(|r| r.destination == inst.name && &r.frequency == *freq))
        .cloned()
        .collect();

    let mut handled = Vec::new();
    let mut has_rest = false;
    let mut cycles = Vec::new();
    if let Some(h) = hir_by_type.get(inst.hyphal_type.as_str()) {
        for rule in &h.rules {
            match rule {
                HirRule::Signal { frequency, freq_id, .. } => {
                    if queues.contains(frequency) {
                        handled.push((frequency.clone(), *freq_id));
                    }
                }
                HirRule::Rest { .. } => has_rest = true,
                HirRule::Cycle { name, .. } => cycles.push(name.clone()),
                HirRule::Helper { .. } => {}
            }
        }
    }

    InstancePlan {
        name: inst.name.clone(),
        hyphal_type: inst.hyphal_type.clone(),
        state_size,
        queues,
        handled,
        has_rest,
        cycles,
    }
}

fn render_bss(plans: &[InstancePlan], sinks: &[SinkPlan]) -> Vec<String> {
    let mut lines = vec![".bss".to_string()];
    for p in plans {
        lines.push(format!("state_{}:", p.name));
        lines.push(format!(".zero {}", p.state_size));
        for freq in &p.queues {
            lines.push(format!("signal_queue_{}_{}:", p.name, freq));
            lines.push(format!(".zero {QUEUE_BYTES}"));
        }
    }
    for s in sinks {
        lines.push(format!("signal_queue_{}_{}:", s.fruiting_body, s.frequency));
        lines.push(format!(".zero {QUEUE_BYTES}"));
    }
    lines
}

/// Zeroing the state slab is a no-op: `.bss` is zero at load (spec.md
/// §4.9), so `init_<instance>` only has to point `%r12` at it and run
/// the rest handler, then each cycle/timer handler once.
fn render_init(p: &InstancePlan) -> Vec<String> {
    let mut lines = vec![format!("init_{}:", p.name), format!("lea state_{}(%rip), %r12", p.name)];
    if p.has_rest {
        lines.push(format!("call rest_{}", p.hyphal_type));
    }
    for cycle in &p.cycles {
        lines.push(format!("call cycle_{}_{}", p.hyphal_type, cycle));
    }
    lines.push("ret".to_string());
    lines
}

fn render_dispatch(p: &InstancePlan) -> Vec<String> {
    let mut lines = vec![format!("dispatch_{}:", p.name), "mov (%rsi), %edx".to_string()];
    for (freq, freq_id) in &p.handled {
        lines.push(format!("cmp ${freq_id}, %edx"));
        lines.push(format!("je rule_{}_{}", p.name, freq));
    }
    lines.push("ret".to_string());
    lines
}

fn render_trampolines(p: &InstancePlan) -> Vec<String> {
    let mut lines = Vec::new();
    for (freq, _) in &p.handled {
        lines.push(format!("rule_{}_{}:", p.name, freq));
        lines.push("mov %rdi, %r12".to_string());
        lines.push(format!("jmp rule_{}_{}", p.hyphal_type, freq));
    }
    lines
}

/// A handler-less I/O endpoint: writes the frequency's fields to stdout
/// in declaration order (string fields via `builtin_print`, scalar
/// fields via `builtin_print_i64`; collection/struct/enum fields are not
/// printed — this sink has no formatting grammar to fall back to), then
/// a trailing newline, matching spec.md §8 scenario c's expectation that
/// routing a single-string-field payload to a "stdout-wrapper" produces
/// exactly that string followed by `\n`.
fn render_sink(s: &SinkPlan, symbols: &SymbolTable) -> Vec<String> {
    let mut lines = vec![format!("sink_{}_{}:", s.fruiting_body, s.frequency), "push %rbx".to_string(), "mov %rdi, %rbx".to_string()];

    if let Some(freq_def) = symbols.frequencies.iter().find(|f| f.name == s.frequency) {
        let mut offset = 8u32;
        for field in &freq_def.fields {
            let ty = symbols.types.resolve(&field.ty);
            match ty {
                Type::String => {
                    lines.push(format!("mov {offset}(%rbx), %rdi"));
                    lines.push("call builtin_print".to_string());
                }
                Type::Vec(_) | Type::Map(_, _) | Type::Struct(_) | Type::Enum(_) => {}
                _ => {
                    lines.push(format!("mov {offset}(%rbx), %rdi"));
                    lines.push("call builtin_print_i64".to_string());
                }
            }
            offset += ty.slot_size();
        }
    }

    lines.push("lea rt_newline(%rip), %rsi".to_string());
    lines.push("mov $1, %rdx".to_string());
    lines.push("mov $1, %rdi".to_string());
    lines.push("mov $1, %rax".to_string());
    lines.push("syscall".to_string());
    lines.push("pop %rbx".to_string());
    lines.push("ret".to_string());
    lines
}

fn render_start(plans: &[InstancePlan]) -> Vec<String> {
    let mut lines = vec!["_start:".to_string()];
    for p in plans {
        lines.push(format!("call init_{}", p.name));
    }
    lines.push("jmp scheduler_loop".to_string());
    lines
}

/// Fully unrolled cooperative scheduler (spec.md §4.10): one static
/// drain loop per `(instance, frequency)` queue and per sink, repeating
/// the whole pass while any loop did work, then exiting with status 0.
fn render_scheduler(plans: &[InstancePlan], sinks: &[SinkPlan]) -> Vec<String> {
    let mut lines = vec!["scheduler_loop:".to_string(), ".Lsched_pass:".to_string(), "mov $0, %r15d".to_string()];

    for p in plans {
        for freq in &p.queues {
            let top = format!(".Lsched_{}_{}_loop", p.name, freq);
            let done = format!(".Lsched_{}_{}_done", p.name, freq);
            lines.push(format!("lea signal_queue_{}_{}(%rip), %rdi", p.name, freq));
            lines.push("call queue_dequeue".to_string());
            lines.push("test %rax, %rax".to_string());
            lines.push(format!("je {done}"));
            lines.push(format!("{top}:"));
            lines.push("mov $1, %r15d".to_string());
            lines.push("mov %rax, %rsi".to_string());
            lines.push(format!("lea state_{}(%rip), %rdi", p.name));
            lines.push(format!("call dispatch_{}", p.name));
            lines.push(format!("lea signal_queue_{}_{}(%rip), %rdi", p.name, freq));
            lines.push("call queue_dequeue".to_string());
            lines.push("test %rax, %rax".to_string());
            lines.push(format!("jne {top}"));
            lines.push(format!("{done}:"));
        }
    }

    for s in sinks {
        let top = format!(".Lsched_sink_{}_{}_loop", s.fruiting_body, s.frequency);
        let done = format!(".Lsched_sink_{}_{}_done", s.fruiting_body, s.frequency);
        lines.push(format!("lea signal_queue_{}_{}(%rip), %rdi", s.fruiting_body, s.frequency));
        lines.push("call queue_dequeue".to_string());
        lines.push("test %rax, %rax".to_string());
        lines.push(format!("je {done}"));
        lines.push(format!("{top}:"));
        lines.push("mov $1, %r15d".to_string());
        lines.push("mov %rax, %rdi".to_string());
        lines.push(format!("call sink_{}_{}", s.fruiting_body, s.frequency));
        lines.push(format!("lea signal_queue_{}_{}(%rip), %rdi", s.fruiting_body, s.frequency));
        lines.push("call queue_dequeue".to_string());
        lines.push("test %rax, %rax".to_string());
        lines.push(format!("jne {top}"));
        lines.push(format!("{done}:"));
    }

    lines.push("test %r15d, %r15d".to_string());
    lines.push("jne .Lsched_pass".to_string());
    lines.push("mov $60, %rax".to_string());
    lines.push("xor %edi, %edi".to_string());
    lines.push("syscall".to_string());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Diagnostics;
    use crate::hir;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::symbols;
    use std::path::Path;

    fn plan(src: &str) -> (HirNetwork, SymbolTable) {
        let mut diags = Diagnostics::new();
        let mut parser = Parser::new(src, Path::new("<test>"), &mut diags);
        let net = parser.parse(&mut diags).expect("parse failed");
        let symbols = symbols::build_symbol_table(&net, &mut diags);
        let hir = hir::lower_network(&net, &symbols, &mut diags);
        assert!(diags.is_empty(), "{diags:?}");
        (hir, symbols)
    }

    #[test]
    fn exit_0_program_synthesizes_start_and_halts() {
        let src = r#"
            network demo {
                hyphae {
                    idle {
                        state {}
                        on rest {}
                    }
                }
                topology {
                    spawn idle as a0
                }
            }
        "#;
        let (hir, symbols) = plan(src);
        let lines = synthesize(&hir, &symbols);
        assert!(lines.iter().any(|l| l == "_start:"));
        assert!(lines.iter().any(|l| l == "call init_a0"));
        assert!(lines.iter().any(|l| l.contains("syscall")));
        let mut diags = Diagnostics::new();
        let mut all_lines = crate::runtime::runtime_lines();
        all_lines.extend(lines);
        let image = crate::assembler::assemble(&all_lines, &mut diags);
        assert!(diags.is_empty(), "{diags:?}");
        assert!(image.symbols.iter().any(|s| s.name == "_start"));
        assert!(image.symbols.iter().any(|s| s.name == "init_a0"));
    }

    #[test]
    fn greeting_round_trip_wires_dispatch_and_sink() {
        let src = r#"
            network demo {
                frequencies {
                    greeting { name: string }
                    response { message: string }
                }
                hyphae {
                    greeter {
                        state {}
                        on signal(greeting, g) {
                            emit response { message: g.name }
                        }
                    }
                }
                topology {
                    spawn greeter as gr
                    fruiting_body inbox
                    fruiting_body outbox
                    socket inbox -> gr : greeting
                    socket gr -> outbox : response
                }
            }
        "#;
        let (hir, symbols) = plan(src);
        let lines = synthesize(&hir, &symbols);
        assert!(lines.iter().any(|l| l == "dispatch_gr:"));
        assert!(lines.iter().any(|l| l == "rule_gr_greeting:"));
        assert!(lines.iter().any(|l| l == "jmp rule_greeter_greeting"));
        assert!(lines.iter().any(|l| l == "sink_outbox_response:"));
        assert!(lines.iter().any(|l| l.contains("signal_queue_gr_greeting")));
    }
}
