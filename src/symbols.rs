//! Symbol Table Builder (spec.md §4.2)
//!
//! Walks the parsed `Network` in the phases spec.md lists: frequencies
//! (assigning ids), user types, agent types (state + handlers + rules),
//! spawn instances, the static routing table, and state-field offsets.
//! Grounded on the teacher's `Resolver` (`resolver.rs`): a struct that
//! owns accumulated tables and returns `Result<T, String>`-shaped errors,
//! generalized here to push onto the shared `Diagnostics` sink so every
//! problem in a phase is reported, not just the first (spec.md invariant 6).

use std::collections::HashMap;

use crate::ast::*;
use crate::errors::{Diagnostics, ErrorCode, Location};
use crate::types::{EnumKind, EnumType, StructType, Type, TypeTable};

#[derive(Debug, Clone)]
pub struct HyphalInstance {
    pub id: u32,
    pub name: String,
    pub hyphal_type: String,
}

#[derive(Debug, Clone)]
pub struct RoutingEntry {
    pub source: String,
    pub destination: String,
    pub frequency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointId {
    Instance(u32),
    FruitingBody(u32),
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    /// Frequency name -> (id, declared fields).
    pub frequency_ids: HashMap<String, u32>,
    pub frequencies: Vec<FrequencyDef>,
    pub types: TypeTable,
    /// Hyphal type name -> definition (state layout + rules).
    pub hyphal_types: HashMap<String, HyphalDef>,
    /// Agent-type name -> state field name -> byte offset.
    pub state_offsets: HashMap<String, HashMap<String, u32>>,
    /// Agent-type name -> total state record size in bytes.
    pub state_sizes: HashMap<String, u32>,
    /// Spawned instance name -> instance record.
    pub instances: HashMap<String, HyphalInstance>,
    pub fruiting_bodies: HashMap<String, u32>,
    /// Static routing table: every `(source, destination, frequency)` triple.
    pub routing: Vec<RoutingEntry>,
    /// Builtins registered via `CompilerConfig`, consulted by the type
    /// checker and lowering alongside the bundled `builtins::builtin_signature`
    /// table (spec.md §4.12).
    pub extra_builtins: Vec<crate::config::ExternalBuiltin>,
}

impl SymbolTable {
    pub fn instance_count(&self) -> u32 {
        self.instances.len() as u32
    }

    pub fn extra_builtin(&self, name: &str) -> Option<&crate::config::ExternalBuiltin> {
        self.extra_builtins.iter().find(|b| b.hy_name == name)
    }
}

pub fn build_symbol_table(net: &Network, diags: &mut Diagnostics) -> SymbolTable {
    build_symbol_table_with_config(net, diags, &crate::config::CompilerConfig::default())
}

pub fn build_symbol_table_with_config(
    net: &Network,
    diags: &mut Diagnostics,
    config: &crate::config::CompilerConfig,
) -> SymbolTable {
    let mut table = SymbolTable::default();
    let stage = 3; // EC/ES stage tag for the symbol-table-builder phase

    collect_frequencies(net, &mut table, diags, stage);
    collect_user_types(net, &mut table, diags, stage);
    collect_hyphal_types(net, &mut table, diags, stage);
    resolve_spawns(net, &mut table, diags, stage);
    resolve_fruiting_bodies(net, &mut table);
    table.routing = build_routing_table(net, &table, diags, stage);
    compute_state_offsets(&mut table);
    table.extra_builtins = config.extra_builtins.clone();
    table
}

fn loc(span: &Span) -> Location {
    Location::new(span.file.clone(), span.line, span.col)
}

/// Phase 1: collect frequencies, assign ascending ids in declaration
/// order starting at 0 (spec.md invariant 1), compute payload size.
fn collect_frequencies(net: &Network, table: &mut SymbolTable, diags: &mut Diagnostics, stage: u8) {
    for (idx, freq) in net.frequencies.iter().enumerate() {
        if table.frequency_ids.contains_key(&freq.name) {
            diags.push(
                ErrorCode::Semantic,
                stage,
                loc(&freq.span),
                format!("duplicate frequency '{}'", freq.name),
            );
            continue;
        }
        table.frequency_ids.insert(freq.name.clone(), idx as u32);
        table.frequencies.push(freq.clone());
    }
}

/// Phase 2: collect struct/enum types. A declared type's name is known
/// to every field in this same phase regardless of declaration order
/// (`enum_names` is gathered in a pass over the whole `types` block
/// before any field is resolved), so `Named("Msg")` resolves to
/// `Type::Enum` even when `Msg` is declared after the struct/enum that
/// references it.
fn collect_user_types(net: &Network, table: &mut SymbolTable, diags: &mut Diagnostics, stage: u8) {
    let enum_names: std::collections::HashSet<&str> = net
        .types
        .iter()
        .filter_map(|d| match d {
            TypeDef::Enum(e) => Some(e.name.as_str()),
            TypeDef::Struct(_) => None,
        })
        .collect();
    let resolve = |ty: &TypeExpr| -> Type { resolve_type_expr(ty, &enum_names) };

    for def in &net.types {
        match def {
            TypeDef::Struct(s) => {
                if table.types.structs.contains_key(&s.name) {
                    diags.push(
                        ErrorCode::Semantic,
                        stage,
                        loc(&s.span),
                        format!("duplicate type '{}'", s.name),
                    );
                    continue;
                }
                let fields = s.fields.iter().map(|f| (f.name.clone(), resolve(&f.ty))).collect();
                table
                    .types
                    .structs
                    .insert(s.name.clone(), StructType { name: s.name.clone(), fields });
            }
            TypeDef::Enum(e) => {
                if table.types.enums.contains_key(&e.name) {
                    diags.push(
                        ErrorCode::Semantic,
                        stage,
                        loc(&e.span),
                        format!("duplicate type '{}'", e.name),
                    );
                    continue;
                }
                let has_payload = e.variants.iter().any(|v| v.data.is_some());
                let kind = if has_payload { EnumKind::TaggedUnion } else { EnumKind::Simple };
                let variants = e.variants.iter().map(|v| (v.name.clone(), v.data.as_ref().map(&resolve))).collect();
                table
                    .types
                    .enums
                    .insert(e.name.clone(), EnumType { name: e.name.clone(), kind, variants });
            }
        }
    }
}

fn resolve_type_expr(ty: &TypeExpr, enum_names: &std::collections::HashSet<&str>) -> Type {
    match ty {
        TypeExpr::I64 => Type::I64,
        TypeExpr::U32 => Type::U32,
        TypeExpr::Bool => Type::Bool,
        TypeExpr::String => Type::String,
        TypeExpr::Vec(inner) => Type::Vec(Box::new(resolve_type_expr(inner, enum_names))),
        TypeExpr::Map(k, v) => Type::Map(Box::new(resolve_type_expr(k, enum_names)), Box::new(resolve_type_expr(v, enum_names))),
        TypeExpr::Named(name) => {
            if enum_names.contains(name.as_str()) {
                Type::Enum(name.clone())
            } else {
                Type::Struct(name.clone())
            }
        }
    }
}

/// Phase 3: collect agent types, their state fields, handlers and rules.
fn collect_hyphal_types(net: &Network, table: &mut SymbolTable, diags: &mut Diagnostics, stage: u8) {
    for h in &net.hyphae {
        if table.hyphal_types.contains_key(&h.name) {
            diags.push(
                ErrorCode::Semantic,
                stage,
                loc(&h.span),
                format!("duplicate hyphal type '{}'", h.name),
            );
            continue;
        }
        table.hyphal_types.insert(h.name.clone(), h.clone());
    }
}

/// Phase 4: resolve spawn declarations to a registry of instances.
fn resolve_spawns(net: &Network, table: &mut SymbolTable, diags: &mut Diagnostics, stage: u8) {
    for spawn in &net.topology.spawns {
        if !table.hyphal_types.contains_key(&spawn.hyphal_type) {
            diags.push(
                ErrorCode::Semantic,
                stage,
                loc(&spawn.span),
                format!("spawn of unknown hyphal type '{}'", spawn.hyphal_type),
            );
            continue;
        }
        if table.instances.contains_key(&spawn.instance) {
            diags.push(
                ErrorCode::Semantic,
                stage,
                loc(&spawn.span),
                format!("duplicate instance id '{}'", spawn.instance),
            );
            continue;
        }
        let id = table.instances.len() as u32;
        table.instances.insert(
            spawn.instance.clone(),
            HyphalInstance {
                id,
                name: spawn.instance.clone(),
                hyphal_type: spawn.hyphal_type.clone(),
            },
        );
    }
}

fn resolve_fruiting_bodies(net: &Network, table: &mut SymbolTable) {
    for (idx, fb) in net.topology.fruiting_bodies.iter().enumerate() {
        table.fruiting_bodies.insert(fb.name.clone(), idx as u32);
    }
}

/// Phase 5: build the static routing table, validating every socket's
/// source/destination resolve to a spawn id or fruiting-body id, and
/// every frequency tag is known.
fn build_routing_table(
    net: &Network,
    table: &SymbolTable,
    diags: &mut Diagnostics,
    stage: u8,
) -> Vec<RoutingEntry> {
    let mut routing = Vec::new();
    let is_endpoint = |name: &str| table.instances.contains_key(name) || table.fruiting_bodies.contains_key(name);

    for socket in &net.topology.sockets {
        if !is_endpoint(&socket.source) {
            diags.push(
                ErrorCode::Semantic,
                stage,
                loc(&socket.span),
                format!("socket source '{}' is not a spawned instance or fruiting body", socket.source),
            );
            continue;
        }
        if !is_endpoint(&socket.destination) {
            diags.push(
                ErrorCode::Semantic,
                stage,
                loc(&socket.span),
                format!("socket destination '{}' is not a spawned instance or fruiting body", socket.destination),
            );
            continue;
        }
        match &socket.frequency {
            Some(freq) if !table.frequency_ids.contains_key(freq) => {
                diags.push(
                    ErrorCode::Semantic,
                    stage,
                    loc(&socket.span),
                    format!("socket references unknown frequency '{freq}'"),
                );
                continue;
            }
            Some(freq) => routing.push(RoutingEntry {
                source: socket.source.clone(),
                destination: socket.destination.clone(),
                frequency: freq.clone(),
            }),
            None => {
                // wildcard socket: expands to one routing entry per
                // declared frequency
                for freq in table.frequency_ids.keys() {
                    routing.push(RoutingEntry {
                        source: socket.source.clone(),
                        destination: socket.destination.clone(),
                        frequency: freq.clone(),
                    });
                }
            }
        }
    }
    routing
}

/// Phase 6: compute `agentStateOffsets[id]` as a running 8-byte-aligned
/// sum, per agent TYPE (instances of the same type share a layout; the
/// dispatch synthesizer multiplies by the per-instance state base).
fn compute_state_offsets(table: &mut SymbolTable) {
    let hyphal_types: Vec<(String, HyphalDef)> =
        table.hyphal_types.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    for (name, def) in hyphal_types {
        let mut offsets = HashMap::new();
        let mut offset = 0u32;
        for field in &def.state {
            offsets.insert(field.name.clone(), offset);
            offset += table.types.resolve(&field.ty).slot_size();
        }
        table.state_offsets.insert(name.clone(), offsets);
        table.state_sizes.insert(name, offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use std::path::Path;

    fn build(src: &str) -> (SymbolTable, Diagnostics) {
        let mut diags = Diagnostics::new();
        let mut parser = Parser::new(src, Path::new("<test>"), &mut diags);
        let net = parser.parse(&mut diags).expect("parse failed");
        let table = build_symbol_table(&net, &mut diags);
        (table, diags)
    }

    #[test]
    fn frequency_ids_assigned_in_declaration_order() {
        let (table, diags) = build(
            r#"
            network N {
                frequencies {
                    a { x: i64 }
                    b { y: i64 }
                }
                topology { }
            }
            "#,
        );
        assert!(diags.is_empty());
        assert_eq!(table.frequency_ids["a"], 0);
        assert_eq!(table.frequency_ids["b"], 1);
    }

    #[test]
    fn unknown_spawn_type_is_an_error() {
        let (_table, diags) = build(
            r#"
            network N {
                topology {
                    spawn Ghost as g1
                }
            }
            "#,
        );
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn state_offsets_are_stable_and_8_byte_aligned() {
        let (table, diags) = build(
            r#"
            network N {
                hyphae {
                    counter {
                        state { count: u32 = 0, name: string }
                    }
                }
                topology { spawn counter as c1 }
            }
            "#,
        );
        assert!(diags.is_empty());
        let offs = &table.state_offsets["counter"];
        assert_eq!(offs["count"], 0);
        assert_eq!(offs["name"], 8);
        assert_eq!(table.state_sizes["counter"], 24);
    }

    #[test]
    fn routing_table_has_one_entry_per_socket() {
        let (table, diags) = build(
            r#"
            network N {
                frequencies { greeting { name: string } }
                hyphae { greeter { } }
                topology {
                    spawn greeter as g1
                    fruiting_body input
                    socket input -> g1 : greeting
                }
            }
            "#,
        );
        assert!(diags.is_empty());
        assert_eq!(table.routing.len(), 1);
        assert_eq!(table.routing[0].destination, "g1");
    }
}
