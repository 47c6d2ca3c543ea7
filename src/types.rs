//! Type system for the hyphae language
//!
//! Fully nominal and fully declared — unlike the teacher's row-polymorphic
//! stack-effect system (no `Var`/`RowVar` inference is required here since
//! every field, state slot and parameter carries an explicit declared
//! type). Kept as a flat enum plus a small side table of user type
//! definitions so the type checker and the lowering stage share one
//! source of truth for field widths and offsets (spec.md §3, §4.2).

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    I64,
    U32,
    Bool,
    String,
    Vec(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Struct(String),
    Enum(String),
    /// Payload of a subscribed frequency, e.g. the type of `g` in
    /// `on signal(greeting, g)`.
    Frequency(String),
    Unit,
}

impl Type {
    /// All numeric state fields and signal fields occupy 8 bytes on
    /// their containing record regardless of declared width (spec.md
    /// invariant 7). Vec/map fields reserve 16 bytes (a data pointer plus
    /// a packed `(cap<<32)|len` word). Strings reserve the same 16 bytes
    /// for layout uniformity even though only the first word is live: a
    /// string value is one register, a pointer to a NUL-terminated byte
    /// sequence (see `runtime.rs`), so the second word is unused padding.
    pub fn slot_size(&self) -> u32 {
        match self {
            Type::String | Type::Vec(_) | Type::Map(_, _) => 16,
            _ => 8,
        }
    }

    /// Store width used by a single `mov` when writing this type into a
    /// record field. Every type, including strings, is written with one
    /// 8-byte store — a string's second reserved word is simply never
    /// written.
    pub fn store_width(&self) -> u32 {
        8
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::I64 | Type::U32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl StructType {
    pub fn field_type(&self, name: &str) -> Option<&Type> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// 8-byte-aligned running offset of each field, per spec.md §3.
    pub fn field_offset(&self, name: &str) -> Option<u32> {
        let mut offset = 0u32;
        for (n, t) in &self.fields {
            if n == name {
                return Some(offset);
            }
            offset += t.slot_size();
        }
        None
    }

    pub fn size(&self) -> u32 {
        self.fields.iter().map(|(_, t)| t.slot_size()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnumKind {
    /// 8-byte tag only, no payload on any variant.
    Simple,
    /// 8-byte tag + 8-byte data slot sized to the widest variant's
    /// payload (spec.md §4.2 assumes payload fits in 8 bytes).
    TaggedUnion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub kind: EnumKind,
    /// Variant name -> (ordinal, optional payload type)
    pub variants: Vec<(String, Option<Type>)>,
}

impl EnumType {
    pub fn ordinal(&self, variant: &str) -> Option<u32> {
        self.variants
            .iter()
            .position(|(n, _)| n == variant)
            .map(|i| i as u32)
    }

    pub fn payload_type(&self, variant: &str) -> Option<&Type> {
        self.variants
            .iter()
            .find(|(n, _)| n == variant)
            .and_then(|(_, t)| t.as_ref())
    }

    /// Tag at offset 0, 8-byte data slot at offset 8 (spec.md §4.2, §9).
    pub const TAG_OFFSET: u32 = 0;
    pub const DATA_OFFSET: u32 = 8;
    pub const SIZE: u32 = 16;
}

/// Registry of user-declared struct/enum types, shared by the type
/// checker and the lowering stage.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    pub structs: HashMap<String, StructType>,
    pub enums: HashMap<String, EnumType>,
}

impl TypeTable {
    pub fn new() -> Self {
        TypeTable::default()
    }

    pub fn size_of(&self, ty: &Type) -> u32 {
        match ty {
            Type::Struct(name) => self.structs.get(name).map(|s| s.size()).unwrap_or(8),
            Type::Enum(_) => EnumType::SIZE,
            other => other.slot_size(),
        }
    }

    /// Resolves a parsed `TypeExpr` against this table, disambiguating a
    /// `Named` reference as `Type::Enum` or `Type::Struct` by looking it
    /// up rather than always guessing `Struct` (an unregistered name is
    /// left as `Struct` — the type checker reports the "unknown type"
    /// error separately).
    pub fn resolve(&self, ty: &crate::ast::TypeExpr) -> Type {
        use crate::ast::TypeExpr;
        match ty {
            TypeExpr::I64 => Type::I64,
            TypeExpr::U32 => Type::U32,
            TypeExpr::Bool => Type::Bool,
            TypeExpr::String => Type::String,
            TypeExpr::Vec(inner) => Type::Vec(Box::new(self.resolve(inner))),
            TypeExpr::Map(k, v) => Type::Map(Box::new(self.resolve(k)), Box::new(self.resolve(v))),
            TypeExpr::Named(name) => {
                if self.enums.contains_key(name) {
                    Type::Enum(name.clone())
                } else {
                    Type::Struct(name.clone())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_offsets_are_8_byte_aligned_running_sums() {
        let s = StructType {
            name: "Point".into(),
            fields: vec![("x".into(), Type::I64), ("y".into(), Type::I64)],
        };
        assert_eq!(s.field_offset("x"), Some(0));
        assert_eq!(s.field_offset("y"), Some(8));
        assert_eq!(s.size(), 16);
    }

    #[test]
    fn fat_pointer_fields_occupy_16_bytes() {
        let s = StructType {
            name: "Greeting".into(),
            fields: vec![("name".into(), Type::String), ("count".into(), Type::I64)],
        };
        assert_eq!(s.field_offset("name"), Some(0));
        assert_eq!(s.field_offset("count"), Some(16));
    }

    #[test]
    fn enum_ordinals_assigned_in_declaration_order() {
        let e = EnumType {
            name: "Msg".into(),
            kind: EnumKind::TaggedUnion,
            variants: vec![
                ("Hello".into(), Some(Type::String)),
                ("Ping".into(), None),
                ("Pong".into(), None),
            ],
        };
        assert_eq!(e.ordinal("Hello"), Some(0));
        assert_eq!(e.ordinal("Ping"), Some(1));
        assert_eq!(e.ordinal("Pong"), Some(2));
    }
}
