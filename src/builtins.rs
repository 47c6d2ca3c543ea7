//! Runtime ABI table (spec.md §6)
//!
//! The runtime C helpers themselves are out of this core's scope — only
//! their System V AMD64 signature and contract matter to the lowering
//! and assembler stages, which call them by symbol name and let the
//! linker resolve them. Grounded on the teacher's `builtin_signature`
//! (`builtins.rs`): a lazily-built name -> signature table consulted by
//! both the type checker (arity/type checking of calls) and codegen
//! (knowing how many args go in registers vs. stack).

use std::collections::HashMap;

use crate::types::Type;

#[derive(Debug, Clone)]
pub struct BuiltinSignature {
    pub symbol: &'static str,
    pub params: Vec<Type>,
    pub variadic: bool,
    pub ret: Type,
}

pub fn builtin_signature(name: &str) -> Option<BuiltinSignature> {
    builtin_signatures().get(name).cloned()
}

pub fn is_builtin(name: &str) -> bool {
    builtin_signatures().contains_key(name)
}

/// Name used in source -> ABI entry. Mirrors spec.md §6's table.
pub fn builtin_signatures() -> HashMap<&'static str, BuiltinSignature> {
    let mut m = HashMap::new();

    let mut add = |name: &'static str, symbol: &'static str, params: Vec<Type>, ret: Type| {
        m.insert(
            name,
            BuiltinSignature {
                symbol,
                params,
                variadic: false,
                ret,
            },
        );
    };

    add("print", "builtin_print", vec![Type::String], Type::Unit);
    add("println", "builtin_println", vec![Type::String], Type::Unit);
    add("print_i64", "builtin_print_i64", vec![Type::I64], Type::Unit);

    add(
        "string_eq",
        "builtin_string_eq",
        vec![Type::String, Type::String],
        Type::Bool,
    );
    add(
        "string_concat",
        "builtin_string_concat",
        vec![Type::String, Type::String],
        Type::String,
    );

    m.insert(
        "format",
        BuiltinSignature {
            symbol: "builtin_format",
            params: vec![Type::String],
            variadic: true,
            ret: Type::String,
        },
    );

    add(
        "vec_new",
        "builtin_vec_new",
        vec![],
        Type::Vec(Box::new(Type::I64)),
    );
    add(
        "vec_push",
        "builtin_vec_push",
        vec![Type::Vec(Box::new(Type::I64)), Type::I64],
        Type::Unit,
    );
    add(
        "vec_pop",
        "builtin_vec_pop",
        vec![Type::Vec(Box::new(Type::I64))],
        Type::I64,
    );
    add(
        "vec_len",
        "builtin_vec_len",
        vec![Type::Vec(Box::new(Type::I64))],
        Type::I64,
    );
    add(
        "vec_get",
        "builtin_vec_get",
        vec![Type::Vec(Box::new(Type::I64)), Type::I64],
        Type::I64,
    );
    add(
        "vec_set",
        "builtin_vec_set",
        vec![Type::Vec(Box::new(Type::I64)), Type::I64, Type::I64],
        Type::Unit,
    );

    add(
        "map_new",
        "builtin_map_new",
        vec![],
        Type::Map(Box::new(Type::String), Box::new(Type::I64)),
    );
    add(
        "map_set",
        "builtin_map_set",
        vec![
            Type::Map(Box::new(Type::String), Box::new(Type::I64)),
            Type::String,
            Type::I64,
        ],
        Type::Unit,
    );
    add(
        "map_get",
        "builtin_map_get",
        vec![Type::Map(Box::new(Type::String), Box::new(Type::I64)), Type::String],
        Type::I64,
    );
    add(
        "map_len",
        "builtin_map_len",
        vec![Type::Map(Box::new(Type::String), Box::new(Type::I64))],
        Type::I64,
    );

    add("runtime_alloc", "runtime_alloc", vec![Type::I64], Type::I64);
    add("runtime_free", "runtime_free", vec![Type::I64], Type::Unit);
    add("queue_enqueue", "queue_enqueue", vec![Type::I64, Type::I64], Type::Unit);
    add("queue_dequeue", "queue_dequeue", vec![Type::I64], Type::I64);

    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_builtins_resolve() {
        assert!(is_builtin("println"));
        assert!(is_builtin("queue_enqueue"));
        assert!(!is_builtin("not_a_builtin"));
    }

    #[test]
    fn format_is_variadic() {
        let sig = builtin_signature("format").unwrap();
        assert!(sig.variadic);
    }
}
