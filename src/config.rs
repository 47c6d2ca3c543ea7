//! Compiler configuration for extensibility
//!
//! This module provides configuration types that allow external projects
//! to extend the compiler with additional runtime builtins without
//! modifying the core crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use hyphaec::{CompilerConfig, ExternalBuiltin};
//! use hyphaec::Type;
//!
//! let config = CompilerConfig::new()
//!     .with_builtin(ExternalBuiltin::new(
//!         "journal_append",
//!         "runtime_journal_append",
//!         vec![Type::String],
//!         Type::Unit,
//!     ))
//!     .verbose(true);
//! ```

use crate::types::Type;

/// Definition of an external builtin function.
///
/// External builtins are functions provided outside the bundled runtime
/// (`runtime.rs`) that should be callable from hyphae source the same
/// way `print`/`format`/etc. are: by name, resolved to a System V AMD64
/// symbol at lowering time (see `builtins.rs`).
#[derive(Debug, Clone)]
pub struct ExternalBuiltin {
    /// The name used in hyphae source (e.g., "journal_append")
    pub hy_name: String,

    /// The symbol name the assembler/ELF stages resolve calls to
    pub symbol: String,

    /// Parameter types, used by the type checker for arity/type checking
    pub params: Vec<Type>,

    /// Return type
    pub ret: Type,
}

impl ExternalBuiltin {
    pub fn new(
        hy_name: impl Into<String>,
        symbol: impl Into<String>,
        params: Vec<Type>,
        ret: Type,
    ) -> Self {
        ExternalBuiltin {
            hy_name: hy_name.into(),
            symbol: symbol.into(),
            params,
            ret,
        }
    }
}

/// Configuration for the hyphae compiler.
///
/// Allows callers (the CLI, or embedders linking against this crate) to
/// extend the compiler with additional builtins and to set the
/// object-only / verbose flags spec.md's CLI table describes.
#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Emit a minimal `ET_REL` object with unresolved relocations
    /// instead of a fully linked executable (`--object`).
    pub object_only: bool,

    /// Raise the tracing filter from `warn` to `info` (`--verbose`).
    pub verbose: bool,

    /// External builtins to make callable from hyphae source.
    pub extra_builtins: Vec<ExternalBuiltin>,
}

impl CompilerConfig {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    /// Add an external builtin (builder pattern).
    pub fn with_builtin(mut self, builtin: ExternalBuiltin) -> Self {
        self.extra_builtins.push(builtin);
        self
    }

    /// Add multiple external builtins.
    pub fn with_builtins(mut self, builtins: impl IntoIterator<Item = ExternalBuiltin>) -> Self {
        self.extra_builtins.extend(builtins);
        self
    }

    pub fn object_only(mut self, value: bool) -> Self {
        self.object_only = value;
        self
    }

    pub fn verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// hyphae-source names of all external builtins (for AST validation).
    pub fn external_names(&self) -> Vec<&str> {
        self.extra_builtins.iter().map(|b| b.hy_name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_builtin_new() {
        let builtin = ExternalBuiltin::new("my_func", "runtime_my_func", vec![Type::I64], Type::Unit);
        assert_eq!(builtin.hy_name, "my_func");
        assert_eq!(builtin.symbol, "runtime_my_func");
        assert_eq!(builtin.params, vec![Type::I64]);
    }

    #[test]
    fn test_config_builder() {
        let config = CompilerConfig::new()
            .with_builtin(ExternalBuiltin::new("func_a", "sym_a", vec![], Type::Unit))
            .with_builtin(ExternalBuiltin::new("func_b", "sym_b", vec![Type::I64], Type::I64))
            .object_only(true)
            .verbose(true);

        assert_eq!(config.extra_builtins.len(), 2);
        assert!(config.object_only);
        assert!(config.verbose);
    }

    #[test]
    fn test_external_names() {
        let config = CompilerConfig::new()
            .with_builtin(ExternalBuiltin::new("func_a", "sym_a", vec![], Type::Unit))
            .with_builtin(ExternalBuiltin::new("func_b", "sym_b", vec![], Type::Unit));

        let names = config.external_names();
        assert_eq!(names, vec!["func_a", "func_b"]);
    }
}
