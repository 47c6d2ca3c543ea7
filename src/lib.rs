//! hyphae compiler library
//!
//! Drives the whole pipeline spec.md describes — lexer, parser, symbol
//! table, type checker, HIR, lowering, register allocation, assembler,
//! and ELF image builder — from a single `.hy` source file to a
//! statically linked x86-64 ELF executable. Unlike the teacher, which
//! shells out to `clang`/LLVM for codegen, every one of these stages is
//! native to this crate; there is no external toolchain dependency.

pub mod assembler;
pub mod ast;
pub mod builtins;
pub mod config;
pub mod dispatch;
pub mod elf;
pub mod errors;
pub mod hir;
pub mod lexer;
pub mod lir;
pub mod lower;
pub mod parser;
pub mod regalloc;
pub mod runtime;
pub mod symbols;
pub mod typechecker;
pub mod types;

pub use config::{CompilerConfig, ExternalBuiltin};
pub use errors::{Diagnostics, ErrorCode, Location};
pub use parser::Parser;
pub use types::Type;

use std::fs;
use std::path::Path;

/// Compile a `.hy` source file straight to an ELF image, either a fully
/// linked executable or (with `config.object_only`) a minimal `ET_REL`
/// object carrying unresolved relocations (spec.md §4.9).
///
/// Returns the rendered diagnostics on any failure; the caller (`main.rs`)
/// maps these to spec.md §6's exit codes.
pub fn compile_file(source_path: &Path, output_path: &Path, config: &CompilerConfig) -> Result<(), Diagnostics> {
    let source = fs::read_to_string(source_path).map_err(|e| {
        let mut diags = Diagnostics::new();
        diags.push(
            ErrorCode::Io,
            0,
            Location::synthetic(),
            format!("failed to read {}: {e}", source_path.display()),
        );
        diags
    })?;

    let image = compile_source(&source, source_path, config)?;

    fs::write(output_path, &image).map_err(|e| {
        let mut diags = Diagnostics::new();
        diags.push(
            ErrorCode::Io,
            0,
            Location::synthetic(),
            format!("failed to write {}: {e}", output_path.display()),
        );
        diags
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if !config.object_only {
            if let Ok(meta) = fs::metadata(output_path) {
                let mut perms = meta.permissions();
                perms.set_mode(perms.mode() | 0o111);
                let _ = fs::set_permissions(output_path, perms);
            }
        }
    }

    Ok(())
}

/// Runs every pipeline stage over in-memory source and returns the bytes
/// of the ELF image, or the accumulated diagnostics on the first stage
/// that produced any (spec.md invariant 6: every stage collects as many
/// diagnostics as it can before the compiler gives up, rather than
/// halting at the first error within a stage — but a stage that found
/// any error is never safe to hand its output to the next one).
pub fn compile_source(source: &str, file: &Path, config: &CompilerConfig) -> Result<Vec<u8>, Diagnostics> {
    let mut diags = Diagnostics::new();

    tracing::info!(file = %file.display(), "parsing");
    let mut parser = Parser::new(source, file, &mut diags);
    let net = parser.parse(&mut diags);
    let net = match net {
        Some(net) if diags.is_empty() => net,
        _ => return Err(diags),
    };

    tracing::info!("building symbol table");
    let symbols = symbols::build_symbol_table_with_config(&net, &mut diags, config);
    if !diags.is_empty() {
        return Err(diags);
    }

    tracing::info!("type checking");
    typechecker::check_network(&net, &symbols, &mut diags);
    if !diags.is_empty() {
        return Err(diags);
    }

    tracing::info!("lowering to HIR");
    let hir_net = hir::lower_network(&net, &symbols, &mut diags);
    if !diags.is_empty() {
        return Err(diags);
    }

    tracing::info!("lowering to LIR");
    let (program, rodata) = lower::lower_network(&hir_net, &symbols, &mut diags);
    if !diags.is_empty() {
        return Err(diags);
    }

    tracing::info!(functions = program.functions.len(), "allocating registers and rendering assembly");
    let mut lines = runtime::runtime_lines();
    lines.push(".text".to_string());
    for func in &program.functions {
        lines.extend(regalloc::allocate_and_render(func, &mut diags));
    }
    if !diags.is_empty() {
        return Err(diags);
    }

    lines.extend(dispatch::synthesize(&hir_net, &symbols));

    if !rodata.is_empty() {
        lines.push(".rodata".to_string());
        for (label, content) in &rodata {
            lines.push(format!("{label}:"));
            lines.push(format!(".asciz \"{}\"", escape_asciz(content)));
        }
    }

    tracing::info!(lines = lines.len(), "assembling");
    let object = assembler::assemble(&lines, &mut diags);
    if !diags.is_empty() {
        return Err(diags);
    }

    tracing::info!(object_only = config.object_only, "building ELF image");
    Ok(elf::build_image(object, config.object_only))
}

fn escape_asciz(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn exit_0_program_compiles_to_a_nonempty_image() {
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
        let config = CompilerConfig::new();
        let image = compile_source(src, Path::new("<test>"), &config).expect("compile failed");
        assert_eq!(&image[0..4], b"\x7fELF");
    }

    #[test]
    fn object_only_flag_reaches_the_elf_builder() {
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
        let config = CompilerConfig::new().object_only(true);
        let image = compile_source(src, Path::new("<test>"), &config).expect("compile failed");
        assert_eq!(&image[0..4], b"\x7fELF");
    }

    #[test]
    fn undefined_frequency_reference_is_reported_not_panicked() {
        let src = r#"
            network demo {
                hyphae {
                    idle {
                        state {}
                        on signal(nope, p) {}
                    }
                }
                topology {
                    spawn idle as a0
                }
            }
        "#;
        let config = CompilerConfig::new();
        let err = compile_source(src, Path::new("<test>"), &config).unwrap_err();
        assert!(!err.is_empty());
    }
}
