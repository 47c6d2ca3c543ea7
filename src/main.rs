//! hyphae compiler CLI
//!
//! Command-line interface for compiling `.hy` source files to statically
//! linked x86-64 ELF executables (spec.md §6).

use clap::Parser as ClapParser;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "hyphaec")]
#[command(about = "hyphae compiler - compile .hy agent-network sources to ELF executables", long_about = None)]
struct Cli {
    /// Input .hy source file
    input: PathBuf,

    /// Output executable path
    #[arg(short, long, default_value = "a.out")]
    output: PathBuf,

    /// Emit stage progress messages on stderr
    #[arg(long)]
    verbose: bool,

    /// Produce an unlinked object image rather than a linked executable
    #[arg(long)]
    object: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    let config = hyphaec::CompilerConfig::new()
        .object_only(cli.object)
        .verbose(cli.verbose);

    match hyphaec::compile_file(&cli.input, &cli.output, &config) {
        Ok(()) => {
            if cli.verbose {
                eprintln!("compiled {} -> {}", cli.input.display(), cli.output.display());
            }
            process::exit(0);
        }
        Err(diags) => {
            eprintln!("{}", diags.render());
            process::exit(diags.exit_code());
        }
    }
}
