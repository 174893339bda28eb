//! `lispjit` — compile and run (or just emit) a source program.
//!
//! A `clap`-derived argument struct, `anyhow::Result` in `main`, `-` meaning
//! stdin, diagnostics to stderr.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use lispjit::buffer::BufferWriter;
use lispjit::compiler::CompileError;
use lispjit::config::LispjitConfig;
use lispjit::{compiler, reader, value};

#[derive(Parser)]
#[command(name = "lispjit")]
#[command(about = "JIT compiler for a minimal Lisp-like expression language")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and execute a program, printing the decoded result.
    Run {
        /// Input file (use - for stdin)
        #[arg(default_value = "-")]
        input: String,
        /// Heap size in 64-bit words (overrides config default).
        #[arg(long)]
        heap_words: Option<usize>,
    },
    /// Compile only, printing the emitted machine code as hex.
    Emit {
        /// Input file (use - for stdin)
        #[arg(default_value = "-")]
        input: String,
    },
}

/// Run the compiler, degrading a [`CompileError`] to a name-free message
/// unless `verbose_errors` asks for the offending atom/label name.
fn compile_checked(expr: &lispjit::ast::Expr, capacity: usize, verbose_errors: bool) -> Result<BufferWriter> {
    compiler::compile(expr, capacity).map_err(|err| {
        if verbose_errors {
            anyhow!(err)
        } else {
            anyhow!(match err {
                CompileError::UnboundVariable(_) => "unbound variable",
                CompileError::UnboundLabel(_) => "unbound label",
            })
        }
    })
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        fs::read_to_string(PathBuf::from(input)).context("failed to read input")
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LispjitConfig::load_from_cwd().unwrap_or_default();

    match cli.command {
        Command::Run { input, heap_words } => {
            let source = read_input(&input)?;
            let expr = reader::read(&source).context("parse failed")?;
            let writer = compile_checked(&expr, config.buffer.size_bytes, config.compiler.verbose_errors)
                .context("compile failed")?;
            eprintln!("compiled {} bytes", writer.pos());
            let code = writer.into_executable().context("failed to finalize code buffer")?;
            let words = heap_words.unwrap_or(config.heap.default_words);
            let mut heap = vec![0u64; words];
            let result = unsafe { code.call(heap.as_mut_ptr() as u64) };
            println!("{}", value::describe(result));
        }
        Command::Emit { input } => {
            let source = read_input(&input)?;
            let expr = reader::read(&source).context("parse failed")?;
            let writer = compile_checked(&expr, config.buffer.size_bytes, config.compiler.verbose_errors)
                .context("compile failed")?;
            println!("{}", hex::encode(writer.written()));
        }
    }

    Ok(())
}
