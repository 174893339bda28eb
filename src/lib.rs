//! lispjit — a just-in-time compiler for a minimal Lisp-like expression
//! language, emitting x86-64 machine code directly (no IR, no interpreter
//! fallback).
//!
//! # Pipeline
//!
//! ```text
//! source text --[reader]--> Expr --[compiler]--> machine code --[call]--> tagged u64
//! ```
//!
//! # Example
//!
//! ```
//! let result = lispjit::run_source("(add1 (add1 5))", 64).unwrap();
//! assert_eq!(lispjit::value::decode_fixnum(result), 7);
//! ```

#![warn(clippy::all)]

pub mod ast;
pub mod buffer;
pub mod compiler;
pub mod config;
pub mod encoder;
pub mod env;
pub mod reader;
pub mod value;

use thiserror::Error;

/// Errors that can occur running a program end to end through
/// [`run_source`]: the union of everything the reader and the compiler can
/// report. Buffer/mapping failures are not part of this union — per the
/// error-handling design, those are precondition violations handled inside
/// `buffer::Buffer::new` with `.expect(...)`, not recoverable here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{0}")]
    Reader(#[from] reader::ReaderError),
    #[error("{0}")]
    Compile(#[from] compiler::CompileError),
}

/// Parse, compile, map executable, and run `src` with a heap of
/// `heap_words` 64-bit words, returning the raw tagged result word.
///
/// This is the library-level convenience entry point the `lispjit` binary's
/// `run` subcommand calls; tests exercise the reader and the compiler
/// separately for finer-grained coverage.
pub fn run_source(src: &str, heap_words: usize) -> Result<u64, RunError> {
    let expr = reader::read(src)?;
    run_expr(&expr, heap_words).map_err(RunError::Compile)
}

/// Compile and run an already-parsed [`ast::Expr`] directly, bypassing the
/// reader. Used by tests that pin exact scenarios against a hand-built tree
/// rather than source text, and by [`run_source`] once parsing succeeds.
pub fn run_expr(expr: &ast::Expr, heap_words: usize) -> Result<u64, compiler::CompileError> {
    let code_capacity = 4096;
    let writer = compiler::compile(expr, code_capacity)?;
    let code = writer
        .into_executable()
        .expect("finalizing a just-written buffer should never fail");
    let mut heap = vec![0u64; heap_words];
    let result = unsafe { code.call(heap.as_mut_ptr() as u64) };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_source_end_to_end_plus() {
        let result = run_source("(+ 1 2)", 8).unwrap();
        assert_eq!(value::decode_fixnum(result), 3);
    }

    #[test]
    fn run_source_reports_unbound_variable() {
        let err = run_source("ghost", 8).unwrap_err();
        assert!(matches!(err, RunError::Compile(compiler::CompileError::UnboundVariable(_))));
    }

    #[test]
    fn run_source_reports_reader_error() {
        let err = run_source("#bad", 8).unwrap_err();
        assert!(matches!(err, RunError::Reader(_)));
    }
}
