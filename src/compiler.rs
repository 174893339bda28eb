//! Compiler core: a post-order tree walk over [`Expr`] that emits x86-64
//! machine code directly into a [`BufferWriter`], no intermediate IR.
//!
//! Each form lowers straight into [`encoder`] calls as the walk reaches it;
//! variable and label bindings thread through as an immutable [`env::Env`]
//! chain alongside a stack index tracking the next free scratch slot, so a
//! nested `let`/`code`/`labels` scope can fork its own bindings without
//! disturbing the caller's.

use thiserror::Error;

use crate::ast::Expr;
use crate::buffer::{Buffer, BufferWriter};
use crate::encoder::{self, Reg};
use crate::env::Env;
use crate::value::{encode_bool, encode_fixnum, NIL};

/// Recoverable compile-time errors: everything else (wrong arity, an
/// unknown primitive head, a non-atom where a name is required) is a
/// precondition violation the compiler asserts against instead, since it
/// can only arise from a malformed tree, not from a well-formed program
/// that merely refers to something that does not exist.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("unbound variable: {0}")]
    UnboundVariable(String),
    #[error("unbound label: {0}")]
    UnboundLabel(String),
}

/// The state threaded through the tree walk: the active local-variable and
/// label bindings, and the stack index at which the next scratch slot
/// begins. Cheap to clone (an `Env` clone is an `Rc` bump), which is what
/// lets `let`, `code`, and `labels` each fork a child context without
/// disturbing the caller's.
#[derive(Clone)]
struct CompilerContext {
    locals: Env,
    labels: Env,
    si: i32,
}

impl CompilerContext {
    fn entry() -> Self {
        CompilerContext {
            locals: Env::new(),
            labels: Env::new(),
            si: -8,
        }
    }

    fn with_locals(&self, locals: Env) -> Self {
        CompilerContext {
            locals,
            labels: self.labels.clone(),
            si: self.si,
        }
    }

    fn deepened(&self) -> Self {
        CompilerContext {
            locals: self.locals.clone(),
            labels: self.labels.clone(),
            si: self.si - 8,
        }
    }

    fn at_si(&self, si: i32) -> Self {
        CompilerContext {
            locals: self.locals.clone(),
            labels: self.labels.clone(),
            si,
        }
    }
}

/// Compile a top-level expression into a fresh code buffer of `code_capacity`
/// bytes, returning the writer in its writable state (the caller decides
/// when to call [`BufferWriter::into_executable`]).
///
/// A top-level `(labels ...)` form is compiled as the entry point directly;
/// any other expression is wrapped with the `rsi`-initializing prologue and
/// a trailing `ret`, per the calling convention every compiled program
/// implements.
pub fn compile(expr: &Expr, code_capacity: usize) -> Result<BufferWriter, CompileError> {
    let mut w = BufferWriter::new(Buffer::new(code_capacity));
    compile_program(&mut w, expr)?;
    Ok(w)
}

fn compile_program(w: &mut BufferWriter, expr: &Expr) -> Result<(), CompileError> {
    if let Some(("labels", items)) = call_head(expr) {
        compile_labels(w, &items[1..items.len() - 1], items[items.len() - 1])
    } else {
        let ctx = CompilerContext::entry();
        encoder::emit_mov_reg(w, Reg::Rsi, Reg::Rdi);
        compile_expr(w, &ctx, expr)?;
        encoder::emit_ret(w);
        Ok(())
    }
}

/// If `expr` is a non-empty call form `(head arg...)`, return the head atom
/// text and the full item list (head included). Used for dispatch; panics
/// are left to the callers that actually require a given shape.
fn call_head<'a>(expr: &'a Expr) -> Option<(&'a str, Vec<&'a Expr>)> {
    match expr {
        Expr::Cons { .. } => {
            let items = expr.iter_list();
            let head = items[0].as_atom()?;
            Some((head, items))
        }
        _ => None,
    }
}

fn compile_expr(w: &mut BufferWriter, ctx: &CompilerContext, expr: &Expr) -> Result<(), CompileError> {
    match expr {
        Expr::Fixnum(v) => {
            encoder::emit_mov_imm32(w, Reg::Rax, encode_fixnum(*v as i64) as u32);
            Ok(())
        }
        Expr::Nil => {
            encoder::emit_mov_imm32(w, Reg::Rax, NIL as u32);
            Ok(())
        }
        Expr::Atom(name) => match ctx.locals.lookup(name) {
            Some(offset) => {
                encoder::emit_mov_from_stack(w, Reg::Rax, offset as i32);
                Ok(())
            }
            None => Err(CompileError::UnboundVariable(name.clone())),
        },
        Expr::Cons { .. } => compile_call(w, ctx, expr),
    }
}

fn compile_call(w: &mut BufferWriter, ctx: &CompilerContext, expr: &Expr) -> Result<(), CompileError> {
    let items = expr.iter_list();
    let head = items[0]
        .as_atom()
        .unwrap_or_else(|| panic!("call head must be an atom, got {:?}", items[0]));

    match head {
        "add1" => {
            compile_expr(w, ctx, items[1])?;
            encoder::emit_add_imm(w, Reg::Rax, encode_fixnum(1) as u32);
            Ok(())
        }
        "sub1" => {
            compile_expr(w, ctx, items[1])?;
            encoder::emit_sub_imm(w, Reg::Rax, encode_fixnum(1) as u32);
            Ok(())
        }
        "integer->char" => {
            compile_expr(w, ctx, items[1])?;
            encoder::emit_shl_imm(w, Reg::Rax, 6);
            encoder::emit_or_imm(w, Reg::Rax, 0x0f);
            Ok(())
        }
        "zero?" => {
            compile_expr(w, ctx, items[1])?;
            encoder::emit_cmp_imm(w, Reg::Rax, 0);
            encoder::emit_mov_imm32(w, Reg::Rax, 0);
            encoder::emit_setz_al(w);
            encoder::emit_shl_imm(w, Reg::Rax, 7);
            encoder::emit_or_imm(w, Reg::Rax, 0x1f);
            Ok(())
        }
        "+" => {
            compile_expr(w, ctx, items[2])?;
            encoder::emit_mov_to_stack(w, ctx.si, Reg::Rax);
            compile_expr(w, &ctx.deepened(), items[1])?;
            encoder::emit_add_from_stack(w, Reg::Rax, ctx.si);
            Ok(())
        }
        "let" => compile_let(w, ctx, items[1].iter_list(), items[2]),
        "if" => compile_if(w, ctx, items[1], items[2], items[3]),
        "cons" => compile_cons(w, ctx, items[1], items[2]),
        "car" => {
            compile_expr(w, ctx, items[1])?;
            encoder::emit_mov_rax_from_mem(w, Reg::Rax, -1);
            Ok(())
        }
        "cdr" => {
            compile_expr(w, ctx, items[1])?;
            encoder::emit_mov_rax_from_mem(w, Reg::Rax, 7);
            Ok(())
        }
        "code" => compile_code(w, ctx, items[1], items[2]),
        "labelcall" => compile_labelcall(w, ctx, items[1], &items[2..]),
        other => panic!("unknown primitive or special form: {}", other),
    }
}

/// Sequential `let`: each binding's initializer sees only the bindings to
/// its left, and is spilled to `si` before the next one deepens it.
fn compile_let(
    w: &mut BufferWriter,
    ctx: &CompilerContext,
    bindings: Vec<&Expr>,
    body: &Expr,
) -> Result<(), CompileError> {
    match bindings.split_first() {
        None => compile_expr(w, ctx, body),
        Some((binding, rest)) => {
            let pair = binding.iter_list();
            let name = pair[0]
                .as_atom()
                .unwrap_or_else(|| panic!("let binding name must be an atom, got {:?}", pair[0]));
            compile_expr(w, ctx, pair[1])?;
            encoder::emit_mov_to_stack(w, ctx.si, Reg::Rax);
            let locals = ctx.locals.extend(name, ctx.si as i64);
            let next = ctx.with_locals(locals).deepened();
            compile_let(w, &next, rest.to_vec(), body)
        }
    }
}

fn compile_if(
    w: &mut BufferWriter,
    ctx: &CompilerContext,
    test: &Expr,
    then_e: &Expr,
    else_e: &Expr,
) -> Result<(), CompileError> {
    compile_expr(w, ctx, test)?;
    encoder::emit_cmp_imm(w, Reg::Rax, encode_bool(false) as u32);
    let site_a = encoder::emit_je_placeholder(w);
    compile_expr(w, ctx, then_e)?;
    let site_b = encoder::emit_jmp_placeholder(w);
    w.backpatch_displacement_imm32(site_a);
    compile_expr(w, ctx, else_e)?;
    w.backpatch_displacement_imm32(site_b);
    Ok(())
}

/// Allocate a pair. `rsi` holds the next free (untagged) heap word; `b` is
/// evaluated and spilled first, then `a` is evaluated one slot deeper so
/// neither clobbers the other's stack temporary, mirroring `+`.
fn compile_cons(w: &mut BufferWriter, ctx: &CompilerContext, a: &Expr, b: &Expr) -> Result<(), CompileError> {
    compile_expr(w, ctx, b)?;
    encoder::emit_mov_to_stack(w, ctx.si, Reg::Rax);
    compile_expr(w, &ctx.deepened(), a)?;
    encoder::emit_mov_mem_from_rax(w, Reg::Rsi, 0);
    encoder::emit_mov_from_stack(w, Reg::Rax, ctx.si);
    encoder::emit_mov_mem_from_rax(w, Reg::Rsi, 8);
    encoder::emit_mov_reg(w, Reg::Rax, Reg::Rsi);
    encoder::emit_or_imm(w, Reg::Rax, 1);
    encoder::emit_add_imm64(w, Reg::Rsi, 16);
    Ok(())
}

/// `(code (formals...) body)`: opens a fresh frame where `si` restarts at
/// `-8` and each formal is bound, in order, to successively deeper offsets
/// — the same offsets `labelcall` spills its arguments into, so the callee
/// finds them already in place.
fn compile_code(w: &mut BufferWriter, ctx: &CompilerContext, formals: &Expr, body: &Expr) -> Result<(), CompileError> {
    let mut locals = Env::new();
    let mut si: i32 = -8;
    for formal in formals.iter_list() {
        let name = formal
            .as_atom()
            .unwrap_or_else(|| panic!("code formal must be an atom, got {:?}", formal));
        locals = locals.extend(name, si as i64);
        si -= 8;
    }
    let body_ctx = CompilerContext {
        locals,
        labels: ctx.labels.clone(),
        si,
    };
    compile_expr(w, &body_ctx, body)?;
    encoder::emit_ret(w);
    Ok(())
}

/// `(labelcall name args...)`: spill each argument in order to successively
/// deeper slots, then call the label's recorded absolute buffer offset. No
/// explicit `rsp` adjustment — but `call` itself pushes one return-address
/// word, so the callee's `rsp` at entry is the caller's `rsp - 8`, and the
/// first argument must be written one word deeper than the caller's own
/// current `si` for it to land where the callee's `code` frame (which binds
/// its first formal at its own `si = -8`) expects to find it.
fn compile_labelcall(
    w: &mut BufferWriter,
    ctx: &CompilerContext,
    name_expr: &Expr,
    args: &[&Expr],
) -> Result<(), CompileError> {
    let name = name_expr
        .as_atom()
        .unwrap_or_else(|| panic!("labelcall target must be an atom, got {:?}", name_expr));
    let target = ctx
        .labels
        .lookup(name)
        .ok_or_else(|| CompileError::UnboundLabel(name.to_string()))?;

    let mut si = ctx.si - 8;
    for arg in args {
        compile_expr(w, &ctx.at_si(si), arg)?;
        encoder::emit_mov_to_stack(w, si, Reg::Rax);
        si -= 8;
    }
    encoder::emit_call(w, target as usize);
    Ok(())
}

/// Top-level `(labels ((name code-expr)...) body)`. Forward references
/// between label bodies are not supported: each binding becomes visible
/// only to the ones that follow it, not to itself or earlier ones.
fn compile_labels(w: &mut BufferWriter, bindings: &[&Expr], body: &Expr) -> Result<(), CompileError> {
    let skip_site = encoder::emit_jmp_placeholder(w);

    let mut labels = Env::new();
    for binding in bindings {
        let pair = binding.iter_list();
        let name = pair[0]
            .as_atom()
            .unwrap_or_else(|| panic!("label name must be an atom, got {:?}", pair[0]));
        let offset = w.pos() as i64;
        labels = labels.extend(name, offset);
        let ctx = CompilerContext {
            locals: Env::new(),
            labels: labels.clone(),
            si: -8,
        };
        compile_expr(w, &ctx, pair[1])?;
    }

    w.backpatch_displacement_imm32(skip_site);
    encoder::emit_mov_reg(w, Reg::Rsi, Reg::Rdi);
    let body_ctx = CompilerContext {
        locals: Env::new(),
        labels,
        si: -8,
    };
    compile_expr(w, &body_ctx, body)?;
    encoder::emit_ret(w);
    Ok(())
}
