//! Converting functions to text.
//!
//! The `write` module provides the `write_function` function which converts a `Function` to an
//! equivalent textual form. This textual form can be read back by the `ir_reader` crate.

use core::fmt::{self, Write};

use crate::{Block, Expr, Function, Stmt, Var};

#[cfg(test)]
mod tests;

/// A `FuncWriter` used to decorate functions during printing.
pub trait FuncWriter {
    /// Write a trailing annotation for `stmt`. Annotations are printed as comments.
    fn annotate(&mut self, w: &mut dyn Write, func: &Function, stmt: &Stmt) -> fmt::Result;
}

/// A `PlainWriter` that doesn't decorate the function.
pub struct PlainWriter;

impl FuncWriter for PlainWriter {
    fn annotate(&mut self, _w: &mut dyn Write, _func: &Function, _stmt: &Stmt) -> fmt::Result {
        Ok(())
    }
}

/// Write `func` to `w` as equivalent text.
pub fn write_function(w: &mut dyn Write, func: &Function) -> fmt::Result {
    decorate_function(&mut PlainWriter, w, func)
}

/// Writes `func` to `w` as text, decorating statements with `func_w`.
pub fn decorate_function<FW: FuncWriter>(
    func_w: &mut FW,
    w: &mut dyn Write,
    func: &Function,
) -> fmt::Result {
    for attr in &func.attrs {
        write!(w, "@{}", attr.name)?;
        if !attr.args.is_empty() {
            write!(w, "(")?;
            for (i, arg) in attr.args.iter().enumerate() {
                if i != 0 {
                    write!(w, ", ")?;
                }
                write!(w, "{arg}")?;
            }
            write!(w, ")")?;
        }
        writeln!(w)?;
    }

    write!(w, "function %{}(", func.name)?;
    for (i, &param) in func.params.iter().enumerate() {
        if i != 0 {
            write!(w, ", ")?;
        }
        write!(w, "{}: {}", func.var_name(param), func.var_ty(param))?;
    }
    write!(w, ")")?;
    for (i, ty) in func.returns.iter().enumerate() {
        if i == 0 {
            write!(w, " -> {ty}")?;
        } else {
            write!(w, ", {ty}")?;
        }
    }
    write!(w, " ")?;
    write_block(func_w, w, func, &func.body, 0)?;
    writeln!(w)
}

fn write_block<FW: FuncWriter>(
    func_w: &mut FW,
    w: &mut dyn Write,
    func: &Function,
    block: &Block,
    indent: usize,
) -> fmt::Result {
    writeln!(w, "{{")?;
    for stmt in &block.stmts {
        write_stmt(func_w, w, func, stmt, indent + 4)?;
    }
    write!(w, "{:indent$}}}", "")
}

fn write_stmt<FW: FuncWriter>(
    func_w: &mut FW,
    w: &mut dyn Write,
    func: &Function,
    stmt: &Stmt,
    indent: usize,
) -> fmt::Result {
    write!(w, "{:indent$}", "")?;
    let name = |var: Var| func.var_name(var);
    match stmt {
        Stmt::Def { dst, decl: true, expr } => {
            let data = &func.vars[*dst];
            let mutable = if data.mutable { "mut " } else { "" };
            write!(w, "let {}{}: {} = ", mutable, data.name, data.ty)?;
            write_expr(w, func, expr)?;
        }
        Stmt::Def { dst, decl: false, expr } => {
            write!(w, "{} = ", name(*dst))?;
            write_expr(w, func, expr)?;
        }
        Stmt::Store { obj, field, val } => {
            write!(w, "store {}.{}, {}", name(*obj), field, name(*val))?
        }
        Stmt::If { branches, else_ } => {
            for (i, (cond, block)) in branches.iter().enumerate() {
                if i != 0 {
                    write!(w, " else ")?;
                }
                write!(w, "if {} ", name(*cond))?;
                write_block(func_w, w, func, block, indent)?;
            }
            write!(w, " else ")?;
            write_block(func_w, w, func, else_, indent)?;
        }
        Stmt::While { header, cond, body } => {
            write!(w, "while ")?;
            write_block(func_w, w, func, header, indent)?;
            write!(w, " -> {} ", name(*cond))?;
            write_block(func_w, w, func, body, indent)?;
        }
        Stmt::DoWhile { body, cond } => {
            write!(w, "do ")?;
            write_block(func_w, w, func, body, indent)?;
            write!(w, " while {}", name(*cond))?;
        }
        Stmt::Block(block) => write_block(func_w, w, func, block, indent)?,
        Stmt::Push { tape, val } => write!(w, "push {}, {}", tape, name(*val))?,
        Stmt::PushDecision { tape, decision } => write!(w, "push {tape}, {decision}")?,
        Stmt::Unreachable => write!(w, "unreachable")?,
        Stmt::Return(vals) => {
            write!(w, "return")?;
            for (i, val) in vals.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(w, "{}{}", sep, name(*val))?;
            }
        }
    }
    func_w.annotate(w, func, stmt)?;
    writeln!(w)
}

/// Writes a single statement of `func`, indented by `indent` spaces and followed by a newline.
pub fn write_stmt_at(w: &mut dyn Write, func: &Function, stmt: &Stmt, indent: usize) -> fmt::Result {
    write_stmt(&mut PlainWriter, w, func, stmt, indent)
}

pub fn write_expr(w: &mut dyn Write, func: &Function, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::Const(val) => write!(w, "{val}"),
        Expr::Copy(var) => write!(w, "copy {}", func.var_name(*var)),
        Expr::Load { obj, field } => write!(w, "load {}.{}", func.var_name(*obj), field),
        Expr::Op { opcode, args } => {
            write!(w, "{opcode}")?;
            write_args(w, func, args, " ")
        }
        Expr::Call { callee, args, node } => {
            write!(w, "call %{callee}(")?;
            write_args(w, func, args, "")?;
            write!(w, ")")?;
            if let Some(node) = node {
                write!(w, " [node {node}]")?;
            }
            Ok(())
        }
        Expr::Pop(tape) => write!(w, "pop {tape}"),
        Expr::TopIs(tape, decision) => write!(w, "top_is {tape}, {decision}"),
    }
}

fn write_args(w: &mut dyn Write, func: &Function, args: &[Var], first_sep: &str) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        let sep = if i == 0 { first_sep } else { ", " };
        write!(w, "{}{}", sep, func.var_name(*arg))?;
    }
    Ok(())
}
