//! DiffIR: a function body annotated with everything the pullback generator
//! needs. Inert code is kept verbatim, active code is split into the kinds of
//! statement that have a distinct reverse pass.

use core::fmt::{self, Write};

use ir::{Block, Expr, Function, Stmt, Tape, Var};
use smol_str::SmolStr;

use crate::activity::ActiveInput;
use crate::registry::{NodeId, Registry};

#[derive(Clone, Debug)]
pub struct DiffFunction {
    pub input: ActiveInput,
    pub body: DiffBlock,
    /// The single returned variable.
    pub ret: Var,
    /// Whether `ret` depends on the input.
    pub ret_active: bool,
}

#[derive(Clone, Debug, Default)]
pub struct DiffBlock {
    /// Virtual blocks only group inert statements. They neither open a scope
    /// nor own accumulators.
    pub is_virtual: bool,
    pub stmts: Vec<DiffStmt>,
    /// Active variables declared directly in this block (including its virtual children).
    pub active_decls: Vec<Var>,
}

#[derive(Clone, Debug)]
pub enum DiffStmt {
    /// Inert code. If it reassigns an active variable, the old adjoint is discarded.
    Constant(Stmt),
    ActiveCall(ActiveCall),
    /// `dst = src` where `dst` is active.
    Assign { dst: Var, decl: bool, src: Source, active: bool },
    /// A push onto an active implicit stack.
    TapeWrite { tape: Tape, val: Var, active: bool },
    Block(DiffBlock),
    Conditional(Vec<Branch>),
    /// `id` is negative and unique within the function.
    Loop { id: i32, header: Block, cond: Var, body: DiffBlock },
    Return(Var),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Source {
    Var(Var),
    Field { obj: Var, field: SmolStr },
    Tape(Tape),
}

#[derive(Clone, Debug)]
pub struct Branch {
    /// Non-negative index recorded on the decision stack.
    pub index: i32,
    /// `None` for the `else` branch.
    pub cond: Option<Var>,
    pub block: DiffBlock,
}

/// How the reverse pass obtains a value read by a backprop rule.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Checkpoint {
    /// Not read.
    Unused,
    /// Read from the original variable, which is immutable and in scope for the whole pullback.
    Direct,
    /// Pushed to the value stack in the forward pass.
    Saved,
}

#[derive(Clone, Debug)]
pub struct ActiveCall {
    pub dst: Var,
    pub decl: bool,
    /// The primal computation, replayed unchanged in the forward pass.
    pub expr: Expr,
    pub node: NodeId,
    pub active_args: Vec<bool>,
    /// One entry per argument.
    pub args: Vec<Checkpoint>,
    pub primal: Checkpoint,
}

impl ActiveCall {
    pub fn arg_vars(&self) -> &[Var] {
        self.expr.uses()
    }

    /// Distinct arguments that are pushed before the call, in push order.
    pub fn saved_args(&self) -> Vec<Var> {
        let mut res = Vec::new();
        for (arg, checkpoint) in self.arg_vars().iter().zip(&self.args) {
            if *checkpoint == Checkpoint::Saved && !res.contains(arg) {
                res.push(*arg)
            }
        }
        res
    }
}

impl DiffFunction {
    pub fn to_debug_string(&self, func: &Function, registry: &Registry) -> String {
        let mut res = String::new();
        let mut printer = Printer { func, registry, w: &mut res };
        // writing to a String can not fail
        let _ = printer.block(&self.body, 0);
        res
    }
}

struct Printer<'a> {
    func: &'a Function,
    registry: &'a Registry,
    w: &'a mut String,
}

impl<'a> Printer<'a> {
    fn name(&self, var: Var) -> &'a str {
        self.func.var_name(var)
    }

    fn names(&self, vars: &[Var]) -> String {
        vars.iter().map(|var| self.name(*var)).collect::<Vec<_>>().join(", ")
    }

    fn block(&mut self, block: &DiffBlock, indent: usize) -> fmt::Result {
        let kind = if block.is_virtual { "virtual" } else { "block" };
        write!(self.w, "{kind}")?;
        if !block.active_decls.is_empty() {
            let decls = self.names(&block.active_decls);
            write!(self.w, " [{decls}]")?;
        }
        writeln!(self.w, " {{")?;
        for stmt in &block.stmts {
            write!(self.w, "{:1$}", "", indent + 4)?;
            self.stmt(stmt, indent + 4)?;
            writeln!(self.w)?;
        }
        write!(self.w, "{:indent$}}}", "")
    }

    fn stmt(&mut self, stmt: &DiffStmt, indent: usize) -> fmt::Result {
        match stmt {
            DiffStmt::Constant(stmt) => {
                let mut text = String::new();
                ir::write::write_stmt_at(&mut text, self.func, stmt, indent)?;
                write!(self.w, "const {}", text.trim())
            }
            DiffStmt::ActiveCall(call) => {
                let node = &self.registry.node(call.node).name;
                write!(self.w, "call {} = ", self.name(call.dst))?;
                ir::write::write_expr(self.w, self.func, &call.expr)?;
                write!(self.w, " [{node}; active")?;
                for (arg, active) in call.arg_vars().iter().zip(&call.active_args) {
                    if *active {
                        write!(self.w, " {}", self.name(*arg))?;
                    }
                }
                let saved = call.saved_args();
                if !saved.is_empty() {
                    let saved = self.names(&saved);
                    write!(self.w, "; saved {saved}")?;
                }
                let primal = match call.primal {
                    Checkpoint::Unused => "",
                    Checkpoint::Direct => "; primal",
                    Checkpoint::Saved => "; saved primal",
                };
                write!(self.w, "{primal}]")
            }
            DiffStmt::Assign { dst, src, active, .. } => {
                write!(self.w, "assign {} = ", self.name(*dst))?;
                match src {
                    Source::Var(var) => write!(self.w, "{}", self.name(*var))?,
                    Source::Field { obj, field } => write!(self.w, "{}.{}", self.name(*obj), field)?,
                    Source::Tape(tape) => write!(self.w, "pop {tape}")?,
                }
                if !active {
                    write!(self.w, " [inert]")?;
                }
                Ok(())
            }
            DiffStmt::TapeWrite { tape, val, active } => {
                write!(self.w, "write {tape}, {}", self.name(*val))?;
                if !active {
                    write!(self.w, " [inert]")?;
                }
                Ok(())
            }
            DiffStmt::Block(block) => self.block(block, indent),
            DiffStmt::Conditional(branches) => {
                for (i, branch) in branches.iter().enumerate() {
                    if i != 0 {
                        write!(self.w, " ")?;
                    }
                    match branch.cond {
                        Some(cond) => write!(self.w, "if {} #{} ", self.name(cond), branch.index)?,
                        None => write!(self.w, "else #{} ", branch.index)?,
                    }
                    self.block(&branch.block, indent)?;
                }
                Ok(())
            }
            DiffStmt::Loop { id, cond, body, .. } => {
                write!(self.w, "loop #{} while {} ", id, self.name(*cond))?;
                self.block(body, indent)
            }
            DiffStmt::Return(var) => write!(self.w, "return {}", self.name(*var)),
        }
    }
}
