//! Activity analysis: which variables depend on the differentiated input.
//!
//! The analysis is flow insensitive. All statements are visited in program
//! order and every definition that reads an active value makes its
//! destination active. Visiting the whole body until nothing changes takes
//! care of loop carried dependencies and of joins after conditionals (a
//! variable is active if any of its definitions is). This may mark a variable
//! active at a point where it does not depend on the input yet, which only
//! costs an accumulator that stays zero.

use core::fmt;

use ahash::AHashSet;
use ir::{Block, Expr, Function, Stmt, Tape, TapeKind, Ty, Var};
use smol_str::SmolStr;
use typed_index_collections::TiVec;

use crate::Error;

#[cfg(test)]
mod tests;

/// Name prefix of accumulators synthesized by the pullback generator.
pub const ACCUMULATOR_PREFIX: &str = "__acc";

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ActiveInput {
    Param(Var),
    /// A real field of a record parameter, read with `load obj.field`.
    Property { obj: Var, field: SmolStr },
}

impl ActiveInput {
    pub fn display<'a>(&'a self, func: &'a Function) -> impl fmt::Display + 'a {
        DisplayInput { input: self, func }
    }
}

struct DisplayInput<'a> {
    input: &'a ActiveInput,
    func: &'a Function,
}

impl fmt::Display for DisplayInput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.input {
            ActiveInput::Param(param) => write!(f, "{}", self.func.var_name(*param)),
            ActiveInput::Property { obj, field } => {
                write!(f, "{}.{}", self.func.var_name(*obj), field)
            }
        }
    }
}

/// Recognizes pushes and pops of implicit stacks that values can travel through.
pub trait StackProbe {
    /// The stack and the value if `stmt` pushes a real value.
    fn push(&self, stmt: &Stmt) -> Option<(Tape, Var)>;
    /// The stack if `expr` pops a real value.
    fn pop(&self, expr: &Expr) -> Option<Tape>;
    /// Whether `tape` only records control flow decisions.
    fn is_decision_tape(&self, tape: Tape) -> bool;
}

/// The tapes of generated pullbacks.
pub struct BuiltinStacks;

impl StackProbe for BuiltinStacks {
    fn push(&self, stmt: &Stmt) -> Option<(Tape, Var)> {
        match *stmt {
            Stmt::Push { tape, val } if !self.is_decision_tape(tape) => Some((tape, val)),
            _ => None,
        }
    }

    fn pop(&self, expr: &Expr) -> Option<Tape> {
        match *expr {
            Expr::Pop(tape) if !self.is_decision_tape(tape) => Some(tape),
            _ => None,
        }
    }

    fn is_decision_tape(&self, tape: Tape) -> bool {
        tape.kind == TapeKind::Decisions
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Activity {
    pub input: ActiveInput,
    active: TiVec<Var, bool>,
    tapes: AHashSet<Tape>,
}

impl Activity {
    pub fn analyze(
        func: &Function,
        input: ActiveInput,
        probe: Option<&dyn StackProbe>,
    ) -> Result<Activity, Error> {
        let mut analysis = Analysis {
            func,
            probe,
            activity: Activity {
                active: vec![false; func.vars.len()].into(),
                tapes: AHashSet::default(),
                input,
            },
            changed: false,
        };
        if let ActiveInput::Param(param) = analysis.activity.input {
            analysis.activity.active[param] = true;
        }

        let mut iterations = 0;
        loop {
            analysis.changed = false;
            analysis.block(&func.body)?;
            iterations += 1;
            if !analysis.changed {
                break;
            }
        }
        log::trace!(
            "%{}: activity converged after {} iterations, {} active variables",
            func.name,
            iterations,
            analysis.activity.active.iter().filter(|active| **active).count()
        );
        Ok(analysis.activity)
    }

    pub fn is_active(&self, var: Var) -> bool {
        self.active[var]
    }

    /// Whether active values are pushed onto `tape`.
    pub fn is_active_tape(&self, tape: Tape) -> bool {
        self.tapes.contains(&tape)
    }

    pub fn active_vars(&self) -> impl Iterator<Item = Var> + '_ {
        self.active.iter_enumerated().filter(|(_, active)| **active).map(|(var, _)| var)
    }

    pub fn to_debug_string(&self, func: &Function) -> String {
        let mut res = String::new();
        for var in self.active_vars() {
            if !res.is_empty() {
                res.push(' ');
            }
            res.push_str(func.var_name(var));
        }
        let mut tapes: Vec<_> = self.tapes.iter().copied().collect();
        tapes.sort_unstable();
        for tape in tapes {
            stdx::format_to!(res, " [{}]", tape);
        }
        res
    }
}

struct Analysis<'a> {
    func: &'a Function,
    probe: Option<&'a dyn StackProbe>,
    activity: Activity,
    changed: bool,
}

impl<'a> Analysis<'a> {
    fn mark(&mut self, var: Var) {
        if !self.activity.active[var] {
            self.activity.active[var] = true;
            self.changed = true;
        }
    }

    fn probe(&self, tape: Tape) -> Result<&'a dyn StackProbe, Error> {
        self.probe.ok_or_else(|| Error::TapeOutsideProbe { tape: tape.to_string().into() })
    }

    fn is_seed(&self, obj: Var, field: &str) -> bool {
        matches!(
            &self.activity.input,
            ActiveInput::Property { obj: seed, field: seed_field } if *seed == obj && seed_field == field
        )
    }

    fn block(&mut self, block: &Block) -> Result<(), Error> {
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), Error> {
        match stmt {
            Stmt::Def { dst, expr, .. } => {
                if self.expr(*dst, expr)? {
                    self.mark(*dst)
                }
            }
            Stmt::Store { obj, field, val } => {
                if self.is_seed(*obj, field) || self.activity.active[*val] {
                    return Err(Error::ActiveRecordStore { field: field.clone() });
                }
            }
            Stmt::Push { tape, .. } => {
                let probe = self.probe(*tape)?;
                match probe.push(stmt) {
                    Some((tape, val)) => {
                        if self.activity.active[val] && self.activity.tapes.insert(tape) {
                            self.changed = true;
                        }
                    }
                    None if probe.is_decision_tape(*tape) => (),
                    None => return Err(Error::TapeOutsideProbe { tape: tape.to_string().into() }),
                }
            }
            Stmt::PushDecision { tape, .. } => {
                if !self.probe(*tape)?.is_decision_tape(*tape) {
                    return Err(Error::TapeOutsideProbe { tape: tape.to_string().into() });
                }
            }
            Stmt::If { .. } | Stmt::While { .. } | Stmt::DoWhile { .. } | Stmt::Block(_) => {
                let mut res = Ok(());
                stmt.for_each_block(|block| {
                    if res.is_ok() {
                        res = self.block(block)
                    }
                });
                res?;
            }
            Stmt::Unreachable | Stmt::Return(_) => (),
        }
        Ok(())
    }

    fn expr(&self, dst: Var, expr: &Expr) -> Result<bool, Error> {
        let data = &self.func.vars[dst];
        let active = match expr {
            Expr::Const(val) => {
                data.mutable
                    && data.ty == Ty::Real
                    && data.name.starts_with(ACCUMULATOR_PREFIX)
                    && *val == ir::Const::Real(0.0)
            }
            Expr::Copy(src) => self.activity.active[*src],
            Expr::Load { obj, field } => self.is_seed(*obj, field),
            Expr::Op { opcode, args } => {
                opcode.is_differentiable() && args.iter().any(|arg| self.activity.active[*arg])
            }
            Expr::Call { args, .. } => {
                let active_arg = args
                    .iter()
                    .any(|arg| self.activity.active[*arg] && self.func.var_ty(*arg) == Ty::Real);
                match data.ty {
                    Ty::Real => active_arg,
                    Ty::Tensor | Ty::Obj if active_arg => {
                        return Err(Error::AggregateTangent { var: data.name.clone() })
                    }
                    _ => false,
                }
            }
            Expr::Pop(tape) | Expr::TopIs(tape, _) => {
                let probe = self.probe(*tape)?;
                match probe.pop(expr) {
                    Some(tape) => data.ty == Ty::Real && self.activity.tapes.contains(&tape),
                    None if probe.is_decision_tape(*tape) => false,
                    None => return Err(Error::TapeOutsideProbe { tape: tape.to_string().into() }),
                }
            }
        };
        Ok(active)
    }
}
