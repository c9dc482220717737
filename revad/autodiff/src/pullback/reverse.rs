use ir::{Expr, Opcode, Stmt, Ty, Var};

use crate::diffir::{ActiveCall, Checkpoint, DiffBlock, DiffStmt, Source};
use crate::Error;

use super::Generator;

impl Generator<'_> {
    fn acc(&self, var: Var) -> Result<Var, Error> {
        self.scopes
            .get(var)
            .ok_or_else(|| Error::UnscopedAdjoint { var: self.func.var_name(var).into() })
    }

    fn reset(&mut self, acc: Var) {
        let zero = self.zero_expr();
        self.builder.assign(acc, zero)
    }

    fn fold(&mut self, acc: Var, contribution: Var, pushback: Opcode) {
        self.builder.assign(acc, Expr::Op { opcode: pushback, args: vec![acc, contribution] })
    }

    fn add_to(&mut self, var: Var, contribution: Var) -> Result<(), Error> {
        let acc = self.acc(var)?;
        self.fold(acc, contribution, Opcode::Fadd);
        Ok(())
    }

    pub(super) fn reverse_stmts(&mut self, stmts: &[DiffStmt]) -> Result<(), Error> {
        for stmt in stmts.iter().rev() {
            self.reverse_stmt(stmt)?;
        }
        Ok(())
    }

    /// Emits the reverse code of a real block into a new block, declaring the
    /// accumulators of the block first. Loop bodies start by popping their iteration.
    fn reverse_scope(&mut self, block: &DiffBlock, iteration: bool) -> Result<ir::Block, Error> {
        let func = self.func;
        self.builder.open_block();
        if iteration {
            self.builder.def("iteration", Ty::Int, Expr::Pop(self.id.decisions()));
        }
        self.scopes.enter();
        for var in &block.active_decls {
            let init = self.zero_expr();
            let acc = self.declare_acc(func.var_name(*var), init);
            self.scopes.insert(*var, acc);
        }
        self.reverse_stmts(&block.stmts)?;
        self.scopes.exit();
        Ok(self.builder.close_block())
    }

    fn reverse_stmt(&mut self, stmt: &DiffStmt) -> Result<(), Error> {
        match stmt {
            DiffStmt::Constant(Stmt::Def { dst, decl: false, .. }) => {
                // the previous value is dead and so is its adjoint
                if let Some(acc) = self.scopes.get(*dst) {
                    self.reset(acc)
                }
            }
            DiffStmt::Constant(_) | DiffStmt::Return(_) => (),
            DiffStmt::ActiveCall(call) => self.reverse_call(call)?,
            DiffStmt::Assign { dst, decl, src, active } => {
                let acc = self.acc(*dst)?;
                match src {
                    _ if !active => {
                        if !decl {
                            self.reset(acc)
                        }
                        return Ok(());
                    }
                    Source::Var(src) if src == dst => return Ok(()),
                    Source::Var(src) => self.add_to(*src, acc)?,
                    Source::Field { .. } => {
                        let prop = self.property_acc.ok_or_else(|| Error::UnscopedAdjoint {
                            var: self.func.var_name(*dst).into(),
                        })?;
                        self.fold(prop, acc, Opcode::Fadd);
                    }
                    Source::Tape(_) => self.builder.push_value(self.id.adjoints(), acc),
                }
                self.reset(acc);
            }
            DiffStmt::TapeWrite { val, active, .. } => {
                let adjoint = self.builder.def("adjoint", Ty::Real, Expr::Pop(self.id.adjoints()));
                if *active {
                    self.add_to(*val, adjoint)?;
                }
            }
            DiffStmt::Block(block) if block.is_virtual => self.reverse_stmts(&block.stmts)?,
            DiffStmt::Block(block) => {
                let block = self.reverse_scope(block, false)?;
                self.builder.push(Stmt::Block(block))
            }
            DiffStmt::Conditional(branches) => {
                let taken = self.builder.def("branch", Ty::Int, Expr::Pop(self.id.decisions()));
                let mut conds = Vec::with_capacity(branches.len());
                for branch in branches {
                    let index = self.builder.iconst("index", branch.index);
                    conds.push(self.builder.op("is_taken", Opcode::Ieq, &[taken, index]));
                }
                let mut guarded = Vec::with_capacity(branches.len());
                for (branch, cond) in branches.iter().zip(conds) {
                    guarded.push((cond, self.reverse_scope(&branch.block, false)?));
                }
                // the decision tape always holds one of the indices above
                let else_ = ir::Block::new(vec![Stmt::Unreachable]);
                self.builder.push(Stmt::If { branches: guarded, else_ })
            }
            DiffStmt::Loop { id, body, .. } => {
                self.builder.open_block();
                let cond =
                    self.builder.def("repeat", Ty::Bool, Expr::TopIs(self.id.decisions(), *id));
                let header = self.builder.close_block();
                let body = self.reverse_scope(body, true)?;
                self.builder.push(Stmt::While { header, cond, body })
            }
        }
        Ok(())
    }

    fn reverse_call(&mut self, call: &ActiveCall) -> Result<(), Error> {
        let func = self.func;
        let node = self.registry.node(call.node);
        let values = self.id.values();
        let name = func.var_name(call.dst);

        let acc = self.acc(call.dst)?;
        let upstream = if call.decl {
            acc
        } else {
            // contributions to the previous value of `dst` must not see this adjoint
            let upstream = self.builder.def(&format!("{name}_adjoint"), Ty::Real, Expr::Copy(acc));
            self.reset(acc);
            upstream
        };

        // pop in the reverse order of the forward pushes
        let primal = match call.primal {
            Checkpoint::Saved => {
                self.builder.def(&format!("{name}_saved"), Ty::Real, Expr::Pop(values))
            }
            Checkpoint::Direct | Checkpoint::Unused => call.dst,
        };
        let mut inputs = call.arg_vars().to_vec();
        for arg in call.saved_args().into_iter().rev() {
            let saved_name = format!("{}_saved", func.var_name(arg));
            let saved = self.builder.def(&saved_name, Ty::Real, Expr::Pop(values));
            for (input, checkpoint) in inputs.iter_mut().zip(&call.args) {
                if *input == arg && *checkpoint == Checkpoint::Saved {
                    *input = saved;
                }
            }
        }

        for (i, arg) in call.arg_vars().iter().enumerate() {
            if call.active_args[i] {
                let contribution =
                    node.backprop[i].instantiate(&mut self.builder, upstream, &inputs, primal);
                let acc = self.acc(*arg)?;
                self.fold(acc, contribution, node.pushback);
            }
        }
        Ok(())
    }
}
