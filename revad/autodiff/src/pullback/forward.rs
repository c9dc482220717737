use ir::{Expr, Stmt};

use crate::diffir::{Checkpoint, DiffBlock, DiffStmt, Source};

use super::Generator;

impl Generator<'_> {
    pub(super) fn forward_stmts(&mut self, stmts: &[DiffStmt]) {
        for stmt in stmts {
            self.forward_stmt(stmt)
        }
    }

    /// Emits the contents of `block` into a new block.
    fn forward_scope(&mut self, block: &DiffBlock, decision: Option<i32>) -> ir::Block {
        self.builder.open_block();
        self.forward_stmts(&block.stmts);
        if let Some(decision) = decision {
            self.builder.push_decision(self.id.decisions(), decision);
        }
        self.builder.close_block()
    }

    fn forward_stmt(&mut self, stmt: &DiffStmt) {
        let values = self.id.values();
        match stmt {
            DiffStmt::Constant(stmt) => self.builder.push(stmt.clone()),
            DiffStmt::ActiveCall(call) => {
                for arg in call.saved_args() {
                    self.builder.push_value(values, arg);
                }
                self.builder.push(Stmt::Def { dst: call.dst, decl: call.decl, expr: call.expr.clone() });
                if call.primal == Checkpoint::Saved {
                    self.builder.push_value(values, call.dst);
                }
            }
            DiffStmt::Assign { dst, decl, src, .. } => {
                let expr = match src {
                    Source::Var(var) => Expr::Copy(*var),
                    Source::Field { obj, field } => Expr::Load { obj: *obj, field: field.clone() },
                    Source::Tape(tape) => Expr::Pop(*tape),
                };
                self.builder.push(Stmt::Def { dst: *dst, decl: *decl, expr })
            }
            DiffStmt::TapeWrite { tape, val, .. } => self.builder.push_value(*tape, *val),
            DiffStmt::Block(block) if block.is_virtual => self.forward_stmts(&block.stmts),
            DiffStmt::Block(block) => {
                let block = self.forward_scope(block, None);
                self.builder.push(Stmt::Block(block))
            }
            DiffStmt::Conditional(branches) => {
                let mut guarded = Vec::with_capacity(branches.len());
                let mut else_ = ir::Block::default();
                for branch in branches {
                    let block = self.forward_scope(&branch.block, Some(branch.index));
                    match branch.cond {
                        Some(cond) => guarded.push((cond, block)),
                        None => else_ = block,
                    }
                }
                self.builder.push(Stmt::If { branches: guarded, else_ })
            }
            DiffStmt::Loop { id, header, cond, body } => {
                log::trace!("loop {} records its iterations on {}", id, self.id.decisions());
                let body = self.forward_scope(body, Some(*id));
                self.builder.push(Stmt::While { header: header.clone(), cond: *cond, body })
            }
            DiffStmt::Return(_) => (),
        }
    }
}
