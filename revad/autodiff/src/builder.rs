use std::mem::take;

use ir::{Block, Expr, Function, Stmt, Ty, Var};
use typed_index_collections::TiVec;

use crate::activity::Activity;
use crate::diffir::{ActiveCall, Branch, Checkpoint, DiffBlock, DiffFunction, DiffStmt, Source};
use crate::registry::Resolver;
use crate::Error;

#[cfg(test)]
mod tests;

/// Lowers `func` to DiffIR.
pub fn build_diffir(
    func: &Function,
    activity: &Activity,
    resolver: &mut Resolver,
) -> Result<DiffFunction, Error> {
    let ret = find_return(func)?;
    if func.var_ty(ret) != Ty::Real {
        return Err(Error::ReturnNotReal);
    }

    // Immutable values declared at the root of the body never change and stay
    // in scope for the entire pullback. The reverse pass can read them directly.
    let mut root_owned: TiVec<Var, bool> = vec![false; func.vars.len()].into();
    for param in &func.params {
        root_owned[*param] = true;
    }
    for stmt in &func.body.stmts {
        if let Stmt::Def { dst, decl: true, .. } = stmt {
            root_owned[*dst] = !func.vars[*dst].mutable;
        }
    }

    let mut uses = vec![0; func.vars.len()].into();
    count_uses(&func.body, &mut uses);

    let mut builder = Builder { func, activity, resolver, root_owned, uses, next_loop: -1 };
    let body = builder.block(&func.body)?;
    Ok(DiffFunction {
        input: activity.input.clone(),
        body,
        ret,
        ret_active: activity.is_active(ret),
    })
}

fn collect_returns<'a>(block: &'a Block, res: &mut Vec<&'a Stmt>) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Return(_) => res.push(stmt),
            _ => stmt.for_each_block(|block| collect_returns(block, res)),
        }
    }
}

fn find_return(func: &Function) -> Result<Var, Error> {
    let mut returns = Vec::new();
    collect_returns(&func.body, &mut returns);
    match returns[..] {
        [] => Err(Error::MissingReturn),
        [_, second, ..] => Err(Error::MultipleReturns { stmt: print_stmt(func, second) }),
        [ret] => match func.body.stmts.last() {
            Some(Stmt::Return(vals)) if vals.len() == 1 => Ok(vals[0]),
            _ => Err(Error::MisplacedReturn { stmt: print_stmt(func, ret) }),
        },
    }
}

fn print_stmt(func: &Function, stmt: &Stmt) -> String {
    let mut text = String::new();
    // writing to a String can not fail
    let _ = ir::write::write_stmt_at(&mut text, func, stmt, 0);
    text.trim().to_owned()
}

/// Counts how often each variable is read, including conditions and returns.
fn count_uses(block: &Block, uses: &mut TiVec<Var, u32>) {
    for stmt in &block.stmts {
        let mut read = |var: Var| uses[var] += 1;
        match stmt {
            Stmt::Def { expr, .. } => expr.uses().iter().for_each(|var| read(*var)),
            Stmt::Store { obj, val, .. } => {
                read(*obj);
                read(*val);
            }
            Stmt::If { branches, .. } => branches.iter().for_each(|(cond, _)| read(*cond)),
            Stmt::While { cond, .. } | Stmt::DoWhile { cond, .. } => read(*cond),
            Stmt::Push { val, .. } => read(*val),
            Stmt::Return(vals) => vals.iter().for_each(|var| read(*var)),
            Stmt::Block(_) | Stmt::PushDecision { .. } | Stmt::Unreachable => (),
        }
        stmt.for_each_block(|block| count_uses(block, uses));
    }
}

struct Builder<'a, 'r> {
    func: &'a Function,
    activity: &'a Activity,
    resolver: &'a mut Resolver<'r>,
    root_owned: TiVec<Var, bool>,
    uses: TiVec<Var, u32>,
    next_loop: i32,
}

impl Builder<'_, '_> {
    fn checkpoint(&self, var: Var, referenced: bool) -> Checkpoint {
        if !referenced {
            Checkpoint::Unused
        } else if self.root_owned[var] {
            Checkpoint::Direct
        } else {
            Checkpoint::Saved
        }
    }

    /// Whether `stmt` has no effect on derivatives.
    fn is_inert(&self, stmt: &Stmt) -> bool {
        match stmt {
            Stmt::Def { dst, decl, expr } => {
                !self.activity.is_active(*dst) || (*decl && !self.expr_active(expr))
            }
            Stmt::Push { tape, .. } => !self.activity.is_active_tape(*tape),
            _ => {
                let mut inert = true;
                stmt.for_each_block(|block| inert &= self.is_inert_block(block));
                inert
            }
        }
    }

    fn is_inert_block(&self, block: &Block) -> bool {
        block.stmts.iter().all(|stmt| self.is_inert(stmt))
    }

    fn expr_active(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Const(_) | Expr::TopIs(..) => false,
            Expr::Copy(var) => self.activity.is_active(*var),
            Expr::Load { obj, field } => self.is_seed(*obj, field),
            Expr::Op { args, .. } | Expr::Call { args, .. } => {
                args.iter().any(|arg| self.is_active_real(*arg))
            }
            Expr::Pop(tape) => self.activity.is_active_tape(*tape),
        }
    }

    fn is_active_real(&self, var: Var) -> bool {
        self.activity.is_active(var) && self.func.var_ty(var) == Ty::Real
    }

    fn is_seed(&self, obj: Var, field: &str) -> bool {
        matches!(
            &self.activity.input,
            crate::ActiveInput::Property { obj: seed, field: seed_field } if *seed == obj && seed_field == field
        )
    }

    fn block(&mut self, block: &Block) -> Result<DiffBlock, Error> {
        let mut res = DiffBlock::default();
        let mut inert = Vec::new();
        for stmt in &block.stmts {
            if let Stmt::Def { dst, decl: true, .. } = *stmt {
                if self.activity.is_active(dst) {
                    res.active_decls.push(dst);
                }
            }
            if let Stmt::Def { dst, decl: false, .. } = *stmt {
                if !self.func.vars[dst].mutable {
                    return Err(Error::ImmutableAssign { var: self.func.vars[dst].name.clone() });
                }
            }

            let lowered = self.stmt(stmt)?;
            match lowered {
                DiffStmt::Constant(stmt) => inert.push(DiffStmt::Constant(stmt)),
                stmt => {
                    flush_inert(&mut res, &mut inert);
                    res.stmts.push(stmt);
                }
            }
        }
        flush_inert(&mut res, &mut inert);
        Ok(res)
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<DiffStmt, Error> {
        if let Stmt::DoWhile { .. } = stmt {
            return Err(Error::PostConditionLoop);
        }
        if let Stmt::Return(vals) = stmt {
            return Ok(DiffStmt::Return(vals[0]));
        }
        if self.is_inert(stmt) {
            if stmt.is_control_flow() {
                // nested code may still be rejected
                self.check_inert(stmt)?;
            }
            return Ok(DiffStmt::Constant(stmt.clone()));
        }

        let lowered = match stmt {
            Stmt::Def { dst, decl, expr } => self.def(*dst, *decl, expr)?,
            Stmt::Push { tape, val } => {
                DiffStmt::TapeWrite { tape: *tape, val: *val, active: self.activity.is_active(*val) }
            }
            Stmt::If { branches, else_ } => {
                let mut lowered = Vec::with_capacity(branches.len() + 1);
                for (cond, block) in branches {
                    let index = lowered.len() as i32;
                    lowered.push(Branch { index, cond: Some(*cond), block: self.block(block)? });
                }
                let index = lowered.len() as i32;
                lowered.push(Branch { index, cond: None, block: self.block(else_)? });
                DiffStmt::Conditional(lowered)
            }
            Stmt::While { header, cond, body } => {
                self.check_inert_block(header)?;
                self.check_loop_header(header, *cond)?;
                let id = self.next_loop;
                self.next_loop -= 1;
                DiffStmt::Loop { id, header: header.clone(), cond: *cond, body: self.block(body)? }
            }
            Stmt::Block(block) => DiffStmt::Block(self.block(block)?),
            // rejected above, or always inert
            Stmt::DoWhile { .. }
            | Stmt::Return(_)
            | Stmt::Store { .. }
            | Stmt::PushDecision { .. }
            | Stmt::Unreachable => DiffStmt::Constant(stmt.clone()),
        };
        Ok(lowered)
    }

    /// Inert code is copied verbatim, but unsupported constructs are still rejected.
    fn check_inert(&self, stmt: &Stmt) -> Result<(), Error> {
        match stmt {
            Stmt::DoWhile { .. } => Err(Error::PostConditionLoop),
            Stmt::Return(_) => Err(Error::MisplacedReturn { stmt: print_stmt(self.func, stmt) }),
            Stmt::Def { dst, decl: false, .. } if !self.func.vars[*dst].mutable => {
                Err(Error::ImmutableAssign { var: self.func.vars[*dst].name.clone() })
            }
            _ => {
                let mut res = Ok(());
                stmt.for_each_block(|block| {
                    if res.is_ok() {
                        res = self.check_inert_block(block)
                    }
                });
                res
            }
        }
    }

    fn check_inert_block(&self, block: &Block) -> Result<(), Error> {
        block.stmts.iter().try_for_each(|stmt| self.check_inert(stmt))
    }

    /// A loop header is replayed verbatim in the forward section and never
    /// visited by the reverse section. Values it derives from the input may
    /// only decide whether the loop continues.
    fn check_loop_header(&self, header: &Block, cond: Var) -> Result<(), Error> {
        let mut header_uses = vec![0; self.func.vars.len()].into();
        count_uses(header, &mut header_uses);
        self.check_header_block(header, cond, &header_uses)
    }

    fn check_header_block(
        &self,
        block: &Block,
        cond: Var,
        header_uses: &TiVec<Var, u32>,
    ) -> Result<(), Error> {
        for stmt in &block.stmts {
            let var = match *stmt {
                Stmt::Def { dst, .. } if self.activity.is_active(dst) && dst != cond => {
                    (self.uses[dst] > header_uses[dst]).then_some(dst)
                }
                Stmt::Push { tape, val } if self.activity.is_active_tape(tape) => Some(val),
                _ => None,
            };
            if let Some(var) = var {
                return Err(Error::ActiveLoopHeader { var: self.func.vars[var].name.clone() });
            }
            let mut res = Ok(());
            stmt.for_each_block(|block| {
                if res.is_ok() {
                    res = self.check_header_block(block, cond, header_uses)
                }
            });
            res?;
        }
        Ok(())
    }

    fn def(&mut self, dst: Var, decl: bool, expr: &Expr) -> Result<DiffStmt, Error> {
        let lowered = match expr {
            Expr::Copy(src) => DiffStmt::Assign {
                dst,
                decl,
                src: Source::Var(*src),
                active: self.activity.is_active(*src),
            },
            Expr::Load { obj, field } => DiffStmt::Assign {
                dst,
                decl,
                src: Source::Field { obj: *obj, field: field.clone() },
                active: self.is_seed(*obj, field),
            },
            Expr::Pop(tape) => DiffStmt::Assign {
                dst,
                decl,
                src: Source::Tape(*tape),
                active: self.activity.is_active_tape(*tape),
            },
            Expr::Op { opcode, args } if self.expr_active(expr) => {
                self.active_call(dst, decl, expr, opcode.name(), args)?
            }
            Expr::Call { callee, args, .. } if self.expr_active(expr) => {
                self.active_call(dst, decl, expr, callee, args)?
            }
            // an active variable receives an inert value
            _ => DiffStmt::Constant(Stmt::Def { dst, decl, expr: expr.clone() }),
        };
        Ok(lowered)
    }

    fn active_call(
        &mut self,
        dst: Var,
        decl: bool,
        expr: &Expr,
        callee: &str,
        args: &[Var],
    ) -> Result<DiffStmt, Error> {
        let registry = self.resolver.registry;
        let id = self
            .resolver
            .resolve(expr)?
            .ok_or_else(|| Error::NoDerivativeRule { callee: callee.into() })?;
        let node = registry.node(id);
        if node.arity != args.len() {
            return Err(Error::NodeArity {
                node: node.name.clone(),
                expected: node.arity,
                found: args.len(),
            });
        }

        let active_args: Vec<_> = args.iter().map(|arg| self.is_active_real(*arg)).collect();
        let referenced = node.inputs_referenced(&active_args);
        let args = args
            .iter()
            .zip(referenced)
            .map(|(arg, referenced)| self.checkpoint(*arg, referenced))
            .collect();
        let primal = self.checkpoint(dst, node.primal_referenced(&active_args));
        log::trace!(
            "%{}: {} = %{} is differentiated by {}",
            self.func.name,
            self.func.var_name(dst),
            callee,
            node.name
        );
        Ok(DiffStmt::ActiveCall(ActiveCall {
            dst,
            decl,
            expr: expr.clone(),
            node: id,
            active_args,
            args,
            primal,
        }))
    }
}

fn flush_inert(block: &mut DiffBlock, inert: &mut Vec<DiffStmt>) {
    if !inert.is_empty() {
        block.stmts.push(DiffStmt::Block(DiffBlock {
            is_virtual: true,
            stmts: take(inert),
            active_decls: Vec::new(),
        }));
    }
}
