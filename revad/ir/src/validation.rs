use smol_str::SmolStr;
use stdx::impl_display;
use typed_index_collections::TiVec;

use crate::{Block, Expr, Function, Stmt, TapeKind, Ty, Var};


#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ValidationError {
    UndefinedVar { var: SmolStr },
    Redeclared { var: SmolStr },
    ImmutableAssign { var: SmolStr },
    TypeMismatch { var: SmolStr, expected: Ty, found: Ty },
    Arity { what: SmolStr, expected: usize, found: usize },
    InvalidTape { tape: SmolStr },
    ReturnMismatch { expected: usize, found: usize },
}

impl_display! {
    match ValidationError{
        ValidationError::UndefinedVar{var} => "use of undeclared variable '{}'", var;
        ValidationError::Redeclared{var} => "variable '{}' is declared twice", var;
        ValidationError::ImmutableAssign{var} => "cannot assign twice to immutable variable '{}'", var;
        ValidationError::TypeMismatch{var, expected, found} => "'{}' has type {} but {} was expected", var, found, expected;
        ValidationError::Arity{what, expected, found} => "'{}' expects {} arguments but {} were supplied", what, expected, found;
        ValidationError::InvalidTape{tape} => "invalid use of tape '{}'", tape;
        ValidationError::ReturnMismatch{expected, found} => "function returns {} values but {} were supplied", expected, found;
    }
}

impl std::error::Error for ValidationError {}

impl Function {
    /// Checks scoping, mutability and operand types of the whole body.
    /// All violations are reported, not just the first.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut validator = Validator {
            func: self,
            declared: TiVec::from(vec![false; self.vars.len()]),
            in_scope: TiVec::from(vec![false; self.vars.len()]),
            frames: Vec::new(),
            errors: Vec::new(),
        };
        validator.frames.push(Vec::new());
        for &param in &self.params {
            validator.declare(param);
        }
        validator.block(&self.body);
        if validator.errors.is_empty() {
            Ok(())
        } else {
            Err(validator.errors)
        }
    }
}

struct Validator<'a> {
    func: &'a Function,
    declared: TiVec<Var, bool>,
    in_scope: TiVec<Var, bool>,
    frames: Vec<Vec<Var>>,
    errors: Vec<ValidationError>,
}

impl Validator<'_> {
    fn name(&self, var: Var) -> SmolStr {
        self.func.vars[var].name.clone()
    }

    fn declare(&mut self, var: Var) {
        if self.declared[var] {
            self.errors.push(ValidationError::Redeclared { var: self.name(var) });
        }
        self.declared[var] = true;
        self.in_scope[var] = true;
        if let Some(frame) = self.frames.last_mut() {
            frame.push(var)
        }
    }

    fn open(&mut self) {
        self.frames.push(Vec::new())
    }

    fn close(&mut self) {
        for var in self.frames.pop().unwrap_or_default() {
            self.in_scope[var] = false;
        }
    }

    fn use_var(&mut self, var: Var, expected: Option<Ty>) {
        if !self.in_scope[var] {
            self.errors.push(ValidationError::UndefinedVar { var: self.name(var) });
        }
        if let Some(expected) = expected {
            self.expect_ty(var, expected)
        }
    }

    fn expect_ty(&mut self, var: Var, expected: Ty) {
        let found = self.func.vars[var].ty;
        if found != expected {
            self.errors.push(ValidationError::TypeMismatch { var: self.name(var), expected, found })
        }
    }

    fn block(&mut self, block: &Block) {
        self.open();
        self.stmts(block);
        self.close();
    }

    fn stmts(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.stmt(stmt)
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match *stmt {
            Stmt::Def { dst, decl, ref expr } => {
                self.expr(dst, expr);
                if decl {
                    self.declare(dst)
                } else {
                    self.use_var(dst, None);
                    if !self.func.vars[dst].mutable {
                        self.errors.push(ValidationError::ImmutableAssign { var: self.name(dst) })
                    }
                }
            }
            Stmt::Store { obj, val, .. } => {
                self.use_var(obj, Some(Ty::Obj));
                self.use_var(val, None);
            }
            Stmt::If { ref branches, ref else_ } => {
                for (cond, block) in branches {
                    self.use_var(*cond, Some(Ty::Bool));
                    self.block(block);
                }
                self.block(else_);
            }
            Stmt::While { ref header, cond, ref body } => {
                self.open();
                self.stmts(header);
                self.use_var(cond, Some(Ty::Bool));
                self.block(body);
                self.close();
            }
            Stmt::DoWhile { ref body, cond } => {
                self.open();
                self.stmts(body);
                self.use_var(cond, Some(Ty::Bool));
                self.close();
            }
            Stmt::Block(ref block) => self.block(block),
            Stmt::Push { tape, val } => {
                if tape.kind == TapeKind::Decisions {
                    self.errors.push(ValidationError::InvalidTape { tape: tape.to_string().into() })
                }
                self.use_var(val, Some(Ty::Real));
            }
            Stmt::PushDecision { tape, .. } => {
                if tape.kind != TapeKind::Decisions {
                    self.errors.push(ValidationError::InvalidTape { tape: tape.to_string().into() })
                }
            }
            Stmt::Unreachable => (),
            Stmt::Return(ref vals) => {
                if vals.len() != self.func.returns.len() {
                    self.errors.push(ValidationError::ReturnMismatch {
                        expected: self.func.returns.len(),
                        found: vals.len(),
                    })
                }
                for (&val, &ty) in vals.iter().zip(&self.func.returns) {
                    self.use_var(val, Some(ty))
                }
            }
        }
    }

    fn expr(&mut self, dst: Var, expr: &Expr) {
        match *expr {
            Expr::Const(val) => self.expect_ty(dst, val.ty()),
            Expr::Copy(src) => {
                let ty = self.func.vars[dst].ty;
                self.use_var(src, Some(ty))
            }
            Expr::Load { obj, .. } => self.use_var(obj, Some(Ty::Obj)),
            Expr::Op { opcode, ref args } => {
                if args.len() != opcode.arity() {
                    self.errors.push(ValidationError::Arity {
                        what: opcode.name().into(),
                        expected: opcode.arity(),
                        found: args.len(),
                    });
                }
                for (&arg, &ty) in args.iter().zip(opcode.params()) {
                    self.use_var(arg, Some(ty))
                }
                self.expect_ty(dst, opcode.result());
            }
            Expr::Call { ref args, .. } => {
                for &arg in args {
                    self.use_var(arg, None)
                }
            }
            Expr::Pop(tape) => {
                let ty = if tape.kind == TapeKind::Decisions { Ty::Int } else { Ty::Real };
                self.expect_ty(dst, ty)
            }
            Expr::TopIs(tape, _) => {
                if tape.kind != TapeKind::Decisions {
                    self.errors.push(ValidationError::InvalidTape { tape: tape.to_string().into() })
                }
                self.expect_ty(dst, Ty::Bool)
            }
        }
    }
}
