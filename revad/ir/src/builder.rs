use std::mem::take;

use ahash::AHashSet;
use smol_str::SmolStr;

use crate::{Block, Const, Expr, Function, Opcode, Stmt, Tape, Ty, Var, VarData};

/// Words that start a statement or expression and can not be used as variable names.
pub const KEYWORDS: &[&str] = &[
    "let",
    "mut",
    "if",
    "else",
    "while",
    "do",
    "store",
    "push",
    "pop",
    "unreachable",
    "return",
    "function",
    "true",
    "false",
];

/// Hands out variable names that are unique within one function.
#[derive(Clone, Default, Debug)]
pub struct NameGen {
    used: AHashSet<SmolStr>,
}

impl NameGen {
    pub fn new(func: &Function) -> NameGen {
        NameGen { used: func.vars.iter().map(|var| var.name.clone()).collect() }
    }

    /// Returns `base` if it is still unused and `base_N` for the smallest free `N` otherwise.
    pub fn fresh(&mut self, base: &str) -> SmolStr {
        if !KEYWORDS.contains(&base) && self.used.insert(base.into()) {
            return base.into();
        }
        let mut i = 1u32;
        loop {
            let candidate = SmolStr::from(format!("{base}_{i}"));
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            i += 1;
        }
    }
}

/// Incrementally builds a [`Function`] body with nested blocks.
pub struct FunctionBuilder {
    pub func: Function,
    pub names: NameGen,
    current: Vec<Stmt>,
    parents: Vec<Vec<Stmt>>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<SmolStr>) -> FunctionBuilder {
        FunctionBuilder {
            func: Function::new(name),
            names: NameGen::default(),
            current: Vec::new(),
            parents: Vec::new(),
        }
    }

    /// Starts a new function that shares the variable table of `template`.
    ///
    /// Statements of `template` can be copied into the new body unchanged.
    pub fn with_vars_of(name: impl Into<SmolStr>, template: &Function) -> FunctionBuilder {
        let mut builder = FunctionBuilder::new(name);
        builder.func.vars = template.vars.clone();
        builder.names = NameGen::new(template);
        builder
    }

    pub fn declare(&mut self, name: &str, ty: Ty, mutable: bool) -> Var {
        let name = self.names.fresh(name);
        self.func.vars.push_and_get_key(VarData { name, ty, mutable })
    }

    pub fn param(&mut self, name: &str, ty: Ty) -> Var {
        let var = self.declare(name, ty, false);
        self.func.params.push(var);
        var
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.current.push(stmt)
    }

    pub fn open_block(&mut self) {
        let parent = take(&mut self.current);
        self.parents.push(parent);
    }

    pub fn close_block(&mut self) -> Block {
        let parent = self.parents.pop().unwrap_or_default();
        Block::new(std::mem::replace(&mut self.current, parent))
    }

    pub fn def(&mut self, name: &str, ty: Ty, expr: Expr) -> Var {
        let dst = self.declare(name, ty, false);
        self.push(Stmt::Def { dst, decl: true, expr });
        dst
    }

    pub fn def_mut(&mut self, name: &str, ty: Ty, expr: Expr) -> Var {
        let dst = self.declare(name, ty, true);
        self.push(Stmt::Def { dst, decl: true, expr });
        dst
    }

    pub fn assign(&mut self, dst: Var, expr: Expr) {
        self.push(Stmt::Def { dst, decl: false, expr })
    }

    pub fn op(&mut self, name: &str, opcode: Opcode, args: &[Var]) -> Var {
        self.def(name, opcode.result(), Expr::Op { opcode, args: args.to_vec() })
    }

    pub fn fconst(&mut self, name: &str, val: f64) -> Var {
        self.def(name, Ty::Real, Expr::Const(Const::Real(val)))
    }

    pub fn iconst(&mut self, name: &str, val: i32) -> Var {
        self.def(name, Ty::Int, Expr::Const(Const::Int(val)))
    }

    pub fn push_value(&mut self, tape: Tape, val: Var) {
        self.push(Stmt::Push { tape, val })
    }

    pub fn push_decision(&mut self, tape: Tape, decision: i32) {
        self.push(Stmt::PushDecision { tape, decision })
    }

    pub fn ret(&mut self, vals: Vec<Var>) {
        self.push(Stmt::Return(vals))
    }

    pub fn finish(mut self, returns: Vec<Ty>) -> Function {
        debug_assert!(self.parents.is_empty(), "unclosed block");
        self.func.returns = returns;
        self.func.body = Block::new(self.current);
        self.func
    }
}
