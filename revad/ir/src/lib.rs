//! The structured function language differentiated by `autodiff`.
//!
//! Function bodies are already normalized by the front-end: every operand is a
//! variable (three-address form), every conditional has an explicit `else`
//! and loops have a canonical pre-condition shape. Generated pullbacks are
//! expressed in the same language, so they can be printed, interpreted and
//! differentiated again.

mod builder;
mod entities;
mod instructions;
mod validation;

pub mod write;

use core::fmt;

use smol_str::SmolStr;
use typed_index_collections::TiVec;

pub use crate::builder::{FunctionBuilder, NameGen, KEYWORDS};
pub use crate::entities::{Tape, TapeKind, Var};
pub use crate::instructions::{Block, Const, Expr, Opcode, Stmt, Ty};
pub use crate::validation::ValidationError;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VarData {
    pub name: SmolStr,
    pub ty: Ty,
    pub mutable: bool,
}

/// `@name(args..)` in front of a function.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Attr {
    pub name: SmolStr,
    pub args: Vec<SmolStr>,
}

#[derive(Clone, Default, PartialEq)]
pub struct Function {
    pub name: SmolStr,
    pub attrs: Vec<Attr>,
    pub params: Vec<Var>,
    pub returns: Vec<Ty>,
    pub vars: TiVec<Var, VarData>,
    pub body: Block,
}

impl Function {
    pub fn new(name: impl Into<SmolStr>) -> Function {
        Function { name: name.into(), ..Function::default() }
    }

    pub fn var_name(&self, var: Var) -> &str {
        &self.vars[var].name
    }

    pub fn var_ty(&self, var: Var) -> Ty {
        self.vars[var].ty
    }

    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|attr| attr.name == name)
    }

    pub fn param_by_name(&self, name: &str) -> Option<Var> {
        self.params.iter().copied().find(|&param| self.vars[param].name == name)
    }

    pub fn to_debug_string(&self) -> String {
        format!("{:?}", self)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write::write_function(fmt, self)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write::write_function(fmt, self)
    }
}
