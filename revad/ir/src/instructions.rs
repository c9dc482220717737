use std::str::FromStr;

use smol_str::SmolStr;
use stdx::impl_display;

use crate::{Tape, Var};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Ty {
    /// The differentiable scalar.
    Real,
    Int,
    Bool,
    /// Opaque record with named fields.
    Obj,
    /// Aggregate value, never differentiable.
    Tensor,
}

impl_display! {
    match Ty{
        Ty::Real => "real";
        Ty::Int => "int";
        Ty::Bool => "bool";
        Ty::Obj => "obj";
        Ty::Tensor => "tensor";
    }
}

impl FromStr for Ty {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s {
            "real" => Ty::Real,
            "int" => Ty::Int,
            "bool" => Ty::Bool,
            "obj" => Ty::Obj,
            "tensor" => Ty::Tensor,
            _ => return Err(()),
        };
        Ok(ty)
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Const {
    Real(f64),
    Int(i32),
    Bool(bool),
}

impl Const {
    pub fn ty(self) -> Ty {
        match self {
            Const::Real(_) => Ty::Real,
            Const::Int(_) => Ty::Int,
            Const::Bool(_) => Ty::Bool,
        }
    }
}

impl_display! {
    match Const{
        Const::Real(val) => "fconst {:?}", val;
        Const::Int(val) => "iconst {}", val;
        Const::Bool(val) => "bconst {}", val;
    }
}

macro_rules! opcodes {
    ($($variant:ident = $name:literal ($($arg:ident),*) -> $res:ident;)*) => {
        /// Primitive operations. All operands of an opcode share one type.
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
        pub enum Opcode {
            $($variant),*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name),*
                }
            }

            pub fn params(self) -> &'static [Ty] {
                match self {
                    $(Opcode::$variant => &[$(Ty::$arg),*]),*
                }
            }

            pub fn result(self) -> Ty {
                match self {
                    $(Opcode::$variant => Ty::$res),*
                }
            }
        }

        impl FromStr for Opcode {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Opcode::$variant),)*
                    _ => Err(()),
                }
            }
        }
    };
}

opcodes! {
    Fneg = "fneg"(Real) -> Real;
    Fadd = "fadd"(Real, Real) -> Real;
    Fsub = "fsub"(Real, Real) -> Real;
    Fmul = "fmul"(Real, Real) -> Real;
    Fdiv = "fdiv"(Real, Real) -> Real;
    Sin = "sin"(Real) -> Real;
    Cos = "cos"(Real) -> Real;
    Tan = "tan"(Real) -> Real;
    Exp = "exp"(Real) -> Real;
    Ln = "ln"(Real) -> Real;
    Sqrt = "sqrt"(Real) -> Real;
    Pow = "pow"(Real, Real) -> Real;
    Tanh = "tanh"(Real) -> Real;
    Iadd = "iadd"(Int, Int) -> Int;
    Isub = "isub"(Int, Int) -> Int;
    Imul = "imul"(Int, Int) -> Int;
    Ineg = "ineg"(Int) -> Int;
    Flt = "flt"(Real, Real) -> Bool;
    Fgt = "fgt"(Real, Real) -> Bool;
    Fle = "fle"(Real, Real) -> Bool;
    Fge = "fge"(Real, Real) -> Bool;
    Feq = "feq"(Real, Real) -> Bool;
    Fne = "fne"(Real, Real) -> Bool;
    Ilt = "ilt"(Int, Int) -> Bool;
    Igt = "igt"(Int, Int) -> Bool;
    Ile = "ile"(Int, Int) -> Bool;
    Ige = "ige"(Int, Int) -> Bool;
    Ieq = "ieq"(Int, Int) -> Bool;
    Ine = "ine"(Int, Int) -> Bool;
    Bnot = "bnot"(Bool) -> Bool;
    IFcast = "ifcast"(Int) -> Real;
}

impl Opcode {
    /// Whether this opcode maps reals to a real and therefore can propagate derivatives.
    pub fn is_differentiable(self) -> bool {
        self.result() == Ty::Real && self.params().iter().all(|ty| *ty == Ty::Real)
    }

    pub fn arity(self) -> usize {
        self.params().len()
    }
}

impl_display!(op @ Opcode => "{}", op.name());

#[derive(Clone, PartialEq, Debug)]
pub enum Expr {
    Const(Const),
    Copy(Var),
    Load { obj: Var, field: SmolStr },
    Op { opcode: Opcode, args: Vec<Var> },
    /// Call to an operation that is not part of the function.
    /// `node` is an optional call-site link to a derivative rule.
    Call { callee: SmolStr, args: Vec<Var>, node: Option<SmolStr> },
    Pop(Tape),
    /// `true` if the tape is not empty and its top equals the given decision.
    TopIs(Tape, i32),
}

impl Expr {
    /// Variables read by this expression.
    pub fn uses(&self) -> &[Var] {
        match self {
            Expr::Copy(var) | Expr::Load { obj: var, .. } => std::slice::from_ref(var),
            Expr::Op { args, .. } | Expr::Call { args, .. } => args,
            Expr::Const(_) | Expr::Pop(_) | Expr::TopIs(..) => &[],
        }
    }

    /// A copy of this expression with every variable replaced by `f(var)`.
    pub fn map_vars(&self, mut f: impl FnMut(Var) -> Var) -> Expr {
        match self {
            Expr::Copy(var) => Expr::Copy(f(*var)),
            Expr::Load { obj, field } => Expr::Load { obj: f(*obj), field: field.clone() },
            Expr::Op { opcode, args } => {
                Expr::Op { opcode: *opcode, args: args.iter().map(|arg| f(*arg)).collect() }
            }
            Expr::Call { callee, args, node } => Expr::Call {
                callee: callee.clone(),
                args: args.iter().map(|arg| f(*arg)).collect(),
                node: node.clone(),
            },
            Expr::Const(_) | Expr::Pop(_) | Expr::TopIs(..) => self.clone(),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Block {
        Block { stmts }
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum Stmt {
    /// `let dst = expr` if `decl` is set, `dst = expr` otherwise.
    Def { dst: Var, decl: bool, expr: Expr },
    Store { obj: Var, field: SmolStr, val: Var },
    /// Guarded blocks tried in order, followed by an explicit `else`.
    If { branches: Vec<(Var, Block)>, else_: Block },
    /// Runs `header`, then `body` as long as `cond` holds.
    While { header: Block, cond: Var, body: Block },
    DoWhile { body: Block, cond: Var },
    Block(Block),
    Push { tape: Tape, val: Var },
    PushDecision { tape: Tape, decision: i32 },
    Unreachable,
    Return(Vec<Var>),
}

impl Stmt {
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Stmt::If { .. } | Stmt::While { .. } | Stmt::DoWhile { .. } | Stmt::Block(_)
        )
    }

    /// Calls `f` for every block nested directly inside this statement.
    pub fn for_each_block<'a>(&'a self, mut f: impl FnMut(&'a Block)) {
        match self {
            Stmt::If { branches, else_ } => {
                for (_, block) in branches {
                    f(block)
                }
                f(else_)
            }
            Stmt::While { header, body, .. } => {
                f(header);
                f(body)
            }
            Stmt::DoWhile { body, .. } => f(body),
            Stmt::Block(block) => f(block),
            _ => (),
        }
    }
}
