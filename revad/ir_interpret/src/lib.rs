//! A reference interpreter for `ir` functions.
//!
//! Besides plain evaluation it keeps per-tape statistics, so tests can check
//! that a pullback leaves every tape balanced, and it can record a dynamic
//! derivative graph (see [`gradient`]) that serves as numeric ground truth and
//! as the fallback for functions that can not be transformed ahead of time.

use ahash::AHashMap;
use ir::{Block, Expr, Function, Opcode, Stmt, Tape, Ty, Var};
use smol_str::SmolStr;
use stdx::impl_display;
use typed_index_collections::TiVec;

pub use crate::data::{Data, Heap};
pub use crate::tape::{gradient, local_partials, Gradient, Wrt};

use crate::tape::{Graph, Node};

mod data;
mod tape;

#[cfg(test)]
mod tests;

#[derive(Clone, PartialEq, Debug)]
pub enum InterpretError {
    Unreachable,
    EmptyTape(Tape),
    UndefinedVar(SmolStr),
    TypeConfusion { expected: Ty, found: Ty },
    InvalidObject(u32),
    UnknownField { field: SmolStr },
    UnknownExtern(SmolStr),
    NotDifferentiable(SmolStr),
    Arity { expected: usize, found: usize },
    MissingReturn,
    StepLimit,
}

impl_display! {
    match InterpretError{
        InterpretError::Unreachable => "reached an unreachable statement";
        InterpretError::EmptyTape(tape) => "pop from empty tape {}", tape;
        InterpretError::UndefinedVar(name) => "read of undefined variable '{}'", name;
        InterpretError::TypeConfusion{expected, found} => "expected a value of type {} but found {}", expected, found;
        InterpretError::InvalidObject(handle) => "invalid object handle obj{}", handle;
        InterpretError::UnknownField{field} => "record has no field '{}'", field;
        InterpretError::UnknownExtern(name) => "call to unknown operation %{}", name;
        InterpretError::NotDifferentiable(name) => "no partial derivatives are known for %{}", name;
        InterpretError::Arity{expected, found} => "expected {} arguments but found {}", expected, found;
        InterpretError::MissingReturn => "function finished without returning";
        InterpretError::StepLimit => "loop iteration limit exceeded";
    }
}

impl std::error::Error for InterpretError {}

/// Operations called by a function that are not part of the function itself.
pub trait Externs {
    fn call(&mut self, name: &str, args: &[Data], heap: &mut Heap) -> Result<Data, InterpretError>;

    /// Partial derivatives of a real valued call with respect to each argument.
    fn partials(&mut self, _name: &str, _args: &[Data]) -> Option<Vec<f64>> {
        None
    }
}

pub struct NoExterns;

impl Externs for NoExterns {
    fn call(&mut self, name: &str, _args: &[Data], _heap: &mut Heap) -> Result<Data, InterpretError> {
        Err(InterpretError::UnknownExtern(name.into()))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TapeStats {
    pub pushes: u32,
    pub pops: u32,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Slot {
    pub data: Data,
    pub node: Option<Node>,
}

impl Slot {
    pub fn new(data: Data) -> Slot {
        Slot { data, node: None }
    }
}

#[derive(Default, Debug)]
pub struct Tapes {
    stacks: AHashMap<Tape, Vec<Slot>>,
    stats: AHashMap<Tape, TapeStats>,
}

impl Tapes {
    pub fn stats(&self, tape: Tape) -> TapeStats {
        self.stats.get(&tape).copied().unwrap_or_default()
    }

    /// Statistics of every tape that was used, sorted by tape.
    pub fn all_stats(&self) -> Vec<(Tape, TapeStats)> {
        let mut res: Vec<_> = self.stats.iter().map(|(tape, stats)| (*tape, *stats)).collect();
        res.sort_unstable_by_key(|(tape, _)| *tape);
        res
    }

    /// Every push was matched by exactly one pop.
    pub fn is_balanced(&self) -> bool {
        self.stacks.values().all(|stack| stack.is_empty())
    }

    pub fn len(&self, tape: Tape) -> usize {
        self.stacks.get(&tape).map_or(0, |stack| stack.len())
    }

    fn push(&mut self, tape: Tape, slot: Slot) {
        self.stacks.entry(tape).or_default().push(slot);
        self.stats.entry(tape).or_default().pushes += 1;
    }

    fn pop(&mut self, tape: Tape) -> Result<Slot, InterpretError> {
        let slot = self
            .stacks
            .get_mut(&tape)
            .and_then(|stack| stack.pop())
            .ok_or(InterpretError::EmptyTape(tape))?;
        self.stats.entry(tape).or_default().pops += 1;
        Ok(slot)
    }

    fn top(&self, tape: Tape) -> Option<Data> {
        self.stacks.get(&tape)?.last().map(|slot| slot.data)
    }
}

enum Flow {
    Next,
    Return(Vec<Slot>),
}

pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

pub struct Interpreter<'a> {
    func: &'a Function,
    externs: &'a mut dyn Externs,
    pub heap: &'a mut Heap,
    pub tapes: Tapes,
    vals: TiVec<Var, Option<Slot>>,
    pub(crate) graph: Option<Graph>,
    steps: u64,
    pub step_limit: u64,
}

impl<'a> Interpreter<'a> {
    pub fn new(func: &'a Function, externs: &'a mut dyn Externs, heap: &'a mut Heap) -> Self {
        Interpreter {
            func,
            externs,
            heap,
            tapes: Tapes::default(),
            vals: vec![None; func.vars.len()].into(),
            graph: None,
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn run(&mut self, args: &[Data]) -> Result<Vec<Data>, InterpretError> {
        let args: Vec<_> = args.iter().map(|data| Slot::new(*data)).collect();
        let res = self.run_slots(&args)?;
        Ok(res.into_iter().map(|slot| slot.data).collect())
    }

    pub(crate) fn run_slots(&mut self, args: &[Slot]) -> Result<Vec<Slot>, InterpretError> {
        let func = self.func;
        if args.len() != func.params.len() {
            return Err(InterpretError::Arity { expected: func.params.len(), found: args.len() });
        }
        for (param, arg) in func.params.iter().zip(args) {
            self.vals[*param] = Some(*arg);
        }
        match self.exec_block(&func.body)? {
            Flow::Return(vals) => Ok(vals),
            Flow::Next => Err(InterpretError::MissingReturn),
        }
    }

    fn read(&self, var: Var) -> Result<Slot, InterpretError> {
        self.vals[var]
            .ok_or_else(|| InterpretError::UndefinedVar(self.func.var_name(var).into()))
    }

    fn read_bool(&self, var: Var) -> Result<bool, InterpretError> {
        self.read(var)?.data.bool()
    }

    fn tick(&mut self) -> Result<(), InterpretError> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(InterpretError::StepLimit);
        }
        Ok(())
    }

    fn exec_block(&mut self, block: &'a Block) -> Result<Flow, InterpretError> {
        for stmt in &block.stmts {
            if let flow @ Flow::Return(_) = self.exec(stmt)? {
                return Ok(flow);
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, stmt: &'a Stmt) -> Result<Flow, InterpretError> {
        match stmt {
            Stmt::Def { dst, expr, .. } => {
                let val = self.eval(expr)?;
                self.vals[*dst] = Some(val);
            }
            Stmt::Store { obj, field, val } => {
                let handle = self.read(*obj)?.data.obj()?;
                let val = self.read(*val)?;
                self.heap.store(handle, field, val.data)?;
                if let Some(graph) = &mut self.graph {
                    graph.set_field(handle, field, val.node);
                }
            }
            Stmt::If { branches, else_ } => {
                for (cond, block) in branches {
                    if self.read_bool(*cond)? {
                        return self.exec_block(block);
                    }
                }
                return self.exec_block(else_);
            }
            Stmt::While { header, cond, body } => loop {
                self.tick()?;
                if let flow @ Flow::Return(_) = self.exec_block(header)? {
                    return Ok(flow);
                }
                if !self.read_bool(*cond)? {
                    break;
                }
                if let flow @ Flow::Return(_) = self.exec_block(body)? {
                    return Ok(flow);
                }
            },
            Stmt::DoWhile { body, cond } => loop {
                self.tick()?;
                if let flow @ Flow::Return(_) = self.exec_block(body)? {
                    return Ok(flow);
                }
                if !self.read_bool(*cond)? {
                    break;
                }
            },
            Stmt::Block(block) => return self.exec_block(block),
            Stmt::Push { tape, val } => {
                let val = self.read(*val)?;
                self.tapes.push(*tape, val);
            }
            Stmt::PushDecision { tape, decision } => {
                self.tapes.push(*tape, Slot::new(Data::Int(*decision)))
            }
            Stmt::Unreachable => return Err(InterpretError::Unreachable),
            Stmt::Return(vals) => {
                let vals = vals.iter().map(|val| self.read(*val)).collect::<Result<_, _>>()?;
                return Ok(Flow::Return(vals));
            }
        }
        Ok(Flow::Next)
    }

    fn eval(&mut self, expr: &'a Expr) -> Result<Slot, InterpretError> {
        let slot = match expr {
            Expr::Const(val) => Slot::new((*val).into()),
            Expr::Copy(var) => self.read(*var)?,
            Expr::Load { obj, field } => {
                let handle = self.read(*obj)?.data.obj()?;
                let data = self.heap.load(handle, field)?;
                let node = self.graph.as_ref().and_then(|graph| graph.field(handle, field));
                Slot { data, node }
            }
            Expr::Op { opcode, args } => {
                let args = self.read_args(args)?;
                let data: Vec<_> = args.iter().map(|arg| arg.data).collect();
                let res = eval_op(*opcode, &data)?;
                let node = match &mut self.graph {
                    Some(graph) if opcode.is_differentiable() => {
                        let partials = local_partials(*opcode, &data, res.f64()?)?;
                        graph.record(&args, &partials)
                    }
                    _ => None,
                };
                Slot { data: res, node }
            }
            Expr::Call { callee, args, .. } => {
                let args = self.read_args(args)?;
                let data: Vec<_> = args.iter().map(|arg| arg.data).collect();
                let res = self.externs.call(callee, &data, self.heap)?;
                let mut node = None;
                if let Some(graph) = &mut self.graph {
                    if res.ty() == Ty::Real && args.iter().any(|arg| arg.node.is_some()) {
                        let partials = self
                            .externs
                            .partials(callee, &data)
                            .ok_or_else(|| InterpretError::NotDifferentiable(callee.clone()))?;
                        node = graph.record(&args, &partials);
                    }
                }
                Slot { data: res, node }
            }
            Expr::Pop(tape) => self.tapes.pop(*tape)?,
            Expr::TopIs(tape, decision) => {
                Slot::new(Data::Bool(self.tapes.top(*tape) == Some(Data::Int(*decision))))
            }
        };
        Ok(slot)
    }

    fn read_args(&self, args: &[Var]) -> Result<Vec<Slot>, InterpretError> {
        args.iter().map(|arg| self.read(*arg)).collect()
    }
}

/// Evaluates `func` without externs on a fresh heap.
pub fn run_function(func: &Function, args: &[Data]) -> Result<Vec<Data>, InterpretError> {
    let mut heap = Heap::default();
    Interpreter::new(func, &mut NoExterns, &mut heap).run(args)
}

pub fn eval_op(opcode: Opcode, args: &[Data]) -> Result<Data, InterpretError> {
    if args.len() != opcode.arity() {
        return Err(InterpretError::Arity { expected: opcode.arity(), found: args.len() });
    }
    let real = |i: usize| args[i].f64();
    let int = |i: usize| args[i].i32();

    let res = match opcode {
        Opcode::Fneg => Data::Real(-real(0)?),
        Opcode::Fadd => Data::Real(real(0)? + real(1)?),
        Opcode::Fsub => Data::Real(real(0)? - real(1)?),
        Opcode::Fmul => Data::Real(real(0)? * real(1)?),
        Opcode::Fdiv => Data::Real(real(0)? / real(1)?),
        Opcode::Sin => Data::Real(real(0)?.sin()),
        Opcode::Cos => Data::Real(real(0)?.cos()),
        Opcode::Tan => Data::Real(real(0)?.tan()),
        Opcode::Exp => Data::Real(real(0)?.exp()),
        Opcode::Ln => Data::Real(real(0)?.ln()),
        Opcode::Sqrt => Data::Real(real(0)?.sqrt()),
        Opcode::Pow => Data::Real(real(0)?.powf(real(1)?)),
        Opcode::Tanh => Data::Real(real(0)?.tanh()),
        Opcode::Iadd => Data::Int(int(0)?.wrapping_add(int(1)?)),
        Opcode::Isub => Data::Int(int(0)?.wrapping_sub(int(1)?)),
        Opcode::Imul => Data::Int(int(0)?.wrapping_mul(int(1)?)),
        Opcode::Ineg => Data::Int(int(0)?.wrapping_neg()),
        Opcode::Flt => Data::Bool(real(0)? < real(1)?),
        Opcode::Fgt => Data::Bool(real(0)? > real(1)?),
        Opcode::Fle => Data::Bool(real(0)? <= real(1)?),
        Opcode::Fge => Data::Bool(real(0)? >= real(1)?),
        Opcode::Feq => Data::Bool(real(0)? == real(1)?),
        Opcode::Fne => Data::Bool(real(0)? != real(1)?),
        Opcode::Ilt => Data::Bool(int(0)? < int(1)?),
        Opcode::Igt => Data::Bool(int(0)? > int(1)?),
        Opcode::Ile => Data::Bool(int(0)? <= int(1)?),
        Opcode::Ige => Data::Bool(int(0)? >= int(1)?),
        Opcode::Ieq => Data::Bool(int(0)? == int(1)?),
        Opcode::Ine => Data::Bool(int(0)? != int(1)?),
        Opcode::Bnot => Data::Bool(!args[0].bool()?),
        Opcode::IFcast => Data::Real(int(0)? as f64),
    };
    Ok(res)
}
