//! Dynamic reverse mode: every differentiable operation executed by the
//! interpreter is recorded together with its local partial derivatives and
//! the graph is swept backwards once evaluation finished.

use ahash::AHashMap;
use ir::{Function, Opcode};
use smol_str::SmolStr;

use crate::{Data, Externs, Heap, InterpretError, Interpreter, Slot};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Node(u32);

#[derive(Default, Debug)]
pub(crate) struct Graph {
    parents: Vec<Vec<(Node, f64)>>,
    fields: AHashMap<(u32, SmolStr), Node>,
}

impl Graph {
    fn leaf(&mut self) -> Node {
        self.parents.push(Vec::new());
        Node(self.parents.len() as u32 - 1)
    }

    /// Records a value computed from `args`. Returns `None` if no argument depends on the seed.
    pub fn record(&mut self, args: &[Slot], partials: &[f64]) -> Option<Node> {
        let parents: Vec<_> = args
            .iter()
            .zip(partials)
            .filter_map(|(arg, partial)| Some((arg.node?, *partial)))
            .collect();
        if parents.is_empty() {
            return None;
        }
        self.parents.push(parents);
        Some(Node(self.parents.len() as u32 - 1))
    }

    pub fn field(&self, obj: u32, field: &str) -> Option<Node> {
        self.fields.get(&(obj, SmolStr::from(field))).copied()
    }

    pub fn set_field(&mut self, obj: u32, field: &SmolStr, node: Option<Node>) {
        match node {
            Some(node) => {
                self.fields.insert((obj, field.clone()), node);
            }
            None => {
                self.fields.remove(&(obj, field.clone()));
            }
        }
    }

    fn backward(&self, output: Node, input: Node) -> f64 {
        let mut adjoints = vec![0.0; output.0 as usize + 1];
        adjoints[output.0 as usize] = 1.0;
        for node in (0..=output.0 as usize).rev() {
            let adjoint = adjoints[node];
            if adjoint == 0.0 {
                continue;
            }
            for (parent, partial) in &self.parents[node] {
                adjoints[parent.0 as usize] += adjoint * partial;
            }
        }
        adjoints.get(input.0 as usize).copied().unwrap_or(0.0)
    }
}

/// Partial derivatives of a differentiable opcode with respect to each operand.
/// `res` is the already computed result.
pub fn local_partials(opcode: Opcode, args: &[Data], res: f64) -> Result<Vec<f64>, InterpretError> {
    let x = args[0].f64()?;
    let partials = match opcode {
        Opcode::Fneg => vec![-1.0],
        Opcode::Fadd => vec![1.0, 1.0],
        Opcode::Fsub => vec![1.0, -1.0],
        Opcode::Fmul => vec![args[1].f64()?, x],
        Opcode::Fdiv => {
            let y = args[1].f64()?;
            vec![1.0 / y, -x / (y * y)]
        }
        Opcode::Sin => vec![x.cos()],
        Opcode::Cos => vec![-x.sin()],
        Opcode::Tan => vec![1.0 + res * res],
        Opcode::Exp => vec![res],
        Opcode::Ln => vec![1.0 / x],
        Opcode::Sqrt => vec![0.5 / res],
        Opcode::Pow => {
            let y = args[1].f64()?;
            vec![y * x.powf(y - 1.0), res * x.ln()]
        }
        Opcode::Tanh => vec![1.0 - res * res],
        _ => return Err(InterpretError::NotDifferentiable(opcode.name().into())),
    };
    Ok(partials)
}

/// The value a derivative is taken with respect to.
#[derive(Clone, PartialEq, Debug)]
pub enum Wrt {
    Param(usize),
    /// A real field of a record passed as parameter.
    Property { param: usize, field: SmolStr },
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Gradient {
    pub value: f64,
    pub derivative: f64,
}

/// Evaluates `func` and the derivative of its first return value with respect to `wrt`.
pub fn gradient(
    func: &Function,
    args: &[Data],
    wrt: &Wrt,
    externs: &mut dyn Externs,
    heap: &mut Heap,
) -> Result<Gradient, InterpretError> {
    let mut graph = Graph::default();
    let seed = graph.leaf();
    let mut slots: Vec<_> = args.iter().map(|data| Slot::new(*data)).collect();
    match wrt {
        Wrt::Param(param) => {
            let slot = slots.get_mut(*param).ok_or(InterpretError::Arity {
                expected: param + 1,
                found: args.len(),
            })?;
            slot.data.f64()?;
            slot.node = Some(seed);
        }
        Wrt::Property { param, field } => {
            let obj = args
                .get(*param)
                .ok_or(InterpretError::Arity { expected: param + 1, found: args.len() })?
                .obj()?;
            heap.load(obj, field)?.f64()?;
            graph.set_field(obj, field, Some(seed));
        }
    }

    let mut interp = Interpreter::new(func, externs, heap);
    interp.graph = Some(graph);
    let res = interp.run_slots(&slots)?;
    let output = res.first().ok_or(InterpretError::MissingReturn)?;
    let value = output.data.f64()?;
    let derivative = match (output.node, &interp.graph) {
        (Some(node), Some(graph)) => graph.backward(node, seed),
        _ => 0.0,
    };
    Ok(Gradient { value, derivative })
}
