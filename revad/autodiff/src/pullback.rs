//! Emits the pullback of a DiffIR function.
//!
//! The generated function takes the parameters of the primal plus an
//! `upstream` derivative. Its body consists of two sections:
//!
//! * the forward section replays the primal. Before an active call it pushes
//!   the arguments the backprop rule will read (unless they are immutable and
//!   live for the whole function) to the value tape, afterwards the result if
//!   the rule reads it. Every taken branch ends by pushing its index to the
//!   decision tape, every loop iteration by pushing the (negative) loop id.
//! * the reverse section visits the same statements backwards. It pops the
//!   decision tape to select the branch taken in the forward section (the
//!   original condition is never evaluated again) and repeats loop bodies
//!   as long as the loop id is on top of the decision tape.
//!
//! Derivatives are summed in one accumulator per active variable, declared
//! at the start of the reverse code of the variable's block.

use ir::{Const, Expr, Function, FunctionBuilder, Ty, Var};
use smol_str::SmolStr;

use crate::activity::{ActiveInput, ACCUMULATOR_PREFIX};
use crate::context::DerivativeId;
use crate::diffir::DiffFunction;
use crate::registry::Registry;
use crate::Error;

use self::scope::Scopes;

mod forward;
mod reverse;
mod scope;


#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReturnMode {
    /// `return d`
    Derivative,
    /// `return value, d`
    ValueAndDerivative,
}

pub struct PullbackConfig {
    pub name: SmolStr,
    pub id: DerivativeId,
    pub mode: ReturnMode,
    /// Additive identity accumulators start from.
    pub zero: f64,
}

pub fn generate(
    func: &Function,
    diff: &DiffFunction,
    registry: &Registry,
    config: &PullbackConfig,
) -> Result<Function, Error> {
    let mut builder = FunctionBuilder::with_vars_of(config.name.clone(), func);
    builder.func.params = func.params.clone();
    let upstream = builder.param("upstream", Ty::Real);

    let mut gen = Generator {
        func,
        registry,
        id: config.id,
        zero: config.zero,
        scopes: Scopes::new(func.vars.len()),
        builder,
        property_acc: None,
    };

    gen.forward_stmts(&diff.body.stmts);

    // reverse section
    gen.scopes.enter();
    let input_acc = match &diff.input {
        ActiveInput::Param(param) => {
            let init = if *param == diff.ret { Expr::Copy(upstream) } else { gen.zero_expr() };
            let acc = gen.declare_acc(func.var_name(*param), init);
            gen.scopes.insert(*param, acc);
            acc
        }
        ActiveInput::Property { obj, field } => {
            let name = format!("{}_{}", func.var_name(*obj), field);
            let acc = gen.declare_acc(&name, gen.zero_expr());
            gen.property_acc = Some(acc);
            acc
        }
    };
    for var in &diff.body.active_decls {
        let init = if *var == diff.ret { Expr::Copy(upstream) } else { gen.zero_expr() };
        let acc = gen.declare_acc(func.var_name(*var), init);
        gen.scopes.insert(*var, acc);
    }
    gen.reverse_stmts(&diff.body.stmts)?;
    gen.scopes.exit();

    let res = match config.mode {
        ReturnMode::Derivative => {
            gen.builder.ret(vec![input_acc]);
            gen.builder.finish(vec![Ty::Real])
        }
        ReturnMode::ValueAndDerivative => {
            gen.builder.ret(vec![diff.ret, input_acc]);
            gen.builder.finish(vec![Ty::Real, Ty::Real])
        }
    };
    log::debug!(
        "generated %{} ({} variables) from %{} with respect to {}",
        res.name,
        res.vars.len(),
        func.name,
        diff.input.display(func)
    );
    Ok(res)
}

struct Generator<'a> {
    func: &'a Function,
    registry: &'a Registry,
    id: DerivativeId,
    zero: f64,
    scopes: Scopes,
    builder: FunctionBuilder,
    property_acc: Option<Var>,
}

impl Generator<'_> {
    fn zero_expr(&self) -> Expr {
        Expr::Const(Const::Real(self.zero))
    }

    fn declare_acc(&mut self, name: &str, init: Expr) -> Var {
        self.builder.def_mut(&format!("{ACCUMULATOR_PREFIX}_{name}"), Ty::Real, init)
    }
}
