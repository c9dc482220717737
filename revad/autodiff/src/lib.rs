//! Reverse-mode automatic differentiation by source transformation.
//!
//! A function is differentiated in three stages: [`Activity::analyze`] finds
//! the variables that depend on the active input, [`build_diffir`] lowers the
//! body to DiffIR, and the pullback generator emits a new `ir` function that
//! replays the primal and then accumulates the derivative backwards, using
//! value and decision tapes instead of a runtime graph.

mod activity;
mod builder;
mod context;
mod diffir;
mod error;
mod pullback;
mod registry;
mod second_order;

#[cfg(test)]
mod tests;

use ir::{Function, Ty};
use smol_str::SmolStr;
use stdx::pretty::List;

pub use crate::activity::{ActiveInput, Activity, BuiltinStacks, StackProbe, ACCUMULATOR_PREFIX};
pub use crate::builder::build_diffir;
pub use crate::context::{Context, DerivativeId};
pub use crate::diffir::{DiffBlock, DiffFunction, DiffStmt};
pub use crate::error::{Error, ErrorClass};
pub use crate::pullback::ReturnMode;
pub use crate::registry::{node_name, NodeDef, NodeId, Registry, Resolver};
pub use crate::second_order::second_order;

/// Picks the active input of `func` from the arguments of its marker.
///
/// `a` names a real parameter and `o.f` the real property `f` of the record
/// parameter `o`. Without arguments the only real parameter is used.
pub fn select_input(func: &Function, args: &[SmolStr]) -> Result<ActiveInput, Error> {
    match args {
        [] => {
            let candidates: Vec<_> =
                func.params.iter().copied().filter(|param| func.var_ty(*param) == Ty::Real).collect();
            match *candidates {
                [param] => Ok(ActiveInput::Param(param)),
                [] => Err(Error::NoActiveInput),
                _ => {
                    let names: Vec<_> = candidates.iter().map(|param| func.var_name(*param)).collect();
                    Err(Error::MultipleActiveInputs {
                        candidates: List::new(names).quoted().with_final_separator(" and ").to_string(),
                    })
                }
            }
        }
        [name] => named_input(func, name),
        _ => Err(Error::MultipleActiveInputs {
            candidates: List::new(args).quoted().with_final_separator(" and ").to_string(),
        }),
    }
}

fn named_input(func: &Function, name: &SmolStr) -> Result<ActiveInput, Error> {
    let unknown = || Error::UnknownInput { name: name.clone() };
    if let Some((obj, field)) = name.split_once('.') {
        let obj = func.param_by_name(obj).ok_or_else(unknown)?;
        if func.var_ty(obj) != Ty::Obj {
            return Err(unknown());
        }
        return Ok(ActiveInput::Property { obj, field: field.into() });
    }

    let param = func.param_by_name(name).ok_or_else(unknown)?;
    match func.var_ty(param) {
        Ty::Real => Ok(ActiveInput::Param(param)),
        ty => Err(Error::NonScalarInput { name: name.clone(), ty }),
    }
}

/// Generates `%<f>.pullback(params.., upstream) -> real`, which returns
/// `upstream` times the derivative of `func` with respect to `input`.
pub fn pullback(
    func: &Function,
    input: &ActiveInput,
    registry: &Registry,
    ctx: &mut Context,
) -> Result<Function, Error> {
    let name = format!("{}.pullback", func.name);
    reverse(func, input, registry, ctx, None, ReturnMode::Derivative, name)
}

/// Runs the whole pipeline on `func`.
pub(crate) fn reverse(
    func: &Function,
    input: &ActiveInput,
    registry: &Registry,
    ctx: &mut Context,
    probe: Option<&dyn StackProbe>,
    mode: ReturnMode,
    name: String,
) -> Result<Function, Error> {
    func.validate().map_err(|errors| Error::Invalid {
        errors: List::new(errors).with_final_separator(" and ").to_string(),
    })?;
    match input {
        ActiveInput::Param(param) if func.var_ty(*param) != Ty::Real => {
            return Err(Error::NonScalarInput {
                name: func.vars[*param].name.clone(),
                ty: func.var_ty(*param),
            })
        }
        ActiveInput::Property { obj, .. } if func.var_ty(*obj) != Ty::Obj => {
            return Err(Error::UnknownInput { name: input.display(func).to_string().into() })
        }
        _ => (),
    }

    let activity = Activity::analyze(func, input.clone(), probe)?;
    log::debug!(
        "%{}: active with respect to {}: {}",
        func.name,
        input.display(func),
        activity.to_debug_string(func)
    );
    let mut resolver = Resolver::new(registry);
    let diff = build_diffir(func, &activity, &mut resolver)?;

    let config = pullback::PullbackConfig {
        name: name.into(),
        id: ctx.fresh_id(func),
        mode,
        zero: ctx.zero,
    };
    pullback::generate(func, &diff, registry, &config)
}
