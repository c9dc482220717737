//! Forward-over-reverse second derivatives.
//!
//! The first order pullback `g(params.., upstream)` is an ordinary function of
//! the same language, so the whole pipeline can be applied to it again. Before
//! that, the pullback is unboxed: `upstream` turns into a local constant `one`,
//! leaving a function `g(params..) = f'(params..)` that is differentiated with
//! respect to the original input. Values `g` passes through its tapes are
//! followed by the activity analysis with the builtin stack probe.

use ir::{Const, Expr, Function, Stmt};
use smol_str::SmolStr;

use crate::activity::{ActiveInput, BuiltinStacks};
use crate::context::Context;
use crate::pullback::ReturnMode;
use crate::registry::Registry;
use crate::Error;

#[cfg(test)]
mod tests;

/// Returns `%<f>.second_order(params.., upstream) -> (f', f'' * upstream)`.
pub fn second_order(
    func: &Function,
    input: &ActiveInput,
    registry: &Registry,
    ctx: &mut Context,
) -> Result<Function, Error> {
    let name = format!("{}.reverse", func.name);
    let first = crate::reverse(func, input, registry, ctx, None, ReturnMode::Derivative, name)?;
    let unboxed = unbox(first, ctx.one);
    log::debug!("%{}: differentiating the unboxed pullback %{}", func.name, unboxed.name);

    let name = format!("{}.second_order", func.name);
    crate::reverse(
        &unboxed,
        input,
        registry,
        ctx,
        Some(&BuiltinStacks),
        ReturnMode::ValueAndDerivative,
        name,
    )
}

/// Replaces the trailing `upstream` parameter of a pullback with the constant `one`.
fn unbox(mut pullback: Function, one: f64) -> Function {
    if let Some(upstream) = pullback.params.pop() {
        let seed = Stmt::Def { dst: upstream, decl: true, expr: Expr::Const(Const::Real(one)) };
        pullback.body.stmts.insert(0, seed);
    }
    pullback.name = SmolStr::from(format!("{}.unboxed", pullback.name));
    pullback
}
