//! Differentiates every marked function of a module.
//!
//! Functions are transformed independently of each other (in parallel). A
//! function that can not be differentiated does not fail the module: unless
//! [`Opts::fail_on_error`] is set, a warning is logged, the primal is kept
//! unchanged and its `<f>.pullback` becomes a thin wrapper that evaluates the
//! derivative with the dynamic graph of `ir_interpret` at runtime. Call sites
//! `call %reverse_ad.f(args.., upstream)` therefore work either way.

use std::fmt;

use ahash::AHashMap;
use autodiff::{ActiveInput, Context, Registry};
use ir::{Expr, Function, FunctionBuilder, Ty, Var};
use ir_interpret::{Data, Externs, Heap, InterpretError, Wrt};
use smol_str::SmolStr;

use crate::externs::ModuleExterns;

mod externs;


/// Prefix of the extern calls fallback pullbacks use to reach the dynamic graph.
pub const DYNAMIC_AD: &str = "dynamic_ad";

#[derive(Debug, Clone)]
pub struct Markers {
    /// `@optimize` or `@optimize(input)`
    pub optimize: SmolStr,
    /// Additionally generates `<f>.second_order`.
    pub second_order: SmolStr,
    /// Prefix of call sites that evaluate a pullback.
    pub reverse_call: SmolStr,
}

impl Default for Markers {
    fn default() -> Self {
        Markers {
            optimize: "optimize".into(),
            second_order: "second_order_optimize".into(),
            reverse_call: "reverse_ad".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Opts {
    pub markers: Markers,
    /// Escalate the first function that can not be differentiated instead of falling back.
    pub fail_on_error: bool,
    pub zero: f64,
    pub one: f64,
}

impl Default for Opts {
    fn default() -> Self {
        Opts { markers: Markers::default(), fail_on_error: false, zero: 0.0, one: 1.0 }
    }
}

#[derive(Debug, Clone)]
pub enum Strategy {
    /// Derivatives are computed by generated functions.
    Optimized { second_order: bool },
    /// Derivatives are computed with the dynamic graph. `wrt` is `None` if
    /// not even the active input could be determined.
    Fallback { wrt: Option<Wrt>, cause: autodiff::Error },
}

#[derive(Debug, Clone)]
pub struct Derivative {
    pub primal: SmolStr,
    pub strategy: Strategy,
}

type Generated = (ActiveInput, Function, Option<Function>);

pub struct OptimizedModule {
    /// Primal functions followed by the generated ones.
    functions: Vec<Function>,
    primal_count: usize,
    by_name: AHashMap<SmolStr, usize>,
    derivatives: Vec<Derivative>,
    markers: Markers,
}

pub fn optimize_module(
    functions: Vec<Function>,
    registry: &Registry,
    opts: &Opts,
) -> anyhow::Result<OptimizedModule> {
    let mut results: Vec<Option<Result<Generated, autodiff::Error>>> =
        functions.iter().map(|_| None).collect();
    rayon_core::scope(|scope| {
        for (res, func) in results.iter_mut().zip(&functions) {
            scope.spawn(move |_| *res = optimize_function(func, registry, opts));
        }
    });

    let mut generated = Vec::new();
    let mut derivatives = Vec::new();
    for (func, res) in functions.iter().zip(results) {
        let strategy = match res {
            None => continue,
            Some(Ok((input, pullback, second_order))) => {
                log::debug!("%{}: optimized with respect to {}", func.name, input.display(func));
                let strategy = Strategy::Optimized { second_order: second_order.is_some() };
                generated.push(pullback);
                generated.extend(second_order);
                strategy
            }
            Some(Err(err)) if opts.fail_on_error => {
                let msg = format!("failed to optimize %{}", func.name);
                return Err(anyhow::Error::new(err).context(msg));
            }
            Some(Err(err)) => {
                log::warn!(
                    "%{}: {} ({}), derivatives are evaluated with the dynamic graph",
                    func.name,
                    err,
                    err.class()
                );
                generated.push(fallback_pullback(func));
                let wrt = marker_args(func, &opts.markers)
                    .and_then(|args| autodiff::select_input(func, args).ok())
                    .and_then(|input| input_wrt(func, &input));
                Strategy::Fallback { wrt, cause: err }
            }
        };
        derivatives.push(Derivative { primal: func.name.clone(), strategy });
    }

    let primal_count = functions.len();
    let mut functions = functions;
    functions.extend(generated);
    let mut by_name = AHashMap::default();
    for (i, func) in functions.iter().enumerate() {
        if by_name.insert(func.name.clone(), i).is_some() {
            anyhow::bail!("function %{} is defined twice", func.name);
        }
    }
    Ok(OptimizedModule { functions, primal_count, by_name, derivatives, markers: opts.markers.clone() })
}

fn marker_args<'f>(func: &'f Function, markers: &Markers) -> Option<&'f [SmolStr]> {
    let attr = func.attr(&markers.optimize).or_else(|| func.attr(&markers.second_order))?;
    Some(&attr.args)
}

/// `None` if `func` is not marked.
fn optimize_function(
    func: &Function,
    registry: &Registry,
    opts: &Opts,
) -> Option<Result<Generated, autodiff::Error>> {
    let args = marker_args(func, &opts.markers)?;
    let second_order = func.attr(&opts.markers.second_order).is_some();
    Some(differentiate(func, args, second_order, registry, opts))
}

fn differentiate(
    func: &Function,
    args: &[SmolStr],
    second_order: bool,
    registry: &Registry,
    opts: &Opts,
) -> Result<Generated, autodiff::Error> {
    let input = autodiff::select_input(func, args)?;
    let mut ctx = Context::new(opts.zero, opts.one);
    let pullback = autodiff::pullback(func, &input, registry, &mut ctx)?;
    let second_order = if second_order {
        Some(autodiff::second_order(func, &input, registry, &mut ctx)?)
    } else {
        None
    };
    Ok((input, pullback, second_order))
}

fn input_wrt(func: &Function, input: &ActiveInput) -> Option<Wrt> {
    let index = |param: Var| func.params.iter().position(|it| *it == param);
    let wrt = match input {
        ActiveInput::Param(param) => Wrt::Param(index(*param)?),
        ActiveInput::Property { obj, field } => {
            Wrt::Property { param: index(*obj)?, field: field.clone() }
        }
    };
    Some(wrt)
}

/// `%<f>.pullback(params.., upstream)` forwarding to the dynamic graph.
fn fallback_pullback(func: &Function) -> Function {
    let mut builder = FunctionBuilder::new(format!("{}.pullback", func.name));
    let mut args: Vec<_> = func
        .params
        .iter()
        .map(|param| builder.param(func.var_name(*param), func.var_ty(*param)))
        .collect();
    args.push(builder.param("upstream", Ty::Real));
    let callee = SmolStr::from(format!("{DYNAMIC_AD}.{}", func.name));
    let res = builder.def("derivative", Ty::Real, Expr::Call { callee, args, node: None });
    builder.ret(vec![res]);
    builder.finish(vec![Ty::Real])
}

impl OptimizedModule {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.by_name.get(name).map(|i| &self.functions[*i])
    }

    pub fn primals(&self) -> &[Function] {
        &self.functions[..self.primal_count]
    }

    pub fn generated(&self) -> &[Function] {
        &self.functions[self.primal_count..]
    }

    /// All marked functions in module order.
    pub fn derivatives(&self) -> &[Derivative] {
        &self.derivatives
    }

    pub fn derivative(&self, primal: &str) -> Option<&Derivative> {
        self.derivatives.iter().find(|it| it.primal == primal)
    }

    pub(crate) fn fallback(&self, primal: &str) -> Option<(&Function, &Wrt)> {
        match &self.derivative(primal)?.strategy {
            Strategy::Fallback { wrt: Some(wrt), .. } => Some((self.function(primal)?, wrt)),
            _ => None,
        }
    }

    /// Runs the function `name` of the module. Calls to operations outside of
    /// the module are forwarded to `externs`.
    pub fn eval(
        &self,
        name: &str,
        args: &[Data],
        externs: &mut dyn Externs,
        heap: &mut Heap,
    ) -> Result<Vec<Data>, InterpretError> {
        ModuleExterns::new(self, externs).run(name, args, heap)
    }

    /// `upstream` times the derivative of `primal` at `args`, however it was generated.
    pub fn pullback(
        &self,
        primal: &str,
        args: &[Data],
        upstream: f64,
        externs: &mut dyn Externs,
        heap: &mut Heap,
    ) -> Result<f64, InterpretError> {
        let mut args = args.to_vec();
        args.push(Data::Real(upstream));
        let res = self.eval(&format!("{primal}.pullback"), &args, externs, heap)?;
        res.first().ok_or(InterpretError::MissingReturn)?.f64()
    }

    /// Writes the module followed by the generated functions.
    pub fn write(&self, w: &mut dyn fmt::Write) -> fmt::Result {
        for (i, func) in self.functions.iter().enumerate() {
            if i != 0 {
                writeln!(w)?;
            }
            ir::write::write_function(w, func)?;
        }
        Ok(())
    }
}

impl fmt::Display for OptimizedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f)
    }
}
