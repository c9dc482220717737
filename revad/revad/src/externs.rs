use ir_interpret::{gradient, Data, Externs, Heap, InterpretError, Interpreter, Wrt};

use crate::{OptimizedModule, DYNAMIC_AD};

/// Resolves calls between the functions of a module, including the calls
/// generated pullbacks and call sites use to reach derivatives.
pub(crate) struct ModuleExterns<'m, 'e> {
    module: &'m OptimizedModule,
    user: &'e mut dyn Externs,
}

fn strip_prefix<'n>(name: &'n str, prefix: &str) -> Option<&'n str> {
    name.strip_prefix(prefix)?.strip_prefix('.')
}

fn first(res: Vec<Data>) -> Result<Data, InterpretError> {
    res.into_iter().next().ok_or(InterpretError::MissingReturn)
}

impl<'m, 'e> ModuleExterns<'m, 'e> {
    pub(crate) fn new(module: &'m OptimizedModule, user: &'e mut dyn Externs) -> Self {
        ModuleExterns { module, user }
    }

    pub(crate) fn run(
        &mut self,
        name: &str,
        args: &[Data],
        heap: &mut Heap,
    ) -> Result<Vec<Data>, InterpretError> {
        let module = self.module;
        let func = module.function(name).ok_or_else(|| InterpretError::UnknownExtern(name.into()))?;
        Interpreter::new(func, self, heap).run(args)
    }

    /// `call %dynamic_ad.f(args.., upstream)`
    fn dynamic(&mut self, primal: &str, args: &[Data], heap: &mut Heap) -> Result<Data, InterpretError> {
        let module = self.module;
        let (func, wrt) =
            module.fallback(primal).ok_or_else(|| InterpretError::NotDifferentiable(primal.into()))?;
        let (upstream, args) = args
            .split_last()
            .ok_or(InterpretError::Arity { expected: func.params.len() + 1, found: 0 })?;
        let upstream = upstream.f64()?;
        let grad = gradient(func, args, wrt, self, heap)?;
        log::trace!("%{}: dynamic derivative {} at value {}", primal, grad.derivative, grad.value);
        Ok(Data::Real(grad.derivative * upstream))
    }
}

impl Externs for ModuleExterns<'_, '_> {
    fn call(&mut self, name: &str, args: &[Data], heap: &mut Heap) -> Result<Data, InterpretError> {
        let module = self.module;
        if let Some(primal) = strip_prefix(name, &module.markers.reverse_call) {
            let pullback = format!("{primal}.pullback");
            return first(self.run(&pullback, args, heap)?);
        }
        if let Some(primal) = strip_prefix(name, DYNAMIC_AD) {
            return self.dynamic(primal, args, heap);
        }
        if module.function(name).is_some() {
            return first(self.run(name, args, heap)?);
        }
        self.user.call(name, args, heap)
    }

    /// Calls between module functions are differentiated through by recording
    /// the callee on a graph of its own. Records have no derivative here.
    fn partials(&mut self, name: &str, args: &[Data]) -> Option<Vec<f64>> {
        let module = self.module;
        let Some(func) = module.function(name) else {
            return self.user.partials(name, args);
        };
        let mut heap = Heap::default();
        args.iter()
            .enumerate()
            .map(|(i, arg)| match arg {
                Data::Real(_) => gradient(func, args, &Wrt::Param(i), &mut *self, &mut heap)
                    .ok()
                    .map(|grad| grad.derivative),
                _ => Some(0.0),
            })
            .collect()
    }
}
