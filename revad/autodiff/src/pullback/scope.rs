use ir::Var;
use typed_index_collections::TiVec;

/// Accumulators of the reverse section, organized by the lexical scope they
/// are declared in. Leaving a scope forgets its accumulators, so an adjoint
/// can never be referenced outside of the block that declares it.
pub(super) struct Scopes {
    accs: TiVec<Var, Option<Var>>,
    frames: Vec<Vec<Var>>,
}

impl Scopes {
    pub fn new(vars: usize) -> Scopes {
        Scopes { accs: vec![None; vars].into(), frames: Vec::new() }
    }

    pub fn enter(&mut self) {
        self.frames.push(Vec::new())
    }

    pub fn exit(&mut self) {
        for var in self.frames.pop().unwrap_or_default() {
            self.accs[var] = None;
        }
    }

    pub fn insert(&mut self, var: Var, acc: Var) {
        self.accs[var] = Some(acc);
        if let Some(frame) = self.frames.last_mut() {
            frame.push(var)
        }
    }

    pub fn get(&self, var: Var) -> Option<Var> {
        self.accs[var]
    }
}
