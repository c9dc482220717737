use ir::{Block, Function, Stmt, Tape};

/// Identifies one derivative context.
///
/// Ids are handed out in increasing order by a [`Context`], so a context is
/// nested in (newer than) another context exactly if its id is larger.
/// The tapes of a generated pullback are named after the id of its context.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct DerivativeId(u32);

impl DerivativeId {
    pub fn is_nested_in(self, other: DerivativeId) -> bool {
        self.0 > other.0
    }

    pub fn level(self) -> u32 {
        self.0
    }

    pub fn values(self) -> Tape {
        Tape::values(self.0)
    }

    pub fn decisions(self) -> Tape {
        Tape::decisions(self.0)
    }

    pub fn adjoints(self) -> Tape {
        Tape::adjoints(self.0)
    }
}

/// State shared by all pullbacks generated for one module.
#[derive(Debug, Clone)]
pub struct Context {
    next: u32,
    /// Additive identity of the scalar type.
    pub zero: f64,
    pub one: f64,
}

impl Default for Context {
    fn default() -> Self {
        Context::new(0.0, 1.0)
    }
}

impl Context {
    pub fn new(zero: f64, one: f64) -> Context {
        Context { next: 1, zero, one }
    }

    /// A new id that is newer than every previously returned id and every
    /// tape `func` already uses.
    pub fn fresh_id(&mut self, func: &Function) -> DerivativeId {
        let used = max_tape_level(&func.body).map_or(0, |level| level + 1);
        let id = self.next.max(used);
        self.next = id + 1;
        DerivativeId(id)
    }
}

fn max_tape_level(block: &Block) -> Option<u32> {
    let mut res = None;
    for stmt in &block.stmts {
        let level = match stmt {
            Stmt::Push { tape, .. } | Stmt::PushDecision { tape, .. } => Some(tape.level),
            Stmt::Def { expr: ir::Expr::Pop(tape) | ir::Expr::TopIs(tape, _), .. } => {
                Some(tape.level)
            }
            _ => {
                let mut nested = None;
                stmt.for_each_block(|block| nested = nested.max(max_tape_level(block)));
                nested
            }
        };
        res = res.max(level);
    }
    res
}
