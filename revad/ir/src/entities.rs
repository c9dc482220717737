//! Entities referenced by statements.

use core::fmt;

use stdx::{impl_debug, impl_idx_from};

/// A named local variable (including parameters) of a function.
///
/// Every `let` introduces a distinct variable, so a variable is identified
/// by its declaration and not by its name.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(u32);
impl_idx_from!(Var(u32));
impl_debug!(v @ Var => "v{}", v.0);

impl Var {
    pub fn with_number(n: u32) -> Option<Var> {
        if n < u32::MAX {
            Some(Var(n))
        } else {
            None
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum TapeKind {
    /// Checkpointed primal values.
    Values,
    /// Branch indices and loop identifiers.
    Decisions,
    /// Adjoints of values that travelled through a value tape, used by nested derivatives.
    Adjoints,
}

impl TapeKind {
    pub fn prefix(self) -> &'static str {
        match self {
            TapeKind::Values => "values",
            TapeKind::Decisions => "decisions",
            TapeKind::Adjoints => "adjoints",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<TapeKind> {
        let kind = match prefix {
            "values" => TapeKind::Values,
            "decisions" => TapeKind::Decisions,
            "adjoints" => TapeKind::Adjoints,
            _ => return None,
        };
        Some(kind)
    }
}

/// A LIFO stack that lives for the duration of one call of a function.
///
/// Tapes are owned by a derivative context, `level` is the identifier of that
/// context. They are printed as `values1`, `decisions1`, `adjoints2`...
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tape {
    pub kind: TapeKind,
    pub level: u32,
}

impl Tape {
    pub fn values(level: u32) -> Tape {
        Tape { kind: TapeKind::Values, level }
    }

    pub fn decisions(level: u32) -> Tape {
        Tape { kind: TapeKind::Decisions, level }
    }

    pub fn adjoints(level: u32) -> Tape {
        Tape { kind: TapeKind::Adjoints, level }
    }
}

impl fmt::Display for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.level)
    }
}

impl fmt::Debug for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
