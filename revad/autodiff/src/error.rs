use smol_str::SmolStr;
use stdx::impl_display;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorClass {
    /// The function does not have the expected shape.
    Structural,
    /// A derivative rule or a marked member could not be found.
    Resolution,
    /// The function uses a feature that can not be differentiated.
    Unsupported,
}

impl_display! {
    match ErrorClass{
        ErrorClass::Structural => "malformed function";
        ErrorClass::Resolution => "unresolved reference";
        ErrorClass::Unsupported => "unsupported feature";
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Error {
    Invalid { errors: String },
    MissingReturn,
    MultipleReturns { stmt: String },
    MisplacedReturn { stmt: String },
    ReturnNotReal,
    ImmutableAssign { var: SmolStr },
    TapeOutsideProbe { tape: SmolStr },
    NoActiveInput,
    UnscopedAdjoint { var: SmolStr },
    Catalog { name: SmolStr, msg: String },

    UnknownInput { name: SmolStr },
    NoDerivativeRule { callee: SmolStr },
    UnknownNode { name: SmolStr },
    AmbiguousNode { callee: SmolStr, candidates: String },
    NodeArity { node: SmolStr, expected: usize, found: usize },

    MultipleActiveInputs { candidates: String },
    NonScalarInput { name: SmolStr, ty: ir::Ty },
    PostConditionLoop,
    ActiveLoopHeader { var: SmolStr },
    ActiveRecordStore { field: SmolStr },
    AggregateTangent { var: SmolStr },
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Invalid { .. }
            | Error::MissingReturn
            | Error::MultipleReturns { .. }
            | Error::MisplacedReturn { .. }
            | Error::ReturnNotReal
            | Error::ImmutableAssign { .. }
            | Error::TapeOutsideProbe { .. }
            | Error::NoActiveInput
            | Error::UnscopedAdjoint { .. }
            | Error::Catalog { .. } => ErrorClass::Structural,
            Error::UnknownInput { .. }
            | Error::NoDerivativeRule { .. }
            | Error::UnknownNode { .. }
            | Error::AmbiguousNode { .. }
            | Error::NodeArity { .. } => ErrorClass::Resolution,
            Error::MultipleActiveInputs { .. }
            | Error::NonScalarInput { .. }
            | Error::PostConditionLoop
            | Error::ActiveLoopHeader { .. }
            | Error::ActiveRecordStore { .. }
            | Error::AggregateTangent { .. } => ErrorClass::Unsupported,
        }
    }
}

impl_display! {
    match Error{
        Error::Invalid{errors} => "invalid function: {}", errors;
        Error::MissingReturn => "function has no return statement";
        Error::MultipleReturns{stmt} => "function has more than one return statement, found another '{}'", stmt;
        Error::MisplacedReturn{stmt} => "'{}' must be the last statement of the function body and return a single value", stmt;
        Error::ReturnNotReal => "the returned value is not a real";
        Error::ImmutableAssign{var} => "assignment to immutable variable '{}'", var;
        Error::TapeOutsideProbe{tape} => "'{}' is used but implicit stacks are not enabled", tape;
        Error::NoActiveInput => "function has no real parameter to differentiate with respect to";
        Error::UnscopedAdjoint{var} => "adjoint of '{}' is used outside of its scope", var;
        Error::Catalog{name, msg} => "invalid derivative rule %{}: {}", name, msg;
        Error::UnknownInput{name} => "'{}' does not name a parameter or property", name;
        Error::NoDerivativeRule{callee} => "no derivative rule exists for active call %{}", callee;
        Error::UnknownNode{name} => "unknown dependency node {}", name;
        Error::AmbiguousNode{callee, candidates} => "call %{} matches multiple dependency nodes: {}", callee, candidates;
        Error::NodeArity{node, expected, found} => "{} expects {} inputs but the call passes {}", node, expected, found;
        Error::MultipleActiveInputs{candidates} => "only one active input is supported but found {}", candidates;
        Error::NonScalarInput{name, ty} => "'{}' has type {}, only real inputs can be differentiated", name, ty;
        Error::PostConditionLoop => "do-while loops can not be differentiated";
        Error::ActiveLoopHeader{var} => "'{}' is computed from active values by a loop condition and read outside of it", var;
        Error::ActiveRecordStore{field} => "active values can not be stored into records (field '{}')", field;
        Error::AggregateTangent{var} => "'{}' would carry a non-scalar derivative", var;
    }
}

impl std::error::Error for Error {}
