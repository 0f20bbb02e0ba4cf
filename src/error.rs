use loom_ty::{Name, Ty, TypeError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinearityError {
    #[error("`{0}` is never consumed")]
    Unused(Name),
    #[error("`{0}` is consumed more than once; `dup` it to use it twice")]
    Reused(Name),
    #[error("`{0}` is bound again while still unconsumed")]
    Shadowed(Name),
    #[error("`{0}` is consumed on some branches but not on others")]
    Divergent(Name),
    #[error("`loop` must carry `{0}` into the next iteration, but it is no longer available")]
    LoopMissing(Name),
    #[error("`{0}` is still unconsumed at `loop` and is not carried by it")]
    LoopExtra(Name),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExhaustivenessError {
    #[error("no arm for variant `{label}` of `{ty}`")]
    Missing { ty: Ty, label: Name },
    #[error("more than one arm for variant `{label}` of `{ty}`")]
    Duplicate { ty: Ty, label: Name },
    #[error("`{label}` is not a variant of `{ty}`")]
    Unknown { ty: Ty, label: Name },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("values of type `{0}` cannot be duplicated")]
    Duplicate(Ty),
    #[error("values of type `{0}` cannot be discarded; release them with their own request")]
    Discard(Ty),
}

/// Problems with names, patterns and `loop` targets inside a definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("pattern does not fit a value of type `{0}`")]
    PatternMismatch(Ty),
    #[error("unbound variable `{0}`")]
    Unbound(Name),
    #[error("`{0}` has no signature")]
    Undeclared(Name),
    #[error("`{0}` is already defined")]
    Redefinition(Name),
    #[error("`{name}` takes {expected} argument(s) but {found} were given")]
    ArgumentCount {
        name: Name,
        expected: usize,
        found: usize,
    },
    #[error("no enclosing `begin` for `loop{}`", .0.as_ref().map(|label| format!(" {}", label)).unwrap_or_default())]
    NoLoopTarget(Option<Name>),
    #[error("`loop` into a match needs a new scrutinee and `loop` inside an unfold takes none")]
    LoopArgument,
    #[error("the result type of this `begin` is unknown where `loop` is used; annotate it")]
    AmbiguousLoop,
}

/// Why a definition was rejected. Nothing of a rejected definition ever runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Linearity(#[from] LinearityError),
    #[error(transparent)]
    Exhaustiveness(#[from] ExhaustivenessError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("no definition named `{0}`")]
    NoSuchDef(Name),
    #[error("no binding named `{0}`")]
    NoSuchBinding(Name),
    #[error("`{name}` takes {expected} argument(s) but {found} were given")]
    ArgumentCount {
        name: Name,
        expected: usize,
        found: usize,
    },
    #[error("argument {index} of `{name}` is not a value of type `{ty}`")]
    ArgumentType { name: Name, index: usize, ty: Ty },
    #[error("pattern has {expected} component(s) but the value has {found}")]
    Arity { expected: usize, found: usize },
    #[error("expected {expected}, found {found}")]
    Shape { expected: &'static str, found: String },
    #[error("no arm matches variant `{0}`")]
    NoMatchingArm(Name),
    #[error("`{label}` is not a request of `{ty}`")]
    UnknownRequest { ty: Ty, label: Name },
    #[error("`loop` has no enclosing `begin` to return to")]
    NoLoopTarget,
    #[error("evaluation exceeded its budget of {0} steps")]
    StepLimit(u64),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// Any failure surfaced by a [`Program`](crate::Program).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("`{0}` is already declared")]
    Redeclared(Name),
    #[error("definition `{name}` rejected: {source}")]
    Check {
        name: Name,
        #[source]
        source: CheckError,
    },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
