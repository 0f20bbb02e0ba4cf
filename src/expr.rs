//! The expression tree consumed by the checker and the evaluator.
//!
//! Nodes are reference counted so the evaluator can hold on to the parts of a definition it still
//! has to run, and so continuations can keep their production rules alive after the definition
//! that built them has returned.

use std::rc::Rc;

use loom_ty::{Name, Ty};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pattern {
    Name(Name),
    /// Consumes a unit terminator.
    Unit,
    Tuple(Vec<Self>),
}

impl Pattern {
    pub fn name(name: impl Into<Name>) -> Self {
        Pattern::Name(name.into())
    }

    pub fn tuple(items: impl IntoIterator<Item = Pattern>) -> Self {
        Pattern::Tuple(items.into_iter().collect())
    }

    pub fn pair(a: &str, b: &str) -> Self {
        Pattern::Tuple(vec![Pattern::name(a), Pattern::name(b)])
    }
}

#[derive(Clone, Debug)]
pub enum Expr {
    Var(Name),
    Unit,
    Tuple(Rc<[Rc<Self>]>),
    /// Apply the variant `label` of the inductive type `ty` to a payload.
    Make {
        ty: Ty,
        label: Name,
        payload: Rc<Self>,
    },
    Match(Rc<Match>),
    /// Re-enter the nearest `begin` (or the one called `label`).
    ///
    /// Into a match the argument is the next scrutinee; inside an unfold there is no argument and
    /// the result is the next continuation.
    Loop {
        label: Option<Name>,
        arg: Option<Rc<Self>>,
    },
    Unfold(Rc<Unfold>),
    /// Ask a continuation for one step.
    Request {
        subject: Rc<Self>,
        label: Name,
    },
    Let {
        pattern: Pattern,
        ty: Option<Ty>,
        value: Rc<Self>,
        body: Rc<Self>,
    },
    Do {
        steps: Rc<[Step]>,
        body: Rc<Self>,
    },
    Call {
        name: Name,
        args: Rc<[Rc<Self>]>,
    },
    /// Produces a pair of independent copies.
    Dup(Rc<Self>),
    /// Produces `()`.
    Discard(Rc<Self>),
}

#[derive(Clone, Debug)]
pub enum Step {
    Let {
        pattern: Pattern,
        ty: Option<Ty>,
        value: Rc<Expr>,
    },
    /// A step evaluated for its effect; it must produce `()`.
    Run(Rc<Expr>),
}

#[derive(Clone, Debug)]
pub struct Arm {
    pub label: Name,
    pub pattern: Pattern,
    pub body: Rc<Expr>,
}

impl Arm {
    pub fn new(label: impl Into<Name>, pattern: Pattern, body: Rc<Expr>) -> Self {
        Self {
            label: label.into(),
            pattern,
            body,
        }
    }
}

/// Marks a match as a loop target.
#[derive(Clone, Debug, Default)]
pub struct Begin {
    pub label: Option<Name>,
}

#[derive(Clone, Debug)]
pub struct Match {
    pub scrutinee: Rc<Expr>,
    pub begin: Option<Begin>,
    pub arms: Vec<Arm>,
}

/// Answers one request of a coinductive type.
#[derive(Clone, Debug)]
pub struct Handler {
    pub label: Name,
    pub body: Rc<Expr>,
}

impl Handler {
    pub fn new(label: impl Into<Name>, body: Rc<Expr>) -> Self {
        Self {
            label: label.into(),
            body,
        }
    }
}

/// Introduces a value of a coinductive type, capturing every live binding as its state.
#[derive(Clone, Debug)]
pub struct Unfold {
    pub ty: Ty,
    pub label: Option<Name>,
    pub handlers: Vec<Handler>,
}

impl Unfold {
    pub fn handler(&self, label: &str) -> Option<&Handler> {
        self.handlers.iter().find(|handler| &*handler.label == label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Ty>,
    pub ret: Ty,
}

impl Signature {
    pub fn new(params: impl IntoIterator<Item = Ty>, ret: Ty) -> Self {
        Self {
            params: params.into_iter().collect(),
            ret,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Definition {
    pub name: Name,
    pub params: Vec<Pattern>,
    pub body: Rc<Expr>,
}

impl Definition {
    pub fn new(
        name: impl Into<Name>,
        params: impl IntoIterator<Item = Pattern>,
        body: Rc<Expr>,
    ) -> Self {
        Self {
            name: name.into(),
            params: params.into_iter().collect(),
            body,
        }
    }
}

// Constructors standing in for the surface syntax.
impl Expr {
    pub fn var(name: impl Into<Name>) -> Rc<Self> {
        Rc::new(Expr::Var(name.into()))
    }

    pub fn unit() -> Rc<Self> {
        Rc::new(Expr::Unit)
    }

    pub fn tuple(items: impl IntoIterator<Item = Rc<Expr>>) -> Rc<Self> {
        Rc::new(Expr::Tuple(items.into_iter().collect()))
    }

    pub fn make(ty: Ty, label: impl Into<Name>, payload: Rc<Expr>) -> Rc<Self> {
        Rc::new(Expr::Make {
            ty,
            label: label.into(),
            payload,
        })
    }

    /// A plain match that cannot be re-entered.
    pub fn case(scrutinee: Rc<Expr>, arms: impl IntoIterator<Item = Arm>) -> Rc<Self> {
        Rc::new(Expr::Match(Rc::new(Match {
            scrutinee,
            begin: None,
            arms: arms.into_iter().collect(),
        })))
    }

    /// `scrutinee begin { arms }`
    pub fn begin(scrutinee: Rc<Expr>, arms: impl IntoIterator<Item = Arm>) -> Rc<Self> {
        Self::begin_labeled(None, scrutinee, arms)
    }

    pub fn begin_labeled(
        label: Option<&str>,
        scrutinee: Rc<Expr>,
        arms: impl IntoIterator<Item = Arm>,
    ) -> Rc<Self> {
        Rc::new(Expr::Match(Rc::new(Match {
            scrutinee,
            begin: Some(Begin {
                label: label.map(Name::from),
            }),
            arms: arms.into_iter().collect(),
        })))
    }

    /// `loop` into the nearest enclosing match with a new scrutinee.
    pub fn loop_(arg: Rc<Expr>) -> Rc<Self> {
        Rc::new(Expr::Loop {
            label: None,
            arg: Some(arg),
        })
    }

    /// `loop` inside an unfold, yielding the next continuation.
    pub fn loop_unfold() -> Rc<Self> {
        Rc::new(Expr::Loop {
            label: None,
            arg: None,
        })
    }

    pub fn loop_to(label: &str, arg: Option<Rc<Expr>>) -> Rc<Self> {
        Rc::new(Expr::Loop {
            label: Some(label.into()),
            arg,
        })
    }

    pub fn unfold(ty: Ty, handlers: impl IntoIterator<Item = Handler>) -> Rc<Self> {
        Self::unfold_labeled(None, ty, handlers)
    }

    /// An unfold that `loop_to(label, None)` can reach from inside nested `begin`s.
    pub fn unfold_labeled(
        label: Option<&str>,
        ty: Ty,
        handlers: impl IntoIterator<Item = Handler>,
    ) -> Rc<Self> {
        Rc::new(Expr::Unfold(Rc::new(Unfold {
            ty,
            label: label.map(Name::from),
            handlers: handlers.into_iter().collect(),
        })))
    }

    pub fn request(subject: Rc<Expr>, label: impl Into<Name>) -> Rc<Self> {
        Rc::new(Expr::Request {
            subject,
            label: label.into(),
        })
    }

    pub fn let_(pattern: Pattern, value: Rc<Expr>, body: Rc<Expr>) -> Rc<Self> {
        Rc::new(Expr::Let {
            pattern,
            ty: None,
            value,
            body,
        })
    }

    pub fn let_typed(pattern: Pattern, ty: Ty, value: Rc<Expr>, body: Rc<Expr>) -> Rc<Self> {
        Rc::new(Expr::Let {
            pattern,
            ty: Some(ty),
            value,
            body,
        })
    }

    /// `do { steps } in body`
    pub fn do_(steps: impl IntoIterator<Item = Step>, body: Rc<Expr>) -> Rc<Self> {
        Rc::new(Expr::Do {
            steps: steps.into_iter().collect(),
            body,
        })
    }

    pub fn call(name: impl Into<Name>, args: impl IntoIterator<Item = Rc<Expr>>) -> Rc<Self> {
        Rc::new(Expr::Call {
            name: name.into(),
            args: args.into_iter().collect(),
        })
    }

    pub fn dup(value: Rc<Expr>) -> Rc<Self> {
        Rc::new(Expr::Dup(value))
    }

    pub fn discard(value: Rc<Expr>) -> Rc<Self> {
        Rc::new(Expr::Discard(value))
    }
}

impl Step {
    pub fn let_(pattern: Pattern, value: Rc<Expr>) -> Self {
        Step::Let {
            pattern,
            ty: None,
            value,
        }
    }

    pub fn let_typed(pattern: Pattern, ty: Ty, value: Rc<Expr>) -> Self {
        Step::Let {
            pattern,
            ty: Some(ty),
            value,
        }
    }

    pub fn run(value: Rc<Expr>) -> Self {
        Step::Run(value)
    }
}
