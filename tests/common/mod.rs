#![allow(dead_code)]

use std::rc::Rc;

use loom::{Arm, Definition, Expr, Handler, Pattern, Program, Signature, Step, Ty, TypeDef, Value};

pub fn nat_ty() -> Ty {
    Ty::named("Nat")
}

pub fn seq_ty() -> Ty {
    Ty::named("Seq")
}

pub fn list_ty(item: Ty) -> Ty {
    Ty::app("List", [item])
}

pub fn zero() -> Rc<Expr> {
    Expr::make(nat_ty(), "zero", Expr::unit())
}

pub fn add1(n: Rc<Expr>) -> Rc<Expr> {
    Expr::make(nat_ty(), "add1", n)
}

pub fn to_nat(n: u64) -> Value {
    (0..n).fold(Value::variant("zero", Value::Unit), |acc, _| {
        Value::variant("add1", acc)
    })
}

pub fn from_nat(mut value: &Value) -> u64 {
    let mut n = 0;
    while let Some(("add1", payload)) = value.as_variant().map(|(label, p)| (label.as_str(), p)) {
        n += 1;
        value = payload;
    }
    n
}

pub fn to_list(items: impl IntoIterator<Item = Value>) -> Value {
    let items: Vec<_> = items.into_iter().collect();
    items
        .into_iter()
        .rev()
        .fold(Value::variant("nil", Value::Unit), |rest, item| {
            Value::variant("cons", Value::tuple([item, rest]))
        })
}

/// `Nat`, `List<T>` and `Seq`.
pub fn types(program: &mut Program) {
    program
        .declare_type(
            TypeDef::inductive("Nat")
                .variant("zero", Ty::Unit)
                .variant("add1", Ty::Self_),
        )
        .unwrap();
    program
        .declare_type(
            TypeDef::inductive("List")
                .param("T")
                .variant("nil", Ty::Unit)
                .variant("cons", Ty::tuple([Ty::param("T"), Ty::Self_])),
        )
        .unwrap();
    program
        .declare_type(
            TypeDef::coinductive("Seq")
                .variant("next", Ty::tuple([nat_ty(), Ty::Self_]))
                .variant("close", Ty::Unit),
        )
        .unwrap();
}

/// Define `name : params -> ret`.
pub fn define(
    program: &mut Program,
    name: &str,
    params: &[(&str, Ty)],
    ret: Ty,
    body: Rc<Expr>,
) -> Result<(), loom::Error> {
    let tys = params.iter().map(|(_, ty)| ty.clone());
    program.declare(name, Signature::new(tys, ret))?;
    let patterns = params.iter().map(|(param, _)| Pattern::name(*param));
    program.define(Definition::new(name, patterns, body))
}

/// add(m, n) = m begin { zero () => n, add1 m => add1(loop m) }
pub fn add_fold() -> Rc<Expr> {
    Expr::begin(
        Expr::var("m"),
        [
            Arm::new("zero", Pattern::Unit, Expr::var("n")),
            Arm::new("add1", Pattern::name("m"), add1(Expr::loop_(Expr::var("m")))),
        ],
    )
}

/// add(m, n) = m begin { zero () => n, add1 m => let n = add1(n) in loop m }
pub fn add_acc() -> Rc<Expr> {
    Expr::begin(
        Expr::var("m"),
        [
            Arm::new("zero", Pattern::Unit, Expr::var("n")),
            Arm::new(
                "add1",
                Pattern::name("m"),
                Expr::let_(
                    Pattern::name("n"),
                    add1(Expr::var("n")),
                    Expr::loop_(Expr::var("m")),
                ),
            ),
        ],
    )
}

/// The Fibonacci numbers starting from `a, b`:
///
/// ```text
/// unfold Seq {
///     next => let (a, out) = dup a in let (b, b2) = dup b in
///             let sum = add(a, b2) in let a = b in let b = sum in (out, loop),
///     close => do { drop a; drop b } in (),
/// }
/// ```
pub fn fib_from() -> Rc<Expr> {
    let next = Expr::let_(
        Pattern::pair("a", "out"),
        Expr::dup(Expr::var("a")),
        Expr::let_(
            Pattern::pair("b", "b2"),
            Expr::dup(Expr::var("b")),
            Expr::let_(
                Pattern::name("sum"),
                Expr::call("add", [Expr::var("a"), Expr::var("b2")]),
                Expr::let_(
                    Pattern::name("a"),
                    Expr::var("b"),
                    Expr::let_(
                        Pattern::name("b"),
                        Expr::var("sum"),
                        Expr::tuple([Expr::var("out"), Expr::loop_unfold()]),
                    ),
                ),
            ),
        ),
    );
    let close = Expr::do_(
        [
            Step::run(Expr::discard(Expr::var("a"))),
            Step::run(Expr::discard(Expr::var("b"))),
        ],
        Expr::unit(),
    );
    Expr::unfold(
        seq_ty(),
        [Handler::new("next", next), Handler::new("close", close)],
    )
}

/// unfold Seq { next => (zero, loop), close => () }
pub fn zeros() -> Rc<Expr> {
    Expr::unfold(
        seq_ty(),
        [
            Handler::new("next", Expr::tuple([zero(), Expr::loop_unfold()])),
            Handler::new("close", Expr::unit()),
        ],
    )
}

/// Pull `n` elements out of `s`, then close it.
///
/// ```text
/// n begin {
///     zero () => s.close,
///     add1 n => let (x, s) = s.next in do { drop x } in loop n,
/// }
/// ```
pub fn drain() -> Rc<Expr> {
    Expr::begin(
        Expr::var("n"),
        [
            Arm::new("zero", Pattern::Unit, Expr::request(Expr::var("s"), "close")),
            Arm::new(
                "add1",
                Pattern::name("n"),
                Expr::let_(
                    Pattern::pair("x", "s"),
                    Expr::request(Expr::var("s"), "next"),
                    Expr::do_(
                        [Step::run(Expr::discard(Expr::var("x")))],
                        Expr::loop_(Expr::var("n")),
                    ),
                ),
            ),
        ],
    )
}

/// A program with the standard types and every definition above.
pub fn program() -> Program {
    let mut program = Program::new();
    types(&mut program);
    let nats = [("m", nat_ty()), ("n", nat_ty())];
    define(&mut program, "add", &nats, nat_ty(), add_fold()).unwrap();
    define(&mut program, "add_acc", &nats, nat_ty(), add_acc()).unwrap();
    define(
        &mut program,
        "fib_from",
        &[("a", nat_ty()), ("b", nat_ty())],
        seq_ty(),
        fib_from(),
    )
    .unwrap();
    define(
        &mut program,
        "fib",
        &[],
        seq_ty(),
        Expr::call("fib_from", [zero(), add1(zero())]),
    )
    .unwrap();
    define(&mut program, "zeros", &[], seq_ty(), zeros()).unwrap();
    define(
        &mut program,
        "drain",
        &[("s", seq_ty()), ("n", nat_ty())],
        Ty::Unit,
        drain(),
    )
    .unwrap();
    program
}
