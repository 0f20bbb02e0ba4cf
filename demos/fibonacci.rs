use loom::*;

fn nat() -> Ty {
    Ty::named("Nat")
}

fn seq() -> Ty {
    Ty::named("Seq")
}

fn count(mut value: &Value) -> u64 {
    let mut n = 0;
    while let Some((_, payload)) = value.as_variant().filter(|(label, _)| label.as_str() == "add1") {
        n += 1;
        value = payload;
    }
    n
}

fn main() -> Result<(), Error> {
    let mut program = Program::new();

    program.declare_type(
        TypeDef::inductive("Nat")
            .variant("zero", Ty::Unit)
            .variant("add1", Ty::Self_),
    )?;
    program.declare_type(
        TypeDef::coinductive("Seq")
            .variant("next", Ty::tuple([nat(), Ty::Self_]))
            .variant("close", Ty::Unit),
    )?;

    // add(m, n) = m begin { zero () => n, add1 m => add1(loop m) }
    program.declare("add", Signature::new([nat(), nat()], nat()))?;
    program.define(Definition::new(
        "add",
        [Pattern::name("m"), Pattern::name("n")],
        Expr::begin(
            Expr::var("m"),
            [
                Arm::new("zero", Pattern::Unit, Expr::var("n")),
                Arm::new(
                    "add1",
                    Pattern::name("m"),
                    Expr::make(nat(), "add1", Expr::loop_(Expr::var("m"))),
                ),
            ],
        ),
    ))?;

    // fib(a, b) = unfold Seq {
    //     next => let (a, out) = dup a in let (b, b2) = dup b in
    //             let sum = add(a, b2) in let a = b in let b = sum in (out, loop),
    //     close => do { drop a; drop b } in (),
    // }
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
    program.declare("fib", Signature::new([nat(), nat()], seq()))?;
    program.define(Definition::new(
        "fib",
        [Pattern::name("a"), Pattern::name("b")],
        Expr::unfold(
            seq(),
            [Handler::new("next", next), Handler::new("close", close)],
        ),
    ))?;

    let one = Value::variant("add1", Value::variant("zero", Value::Unit));
    let mut fib = program.eval("fib", vec![Value::variant("zero", Value::Unit), one])?;
    for _ in 0..10 {
        let Unfolding::Step(step) = program.request(fib, "next")? else {
            return Ok(());
        };
        let Some((head, rest)) = step.into_pair() else {
            return Ok(());
        };
        println!("{}", count(&head));
        fib = rest;
    }
    program.request(fib, "close")?;
    Ok(())
}
