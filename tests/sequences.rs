mod common;

use common::{add1, define, from_nat, list_ty, nat_ty, program, seq_ty, to_list, to_nat, zero};
use loom::{Arm, Error, Expr, Handler, Pattern, RuntimeError, Ty, TypeDef, Unfolding, Value};

fn next(program: &loom::Program, seq: Value) -> (u64, Value) {
    let Unfolding::Step(step) = program.request(seq, "next").unwrap() else {
        panic!("`next` should produce a step");
    };
    let (head, rest) = step.into_pair().unwrap();
    (from_nat(&head), rest)
}

#[test]
fn addition_in_both_styles() {
    let program = program();
    for name in ["add", "add_acc"] {
        assert_eq!(
            program.eval(name, vec![to_nat(0), to_nat(1)]).unwrap(),
            to_nat(1)
        );
        assert_eq!(
            program.eval(name, vec![to_nat(1), to_nat(1)]).unwrap(),
            to_nat(2)
        );
        assert_eq!(
            program.eval(name, vec![to_nat(7), to_nat(5)]).unwrap(),
            to_nat(12)
        );
    }
}

#[test]
fn fibonacci_on_demand() {
    let program = program();
    let mut seq = program.eval("fib", vec![]).unwrap();
    let mut seen = Vec::new();
    for _ in 0..10 {
        let (head, rest) = next(&program, seq);
        seen.push(head);
        seq = rest;
    }
    assert_eq!(seen, [0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);
    assert_eq!(program.request(seq, "close").unwrap(), Unfolding::Closed);
}

#[test]
fn closing_a_fresh_sequence() {
    let program = program();
    let seq = program.eval("fib", vec![]).unwrap();
    assert!(matches!(seq, Value::Cont(_)));
    assert_eq!(program.request(seq, "close").unwrap(), Unfolding::Closed);
}

#[test]
fn continuations_print_their_state() {
    let program = program();
    let seq = program.eval("fib", vec![]).unwrap();
    assert_eq!(seq.to_string(), "<Seq: a = zero, b = add1(zero)>");
    program.request(seq, "close").unwrap();
}

#[test]
fn unknown_requests_fail() {
    let program = program();
    let seq = program.eval("zeros", vec![]).unwrap();
    assert_eq!(
        program.request(seq, "peek"),
        Err(Error::Runtime(RuntimeError::UnknownRequest {
            ty: Ty::named("Seq"),
            label: "peek".into(),
        })),
    );
    assert!(matches!(
        program.request(to_nat(1), "next"),
        Err(Error::Runtime(RuntimeError::Shape { .. }))
    ));
}

#[test]
fn draining_runs_in_bounded_frames() {
    let program = program();
    let run = |n| {
        let seq = program.eval("zeros", vec![]).unwrap();
        program.eval_traced("drain", vec![seq, to_nat(n)]).unwrap()
    };

    let (short_result, short) = run(10);
    let (long_result, long) = run(100_000);
    assert_eq!(short_result, Value::Unit);
    assert_eq!(long_result, Value::Unit);
    assert_eq!(short.peak_frames, long.peak_frames);
    assert!(long.steps > 100_000);
}

#[test]
fn large_values_survive_a_round_trip() {
    let program = program();
    let sum = program
        .eval("add_acc", vec![to_nat(100_000), to_nat(1)])
        .unwrap();
    assert_eq!(from_nat(&sum), 100_001);

    let sum = program
        .eval("add", vec![to_nat(50_000), to_nat(0)])
        .unwrap();
    assert_eq!(from_nat(&sum), 50_000);
}

#[test]
fn arguments_are_checked_against_the_signature() {
    let program = program();
    assert_eq!(
        program.eval("add", vec![to_nat(1)]),
        Err(Error::Runtime(RuntimeError::ArgumentCount {
            name: "add".into(),
            expected: 2,
            found: 1,
        })),
    );
    assert_eq!(
        program.eval("add", vec![to_nat(1), Value::Unit]),
        Err(Error::Runtime(RuntimeError::ArgumentType {
            name: "add".into(),
            index: 1,
            ty: Ty::named("Nat"),
        })),
    );
    assert_eq!(
        program.eval("mul", vec![]),
        Err(Error::Runtime(RuntimeError::NoSuchDef("mul".into()))),
    );
}

#[test]
fn deep_copies_compare_equal() {
    let mut program = program();
    define(
        &mut program,
        "twins",
        &[("x", nat_ty())],
        Ty::tuple([nat_ty(), nat_ty()]),
        Expr::dup(Expr::var("x")),
    )
    .unwrap();
    let (a, b) = program
        .eval("twins", vec![to_nat(100_000)])
        .unwrap()
        .into_pair()
        .unwrap();
    assert!(a == to_nat(100_000));
    assert!(a == b);
    assert!(b != to_nat(99_999));
}

#[test]
fn rose_trees_fold_through_their_children() {
    let mut program = program();
    program
        .declare_type(
            TypeDef::inductive("Rose")
                .variant("leaf", Ty::Unit)
                .variant("node", list_ty(Ty::Self_)),
        )
        .unwrap();

    // leaves(t) = t case {
    //     leaf () => add1(zero),
    //     node kids => kids begin { nil () => zero, cons (k, rest) => add(leaves(k), loop rest) },
    // }
    let kids = Expr::begin(
        Expr::var("kids"),
        [
            Arm::new("nil", Pattern::Unit, zero()),
            Arm::new(
                "cons",
                Pattern::pair("k", "rest"),
                Expr::call(
                    "add",
                    [
                        Expr::call("leaves", [Expr::var("k")]),
                        Expr::loop_(Expr::var("rest")),
                    ],
                ),
            ),
        ],
    );
    let body = Expr::case(
        Expr::var("t"),
        [
            Arm::new("leaf", Pattern::Unit, add1(zero())),
            Arm::new("node", Pattern::name("kids"), kids),
        ],
    );
    define(&mut program, "leaves", &[("t", Ty::named("Rose"))], nat_ty(), body).unwrap();

    let leaf = || Value::variant("leaf", Value::Unit);
    let node = |kids: Vec<Value>| Value::variant("node", to_list(kids));
    let tree = node(vec![leaf(), node(vec![leaf(), leaf()]), node(vec![])]);
    assert_eq!(program.eval("leaves", vec![tree]), Ok(to_nat(3)));
    assert_eq!(program.eval("leaves", vec![node(vec![])]), Ok(to_nat(0)));
}

#[test]
fn labeled_unfolds_are_reachable_from_nested_begins() {
    let mut program = program();

    // countdown(k) = unfold s Seq {
    //     next => let (k, out) = dup k in (out, k begin {
    //         zero () => let k = zero in loop s,
    //         add1 m => let k = m in loop s,
    //     }),
    //     close => drop k,
    // }
    let step = Expr::begin(
        Expr::var("k"),
        [
            Arm::new(
                "zero",
                Pattern::Unit,
                Expr::let_(Pattern::name("k"), zero(), Expr::loop_to("s", None)),
            ),
            Arm::new(
                "add1",
                Pattern::name("m"),
                Expr::let_(Pattern::name("k"), Expr::var("m"), Expr::loop_to("s", None)),
            ),
        ],
    );
    let produce = Expr::let_(
        Pattern::pair("k", "out"),
        Expr::dup(Expr::var("k")),
        Expr::tuple([Expr::var("out"), step]),
    );
    let body = Expr::unfold_labeled(
        Some("s"),
        seq_ty(),
        [
            Handler::new("next", produce),
            Handler::new("close", Expr::discard(Expr::var("k"))),
        ],
    );
    define(&mut program, "countdown", &[("k", nat_ty())], seq_ty(), body).unwrap();

    let mut seq = program.eval("countdown", vec![to_nat(2)]).unwrap();
    let mut seen = Vec::new();
    for _ in 0..4 {
        let (head, rest) = next(&program, seq);
        seen.push(head);
        seq = rest;
    }
    assert_eq!(seen, [2, 1, 0, 0]);
    assert_eq!(program.request(seq, "close").unwrap(), Unfolding::Closed);
}
