//! JIT end-to-end tests
//!
//! Compile functions through the whole pipeline (inference, lowering,
//! native code) and execute them, comparing every result against a
//! host-side reference implementation.

#![cfg(feature = "cranelift")]

mod common;

use common::*;

use subset_python_jit::ast::{BinaryOp, FunctionDef};
use subset_python_jit::backend::cranelift::CraneliftBackend;
use subset_python_jit::{
    compile_function, CompiledFunction, ExecError, NativeValue, PyType,
};

fn jit(func: &FunctionDef, params: &[(&str, PyType)]) -> (CraneliftBackend, CompiledFunction) {
    let mut backend = CraneliftBackend::new().expect("backend creation failed");
    let compiled =
        compile_function(&mut backend, func, &param_types(params)).expect("compilation failed");
    (backend, compiled)
}

fn run_int(backend: &CraneliftBackend, compiled: &CompiledFunction, args: &[i64]) -> i64 {
    match compiled.invoke(backend, args).expect("invocation failed") {
        NativeValue::Int64(v) => v,
        NativeValue::Int32(v) => i64::from(v),
        NativeValue::Bool(b) => i64::from(b),
    }
}

fn run_bool(backend: &CraneliftBackend, compiled: &CompiledFunction, args: &[i64]) -> bool {
    match compiled.invoke(backend, args).expect("invocation failed") {
        NativeValue::Bool(b) => b,
        other => panic!("expected a bool result, got {:?}", other),
    }
}

// ============================================================================
// Floor division semantics
// ============================================================================

fn binop_program(fn_name: &str, op: BinaryOp) -> FunctionDef {
    fndef(fn_name, &["a", "b"], vec![ret(bin(op, name("a"), name("b")))])
}

#[test]
fn test_floor_division_matches_host_reference() {
    let (backend, compiled) = jit(
        &binop_program("fdiv", BinaryOp::FloorDiv),
        &[("a", PyType::INT64), ("b", PyType::INT64)],
    );

    for a in -20..=20 {
        for b in [-7, -3, -2, -1, 1, 2, 3, 7] {
            assert_eq!(
                run_int(&backend, &compiled, &[a, b]),
                host_floor_div(a, b),
                "{} // {}",
                a,
                b
            );
        }
    }
}

#[test]
fn test_remainder_matches_host_reference() {
    let (backend, compiled) = jit(
        &binop_program("fmod", BinaryOp::Mod),
        &[("a", PyType::INT64), ("b", PyType::INT64)],
    );

    for a in -20..=20 {
        for b in [-7, -3, -2, -1, 1, 2, 3, 7] {
            assert_eq!(
                run_int(&backend, &compiled, &[a, b]),
                host_floor_mod(a, b),
                "{} % {}",
                a,
                b
            );
        }
    }
}

#[test]
fn test_division_rounds_toward_negative_infinity() {
    let (backend, compiled) = jit(
        &binop_program("fdiv", BinaryOp::FloorDiv),
        &[("a", PyType::INT64), ("b", PyType::INT64)],
    );

    assert_eq!(run_int(&backend, &compiled, &[7, 2]), 3);
    assert_eq!(run_int(&backend, &compiled, &[-7, 2]), -4);
    assert_eq!(run_int(&backend, &compiled, &[7, -2]), -4);
    assert_eq!(run_int(&backend, &compiled, &[-7, -2]), 3);
}

#[test]
fn test_add_sub_mul_match_host_arithmetic() {
    let cases: [(BinaryOp, fn(i64, i64) -> i64); 3] = [
        (BinaryOp::Add, |a, b| a + b),
        (BinaryOp::Sub, |a, b| a - b),
        (BinaryOp::Mul, |a, b| a * b),
    ];

    for (op, host) in cases {
        let (backend, compiled) = jit(
            &binop_program("apply", op),
            &[("a", PyType::INT64), ("b", PyType::INT64)],
        );
        for a in -20..=20 {
            for b in -20..=20 {
                assert_eq!(
                    run_int(&backend, &compiled, &[a, b]),
                    host(a, b),
                    "{} {} {}",
                    a,
                    op.symbol(),
                    b
                );
            }
        }
    }
}

#[test]
fn test_unary_negation_through_the_pipeline() {
    let func = fndef("negate", &["x"], vec![ret(neg(name("x")))]);
    let (backend, compiled) = jit(&func, &[("x", PyType::INT64)]);

    assert_eq!(run_int(&backend, &compiled, &[5]), -5);
    assert_eq!(run_int(&backend, &compiled, &[-3]), 3);
    assert_eq!(run_int(&backend, &compiled, &[0]), 0);
}

// ============================================================================
// The selector program
// ============================================================================

#[test]
fn test_select_executes_both_paths() {
    let (backend, compiled) = jit(
        &select_program(),
        &[("choice", PyType::INT32), ("x", PyType::INT64)],
    );

    assert_eq!(compiled.metadata().return_type, PyType::INT64);

    // c = ((2 + 1) // 2) = 1 at runtime. A truthy choice returns d = 4,
    // a falsy one returns x + c.
    assert_eq!(run_int(&backend, &compiled, &[1, 10]), 4);
    assert_eq!(run_int(&backend, &compiled, &[7, 100]), 4);
    assert_eq!(run_int(&backend, &compiled, &[0, 10]), 11);
    assert_eq!(run_int(&backend, &compiled, &[0, -5]), -4);
}

#[test]
fn test_short_circuit_or_in_a_condition() {
    // def either(a, b): if a or b: return 1 else: return 0
    let func = fndef(
        "either",
        &["a", "b"],
        vec![if_else(
            bin(BinaryOp::Or, name("a"), name("b")),
            vec![ret(int(1))],
            vec![ret(int(0))],
        )],
    );
    let (backend, compiled) = jit(&func, &[("a", PyType::INT64), ("b", PyType::INT64)]);

    assert_eq!(run_int(&backend, &compiled, &[0, 0]), 0);
    assert_eq!(run_int(&backend, &compiled, &[1, 0]), 1);
    assert_eq!(run_int(&backend, &compiled, &[0, 2]), 1);
    assert_eq!(run_int(&backend, &compiled, &[-1, 0]), 1, "any nonzero is truthy");
}

// ============================================================================
// Trial-division primality
// ============================================================================

fn is_prime_program() -> FunctionDef {
    // d = 2
    // while d * d <= x:
    //     if not x % d:
    //         return False
    //     d += 1
    // return True
    fndef(
        "is_prime",
        &["x"],
        vec![
            assign("d", int(2)),
            while_loop(
                bin(
                    BinaryOp::Le,
                    bin(BinaryOp::Mul, name("d"), name("d")),
                    name("x"),
                ),
                vec![
                    if_only(
                        not(bin(BinaryOp::Mod, name("x"), name("d"))),
                        vec![ret(boolean(false))],
                    ),
                    aug("d", BinaryOp::Add, int(1)),
                ],
            ),
            ret(boolean(true)),
        ],
    )
}

#[test]
fn test_is_prime_over_the_first_two_hundred() {
    let (backend, compiled) = jit(&is_prime_program(), &[("x", PyType::INT64)]);

    assert_eq!(compiled.metadata().return_type, PyType::Bool);
    for x in 0..200 {
        assert_eq!(
            run_bool(&backend, &compiled, &[x]),
            host_is_prime(x),
            "is_prime({})",
            x
        );
    }
}

// ============================================================================
// Fraction reduction
// ============================================================================

fn simplify_program() -> FunctionDef {
    // x, y = a, b
    // while y > 0:
    //     t = x % y
    //     x = y
    //     y = t
    // return (a // x) * 1000 + b // x
    fndef(
        "simplify",
        &["a", "b"],
        vec![
            assign("x", name("a")),
            assign("y", name("b")),
            while_loop(
                bin(BinaryOp::Gt, name("y"), int(0)),
                vec![
                    assign("t", bin(BinaryOp::Mod, name("x"), name("y"))),
                    assign("x", name("y")),
                    assign("y", name("t")),
                ],
            ),
            ret(bin(
                BinaryOp::Add,
                bin(
                    BinaryOp::Mul,
                    bin(BinaryOp::FloorDiv, name("a"), name("x")),
                    int(1000),
                ),
                bin(BinaryOp::FloorDiv, name("b"), name("x")),
            )),
        ],
    )
}

#[test]
fn test_simplify_reduces_fractions() {
    let (backend, compiled) = jit(
        &simplify_program(),
        &[("a", PyType::INT64), ("b", PyType::INT64)],
    );

    for a in 5..20 {
        for b in 5..20 {
            assert_eq!(
                run_int(&backend, &compiled, &[a, b]),
                Frac::new(a, b).encode(),
                "simplify({}, {})",
                a,
                b
            );
        }
    }
}

#[test]
fn test_simplify_with_a_loop_that_never_runs() {
    let (backend, compiled) = jit(
        &simplify_program(),
        &[("a", PyType::INT64), ("b", PyType::INT64)],
    );

    // b = 0 skips the loop entirely: gcd stays a, so a/a = 1 and 0/a = 0.
    assert_eq!(run_int(&backend, &compiled, &[7, 0]), 1000);
}

// ============================================================================
// Fraction arithmetic with operator dispatch
// ============================================================================

fn arith_program() -> FunctionDef {
    // Computes a/b (op) c/d as a reduced fraction, encoded as
    // numerator * 1000 + denominator. op: 0 sub, 1 add, 2 mul, else div.
    let gcd_loop = vec![
        assign("x", name("n")),
        assign("y", name("den")),
        while_loop(
            bin(BinaryOp::Gt, name("y"), int(0)),
            vec![
                assign("t", bin(BinaryOp::Mod, name("x"), name("y"))),
                assign("x", name("y")),
                assign("y", name("t")),
            ],
        ),
        ret(bin(
            BinaryOp::Add,
            bin(
                BinaryOp::Mul,
                bin(BinaryOp::FloorDiv, name("n"), name("x")),
                int(1000),
            ),
            bin(BinaryOp::FloorDiv, name("den"), name("x")),
        )),
    ];

    let cross = |lhs: &str, rhs: &str| bin(BinaryOp::Mul, name(lhs), name(rhs));
    let mut stmts = vec![if_else(
        bin(BinaryOp::Eq, name("op"), int(0)),
        vec![
            assign("n", bin(BinaryOp::Sub, cross("a", "d"), cross("c", "b"))),
            assign("den", cross("b", "d")),
        ],
        vec![if_else(
            bin(BinaryOp::Eq, name("op"), int(1)),
            vec![
                assign("n", bin(BinaryOp::Add, cross("a", "d"), cross("c", "b"))),
                assign("den", cross("b", "d")),
            ],
            vec![if_else(
                bin(BinaryOp::Eq, name("op"), int(2)),
                vec![
                    assign("n", cross("a", "c")),
                    assign("den", cross("b", "d")),
                ],
                vec![
                    assign("n", cross("a", "d")),
                    assign("den", cross("b", "c")),
                ],
            )],
        )],
    )];
    stmts.extend(gcd_loop);

    fndef("arith", &["op", "a", "b", "c", "d"], stmts)
}

#[test]
fn test_fraction_arithmetic_matches_host_fractions() {
    let (backend, compiled) = jit(
        &arith_program(),
        &[
            ("op", PyType::INT32),
            ("a", PyType::INT64),
            ("b", PyType::INT64),
            ("c", PyType::INT64),
            ("d", PyType::INT64),
        ],
    );

    for op in 0..4 {
        for a in 5..10 {
            for b in 5..10 {
                for c in 5..10 {
                    for d in 5..10 {
                        let lhs = Frac::new(a, b);
                        let rhs = Frac::new(c, d);
                        let expected = match op {
                            0 => lhs.sub(&rhs),
                            1 => lhs.add(&rhs),
                            2 => lhs.mul(&rhs),
                            _ => lhs.div(&rhs),
                        }
                        .encode();
                        assert_eq!(
                            run_int(&backend, &compiled, &[op, a, b, c, d]),
                            expected,
                            "arith({}, {}/{}, {}/{})",
                            op,
                            a,
                            b,
                            c,
                            d
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn test_subtraction_can_go_negative() {
    let (backend, compiled) = jit(
        &arith_program(),
        &[
            ("op", PyType::INT32),
            ("a", PyType::INT64),
            ("b", PyType::INT64),
            ("c", PyType::INT64),
            ("d", PyType::INT64),
        ],
    );

    // 7/90 - 7/10 = -56/90 = -28/45
    assert_eq!(run_int(&backend, &compiled, &[0, 7, 90, 63, 90]), -27955);
    // Equal fractions cancel to 0/1
    assert_eq!(run_int(&backend, &compiled, &[0, 6, 8, 3, 4]), 1);
}

// ============================================================================
// Bridge validation
// ============================================================================

#[test]
fn test_arity_is_checked_before_running() {
    let (backend, compiled) = jit(
        &select_program(),
        &[("choice", PyType::INT32), ("x", PyType::INT64)],
    );

    let err = compiled.invoke(&backend, &[1]).unwrap_err();
    assert!(matches!(
        err,
        ExecError::ArityMismatch {
            expected: 2,
            got: 1
        }
    ));
}

#[test]
fn test_int32_arguments_are_range_checked() {
    let (backend, compiled) = jit(
        &select_program(),
        &[("choice", PyType::INT32), ("x", PyType::INT64)],
    );

    let too_big = i64::from(i32::MAX) + 1;
    let err = compiled.invoke(&backend, &[too_big, 0]).unwrap_err();
    assert!(matches!(err, ExecError::ArgumentRange { .. }));

    // Boundary values are fine
    assert!(compiled
        .invoke(&backend, &[i64::from(i32::MAX), 0])
        .is_ok());
    assert!(compiled
        .invoke(&backend, &[i64::from(i32::MIN), 0])
        .is_ok());
}

#[test]
fn test_bool_arguments_only_accept_zero_and_one() {
    let func = fndef(
        "pick",
        &["flag", "x"],
        vec![if_else(
            name("flag"),
            vec![ret(name("x"))],
            vec![ret(int(0))],
        )],
    );
    let (backend, compiled) = jit(&func, &[("flag", PyType::Bool), ("x", PyType::INT64)]);

    assert_eq!(run_int(&backend, &compiled, &[1, 5]), 5);
    assert_eq!(run_int(&backend, &compiled, &[0, 5]), 0);

    let err = compiled.invoke(&backend, &[2, 5]).unwrap_err();
    assert!(matches!(err, ExecError::ArgumentRange { .. }));
}

#[test]
fn test_none_results_cannot_be_decoded() {
    let func = fndef(
        "noop",
        &["x"],
        vec![
            assign("y", bin(BinaryOp::Add, name("x"), int(1))),
            ret_bare(),
        ],
    );
    let (backend, compiled) = jit(&func, &[("x", PyType::INT64)]);

    assert_eq!(compiled.metadata().return_type, PyType::None);
    let err = compiled.invoke(&backend, &[3]).unwrap_err();
    assert!(matches!(
        err,
        ExecError::UnsupportedReturn { ty: PyType::None }
    ));
}
