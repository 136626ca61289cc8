//! Shared helpers for integration tests
// This helper module is consumed selectively by several integration test
// files. Keep these utilities available without forcing every helper to be
// referenced in each individual test target.
#![allow(dead_code)]

use std::collections::HashMap;

use num_integer::gcd;

use subset_python_jit::ast::{BinaryOp, Block, Expr, FunctionDef, Literal, Stmt, UnaryOp};
use subset_python_jit::span::Span;
use subset_python_jit::PyType;

// ============================================================================
// AST construction
// ============================================================================

pub fn sp() -> Span {
    Span::new(0, 0, 1, 1, 1, 1)
}

pub fn int(value: i64) -> Expr {
    Expr::Literal(Literal::Int(value), sp())
}

pub fn boolean(value: bool) -> Expr {
    Expr::Literal(Literal::Bool(value), sp())
}

pub fn none_lit() -> Expr {
    Expr::Literal(Literal::None, sp())
}

pub fn name(n: &str) -> Expr {
    Expr::Name(n.to_string(), sp())
}

pub fn bin(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
        span: sp(),
    }
}

pub fn not(operand: Expr) -> Expr {
    Expr::UnaryOp {
        op: UnaryOp::Not,
        operand: Box::new(operand),
        span: sp(),
    }
}

pub fn neg(operand: Expr) -> Expr {
    Expr::UnaryOp {
        op: UnaryOp::Neg,
        operand: Box::new(operand),
        span: sp(),
    }
}

pub fn assign(target: &str, value: Expr) -> Stmt {
    Stmt::Assign {
        target: target.to_string(),
        value,
        span: sp(),
    }
}

pub fn aug(target: &str, op: BinaryOp, value: Expr) -> Stmt {
    Stmt::AugAssign {
        target: target.to_string(),
        op,
        value,
        span: sp(),
    }
}

pub fn ret(value: Expr) -> Stmt {
    Stmt::Return {
        value: Some(value),
        span: sp(),
    }
}

pub fn ret_bare() -> Stmt {
    Stmt::Return {
        value: None,
        span: sp(),
    }
}

pub fn if_else(condition: Expr, then_stmts: Vec<Stmt>, else_stmts: Vec<Stmt>) -> Stmt {
    Stmt::If {
        condition,
        then_branch: Block { stmts: then_stmts },
        else_branch: Some(Block { stmts: else_stmts }),
        span: sp(),
    }
}

pub fn if_only(condition: Expr, then_stmts: Vec<Stmt>) -> Stmt {
    Stmt::If {
        condition,
        then_branch: Block { stmts: then_stmts },
        else_branch: None,
        span: sp(),
    }
}

pub fn while_loop(condition: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::While {
        condition,
        body: Block { stmts: body },
        span: sp(),
    }
}

pub fn fndef(name: &str, params: &[&str], stmts: Vec<Stmt>) -> FunctionDef {
    FunctionDef {
        name: name.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
        body: Block { stmts },
        span: sp(),
    }
}

pub fn param_types(pairs: &[(&str, PyType)]) -> HashMap<String, PyType> {
    pairs.iter().map(|(n, t)| (n.to_string(), *t)).collect()
}

// ============================================================================
// Shared sample programs
// ============================================================================

/// The branching selector exercised by both the inference and the
/// execution tests:
///
/// ```text
/// def select(choice, x):
///     a = 2
///     b = a + 1
///     c = b // 2
///     d = 4
///     a += x
///     foo = True
///     bar = None
///     if choice and foo and not bar:
///         return d
///     else:
///         return x + c
/// ```
///
/// With `choice: int32` and `x: int64`, the augmented assignment drags
/// `a`, `b` and `c` up to int64 while `d` stays narrow.
pub fn select_program() -> FunctionDef {
    fndef(
        "select",
        &["choice", "x"],
        vec![
            assign("a", int(2)),
            assign("b", bin(BinaryOp::Add, name("a"), int(1))),
            assign("c", bin(BinaryOp::FloorDiv, name("b"), int(2))),
            assign("d", int(4)),
            aug("a", BinaryOp::Add, name("x")),
            assign("foo", boolean(true)),
            assign("bar", none_lit()),
            if_else(
                bin(
                    BinaryOp::And,
                    bin(BinaryOp::And, name("choice"), name("foo")),
                    not(name("bar")),
                ),
                vec![ret(name("d"))],
                vec![ret(bin(BinaryOp::Add, name("x"), name("c")))],
            ),
        ],
    )
}

pub fn select_param_types() -> HashMap<String, PyType> {
    param_types(&[("choice", PyType::INT32), ("x", PyType::INT64)])
}

// ============================================================================
// Host reference arithmetic
// ============================================================================

/// Floor division as Python's `//` computes it.
pub fn host_floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Remainder as Python's `%` computes it: takes the divisor's sign.
pub fn host_floor_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

/// Trial-division primality test, matching the compiled program's
/// algorithm (0 and 1 have no divisor candidate, so they pass).
pub fn host_is_prime(x: i64) -> bool {
    let mut d = 2;
    while d * d <= x {
        if x % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

/// A reduced fraction with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frac {
    pub num: i64,
    pub den: i64,
}

impl Frac {
    pub fn new(num: i64, den: i64) -> Self {
        let g = gcd(num, den);
        let (num, den) = (num / g, den / g);
        if den < 0 {
            Frac {
                num: -num,
                den: -den,
            }
        } else {
            Frac { num, den }
        }
    }

    /// Pack the fraction into a single integer as numerator * 1000 +
    /// denominator. `0/1` therefore encodes as 1.
    pub fn encode(&self) -> i64 {
        self.num * 1000 + self.den
    }

    pub fn add(&self, other: &Frac) -> Frac {
        Frac::new(
            self.num * other.den + other.num * self.den,
            self.den * other.den,
        )
    }

    pub fn sub(&self, other: &Frac) -> Frac {
        Frac::new(
            self.num * other.den - other.num * self.den,
            self.den * other.den,
        )
    }

    pub fn mul(&self, other: &Frac) -> Frac {
        Frac::new(self.num * other.num, self.den * other.den)
    }

    pub fn div(&self, other: &Frac) -> Frac {
        Frac::new(self.num * other.den, self.den * other.num)
    }
}
