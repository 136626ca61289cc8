//! Syntax tree for the compilable subset.
//!
//! A [`FunctionDef`] is the unit of compilation: one function with positional
//! parameters and a body of statements. The tree covers exactly what the
//! front end accepts: assignments, augmented assignments, `if`/`else`,
//! `while`, `return`, and expressions over integer and boolean literals,
//! `None`, names, binary operators, and unary `-`/`not`.
//!
//! The whole tree serializes with serde, so definitions can cross a process
//! boundary as JSON and be rebuilt with [`FunctionDef::from_json`].

use serde::{Deserialize, Serialize};

use crate::span::Span;

/// A single function definition, the unit of compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    /// Positional parameter names, in declaration order
    pub params: Vec<String>,
    pub body: Block,
    pub span: Span,
}

impl FunctionDef {
    /// Rebuild a definition from its JSON serialization.
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A sequence of statements sharing one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `target = value`
    Assign {
        target: String,
        value: Expr,
        span: Span,
    },
    /// `target op= value`, e.g. `a += x`
    AugAssign {
        target: String,
        op: BinaryOp,
        value: Expr,
        span: Span,
    },
    /// `if condition: ... [else: ...]`
    If {
        condition: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
        span: Span,
    },
    /// `while condition: ...`
    While {
        condition: Expr,
        body: Block,
        span: Span,
    },
    /// `return [value]`
    Return { value: Option<Expr>, span: Span },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Assign { span, .. }
            | Stmt::AugAssign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Return { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal, Span),
    Name(String, Span),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_, span) | Expr::Name(_, span) => *span,
            Expr::BinaryOp { span, .. } | Expr::UnaryOp { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// True division `/`. Parsed but outside the subset: no fractional types.
    Div,
    /// Floor division `//`, rounding toward negative infinity
    FloorDiv,
    /// Remainder `%` with the sign of the divisor
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    /// Short-circuit `and`
    And,
    /// Short-circuit `or`
    Or,
}

impl BinaryOp {
    /// Source-level spelling, used in diagnostics and IR dumps.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::FloorDiv
                | BinaryOp::Mod
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::Eq
                | BinaryOp::Ne
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Arithmetic negation `-x`
    Neg,
    /// Logical negation `not x`, defined for every truth-testable type
    Not,
}
