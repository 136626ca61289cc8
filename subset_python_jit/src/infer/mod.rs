//! Forward type inference with retroactive widening.
//!
//! Inference walks a function body in execution order, tracking one type
//! per variable in a [`TypeEnv`]. Rebinding a name merges the new type into
//! the old one instead of replacing it, so a variable that starts as
//! `int32` and later absorbs an `int64` is `int64` for its whole lifetime.
//! Because a pass can widen a variable after earlier uses were already
//! typed, the engine repeats whole-body passes until an entire pass changes
//! nothing, then reports the fixed point.
//!
//! The merge operation only ever widens along a finite lattice, so the
//! fixed point is reached in a bounded number of passes and the loop needs
//! no iteration cap.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Block, Expr, FunctionDef, Literal, Stmt, UnaryOp};
use crate::error::{CompileError, CompileResult};
use crate::span::Span;
use crate::types::{self, PyType};


/// One variable's inferred state.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub ty: PyType,
    /// False when only some control-flow paths bind the name. Such a
    /// binding still participates in merging but may not be read.
    pub definite: bool,
}

/// Mapping from variable name to inferred binding.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeEnv {
    bindings: HashMap<String, Binding>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Inferred type of a name, regardless of definiteness.
    pub fn ty(&self, name: &str) -> Option<PyType> {
        self.bindings.get(name).map(|b| b.ty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Binding)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn insert(&mut self, name: impl Into<String>, binding: Binding) {
        self.bindings.insert(name.into(), binding);
    }

    /// Rebind `name`, merging with any existing binding. An assignment on
    /// the current path always leaves the name definite.
    fn bind(&mut self, name: &str, ty: PyType, span: Span) -> CompileResult<()> {
        let merged = match self.bindings.get(name) {
            Some(prev) => types::merge(prev.ty, ty)
                .map_err(|c| CompileError::conflict(c, format!("variable `{name}`"), span))?,
            None => ty,
        };
        self.insert(
            name,
            Binding {
                ty: merged,
                definite: true,
            },
        );
        Ok(())
    }

    /// Pointwise merge of the environments left by two alternative paths.
    /// A name bound on only one side survives with `definite: false`.
    fn merge_paths(left: &TypeEnv, right: &TypeEnv, span: Span) -> CompileResult<TypeEnv> {
        let mut merged = TypeEnv::new();
        for (name, lb) in &left.bindings {
            match right.bindings.get(name) {
                Some(rb) => {
                    let ty = types::merge(lb.ty, rb.ty).map_err(|c| {
                        CompileError::conflict(c, format!("variable `{name}` after branch"), span)
                    })?;
                    merged.insert(
                        name.clone(),
                        Binding {
                            ty,
                            definite: lb.definite && rb.definite,
                        },
                    );
                }
                None => merged.insert(
                    name.clone(),
                    Binding {
                        ty: lb.ty,
                        definite: false,
                    },
                ),
            }
        }
        for (name, rb) in &right.bindings {
            if !left.bindings.contains_key(name) {
                merged.insert(
                    name.clone(),
                    Binding {
                        ty: rb.ty,
                        definite: false,
                    },
                );
            }
        }
        Ok(merged)
    }
}

/// Inference result for one function: the side table code generation reads.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTypes {
    pub name: String,
    /// Parameters at their declared types, in declaration order
    pub params: Vec<(String, PyType)>,
    /// Final environment: every variable at its widest observed type
    pub env: TypeEnv,
    pub return_type: PyType,
}

#[derive(Debug, Default)]
pub struct TypeInferenceEngine {
    env: TypeEnv,
    return_type: Option<PyType>,
}

impl TypeInferenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Infer types for `func` given declared parameter types.
    ///
    /// Runs whole-body passes until the environment and return type stop
    /// changing, then checks that every path out of the function returns.
    pub fn infer_function(
        &mut self,
        func: &FunctionDef,
        param_types: &HashMap<String, PyType>,
    ) -> CompileResult<FunctionTypes> {
        self.env = TypeEnv::new();
        self.return_type = None;

        let mut params = Vec::with_capacity(func.params.len());
        for name in &func.params {
            let ty = *param_types
                .get(name)
                .ok_or_else(|| CompileError::unbound(name.clone(), func.span))?;
            self.env.insert(
                name.clone(),
                Binding {
                    ty,
                    definite: true,
                },
            );
            params.push((name.clone(), ty));
        }

        // Widening is monotone over a finite lattice, so this terminates.
        let mut previous_return: Option<Option<PyType>> = None;
        loop {
            self.return_type = None;
            let env_before = self.env.clone();
            self.infer_block(&func.body)?;
            if self.env == env_before && previous_return == Some(self.return_type) {
                break;
            }
            previous_return = Some(self.return_type);
        }

        let return_type = match self.return_type {
            Some(ty) => {
                if always_returns(&func.body) {
                    ty
                } else {
                    // Falling off the end yields None, which must merge
                    // with the explicit returns.
                    match types::merge(ty, PyType::None) {
                        Ok(merged) => merged,
                        Err(c) => {
                            return Err(CompileError::conflict(
                                c,
                                "return value, not every path returns",
                                func.span,
                            ))
                        }
                    }
                }
            }
            None => PyType::None,
        };

        Ok(FunctionTypes {
            name: func.name.clone(),
            params,
            env: std::mem::take(&mut self.env),
            return_type,
        })
    }

    fn infer_block(&mut self, block: &Block) -> CompileResult<()> {
        for stmt in &block.stmts {
            self.infer_stmt(stmt)?;
        }
        Ok(())
    }

    fn infer_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Assign {
                target,
                value,
                span,
            } => {
                let ty = expr_type_in(&self.env, value)?;
                self.env.bind(target, ty, *span)
            }
            Stmt::AugAssign {
                target,
                op,
                value,
                span,
            } => {
                // `x op= e` reads x, so x must already be bound
                let current = read_in(&self.env, target, *span)?;
                let rhs = expr_type_in(&self.env, value)?;
                let ty = binary_op_type(*op, current, rhs, *span)?;
                self.env.bind(target, ty, *span)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                span,
            } => {
                expr_type_in(&self.env, condition)?;
                let before = self.env.clone();
                self.infer_block(then_branch)?;
                let then_env = std::mem::replace(&mut self.env, before);
                if let Some(else_block) = else_branch {
                    self.infer_block(else_block)?;
                }
                let else_env = std::mem::take(&mut self.env);
                self.env = TypeEnv::merge_paths(&then_env, &else_env, *span)?;
                Ok(())
            }
            Stmt::While {
                condition,
                body,
                span,
            } => {
                expr_type_in(&self.env, condition)?;
                // The body may run zero times, so its bindings merge with
                // the environment at loop entry. Loop-carried widening
                // settles over the enclosing fixed-point passes.
                let before = self.env.clone();
                self.infer_block(body)?;
                let body_env = std::mem::take(&mut self.env);
                self.env = TypeEnv::merge_paths(&body_env, &before, *span)?;
                Ok(())
            }
            Stmt::Return { value, span } => {
                let ty = match value {
                    Some(expr) => expr_type_in(&self.env, expr)?,
                    None => PyType::None,
                };
                self.return_type = Some(match self.return_type {
                    Some(prev) => types::merge(prev, ty)
                        .map_err(|c| CompileError::conflict(c, "return value", *span))?,
                    None => ty,
                });
                Ok(())
            }
        }
    }
}

/// Type of `expr` under `env`.
///
/// Shared between inference passes and code generation: after the fixed
/// point, evaluating expressions against the final environment yields the
/// types lowering must use.
pub fn expr_type_in(env: &TypeEnv, expr: &Expr) -> CompileResult<PyType> {
    match expr {
        Expr::Literal(lit, _) => Ok(literal_type(lit)),
        Expr::Name(name, span) => read_in(env, name, *span),
        Expr::BinaryOp {
            op,
            left,
            right,
            span,
        } => {
            let lt = expr_type_in(env, left)?;
            let rt = expr_type_in(env, right)?;
            binary_op_type(*op, lt, rt, *span)
        }
        Expr::UnaryOp { op, operand, span } => {
            let ot = expr_type_in(env, operand)?;
            match op {
                // `not` truth-tests its operand, so any type is fine
                UnaryOp::Not => Ok(PyType::Bool),
                UnaryOp::Neg => match ot {
                    PyType::Int(_) => Ok(ot),
                    other => Err(CompileError::unsupported(
                        format!("unary `-` on {other}"),
                        *span,
                    )),
                },
            }
        }
    }
}

pub fn literal_type(literal: &Literal) -> PyType {
    match literal {
        Literal::Int(value) => types::int_literal_type(*value),
        Literal::Bool(_) => PyType::Bool,
        Literal::None => PyType::None,
    }
}

fn read_in(env: &TypeEnv, name: &str, span: Span) -> CompileResult<PyType> {
    match env.get(name) {
        Some(binding) if binding.definite => Ok(binding.ty),
        _ => Err(CompileError::unbound(name, span)),
    }
}

pub(crate) fn binary_op_type(
    op: BinaryOp,
    left: PyType,
    right: PyType,
    span: Span,
) -> CompileResult<PyType> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::FloorDiv | BinaryOp::Mod => {
            let merged = types::merge(left, right).map_err(|c| {
                CompileError::conflict(c, format!("operands of `{}`", op.symbol()), span)
            })?;
            if merged.is_int() {
                Ok(merged)
            } else {
                Err(CompileError::unsupported(
                    format!("`{}` on {merged} operands", op.symbol()),
                    span,
                ))
            }
        }
        BinaryOp::Div => Err(CompileError::unsupported(
            "true division `/`, only `//` is compilable",
            span,
        )),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let merged = types::merge(left, right).map_err(|c| {
                CompileError::conflict(c, format!("operands of `{}`", op.symbol()), span)
            })?;
            if merged.is_int() {
                Ok(PyType::Bool)
            } else {
                Err(CompileError::unsupported(
                    format!("`{}` on {merged} operands", op.symbol()),
                    span,
                ))
            }
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            types::merge(left, right).map_err(|c| {
                CompileError::conflict(c, format!("operands of `{}`", op.symbol()), span)
            })?;
            Ok(PyType::Bool)
        }
        // Both operands are truth-tested individually, no merge required
        BinaryOp::And | BinaryOp::Or => Ok(PyType::Bool),
    }
}

/// Conservative check that every path through `block` executes a `return`.
///
/// A `while` never counts even when its condition is constant, and an `if`
/// without an `else` never counts. Loops that provably run forever are
/// therefore rejected at the return-type check rather than analyzed.
fn always_returns(block: &Block) -> bool {
    block.stmts.iter().any(|stmt| match stmt {
        Stmt::Return { .. } => true,
        Stmt::If {
            then_branch,
            else_branch: Some(else_block),
            ..
        } => always_returns(then_branch) && always_returns(else_block),
        _ => false,
    })
}
