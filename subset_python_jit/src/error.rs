//! Error taxonomy for compilation and execution.
//!
//! [`CompileError`] covers everything that can go wrong between receiving a
//! function definition and handing native code back: inference failures,
//! unsupported source constructs, and lowering invariant violations.
//! [`ExecError`] covers the call boundary of an already compiled function:
//! argument marshaling and result decoding.

use crate::span::Span;
use crate::types::{PyType, TypeConflict};
use thiserror::Error;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Two types with no least upper bound were asked to merge.
    #[error("type conflict: cannot merge {left} and {right} ({context}, line {})", .span.start_line)]
    TypeConflict {
        left: PyType,
        right: PyType,
        context: String,
        span: Span,
    },

    /// A name was read before any assignment reaches it on every path.
    #[error("unbound identifier `{name}` (line {})", .span.start_line)]
    UnboundIdentifier { name: String, span: Span },

    /// The source uses a construct outside the compilable subset.
    #[error("unsupported construct: {construct} (line {})", .span.start_line)]
    UnsupportedConstruct { construct: String, span: Span },

    /// Internal invariant violated during lowering or native compilation.
    /// Never expected for a function that passed inference.
    #[error("code generation failed: {message}")]
    CodeGen { message: String },
}

impl CompileError {
    pub(crate) fn conflict(conflict: TypeConflict, context: impl Into<String>, span: Span) -> Self {
        CompileError::TypeConflict {
            left: conflict.left,
            right: conflict.right,
            context: context.into(),
            span,
        }
    }

    pub(crate) fn unbound(name: impl Into<String>, span: Span) -> Self {
        CompileError::UnboundIdentifier {
            name: name.into(),
            span,
        }
    }

    pub(crate) fn unsupported(construct: impl Into<String>, span: Span) -> Self {
        CompileError::UnsupportedConstruct {
            construct: construct.into(),
            span,
        }
    }

    pub(crate) fn codegen(message: impl Into<String>) -> Self {
        CompileError::CodeGen {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// Wrong number of arguments for the compiled signature.
    #[error("arity mismatch: function takes {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    /// An argument does not fit the declared parameter type.
    #[error("argument `{param}` out of range for {ty}: {value}")]
    ArgumentRange {
        param: String,
        value: i64,
        ty: PyType,
    },

    /// The return type has no host-side decoding.
    #[error("cannot decode return value of type {ty}")]
    UnsupportedReturn { ty: PyType },

    /// The native backend rejected the invocation.
    #[error("backend invocation failed: {message}")]
    Backend { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_on_line(line: usize) -> Span {
        Span::new(0, 1, line, line, 1, 2)
    }

    #[test]
    fn test_compile_error_messages_carry_line_numbers() {
        let err = CompileError::conflict(
            TypeConflict {
                left: PyType::Bool,
                right: PyType::INT32,
            },
            "variable `x`",
            span_on_line(7),
        );
        assert_eq!(
            err.to_string(),
            "type conflict: cannot merge bool and int32 (variable `x`, line 7)"
        );

        let err = CompileError::unbound("y", span_on_line(3));
        assert_eq!(err.to_string(), "unbound identifier `y` (line 3)");

        let err = CompileError::unsupported("true division `/`", span_on_line(12));
        assert_eq!(
            err.to_string(),
            "unsupported construct: true division `/` (line 12)"
        );
    }

    #[test]
    fn test_exec_error_messages() {
        let err = ExecError::ArityMismatch {
            expected: 2,
            got: 3,
        };
        assert_eq!(
            err.to_string(),
            "arity mismatch: function takes 2 arguments, got 3"
        );

        let err = ExecError::ArgumentRange {
            param: "x".to_string(),
            value: 1 << 40,
            ty: PyType::INT32,
        };
        assert!(err.to_string().contains("out of range for int32"));

        let err = ExecError::UnsupportedReturn { ty: PyType::None };
        assert_eq!(err.to_string(), "cannot decode return value of type None");
    }
}
