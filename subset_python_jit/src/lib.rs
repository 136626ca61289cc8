// Library code must not print; everything surfaces through Result values.
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]

// Core modules
pub mod ast;
pub mod error;
pub mod infer;
pub mod ir;
pub mod span;
pub mod types;

// Lowering: typed AST -> block IR
pub mod codegen;

// Native backends (the Cranelift JIT lives behind the "cranelift" feature)
pub mod backend;

// Pipeline: infer, lower, and compile one function
pub mod pipeline;
pub use pipeline::compile_function;

// Re-exports for programmatic use
pub use ast::FunctionDef;
pub use backend::{CompiledFunction, NativeBackend, NativeCallFrame, NativeValue};
pub use error::{CompileError, CompileResult, ExecError};
pub use infer::{FunctionTypes, TypeInferenceEngine};
pub use types::{IntWidth, PyType};
