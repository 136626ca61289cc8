//! Native backend boundary and the execution bridge.
//!
//! The compiler core never talks to a code generator directly; it goes
//! through the [`NativeBackend`] trait. A backend turns an [`IrFunction`]
//! into executable code and hands back an opaque [`FuncHandle`]. Invocation
//! is uniform regardless of the function's signature: arguments travel as
//! `i64` cells in a [`NativeCallFrame`], the backend narrows them to the
//! declared widths on entry and widens the result back on exit.
//!
//! [`CompiledFunction`] is the host-facing wrapper. It validates arguments
//! against the inferred parameter types before the native code ever runs,
//! and decodes the raw result cell according to the inferred return type.

#[cfg(feature = "cranelift")]
pub mod cranelift;

use crate::error::{CompileError, ExecError};
use crate::ir::IrFunction;
use crate::types::{IntWidth, PyType};

/// Opaque identifier for a function compiled by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncHandle(pub(crate) usize);

impl FuncHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One invocation's worth of marshaled state: argument cells in, one
/// result cell out.
#[derive(Debug, Default)]
pub struct NativeCallFrame {
    pub args: Vec<i64>,
    pub ret: i64,
}

impl NativeCallFrame {
    pub fn new(args: Vec<i64>) -> Self {
        Self { args, ret: 0 }
    }
}

/// Capability to turn IR into executable native code.
///
/// Injected into the pipeline rather than constructed by it, so the core
/// compiles against this trait and test code can substitute stubs.
pub trait NativeBackend {
    /// Short name for logs and diagnostics, e.g. `cranelift-jit`.
    fn target_name(&self) -> &str;

    /// Compile one function and return a handle for later invocation.
    fn compile(&mut self, func: &IrFunction) -> Result<FuncHandle, CompileError>;

    /// Run a compiled function over a marshaled frame. The backend reads
    /// `frame.args` and writes `frame.ret`.
    fn run(&self, handle: FuncHandle, frame: &mut NativeCallFrame) -> Result<(), ExecError>;
}

/// Marshaling metadata kept alongside a compiled function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionMetadata {
    pub name: String,
    /// Parameters at their declared types, in declaration order
    pub params: Vec<(String, PyType)>,
    pub return_type: PyType,
}

/// A decoded native result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeValue {
    Bool(bool),
    Int32(i32),
    Int64(i64),
}

impl NativeValue {
    pub fn as_i64(&self) -> i64 {
        match self {
            NativeValue::Bool(b) => i64::from(*b),
            NativeValue::Int32(v) => i64::from(*v),
            NativeValue::Int64(v) => *v,
        }
    }
}

/// A compiled function plus everything needed to call it safely.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    handle: FuncHandle,
    meta: FunctionMetadata,
}

impl CompiledFunction {
    pub fn new(handle: FuncHandle, meta: FunctionMetadata) -> Self {
        Self { handle, meta }
    }

    pub fn handle(&self) -> FuncHandle {
        self.handle
    }

    pub fn metadata(&self) -> &FunctionMetadata {
        &self.meta
    }

    /// Invoke through `backend`, validating every argument before any
    /// native code runs.
    ///
    /// Arguments are host integers; a bool parameter takes 0 or 1. The
    /// result decodes by the inferred return type, so an `int32` function
    /// comes back as a sign-correct [`NativeValue::Int32`]. A `None`
    /// return has no host decoding and reports
    /// [`ExecError::UnsupportedReturn`].
    pub fn invoke<B: NativeBackend>(
        &self,
        backend: &B,
        args: &[i64],
    ) -> Result<NativeValue, ExecError> {
        if args.len() != self.meta.params.len() {
            return Err(ExecError::ArityMismatch {
                expected: self.meta.params.len(),
                got: args.len(),
            });
        }
        for ((param, ty), &value) in self.meta.params.iter().zip(args) {
            if !value_fits(*ty, value) {
                return Err(ExecError::ArgumentRange {
                    param: param.clone(),
                    value,
                    ty: *ty,
                });
            }
        }

        let mut frame = NativeCallFrame::new(args.to_vec());
        backend.run(self.handle, &mut frame)?;

        match self.meta.return_type {
            PyType::Bool => Ok(NativeValue::Bool(frame.ret != 0)),
            PyType::Int(IntWidth::W32) => Ok(NativeValue::Int32(frame.ret as i32)),
            PyType::Int(IntWidth::W64) => Ok(NativeValue::Int64(frame.ret)),
            PyType::None => Err(ExecError::UnsupportedReturn { ty: PyType::None }),
        }
    }
}

fn value_fits(ty: PyType, value: i64) -> bool {
    match ty {
        PyType::Bool => value == 0 || value == 1,
        PyType::Int(IntWidth::W32) => i32::try_from(value).is_ok(),
        PyType::Int(IntWidth::W64) => true,
        PyType::None => value == 0,
    }
}
