//! End-to-end compilation driver.
//!
//! Chains the stages together: type inference over the function body,
//! lowering to typed IR, then native compilation through whichever
//! [`NativeBackend`] the caller supplies. The result is a
//! [`CompiledFunction`] that can be invoked with host integers.

use std::collections::HashMap;

use crate::ast::FunctionDef;
use crate::backend::{CompiledFunction, FunctionMetadata, NativeBackend};
use crate::codegen::lower_function;
use crate::error::CompileResult;
use crate::infer::TypeInferenceEngine;
use crate::types::PyType;

/// Compile `func` for native execution.
///
/// `param_types` must give a type for every parameter; inference resolves
/// everything else. The returned handle stays valid for the lifetime of
/// `backend`.
pub fn compile_function<B: NativeBackend>(
    backend: &mut B,
    func: &FunctionDef,
    param_types: &HashMap<String, PyType>,
) -> CompileResult<CompiledFunction> {
    // Type inference
    let mut engine = TypeInferenceEngine::new();
    let types = engine.infer_function(func, param_types)?;

    // Lower to typed IR
    let ir = lower_function(func, &types)?;

    // Native compilation
    let handle = backend.compile(&ir)?;

    let metadata = FunctionMetadata {
        name: types.name.clone(),
        params: types.params.clone(),
        return_type: types.return_type,
    };
    Ok(CompiledFunction::new(handle, metadata))
}
