use crate::ir::{Instruction, IrFunction};
use crate::types::{IntWidth, PyType};

use cranelift_codegen::ir::types as cl_types;
use cranelift_codegen::ir::{AbiParam, Signature};
use cranelift_codegen::isa::CallConv;

use super::CompileCtx;

/// Convert a lattice type to its Cranelift machine type.
pub(super) fn py_type_to_cranelift(ty: &PyType) -> cl_types::Type {
    match ty {
        PyType::Int(IntWidth::W32) => cl_types::I32,
        PyType::Int(IntWidth::W64) => cl_types::I64,
        PyType::Bool => cl_types::I8,
        PyType::None => cl_types::I8,
    }
}

/// Create a function signature from IR function.
pub(super) fn create_signature(func: &IrFunction) -> Signature {
    let mut sig = Signature::new(CallConv::SystemV);

    for (_, ty) in &func.params {
        sig.params.push(AbiParam::new(py_type_to_cranelift(ty)));
    }

    if func.return_type != PyType::None {
        sig.returns
            .push(AbiParam::new(py_type_to_cranelift(&func.return_type)));
    }

    sig
}

/// Collect phi node information from all blocks in a function.
pub(super) fn collect_phi_info(func: &IrFunction, ctx: &mut CompileCtx) {
    for block in &func.blocks {
        let mut phi_dests = Vec::new();
        for inst in &block.instructions {
            if let Instruction::Phi { dest, incoming } = inst {
                phi_dests.push(dest.clone());
                for (src_label, src_var) in incoming {
                    ctx.phi_incoming
                        .entry((src_label.clone(), block.label.clone()))
                        .or_default()
                        .push(src_var.clone());
                }
            }
        }
        if !phi_dests.is_empty() {
            ctx.phi_params.insert(block.label.clone(), phi_dests);
        }
    }
}
