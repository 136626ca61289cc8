//! Cranelift JIT backend.
//!
//! Compiles [`IrFunction`]s to native code in-process. Each function is
//! compiled twice over, in a sense: once at its typed signature, and once
//! as a small wrapper with the uniform frame ABI
//! `fn(*const i64, *mut i64)`. The wrapper loads each argument cell,
//! narrows it to the declared parameter width, calls the typed function,
//! widens the result back to an `i64` cell (sign-extending integers,
//! zero-extending bools), and stores it. Invocation through
//! [`NativeBackend::run`] always goes through the wrapper, so the caller
//! never needs per-signature transmutes.
//!
//! # Usage
//!
//! ```ignore
//! use subset_python_jit::backend::cranelift::CraneliftBackend;
//! use subset_python_jit::backend::{NativeBackend, NativeCallFrame};
//!
//! let mut backend = CraneliftBackend::new()?;
//! let handle = backend.compile(&ir_function)?;
//! let mut frame = NativeCallFrame::new(vec![7]);
//! backend.run(handle, &mut frame)?;
//! ```

mod helpers;

use std::collections::HashMap;

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::types as cl_types;
use cranelift_codegen::ir::{
    AbiParam, Block, Function, InstBuilder, MemFlags, Signature, UserFuncName, Value,
};
use cranelift_codegen::isa::CallConv;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use target_lexicon::Triple;

use super::{FuncHandle, NativeBackend, NativeCallFrame};
use crate::error::{CompileError, ExecError};
use crate::ir::{
    BinOpKind, ConstValue, ExtendKind, Instruction, IrFunction, Terminator, UnaryOpKind, VarRef,
};
use crate::types::{IntWidth, PyType};

use helpers::{collect_phi_info, create_signature, py_type_to_cranelift};

/// Error types specific to Cranelift compilation
#[derive(Debug)]
pub enum CraneliftError {
    /// Module creation failed
    ModuleCreation(String),
    /// Function compilation failed
    FunctionCompilation(String),
    /// Module error
    Module(String),
}

impl std::fmt::Display for CraneliftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CraneliftError::ModuleCreation(msg) => write!(f, "Module creation error: {}", msg),
            CraneliftError::FunctionCompilation(msg) => {
                write!(f, "Function compilation error: {}", msg)
            }
            CraneliftError::Module(msg) => write!(f, "Module error: {}", msg),
        }
    }
}

impl std::error::Error for CraneliftError {}

/// JIT backend built on `cranelift-jit`.
pub struct CraneliftBackend {
    /// JIT module for compilation
    module: JITModule,
    /// Function builder context (reused across functions)
    builder_context: FunctionBuilderContext,
    /// Codegen context
    ctx: Context,
    /// Typed function IDs by name
    function_ids: HashMap<String, FuncId>,
    /// Finalized wrapper entry points, indexed by handle
    entries: Vec<*const u8>,
}

/// Phi bookkeeping passed to the free compilation functions
struct CompileCtx {
    /// For each block label: ordered list of phi destination VarRefs
    phi_params: HashMap<String, Vec<VarRef>>,
    /// For each (source_block, dest_block): ordered list of source VarRefs to pass
    phi_incoming: HashMap<(String, String), Vec<VarRef>>,
}

impl CraneliftBackend {
    /// Create a new backend targeting the host.
    pub fn new() -> Result<Self, CraneliftError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| CraneliftError::ModuleCreation(e.to_string()))?;

        let isa_builder = cranelift_codegen::isa::lookup(Triple::host())
            .map_err(|e| CraneliftError::ModuleCreation(e.to_string()))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| CraneliftError::ModuleCreation(e.to_string()))?;

        let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let module = JITModule::new(builder);

        Ok(Self {
            module,
            builder_context: FunctionBuilderContext::new(),
            ctx: Context::new(),
            function_ids: HashMap::new(),
            entries: Vec::new(),
        })
    }

    /// Compile the typed form of `func`.
    fn compile_typed_function(&mut self, func: &IrFunction) -> Result<FuncId, CraneliftError> {
        let sig = create_signature(func);
        let func_id = self
            .module
            .declare_function(&func.name, Linkage::Export, &sig)
            .map_err(|e| CraneliftError::Module(e.to_string()))?;
        self.function_ids.insert(func.name.clone(), func_id);

        self.ctx.func = Function::with_name_signature(UserFuncName::user(0, func_id.as_u32()), sig);

        let mut compile_ctx = CompileCtx {
            phi_params: HashMap::new(),
            phi_incoming: HashMap::new(),
        };
        collect_phi_info(func, &mut compile_ctx);

        {
            let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.builder_context);
            compile_function_body(&mut builder, func, &compile_ctx)?;
            builder.finalize();
        }

        self.module
            .define_function(func_id, &mut self.ctx)
            .map_err(|e| CraneliftError::FunctionCompilation(e.to_string()))?;
        self.module.clear_context(&mut self.ctx);
        Ok(func_id)
    }

    /// Compile the uniform-ABI wrapper around an already declared target.
    fn compile_invoke_wrapper(
        &mut self,
        func: &IrFunction,
        target: FuncId,
    ) -> Result<FuncId, CraneliftError> {
        let pointer_type = self.module.target_config().pointer_type();
        let mut sig = Signature::new(CallConv::SystemV);
        sig.params.push(AbiParam::new(pointer_type));
        sig.params.push(AbiParam::new(pointer_type));

        let wrapper_name = format!("{}__invoke", func.name);
        let wrapper_id = self
            .module
            .declare_function(&wrapper_name, Linkage::Export, &sig)
            .map_err(|e| CraneliftError::Module(e.to_string()))?;

        self.ctx.func =
            Function::with_name_signature(UserFuncName::user(0, wrapper_id.as_u32()), sig);
        let target_ref = self.module.declare_func_in_func(target, &mut self.ctx.func);

        {
            let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.builder_context);
            let entry = builder.create_block();
            builder.append_block_params_for_function_params(entry);
            builder.switch_to_block(entry);
            builder.seal_block(entry);

            let args_ptr = builder.block_params(entry)[0];
            let ret_ptr = builder.block_params(entry)[1];

            // Narrow each i64 cell to the declared parameter width
            let mut call_args = Vec::with_capacity(func.params.len());
            for (i, (_, ty)) in func.params.iter().enumerate() {
                let cell =
                    builder
                        .ins()
                        .load(cl_types::I64, MemFlags::new(), args_ptr, (i as i32) * 8);
                let cl_ty = py_type_to_cranelift(ty);
                let value = if cl_ty == cl_types::I64 {
                    cell
                } else {
                    builder.ins().ireduce(cl_ty, cell)
                };
                call_args.push(value);
            }

            let call = builder.ins().call(target_ref, &call_args);
            let results = builder.inst_results(call).to_vec();

            // Widen the result back to the cell: integers sign-extend,
            // bools zero-extend, None stores zero
            let cell_value = match func.return_type {
                PyType::None => builder.ins().iconst(cl_types::I64, 0),
                PyType::Int(IntWidth::W64) => results[0],
                PyType::Int(IntWidth::W32) => builder.ins().sextend(cl_types::I64, results[0]),
                PyType::Bool => builder.ins().uextend(cl_types::I64, results[0]),
            };
            builder.ins().store(MemFlags::new(), cell_value, ret_ptr, 0);
            builder.ins().return_(&[]);
            builder.finalize();
        }

        self.module
            .define_function(wrapper_id, &mut self.ctx)
            .map_err(|e| CraneliftError::FunctionCompilation(e.to_string()))?;
        self.module.clear_context(&mut self.ctx);
        Ok(wrapper_id)
    }
}

impl NativeBackend for CraneliftBackend {
    fn target_name(&self) -> &str {
        "cranelift-jit"
    }

    fn compile(&mut self, func: &IrFunction) -> Result<FuncHandle, CompileError> {
        if self.function_ids.contains_key(&func.name) {
            return Err(CompileError::codegen(format!(
                "function `{}` is already compiled",
                func.name
            )));
        }
        let target_id = self
            .compile_typed_function(func)
            .map_err(|e| CompileError::codegen(e.to_string()))?;
        let wrapper_id = self
            .compile_invoke_wrapper(func, target_id)
            .map_err(|e| CompileError::codegen(e.to_string()))?;
        self.module
            .finalize_definitions()
            .map_err(|e| CompileError::codegen(e.to_string()))?;

        let entry = self.module.get_finalized_function(wrapper_id);
        let handle = FuncHandle(self.entries.len());
        self.entries.push(entry);
        Ok(handle)
    }

    fn run(&self, handle: FuncHandle, frame: &mut NativeCallFrame) -> Result<(), ExecError> {
        let entry = self
            .entries
            .get(handle.index())
            .copied()
            .ok_or_else(|| ExecError::Backend {
                message: format!("invalid function handle {}", handle.index()),
            })?;

        // SAFETY: `entry` was produced by `compile` for a wrapper with
        // exactly this signature, and the JIT memory lives as long as
        // `self.module`.
        unsafe {
            let invoke: unsafe extern "C" fn(*const i64, *mut i64) = std::mem::transmute(entry);
            invoke(frame.args.as_ptr(), &mut frame.ret);
        }
        Ok(())
    }
}

// ============================================================================
// Free functions for compilation (to avoid borrow checker issues)
// ============================================================================

/// Get phi argument values for a transfer from source_label to target_label
fn get_phi_args(
    var_map: &HashMap<String, Value>,
    source_label: &str,
    target_label: &str,
    compile_ctx: &CompileCtx,
) -> Result<Vec<Value>, CraneliftError> {
    let key = (source_label.to_string(), target_label.to_string());
    if let Some(vars) = compile_ctx.phi_incoming.get(&key) {
        vars.iter().map(|v| get_var(var_map, v)).collect()
    } else {
        Ok(Vec::new())
    }
}

/// Compile the function body.
///
/// All blocks are created before any is filled, so forward jumps and loop
/// back edges both resolve, and sealing happens only once every
/// predecessor edge exists.
fn compile_function_body(
    builder: &mut FunctionBuilder,
    func: &IrFunction,
    compile_ctx: &CompileCtx,
) -> Result<(), CraneliftError> {
    let mut var_map: HashMap<String, Value> = HashMap::new();
    let mut block_map: HashMap<String, Block> = HashMap::new();

    let entry_block = builder.create_block();
    builder.append_block_params_for_function_params(entry_block);
    block_map.insert("entry".to_string(), entry_block);

    // Create the remaining blocks with their phi parameters
    for ir_block in &func.blocks {
        if ir_block.label != "entry" {
            let block = builder.create_block();
            if let Some(phi_dests) = compile_ctx.phi_params.get(&ir_block.label) {
                for dest in phi_dests {
                    builder.append_block_param(block, py_type_to_cranelift(&dest.ty));
                }
            }
            block_map.insert(ir_block.label.clone(), block);
        }
    }

    for ir_block in &func.blocks {
        let block = *block_map.get(&ir_block.label).ok_or_else(|| {
            CraneliftError::FunctionCompilation(format!(
                "block '{}' not found in block_map",
                ir_block.label
            ))
        })?;
        builder.switch_to_block(block);

        if ir_block.label == "entry" {
            let block_params = builder.block_params(block).to_vec();
            for (i, (name, _)) in func.params.iter().enumerate() {
                var_map.insert(name.clone(), block_params[i]);
            }
        } else if let Some(phi_dests) = compile_ctx.phi_params.get(&ir_block.label) {
            // Phi destinations are this block's parameters
            let params = builder.block_params(block).to_vec();
            for (i, dest) in phi_dests.iter().enumerate() {
                var_map.insert(var_key(dest), params[i]);
            }
        }

        for inst in &ir_block.instructions {
            compile_instruction(builder, inst, &mut var_map)?;
        }

        match &ir_block.terminator {
            Some(term) => compile_terminator(
                builder,
                term,
                &var_map,
                &block_map,
                &ir_block.label,
                compile_ctx,
            )?,
            None => {
                return Err(CraneliftError::FunctionCompilation(format!(
                    "block '{}' has no terminator",
                    ir_block.label
                )))
            }
        }
    }

    // Back edges may target earlier blocks, so nothing was sealed during
    // emission; every predecessor is known now.
    builder.seal_all_blocks();
    Ok(())
}

/// Create a unique key for a variable
fn var_key(var: &VarRef) -> String {
    if var.version == 0 {
        var.name.clone()
    } else {
        format!("{}.{}", var.name, var.version)
    }
}

/// Get a variable's value from the map
fn get_var(var_map: &HashMap<String, Value>, var: &VarRef) -> Result<Value, CraneliftError> {
    let key = var_key(var);
    var_map
        .get(&key)
        .copied()
        .ok_or_else(|| CraneliftError::FunctionCompilation(format!("Unknown variable: {}", key)))
}

/// Compile a single instruction
fn compile_instruction(
    builder: &mut FunctionBuilder,
    inst: &Instruction,
    var_map: &mut HashMap<String, Value>,
) -> Result<(), CraneliftError> {
    match inst {
        Instruction::LoadConst { dest, value } => {
            let val = compile_const(builder, value);
            var_map.insert(var_key(dest), val);
        }

        Instruction::Copy { dest, src } => {
            let src_val = get_var(var_map, src)?;
            var_map.insert(var_key(dest), src_val);
        }

        Instruction::BinOp {
            dest,
            op,
            left,
            right,
        } => {
            let left_val = get_var(var_map, left)?;
            let right_val = get_var(var_map, right)?;
            let operand_ty = py_type_to_cranelift(&left.ty);
            let result = compile_binop(builder, *op, left_val, right_val, operand_ty);
            var_map.insert(var_key(dest), result);
        }

        Instruction::UnaryOp { dest, op, operand } => {
            let operand_val = get_var(var_map, operand)?;
            let result = match op {
                UnaryOpKind::Neg => builder.ins().ineg(operand_val),
                UnaryOpKind::Not => {
                    // Logical not: compare with 0
                    let zero = builder.ins().iconst(cl_types::I8, 0);
                    builder.ins().icmp(IntCC::Equal, operand_val, zero)
                }
            };
            var_map.insert(var_key(dest), result);
        }

        Instruction::Extend { dest, src, kind } => {
            let src_val = get_var(var_map, src)?;
            let target = py_type_to_cranelift(&dest.ty);
            let result = match kind {
                ExtendKind::Sign => builder.ins().sextend(target, src_val),
                ExtendKind::Zero => builder.ins().uextend(target, src_val),
            };
            var_map.insert(var_key(dest), result);
        }

        Instruction::Phi { dest, incoming: _ } => {
            // Phi destinations are block parameters, mapped when the block
            // was switched to. A phi outside that mapping means the IR put
            // one in the entry block.
            if !var_map.contains_key(&var_key(dest)) {
                return Err(CraneliftError::FunctionCompilation(format!(
                    "phi {} has no block parameter",
                    var_key(dest)
                )));
            }
        }
    }

    Ok(())
}

/// Compile a constant value
fn compile_const(builder: &mut FunctionBuilder, value: &ConstValue) -> Value {
    match value {
        ConstValue::Int64(v) => builder.ins().iconst(cl_types::I64, *v),
        ConstValue::Int32(v) => builder.ins().iconst(cl_types::I32, i64::from(*v)),
        ConstValue::Bool(v) => builder.ins().iconst(cl_types::I8, i64::from(*v)),
        ConstValue::None => builder.ins().iconst(cl_types::I8, 0),
    }
}

/// Compile a binary operation over operands of type `ty`.
///
/// Machine division truncates toward zero, so `FloorDiv` and `Mod` carry a
/// branchless correction: when the remainder is nonzero and its sign
/// differs from the divisor's, the quotient steps down by one and the
/// remainder shifts by one divisor.
fn compile_binop(
    builder: &mut FunctionBuilder,
    op: BinOpKind,
    left: Value,
    right: Value,
    ty: cl_types::Type,
) -> Value {
    match op {
        BinOpKind::Add => builder.ins().iadd(left, right),
        BinOpKind::Sub => builder.ins().isub(left, right),
        BinOpKind::Mul => builder.ins().imul(left, right),

        BinOpKind::FloorDiv => {
            let quotient = builder.ins().sdiv(left, right);
            let remainder = builder.ins().srem(left, right);
            let adjust = floor_adjust(builder, remainder, right, ty);
            builder.ins().isub(quotient, adjust)
        }
        BinOpKind::Mod => {
            let remainder = builder.ins().srem(left, right);
            let adjust = floor_adjust(builder, remainder, right, ty);
            let correction = builder.ins().imul(adjust, right);
            builder.ins().iadd(remainder, correction)
        }

        // Comparisons return i8 bool
        BinOpKind::Eq => builder.ins().icmp(IntCC::Equal, left, right),
        BinOpKind::Ne => builder.ins().icmp(IntCC::NotEqual, left, right),
        BinOpKind::Lt => builder.ins().icmp(IntCC::SignedLessThan, left, right),
        BinOpKind::Le => builder.ins().icmp(IntCC::SignedLessThanOrEqual, left, right),
        BinOpKind::Gt => builder.ins().icmp(IntCC::SignedGreaterThan, left, right),
        BinOpKind::Ge => builder.ins().icmp(IntCC::SignedGreaterThanOrEqual, left, right),
    }
}

/// 1 when truncating division must be corrected toward negative infinity,
/// 0 otherwise, at width `ty`.
fn floor_adjust(
    builder: &mut FunctionBuilder,
    remainder: Value,
    divisor: Value,
    ty: cl_types::Type,
) -> Value {
    let zero = builder.ins().iconst(ty, 0);
    let nonzero = builder.ins().icmp(IntCC::NotEqual, remainder, zero);
    // Sign of remainder differs from sign of divisor
    let mixed = builder.ins().bxor(remainder, divisor);
    let negative = builder.ins().icmp(IntCC::SignedLessThan, mixed, zero);
    let needs_adjust = builder.ins().band(nonzero, negative);
    builder.ins().uextend(ty, needs_adjust)
}

/// Compile a terminator instruction
fn compile_terminator(
    builder: &mut FunctionBuilder,
    term: &Terminator,
    var_map: &HashMap<String, Value>,
    block_map: &HashMap<String, Block>,
    current_block_label: &str,
    compile_ctx: &CompileCtx,
) -> Result<(), CraneliftError> {
    match term {
        Terminator::Return(None) => {
            builder.ins().return_(&[]);
        }
        Terminator::Return(Some(var)) => {
            let val = get_var(var_map, var)?;
            builder.ins().return_(&[val]);
        }
        Terminator::Jump(target) => {
            let target_block = block_map.get(target).ok_or_else(|| {
                CraneliftError::FunctionCompilation(format!("Unknown block: {}", target))
            })?;
            let phi_args = get_phi_args(var_map, current_block_label, target, compile_ctx)?;
            builder.ins().jump(*target_block, &phi_args);
        }
        Terminator::Branch {
            cond,
            then_block,
            else_block,
        } => {
            let cond_val = get_var(var_map, cond)?;
            let then_blk = block_map.get(then_block).ok_or_else(|| {
                CraneliftError::FunctionCompilation(format!("Unknown block: {}", then_block))
            })?;
            let else_blk = block_map.get(else_block).ok_or_else(|| {
                CraneliftError::FunctionCompilation(format!("Unknown block: {}", else_block))
            })?;
            let then_args = get_phi_args(var_map, current_block_label, then_block, compile_ctx)?;
            let else_args = get_phi_args(var_map, current_block_label, else_block, compile_ctx)?;
            builder
                .ins()
                .brif(cond_val, *then_blk, &then_args, *else_blk, &else_args);
        }
    }

    Ok(())
}
