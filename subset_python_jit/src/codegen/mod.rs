//! Lowering from the syntax tree to the typed IR.
//!
//! [`CodeGenerator`] walks a function once, front to back, consuming the
//! types the inference fixed point produced. Every variable slot is created
//! at the variable's final, widest type; values of a narrower type are
//! widened with an `Extend` before they flow in. This is what makes
//! retroactive promotion safe: by the time lowering runs, no instruction
//! ever sees a stale narrow slot.
//!
//! Control flow becomes explicit blocks. `if`/`else` branches rejoin in a
//! join block that receives one [`Instruction::Phi`] per variable whose
//! definition differs between the arms. `while` lowers to a header block
//! whose phis carry the loop variables; their back edges are patched in
//! once the body has been lowered. `and`/`or` short-circuit through the
//! same mechanism.

use std::collections::{BTreeSet, HashMap};

use crate::ast::{BinaryOp, Block, Expr, FunctionDef, Literal, Stmt, UnaryOp};
use crate::error::{CompileError, CompileResult};
use crate::infer::{self, FunctionTypes};
use crate::ir::{
    BasicBlock, BinOpKind, ConstValue, ExtendKind, Instruction, IrFunction, Terminator,
    UnaryOpKind, VarRef,
};
use crate::span::Span;
use crate::types::{self, IntWidth, PyType};


/// Lower one inferred function to IR.
pub fn lower_function(func: &FunctionDef, types: &FunctionTypes) -> CompileResult<IrFunction> {
    CodeGenerator::new(types).generate(func)
}

pub struct CodeGenerator<'a> {
    types: &'a FunctionTypes,
    func: IrFunction,
    /// Label of the block instructions are currently appended to
    current: String,
    /// Live register for each variable name
    bindings: HashMap<String, VarRef>,
    /// Next version number per variable name
    versions: HashMap<String, usize>,
    temps: usize,
    labels: usize,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(types: &'a FunctionTypes) -> Self {
        Self {
            func: IrFunction::new(types.name.clone(), types.params.clone(), types.return_type),
            types,
            current: "entry".to_string(),
            bindings: HashMap::new(),
            versions: HashMap::new(),
            temps: 0,
            labels: 0,
        }
    }

    /// Lower the whole function. Consumes the generator.
    pub fn generate(mut self, func: &FunctionDef) -> CompileResult<IrFunction> {
        // Parameters arrive at their declared widths. A parameter the body
        // widened is extended once here, so every later use sees the final
        // width.
        let params = self.types.params.clone();
        for (name, declared) in params {
            self.versions.insert(name.clone(), 1);
            let incoming = VarRef::new(name.clone(), declared);
            let final_ty = self.final_type(&name)?;
            let bound = if final_ty == declared {
                incoming
            } else {
                match (declared, final_ty) {
                    (PyType::Int(from), PyType::Int(to)) if from < to => {}
                    (from, to) => {
                        return Err(CompileError::codegen(format!(
                            "parameter `{name}` cannot widen from {from} to {to}"
                        )))
                    }
                }
                let dest = self.fresh_var(&name, final_ty);
                self.push(Instruction::Extend {
                    dest: dest.clone(),
                    src: incoming,
                    kind: ExtendKind::Sign,
                })?;
                dest
            };
            self.bindings.insert(name, bound);
        }

        let done = self.lower_block(&func.body)?;
        if !done {
            if self.types.return_type == PyType::None {
                self.terminate(Terminator::Return(None))?;
            } else {
                return Err(CompileError::codegen(
                    "control reaches the end of a value-returning function".to_string(),
                ));
            }
        }

        for block in &self.func.blocks {
            if !block.is_terminated() {
                return Err(CompileError::codegen(format!(
                    "block `{}` has no terminator",
                    block.label
                )));
            }
        }
        Ok(self.func)
    }

    // ==================== statements ====================

    /// Lower a statement list. Returns true when every path through the
    /// list ends in a `return`; statements after that point are dead and
    /// are not lowered.
    fn lower_block(&mut self, block: &Block) -> CompileResult<bool> {
        for stmt in &block.stmts {
            if self.lower_stmt(stmt)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> CompileResult<bool> {
        match stmt {
            Stmt::Assign { target, value, .. } => {
                self.lower_assign(target, value)?;
                Ok(false)
            }
            Stmt::AugAssign {
                target,
                op,
                value,
                span,
            } => {
                // `x op= e` lowers exactly like `x = x op e`
                let desugared = Expr::BinaryOp {
                    op: *op,
                    left: Box::new(Expr::Name(target.clone(), *span)),
                    right: Box::new(value.clone()),
                    span: *span,
                };
                self.lower_assign(target, &desugared)?;
                Ok(false)
            }
            Stmt::Return { value, .. } => {
                self.lower_return(value.as_ref())?;
                Ok(true)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => self.lower_if(condition, then_branch, else_branch.as_ref()),
            Stmt::While {
                condition, body, ..
            } => {
                self.lower_while(condition, body)?;
                Ok(false)
            }
        }
    }

    fn lower_assign(&mut self, target: &str, value: &Expr) -> CompileResult<()> {
        let slot_ty = self.final_type(target)?;
        let value = self.lower_expr(value)?;
        let value = self.coerce(value, slot_ty)?;
        let dest = self.fresh_var(target, slot_ty);
        self.push(Instruction::Copy {
            dest: dest.clone(),
            src: value,
        })?;
        self.bindings.insert(target.to_string(), dest);
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&Expr>) -> CompileResult<()> {
        if self.types.return_type == PyType::None {
            // None-typed functions produce no machine value
            return self.terminate(Terminator::Return(None));
        }
        let expr = value.ok_or_else(|| {
            CompileError::codegen("bare return in a value-returning function".to_string())
        })?;
        let value = self.lower_expr(expr)?;
        let value = self.coerce(value, self.types.return_type)?;
        self.terminate(Terminator::Return(Some(value)))
    }

    fn lower_if(
        &mut self,
        condition: &Expr,
        then_branch: &Block,
        else_branch: Option<&Block>,
    ) -> CompileResult<bool> {
        let cond = self.lower_truth(condition)?;
        let index = self.next_index();
        let then_label = format!("then{index}");
        let else_label = format!("else{index}");
        let join_label = format!("join{index}");

        let entry_bindings = self.bindings.clone();
        self.terminate(Terminator::Branch {
            cond,
            then_block: then_label.clone(),
            else_block: else_label.clone(),
        })?;

        self.start_block(then_label);
        let then_done = self.lower_block(then_branch)?;
        let then_end = self.current.clone();
        let then_bindings = self.bindings.clone();

        self.bindings = entry_bindings;
        self.start_block(else_label);
        let else_done = match else_branch {
            Some(block) => self.lower_block(block)?,
            None => false,
        };
        let else_end = self.current.clone();

        match (then_done, else_done) {
            // Both arms returned; nothing rejoins
            (true, true) => Ok(true),
            (true, false) => {
                self.terminate(Terminator::Jump(join_label.clone()))?;
                self.start_block(join_label);
                Ok(false)
            }
            (false, true) => {
                self.bindings = then_bindings;
                self.set_terminator_of(&then_end, Terminator::Jump(join_label.clone()))?;
                self.start_block(join_label);
                Ok(false)
            }
            (false, false) => {
                let else_bindings = std::mem::take(&mut self.bindings);
                self.terminate(Terminator::Jump(join_label.clone()))?;
                self.set_terminator_of(&then_end, Terminator::Jump(join_label.clone()))?;
                self.start_block(join_label);
                self.bindings =
                    self.join_bindings(&then_bindings, &else_bindings, &then_end, &else_end)?;
                Ok(false)
            }
        }
    }

    /// Build the binding map for a join block. Variables whose live
    /// register differs between the arms get a phi; variables bound in
    /// only one arm are dropped, inference already rejected later reads.
    fn join_bindings(
        &mut self,
        then_bindings: &HashMap<String, VarRef>,
        else_bindings: &HashMap<String, VarRef>,
        then_end: &str,
        else_end: &str,
    ) -> CompileResult<HashMap<String, VarRef>> {
        let mut names: Vec<&String> = then_bindings
            .keys()
            .filter(|name| else_bindings.contains_key(*name))
            .collect();
        names.sort();

        let mut merged = HashMap::new();
        for name in names {
            let (Some(then_var), Some(else_var)) =
                (then_bindings.get(name), else_bindings.get(name))
            else {
                continue;
            };
            if then_var == else_var {
                merged.insert(name.clone(), then_var.clone());
                continue;
            }
            if then_var.ty != else_var.ty {
                return Err(CompileError::codegen(format!(
                    "variable `{name}` joins at {} and {}",
                    then_var.ty, else_var.ty
                )));
            }
            let dest = self.fresh_var(name, then_var.ty);
            self.push(Instruction::Phi {
                dest: dest.clone(),
                incoming: vec![
                    (then_end.to_string(), then_var.clone()),
                    (else_end.to_string(), else_var.clone()),
                ],
            })?;
            merged.insert(name.clone(), dest);
        }
        Ok(merged)
    }

    fn lower_while(&mut self, condition: &Expr, body: &Block) -> CompileResult<()> {
        let index = self.next_index();
        let head_label = format!("loop{index}");
        let body_label = format!("body{index}");
        let exit_label = format!("exit{index}");

        let entry_end = self.current.clone();
        self.terminate(Terminator::Jump(head_label.clone()))?;
        self.start_block(head_label.clone());

        // Every variable assigned in the body and live at loop entry is
        // loop-carried: it gets a header phi. The back edge of each phi is
        // patched in after the body is lowered. Phis are pushed first, so
        // the phi for carried[i] sits at instruction index i.
        let mut carried = Vec::new();
        for name in assigned_names(body) {
            if let Some(entry_var) = self.bindings.get(&name).cloned() {
                let dest = self.fresh_var(&name, entry_var.ty);
                self.push(Instruction::Phi {
                    dest: dest.clone(),
                    incoming: vec![(entry_end.clone(), entry_var)],
                })?;
                self.bindings.insert(name.clone(), dest);
                carried.push(name);
            }
        }

        let cond = self.lower_truth(condition)?;
        self.terminate(Terminator::Branch {
            cond,
            then_block: body_label.clone(),
            else_block: exit_label.clone(),
        })?;
        let head_bindings = self.bindings.clone();

        self.start_block(body_label);
        let body_done = self.lower_block(body)?;
        if !body_done {
            let body_end = self.current.clone();
            self.terminate(Terminator::Jump(head_label.clone()))?;
            for (position, name) in carried.iter().enumerate() {
                let looped = self.bindings.get(name).cloned().ok_or_else(|| {
                    CompileError::codegen(format!("loop variable `{name}` lost its binding"))
                })?;
                let head = self.func.block_mut(&head_label).ok_or_else(|| {
                    CompileError::codegen(format!("missing loop header `{head_label}`"))
                })?;
                match head.instructions.get_mut(position) {
                    Some(Instruction::Phi { incoming, .. }) => {
                        incoming.push((body_end.clone(), looped));
                    }
                    _ => {
                        return Err(CompileError::codegen(
                            "loop header phi out of position".to_string(),
                        ))
                    }
                }
            }
        }

        self.start_block(exit_label);
        self.bindings = head_bindings;
        Ok(())
    }

    // ==================== expressions ====================

    /// Lower an expression, yielding the register holding its value.
    fn lower_expr(&mut self, expr: &Expr) -> CompileResult<VarRef> {
        match expr {
            Expr::Literal(literal, _) => self.lower_literal(literal),
            Expr::Name(name, _) => self.read_binding(name),
            Expr::BinaryOp {
                op,
                left,
                right,
                span,
            } => match op {
                BinaryOp::And | BinaryOp::Or => self.lower_short_circuit(*op, left, right),
                BinaryOp::Div => Err(CompileError::unsupported(
                    "true division `/`, only `//` is compilable",
                    *span,
                )),
                _ => self.lower_binary(*op, left, right, *span),
            },
            Expr::UnaryOp { op, operand, .. } => match op {
                UnaryOp::Not => {
                    let truth = self.lower_truth(operand)?;
                    let dest = self.fresh_temp(PyType::Bool);
                    self.push(Instruction::UnaryOp {
                        dest: dest.clone(),
                        op: UnaryOpKind::Not,
                        operand: truth,
                    })?;
                    Ok(dest)
                }
                UnaryOp::Neg => {
                    // validates that the operand is an integer
                    let ty = infer::expr_type_in(&self.types.env, expr)?;
                    let value = self.lower_expr(operand)?;
                    let dest = self.fresh_temp(ty);
                    self.push(Instruction::UnaryOp {
                        dest: dest.clone(),
                        op: UnaryOpKind::Neg,
                        operand: value,
                    })?;
                    Ok(dest)
                }
            },
        }
    }

    fn lower_literal(&mut self, literal: &Literal) -> CompileResult<VarRef> {
        let value = match literal {
            Literal::Int(v) => match i32::try_from(*v) {
                Ok(narrow) => ConstValue::Int32(narrow),
                Err(_) => ConstValue::Int64(*v),
            },
            Literal::Bool(b) => ConstValue::Bool(*b),
            Literal::None => ConstValue::None,
        };
        let dest = self.fresh_temp(value.ty());
        self.push(Instruction::LoadConst {
            dest: dest.clone(),
            value,
        })?;
        Ok(dest)
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        span: Span,
    ) -> CompileResult<VarRef> {
        let left_ty = infer::expr_type_in(&self.types.env, left)?;
        let right_ty = infer::expr_type_in(&self.types.env, right)?;
        let common = types::merge(left_ty, right_ty).map_err(|c| {
            CompileError::conflict(c, format!("operands of `{}`", op.symbol()), span)
        })?;
        let result_ty = infer::binary_op_type(op, left_ty, right_ty, span)?;

        let lhs = self.lower_expr(left)?;
        let rhs = self.lower_expr(right)?;
        let lhs = self.coerce(lhs, common)?;
        let rhs = self.coerce(rhs, common)?;

        let dest = self.fresh_temp(result_ty);
        self.push(Instruction::BinOp {
            dest: dest.clone(),
            op: ir_binop(op)?,
            left: lhs,
            right: rhs,
        })?;
        Ok(dest)
    }

    /// Lower `left and right` / `left or right` with short-circuit control
    /// flow. The result is always a bool.
    fn lower_short_circuit(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> CompileResult<VarRef> {
        let index = self.next_index();
        let rhs_label = format!("rhs{index}");
        let merge_label = format!("merge{index}");

        let lhs_truth = self.lower_truth(left)?;
        // Value the expression takes when the right side is skipped
        let short_value = self.fresh_temp(PyType::Bool);
        self.push(Instruction::LoadConst {
            dest: short_value.clone(),
            value: ConstValue::Bool(op == BinaryOp::Or),
        })?;
        let decide_label = self.current.clone();
        let (then_block, else_block) = match op {
            BinaryOp::And => (rhs_label.clone(), merge_label.clone()),
            _ => (merge_label.clone(), rhs_label.clone()),
        };
        self.terminate(Terminator::Branch {
            cond: lhs_truth,
            then_block,
            else_block,
        })?;

        self.start_block(rhs_label);
        let rhs_truth = self.lower_truth(right)?;
        let rhs_end = self.current.clone();
        self.terminate(Terminator::Jump(merge_label.clone()))?;

        self.start_block(merge_label);
        let dest = self.fresh_temp(PyType::Bool);
        self.push(Instruction::Phi {
            dest: dest.clone(),
            incoming: vec![(decide_label, short_value), (rhs_end, rhs_truth)],
        })?;
        Ok(dest)
    }

    /// Lower an expression used as a condition, reducing it to a bool.
    /// Integers compare against zero, `None` is constant false.
    fn lower_truth(&mut self, expr: &Expr) -> CompileResult<VarRef> {
        let ty = infer::expr_type_in(&self.types.env, expr)?;
        match ty {
            PyType::Bool => self.lower_expr(expr),
            PyType::Int(width) => {
                let value = self.lower_expr(expr)?;
                let zero = self.fresh_temp(ty);
                let zero_const = match width {
                    IntWidth::W32 => ConstValue::Int32(0),
                    IntWidth::W64 => ConstValue::Int64(0),
                };
                self.push(Instruction::LoadConst {
                    dest: zero.clone(),
                    value: zero_const,
                })?;
                let dest = self.fresh_temp(PyType::Bool);
                self.push(Instruction::BinOp {
                    dest: dest.clone(),
                    op: BinOpKind::Ne,
                    left: value,
                    right: zero,
                })?;
                Ok(dest)
            }
            // None-typed expressions are names or literals, never effectful
            PyType::None => {
                let dest = self.fresh_temp(PyType::Bool);
                self.push(Instruction::LoadConst {
                    dest: dest.clone(),
                    value: ConstValue::Bool(false),
                })?;
                Ok(dest)
            }
        }
    }

    // ==================== plumbing ====================

    /// Widen `value` to `target` if needed. Only integer promotion is a
    /// legal implicit widening; anything else is a lowering invariant bug.
    fn coerce(&mut self, value: VarRef, target: PyType) -> CompileResult<VarRef> {
        if value.ty == target {
            return Ok(value);
        }
        match (value.ty, target) {
            (PyType::Int(from), PyType::Int(to)) if from < to => {
                let dest = self.fresh_temp(target);
                self.push(Instruction::Extend {
                    dest: dest.clone(),
                    src: value,
                    kind: ExtendKind::Sign,
                })?;
                Ok(dest)
            }
            (from, to) => Err(CompileError::codegen(format!(
                "cannot widen {from} to {to}"
            ))),
        }
    }

    fn read_binding(&self, name: &str) -> CompileResult<VarRef> {
        self.bindings.get(name).cloned().ok_or_else(|| {
            CompileError::codegen(format!("variable `{name}` has no live register"))
        })
    }

    fn final_type(&self, name: &str) -> CompileResult<PyType> {
        self.types
            .env
            .ty(name)
            .ok_or_else(|| CompileError::codegen(format!("no inferred type for `{name}`")))
    }

    fn fresh_temp(&mut self, ty: PyType) -> VarRef {
        let n = self.temps;
        self.temps += 1;
        // '.' cannot appear in a source identifier, so temps never collide
        VarRef::new(format!(".t{n}"), ty)
    }

    fn fresh_var(&mut self, name: &str, ty: PyType) -> VarRef {
        let next = self.versions.entry(name.to_string()).or_insert(0);
        let version = *next;
        *next += 1;
        VarRef::versioned(name, version, ty)
    }

    fn next_index(&mut self) -> usize {
        let index = self.labels;
        self.labels += 1;
        index
    }

    fn start_block(&mut self, label: String) {
        self.func.add_block(BasicBlock::new(label.clone()));
        self.current = label;
    }

    fn push(&mut self, instruction: Instruction) -> CompileResult<()> {
        self.current_block_mut()?.push(instruction);
        Ok(())
    }

    fn terminate(&mut self, terminator: Terminator) -> CompileResult<()> {
        self.current_block_mut()?.set_terminator(terminator);
        Ok(())
    }

    fn set_terminator_of(&mut self, label: &str, terminator: Terminator) -> CompileResult<()> {
        match self.func.block_mut(label) {
            Some(block) => {
                block.set_terminator(terminator);
                Ok(())
            }
            None => Err(CompileError::codegen(format!("missing block `{label}`"))),
        }
    }

    fn current_block_mut(&mut self) -> CompileResult<&mut BasicBlock> {
        match self.func.block_mut(&self.current) {
            Some(block) => Ok(block),
            None => Err(CompileError::codegen(format!(
                "no current block `{}`",
                self.current
            ))),
        }
    }
}

fn ir_binop(op: BinaryOp) -> CompileResult<BinOpKind> {
    let kind = match op {
        BinaryOp::Add => BinOpKind::Add,
        BinaryOp::Sub => BinOpKind::Sub,
        BinaryOp::Mul => BinOpKind::Mul,
        BinaryOp::FloorDiv => BinOpKind::FloorDiv,
        BinaryOp::Mod => BinOpKind::Mod,
        BinaryOp::Lt => BinOpKind::Lt,
        BinaryOp::Le => BinOpKind::Le,
        BinaryOp::Gt => BinOpKind::Gt,
        BinaryOp::Ge => BinOpKind::Ge,
        BinaryOp::Eq => BinOpKind::Eq,
        BinaryOp::Ne => BinOpKind::Ne,
        BinaryOp::Div | BinaryOp::And | BinaryOp::Or => {
            return Err(CompileError::codegen(format!(
                "`{}` has no direct instruction",
                op.symbol()
            )))
        }
    };
    Ok(kind)
}

/// Names assigned anywhere in `block`, including nested branches and loops.
fn assigned_names(block: &Block) -> Vec<String> {
    fn walk(block: &Block, out: &mut BTreeSet<String>) {
        for stmt in &block.stmts {
            match stmt {
                Stmt::Assign { target, .. } | Stmt::AugAssign { target, .. } => {
                    out.insert(target.clone());
                }
                Stmt::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    walk(then_branch, out);
                    if let Some(else_block) = else_branch {
                        walk(else_block, out);
                    }
                }
                Stmt::While { body, .. } => walk(body, out),
                Stmt::Return { .. } => {}
            }
        }
    }
    let mut names = BTreeSet::new();
    walk(block, &mut names);
    names.into_iter().collect()
}
