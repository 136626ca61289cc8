//! Typed intermediate representation produced by code generation.
//!
//! A function lowers to a list of [`BasicBlock`]s. Every block carries a
//! label, a straight-line run of [`Instruction`]s, and exactly one
//! [`Terminator`] that transfers control. Values live in [`VarRef`] virtual
//! registers: a name, an SSA-style version counter, and the type the value
//! has at that point. Control-flow joins merge values with [`Instruction::Phi`],
//! which backends are free to realize as block parameters.
//!
//! The representation is backend-agnostic: it knows widths and floor-division
//! semantics but nothing about any particular instruction set.

use std::fmt;

use crate::types::{IntWidth, PyType};

#[cfg(test)]
mod tests;

/// A virtual register: versioned name plus the type of the value it holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarRef {
    pub name: String,
    pub version: usize,
    pub ty: PyType,
}

impl VarRef {
    /// Version 0 of a name. Used for parameters and first definitions.
    pub fn new(name: impl Into<String>, ty: PyType) -> Self {
        Self {
            name: name.into(),
            version: 0,
            ty,
        }
    }

    pub fn versioned(name: impl Into<String>, version: usize, ty: PyType) -> Self {
        Self {
            name: name.into(),
            version,
            ty,
        }
    }
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version == 0 {
            write!(f, "%{}", self.name)
        } else {
            write!(f, "%{}.{}", self.name, self.version)
        }
    }
}

/// A constant embedded in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstValue {
    Int32(i32),
    Int64(i64),
    Bool(bool),
    None,
}

impl ConstValue {
    pub fn ty(&self) -> PyType {
        match self {
            ConstValue::Int32(_) => PyType::Int(IntWidth::W32),
            ConstValue::Int64(_) => PyType::Int(IntWidth::W64),
            ConstValue::Bool(_) => PyType::Bool,
            ConstValue::None => PyType::None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int32(v) => write!(f, "{v}i32"),
            ConstValue::Int64(v) => write!(f, "{v}i64"),
            ConstValue::Bool(v) => write!(f, "{v}"),
            ConstValue::None => write!(f, "none"),
        }
    }
}

/// Binary operations on values of one common type.
///
/// `FloorDiv` and `Mod` carry Python semantics: the quotient rounds toward
/// negative infinity and the remainder takes the divisor's sign. Backends
/// must emit the correction sequence, not the machine's truncating forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    FloorDiv,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOpKind {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            BinOpKind::Add => "add",
            BinOpKind::Sub => "sub",
            BinOpKind::Mul => "mul",
            BinOpKind::FloorDiv => "floordiv",
            BinOpKind::Mod => "mod",
            BinOpKind::Eq => "eq",
            BinOpKind::Ne => "ne",
            BinOpKind::Lt => "lt",
            BinOpKind::Le => "le",
            BinOpKind::Gt => "gt",
            BinOpKind::Ge => "ge",
        }
    }

    /// Comparisons produce `bool`; everything else produces the operand type.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOpKind::Eq
                | BinOpKind::Ne
                | BinOpKind::Lt
                | BinOpKind::Le
                | BinOpKind::Gt
                | BinOpKind::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    /// Two's-complement negation
    Neg,
    /// Boolean inversion of an `i1`-style 0/1 value
    Not,
}

impl UnaryOpKind {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            UnaryOpKind::Neg => "neg",
            UnaryOpKind::Not => "not",
        }
    }
}

/// How an [`Instruction::Extend`] widens its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendKind {
    /// Sign extension, for integer promotion
    Sign,
    /// Zero extension, for bool used as an integer
    Zero,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `dest = value`
    LoadConst { dest: VarRef, value: ConstValue },
    /// `dest = src`, same type on both sides
    Copy { dest: VarRef, src: VarRef },
    /// `dest = left op right`, operands already at a common width
    BinOp {
        dest: VarRef,
        op: BinOpKind,
        left: VarRef,
        right: VarRef,
    },
    /// `dest = op operand`
    UnaryOp {
        dest: VarRef,
        op: UnaryOpKind,
        operand: VarRef,
    },
    /// Widen `src` to the destination type.
    Extend {
        dest: VarRef,
        src: VarRef,
        kind: ExtendKind,
    },
    /// Control-flow join: `dest` takes the value flowing in from whichever
    /// predecessor block transferred here. Must appear before any
    /// non-phi instruction of its block and list every predecessor.
    Phi {
        dest: VarRef,
        incoming: Vec<(String, VarRef)>,
    },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::LoadConst { dest, value } => write!(f, "{dest} = const {value}"),
            Instruction::Copy { dest, src } => write!(f, "{dest} = copy {src}"),
            Instruction::BinOp {
                dest,
                op,
                left,
                right,
            } => write!(f, "{dest} = {} {left}, {right}", op.mnemonic()),
            Instruction::UnaryOp { dest, op, operand } => {
                write!(f, "{dest} = {} {operand}", op.mnemonic())
            }
            Instruction::Extend { dest, src, kind } => {
                let op = match kind {
                    ExtendKind::Sign => "sext",
                    ExtendKind::Zero => "zext",
                };
                write!(f, "{dest} = {op} {src}")
            }
            Instruction::Phi { dest, incoming } => {
                write!(f, "{dest} = phi ")?;
                for (i, (label, var)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[{label}: {var}]")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Return from the function, with a value unless the function is `None`-typed
    Return(Option<VarRef>),
    /// Unconditional transfer
    Jump(String),
    /// Two-way transfer on a `bool` condition
    Branch {
        cond: VarRef,
        then_block: String,
        else_block: String,
    },
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Return(Some(var)) => write!(f, "return {var}"),
            Terminator::Return(None) => write!(f, "return"),
            Terminator::Jump(label) => write!(f, "jump {label}"),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => write!(f, "br {cond}, {then_block}, {else_block}"),
        }
    }
}

/// One node of the control-flow graph.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instructions: Vec::new(),
            terminator: None,
        }
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn set_terminator(&mut self, terminator: Terminator) {
        self.terminator = Some(terminator);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }
}

/// A complete lowered function: typed signature plus its blocks.
///
/// The entry block is always present, always labeled `entry`, and always
/// first in `blocks`. Parameters enter it as version-0 registers at their
/// declared types.
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<(String, PyType)>,
    pub return_type: PyType,
    pub blocks: Vec<BasicBlock>,
}

impl IrFunction {
    pub fn new(name: impl Into<String>, params: Vec<(String, PyType)>, return_type: PyType) -> Self {
        Self {
            name: name.into(),
            params,
            return_type,
            blocks: vec![BasicBlock::new("entry")],
        }
    }

    pub fn add_block(&mut self, block: BasicBlock) {
        self.blocks.push(block);
    }

    pub fn block(&self, label: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn block_mut(&mut self, label: &str) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.label == label)
    }

    pub fn entry_block_mut(&mut self) -> Option<&mut BasicBlock> {
        self.block_mut("entry")
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (i, (name, ty)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {ty}")?;
        }
        writeln!(f, ") -> {} {{", self.return_type)?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.label)?;
            for instruction in &block.instructions {
                writeln!(f, "    {instruction}")?;
            }
            match &block.terminator {
                Some(terminator) => writeln!(f, "    {terminator}")?,
                None => writeln!(f, "    <unterminated>")?,
            }
        }
        write!(f, "}}")
    }
}
