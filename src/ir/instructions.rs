use std::fmt::{self, Display, Formatter};

use itertools::Itertools;

use super::core_structs::BlockId;

/// Source-level identifier, as numbered by the grammar walker.
pub type IdentId = u32;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) u32);

impl InstrId {
    pub fn index(self) -> u32 {
        self.0
    }

    /// Ids in `self..end`, in generation order.
    pub(crate) fn until(self, end: InstrId) -> impl Iterator<Item = InstrId> {
        (self.0..end.0).map(InstrId)
    }
}

impl Display for InstrId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A value reference plus the variable it was read from, if any.
///
/// The identifier half is what lets a loop phi rewrite only the uses that
/// went through that variable: `a + b` where `b` happens to hold the same
/// instruction as `a` keeps its `b` side untouched.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Operand {
    pub value: Option<InstrId>,
    pub ident: Option<IdentId>,
}

impl Operand {
    pub fn value(value: InstrId) -> Self {
        Operand {
            value: Some(value),
            ident: None,
        }
    }

    pub fn variable(value: Option<InstrId>, ident: IdentId) -> Self {
        Operand {
            value,
            ident: Some(ident),
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "undef"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Load,
    Write,
    Return,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Cmp,
    Phi,
}

impl BinaryOp {
    pub const ARITHMETIC: [BinaryOp; 4] = [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::Div];

    pub fn is_arithmetic(self) -> bool {
        Self::ARITHMETIC.contains(&self)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BranchOp {
    Bra,
    Beq,
    Bne,
    Ble,
    Blt,
    Bge,
    Bgt,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BranchTarget {
    Instr(InstrId),
    /// Stands in for the first instruction of a block that is still empty.
    Placeholder(BlockId),
}

impl Display for BranchTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BranchTarget::Instr(id) => write!(f, "{id}"),
            BranchTarget::Placeholder(block) => write!(f, "<start of {block}>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionKind {
    Const {
        value: i64,
    },
    Unary {
        op: UnaryOp,
        arg: Operand,
    },
    Branch {
        op: BranchOp,
        target: Option<BranchTarget>,
    },
    Binary {
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    Move {
        src: Operand,
        register: u32,
    },
    Read,
    WriteNewLine,
    Call {
        callee: IdentId,
        name: String,
        args: Vec<InstrId>,
    },
    RegisterArg {
        slot: u32,
    },
    End,
}

impl InstructionKind {
    pub fn phi(lhs: Operand, rhs: Operand) -> Self {
        InstructionKind::Binary {
            op: BinaryOp::Phi,
            lhs,
            rhs,
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(
            self,
            InstructionKind::Binary {
                op: BinaryOp::Phi,
                ..
            }
        )
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, InstructionKind::Branch { .. })
    }

    pub fn is_return(&self) -> bool {
        matches!(
            self,
            InstructionKind::Unary {
                op: UnaryOp::Return,
                ..
            }
        )
    }

    /// The opcode under which this instruction is tracked for common subexpressions.
    pub fn arithmetic_op(&self) -> Option<BinaryOp> {
        match self {
            InstructionKind::Binary { op, .. } if op.is_arithmetic() => Some(*op),
            _ => None,
        }
    }

    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        (match self {
            InstructionKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            InstructionKind::Unary { arg, .. } => vec![arg],
            InstructionKind::Move { src, .. } => vec![src],
            _ => vec![],
        })
        .into_iter()
    }

    pub fn operands_mut(&mut self) -> impl Iterator<Item = &mut Operand> {
        (match self {
            InstructionKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            InstructionKind::Unary { arg, .. } => vec![arg],
            InstructionKind::Move { src, .. } => vec![src],
            _ => vec![],
        })
        .into_iter()
    }

    /// Same opcode and same operand values, regardless of which variables they came from.
    pub fn computes_same_value(&self, other: &InstructionKind) -> bool {
        match (self, other) {
            (
                InstructionKind::Binary { op, lhs, rhs },
                InstructionKind::Binary {
                    op: other_op,
                    lhs: other_lhs,
                    rhs: other_rhs,
                },
            ) => op == other_op && lhs.value == other_lhs.value && rhs.value == other_rhs.value,
            _ => false,
        }
    }

    /// Rewrites every operand that reads `old` through `ident`, where `None` is a read that
    /// found no definition. Returns whether anything changed.
    pub fn replace_operand(&mut self, ident: IdentId, old: Option<InstrId>, new: InstrId) -> bool {
        let mut replaced = false;
        for operand in self.operands_mut() {
            if operand.value == old && operand.ident == Some(ident) {
                operand.value = Some(new);
                replaced = true;
            }
        }
        replaced
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub id: InstrId,
    pub block: BlockId,
    pub kind: InstructionKind,
    eliminated_by: Option<InstrId>,
}

impl Instruction {
    pub(crate) fn new(id: InstrId, block: BlockId, kind: InstructionKind) -> Self {
        Instruction {
            id,
            block,
            kind,
            eliminated_by: None,
        }
    }

    pub fn eliminated_by(&self) -> Option<InstrId> {
        self.eliminated_by
    }

    pub fn is_eliminated(&self) -> bool {
        self.eliminated_by.is_some()
    }

    pub(crate) fn eliminate(&mut self, by: InstrId) {
        self.eliminated_by = Some(by);
    }

    pub(crate) fn activate(&mut self) {
        self.eliminated_by = None;
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} = ", self.id)?;
        match &self.kind {
            InstructionKind::Const { value } => write!(f, "const #{value}")?,
            InstructionKind::Unary { op, arg } => write!(f, "{op:?} {arg}")?,
            InstructionKind::Branch { op, target } => match target {
                Some(target) => write!(f, "{op:?} {target}")?,
                None => write!(f, "{op:?} ?")?,
            },
            InstructionKind::Binary { op, lhs, rhs } => write!(f, "{op:?} {lhs} {rhs}")?,
            InstructionKind::Move { src, register } => write!(f, "Move {src} -> r{register}")?,
            InstructionKind::Read => write!(f, "Read")?,
            InstructionKind::WriteNewLine => write!(f, "WriteNewLine")?,
            InstructionKind::Call { name, args, .. } => {
                write!(f, "Call {name}({})", args.iter().join(", "))?
            }
            InstructionKind::RegisterArg { slot } => write!(f, "Arg r{slot}")?,
            InstructionKind::End => write!(f, "End")?,
        }
        if let Some(by) = self.eliminated_by {
            write!(f, " (eliminated by {by})")?;
        }
        Ok(())
    }
}
