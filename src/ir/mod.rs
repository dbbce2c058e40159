pub use self::core_structs::{Block, BlockId, BlockRole, Cfg, Enclosing};
pub use self::cse::{CseIndex, CseMatch};
pub use self::gen::{Options, SsaBuilder};
pub use self::instructions::{
    BinaryOp, BranchOp, BranchTarget, IdentId, InstrId, Instruction, InstructionKind, Operand, UnaryOp,
};

mod core_structs;
mod cse;
mod finalize;
mod gen;
mod instructions;
mod phis;
