use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

use itertools::Itertools;
use tracing::debug;

use super::cse::CseIndex;
use super::instructions::{BranchTarget, IdentId, InstrId, Instruction, InstructionKind};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "block {}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockRole {
    Basic,
    If,
    IfThen,
    IfElse,
    IfJoin,
    While,
    WhileBody,
    WhileFollow,
}

#[derive(Debug)]
pub struct Block {
    pub id: BlockId,
    roles: BTreeSet<BlockRole>,
    instructions: Vec<InstrId>,
    placeholder: bool,
    symbols: BTreeMap<IdentId, Option<InstrId>>,
    fallthrough_to: Option<BlockId>,
    fallthrough_from: Option<BlockId>,
    branch_to: Option<BlockId>,
    branch_from: Option<BlockId>,
    origin: Option<BlockId>,
    pub(super) cse: CseIndex,
}

impl Block {
    fn new(id: BlockId, role: BlockRole) -> Self {
        Block {
            id,
            roles: BTreeSet::from([role]),
            instructions: vec![],
            placeholder: false,
            symbols: BTreeMap::new(),
            fallthrough_to: None,
            fallthrough_from: None,
            branch_to: None,
            branch_from: None,
            origin: None,
            cse: CseIndex::default(),
        }
    }

    pub fn roles(&self) -> impl Iterator<Item = BlockRole> + '_ {
        self.roles.iter().copied()
    }

    pub fn has_role(&self, role: BlockRole) -> bool {
        self.roles.contains(&role)
    }

    pub(super) fn add_role(&mut self, role: BlockRole) {
        self.roles.insert(role);
    }

    pub fn instructions(&self) -> &[InstrId] {
        &self.instructions
    }

    pub fn first_instruction(&self) -> Option<InstrId> {
        self.instructions.first().copied()
    }

    pub fn has_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Empty blocks hold neither instructions nor a pending branch target.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty() && !self.placeholder
    }

    pub fn symbols(&self) -> &BTreeMap<IdentId, Option<InstrId>> {
        &self.symbols
    }

    pub fn fallthrough_to(&self) -> Option<BlockId> {
        self.fallthrough_to
    }

    pub fn fallthrough_from(&self) -> Option<BlockId> {
        self.fallthrough_from
    }

    pub fn branch_to(&self) -> Option<BlockId> {
        self.branch_to
    }

    pub fn branch_from(&self) -> Option<BlockId> {
        self.branch_from
    }

    /// For an if-join or while-follow: the block that opened the construct.
    pub fn origin(&self) -> Option<BlockId> {
        self.origin
    }

    fn upstream(&self) -> Option<BlockId> {
        if self.has_role(BlockRole::IfElse) || self.has_role(BlockRole::WhileFollow) {
            self.branch_from
        } else {
            self.fallthrough_from
        }
    }
}

/// Where a block's control flow ends up once the innermost open construct around it finishes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Enclosing {
    /// then side of the if joining at this block
    Then(BlockId),
    /// else side of the if joining at this block
    Else(BlockId),
    /// body of the loop headed by this block
    Loop(BlockId),
    Outermost,
}

/// The blocks and instructions of one function body.
///
/// Instructions live in a single arena indexed by id, whatever block they
/// sit in, so that eliminated instructions stay addressable after they are
/// dropped from their block.
#[derive(Debug, Default)]
pub struct Cfg {
    blocks: Vec<Block>,
    instructions: Vec<Instruction>,
}

impl Cfg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_block(&mut self, role: BlockRole) -> BlockId {
        let id = BlockId(self.blocks.len());
        debug!(%id, ?role, "new block");
        self.blocks.push(Block::new(id, role));
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub(super) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instructions[id.0 as usize - 1]
    }

    pub(super) fn instr_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.instructions[id.0 as usize - 1]
    }

    /// Every instruction ever created, in generation order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn next_id(&self) -> InstrId {
        InstrId(self.instructions.len() as u32 + 1)
    }

    /// Creates an instruction owned by `block` without placing it in the block's sequence.
    pub(super) fn alloc(&mut self, block: BlockId, kind: InstructionKind) -> InstrId {
        let id = self.next_id();
        self.instructions.push(Instruction::new(id, block, kind));
        id
    }

    pub(super) fn inherit_cse(&mut self, from: BlockId, to: BlockId) {
        let index = self.block(from).cse.clone();
        self.block_mut(to).cse = index;
    }

    pub(super) fn set_origin(&mut self, block: BlockId, origin: BlockId) {
        self.block_mut(block).origin = Some(origin);
    }

    pub(super) fn link_fallthrough(&mut self, from: BlockId, to: BlockId) {
        if let Some(old) = self.blocks[from.0].fallthrough_to.take() {
            self.blocks[old.0].fallthrough_from = None;
        }
        if let Some(old) = self.blocks[to.0].fallthrough_from.take() {
            self.blocks[old.0].fallthrough_to = None;
        }
        self.blocks[from.0].fallthrough_to = Some(to);
        self.blocks[to.0].fallthrough_from = Some(from);
    }

    pub(super) fn link_branch(&mut self, from: BlockId, to: BlockId) {
        if let Some(old) = self.blocks[from.0].branch_to.take() {
            self.blocks[old.0].branch_from = None;
        }
        if let Some(old) = self.blocks[to.0].branch_from.take() {
            self.blocks[old.0].branch_to = None;
        }
        self.blocks[from.0].branch_to = Some(to);
        self.blocks[to.0].branch_from = Some(from);
    }

    pub(super) fn unlink_fallthrough(&mut self, from: BlockId) {
        if let Some(old) = self.blocks[from.0].fallthrough_to.take() {
            self.blocks[old.0].fallthrough_from = None;
        }
    }

    pub(super) fn unlink_branch(&mut self, from: BlockId) {
        if let Some(old) = self.blocks[from.0].branch_to.take() {
            self.blocks[old.0].branch_from = None;
        }
    }

    /// Places an already allocated instruction at the end of `block`.
    ///
    /// Phis in a loop header go after the header's existing phis instead, so
    /// they stay ahead of the exit test. A pending placeholder is consumed and
    /// the branch waiting on it is pointed at `id`.
    pub(super) fn insert_instruction(&mut self, block: BlockId, id: InstrId) {
        let is_phi = self.instr(id).kind.is_phi();
        let arithmetic = self.instr(id).kind.arithmetic_op();

        if self.block(block).placeholder {
            self.block_mut(block).placeholder = false;
            self.retarget_placeholder(block, id);
        }

        let position = if is_phi && self.block(block).has_role(BlockRole::While) {
            self.block(block)
                .instructions
                .iter()
                .take_while(|&&instr| self.instr(instr).kind.is_phi())
                .count()
        } else {
            self.block(block).instructions.len()
        };
        self.block_mut(block).instructions.insert(position, id);

        if let Some(op) = arithmetic {
            self.block_mut(block).cse.insert(op, id);
        }
    }

    fn retarget_placeholder(&mut self, block: BlockId, id: InstrId) {
        let Some(source) = self.block(block).branch_from else {
            return;
        };
        for instr in self.blocks[source.0].instructions.clone() {
            if let InstructionKind::Branch { target, .. } = &mut self.instr_mut(instr).kind {
                if *target == Some(BranchTarget::Placeholder(block)) {
                    *target = Some(BranchTarget::Instr(id));
                }
            }
        }
    }

    /// Marks `block` as the pending target of a branch and returns what the branch should point at.
    pub(super) fn branch_target_of(&mut self, block: BlockId) -> BranchTarget {
        match self.block(block).first_instruction() {
            Some(first) => BranchTarget::Instr(first),
            None => {
                self.block_mut(block).placeholder = true;
                BranchTarget::Placeholder(block)
            }
        }
    }

    pub(super) fn clear_placeholder(&mut self, block: BlockId) {
        self.block_mut(block).placeholder = false;
    }

    pub(super) fn retain_instructions(&mut self, block: BlockId, keep: impl Fn(&Instruction) -> bool) {
        let instructions = &self.instructions;
        self.blocks[block.0]
            .instructions
            .retain(|&id| keep(&instructions[id.0 as usize - 1]));
    }

    pub(super) fn rewrite_symbols(&mut self, block: BlockId, rewrite: impl Fn(InstrId) -> InstrId) {
        for value in self.block_mut(block).symbols.values_mut().flatten() {
            *value = rewrite(*value);
        }
    }

    pub(super) fn set_identifier(&mut self, block: BlockId, ident: IdentId, value: Option<InstrId>) {
        self.block_mut(block).symbols.insert(ident, value);
    }

    /// Resolves an identifier as seen from `block`, walking towards the entry through dominating blocks.
    pub fn lookup(&self, block: BlockId, ident: IdentId) -> Option<InstrId> {
        let mut visited = 0;
        let mut block = Some(block);
        while let Some(id) = block {
            assert!(
                visited <= self.blocks.len(),
                "cycle in upstream links while resolving identifier {ident}"
            );
            visited += 1;
            let current = self.block(id);
            if let Some(&value) = current.symbols.get(&ident) {
                return value;
            }
            block = current.upstream();
        }
        None
    }

    pub fn contains_phi_assignment(&self, block: BlockId, ident: IdentId) -> bool {
        matches!(
            self.block(block).symbols.get(&ident),
            Some(Some(value)) if self.instr(*value).kind.is_phi()
        )
    }

    pub fn identifier_of(&self, block: BlockId, instr: InstrId) -> Option<IdentId> {
        self.block(block)
            .symbols
            .iter()
            .find(|(_, &value)| value == Some(instr))
            .map(|(&ident, _)| ident)
    }

    pub fn first_non_phi(&self, block: BlockId) -> Option<InstrId> {
        self.block(block)
            .instructions
            .iter()
            .copied()
            .find(|&id| !self.instr(id).kind.is_phi())
    }

    pub fn phis(&self, block: BlockId) -> Vec<InstrId> {
        self.block(block)
            .instructions
            .iter()
            .copied()
            .filter(|&id| self.instr(id).kind.is_phi())
            .collect()
    }

    /// The loop header `block` jumps back to, if it is the current tail of a loop body.
    pub fn loop_back_edge(&self, block: BlockId) -> Option<BlockId> {
        self.block(block)
            .branch_to
            .filter(|&target| self.block(target).has_role(BlockRole::While))
    }

    pub fn enclosing(&self, block: BlockId) -> Enclosing {
        if let Some(join) = self
            .block(block)
            .fallthrough_to
            .filter(|&next| self.block(next).has_role(BlockRole::IfJoin))
        {
            let from_if_block = self
                .block(join)
                .branch_from
                .map_or(false, |from| self.block(from).has_role(BlockRole::If));
            if from_if_block {
                Enclosing::Then(join)
            } else {
                Enclosing::Else(join)
            }
        } else if let Some(header) = self.loop_back_edge(block) {
            Enclosing::Loop(header)
        } else {
            Enclosing::Outermost
        }
    }

    /// Copies the parent's bindings into a block that closes an outermost construct.
    pub(super) fn complete_symbol_table(&mut self, block: BlockId, parent: BlockId) {
        let mut sources = vec![parent];
        if self.block(parent).has_role(BlockRole::While) {
            sources.extend(self.block(parent).fallthrough_from);
        }
        for source in sources {
            let inherited = self.block(source).symbols.clone();
            let symbols = &mut self.block_mut(block).symbols;
            for (ident, value) in inherited {
                symbols.entry(ident).or_insert(value);
            }
        }
    }

    /// First instruction control reaches on entering `block`, skipping blocks left empty.
    pub fn first_reachable_instruction(&self, block: BlockId) -> Option<InstrId> {
        let mut block = Some(block);
        for _ in 0..=self.blocks.len() {
            let current = self.block(block?);
            if let Some(first) = current.first_instruction() {
                return Some(first);
            }
            block = current.fallthrough_to;
        }
        None
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} [{}]", self.id, self.roles.iter().map(|role| format!("{role:?}")).join(", "))?;
        if let Some(to) = self.fallthrough_to {
            writeln!(f, "  fallthrough -> {to}")?;
        }
        if let Some(to) = self.branch_to {
            writeln!(f, "  branch -> {to}")?;
        }
        Ok(())
    }
}

impl Display for Cfg {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            write!(f, "{block}")?;
            for &id in &block.instructions {
                writeln!(f, "  {}", self.instr(id))?;
            }
        }
        Ok(())
    }
}
