use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

use tracing::{debug, trace};

use super::core_structs::{BlockId, BlockRole, Cfg};
use super::cse::{CseMatch, Eliminations};
use super::instructions::{BranchOp, IdentId, InstrId, InstructionKind, Operand};

#[derive(Debug, Copy, Clone)]
pub struct Options {
    pub eliminate_common_subexpressions: bool,
    /// register a call's result is moved into
    pub return_register: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            eliminate_common_subexpressions: true,
            return_register: 30,
        }
    }
}

/// Builds the SSA form of one function body from structural events issued in source order.
///
/// The builder starts with two blocks: a head block that collects constants
/// and incoming arguments, and an entry block that falls through from it and
/// receives the first statement.
#[derive(Debug)]
pub struct SsaBuilder {
    pub(super) cfg: Cfg,
    head: BlockId,
    pub(super) current: BlockId,
    pub(super) eliminations: Eliminations,
    /// phis still missing an operand, with the variable they merge
    pub(super) incomplete_phis: BTreeMap<InstrId, IdentId>,
    /// first id allocated inside each loop that is still open
    pub(super) loop_starts: Vec<InstrId>,
    options: Options,
    pub(super) finalized: bool,
}

impl Default for SsaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SsaBuilder {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        let mut cfg = Cfg::new();
        let head = cfg.new_block(BlockRole::Basic);
        let entry = cfg.new_block(BlockRole::Basic);
        cfg.link_fallthrough(head, entry);
        SsaBuilder {
            cfg,
            head,
            current: entry,
            eliminations: Eliminations::default(),
            incomplete_phis: BTreeMap::new(),
            loop_starts: vec![],
            options,
            finalized: false,
        }
    }

    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn head_block(&self) -> BlockId {
        self.head
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn set_current_block(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Variables read through a phi that lacks a definition on one of its paths.
    pub fn uninitialized_variables(&self) -> BTreeSet<IdentId> {
        self.incomplete_phis.values().copied().collect()
    }

    pub(super) fn assert_open(&self) {
        assert!(!self.finalized, "builder used after finalization");
    }

    pub fn add_var_decl(&mut self, ident: IdentId) {
        self.cfg.set_identifier(self.current, ident, None);
    }

    /// Constants live in the head block and are shared by every use.
    pub fn add_constant_if_not_exists(&mut self, value: i64) -> InstrId {
        let existing = self
            .cfg
            .block(self.head)
            .instructions()
            .iter()
            .copied()
            .find(|&id| matches!(self.cfg.instr(id).kind, InstructionKind::Const { value: v } if v == value));
        match existing {
            Some(id) => id,
            None => self.place(self.head, InstructionKind::Const { value }),
        }
    }

    pub fn insert_register_arg(&mut self, slot: u32) -> InstrId {
        self.place(self.head, InstructionKind::RegisterArg { slot })
    }

    pub fn get_identifier_instruction(&self, ident: IdentId) -> Option<InstrId> {
        self.cfg.lookup(self.current, ident)
    }

    /// The current value of `ident`, tagged with where it was read from.
    pub fn variable(&self, ident: IdentId) -> Operand {
        Operand::variable(self.get_identifier_instruction(ident), ident)
    }

    /// Appends to the current block, reusing or eliminating arithmetic that is already available.
    ///
    /// An identical instruction is returned as is and no id is spent. One that
    /// only computes the same value is kept but marked as eliminated, so it can
    /// come back if a loop phi later changes its operands. Identical
    /// instructions from before the innermost open loop are treated the same
    /// way, since the loop may still rewrite the new copy.
    pub fn insert_instr_to_current_block(&mut self, kind: InstructionKind) -> InstrId {
        self.assert_open();
        let block = self.current;
        if self.options.eliminate_common_subexpressions {
            match self.cfg.block(block).cse.find(&self.cfg, &kind) {
                Some(CseMatch::Exact(existing)) if !self.predates_open_loop(existing) => {
                    trace!(%existing, "reusing identical instruction");
                    return existing;
                }
                Some(CseMatch::Exact(existing) | CseMatch::SameValue(existing)) => {
                    let id = self.place(block, kind);
                    trace!(%id, %existing, "common subexpression");
                    self.eliminations.record(&mut self.cfg, id, existing);
                    return id;
                }
                None => {}
            }
        }
        self.place(block, kind)
    }

    pub(super) fn place(&mut self, block: BlockId, kind: InstructionKind) -> InstrId {
        let id = self.cfg.alloc(block, kind);
        self.cfg.insert_instruction(block, id);
        id
    }

    fn predates_open_loop(&self, id: InstrId) -> bool {
        self.loop_starts.last().map_or(false, |&start| id < start)
    }

    fn new_block_under(&mut self, dominator: BlockId, role: BlockRole) -> BlockId {
        let block = self.cfg.new_block(role);
        self.cfg.inherit_cse(dominator, block);
        block
    }

    /// Opens an if at the current block and returns it; it becomes the if block.
    ///
    /// The join takes over whatever the current block used to continue into:
    /// the back edge of the loop whose body it ends, or its fallthrough.
    pub fn enter_if(&mut self) -> BlockId {
        self.assert_open();
        let parent = self.current;
        let join = self.new_block_under(parent, BlockRole::IfJoin);
        self.cfg.set_origin(join, parent);
        match self.cfg.loop_back_edge(parent) {
            Some(header) => self.cfg.link_branch(join, header),
            None => {
                if let Some(outer) = self.cfg.block(parent).fallthrough_to() {
                    self.cfg.link_fallthrough(join, outer);
                }
            }
        }
        self.cfg.link_branch(parent, join);

        let then = self.new_block_under(parent, BlockRole::IfThen);
        self.cfg.link_fallthrough(then, join);
        self.cfg.link_fallthrough(parent, then);
        self.cfg.block_mut(parent).add_role(BlockRole::If);
        debug!(%parent, %then, %join, "entered if");
        parent
    }

    pub fn generate_else_block(&mut self, parent: BlockId) -> BlockId {
        self.assert_open();
        assert!(
            self.cfg.block(parent).has_role(BlockRole::If),
            "else opened on {parent}, which does not end in an if"
        );
        let join = self
            .cfg
            .block(parent)
            .branch_to()
            .expect("if block branches to its join until the else exists");
        let then_tail = self
            .cfg
            .block(join)
            .fallthrough_from()
            .expect("then side falls through into the join");
        self.cfg.unlink_fallthrough(then_tail);
        self.cfg.link_branch(then_tail, join);

        let otherwise = self.new_block_under(parent, BlockRole::IfElse);
        self.cfg.link_branch(parent, otherwise);
        self.cfg.link_fallthrough(otherwise, join);
        debug!(%parent, %otherwise, "entered else");
        otherwise
    }

    pub fn find_join_block(&self) -> BlockId {
        self.cfg
            .block(self.current)
            .fallthrough_to()
            .expect("the last block of an if side falls through into the join")
    }

    /// Opens a loop and makes its header current. An empty block nobody branches to becomes the header itself.
    pub fn enter_while(&mut self) -> BlockId {
        self.assert_open();
        let current = self.current;
        let outer_loop = self.cfg.loop_back_edge(current);
        let outer_join = self.cfg.block(current).fallthrough_to();
        if outer_loop.is_some() {
            self.cfg.unlink_branch(current);
        }

        let reusable = self.cfg.block(current).is_empty() && self.cfg.block(current).branch_from().is_none();
        let header = if reusable {
            self.cfg.block_mut(current).add_role(BlockRole::While);
            current
        } else {
            let header = self.new_block_under(current, BlockRole::While);
            self.cfg.link_fallthrough(current, header);
            header
        };

        let body = self.new_block_under(header, BlockRole::WhileBody);
        self.cfg.link_fallthrough(header, body);
        self.cfg.link_branch(body, header);

        let follow = self.new_block_under(header, BlockRole::WhileFollow);
        self.cfg.set_origin(follow, header);
        self.cfg.link_branch(header, follow);
        match (outer_loop, outer_join) {
            (Some(outer_header), _) => self.cfg.link_branch(follow, outer_header),
            (None, Some(outer_join)) => self.cfg.link_fallthrough(follow, outer_join),
            (None, None) => {}
        }

        self.loop_starts.push(self.cfg.next_id());
        self.current = header;
        debug!(%header, %body, %follow, reused = reusable, "entered while");
        header
    }

    /// Records `ident = value` in the current block and merges it into the construct around it.
    pub fn assign(&mut self, ident: IdentId, value: impl Into<Option<InstrId>>) {
        self.assert_open();
        let value = value.into();
        let block = self.current;
        self.cfg.set_identifier(block, ident, value);
        let enclosing = self.cfg.enclosing(block);
        self.merge_into(enclosing, ident, value);
    }

    /// Points the conditional branch ending `parent` at its branch target.
    pub fn set_branch_instr(&mut self, parent: BlockId) {
        self.assert_open();
        let target_block = self
            .cfg
            .block(parent)
            .branch_to()
            .expect("a block ending in a conditional branch has a branch target");
        let target = self.cfg.branch_target_of(target_block);
        let branch = self
            .cfg
            .block(parent)
            .instructions()
            .iter()
            .rev()
            .copied()
            .find(|&id| self.cfg.instr(id).kind.is_branch())
            .unwrap_or_else(|| panic!("{parent} has no branch instruction to aim"));
        if let InstructionKind::Branch { target: slot, .. } = &mut self.cfg.instr_mut(branch).kind {
            *slot = Some(target);
        }
    }

    /// Appends an unconditional jump from `tail` to the block it branches to.
    pub fn add_branch_instr(&mut self, tail: BlockId) -> InstrId {
        self.assert_open();
        let target_block = self
            .cfg
            .block(tail)
            .branch_to()
            .unwrap_or_else(|| panic!("{tail} has no branch target to jump to"));
        let target = self.cfg.branch_target_of(target_block);
        self.place(
            tail,
            InstructionKind::Branch {
                op: BranchOp::Bra,
                target: Some(target),
            },
        )
    }
}

impl Display for SsaBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cfg)
    }
}
