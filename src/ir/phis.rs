use tracing::debug;

use super::core_structs::{BlockId, BlockRole, Enclosing};
use super::gen::SsaBuilder;
use super::instructions::{IdentId, InstrId, InstructionKind, Operand};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Side {
    First,
    Second,
}

impl SsaBuilder {
    /// Makes `value` the new binding of `ident` on the path leading out of the enclosing construct.
    pub(super) fn merge_into(&mut self, enclosing: Enclosing, ident: IdentId, value: Option<InstrId>) {
        match enclosing {
            Enclosing::Then(join) => self.merge_into_join(join, ident, value, Side::First),
            Enclosing::Else(join) => self.merge_into_join(join, ident, value, Side::Second),
            Enclosing::Loop(header) => self.merge_into_loop(header, ident, value),
            Enclosing::Outermost => {}
        }
    }

    fn merge_into_join(&mut self, join: BlockId, ident: IdentId, value: Option<InstrId>, side: Side) {
        if let Some(phi) = self.own_phi(join, ident) {
            self.set_phi_operand(phi, ident, side, value);
            return;
        }
        // the side that has not assigned yet still sees the value from before the if
        let if_block = self
            .cfg
            .block(join)
            .origin()
            .expect("an if join remembers its if block");
        let before = self.cfg.lookup(if_block, ident);
        match side {
            Side::First => self.insert_phi(join, ident, value, before),
            Side::Second => self.insert_phi(join, ident, before, value),
        };
    }

    fn merge_into_loop(&mut self, header: BlockId, ident: IdentId, value: Option<InstrId>) {
        if let Some(phi) = self.own_phi(header, ident) {
            self.set_phi_operand(phi, ident, Side::Second, value);
            return;
        }
        let before = self.cfg.lookup(header, ident);
        let phi = self.insert_phi(header, ident, before, value);
        self.propagate_while_phi_downstream(header, ident, before, phi);
    }

    /// The phi for `ident` placed in `block` itself, if any.
    fn own_phi(&self, block: BlockId, ident: IdentId) -> Option<InstrId> {
        if !self.cfg.contains_phi_assignment(block, ident) {
            return None;
        }
        self.cfg
            .block(block)
            .symbols()
            .get(&ident)
            .copied()
            .flatten()
            .filter(|&phi| self.cfg.instr(phi).block == block)
    }

    fn insert_phi(
        &mut self,
        block: BlockId,
        ident: IdentId,
        first: Option<InstrId>,
        second: Option<InstrId>,
    ) -> InstrId {
        let phi = self.place(
            block,
            InstructionKind::phi(Operand::variable(first, ident), Operand::variable(second, ident)),
        );
        self.cfg.set_identifier(block, ident, Some(phi));
        if first.is_none() || second.is_none() {
            self.incomplete_phis.insert(phi, ident);
        }
        debug!(%phi, %block, ident, "inserted phi");
        phi
    }

    fn set_phi_operand(&mut self, phi: InstrId, ident: IdentId, side: Side, value: Option<InstrId>) {
        let complete = match &mut self.cfg.instr_mut(phi).kind {
            InstructionKind::Binary { lhs, rhs, .. } => {
                match side {
                    Side::First => lhs.value = value,
                    Side::Second => rhs.value = value,
                }
                lhs.value.is_some() && rhs.value.is_some()
            }
            kind => unreachable!("{phi} bound as a phi but is {kind:?}"),
        };
        if complete {
            self.incomplete_phis.remove(&phi);
        } else {
            self.incomplete_phis.insert(phi, ident);
        }
    }

    /// Points the loop's earlier reads of `ident` at the new loop phi.
    ///
    /// Every instruction generated between the header's exit test and the phi
    /// belongs to the loop, so the id range is exactly the set of candidates.
    /// Reads that found no definition before the loop are pointed at the phi
    /// too. Arithmetic whose operands change here gets its elimination undone.
    fn propagate_while_phi_downstream(
        &mut self,
        header: BlockId,
        ident: IdentId,
        before: Option<InstrId>,
        phi: InstrId,
    ) {
        let start = self
            .cfg
            .first_non_phi(header)
            .expect("a loop header holds its exit test before the body is built");
        for id in start.until(phi) {
            if self.cfg.instr_mut(id).kind.replace_operand(ident, before, phi) {
                self.eliminations.reactivate(&mut self.cfg, id);
                self.forget_if_complete(id);
            }
        }
    }

    /// An inner phi whose missing side was just filled by a loop phi.
    fn forget_if_complete(&mut self, id: InstrId) {
        let complete = self
            .cfg
            .instr(id)
            .kind
            .operands()
            .all(|operand| operand.value.is_some());
        if complete {
            self.incomplete_phis.remove(&id);
        }
    }

    /// Carries the phis of a finished if outward. The current block must be its join.
    pub fn propagate_nested_if(&mut self, parent: BlockId) {
        self.assert_open();
        let join = self.current;
        assert!(
            self.cfg.block(join).has_role(BlockRole::IfJoin) && self.cfg.block(join).origin() == Some(parent),
            "current block {join} is not the join of the if at {parent}"
        );
        self.propagate_phis_out_of(join, join, parent);
    }

    /// Carries the phis of a finished loop outward and closes the loop.
    pub fn propagate_nested_while(&mut self, header: BlockId) {
        self.assert_open();
        assert!(
            self.cfg.block(header).has_role(BlockRole::While),
            "{header} is not a loop header"
        );
        let follow = self
            .cfg
            .block(header)
            .branch_to()
            .expect("a loop header branches to its follow block");
        self.loop_starts.pop();
        self.propagate_phis_out_of(header, follow, header);
    }

    fn propagate_phis_out_of(&mut self, block: BlockId, exit: BlockId, parent: BlockId) {
        let enclosing = self.cfg.enclosing(exit);
        if enclosing == Enclosing::Outermost {
            self.cfg.complete_symbol_table(exit, parent);
            return;
        }
        for phi in self.cfg.phis(block) {
            let ident = self
                .cfg
                .identifier_of(block, phi)
                .expect("a phi stays bound to the variable it merges");
            self.merge_into(enclosing, ident, Some(phi));
        }
    }
}
