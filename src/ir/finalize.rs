use std::collections::HashMap;

use tracing::debug;

use super::core_structs::BlockId;
use super::gen::SsaBuilder;
use super::instructions::{BranchTarget, InstrId, InstructionKind};

impl SsaBuilder {
    /// Ends the body with `terminator` and settles the graph for consumers.
    pub fn finalize(&mut self, terminator: InstructionKind) {
        self.assert_open();
        let current = self.current;
        self.place(current, terminator);
        self.propagate_common_subexpr();
    }

    /// Replaces every use of an eliminated instruction with the live instruction standing in for it.
    ///
    /// Afterwards eliminated instructions are gone from their blocks (they stay
    /// in the arena), every branch points at the first instruction control
    /// actually reaches in its target block, and no placeholder is left.
    pub fn propagate_common_subexpr(&mut self) {
        self.assert_open();
        let ids = self.cfg.instructions().iter().map(|instr| instr.id).collect::<Vec<_>>();

        let roots = ids
            .iter()
            .filter(|&&id| self.cfg.instr(id).is_eliminated())
            .map(|&id| (id, self.live_root(id)))
            .collect::<HashMap<_, _>>();
        for &id in &ids {
            for operand in self.cfg.instr_mut(id).kind.operands_mut() {
                if let Some(root) = operand.value.and_then(|value| roots.get(&value)) {
                    operand.value = Some(*root);
                }
            }
        }

        let blocks = self.cfg.blocks().map(|block| block.id).collect::<Vec<_>>();
        for &block in &blocks {
            self.cfg
                .rewrite_symbols(block, |value| roots.get(&value).copied().unwrap_or(value));
            self.cfg.retain_instructions(block, |instr| !instr.is_eliminated());
        }

        for &id in &ids {
            let InstructionKind::Branch { target, .. } = &self.cfg.instr(id).kind else {
                continue;
            };
            let target_block = match target.unwrap_or_else(|| panic!("branch {id} was never given a target")) {
                BranchTarget::Instr(instr) => self.cfg.instr(instr).block,
                BranchTarget::Placeholder(block) => block,
            };
            let resolved = self.landing_instruction(target_block);
            if let InstructionKind::Branch { target, .. } = &mut self.cfg.instr_mut(id).kind {
                *target = Some(BranchTarget::Instr(resolved));
            }
        }
        for &block in &blocks {
            self.cfg.clear_placeholder(block);
        }

        self.finalized = true;
        debug!(
            instructions = ids.len(),
            eliminated = roots.len(),
            "finalized"
        );
    }

    fn live_root(&self, id: InstrId) -> InstrId {
        let mut root = id;
        let mut steps = 0;
        while let Some(by) = self.cfg.instr(root).eliminated_by() {
            steps += 1;
            assert!(
                steps <= self.cfg.instructions().len(),
                "elimination chain from {id} loops"
            );
            root = by;
        }
        root
    }

    fn landing_instruction(&self, block: BlockId) -> InstrId {
        self.cfg
            .first_reachable_instruction(block)
            .unwrap_or_else(|| panic!("branch into {block} never reaches an instruction"))
    }
}
