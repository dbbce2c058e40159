use std::collections::HashMap;
use std::iter;
use std::rc::Rc;

use tracing::debug;

use super::core_structs::Cfg;
use super::instructions::{BinaryOp, InstrId, InstructionKind};

#[derive(Debug)]
struct Node {
    instr: InstrId,
    next: Option<Rc<Node>>,
}

/// Arithmetic instructions visible from a block, most recent first, one list per opcode.
///
/// Lists are persistent: a block created under a dominator clones the list
/// heads, and later insertions on either side never show up on the other.
#[derive(Debug, Clone, Default)]
pub struct CseIndex {
    buckets: [Option<Rc<Node>>; 4],
}

fn bucket(op: BinaryOp) -> usize {
    match op {
        BinaryOp::Add => 0,
        BinaryOp::Sub => 1,
        BinaryOp::Mul => 2,
        BinaryOp::Div => 3,
        BinaryOp::Cmp | BinaryOp::Phi => unreachable!("{op:?} is never a common subexpression"),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CseMatch {
    /// same opcode, operands and variable provenance
    Exact(InstrId),
    /// same opcode and operand values only
    SameValue(InstrId),
}

impl CseIndex {
    pub fn insert(&mut self, op: BinaryOp, instr: InstrId) {
        let head = &mut self.buckets[bucket(op)];
        *head = Some(Rc::new(Node {
            instr,
            next: head.take(),
        }));
    }

    pub fn candidates(&self, op: BinaryOp) -> impl Iterator<Item = InstrId> + '_ {
        iter::successors(self.buckets[bucket(op)].as_deref(), |node| node.next.as_deref())
            .map(|node| node.instr)
    }

    pub fn find(&self, cfg: &Cfg, kind: &InstructionKind) -> Option<CseMatch> {
        let op = kind.arithmetic_op()?;
        if let Some(exact) = self.candidates(op).find(|&id| cfg.instr(id).kind == *kind) {
            return Some(CseMatch::Exact(exact));
        }
        self.candidates(op)
            .find(|&id| cfg.instr(id).kind.computes_same_value(kind))
            .map(CseMatch::SameValue)
    }
}

/// Which instructions each live instruction currently stands in for.
#[derive(Debug, Default)]
pub struct Eliminations {
    dependents: HashMap<InstrId, Vec<InstrId>>,
}

impl Eliminations {
    pub fn record(&mut self, cfg: &mut Cfg, eliminated: InstrId, by: InstrId) {
        cfg.instr_mut(eliminated).eliminate(by);
        self.dependents.entry(by).or_default().push(eliminated);
    }

    #[cfg(test)]
    pub fn dependents_of(&self, eliminator: InstrId) -> &[InstrId] {
        self.dependents
            .get(&eliminator)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Undoes eliminations that relied on the operands `rewritten` had before it was rewritten.
    pub fn reactivate(&mut self, cfg: &mut Cfg, rewritten: InstrId) {
        if let Some(mut dependents) = self.dependents.remove(&rewritten) {
            let promoted = dependents.remove(0);
            debug!(%rewritten, %promoted, "operands changed under eliminator, promoting first dependent");
            cfg.instr_mut(promoted).activate();
            for &dependent in &dependents {
                cfg.instr_mut(dependent).eliminate(promoted);
            }
            if !dependents.is_empty() {
                self.dependents.entry(promoted).or_default().extend(dependents);
            }
        }

        if let Some(eliminator) = cfg.instr(rewritten).eliminated_by() {
            debug!(%rewritten, %eliminator, "operands changed under eliminated instruction, reactivating");
            if let Some(dependents) = self.dependents.get_mut(&eliminator) {
                dependents.retain(|&dependent| dependent != rewritten);
                if dependents.is_empty() {
                    self.dependents.remove(&eliminator);
                }
            }
            cfg.instr_mut(rewritten).activate();
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::core_structs::BlockRole;
    use crate::ir::instructions::Operand;

    fn add(lhs: Operand, rhs: Operand) -> InstructionKind {
        InstructionKind::Binary {
            op: BinaryOp::Add,
            lhs,
            rhs,
        }
    }

    #[test]
    fn inherited_index_is_independent_of_its_source() {
        let mut parent = CseIndex::default();
        parent.insert(BinaryOp::Add, InstrId(1));
        let mut child = parent.clone();
        child.insert(BinaryOp::Add, InstrId(2));
        parent.insert(BinaryOp::Add, InstrId(3));

        assert_eq!(child.candidates(BinaryOp::Add).collect::<Vec<_>>(), vec![InstrId(2), InstrId(1)]);
        assert_eq!(parent.candidates(BinaryOp::Add).collect::<Vec<_>>(), vec![InstrId(3), InstrId(1)]);
        assert_eq!(child.candidates(BinaryOp::Mul).count(), 0);
    }

    #[test]
    fn exact_matches_win_over_value_matches() {
        let mut cfg = Cfg::new();
        let block = cfg.new_block(BlockRole::Basic);
        let a = cfg.alloc(block, InstructionKind::Read);
        let b = cfg.alloc(block, InstructionKind::Read);
        let through_x = cfg.alloc(block, add(Operand::variable(Some(a), 0), Operand::variable(Some(b), 1)));
        let through_y = cfg.alloc(block, add(Operand::variable(Some(a), 2), Operand::variable(Some(b), 1)));
        let mut index = CseIndex::default();
        index.insert(BinaryOp::Add, through_x);
        index.insert(BinaryOp::Add, through_y);

        let query = add(Operand::variable(Some(a), 0), Operand::variable(Some(b), 1));
        assert_eq!(index.find(&cfg, &query), Some(CseMatch::Exact(through_x)));

        let query = add(Operand::variable(Some(a), 5), Operand::value(b));
        assert_eq!(index.find(&cfg, &query), Some(CseMatch::SameValue(through_y)));

        let query = add(Operand::value(b), Operand::value(a));
        assert_eq!(index.find(&cfg, &query), None);
    }

    #[test]
    fn rewriting_an_eliminator_promotes_its_first_dependent() {
        let mut cfg = Cfg::new();
        let block = cfg.new_block(BlockRole::Basic);
        let ids = (0..4)
            .map(|_| cfg.alloc(block, InstructionKind::Read))
            .collect::<Vec<_>>();
        let mut eliminations = Eliminations::default();
        eliminations.record(&mut cfg, ids[1], ids[0]);
        eliminations.record(&mut cfg, ids[2], ids[0]);
        eliminations.record(&mut cfg, ids[3], ids[0]);

        eliminations.reactivate(&mut cfg, ids[0]);

        assert!(!cfg.instr(ids[1]).is_eliminated());
        assert_eq!(cfg.instr(ids[2]).eliminated_by(), Some(ids[1]));
        assert_eq!(cfg.instr(ids[3]).eliminated_by(), Some(ids[1]));
        assert_eq!(eliminations.dependents_of(ids[1]), &[ids[2], ids[3]]);
        assert!(eliminations.dependents_of(ids[0]).is_empty());
    }

    #[test]
    fn rewriting_an_eliminated_instruction_detaches_it() {
        let mut cfg = Cfg::new();
        let block = cfg.new_block(BlockRole::Basic);
        let ids = (0..3)
            .map(|_| cfg.alloc(block, InstructionKind::Read))
            .collect::<Vec<_>>();
        let mut eliminations = Eliminations::default();
        eliminations.record(&mut cfg, ids[1], ids[0]);
        eliminations.record(&mut cfg, ids[2], ids[0]);

        eliminations.reactivate(&mut cfg, ids[2]);
        assert!(!cfg.instr(ids[2]).is_eliminated());
        assert_eq!(eliminations.dependents_of(ids[0]), &[ids[1]]);

        eliminations.reactivate(&mut cfg, ids[1]);
        assert!(eliminations.is_empty());
    }
}
