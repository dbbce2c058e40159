#![allow(dead_code)]

use tinyssa::ir::{
    BinaryOp, BlockId, BranchOp, BranchTarget, Cfg, IdentId, InstrId, InstructionKind, Operand, UnaryOp,
};
use tinyssa::Program;

/// Drives a `Program` the way the grammar walker does for each statement form.
pub struct Walker {
    pub program: Program,
}

impl Walker {
    pub fn new() -> Self {
        Walker {
            program: Program::new(),
        }
    }

    pub fn declare(&mut self, idents: &[IdentId]) {
        for &ident in idents {
            self.program.add_var_decl(ident);
        }
    }

    pub fn var(&self, ident: IdentId) -> Operand {
        self.program.variable(ident)
    }

    pub fn num(&mut self, value: i64) -> Operand {
        Operand::value(self.program.add_constant_if_not_exists(value))
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Operand, rhs: Operand) -> Operand {
        Operand::value(
            self.program
                .insert_instr_to_current_block(InstructionKind::Binary { op, lhs, rhs }),
        )
    }

    pub fn read(&mut self) -> Operand {
        Operand::value(self.program.insert_instr_to_current_block(InstructionKind::Read))
    }

    pub fn write(&mut self, arg: Operand) -> InstrId {
        self.program.insert_instr_to_current_block(InstructionKind::Unary {
            op: UnaryOp::Write,
            arg,
        })
    }

    pub fn assign(&mut self, ident: IdentId, value: Operand) {
        self.program.assign(ident, value.value);
    }

    /// Emits the compare and the branch taken when the relation does not hold.
    pub fn relation(&mut self, lhs: Operand, exit: BranchOp, rhs: Operand) {
        self.program.insert_instr_to_current_block(InstructionKind::Binary {
            op: BinaryOp::Cmp,
            lhs,
            rhs,
        });
        self.program.insert_instr_to_current_block(InstructionKind::Branch {
            op: exit,
            target: None,
        });
    }

    pub fn if_then(&mut self, cond: impl FnOnce(&mut Self), then: impl FnOnce(&mut Self)) -> BlockId {
        self.if_statement(cond, then, None::<fn(&mut Self)>)
    }

    pub fn if_then_else(
        &mut self,
        cond: impl FnOnce(&mut Self),
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) -> BlockId {
        self.if_statement(cond, then, Some(otherwise))
    }

    fn if_statement(
        &mut self,
        cond: impl FnOnce(&mut Self),
        then: impl FnOnce(&mut Self),
        otherwise: Option<impl FnOnce(&mut Self)>,
    ) -> BlockId {
        let parent = self.program.enter_if();
        let join = self.program.cfg().block(parent).branch_to().unwrap();
        cond(self);
        let then_block = self.program.cfg().block(parent).fallthrough_to().unwrap();
        self.program.set_current_block(then_block);
        then(self);
        if let Some(otherwise) = otherwise {
            let else_block = self.program.generate_else_block(parent);
            self.program.set_current_block(else_block);
            otherwise(self);
            let then_tail = self.program.cfg().block(join).branch_from().unwrap();
            self.program.add_branch_instr(then_tail);
        }
        self.program.set_branch_instr(parent);
        let join = self.program.find_join_block();
        self.program.set_current_block(join);
        self.program.propagate_nested_if(parent);
        parent
    }

    pub fn while_do(&mut self, cond: impl FnOnce(&mut Self), body: impl FnOnce(&mut Self)) -> BlockId {
        let header = self.program.enter_while();
        cond(self);
        let body_block = self.program.cfg().block(header).fallthrough_to().unwrap();
        self.program.set_current_block(body_block);
        body(self);
        let tail = self.program.current_block();
        self.program.add_branch_instr(tail);
        self.program.set_branch_instr(header);
        self.program.set_current_block(header);
        self.program.propagate_nested_while(header);
        let follow = self.program.cfg().block(header).branch_to().unwrap();
        self.program.set_current_block(follow);
        header
    }
}

pub fn operand_values(cfg: &Cfg, id: InstrId) -> Vec<Option<InstrId>> {
    cfg.instr(id).kind.operands().map(|operand| operand.value).collect()
}

pub fn phis(cfg: &Cfg, block: BlockId) -> Vec<InstrId> {
    cfg.phis(block)
}

pub fn const_value(cfg: &Cfg, id: InstrId) -> Option<i64> {
    match cfg.instr(id).kind {
        InstructionKind::Const { value } => Some(value),
        _ => None,
    }
}

/// Every branch lands on an instruction that is still listed in some block.
pub fn assert_branches_resolved(cfg: &Cfg) {
    for block in cfg.blocks() {
        assert!(!block.has_placeholder(), "{} still holds a placeholder", block.id);
        for &id in block.instructions() {
            if let InstructionKind::Branch { target, .. } = &cfg.instr(id).kind {
                let Some(BranchTarget::Instr(target)) = target else {
                    panic!("branch {id} left unresolved: {target:?}");
                };
                let landing = cfg.instr(*target).block;
                assert!(
                    cfg.block(landing).instructions().contains(target),
                    "branch {id} lands on dropped instruction {target}"
                );
            }
        }
    }
}
