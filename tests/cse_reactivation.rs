mod common;

use pretty_assertions::assert_eq;
use tinyssa::ir::{BinaryOp, BranchOp};

use crate::common::{assert_branches_resolved, operand_values, Walker};

const A: u32 = 0;
const B: u32 = 1;
const C: u32 = 2;
const D: u32 = 3;
const Y: u32 = 4;

#[test]
fn loop_phi_promotes_first_dependent_of_rewritten_eliminator() {
    let mut w = Walker::new();
    w.declare(&[A, B, C, D]);
    let a = w.read();
    w.assign(A, a);
    w.assign(C, a);
    w.assign(D, a);
    let b = w.read();
    w.assign(B, b);

    let mut sums = vec![];
    let mut writes = vec![];
    w.while_do(
        |w| {
            let (b, ten) = (w.var(B), w.num(10));
            w.relation(b, BranchOp::Bge, ten);
        },
        |w| {
            for name in [A, C, D] {
                let (lhs, rhs) = (w.var(name), w.var(B));
                let sum = w.binary(BinaryOp::Add, lhs, rhs);
                sums.push(sum.value.unwrap());
                writes.push(w.write(sum));
            }
            let fresh = w.read();
            w.assign(A, fresh);
        },
    );

    {
        let cfg = w.program.cfg();
        let phi = w.program.get_identifier_instruction(A).unwrap();
        assert!(cfg.instr(phi).kind.is_phi());
        assert_eq!(operand_values(cfg, sums[0]), vec![Some(phi), b.value]);
        assert!(!cfg.instr(sums[0]).is_eliminated());
        assert!(!cfg.instr(sums[1]).is_eliminated());
        assert_eq!(cfg.instr(sums[2]).eliminated_by(), Some(sums[1]));
        assert_eq!(operand_values(cfg, sums[2]), operand_values(cfg, sums[1]));
    }

    assert!(w.program.finish().is_empty());
    let cfg = w.program.cfg();
    let args = writes
        .iter()
        .map(|&write| operand_values(cfg, write)[0].unwrap())
        .collect::<Vec<_>>();
    assert_eq!(args, vec![sums[0], sums[1], sums[1]]);
    let body = cfg.instr(sums[0]).block;
    assert!(!cfg.block(body).instructions().contains(&sums[2]));
    assert_branches_resolved(cfg);
}

#[test]
fn identical_expression_from_before_the_loop_is_not_reused_blindly() {
    // y <- a + b; while b < 10 do y <- a + b; a <- y od
    let mut w = Walker::new();
    w.declare(&[A, B, Y]);
    let a = w.read();
    w.assign(A, a);
    let b = w.read();
    w.assign(B, b);
    let (lhs, rhs) = (w.var(A), w.var(B));
    let sum = w.binary(BinaryOp::Add, lhs, rhs);
    w.assign(Y, sum);
    let before = sum.value.unwrap();

    let mut inside = None;
    w.while_do(
        |w| {
            let (b, ten) = (w.var(B), w.num(10));
            w.relation(b, BranchOp::Bge, ten);
        },
        |w| {
            let (lhs, rhs) = (w.var(A), w.var(B));
            let sum = w.binary(BinaryOp::Add, lhs, rhs);
            inside = sum.value;
            w.assign(Y, sum);
            let y = w.var(Y);
            w.assign(A, y);
        },
    );
    let loop_a = w.program.get_identifier_instruction(A).unwrap();
    assert!(w.program.finish().is_empty());

    let cfg = w.program.cfg();
    let inside = inside.unwrap();
    assert_ne!(inside, before);
    assert!(!cfg.instr(inside).is_eliminated());

    assert!(cfg.instr(loop_a).kind.is_phi());
    assert_eq!(operand_values(cfg, loop_a), vec![a.value, Some(inside)]);
    assert_eq!(operand_values(cfg, inside), vec![Some(loop_a), b.value]);
    assert_eq!(operand_values(cfg, before), vec![a.value, b.value]);
}
