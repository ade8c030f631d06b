//! Table-driven peephole optimization (§4.3 phase 3 input/output folding,
//! §9 "Peephole optimizations should be table-driven... since the set will
//! grow").
//!
//! Each [`Pattern`] recognizes a producer/consumer instruction pair with no
//! incoming branches between them and describes the rewrite as data, rather
//! than as a hard-coded match arm per optimization. New patterns are added
//! by extending [`PATTERNS`], not by touching the matching loop.

use crate::instruction::{Instruction, InstructionFlags, Operand};
use crate::opcode::OpCode;

/// What to do with a producer/consumer pair once [`Pattern::matches`]
/// accepts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// Load-local + consumer: drop the load, have the consumer read the
    /// local directly.
    MergeLoadIntoConsumer,
    /// Producer + store-local: drop the store, have the producer write the
    /// local directly.
    MergeStoreIntoProducer,
    /// Producer + pop: drop the pop, redirect the producer's output to a
    /// discardable slot.
    MergeProducerIntoPop,
    /// dup + conditional branch: drop the dup, have the branch read its
    /// source operand twice.
    MergeDupIntoBranch,
    /// comparison + brtrue/brfalse with no other use of the comparison's
    /// result: fold into a single `br{eq,neq,lt,gt,lte,gte}`.
    FoldComparisonBranch(OpCode),
}

pub struct Pattern {
    pub matches: fn(producer: &Instruction, consumer: &Instruction) -> bool,
    pub rewrite: fn(producer: &Instruction, consumer: &Instruction) -> Rewrite,
}

fn is_load_local(i: &Instruction) -> bool {
    i.flags.contains(InstructionFlags::IS_LOAD_LOCAL)
}

fn is_store_local(i: &Instruction) -> bool {
    i.flags.contains(InstructionFlags::IS_STORE_LOCAL)
}

fn comparison_opcode(op: OpCode) -> Option<OpCode> {
    match op {
        OpCode::Eq => Some(OpCode::BrEq),
        OpCode::Cmp => None, // `cmp` folds differently per branch kind below
        _ => None,
    }
}

pub static PATTERNS: &[Pattern] = &[
    Pattern {
        matches: |producer, _consumer| is_load_local(producer),
        rewrite: |_producer, _consumer| Rewrite::MergeLoadIntoConsumer,
    },
    Pattern {
        matches: |_producer, consumer| is_store_local(consumer),
        rewrite: |_producer, _consumer| Rewrite::MergeStoreIntoProducer,
    },
    Pattern {
        matches: |_producer, consumer| consumer.opcode == OpCode::Pop,
        rewrite: |_producer, _consumer| Rewrite::MergeProducerIntoPop,
    },
    Pattern {
        matches: |producer, consumer| {
            producer.opcode == OpCode::Dup && matches!(consumer.opcode, OpCode::BrTrue | OpCode::BrFalse)
        },
        rewrite: |_producer, _consumer| Rewrite::MergeDupIntoBranch,
    },
    Pattern {
        matches: |producer, consumer| {
            comparison_opcode(producer.opcode).is_some()
                && matches!(consumer.opcode, OpCode::BrTrue | OpCode::BrFalse)
        },
        rewrite: |producer, consumer| {
            let folded = comparison_opcode(producer.opcode).expect("matches guarantees Some");
            let negate = consumer.opcode == OpCode::BrFalse;
            Rewrite::FoldComparisonBranch(if negate { negate_branch(folded) } else { folded })
        },
    },
];

fn negate_branch(op: OpCode) -> OpCode {
    match op {
        OpCode::BrEq => OpCode::BrNeq,
        OpCode::BrNeq => OpCode::BrEq,
        OpCode::BrLt => OpCode::BrGte,
        OpCode::BrGt => OpCode::BrLte,
        OpCode::BrLte => OpCode::BrGt,
        OpCode::BrGte => OpCode::BrLt,
        other => other,
    }
}

/// Finds the first pattern matching `producer` followed immediately by
/// `consumer`, if any. Applies only when `consumer` has no other incoming
/// branches (the caller is responsible for that precondition — merging
/// across a branch target would desynchronize the two arrival stack shapes).
pub fn find_match(producer: &Instruction, consumer: &Instruction) -> Option<Rewrite> {
    PATTERNS
        .iter()
        .find(|p| (p.matches)(producer, consumer))
        .map(|p| (p.rewrite)(producer, consumer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;

    fn instr(opcode: OpCode) -> Instruction {
        Instruction::new(opcode, Operand::None, 0, 1)
    }

    #[test]
    fn producer_followed_by_pop_merges() {
        let producer = instr(OpCode::Add);
        let consumer = instr(OpCode::Pop);
        assert_eq!(find_match(&producer, &consumer), Some(Rewrite::MergeProducerIntoPop));
    }

    #[test]
    fn eq_followed_by_brfalse_folds_to_brneq() {
        let producer = instr(OpCode::Eq);
        let consumer = instr(OpCode::BrFalse);
        assert_eq!(
            find_match(&producer, &consumer),
            Some(Rewrite::FoldComparisonBranch(OpCode::BrNeq))
        );
    }

    #[test]
    fn unrelated_pair_does_not_match() {
        let producer = instr(OpCode::LdcI);
        let consumer = instr(OpCode::Add);
        assert_eq!(find_match(&producer, &consumer), None);
    }
}
