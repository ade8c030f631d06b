//! Static references: lock-protected storage for static fields (§3 Static
//! reference, §4.2 AddStaticReference).
//!
//! The source allocates static fields in fixed-size blocks and tracks, per
//! block, whether any slot currently holds a gen-0 reference, so the
//! collector's root-set walk (§4.2 step 2) knows which blocks to scan without
//! visiting every static in the VM on every cycle.

use crate::value::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;

/// How many static slots live in each [`StaticRefBlock`]. Chosen to match
/// the source's block granularity for gen-0-reference tracking; not
/// load-bearing for correctness, only for how coarsely that tracking bit
/// batches slots together.
pub const STATIC_REF_BLOCK_SIZE: usize = 64;

/// An opaque handle identifying a single static field's storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticRefId {
    block: u32,
    slot: u32,
}

pub(crate) struct StaticRefBlock {
    slots: Vec<RwLock<Value>>,
    used: AtomicU32,
    /// Set whenever any slot in this block is written a gen-0 reference;
    /// cleared at the end of a cycle once all such references have been
    /// either promoted or rewritten (§4.2 invariants).
    has_gen0_refs: AtomicBool,
}

impl StaticRefBlock {
    fn new() -> Self {
        Self {
            slots: (0..STATIC_REF_BLOCK_SIZE).map(|_| RwLock::new(Value::Null)).collect(),
            used: AtomicU32::new(0),
            has_gen0_refs: AtomicBool::new(false),
        }
    }
}

/// Owns every static field slot allocated in the VM.
#[derive(Default)]
pub struct StaticRefTable {
    blocks: Vec<StaticRefBlock>,
}

impl StaticRefTable {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Allocates a fresh static slot initialized to null, adding a new block
    /// if the current one is full.
    pub fn add(&mut self) -> StaticRefId {
        if self.blocks.is_empty() || self.blocks.last().unwrap().slots_filled() {
            self.blocks.push(StaticRefBlock::new());
        }
        let block_index = self.blocks.len() as u32 - 1;
        let block = self.blocks.last_mut().unwrap();
        let slot = block.next_free();
        StaticRefId {
            block: block_index,
            slot,
        }
    }

    pub fn read(&self, id: StaticRefId) -> Value {
        *self.blocks[id.block as usize].slots[id.slot as usize]
            .read()
            .expect("static ref lock poisoned")
    }

    pub fn write(&self, id: StaticRefId, value: Value) {
        *self.blocks[id.block as usize].slots[id.slot as usize]
            .write()
            .expect("static ref lock poisoned") = value;
        if matches!(value, Value::Instance { .. }) {
            self.blocks[id.block as usize]
                .has_gen0_refs
                .store(true, Ordering::Relaxed);
        }
    }

    /// Blocks worth visiting during root-set marking: those flagged as
    /// possibly holding a gen-0 reference (§4.2 step 2).
    pub fn blocks_with_gen0_refs(&self) -> impl Iterator<Item = &StaticRefBlock> {
        self.blocks
            .iter()
            .filter(|b| b.has_gen0_refs.load(Ordering::Relaxed))
    }

    /// Clears the gen-0-refs flag on every block at the end of a cycle; it
    /// is re-set as objects are (re-)scanned during the next cycle.
    pub fn clear_gen0_flags(&self) {
        for block in &self.blocks {
            block.has_gen0_refs.store(false, Ordering::Relaxed);
        }
    }

    /// Every value currently stored in any static slot; these are always
    /// part of the GC root set regardless of the gen-0-refs flag, which is
    /// only a scheduling optimization (§4.2 step 2).
    pub fn all_values(&self) -> Vec<Value> {
        self.blocks
            .iter()
            .flat_map(|b| b.slots.iter().map(|s| *s.read().expect("static ref lock poisoned")))
            .collect()
    }
}

impl StaticRefBlock {
    fn slots_filled(&self) -> bool {
        // A block never grows past STATIC_REF_BLOCK_SIZE; `next_free` panics
        // once exhausted, so callers always check this first via `add`.
        self.used.load(Ordering::Relaxed) as usize >= self.slots.len()
    }

    fn next_free(&self) -> u32 {
        let index = self.used.fetch_add(1, Ordering::Relaxed);
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_value() {
        let mut table = StaticRefTable::new();
        let id = table.add();
        assert!(table.read(id).is_null());
        table.write(id, Value::Int(42));
        assert_eq!(table.read(id), Value::Int(42));
    }

    #[test]
    fn allocates_a_new_block_once_full() {
        let mut table = StaticRefTable::new();
        for _ in 0..STATIC_REF_BLOCK_SIZE + 1 {
            table.add();
        }
        assert_eq!(table.blocks.len(), 2);
    }
}
