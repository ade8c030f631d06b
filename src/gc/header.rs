//! The per-object GC header (§3 GC object).

use bitflags::bitflags;
use crate::types::TypeHandle;

/// Which generation an object currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Gen0,
    Gen1,
    /// Allocated directly on the large object heap; never moved (§3
    /// Generations).
    Large,
}

/// The three-state mark used during a cycle (§9 "Three-state mark bits").
/// Rotated modulo 2 bits between cycles rather than reset per-object; this
/// enum makes the rotation explicit instead of packing it into two raw bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// This cycle's "not yet visited, subject to collection" color.
    Collect,
    /// Currently queued for field-walking during this cycle. Never observed
    /// between cycles (§4.2 invariants).
    Process,
    /// Reachable as of this cycle; becomes `Collect` at the next flip.
    Keep,
}

bitflags! {
    /// Object-level flags orthogonal to [`Generation`]/[`MarkColor`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u16 {
        /// Currently pinned at least once; lives on the pinned list.
        const PINNED          = 1 << 0;
        /// Header holds a forwarding address, not a type handle; the object
        /// has moved and this record is a tombstone.
        const MOVED           = 1 << 1;
        /// At least one field of this object pointed into gen-0 as of the
        /// last scan (§4.2 invariants, "HAS_GEN0_REFS").
        const HAS_GEN0_REFS   = 1 << 2;
        /// Object is a `Value` array (list storage, argument packing)
        /// rather than a typed instance; walked element-wise.
        const ARRAY           = 1 << 3;
        /// A string constructed by [`crate::gc::Gc::construct_module_string`]
        /// before its owning module finished loading.
        const EARLY_STRING    = 1 << 4;
    }
}

/// The header every GC-managed allocation carries ahead of its payload.
#[derive(Debug)]
pub struct ObjectHeader {
    pub generation: Generation,
    pub mark: MarkColor,
    pub flags: ObjectFlags,
    /// Total size in bytes, header included, used by the allocator and by
    /// dead-byte accounting in cycle phase 6.
    pub size: usize,
    pub pin_count: u32,
    /// Address-based hash, computed lazily on first `GetHashCode` and
    /// invalidated by moves (recomputed against the new address since we
    /// have no reference-stable integer identity otherwise).
    pub cached_hash: Option<u64>,
    /// `None` for ordinary instances; `Some` while this header is a
    /// tombstone left behind by a move, pointing at the surviving copy.
    pub forwarded_to: Option<crate::gc::GcHandle>,
    pub type_handle: TypeHandle,
}

impl ObjectHeader {
    pub fn new(type_handle: TypeHandle, size: usize, generation: Generation, mark: MarkColor) -> Self {
        Self {
            generation,
            mark,
            flags: ObjectFlags::empty(),
            size,
            pin_count: 0,
            cached_hash: None,
            forwarded_to: None,
            type_handle,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.flags.contains(ObjectFlags::PINNED)
    }

    pub fn is_moved(&self) -> bool {
        self.flags.contains(ObjectFlags::MOVED)
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
        self.flags.insert(ObjectFlags::PINNED);
    }

    /// Returns `true` once the pin count has dropped back to zero and the
    /// object is free to move on the next cycle.
    pub fn unpin(&mut self) -> bool {
        debug_assert!(self.pin_count > 0, "unpin on an object with no outstanding pins");
        self.pin_count -= 1;
        if self.pin_count == 0 {
            self.flags.remove(ObjectFlags::PINNED);
            true
        } else {
            false
        }
    }
}
