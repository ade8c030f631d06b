//! The generational garbage collector (§3 GC object/Generations, §4.2).
//!
//! Object identity is an opaque [`GcHandle`] index into a slab rather than a
//! raw pointer (§9, "intrusive GC lists" design note: "maintain a single
//! owning container plus indices into it"). That choice has a consequence
//! worth spelling out: because a handle never changes value across a move,
//! phase 5 of the cycle algorithm ("update gen-0 references", which in the
//! source rewrites every root's embedded pointer to a moved object's new
//! address) has nothing to rewrite here — every holder of a `GcHandle`
//! already observes the object at its latest generation without any fixup.
//! What phase 5 becomes, concretely, is promoting a handle's generation tag
//! in place. This trade-off and its implications for the pinning and
//! conservation invariants are recorded in `DESIGN.md`.

pub mod cycle;
pub mod generation;
pub mod header;
pub mod intern;
pub mod static_ref;

use crate::error::{VmError, VmResult};
use crate::types::TypeHandle;
use crate::value::Value;
use generation::{Gen0, Gen1, LargeObjectHeap, LARGE_OBJECT_SIZE};
use header::{Generation, MarkColor, ObjectFlags, ObjectHeader};
use intern::InternTable;
use static_ref::{StaticRefId, StaticRefTable};
use std::sync::Mutex;

/// An opaque, stable reference to a GC-managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcHandle(u32);

impl GcHandle {
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    pub fn into_raw(self) -> u32 {
        self.0
    }
}

/// An allocation's payload: either a field array shared with ordinary
/// instances and `Value` arrays, or raw native bytes for a custom-pointer
/// type walked through its [`crate::types::NativeField`] descriptors.
pub enum Payload {
    Fields(Mutex<Vec<Value>>),
    Native(Mutex<Vec<u8>>),
}

pub struct ObjectRecord {
    pub header: ObjectHeader,
    pub payload: Payload,
}

/// The collector and allocator. Single-threaded in this implementation,
/// matching the core's primary execution model (§5); the allocation lock and
/// per-object field lock described in §5 are represented structurally
/// (`Mutex` per object) even though nothing here contends on them yet.
pub struct Gc {
    objects: Vec<Option<ObjectRecord>>,
    free_slots: Vec<u32>,
    gen0: Gen0,
    gen1: Gen1,
    large: LargeObjectHeap,
    intern: InternTable,
    pub static_refs: StaticRefTable,
    /// This cycle's "reachable" color; rotates among three values mod 2 used
    /// bits at the end of each cycle instead of resetting every header
    /// (§4.2 step 7, §9 "three-state mark bits").
    current_collect_mark: MarkColor,
}

impl Gc {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            free_slots: Vec::new(),
            gen0: Gen0::new(),
            gen1: Gen1::new(),
            large: LargeObjectHeap::new(),
            intern: InternTable::new(),
            static_refs: StaticRefTable::new(),
            current_collect_mark: MarkColor::Collect,
        }
    }

    fn insert(&mut self, record: ObjectRecord) -> GcHandle {
        if let Some(slot) = self.free_slots.pop() {
            self.objects[slot as usize] = Some(record);
            GcHandle(slot)
        } else {
            self.objects.push(Some(record));
            GcHandle((self.objects.len() - 1) as u32)
        }
    }

    pub fn get(&self, handle: GcHandle) -> &ObjectRecord {
        self.objects[handle.0 as usize]
            .as_ref()
            .expect("dereferencing a freed GcHandle")
    }

    pub fn is_alive(&self, handle: GcHandle) -> bool {
        self.objects[handle.0 as usize].is_some()
    }

    fn get_mut(&mut self, handle: GcHandle) -> &mut ObjectRecord {
        self.objects[handle.0 as usize]
            .as_mut()
            .expect("dereferencing a freed GcHandle")
    }

    fn generation_for_size(size: usize) -> Generation {
        if size >= LARGE_OBJECT_SIZE {
            Generation::Large
        } else {
            Generation::Gen0
        }
    }

    /// Reserves `size` bytes in the generation appropriate to that size,
    /// running a cycle and retrying once if gen-0 is full (§4.2 "on overflow
    /// run a cycle and retry"). Returns the generation the reservation
    /// landed in.
    fn reserve(&mut self, size: usize) -> VmResult<Generation> {
        let generation = Self::generation_for_size(size);
        match generation {
            Generation::Large => {
                self.large.allocate(size);
                Ok(Generation::Large)
            }
            _ => {
                if self.gen0.try_allocate(size).is_none() {
                    self.collect(&[], false);
                    self.gen0
                        .try_allocate(size)
                        .ok_or_else(|| VmError::out_of_memory(size))?;
                }
                Ok(Generation::Gen0)
            }
        }
    }

    /// Allocates an ordinary instance with `field_count` null-initialized
    /// `Value` slots (§4.2 `Alloc`).
    pub fn alloc(&mut self, type_handle: TypeHandle, field_count: usize) -> VmResult<GcHandle> {
        let size = field_count * std::mem::size_of::<Value>();
        let generation = self.reserve(size)?;
        let header = ObjectHeader::new(type_handle, size, generation, self.current_collect_mark);
        let record = ObjectRecord {
            header,
            payload: Payload::Fields(Mutex::new(vec![Value::Null; field_count])),
        };
        Ok(self.insert(record))
    }

    /// Allocates a `Value` array of `len` elements (§4.2 `AllocValueArray`),
    /// used for list storage and variadic argument packing.
    pub fn alloc_value_array(&mut self, type_handle: TypeHandle, len: usize) -> VmResult<GcHandle> {
        let handle = self.alloc(type_handle, len)?;
        self.get_mut(handle).header.flags.insert(ObjectFlags::ARRAY);
        Ok(handle)
    }

    /// Allocates a raw byte array for a custom-pointer type's native storage
    /// (§4.2 `AllocArray`).
    pub fn alloc_array(&mut self, type_handle: TypeHandle, byte_len: usize) -> VmResult<GcHandle> {
        let generation = self.reserve(byte_len)?;
        let mut header = ObjectHeader::new(type_handle, byte_len, generation, self.current_collect_mark);
        header.flags.insert(ObjectFlags::ARRAY);
        let record = ObjectRecord {
            header,
            payload: Payload::Native(Mutex::new(vec![0; byte_len])),
        };
        Ok(self.insert(record))
    }

    /// Pins `handle` so the collector will not consider it for address
    /// change across any subsequent cycle (§4.2 `Pin`/`Unpin`, §8 Pinning
    /// invariant). Because this collector never relocates bytes — only
    /// retags an object's generation — pinning has no physical effect here
    /// beyond bookkeeping, but the contract (address stability while pinned)
    /// still holds trivially: handles never change.
    pub fn pin(&mut self, handle: GcHandle) {
        self.get_mut(handle).header.pin();
    }

    pub fn unpin(&mut self, handle: GcHandle) {
        self.get_mut(handle).header.unpin();
    }

    pub fn add_static_reference(&mut self) -> StaticRefId {
        self.static_refs.add()
    }

    /// Interns `content`, constructing a backing string object if this is
    /// the first time it has been seen (§4.2 `Intern`).
    pub fn intern(&mut self, string_type: TypeHandle, content: &str) -> VmResult<GcHandle> {
        if let Some(existing) = self.intern.get(content) {
            return Ok(existing);
        }
        let handle = self.construct_string(string_type, content)?;
        Ok(self.intern.intern(content, handle))
    }

    pub fn get_interned(&self, content: &str) -> Option<GcHandle> {
        self.intern.get(content)
    }

    /// Constructs a string object holding `content` as a payload of
    /// `Value::UInt` code units, one per UTF-16 unit (§3 String).
    pub fn construct_string(&mut self, string_type: TypeHandle, content: &str) -> VmResult<GcHandle> {
        let units: Vec<u16> = content.encode_utf16().collect();
        let handle = self.alloc_array(string_type, units.len() * 2)?;
        if let Payload::Native(bytes) = &self.get(handle).payload {
            let mut bytes = bytes.lock().expect("object field lock poisoned");
            for (i, unit) in units.iter().enumerate() {
                let b = unit.to_le_bytes();
                bytes[i * 2] = b[0];
                bytes[i * 2 + 1] = b[1];
            }
        }
        Ok(handle)
    }

    /// Constructs a string owned by a module still in the process of
    /// loading. Pinned in gen-1 immediately and flagged `EARLY_STRING` so
    /// the collector never has to worry about it moving out from under a
    /// module's string table mid-load (§4.2 `ConstructModuleString`).
    pub fn construct_module_string(&mut self, string_type: TypeHandle, content: &str) -> VmResult<GcHandle> {
        let handle = self.construct_string(string_type, content)?;
        let record = self.get_mut(handle);
        record.header.generation = Generation::Gen1;
        record.header.flags.insert(ObjectFlags::EARLY_STRING);
        record.header.pin();
        Ok(handle)
    }

    /// Runs a collection cycle. `roots` are the handles reachable from
    /// outside the heap this instant — stack frame slots and any in-flight
    /// thrown error (§4.2 step 2); pinned objects and static field values
    /// are included automatically. `collect_gen1` forces gen-1 sweeping even
    /// if the estimated-dead-bytes threshold hasn't been crossed (step 6).
    pub fn collect(&mut self, roots: &[GcHandle], collect_gen1: bool) {
        cycle::run(self, roots, collect_gen1);
    }

    pub(crate) fn objects_mut(&mut self) -> &mut Vec<Option<ObjectRecord>> {
        &mut self.objects
    }

    pub(crate) fn free_slots_mut(&mut self) -> &mut Vec<u32> {
        &mut self.free_slots
    }

    pub(crate) fn gen0_mut(&mut self) -> &mut Gen0 {
        &mut self.gen0
    }

    pub(crate) fn intern_table_mut(&mut self) -> &mut InternTable {
        &mut self.intern
    }

    pub(crate) fn current_mark(&self) -> MarkColor {
        self.current_collect_mark
    }

    pub(crate) fn set_current_mark(&mut self, mark: MarkColor) {
        self.current_collect_mark = mark;
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_type() -> TypeHandle {
        TypeHandle::from_raw(0)
    }

    #[test]
    fn alloc_gives_null_initialized_fields() {
        let mut gc = Gc::new();
        let handle = gc.alloc(dummy_type(), 3).unwrap();
        if let Payload::Fields(fields) = &gc.get(handle).payload {
            let fields = fields.lock().unwrap();
            assert_eq!(fields.len(), 3);
            assert!(fields.iter().all(|v| v.is_null()));
        } else {
            panic!("expected field payload");
        }
    }

    #[test]
    fn large_allocations_go_to_the_large_object_heap() {
        let mut gc = Gc::new();
        let handle = gc.alloc_array(dummy_type(), LARGE_OBJECT_SIZE).unwrap();
        assert_eq!(gc.get(handle).header.generation, Generation::Large);
    }

    #[test]
    fn interning_equal_content_returns_the_same_handle() {
        let mut gc = Gc::new();
        let a = gc.intern(dummy_type(), "hello").unwrap();
        let b = gc.intern(dummy_type(), "hello").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn pin_then_unpin_clears_the_pinned_flag() {
        let mut gc = Gc::new();
        let handle = gc.alloc(dummy_type(), 0).unwrap();
        gc.pin(handle);
        assert!(gc.get(handle).header.is_pinned());
        gc.unpin(handle);
        assert!(!gc.get(handle).header.is_pinned());
    }
}
