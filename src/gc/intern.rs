//! The intern table (§3 String flags, §4.2 Intern/GetInterned).
//!
//! `Intern(s1) == Intern(s2)` iff the strings compare equal (§8 Intern table
//! invariant); entries are keyed by content here and hold the handle of the
//! canonical copy, which the collector updates in place when that copy moves
//! (§4.2 step 4, "move interned-string entries").

use crate::gc::GcHandle;
use hashbrown::HashMap;

#[derive(Default)]
pub struct InternTable {
    entries: HashMap<String, GcHandle>,
}

impl InternTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Returns the canonical handle for `content`, inserting `handle` as the
    /// canonical copy if this is the first time `content` has been interned.
    pub fn intern(&mut self, content: &str, handle: GcHandle) -> GcHandle {
        *self.entries.entry(content.to_string()).or_insert(handle)
    }

    pub fn get(&self, content: &str) -> Option<GcHandle> {
        self.entries.get(content).copied()
    }

    /// Rewrites the canonical handle for `content` after its object moved
    /// (§4.2 step 4).
    pub fn update_handle(&mut self, content: &str, new_handle: GcHandle) {
        if let Some(entry) = self.entries.get_mut(content) {
            *entry = new_handle;
        }
    }

    /// Removes `content` from the table; called when its backing object is
    /// released during sweep (§4.2 step 6).
    pub fn remove(&mut self, content: &str) {
        self.entries.remove(content);
    }

    /// Removes whichever entry currently names `handle` as its canonical
    /// copy. Used during sweep when a string object is freed and its
    /// original content is not at hand (§4.2 step 6, "releasing a string
    /// removes it from the intern table").
    pub fn remove_by_handle(&mut self, handle: GcHandle) {
        self.entries.retain(|_, v| *v != handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_the_same_content_twice_returns_the_same_handle() {
        let mut table = InternTable::new();
        let a = table.intern("hello", GcHandle::from_raw(1));
        let b = table.intern("hello", GcHandle::from_raw(2));
        assert_eq!(a, b);
        assert_eq!(a, GcHandle::from_raw(1));
    }

    #[test]
    fn update_handle_moves_the_canonical_entry() {
        let mut table = InternTable::new();
        table.intern("hi", GcHandle::from_raw(1));
        table.update_handle("hi", GcHandle::from_raw(9));
        assert_eq!(table.get("hi"), Some(GcHandle::from_raw(9)));
    }
}
