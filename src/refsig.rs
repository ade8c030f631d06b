//! Reference signatures: which parameters of an overload are by-reference
//! (§3 Reference signature, §6 wire format).
//!
//! Grounded directly on `refsignature.internal.h`: a signature with at most
//! 31 parameters is stored inline as a bitmask; longer signatures are
//! deduplicated into a pool and referenced by index with the high bit set.
//! Parameter 0 is reserved for the instance and is never by-reference.

use std::sync::RwLock;

/// Parameter counts at or below this fit in the inline short mask.
pub const MAX_SHORT_PARAM_COUNT: usize = 31;

const SIGNATURE_KIND_MASK: u32 = 0x8000_0000;
const SIGNATURE_DATA_MASK: u32 = 0x7fff_ffff;

/// A reference signature for a parameter list longer than
/// [`MAX_SHORT_PARAM_COUNT`], stored as one bit per parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongRefSignature {
    param_count: usize,
    mask_values: Vec<u32>,
}

impl LongRefSignature {
    fn word_count(param_count: usize) -> usize {
        (param_count + 31) / 32
    }

    pub fn new(param_count: usize) -> Self {
        Self {
            param_count,
            mask_values: vec![0; Self::word_count(param_count)],
        }
    }

    pub fn is_param_ref(&self, index: usize) -> bool {
        debug_assert!(index < self.param_count);
        let word = index / 32;
        let bit = index % 32;
        self.mask_values[word] & (1 << bit) != 0
    }

    pub fn set_param(&mut self, index: usize, is_ref: bool) {
        debug_assert!(index < self.param_count);
        let word = index / 32;
        let bit = index % 32;
        if is_ref {
            self.mask_values[word] |= 1 << bit;
        } else {
            self.mask_values[word] &= !(1 << bit);
        }
    }

    pub fn has_refs(&self) -> bool {
        self.mask_values.iter().any(|&w| w != 0)
    }
}

/// Process-wide (here: per-VM) pool of deduplicated long signatures, keyed by
/// equality of their mask bits.
#[derive(Default)]
pub struct LongSignaturePool {
    signatures: RwLock<Vec<LongRefSignature>>,
}

impl LongSignaturePool {
    pub fn new() -> Self {
        Self {
            signatures: RwLock::new(Vec::new()),
        }
    }

    pub fn get(&self, index: usize) -> LongRefSignature {
        self.signatures
            .read()
            .expect("long signature pool lock poisoned")[index]
            .clone()
    }

    /// Adds `signature` to the pool, reusing an existing equal entry if one
    /// exists, and returns its index combined with [`SIGNATURE_KIND_MASK`].
    pub fn add(&self, signature: LongRefSignature) -> u32 {
        let mut signatures = self.signatures.write().expect("long signature pool lock poisoned");
        if let Some(index) = signatures.iter().position(|s| *s == signature) {
            return index as u32 | SIGNATURE_KIND_MASK;
        }
        signatures.push(signature);
        (signatures.len() - 1) as u32 | SIGNATURE_KIND_MASK
    }
}

/// A resolved reference signature attached to an overload (§3).
///
/// Either a short inline mask or an index into a [`LongSignaturePool`],
/// matching the wire encoding in §6: bit 31 clear selects the inline mask,
/// set selects a pool index in the low 31 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceSignature {
    encoded: u32,
}

impl ReferenceSignature {
    /// A signature for a parameter list with no by-reference parameters.
    pub fn none() -> Self {
        Self { encoded: 0 }
    }

    pub fn from_short_mask(mask: u32) -> Self {
        debug_assert!(mask & SIGNATURE_KIND_MASK == 0, "short mask must fit in 31 bits");
        Self { encoded: mask }
    }

    pub fn from_pool_index(index: u32) -> Self {
        Self {
            encoded: index | SIGNATURE_KIND_MASK,
        }
    }

    pub fn is_long(&self) -> bool {
        self.encoded & SIGNATURE_KIND_MASK != 0
    }

    pub fn pool_index(&self) -> Option<u32> {
        self.is_long().then(|| self.encoded & SIGNATURE_DATA_MASK)
    }

    /// Whether parameter `index` is by-reference. For long signatures the
    /// caller must resolve via the owning [`LongSignaturePool`] first; this
    /// fast path only applies to short (inline) signatures.
    pub fn is_param_ref_short(&self, index: usize) -> bool {
        debug_assert!(!self.is_long());
        self.encoded & (1 << index) != 0
    }

    pub fn has_refs(&self) -> bool {
        self.encoded & SIGNATURE_DATA_MASK != 0
    }
}

/// Builds either a short or long reference signature depending on the
/// parameter count observed, committing to a pool entry only if necessary.
pub struct ReferenceSignatureBuilder {
    param_count: usize,
    short_mask: u32,
    long: Option<LongRefSignature>,
}

impl ReferenceSignatureBuilder {
    pub fn new(param_count: usize) -> Self {
        if param_count > MAX_SHORT_PARAM_COUNT {
            Self {
                param_count,
                short_mask: 0,
                long: Some(LongRefSignature::new(param_count)),
            }
        } else {
            Self {
                param_count,
                short_mask: 0,
                long: None,
            }
        }
    }

    pub fn set_param(&mut self, index: usize, is_ref: bool) {
        debug_assert!(index > 0, "parameter 0 is the instance and is never by-reference");
        debug_assert!(index < self.param_count);
        if let Some(long) = &mut self.long {
            long.set_param(index, is_ref);
        } else if is_ref {
            self.short_mask |= 1 << index;
        } else {
            self.short_mask &= !(1 << index);
        }
    }

    /// Finalizes the signature, interning it in `pool` if it turned out to be
    /// a long signature with at least one by-reference parameter.
    pub fn commit(self, pool: &LongSignaturePool) -> ReferenceSignature {
        match self.long {
            None => ReferenceSignature::from_short_mask(self.short_mask),
            Some(long) if long.has_refs() => {
                ReferenceSignature::from_pool_index(pool.add(long) & SIGNATURE_DATA_MASK)
            }
            Some(_) => ReferenceSignature::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_signature_round_trips() {
        let mut builder = ReferenceSignatureBuilder::new(4);
        builder.set_param(1, true);
        builder.set_param(3, true);
        let sig = builder.commit(&LongSignaturePool::new());

        assert!(!sig.is_long());
        assert!(sig.is_param_ref_short(1));
        assert!(!sig.is_param_ref_short(2));
        assert!(sig.is_param_ref_short(3));
    }

    #[test]
    fn long_signature_dedups_in_pool() {
        let pool = LongSignaturePool::new();

        let mut a = ReferenceSignatureBuilder::new(40);
        a.set_param(35, true);
        let sig_a = a.commit(&pool);

        let mut b = ReferenceSignatureBuilder::new(40);
        b.set_param(35, true);
        let sig_b = b.commit(&pool);

        assert!(sig_a.is_long());
        assert_eq!(sig_a.pool_index(), sig_b.pool_index());
    }

    #[test]
    fn long_signature_with_no_refs_collapses_to_none() {
        let pool = LongSignaturePool::new();
        let builder = ReferenceSignatureBuilder::new(40);
        let sig = builder.commit(&pool);
        assert!(!sig.is_long());
        assert!(!sig.has_refs());
    }
}
