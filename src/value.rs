//! The tagged runtime value (§3 Value, §4.1 Value Operations).
//!
//! The source represents a `Value` as a type pointer plus a payload union,
//! with reference-ness folded into the low bit of the type pointer (§9,
//! "Reference-valued Values as tagged pointers"). Per the accompanying design
//! note we replace that encoding with an explicit discriminant: [`Value`] is
//! a Rust enum, and by-reference values carry their own [`Reference`] variant
//! rather than a tagged type pointer. The field-interior offset that let the
//! source recover a containing object from an interior pointer is kept as an
//! explicit `(object, offset)` pair on [`Reference::Field`].

use crate::gc::GcHandle;
use crate::gc::static_ref::StaticRefId;
use crate::types::TypeHandle;

/// A by-reference value: the payload of a `ldlocref`/`ldargref`/`ldfldref`/
/// `ldsfldref`/`ldmemref` result (§3 Value, §4.4 References).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// A reference to a local variable or argument slot in the frame at
    /// `frame_depth` below the current frame (0 = current frame).
    Local { frame_depth: u32, slot: u32 },
    /// A reference to a static field.
    Static(StaticRefId),
    /// A reference into an object's field storage. `offset` is the byte
    /// offset of the field within the object, mirroring the source's
    /// `object_address = reference_payload - offset` recovery trick, but
    /// expressed as data rather than pointer arithmetic.
    Field { object: GcHandle, offset: usize },
}

/// The tagged runtime value (§3 Value).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Real(f64),
    /// Any instance living in GC-managed memory: strings, lists, hashes,
    /// errors, methods and user-defined objects all use this variant; the
    /// type handle distinguishes them, not the enum discriminant.
    Instance {
        type_handle: TypeHandle,
        object: GcHandle,
    },
    Reference(Reference),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Reference(_))
    }

    /// The value's type handle, if any. Null and by-reference values have
    /// none: per §3, "Null: type pointer is null", and references are not
    /// values with a type of their own.
    pub fn type_handle(&self) -> Option<TypeHandle> {
        match self {
            Value::Instance { type_handle, .. } => Some(*type_handle),
            _ => None,
        }
    }

    /// Same-reference test (§4.1). Null compares equal to null regardless of
    /// payload; primitives compare by payload; instances compare by identity.
    pub fn is_same_reference(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (
                Value::Instance { object: a, .. },
                Value::Instance { object: b, .. },
            ) => a == b,
            _ => false,
        }
    }

    /// `IsTrue`/`IsFalse` predicates over the Boolean standard type; any
    /// other type is not truthy/falsy under these specific helpers.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Value::Bool(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_are_always_same_reference() {
        assert!(Value::Null.is_same_reference(&Value::Null));
    }

    #[test]
    fn primitives_compare_by_payload() {
        assert!(Value::Int(5).is_same_reference(&Value::Int(5)));
        assert!(!Value::Int(5).is_same_reference(&Value::Int(6)));
        assert!(!Value::Int(5).is_same_reference(&Value::UInt(5)));
    }

    #[test]
    fn null_has_no_type_handle() {
        assert!(Value::Null.type_handle().is_none());
    }
}
