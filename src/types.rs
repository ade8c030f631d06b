//! Type descriptors and members (§3 Type, Member).
//!
//! A [`TypeData`] is created once, when its declaring module is loaded, and is
//! immutable thereafter except for the static-constructor flags. Types are
//! addressed through the opaque [`TypeHandle`] so the registry can be grown
//! without invalidating handles held by [`crate::value::Value`].

use crate::refsig::ReferenceSignature;
use bitflags::bitflags;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

bitflags! {
    /// Per-type flags (§3 Type).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        const PRIMITIVE          = 1 << 0;
        const ABSTRACT           = 1 << 1;
        const STATIC             = 1 << 2;
        const SEALED             = 1 << 3;
        const CUSTOMPTR          = 1 << 4;
        const HAS_FINALIZER      = 1 << 5;
        const STATIC_CTOR_RUN    = 1 << 6;
        const STATIC_CTOR_RUNNING = 1 << 7;
    }
}

/// The 18 overloadable operators, indexed directly into a type's operator table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operator {
    Add,
    Subtract,
    Or,
    Xor,
    Multiply,
    Divide,
    Modulo,
    And,
    Power,
    ShiftLeft,
    ShiftRight,
    Plus,
    Negate,
    Not,
    Equals,
    Compare,
    Concat,
    Call,
}

impl Operator {
    pub const COUNT: usize = 18;
}

/// An opaque, stable handle into the [`TypeRegistry`]. Cloning is cheap; two
/// handles are equal iff they name the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle(pub(crate) u32);

impl TypeHandle {
    pub(crate) fn from_raw(index: u32) -> Self {
        Self(index)
    }
}

/// Access level of a member (§3 Member).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
    Private,
}

bitflags! {
    /// Per-overload flags (§3 Member).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OverloadFlags: u32 {
        const VARIADIC  = 1 << 0;
        const VAR_START = 1 << 1;
        const NATIVE    = 1 << 2;
        const INSTANCE  = 1 << 3;
        const CTOR      = 1 << 4;
        const INITED    = 1 << 5;
        const ABSTRACT  = 1 << 6;
    }
}

/// A try-block table entry resolved by the method initializer (§4.3).
#[derive(Debug, Clone)]
pub enum TryBlockKind {
    Catch { catch_type: Option<TypeHandle> },
    Finally,
}

#[derive(Debug, Clone)]
pub struct TryBlock {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    pub kind: TryBlockKind,
}

/// A single overload of a method (§3 Member).
#[derive(Debug, Clone)]
pub struct Overload {
    pub param_count: u16,
    pub optional_param_count: u16,
    pub local_count: u16,
    pub max_stack: u16,
    pub flags: OverloadFlags,
    pub param_names: Vec<String>,
    pub ref_signature: ReferenceSignature,
    pub try_blocks: Vec<TryBlock>,
    /// Raw on-disk bytecode, or (after initialization) the rewritten
    /// intermediate-opcode stream. Swapped in place by the initializer.
    pub body: Vec<u8>,
    pub native: Option<crate::module_ref::NativeFunction>,
    /// Byte offsets (into `body`, post-initialization) of producer
    /// instructions whose paired `pop` was folded away by
    /// `Rewrite::MergeProducerIntoPop` (§4.3 Removal pass): the executor
    /// pops the value these instructions push right back off, the same
    /// net effect as the original `producer; pop` pair, without the `pop`
    /// instruction actually occupying a byte in the stream. This port's
    /// realization of "update the output to discard the result" for a
    /// byte-stream intermediate form rather than an in-memory instruction
    /// graph that can carry the annotation directly on the node.
    ///
    /// A call instruction's own step only pushes a callee frame; when a
    /// call site is the producer half of a folded pair, the executor
    /// carries the discard forward onto that callee frame
    /// (`Frame::discard_return`) rather than keying it to this set, since
    /// the call instruction's offset has already been left behind by the
    /// time the callee actually returns a value.
    pub discard_outputs: std::collections::HashSet<usize>,
}

impl Overload {
    pub fn is_initialized(&self) -> bool {
        self.flags.contains(OverloadFlags::INITED)
    }

    pub fn is_variadic(&self) -> bool {
        self.flags.contains(OverloadFlags::VARIADIC)
    }

    pub fn is_native(&self) -> bool {
        self.flags.contains(OverloadFlags::NATIVE)
    }
}

/// A named method, possibly with multiple overloads selected by argument count.
#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub access: Access,
    pub is_static: bool,
    pub overloads: Vec<Overload>,
}

impl Method {
    /// Selects the overload whose parameter count matches `argc`, as required
    /// or allowed by its optional-parameter count (§4.4 Invocation).
    pub fn resolve_overload(&self, argc: usize) -> Option<&Overload> {
        self.overloads.iter().find(|o| {
            let min = o.param_count as usize - o.optional_param_count as usize;
            let max = o.param_count as usize;
            (min..=max).contains(&argc) || (o.is_variadic() && argc >= min.saturating_sub(1))
        })
    }
}

#[derive(Debug, Clone)]
pub enum FieldStorage {
    Instance { offset: usize },
    Static(crate::gc::static_ref::StaticRefId),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub access: Access,
    pub storage: FieldStorage,
}

#[derive(Debug, Clone)]
pub enum Member {
    Field(Field),
    Method(Method),
    Property { getter: Option<Method>, setter: Option<Method> },
}

impl Member {
    pub fn name(&self) -> &str {
        match self {
            Member::Field(f) => &f.name,
            Member::Method(m) => &m.name,
            Member::Property { getter, setter } => getter
                .as_ref()
                .or(setter.as_ref())
                .map(|m| m.name.as_str())
                .unwrap_or(""),
        }
    }
}

/// One of a custom-pointer type's native fields, consulted by the GC when
/// walking an instance that the ordinary `Value`-array walk cannot handle
/// (§4.2 Cycle algorithm, step 3).
#[derive(Debug, Clone, Copy)]
pub enum NativeFieldKind {
    InlineValue,
    PointerToValue,
    PointerToString,
    PointerToGcArray,
}

#[derive(Debug, Clone)]
pub struct NativeField {
    pub offset: usize,
    pub kind: NativeFieldKind,
}

/// A type descriptor (§3 Type). Immutable after module load except for the
/// static-constructor flags, which are mutated under [`TypeData::static_ctor_lock`].
pub struct TypeData {
    pub full_name: String,
    pub base_type: Option<TypeHandle>,
    pub shared_type: Option<TypeHandle>,
    pub flags: RwLock<TypeFlags>,
    pub fields_offset: usize,
    pub size: usize,
    pub field_count: usize,
    pub members: HashMap<String, Member>,
    pub operators: [Option<Method>; Operator::COUNT],
    pub constructor: Option<Method>,
    pub static_ref: Option<crate::gc::static_ref::StaticRefId>,
    pub native_fields: Vec<NativeField>,
    /// Reference-getter callback for custom-pointer types: enumerates
    /// managed `Value`s embedded in an instance beyond `native_fields`.
    pub reference_getter: Option<fn(&[u8]) -> Vec<usize>>,

    /// Serializes static-constructor execution for this type (§3, §5).
    /// Re-entrance from the same thread short-circuits by design.
    pub static_ctor_lock: Mutex<()>,
    pub static_ctor_running: AtomicBool,
}

impl std::fmt::Debug for TypeData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeData")
            .field("full_name", &self.full_name)
            .field("size", &self.size)
            .finish()
    }
}

impl TypeData {
    pub fn flags(&self) -> TypeFlags {
        *self.flags.read().expect("type flags lock poisoned")
    }

    pub fn is_primitive(&self) -> bool {
        self.flags().contains(TypeFlags::PRIMITIVE)
    }

    pub fn static_ctor_has_run(&self) -> bool {
        self.flags().contains(TypeFlags::STATIC_CTOR_RUN)
    }

    pub fn mark_static_ctor_run(&self) {
        self.flags
            .write()
            .expect("type flags lock poisoned")
            .insert(TypeFlags::STATIC_CTOR_RUN);
    }
}

/// Owns every [`TypeData`] loaded into the VM and resolves ancestry checks.
#[derive(Default)]
pub struct TypeRegistry {
    types: Vec<TypeData>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self { types: Vec::new() }
    }

    pub fn register(&mut self, data: TypeData) -> TypeHandle {
        self.types.push(data);
        TypeHandle((self.types.len() - 1) as u32)
    }

    pub fn get(&self, handle: TypeHandle) -> &TypeData {
        &self.types[handle.0 as usize]
    }

    /// Type-predicate: `handle` has type `ancestor` iff `ancestor` is `handle`
    /// or any of its ancestors (§4.1).
    pub fn is_type(&self, handle: TypeHandle, ancestor: TypeHandle) -> bool {
        let mut current = Some(handle);
        while let Some(h) = current {
            if h == ancestor {
                return true;
            }
            current = self.get(h).base_type;
        }
        false
    }

    /// Searches `handle` and its ancestors for a member named `name`,
    /// honoring the usual base-first-declared-wins shadowing rule.
    pub fn find_member(&self, handle: TypeHandle, name: &str) -> Option<&Member> {
        let mut current = Some(handle);
        while let Some(h) = current {
            let data = self.get(h);
            if let Some(member) = data.members.get(name) {
                return Some(member);
            }
            current = data.base_type;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_type(full_name: &str, base: Option<TypeHandle>) -> TypeData {
        TypeData {
            full_name: full_name.to_string(),
            base_type: base,
            shared_type: None,
            flags: RwLock::new(TypeFlags::empty()),
            fields_offset: 0,
            size: 0,
            field_count: 0,
            members: HashMap::new(),
            operators: Default::default(),
            constructor: None,
            static_ref: None,
            native_fields: Vec::new(),
            reference_getter: None,
            static_ctor_lock: Mutex::new(()),
            static_ctor_running: AtomicBool::new(false),
        }
    }

    #[test]
    fn is_type_walks_ancestry() {
        let mut registry = TypeRegistry::new();
        let object = registry.register(leaf_type("aves.Object", None));
        let error = registry.register(leaf_type("aves.Error", Some(object)));
        let type_error = registry.register(leaf_type("aves.TypeError", Some(error)));

        assert!(registry.is_type(type_error, type_error));
        assert!(registry.is_type(type_error, error));
        assert!(registry.is_type(type_error, object));
        assert!(!registry.is_type(object, type_error));
    }

    #[test]
    fn resolve_overload_picks_by_argument_count() {
        let method = Method {
            name: "f".to_string(),
            access: Access::Public,
            is_static: false,
            overloads: vec![Overload {
                param_count: 2,
                optional_param_count: 1,
                local_count: 0,
                max_stack: 2,
                flags: OverloadFlags::empty(),
                param_names: vec!["a".into(), "b".into()],
                ref_signature: ReferenceSignature::none(),
                try_blocks: Vec::new(),
                body: Vec::new(),
                native: None,
                discard_outputs: std::collections::HashSet::new(),
            }],
        };

        assert!(method.resolve_overload(1).is_some());
        assert!(method.resolve_overload(2).is_some());
        assert!(method.resolve_overload(3).is_none());
    }
}
