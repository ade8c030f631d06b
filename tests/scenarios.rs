//! End-to-end scenarios (§8): each test drives a full `Interpreter` over a
//! hand-assembled overload body, the way `comprehensive_vm_tests.rs` in the
//! teacher crate drives a full `ExecutionEngine` rather than a single opcode
//! handler in isolation.

use hashbrown::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, RwLock};

use ovum::error::{VmError, VmResult};
use ovum::executor::{Interpreter, TokenResolver};
use ovum::gc::{Gc, Payload};
use ovum::initializer::initialize;
use ovum::opcode::OpCode;
use ovum::refsig::ReferenceSignature;
use ovum::types::{
    FieldStorage, Overload, OverloadFlags, TryBlock, TryBlockKind, TypeData, TypeFlags, TypeHandle,
    TypeRegistry,
};
use ovum::value::{Reference, Value};

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

fn overload(param_count: u16, optional: u16, flags: OverloadFlags, body: Vec<u8>, max_stack: u16) -> Overload {
    Overload {
        param_count,
        optional_param_count: optional,
        local_count: 0,
        max_stack,
        flags,
        param_names: Vec::new(),
        ref_signature: ReferenceSignature::none(),
        try_blocks: Vec::new(),
        body,
        native: None,
        discard_outputs: std::collections::HashSet::new(),
    }
}

/// A `TokenResolver` double that only answers the field lookups a scenario
/// actually needs; every other token kind is out of scope for these tests
/// (module loading and method dispatch by token are exercised at the unit
/// level inside `executor/jump_table/invocation.rs`).
#[derive(Default)]
struct FieldOnlyResolver {
    fields: HashMap<u32, (TypeHandle, FieldStorage)>,
}

impl TokenResolver for FieldOnlyResolver {
    fn resolve_type(&self, _token: u32) -> VmResult<TypeHandle> {
        Err(VmError::type_not_found("unused in this scenario"))
    }

    fn resolve_call(&self, _token: u32) -> VmResult<(TypeHandle, Overload)> {
        Err(VmError::invalid_operand_msg("unused in this scenario"))
    }

    fn resolve_member_call(&self, _token: u32) -> VmResult<(String, usize)> {
        Err(VmError::invalid_operand_msg("unused in this scenario"))
    }

    fn resolve_member_name(&self, _token: u32) -> VmResult<String> {
        Err(VmError::invalid_operand_msg("unused in this scenario"))
    }

    fn resolve_string(&self, _token: u32) -> VmResult<String> {
        Err(VmError::invalid_operand_msg("unused in this scenario"))
    }

    fn resolve_field(&self, token: u32) -> VmResult<(TypeHandle, FieldStorage)> {
        self.fields
            .get(&token)
            .cloned()
            .ok_or_else(|| VmError::invalid_operand_msg("unknown field token"))
    }
}

fn push_i64(body: &mut Vec<u8>, opcode: OpCode, value: i64) {
    body.push(opcode as u8);
    body.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(body: &mut Vec<u8>, opcode: OpCode, value: u32) {
    body.push(opcode as u8);
    body.extend_from_slice(&value.to_le_bytes());
}

/// Scenario 1: push 2, push 3, add, ret -> 5.
#[test]
fn arithmetic_round_trip() {
    let mut body = Vec::new();
    push_i64(&mut body, OpCode::LdcI, 2);
    push_i64(&mut body, OpCode::LdcI, 3);
    body.push(OpCode::Add as u8);
    body.push(OpCode::Ret as u8);

    let o = overload(0, 0, OverloadFlags::empty(), body, 2);
    let mut gc = Gc::new();
    let mut types = TypeRegistry::new();
    let dummy = types.register(leaf_type("aves.Object", None));
    let resolver = FieldOnlyResolver::default();
    let mut vm = Interpreter::new(&mut gc, &types, &resolver, dummy, dummy, dummy, dummy, dummy, dummy, dummy);

    let result = vm.invoke(&o, Vec::new()).unwrap();
    assert_eq!(result, Value::Int(5));
}

/// Scenario 2: `f(...xs)` returns the caller-supplied argument count, once
/// with 4 arguments and once with 0.
#[test]
fn variadic_argument_count() {
    let mut body = Vec::new();
    push_u32(&mut body, OpCode::LdArgc, 0);
    body.push(OpCode::Ret as u8);

    let o = overload(1, 0, OverloadFlags::VARIADIC, body, 1);
    let mut gc = Gc::new();
    let mut types = TypeRegistry::new();
    let list_type = types.register(leaf_type("aves.List", None));
    let resolver = FieldOnlyResolver::default();
    let string_type = list_type;

    {
        let mut vm = Interpreter::new(
            &mut gc, &types, &resolver, list_type, string_type, list_type, list_type, list_type, list_type, list_type,
        );
        let args = vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)];
        assert_eq!(vm.invoke(&o, args).unwrap(), Value::Int(4));
    }
    {
        let mut vm = Interpreter::new(
            &mut gc, &types, &resolver, list_type, string_type, list_type, list_type, list_type, list_type, list_type,
        );
        assert_eq!(vm.invoke(&o, Vec::new()).unwrap(), Value::Int(0));
    }
}

/// Scenario 3: `try { throw TypeError() } catch MemoryError { 1 } catch
/// Error { 2 }` — the first catch clause doesn't match, the second does.
#[test]
fn catch_selects_the_first_matching_type() {
    let mut types = TypeRegistry::new();
    let object = types.register(leaf_type("aves.Object", None));
    let error_type = types.register(leaf_type("aves.Error", Some(object)));
    let memory_error = types.register(leaf_type("aves.MemoryError", Some(error_type)));
    let type_error = types.register(leaf_type("aves.TypeError", Some(error_type)));

    let mut gc = Gc::new();
    let instance = gc.alloc(type_error, 0).unwrap();
    let thrown = Value::Instance {
        type_handle: type_error,
        object: instance,
    };
    let slot = gc.add_static_reference();
    gc.static_refs.write(slot, thrown);

    let field_token = 1;
    let mut resolver = FieldOnlyResolver::default();
    resolver.fields.insert(field_token, (type_error, FieldStorage::Static(slot)));

    // ip 0..5: ldsfld field_token ; ip 5: throw ; ip 6: ret (catch handler).
    let mut body = Vec::new();
    push_u32(&mut body, OpCode::LdSFld, field_token);
    body.push(OpCode::Throw as u8);
    body.push(OpCode::Ret as u8);

    let mut o = overload(0, 0, OverloadFlags::empty(), body, 2);
    o.try_blocks = vec![
        TryBlock {
            start: 0,
            end: 6,
            handler: 6,
            kind: TryBlockKind::Catch { catch_type: Some(memory_error) },
        },
        TryBlock {
            start: 0,
            end: 6,
            handler: 6,
            kind: TryBlockKind::Catch { catch_type: Some(error_type) },
        },
    ];

    let mut vm = Interpreter::new(
        &mut gc, &types, &resolver, object, type_error, object, object, object, object, object,
    );
    let result = vm.invoke(&o, Vec::new()).unwrap();
    match result {
        Value::Instance { type_handle, object } => {
            assert_eq!(type_handle, type_error);
            assert_eq!(object, instance);
        }
        other => panic!("expected the caught instance back, got {other:?}"),
    }
}

/// Scenario 3b: `try { try { throw Error() } finally { F } } catch Error { C }`
/// — an exception passing through the inner finally on its way to the
/// outer catch must run the finally before the catch handler runs (§4.4
/// Exception search).
#[test]
fn throw_runs_an_enclosing_finally_before_its_catch_handler() {
    let mut types = TypeRegistry::new();
    let object = types.register(leaf_type("aves.Object", None));
    let error_type = types.register(leaf_type("aves.Error", Some(object)));

    let mut gc = Gc::new();
    let instance = gc.alloc(error_type, 0).unwrap();
    let thrown = Value::Instance {
        type_handle: error_type,
        object: instance,
    };
    let thrown_slot = gc.add_static_reference();
    gc.static_refs.write(thrown_slot, thrown);
    let log_f = gc.add_static_reference();
    let log_c = gc.add_static_reference();
    gc.static_refs.write(log_f, Value::Int(0));
    gc.static_refs.write(log_c, Value::Int(0));

    let thrown_token = 1;
    let token_f = 2;
    let token_c = 3;
    let mut resolver = FieldOnlyResolver::default();
    resolver.fields.insert(thrown_token, (error_type, FieldStorage::Static(thrown_slot)));
    resolver.fields.insert(token_f, (error_type, FieldStorage::Static(log_f)));
    resolver.fields.insert(token_c, (error_type, FieldStorage::Static(log_c)));

    // ip 0..5:   ldsfld thrown_token
    // ip 5:      throw
    // ip 6..20:  finally: ldc.i 1 ; stsfld token_f ; endfinally
    // ip 21..26: catch: stsfld token_c
    // ip 26:     retnull
    let mut body = Vec::new();
    push_u32(&mut body, OpCode::LdSFld, thrown_token);
    body.push(OpCode::Throw as u8);
    let finally_start = body.len();
    push_i64(&mut body, OpCode::LdcI, 1);
    push_u32(&mut body, OpCode::StSFld, token_f);
    body.push(OpCode::EndFinally as u8);
    let catch_start = body.len();
    push_u32(&mut body, OpCode::StSFld, token_c);
    body.push(OpCode::RetNull as u8);

    let mut o = overload(0, 0, OverloadFlags::empty(), body, 2);
    o.try_blocks = vec![
        TryBlock {
            start: 0,
            end: finally_start,
            handler: finally_start,
            kind: TryBlockKind::Finally,
        },
        TryBlock {
            start: 0,
            end: catch_start,
            handler: catch_start,
            kind: TryBlockKind::Catch { catch_type: Some(error_type) },
        },
    ];

    let mut vm = Interpreter::new(
        &mut gc, &types, &resolver, object, object, object, object, object, object, object,
    );
    let result = vm.invoke(&o, Vec::new()).unwrap();
    assert_eq!(result, Value::Null);
    assert_eq!(vm.gc.static_refs.read(log_f), Value::Int(1));
    match vm.gc.static_refs.read(log_c) {
        Value::Instance { type_handle, object } => {
            assert_eq!(type_handle, error_type);
            assert_eq!(object, instance);
        }
        other => panic!("expected the caught instance, got {other:?}"),
    }
}

/// Scenario 4: `try { leave L } finally { write 'F' }; L: write 'A'` — the
/// finally body must run before control reaches `L`.
#[test]
fn leave_runs_the_enclosing_finally_before_its_target() {
    let mut types = TypeRegistry::new();
    let unit = types.register(leaf_type("aves.Object", None));

    let mut gc = Gc::new();
    let log_f = gc.add_static_reference();
    let log_a = gc.add_static_reference();
    gc.static_refs.write(log_f, Value::Int(0));
    gc.static_refs.write(log_a, Value::Int(0));

    let token_f = 1;
    let token_a = 2;
    let mut resolver = FieldOnlyResolver::default();
    resolver.fields.insert(token_f, (unit, FieldStorage::Static(log_f)));
    resolver.fields.insert(token_a, (unit, FieldStorage::Static(log_a)));

    // ip 0..5:  leave L
    // ip 5..19: finally: ldc.i 1 ; stsfld token_f ; endfinally
    // ip 20..:  L: ldc.i 1 ; stsfld token_a ; retnull
    let mut body = Vec::new();
    let leave_site = body.len();
    push_u32(&mut body, OpCode::Leave, 0); // patched below
    let finally_start = body.len();
    push_i64(&mut body, OpCode::LdcI, 1);
    push_u32(&mut body, OpCode::StSFld, token_f);
    body.push(OpCode::EndFinally as u8);
    let target_l = body.len();
    push_i64(&mut body, OpCode::LdcI, 1);
    push_u32(&mut body, OpCode::StSFld, token_a);
    body.push(OpCode::RetNull as u8);

    // `leave`'s offset is relative to the end of the leave instruction
    // itself (§4.4 control flow doc comment).
    let leave_end = leave_site + 5;
    let delta = (target_l as i64 - leave_end as i64) as i32;
    body[leave_site + 1..leave_site + 5].copy_from_slice(&delta.to_le_bytes());

    let mut o = overload(0, 0, OverloadFlags::empty(), body, 2);
    o.try_blocks = vec![TryBlock {
        start: 0,
        end: finally_start,
        handler: finally_start,
        kind: TryBlockKind::Finally,
    }];

    let mut vm = Interpreter::new(&mut gc, &types, &resolver, unit, unit, unit, unit, unit, unit, unit);
    let result = vm.invoke(&o, Vec::new()).unwrap();
    assert_eq!(result, Value::Null);
    assert_eq!(vm.gc.static_refs.read(log_f), Value::Int(1));
    assert_eq!(vm.gc.static_refs.read(log_a), Value::Int(1));
}

/// Scenario 4b: `1; 999; pop; ret` after going through the method
/// initializer. The folded `pop` must actually discard the `999` the second
/// `ldc.i` pushed — if it only deleted the `pop` instruction and left `999`
/// on the stack, `ret` would pop that orphan back off as the return value
/// instead of the `1` underneath it (§4.3 Removal pass).
#[test]
fn merged_producer_pop_actually_discards_its_value() {
    let mut types = TypeRegistry::new();
    let object = types.register(leaf_type("aves.Object", None));

    let mut body = Vec::new();
    push_i64(&mut body, OpCode::LdcI, 1);
    push_i64(&mut body, OpCode::LdcI, 999);
    body.push(OpCode::Pop as u8);
    body.push(OpCode::Ret as u8);

    let mut o = overload(0, 0, OverloadFlags::empty(), body, 8);
    initialize(&mut o, |_| None).unwrap();
    assert!(!o.discard_outputs.is_empty(), "expected the second ldc.i to be marked discardable");

    let mut gc = Gc::new();
    let resolver = FieldOnlyResolver::default();
    let mut vm = Interpreter::new(
        &mut gc, &types, &resolver, object, object, object, object, object, object, object,
    );
    let result = vm.invoke(&o, Vec::new()).unwrap();
    assert_eq!(result, Value::Int(1));
}

/// Scenario 5: a reference into a gen-0 object's field survives a collect
/// cycle and still reads back the value written before the cycle.
#[test]
fn reference_survives_a_collect_cycle() {
    let mut types = TypeRegistry::new();
    let object = types.register(leaf_type("aves.Object", None));

    let mut gc = Gc::new();
    let handle = gc.alloc(object, 1).unwrap();
    if let Payload::Fields(fields) = &gc.get(handle).payload {
        fields.lock().unwrap()[0] = Value::Int(42);
    }

    gc.collect(&[handle], true);

    let resolver = FieldOnlyResolver::default();
    let vm = Interpreter::new(&mut gc, &types, &resolver, object, object, object, object, object, object, object);
    let value = vm
        .resolve_reference(Reference::Field { object: handle, offset: 0 })
        .unwrap();
    assert_eq!(value, Value::Int(42));
}

/// Scenario 6: a pinned object's handle is stable across a collect cycle
/// that runs while it is pinned.
#[test]
fn pinning_survives_a_collect_cycle() {
    let mut types = TypeRegistry::new();
    let object = types.register(leaf_type("aves.Object", None));
    let mut gc = Gc::new();
    let handle = gc.alloc(object, 0).unwrap();

    gc.pin(handle);
    assert!(gc.get(handle).header.is_pinned());

    // Allocate garbage to give the collector something to do, then cycle.
    for _ in 0..8 {
        let _ = gc.alloc(object, 4).unwrap();
    }
    gc.collect(&[], true);

    assert!(gc.is_alive(handle));
    assert!(gc.get(handle).header.is_pinned());
    gc.unpin(handle);
    assert!(!gc.get(handle).header.is_pinned());
}
