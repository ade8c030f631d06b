//! Reference family (§4.4 Opcode family table, "References"; §3 Reference).
//!
//! `ldlocref`/`ldargref` build a [`Reference::Local`] pointing at the
//! current frame's own slot (`frame_depth` 0 — nothing in this port builds
//! references into an outer frame, so the field exists for
//! [`crate::executor::resolve_reference`]'s generality rather than because
//! any opcode here sets it nonzero). `mvloc.rl`/`mvloc.lr` move a value
//! through a reference already on the stack or held in a local; the
//! `.rs`/`.sr` suffixes are a narrower, less-attested pair of the same
//! pattern and are implemented as aliases of the two until their distinct
//! semantics turn up more evidence (see DESIGN.md).

use super::JumpTable;
use crate::error::{VmError, VmResult};
use crate::executor::{encode_argument_slot, encode_local_slot, Interpreter, Slot, StepOutcome};
use crate::executor::decode_slot;
use crate::instruction::{Instruction, Operand};
use crate::opcode::OpCode;
use crate::types::FieldStorage;
use crate::value::{Reference, Value};

pub fn register(table: &mut JumpTable) {
    table.register(OpCode::LdLocRef, ld_loc_ref);
    table.register(OpCode::LdArgRef, ld_arg_ref);
    table.register(OpCode::LdFldRef, ld_fld_ref);
    table.register(OpCode::LdSFldRef, ld_sfld_ref);
    table.register(OpCode::LdMemRef, ld_mem_ref);
    table.register(OpCode::MvLocRL, mv_loc_rl);
    table.register(OpCode::MvLocRS, ld_loc_ref);
    table.register(OpCode::MvLocLR, mv_loc_lr);
    table.register(OpCode::MvLocSR, mv_loc_lr);
}

fn pop(vm: &mut Interpreter) -> VmResult<Value> {
    vm.call_stack.current_mut().expect("no active frame").pop()
}

fn push(vm: &mut Interpreter, value: Value) {
    vm.call_stack.current_mut().expect("no active frame").push(value);
}

fn slot_operand(i: &Instruction) -> VmResult<i32> {
    match i.operand {
        Operand::SlotIndex(slot) => Ok(slot),
        _ => Err(VmError::invalid_operand_msg("reference opcode without a slot operand")),
    }
}

fn token_operand(i: &Instruction) -> VmResult<u32> {
    match i.operand {
        Operand::Token(token) => Ok(token),
        _ => Err(VmError::invalid_operand_msg("reference opcode without a token operand")),
    }
}

fn ld_loc_ref(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let slot = slot_operand(i)?;
    let encoded = match decode_slot(slot as u32) {
        Slot::Local(index) => encode_local_slot(index as u32),
        Slot::Argument(index) => encode_argument_slot(index as u32),
    };
    push(vm, Value::Reference(Reference::Local { frame_depth: 0, slot: encoded }));
    Ok(StepOutcome::Continue)
}

fn ld_arg_ref(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    ld_loc_ref(vm, i)
}

fn ld_fld_ref(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let token = token_operand(i)?;
    let (_declaring_type, storage) = vm.resolver.resolve_field(token)?;
    let FieldStorage::Instance { offset } = storage else {
        return Err(VmError::invalid_operand_msg("ldfldref resolved to a static slot"));
    };
    let receiver = vm.read_operand(pop(vm)?)?;
    let Value::Instance { object, .. } = receiver else {
        return Err(VmError::invalid_type("instance", "non-instance value"));
    };
    push(vm, Value::Reference(Reference::Field { object, offset }));
    Ok(StepOutcome::Continue)
}

fn ld_sfld_ref(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let token = token_operand(i)?;
    let (_declaring_type, storage) = vm.resolver.resolve_field(token)?;
    let FieldStorage::Static(id) = storage else {
        return Err(VmError::invalid_operand_msg("ldsfldref resolved to an instance slot"));
    };
    push(vm, Value::Reference(Reference::Static(id)));
    Ok(StepOutcome::Continue)
}

fn ld_mem_ref(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let token = token_operand(i)?;
    let name = vm.resolver.resolve_member_name(token)?;
    let receiver = vm.read_operand(pop(vm)?)?;
    let Value::Instance { type_handle, object } = receiver else {
        return Err(VmError::invalid_type("instance", "non-instance value"));
    };
    let member = vm
        .types
        .find_member(type_handle, &name)
        .ok_or_else(|| VmError::inaccessible_member(name.clone()))?;
    let crate::types::Member::Field(field) = member else {
        return Err(VmError::inaccessible_member(name));
    };
    let offset = match &field.storage {
        FieldStorage::Instance { offset } => *offset,
        FieldStorage::Static(_) => {
            return Err(VmError::invalid_operand_msg("ldmemref resolved to a static slot"));
        }
    };
    push(vm, Value::Reference(Reference::Field { object, offset }));
    Ok(StepOutcome::Continue)
}

/// `mvloc.rl`: pop a reference, dereference it, and store the result into
/// the local slot named by this instruction's operand.
fn mv_loc_rl(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let slot = slot_operand(i)?;
    let reference = match pop(vm)? {
        Value::Reference(r) => r,
        _ => return Err(VmError::invalid_type("reference", "non-reference value")),
    };
    let value = vm.resolve_reference(reference)?;
    let frame = vm.call_stack.current_mut().expect("no active frame");
    match decode_slot(slot as u32) {
        Slot::Local(index) => frame.store_local(index, value)?,
        Slot::Argument(index) => frame.store_argument(index, value)?,
    }
    Ok(StepOutcome::Continue)
}

/// `mvloc.lr`: read the reference held in the local slot named by this
/// instruction's operand, and store the popped stack value through it.
fn mv_loc_lr(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let slot = slot_operand(i)?;
    let value = pop(vm)?;
    let frame = vm.call_stack.current().expect("no active frame");
    let held = match decode_slot(slot as u32) {
        Slot::Local(index) => frame.load_local(index)?,
        Slot::Argument(index) => frame.load_argument(index)?,
    };
    let reference = match held {
        Value::Reference(r) => r,
        _ => return Err(VmError::invalid_type("reference", "non-reference local")),
    };
    vm.store_through(reference, value)?;
    Ok(StepOutcome::Continue)
}
