//! Field and member-access family (§4.4 Opcode family table, "Field/member
//! access"). `ldfld`/`stfld` verify the receiver is actually an instance of
//! the field's declaring type; the `fast` variants skip that check, for
//! call sites the initializer has already proven safe (typically `this`
//! accesses inside the declaring type's own methods).

use super::JumpTable;
use crate::error::{VmError, VmResult};
use crate::executor::{read_field, write_field, Interpreter, StepOutcome};
use crate::instruction::{Instruction, Operand};
use crate::opcode::OpCode;
use crate::types::{FieldStorage, Member};
use crate::value::Value;

pub fn register(table: &mut JumpTable) {
    table.register(OpCode::LdFld, ld_fld);
    table.register(OpCode::StFld, st_fld);
    table.register(OpCode::LdFldFast, ld_fld_fast);
    table.register(OpCode::StFldFast, st_fld_fast);
    table.register(OpCode::LdSFld, ld_sfld);
    table.register(OpCode::StSFld, st_sfld);
    table.register(OpCode::LdMem, ld_mem);
    table.register(OpCode::StMem, st_mem);
}

fn pop(vm: &mut Interpreter) -> VmResult<Value> {
    vm.call_stack.current_mut().expect("no active frame").pop()
}

fn push(vm: &mut Interpreter, value: Value) {
    vm.call_stack.current_mut().expect("no active frame").push(value);
}

fn field_token(i: &Instruction) -> VmResult<u32> {
    match i.operand {
        Operand::Token(token) => Ok(token),
        _ => Err(VmError::invalid_operand_msg("field access without a token operand")),
    }
}

fn instance_offset(storage: &FieldStorage) -> VmResult<usize> {
    match storage {
        FieldStorage::Instance { offset } => Ok(*offset),
        FieldStorage::Static(_) => Err(VmError::invalid_operand_msg("instance field access resolved to a static slot")),
    }
}

fn ld_fld_impl(vm: &mut Interpreter, i: &Instruction, checked: bool) -> VmResult<StepOutcome> {
    let token = field_token(i)?;
    let (declaring_type, storage) = vm.resolver.resolve_field(token)?;
    let offset = instance_offset(&storage)?;
    let receiver = vm.read_operand(pop(vm)?)?;
    let Value::Instance { type_handle, object } = receiver else {
        return Err(VmError::invalid_type("instance", "non-instance value"));
    };
    if checked && !vm.types.is_type(type_handle, declaring_type) {
        return Err(VmError::invalid_type(
            vm.types.get(type_handle).full_name.clone(),
            vm.types.get(declaring_type).full_name.clone(),
        ));
    }
    let value = read_field(vm.gc, object, offset)?;
    push(vm, value);
    Ok(StepOutcome::Continue)
}

fn st_fld_impl(vm: &mut Interpreter, i: &Instruction, checked: bool) -> VmResult<StepOutcome> {
    let token = field_token(i)?;
    let (declaring_type, storage) = vm.resolver.resolve_field(token)?;
    let offset = instance_offset(&storage)?;
    let value = vm.read_operand(pop(vm)?)?;
    let receiver = vm.read_operand(pop(vm)?)?;
    let Value::Instance { type_handle, object } = receiver else {
        return Err(VmError::invalid_type("instance", "non-instance value"));
    };
    if checked && !vm.types.is_type(type_handle, declaring_type) {
        return Err(VmError::invalid_type(
            vm.types.get(type_handle).full_name.clone(),
            vm.types.get(declaring_type).full_name.clone(),
        ));
    }
    write_field(vm.gc, object, offset, value)?;
    Ok(StepOutcome::Continue)
}

fn ld_fld(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    ld_fld_impl(vm, i, true)
}

fn ld_fld_fast(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    ld_fld_impl(vm, i, false)
}

fn st_fld(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    st_fld_impl(vm, i, true)
}

fn st_fld_fast(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    st_fld_impl(vm, i, false)
}

fn ld_sfld(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let token = field_token(i)?;
    let (_declaring_type, storage) = vm.resolver.resolve_field(token)?;
    let FieldStorage::Static(id) = storage else {
        return Err(VmError::invalid_operand_msg("static field access resolved to an instance slot"));
    };
    let value = vm.gc.static_refs.read(id);
    push(vm, value);
    Ok(StepOutcome::Continue)
}

fn st_sfld(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let token = field_token(i)?;
    let (_declaring_type, storage) = vm.resolver.resolve_field(token)?;
    let FieldStorage::Static(id) = storage else {
        return Err(VmError::invalid_operand_msg("static field access resolved to an instance slot"));
    };
    let value = vm.read_operand(pop(vm)?)?;
    vm.gc.static_refs.write(id, value);
    Ok(StepOutcome::Continue)
}

/// Looks up `name` on `type_handle`'s member table, honoring base-type
/// shadowing (§3 Member, §4.1).
fn find_field_or_property<'a>(vm: &'a Interpreter, type_handle: crate::types::TypeHandle, name: &str) -> VmResult<&'a Member> {
    vm.types
        .find_member(type_handle, name)
        .ok_or_else(|| VmError::inaccessible_member(name))
}

fn ld_mem(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let token = field_token(i)?;
    let name = vm.resolver.resolve_member_name(token)?;
    let receiver = vm.read_operand(pop(vm)?)?;
    let Value::Instance { type_handle, object } = receiver else {
        return Err(VmError::invalid_type("instance", "non-instance value"));
    };
    let member = find_field_or_property(vm, type_handle, &name)?.clone();
    match member {
        Member::Field(field) => {
            let offset = instance_offset(&field.storage)?;
            let value = read_field(vm.gc, object, offset)?;
            push(vm, value);
        }
        Member::Property { getter: Some(getter), .. } => {
            let overload = getter
                .resolve_overload(1)
                .cloned()
                .ok_or_else(|| VmError::no_overload(name.clone(), 1))?;
            let value = vm.invoke(&overload, vec![receiver])?;
            push(vm, value);
        }
        _ => return Err(VmError::inaccessible_member(name)),
    }
    Ok(StepOutcome::Continue)
}

fn st_mem(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let token = field_token(i)?;
    let name = vm.resolver.resolve_member_name(token)?;
    let value = vm.read_operand(pop(vm)?)?;
    let receiver = vm.read_operand(pop(vm)?)?;
    let Value::Instance { type_handle, object } = receiver else {
        return Err(VmError::invalid_type("instance", "non-instance value"));
    };
    let member = find_field_or_property(vm, type_handle, &name)?.clone();
    match member {
        Member::Field(field) => {
            let offset = instance_offset(&field.storage)?;
            write_field(vm.gc, object, offset, value)?;
        }
        Member::Property { setter: Some(setter), .. } => {
            let overload = setter
                .resolve_overload(2)
                .cloned()
                .ok_or_else(|| VmError::no_overload(name.clone(), 2))?;
            vm.invoke(&overload, vec![receiver, value])?;
        }
        _ => return Err(VmError::inaccessible_member(name)),
    }
    Ok(StepOutcome::Continue)
}
