//! Stack-move family: pure producers, `dup`/`pop`, and `mvloc` (§4.4 Opcode
//! family table, "Stack moves").

use super::JumpTable;
use crate::error::VmResult;
use crate::executor::{decode_slot, Interpreter, Slot, StepOutcome};
use crate::instruction::{Instruction, Operand};
use crate::opcode::OpCode;
use crate::types::FieldStorage;
use crate::value::Value;

pub fn register(table: &mut JumpTable) {
    table.register(OpCode::LdNull, ld_null);
    table.register(OpCode::LdFalse, ld_false);
    table.register(OpCode::LdTrue, ld_true);
    table.register(OpCode::LdcI, ldc_i);
    table.register(OpCode::LdcU, ldc_u);
    table.register(OpCode::LdcR, ldc_r);
    table.register(OpCode::LdStr, ld_str);
    table.register(OpCode::LdArgc, ld_argc);
    table.register(OpCode::LdEnum, ld_enum);
    table.register(OpCode::Dup, dup);
    table.register(OpCode::Pop, pop);
    table.register(OpCode::MvLoc, mv_loc);
}

fn current_push(vm: &mut Interpreter, value: Value) -> VmResult<StepOutcome> {
    vm.call_stack.current_mut().expect("no active frame").push(value);
    Ok(StepOutcome::Continue)
}

fn ld_null(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    current_push(vm, Value::Null)
}

fn ld_false(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    current_push(vm, Value::Bool(false))
}

fn ld_true(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    current_push(vm, Value::Bool(true))
}

fn ldc_i(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::Immediate(value) = i.operand else {
        return Err(crate::error::VmError::invalid_operand_msg("ldc.i without an immediate operand"));
    };
    current_push(vm, Value::Int(value))
}

fn ldc_u(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::ImmediateU(value) = i.operand else {
        return Err(crate::error::VmError::invalid_operand_msg("ldc.u without an immediate operand"));
    };
    current_push(vm, Value::UInt(value))
}

fn ldc_r(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::ImmediateR(value) = i.operand else {
        return Err(crate::error::VmError::invalid_operand_msg("ldc.r without an immediate operand"));
    };
    current_push(vm, Value::Real(value))
}

fn ld_str(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::Token(token) = i.operand else {
        return Err(crate::error::VmError::invalid_operand_msg("ldstr without a token operand"));
    };
    let text = vm.resolver.resolve_string(token)?;
    let string_type = vm.string_type;
    let handle = vm.gc.intern(string_type, &text)?;
    current_push(
        vm,
        Value::Instance {
            type_handle: string_type,
            object: handle,
        },
    )
}

/// Pushes the number of arguments the caller actually supplied, before
/// optional-argument padding or variadic packing collapsed them into
/// `frame.arguments` (§4.4: this is how a variadic method recovers how many
/// trailing values it was called with).
fn ld_argc(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    let count = vm.call_stack.current().expect("no active frame").actual_arg_count as i64;
    current_push(vm, Value::Int(count))
}

/// Enum members are compiled as named static constants (§3 Member); loading
/// one is the same as an ordinary static field read.
fn ld_enum(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::Token(token) = i.operand else {
        return Err(crate::error::VmError::invalid_operand_msg("ldenum without a token operand"));
    };
    let (_type_handle, storage) = vm.resolver.resolve_field(token)?;
    let value = match storage {
        FieldStorage::Static(id) => vm.gc.static_refs.read(id),
        FieldStorage::Instance { .. } => {
            return Err(crate::error::VmError::invalid_operand_msg("enum member resolved to an instance field"));
        }
    };
    current_push(vm, value)
}

fn dup(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    let frame = vm.call_stack.current_mut().expect("no active frame");
    let top = *frame.peek()?;
    frame.push(top);
    Ok(StepOutcome::Continue)
}

fn pop(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    vm.call_stack.current_mut().expect("no active frame").pop()?;
    Ok(StepOutcome::Continue)
}

/// Stores the top of the evaluation stack into a local slot without popping
/// it (§4.4: `mvloc` both stores and leaves its value for an immediately
/// following consumer, matching `is_load_local`/`is_store_local` both
/// including `MvLoc` in the initializer's instruction flags).
fn mv_loc(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::SlotIndex(slot) = i.operand else {
        return Err(crate::error::VmError::invalid_operand_msg("mvloc without a slot operand"));
    };
    let frame = vm.call_stack.current_mut().expect("no active frame");
    let value = *frame.peek()?;
    match decode_slot(slot as u32) {
        Slot::Local(index) => frame.store_local(index, value)?,
        Slot::Argument(index) => frame.store_argument(index, value)?,
    }
    Ok(StepOutcome::Continue)
}
