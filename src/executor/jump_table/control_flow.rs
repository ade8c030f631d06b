//! Control-flow family (§4.4 Opcode family table, "Control flow";
//! §4.4 References for `leave`/`endfinally`).
//!
//! Branch operands are stored as offsets relative to the end of the
//! branching instruction (`original_offset + original_size`), the same
//! convention the method initializer's `emit` step re-encodes them in;
//! resolving a target is the same arithmetic in both directions.

use super::JumpTable;
use crate::error::{VmError, VmResult};
use crate::executor::{find_innermost_finally, value_compare, value_equals, Interpreter, StepOutcome};
use crate::frame::LeaveContinuation;
use crate::instruction::{Instruction, Operand};
use crate::opcode::OpCode;
use crate::value::Value;

pub fn register(table: &mut JumpTable) {
    table.register(OpCode::Br, br);
    table.register(OpCode::Leave, leave);
    table.register(OpCode::BrNull, br_null);
    table.register(OpCode::BrInst, br_inst);
    table.register(OpCode::BrFalse, br_false);
    table.register(OpCode::BrTrue, br_true);
    table.register(OpCode::BrType, br_type);
    table.register(OpCode::BrRef, br_ref);
    table.register(OpCode::BrNRef, br_nref);
    table.register(OpCode::Switch, switch);
    table.register(OpCode::BrEq, br_eq);
    table.register(OpCode::BrNeq, br_neq);
    table.register(OpCode::BrLt, br_lt);
    table.register(OpCode::BrGt, br_gt);
    table.register(OpCode::BrLte, br_lte);
    table.register(OpCode::BrGte, br_gte);
    table.register(OpCode::Ret, ret);
    table.register(OpCode::RetNull, ret_null);
    table.register(OpCode::EndFinally, end_finally);
}

fn branch_target(i: &Instruction, delta: i32) -> VmResult<usize> {
    let base = (i.original_offset + i.original_size) as i64;
    let target = base + delta as i64;
    if target < 0 {
        return Err(VmError::invalid_operand_msg("branch target is negative"));
    }
    Ok(target as usize)
}

fn offset_operand(i: &Instruction) -> VmResult<i32> {
    match i.operand {
        Operand::BranchOffset(offset) => Ok(offset),
        _ => Err(VmError::invalid_operand_msg("branch without an offset operand")),
    }
}

fn pop(vm: &mut Interpreter) -> VmResult<Value> {
    vm.call_stack.current_mut().expect("no active frame").pop()
}

fn br(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let target = branch_target(i, offset_operand(i)?)?;
    Ok(StepOutcome::Jump(target))
}

/// `leave`: exits a protected region, running the innermost enclosing
/// `finally` first if there is one (§4.4 References). Nested finally
/// blocks chain naturally: each finally's own trailing `leave` passes
/// through this same handler one level at a time.
fn leave(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let target = branch_target(i, offset_operand(i)?)?;
    let handler = {
        let frame = vm.call_stack.current().expect("no active frame");
        find_innermost_finally(&frame.overload, frame.instruction_pointer).map(|b| b.handler)
    };
    match handler {
        Some(handler) => {
            let frame = vm.call_stack.current_mut().expect("no active frame");
            frame.pending_leave_targets.push(LeaveContinuation::Branch(target));
            Ok(StepOutcome::Jump(handler))
        }
        None => Ok(StepOutcome::Jump(target)),
    }
}

fn end_finally(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    let frame = vm.call_stack.current_mut().expect("no active frame");
    let continuation = frame
        .pending_leave_targets
        .pop()
        .ok_or_else(|| VmError::invalid_operand_msg("endfinally with no pending leave"))?;
    match continuation {
        LeaveContinuation::Branch(target) => Ok(StepOutcome::Jump(target)),
        LeaveContinuation::ResumeUnwind => Ok(StepOutcome::ResumeUnwind),
    }
}

fn br_null(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let value = vm.read_operand(pop(vm)?)?;
    if value.is_null() {
        Ok(StepOutcome::Jump(branch_target(i, offset_operand(i)?)?))
    } else {
        Ok(StepOutcome::Continue)
    }
}

fn br_inst(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let value = vm.read_operand(pop(vm)?)?;
    if !value.is_null() {
        Ok(StepOutcome::Jump(branch_target(i, offset_operand(i)?)?))
    } else {
        Ok(StepOutcome::Continue)
    }
}

fn br_false(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let value = vm.read_operand(pop(vm)?)?;
    if value.is_false() {
        Ok(StepOutcome::Jump(branch_target(i, offset_operand(i)?)?))
    } else {
        Ok(StepOutcome::Continue)
    }
}

fn br_true(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let value = vm.read_operand(pop(vm)?)?;
    if value.is_true() {
        Ok(StepOutcome::Jump(branch_target(i, offset_operand(i)?)?))
    } else {
        Ok(StepOutcome::Continue)
    }
}

fn br_ref(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let value = pop(vm)?;
    if value.is_reference() {
        Ok(StepOutcome::Jump(branch_target(i, offset_operand(i)?)?))
    } else {
        Ok(StepOutcome::Continue)
    }
}

fn br_nref(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let value = pop(vm)?;
    if !value.is_reference() {
        Ok(StepOutcome::Jump(branch_target(i, offset_operand(i)?)?))
    } else {
        Ok(StepOutcome::Continue)
    }
}

/// Not actually a branch in this encoding: `brtype`'s only operand is the
/// type token (see `decode_one`), with no offset to jump to. It is
/// implemented as the `instanceof`-style push-a-bool test its operand shape
/// implies, rather than as a jump.
fn br_type(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::Token(token) = i.operand else {
        return Err(VmError::invalid_operand_msg("brtype without a token operand"));
    };
    let type_handle = vm.resolver.resolve_type(token)?;
    let value = vm.read_operand(pop(vm)?)?;
    let is_instance = match value {
        Value::Instance { type_handle: actual, .. } => vm.types.is_type(actual, type_handle),
        Value::Null => false,
        Value::Int(_) => vm.types.is_type(vm.int_type, type_handle),
        Value::UInt(_) => vm.types.is_type(vm.uint_type, type_handle),
        Value::Real(_) => vm.types.is_type(vm.real_type, type_handle),
        Value::Bool(_) => vm.types.is_type(vm.bool_type, type_handle),
        Value::Reference(_) => false,
    };
    vm.call_stack.current_mut().expect("no active frame").push(Value::Bool(is_instance));
    Ok(StepOutcome::Continue)
}

fn switch(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::SwitchOffsets(offsets) = &i.operand else {
        return Err(VmError::invalid_operand_msg("switch without an offset table"));
    };
    let index = match vm.read_operand(pop(vm)?)? {
        Value::Int(n) if n >= 0 => n as usize,
        _ => return Ok(StepOutcome::Continue),
    };
    match offsets.get(index) {
        Some(&delta) => Ok(StepOutcome::Jump(branch_target(i, delta)?)),
        None => Ok(StepOutcome::Continue),
    }
}

fn fused_compare(vm: &mut Interpreter, i: &Instruction, matches: impl Fn(i64) -> bool) -> VmResult<StepOutcome> {
    let rhs = vm.read_operand(pop(vm)?)?;
    let lhs = vm.read_operand(pop(vm)?)?;
    let ordering = value_compare(vm, lhs, rhs)?;
    if matches(ordering) {
        Ok(StepOutcome::Jump(branch_target(i, offset_operand(i)?)?))
    } else {
        Ok(StepOutcome::Continue)
    }
}

fn br_eq(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let rhs = vm.read_operand(pop(vm)?)?;
    let lhs = vm.read_operand(pop(vm)?)?;
    if value_equals(vm, lhs, rhs)? {
        Ok(StepOutcome::Jump(branch_target(i, offset_operand(i)?)?))
    } else {
        Ok(StepOutcome::Continue)
    }
}

fn br_neq(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let rhs = vm.read_operand(pop(vm)?)?;
    let lhs = vm.read_operand(pop(vm)?)?;
    if !value_equals(vm, lhs, rhs)? {
        Ok(StepOutcome::Jump(branch_target(i, offset_operand(i)?)?))
    } else {
        Ok(StepOutcome::Continue)
    }
}

fn br_lt(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    fused_compare(vm, i, |o| o < 0)
}

fn br_gt(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    fused_compare(vm, i, |o| o > 0)
}

fn br_lte(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    fused_compare(vm, i, |o| o <= 0)
}

fn br_gte(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    fused_compare(vm, i, |o| o >= 0)
}

fn ret(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    let value = pop(vm)?;
    Ok(StepOutcome::Return(value))
}

fn ret_null(_vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    Ok(StepOutcome::Return(Value::Null))
}
