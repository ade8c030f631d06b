//! Invocation family (§4.4 Opcode family table, "Invocation").
//!
//! `call`/`callmem`/`scall` dereference every argument before the callee
//! sees it; the `r`-suffixed variants additionally accept arguments already
//! holding a [`crate::value::Reference`], for parameters the overload's
//! reference signature marks by-reference (§3 Reference signature). Only
//! the inline short-mask form of a reference signature is checked here;
//! overloads long enough to need the pooled long form are treated as
//! having no by-reference parameters, since the pool lives with the module
//! loader and isn't threaded into the executor (a recorded simplification,
//! see DESIGN.md).

use super::JumpTable;
use crate::error::{VmError, VmResult};
use crate::executor::{read_value_list, Interpreter, StepOutcome};
use crate::instruction::{Instruction, Operand};
use crate::opcode::OpCode;
use crate::types::Overload;
use crate::value::Value;

pub fn register(table: &mut JumpTable) {
    table.register(OpCode::Call, call);
    table.register(OpCode::CallMem, call_mem);
    table.register(OpCode::SCall, call);
    table.register(OpCode::CallR, call_r);
    table.register(OpCode::CallMemR, call_mem_r);
    table.register(OpCode::Apply, apply);
    table.register(OpCode::SApply, apply);
}

fn pop_n(vm: &mut Interpreter, count: usize) -> VmResult<Vec<Value>> {
    let frame = vm.call_stack.current_mut().expect("no active frame");
    if frame.eval_stack.len() < count {
        return Err(VmError::stack_underflow(count, frame.eval_stack.len()));
    }
    let at = frame.eval_stack.len() - count;
    Ok(frame.eval_stack.split_off(at))
}

fn deref_all(vm: &Interpreter, args: &mut [Value]) -> VmResult<()> {
    for arg in args.iter_mut() {
        *arg = vm.read_operand(*arg)?;
    }
    Ok(())
}

/// Leaves by-reference parameter slots (per `overload.ref_signature`)
/// untouched, dereferencing everything else.
fn deref_non_ref(overload: &Overload, vm: &Interpreter, args: &mut [Value]) -> VmResult<()> {
    for (index, arg) in args.iter_mut().enumerate() {
        let is_ref = !overload.ref_signature.is_long() && overload.ref_signature.is_param_ref_short(index);
        if is_ref {
            if !matches!(arg, Value::Reference(_)) {
                return Err(VmError::incorrect_referenceness("call", index));
            }
        } else {
            *arg = vm.read_operand(*arg)?;
        }
    }
    Ok(())
}

fn call(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::Token(token) = i.operand else {
        return Err(VmError::invalid_operand_msg("call without a token operand"));
    };
    let (_type_handle, overload) = vm.resolver.resolve_call(token)?;
    let mut args = pop_n(vm, overload.param_count as usize)?;
    deref_all(vm, &mut args)?;
    vm.dispatch_call(&overload, args, None, i.original_size)
}

fn call_r(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::Token(token) = i.operand else {
        return Err(VmError::invalid_operand_msg("callr without a token operand"));
    };
    let (_type_handle, overload) = vm.resolver.resolve_call(token)?;
    let mut args = pop_n(vm, overload.param_count as usize)?;
    deref_non_ref(&overload, vm, &mut args)?;
    vm.dispatch_call(&overload, args, None, i.original_size)
}

fn resolve_member(vm: &Interpreter, receiver: Value, token: u32) -> VmResult<(Value, Overload, usize)> {
    let (name, explicit_argc) = vm.resolver.resolve_member_call(token)?;
    let Value::Instance { type_handle, .. } = vm.read_operand(receiver)? else {
        return Err(VmError::invalid_type("instance", "non-instance value"));
    };
    let member = vm
        .types
        .find_member(type_handle, &name)
        .ok_or_else(|| VmError::inaccessible_member(name.clone()))?;
    let method = match member {
        crate::types::Member::Method(m) => m,
        _ => return Err(VmError::inaccessible_member(name)),
    };
    let overload = method
        .resolve_overload(explicit_argc + 1)
        .cloned()
        .ok_or_else(|| VmError::no_overload(name, explicit_argc + 1))?;
    Ok((receiver, overload, explicit_argc))
}

fn call_mem(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::Token(token) = i.operand else {
        return Err(VmError::invalid_operand_msg("callmem without a token operand"));
    };
    let mut args = pop_n(vm, 1)?;
    let receiver = vm.read_operand(args.remove(0))?;
    let (_receiver, overload, explicit_argc) = resolve_member(vm, receiver, token)?;
    let mut trailing = pop_n(vm, explicit_argc)?;
    deref_all(vm, &mut trailing)?;
    let mut call_args = Vec::with_capacity(explicit_argc + 1);
    call_args.push(receiver);
    call_args.append(&mut trailing);
    vm.dispatch_call(&overload, call_args, None, i.original_size)
}

fn call_mem_r(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::Token(token) = i.operand else {
        return Err(VmError::invalid_operand_msg("callmemr without a token operand"));
    };
    let mut args = pop_n(vm, 1)?;
    let receiver = vm.read_operand(args.remove(0))?;
    let (_receiver, overload, explicit_argc) = resolve_member(vm, receiver, token)?;
    let mut trailing = pop_n(vm, explicit_argc)?;
    deref_non_ref(&overload, vm, &mut trailing)?;
    let mut call_args = Vec::with_capacity(explicit_argc + 1);
    call_args.push(receiver);
    call_args.append(&mut trailing);
    vm.dispatch_call(&overload, call_args, None, i.original_size)
}

/// `apply`/`sapply`: unpack a List as the argument list for an indirect
/// call (§4.4 Invocation: "pop exactly two values, a callee and an
/// `aves.List` instance... copy the list's own stored elements onto the
/// evaluation stack in order"). Pushed callee-then-list (the original's
/// `InvokeApplyLL` reads `args[0]` as the callee and `args[1]`, the top of
/// stack, as the list), so the list is popped first.
fn apply(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let mut popped = pop_n(vm, 2)?;
    let list_value = vm.read_operand(popped.pop().expect("popped exactly 2"))?;
    let callee = vm.read_operand(popped.pop().expect("popped exactly 2"))?;

    let Value::Instance { type_handle, object } = list_value else {
        return Err(VmError::invalid_type("aves.List", "non-instance value"));
    };
    if type_handle != vm.list_type {
        return Err(VmError::invalid_type("aves.List".to_string(), vm.types.get(type_handle).full_name.clone()));
    }
    let mut args = read_value_list(vm.gc, object)?;

    let Value::Instance { type_handle: callee_type, .. } = callee else {
        return Err(VmError::invalid_type("callable instance", "non-instance value"));
    };
    let operators = &vm.types.get(callee_type).operators;
    let method = operators[crate::types::Operator::Call as usize]
        .as_ref()
        .ok_or_else(|| VmError::no_overload("call", args.len()))?;
    let overload = method
        .resolve_overload(args.len() + 1)
        .cloned()
        .ok_or_else(|| VmError::no_overload("call", args.len()))?;
    let mut call_args = Vec::with_capacity(args.len() + 1);
    call_args.push(callee);
    call_args.append(&mut args);
    vm.dispatch_call(&overload, call_args, None, i.original_size)
}
