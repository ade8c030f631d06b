//! Object-creation family: `newobj`, `list` (§4.4 Opcode family table,
//! "Object creation"). `hash` is left unimplemented: hash-map literals
//! depend on the stdlib native methods backing `aves.Hash`, which are out
//! of scope here (§6).

use super::JumpTable;
use crate::error::{VmError, VmResult};
use crate::executor::{pack_value_list, Interpreter, StepOutcome};
use crate::instruction::{Instruction, Operand};
use crate::opcode::OpCode;
use crate::value::Value;

pub fn register(table: &mut JumpTable) {
    table.register(OpCode::NewObj, new_obj);
    table.register(OpCode::List, list);
    table.register(OpCode::Hash, hash);
}

fn new_obj(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::Token(token) = i.operand else {
        return Err(VmError::invalid_operand_msg("newobj without a token operand"));
    };
    let (type_handle, overload) = vm.resolver.resolve_call(token)?;
    let explicit_argc = overload.param_count as usize - 1;
    let frame = vm.call_stack.current_mut().expect("no active frame");
    if frame.eval_stack.len() < explicit_argc {
        return Err(VmError::stack_underflow(explicit_argc, frame.eval_stack.len()));
    }
    let mut args: Vec<Value> = frame.eval_stack.split_off(frame.eval_stack.len() - explicit_argc);
    for arg in args.iter_mut() {
        *arg = vm.read_operand(*arg)?;
    }

    let field_count = vm.types.get(type_handle).field_count;
    let handle = vm.gc.alloc(type_handle, field_count)?;
    let instance = Value::Instance {
        type_handle,
        object: handle,
    };

    let mut call_args = Vec::with_capacity(args.len() + 1);
    call_args.push(instance);
    call_args.append(&mut args);

    vm.dispatch_call(&overload, call_args, Some(instance), i.original_size)
}

fn list(vm: &mut Interpreter, i: &Instruction) -> VmResult<StepOutcome> {
    let Operand::Count(count) = i.operand else {
        return Err(VmError::invalid_operand_msg("list without a count operand"));
    };
    let count = count as usize;
    let frame = vm.call_stack.current_mut().expect("no active frame");
    if frame.eval_stack.len() < count {
        return Err(VmError::stack_underflow(count, frame.eval_stack.len()));
    }
    let items: Vec<Value> = frame.eval_stack.split_off(frame.eval_stack.len() - count);
    let list_type = vm.list_type;
    let value = pack_value_list(vm.gc, list_type, items)?;
    vm.call_stack.current_mut().expect("no active frame").push(value);
    Ok(StepOutcome::Continue)
}

fn hash(_vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    Err(VmError::invalid_operation_msg("hash literals require the stdlib native methods, out of scope here"))
}
