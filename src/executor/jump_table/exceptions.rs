//! Exception family (§4.4 Opcode family table, "Exceptions"). `throw`
//! raises whatever value is on top of the stack; `rethrow` re-raises the
//! error the innermost enclosing catch block is currently handling.

use super::JumpTable;
use crate::error::VmResult;
use crate::executor::{Interpreter, StepOutcome};
use crate::instruction::Instruction;
use crate::opcode::OpCode;

pub fn register(table: &mut JumpTable) {
    table.register(OpCode::Throw, throw);
    table.register(OpCode::Rethrow, rethrow);
}

fn throw(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    let value = vm.call_stack.current_mut().expect("no active frame").pop()?;
    let value = vm.read_operand(value)?;
    Ok(StepOutcome::Throw(value))
}

fn rethrow(vm: &mut Interpreter, _i: &Instruction) -> VmResult<StepOutcome> {
    let error = vm
        .call_stack
        .current()
        .expect("no active frame")
        .current_exception
        .ok_or_else(|| crate::error::VmError::invalid_operand_msg("rethrow outside a catch block"))?;
    Ok(StepOutcome::Throw(error))
}
