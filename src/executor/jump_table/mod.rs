//! Table-driven instruction dispatch (§4.4, §9 "should be table-driven since
//! the set will grow" — the same rationale the method initializer's peephole
//! table follows).
//!
//! Each opcode family registers its handlers into a shared 256-entry table
//! indexed directly by opcode byte, rather than one large match over
//! [`crate::opcode::OpCode`]. Adding an opcode means adding a handler
//! function and a `table.register(...)` line in the owning family module,
//! not touching the dispatch loop in [`crate::executor::Interpreter::run`].

mod control_flow;
mod exceptions;
mod invocation;
mod member_access;
mod object_creation;
mod operators;
mod references;
mod stack_moves;

use crate::error::VmResult;
use crate::executor::{Interpreter, StepOutcome};
use crate::instruction::Instruction;
use crate::opcode::OpCode;

pub type Handler = fn(&mut Interpreter, &Instruction) -> VmResult<StepOutcome>;

pub struct JumpTable {
    handlers: [Option<Handler>; 256],
}

impl JumpTable {
    pub fn new() -> Self {
        let mut table = Self { handlers: [None; 256] };
        stack_moves::register(&mut table);
        object_creation::register(&mut table);
        member_access::register(&mut table);
        invocation::register(&mut table);
        control_flow::register(&mut table);
        operators::register(&mut table);
        references::register(&mut table);
        exceptions::register(&mut table);
        table
    }

    pub fn register(&mut self, opcode: OpCode, handler: Handler) {
        self.handlers[opcode as usize] = Some(handler);
    }

    pub fn get(&self, opcode: OpCode) -> Option<Handler> {
        self.handlers[opcode as usize]
    }
}

impl Default for JumpTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;

    #[test]
    fn every_non_terminator_opcode_family_registers_something() {
        let table = JumpTable::new();
        assert!(table.get(OpCode::Add).is_some());
        assert!(table.get(OpCode::Br).is_some());
        assert!(table.get(OpCode::LdNull).is_some());
        assert!(table.get(OpCode::Throw).is_some());
    }
}
