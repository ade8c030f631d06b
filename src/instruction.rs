//! Decoded bytecode instructions (§4.3 phase 1, "decode raw bytecode into an
//! instruction vector").
//!
//! Each [`Instruction`] remembers its original offset and size in the raw
//! bytecode stream (needed to remap branch targets and debug symbol ranges
//! in later phases) alongside an as-yet-[`Unresolved`](Operand::Unresolved)
//! or resolved operand, and the flag set the stack-height inference pass
//! consults.

use crate::error::{VmError, VmResult};
use crate::opcode::OpCode;
use crate::types::TypeHandle;
use bitflags::bitflags;

bitflags! {
    /// Per-instruction flags consulted by the method initializer
    /// (§4.3 phase 1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InstructionFlags: u16 {
        const IS_BRANCH            = 1 << 0;
        const IS_SWITCH            = 1 << 1;
        const HAS_INPUT            = 1 << 2;
        const HAS_OUTPUT           = 1 << 3;
        const REQUIRES_STACK_INPUT = 1 << 4;
        const PUSHES_REF           = 1 << 5;
        /// Set during phase 2 once another instruction is found to branch
        /// here; such targets must have their incoming stack height and
        /// reference signature cross-checked rather than merely recorded.
        const HAS_BRANCHES_IN      = 1 << 6;
        const IS_DUP               = 1 << 7;
        const IS_LOAD_LOCAL        = 1 << 8;
        const IS_STORE_LOCAL       = 1 << 9;
    }
}

/// An operand as decoded from the raw stream, before or after token/offset
/// resolution (§4.3 phase 1-2).
#[derive(Debug, Clone)]
pub enum Operand {
    None,
    /// A local/argument slot index, not yet converted to a frame-relative
    /// byte offset (args are negative once resolved).
    SlotIndex(i32),
    /// Resolved frame-relative byte offset for a local/argument access.
    FrameOffset(i32),
    Immediate(i64),
    ImmediateU(u64),
    ImmediateR(f64),
    /// A small inline count (list/hash element count, apply argument count):
    /// always a 4-byte operand, unlike the 8-byte [`Operand::Immediate`].
    Count(i32),
    /// An unresolved module token, awaiting resolution to a type/method/
    /// field/string pointer (§4.3 phase 1, `UNRESOLVED_TOKEN_ID` on failure).
    Token(u32),
    Type(TypeHandle),
    StringConstant(String),
    /// Raw byte offset from the branch instruction's end; resolved to an
    /// instruction index in phase 2.
    BranchOffset(i32),
    BranchTarget(usize),
    /// `switch`'s table of raw offsets, resolved the same way as
    /// [`Operand::BranchOffset`].
    SwitchOffsets(Vec<i32>),
    SwitchTargets(Vec<usize>),
}

/// A single decoded instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Operand,
    /// Offset of this instruction in the original (pre-initializer) byte
    /// stream.
    pub original_offset: usize,
    pub original_size: usize,
    pub flags: InstructionFlags,
}

impl Instruction {
    pub fn new(opcode: OpCode, operand: Operand, original_offset: usize, original_size: usize) -> Self {
        let mut flags = InstructionFlags::empty();
        flags.set(InstructionFlags::IS_BRANCH, opcode.is_branch());
        flags.set(InstructionFlags::IS_SWITCH, opcode.is_switch());
        flags.set(InstructionFlags::REQUIRES_STACK_INPUT, opcode.requires_stack_input());
        flags.set(InstructionFlags::PUSHES_REF, opcode.pushes_ref());
        flags.set(InstructionFlags::IS_DUP, opcode.is_dup());
        flags.set(InstructionFlags::IS_LOAD_LOCAL, opcode.is_load_local());
        flags.set(InstructionFlags::IS_STORE_LOCAL, opcode.is_store_local());
        flags.set(InstructionFlags::HAS_INPUT, opcode.requires_stack_input());
        flags.set(
            InstructionFlags::HAS_OUTPUT,
            !matches!(opcode, OpCode::Pop | OpCode::StFld | OpCode::StFldFast | OpCode::StSFld | OpCode::StMem),
        );
        Self {
            opcode,
            operand,
            original_offset,
            original_size,
            flags,
        }
    }

    pub fn is_branch(&self) -> bool {
        self.flags.contains(InstructionFlags::IS_BRANCH)
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }
}

/// Decodes one opcode byte plus its fixed-size operand from `bytes` starting
/// at `offset`. Tokens, branch offsets and switch tables are left
/// unresolved; later initializer phases fill them in.
pub fn decode_one(bytes: &[u8], offset: usize) -> VmResult<Instruction> {
    let raw_opcode = *bytes
        .get(offset)
        .ok_or_else(|| VmError::invalid_operand_msg("instruction stream ended mid-opcode"))?;
    let opcode = decode_opcode(raw_opcode)?;

    let mut cursor = offset + 1;
    let mut read_i32 = || -> VmResult<i32> {
        let slice = bytes
            .get(cursor..cursor + 4)
            .ok_or_else(|| VmError::invalid_operand_msg("truncated 4-byte operand"))?;
        cursor += 4;
        Ok(i32::from_le_bytes(slice.try_into().unwrap()))
    };
    let mut read_i64 = || -> VmResult<i64> {
        let slice = bytes
            .get(cursor..cursor + 8)
            .ok_or_else(|| VmError::invalid_operand_msg("truncated 8-byte operand"))?;
        cursor += 8;
        Ok(i64::from_le_bytes(slice.try_into().unwrap()))
    };

    let operand = match opcode {
        OpCode::LdcI => Operand::Immediate(read_i64()?),
        OpCode::LdcU => Operand::ImmediateU(read_i64()? as u64),
        OpCode::LdcR => Operand::ImmediateR(f64::from_bits(read_i64()? as u64)),
        OpCode::LdStr | OpCode::NewObj | OpCode::LdFld | OpCode::StFld | OpCode::LdFldFast
        | OpCode::StFldFast | OpCode::LdSFld | OpCode::StSFld | OpCode::LdMem | OpCode::StMem
        | OpCode::Call | OpCode::CallMem | OpCode::SCall | OpCode::CallR | OpCode::CallMemR
        | OpCode::BrType | OpCode::LdFldRef | OpCode::LdSFldRef | OpCode::LdMemRef
        | OpCode::LdEnum => Operand::Token(read_i32()? as u32),
        OpCode::MvLoc | OpCode::LdLocRef | OpCode::LdArgRef | OpCode::MvLocRL | OpCode::MvLocRS
        | OpCode::MvLocLR | OpCode::MvLocSR => Operand::SlotIndex(read_i32()?),
        OpCode::Br
        | OpCode::Leave
        | OpCode::BrNull
        | OpCode::BrInst
        | OpCode::BrFalse
        | OpCode::BrTrue
        | OpCode::BrRef
        | OpCode::BrNRef
        | OpCode::BrEq
        | OpCode::BrNeq
        | OpCode::BrLt
        | OpCode::BrGt
        | OpCode::BrLte
        | OpCode::BrGte => Operand::BranchOffset(read_i32()?),
        OpCode::Switch => {
            let count = read_i32()? as usize;
            let mut offsets = Vec::with_capacity(count);
            for _ in 0..count {
                offsets.push(read_i32()?);
            }
            Operand::SwitchOffsets(offsets)
        }
        OpCode::List | OpCode::Hash | OpCode::LdArgc => Operand::Count(read_i32()?),
        _ => Operand::None,
    };

    Ok(Instruction::new(opcode, operand, offset, cursor - offset))
}

fn decode_opcode(raw: u8) -> VmResult<OpCode> {
    // `OpCode` is `#[repr(u8)]` with a contiguous discriminant range
    // starting at `MvLoc`; a direct transmute would be fragile across
    // edits, so resolution goes through an explicit table instead.
    use OpCode::*;
    const TABLE: &[OpCode] = &[
        MvLoc, LdNull, LdFalse, LdTrue, LdcI, LdcU, LdcR, LdStr, LdArgc, LdEnum, Dup, Pop, NewObj,
        List, Hash, LdFld, StFld, LdFldFast, StFldFast, LdSFld, StSFld, LdMem, StMem, Call,
        CallMem, SCall, CallR, CallMemR, Apply, SApply, Br, Leave, BrNull, BrInst, BrFalse,
        BrTrue, BrType, BrRef, BrNRef, Switch, BrEq, BrNeq, BrLt, BrGt, BrLte, BrGte, Add, Sub,
        Or, Xor, Mul, Div, Mod, And, Pow, Shl, Shr, Plus, Neg, Not, Eq, Cmp, Concat, LdLocRef,
        LdArgRef, LdFldRef, LdSFldRef, LdMemRef, MvLocRL, MvLocRS, MvLocLR, MvLocSR, Throw,
        Rethrow, EndFinally, Ret, RetNull,
    ];
    let index = raw as usize;
    if index == 0 || index > TABLE.len() {
        return Err(VmError::invalid_opcode(raw));
    }
    Ok(TABLE[index - 1])
}

/// Decodes an entire overload body into an instruction vector (§4.3 phase 1).
pub fn decode_all(bytes: &[u8]) -> VmResult<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let instruction = decode_one(bytes, offset)?;
        offset += instruction.original_size;
        instructions.push(instruction);
    }
    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_simple_arithmetic_sequence() {
        // push 2, push 3, add, ret (§8 scenario 1).
        let mut bytes = Vec::new();
        bytes.push(OpCode::LdcI as u8);
        bytes.extend_from_slice(&2i64.to_le_bytes());
        bytes.push(OpCode::LdcI as u8);
        bytes.extend_from_slice(&3i64.to_le_bytes());
        bytes.push(OpCode::Add as u8);
        bytes.push(OpCode::Ret as u8);

        let instructions = decode_all(&bytes).unwrap();
        assert_eq!(instructions.len(), 4);
        assert!(matches!(instructions[0].operand, Operand::Immediate(2)));
        assert!(matches!(instructions[1].operand, Operand::Immediate(3)));
        assert_eq!(instructions[2].opcode, OpCode::Add);
        assert!(instructions[3].is_terminator());
    }

    #[test]
    fn unknown_opcode_byte_is_rejected() {
        let bytes = [0xffu8];
        assert!(decode_all(&bytes).is_err());
    }

    #[test]
    fn truncated_operand_is_rejected() {
        let bytes = [OpCode::LdcI as u8, 0, 0];
        assert!(decode_all(&bytes).is_err());
    }
}
