//! Error types for the Ovum runtime.
//!
//! Three error mechanisms coexist: ABI status codes returned by native
//! functions ([`StatusCode`]), managed errors raised by `throw` and caught by
//! `catch` (carried as a [`crate::value::Value`], not an [`VmError`]), and
//! method-initializer failures, which are unrecoverable structural defects in
//! bytecode. [`VmError`] models host-side execution and initializer failures.

use thiserror::Error;

/// Status code returned across the native function ABI (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    ErrorThrown,
    ErrorNoMemory,
    ErrorOverflow,
    ErrorDivideByZero,
}

/// Runtime errors produced by the executor, initializer and garbage collector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("invalid opcode: {opcode:#04x}")]
    InvalidOpCode { opcode: u8 },

    #[error("invalid instruction: opcode {opcode:#04x}, reason: {reason}")]
    InvalidInstruction { opcode: u8, reason: String },

    #[error("invalid operand: expected {expected}, got {actual}")]
    InvalidOperand { expected: String, actual: String },

    #[error("invalid script: {reason}")]
    InvalidScript { reason: String },

    #[error("stack underflow: requested {requested} items, {available} available")]
    StackUnderflow { requested: usize, available: usize },

    #[error("stack overflow: maximum evaluation stack depth {max_size} exceeded")]
    StackOverflow { max_size: usize },

    #[error("call stack overflow: depth {depth} exceeds limit {limit}")]
    CallStackOverflow { depth: usize, limit: usize },

    #[error("arithmetic overflow in {operation}")]
    Overflow { operation: String },

    #[error("division by zero in {operation}")]
    DivisionByZero { operation: String },

    #[error("invalid type conversion: cannot convert {from} to {to}")]
    InvalidType { from: String, to: String },

    #[error("invalid operation: {operation}, reason: {reason}")]
    InvalidOperation { operation: String, reason: String },

    #[error("no matching overload for {member} with {argc} arguments")]
    NoOverload { member: String, argc: usize },

    #[error("incorrect reference-ness of argument {index} in call to {member}")]
    IncorrectReferenceness { member: String, index: usize },

    #[error("member not accessible: {member}")]
    InaccessibleMember { member: String },

    #[error("type not found: {name}")]
    TypeNotFound { name: String },

    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("inconsistent stack height at instruction {index}: expected {expected}, found {found}")]
    InconsistentStack {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("invalid branch offset {offset} at instruction {index}")]
    InvalidBranchOffset { index: usize, offset: i32 },

    #[error("insufficient stack height at instruction {index}: needs {needed}, has {have}")]
    InsufficientStackHeight {
        index: usize,
        needed: usize,
        have: usize,
    },

    #[error("by-reference value used where a value was required at instruction {index}")]
    StackHasRefs { index: usize },

    #[error("field/static mismatch accessing member {member}")]
    FieldStaticMismatch { member: String },

    #[error("unresolved token id {token:#010x}")]
    UnresolvedTokenId { token: u32 },

    #[error("type {name} is not constructible")]
    TypeNotConstructible { name: String },

    #[error("unhandled error: {type_name}: {message}")]
    UnhandledError { type_name: String, message: String },

    #[error("execution halted: {reason}")]
    ExecutionHalted { reason: String },
}

impl VmError {
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn invalid_opcode(opcode: u8) -> Self {
        Self::InvalidOpCode { opcode }
    }

    pub fn invalid_instruction<S: Into<String>>(opcode: u8, reason: S) -> Self {
        Self::InvalidInstruction {
            opcode,
            reason: reason.into(),
        }
    }

    pub fn invalid_operand<S: Into<String>>(expected: S, actual: S) -> Self {
        Self::InvalidOperand {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_operand_msg<S: Into<String>>(message: S) -> Self {
        let msg = message.into();
        Self::InvalidOperand {
            expected: msg,
            actual: String::new(),
        }
    }

    pub fn invalid_script<S: Into<String>>(reason: S) -> Self {
        Self::InvalidScript {
            reason: reason.into(),
        }
    }

    pub fn stack_underflow(requested: usize, available: usize) -> Self {
        Self::StackUnderflow {
            requested,
            available,
        }
    }

    pub fn stack_overflow(max_size: usize) -> Self {
        Self::StackOverflow { max_size }
    }

    pub fn call_stack_overflow(depth: usize, limit: usize) -> Self {
        Self::CallStackOverflow { depth, limit }
    }

    pub fn overflow<S: Into<String>>(operation: S) -> Self {
        Self::Overflow {
            operation: operation.into(),
        }
    }

    pub fn division_by_zero<S: Into<String>>(operation: S) -> Self {
        Self::DivisionByZero {
            operation: operation.into(),
        }
    }

    pub fn invalid_type<S: Into<String>>(from: S, to: S) -> Self {
        Self::InvalidType {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn invalid_operation_msg<S: Into<String>>(msg: S) -> Self {
        let msg = msg.into();
        Self::InvalidOperation {
            operation: msg.clone(),
            reason: msg,
        }
    }

    pub fn no_overload<S: Into<String>>(member: S, argc: usize) -> Self {
        Self::NoOverload {
            member: member.into(),
            argc,
        }
    }

    pub fn incorrect_referenceness<S: Into<String>>(member: S, index: usize) -> Self {
        Self::IncorrectReferenceness {
            member: member.into(),
            index,
        }
    }

    pub fn inaccessible_member<S: Into<String>>(member: S) -> Self {
        Self::InaccessibleMember {
            member: member.into(),
        }
    }

    pub fn type_not_found<S: Into<String>>(name: S) -> Self {
        Self::TypeNotFound { name: name.into() }
    }

    pub fn out_of_memory(requested: usize) -> Self {
        Self::OutOfMemory { requested }
    }

    pub fn execution_halted<S: Into<String>>(reason: S) -> Self {
        Self::ExecutionHalted {
            reason: reason.into(),
        }
    }

    /// Initializer errors are unrecoverable: the caller should print a
    /// diagnostic and terminate rather than attempt to continue (§4.3).
    pub fn is_initializer_error(&self) -> bool {
        matches!(
            self,
            VmError::InconsistentStack { .. }
                | VmError::InvalidBranchOffset { .. }
                | VmError::InsufficientStackHeight { .. }
                | VmError::StackHasRefs { .. }
                | VmError::FieldStaticMismatch { .. }
                | VmError::UnresolvedTokenId { .. }
                | VmError::NoOverload { .. }
                | VmError::InaccessibleMember { .. }
                | VmError::TypeNotConstructible { .. }
        )
    }
}

/// Result type for VM operations.
pub type VmResult<T> = std::result::Result<T, VmError>;

impl From<std::num::ParseIntError> for VmError {
    fn from(_error: std::num::ParseIntError) -> Self {
        VmError::invalid_type("string", "integer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_message() {
        let error = VmError::parse("bad header");
        assert_eq!(error.to_string(), "parse error: bad header");
    }

    #[test]
    fn initializer_errors_are_flagged_unrecoverable() {
        assert!(VmError::InconsistentStack {
            index: 3,
            expected: 1,
            found: 2
        }
        .is_initializer_error());
        assert!(!VmError::stack_underflow(1, 0).is_initializer_error());
    }
}
