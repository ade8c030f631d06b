//! Stack frames and the call stack (§3 Stack frame, Call stack).
//!
//! The source lays out a frame as one contiguous region: the caller's
//! trailing evaluation-stack slots become the callee's arguments, followed
//! by a small frame header, then locals, then the callee's own evaluation
//! stack. We keep the logical grouping (arguments / locals / evaluation
//! stack) but store each as its own `Vec<Value>` rather than packing them
//! into one buffer — the offset arithmetic the source needs to recover
//! "caller's top of stack is our first argument" is replaced by simply
//! moving the `Vec` contents across the call boundary.

use crate::error::{VmError, VmResult};
use crate::types::{Overload, TypeHandle};
use crate::value::Value;

/// Fixed call-stack budget per thread (§3 Call stack). The source backs
/// this with a guard page and lets overflow fault in hardware; we check it
/// explicitly on every push since we have no equivalent guard page here.
pub const MAX_CALL_DEPTH: usize = 4096;

/// What `endfinally` should do once it pops a frame's pending continuation
/// (§4.4 References, §4.4 Exception search).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveContinuation {
    /// Entered via `leave`: jump to the original target once clear of every
    /// enclosing finally.
    Branch(usize),
    /// Entered while `Interpreter::unwind` was searching for a handler:
    /// resume that search rather than jump anywhere.
    ResumeUnwind,
}

/// One activation record (§3 Stack frame).
pub struct Frame {
    pub arguments: Vec<Value>,
    pub locals: Vec<Value>,
    pub eval_stack: Vec<Value>,
    /// Byte offset into `overload.body` of the next instruction to execute.
    pub instruction_pointer: usize,
    /// Number of arguments the caller actually supplied, before optional
    /// padding or variadic packing (§4.4 `ldargc`: this, not
    /// `arguments.len()`, is what a variadic method needs to recover how
    /// many trailing values it was called with).
    pub actual_arg_count: usize,
    /// Owned rather than borrowed: calls resolved dynamically through
    /// [`crate::executor::TokenResolver`] hand back a freshly cloned
    /// `Overload`, which would otherwise not outlive the handler that
    /// resolved it (§4.4 Invocation).
    pub overload: Overload,
    /// Try-block nesting the interpreter is currently inside, innermost
    /// last; consulted by `leave` to find enclosing finally blocks and by
    /// exception search to find a handler (§4.4).
    pub try_depth: usize,
    /// Continuations pending a matching `endfinally`, innermost last: a
    /// `leave` branch target, or a signal to resume an exception unwind's
    /// search once this finally (entered by the search, not by `leave`)
    /// exits normally (§4.4 References / try-finally interaction, §4.4
    /// Exception search).
    pub pending_leave_targets: Vec<LeaveContinuation>,
    /// The error currently being handled, set when the search in
    /// `Interpreter::unwind` lands on a catch block in this frame;
    /// `rethrow` reads this rather than the evaluation stack, since the
    /// catch handler's own bytecode is free to pop the error into a local
    /// before reaching a `rethrow` (§4.4 Exceptions).
    pub current_exception: Option<Value>,
    /// Set for a frame entered through `newobj`: the constructor's own
    /// return value is discarded and this instance is pushed onto the
    /// caller's stack instead (§4.4 Object creation).
    pub ctor_instance: Option<Value>,
    /// Set when the call site that pushed this frame was itself the
    /// producer half of a folded `producer; pop` pair (§4.3 Removal pass):
    /// the value this call eventually returns is popped right back off
    /// instead of being pushed onto the caller's stack.
    pub discard_return: bool,
}

impl Frame {
    /// Builds a callee frame from the arguments the caller has already
    /// prepared: missing optional parameters are padded with null, and a
    /// variadic overload's trailing (or leading) arguments are packed into
    /// a single List argument (§4.4 Frame push).
    pub fn enter(
        overload: &Overload,
        mut args: Vec<Value>,
        pack_list: impl FnOnce(Vec<Value>) -> Value,
    ) -> Self {
        let actual_arg_count = args.len();
        let declared = overload.param_count as usize;
        if overload.is_variadic() {
            let fixed = declared - 1;
            let packed_from = if overload.flags.contains(crate::types::OverloadFlags::VAR_START) {
                0
            } else {
                fixed.min(args.len())
            };
            let variadic_args: Vec<Value> = args.split_off(packed_from.min(args.len()));
            args.truncate(fixed);
            while args.len() < fixed {
                args.push(Value::Null);
            }
            if packed_from == 0 {
                args.insert(0, pack_list(variadic_args));
            } else {
                args.push(pack_list(variadic_args));
            }
        } else {
            while args.len() < declared {
                args.push(Value::Null);
            }
        }

        Self {
            arguments: args,
            locals: vec![Value::Null; overload.local_count as usize],
            eval_stack: Vec::with_capacity(overload.max_stack as usize),
            instruction_pointer: 0,
            actual_arg_count,
            overload: overload.clone(),
            try_depth: 0,
            pending_leave_targets: Vec::new(),
            current_exception: None,
            ctor_instance: None,
            discard_return: false,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.eval_stack.push(value);
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.eval_stack
            .pop()
            .ok_or_else(|| VmError::stack_underflow(1, 0))
    }

    pub fn peek(&self) -> VmResult<&Value> {
        self.eval_stack
            .last()
            .ok_or_else(|| VmError::stack_underflow(1, 0))
    }

    pub fn load_local(&self, index: usize) -> VmResult<Value> {
        self.locals
            .get(index)
            .copied()
            .ok_or_else(|| VmError::invalid_operand_msg(format!("no such local {index}")))
    }

    pub fn store_local(&mut self, index: usize, value: Value) -> VmResult<()> {
        *self
            .locals
            .get_mut(index)
            .ok_or_else(|| VmError::invalid_operand_msg(format!("no such local {index}")))? = value;
        Ok(())
    }

    pub fn load_argument(&self, index: usize) -> VmResult<Value> {
        self.arguments
            .get(index)
            .copied()
            .ok_or_else(|| VmError::invalid_operand_msg(format!("no such argument {index}")))
    }

    pub fn store_argument(&mut self, index: usize, value: Value) -> VmResult<()> {
        *self
            .arguments
            .get_mut(index)
            .ok_or_else(|| VmError::invalid_operand_msg(format!("no such argument {index}")))? = value;
        Ok(())
    }
}

/// A thread's call stack: a bounded sequence of [`Frame`]s.
#[derive(Default)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn push(&mut self, frame: Frame) -> VmResult<()> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(VmError::call_stack_overflow(self.frames.len(), MAX_CALL_DEPTH));
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Indexed access to a frame below the top, used to resolve a
    /// `Reference::Local` whose `frame_depth` names an outer frame.
    pub fn frame_at(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn frame_at_mut(&mut self, index: usize) -> Option<&mut Frame> {
        self.frames.get_mut(index)
    }
}

/// Renders a stack trace by walking the frame chain current-to-root,
/// emitting each managed frame's method name, parenthesized actual
/// parameter types, and (if debug symbols resolve the instruction pointer)
/// a source location (§4.4 Stack trace).
pub fn render_stack_trace(
    stack: &CallStack,
    method_name: impl Fn(&Frame) -> String,
    source_location: impl Fn(&Frame) -> Option<String>,
) -> String {
    let mut lines = Vec::with_capacity(stack.depth());
    for frame in stack.frames().iter().rev() {
        let mut line = method_name(frame);
        if let Some(location) = source_location(frame) {
            line.push_str(" (");
            line.push_str(&location);
            line.push(')');
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refsig::ReferenceSignature;
    use crate::types::OverloadFlags;

    fn overload(param_count: u16, optional: u16, variadic: bool, var_start: bool) -> Overload {
        let mut flags = OverloadFlags::empty();
        if variadic {
            flags.insert(OverloadFlags::VARIADIC);
        }
        if var_start {
            flags.insert(OverloadFlags::VAR_START);
        }
        Overload {
            param_count,
            optional_param_count: optional,
            local_count: 0,
            max_stack: 4,
            flags,
            param_names: Vec::new(),
            ref_signature: ReferenceSignature::none(),
            try_blocks: Vec::new(),
            body: Vec::new(),
            native: None,
            discard_outputs: std::collections::HashSet::new(),
        }
    }

    #[test]
    fn missing_optional_arguments_become_null() {
        let o = overload(3, 2, false, false);
        let frame = Frame::enter(&o, vec![Value::Int(1)], |v| Value::Int(v.len() as i64));
        assert_eq!(frame.arguments.len(), 3);
        assert_eq!(frame.arguments[1], Value::Null);
        assert_eq!(frame.arguments[2], Value::Null);
    }

    #[test]
    fn variadic_packs_trailing_args_into_one_value() {
        // Overload(this, xs...) -> 2 declared params, 1 fixed (this).
        let o = overload(2, 0, true, false);
        let frame = Frame::enter(
            &o,
            vec![Value::Int(0), Value::Int(1), Value::Int(2), Value::Int(3)],
            |v| Value::Int(v.len() as i64),
        );
        assert_eq!(frame.arguments.len(), 2);
        assert_eq!(frame.arguments[1], Value::Int(3));
    }

    #[test]
    fn call_stack_enforces_max_depth() {
        let mut stack = CallStack::new();
        let o = overload(0, 0, false, false);
        for _ in 0..MAX_CALL_DEPTH {
            stack.push(Frame::enter(&o, Vec::new(), |v| Value::Int(v.len() as i64))).unwrap();
        }
        assert!(stack.push(Frame::enter(&o, Vec::new(), |v| Value::Int(v.len() as i64))).is_err());
    }

    #[test]
    fn frame_at_reaches_an_outer_frame() {
        let mut stack = CallStack::new();
        let o = overload(0, 0, false, false);
        stack.push(Frame::enter(&o, Vec::new(), |v| Value::Int(v.len() as i64))).unwrap();
        stack.push(Frame::enter(&o, Vec::new(), |v| Value::Int(v.len() as i64))).unwrap();
        assert!(stack.frame_at(0).is_some());
        assert!(stack.frame_at(1).is_some());
        assert!(stack.frame_at(2).is_none());
    }
}
