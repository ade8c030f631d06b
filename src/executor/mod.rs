//! The bytecode executor (§4.4): the threaded interpreter that runs an
//! initialized overload's intermediate opcode stream.
//!
//! Dispatch is table-driven ([`jump_table`]), matching the rest of this
//! crate's table-driven style (§9, "should be table-driven since the set
//! will grow"). Each opcode family lives in its own module under
//! `jump_table/`, registering its handlers into a shared
//! [`jump_table::JumpTable`] rather than one large match statement.
//!
//! One [`Interpreter`] owns the whole call stack for a thread and runs a
//! single flat loop in [`Interpreter::run`] rather than recursing into
//! itself per call: a `call`-family handler pushes a new [`Frame`] and
//! returns [`StepOutcome::NoAdvance`], and `ret` pops the top frame and
//! either returns out of `run` (stack now empty) or pushes the result onto
//! the new top frame and keeps looping. This keeps exception unwinding and
//! try-table search working uniformly across call boundaries without
//! needing to thread a thrown [`Value`] back through a Rust `Result<_,
//! VmError>` channel, since `VmError` cannot carry an arbitrary managed
//! value (§4 Error mechanisms).

pub mod jump_table;

use crate::error::{VmError, VmResult};
use crate::frame::{CallStack, Frame, LeaveContinuation};
use crate::gc::{Gc, GcHandle, Payload};
use crate::instruction::decode_one;
use crate::types::{FieldStorage, Overload, TryBlock, TryBlockKind, TypeHandle, TypeRegistry};
use crate::value::{Reference, Value};

/// Bridges an instruction's token operand to the concrete entity it names.
/// Token resolution is the module loader's job (§6, out of scope here);
/// this trait is the seam through which the executor reaches it.
pub trait TokenResolver {
    fn resolve_type(&self, token: u32) -> VmResult<TypeHandle>;

    /// A statically-bound call site: the token already designates one
    /// specific overload (most bytecode formats resolve direct-call
    /// overloads ahead of time, at compile time); returns the declaring
    /// type and the chosen overload.
    fn resolve_call(&self, token: u32) -> VmResult<(TypeHandle, Overload)>;

    /// A dynamically-dispatched member call: the member's name and the
    /// explicit argument count the call site was compiled against
    /// (excluding the receiver), used to resolve the actual overload
    /// against the receiver's runtime type.
    fn resolve_member_call(&self, token: u32) -> VmResult<(String, usize)>;

    fn resolve_member_name(&self, token: u32) -> VmResult<String>;
    fn resolve_string(&self, token: u32) -> VmResult<String>;
    fn resolve_field(&self, token: u32) -> VmResult<(TypeHandle, FieldStorage)>;
}

/// What a handler tells the run loop to do next (§4.4).
pub enum StepOutcome {
    /// Advance the current frame's instruction pointer by this
    /// instruction's encoded size.
    Continue,
    /// Set the current frame's instruction pointer to an absolute byte
    /// offset (branches, `leave`, `endfinally`).
    Jump(usize),
    /// The instruction pointer is already correctly positioned (a call
    /// pushed a new frame, or a native call already advanced the caller).
    NoAdvance,
    Return(Value),
    Throw(Value),
    /// `endfinally` exiting a finally block that an exception unwind (not a
    /// `leave`) jumped into: control returns to `Interpreter::unwind`'s
    /// search rather than to a branch target (§4.4 Exception search).
    ResumeUnwind,
}

/// Result of running one `finally` block the exception search passed
/// through (§4.4 Exception search).
enum FinallyOutcome {
    /// The finally ran to completion; the original search continues.
    Completed,
    /// The finally threw its own exception, which a nested `unwind`
    /// already settled; the original search stops.
    Superseded,
}

pub struct Interpreter<'a> {
    pub gc: &'a mut Gc,
    pub types: &'a TypeRegistry,
    pub resolver: &'a dyn TokenResolver,
    pub list_type: TypeHandle,
    pub string_type: TypeHandle,
    /// Well-known standard-type handles (§6 "standard-type registration",
    /// "assigned to typed slots on the VM"), needed so `brtype` can
    /// type-test a primitive `Value` the same way it type-tests an
    /// `Instance` (§8 Value invariants: "for any primitive Value v, IsType(v,
    /// v.type) holds"), and so `concat` can recognize `aves.Hash` instances
    /// for its List/Hash special cases (§4.4 Concatenation operator).
    pub int_type: TypeHandle,
    pub uint_type: TypeHandle,
    pub real_type: TypeHandle,
    pub bool_type: TypeHandle,
    pub hash_type: TypeHandle,
    pub call_stack: CallStack,
    table: jump_table::JumpTable,
}

impl<'a> Interpreter<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gc: &'a mut Gc,
        types: &'a TypeRegistry,
        resolver: &'a dyn TokenResolver,
        list_type: TypeHandle,
        string_type: TypeHandle,
        int_type: TypeHandle,
        uint_type: TypeHandle,
        real_type: TypeHandle,
        bool_type: TypeHandle,
        hash_type: TypeHandle,
    ) -> Self {
        Self {
            gc,
            types,
            resolver,
            list_type,
            string_type,
            int_type,
            uint_type,
            real_type,
            bool_type,
            hash_type,
            call_stack: CallStack::new(),
            table: jump_table::JumpTable::new(),
        }
    }

    /// Invokes `overload` with `args` already in call order (including the
    /// instance, for an instance overload), running it to completion.
    pub fn invoke(&mut self, overload: &Overload, args: Vec<Value>) -> VmResult<Value> {
        if overload.is_native() {
            return self.invoke_native(overload, args);
        }
        let frame = self.build_frame(overload, args)?;
        self.call_stack.push(frame)?;
        self.run()
    }

    pub(crate) fn build_frame(&mut self, overload: &Overload, args: Vec<Value>) -> VmResult<Frame> {
        let list_type = self.list_type;
        let gc: &mut Gc = &mut *self.gc;
        let mut pack_error = None;
        let frame = Frame::enter(overload, args, |items| match pack_value_list(gc, list_type, items) {
            Ok(v) => v,
            Err(e) => {
                pack_error = Some(e);
                Value::Null
            }
        });
        if let Some(e) = pack_error {
            return Err(e);
        }
        Ok(frame)
    }

    /// Pushes a callee frame for `overload` onto the current call stack
    /// without running it; used by the invocation and object-creation
    /// handlers, which return [`StepOutcome::NoAdvance`] afterwards so the
    /// shared `run` loop picks the new frame up on its next iteration
    /// (§4.4 Invocation).
    pub(crate) fn push_call(&mut self, overload: &Overload, args: Vec<Value>, ctor_instance: Option<Value>) -> VmResult<()> {
        let mut frame = self.build_frame(overload, args)?;
        frame.ctor_instance = ctor_instance;
        self.call_stack.push(frame)
    }

    /// Dispatches a resolved call: native overloads run to completion
    /// in-line and the run loop advances past the call instruction as
    /// usual ([`StepOutcome::Continue`]); managed overloads push a callee
    /// frame for the shared `run` loop to pick up, after first advancing
    /// the caller's instruction pointer past the call itself (`call_size`)
    /// since the caller frame will not be current again until the callee
    /// returns (§4.4 Invocation).
    pub(crate) fn dispatch_call(
        &mut self,
        overload: &Overload,
        args: Vec<Value>,
        ctor_instance: Option<Value>,
        call_size: usize,
    ) -> VmResult<StepOutcome> {
        if overload.is_native() {
            let result = self.invoke_native(overload, args)?;
            let result = ctor_instance.unwrap_or(result);
            self.call_stack.current_mut().expect("no active frame").push(result);
            Ok(StepOutcome::Continue)
        } else {
            let caller = self.call_stack.current_mut().expect("no active frame");
            let call_start = caller.instruction_pointer;
            let discard = caller.overload.discard_outputs.contains(&call_start);
            caller.instruction_pointer += call_size;
            self.push_call(overload, args, ctor_instance)?;
            self.call_stack.current_mut().expect("no active frame").discard_return = discard;
            Ok(StepOutcome::NoAdvance)
        }
    }

    fn invoke_native(&mut self, overload: &Overload, mut args: Vec<Value>) -> VmResult<Value> {
        let native = overload
            .native
            .ok_or_else(|| VmError::invalid_operation_msg("native overload missing its function pointer"))?;
        match native(&mut args) {
            crate::error::StatusCode::Success => Ok(args.into_iter().next().unwrap_or(Value::Null)),
            crate::error::StatusCode::ErrorDivideByZero => Err(VmError::division_by_zero("native call")),
            crate::error::StatusCode::ErrorOverflow => Err(VmError::overflow("native call")),
            crate::error::StatusCode::ErrorNoMemory => Err(VmError::out_of_memory(0)),
            crate::error::StatusCode::ErrorThrown => {
                Err(VmError::execution_halted("native function left an error in flight"))
            }
        }
    }

    /// Runs the current call stack to completion: loops until the frame
    /// pushed by the caller of `run` itself returns or an unhandled
    /// exception propagates out.
    fn run(&mut self) -> VmResult<Value> {
        let base_depth = self.call_stack.depth() - 1;
        loop {
            let instruction = {
                let overload = self.current_overload();
                let frame = self.call_stack.current().expect("no active frame");
                decode_one(&overload.body, frame.instruction_pointer)?
            };
            let handler = self
                .table
                .get(instruction.opcode)
                .ok_or_else(|| VmError::invalid_instruction(instruction.opcode as u8, "no handler registered"))?;
            let start = self.call_stack.current().expect("no active frame").instruction_pointer;
            match handler(self, &instruction)? {
                StepOutcome::Continue => {
                    let frame = self.call_stack.current_mut().expect("no active frame");
                    frame.instruction_pointer += instruction.original_size;
                    if frame.overload.discard_outputs.contains(&start) {
                        frame.pop()?;
                    }
                }
                StepOutcome::Jump(target) => {
                    self.call_stack.current_mut().expect("no active frame").instruction_pointer = target;
                }
                StepOutcome::NoAdvance => {}
                StepOutcome::Return(value) => {
                    let popped = self.call_stack.pop().expect("no active frame");
                    let discard_return = popped.discard_return;
                    let value = popped.ctor_instance.unwrap_or(value);
                    if self.call_stack.depth() == base_depth {
                        return Ok(value);
                    }
                    if !discard_return {
                        self.call_stack.current_mut().expect("no active frame").push(value);
                    }
                }
                StepOutcome::Throw(error) => {
                    self.unwind(error, base_depth)?;
                }
                StepOutcome::ResumeUnwind => {
                    return Err(VmError::invalid_operand_msg("endfinally resumed an unwind outside of one"));
                }
            }
        }
    }

    fn current_overload(&self) -> &Overload {
        &self.call_stack.current().expect("no active frame").overload
    }

    /// Walks the call stack from the current frame down to `base_depth`
    /// looking for a catch block whose protected range contains the
    /// throwing instruction and whose type matches. Any `finally` block the
    /// search passes through on the way is run to completion first (§4.4
    /// Exception search: "If it's a finally, run the finally body to
    /// completion... If the finally exits normally, continue searching
    /// enclosing try blocks").
    fn unwind(&mut self, error: Value, base_depth: usize) -> VmResult<()> {
        loop {
            if self.call_stack.depth() <= base_depth {
                return Err(self.unhandled_error(&error));
            }
            let search_ip = self.call_stack.current().expect("checked above").instruction_pointer;
            let mut min_width = 0usize;
            let found = loop {
                let step = {
                    let overload = self.current_overload();
                    find_search_step(overload, search_ip, min_width, &error, self.types)
                };
                match step {
                    SearchStep::Catch(handler) => break Some(handler),
                    SearchStep::Finally { handler, width } => match self.run_finally_for_unwind(handler)? {
                        FinallyOutcome::Completed => min_width = width,
                        FinallyOutcome::Superseded => return Ok(()),
                    },
                    SearchStep::Done => break None,
                }
            };
            if let Some(handler) = found {
                let frame = self.call_stack.current_mut().expect("checked above");
                frame.instruction_pointer = handler;
                frame.current_exception = Some(error);
                frame.push(error);
                return Ok(());
            }
            self.call_stack.pop();
        }
    }

    /// Drives the current frame through a `finally` block the exception
    /// search is passing through, starting at `handler`, until the matching
    /// `endfinally` hands control back (§4.4 Exception search). A thrown
    /// exception inside the finally itself supersedes the one being
    /// searched for: it runs its own full `unwind`, and the original
    /// search stops rather than resuming once that settles.
    fn run_finally_for_unwind(&mut self, handler: usize) -> VmResult<FinallyOutcome> {
        let base_depth = self.call_stack.depth() - 1;
        {
            let frame = self.call_stack.current_mut().expect("no active frame");
            frame.instruction_pointer = handler;
            frame.pending_leave_targets.push(LeaveContinuation::ResumeUnwind);
        }
        loop {
            let instruction = {
                let overload = self.current_overload();
                let frame = self.call_stack.current().expect("no active frame");
                decode_one(&overload.body, frame.instruction_pointer)?
            };
            let handler_fn = self
                .table
                .get(instruction.opcode)
                .ok_or_else(|| VmError::invalid_instruction(instruction.opcode as u8, "no handler registered"))?;
            let start = self.call_stack.current().expect("no active frame").instruction_pointer;
            match handler_fn(self, &instruction)? {
                StepOutcome::Continue => {
                    let frame = self.call_stack.current_mut().expect("no active frame");
                    frame.instruction_pointer += instruction.original_size;
                    if frame.overload.discard_outputs.contains(&start) {
                        frame.pop()?;
                    }
                }
                StepOutcome::Jump(target) => {
                    self.call_stack.current_mut().expect("no active frame").instruction_pointer = target;
                }
                StepOutcome::NoAdvance => {}
                StepOutcome::ResumeUnwind => return Ok(FinallyOutcome::Completed),
                StepOutcome::Return(value) => {
                    let popped = self.call_stack.pop().expect("no active frame");
                    let discard_return = popped.discard_return;
                    let value = popped.ctor_instance.unwrap_or(value);
                    if self.call_stack.depth() == base_depth {
                        return Err(VmError::invalid_operand_msg("a finally block returned out of its own method"));
                    }
                    if !discard_return {
                        self.call_stack.current_mut().expect("no active frame").push(value);
                    }
                }
                StepOutcome::Throw(error) => {
                    self.unwind(error, base_depth)?;
                    return Ok(FinallyOutcome::Superseded);
                }
            }
        }
    }

    fn unhandled_error(&self, error: &Value) -> VmError {
        match error {
            Value::Instance { type_handle, .. } => VmError::UnhandledError {
                type_name: self.types.get(*type_handle).full_name.clone(),
                message: String::new(),
            },
            _ => VmError::UnhandledError {
                type_name: "?".to_string(),
                message: "a non-instance value was thrown".to_string(),
            },
        }
    }

    /// Dereferences `value` if it is a by-reference value; most opcodes
    /// read through a reference transparently. Only `callr`/`callmemr`
    /// accept a raw [`Value::Reference`] operand (§4.3 `accepts_ref`).
    pub fn read_operand(&self, value: Value) -> VmResult<Value> {
        match value {
            Value::Reference(r) => self.resolve_reference(r),
            other => Ok(other),
        }
    }

    pub fn resolve_reference(&self, reference: Reference) -> VmResult<Value> {
        match reference {
            Reference::Local { frame_depth, slot } => {
                let depth = self.call_stack.depth();
                let index = depth
                    .checked_sub(1 + frame_depth as usize)
                    .ok_or_else(|| VmError::invalid_operand_msg("reference to a frame beyond the call stack"))?;
                let frame = self
                    .call_stack
                    .frame_at(index)
                    .ok_or_else(|| VmError::invalid_operand_msg("reference to a nonexistent frame"))?;
                match decode_slot(slot) {
                    Slot::Local(i) => frame.load_local(i),
                    Slot::Argument(i) => frame.load_argument(i),
                }
            }
            Reference::Static(id) => Ok(self.gc.static_refs.read(id)),
            Reference::Field { object, offset } => read_field(self.gc, object, offset),
        }
    }

    pub fn store_through(&mut self, reference: Reference, value: Value) -> VmResult<()> {
        match reference {
            Reference::Local { frame_depth, slot } => {
                let depth = self.call_stack.depth();
                let index = depth
                    .checked_sub(1 + frame_depth as usize)
                    .ok_or_else(|| VmError::invalid_operand_msg("reference to a frame beyond the call stack"))?;
                let frame = self
                    .call_stack
                    .frame_at_mut(index)
                    .ok_or_else(|| VmError::invalid_operand_msg("reference to a nonexistent frame"))?;
                match decode_slot(slot) {
                    Slot::Local(i) => frame.store_local(i, value),
                    Slot::Argument(i) => frame.store_argument(i, value),
                }
            }
            Reference::Static(id) => {
                self.gc.static_refs.write(id, value);
                Ok(())
            }
            Reference::Field { object, offset } => write_field(self.gc, object, offset, value),
        }
    }
}

/// A [`Reference::Local`] slot, disambiguated by sign: matches
/// [`crate::instruction::Operand::FrameOffset`]'s convention that
/// arguments are addressed by negative indices, locals by non-negative
/// ones.
enum Slot {
    Local(usize),
    Argument(usize),
}

fn decode_slot(slot: u32) -> Slot {
    let signed = slot as i32;
    if signed < 0 {
        Slot::Argument((-(signed + 1)) as usize)
    } else {
        Slot::Local(signed as usize)
    }
}

fn encode_local_slot(index: u32) -> u32 {
    index
}

fn encode_argument_slot(index: u32) -> u32 {
    (-((index as i32) + 1)) as u32
}

pub(crate) fn read_field(gc: &Gc, object: GcHandle, offset: usize) -> VmResult<Value> {
    match &gc.get(object).payload {
        Payload::Fields(fields) => {
            let fields = fields.lock().expect("object field lock poisoned");
            fields
                .get(offset)
                .copied()
                .ok_or_else(|| VmError::invalid_operand_msg("field offset out of range"))
        }
        Payload::Native(_) => Err(VmError::invalid_operand_msg("cannot read a managed field from native storage")),
    }
}

pub(crate) fn write_field(gc: &mut Gc, object: GcHandle, offset: usize, value: Value) -> VmResult<()> {
    match &gc.get(object).payload {
        Payload::Fields(fields) => {
            let mut fields = fields.lock().expect("object field lock poisoned");
            *fields
                .get_mut(offset)
                .ok_or_else(|| VmError::invalid_operand_msg("field offset out of range"))? = value;
            Ok(())
        }
        Payload::Native(_) => Err(VmError::invalid_operand_msg("cannot write a managed field into native storage")),
    }
}

/// Decodes a managed string object's UTF-16LE backing bytes back into a
/// Rust `String` (§4.1 String object: content is stored as `Payload::Native`
/// bytes, not a `Payload::Fields` array, since it is never walked field by
/// field by the collector).
pub(crate) fn read_string(gc: &Gc, handle: GcHandle) -> VmResult<String> {
    match &gc.get(handle).payload {
        Payload::Native(bytes) => {
            let bytes = bytes.lock().expect("object field lock poisoned");
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16(&units).map_err(|_| VmError::invalid_type("utf-16 bytes", "string"))
        }
        Payload::Fields(_) => Err(VmError::invalid_type("native string storage", "field array")),
    }
}

pub(crate) fn pack_value_list(gc: &mut Gc, list_type: TypeHandle, items: Vec<Value>) -> VmResult<Value> {
    let handle = gc.alloc_value_array(list_type, items.len())?;
    if let Payload::Fields(fields) = &gc.get(handle).payload {
        let mut fields = fields.lock().expect("object field lock poisoned");
        for (index, item) in items.into_iter().enumerate() {
            fields[index] = item;
        }
    }
    Ok(Value::Instance {
        type_handle: list_type,
        object: handle,
    })
}

/// Reads out a List's own stored elements, in order (§4.4 Invocation,
/// `apply`/`sapply`: "copy the list's own internal element array"; §4.4
/// Concatenation operator: "two Lists concatenate into a new List").
pub(crate) fn read_value_list(gc: &Gc, object: GcHandle) -> VmResult<Vec<Value>> {
    match &gc.get(object).payload {
        Payload::Fields(fields) => Ok(fields.lock().expect("object field lock poisoned").clone()),
        Payload::Native(_) => Err(VmError::invalid_type("list storage", "native storage")),
    }
}

/// Reads a Hash's own stored entries as `(key, value)` pairs, stored
/// interleaved the same way `pack_hash_pairs` lays them out.
pub(crate) fn read_hash_pairs(gc: &Gc, object: GcHandle) -> VmResult<Vec<(Value, Value)>> {
    match &gc.get(object).payload {
        Payload::Fields(fields) => {
            let fields = fields.lock().expect("object field lock poisoned");
            Ok(fields.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect())
        }
        Payload::Native(_) => Err(VmError::invalid_type("hash storage", "native storage")),
    }
}

/// Builds a new Hash instance from `pairs`, the way `pack_value_list` builds
/// a List: a `Value` array backing store, laid out as interleaved key/value
/// slots (§4.4 Concatenation operator, "two Hashes concatenate via repeated
/// indexer-set").
pub(crate) fn pack_hash_pairs(gc: &mut Gc, hash_type: TypeHandle, pairs: Vec<(Value, Value)>) -> VmResult<Value> {
    let handle = gc.alloc_value_array(hash_type, pairs.len() * 2)?;
    if let Payload::Fields(fields) = &gc.get(handle).payload {
        let mut fields = fields.lock().expect("object field lock poisoned");
        for (index, (key, value)) in pairs.into_iter().enumerate() {
            fields[index * 2] = key;
            fields[index * 2 + 1] = value;
        }
    }
    Ok(Value::Instance {
        type_handle: hash_type,
        object: handle,
    })
}

/// Sets `key` to `value` in `pairs`, overwriting an existing entry for an
/// equal key rather than appending a duplicate (§4.4 Concatenation
/// operator, "indexer-set").
pub(crate) fn hash_indexer_set(vm: &mut Interpreter, pairs: &mut Vec<(Value, Value)>, key: Value, value: Value) -> VmResult<()> {
    for entry in pairs.iter_mut() {
        if value_equals(vm, entry.0, key)? {
            entry.1 = value;
            return Ok(());
        }
    }
    pairs.push((key, value));
    Ok(())
}

/// Coerces a primitive `Value` to its canonical string representation (§4.4
/// Concatenation operator, "otherwise, both sides are coerced to String").
/// Instances are not handled here: they concatenate through their own
/// `Concat` overload, or are rejected, before this helper is reached.
pub(crate) fn value_to_display_string(value: Value) -> VmResult<String> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Int(n) => Ok(n.to_string()),
        Value::UInt(n) => Ok(n.to_string()),
        Value::Real(n) => Ok(n.to_string()),
        Value::Instance { .. } | Value::Reference(_) => {
            Err(VmError::invalid_type("primitive value", "instance or reference"))
        }
    }
}

/// One step of the exception search at a single frame (§4.4 Exception
/// search).
enum SearchStep {
    /// A matching catch handler was found; jump straight there.
    Catch(usize),
    /// The tightest unvisited enclosing try block is a finally; run it,
    /// then resume the search considering only blocks wider than `width`.
    Finally { handler: usize, width: usize },
    /// No enclosing try block left to consider at this frame; pop it.
    Done,
}

/// Finds the tightest try block enclosing `ip` that is wider than
/// `min_width` (i.e. not yet visited by an earlier step of the same
/// search), skipping past non-matching catch blocks one nesting level at a
/// time so every intervening `finally` is still visited in order (§4.4
/// Exception search).
fn find_search_step(overload: &Overload, ip: usize, min_width: usize, error: &Value, types: &TypeRegistry) -> SearchStep {
    let mut min_width = min_width;
    loop {
        let tightest = overload
            .try_blocks
            .iter()
            .filter(|b| ip >= b.start && ip < b.end && (b.end - b.start) > min_width)
            .min_by_key(|b| b.end - b.start);
        let Some(block) = tightest else {
            return SearchStep::Done;
        };
        let width = block.end - block.start;
        match &block.kind {
            TryBlockKind::Finally => return SearchStep::Finally { handler: block.handler, width },
            TryBlockKind::Catch { catch_type } => {
                let matches = match catch_type {
                    None => true,
                    Some(t) => match error {
                        Value::Instance { type_handle, .. } => types.is_type(*type_handle, *t),
                        _ => false,
                    },
                };
                if matches {
                    return SearchStep::Catch(block.handler);
                }
                min_width = width;
            }
        }
    }
}

/// Finds the innermost `finally` block protecting `ip`, for `leave` to jump
/// through on its way to its branch target (§4.4 References).
pub(crate) fn find_innermost_finally(overload: &Overload, ip: usize) -> Option<&TryBlock> {
    overload
        .try_blocks
        .iter()
        .filter(|b| matches!(b.kind, TryBlockKind::Finally) && ip >= b.start && ip < b.end)
        .min_by_key(|b| b.end - b.start)
}

/// Dispatches an operator to an instance's overload table (§3 Type,
/// `operators`): looks up the single-argument overload registered for
/// `operator` and invokes it with `args` (receiver first).
pub(crate) fn dispatch_operator_method(
    vm: &mut Interpreter,
    type_handle: TypeHandle,
    operator: crate::types::Operator,
    args: Vec<Value>,
) -> VmResult<Value> {
    let method = vm.types.get(type_handle).operators[operator as usize]
        .clone()
        .ok_or_else(|| VmError::no_overload(format!("operator {:?}", operator), args.len()))?;
    let overload = method
        .resolve_overload(args.len())
        .cloned()
        .ok_or_else(|| VmError::no_overload(format!("operator {:?}", operator), args.len()))?;
    vm.invoke(&overload, args)
}

/// Value equality (§4.4 `eq`): primitives compare by value, instances
/// dispatch to their `Equals` operator overload if one is registered and
/// fall back to identity otherwise.
pub(crate) fn value_equals(vm: &mut Interpreter, a: Value, b: Value) -> VmResult<bool> {
    match (a, b) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::Int(x), Value::Int(y)) => Ok(x == y),
        (Value::UInt(x), Value::UInt(y)) => Ok(x == y),
        (Value::Real(x), Value::Real(y)) => Ok(x == y),
        (Value::Instance { type_handle, .. }, _) if vm.types.get(type_handle).operators[crate::types::Operator::Equals as usize].is_some() => {
            let result = dispatch_operator_method(vm, type_handle, crate::types::Operator::Equals, vec![a, b])?;
            Ok(result.is_true())
        }
        _ => Ok(a.is_same_reference(&b)),
    }
}

/// Three-way comparison (§4.4 `cmp`, and the fused `br{eq,lt,gt,...}`
/// opcodes the peephole pass folds `cmp`/`eq` into): primitives compare
/// numerically, instances dispatch to their `Compare` operator overload.
pub(crate) fn value_compare(vm: &mut Interpreter, a: Value, b: Value) -> VmResult<i64> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok((x > y) as i64 - (x < y) as i64),
        (Value::UInt(x), Value::UInt(y)) => Ok((x > y) as i64 - (x < y) as i64),
        (Value::Real(x), Value::Real(y)) => x
            .partial_cmp(&y)
            .map(|o| o as i64)
            .ok_or_else(|| VmError::invalid_operation_msg("cannot compare NaN")),
        (Value::Instance { type_handle, .. }, _) => {
            let result = dispatch_operator_method(vm, type_handle, crate::types::Operator::Compare, vec![a, b])?;
            match result {
                Value::Int(n) => Ok(n),
                _ => Err(VmError::invalid_type("int", "compare operator result")),
            }
        }
        _ => Err(VmError::invalid_operation_msg("values are not comparable")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_and_argument_slots_round_trip_through_sign() {
        assert!(matches!(decode_slot(encode_local_slot(3)), Slot::Local(3)));
        assert!(matches!(decode_slot(encode_argument_slot(0)), Slot::Argument(0)));
        assert!(matches!(decode_slot(encode_argument_slot(2)), Slot::Argument(2)));
    }
}
