//! # Ovum
//!
//! Ovum is the bytecode virtual machine for the Osprey language: a
//! stack-based interpreter over an intermediate opcode representation,
//! a generational garbage collector, and a one-shot method initializer
//! that rewrites on-disk bytecode into the intermediate form the
//! interpreter actually runs.
//!
//! ## Architecture
//!
//! - [`value`] / [`types`] — the tagged `Value` word and type metadata
//!   (members, operators, static-constructor state) that everything
//!   else is built on.
//! - [`gc`] — the two-generation mark/move collector: gen-0 bump
//!   allocation, gen-1 survivors, a large-object heap, pinning,
//!   interned strings, and static-reference blocks.
//! - [`initializer`] — converts a method overload's raw bytecode into
//!   the optimized intermediate stream the executor runs, inferring
//!   stack heights across branches and folding comparison/branch pairs.
//! - [`executor`] — the dispatch loop: frame push, operator dispatch,
//!   invocation, and exception search.
//! - [`instruction`] / [`opcode`] — the decoded instruction stream and
//!   opcode table shared by the initializer and executor.
//! - [`refsig`] — the by-reference parameter bitmap used by both the
//!   initializer (to verify call sites) and the executor (to build
//!   `Reference` values).
//! - [`frame`] — stack frames and the call stack.
//! - [`module_ref`] — tokens and the module-loader boundary (§6); the
//!   module file parser itself is an external collaborator.
//! - [`concurrency`] — the managed/unmanaged thread-region contract the
//!   GC's cooperative suspension relies on.
//! - [`error`] — the `VmError`/`VmResult` types shared across the crate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ovum::error::VmResult;
//!
//! # fn example() -> VmResult<()> {
//! // A module loader, type registry and GC are assembled by the host;
//! // this crate provides the interpreter that runs on top of them.
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

extern crate std;

/// Thread cooperation with the garbage collector (managed/unmanaged regions).
pub mod concurrency;
/// VM error types and result handling.
pub mod error;
/// The bytecode dispatch loop: frames, invocation, operator dispatch, exceptions.
pub mod executor;
/// Stack frames and the call stack.
pub mod frame;
/// The generational garbage collector.
pub mod gc;
/// The one-shot bytecode-to-intermediate-opcode rewriter.
pub mod initializer;
/// The decoded instruction stream.
pub mod instruction;
/// Module tokens and the module-loader boundary.
pub mod module_ref;
/// VM opcode definitions.
pub mod opcode;
/// By-reference parameter signatures.
pub mod refsig;
/// Type descriptors, members, and operator tables.
pub mod types;
/// The tagged runtime value.
pub mod value;

pub use concurrency::{ManagedGuard, ThreadRegion};
pub use error::{StatusCode, VmError, VmResult};
pub use executor::{Interpreter, StepOutcome, TokenResolver};
pub use frame::{CallStack, Frame};
pub use gc::Gc;
pub use initializer::initialize;
pub use instruction::{Instruction, Operand};
pub use module_ref::{ModuleHandle, ModuleLoader, Token, TokenKind};
pub use opcode::OpCode;
pub use refsig::ReferenceSignature;
pub use types::{Member, Method, Overload, TypeHandle, TypeRegistry};
pub use value::{Reference, Value};
