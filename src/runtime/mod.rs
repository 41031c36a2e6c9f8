//! WebAssembly runtime implementation
//!
//! This module provides the execution engine: threaded-code translation of
//! validated bodies, the dispatch core with its two calling conventions, the
//! register-cache ring, opcode fusion, and module instances.

pub mod config;
pub mod dispatch;
pub mod fuse;
pub mod instance;
pub mod memory;
pub mod ops;
pub mod ring;
pub mod stack;
pub mod table;
pub mod test_utils;
pub mod translate;
pub mod value;

pub use config::{CompileMode, ConfigError, ConventionKind, EngineConfig, SlotRange, StackTop};
pub use dispatch::{CallContext, CompiledFunction};
pub use instance::{BacktraceFrame, Imports, InstantiateError, Instance, Trap};
pub use memory::Memory;
pub use stack::Stack;
pub use table::Table;
pub use value::Value;

use crate::parser::module::ValueType;
use crate::parser::ValidationError;
use std::sync::{Arc, Mutex};

/// Linear memory shared by every activation of one instance.
pub type SharedMemory = Arc<Mutex<Memory>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("unreachable executed")]
    Unreachable,
    #[error("integer divide by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversion,
    #[error("out of bounds memory access: address {address}, size {size}")]
    MemoryOutOfBounds { address: u64, size: usize },
    #[error("memory error: {0}")]
    MemoryError(String),
    #[error("no memory instance")]
    NoMemory,
    #[error("memory lock poisoned")]
    LockPoisoned,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("undefined element: table index {0} out of bounds")]
    UndefinedElement(u32),
    #[error("uninitialized element {0}")]
    UninitializedElement(u32),
    #[error("indirect call type mismatch: expected {expected}, got {actual}")]
    IndirectCallTypeMismatch { expected: String, actual: String },
    #[error("element segment does not fit table: offset {offset}, length {length}, table size {size}")]
    ElementOutOfBounds { offset: u32, length: usize, size: u32 },
    #[error("unknown function: {0}")]
    UnknownFunction(u32),
    #[error("unknown module id: {0}")]
    UnknownModule(u32),
    #[error("unknown export: {0}")]
    UnknownExport(String),
    #[error("unknown import: {module}.{name}")]
    UnknownImport { module: String, name: String },
    #[error("local variable index out of bounds: {0}")]
    LocalIndexOutOfBounds(u32),
    #[error("global variable index out of bounds: {0}")]
    GlobalIndexOutOfBounds(u32),
    #[error("argument mismatch: expected {expected}, got {actual}")]
    ArgumentMismatch { expected: String, actual: String },
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: ValueType, actual: ValueType },
    #[error("invalid instruction pointer: {0}")]
    InvalidInstructionPointer(usize),
    #[error("host function failed: {0}")]
    Host(String),
    #[error("compilation failed: {0}")]
    Compile(#[from] ValidationError),
}
