//! Module index tables, instruction decoding and function body validation.
//!
//! Binary section decoding happens elsewhere; this half of the crate starts
//! from the index-addressed [`module::Module`] tables and the raw bytes of
//! each function body.

pub mod encoding;
pub mod instruction;
pub mod module;
pub mod opcode;
pub mod reader;
pub mod validate;

pub use validate::{validate_code, validate_module, ValidationError, ValidationErrorKind};
