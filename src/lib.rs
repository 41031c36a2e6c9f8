//! A WebAssembly 1.0 validator and threaded-code interpreter.
//!
//! ringvm takes a module's index tables (types, imports, functions, code),
//! validates every function body against the MVP type system, translates
//! validated bodies into threaded code, and runs that code through a
//! dispatch core that transfers control directly from handler to handler.
//!
//! # Modules
//!
//! - [`parser`] -- Module index tables, the checked code reader, instruction
//!   decoding, a small code assembler and the validator.
//! - [`runtime`] -- Values, linear memory, tables, the dispatch core with its
//!   two calling conventions, the register-cache ring, opcode fusion and
//!   module instances.
//!
//! # Example
//!
//! Assemble a function, instantiate its module and call the export:
//!
//! ```
//! use ringvm::parser::encoding::CodeBuilder;
//! use ringvm::parser::module::{ExportIndex, FunctionType, Locals, Module, ValueType};
//! use ringvm::parser::opcode::Opcode;
//! use ringvm::runtime::{EngineConfig, Imports, Instance, Value};
//!
//! let mut module = Module::new("demo");
//! let add = module.add_function(
//!     FunctionType::new(&[ValueType::I32, ValueType::I32], &[ValueType::I32]),
//!     Locals::empty(),
//!     CodeBuilder::new().local_get(0).local_get(1).op(Opcode::I32Add).end().build(),
//! );
//! module.add_export("add", ExportIndex::Function(add));
//!
//! let mut instance = Instance::new(module, EngineConfig::default(), Imports::new()).unwrap();
//! let results = instance.invoke("add", &[Value::I32(2), Value::I32(3)]).unwrap();
//! assert_eq!(results, vec![Value::I32(5)]);
//! ```

pub mod parser;
pub mod runtime;
