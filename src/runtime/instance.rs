//! WebAssembly module instance
//!
//! An instance owns a module together with its runtime state: globals, the
//! linear memory, the funcref table, host functions bound to its imports and
//! the translated code of its functions. It is the [`CallContext`] every
//! activation of the module runs against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::unsync::OnceCell;
use thiserror::Error;
use tracing::{debug, warn};

use super::config::{CompileMode, ConfigError, EngineConfig};
use super::dispatch::{run, Activation, Call, CallContext, CompiledFunction};
use super::stack::Stack;
use super::table::Table;
use super::translate;
use super::{Memory, RuntimeError, SharedMemory, Value};
use crate::parser::module::{ConstExpr, ExternalKind, FunctionType, Module, ValueType};
use crate::parser::{validate_code, ValidationError};

static NEXT_MODULE_ID: AtomicU32 = AtomicU32::new(1);

/// A host function bound to a function import
pub type HostFunction = Box<dyn Fn(&[Value]) -> Result<Vec<Value>, RuntimeError> + Send + Sync>;

/// Values supplied for a module's imports, keyed by (module, name).
#[derive(Default)]
pub struct Imports {
    functions: HashMap<(String, String), HostFunction>,
    globals: HashMap<(String, String), Value>,
}

impl Imports {
    pub fn new() -> Self {
        Imports::default()
    }

    pub fn with_function<F>(mut self, module: &str, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, RuntimeError> + Send + Sync + 'static,
    {
        self.functions.insert((module.to_string(), name.to_string()), Box::new(f));
        self
    }

    pub fn with_global(mut self, module: &str, name: &str, value: Value) -> Self {
        self.globals.insert((module.to_string(), name.to_string()), value);
        self
    }
}

/// One activation a trap unwound through, innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacktraceFrame {
    pub module_id: u32,
    pub function_index: u32,
}

/// A runtime fault that escaped an invocation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error}")]
pub struct Trap {
    pub error: RuntimeError,
    pub backtrace: Vec<BacktraceFrame>,
}

impl From<RuntimeError> for Trap {
    fn from(error: RuntimeError) -> Self {
        Trap {
            error,
            backtrace: vec![],
        }
    }
}

#[derive(Error, Debug)]
pub enum InstantiateError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("function {function_index} failed validation: {error}")]
    Validation {
        function_index: u32,
        error: ValidationError,
    },

    #[error("missing import {module}.{name}")]
    MissingImport { module: String, name: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("start function trapped: {0}")]
    Start(Trap),
}

pub struct Instance {
    id: u32,
    module: Module,
    config: EngineConfig,
    host: Vec<HostFunction>,
    /// Translated code of module-defined functions, filled per compile mode
    compiled: Vec<OnceCell<Arc<CompiledFunction>>>,
    globals: Vec<Value>,
    memory: Option<SharedMemory>,
    table: Option<Table>,
    backtrace: Vec<BacktraceFrame>,
}

fn missing(module: &str, name: &str) -> InstantiateError {
    InstantiateError::MissingImport {
        module: module.to_string(),
        name: name.to_string(),
    }
}

fn type_list(types: impl Iterator<Item = ValueType>) -> String {
    let names: Vec<String> = types.map(|t| t.to_string()).collect();
    format!("[{}]", names.join(", "))
}

/// Evaluate an initializer against the globals defined so far.
fn eval_const(expr: ConstExpr, globals: &[Value]) -> Result<Value, RuntimeError> {
    Ok(match expr {
        ConstExpr::I32(v) => Value::I32(v),
        ConstExpr::I64(v) => Value::I64(v),
        ConstExpr::F32(bits) => Value::F32(f32::from_bits(bits)),
        ConstExpr::F64(bits) => Value::F64(f64::from_bits(bits)),
        ConstExpr::GlobalGet(index) => globals
            .get(index as usize)
            .copied()
            .ok_or(RuntimeError::GlobalIndexOutOfBounds(index))?,
    })
}

fn eval_offset(expr: ConstExpr, globals: &[Value]) -> Result<u32, RuntimeError> {
    match eval_const(expr, globals)? {
        Value::I32(offset) => Ok(offset as u32),
        other => Err(RuntimeError::TypeMismatch {
            expected: ValueType::I32,
            actual: other.typ(),
        }),
    }
}

impl Instance {
    /// Instantiate `module`: bind imports, allocate memory, globals and the
    /// table, compile per `config.mode`, apply segments and run the start function.
    pub fn new(module: Module, config: EngineConfig, mut imports: Imports) -> Result<Self, InstantiateError> {
        config.validate()?;
        let id = NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed);

        let mut host = Vec::new();
        let mut globals = Vec::new();
        for import in &module.imports {
            let key = (import.module.clone(), import.name.clone());
            match import.external_kind {
                ExternalKind::Function(_) => {
                    let f = imports
                        .functions
                        .remove(&key)
                        .ok_or_else(|| missing(&import.module, &import.name))?;
                    host.push(f);
                }
                ExternalKind::Global(global_type) => {
                    let value = imports
                        .globals
                        .get(&key)
                        .copied()
                        .ok_or_else(|| missing(&import.module, &import.name))?;
                    if value.typ() != global_type.value_type {
                        return Err(RuntimeError::TypeMismatch {
                            expected: global_type.value_type,
                            actual: value.typ(),
                        }
                        .into());
                    }
                    globals.push(value);
                }
                // imported memories and tables are allocated from their declared limits
                ExternalKind::Memory(_) | ExternalKind::Table(_) => {}
            }
        }
        for global in &module.globals {
            let value = eval_const(global.init, &globals)?;
            globals.push(value);
        }

        let memory = match module.memory_limits() {
            Some(limits) => Some(Arc::new(Mutex::new(Memory::new(limits.min, limits.max)?))),
            None => None,
        };
        let table = module.table_type().map(|table_type| Table::new(table_type.limits));

        let compiled = (0..module.functions.len()).map(|_| OnceCell::new()).collect();
        let mut instance = Instance {
            id,
            module,
            config,
            host,
            compiled,
            globals,
            memory,
            table,
            backtrace: vec![],
        };
        instance.compile_eagerly()?;
        instance.apply_segments()?;
        debug!(
            module_id = id,
            module = %instance.module.name,
            functions = instance.compiled.len(),
            mode = ?instance.config.mode,
            "instantiated module"
        );

        if let Some(start) = instance.module.start {
            instance.invoke_index(start, &[]).map_err(InstantiateError::Start)?;
        }
        Ok(instance)
    }

    fn compile_eagerly(&mut self) -> Result<(), InstantiateError> {
        if self.config.mode == CompileMode::LazyCompile {
            return Ok(());
        }
        let first = self.module.imported_function_count();
        for function_index in first..self.module.all_function_count() {
            validate_code(&self.module, function_index)
                .map_err(|error| InstantiateError::Validation { function_index, error })?;
            if self.config.mode == CompileMode::FullCompile {
                let func = translate::compile(&self.module, function_index, &self.config)
                    .map_err(|error| InstantiateError::Validation { function_index, error })?;
                let cell = &self.compiled[(function_index - first) as usize];
                let fresh = cell.set(Arc::new(func)).is_ok();
                debug_assert!(fresh, "function {} compiled twice", function_index);
            }
        }
        Ok(())
    }

    fn apply_segments(&mut self) -> Result<(), RuntimeError> {
        for element in &self.module.elements {
            let offset = eval_offset(element.offset, &self.globals)?;
            let table = self.table.as_mut().ok_or(RuntimeError::UndefinedElement(offset))?;
            table.init(offset, &element.functions)?;
        }
        for data in &self.module.data {
            let offset = eval_offset(data.offset, &self.globals)?;
            let memory = self.memory.as_ref().ok_or(RuntimeError::NoMemory)?;
            let mut memory = memory.lock().map_err(|_| RuntimeError::LockPoisoned)?;
            memory.write_bytes(offset, &data.bytes)?;
        }
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn memory(&self) -> Option<SharedMemory> {
        self.memory.clone()
    }

    pub fn global(&self, global_index: u32) -> Option<Value> {
        self.globals.get(global_index as usize).copied()
    }

    /// Translated code of a function, if it has been compiled yet
    pub fn compiled(&self, function_index: u32) -> Option<Arc<CompiledFunction>> {
        let local = function_index.checked_sub(self.module.imported_function_count())?;
        self.compiled.get(local as usize)?.get().cloned()
    }

    /// Invoke an exported function by name
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, Trap> {
        let function_index = self
            .module
            .exported_function(name)
            .ok_or_else(|| RuntimeError::UnknownExport(name.to_string()))?;
        self.invoke_index(function_index, args)
    }

    pub fn invoke_index(&mut self, function_index: u32, args: &[Value]) -> Result<Vec<Value>, Trap> {
        self.backtrace.clear();
        let result = self
            .check_arguments(function_index, args)
            .and_then(|()| self.execute(function_index, args.to_vec()));
        result.map_err(|error| {
            let backtrace = std::mem::take(&mut self.backtrace);
            warn!(module_id = self.id, function_index, ?backtrace, "trap: {}", error);
            Trap { error, backtrace }
        })
    }

    fn function_type(&self, function_index: u32) -> Result<&FunctionType, RuntimeError> {
        self.module
            .function_type(function_index)
            .ok_or(RuntimeError::UnknownFunction(function_index))
    }

    fn check_arguments(&self, function_index: u32, args: &[Value]) -> Result<(), RuntimeError> {
        let function_type = self.function_type(function_index)?;
        let matches = function_type.parameters.len() == args.len()
            && function_type.parameters.iter().zip(args).all(|(t, v)| *t == v.typ());
        if !matches {
            return Err(RuntimeError::ArgumentMismatch {
                expected: type_list(function_type.parameters.iter().copied()),
                actual: type_list(args.iter().map(Value::typ)),
            });
        }
        Ok(())
    }

    fn compiled_function(&self, function_index: u32) -> Result<Arc<CompiledFunction>, RuntimeError> {
        let local = function_index
            .checked_sub(self.module.imported_function_count())
            .ok_or(RuntimeError::UnknownFunction(function_index))?;
        let cell = self
            .compiled
            .get(local as usize)
            .ok_or(RuntimeError::UnknownFunction(function_index))?;
        let func = cell.get_or_try_init(|| self.compile_lazily(function_index))?;
        Ok(Arc::clone(func))
    }

    fn compile_lazily(&self, function_index: u32) -> Result<Arc<CompiledFunction>, ValidationError> {
        if self.config.mode == CompileMode::LazyCompile {
            validate_code(&self.module, function_index)?;
        }
        translate::compile(&self.module, function_index, &self.config).map(Arc::new)
    }

    /// Run one function to completion. Calls it makes into compiled code
    /// run on the activation's own frame stack; if anything traps, the
    /// active functions are recorded as the backtrace.
    fn execute(&mut self, function_index: u32, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        let outcome = self.execute_body(function_index, args);
        outcome.map_err(|(error, functions)| {
            self.backtrace = functions
                .into_iter()
                .map(|function_index| BacktraceFrame {
                    module_id: self.id,
                    function_index,
                })
                .collect();
            error
        })
    }

    fn execute_body(&mut self, function_index: u32, args: Vec<Value>) -> Result<Vec<Value>, (RuntimeError, Vec<u32>)> {
        if function_index < self.module.imported_function_count() {
            return self.call_host(function_index, &args).map_err(|e| (e, vec![function_index]));
        }
        let func = self
            .compiled_function(function_index)
            .map_err(|e| (e, vec![function_index]))?;
        let mut locals = args;
        locals.extend(func.local_types[func.param_count..].iter().map(|t| Value::zero(*t)));
        let memory = self.memory.clone();
        let module_id = self.id;
        let max_depth = self.config.max_call_depth;
        let mut act = Activation::new(func, self, locals, memory, module_id).with_max_depth(max_depth);
        match run(&mut act) {
            Ok(()) => Ok(act.stack.drain()),
            Err(error) => Err((error, act.backtrace())),
        }
    }

    fn call_host(&self, function_index: u32, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let f = self
            .host
            .get(function_index as usize)
            .ok_or(RuntimeError::UnknownFunction(function_index))?;
        let results = f(args)?;
        let return_types = &self.function_type(function_index)?.return_types;
        if results.len() != return_types.len() || results.iter().zip(return_types).any(|(v, t)| v.typ() != *t) {
            return Err(RuntimeError::Host(format!(
                "function {} returned {}, expected {}",
                function_index,
                type_list(results.iter().map(Value::typ)),
                type_list(return_types.iter().copied())
            )));
        }
        Ok(results)
    }

    /// Host functions run here; compiled functions go back to the dispatch core.
    fn resolve_call(&mut self, function_index: u32, stack: &mut Stack) -> Result<Call, RuntimeError> {
        if function_index >= self.module.imported_function_count() {
            return Ok(Call::Enter(self.compiled_function(function_index)?));
        }
        let parameters = self.function_type(function_index)?.parameters.len();
        let args = stack.pop_n(parameters)?;
        let results = self.call_host(function_index, &args)?;
        stack.push_all(results);
        Ok(Call::Returned)
    }

    fn check_module(&self, module_id: u32) -> Result<(), RuntimeError> {
        if module_id == self.id {
            Ok(())
        } else {
            Err(RuntimeError::UnknownModule(module_id))
        }
    }
}

impl CallContext for Instance {
    fn call(&mut self, module_id: u32, function_index: u32, stack: &mut Stack) -> Result<Call, RuntimeError> {
        self.check_module(module_id)?;
        self.resolve_call(function_index, stack)
    }

    fn call_indirect(
        &mut self,
        module_id: u32,
        type_index: u32,
        element_index: u32,
        stack: &mut Stack,
    ) -> Result<Call, RuntimeError> {
        self.check_module(module_id)?;
        let table = self.table.as_ref().ok_or(RuntimeError::UndefinedElement(element_index))?;
        let function_index = table
            .get(element_index)?
            .ok_or(RuntimeError::UninitializedElement(element_index))?;
        let expected = self
            .module
            .types
            .get(type_index as usize)
            .ok_or(RuntimeError::UnknownFunction(function_index))?;
        let actual = self.function_type(function_index)?;
        if expected != actual {
            return Err(RuntimeError::IndirectCallTypeMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        self.resolve_call(function_index, stack)
    }

    fn global_get(&self, global_index: u32) -> Result<Value, RuntimeError> {
        self.global(global_index)
            .ok_or(RuntimeError::GlobalIndexOutOfBounds(global_index))
    }

    fn global_set(&mut self, global_index: u32, value: Value) -> Result<(), RuntimeError> {
        let slot = self
            .globals
            .get_mut(global_index as usize)
            .ok_or(RuntimeError::GlobalIndexOutOfBounds(global_index))?;
        *slot = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ConventionKind;
    use crate::parser::encoding::CodeBuilder;
    use crate::parser::module::{Data, Element, ExportIndex, GlobalType, Limits, Locals, TableType};
    use crate::parser::opcode::Opcode;

    use ValueType::*;

    fn sig(params: &[ValueType], results: &[ValueType]) -> FunctionType {
        FunctionType::new(params, results)
    }

    #[test]
    fn test_host_import_and_global() {
        let mut module = Module::new("host");
        let double = module.add_import_function("env", "double", sig(&[I32], &[I32]));
        let base = module.add_import_global(
            "env",
            "base",
            GlobalType {
                value_type: I32,
                mutable: false,
            },
        );
        let f = module.add_function(
            sig(&[I32], &[I32]),
            Locals::empty(),
            CodeBuilder::new()
                .local_get(0)
                .call(double)
                .global_get(base)
                .op(Opcode::I32Add)
                .end()
                .build(),
        );
        module.add_export("run", ExportIndex::Function(f));

        let imports = Imports::new()
            .with_function("env", "double", |args: &[Value]| match args {
                [Value::I32(v)] => Ok(vec![Value::I32(v * 2)]),
                _ => Err(RuntimeError::Host("bad arguments".to_string())),
            })
            .with_global("env", "base", Value::I32(100));
        let mut instance = Instance::new(module, EngineConfig::default().with_ring(0, 4), imports).unwrap();
        assert_eq!(instance.invoke("run", &[Value::I32(21)]), Ok(vec![Value::I32(142)]));
    }

    #[test]
    fn test_missing_import() {
        let mut module = Module::new("host");
        module.add_import_function("env", "absent", sig(&[], &[]));
        assert!(matches!(
            Instance::new(module, EngineConfig::default(), Imports::new()),
            Err(InstantiateError::MissingImport { .. })
        ));
    }

    #[test]
    fn test_segments_and_start() {
        let mut module = Module::new("segments");
        module.add_memory(Limits { min: 1, max: None });
        let counter = module.add_global(
            GlobalType {
                value_type: I32,
                mutable: true,
            },
            ConstExpr::I32(0),
        );
        module.data.push(Data {
            memory_index: 0,
            offset: ConstExpr::I32(16),
            bytes: vec![0x2a, 0, 0, 0],
        });
        let start = module.add_function(
            sig(&[], &[]),
            Locals::empty(),
            CodeBuilder::new()
                .i32_const(16)
                .mem_natural(Opcode::I32Load, 0)
                .global_set(counter)
                .end()
                .build(),
        );
        module.start = Some(start);
        let instance = Instance::new(module, EngineConfig::default(), Imports::new()).unwrap();
        assert_eq!(instance.global(counter), Some(Value::I32(42)));
    }

    #[test]
    fn test_data_segment_out_of_bounds() {
        let mut module = Module::new("segments");
        module.add_memory(Limits { min: 1, max: None });
        module.data.push(Data {
            memory_index: 0,
            offset: ConstExpr::I32(65534),
            bytes: vec![1, 2, 3],
        });
        assert!(matches!(
            Instance::new(module, EngineConfig::default(), Imports::new()),
            Err(InstantiateError::Runtime(RuntimeError::MemoryOutOfBounds { .. }))
        ));
    }

    fn indirect_module() -> Module {
        let mut module = Module::new("indirect");
        module.add_table(TableType {
            limits: Limits { min: 3, max: None },
        });
        let seven = module.add_function(sig(&[], &[I32]), Locals::empty(), CodeBuilder::new().i32_const(7).end().build());
        let wide = module.add_function(sig(&[], &[I64]), Locals::empty(), CodeBuilder::new().i64_const(8).end().build());
        let type_index = module.add_type(sig(&[], &[I32]));
        let dispatch = module.add_function(
            sig(&[I32], &[I32]),
            Locals::empty(),
            CodeBuilder::new().local_get(0).call_indirect(type_index).end().build(),
        );
        module.elements.push(Element {
            table_index: 0,
            offset: ConstExpr::I32(0),
            functions: vec![seven, wide],
        });
        module.add_export("dispatch", ExportIndex::Function(dispatch));
        module
    }

    #[test]
    fn test_call_indirect() {
        let mut instance = Instance::new(indirect_module(), EngineConfig::default(), Imports::new()).unwrap();
        assert_eq!(instance.invoke("dispatch", &[Value::I32(0)]), Ok(vec![Value::I32(7)]));

        let trap = instance.invoke("dispatch", &[Value::I32(1)]).unwrap_err();
        assert!(matches!(trap.error, RuntimeError::IndirectCallTypeMismatch { .. }));
        assert_eq!(
            instance.invoke("dispatch", &[Value::I32(2)]).unwrap_err().error,
            RuntimeError::UninitializedElement(2)
        );
        assert_eq!(
            instance.invoke("dispatch", &[Value::I32(3)]).unwrap_err().error,
            RuntimeError::UndefinedElement(3)
        );
    }

    #[test]
    fn test_call_depth_is_bounded() {
        let mut module = Module::new("recursion");
        let f = module.add_function(sig(&[], &[]), Locals::empty(), CodeBuilder::new().call(0).end().build());
        module.add_export("forever", ExportIndex::Function(f));
        let config = EngineConfig::default();
        let limit = config.max_call_depth;
        let mut instance = Instance::new(module, config, Imports::new()).unwrap();
        let trap = instance.invoke("forever", &[]).unwrap_err();
        assert_eq!(trap.error, RuntimeError::CallStackExhausted);
        assert_eq!(trap.backtrace.len(), limit);
        assert!(trap.backtrace.iter().all(|frame| frame.function_index == f));

        // the frames unwind with the trap
        assert_eq!(instance.invoke("forever", &[]).unwrap_err().backtrace.len(), limit);
    }

    /// `down(n)` recurses n times and counts back up.
    fn down_module() -> Module {
        let mut module = Module::new("down");
        let code = CodeBuilder::new()
            .local_get(0)
            .if_(Some(I32))
            .local_get(0)
            .i32_const(1)
            .op(Opcode::I32Sub)
            .call(0)
            .i32_const(1)
            .op(Opcode::I32Add)
            .else_()
            .i32_const(0)
            .end()
            .end()
            .build();
        let f = module.add_function(sig(&[I32], &[I32]), Locals::empty(), code);
        module.add_export("down", ExportIndex::Function(f));
        module
    }

    #[test]
    fn test_recursion_up_to_the_depth_limit() {
        for convention in [ConventionKind::Chained, ConventionKind::ByRef] {
            let config = EngineConfig::default().with_convention(convention);
            let limit = config.max_call_depth as i32;
            let mut instance = Instance::new(down_module(), config, Imports::new()).unwrap();

            // down(limit - 1) has exactly `limit` functions active at its deepest point
            assert_eq!(
                instance.invoke("down", &[Value::I32(limit - 1)]),
                Ok(vec![Value::I32(limit - 1)])
            );
            let trap = instance.invoke("down", &[Value::I32(limit)]).unwrap_err();
            assert_eq!(trap.error, RuntimeError::CallStackExhausted);
            assert_eq!(trap.backtrace.len(), limit as usize);
        }
    }

    #[test]
    fn test_argument_mismatch() {
        let mut instance = Instance::new(indirect_module(), EngineConfig::default(), Imports::new()).unwrap();
        let trap = instance.invoke("dispatch", &[Value::I64(0)]).unwrap_err();
        assert_eq!(
            trap.error,
            RuntimeError::ArgumentMismatch {
                expected: "[i32]".to_string(),
                actual: "[i64]".to_string()
            }
        );
        assert!(trap.backtrace.is_empty());
        assert!(matches!(
            instance.invoke("missing", &[]).unwrap_err().error,
            RuntimeError::UnknownExport(_)
        ));
    }

    fn broken_module() -> Module {
        let mut module = Module::new("broken");
        let ok = module.add_function(sig(&[], &[I32]), Locals::empty(), CodeBuilder::new().i32_const(1).end().build());
        // i32.add with a single operand
        let bad = module.add_function(
            sig(&[], &[I32]),
            Locals::empty(),
            CodeBuilder::new().i32_const(1).op(Opcode::I32Add).end().build(),
        );
        module.add_export("ok", ExportIndex::Function(ok));
        module.add_export("bad", ExportIndex::Function(bad));
        module
    }

    #[test]
    fn test_compile_modes() {
        let full = Instance::new(broken_module(), EngineConfig::default(), Imports::new());
        assert!(matches!(full, Err(InstantiateError::Validation { function_index: 1, .. })));

        let verified = Instance::new(
            broken_module(),
            EngineConfig::default().with_mode(CompileMode::LazyCompileWithFullCodeVerification),
            Imports::new(),
        );
        assert!(matches!(verified, Err(InstantiateError::Validation { function_index: 1, .. })));

        let config = EngineConfig::default().with_mode(CompileMode::LazyCompile);
        let mut lazy = Instance::new(broken_module(), config, Imports::new()).unwrap();
        assert!(lazy.compiled(0).is_none());
        assert_eq!(lazy.invoke("ok", &[]), Ok(vec![Value::I32(1)]));
        assert!(lazy.compiled(0).is_some());
        let trap = lazy.invoke("bad", &[]).unwrap_err();
        assert!(matches!(trap.error, RuntimeError::Compile(ref err) if err.code() == "operand_stack_underflow"));
    }
}
