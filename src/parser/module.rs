//! Module index tables.
//!
//! These are the read-only, index-addressed views over a decoded module that
//! the validator and the runtime consume. Index spaces follow the WebAssembly
//! rule that imported entities come first, so function `0` is the first
//! imported function if there is one.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Default)]
pub struct Module {
    pub name: String,

    pub types: Vec<FunctionType>,
    pub imports: Vec<Import>,
    pub functions: Vec<Function>,
    pub tables: Vec<TableType>,
    pub memories: Vec<Limits>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<Element>,
    pub data: Vec<Data>,
    pub code: Vec<FunctionBody>,
}

impl Module {
    pub fn new(name: &str) -> Module {
        Module {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn get_function_name(&self, index: u32) -> Option<&String> {
        self.exports.iter().find_map(|export| match export.index {
            ExportIndex::Function(idx) if idx == index => Some(&export.name),
            _ => None,
        })
    }

    pub fn exported_function(&self, name: &str) -> Option<u32> {
        self.exports.iter().find_map(|export| match export.index {
            ExportIndex::Function(idx) if export.name == name => Some(idx),
            _ => None,
        })
    }

    fn count_imports(&self, pred: fn(&ExternalKind) -> bool) -> u32 {
        self.imports.iter().filter(|i| pred(&i.external_kind)).count() as u32
    }

    pub fn imported_function_count(&self) -> u32 {
        self.count_imports(|k| matches!(k, ExternalKind::Function(_)))
    }

    pub fn imported_global_count(&self) -> u32 {
        self.count_imports(|k| matches!(k, ExternalKind::Global(_)))
    }

    /// Size of the function index space (imports plus local functions).
    pub fn all_function_count(&self) -> u32 {
        self.imported_function_count() + self.functions.len() as u32
    }

    pub fn all_global_count(&self) -> u32 {
        self.imported_global_count() + self.globals.len() as u32
    }

    pub fn all_table_count(&self) -> u32 {
        self.count_imports(|k| matches!(k, ExternalKind::Table(_))) + self.tables.len() as u32
    }

    pub fn all_memory_count(&self) -> u32 {
        self.count_imports(|k| matches!(k, ExternalKind::Memory(_))) + self.memories.len() as u32
    }

    pub fn function_type_index(&self, function_index: u32) -> Option<u32> {
        let imported = self.imported_function_count();
        if function_index < imported {
            self.imports
                .iter()
                .filter_map(|i| match i.external_kind {
                    ExternalKind::Function(type_index) => Some(type_index),
                    _ => None,
                })
                .nth(function_index as usize)
        } else {
            self.functions
                .get((function_index - imported) as usize)
                .map(|f| f.ftype_index)
        }
    }

    pub fn function_type(&self, function_index: u32) -> Option<&FunctionType> {
        self.function_type_index(function_index)
            .and_then(|ti| self.types.get(ti as usize))
    }

    /// Body of a module-defined function, `None` for imports and unknown indices.
    pub fn body(&self, function_index: u32) -> Option<&FunctionBody> {
        let local = function_index.checked_sub(self.imported_function_count())?;
        self.code.get(local as usize)
    }

    pub fn global_type(&self, global_index: u32) -> Option<GlobalType> {
        let imported = self.imported_global_count();
        if global_index < imported {
            self.imports
                .iter()
                .filter_map(|i| match i.external_kind {
                    ExternalKind::Global(gt) => Some(gt),
                    _ => None,
                })
                .nth(global_index as usize)
        } else {
            self.globals
                .get((global_index - imported) as usize)
                .map(|g| g.global_type)
        }
    }

    /// Limits of memory `0`, whether imported or defined.
    pub fn memory_limits(&self) -> Option<Limits> {
        self.imports
            .iter()
            .find_map(|i| match i.external_kind {
                ExternalKind::Memory(limits) => Some(limits),
                _ => None,
            })
            .or_else(|| self.memories.first().copied())
    }

    /// Type of table `0`, whether imported or defined.
    pub fn table_type(&self) -> Option<TableType> {
        self.imports
            .iter()
            .find_map(|i| match i.external_kind {
                ExternalKind::Table(tt) => Some(tt),
                _ => None,
            })
            .or_else(|| self.tables.first().copied())
    }

    // Building --------------------------------------------------------------
    //
    // The binary decoder is a separate component; these helpers let embedders
    // and tests assemble index tables directly. Imports must be added before
    // local functions and globals as they shift the index spaces.

    pub fn add_type(&mut self, function_type: FunctionType) -> u32 {
        if let Some(existing) = self.types.iter().position(|t| *t == function_type) {
            return existing as u32;
        }
        self.types.push(function_type);
        self.types.len() as u32 - 1
    }

    pub fn add_import_function(&mut self, module: &str, name: &str, function_type: FunctionType) -> u32 {
        let type_index = self.add_type(function_type);
        self.imports.push(Import {
            module: module.to_string(),
            name: name.to_string(),
            external_kind: ExternalKind::Function(type_index),
        });
        self.imported_function_count() - 1
    }

    pub fn add_import_global(&mut self, module: &str, name: &str, global_type: GlobalType) -> u32 {
        self.imports.push(Import {
            module: module.to_string(),
            name: name.to_string(),
            external_kind: ExternalKind::Global(global_type),
        });
        self.imported_global_count() - 1
    }

    /// Adds a function with its body and returns its index in the function index space.
    pub fn add_function(&mut self, function_type: FunctionType, locals: Locals, code: Vec<u8>) -> u32 {
        let ftype_index = self.add_type(function_type);
        let offset = self
            .code
            .last()
            .map(|b| b.offset + b.code.len() as u32)
            .unwrap_or(0);
        self.functions.push(Function { ftype_index });
        self.code.push(FunctionBody { locals, code, offset });
        self.all_function_count() - 1
    }

    pub fn add_memory(&mut self, limits: Limits) -> u32 {
        self.memories.push(limits);
        self.all_memory_count() - 1
    }

    pub fn add_table(&mut self, table_type: TableType) -> u32 {
        self.tables.push(table_type);
        self.all_table_count() - 1
    }

    pub fn add_global(&mut self, global_type: GlobalType, init: ConstExpr) -> u32 {
        self.globals.push(Global { global_type, init });
        self.all_global_count() - 1
    }

    pub fn add_export(&mut self, name: &str, index: ExportIndex) {
        self.exports.push(Export {
            name: name.to_string(),
            index,
        });
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for (i, t) in self.types.iter().enumerate() {
            writeln!(f, " type[{}] {}", i, t)?;
        }
        for i in 0..self.all_function_count() {
            let sig = self
                .function_type(i)
                .map(ToString::to_string)
                .unwrap_or_else(|| "?".to_string());
            match (self.body(i), self.get_function_name(i)) {
                (Some(body), Some(name)) => writeln!(f, " func[{}] {} <{}> size={}", i, sig, name, body.code.len())?,
                (Some(body), None) => writeln!(f, " func[{}] {} size={}", i, sig, body.code.len())?,
                (None, _) => writeln!(f, " func[{}] {} (import)", i, sig)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionType {
    pub parameters: Vec<ValueType>,
    pub return_types: Vec<ValueType>,
}

impl FunctionType {
    pub fn new(parameters: &[ValueType], return_types: &[ValueType]) -> FunctionType {
        FunctionType {
            parameters: parameters.to_vec(),
            return_types: return_types.to_vec(),
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let join = |types: &[ValueType]| {
            types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<String>>()
                .join(", ")
        };
        write!(
            f,
            "({}) -> {}",
            join(&self.parameters),
            match self.return_types.len() {
                0 => "nil".to_string(),
                1 => join(&self.return_types),
                _ => format!("({})", join(&self.return_types)),
            }
        )
    }
}

#[derive(Debug)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub external_kind: ExternalKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExternalKind {
    Function(u32),
    Table(TableType),
    Memory(Limits),
    Global(GlobalType),
}

#[derive(Debug)]
pub struct Function {
    pub ftype_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExportIndex {
    Function(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

#[derive(Debug)]
pub struct Export {
    pub name: String,
    pub index: ExportIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "min = {}, max = {}", self.min, max),
            None => write!(f, "min = {}", self.min),
        }
    }
}

/// MVP tables only hold `funcref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutable: bool, // const or var
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GlobalType({}) {}",
            self.value_type,
            if self.mutable { "var" } else { "const" }
        )
    }
}

/// Constant initializer expressions as they appear in globals and segment offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    GlobalGet(u32),
}

#[derive(Debug)]
pub struct Global {
    pub global_type: GlobalType,
    pub init: ConstExpr,
}

#[derive(Debug)]
pub struct Element {
    pub table_index: u32,
    pub offset: ConstExpr,
    pub functions: Vec<u32>,
}

#[derive(Debug)]
pub struct Data {
    pub memory_index: u32,
    pub offset: ConstExpr,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Locals {
    entries: Vec<(u32, ValueType)>,
}

impl Locals {
    // Initialize with a list of count+ValueType pairs
    pub fn new(entries: Vec<(u32, ValueType)>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> u64 {
        self.entries.iter().map(|(count, _)| *count as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (u32, ValueType)> {
        self.entries.iter()
    }

    pub fn get(&self, index: u32) -> Option<&ValueType> {
        let mut remaining = index;
        for (count, value_type) in &self.entries {
            if remaining < *count {
                return Some(value_type);
            }
            remaining -= count;
        }
        None
    }
}

/// A function's declared locals and its raw instruction bytes.
///
/// `offset` is the position of the first instruction byte relative to the
/// start of the module; diagnostics add it to positions within `code`.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub locals: Locals,
    pub code: Vec<u8>,
    pub offset: u32,
}

impl FunctionBody {
    /// Full local type list: parameters first, then declared locals.
    pub fn local_types(&self, function_type: &FunctionType) -> Vec<ValueType> {
        let mut types = function_type.parameters.clone();
        for (count, value_type) in self.locals.iter() {
            types.extend(std::iter::repeat(*value_type).take(*count as usize));
        }
        types
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    pub fn decode(byte: u8) -> Option<Self> {
        match byte {
            0x7f => Some(ValueType::I32),
            0x7e => Some(ValueType::I64),
            0x7d => Some(ValueType::F32),
            0x7c => Some(ValueType::F64),
            _ => None,
        }
    }

    pub fn emit_byte(&self) -> u8 {
        match self {
            ValueType::I32 => 0x7f,
            ValueType::I64 => 0x7e,
            ValueType::F32 => 0x7d,
            ValueType::F64 => 0x7c,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_spaces() {
        let mut module = Module::new("test");
        let imported = module.add_import_function("env", "log", FunctionType::new(&[ValueType::I32], &[]));
        let local = module.add_function(
            FunctionType::new(&[], &[ValueType::I32]),
            Locals::empty(),
            vec![0x41, 0x00, 0x0b],
        );
        assert_eq!(imported, 0);
        assert_eq!(local, 1);
        assert_eq!(module.all_function_count(), 2);
        assert!(module.body(0).is_none());
        assert!(module.body(1).is_some());
        assert_eq!(module.function_type(0).unwrap().parameters, vec![ValueType::I32]);
        assert_eq!(module.function_type(1).unwrap().return_types, vec![ValueType::I32]);
        assert!(module.function_type(2).is_none());
    }

    #[test]
    fn test_body_offsets_accumulate() {
        let mut module = Module::new("test");
        let ft = FunctionType::new(&[], &[]);
        module.add_function(ft.clone(), Locals::empty(), vec![0x01, 0x0b]);
        module.add_function(ft, Locals::empty(), vec![0x0b]);
        assert_eq!(module.code[0].offset, 0);
        assert_eq!(module.code[1].offset, 2);
        assert_eq!(module.types.len(), 1, "identical signatures share a type");
    }

    #[test]
    fn test_locals_get() {
        let locals = Locals::new(vec![(2, ValueType::I32), (1, ValueType::F64)]);
        assert_eq!(locals.len(), 3);
        assert_eq!(locals.get(1), Some(&ValueType::I32));
        assert_eq!(locals.get(2), Some(&ValueType::F64));
        assert_eq!(locals.get(3), None);

        let body = FunctionBody {
            locals,
            code: vec![0x0b],
            offset: 0,
        };
        let ft = FunctionType::new(&[ValueType::I64], &[]);
        assert_eq!(
            body.local_types(&ft),
            vec![ValueType::I64, ValueType::I32, ValueType::I32, ValueType::F64]
        );
    }

    #[test]
    fn test_global_index_space() {
        let mut module = Module::new("test");
        module.add_import_global(
            "env",
            "g",
            GlobalType {
                value_type: ValueType::I64,
                mutable: false,
            },
        );
        let g = module.add_global(
            GlobalType {
                value_type: ValueType::F32,
                mutable: true,
            },
            ConstExpr::F32(0),
        );
        assert_eq!(g, 1);
        assert_eq!(module.global_type(0).unwrap().value_type, ValueType::I64);
        assert!(module.global_type(1).unwrap().mutable);
        assert!(module.global_type(2).is_none());
    }

    #[test]
    fn test_function_type_display() {
        assert_eq!(FunctionType::new(&[], &[]).to_string(), "() -> nil");
        assert_eq!(
            FunctionType::new(&[ValueType::I32, ValueType::F64], &[ValueType::I64]).to_string(),
            "(i32, f64) -> i64"
        );
    }
}
