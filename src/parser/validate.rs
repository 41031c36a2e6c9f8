//! Function body validation.
//!
//! A single left-to-right pass over a body's instructions drives an operand
//! type stack and a control frame stack through the WebAssembly 1.0 typing
//! rules (core section 3.3 and the validation algorithm appendix).
//! The first fault aborts validation and is reported as a
//! [`ValidationError`] carrying the module-relative byte offset at which it
//! was detected.

use super::instruction::{decode, Instruction, MemArg};
use super::module::{FunctionType, Module, ValueType, ValueType::*};
use super::opcode::Opcode;
use super::reader::CodeReader;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use MaybeValue::{Unknown, Val};

fn fmt_type(t: &Option<ValueType>) -> String {
    t.map_or_else(|| "nil".to_string(), |t| t.to_string())
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("(offset={offset}) {kind}")]
pub struct ValidationError {
    pub offset: u32,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(offset: u32, kind: ValidationErrorKind) -> ValidationError {
        ValidationError { offset, kind }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Function,
    Block,
    Loop,
    If,
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BlockKind::Function => "function",
            BlockKind::Block => "block",
            BlockKind::Loop => "loop",
            BlockKind::If => "if",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationErrorKind {
    #[error("missing end")]
    MissingEnd,

    #[error("missing block type")]
    MissingBlockType,

    #[error("illegal block type 0x{block_type:02x}")]
    IllegalBlockType { block_type: u8 },

    #[error("illegal opbase 0x{opbase:02x}")]
    IllegalOpbase { opbase: u8 },

    #[error("operand stack underflow for {op_code_name}: required={stack_size_required}, actual={stack_size_actual}")]
    OperandStackUnderflow {
        op_code_name: &'static str,
        stack_size_actual: usize,
        stack_size_required: usize,
    },

    #[error("{op_code_name} operand type mismatch: expected {expected_type}, got {actual_type}")]
    OperandTypeMismatch {
        op_code_name: &'static str,
        expected_type: ValueType,
        actual_type: ValueType,
    },

    #[error("select operand types differ: {type_v1} and {type_v2}")]
    SelectTypeMismatch { type_v1: ValueType, type_v2: ValueType },

    #[error("select condition must be i32, got {cond_type}")]
    SelectCondTypeNotI32 { cond_type: ValueType },

    #[error("if condition must be i32, got {cond_type}")]
    IfCondTypeNotI32 { cond_type: ValueType },

    #[error("else without matching if")]
    IllegalElse,

    #[error(
        "if then-branch result mismatch: expected {expected_count} ({}), got {actual_count} ({})",
        fmt_type(.expected_type),
        fmt_type(.actual_type)
    )]
    IfThenResultMismatch {
        expected_count: usize,
        actual_count: usize,
        expected_type: Option<ValueType>,
        actual_type: Option<ValueType>,
    },

    #[error("if with result {} has no else", fmt_type(.expected_type))]
    IfMissingElse {
        expected_count: usize,
        expected_type: Option<ValueType>,
    },

    #[error(
        "{block_kind} end result mismatch: expected {expected_count} ({}), got {actual_count} ({})",
        fmt_type(.expected_type),
        fmt_type(.actual_type)
    )]
    EndResultMismatch {
        block_kind: BlockKind,
        expected_count: usize,
        actual_count: usize,
        expected_type: Option<ValueType>,
        actual_type: Option<ValueType>,
    },

    #[error("trailing code after function end")]
    TrailingCodeAfterEnd,

    #[error("invalid label index encoding")]
    InvalidLabelIndex,

    #[error("illegal label index {label_index}, {all_label_count} labels in scope")]
    IllegalLabelIndex { label_index: u32, all_label_count: usize },

    #[error("{op_code_name} value type mismatch: expected {expected_type}, got {actual_type}")]
    BrValueTypeMismatch {
        op_code_name: &'static str,
        expected_type: ValueType,
        actual_type: ValueType,
    },

    #[error("{op_code_name} condition must be i32, got {cond_type}")]
    BrCondTypeNotI32 {
        op_code_name: &'static str,
        cond_type: ValueType,
    },

    #[error(
        "br_table target {mismatched_label_index} (arity {actual_arity}, {}) does not match default {expected_label_index} (arity {expected_arity}, {})",
        fmt_type(.actual_type),
        fmt_type(.expected_type)
    )]
    BrTableTargetTypeMismatch {
        expected_label_index: u32,
        mismatched_label_index: u32,
        expected_arity: usize,
        actual_arity: usize,
        expected_type: Option<ValueType>,
        actual_type: Option<ValueType>,
    },

    #[error("invalid function index encoding")]
    InvalidFunctionIndexEncoding,

    #[error("invalid type index encoding")]
    InvalidTypeIndex,

    #[error("illegal type index {type_index}, {all_type_count} types declared")]
    IllegalTypeIndex { type_index: u32, all_type_count: usize },

    #[error("invalid table index encoding")]
    InvalidTableIndex,

    #[error("illegal table index {table_index}, {all_table_count} tables declared")]
    IllegalTableIndex { table_index: u32, all_table_count: u32 },

    #[error("invalid memory index encoding")]
    InvalidMemoryIndex,

    #[error("illegal memory index {memory_index}, {all_memory_count} memories declared")]
    IllegalMemoryIndex { memory_index: u32, all_memory_count: u32 },

    #[error("invalid local index encoding")]
    InvalidLocalIndex,

    #[error("illegal local index {local_index}, {all_local_count} locals declared")]
    IllegalLocalIndex { local_index: u32, all_local_count: usize },

    #[error("local.set {local_index} type mismatch: expected {expected_type}, got {actual_type}")]
    LocalSetTypeMismatch {
        local_index: u32,
        expected_type: ValueType,
        actual_type: ValueType,
    },

    #[error("local.tee {local_index} type mismatch: expected {expected_type}, got {actual_type}")]
    LocalTeeTypeMismatch {
        local_index: u32,
        expected_type: ValueType,
        actual_type: ValueType,
    },

    #[error("invalid global index encoding")]
    InvalidGlobalIndex,

    #[error("illegal global index {global_index}, {all_global_count} globals declared")]
    IllegalGlobalIndex { global_index: u32, all_global_count: u32 },

    #[error("global {global_index} is immutable")]
    ImmutableGlobalSet { global_index: u32 },

    #[error("global.set {global_index} type mismatch: expected {expected_type}, got {actual_type}")]
    GlobalSetTypeMismatch {
        global_index: u32,
        expected_type: ValueType,
        actual_type: ValueType,
    },

    #[error("{op_code_name} (align={align}, offset={offset}) requires a memory")]
    NoMemory {
        op_code_name: &'static str,
        align: u32,
        offset: u32,
    },

    #[error("invalid memarg alignment encoding")]
    InvalidMemargAlign,

    #[error("invalid memarg offset encoding")]
    InvalidMemargOffset,

    #[error("illegal memory argument alignment for {op_code_name}: align={align}, max={max_align}")]
    IllegalMemargAlignment {
        op_code_name: &'static str,
        align: u32,
        max_align: u32,
    },

    #[error("{op_code_name} address must be i32, got {addr_type}")]
    MemargAddressTypeNotI32 {
        op_code_name: &'static str,
        addr_type: ValueType,
    },

    #[error("function {function_index} is imported and has no body")]
    NotLocalFunction { function_index: u32 },

    #[error("invalid function index {function_index}, {all_function_size} functions declared")]
    InvalidFunctionIndex { function_index: u32, all_function_size: u32 },

    #[error("{op_code_name} value type mismatch: expected {expected_type}, got {actual_type}")]
    StoreValueTypeMismatch {
        op_code_name: &'static str,
        expected_type: ValueType,
        actual_type: ValueType,
    },

    #[error("memory.grow delta must be i32, got {delta_type}")]
    MemoryGrowDeltaTypeNotI32 { delta_type: ValueType },

    #[error("invalid {op_code_name} immediate")]
    InvalidConstImmediate { op_code_name: &'static str },

    #[error("{op_code_name} operand type mismatch: expected {expected_type}, got {actual_type}")]
    NumericOperandTypeMismatch {
        op_code_name: &'static str,
        expected_type: ValueType,
        actual_type: ValueType,
    },

    #[error("unsupported {value_type} ring range {begin}..{end}")]
    UnsupportedRingLayout { value_type: ValueType, begin: u8, end: u8 },
}

impl ValidationErrorKind {
    /// Stable snake_case tag for this error kind.
    pub fn code(&self) -> &'static str {
        use ValidationErrorKind::*;
        match self {
            MissingEnd => "missing_end",
            MissingBlockType => "missing_block_type",
            IllegalBlockType { .. } => "illegal_block_type",
            IllegalOpbase { .. } => "illegal_opbase",
            OperandStackUnderflow { .. } => "operand_stack_underflow",
            OperandTypeMismatch { .. } => "operand_type_mismatch",
            SelectTypeMismatch { .. } => "select_type_mismatch",
            SelectCondTypeNotI32 { .. } => "select_cond_type_not_i32",
            IfCondTypeNotI32 { .. } => "if_cond_type_not_i32",
            IllegalElse => "illegal_else",
            IfThenResultMismatch { .. } => "if_then_result_mismatch",
            IfMissingElse { .. } => "if_missing_else",
            EndResultMismatch { .. } => "end_result_mismatch",
            TrailingCodeAfterEnd => "trailing_code_after_end",
            InvalidLabelIndex => "invalid_label_index",
            IllegalLabelIndex { .. } => "illegal_label_index",
            BrValueTypeMismatch { .. } => "br_value_type_mismatch",
            BrCondTypeNotI32 { .. } => "br_cond_type_not_i32",
            BrTableTargetTypeMismatch { .. } => "br_table_target_type_mismatch",
            InvalidFunctionIndexEncoding => "invalid_function_index_encoding",
            InvalidTypeIndex => "invalid_type_index",
            IllegalTypeIndex { .. } => "illegal_type_index",
            InvalidTableIndex => "invalid_table_index",
            IllegalTableIndex { .. } => "illegal_table_index",
            InvalidMemoryIndex => "invalid_memory_index",
            IllegalMemoryIndex { .. } => "illegal_memory_index",
            InvalidLocalIndex => "invalid_local_index",
            IllegalLocalIndex { .. } => "illegal_local_index",
            LocalSetTypeMismatch { .. } => "local_set_type_mismatch",
            LocalTeeTypeMismatch { .. } => "local_tee_type_mismatch",
            InvalidGlobalIndex => "invalid_global_index",
            IllegalGlobalIndex { .. } => "illegal_global_index",
            ImmutableGlobalSet { .. } => "immutable_global_set",
            GlobalSetTypeMismatch { .. } => "global_set_type_mismatch",
            NoMemory { .. } => "no_memory",
            InvalidMemargAlign => "invalid_memarg_align",
            InvalidMemargOffset => "invalid_memarg_offset",
            IllegalMemargAlignment { .. } => "illegal_memarg_alignment",
            MemargAddressTypeNotI32 { .. } => "memarg_address_type_not_i32",
            NotLocalFunction { .. } => "not_local_function",
            InvalidFunctionIndex { .. } => "invalid_function_index",
            StoreValueTypeMismatch { .. } => "store_value_type_mismatch",
            MemoryGrowDeltaTypeNotI32 { .. } => "memory_grow_delta_type_not_i32",
            InvalidConstImmediate { .. } => "invalid_const_immediate",
            NumericOperandTypeMismatch { .. } => "numeric_operand_type_mismatch",
            UnsupportedRingLayout { .. } => "unsupported_ring_layout",
        }
    }
}

/// Value type of the memory operand of a load or store.
pub(crate) fn access_type(op: Opcode) -> Option<ValueType> {
    use Opcode::*;
    match op {
        I32Load | I32Load8S | I32Load8U | I32Load16S | I32Load16U => Some(I32),
        I32Store | I32Store8 | I32Store16 => Some(I32),
        I64Load | I64Load8S | I64Load8U | I64Load16S | I64Load16U | I64Load32S | I64Load32U => Some(I64),
        I64Store | I64Store8 | I64Store16 | I64Store32 => Some(I64),
        F32Load | F32Store => Some(F32),
        F64Load | F64Store => Some(F64),
        _ => None,
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
enum MaybeValue {
    Val(ValueType),
    Unknown,
}

impl MaybeValue {
    fn known(self) -> Option<ValueType> {
        match self {
            Val(t) => Some(t),
            Unknown => None,
        }
    }
}

#[derive(Debug, Clone)]
struct CtrlFrame {
    kind: BlockKind,
    end_types: Vec<ValueType>,
    height: usize,
    unreachable: bool,
    has_else: bool,
}

impl CtrlFrame {
    /// Types a branch to this frame's label carries; MVP loops take no parameters.
    fn label_types(&self) -> &[ValueType] {
        if self.kind == BlockKind::Loop {
            &[]
        } else {
            &self.end_types
        }
    }
}

/// Describes how the values above a frame's height differ from its results.
struct ResultMismatch {
    expected_count: usize,
    actual_count: usize,
    expected_type: Option<ValueType>,
    actual_type: Option<ValueType>,
}

pub struct CodeValidator<'a> {
    module: &'a Module,
    function_type: &'a FunctionType,
    locals: Vec<ValueType>,
    vals: Vec<MaybeValue>,
    ctrls: Vec<CtrlFrame>,
    // offset of the instruction being validated
    offset: u32,
    max_height: usize,
}

/// Validates the body of module function `function_index`.
pub fn validate_code(module: &Module, function_index: u32) -> Result<(), ValidationError> {
    let imported = module.imported_function_count();
    if function_index < imported {
        return Err(ValidationError::new(
            0,
            ValidationErrorKind::NotLocalFunction { function_index },
        ));
    }
    let body = module.body(function_index).ok_or_else(|| {
        ValidationError::new(
            0,
            ValidationErrorKind::InvalidFunctionIndex {
                function_index,
                all_function_size: module.all_function_count(),
            },
        )
    })?;
    let type_index = module.function_type_index(function_index).unwrap_or(u32::MAX);
    let function_type = module.types.get(type_index as usize).ok_or_else(|| {
        ValidationError::new(
            body.offset,
            ValidationErrorKind::IllegalTypeIndex {
                type_index,
                all_type_count: module.types.len(),
            },
        )
    })?;

    let mut validator = CodeValidator::new(module, function_type, body.local_types(function_type));
    let mut reader = CodeReader::new(&body.code, body.offset);
    match validator.run(&mut reader) {
        Ok(()) => {
            debug!(
                function_index,
                code_len = body.code.len(),
                max_height = validator.max_height,
                "validated function"
            );
            Ok(())
        }
        Err(err) => {
            let pos = err.offset.saturating_sub(body.offset) as usize;
            debug!(
                function_index,
                offset = err.offset,
                code = err.code(),
                bytes = %hex::encode(reader.window(pos, 8)),
                "validation failed: {}",
                err.kind
            );
            Err(err)
        }
    }
}

/// Validates every module-defined function, stopping at the first error.
pub fn validate_module(module: &Module) -> Result<(), ValidationError> {
    let first = module.imported_function_count();
    for function_index in first..module.all_function_count() {
        validate_code(module, function_index)?;
    }
    Ok(())
}

impl<'a> CodeValidator<'a> {
    pub fn new(module: &'a Module, function_type: &'a FunctionType, locals: Vec<ValueType>) -> CodeValidator<'a> {
        let mut v = CodeValidator {
            module,
            function_type,
            locals,
            vals: vec![],
            ctrls: vec![],
            offset: 0,
            max_height: 0,
        };

        // parameters live in locals and are only pushed by local.get
        v.push_ctrl(BlockKind::Function, function_type.return_types.clone());
        v
    }

    /// Runs the state machine over `reader` until the function's own `end`.
    pub fn run(&mut self, reader: &mut CodeReader<'_>) -> Result<(), ValidationError> {
        while !reader.is_empty() {
            self.offset = reader.offset();
            let inst = decode(reader)?;
            self.validate(&inst)?;
            if self.ctrls.is_empty() {
                if !reader.is_empty() {
                    return Err(ValidationError::new(
                        reader.offset(),
                        ValidationErrorKind::TrailingCodeAfterEnd,
                    ));
                }
                return Ok(());
            }
        }
        Err(ValidationError::new(reader.offset(), ValidationErrorKind::MissingEnd))
    }

    /// Deepest operand stack seen so far.
    pub fn max_height(&self) -> usize {
        self.max_height
    }

    fn err(&self, kind: ValidationErrorKind) -> ValidationError {
        ValidationError::new(self.offset, kind)
    }

    fn frame(&self) -> Result<&CtrlFrame, ValidationError> {
        self.ctrls
            .last()
            .ok_or_else(|| self.err(ValidationErrorKind::TrailingCodeAfterEnd))
    }

    fn push_val(&mut self, val_type: MaybeValue) {
        self.vals.push(val_type);
        self.max_height = self.max_height.max(self.vals.len());
    }

    fn push_ctrl(&mut self, kind: BlockKind, end_types: Vec<ValueType>) {
        self.ctrls.push(CtrlFrame {
            kind,
            end_types,
            height: self.vals.len(),
            unreachable: false,
            has_else: false,
        });
    }

    /// Checks that `required` operands are available in the current frame.
    /// Inside unreachable code missing operands are treated as unknown.
    fn need(&self, op: Opcode, required: usize) -> Result<(), ValidationError> {
        let frame = self.frame()?;
        let actual = self.vals.len() - frame.height;
        if actual < required && !frame.unreachable {
            return Err(self.err(ValidationErrorKind::OperandStackUnderflow {
                op_code_name: op.name(),
                stack_size_actual: actual,
                stack_size_required: required,
            }));
        }
        Ok(())
    }

    // Only called after `need`, so popping at the frame height implies unreachable code.
    fn pop_val(&mut self) -> MaybeValue {
        match self.ctrls.last() {
            Some(frame) if self.vals.len() > frame.height => self.vals.pop().unwrap_or(Unknown),
            _ => Unknown,
        }
    }

    fn pop_expected(
        &mut self,
        expected: ValueType,
        mismatch: impl FnOnce(ValueType) -> ValidationErrorKind,
    ) -> Result<(), ValidationError> {
        match self.pop_val() {
            Val(actual) if actual != expected => Err(self.err(mismatch(actual))),
            _ => Ok(()),
        }
    }

    fn unreachable(&mut self) -> Result<(), ValidationError> {
        let offset = self.offset;
        let ctrl = self
            .ctrls
            .last_mut()
            .ok_or_else(|| ValidationError::new(offset, ValidationErrorKind::TrailingCodeAfterEnd))?;
        self.vals.truncate(ctrl.height);
        ctrl.unreachable = true;
        Ok(())
    }

    fn sig_unary(&mut self, op: Opcode, in_type: ValueType, out_type: ValueType) -> Result<(), ValidationError> {
        self.need(op, 1)?;
        self.pop_expected(in_type, |actual_type| ValidationErrorKind::NumericOperandTypeMismatch {
            op_code_name: op.name(),
            expected_type: in_type,
            actual_type,
        })?;
        self.push_val(Val(out_type));
        Ok(())
    }

    fn sig_binary(&mut self, op: Opcode, in_type: ValueType, out_type: ValueType) -> Result<(), ValidationError> {
        self.need(op, 2)?;
        for _ in 0..2 {
            self.pop_expected(in_type, |actual_type| ValidationErrorKind::NumericOperandTypeMismatch {
                op_code_name: op.name(),
                expected_type: in_type,
                actual_type,
            })?;
        }
        self.push_val(Val(out_type));
        Ok(())
    }

    /// Compares the values above the current frame's height with its results.
    fn frame_result_mismatch(&self) -> Result<Option<ResultMismatch>, ValidationError> {
        let frame = self.frame()?;
        let expected = &frame.end_types;
        let actual_count = self.vals.len() - frame.height;
        let top = self.vals.last().and_then(|v| v.known()).filter(|_| actual_count > 0);

        if actual_count > expected.len() || (actual_count < expected.len() && !frame.unreachable) {
            return Ok(Some(ResultMismatch {
                expected_count: expected.len(),
                actual_count,
                expected_type: expected.last().copied(),
                actual_type: top,
            }));
        }

        // compare the values present against the tail of the expected types
        let present = &self.vals[frame.height..];
        let tail = &expected[expected.len() - present.len()..];
        for (actual, expected_type) in present.iter().zip(tail) {
            if let Val(actual_type) = actual {
                if actual_type != expected_type {
                    return Ok(Some(ResultMismatch {
                        expected_count: expected.len(),
                        actual_count,
                        expected_type: Some(*expected_type),
                        actual_type: Some(*actual_type),
                    }));
                }
            }
        }
        Ok(None)
    }

    fn local(&self, local_index: u32) -> Result<ValueType, ValidationError> {
        self.locals.get(local_index as usize).copied().ok_or_else(|| {
            self.err(ValidationErrorKind::IllegalLocalIndex {
                local_index,
                all_local_count: self.locals.len(),
            })
        })
    }

    fn label_types_at(&self, label_index: u32) -> Result<Vec<ValueType>, ValidationError> {
        if self.ctrls.len() <= label_index as usize {
            return Err(self.err(ValidationErrorKind::IllegalLabelIndex {
                label_index,
                all_label_count: self.ctrls.len(),
            }));
        }
        let frame = &self.ctrls[self.ctrls.len() - label_index as usize - 1];
        Ok(frame.label_types().to_vec())
    }

    /// Pops `types` (last type on top) as branch operands of `op`.
    fn pop_branch_values(&mut self, op: Opcode, types: &[ValueType]) -> Result<(), ValidationError> {
        self.need(op, types.len())?;
        for expected_type in types.iter().rev() {
            self.pop_expected(*expected_type, |actual_type| ValidationErrorKind::BrValueTypeMismatch {
                op_code_name: op.name(),
                expected_type: *expected_type,
                actual_type,
            })?;
        }
        Ok(())
    }

    fn pop_branch_condition(&mut self, op: Opcode) -> Result<(), ValidationError> {
        self.need(op, 1)?;
        self.pop_expected(I32, |cond_type| ValidationErrorKind::BrCondTypeNotI32 {
            op_code_name: op.name(),
            cond_type,
        })
    }

    fn check_memory(&self, op: Opcode, memarg: &MemArg) -> Result<(), ValidationError> {
        if self.module.all_memory_count() == 0 {
            return Err(self.err(ValidationErrorKind::NoMemory {
                op_code_name: op.name(),
                align: memarg.align,
                offset: memarg.offset,
            }));
        }
        let max_align = op.natural_alignment().unwrap_or(0);
        if memarg.align > max_align {
            return Err(self.err(ValidationErrorKind::IllegalMemargAlignment {
                op_code_name: op.name(),
                align: memarg.align,
                max_align,
            }));
        }
        Ok(())
    }

    fn check_memory_index(&self, memory_index: u32) -> Result<(), ValidationError> {
        let all_memory_count = self.module.all_memory_count();
        if memory_index >= all_memory_count {
            return Err(self.err(ValidationErrorKind::IllegalMemoryIndex {
                memory_index,
                all_memory_count,
            }));
        }
        Ok(())
    }

    fn pop_address(&mut self, op: Opcode) -> Result<(), ValidationError> {
        self.pop_expected(I32, |addr_type| ValidationErrorKind::MemargAddressTypeNotI32 {
            op_code_name: op.name(),
            addr_type,
        })
    }

    fn call_signature(&mut self, op: Opcode, function_type: &FunctionType) -> Result<(), ValidationError> {
        self.need(op, function_type.parameters.len())?;
        for expected_type in function_type.parameters.iter().rev() {
            self.pop_expected(*expected_type, |actual_type| ValidationErrorKind::OperandTypeMismatch {
                op_code_name: op.name(),
                expected_type: *expected_type,
                actual_type,
            })?;
        }
        for t in &function_type.return_types {
            self.push_val(Val(*t));
        }
        Ok(())
    }

    pub fn validate(&mut self, inst: &Instruction) -> Result<(), ValidationError> {
        match inst {
            Instruction::Unreachable => self.unreachable(),
            Instruction::Nop => Ok(()),

            Instruction::Block(bt) => {
                self.push_ctrl(BlockKind::Block, bt.result().into_iter().collect());
                Ok(())
            }

            Instruction::Loop(bt) => {
                self.push_ctrl(BlockKind::Loop, bt.result().into_iter().collect());
                Ok(())
            }

            Instruction::If(bt) => {
                self.need(Opcode::If, 1)?;
                self.pop_expected(I32, |cond_type| ValidationErrorKind::IfCondTypeNotI32 { cond_type })?;
                self.push_ctrl(BlockKind::If, bt.result().into_iter().collect());
                Ok(())
            }

            Instruction::Else => {
                let frame = self.frame()?;
                if frame.kind != BlockKind::If || frame.has_else {
                    return Err(self.err(ValidationErrorKind::IllegalElse));
                }
                if let Some(m) = self.frame_result_mismatch()? {
                    return Err(self.err(ValidationErrorKind::IfThenResultMismatch {
                        expected_count: m.expected_count,
                        actual_count: m.actual_count,
                        expected_type: m.expected_type,
                        actual_type: m.actual_type,
                    }));
                }
                let offset = self.offset;
                let frame = self
                    .ctrls
                    .last_mut()
                    .ok_or_else(|| ValidationError::new(offset, ValidationErrorKind::IllegalElse))?;
                self.vals.truncate(frame.height);
                frame.unreachable = false;
                frame.has_else = true;
                Ok(())
            }

            Instruction::End => {
                if let Some(m) = self.frame_result_mismatch()? {
                    let block_kind = self.frame()?.kind;
                    return Err(self.err(ValidationErrorKind::EndResultMismatch {
                        block_kind,
                        expected_count: m.expected_count,
                        actual_count: m.actual_count,
                        expected_type: m.expected_type,
                        actual_type: m.actual_type,
                    }));
                }
                let frame = self.frame()?;
                if frame.kind == BlockKind::If && !frame.has_else && !frame.end_types.is_empty() {
                    return Err(self.err(ValidationErrorKind::IfMissingElse {
                        expected_count: frame.end_types.len(),
                        expected_type: frame.end_types.last().copied(),
                    }));
                }
                if let Some(frame) = self.ctrls.pop() {
                    self.vals.truncate(frame.height);
                    for t in frame.end_types {
                        self.push_val(Val(t));
                    }
                }
                Ok(())
            }

            Instruction::Br(label_index) => {
                let types = self.label_types_at(*label_index)?;
                self.pop_branch_values(Opcode::Br, &types)?;
                self.unreachable()
            }

            Instruction::BrIf(label_index) => {
                let types = self.label_types_at(*label_index)?;
                self.pop_branch_condition(Opcode::BrIf)?;
                self.pop_branch_values(Opcode::BrIf, &types)?;
                for t in types {
                    self.push_val(Val(t));
                }
                Ok(())
            }

            Instruction::BrTable { targets, default } => {
                let default_types = self.label_types_at(*default)?;
                for target in targets {
                    let types = self.label_types_at(*target)?;
                    if types != default_types {
                        return Err(self.err(ValidationErrorKind::BrTableTargetTypeMismatch {
                            expected_label_index: *default,
                            mismatched_label_index: *target,
                            expected_arity: default_types.len(),
                            actual_arity: types.len(),
                            expected_type: default_types.last().copied(),
                            actual_type: types.last().copied(),
                        }));
                    }
                }
                self.pop_branch_condition(Opcode::BrTable)?;
                self.pop_branch_values(Opcode::BrTable, &default_types)?;
                self.unreachable()
            }

            Instruction::Return => {
                let types = self.function_type.return_types.clone();
                self.pop_branch_values(Opcode::Return, &types)?;
                self.unreachable()
            }

            Instruction::Call(function_index) => {
                let all_function_size = self.module.all_function_count();
                if *function_index >= all_function_size {
                    return Err(self.err(ValidationErrorKind::InvalidFunctionIndex {
                        function_index: *function_index,
                        all_function_size,
                    }));
                }
                let module = self.module;
                let type_index = module.function_type_index(*function_index).unwrap_or(u32::MAX);
                let function_type = module.types.get(type_index as usize).ok_or_else(|| {
                    self.err(ValidationErrorKind::IllegalTypeIndex {
                        type_index,
                        all_type_count: module.types.len(),
                    })
                })?;
                self.call_signature(Opcode::Call, function_type)
            }

            Instruction::CallIndirect {
                type_index,
                table_index,
            } => {
                let module = self.module;
                let function_type = module.types.get(*type_index as usize).ok_or_else(|| {
                    self.err(ValidationErrorKind::IllegalTypeIndex {
                        type_index: *type_index,
                        all_type_count: module.types.len(),
                    })
                })?;
                let all_table_count = self.module.all_table_count();
                if *table_index >= all_table_count {
                    return Err(self.err(ValidationErrorKind::IllegalTableIndex {
                        table_index: *table_index,
                        all_table_count,
                    }));
                }
                self.need(Opcode::CallIndirect, 1)?;
                self.pop_expected(I32, |actual_type| ValidationErrorKind::OperandTypeMismatch {
                    op_code_name: Opcode::CallIndirect.name(),
                    expected_type: I32,
                    actual_type,
                })?;
                self.call_signature(Opcode::CallIndirect, function_type)
            }

            Instruction::Drop => {
                self.need(Opcode::Drop, 1)?;
                self.pop_val();
                Ok(())
            }

            Instruction::Select => {
                self.need(Opcode::Select, 3)?;
                self.pop_expected(I32, |cond_type| ValidationErrorKind::SelectCondTypeNotI32 { cond_type })?;
                let v2 = self.pop_val();
                let v1 = self.pop_val();
                let result = match (v1, v2) {
                    (Val(type_v1), Val(type_v2)) if type_v1 != type_v2 => {
                        return Err(self.err(ValidationErrorKind::SelectTypeMismatch { type_v1, type_v2 }))
                    }
                    (Val(t), _) | (_, Val(t)) => Val(t),
                    (Unknown, Unknown) => Unknown,
                };
                self.push_val(result);
                Ok(())
            }

            Instruction::LocalGet(local_index) => {
                let t = self.local(*local_index)?;
                self.push_val(Val(t));
                Ok(())
            }

            Instruction::LocalSet(local_index) => {
                let expected_type = self.local(*local_index)?;
                self.need(Opcode::LocalSet, 1)?;
                self.pop_expected(expected_type, |actual_type| ValidationErrorKind::LocalSetTypeMismatch {
                    local_index: *local_index,
                    expected_type,
                    actual_type,
                })
            }

            Instruction::LocalTee(local_index) => {
                let expected_type = self.local(*local_index)?;
                self.need(Opcode::LocalTee, 1)?;
                self.pop_expected(expected_type, |actual_type| ValidationErrorKind::LocalTeeTypeMismatch {
                    local_index: *local_index,
                    expected_type,
                    actual_type,
                })?;
                self.push_val(Val(expected_type));
                Ok(())
            }

            Instruction::GlobalGet(global_index) => {
                let global = self.module.global_type(*global_index).ok_or_else(|| {
                    self.err(ValidationErrorKind::IllegalGlobalIndex {
                        global_index: *global_index,
                        all_global_count: self.module.all_global_count(),
                    })
                })?;
                self.push_val(Val(global.value_type));
                Ok(())
            }

            Instruction::GlobalSet(global_index) => {
                let global = self.module.global_type(*global_index).ok_or_else(|| {
                    self.err(ValidationErrorKind::IllegalGlobalIndex {
                        global_index: *global_index,
                        all_global_count: self.module.all_global_count(),
                    })
                })?;
                if !global.mutable {
                    return Err(self.err(ValidationErrorKind::ImmutableGlobalSet {
                        global_index: *global_index,
                    }));
                }
                self.need(Opcode::GlobalSet, 1)?;
                self.pop_expected(global.value_type, |actual_type| ValidationErrorKind::GlobalSetTypeMismatch {
                    global_index: *global_index,
                    expected_type: global.value_type,
                    actual_type,
                })
            }

            Instruction::Load(op, memarg) => {
                self.check_memory(*op, memarg)?;
                self.need(*op, 1)?;
                self.pop_address(*op)?;
                let t = access_type(*op).ok_or_else(|| self.err(ValidationErrorKind::IllegalOpbase { opbase: *op as u8 }))?;
                self.push_val(Val(t));
                Ok(())
            }

            Instruction::Store(op, memarg) => {
                self.check_memory(*op, memarg)?;
                self.need(*op, 2)?;
                let expected_type =
                    access_type(*op).ok_or_else(|| self.err(ValidationErrorKind::IllegalOpbase { opbase: *op as u8 }))?;
                let op = *op;
                self.pop_expected(expected_type, |actual_type| ValidationErrorKind::StoreValueTypeMismatch {
                    op_code_name: op.name(),
                    expected_type,
                    actual_type,
                })?;
                self.pop_address(op)
            }

            Instruction::MemorySize(memory_index) => {
                self.check_memory_index(*memory_index)?;
                self.push_val(Val(I32));
                Ok(())
            }

            Instruction::MemoryGrow(memory_index) => {
                self.check_memory_index(*memory_index)?;
                self.need(Opcode::MemoryGrow, 1)?;
                self.pop_expected(I32, |delta_type| ValidationErrorKind::MemoryGrowDeltaTypeNotI32 { delta_type })?;
                self.push_val(Val(I32));
                Ok(())
            }

            Instruction::I32Const(_) => {
                self.push_val(Val(I32));
                Ok(())
            }
            Instruction::I64Const(_) => {
                self.push_val(Val(I64));
                Ok(())
            }
            Instruction::F32Const(_) => {
                self.push_val(Val(F32));
                Ok(())
            }
            Instruction::F64Const(_) => {
                self.push_val(Val(F64));
                Ok(())
            }

            Instruction::Numeric(op) => self.numeric(*op),
        }
    }

    fn numeric(&mut self, op: Opcode) -> Result<(), ValidationError> {
        use Opcode::*;
        match op {
            // itestop (i32):i32
            I32Eqz => self.sig_unary(op, I32, I32),

            // irelop (i32,i32):i32
            I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS | I32GeU => {
                self.sig_binary(op, I32, I32)
            }

            // itestop (i64):i32
            I64Eqz => self.sig_unary(op, I64, I32),

            // irelop (i64,i64):i32
            I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS | I64GeU => {
                self.sig_binary(op, I64, I32)
            }

            // frelop (f32,f32):i32
            F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge => self.sig_binary(op, F32, I32),

            // frelop (f64,f64):i32
            F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge => self.sig_binary(op, F64, I32),

            // iunop (i32):i32
            I32Clz | I32Ctz | I32Popcnt => self.sig_unary(op, I32, I32),

            // ibinop (i32,i32):i32
            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or | I32Xor | I32Shl
            | I32ShrS | I32ShrU | I32Rotl | I32Rotr => self.sig_binary(op, I32, I32),

            // iunop (i64):i64
            I64Clz | I64Ctz | I64Popcnt => self.sig_unary(op, I64, I64),

            // ibinop (i64,i64):i64
            I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or | I64Xor | I64Shl
            | I64ShrS | I64ShrU | I64Rotl | I64Rotr => self.sig_binary(op, I64, I64),

            // funop (f32):f32
            F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt => self.sig_unary(op, F32, F32),

            // fbinop (f32,f32):f32
            F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign => self.sig_binary(op, F32, F32),

            // funop (f64):f64
            F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt => self.sig_unary(op, F64, F64),

            // fbinop (f64,f64):f64
            F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign => self.sig_binary(op, F64, F64),

            // cvtop (i64):i32
            I32WrapI64 => self.sig_unary(op, I64, I32),

            // cvtop (f32):i32
            I32TruncF32S | I32TruncF32U | I32ReinterpretF32 => self.sig_unary(op, F32, I32),

            // cvtop (f64):i32
            I32TruncF64S | I32TruncF64U => self.sig_unary(op, F64, I32),

            // cvtop (i32):i64
            I64ExtendI32S | I64ExtendI32U => self.sig_unary(op, I32, I64),

            // cvtop (f32):i64
            I64TruncF32S | I64TruncF32U => self.sig_unary(op, F32, I64),

            // cvtop (f64):i64
            I64TruncF64S | I64TruncF64U | I64ReinterpretF64 => self.sig_unary(op, F64, I64),

            // cvtop (i32):f32
            F32ConvertI32S | F32ConvertI32U | F32ReinterpretI32 => self.sig_unary(op, I32, F32),

            // cvtop (i64):f32
            F32ConvertI64S | F32ConvertI64U => self.sig_unary(op, I64, F32),

            // cvtop (f64):f32
            F32DemoteF64 => self.sig_unary(op, F64, F32),

            // cvtop (i32):f64
            F64ConvertI32S | F64ConvertI32U => self.sig_unary(op, I32, F64),

            // cvtop (i64):f64
            F64ConvertI64S | F64ConvertI64U | F64ReinterpretI64 => self.sig_unary(op, I64, F64),

            // cvtop (f32):f64
            F64PromoteF32 => self.sig_unary(op, F32, F64),

            _ => Err(self.err(ValidationErrorKind::IllegalOpbase { opbase: op as u8 })),
        }
    }
}
