//! Decoding of single instructions from a function body.
//!
//! Both the validator and the threaded-code translator walk a body through
//! [`decode`], so immediate-decoding faults are reported identically by
//! both: as a [`ValidationError`] positioned at the immediate that failed.

use super::module::ValueType;
use super::opcode::Opcode;
use super::reader::CodeReader;
use super::validate::{ValidationError, ValidationErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValueType),
}

impl BlockType {
    pub fn result(&self) -> Option<ValueType> {
        match self {
            BlockType::Empty => None,
            BlockType::Value(t) => Some(*t),
        }
    }

    pub fn arity(&self) -> usize {
        self.result().map_or(0, |_| 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    /// Alignment exponent (log2 of the byte alignment).
    pub align: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Unreachable,
    Nop,
    Block(BlockType),
    Loop(BlockType),
    If(BlockType),
    Else,
    End,
    Br(u32),
    BrIf(u32),
    BrTable { targets: Vec<u32>, default: u32 },
    Return,
    Call(u32),
    CallIndirect { type_index: u32, table_index: u32 },

    Drop,
    Select,

    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    Load(Opcode, MemArg),
    Store(Opcode, MemArg),
    MemorySize(u32),
    MemoryGrow(u32),

    I32Const(i32),
    I64Const(i64),
    /// Raw bit pattern, so NaN payloads survive.
    F32Const(u32),
    F64Const(u64),

    /// Any operator without immediates whose typing is fixed by its opcode.
    Numeric(Opcode),
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Unreachable => Opcode::Unreachable,
            Instruction::Nop => Opcode::Nop,
            Instruction::Block(_) => Opcode::Block,
            Instruction::Loop(_) => Opcode::Loop,
            Instruction::If(_) => Opcode::If,
            Instruction::Else => Opcode::Else,
            Instruction::End => Opcode::End,
            Instruction::Br(_) => Opcode::Br,
            Instruction::BrIf(_) => Opcode::BrIf,
            Instruction::BrTable { .. } => Opcode::BrTable,
            Instruction::Return => Opcode::Return,
            Instruction::Call(_) => Opcode::Call,
            Instruction::CallIndirect { .. } => Opcode::CallIndirect,
            Instruction::Drop => Opcode::Drop,
            Instruction::Select => Opcode::Select,
            Instruction::LocalGet(_) => Opcode::LocalGet,
            Instruction::LocalSet(_) => Opcode::LocalSet,
            Instruction::LocalTee(_) => Opcode::LocalTee,
            Instruction::GlobalGet(_) => Opcode::GlobalGet,
            Instruction::GlobalSet(_) => Opcode::GlobalSet,
            Instruction::Load(op, _) | Instruction::Store(op, _) => *op,
            Instruction::MemorySize(_) => Opcode::MemorySize,
            Instruction::MemoryGrow(_) => Opcode::MemoryGrow,
            Instruction::I32Const(_) => Opcode::I32Const,
            Instruction::I64Const(_) => Opcode::I64Const,
            Instruction::F32Const(_) => Opcode::F32Const,
            Instruction::F64Const(_) => Opcode::F64Const,
            Instruction::Numeric(op) => *op,
        }
    }
}

/// Reads an immediate, mapping any read failure to `kind` at the immediate's offset.
fn imm<T, E>(
    reader: &mut CodeReader<'_>,
    kind: ValidationErrorKind,
    read: impl FnOnce(&mut CodeReader<'_>) -> Result<T, E>,
) -> Result<T, ValidationError> {
    let offset = reader.offset();
    read(reader).map_err(|_| ValidationError::new(offset, kind))
}

fn block_type(reader: &mut CodeReader<'_>) -> Result<BlockType, ValidationError> {
    let offset = reader.offset();
    let byte = reader
        .read_u8()
        .map_err(|_| ValidationError::new(offset, ValidationErrorKind::MissingBlockType))?;
    if byte == super::encoding::BLOCK_TYPE_EMPTY {
        return Ok(BlockType::Empty);
    }
    ValueType::decode(byte)
        .map(BlockType::Value)
        .ok_or_else(|| ValidationError::new(offset, ValidationErrorKind::IllegalBlockType { block_type: byte }))
}

fn memarg(reader: &mut CodeReader<'_>) -> Result<MemArg, ValidationError> {
    let align = imm(reader, ValidationErrorKind::InvalidMemargAlign, |r| r.read_vu32())?;
    let offset = imm(reader, ValidationErrorKind::InvalidMemargOffset, |r| r.read_vu32())?;
    Ok(MemArg { align, offset })
}

/// Decodes the instruction at the reader's position.
///
/// The caller is expected to check for an empty reader first; decoding at
/// the end of the code reports `missing_end`.
pub fn decode(reader: &mut CodeReader<'_>) -> Result<Instruction, ValidationError> {
    use ValidationErrorKind::*;

    let op_offset = reader.offset();
    let byte = reader
        .read_u8()
        .map_err(|_| ValidationError::new(op_offset, MissingEnd))?;
    let op = Opcode::from_byte(byte).ok_or_else(|| ValidationError::new(op_offset, IllegalOpbase { opbase: byte }))?;

    let inst = match op {
        Opcode::Unreachable => Instruction::Unreachable,
        Opcode::Nop => Instruction::Nop,
        Opcode::Block => Instruction::Block(block_type(reader)?),
        Opcode::Loop => Instruction::Loop(block_type(reader)?),
        Opcode::If => Instruction::If(block_type(reader)?),
        Opcode::Else => Instruction::Else,
        Opcode::End => Instruction::End,
        Opcode::Br => Instruction::Br(imm(reader, InvalidLabelIndex, |r| r.read_vu32())?),
        Opcode::BrIf => Instruction::BrIf(imm(reader, InvalidLabelIndex, |r| r.read_vu32())?),
        Opcode::BrTable => {
            let count = imm(reader, InvalidLabelIndex, |r| r.read_vu32())?;
            // every target takes at least one byte
            let mut targets = Vec::with_capacity((count as usize).min(reader.remaining()));
            for _ in 0..count {
                targets.push(imm(reader, InvalidLabelIndex, |r| r.read_vu32())?);
            }
            let default = imm(reader, InvalidLabelIndex, |r| r.read_vu32())?;
            Instruction::BrTable { targets, default }
        }
        Opcode::Return => Instruction::Return,
        Opcode::Call => Instruction::Call(imm(reader, InvalidFunctionIndexEncoding, |r| r.read_vu32())?),
        Opcode::CallIndirect => {
            let type_index = imm(reader, InvalidTypeIndex, |r| r.read_vu32())?;
            let table_index = imm(reader, InvalidTableIndex, |r| r.read_u8())? as u32;
            Instruction::CallIndirect {
                type_index,
                table_index,
            }
        }
        Opcode::Drop => Instruction::Drop,
        Opcode::Select => Instruction::Select,
        Opcode::LocalGet => Instruction::LocalGet(imm(reader, InvalidLocalIndex, |r| r.read_vu32())?),
        Opcode::LocalSet => Instruction::LocalSet(imm(reader, InvalidLocalIndex, |r| r.read_vu32())?),
        Opcode::LocalTee => Instruction::LocalTee(imm(reader, InvalidLocalIndex, |r| r.read_vu32())?),
        Opcode::GlobalGet => Instruction::GlobalGet(imm(reader, InvalidGlobalIndex, |r| r.read_vu32())?),
        Opcode::GlobalSet => Instruction::GlobalSet(imm(reader, InvalidGlobalIndex, |r| r.read_vu32())?),
        Opcode::MemorySize => Instruction::MemorySize(imm(reader, InvalidMemoryIndex, |r| r.read_u8())? as u32),
        Opcode::MemoryGrow => Instruction::MemoryGrow(imm(reader, InvalidMemoryIndex, |r| r.read_u8())? as u32),
        Opcode::I32Const => Instruction::I32Const(imm(
            reader,
            InvalidConstImmediate { op_code_name: op.name() },
            |r| r.read_vs32(),
        )?),
        Opcode::I64Const => Instruction::I64Const(imm(
            reader,
            InvalidConstImmediate { op_code_name: op.name() },
            |r| r.read_vs64(),
        )?),
        Opcode::F32Const => Instruction::F32Const(imm(
            reader,
            InvalidConstImmediate { op_code_name: op.name() },
            |r| r.read_f32_bits(),
        )?),
        Opcode::F64Const => Instruction::F64Const(imm(
            reader,
            InvalidConstImmediate { op_code_name: op.name() },
            |r| r.read_f64_bits(),
        )?),
        op if op.is_load() => Instruction::Load(op, memarg(reader)?),
        op if op.is_store() => Instruction::Store(op, memarg(reader)?),
        op => Instruction::Numeric(op),
    };

    Ok(inst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::encoding::CodeBuilder;

    fn decode_all(code: &[u8]) -> Result<Vec<Instruction>, ValidationError> {
        let mut reader = CodeReader::new(code, 0);
        let mut out = Vec::new();
        while !reader.is_empty() {
            out.push(decode(&mut reader)?);
        }
        Ok(out)
    }

    #[test]
    fn test_decode_sequence() {
        let code = CodeBuilder::new()
            .i32_const(-5)
            .local_tee(3)
            .br_table(&[0, 1], 2)
            .mem(Opcode::F32Store, 1, 16)
            .f64_const(2.5)
            .op(Opcode::I64Popcnt)
            .end()
            .build();
        assert_eq!(
            decode_all(&code).unwrap(),
            vec![
                Instruction::I32Const(-5),
                Instruction::LocalTee(3),
                Instruction::BrTable {
                    targets: vec![0, 1],
                    default: 2
                },
                Instruction::Store(Opcode::F32Store, MemArg { align: 1, offset: 16 }),
                Instruction::F64Const(2.5f64.to_bits()),
                Instruction::Numeric(Opcode::I64Popcnt),
                Instruction::End,
            ]
        );
    }

    #[test]
    fn test_decode_errors_carry_immediate_offset() {
        // 0x06 is not an MVP opcode
        let err = decode_all(&[0x01, 0x06]).unwrap_err();
        assert_eq!(err.offset, 1);
        assert_eq!(err.kind, ValidationErrorKind::IllegalOpbase { opbase: 0x06 });

        let err = decode_all(&[0x02]).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::MissingBlockType);
        assert_eq!(err.offset, 1);

        let err = decode_all(&[0x02, 0x70]).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::IllegalBlockType { block_type: 0x70 });

        let err = decode_all(&[0x28, 0x02]).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::InvalidMemargOffset);
        assert_eq!(err.offset, 2);

        let err = decode_all(&[0x42, 0x80]).unwrap_err();
        assert_eq!(
            err.kind,
            ValidationErrorKind::InvalidConstImmediate {
                op_code_name: "i64.const"
            }
        );
    }
}
