//! Binary encoding primitives and a small function-body assembler.
//!
//! Provides LEB128 integer encoding and IEEE 754 float encoding as specified
//! by the WebAssembly binary format, plus [`CodeBuilder`] for assembling
//! instruction sequences without a text-format front end.

use byteorder::{LittleEndian, WriteBytesExt};

use super::module::ValueType;
use super::opcode::Opcode;

/// Block type byte for a block with no result (§5.3.6)
pub const BLOCK_TYPE_EMPTY: u8 = 0x40;

pub fn emit_vu32(buf: &mut Vec<u8>, v: u32) {
    let mut value = v;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn emit_vs64(buf: &mut Vec<u8>, v: i64) {
    let mut value = v;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if (value == 0 && (byte & 0x40) == 0) || (value == -1 && (byte & 0x40) != 0) {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn emit_vs32(buf: &mut Vec<u8>, v: i32) {
    emit_vs64(buf, v as i64)
}

pub fn emit_f32(buf: &mut Vec<u8>, v: f32) {
    // writing into a Vec cannot fail
    let _ = buf.write_u32::<LittleEndian>(v.to_bits());
}

pub fn emit_f64(buf: &mut Vec<u8>, v: f64) {
    let _ = buf.write_u64::<LittleEndian>(v.to_bits());
}

/// Fluent assembler for instruction byte sequences.
///
/// ```
/// use ringvm::parser::encoding::CodeBuilder;
/// use ringvm::parser::opcode::Opcode;
///
/// let code = CodeBuilder::new()
///     .i32_const(1)
///     .i32_const(2)
///     .op(Opcode::I32Add)
///     .end()
///     .build();
/// assert_eq!(code, vec![0x41, 0x01, 0x41, 0x02, 0x6a, 0x0b]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct CodeBuilder {
    bytes: Vec<u8>,
}

impl CodeBuilder {
    pub fn new() -> CodeBuilder {
        CodeBuilder { bytes: Vec::new() }
    }

    pub fn op(mut self, op: Opcode) -> Self {
        self.bytes.push(op as u8);
        self
    }

    pub fn byte(mut self, byte: u8) -> Self {
        self.bytes.push(byte);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        emit_vu32(&mut self.bytes, v);
        self
    }

    pub fn i32_const(self, v: i32) -> Self {
        let mut s = self.op(Opcode::I32Const);
        emit_vs32(&mut s.bytes, v);
        s
    }

    pub fn i64_const(self, v: i64) -> Self {
        let mut s = self.op(Opcode::I64Const);
        emit_vs64(&mut s.bytes, v);
        s
    }

    pub fn f32_const(self, v: f32) -> Self {
        let mut s = self.op(Opcode::F32Const);
        emit_f32(&mut s.bytes, v);
        s
    }

    pub fn f64_const(self, v: f64) -> Self {
        let mut s = self.op(Opcode::F64Const);
        emit_f64(&mut s.bytes, v);
        s
    }

    pub fn local_get(self, index: u32) -> Self {
        self.op(Opcode::LocalGet).u32(index)
    }

    pub fn local_set(self, index: u32) -> Self {
        self.op(Opcode::LocalSet).u32(index)
    }

    pub fn local_tee(self, index: u32) -> Self {
        self.op(Opcode::LocalTee).u32(index)
    }

    pub fn global_get(self, index: u32) -> Self {
        self.op(Opcode::GlobalGet).u32(index)
    }

    pub fn global_set(self, index: u32) -> Self {
        self.op(Opcode::GlobalSet).u32(index)
    }

    fn block_type(self, result: Option<ValueType>) -> Self {
        match result {
            Some(t) => self.byte(t.emit_byte()),
            None => self.byte(BLOCK_TYPE_EMPTY),
        }
    }

    pub fn block(self, result: Option<ValueType>) -> Self {
        self.op(Opcode::Block).block_type(result)
    }

    pub fn loop_(self, result: Option<ValueType>) -> Self {
        self.op(Opcode::Loop).block_type(result)
    }

    pub fn if_(self, result: Option<ValueType>) -> Self {
        self.op(Opcode::If).block_type(result)
    }

    pub fn else_(self) -> Self {
        self.op(Opcode::Else)
    }

    pub fn end(self) -> Self {
        self.op(Opcode::End)
    }

    pub fn br(self, depth: u32) -> Self {
        self.op(Opcode::Br).u32(depth)
    }

    pub fn br_if(self, depth: u32) -> Self {
        self.op(Opcode::BrIf).u32(depth)
    }

    pub fn br_table(self, targets: &[u32], default: u32) -> Self {
        let mut s = self.op(Opcode::BrTable).u32(targets.len() as u32);
        for target in targets {
            s = s.u32(*target);
        }
        s.u32(default)
    }

    pub fn call(self, function_index: u32) -> Self {
        self.op(Opcode::Call).u32(function_index)
    }

    pub fn call_indirect(self, type_index: u32) -> Self {
        self.op(Opcode::CallIndirect).u32(type_index).byte(0x00)
    }

    /// Load or store with an explicit alignment exponent and offset.
    pub fn mem(self, op: Opcode, align: u32, offset: u32) -> Self {
        self.op(op).u32(align).u32(offset)
    }

    /// Load or store using the opcode's natural alignment.
    pub fn mem_natural(self, op: Opcode, offset: u32) -> Self {
        let align = op.natural_alignment().unwrap_or(0);
        self.mem(op, align, offset)
    }

    pub fn memory_size(self) -> Self {
        self.op(Opcode::MemorySize).byte(0x00)
    }

    pub fn memory_grow(self) -> Self {
        self.op(Opcode::MemoryGrow).byte(0x00)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}
