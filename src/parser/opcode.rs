//! The WebAssembly 1.0 (MVP) opcode set.
//!
//! `Opcode::name` gives the text-format mnemonic, which is also the
//! `op_code_name` carried in validation diagnostics.

macro_rules! opcodes {
    ($($name:ident = $byte:literal => $text:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $byte,)*
        }

        impl Opcode {
            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $($byte => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => $text,)*
                }
            }
        }
    };
}

opcodes! {
    Unreachable = 0x00 => "unreachable",
    Nop = 0x01 => "nop",
    Block = 0x02 => "block",
    Loop = 0x03 => "loop",
    If = 0x04 => "if",
    Else = 0x05 => "else",
    End = 0x0b => "end",
    Br = 0x0c => "br",
    BrIf = 0x0d => "br_if",
    BrTable = 0x0e => "br_table",
    Return = 0x0f => "return",
    Call = 0x10 => "call",
    CallIndirect = 0x11 => "call_indirect",

    Drop = 0x1a => "drop",
    Select = 0x1b => "select",

    LocalGet = 0x20 => "local.get",
    LocalSet = 0x21 => "local.set",
    LocalTee = 0x22 => "local.tee",
    GlobalGet = 0x23 => "global.get",
    GlobalSet = 0x24 => "global.set",

    I32Load = 0x28 => "i32.load",
    I64Load = 0x29 => "i64.load",
    F32Load = 0x2a => "f32.load",
    F64Load = 0x2b => "f64.load",
    I32Load8S = 0x2c => "i32.load8_s",
    I32Load8U = 0x2d => "i32.load8_u",
    I32Load16S = 0x2e => "i32.load16_s",
    I32Load16U = 0x2f => "i32.load16_u",
    I64Load8S = 0x30 => "i64.load8_s",
    I64Load8U = 0x31 => "i64.load8_u",
    I64Load16S = 0x32 => "i64.load16_s",
    I64Load16U = 0x33 => "i64.load16_u",
    I64Load32S = 0x34 => "i64.load32_s",
    I64Load32U = 0x35 => "i64.load32_u",
    I32Store = 0x36 => "i32.store",
    I64Store = 0x37 => "i64.store",
    F32Store = 0x38 => "f32.store",
    F64Store = 0x39 => "f64.store",
    I32Store8 = 0x3a => "i32.store8",
    I32Store16 = 0x3b => "i32.store16",
    I64Store8 = 0x3c => "i64.store8",
    I64Store16 = 0x3d => "i64.store16",
    I64Store32 = 0x3e => "i64.store32",
    MemorySize = 0x3f => "memory.size",
    MemoryGrow = 0x40 => "memory.grow",

    I32Const = 0x41 => "i32.const",
    I64Const = 0x42 => "i64.const",
    F32Const = 0x43 => "f32.const",
    F64Const = 0x44 => "f64.const",

    I32Eqz = 0x45 => "i32.eqz",
    I32Eq = 0x46 => "i32.eq",
    I32Ne = 0x47 => "i32.ne",
    I32LtS = 0x48 => "i32.lt_s",
    I32LtU = 0x49 => "i32.lt_u",
    I32GtS = 0x4a => "i32.gt_s",
    I32GtU = 0x4b => "i32.gt_u",
    I32LeS = 0x4c => "i32.le_s",
    I32LeU = 0x4d => "i32.le_u",
    I32GeS = 0x4e => "i32.ge_s",
    I32GeU = 0x4f => "i32.ge_u",

    I64Eqz = 0x50 => "i64.eqz",
    I64Eq = 0x51 => "i64.eq",
    I64Ne = 0x52 => "i64.ne",
    I64LtS = 0x53 => "i64.lt_s",
    I64LtU = 0x54 => "i64.lt_u",
    I64GtS = 0x55 => "i64.gt_s",
    I64GtU = 0x56 => "i64.gt_u",
    I64LeS = 0x57 => "i64.le_s",
    I64LeU = 0x58 => "i64.le_u",
    I64GeS = 0x59 => "i64.ge_s",
    I64GeU = 0x5a => "i64.ge_u",

    F32Eq = 0x5b => "f32.eq",
    F32Ne = 0x5c => "f32.ne",
    F32Lt = 0x5d => "f32.lt",
    F32Gt = 0x5e => "f32.gt",
    F32Le = 0x5f => "f32.le",
    F32Ge = 0x60 => "f32.ge",

    F64Eq = 0x61 => "f64.eq",
    F64Ne = 0x62 => "f64.ne",
    F64Lt = 0x63 => "f64.lt",
    F64Gt = 0x64 => "f64.gt",
    F64Le = 0x65 => "f64.le",
    F64Ge = 0x66 => "f64.ge",

    I32Clz = 0x67 => "i32.clz",
    I32Ctz = 0x68 => "i32.ctz",
    I32Popcnt = 0x69 => "i32.popcnt",
    I32Add = 0x6a => "i32.add",
    I32Sub = 0x6b => "i32.sub",
    I32Mul = 0x6c => "i32.mul",
    I32DivS = 0x6d => "i32.div_s",
    I32DivU = 0x6e => "i32.div_u",
    I32RemS = 0x6f => "i32.rem_s",
    I32RemU = 0x70 => "i32.rem_u",
    I32And = 0x71 => "i32.and",
    I32Or = 0x72 => "i32.or",
    I32Xor = 0x73 => "i32.xor",
    I32Shl = 0x74 => "i32.shl",
    I32ShrS = 0x75 => "i32.shr_s",
    I32ShrU = 0x76 => "i32.shr_u",
    I32Rotl = 0x77 => "i32.rotl",
    I32Rotr = 0x78 => "i32.rotr",

    I64Clz = 0x79 => "i64.clz",
    I64Ctz = 0x7a => "i64.ctz",
    I64Popcnt = 0x7b => "i64.popcnt",
    I64Add = 0x7c => "i64.add",
    I64Sub = 0x7d => "i64.sub",
    I64Mul = 0x7e => "i64.mul",
    I64DivS = 0x7f => "i64.div_s",
    I64DivU = 0x80 => "i64.div_u",
    I64RemS = 0x81 => "i64.rem_s",
    I64RemU = 0x82 => "i64.rem_u",
    I64And = 0x83 => "i64.and",
    I64Or = 0x84 => "i64.or",
    I64Xor = 0x85 => "i64.xor",
    I64Shl = 0x86 => "i64.shl",
    I64ShrS = 0x87 => "i64.shr_s",
    I64ShrU = 0x88 => "i64.shr_u",
    I64Rotl = 0x89 => "i64.rotl",
    I64Rotr = 0x8a => "i64.rotr",

    F32Abs = 0x8b => "f32.abs",
    F32Neg = 0x8c => "f32.neg",
    F32Ceil = 0x8d => "f32.ceil",
    F32Floor = 0x8e => "f32.floor",
    F32Trunc = 0x8f => "f32.trunc",
    F32Nearest = 0x90 => "f32.nearest",
    F32Sqrt = 0x91 => "f32.sqrt",
    F32Add = 0x92 => "f32.add",
    F32Sub = 0x93 => "f32.sub",
    F32Mul = 0x94 => "f32.mul",
    F32Div = 0x95 => "f32.div",
    F32Min = 0x96 => "f32.min",
    F32Max = 0x97 => "f32.max",
    F32Copysign = 0x98 => "f32.copysign",

    F64Abs = 0x99 => "f64.abs",
    F64Neg = 0x9a => "f64.neg",
    F64Ceil = 0x9b => "f64.ceil",
    F64Floor = 0x9c => "f64.floor",
    F64Trunc = 0x9d => "f64.trunc",
    F64Nearest = 0x9e => "f64.nearest",
    F64Sqrt = 0x9f => "f64.sqrt",
    F64Add = 0xa0 => "f64.add",
    F64Sub = 0xa1 => "f64.sub",
    F64Mul = 0xa2 => "f64.mul",
    F64Div = 0xa3 => "f64.div",
    F64Min = 0xa4 => "f64.min",
    F64Max = 0xa5 => "f64.max",
    F64Copysign = 0xa6 => "f64.copysign",

    I32WrapI64 = 0xa7 => "i32.wrap_i64",
    I32TruncF32S = 0xa8 => "i32.trunc_f32_s",
    I32TruncF32U = 0xa9 => "i32.trunc_f32_u",
    I32TruncF64S = 0xaa => "i32.trunc_f64_s",
    I32TruncF64U = 0xab => "i32.trunc_f64_u",
    I64ExtendI32S = 0xac => "i64.extend_i32_s",
    I64ExtendI32U = 0xad => "i64.extend_i32_u",
    I64TruncF32S = 0xae => "i64.trunc_f32_s",
    I64TruncF32U = 0xaf => "i64.trunc_f32_u",
    I64TruncF64S = 0xb0 => "i64.trunc_f64_s",
    I64TruncF64U = 0xb1 => "i64.trunc_f64_u",
    F32ConvertI32S = 0xb2 => "f32.convert_i32_s",
    F32ConvertI32U = 0xb3 => "f32.convert_i32_u",
    F32ConvertI64S = 0xb4 => "f32.convert_i64_s",
    F32ConvertI64U = 0xb5 => "f32.convert_i64_u",
    F32DemoteF64 = 0xb6 => "f32.demote_f64",
    F64ConvertI32S = 0xb7 => "f64.convert_i32_s",
    F64ConvertI32U = 0xb8 => "f64.convert_i32_u",
    F64ConvertI64S = 0xb9 => "f64.convert_i64_s",
    F64ConvertI64U = 0xba => "f64.convert_i64_u",
    F64PromoteF32 = 0xbb => "f64.promote_f32",
    I32ReinterpretF32 = 0xbc => "i32.reinterpret_f32",
    I64ReinterpretF64 = 0xbd => "i64.reinterpret_f64",
    F32ReinterpretI32 = 0xbe => "f32.reinterpret_i32",
    F64ReinterpretI64 = 0xbf => "f64.reinterpret_i64",
}

impl Opcode {
    /// log2 of the natural access width for loads and stores, the largest
    /// alignment a memarg may declare.
    pub fn natural_alignment(self) -> Option<u32> {
        use Opcode::*;
        match self {
            I32Load8S | I32Load8U | I64Load8S | I64Load8U | I32Store8 | I64Store8 => Some(0),
            I32Load16S | I32Load16U | I64Load16S | I64Load16U | I32Store16 | I64Store16 => Some(1),
            I32Load | F32Load | I64Load32S | I64Load32U | I32Store | F32Store | I64Store32 => Some(2),
            I64Load | F64Load | I64Store | F64Store => Some(3),
            _ => None,
        }
    }

    pub fn is_load(self) -> bool {
        (Opcode::I32Load as u8..=Opcode::I64Load32U as u8).contains(&(self as u8))
    }

    pub fn is_store(self) -> bool {
        (Opcode::I32Store as u8..=Opcode::I64Store32 as u8).contains(&(self as u8))
    }

    /// Plain numeric operators: no immediates, fixed operand and result types.
    pub fn is_numeric(self) -> bool {
        (Opcode::I32Eqz as u8..=Opcode::F64ReinterpretI64 as u8).contains(&(self as u8))
    }
}
