//! Memory operators
//!
//! Loads and stores compute `address + offset` in 64 bits and are bounds
//! checked by [`Memory`]. The instance memory is locked for the duration of
//! one instruction.

use byteorder::{ByteOrder, LittleEndian};

use crate::parser::module::ValueType;
use crate::parser::opcode::Opcode;
use crate::runtime::dispatch::{Activation, Convention, Flow};
use crate::runtime::memory::{effective_address, Memory};
use crate::runtime::ops::Handlers;
use crate::runtime::ring::ring_table;
use crate::runtime::value::Native;
use crate::runtime::{RuntimeError, Value};

pub trait LoadOp {
    type Out: Native;

    fn load(memory: &Memory, address: u64) -> Result<Self::Out, RuntimeError>;
}

pub trait StoreOp {
    type In: Native;

    fn store(memory: &mut Memory, address: u64, value: Self::In) -> Result<(), RuntimeError>;
}

macro_rules! loads {
    ($($name:ident: $n:literal => $out:ty = |$b:ident| $conv:expr;)*) => {
        $(
            pub struct $name;

            impl LoadOp for $name {
                type Out = $out;

                #[inline(always)]
                fn load(memory: &Memory, address: u64) -> Result<$out, RuntimeError> {
                    let $b = memory.load::<$n>(address)?;
                    Ok($conv)
                }
            }
        )*

        pub fn load<C: Convention>(op: Opcode) -> Option<Handlers> {
            match op {
                $(Opcode::$name => Some(Handlers {
                    mem: mem_load::<C, $name>,
                    ring: ring_table!(ring_load::<C, $name>),
                    pops: 1,
                    push: Some(<$out as Native>::TYPE),
                }),)*
                _ => None,
            }
        }
    };
}

macro_rules! stores {
    ($($name:ident($in:ty) = |$v:ident| $bytes:expr;)*) => {
        $(
            pub struct $name;

            impl StoreOp for $name {
                type In = $in;

                #[inline(always)]
                fn store(memory: &mut Memory, address: u64, $v: $in) -> Result<(), RuntimeError> {
                    memory.store(address, $bytes)
                }
            }
        )*

        pub fn store<C: Convention>(op: Opcode) -> Option<Handlers> {
            match op {
                $(Opcode::$name => Some(Handlers {
                    mem: mem_store::<C, $name>,
                    ring: ring_table!(ring_store::<C, $name>),
                    pops: 2,
                    push: None,
                }),)*
                _ => None,
            }
        }
    };
}

loads! {
    I32Load: 4 => i32 = |b| LittleEndian::read_i32(&b);
    I64Load: 8 => i64 = |b| LittleEndian::read_i64(&b);
    F32Load: 4 => f32 = |b| LittleEndian::read_f32(&b);
    F64Load: 8 => f64 = |b| LittleEndian::read_f64(&b);
    I32Load8S: 1 => i32 = |b| b[0] as i8 as i32;
    I32Load8U: 1 => i32 = |b| b[0] as i32;
    I32Load16S: 2 => i32 = |b| LittleEndian::read_i16(&b) as i32;
    I32Load16U: 2 => i32 = |b| LittleEndian::read_u16(&b) as i32;
    I64Load8S: 1 => i64 = |b| b[0] as i8 as i64;
    I64Load8U: 1 => i64 = |b| b[0] as i64;
    I64Load16S: 2 => i64 = |b| LittleEndian::read_i16(&b) as i64;
    I64Load16U: 2 => i64 = |b| LittleEndian::read_u16(&b) as i64;
    I64Load32S: 4 => i64 = |b| LittleEndian::read_i32(&b) as i64;
    I64Load32U: 4 => i64 = |b| LittleEndian::read_u32(&b) as i64;
}

stores! {
    I32Store(i32) = |v| v.to_le_bytes();
    I64Store(i64) = |v| v.to_le_bytes();
    F32Store(f32) = |v| v.to_bits().to_le_bytes();
    F64Store(f64) = |v| v.to_bits().to_le_bytes();
    I32Store8(i32) = |v| [v as u8];
    I32Store16(i32) = |v| (v as u16).to_le_bytes();
    I64Store8(i64) = |v| [v as u8];
    I64Store16(i64) = |v| (v as u16).to_le_bytes();
    I64Store32(i64) = |v| (v as u32).to_le_bytes();
}

#[inline(always)]
fn with_memory<R>(
    act: &Activation<'_>,
    f: impl FnOnce(&mut Memory) -> Result<R, RuntimeError>,
) -> Result<R, RuntimeError> {
    let memory = act.memory.as_ref().ok_or(RuntimeError::NoMemory)?;
    let mut guard = memory.lock().map_err(|_| RuntimeError::LockPoisoned)?;
    f(&mut *guard)
}

pub fn mem_load<C: Convention, O: LoadOp>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let offset = act.imm(ip)?.a;
    let address = effective_address(act.stack.pop_i32()?, offset);
    let value = with_memory(act, |memory| O::load(memory, address))?;
    act.stack.push(value.into_value());
    C::next(act, ip + 1)
}

/// Address at `P`, replaced by the loaded value
pub fn ring_load<C: Convention, O: LoadOp, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    let offset = act.imm(ip)?.a;
    let address = effective_address(i32::from_value(act.ring[P])?, offset);
    let value = with_memory(act, |memory| O::load(memory, address))?;
    act.ring[P] = value.into_value();
    C::next(act, ip + 1)
}

pub fn mem_store<C: Convention, O: StoreOp>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let offset = act.imm(ip)?.a;
    let value = act.stack.pop_native::<O::In>()?;
    let address = effective_address(act.stack.pop_i32()?, offset);
    with_memory(act, |memory| O::store(memory, address, value))?;
    C::next(act, ip + 1)
}

/// Value at `P`, address one deeper
pub fn ring_store<C: Convention, O: StoreOp, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    let offset = act.imm(ip)?.a;
    let value = O::In::from_value(act.ring[P])?;
    let address = effective_address(i32::from_value(act.ring[act.ring_next(P)])?, offset);
    with_memory(act, |memory| O::store(memory, address, value))?;
    C::next(act, ip + 1)
}

pub fn memory_size<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let pages = with_memory(act, |memory| Ok(memory.size()))?;
    act.stack.push(Value::I32(pages as i32));
    C::next(act, ip + 1)
}

pub fn ring_memory_size<C: Convention, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    let pages = with_memory(act, |memory| Ok(memory.size()))?;
    act.ring[P] = Value::I32(pages as i32);
    C::next(act, ip + 1)
}

pub fn memory_grow<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let delta = act.stack.pop_i32()? as u32;
    let previous = with_memory(act, |memory| Ok(memory.grow(delta)))?;
    act.stack.push(Value::I32(previous));
    C::next(act, ip + 1)
}

pub fn ring_memory_grow<C: Convention, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    let delta = i32::from_value(act.ring[P])? as u32;
    let previous = with_memory(act, |memory| Ok(memory.grow(delta)))?;
    act.ring[P] = Value::I32(previous);
    C::next(act, ip + 1)
}

pub fn size<C: Convention>() -> Handlers {
    Handlers {
        mem: memory_size::<C>,
        ring: ring_table!(ring_memory_size::<C>),
        pops: 0,
        push: Some(ValueType::I32),
    }
}

pub fn grow<C: Convention>() -> Handlers {
    Handlers {
        mem: memory_grow::<C>,
        ring: ring_table!(ring_memory_grow::<C>),
        pops: 1,
        push: Some(ValueType::I32),
    }
}
