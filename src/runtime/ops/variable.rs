//! Constants, locals, globals and the parametric operators
//!
//! Their stack effect depends on a type known only at translation time, so
//! the families are built from that type rather than looked up by opcode.

use crate::parser::module::ValueType;
use crate::runtime::dispatch::{Activation, Convention, Flow};
use crate::runtime::ops::Handlers;
use crate::runtime::ring::ring_table;
use crate::runtime::value::Native;
use crate::runtime::RuntimeError;

/// Push `imm.value`
pub fn push_const<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let value = act.imm(ip)?.value;
    act.stack.push(value);
    C::next(act, ip + 1)
}

pub fn ring_const<C: Convention, const P: usize>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    act.ring[P] = act.imm(ip)?.value;
    C::next(act, ip + 1)
}

pub fn local_get<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let value = act.local(act.imm(ip)?.a)?;
    act.stack.push(value);
    C::next(act, ip + 1)
}

pub fn ring_local_get<C: Convention, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    act.ring[P] = act.local(act.imm(ip)?.a)?;
    C::next(act, ip + 1)
}

pub fn local_set<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let index = act.imm(ip)?.a;
    let value = act.stack.pop()?;
    act.set_local(index, value)?;
    C::next(act, ip + 1)
}

pub fn ring_local_set<C: Convention, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    let index = act.imm(ip)?.a;
    let value = act.ring[P];
    act.set_local(index, value)?;
    C::next(act, ip + 1)
}

pub fn local_tee<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let index = act.imm(ip)?.a;
    let value = *act.stack.peek().ok_or(RuntimeError::StackUnderflow)?;
    act.set_local(index, value)?;
    C::next(act, ip + 1)
}

pub fn ring_local_tee<C: Convention, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    let index = act.imm(ip)?.a;
    let value = act.ring[P];
    act.set_local(index, value)?;
    C::next(act, ip + 1)
}

pub fn global_get<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let value = act.ctx.global_get(act.imm(ip)?.a)?;
    act.stack.push(value);
    C::next(act, ip + 1)
}

pub fn ring_global_get<C: Convention, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    act.ring[P] = act.ctx.global_get(act.imm(ip)?.a)?;
    C::next(act, ip + 1)
}

pub fn global_set<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let index = act.imm(ip)?.a;
    let value = act.stack.pop()?;
    act.ctx.global_set(index, value)?;
    C::next(act, ip + 1)
}

pub fn ring_global_set<C: Convention, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    let index = act.imm(ip)?.a;
    let value = act.ring[P];
    act.ctx.global_set(index, value)?;
    C::next(act, ip + 1)
}

/// Only emitted for values on the operand stack; a cached drop needs no record.
pub fn drop_value<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    act.stack.pop()?;
    C::next(act, ip + 1)
}

pub fn select<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let condition = act.stack.pop_i32()?;
    let second = act.stack.pop()?;
    let first = act.stack.pop()?;
    act.stack.push(if condition != 0 { first } else { second });
    C::next(act, ip + 1)
}

/// Condition at `P`, second operand one deeper, first operand (and the result) below that.
pub fn ring_select<C: Convention, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    let second_pos = act.ring_next(P);
    let first_pos = act.ring_next(second_pos);
    if i32::from_value(act.ring[P])? == 0 {
        act.ring[first_pos] = act.ring[second_pos];
    }
    C::next(act, ip + 1)
}

pub fn constant<C: Convention>(value_type: ValueType) -> Handlers {
    Handlers {
        mem: push_const::<C>,
        ring: ring_table!(ring_const::<C>),
        pops: 0,
        push: Some(value_type),
    }
}

pub fn get_local<C: Convention>(value_type: ValueType) -> Handlers {
    Handlers {
        mem: local_get::<C>,
        ring: ring_table!(ring_local_get::<C>),
        pops: 0,
        push: Some(value_type),
    }
}

pub fn set_local<C: Convention>() -> Handlers {
    Handlers {
        mem: local_set::<C>,
        ring: ring_table!(ring_local_set::<C>),
        pops: 1,
        push: None,
    }
}

pub fn tee_local<C: Convention>(value_type: ValueType) -> Handlers {
    Handlers {
        mem: local_tee::<C>,
        ring: ring_table!(ring_local_tee::<C>),
        pops: 1,
        push: Some(value_type),
    }
}

pub fn get_global<C: Convention>(value_type: ValueType) -> Handlers {
    Handlers {
        mem: global_get::<C>,
        ring: ring_table!(ring_global_get::<C>),
        pops: 0,
        push: Some(value_type),
    }
}

pub fn set_global<C: Convention>() -> Handlers {
    Handlers {
        mem: global_set::<C>,
        ring: ring_table!(ring_global_set::<C>),
        pops: 1,
        push: None,
    }
}

pub fn choose<C: Convention>(value_type: ValueType) -> Handlers {
    Handlers {
        mem: select::<C>,
        ring: ring_table!(ring_select::<C>),
        pops: 3,
        push: Some(value_type),
    }
}
