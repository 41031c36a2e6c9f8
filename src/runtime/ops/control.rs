//! Control operators
//!
//! Branches name an entry of the function's target table; the target carries
//! the continuation and how the operand stack is reshaped on the way there.
//! Translation guarantees the ring is empty at every branch, so taking one
//! only has to touch the operand stack.

use crate::runtime::dispatch::{Activation, Call, Convention, Flow};
use crate::runtime::ring::ring_table;
use crate::runtime::ops::Handlers;
use crate::runtime::value::Native;
use crate::runtime::RuntimeError;

pub fn unreachable(_act: &mut Activation<'_>, _ip: usize) -> Result<Flow, RuntimeError> {
    Err(RuntimeError::Unreachable)
}

/// Unconditional branch to target `imm.a`
pub fn br<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let target = act.target(act.imm(ip)?.a)?;
    let next = act.branch(target)?;
    C::next(act, next)
}

#[inline(always)]
fn branch_if<C: Convention>(act: &mut Activation<'_>, ip: usize, taken: bool) -> Result<Flow, RuntimeError> {
    if taken {
        br::<C>(act, ip)
    } else {
        C::next(act, ip + 1)
    }
}

pub fn br_if<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let condition = act.stack.pop_i32()?;
    branch_if::<C>(act, ip, condition != 0)
}

pub fn ring_br_if<C: Convention, const P: usize>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let condition = i32::from_value(act.ring[P])?;
    branch_if::<C>(act, ip, condition != 0)
}

/// Branch when the condition is zero; the entry of an `if`.
pub fn br_unless<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let condition = act.stack.pop_i32()?;
    branch_if::<C>(act, ip, condition == 0)
}

pub fn ring_br_unless<C: Convention, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    let condition = i32::from_value(act.ring[P])?;
    branch_if::<C>(act, ip, condition == 0)
}

/// Targets `imm.a .. imm.a + imm.b` are the table, the one after them the default.
pub fn br_table<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let imm = act.imm(ip)?;
    let index = act.stack.pop_i32()? as u32;
    let slot = if index < imm.b { index } else { imm.b };
    let target = act.target(imm.a + slot)?;
    let next = act.branch(target)?;
    C::next(act, next)
}

/// Leave the function with its results on top of an otherwise empty stack.
pub fn ret(act: &mut Activation<'_>, _ip: usize) -> Result<Flow, RuntimeError> {
    act.stack.unwind(0, act.func.result_count)?;
    Ok(Flow::Return)
}

#[inline(always)]
fn after_call<C: Convention>(act: &mut Activation<'_>, ip: usize, call: Call) -> Result<Flow, RuntimeError> {
    match call {
        Call::Returned => C::next(act, ip + 1),
        Call::Enter(callee) => Ok(Flow::Call { callee, resume: ip + 1 }),
    }
}

/// Call function `imm.a` of this activation's module
pub fn call<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let function_index = act.imm(ip)?.a;
    let call = act.ctx.call(act.module_id, function_index, &mut act.stack)?;
    after_call::<C>(act, ip, call)
}

/// Call through the table with expected signature `imm.a`; the element index is on top.
pub fn call_indirect<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let type_index = act.imm(ip)?.a;
    let element_index = act.stack.pop_i32()? as u32;
    let call = act
        .ctx
        .call_indirect(act.module_id, type_index, element_index, &mut act.stack)?;
    after_call::<C>(act, ip, call)
}

pub fn conditional<C: Convention>() -> Handlers {
    Handlers {
        mem: br_if::<C>,
        ring: ring_table!(ring_br_if::<C>),
        pops: 1,
        push: None,
    }
}

pub fn inverted_conditional<C: Convention>() -> Handlers {
    Handlers {
        mem: br_unless::<C>,
        ring: ring_table!(ring_br_unless::<C>),
        pops: 1,
        push: None,
    }
}
