//! Opcode fusion
//!
//! A pass over a decoded body that replaces a few hand-picked instruction
//! sequences with a single record. Each fused handler performs exactly the
//! effects of its sequence, in order; disabling fusion changes speed only.
//!
//! Patterns never span block structure, and structured control flow only
//! ever lands on block boundaries, so no branch can enter a pattern midway.

use tracing::trace;

use crate::parser::instruction::Instruction;
use crate::parser::opcode::Opcode;
use crate::runtime::dispatch::{Activation, Convention, Flow};
use crate::runtime::value::Native;
use crate::runtime::{RuntimeError, Value};

/// Loop bound of a counted loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Local(u32),
    Const(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    LtU,
    LtS,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    I32,
    I64,
}

/// A matched sequence. Branching patterns hold the index of their branch
/// target once translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fused {
    /// `local.get i; i32.const step; i32.add; local.tee i; <bound>; <cmp>; br_if`
    IncCmpBrIf {
        local: u32,
        step: i32,
        bound: Bound,
        compare: Compare,
        target: u32,
    },
    /// `local.get p; i32.const step; i32.add; local.set p; local.get p;
    /// local.get end; i32.ne; br_if`
    PtrIncNeBrIf {
        ptr: u32,
        end: u32,
        step: i32,
        target: u32,
    },
    /// `local.get s; local.get i; i32.const step; i32.add; local.tee i;
    /// f64.convert_i32_u; f64.lt; i32.eqz; br_if`
    F64SqrtLoopCmp {
        limit: u32,
        counter: u32,
        step: i32,
        target: u32,
    },
    /// `local.get a; local.get b; mul; local.get c; add; local.set dst`
    MulAddSet {
        width: Width,
        a: u32,
        b: u32,
        c: u32,
        dst: u32,
    },
}

impl Fused {
    pub fn name(&self) -> &'static str {
        match self {
            Fused::IncCmpBrIf { .. } => "inc_cmp_br_if",
            Fused::PtrIncNeBrIf { .. } => "ptr_inc_ne_br_if",
            Fused::F64SqrtLoopCmp { .. } => "f64_sqrt_loop_cmp",
            Fused::MulAddSet { .. } => "mul_add_set",
        }
    }
}

/// One entry of a body after fusion.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Plain(u32, Instruction),
    /// A fused pattern; `depth` is the label depth of its branch, if it has one.
    Fused { offset: u32, fused: Fused, depth: Option<u32> },
}

fn match_inc_cmp_br_if(window: &[(u32, Instruction)]) -> Option<(Fused, u32, usize)> {
    use Instruction::*;
    match window {
        [(_, LocalGet(i)), (_, I32Const(step)), (_, Numeric(Opcode::I32Add)), (_, LocalTee(t)), (_, bound), (_, Numeric(cmp)), (_, BrIf(depth)), ..]
            if i == t =>
        {
            let bound = match bound {
                LocalGet(n) => Bound::Local(*n),
                I32Const(n) => Bound::Const(*n),
                _ => return None,
            };
            let compare = match cmp {
                Opcode::I32LtU => Compare::LtU,
                Opcode::I32LtS => Compare::LtS,
                Opcode::I32Ne => Compare::Ne,
                _ => return None,
            };
            let fused = Fused::IncCmpBrIf {
                local: *i,
                step: *step,
                bound,
                compare,
                target: 0,
            };
            Some((fused, *depth, 7))
        }
        _ => None,
    }
}

fn match_ptr_inc_ne_br_if(window: &[(u32, Instruction)]) -> Option<(Fused, u32, usize)> {
    use Instruction::*;
    match window {
        [(_, LocalGet(p)), (_, I32Const(step)), (_, Numeric(Opcode::I32Add)), (_, LocalSet(s)), (_, LocalGet(g)), (_, LocalGet(end)), (_, Numeric(Opcode::I32Ne)), (_, BrIf(depth)), ..]
            if p == s && p == g =>
        {
            let fused = Fused::PtrIncNeBrIf {
                ptr: *p,
                end: *end,
                step: *step,
                target: 0,
            };
            Some((fused, *depth, 8))
        }
        _ => None,
    }
}

fn match_f64_sqrt_loop_cmp(window: &[(u32, Instruction)]) -> Option<(Fused, u32, usize)> {
    use Instruction::*;
    match window {
        [(_, LocalGet(limit)), (_, LocalGet(i)), (_, I32Const(step)), (_, Numeric(Opcode::I32Add)), (_, LocalTee(t)), (_, Numeric(Opcode::F64ConvertI32U)), (_, Numeric(Opcode::F64Lt)), (_, Numeric(Opcode::I32Eqz)), (_, BrIf(depth)), ..]
            if i == t =>
        {
            let fused = Fused::F64SqrtLoopCmp {
                limit: *limit,
                counter: *i,
                step: *step,
                target: 0,
            };
            Some((fused, *depth, 9))
        }
        _ => None,
    }
}

fn match_mul_add_set(window: &[(u32, Instruction)]) -> Option<(Fused, usize)> {
    use Instruction::*;
    match window {
        [(_, LocalGet(a)), (_, LocalGet(b)), (_, Numeric(mul)), (_, LocalGet(c)), (_, Numeric(add)), (_, LocalSet(dst)), ..] => {
            let width = match (mul, add) {
                (Opcode::I32Mul, Opcode::I32Add) => Width::I32,
                (Opcode::I64Mul, Opcode::I64Add) => Width::I64,
                _ => return None,
            };
            let fused = Fused::MulAddSet {
                width,
                a: *a,
                b: *b,
                c: *c,
                dst: *dst,
            };
            Some((fused, 6))
        }
        _ => None,
    }
}

/// Replace every recognised pattern, scanning left to right without overlap.
pub fn fuse(body: Vec<(u32, Instruction)>) -> Vec<Item> {
    let mut items = Vec::with_capacity(body.len());
    let mut pos = 0;
    while pos < body.len() {
        let window = &body[pos..];
        let offset = window[0].0;
        let matched = match_inc_cmp_br_if(window)
            .or_else(|| match_ptr_inc_ne_br_if(window))
            .or_else(|| match_f64_sqrt_loop_cmp(window))
            .map(|(fused, depth, len)| (fused, Some(depth), len))
            .or_else(|| match_mul_add_set(window).map(|(fused, len)| (fused, None, len)));

        match matched {
            Some((fused, depth, len)) => {
                trace!(pattern = fused.name(), offset, "fused");
                items.push(Item::Fused { offset, fused, depth });
                pos += len;
            }
            None => {
                let (offset, instruction) = body[pos].clone();
                items.push(Item::Plain(offset, instruction));
                pos += 1;
            }
        }
    }
    items
}

/// Entries produced without fusion
pub fn plain(body: Vec<(u32, Instruction)>) -> Vec<Item> {
    body.into_iter()
        .map(|(offset, instruction)| Item::Plain(offset, instruction))
        .collect()
}

#[inline(always)]
fn fused_at(act: &Activation<'_>, ip: usize) -> Result<Fused, RuntimeError> {
    let index = act.imm(ip)?.a as usize;
    act.func
        .fused
        .get(index)
        .copied()
        .ok_or(RuntimeError::InvalidInstructionPointer(ip))
}

#[inline(always)]
fn take_branch<C: Convention>(act: &mut Activation<'_>, ip: usize, taken: bool, target: u32) -> Result<Flow, RuntimeError> {
    if taken {
        let target = act.target(target)?;
        let next = act.branch(target)?;
        C::next(act, next)
    } else {
        C::next(act, ip + 1)
    }
}

pub fn inc_cmp_br_if<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let Fused::IncCmpBrIf {
        local,
        step,
        bound,
        compare,
        target,
    } = fused_at(act, ip)?
    else {
        return Err(RuntimeError::InvalidInstructionPointer(ip));
    };
    let counter = i32::from_value(act.local(local)?)?.wrapping_add(step);
    act.set_local(local, Value::I32(counter))?;
    // the bound is read after the update, as the unfused sequence would
    let bound = match bound {
        Bound::Local(index) => i32::from_value(act.local(index)?)?,
        Bound::Const(value) => value,
    };
    let taken = match compare {
        Compare::LtU => (counter as u32) < (bound as u32),
        Compare::LtS => counter < bound,
        Compare::Ne => counter != bound,
    };
    take_branch::<C>(act, ip, taken, target)
}

pub fn ptr_inc_ne_br_if<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let Fused::PtrIncNeBrIf { ptr, end, step, target } = fused_at(act, ip)? else {
        return Err(RuntimeError::InvalidInstructionPointer(ip));
    };
    let next = i32::from_value(act.local(ptr)?)?.wrapping_add(step);
    act.set_local(ptr, Value::I32(next))?;
    let end = i32::from_value(act.local(end)?)?;
    take_branch::<C>(act, ip, next != end, target)
}

pub fn f64_sqrt_loop_cmp<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let Fused::F64SqrtLoopCmp {
        limit,
        counter,
        step,
        target,
    } = fused_at(act, ip)?
    else {
        return Err(RuntimeError::InvalidInstructionPointer(ip));
    };
    let limit = f64::from_value(act.local(limit)?)?;
    let next = i32::from_value(act.local(counter)?)?.wrapping_add(step);
    act.set_local(counter, Value::I32(next))?;
    let taken = !(limit < next as u32 as f64);
    take_branch::<C>(act, ip, taken, target)
}

pub fn mul_add_set<C: Convention>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let Fused::MulAddSet { width, a, b, c, dst } = fused_at(act, ip)? else {
        return Err(RuntimeError::InvalidInstructionPointer(ip));
    };
    let (a, b, c) = (act.local(a)?, act.local(b)?, act.local(c)?);
    let result = match width {
        Width::I32 => Value::I32(
            i32::from_value(a)?
                .wrapping_mul(i32::from_value(b)?)
                .wrapping_add(i32::from_value(c)?),
        ),
        Width::I64 => Value::I64(
            i64::from_value(a)?
                .wrapping_mul(i64::from_value(b)?)
                .wrapping_add(i64::from_value(c)?),
        ),
    };
    act.set_local(dst, result)?;
    C::next(act, ip + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Instruction::*;

    fn body(instructions: Vec<Instruction>) -> Vec<(u32, Instruction)> {
        instructions
            .into_iter()
            .enumerate()
            .map(|(i, instruction)| (i as u32, instruction))
            .collect()
    }

    #[test]
    fn test_counted_loop_pattern() {
        let items = fuse(body(vec![
            Nop,
            LocalGet(1),
            I32Const(2),
            Numeric(Opcode::I32Add),
            LocalTee(1),
            LocalGet(0),
            Numeric(Opcode::I32LtS),
            BrIf(0),
            End,
        ]));
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[1],
            Item::Fused {
                offset: 1,
                fused: Fused::IncCmpBrIf {
                    local: 1,
                    step: 2,
                    bound: Bound::Local(0),
                    compare: Compare::LtS,
                    target: 0,
                },
                depth: Some(0),
            }
        );
        assert_eq!(items[2], Item::Plain(8, End));
    }

    #[test]
    fn test_near_misses_stay_plain() {
        // tee of a different local
        let items = fuse(body(vec![
            LocalGet(1),
            I32Const(1),
            Numeric(Opcode::I32Add),
            LocalTee(2),
            I32Const(10),
            Numeric(Opcode::I32Ne),
            BrIf(0),
        ]));
        assert!(items.iter().all(|item| matches!(item, Item::Plain(..))));

        // mixed widths
        let items = fuse(body(vec![
            LocalGet(0),
            LocalGet(1),
            Numeric(Opcode::I32Mul),
            LocalGet(2),
            Numeric(Opcode::I64Add),
            LocalSet(3),
        ]));
        assert_eq!(items.len(), 6);

        // truncated at the end of the body
        let items = fuse(body(vec![LocalGet(0), LocalGet(1), Numeric(Opcode::I64Mul)]));
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_pointer_walk_pattern() {
        let items = fuse(body(vec![
            LocalGet(0),
            I32Const(4),
            Numeric(Opcode::I32Add),
            LocalSet(0),
            LocalGet(0),
            LocalGet(1),
            Numeric(Opcode::I32Ne),
            BrIf(0),
            End,
        ]));
        assert_eq!(
            items,
            vec![
                Item::Fused {
                    offset: 0,
                    fused: Fused::PtrIncNeBrIf {
                        ptr: 0,
                        end: 1,
                        step: 4,
                        target: 0,
                    },
                    depth: Some(0),
                },
                Item::Plain(8, End),
            ]
        );

        // the reload must read the pointer just stored
        let items = fuse(body(vec![
            LocalGet(0),
            I32Const(4),
            Numeric(Opcode::I32Add),
            LocalSet(0),
            LocalGet(2),
            LocalGet(1),
            Numeric(Opcode::I32Ne),
            BrIf(0),
        ]));
        assert!(items.iter().all(|item| matches!(item, Item::Plain(..))));
    }

    #[test]
    fn test_sqrt_and_mul_add_patterns() {
        let items = fuse(body(vec![
            LocalGet(0),
            LocalGet(1),
            I32Const(1),
            Numeric(Opcode::I32Add),
            LocalTee(1),
            Numeric(Opcode::F64ConvertI32U),
            Numeric(Opcode::F64Lt),
            Numeric(Opcode::I32Eqz),
            BrIf(1),
            LocalGet(2),
            LocalGet(3),
            Numeric(Opcode::I64Mul),
            LocalGet(4),
            Numeric(Opcode::I64Add),
            LocalSet(5),
        ]));
        assert_eq!(items.len(), 2);
        assert!(matches!(
            items[0],
            Item::Fused {
                fused: Fused::F64SqrtLoopCmp {
                    limit: 0,
                    counter: 1,
                    step: 1,
                    ..
                },
                depth: Some(1),
                ..
            }
        ));
        assert!(matches!(
            items[1],
            Item::Fused {
                offset: 9,
                fused: Fused::MulAddSet { width: Width::I64, dst: 5, .. },
                depth: None,
            }
        ));
    }

    #[test]
    fn test_plain_keeps_everything() {
        let items = plain(body(vec![Nop, End]));
        assert_eq!(items, vec![Item::Plain(0, Nop), Item::Plain(1, End)]);
    }
}
