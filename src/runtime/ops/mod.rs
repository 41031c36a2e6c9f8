//! Instruction handlers
//!
//! Every operator is a family of handlers: one that works on the operand
//! stack and, for operators that can run on cached values, one per ring
//! position. Pure operators are zero-sized types implementing [`BinOp`] or
//! [`UnOp`]; the generic handlers in this module turn each into a family, so
//! an operator's semantics are written exactly once.

use crate::parser::module::ValueType;
use crate::parser::opcode::Opcode;
use crate::runtime::dispatch::{Activation, Convention, Flow, Handler, RING_SLOTS};
use crate::runtime::ring::ring_table;
use crate::runtime::value::Native;
use crate::runtime::RuntimeError;

/// Declare binary operators and the family lookup for them.
macro_rules! binops {
    (fn $table:ident; $($name:ident($in:ty) -> $out:ty = |$a:ident, $b:ident| $body:expr;)*) => {
        $(
            pub struct $name;

            impl $crate::runtime::ops::BinOp for $name {
                type In = $in;
                type Out = $out;

                #[inline(always)]
                fn apply($a: $in, $b: $in) -> Result<$out, $crate::runtime::RuntimeError> {
                    $body
                }
            }
        )*

        pub fn $table<C: $crate::runtime::dispatch::Convention>(
            op: $crate::parser::opcode::Opcode,
        ) -> Option<$crate::runtime::ops::Handlers> {
            match op {
                $($crate::parser::opcode::Opcode::$name => Some($crate::runtime::ops::Handlers::binary::<C, $name>()),)*
                _ => None,
            }
        }
    };
}

/// Declare unary operators and the family lookup for them.
macro_rules! unops {
    (fn $table:ident; $($name:ident($in:ty) -> $out:ty = |$a:ident| $body:expr;)*) => {
        $(
            pub struct $name;

            impl $crate::runtime::ops::UnOp for $name {
                type In = $in;
                type Out = $out;

                #[inline(always)]
                fn apply($a: $in) -> Result<$out, $crate::runtime::RuntimeError> {
                    $body
                }
            }
        )*

        pub fn $table<C: $crate::runtime::dispatch::Convention>(
            op: $crate::parser::opcode::Opcode,
        ) -> Option<$crate::runtime::ops::Handlers> {
            match op {
                $($crate::parser::opcode::Opcode::$name => Some($crate::runtime::ops::Handlers::unary::<C, $name>()),)*
                _ => None,
            }
        }
    };
}

pub mod control;
pub mod conversion;
pub mod memory;
pub mod numeric;
pub mod variable;

/// `lhs op rhs`, where `rhs` was on top of the stack
pub trait BinOp {
    type In: Native;
    type Out: Native;

    fn apply(lhs: Self::In, rhs: Self::In) -> Result<Self::Out, RuntimeError>;
}

pub trait UnOp {
    type In: Native;
    type Out: Native;

    fn apply(value: Self::In) -> Result<Self::Out, RuntimeError>;
}

/// The handlers of one operator and its stack effect.
///
/// `ring[p]` is the variant for the top of the ring at `p`; for operators that
/// pop nothing, `p` is the slot the pushed value goes to.
#[derive(Clone, Copy)]
pub struct Handlers {
    pub mem: Handler,
    pub ring: [Handler; RING_SLOTS],
    pub pops: usize,
    pub push: Option<ValueType>,
}

impl Handlers {
    pub fn binary<C: Convention, O: BinOp + 'static>() -> Self {
        Handlers {
            mem: mem_binary::<C, O>,
            ring: ring_table!(ring_binary::<C, O>),
            pops: 2,
            push: Some(O::Out::TYPE),
        }
    }

    pub fn unary<C: Convention, O: UnOp + 'static>() -> Self {
        Handlers {
            mem: mem_unary::<C, O>,
            ring: ring_table!(ring_unary::<C, O>),
            pops: 1,
            push: Some(O::Out::TYPE),
        }
    }
}

/// Family of any operator whose behaviour is fixed by its opcode alone.
pub fn numeric<C: Convention>(op: Opcode) -> Option<Handlers> {
    numeric::binary::<C>(op)
        .or_else(|| numeric::unary::<C>(op))
        .or_else(|| numeric::compare::<C>(op))
        .or_else(|| numeric::eqz::<C>(op))
        .or_else(|| conversion::conversion::<C>(op))
}

pub fn mem_binary<C: Convention, O: BinOp>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let rhs = act.stack.pop_native::<O::In>()?;
    let lhs = act.stack.pop_native::<O::In>()?;
    act.stack.push(O::apply(lhs, rhs)?.into_value());
    C::next(act, ip + 1)
}

/// rhs at `P`, lhs one deeper; the result replaces lhs.
pub fn ring_binary<C: Convention, O: BinOp, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    let lhs_pos = act.ring_next(P);
    let rhs = O::In::from_value(act.ring[P])?;
    let lhs = O::In::from_value(act.ring[lhs_pos])?;
    act.ring[lhs_pos] = O::apply(lhs, rhs)?.into_value();
    C::next(act, ip + 1)
}

pub fn mem_unary<C: Convention, O: UnOp>(act: &mut Activation<'_>, ip: usize) -> Result<Flow, RuntimeError> {
    let value = act.stack.pop_native::<O::In>()?;
    act.stack.push(O::apply(value)?.into_value());
    C::next(act, ip + 1)
}

pub fn ring_unary<C: Convention, O: UnOp, const P: usize>(
    act: &mut Activation<'_>,
    ip: usize,
) -> Result<Flow, RuntimeError> {
    let value = O::In::from_value(act.ring[P])?;
    act.ring[P] = O::apply(value)?.into_value();
    C::next(act, ip + 1)
}

#[cfg(test)]
mod tests {
    use super::numeric::{I32Sub, I64Eqz};
    use super::*;
    use crate::runtime::dispatch::tests::{function, NoCalls};
    use crate::runtime::dispatch::{run, ByRef, Imm, Instr};
    use crate::runtime::ops::control::ret;
    use crate::runtime::ring::RingLayout;
    use crate::runtime::Value;
    use std::sync::Arc;

    #[test]
    fn test_family_shapes() {
        let sub = numeric::<ByRef>(Opcode::I32Sub).unwrap();
        assert_eq!((sub.pops, sub.push), (2, Some(ValueType::I32)));
        let eqz = numeric::<ByRef>(Opcode::I64Eqz).unwrap();
        assert_eq!((eqz.pops, eqz.push), (1, Some(ValueType::I32)));
        let promote = numeric::<ByRef>(Opcode::F64PromoteF32).unwrap();
        assert_eq!(promote.push, Some(ValueType::F64));
        assert!(numeric::<ByRef>(Opcode::Call).is_none());
        assert!(numeric::<ByRef>(Opcode::I32Load).is_none());
    }

    #[test]
    fn test_ring_binary_operand_order() {
        let mut func = function(
            vec![
                Instr {
                    handler: ring_binary::<ByRef, I32Sub, 6>,
                    imm: Imm::default(),
                },
                Instr {
                    handler: ret,
                    imm: Imm::default(),
                },
            ],
            vec![],
            0,
        );
        func.ring = RingLayout::new(0, 7);
        func.result_count = 0;
        let mut ctx = NoCalls;
        let mut act = Activation::new(Arc::new(func), &mut ctx, vec![], None, 0);
        act.ring[6] = Value::I32(3);
        act.ring[0] = Value::I32(10);
        run(&mut act).unwrap();
        // lhs lived at next(6) == 0 and takes the result
        assert_eq!(act.ring[0], Value::I32(7));
    }

    #[test]
    fn test_mem_unary() {
        let func = function(
            vec![
                Instr {
                    handler: mem_unary::<ByRef, I64Eqz>,
                    imm: Imm::default(),
                },
                Instr {
                    handler: ret,
                    imm: Imm::default(),
                },
            ],
            vec![],
            0,
        );
        let mut ctx = NoCalls;
        let mut act = Activation::new(Arc::new(func), &mut ctx, vec![], None, 0);
        act.stack.push(Value::I64(0));
        run(&mut act).unwrap();
        assert_eq!(act.stack.drain(), vec![Value::I32(1)]);
    }
}
