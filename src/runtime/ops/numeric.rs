//! Numeric operators
//!
//! Integer arithmetic wraps; shift and rotate counts are taken modulo the bit
//! width. Division traps on a zero divisor and signed division also on the
//! one overflowing case, `MIN / -1`. Float `min`/`max` propagate NaN and order
//! `-0` below `+0`; `nearest` rounds half to even.

use crate::runtime::RuntimeError;

macro_rules! float_helpers {
    ($min:ident, $max:ident, $ty:ty) => {
        #[inline(always)]
        fn $min(a: $ty, b: $ty) -> $ty {
            if a.is_nan() || b.is_nan() {
                <$ty>::NAN
            } else if a == 0.0 && b == 0.0 {
                if a.is_sign_negative() {
                    a
                } else {
                    b
                }
            } else {
                a.min(b)
            }
        }

        #[inline(always)]
        fn $max(a: $ty, b: $ty) -> $ty {
            if a.is_nan() || b.is_nan() {
                <$ty>::NAN
            } else if a == 0.0 && b == 0.0 {
                if a.is_sign_positive() {
                    a
                } else {
                    b
                }
            } else {
                a.max(b)
            }
        }
    };
}

float_helpers!(f32_min, f32_max, f32);
float_helpers!(f64_min, f64_max, f64);

#[inline(always)]
fn div_s<T: PartialEq + Copy>(a: T, b: T, zero: T, min: T, neg_one: T, div: fn(T, T) -> T) -> Result<T, RuntimeError> {
    if b == zero {
        Err(RuntimeError::DivisionByZero)
    } else if a == min && b == neg_one {
        Err(RuntimeError::IntegerOverflow)
    } else {
        Ok(div(a, b))
    }
}

binops! {
    fn binary;
    I32Add(i32) -> i32 = |a, b| Ok(a.wrapping_add(b));
    I32Sub(i32) -> i32 = |a, b| Ok(a.wrapping_sub(b));
    I32Mul(i32) -> i32 = |a, b| Ok(a.wrapping_mul(b));
    I32DivS(i32) -> i32 = |a, b| div_s(a, b, 0, i32::MIN, -1, |a, b| a / b);
    I32DivU(i32) -> i32 = |a, b| (a as u32).checked_div(b as u32).map(|r| r as i32).ok_or(RuntimeError::DivisionByZero);
    I32RemS(i32) -> i32 = |a, b| if b == 0 { Err(RuntimeError::DivisionByZero) } else { Ok(a.wrapping_rem(b)) };
    I32RemU(i32) -> i32 = |a, b| (a as u32).checked_rem(b as u32).map(|r| r as i32).ok_or(RuntimeError::DivisionByZero);
    I32And(i32) -> i32 = |a, b| Ok(a & b);
    I32Or(i32) -> i32 = |a, b| Ok(a | b);
    I32Xor(i32) -> i32 = |a, b| Ok(a ^ b);
    I32Shl(i32) -> i32 = |a, b| Ok(a.wrapping_shl(b as u32));
    I32ShrS(i32) -> i32 = |a, b| Ok(a.wrapping_shr(b as u32));
    I32ShrU(i32) -> i32 = |a, b| Ok((a as u32).wrapping_shr(b as u32) as i32);
    I32Rotl(i32) -> i32 = |a, b| Ok(a.rotate_left(b as u32 % 32));
    I32Rotr(i32) -> i32 = |a, b| Ok(a.rotate_right(b as u32 % 32));

    I64Add(i64) -> i64 = |a, b| Ok(a.wrapping_add(b));
    I64Sub(i64) -> i64 = |a, b| Ok(a.wrapping_sub(b));
    I64Mul(i64) -> i64 = |a, b| Ok(a.wrapping_mul(b));
    I64DivS(i64) -> i64 = |a, b| div_s(a, b, 0, i64::MIN, -1, |a, b| a / b);
    I64DivU(i64) -> i64 = |a, b| (a as u64).checked_div(b as u64).map(|r| r as i64).ok_or(RuntimeError::DivisionByZero);
    I64RemS(i64) -> i64 = |a, b| if b == 0 { Err(RuntimeError::DivisionByZero) } else { Ok(a.wrapping_rem(b)) };
    I64RemU(i64) -> i64 = |a, b| (a as u64).checked_rem(b as u64).map(|r| r as i64).ok_or(RuntimeError::DivisionByZero);
    I64And(i64) -> i64 = |a, b| Ok(a & b);
    I64Or(i64) -> i64 = |a, b| Ok(a | b);
    I64Xor(i64) -> i64 = |a, b| Ok(a ^ b);
    I64Shl(i64) -> i64 = |a, b| Ok(a.wrapping_shl(b as u32));
    I64ShrS(i64) -> i64 = |a, b| Ok(a.wrapping_shr(b as u32));
    I64ShrU(i64) -> i64 = |a, b| Ok((a as u64).wrapping_shr(b as u32) as i64);
    I64Rotl(i64) -> i64 = |a, b| Ok(a.rotate_left((b as u64 % 64) as u32));
    I64Rotr(i64) -> i64 = |a, b| Ok(a.rotate_right((b as u64 % 64) as u32));

    F32Add(f32) -> f32 = |a, b| Ok(a + b);
    F32Sub(f32) -> f32 = |a, b| Ok(a - b);
    F32Mul(f32) -> f32 = |a, b| Ok(a * b);
    F32Div(f32) -> f32 = |a, b| Ok(a / b);
    F32Min(f32) -> f32 = |a, b| Ok(f32_min(a, b));
    F32Max(f32) -> f32 = |a, b| Ok(f32_max(a, b));
    F32Copysign(f32) -> f32 = |a, b| Ok(a.copysign(b));

    F64Add(f64) -> f64 = |a, b| Ok(a + b);
    F64Sub(f64) -> f64 = |a, b| Ok(a - b);
    F64Mul(f64) -> f64 = |a, b| Ok(a * b);
    F64Div(f64) -> f64 = |a, b| Ok(a / b);
    F64Min(f64) -> f64 = |a, b| Ok(f64_min(a, b));
    F64Max(f64) -> f64 = |a, b| Ok(f64_max(a, b));
    F64Copysign(f64) -> f64 = |a, b| Ok(a.copysign(b));
}

unops! {
    fn unary;
    I32Clz(i32) -> i32 = |a| Ok(a.leading_zeros() as i32);
    I32Ctz(i32) -> i32 = |a| Ok(a.trailing_zeros() as i32);
    I32Popcnt(i32) -> i32 = |a| Ok(a.count_ones() as i32);
    I64Clz(i64) -> i64 = |a| Ok(a.leading_zeros() as i64);
    I64Ctz(i64) -> i64 = |a| Ok(a.trailing_zeros() as i64);
    I64Popcnt(i64) -> i64 = |a| Ok(a.count_ones() as i64);

    F32Abs(f32) -> f32 = |a| Ok(a.abs());
    F32Neg(f32) -> f32 = |a| Ok(-a);
    F32Ceil(f32) -> f32 = |a| Ok(a.ceil());
    F32Floor(f32) -> f32 = |a| Ok(a.floor());
    F32Trunc(f32) -> f32 = |a| Ok(a.trunc());
    F32Nearest(f32) -> f32 = |a| Ok(a.round_ties_even());
    F32Sqrt(f32) -> f32 = |a| Ok(a.sqrt());

    F64Abs(f64) -> f64 = |a| Ok(a.abs());
    F64Neg(f64) -> f64 = |a| Ok(-a);
    F64Ceil(f64) -> f64 = |a| Ok(a.ceil());
    F64Floor(f64) -> f64 = |a| Ok(a.floor());
    F64Trunc(f64) -> f64 = |a| Ok(a.trunc());
    F64Nearest(f64) -> f64 = |a| Ok(a.round_ties_even());
    F64Sqrt(f64) -> f64 = |a| Ok(a.sqrt());
}

unops! {
    fn eqz;
    I32Eqz(i32) -> i32 = |a| Ok((a == 0) as i32);
    I64Eqz(i64) -> i32 = |a| Ok((a == 0) as i32);
}

binops! {
    fn compare;
    I32Eq(i32) -> i32 = |a, b| Ok((a == b) as i32);
    I32Ne(i32) -> i32 = |a, b| Ok((a != b) as i32);
    I32LtS(i32) -> i32 = |a, b| Ok((a < b) as i32);
    I32LtU(i32) -> i32 = |a, b| Ok(((a as u32) < (b as u32)) as i32);
    I32GtS(i32) -> i32 = |a, b| Ok((a > b) as i32);
    I32GtU(i32) -> i32 = |a, b| Ok(((a as u32) > (b as u32)) as i32);
    I32LeS(i32) -> i32 = |a, b| Ok((a <= b) as i32);
    I32LeU(i32) -> i32 = |a, b| Ok(((a as u32) <= (b as u32)) as i32);
    I32GeS(i32) -> i32 = |a, b| Ok((a >= b) as i32);
    I32GeU(i32) -> i32 = |a, b| Ok(((a as u32) >= (b as u32)) as i32);

    I64Eq(i64) -> i32 = |a, b| Ok((a == b) as i32);
    I64Ne(i64) -> i32 = |a, b| Ok((a != b) as i32);
    I64LtS(i64) -> i32 = |a, b| Ok((a < b) as i32);
    I64LtU(i64) -> i32 = |a, b| Ok(((a as u64) < (b as u64)) as i32);
    I64GtS(i64) -> i32 = |a, b| Ok((a > b) as i32);
    I64GtU(i64) -> i32 = |a, b| Ok(((a as u64) > (b as u64)) as i32);
    I64LeS(i64) -> i32 = |a, b| Ok((a <= b) as i32);
    I64LeU(i64) -> i32 = |a, b| Ok(((a as u64) <= (b as u64)) as i32);
    I64GeS(i64) -> i32 = |a, b| Ok((a >= b) as i32);
    I64GeU(i64) -> i32 = |a, b| Ok(((a as u64) >= (b as u64)) as i32);

    F32Eq(f32) -> i32 = |a, b| Ok((a == b) as i32);
    F32Ne(f32) -> i32 = |a, b| Ok((a != b) as i32);
    F32Lt(f32) -> i32 = |a, b| Ok((a < b) as i32);
    F32Gt(f32) -> i32 = |a, b| Ok((a > b) as i32);
    F32Le(f32) -> i32 = |a, b| Ok((a <= b) as i32);
    F32Ge(f32) -> i32 = |a, b| Ok((a >= b) as i32);

    F64Eq(f64) -> i32 = |a, b| Ok((a == b) as i32);
    F64Ne(f64) -> i32 = |a, b| Ok((a != b) as i32);
    F64Lt(f64) -> i32 = |a, b| Ok((a < b) as i32);
    F64Gt(f64) -> i32 = |a, b| Ok((a > b) as i32);
    F64Le(f64) -> i32 = |a, b| Ok((a <= b) as i32);
    F64Ge(f64) -> i32 = |a, b| Ok((a >= b) as i32);
}
