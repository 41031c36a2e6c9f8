//! Conversion operators
//!
//! Float to integer truncation traps: NaN is an invalid conversion, and a
//! value whose truncation falls outside the target range is an integer
//! overflow. The range check is done in f64, where every bound used here is
//! exact and every f32 input converts losslessly.

use crate::runtime::RuntimeError;

const I32_MIN: f64 = -2147483648.0;
const I32_END: f64 = 2147483648.0;
const U32_END: f64 = 4294967296.0;
const I64_MIN: f64 = -9223372036854775808.0;
const I64_END: f64 = 9223372036854775808.0;
const U64_END: f64 = 18446744073709551616.0;

/// Truncate toward zero, trapping unless the result lies in `[min, end)`.
/// Unsigned targets use `min = 0`; inputs in (-1, 0) truncate to -0 and pass.
#[inline(always)]
fn trunc(value: f64, min: f64, end: f64) -> Result<f64, RuntimeError> {
    if value.is_nan() {
        return Err(RuntimeError::InvalidConversion);
    }
    let truncated = value.trunc();
    if truncated >= min && truncated < end {
        Ok(truncated)
    } else {
        Err(RuntimeError::IntegerOverflow)
    }
}

unops! {
    fn conversion;
    I32WrapI64(i64) -> i32 = |a| Ok(a as i32);
    I64ExtendI32S(i32) -> i64 = |a| Ok(a as i64);
    I64ExtendI32U(i32) -> i64 = |a| Ok(a as u32 as i64);

    I32TruncF32S(f32) -> i32 = |a| trunc(a as f64, I32_MIN, I32_END).map(|t| t as i32);
    I32TruncF32U(f32) -> i32 = |a| trunc(a as f64, 0.0, U32_END).map(|t| t as u32 as i32);
    I32TruncF64S(f64) -> i32 = |a| trunc(a, I32_MIN, I32_END).map(|t| t as i32);
    I32TruncF64U(f64) -> i32 = |a| trunc(a, 0.0, U32_END).map(|t| t as u32 as i32);
    I64TruncF32S(f32) -> i64 = |a| trunc(a as f64, I64_MIN, I64_END).map(|t| t as i64);
    I64TruncF32U(f32) -> i64 = |a| trunc(a as f64, 0.0, U64_END).map(|t| t as u64 as i64);
    I64TruncF64S(f64) -> i64 = |a| trunc(a, I64_MIN, I64_END).map(|t| t as i64);
    I64TruncF64U(f64) -> i64 = |a| trunc(a, 0.0, U64_END).map(|t| t as u64 as i64);

    F32ConvertI32S(i32) -> f32 = |a| Ok(a as f32);
    F32ConvertI32U(i32) -> f32 = |a| Ok(a as u32 as f32);
    F32ConvertI64S(i64) -> f32 = |a| Ok(a as f32);
    F32ConvertI64U(i64) -> f32 = |a| Ok(a as u64 as f32);
    F32DemoteF64(f64) -> f32 = |a| Ok(a as f32);
    F64ConvertI32S(i32) -> f64 = |a| Ok(a as f64);
    F64ConvertI32U(i32) -> f64 = |a| Ok(a as u32 as f64);
    F64ConvertI64S(i64) -> f64 = |a| Ok(a as f64);
    F64ConvertI64U(i64) -> f64 = |a| Ok(a as u64 as f64);
    F64PromoteF32(f32) -> f64 = |a| Ok(a as f64);

    I32ReinterpretF32(f32) -> i32 = |a| Ok(a.to_bits() as i32);
    I64ReinterpretF64(f64) -> i64 = |a| Ok(a.to_bits() as i64);
    F32ReinterpretI32(i32) -> f32 = |a| Ok(f32::from_bits(a as u32));
    F64ReinterpretI64(i64) -> f64 = |a| Ok(f64::from_bits(a as u64));
}
