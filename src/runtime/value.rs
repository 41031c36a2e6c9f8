//! WebAssembly value representation

use super::RuntimeError;
use crate::parser::module::ValueType;
use fhex::ToHex;
use std::fmt;

/// Runtime representation of WebAssembly values
///
/// The discriminant is checked on every typed access, see [`Native`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Default for Value {
    fn default() -> Self {
        Value::I32(0)
    }
}

impl Value {
    /// Get the WebAssembly type of this value
    pub fn typ(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }

    /// Zero value of a type, used to initialise declared locals
    pub fn zero(value_type: ValueType) -> Value {
        match value_type {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Raw bit pattern, zero-extended to 64 bits
    pub fn bits(&self) -> u64 {
        match self {
            Value::I32(v) => *v as u32 as u64,
            Value::I64(v) => *v as u64,
            Value::F32(v) => v.to_bits() as u64,
            Value::F64(v) => v.to_bits(),
        }
    }

    /// Bitwise identity: same type and same bits, so NaNs compare equal to themselves
    pub fn same_bits(&self, other: &Value) -> bool {
        self.typ() == other.typ() && self.bits() == other.bits()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "i32:{v}"),
            Value::I64(v) => write!(f, "i64:{v}"),
            Value::F32(v) => write!(f, "f32:{}", v.to_hex()),
            Value::F64(v) => write!(f, "f64:{}", v.to_hex()),
        }
    }
}

/// Rust scalar types that have a WebAssembly value type.
pub trait Native: Copy + Sized {
    const TYPE: ValueType;

    fn from_value(value: Value) -> Result<Self, RuntimeError>;

    fn into_value(self) -> Value;
}

macro_rules! native {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Native for $ty {
                const TYPE: ValueType = ValueType::$variant;

                #[inline(always)]
                fn from_value(value: Value) -> Result<Self, RuntimeError> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(RuntimeError::TypeMismatch {
                            expected: ValueType::$variant,
                            actual: other.typ(),
                        }),
                    }
                }

                #[inline(always)]
                fn into_value(self) -> Value {
                    Value::$variant(self)
                }
            }
        )*
    };
}

native!(i32 => I32, i64 => I64, f32 => F32, f64 => F64);
