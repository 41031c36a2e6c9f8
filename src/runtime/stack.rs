//! Operand stack of one function activation

use super::value::Native;
use super::{RuntimeError, Value};

#[derive(Debug, Default, Clone)]
pub struct Stack {
    values: Vec<Value>,
}

impl Stack {
    pub fn new() -> Self {
        Stack { values: Vec::new() }
    }

    /// Pre-sized for a function's maximum static operand height
    pub fn with_capacity(capacity: usize) -> Self {
        Stack {
            values: Vec::with_capacity(capacity),
        }
    }

    #[inline(always)]
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn push_all(&mut self, values: impl IntoIterator<Item = Value>) {
        self.values.extend(values);
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.values.pop().ok_or(RuntimeError::StackUnderflow)
    }

    /// Pop a value, checking its tag against `T`
    #[inline(always)]
    pub fn pop_native<T: Native>(&mut self) -> Result<T, RuntimeError> {
        T::from_value(self.pop()?)
    }

    pub fn pop_i32(&mut self) -> Result<i32, RuntimeError> {
        self.pop_native::<i32>()
    }

    pub fn pop_i64(&mut self) -> Result<i64, RuntimeError> {
        self.pop_native::<i64>()
    }

    pub fn pop_f32(&mut self) -> Result<f32, RuntimeError> {
        self.pop_native::<f32>()
    }

    pub fn pop_f64(&mut self) -> Result<f64, RuntimeError> {
        self.pop_native::<f64>()
    }

    /// Remove the top `n` values, deepest first
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        let at = self.values.len().checked_sub(n).ok_or(RuntimeError::StackUnderflow)?;
        Ok(self.values.split_off(at))
    }

    /// Branch unwinding: keep the top `arity` values and drop everything
    /// between them and `height`.
    pub fn unwind(&mut self, height: usize, arity: usize) -> Result<(), RuntimeError> {
        let len = self.values.len();
        if len < height + arity {
            return Err(RuntimeError::StackUnderflow);
        }
        if len > height + arity {
            self.values.drain(height..len - arity);
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn drain(&mut self) -> Vec<Value> {
        self.values.drain(..).collect()
    }

    pub fn peek(&self) -> Option<&Value> {
        self.values.last()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}
