//! Funcref table used by `call_indirect`
//!
//! MVP tables hold function indices or null. The signature check of an
//! indirect call happens in the instance; the table only answers which
//! function, if any, sits at an index.

use super::RuntimeError;
use crate::parser::module::Limits;

#[derive(Debug, Clone)]
pub struct Table {
    elements: Vec<Option<u32>>,
    limits: Limits,
}

impl Table {
    /// Create a table with `limits.min` null elements
    pub fn new(limits: Limits) -> Self {
        Table {
            elements: vec![None; limits.min as usize],
            limits,
        }
    }

    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Function at `index`; `None` for a null element
    pub fn get(&self, index: u32) -> Result<Option<u32>, RuntimeError> {
        self.elements
            .get(index as usize)
            .copied()
            .ok_or(RuntimeError::UndefinedElement(index))
    }

    pub fn set(&mut self, index: u32, function_index: Option<u32>) -> Result<(), RuntimeError> {
        let slot = self
            .elements
            .get_mut(index as usize)
            .ok_or(RuntimeError::UndefinedElement(index))?;
        *slot = function_index;
        Ok(())
    }

    /// Apply an element segment; the whole segment must fit or nothing is written
    pub fn init(&mut self, offset: u32, functions: &[u32]) -> Result<(), RuntimeError> {
        let end = (offset as usize).checked_add(functions.len());
        match end {
            Some(end) if end <= self.elements.len() => {
                for (slot, function_index) in self.elements[offset as usize..end].iter_mut().zip(functions) {
                    *slot = Some(*function_index);
                }
                Ok(())
            }
            _ => Err(RuntimeError::ElementOutOfBounds {
                offset,
                length: functions.len(),
                size: self.size(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(min: u32) -> Table {
        Table::new(Limits { min, max: None })
    }

    #[test]
    fn test_table_creation() {
        let t = table(4);
        assert_eq!(t.size(), 4);
        assert_eq!(t.get(0).unwrap(), None);
        assert_eq!(t.limits().min, 4);
    }

    #[test]
    fn test_table_get_set() {
        let mut t = table(2);
        t.set(1, Some(7)).unwrap();
        assert_eq!(t.get(1).unwrap(), Some(7));
        t.set(1, None).unwrap();
        assert_eq!(t.get(1).unwrap(), None);
    }

    #[test]
    fn test_table_bounds() {
        let mut t = table(2);
        assert_eq!(t.get(2), Err(RuntimeError::UndefinedElement(2)));
        assert_eq!(t.set(5, Some(0)), Err(RuntimeError::UndefinedElement(5)));
    }

    #[test]
    fn test_table_init() {
        let mut t = table(4);
        t.init(1, &[10, 11]).unwrap();
        assert_eq!(t.get(0).unwrap(), None);
        assert_eq!(t.get(2).unwrap(), Some(11));

        assert_eq!(
            t.init(3, &[1, 2]),
            Err(RuntimeError::ElementOutOfBounds {
                offset: 3,
                length: 2,
                size: 4
            })
        );
        // a failed segment leaves the table untouched
        assert_eq!(t.get(3).unwrap(), None);
    }
}
