//! WebAssembly linear memory implementation
//!
//! All access is bounds-checked against the current size before touching the
//! underlying bytes; an out-of-range access is a trap, never a panic.
//!
//! Memory layout follows the WebAssembly specification:
//! - Page size: 64KB (65,536 bytes)
//! - Address space: 32-bit, effective addresses are `address + offset` computed in 64 bits
//! - Out-of-bounds access: Traps (runtime error)

use super::RuntimeError;

/// WebAssembly page size in bytes (64KB)
pub const PAGE_SIZE: usize = 65536;

/// Maximum number of pages (2^16 = 64K pages = 4GB total)
pub const MAX_PAGES: u32 = 65536;

#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
    current_pages: u32,
    max_pages: Option<u32>,
}

impl Memory {
    /// Create a zero-filled memory of `initial_pages`
    pub fn new(initial_pages: u32, max_pages: Option<u32>) -> Result<Self, RuntimeError> {
        if initial_pages > MAX_PAGES {
            return Err(RuntimeError::MemoryError(format!(
                "initial size {initial_pages} pages exceeds maximum {MAX_PAGES} pages"
            )));
        }
        if let Some(max) = max_pages {
            if initial_pages > max {
                return Err(RuntimeError::MemoryError(format!(
                    "initial size {initial_pages} pages exceeds declared maximum {max} pages"
                )));
            }
            if max > MAX_PAGES {
                return Err(RuntimeError::MemoryError(format!(
                    "maximum size {max} pages exceeds limit {MAX_PAGES} pages"
                )));
            }
        }

        Ok(Memory {
            data: vec![0u8; initial_pages as usize * PAGE_SIZE],
            current_pages: initial_pages,
            max_pages,
        })
    }

    /// Current size in pages
    pub fn size(&self) -> u32 {
        self.current_pages
    }

    pub fn max_pages(&self) -> Option<u32> {
        self.max_pages
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grow by `delta_pages`, returning the previous size in pages or -1
    pub fn grow(&mut self, delta_pages: u32) -> i32 {
        let current = self.current_pages;
        let Some(new_pages) = current.checked_add(delta_pages) else {
            return -1;
        };
        if new_pages > self.max_pages.unwrap_or(MAX_PAGES) {
            return -1;
        }

        let new_bytes = new_pages as usize * PAGE_SIZE;
        if self.data.try_reserve(new_bytes - self.data.len()).is_err() {
            return -1;
        }
        self.data.resize(new_bytes, 0);
        self.current_pages = new_pages;
        current as i32
    }

    #[inline]
    fn range(&self, address: u64, size: usize) -> Result<std::ops::Range<usize>, RuntimeError> {
        let oob = RuntimeError::MemoryOutOfBounds { address, size };
        let start = usize::try_from(address).map_err(|_| oob.clone())?;
        let end = start.checked_add(size).ok_or_else(|| oob.clone())?;
        if end > self.data.len() {
            return Err(oob);
        }
        Ok(start..end)
    }

    /// Read `N` bytes at an effective address
    #[inline]
    pub fn load<const N: usize>(&self, address: u64) -> Result<[u8; N], RuntimeError> {
        let range = self.range(address, N)?;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[range]);
        Ok(bytes)
    }

    /// Write `N` bytes at an effective address
    #[inline]
    pub fn store<const N: usize>(&mut self, address: u64, bytes: [u8; N]) -> Result<(), RuntimeError> {
        let range = self.range(address, N)?;
        self.data[range].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn read_bytes(&self, address: u32, len: usize) -> Result<&[u8], RuntimeError> {
        let range = self.range(address as u64, len)?;
        Ok(&self.data[range])
    }

    /// Copy `bytes` in at `address`; nothing is written if the range does not fit
    pub fn write_bytes(&mut self, address: u32, bytes: &[u8]) -> Result<(), RuntimeError> {
        let range = self.range(address as u64, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

/// Effective address of an access: the dynamic address operand plus the static offset
#[inline(always)]
pub fn effective_address(address: i32, offset: u32) -> u64 {
    address as u32 as u64 + offset as u64
}
