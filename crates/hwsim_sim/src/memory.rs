//! Sparse element-addressed memory.

use crate::error::SimError;
use std::collections::HashMap;

/// An array of `size` elements, each `width` bits wide. Unwritten elements
/// read as zero.
#[derive(Debug, Clone)]
pub struct Memory {
    width: u32,
    size: u64,
    cells: HashMap<u64, i128>,
}

/// Masks `value` to the low `bits` bits, treating it as unsigned.
pub(crate) fn mask_unsigned(value: i128, bits: u32) -> i128 {
    if bits == 0 || bits >= 128 {
        value
    } else {
        value & ((1i128 << bits) - 1)
    }
}

impl Memory {
    /// A zeroed memory.
    pub fn new(width: u32, size: u64) -> Self {
        Self {
            width: width.max(1),
            size,
            cells: HashMap::new(),
        }
    }

    /// Element width in bits.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Number of elements.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes per element.
    pub fn element_bytes(&self) -> u64 {
        u64::from(self.width.div_ceil(8))
    }

    /// Total size in bytes, as mapped into an address space.
    pub fn byte_size(&self) -> u64 {
        self.size * self.element_bytes()
    }

    fn check(&self, index: i128) -> Result<u64, SimError> {
        u64::try_from(index)
            .ok()
            .filter(|i| *i < self.size)
            .ok_or(SimError::IndexOutOfBounds {
                index,
                size: self.size,
            })
    }

    /// Reads element `index`.
    pub fn read(&self, index: i128) -> Result<i128, SimError> {
        let i = self.check(index)?;
        Ok(self.cells.get(&i).copied().unwrap_or(0))
    }

    /// Writes element `index`, masked to the element width.
    pub fn write(&mut self, index: i128, value: i128) -> Result<(), SimError> {
        let i = self.check(index)?;
        let v = mask_unsigned(value, self.width);
        if v == 0 {
            self.cells.remove(&i);
        } else {
            self.cells.insert(i, v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_reads_zero() {
        let m = Memory::new(32, 16);
        assert_eq!(m.read(15).unwrap(), 0);
    }

    #[test]
    fn write_masks_to_width() {
        let mut m = Memory::new(8, 4);
        m.write(1, 0x1ff).unwrap();
        assert_eq!(m.read(1).unwrap(), 0xff);
        m.write(2, -1).unwrap();
        assert_eq!(m.read(2).unwrap(), 0xff);
    }

    #[test]
    fn bounds_checked() {
        let mut m = Memory::new(8, 4);
        assert_eq!(
            m.read(4),
            Err(SimError::IndexOutOfBounds { index: 4, size: 4 })
        );
        assert!(m.write(-1, 0).is_err());
    }

    #[test]
    fn byte_geometry() {
        let m = Memory::new(12, 10);
        assert_eq!(m.element_bytes(), 2);
        assert_eq!(m.byte_size(), 20);
    }
}
