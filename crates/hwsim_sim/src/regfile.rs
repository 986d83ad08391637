//! Register banks addressed by byte offset.

use crate::error::SimError;
use crate::memory::mask_unsigned;
use std::collections::BTreeMap;

/// One register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    /// Register name.
    pub name: String,
    /// Byte offset within the bank.
    pub offset: u64,
    /// Width in bits.
    pub bits: u32,
    /// Current value.
    pub value: i128,
}

impl Register {
    /// Bytes occupied, at least one.
    pub fn byte_len(&self) -> u64 {
        u64::from(self.bits.div_ceil(8)).max(1)
    }
}

/// A bank of registers keyed by offset.
#[derive(Debug, Clone, Default)]
pub struct RegFile {
    name: String,
    regs: Vec<Register>,
    by_offset: BTreeMap<u64, usize>,
}

impl RegFile {
    /// A bank from `(name, offset, bits)` entries, all zeroed.
    pub fn new(name: impl Into<String>, layout: &[(String, u64, u32)]) -> Self {
        let mut rf = RegFile {
            name: name.into(),
            ..Default::default()
        };
        for (reg_name, offset, bits) in layout {
            rf.by_offset.insert(*offset, rf.regs.len());
            rf.regs.push(Register {
                name: reg_name.clone(),
                offset: *offset,
                bits: *bits,
                value: 0,
            });
        }
        rf
    }

    /// The bank's type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registers in declaration order.
    pub fn registers(&self) -> &[Register] {
        &self.regs
    }

    /// Bytes spanned: the end of the highest register.
    pub fn byte_size(&self) -> u64 {
        self.regs
            .iter()
            .map(|r| r.offset + r.byte_len())
            .max()
            .unwrap_or(0)
    }

    fn at(&self, offset: u64) -> Result<usize, SimError> {
        self.by_offset
            .get(&offset)
            .copied()
            .ok_or(SimError::NoRegister { offset })
    }

    /// The register covering byte `offset`, if any.
    pub fn covering(&self, offset: u64) -> Option<&Register> {
        self.by_offset
            .range(..=offset)
            .next_back()
            .map(|(_, &i)| &self.regs[i])
            .filter(|r| offset < r.offset + r.byte_len())
    }

    /// Reads the register starting at `offset`.
    pub fn read(&self, offset: u64) -> Result<i128, SimError> {
        Ok(self.regs[self.at(offset)?].value)
    }

    /// Writes the register starting at `offset`, masked to its width.
    pub fn write(&mut self, offset: u64, value: i128) -> Result<(), SimError> {
        let i = self.at(offset)?;
        let r = &mut self.regs[i];
        r.value = mask_unsigned(value, r.bits);
        Ok(())
    }

    /// Reads a register by name.
    pub fn read_named(&self, name: &str) -> Option<i128> {
        self.regs.iter().find(|r| r.name == name).map(|r| r.value)
    }

    /// Reads byte `offset` of the bank.
    pub fn read_byte(&self, offset: u64) -> Result<u8, SimError> {
        let r = self.covering(offset).ok_or(SimError::NoRegister { offset })?;
        let shift = 8 * (offset - r.offset);
        Ok(((r.value >> shift) & 0xff) as u8)
    }

    /// Writes byte `offset` of the bank.
    pub fn write_byte(&mut self, offset: u64, byte: u8) -> Result<(), SimError> {
        let start = self
            .covering(offset)
            .ok_or(SimError::NoRegister { offset })?
            .offset;
        let i = self.at(start)?;
        let r = &mut self.regs[i];
        let shift = 8 * (offset - start);
        let cleared = r.value & !(0xffi128 << shift);
        r.value = mask_unsigned(cleared | (i128::from(byte) << shift), r.bits);
        Ok(())
    }
}
