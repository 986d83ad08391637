//! Byte-addressed views over mapped memories and register files.
//!
//! Regions are kept sorted by base address and never overlap, so a lookup is
//! a binary search. An access must fit entirely inside one region; one that
//! runs past the end of its region is reported rather than split.

use crate::error::SimError;
use crate::memory::Memory;
use crate::regfile::RegFile;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared memory handle.
pub type SharedMemory = Rc<RefCell<Memory>>;
/// Shared register-file handle.
pub type SharedRegFile = Rc<RefCell<RegFile>>;
/// Shared address-space handle.
pub type SharedAddressSpace = Rc<RefCell<AddressSpace>>;

/// The storage behind a region.
#[derive(Debug, Clone)]
pub enum RegionStorage {
    /// A memory, little-endian within each element.
    Memory(SharedMemory),
    /// A register file.
    RegFile(SharedRegFile),
}

impl RegionStorage {
    /// Size of the storage in bytes.
    pub fn byte_size(&self) -> u64 {
        match self {
            RegionStorage::Memory(m) => m.borrow().byte_size(),
            RegionStorage::RegFile(r) => r.borrow().byte_size(),
        }
    }

    /// A short label for listings.
    pub fn label(&self) -> String {
        match self {
            RegionStorage::Memory(m) => {
                let m = m.borrow();
                format!("memory[{}x{}]", m.size(), m.width())
            }
            RegionStorage::RegFile(r) => format!("regfile {}", r.borrow().name()),
        }
    }
}

/// One mapped region.
#[derive(Debug, Clone)]
pub struct Region {
    /// First address.
    pub base: u64,
    /// Length in bytes.
    pub size: u64,
    /// Backing storage.
    pub storage: RegionStorage,
}

impl Region {
    /// First address past the region.
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }
}

/// A sorted, non-overlapping set of regions.
#[derive(Debug, Clone, Default)]
pub struct AddressSpace {
    regions: Vec<Region>,
}

fn check_size(size: u32) -> Result<(), SimError> {
    if (1..=8).contains(&size) {
        Ok(())
    } else {
        Err(SimError::InvalidAccessSize(size))
    }
}

fn mask_bytes(value: u64, size: u32) -> u64 {
    if size >= 8 {
        value
    } else {
        value & ((1u64 << (8 * size)) - 1)
    }
}

impl AddressSpace {
    /// An empty address space.
    pub fn new() -> Self {
        Self::default()
    }

    /// The regions in address order.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Maps `storage` at `base`. Fails if the new region overlaps any
    /// existing one.
    pub fn add_mapping(&mut self, base: u64, storage: RegionStorage) -> Result<(), SimError> {
        let size = storage.byte_size();
        let region = Region {
            base,
            size,
            storage,
        };
        let pos = self.regions.partition_point(|r| r.base < base);
        let overlaps_prev = pos > 0 && self.regions[pos - 1].end() > base;
        let overlaps_next = self
            .regions
            .get(pos)
            .is_some_and(|next| next.base < region.end() || next.base == base);
        if overlaps_prev || overlaps_next {
            return Err(SimError::RegionOverlap { base, size });
        }
        log::debug!("map {} at 0x{base:x}+0x{size:x}", region.storage.label());
        self.regions.insert(pos, region);
        Ok(())
    }

    /// The region holding `[addr, addr + size)`.
    pub fn lookup(&self, addr: u64, size: u32) -> Result<&Region, SimError> {
        let pos = self.regions.partition_point(|r| r.base <= addr);
        let region = pos
            .checked_sub(1)
            .map(|i| &self.regions[i])
            .filter(|r| addr < r.end())
            .ok_or(SimError::AddressNotMapped { addr })?;
        if addr.saturating_add(u64::from(size)) > region.end() {
            return Err(SimError::RegionBoundaryCrossed {
                addr,
                size,
                boundary: region.end(),
            });
        }
        Ok(region)
    }

    /// Reads `size` bytes at `addr`, little-endian.
    pub fn read(&self, addr: u64, size: u32) -> Result<u64, SimError> {
        check_size(size)?;
        let region = self.lookup(addr, size)?;
        let off = addr - region.base;
        match &region.storage {
            RegionStorage::Memory(m) => {
                let m = m.borrow();
                let eb = m.element_bytes();
                if u64::from(size) == eb && off % eb == 0 {
                    let raw = m.read(i128::from(off / eb))?;
                    return Ok(mask_bytes(raw as u64, size));
                }
                let mut value = 0u64;
                for k in 0..u64::from(size) {
                    let byte_addr = off + k;
                    let elem = m.read(i128::from(byte_addr / eb))?;
                    let byte = (elem >> (8 * (byte_addr % eb))) & 0xff;
                    value |= (byte as u64) << (8 * k);
                }
                Ok(value)
            }
            RegionStorage::RegFile(r) => {
                let r = r.borrow();
                if let Some(reg) = r.covering(off) {
                    if reg.offset == off && reg.byte_len() == u64::from(size) {
                        return Ok(mask_bytes(reg.value as u64, size));
                    }
                }
                let mut value = 0u64;
                for k in 0..u64::from(size) {
                    value |= u64::from(r.read_byte(off + k)?) << (8 * k);
                }
                Ok(value)
            }
        }
    }

    /// Writes the low `size` bytes of `value` at `addr`, little-endian.
    pub fn write(&self, addr: u64, value: u64, size: u32) -> Result<(), SimError> {
        check_size(size)?;
        let region = self.lookup(addr, size)?;
        let off = addr - region.base;
        let value = mask_bytes(value, size);
        match &region.storage {
            RegionStorage::Memory(m) => {
                let mut m = m.borrow_mut();
                let eb = m.element_bytes();
                if u64::from(size) == eb && off % eb == 0 {
                    return m.write(i128::from(off / eb), i128::from(value));
                }
                for k in 0..u64::from(size) {
                    let byte_addr = off + k;
                    let index = i128::from(byte_addr / eb);
                    let shift = 8 * (byte_addr % eb);
                    let byte = i128::from((value >> (8 * k)) & 0xff);
                    let old = m.read(index)?;
                    m.write(index, (old & !(0xffi128 << shift)) | (byte << shift))?;
                }
                Ok(())
            }
            RegionStorage::RegFile(r) => {
                let mut r = r.borrow_mut();
                let exact = r
                    .covering(off)
                    .is_some_and(|reg| reg.offset == off && reg.byte_len() == u64::from(size));
                if exact {
                    return r.write(off, i128::from(value));
                }
                for k in 0..u64::from(size) {
                    r.write_byte(off + k, ((value >> (8 * k)) & 0xff) as u8)?;
                }
                Ok(())
            }
        }
    }
}

/// A base-relative accessor into an address space.
#[derive(Debug, Clone)]
pub struct AddrHandle {
    space: SharedAddressSpace,
    base: u64,
}

macro_rules! sized_access {
    ($read:ident, $write:ident, $bytes:expr) => {
        #[doc = concat!("Reads ", stringify!($bytes), " byte(s) at `base + offset`.")]
        pub fn $read(&self, offset: u64) -> Result<u64, SimError> {
            self.read(offset, $bytes)
        }

        #[doc = concat!("Writes ", stringify!($bytes), " byte(s) at `base + offset`.")]
        pub fn $write(&self, offset: u64, value: u64) -> Result<(), SimError> {
            self.write(offset, value, $bytes)
        }
    };
}

impl AddrHandle {
    /// A handle at `base` within `space`.
    pub fn new(space: SharedAddressSpace, base: u64) -> Self {
        Self { space, base }
    }

    /// The base address.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// The underlying address space.
    pub fn space(&self) -> &SharedAddressSpace {
        &self.space
    }

    /// A handle `offset` bytes further in.
    pub fn offset(&self, offset: u64) -> Self {
        Self::new(Rc::clone(&self.space), self.base.wrapping_add(offset))
    }

    /// Reads `size` bytes at `base + offset`.
    pub fn read(&self, offset: u64, size: u32) -> Result<u64, SimError> {
        self.space
            .borrow()
            .read(self.base.wrapping_add(offset), size)
    }

    /// Writes `size` bytes at `base + offset`.
    pub fn write(&self, offset: u64, value: u64, size: u32) -> Result<(), SimError> {
        self.space
            .borrow()
            .write(self.base.wrapping_add(offset), value, size)
    }

    sized_access!(read8, write8, 1);
    sized_access!(read16, write16, 2);
    sized_access!(read32, write32, 4);
    sized_access!(read64, write64, 8);
}
