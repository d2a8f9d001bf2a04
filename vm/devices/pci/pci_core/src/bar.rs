// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Base address register management.
//!
//! A [`BarManager`] owns the six BAR slots of a type 0 function. Each slot is
//! either unused, a port IO region, a 32-bit memory region, a 64-bit memory
//! region, or the upper half of the 64-bit region in the slot below it, so a
//! 64-bit BAR's two registers can never be activated independently.
//!
//! The guest drives a BAR with two kinds of writes:
//!
//! * a sizing probe (all address bits set), answered on the next read with
//!   the two's complement of the region size plus the fixed decode bits, and
//! * an address assignment, which moves the region on its bus to the new
//!   base. The bus replaces the old range with the new one in a single step.
//!
//! A 64-bit BAR is only (re)mapped once its upper register has been written,
//! so a mapping is never built from a fresh low half and a stale high half.

use crate::cfg_space::ConfigSpace;
use crate::spec::cfg_space::BAR_COUNT;
use crate::spec::cfg_space::BAR_IO_DECODE_MASK;
use crate::spec::cfg_space::BAR_MEMORY_DECODE_MASK;
use crate::spec::cfg_space::BarEncodingBits;
use chipset_device::io_range::ControlIoRange;
use chipset_device::io_range::RangeError;
use thiserror::Error;

const MIN_IO_BAR_SIZE: u64 = 4;
const MAX_IO_BAR_SIZE: u64 = 0x1_0000;
const MIN_MEMORY_BAR_SIZE: u64 = 16;
const MAX_MEMORY32_BAR_SIZE: u64 = 1 << 31;
const MAX_MEMORY64_BAR_SIZE: u64 = 1 << 63;

/// Errors from configuring or activating a BAR.
#[derive(Debug, Clone, Error)]
pub enum BarError {
    /// There are only six BARs.
    #[error("bar index {0} is out of range")]
    InvalidIndex(u8),
    /// BAR sizes must be powers of two.
    #[error("bar {index} size {len:#x} is not a power of two")]
    SizeNotPowerOfTwo {
        /// BAR index.
        index: u8,
        /// Requested size.
        len: u64,
    },
    /// The BAR is smaller than its decode type allows.
    #[error("bar {index} size {len:#x} is below the minimum of {min:#x}")]
    SizeTooSmall {
        /// BAR index.
        index: u8,
        /// Requested size.
        len: u64,
        /// Smallest size for the decode type.
        min: u64,
    },
    /// The BAR is larger than its decode type can address.
    #[error("bar {index} size {len:#x} exceeds the maximum of {max:#x}")]
    SizeTooLarge {
        /// BAR index.
        index: u8,
        /// Requested size.
        len: u64,
        /// Largest size for the decode type.
        max: u64,
    },
    /// The decode bits describe something that doesn't exist, like a
    /// prefetchable IO BAR.
    #[error("bar {index} has invalid decode bits {encoding:#x}")]
    InvalidLayout {
        /// BAR index.
        index: u8,
        /// The rejected encoding.
        encoding: u32,
    },
    /// A 64-bit BAR was placed in the last slot.
    #[error("64-bit bar {0} has no slot for its upper half")]
    NoUpperSlot(u8),
    /// The slot is already used by another BAR.
    #[error("bar slot {0} is already in use")]
    SlotInUse(u8),
    /// The BAR has not been configured.
    #[error("bar {0} is not configured")]
    Unconfigured(u8),
    /// A host-assigned address is misaligned or out of reach of the BAR.
    #[error("address {address:#x} is not valid for bar {index}")]
    InvalidAddress {
        /// BAR index.
        index: u8,
        /// Rejected address.
        address: u64,
    },
    /// The bus refused the region at its new base. The BAR is left inactive.
    #[error("failed to activate bar {index} at {base:#x}")]
    Activation {
        /// BAR index.
        index: u8,
        /// The base the BAR was being moved to.
        base: u64,
        /// The bus error.
        #[source]
        source: RangeError,
    },
}

/// The outcome of a guest write to a BAR register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BarWrite {
    /// The register is not backed by a configured BAR.
    Ignored,
    /// The guest is sizing the BAR. The next read returns the size mask.
    Probe,
    /// One half of a 64-bit BAR was assigned; the region stays where it is
    /// until the other half arrives.
    Pending,
    /// The BAR is active at `base`.
    Assigned {
        /// Base address of the region.
        base: u64,
    },
}

struct BarRegion {
    len: u64,
    encoding: BarEncodingBits,
    control: Box<dyn ControlIoRange>,
    /// The low register holds a sizing response rather than an address.
    sizing: bool,
}

impl std::fmt::Debug for BarRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarRegion")
            .field("len", &self.len)
            .field("encoding", &self.encoding)
            .field("region", &self.control.region_name())
            .field("addr", &self.control.addr())
            .field("sizing", &self.sizing)
            .finish()
    }
}

impl BarRegion {
    fn decode_mask(&self) -> u32 {
        if self.encoding.use_pio() {
            BAR_IO_DECODE_MASK
        } else {
            BAR_MEMORY_DECODE_MASK
        }
    }

    fn address_mask(&self) -> u64 {
        !(self.len - 1)
    }

    /// Builds the low register value for `addr`, with the decode bits applied.
    fn low_register(&self, addr: u64) -> u32 {
        (addr as u32 & !self.decode_mask()) | self.encoding.into_bits()
    }

    fn probe_response(&self) -> (u32, u32) {
        let mask = self.address_mask();
        (self.low_register(mask), (mask >> 32) as u32)
    }

    fn activate(&mut self, index: u8, base: u64) -> Result<BarWrite, BarError> {
        if self.control.addr() == Some(base) {
            return Ok(BarWrite::Assigned { base });
        }
        self.control
            .map(base)
            .map_err(|source| BarError::Activation {
                index,
                base,
                source,
            })?;
        tracing::debug!(
            index,
            base,
            len = self.len,
            region = self.control.region_name(),
            "bar mapped"
        );
        Ok(BarWrite::Assigned { base })
    }
}

#[derive(Debug)]
enum BarSlot {
    Unconfigured,
    Io(BarRegion),
    Memory32(BarRegion),
    Memory64(BarRegion),
    /// The high half of the 64-bit BAR in the slot below.
    Memory64Upper,
}

impl BarSlot {
    fn region(&self) -> Option<&BarRegion> {
        match self {
            BarSlot::Io(region) | BarSlot::Memory32(region) | BarSlot::Memory64(region) => {
                Some(region)
            }
            BarSlot::Unconfigured | BarSlot::Memory64Upper => None,
        }
    }

    fn region_mut(&mut self) -> Option<&mut BarRegion> {
        match self {
            BarSlot::Io(region) | BarSlot::Memory32(region) | BarSlot::Memory64(region) => {
                Some(region)
            }
            BarSlot::Unconfigured | BarSlot::Memory64Upper => None,
        }
    }
}

/// The BAR table of a single function.
///
/// Register values live in the function's [`ConfigSpace`], which every
/// method takes explicitly so reads of a BAR register need no special path.
#[derive(Debug)]
pub struct BarManager {
    slots: [BarSlot; BAR_COUNT],
}

impl Default for BarManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BarManager {
    /// Creates a table with every slot unused.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| BarSlot::Unconfigured),
        }
    }

    /// Sets up BAR `index` as a region of `len` bytes with the decode type in
    /// `layout`, placed on its bus through `control`.
    ///
    /// The register is initialized with the decode bits and a zero address.
    /// The region is not mapped until an address is assigned.
    pub fn configure(
        &mut self,
        cfg: &mut ConfigSpace,
        index: u8,
        len: u64,
        layout: BarEncodingBits,
        control: Box<dyn ControlIoRange>,
    ) -> Result<(), BarError> {
        let slot = index as usize;
        if slot >= BAR_COUNT {
            return Err(BarError::InvalidIndex(index));
        }

        let (encoding, min, max) = if layout.use_pio() {
            if layout.type_64_bit() || layout.prefetchable() {
                return Err(BarError::InvalidLayout {
                    index,
                    encoding: layout.into_bits(),
                });
            }
            (BarEncodingBits::io(), MIN_IO_BAR_SIZE, MAX_IO_BAR_SIZE)
        } else if layout.type_64_bit() {
            (
                BarEncodingBits::memory64(layout.prefetchable()),
                MIN_MEMORY_BAR_SIZE,
                MAX_MEMORY64_BAR_SIZE,
            )
        } else {
            (
                BarEncodingBits::memory32(layout.prefetchable()),
                MIN_MEMORY_BAR_SIZE,
                MAX_MEMORY32_BAR_SIZE,
            )
        };

        if !len.is_power_of_two() {
            return Err(BarError::SizeNotPowerOfTwo { index, len });
        }
        if len < min {
            return Err(BarError::SizeTooSmall { index, len, min });
        }
        if len > max {
            return Err(BarError::SizeTooLarge { index, len, max });
        }
        if !matches!(self.slots[slot], BarSlot::Unconfigured) {
            return Err(BarError::SlotInUse(index));
        }

        let region = BarRegion {
            len,
            encoding,
            control,
            sizing: false,
        };

        self.slots[slot] = if encoding.type_64_bit() {
            match self.slots.get(slot + 1) {
                None => return Err(BarError::NoUpperSlot(index)),
                Some(BarSlot::Unconfigured) => {}
                Some(_) => return Err(BarError::SlotInUse(index + 1)),
            }
            self.slots[slot + 1] = BarSlot::Memory64Upper;
            cfg.set_bar_register(index + 1, 0);
            BarSlot::Memory64(region)
        } else if encoding.use_pio() {
            BarSlot::Io(region)
        } else {
            BarSlot::Memory32(region)
        };
        cfg.set_bar_register(index, encoding.into_bits());

        tracing::debug!(index, len, encoding = encoding.into_bits(), "configured bar");
        Ok(())
    }

    /// Handles a guest write of the full register `value` to BAR `index`.
    ///
    /// On error the register keeps the value the guest wrote, but the
    /// region is off the bus.
    pub fn write(
        &mut self,
        cfg: &mut ConfigSpace,
        index: u8,
        value: u32,
    ) -> Result<BarWrite, BarError> {
        let upper = match self.slots.get(index as usize) {
            None => return Err(BarError::InvalidIndex(index)),
            Some(BarSlot::Unconfigured) => return Ok(BarWrite::Ignored),
            Some(BarSlot::Memory64Upper) => true,
            Some(_) => false,
        };

        if upper {
            self.write_upper(cfg, index - 1, value)
        } else {
            self.write_lower(cfg, index, value)
        }
    }

    fn write_lower(
        &mut self,
        cfg: &mut ConfigSpace,
        index: u8,
        value: u32,
    ) -> Result<BarWrite, BarError> {
        let slot = &mut self.slots[index as usize];
        let is_64_bit = matches!(slot, BarSlot::Memory64(_));
        let Some(region) = slot.region_mut() else {
            return Ok(BarWrite::Ignored);
        };

        if value | region.decode_mask() == u32::MAX {
            region.sizing = true;
            cfg.set_bar_register(index, region.probe_response().0);
            return Ok(BarWrite::Probe);
        }

        region.sizing = false;
        let low = region.low_register(u64::from(value) & region.address_mask());
        cfg.set_bar_register(index, low);
        if is_64_bit {
            return Ok(BarWrite::Pending);
        }

        region.activate(index, u64::from(low & !region.decode_mask()))
    }

    fn write_upper(
        &mut self,
        cfg: &mut ConfigSpace,
        index: u8,
        value: u32,
    ) -> Result<BarWrite, BarError> {
        let Some(region) = self.slots[index as usize].region_mut() else {
            return Ok(BarWrite::Ignored);
        };

        if value == u32::MAX {
            cfg.set_bar_register(index + 1, region.probe_response().1);
            return Ok(BarWrite::Probe);
        }

        let high = value & (region.address_mask() >> 32) as u32;
        cfg.set_bar_register(index + 1, high);
        if region.sizing {
            return Ok(BarWrite::Pending);
        }

        let low = cfg.bar_register(index) & !region.decode_mask();
        region.activate(index, (u64::from(high) << 32) | u64::from(low))
    }

    /// Assigns BAR `index` the base `address` from the host side, the way
    /// firmware would, and activates it.
    pub fn set_address(
        &mut self,
        cfg: &mut ConfigSpace,
        index: u8,
        address: u64,
    ) -> Result<(), BarError> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(BarError::InvalidIndex(index))?;
        let is_64_bit = matches!(slot, BarSlot::Memory64(_));
        let region = slot.region_mut().ok_or(BarError::Unconfigured(index))?;

        let limit = if is_64_bit {
            u64::MAX
        } else {
            u32::MAX.into()
        };
        if address & !region.address_mask() != 0 || address > limit {
            return Err(BarError::InvalidAddress { index, address });
        }

        region.sizing = false;
        cfg.set_bar_register(index, region.low_register(address));
        if is_64_bit {
            cfg.set_bar_register(index + 1, (address >> 32) as u32);
        }
        region.activate(index, address).map(drop)
    }

    /// Returns the base and length of BAR `index` if it is currently mapped.
    pub fn mapping(&self, index: u8) -> Option<(u64, u64)> {
        let region = self.slots.get(index as usize)?.region()?;
        region.control.addr().map(|base| (base, region.len))
    }

    /// Returns the size of BAR `index`, if it is configured.
    pub fn len(&self, index: u8) -> Option<u64> {
        Some(self.slots.get(index as usize)?.region()?.len)
    }

    /// Takes every region off its bus and returns the registers to their
    /// power-on values.
    pub fn reset(&mut self, cfg: &mut ConfigSpace) {
        for (index, slot) in (0u8..).zip(&mut self.slots) {
            match slot {
                BarSlot::Unconfigured => {}
                BarSlot::Memory64Upper => cfg.set_bar_register(index, 0),
                BarSlot::Io(region) | BarSlot::Memory32(region) | BarSlot::Memory64(region) => {
                    region.control.unmap();
                    region.sizing = false;
                    cfg.set_bar_register(index, region.encoding.into_bits());
                }
            }
        }
    }
}
