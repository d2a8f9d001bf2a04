// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The configuration space byte store of a type 0 PCI function.
//!
//! The store is exactly [`CONFIG_SPACE_SIZE`] bytes. The standard header is
//! overlaid on the first 64 bytes as a typed, unaligned, little-endian view,
//! so header fields are read and written by name while guest accesses see the
//! same bytes at their architectural offsets.
//!
//! Guest writes go through [`ConfigSpace::write`], which applies the
//! architectural register semantics: read-only fields ignore writes, the
//! Status register is write-1-to-clear, and the command register only accepts
//! the bits we emulate. BAR registers are read-only from the point of view of
//! this type; they are owned by [`BarManager`](crate::bar::BarManager).

use crate::PciInterruptPin;
use crate::spec::cfg_space;
use crate::spec::cfg_space::BAR_COUNT;
use crate::spec::cfg_space::CONFIG_SPACE_SIZE;
use crate::spec::cfg_space::Command;
use crate::spec::cfg_space::Status;
use crate::spec::cfg_space::offsets;
use crate::spec::hwid::HardwareIds;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::byteorder::little_endian::U32;

/// Command register bits the emulated function implements.
pub const SUPPORTED_COMMAND_BITS: u16 = Command::new()
    .with_pio_enabled(true)
    .with_mmio_enabled(true)
    .with_bus_master(true)
    .with_special_cycles(true)
    .with_enable_memory_write_invalidate(true)
    .with_vga_palette_snoop(true)
    .with_parity_error_response(true)
    .with_enable_serr(true)
    .with_enable_fast_b2b(true)
    .with_intx_disable(true)
    .into_bits();

#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct Type0Header {
    vendor_id: U16,
    device_id: U16,
    command: U16,
    status: U16,
    revision_id: u8,
    prog_if: u8,
    sub_class: u8,
    base_class: u8,
    cache_line_size: u8,
    latency_timer: u8,
    header_type: u8,
    bist: u8,
    base_addresses: [U32; BAR_COUNT],
    cardbus_cis_ptr: U32,
    subsystem_vendor_id: U16,
    subsystem_id: U16,
    expansion_rom_base: U32,
    capabilities_ptr: u8,
    reserved: [u8; 7],
    interrupt_line: u8,
    interrupt_pin: u8,
    min_grant: u8,
    max_latency: u8,
}

const DEVICE_SPECIFIC_SIZE: usize = CONFIG_SPACE_SIZE - cfg_space::HEADER_TYPE_00_SIZE as usize;

#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct Registers {
    header: Type0Header,
    device_specific: [u8; DEVICE_SPECIFIC_SIZE],
}

const _: () = assert!(size_of::<Type0Header>() == cfg_space::HEADER_TYPE_00_SIZE as usize);
const _: () = assert!(size_of::<Registers>() == CONFIG_SPACE_SIZE);

/// Returns the mask of guest-writable bits of the byte at `offset`.
///
/// Status and the BARs are not covered here, they have their own semantics.
fn writable_mask(offset: usize) -> u8 {
    const COMMAND: usize = offsets::COMMAND as usize;
    const COMMAND_HI: usize = COMMAND + 1;
    const CACHE_LINE_SIZE: usize = offsets::CACHE_LINE_SIZE as usize;
    const LATENCY_TIMER: usize = offsets::LATENCY_TIMER as usize;
    const INTERRUPT_LINE: usize = offsets::INTERRUPT_LINE as usize;
    const DEVICE_SPECIFIC: usize = cfg_space::HEADER_TYPE_00_SIZE as usize;

    match offset {
        COMMAND => SUPPORTED_COMMAND_BITS as u8,
        COMMAND_HI => (SUPPORTED_COMMAND_BITS >> 8) as u8,
        CACHE_LINE_SIZE | LATENCY_TIMER | INTERRUPT_LINE => 0xff,
        DEVICE_SPECIFIC..CONFIG_SPACE_SIZE => 0xff,
        _ => 0,
    }
}

fn valid_width(len: usize) -> bool {
    matches!(len, 1 | 2 | 4)
}

/// The configuration space of a single type 0 PCI function.
#[derive(Debug, Clone)]
pub struct ConfigSpace {
    regs: Registers,
}

impl ConfigSpace {
    /// Creates a zeroed configuration space with the hardware ID fields and
    /// header type filled in.
    pub fn new(hardware_ids: &HardwareIds) -> Self {
        let mut regs = Registers::new_zeroed();
        let header = &mut regs.header;
        header.vendor_id.set(hardware_ids.vendor_id);
        header.device_id.set(hardware_ids.device_id);
        header.revision_id = hardware_ids.revision_id;
        header.prog_if = hardware_ids.prog_if.into();
        header.sub_class = hardware_ids.sub_class.into();
        header.base_class = hardware_ids.base_class.into();
        header.header_type = cfg_space::HEADER_TYPE_00;
        header.subsystem_vendor_id.set(hardware_ids.type0_sub_vendor_id);
        header.subsystem_id.set(hardware_ids.type0_sub_system_id);
        Self { regs }
    }

    /// Returns `true` if an access of `len` bytes at `offset` lies entirely
    /// within the configuration space.
    pub fn in_bounds(offset: u16, len: usize) -> bool {
        (offset as usize)
            .checked_add(len)
            .is_some_and(|end| end <= CONFIG_SPACE_SIZE)
    }

    /// Reads `data.len()` (1, 2, or 4) bytes at `offset`.
    ///
    /// Returns `false`, leaving `data` untouched, if the width is unsupported
    /// or the access falls outside the configuration space.
    pub fn read(&self, offset: u16, data: &mut [u8]) -> bool {
        if !valid_width(data.len()) || !Self::in_bounds(offset, data.len()) {
            return false;
        }
        self.read_bytes(offset, data);
        true
    }

    /// Writes `data` (1, 2, or 4 bytes) at `offset` with guest semantics.
    ///
    /// Bits that are read-only are left unchanged, and Status bits are
    /// cleared where `data` has a 1. The write is still considered handled
    /// when it only touches read-only bits. Returns `false`, dropping the
    /// write, if the width is unsupported or the access falls outside the
    /// configuration space.
    pub fn write(&mut self, offset: u16, data: &[u8]) -> bool {
        if !valid_width(data.len()) || !Self::in_bounds(offset, data.len()) {
            return false;
        }
        self.write_bytes(offset, data);
        true
    }

    /// Copies out raw bytes. The caller must have bounds checked the access.
    pub(crate) fn read_bytes(&self, offset: u16, data: &mut [u8]) {
        let start = offset as usize;
        data.copy_from_slice(&self.regs.as_bytes()[start..start + data.len()]);
    }

    /// Applies guest write semantics byte by byte. The caller must have
    /// bounds checked the access.
    pub(crate) fn write_bytes(&mut self, offset: u16, data: &[u8]) {
        const STATUS: usize = offsets::STATUS as usize;
        const STATUS_HI: usize = STATUS + 1;

        let start = offset as usize;
        let bytes = self.regs.as_mut_bytes();
        for (addr, &value) in (start..).zip(data) {
            let current = bytes[addr];
            bytes[addr] = match addr {
                STATUS => current & !(value & cfg_space::STATUS_WRITE_1_TO_CLEAR as u8),
                STATUS_HI => current & !(value & (cfg_space::STATUS_WRITE_1_TO_CLEAR >> 8) as u8),
                _ => {
                    let mask = writable_mask(addr);
                    (current & !mask) | (value & mask)
                }
            };
        }
    }

    /// Reads a byte. Returns `None` if `offset` is out of range.
    pub fn read_u8(&self, offset: u16) -> Option<u8> {
        let mut value = 0u8;
        self.read(offset, value.as_mut_bytes()).then_some(value)
    }

    /// Reads a 16-bit value. Returns `None` if the access is out of range.
    pub fn read_u16(&self, offset: u16) -> Option<u16> {
        let mut value = U16::new(0);
        self.read(offset, value.as_mut_bytes())
            .then(|| value.get())
    }

    /// Reads a 32-bit value. Returns `None` if the access is out of range.
    pub fn read_u32(&self, offset: u16) -> Option<u32> {
        let mut value = U32::new(0);
        self.read(offset, value.as_mut_bytes())
            .then(|| value.get())
    }

    /// Writes a byte with guest semantics.
    pub fn write_u8(&mut self, offset: u16, value: u8) -> bool {
        self.write(offset, value.as_bytes())
    }

    /// Writes a 16-bit value with guest semantics.
    pub fn write_u16(&mut self, offset: u16, value: u16) -> bool {
        self.write(offset, U16::new(value).as_bytes())
    }

    /// Writes a 32-bit value with guest semantics.
    pub fn write_u32(&mut self, offset: u16, value: u32) -> bool {
        self.write(offset, U32::new(value).as_bytes())
    }

    /// Gives the device emulator direct access to the device-specific region
    /// (offsets 0x40 through 0xff).
    pub fn device_specific(&self) -> &[u8] {
        &self.regs.device_specific
    }

    /// Mutable access to the device-specific region.
    pub fn device_specific_mut(&mut self) -> &mut [u8] {
        &mut self.regs.device_specific
    }

    /// The vendor ID.
    pub fn vendor_id(&self) -> u16 {
        self.regs.header.vendor_id.get()
    }

    /// The device ID.
    pub fn device_id(&self) -> u16 {
        self.regs.header.device_id.get()
    }

    /// The command register.
    pub fn command(&self) -> Command {
        Command::from_bits(self.regs.header.command.get())
    }

    /// The status register.
    pub fn status(&self) -> Status {
        Status::from_bits(self.regs.header.status.get())
    }

    /// Sets `bits` in the status register, leaving the others as they are.
    ///
    /// This is the device-side counterpart of the guest's write-1-to-clear.
    pub fn set_status_bits(&mut self, bits: Status) {
        let status = self.regs.header.status.get() | bits.into_bits();
        self.regs.header.status.set(status);
    }

    /// Returns the raw value of BAR register `index`.
    pub fn bar_register(&self, index: u8) -> u32 {
        self.regs.header.base_addresses[index as usize].get()
    }

    /// Sets the raw value of BAR register `index`.
    pub fn set_bar_register(&mut self, index: u8, value: u32) {
        self.regs.header.base_addresses[index as usize].set(value);
    }

    /// Sets or clears the multi-function bit of the header type register.
    pub fn set_multi_function(&mut self, multi_function: bool) {
        let header_type = &mut self.regs.header.header_type;
        if multi_function {
            *header_type |= cfg_space::HEADER_TYPE_MULTI_FUNCTION;
        } else {
            *header_type &= !cfg_space::HEADER_TYPE_MULTI_FUNCTION;
        }
    }

    /// Advertises an INTx pin in the Interrupt Pin register.
    pub fn set_interrupt_pin(&mut self, pin: Option<PciInterruptPin>) {
        self.regs.header.interrupt_pin = pin.map_or(0, PciInterruptPin::as_register);
    }

    /// The Interrupt Line register, as programmed by firmware or the OS.
    pub fn interrupt_line(&self) -> u8 {
        self.regs.header.interrupt_line
    }

    /// Returns the guest-programmable header registers to their power-on
    /// values. Hardware IDs and the device-specific region are preserved.
    pub fn reset(&mut self) {
        let header = &mut self.regs.header;
        header.command.set(0);
        header.status.set(0);
        header.cache_line_size = 0;
        header.latency_timer = 0;
        header.interrupt_line = 0;
        for bar in &mut header.base_addresses {
            bar.set(0);
        }
    }
}
