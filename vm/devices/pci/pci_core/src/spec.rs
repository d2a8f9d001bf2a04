// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types and constants specified by the PCI spec.
//!
//! This module MUST NOT contain any vendor-specific constants!

pub mod hwid {
    //! Hardware ID types and constants

    #![expect(missing_docs)] // constants/fields are self-explanatory

    /// A collection of hard-coded hardware IDs specific to a particular PCI
    /// device, as reflected in their corresponding PCI configuration space
    /// registers.
    ///
    /// See PCI 2.3 Spec - 6.2.1 for details on each of these fields.
    #[derive(Debug, Copy, Clone)]
    pub struct HardwareIds {
        pub vendor_id: u16,
        pub device_id: u16,
        pub revision_id: u8,
        pub prog_if: ProgrammingInterface,
        pub sub_class: Subclass,
        pub base_class: ClassCode,
        pub type0_sub_vendor_id: u16,
        pub type0_sub_system_id: u16,
    }

    // Most class/subclass/programming interface values aren't used. Only add
    // values as needed.

    /// ClassCode identifies the PCI device's type.
    ///
    /// Values pulled from <https://wiki.osdev.org/PCI#Class_Codes>.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ClassCode(pub u8);

    impl ClassCode {
        pub const NETWORK_CONTROLLER: Self = Self(0x02);
    }

    impl From<u8> for ClassCode {
        fn from(c: u8) -> Self {
            Self(c)
        }
    }

    impl From<ClassCode> for u8 {
        fn from(c: ClassCode) -> Self {
            c.0
        }
    }

    /// SubclassCode identifies the PCI device's function.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Subclass(pub u8);

    impl Subclass {
        // Network Controller (Class code: 0x02)
        pub const NETWORK_CONTROLLER_ETHERNET: Self = Self(0x00);
    }

    impl From<u8> for Subclass {
        fn from(c: u8) -> Self {
            Self(c)
        }
    }

    impl From<Subclass> for u8 {
        fn from(c: Subclass) -> Self {
            c.0
        }
    }

    /// ProgrammingInterface (aka, program interface byte) identifies the PCI
    /// device's register-level programming interface.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ProgrammingInterface(pub u8);

    impl ProgrammingInterface {
        pub const NONE: Self = Self(0x00);
    }

    impl From<u8> for ProgrammingInterface {
        fn from(c: u8) -> Self {
            Self(c)
        }
    }

    impl From<ProgrammingInterface> for u8 {
        fn from(c: ProgrammingInterface) -> Self {
            c.0
        }
    }
}

/// Configuration Space
///
/// Sources: PCI 2.3 Spec - Chapter 6
#[expect(missing_docs)] // primarily enums/structs with self-explanatory variants
pub mod cfg_space {
    use bitfield_struct::bitfield;

    /// Size of a conventional PCI function's configuration space.
    pub const CONFIG_SPACE_SIZE: usize = 0x100;

    /// Size of a function's configuration space as seen through the
    /// memory-mapped (extended) access window.
    pub const EXTENDED_CONFIG_SPACE_SIZE: usize = 0x1000;

    /// Offsets into the type 00h configuration space header.
    ///
    /// Table pulled from <https://wiki.osdev.org/PCI>
    ///
    /// | Offset | Bits 31-24                 | Bits 23-16  | Bits 15-8           | Bits 7-0             |
    /// |--------|----------------------------|-------------|---------------------|--------------------- |
    /// | 0x0    | Device ID                  |             | Vendor ID           |                      |
    /// | 0x4    | Status                     |             | Command             |                      |
    /// | 0x8    | Class code                 |             |                     | Revision ID          |
    /// | 0xC    | BIST                       | Header type | Latency Timer       | Cache Line Size      |
    /// | 0x10   | Base address #0 (BAR0)     |             |                     |                      |
    /// | 0x14   | Base address #1 (BAR1)     |             |                     |                      |
    /// | 0x18   | Base address #2 (BAR2)     |             |                     |                      |
    /// | 0x1C   | Base address #3 (BAR3)     |             |                     |                      |
    /// | 0x20   | Base address #4 (BAR4)     |             |                     |                      |
    /// | 0x24   | Base address #5 (BAR5)     |             |                     |                      |
    /// | 0x28   | Cardbus CIS Pointer        |             |                     |                      |
    /// | 0x2C   | Subsystem ID               |             | Subsystem Vendor ID |                      |
    /// | 0x30   | Expansion ROM base address |             |                     |                      |
    /// | 0x34   | Reserved                   |             |                     | Capabilities Pointer |
    /// | 0x38   | Reserved                   |             |                     |                      |
    /// | 0x3C   | Max latency                | Min Grant   | Interrupt PIN       | Interrupt Line       |
    #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct HeaderType00(pub u16);

    impl HeaderType00 {
        pub const DEVICE_VENDOR: Self = Self(0x00);
        pub const STATUS_COMMAND: Self = Self(0x04);
        pub const CLASS_REVISION: Self = Self(0x08);
        pub const BIST_HEADER: Self = Self(0x0C);
        pub const BAR0: Self = Self(0x10);
        pub const BAR1: Self = Self(0x14);
        pub const BAR2: Self = Self(0x18);
        pub const BAR3: Self = Self(0x1C);
        pub const BAR4: Self = Self(0x20);
        pub const BAR5: Self = Self(0x24);
        pub const CARDBUS_CIS_PTR: Self = Self(0x28);
        pub const SUBSYSTEM_ID: Self = Self(0x2C);
        pub const EXPANSION_ROM_BASE: Self = Self(0x30);
        pub const RESERVED_CAP_PTR: Self = Self(0x34);
        pub const RESERVED: Self = Self(0x38);
        pub const LATENCY_INTERRUPT: Self = Self(0x3C);
    }

    pub const HEADER_TYPE_00_SIZE: u16 = 0x40;

    /// Number of base address registers in a type 00h header.
    pub const BAR_COUNT: usize = 6;

    /// Byte offsets of the individual (sub-dword) header fields.
    pub mod offsets {
        pub const VENDOR_ID: u16 = 0x00;
        pub const DEVICE_ID: u16 = 0x02;
        pub const COMMAND: u16 = 0x04;
        pub const STATUS: u16 = 0x06;
        pub const REVISION_ID: u16 = 0x08;
        pub const CACHE_LINE_SIZE: u16 = 0x0C;
        pub const LATENCY_TIMER: u16 = 0x0D;
        pub const HEADER_TYPE: u16 = 0x0E;
        pub const INTERRUPT_LINE: u16 = 0x3C;
        pub const INTERRUPT_PIN: u16 = 0x3D;
    }

    /// Returns the index of the BAR whose register contains `offset`.
    pub const fn bar_index(offset: u16) -> Option<u8> {
        if offset >= HeaderType00::BAR0.0 && offset < HeaderType00::CARDBUS_CIS_PTR.0 {
            Some(((offset - HeaderType00::BAR0.0) / 4) as u8)
        } else {
            None
        }
    }

    /// BAR in-band encoding bits.
    ///
    /// The low bits of the BAR are not actually part of the address.
    /// Instead, they are used to in-band encode various bits of
    /// metadata about the BAR, and are masked off when determining the
    /// actual address.
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct BarEncodingBits {
        pub use_pio: bool,

        _reserved: bool,

        /// False indicates 32 bit.
        /// Only used in MMIO
        pub type_64_bit: bool,
        pub prefetchable: bool,

        #[bits(28)]
        _reserved2: u32,
    }

    impl BarEncodingBits {
        /// Encoding of a port IO BAR.
        pub const fn io() -> Self {
            Self::new().with_use_pio(true)
        }

        /// Encoding of a 32-bit memory BAR.
        pub const fn memory32(prefetchable: bool) -> Self {
            Self::new().with_prefetchable(prefetchable)
        }

        /// Encoding of a 64-bit memory BAR.
        pub const fn memory64(prefetchable: bool) -> Self {
            Self::new()
                .with_type_64_bit(true)
                .with_prefetchable(prefetchable)
        }
    }

    /// Low bits of an IO BAR that hold decode information rather than address.
    pub const BAR_IO_DECODE_MASK: u32 = 0x3;
    /// Low bits of a memory BAR that hold decode information rather than address.
    pub const BAR_MEMORY_DECODE_MASK: u32 = 0xF;

    /// Command Register
    #[bitfield(u16)]
    #[derive(PartialEq, Eq)]
    pub struct Command {
        pub pio_enabled: bool,
        pub mmio_enabled: bool,
        pub bus_master: bool,
        pub special_cycles: bool,
        pub enable_memory_write_invalidate: bool,
        pub vga_palette_snoop: bool,
        pub parity_error_response: bool,
        /// must be 0
        #[bits(1)]
        _reserved: u16,
        pub enable_serr: bool,
        pub enable_fast_b2b: bool,
        pub intx_disable: bool,
        #[bits(5)]
        _reserved2: u16,
    }

    /// Status Register
    #[bitfield(u16)]
    #[derive(PartialEq, Eq)]
    pub struct Status {
        #[bits(3)]
        _reserved: u16,
        pub interrupt_status: bool,
        pub capabilities_list: bool,
        pub capable_mhz_66: bool,
        _reserved2: bool,
        pub capable_fast_b2b: bool,
        pub err_master_parity: bool,

        #[bits(2)]
        pub devsel: DevSel,

        pub abort_target_signaled: bool,
        pub abort_target_received: bool,
        pub abort_master_received: bool,
        pub err_signaled: bool,
        pub err_detected_parity: bool,
    }

    /// Status bits that the guest clears by writing a 1 to them.
    pub const STATUS_WRITE_1_TO_CLEAR: u16 = Status::new()
        .with_err_master_parity(true)
        .with_abort_target_signaled(true)
        .with_abort_target_received(true)
        .with_abort_master_received(true)
        .with_err_signaled(true)
        .with_err_detected_parity(true)
        .into_bits();

    #[derive(Debug, PartialEq, Eq)]
    #[repr(u16)]
    pub enum DevSel {
        Fast = 0b00,
        Medium = 0b01,
        Slow = 0b10,
        Reserved = 0b11,
    }

    impl DevSel {
        const fn from_bits(bits: u16) -> Self {
            match bits {
                0b00 => DevSel::Fast,
                0b01 => DevSel::Medium,
                0b10 => DevSel::Slow,
                _ => DevSel::Reserved,
            }
        }

        const fn into_bits(self) -> u16 {
            self as u16
        }
    }

    /// Header type value for a single-function type 00h header.
    pub const HEADER_TYPE_00: u8 = 0x00;
    /// Header type bit advertising a multi-function device.
    pub const HEADER_TYPE_MULTI_FUNCTION: u8 = 0x80;
}
