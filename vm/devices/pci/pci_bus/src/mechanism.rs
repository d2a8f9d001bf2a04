// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI configuration mechanism #1.
//!
//! The guest selects a function and register by writing a [`ConfigAddress`]
//! to the address port (0xCF8), then moves up to four bytes through the data
//! port (0xCFC-0xCFF). Both ports are handled by a single
//! [`ConfigAddressMechanism`] registered as an 8-byte range starting at the
//! address port.

use crate::Bdf;
use crate::PciConfigBus;
use bitfield_struct::bitfield;
use chipset_device::io::IoError;
use chipset_device::io::IoResult;
use chipset_device::io_range::IoRangeHandler;
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::Arc;

/// Length of the port range covering the address and data ports.
pub const CONFIG_PORTS_LEN: u64 = 8;

const DATA_PORT_OFFSET: u64 = 4;

/// The value latched in the configuration address register.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct ConfigAddress {
    /// Byte within the selected register.
    #[bits(2)]
    pub register_offset: u8,
    /// Dword register number.
    #[bits(6)]
    pub register_number: u8,
    /// Function number.
    #[bits(3)]
    pub function: u8,
    /// Device number.
    #[bits(5)]
    pub device: u8,
    /// Bus number.
    pub bus: u8,
    #[bits(7)]
    _reserved: u8,
    /// Data port accesses are only forwarded while this is set.
    pub enable: bool,
}

impl ConfigAddress {
    /// The selected function.
    pub fn bdf(&self) -> Bdf {
        Bdf::new(self.bus(), self.device(), self.function())
    }

    /// The selected configuration space offset.
    pub fn offset(&self) -> u16 {
        u16::from(self.register_number()) * 4 + u16::from(self.register_offset())
    }
}

/// The 0xCF8/0xCFC port pair of a host bridge.
///
/// The latched address is held for the whole data port access, so one vCPU's
/// select-then-access can't observe another's select.
pub struct ConfigAddressMechanism {
    config_address: Mutex<ConfigAddress>,
    pci_bus: Arc<PciConfigBus>,
}

impl ConfigAddressMechanism {
    /// Creates the mechanism in front of `pci_bus`, with nothing latched.
    pub fn new(pci_bus: Arc<PciConfigBus>) -> Self {
        Self {
            config_address: Mutex::new(ConfigAddress::new()),
            pci_bus,
        }
    }

    /// The currently latched address.
    pub fn config_address(&self) -> ConfigAddress {
        *self.config_address.lock()
    }

    /// Reads the data port. `sub_offset` is the port's distance from 0xCFC.
    pub fn read_data(&self, sub_offset: u8, data: &mut [u8]) {
        data.fill(!0);
        let address = self.config_address.lock();
        if !address.enable() {
            return;
        }

        let len = data.len().min(4usize.saturating_sub(sub_offset.into()));
        let bdf = address.bdf();
        let offset = address.offset() + u16::from(sub_offset);
        for (offset, range) in pieces(offset, len) {
            let piece = &mut data[range];
            if let IoResult::Err(err) = self.pci_bus.cfg_read(bdf, offset, piece) {
                tracing::trace!(%bdf, offset, ?err, "config space read not claimed");
                piece.fill(!0);
            }
        }
    }

    /// Writes the data port. `sub_offset` is the port's distance from 0xCFC.
    pub fn write_data(&self, sub_offset: u8, data: &[u8]) {
        let address = self.config_address.lock();
        if !address.enable() {
            return;
        }

        let len = data.len().min(4usize.saturating_sub(sub_offset.into()));
        let bdf = address.bdf();
        let offset = address.offset() + u16::from(sub_offset);
        for (offset, range) in pieces(offset, len) {
            if let IoResult::Err(err) = self.pci_bus.cfg_write(bdf, offset, &data[range]) {
                tracing::trace!(%bdf, offset, ?err, "config space write dropped");
            }
        }
    }
}

/// Splits `len` bytes at `offset` into naturally aligned 1, 2 or 4 byte
/// accesses, yielding each access's offset and its range within the data.
fn pieces(offset: u16, len: usize) -> impl Iterator<Item = (u16, Range<usize>)> {
    let mut done = 0;
    std::iter::from_fn(move || {
        if done == len {
            return None;
        }
        let piece_offset = offset + done as u16;
        let width = [4, 2, 1]
            .into_iter()
            .find(|&w| w <= len - done && usize::from(piece_offset) % w == 0)
            .unwrap_or(1);
        let range = done..done + width;
        done += width;
        Some((piece_offset, range))
    })
}

impl IoRangeHandler for ConfigAddressMechanism {
    fn io_read(&self, offset: u64, data: &mut [u8]) -> IoResult {
        match offset {
            0 if data.len() == 4 => {
                data.copy_from_slice(&self.config_address().into_bits().to_le_bytes());
            }
            0..DATA_PORT_OFFSET => data.fill(!0),
            DATA_PORT_OFFSET..CONFIG_PORTS_LEN => {
                self.read_data((offset - DATA_PORT_OFFSET) as u8, data)
            }
            _ => {
                data.fill(!0);
                return IoResult::Err(IoError::InvalidRegister);
            }
        }
        IoResult::Ok
    }

    fn io_write(&self, offset: u64, data: &[u8]) -> IoResult {
        match offset {
            0 => {
                // Only full dword writes select a function.
                if let Ok(bytes) = <[u8; 4]>::try_from(data) {
                    *self.config_address.lock() =
                        ConfigAddress::from_bits(u32::from_le_bytes(bytes));
                } else {
                    tracing::debug!(len = data.len(), "ignoring partial config address write");
                }
            }
            1..DATA_PORT_OFFSET => {}
            DATA_PORT_OFFSET..CONFIG_PORTS_LEN => {
                self.write_data((offset - DATA_PORT_OFFSET) as u8, data)
            }
            _ => return IoResult::Err(IoError::InvalidRegister),
        }
        IoResult::Ok
    }
}
