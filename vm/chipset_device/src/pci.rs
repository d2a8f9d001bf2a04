// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI configuration space access

use crate::io::IoResult;

/// Implemented by devices which have a PCI config space.
///
/// Accesses are 1, 2, or 4 bytes wide. `offset` is a byte offset into the
/// function's configuration space.
pub trait PciConfigSpace: Send {
    /// Dispatch a PCI config space read to the device.
    fn pci_cfg_read(&mut self, offset: u16, data: &mut [u8]) -> IoResult;
    /// Dispatch a PCI config space write to the device.
    fn pci_cfg_write(&mut self, offset: u16, data: &[u8]) -> IoResult;

    /// Check if the device has a suggested (bus, device, function) it expects
    /// to be located at.
    ///
    /// Most devices shouldn't care where they end up. Chipset functions with
    /// architecturally fixed addresses, and the individual functions of a
    /// multi-function card, are the exceptions.
    fn suggested_bdf(&mut self) -> Option<(u8, u8, u8)> {
        None
    }
}
