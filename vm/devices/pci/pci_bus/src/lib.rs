// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The PCI configuration-space bus and the guest-facing mechanisms that reach
//! it: the legacy 0xCF8/0xCFC port pair and the memory-mapped ECAM window.

#![forbid(unsafe_code)]

mod config_bus;
mod ecam;
mod mechanism;

#[cfg(test)]
mod test_helpers;

pub use config_bus::PciBusError;
pub use config_bus::PciConfigBus;
pub use ecam::EcamWindow;
pub use mechanism::CONFIG_PORTS_LEN;
pub use mechanism::ConfigAddress;
pub use mechanism::ConfigAddressMechanism;

/// Port of the configuration address register.
pub const CONFIG_ADDRESS_PORT: u16 = 0xcf8;
/// Port of the configuration data register.
pub const CONFIG_DATA_PORT: u16 = 0xcfc;

/// Device numbers per bus.
pub const MAX_DEVICES_PER_BUS: u8 = 32;
/// Function numbers per device.
pub const MAX_FUNCTIONS_PER_DEVICE: u8 = 8;

/// A bus:device:function address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bdf {
    /// Bus number.
    pub bus: u8,
    /// Device number, 0 through 31.
    pub device: u8,
    /// Function number, 0 through 7.
    pub function: u8,
}

impl Bdf {
    /// Creates a new address.
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }

    /// Returns `true` if the device and function numbers are in range.
    pub const fn is_valid(&self) -> bool {
        self.device < MAX_DEVICES_PER_BUS && self.function < MAX_FUNCTIONS_PER_DEVICE
    }
}

impl std::fmt::Display for Bdf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}:{:02x}.{:x}", self.bus, self.device, self.function)
    }
}

impl From<(u8, u8, u8)> for Bdf {
    fn from((bus, device, function): (u8, u8, u8)) -> Self {
        Self::new(bus, device, function)
    }
}

impl From<Bdf> for (u8, u8, u8) {
    fn from(bdf: Bdf) -> Self {
        (bdf.bus, bdf.device, bdf.function)
    }
}
