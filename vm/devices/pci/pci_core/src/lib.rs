// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Core PCI device model: the type 0 configuration space, base address
//! register management, and the device object that ties them to an IO bus
//! and an MMIO bus.

#![forbid(unsafe_code)]

pub mod bar;
pub mod cfg_space;
pub mod device;
pub mod spec;

#[cfg(test)]
mod test_helpers;

/// One of the four PCI INTx interrupt pins.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PciInterruptPin {
    /// INTA#
    IntA,
    /// INTB#
    IntB,
    /// INTC#
    IntC,
    /// INTD#
    IntD,
}

impl PciInterruptPin {
    /// The value reported in the Interrupt Pin register.
    pub const fn as_register(self) -> u8 {
        match self {
            PciInterruptPin::IntA => 1,
            PciInterruptPin::IntB => 2,
            PciInterruptPin::IntC => 3,
            PciInterruptPin::IntD => 4,
        }
    }
}
