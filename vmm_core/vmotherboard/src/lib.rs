// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Motherboard wiring for the PCI device model: a range-dispatch bus for port
//! IO and MMIO, and a chipset that puts the configuration-space bus behind the
//! 0xCF8/0xCFC ports and an optional ECAM window.

#![forbid(unsafe_code)]

mod bus;
mod chipset;

pub use bus::AddressBus;
pub use chipset::EcamConfig;
pub use chipset::PciChipset;
pub use chipset::PciChipsetConfig;
