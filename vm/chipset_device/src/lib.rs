// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types and traits shared between emulated devices and the buses that route
//! guest port IO, MMIO, and PCI configuration space accesses to them.

#![forbid(unsafe_code)]

pub mod io;
pub mod io_range;
pub mod pci;
