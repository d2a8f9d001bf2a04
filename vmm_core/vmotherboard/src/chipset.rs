// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The PCI host bridge wiring: an IO bus, an MMIO bus, and the
//! configuration-space bus reachable from both.

use crate::AddressBus;
use anyhow::Context as _;
use parking_lot::Mutex;
use pci_bus::CONFIG_ADDRESS_PORT;
use pci_bus::CONFIG_PORTS_LEN;
use pci_bus::ConfigAddressMechanism;
use pci_bus::EcamWindow;
use pci_bus::PciConfigBus;
use pci_core::device::PciDevice;
use pci_core::spec::hwid::HardwareIds;
use std::sync::Arc;

/// Placement of the memory-mapped configuration window.
#[derive(Debug, Clone)]
pub struct EcamConfig {
    /// MMIO base address.
    pub base: u64,
    /// First bus decoded by the window.
    pub start_bus: u8,
    /// Last bus decoded by the window.
    pub end_bus: u8,
}

/// Which configuration access mechanisms the chipset exposes.
#[derive(Debug, Clone)]
pub struct PciChipsetConfig {
    /// Base port of the address/data port pair, or `None` to leave them off.
    pub config_ports: Option<u16>,
    /// The ECAM window, if any.
    pub ecam: Option<EcamConfig>,
}

impl Default for PciChipsetConfig {
    fn default() -> Self {
        Self {
            config_ports: Some(CONFIG_ADDRESS_PORT),
            ecam: None,
        }
    }
}

/// A PCI host bridge with its IO and MMIO buses.
pub struct PciChipset {
    io: AddressBus,
    mmio: AddressBus,
    pci_bus: Arc<PciConfigBus>,
}

impl PciChipset {
    /// Builds the buses and claims the configuration ranges in `config`.
    pub fn new(config: &PciChipsetConfig) -> anyhow::Result<Self> {
        let io = AddressBus::new("io");
        let mmio = AddressBus::new("mmio");
        let pci_bus = Arc::new(PciConfigBus::new());

        if let Some(port) = config.config_ports {
            let mechanism = ConfigAddressMechanism::new(pci_bus.clone());
            io.register_range(
                "pci-config-ports",
                port.into(),
                CONFIG_PORTS_LEN,
                Arc::new(mechanism),
            )
            .context("failed to claim pci configuration ports")?;
        }

        if let Some(ecam) = &config.ecam {
            let window = EcamWindow::new(pci_bus.clone(), ecam.start_bus, ecam.end_bus)
                .context("invalid ecam configuration")?;
            mmio.register_range("ecam", ecam.base, window.size(), Arc::new(window))
                .with_context(|| format!("failed to map ecam window at {:#x}", ecam.base))?;
        }

        tracing::info!(
            config_ports = config.config_ports,
            ecam_base = config.ecam.as_ref().map(|ecam| ecam.base),
            "pci chipset ready"
        );

        Ok(Self { io, mmio, pci_bus })
    }

    /// The port IO bus.
    pub fn io(&self) -> &AddressBus {
        &self.io
    }

    /// The MMIO bus.
    pub fn mmio(&self) -> &AddressBus {
        &self.mmio
    }

    /// The configuration-space bus.
    pub fn pci_bus(&self) -> &Arc<PciConfigBus> {
        &self.pci_bus
    }

    /// Creates a device whose BARs land on this chipset's buses.
    pub fn new_device(&self, name: impl Into<Arc<str>>, hardware_ids: HardwareIds) -> PciDevice {
        PciDevice::new(
            name,
            hardware_ids,
            Arc::new(self.io.clone()),
            Arc::new(self.mmio.clone()),
        )
    }

    /// Registers a device on the configuration-space bus.
    pub fn add_device(&self, device: PciDevice) -> anyhow::Result<Arc<Mutex<PciDevice>>> {
        let name = device.name().to_owned();
        self.pci_bus
            .register(device)
            .with_context(|| format!("failed to add pci device {name}"))
    }
}
