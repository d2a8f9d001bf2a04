// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Dispatch of configuration space accesses by bus:device:function.

use crate::Bdf;
use crate::MAX_DEVICES_PER_BUS;
use chipset_device::io::IoError;
use chipset_device::io::IoResult;
use chipset_device::pci::PciConfigSpace;
use parking_lot::Mutex;
use parking_lot::RwLock;
use pci_core::bar::BarError;
use pci_core::device::PciDevice;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors from registering a function on the configuration-space bus.
#[derive(Debug, Error)]
pub enum PciBusError {
    /// The requested device or function number is out of range.
    #[error("{name} requested invalid address {bdf}")]
    InvalidBdf {
        /// Name of the function being registered.
        name: Arc<str>,
        /// The requested address.
        bdf: Bdf,
    },
    /// Another function already lives at the address.
    #[error("cannot register {name} at {bdf}, already used by {existing}")]
    Duplicate {
        /// Name of the function being registered.
        name: Arc<str>,
        /// The requested address.
        bdf: Bdf,
        /// Name of the function already registered there.
        existing: Arc<str>,
    },
    /// Every device number on the bus is taken.
    #[error("no free device number on bus {bus} for {name}")]
    NoFreeSlot {
        /// Name of the function being registered.
        name: Arc<str>,
        /// The bus that is full.
        bus: u8,
    },
    /// The device failed its own setup and can't be exposed to the guest.
    #[error("{name} is misconfigured")]
    Misconfigured {
        /// Name of the function being registered.
        name: Arc<str>,
        /// The setup error.
        #[source]
        source: BarError,
    },
    /// An ECAM window must cover at least one bus.
    #[error("invalid ecam bus range {start_bus}..={end_bus}")]
    InvalidBusRange {
        /// First bus of the window.
        start_bus: u8,
        /// Last bus of the window.
        end_bus: u8,
    },
}

struct BusEntry {
    name: Arc<str>,
    dev: Arc<Mutex<dyn PciConfigSpace>>,
}

/// The set of functions reachable through configuration space, keyed by
/// bus:device:function.
pub struct PciConfigBus {
    devices: RwLock<BTreeMap<Bdf, BusEntry>>,
}

impl Default for PciConfigBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PciConfigBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers `dev` at `bdf`. An address can only be registered once.
    pub fn register_identity(
        &self,
        bdf: Bdf,
        name: impl Into<Arc<str>>,
        dev: Arc<Mutex<dyn PciConfigSpace>>,
    ) -> Result<(), PciBusError> {
        let mut devices = self.devices.write();
        Self::insert(&mut devices, bdf, name.into(), dev)
    }

    /// Registers a [`PciDevice`] at the address it asked for, or at the
    /// lowest free device number on bus 0 if it didn't ask.
    ///
    /// Devices whose BAR setup failed are refused.
    pub fn register(&self, mut device: PciDevice) -> Result<Arc<Mutex<PciDevice>>, PciBusError> {
        let name: Arc<str> = device.name().into();
        if let Some(err) = device.setup_error() {
            return Err(PciBusError::Misconfigured {
                name,
                source: err.clone(),
            });
        }

        let mut devices = self.devices.write();
        let bdf = match device.suggested_bdf() {
            Some(bdf) => bdf.into(),
            None => (0..MAX_DEVICES_PER_BUS)
                .map(|device| Bdf::new(0, device, 0))
                .find(|&bdf| {
                    devices
                        .range(bdf..=Bdf::new(bdf.bus, bdf.device, !0))
                        .next()
                        .is_none()
                })
                .ok_or_else(|| PciBusError::NoFreeSlot {
                    name: name.clone(),
                    bus: 0,
                })?,
        };

        device.set_bdf(bdf.bus, bdf.device, bdf.function);
        let device = Arc::new(Mutex::new(device));
        Self::insert(&mut devices, bdf, name, device.clone())?;
        Ok(device)
    }

    fn insert(
        devices: &mut BTreeMap<Bdf, BusEntry>,
        bdf: Bdf,
        name: Arc<str>,
        dev: Arc<Mutex<dyn PciConfigSpace>>,
    ) -> Result<(), PciBusError> {
        if !bdf.is_valid() {
            return Err(PciBusError::InvalidBdf { name, bdf });
        }
        if let Some(existing) = devices.get(&bdf) {
            return Err(PciBusError::Duplicate {
                name,
                bdf,
                existing: existing.name.clone(),
            });
        }
        tracing::info!(%bdf, name = &*name, "registered pci function");
        devices.insert(bdf, BusEntry { name, dev });
        Ok(())
    }

    /// Lists the registered functions in address order.
    pub fn enumerate(&self) -> Vec<(Bdf, Arc<str>)> {
        self.devices
            .read()
            .iter()
            .map(|(bdf, entry)| (*bdf, entry.name.clone()))
            .collect()
    }

    fn device(&self, bdf: Bdf) -> Option<Arc<Mutex<dyn PciConfigSpace>>> {
        self.devices.read().get(&bdf).map(|entry| entry.dev.clone())
    }

    /// Reads configuration space of the function at `bdf`.
    ///
    /// If there is no such function, `data` reads as all-ones.
    pub fn cfg_read(&self, bdf: Bdf, offset: u16, data: &mut [u8]) -> IoResult {
        match self.device(bdf) {
            Some(dev) => dev.lock().pci_cfg_read(offset, data),
            None => {
                data.fill(!0);
                IoResult::Err(IoError::NoResponse)
            }
        }
    }

    /// Writes configuration space of the function at `bdf`.
    pub fn cfg_write(&self, bdf: Bdf, offset: u16, data: &[u8]) -> IoResult {
        match self.device(bdf) {
            Some(dev) => dev.lock().pci_cfg_write(offset, data),
            None => IoResult::Err(IoError::NoResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TestFunction;
    use crate::test_helpers::new_pci_device;
    use pci_core::spec::cfg_space::BarEncodingBits;

    #[test]
    fn test_register_identity() {
        let bus = PciConfigBus::new();
        bus.register_identity(Bdf::new(0, 3, 0), "a", TestFunction::shared(0x1234, 1))
            .unwrap();

        let err = bus
            .register_identity(Bdf::new(0, 3, 0), "b", TestFunction::shared(0x1234, 2))
            .unwrap_err();
        assert!(matches!(&err, PciBusError::Duplicate { existing, .. } if &**existing == "a"));

        assert!(matches!(
            bus.register_identity(Bdf::new(0, 32, 0), "c", TestFunction::shared(0, 0)),
            Err(PciBusError::InvalidBdf { .. })
        ));

        // the original registration is untouched
        let mut data = [0; 4];
        bus.cfg_read(Bdf::new(0, 3, 0), 0, &mut data).unwrap();
        assert_eq!(u32::from_le_bytes(data), 0x0001_1234);
    }

    #[test]
    fn test_register_allocates_device_numbers() {
        let bus = PciConfigBus::new();
        let a = bus.register(new_pci_device("a")).unwrap();
        let b = bus.register(new_pci_device("b").with_bdf(0, 1, 0)).unwrap();
        let c = bus.register(new_pci_device("c")).unwrap();
        let d = bus.register(new_pci_device("d").with_bdf(0, 3, 2)).unwrap();
        let e = bus.register(new_pci_device("e")).unwrap();

        assert_eq!(a.lock().bdf(), Some((0, 0, 0)));
        assert_eq!(b.lock().bdf(), Some((0, 1, 0)));
        assert_eq!(c.lock().bdf(), Some((0, 2, 0)));
        assert_eq!(d.lock().bdf(), Some((0, 3, 2)));
        // device 3 is partially occupied
        assert_eq!(e.lock().bdf(), Some((0, 4, 0)));

        let names: Vec<_> = bus
            .enumerate()
            .into_iter()
            .map(|(bdf, name)| format!("{bdf} {name}"))
            .collect();
        assert_eq!(
            names,
            ["00:00.0 a", "00:01.0 b", "00:02.0 c", "00:03.2 d", "00:04.0 e"]
        );
    }

    #[test]
    fn test_bus_full() {
        let bus = PciConfigBus::new();
        for i in 0..MAX_DEVICES_PER_BUS {
            bus.register(new_pci_device(format!("dev{i}"))).unwrap();
        }
        assert!(matches!(
            bus.register(new_pci_device("extra")),
            Err(PciBusError::NoFreeSlot { bus: 0, .. })
        ));
    }

    #[test]
    fn test_misconfigured_device_is_refused() {
        let bus = PciConfigBus::new();
        let mut dev = new_pci_device("bad");
        let _ = dev.configure_bar(
            0,
            0x3000,
            BarEncodingBits::memory32(false),
            Arc::new(crate::test_helpers::NullHandler),
        );
        assert!(matches!(
            bus.register(dev),
            Err(PciBusError::Misconfigured {
                source: BarError::SizeNotPowerOfTwo { .. },
                ..
            })
        ));
        assert!(bus.enumerate().is_empty());
    }

    #[test]
    fn test_missing_device() {
        let bus = PciConfigBus::new();
        let mut data = [0; 2];
        assert_eq!(
            bus.cfg_read(Bdf::new(0, 5, 0), 0, &mut data),
            IoResult::Err(IoError::NoResponse)
        );
        assert_eq!(data, [0xff; 2]);
        assert_eq!(
            bus.cfg_write(Bdf::new(0, 5, 0), 4, &[1]),
            IoResult::Err(IoError::NoResponse)
        );
    }
}
