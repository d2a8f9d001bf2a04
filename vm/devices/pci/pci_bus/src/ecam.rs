// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Memory-mapped (ECAM) configuration space access.

use crate::Bdf;
use crate::PciBusError;
use crate::PciConfigBus;
use chipset_device::io::IoError;
use chipset_device::io::IoResult;
use chipset_device::io_range::IoRangeHandler;
use pci_core::spec::cfg_space::CONFIG_SPACE_SIZE;
use pci_core::spec::cfg_space::EXTENDED_CONFIG_SPACE_SIZE;
use std::sync::Arc;

const MAX_FUNCTIONS_PER_BUS: u64 = 256;
const BUS_SHIFT: u32 = 20;
const DEVICE_SHIFT: u32 = 15;
const FUNCTION_SHIFT: u32 = 12;

/// An ECAM window over buses `start_bus..=end_bus`.
///
/// Each function gets a 4KiB page at
/// `(bus - start_bus) << 20 | device << 15 | function << 12`. Only the first
/// 256 bytes of each page are backed; the rest reads as all-ones.
pub struct EcamWindow {
    start_bus: u8,
    end_bus: u8,
    pci_bus: Arc<PciConfigBus>,
}

macro_rules! validate_ecam_access {
    ($offset:ident, $data:ident) => {
        if !matches!($data.len(), 1 | 2 | 4) {
            return IoResult::Err(IoError::InvalidAccessSize);
        }

        if $offset % $data.len() as u64 != 0 {
            return IoResult::Err(IoError::UnalignedAccess);
        }
    };
}

impl EcamWindow {
    /// Creates a window in front of `pci_bus`.
    pub fn new(
        pci_bus: Arc<PciConfigBus>,
        start_bus: u8,
        end_bus: u8,
    ) -> Result<Self, PciBusError> {
        if end_bus < start_bus {
            return Err(PciBusError::InvalidBusRange { start_bus, end_bus });
        }
        Ok(Self {
            start_bus,
            end_bus,
            pci_bus,
        })
    }

    /// Size of the window in bytes.
    pub fn size(&self) -> u64 {
        let bus_count = u64::from(self.end_bus - self.start_bus) + 1;
        bus_count * MAX_FUNCTIONS_PER_BUS * EXTENDED_CONFIG_SPACE_SIZE as u64
    }

    /// Splits a window offset into the function it selects and the offset
    /// within that function's configuration space.
    pub fn decode(&self, offset: u64) -> Option<(Bdf, u16)> {
        if offset >= self.size() {
            return None;
        }
        let bus = self.start_bus + (offset >> BUS_SHIFT) as u8;
        let device = ((offset >> DEVICE_SHIFT) & 0x1f) as u8;
        let function = ((offset >> FUNCTION_SHIFT) & 0x7) as u8;
        let cfg_offset = (offset & (EXTENDED_CONFIG_SPACE_SIZE as u64 - 1)) as u16;
        Some((Bdf::new(bus, device, function), cfg_offset))
    }
}

impl IoRangeHandler for EcamWindow {
    fn io_read(&self, offset: u64, data: &mut [u8]) -> IoResult {
        data.fill(!0);
        validate_ecam_access!(offset, data);

        let Some((bdf, cfg_offset)) = self.decode(offset) else {
            return IoResult::Err(IoError::InvalidRegister);
        };
        if usize::from(cfg_offset) >= CONFIG_SPACE_SIZE {
            tracing::trace!(%bdf, cfg_offset, "extended config space read");
            return IoResult::Ok;
        }
        if let IoResult::Err(err) = self.pci_bus.cfg_read(bdf, cfg_offset, data) {
            tracing::trace!(%bdf, cfg_offset, ?err, "ecam read not claimed");
            data.fill(!0);
        }
        IoResult::Ok
    }

    fn io_write(&self, offset: u64, data: &[u8]) -> IoResult {
        validate_ecam_access!(offset, data);

        let Some((bdf, cfg_offset)) = self.decode(offset) else {
            return IoResult::Err(IoError::InvalidRegister);
        };
        if usize::from(cfg_offset) >= CONFIG_SPACE_SIZE {
            tracing::trace!(%bdf, cfg_offset, "extended config space write");
            return IoResult::Ok;
        }
        if let IoResult::Err(err) = self.pci_bus.cfg_write(bdf, cfg_offset, data) {
            tracing::trace!(%bdf, cfg_offset, ?err, "ecam write dropped");
        }
        IoResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TestFunction;

    fn ecam_offset(bus: u8, device: u8, function: u8, offset: u16) -> u64 {
        (u64::from(bus) << BUS_SHIFT)
            | (u64::from(device) << DEVICE_SHIFT)
            | (u64::from(function) << FUNCTION_SHIFT)
            | u64::from(offset)
    }

    #[test]
    fn test_decode() {
        let ecam = EcamWindow::new(Arc::new(PciConfigBus::new()), 2, 3)
            .unwrap();
        assert_eq!(ecam.size(), 2 << 20);
        assert_eq!(
            ecam.decode(ecam_offset(1, 31, 7, 0xffc)),
            Some((Bdf::new(3, 31, 7), 0xffc))
        );
        assert_eq!(ecam.decode(ecam_offset(0, 1, 0, 0x10)), Some((Bdf::new(2, 1, 0), 0x10)));
        assert_eq!(ecam.decode(2 << 20), None);

        assert!(matches!(
            EcamWindow::new(Arc::new(PciConfigBus::new()), 3, 2),
            Err(PciBusError::InvalidBusRange { .. })
        ));
    }

    #[test]
    fn test_full_bus_range() {
        let ecam = EcamWindow::new(Arc::new(PciConfigBus::new()), 0, 255)
            .unwrap();
        assert_eq!(ecam.size(), 256 << 20);
        assert_eq!(
            ecam.decode(ecam_offset(255, 0, 0, 0)),
            Some((Bdf::new(255, 0, 0), 0))
        );
    }

    #[test]
    fn test_accesses() {
        let bus = Arc::new(PciConfigBus::new());
        let dev = TestFunction::shared(0x1af4, 0x1041);
        bus.register_identity(Bdf::new(0, 2, 0), "dev", dev.clone())
            .unwrap();
        let ecam = EcamWindow::new(bus, 0, 0).unwrap();

        let mut data = [0; 4];
        ecam.io_read(ecam_offset(0, 2, 0, 0), &mut data).unwrap();
        assert_eq!(u32::from_le_bytes(data), 0x1041_1af4);

        let mut word = [0; 2];
        ecam.io_read(ecam_offset(0, 2, 0, 2), &mut word).unwrap();
        assert_eq!(u16::from_le_bytes(word), 0x1041);

        ecam.io_write(ecam_offset(0, 2, 0, 0x44), &[1, 2, 3, 4])
            .unwrap();
        assert_eq!(dev.lock().regs[0x44..0x48], [1, 2, 3, 4]);

        // no function there
        ecam.io_read(ecam_offset(0, 3, 0, 0), &mut data).unwrap();
        assert_eq!(data, [0xff; 4]);

        // beyond the conventional 256 bytes
        ecam.io_read(ecam_offset(0, 2, 0, 0x100), &mut data)
            .unwrap();
        assert_eq!(data, [0xff; 4]);
        ecam.io_write(ecam_offset(0, 2, 0, 0x100), &[9]).unwrap();
    }

    #[test]
    fn test_bad_accesses() {
        let ecam = EcamWindow::new(Arc::new(PciConfigBus::new()), 0, 0)
            .unwrap();
        let mut data = [0; 4];
        assert_eq!(
            ecam.io_read(2, &mut data),
            IoResult::Err(IoError::UnalignedAccess)
        );
        assert_eq!(data, [0xff; 4]);
        let mut three = [0; 3];
        assert_eq!(
            ecam.io_read(0, &mut three),
            IoResult::Err(IoError::InvalidAccessSize)
        );
        assert_eq!(
            ecam.io_write(1, &[0, 0]),
            IoResult::Err(IoError::UnalignedAccess)
        );
        assert_eq!(
            ecam.io_write(1 << 20, &[0]),
            IoResult::Err(IoError::InvalidRegister)
        );
    }
}
