// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use chipset_device::io::IoError;
use chipset_device::io::IoResult;
use chipset_device::io_range::ControlIoRange;
use chipset_device::io_range::IoRangeHandler;
use chipset_device::io_range::RangeError;
use chipset_device::io_range::RegisterIoRange;
use chipset_device::pci::PciConfigSpace;
use parking_lot::Mutex;
use pci_core::device::PciDevice;
use pci_core::spec::hwid::ClassCode;
use pci_core::spec::hwid::HardwareIds;
use pci_core::spec::hwid::ProgrammingInterface;
use pci_core::spec::hwid::Subclass;
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// A bare 256-byte configuration space with no register semantics.
pub struct TestFunction {
    pub regs: [u8; 256],
}

impl TestFunction {
    pub fn shared(vendor_id: u16, device_id: u16) -> Arc<Mutex<TestFunction>> {
        let mut regs = [0; 256];
        regs[0..2].copy_from_slice(&vendor_id.to_le_bytes());
        regs[2..4].copy_from_slice(&device_id.to_le_bytes());
        Arc::new(Mutex::new(TestFunction { regs }))
    }
}

impl PciConfigSpace for TestFunction {
    fn pci_cfg_read(&mut self, offset: u16, data: &mut [u8]) -> IoResult {
        let start = offset as usize;
        match self.regs.get(start..start + data.len()) {
            Some(regs) => {
                data.copy_from_slice(regs);
                IoResult::Ok
            }
            None => {
                data.fill(!0);
                IoResult::Err(IoError::InvalidRegister)
            }
        }
    }

    fn pci_cfg_write(&mut self, offset: u16, data: &[u8]) -> IoResult {
        let start = offset as usize;
        match self.regs.get_mut(start..start + data.len()) {
            Some(regs) => {
                regs.copy_from_slice(data);
                IoResult::Ok
            }
            None => IoResult::Err(IoError::InvalidRegister),
        }
    }
}

/// A bus that accepts every mapping.
pub struct NullBus;

impl RegisterIoRange for NullBus {
    fn new_io_region(
        &self,
        debug_name: &str,
        len: u64,
        _handler: Arc<dyn IoRangeHandler>,
    ) -> Box<dyn ControlIoRange> {
        Box::new(NullRegion {
            name: debug_name.to_owned(),
            len,
            addr: None,
        })
    }
}

struct NullRegion {
    name: String,
    len: u64,
    addr: Option<u64>,
}

impl ControlIoRange for NullRegion {
    fn map(&mut self, addr: u64) -> Result<(), RangeError> {
        self.addr = Some(addr);
        Ok(())
    }

    fn unmap(&mut self) {
        self.addr = None;
    }

    fn addr(&self) -> Option<u64> {
        self.addr
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn region_name(&self) -> &str {
        &self.name
    }
}

pub struct NullHandler;

impl IoRangeHandler for NullHandler {
    fn io_read(&self, _offset: u64, data: &mut [u8]) -> IoResult {
        data.fill(0);
        IoResult::Ok
    }

    fn io_write(&self, _offset: u64, _data: &[u8]) -> IoResult {
        IoResult::Ok
    }
}

pub fn new_pci_device(name: impl Into<Arc<str>>) -> PciDevice {
    PciDevice::new(
        name,
        HardwareIds {
            vendor_id: 0x1af4,
            device_id: 0x1000,
            revision_id: 0,
            prog_if: ProgrammingInterface::NONE,
            sub_class: Subclass::NETWORK_CONTROLLER_ETHERNET,
            base_class: ClassCode::NETWORK_CONTROLLER,
            type0_sub_vendor_id: 0x1af4,
            type0_sub_system_id: 1,
        },
        Arc::new(NullBus),
        Arc::new(NullBus),
    )
}
