// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A type 0 PCI function: configuration space plus BARs, bound to the port IO
//! and MMIO buses its regions are placed on.

use crate::PciInterruptPin;
use crate::bar::BarError;
use crate::bar::BarManager;
use crate::bar::BarWrite;
use crate::cfg_space::ConfigSpace;
use crate::spec::cfg_space::BarEncodingBits;
use crate::spec::cfg_space::Status;
use crate::spec::cfg_space::bar_index;
use crate::spec::hwid::HardwareIds;
use chipset_device::io::IoError;
use chipset_device::io::IoResult;
use chipset_device::io_range::IoRangeHandler;
use chipset_device::io_range::RegisterIoRange;
use chipset_device::pci::PciConfigSpace;
use std::sync::Arc;
use zerocopy::IntoBytes;
use zerocopy::byteorder::little_endian::U32;

/// An emulated PCI function.
///
/// Device emulators build one of these with their hardware IDs, describe
/// their BARs with [`configure_bar`](Self::configure_bar), and hand it to the
/// configuration-space bus. From then on the guest drives it through
/// [`PciConfigSpace`].
pub struct PciDevice {
    name: Arc<str>,
    bdf: Option<(u8, u8, u8)>,
    cfg: ConfigSpace,
    bars: BarManager,
    io_bus: Arc<dyn RegisterIoRange>,
    mmio_bus: Arc<dyn RegisterIoRange>,
    setup_error: Option<BarError>,
}

impl std::fmt::Debug for PciDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PciDevice")
            .field("name", &self.name)
            .field("bdf", &self.bdf)
            .field("bars", &self.bars)
            .field("setup_error", &self.setup_error)
            .finish_non_exhaustive()
    }
}

impl PciDevice {
    /// Creates a function with the given hardware IDs whose BARs will be
    /// placed on `io_bus` and `mmio_bus`.
    pub fn new(
        name: impl Into<Arc<str>>,
        hardware_ids: HardwareIds,
        io_bus: Arc<dyn RegisterIoRange>,
        mmio_bus: Arc<dyn RegisterIoRange>,
    ) -> Self {
        Self {
            name: name.into(),
            bdf: None,
            cfg: ConfigSpace::new(&hardware_ids),
            bars: BarManager::new(),
            io_bus,
            mmio_bus,
            setup_error: None,
        }
    }

    /// Requests a fixed bus:device:function address.
    pub fn with_bdf(mut self, bus: u8, device: u8, function: u8) -> Self {
        self.bdf = Some((bus, device, function));
        self
    }

    /// Advertises an INTx pin.
    pub fn with_interrupt_pin(mut self, pin: PciInterruptPin) -> Self {
        self.cfg.set_interrupt_pin(Some(pin));
        self
    }

    /// Marks the device as having more than one function, so that guests
    /// scan functions 1-7 of its slot.
    pub fn with_multi_function(mut self) -> Self {
        self.cfg.set_multi_function(true);
        self
    }

    /// The device's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bus:device:function address, once known.
    pub fn bdf(&self) -> Option<(u8, u8, u8)> {
        self.bdf
    }

    /// Records the address the device was registered at.
    pub fn set_bdf(&mut self, bus: u8, device: u8, function: u8) {
        self.bdf = Some((bus, device, function));
    }

    /// Describes BAR `index`: a region of `len` bytes with the decode type in
    /// `layout`, whose accesses are routed to `handler` once the BAR is
    /// assigned an address.
    ///
    /// A failure here is a setup bug. It is returned, and also remembered so
    /// that the device refuses to be registered.
    pub fn configure_bar(
        &mut self,
        index: u8,
        len: u64,
        layout: BarEncodingBits,
        handler: Arc<dyn IoRangeHandler>,
    ) -> Result<(), BarError> {
        let bus = if layout.use_pio() {
            &self.io_bus
        } else {
            &self.mmio_bus
        };
        let control = bus.new_io_region(&format!("{}:bar{}", self.name, index), len, handler);
        let result = self
            .bars
            .configure(&mut self.cfg, index, len, layout, control);
        if let Err(err) = &result {
            tracing::error!(
                device = &*self.name,
                error = err as &dyn std::error::Error,
                "invalid bar configuration"
            );
            self.setup_error.get_or_insert_with(|| err.clone());
        }
        result
    }

    /// The first setup error, if any.
    pub fn setup_error(&self) -> Option<&BarError> {
        self.setup_error.as_ref()
    }

    /// Raises bits in the status register on behalf of the device.
    pub fn set_status(&mut self, bits: Status) {
        self.cfg.set_status_bits(bits);
    }

    /// Assigns BAR `index` an address from the host side and activates it.
    pub fn set_bar_address(&mut self, index: u8, address: u64) -> Result<(), BarError> {
        self.bars.set_address(&mut self.cfg, index, address)
    }

    /// Returns the base and length of BAR `index` if it is currently mapped.
    pub fn bar_mapping(&self, index: u8) -> Option<(u64, u64)> {
        self.bars.mapping(index)
    }

    /// The configuration space.
    pub fn config_space(&self) -> &ConfigSpace {
        &self.cfg
    }

    /// Mutable access to the configuration space, for device-specific
    /// registers.
    pub fn config_space_mut(&mut self) -> &mut ConfigSpace {
        &mut self.cfg
    }

    /// Returns the function to its power-on state, unmapping every BAR.
    pub fn reset(&mut self) {
        self.cfg.reset();
        self.bars.reset(&mut self.cfg);
    }

    fn write_bar(&mut self, index: u8, start: usize, data: &[u8]) {
        let mut value = U32::new(self.cfg.bar_register(index));
        value.as_mut_bytes()[start..start + data.len()].copy_from_slice(data);
        match self.bars.write(&mut self.cfg, index, value.get()) {
            Ok(BarWrite::Assigned { base }) => {
                tracing::debug!(device = &*self.name, index, base, "bar assigned");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    device = &*self.name,
                    error = &err as &dyn std::error::Error,
                    "bar write failed"
                );
            }
        }
    }
}

fn check_access(offset: u16, len: usize) -> Result<(), IoError> {
    if !matches!(len, 1 | 2 | 4) {
        return Err(IoError::InvalidAccessSize);
    }
    if !ConfigSpace::in_bounds(offset, len) {
        return Err(IoError::InvalidRegister);
    }
    Ok(())
}

impl PciConfigSpace for PciDevice {
    fn pci_cfg_read(&mut self, offset: u16, data: &mut [u8]) -> IoResult {
        if let Err(err) = check_access(offset, data.len()) {
            tracing::debug!(
                device = &*self.name,
                offset,
                len = data.len(),
                ?err,
                "bad config space read"
            );
            data.fill(!0);
            return IoResult::Err(err);
        }
        self.cfg.read_bytes(offset, data);
        IoResult::Ok
    }

    fn pci_cfg_write(&mut self, offset: u16, data: &[u8]) -> IoResult {
        if let Err(err) = check_access(offset, data.len()) {
            tracing::debug!(
                device = &*self.name,
                offset,
                len = data.len(),
                ?err,
                "bad config space write"
            );
            return IoResult::Err(err);
        }

        // Split the access at dword boundaries so BAR registers always see a
        // full register value.
        let mut offset = offset;
        let mut data = data;
        while !data.is_empty() {
            let start = (offset & 3) as usize;
            let (chunk, rest) = data.split_at(data.len().min(4 - start));
            match bar_index(offset & !3) {
                Some(index) => self.write_bar(index, start, chunk),
                None => self.cfg.write_bytes(offset, chunk),
            }
            offset += chunk.len() as u16;
            data = rest;
        }
        IoResult::Ok
    }

    fn suggested_bdf(&mut self) -> Option<(u8, u8, u8)> {
        self.bdf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::cfg_space::HeaderType00;
    use crate::spec::cfg_space::offsets;
    use crate::test_helpers::NullHandler;
    use crate::test_helpers::TestBus;
    use crate::test_helpers::init_tracing;
    use crate::test_helpers::test_hardware_ids;

    struct Fixture {
        io: TestBus,
        mmio: TestBus,
        dev: PciDevice,
    }

    fn create() -> Fixture {
        init_tracing();
        let io = TestBus::new();
        let mmio = TestBus::new();
        let dev = PciDevice::new(
            "nic",
            test_hardware_ids(),
            Arc::new(io.clone()),
            Arc::new(mmio.clone()),
        );
        Fixture { io, mmio, dev }
    }

    fn read32(dev: &mut PciDevice, offset: u16) -> u32 {
        let mut value = U32::new(0);
        dev.pci_cfg_read(offset, value.as_mut_bytes()).unwrap();
        value.get()
    }

    fn write32(dev: &mut PciDevice, offset: u16, value: u32) {
        dev.pci_cfg_write(offset, U32::new(value).as_bytes())
            .unwrap();
    }

    #[test]
    fn test_identity_reads() {
        let mut f = create();
        assert_eq!(read32(&mut f.dev, 0), 0x2222_1111);
        let mut byte = [0];
        f.dev
            .pci_cfg_read(offsets::DEVICE_ID + 1, &mut byte)
            .unwrap();
        assert_eq!(byte, [0x22]);
    }

    #[test]
    fn test_bad_accesses() {
        let mut f = create();
        let mut data = [0u8; 4];
        assert_eq!(
            f.dev.pci_cfg_read(0xfe, &mut data),
            IoResult::Err(IoError::InvalidRegister)
        );
        assert_eq!(data, [0xff; 4]);

        let mut three = [0u8; 3];
        assert_eq!(
            f.dev.pci_cfg_read(0, &mut three),
            IoResult::Err(IoError::InvalidAccessSize)
        );
        assert_eq!(three, [0xff; 3]);

        assert_eq!(
            f.dev.pci_cfg_write(0x100, &[0xff]),
            IoResult::Err(IoError::InvalidRegister)
        );
    }

    #[test]
    fn test_bar_through_config_writes() {
        let mut f = create();
        f.dev
            .configure_bar(0, 0x1000, BarEncodingBits::memory32(false), Arc::new(NullHandler))
            .unwrap();
        f.dev
            .configure_bar(1, 0x40, BarEncodingBits::io(), Arc::new(NullHandler))
            .unwrap();

        write32(&mut f.dev, HeaderType00::BAR0.0, 0xffff_ffff);
        assert_eq!(read32(&mut f.dev, HeaderType00::BAR0.0), 0xffff_f000);
        write32(&mut f.dev, HeaderType00::BAR0.0, 0x4000_0000);
        assert_eq!(f.dev.bar_mapping(0), Some((0x4000_0000, 0x1000)));
        assert_eq!(
            f.mmio.mapped(),
            vec![(0x4000_0000, 0x1000, "nic:bar0".to_owned())]
        );

        write32(&mut f.dev, HeaderType00::BAR1.0, 0xffff_ffff);
        assert_eq!(read32(&mut f.dev, HeaderType00::BAR1.0), 0xffff_ffc1);
        write32(&mut f.dev, HeaderType00::BAR1.0, 0xd000);
        assert_eq!(f.io.mapped(), vec![(0xd000, 0x40, "nic:bar1".to_owned())]);
    }

    #[test]
    fn test_partial_bar_write() {
        let mut f = create();
        f.dev
            .configure_bar(0, 0x1000, BarEncodingBits::memory32(false), Arc::new(NullHandler))
            .unwrap();
        f.dev.set_bar_address(0, 0x4000_0000).unwrap();

        // rewrite only the top byte of the address
        f.dev
            .pci_cfg_write(HeaderType00::BAR0.0 + 3, &[0x50])
            .unwrap();
        assert_eq!(read32(&mut f.dev, HeaderType00::BAR0.0), 0x5000_0000);
        assert_eq!(f.dev.bar_mapping(0), Some((0x5000_0000, 0x1000)));
    }

    #[test]
    fn test_misconfigured_device() {
        let mut f = create();
        assert!(
            f.dev
                .configure_bar(0, 0x1234, BarEncodingBits::memory32(false), Arc::new(NullHandler))
                .is_err()
        );
        assert!(matches!(
            f.dev.setup_error(),
            Some(BarError::SizeNotPowerOfTwo { .. })
        ));
    }

    #[test]
    fn test_status() {
        let mut f = create();
        f.dev.set_status(
            Status::new()
                .with_interrupt_status(true)
                .with_abort_master_received(true),
        );
        let status = (read32(&mut f.dev, HeaderType00::STATUS_COMMAND.0) >> 16) as u16;
        assert_eq!(status, 0x2008);

        f.dev
            .pci_cfg_write(offsets::STATUS, &0x2000u16.to_le_bytes())
            .unwrap();
        let status = (read32(&mut f.dev, HeaderType00::STATUS_COMMAND.0) >> 16) as u16;
        assert_eq!(status, 0x0008);
    }

    #[test]
    fn test_reset() {
        let mut f = create().dev.with_interrupt_pin(PciInterruptPin::IntB);
        f.configure_bar(0, 0x1000, BarEncodingBits::memory32(false), Arc::new(NullHandler))
            .unwrap();
        f.set_bar_address(0, 0x4000_0000).unwrap();
        write32(&mut f, HeaderType00::STATUS_COMMAND.0, 0x2);

        f.reset();
        assert_eq!(f.bar_mapping(0), None);
        assert_eq!(read32(&mut f, HeaderType00::BAR0.0), 0);
        assert_eq!(read32(&mut f, HeaderType00::STATUS_COMMAND.0), 0);
        assert_eq!(f.config_space().read_u8(offsets::INTERRUPT_PIN), Some(2));
    }

    #[test]
    fn test_multi_function_header() {
        let mut f = create();
        let header = read32(&mut f.dev, HeaderType00::BIST_HEADER.0);
        assert_eq!((header >> 16) as u8, 0);

        let mut dev = f.dev.with_multi_function();
        let header = read32(&mut dev, HeaderType00::BIST_HEADER.0);
        assert_eq!((header >> 16) as u8, 0x80);

        // read-only to the guest, and survives reset
        dev.pci_cfg_write(offsets::HEADER_TYPE, &[0]).unwrap();
        dev.reset();
        assert_eq!(dev.config_space().read_u8(offsets::HEADER_TYPE), Some(0x80));
    }

    #[test]
    fn test_suggested_bdf() {
        let mut f = create();
        assert_eq!(f.dev.suggested_bdf(), None);
        let mut dev = f.dev.with_bdf(0, 3, 1);
        assert_eq!(dev.suggested_bdf(), Some((0, 3, 1)));
    }
}
