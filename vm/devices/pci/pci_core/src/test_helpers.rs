// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::spec::hwid::ClassCode;
use crate::spec::hwid::HardwareIds;
use crate::spec::hwid::ProgrammingInterface;
use crate::spec::hwid::Subclass;
use chipset_device::io::IoResult;
use chipset_device::io_range::ControlIoRange;
use chipset_device::io_range::IoRangeHandler;
use chipset_device::io_range::RangeError;
use chipset_device::io_range::RegisterIoRange;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

pub fn test_hardware_ids() -> HardwareIds {
    HardwareIds {
        vendor_id: 0x1111,
        device_id: 0x2222,
        revision_id: 1,
        prog_if: ProgrammingInterface::NONE,
        sub_class: Subclass::NETWORK_CONTROLLER_ETHERNET,
        base_class: ClassCode::NETWORK_CONTROLLER,
        type0_sub_vendor_id: 0x3333,
        type0_sub_system_id: 0x4444,
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Map(String, u64),
    Unmap(String, u64),
}

#[derive(Default)]
struct TestBusState {
    mapped: BTreeMap<u64, (u64, String)>,
    blocked: BTreeSet<u64>,
    events: Vec<BusEvent>,
}

/// A bus that records what gets mapped where, and refuses to map anything at
/// a blocked address.
#[derive(Default, Clone)]
pub struct TestBus {
    state: Arc<Mutex<TestBusState>>,
}

impl TestBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, addr: u64) {
        self.state.lock().blocked.insert(addr);
    }

    pub fn mapped(&self) -> Vec<(u64, u64, String)> {
        self.state
            .lock()
            .mapped
            .iter()
            .map(|(base, (len, name))| (*base, *len, name.clone()))
            .collect()
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.state.lock().events.clone()
    }
}

impl RegisterIoRange for TestBus {
    fn new_io_region(
        &self,
        debug_name: &str,
        len: u64,
        _handler: Arc<dyn IoRangeHandler>,
    ) -> Box<dyn ControlIoRange> {
        Box::new(TestRegion {
            state: self.state.clone(),
            name: debug_name.to_owned(),
            len,
            mapping: None,
        })
    }
}

pub struct TestRegion {
    state: Arc<Mutex<TestBusState>>,
    name: String,
    len: u64,
    mapping: Option<u64>,
}

impl ControlIoRange for TestRegion {
    fn map(&mut self, addr: u64) -> Result<(), RangeError> {
        let mut state = self.state.lock();
        if let Some(old) = self.mapping.take() {
            state.mapped.remove(&old);
            state.events.push(BusEvent::Unmap(self.name.clone(), old));
        }
        if state.blocked.contains(&addr) {
            return Err(RangeError::Overlap {
                name: self.name.as_str().into(),
                start: addr,
                end: addr + self.len - 1,
                existing: "blocker".into(),
            });
        }
        state.mapped.insert(addr, (self.len, self.name.clone()));
        state.events.push(BusEvent::Map(self.name.clone(), addr));
        self.mapping = Some(addr);
        Ok(())
    }

    fn unmap(&mut self) {
        if let Some(old) = self.mapping.take() {
            let mut state = self.state.lock();
            state.mapped.remove(&old);
            state.events.push(BusEvent::Unmap(self.name.clone(), old));
        }
    }

    fn addr(&self) -> Option<u64> {
        self.mapping
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
