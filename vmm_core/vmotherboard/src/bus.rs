// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A port IO or MMIO address space that routes accesses to registered
//! ranges.

use chipset_device::io::IoError;
use chipset_device::io::IoResult;
use chipset_device::io_range::ControlIoRange;
use chipset_device::io_range::IoRangeHandler;
use chipset_device::io_range::RangeError;
use chipset_device::io_range::RegisterIoRange;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

struct BusRange {
    /// Inclusive.
    end: u64,
    name: Arc<str>,
    handler: Arc<dyn IoRangeHandler>,
}

type RangeMap = BTreeMap<u64, BusRange>;

/// An address space with non-overlapping ranges, each bound to a handler.
///
/// Cloning yields another handle to the same address space.
#[derive(Clone)]
pub struct AddressBus {
    name: Arc<str>,
    ranges: Arc<RwLock<RangeMap>>,
}

impl std::fmt::Debug for AddressBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressBus")
            .field("name", &self.name)
            .field("ranges", &self.ranges.read().len())
            .finish()
    }
}

fn insert_range(
    ranges: &mut RangeMap,
    name: &Arc<str>,
    base: u64,
    len: u64,
    handler: Arc<dyn IoRangeHandler>,
) -> Result<(), RangeError> {
    let end = len
        .checked_sub(1)
        .and_then(|last| base.checked_add(last))
        .ok_or_else(|| RangeError::Invalid {
            name: name.clone(),
            base,
            len,
        })?;

    if let Some((_, existing)) = ranges.range(..=end).next_back() {
        if existing.end >= base {
            return Err(RangeError::Overlap {
                name: name.clone(),
                start: base,
                end,
                existing: existing.name.clone(),
            });
        }
    }

    ranges.insert(
        base,
        BusRange {
            end,
            name: name.clone(),
            handler,
        },
    );
    Ok(())
}

impl AddressBus {
    /// Creates an empty address space.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            ranges: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// The bus name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `len` bytes at `base`, routed to `handler`.
    pub fn register_range(
        &self,
        name: &str,
        base: u64,
        len: u64,
        handler: Arc<dyn IoRangeHandler>,
    ) -> Result<(), RangeError> {
        insert_range(&mut self.ranges.write(), &name.into(), base, len, handler)?;
        tracing::debug!(bus = &*self.name, name, base, len, "registered range");
        Ok(())
    }

    /// Removes the range starting at `base`. Returns `false` if there was
    /// none.
    pub fn unregister_range(&self, base: u64) -> bool {
        let removed = self.ranges.write().remove(&base);
        if let Some(range) = &removed {
            tracing::debug!(bus = &*self.name, name = &*range.name, base, "unregistered range");
        }
        removed.is_some()
    }

    /// Moves a range from `old` (if any) to `base` under a single lock
    /// acquisition, so no lookup sees both ranges or neither. On failure the
    /// old range stays removed.
    fn remap(
        &self,
        name: &Arc<str>,
        old: Option<u64>,
        base: u64,
        len: u64,
        handler: &Arc<dyn IoRangeHandler>,
    ) -> Result<(), RangeError> {
        let mut ranges = self.ranges.write();
        if let Some(old) = old {
            ranges.remove(&old);
        }
        let result = insert_range(&mut ranges, name, base, len, handler.clone());
        drop(ranges);

        match &result {
            Ok(()) => tracing::debug!(
                bus = &*self.name,
                name = &**name,
                ?old,
                base,
                len,
                "mapped range"
            ),
            Err(err) => tracing::warn!(
                bus = &*self.name,
                name = &**name,
                ?old,
                error = err as &dyn std::error::Error,
                "failed to map range"
            ),
        }
        result
    }

    /// Lists the registered ranges as `(base, len, name)`, in address order.
    pub fn ranges(&self) -> Vec<(u64, u64, Arc<str>)> {
        self.ranges
            .read()
            .iter()
            .map(|(&base, range)| (base, range.end - base + 1, range.name.clone()))
            .collect()
    }

    /// Finds the handler for an access of `len` bytes at `addr`. The handler
    /// is cloned out so it runs without the bus lock held, which lets it
    /// remap ranges on this same bus.
    fn lookup(&self, addr: u64, len: usize) -> Option<(u64, Arc<dyn IoRangeHandler>)> {
        let last = addr.checked_add((len as u64).checked_sub(1)?)?;
        let ranges = self.ranges.read();
        let (&base, range) = ranges.range(..=addr).next_back()?;
        (last <= range.end).then(|| (addr - base, range.handler.clone()))
    }

    /// Reads `data.len()` bytes at `addr`. Unclaimed reads return all-ones.
    pub fn read(&self, addr: u64, data: &mut [u8]) -> IoResult {
        match self.lookup(addr, data.len()) {
            Some((offset, handler)) => handler.io_read(offset, data),
            None => {
                tracing::debug!(bus = &*self.name, addr, len = data.len(), "unclaimed read");
                data.fill(!0);
                IoResult::Err(IoError::NoResponse)
            }
        }
    }

    /// Writes `data` at `addr`. Unclaimed writes are dropped.
    pub fn write(&self, addr: u64, data: &[u8]) -> IoResult {
        match self.lookup(addr, data.len()) {
            Some((offset, handler)) => handler.io_write(offset, data),
            None => {
                tracing::debug!(bus = &*self.name, addr, len = data.len(), "unclaimed write");
                IoResult::Err(IoError::NoResponse)
            }
        }
    }
}

struct BusRegion {
    bus: AddressBus,
    name: Arc<str>,
    len: u64,
    handler: Arc<dyn IoRangeHandler>,
    addr: Option<u64>,
}

impl ControlIoRange for BusRegion {
    fn map(&mut self, addr: u64) -> Result<(), RangeError> {
        let old = self.addr.take();
        self.bus
            .remap(&self.name, old, addr, self.len, &self.handler)?;
        self.addr = Some(addr);
        Ok(())
    }

    fn unmap(&mut self) {
        if let Some(addr) = self.addr.take() {
            self.bus.unregister_range(addr);
        }
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

impl Drop for BusRegion {
    fn drop(&mut self) {
        self.unmap();
    }
}

impl RegisterIoRange for AddressBus {
    fn new_io_region(
        &self,
        debug_name: &str,
        len: u64,
        handler: Arc<dyn IoRangeHandler>,
    ) -> Box<dyn ControlIoRange> {
        Box::new(BusRegion {
            bus: self.clone(),
            name: debug_name.into(),
            len,
            handler,
            addr: None,
        })
    }
}
