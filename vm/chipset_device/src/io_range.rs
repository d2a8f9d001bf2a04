// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Address-range registration on a port IO or MMIO bus.
//!
//! A device asks a bus for a region of a fixed length, bound to a handler,
//! and receives a [`ControlIoRange`] that it uses to move the region around
//! the bus's address space (or take it off the bus entirely).

use crate::io::IoResult;
use std::sync::Arc;
use thiserror::Error;

/// Handler invoked for guest accesses that land inside a registered range.
///
/// `offset` is relative to the base of the range the access hit.
pub trait IoRangeHandler: Send + Sync {
    /// Handle a read of `data.len()` bytes at `offset`.
    fn io_read(&self, offset: u64, data: &mut [u8]) -> IoResult;
    /// Handle a write of `data` at `offset`.
    fn io_write(&self, offset: u64, data: &[u8]) -> IoResult;
}

/// Error returned when a range cannot be placed on a bus.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RangeError {
    /// The requested range overlaps a range that is already registered.
    #[error("{name} at {start:#x}..={end:#x} overlaps {existing}")]
    Overlap {
        /// Name of the range being registered.
        name: Arc<str>,
        /// First address of the requested range.
        start: u64,
        /// Last address of the requested range.
        end: u64,
        /// Name of the range already occupying part of the address space.
        existing: Arc<str>,
    },
    /// The range is empty or wraps past the end of the address space.
    #[error("{name} at {base:#x} with length {len:#x} is not a valid range")]
    Invalid {
        /// Name of the range being registered.
        name: Arc<str>,
        /// Requested base address.
        base: u64,
        /// Requested length.
        len: u64,
    },
}

/// A bus that devices can register address ranges on.
pub trait RegisterIoRange: Send + Sync {
    /// Creates a new, initially unmapped, region of `len` bytes whose accesses
    /// are routed to `handler`.
    fn new_io_region(
        &self,
        debug_name: &str,
        len: u64,
        handler: Arc<dyn IoRangeHandler>,
    ) -> Box<dyn ControlIoRange>;
}

/// Controls the placement of a single region on a bus.
pub trait ControlIoRange: Send + Sync {
    /// Places the region at `addr`.
    ///
    /// If the region is already mapped, the old range is removed and the new
    /// one inserted as a single step with respect to concurrent lookups. On
    /// failure the region is left unmapped.
    fn map(&mut self, addr: u64) -> Result<(), RangeError>;

    /// Removes the region from the bus. Does nothing if it is not mapped.
    fn unmap(&mut self);

    /// Returns the currently mapped base address, if any.
    fn addr(&self) -> Option<u64>;

    /// Returns the length of the region.
    fn len(&self) -> u64;

    /// Returns the region's name.
    fn region_name(&self) -> &str;

    /// Returns the offset of `addr` from the region's base address.
    ///
    /// Returns `None` if `addr` is outside the region, or the region is
    /// currently unmapped.
    fn offset_of(&self, addr: u64) -> Option<u64> {
        let base = self.addr()?;
        let offset = addr.checked_sub(base)?;
        (offset < self.len()).then_some(offset)
    }
}
