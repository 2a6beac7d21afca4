//! Processor directory
//!
//! The platform hands over an ordered table of `(cluster, core)` pairs once at start-up.
//! The position of an entry in that table is its logical handle for the rest of the
//! services' lifetime.

use alloc::vec::Vec;

use crate::{platform::TopologySource, MpError, Result};

/// Hardware coordinate of a processor, taken from the `Aff1`/`Aff0` fields of its MPIDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreCoordinate {
    pub cluster: u8,
    pub core: u8,
}

impl CoreCoordinate {
    pub const fn new(cluster: u8, core: u8) -> Self {
        Self { cluster, core }
    }

    pub const fn from_mpidr(mpidr: u64) -> Self {
        Self {
            cluster: ((mpidr >> 8) & 0xff) as u8,
            core: (mpidr & 0xff) as u8,
        }
    }

    /// MPIDR affinity value as reported in processor information.
    pub const fn mpid(self) -> u64 {
        ((self.cluster as u64) << 8) | self.core as u64
    }

    /// Target argument for PSCI SMC64 calls.
    pub const fn psci_target(self) -> u64 {
        psci_target_cpu64(0, 0, self.cluster, self.core)
    }
}

impl core::fmt::Display for CoreCoordinate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.cluster, self.core)
    }
}

pub const fn psci_target_cpu64(aff3: u8, aff2: u8, aff1: u8, aff0: u8) -> u64 {
    ((aff3 as u64) << 32) | ((aff2 as u64) << 16) | ((aff1 as u64) << 8) | aff0 as u64
}

#[derive(Debug, Clone)]
pub struct ProcessorDirectory {
    entries: Vec<CoreCoordinate>,
}

impl ProcessorDirectory {
    /// Builds the directory from the platform table.
    ///
    /// Fails with [`MpError::NotFound`] when the table is missing or empty and with
    /// [`MpError::InvalidParameter`] when two entries share a coordinate.
    pub fn from_source<T: TopologySource + ?Sized>(source: &T) -> Result<Self> {
        Self::new(source.processor_table()?)
    }

    pub fn new(entries: Vec<CoreCoordinate>) -> Result<Self> {
        if entries.is_empty() {
            return Err(MpError::NotFound);
        }
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].contains(entry) {
                log::error!("processor {} listed twice in the platform table", entry);
                return Err(MpError::InvalidParameter);
            }
        }
        Ok(Self { entries })
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, handle: usize) -> bool {
        handle < self.entries.len()
    }

    pub fn coordinate_of(&self, handle: usize) -> Option<CoreCoordinate> {
        self.entries.get(handle).copied()
    }

    pub fn entries(&self) -> &[CoreCoordinate] {
        &self.entries
    }

    pub fn handle_of(&self, coordinate: CoreCoordinate) -> Option<usize> {
        self.entries.iter().position(|c| *c == coordinate)
    }
}
