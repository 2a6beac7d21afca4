//! Public multiprocessor service interface

use alloc::vec::Vec;
use bitflags::bitflags;

use super::{DispatchRequest, MpServices};
use crate::{platform::Platform, MpError, Result};

bitflags! {
    /// Role and state bits of a processor.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlag: u32 {
        const PROCESSOR_AS_BSP_BIT = 1;
        const PROCESSOR_ENABLED_BIT = 1 << 1;
        const PROCESSOR_HEALTH_STATUS_BIT = 1 << 2;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorCount {
    /// All processors, the primary included.
    pub total: usize,
    /// Processors that are on and not soft-disabled, the primary included.
    pub enabled: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CpuPhysicalLocation {
    /// Cluster of the processor.
    pub package: u32,
    pub core: u32,
    pub thread: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorInformation {
    /// MPIDR affinity value, `(cluster << 8) | core`.
    pub processor_id: u64,
    pub status_flag: StatusFlag,
    pub location: CpuPhysicalLocation,
}

impl ProcessorInformation {
    pub const fn is_bsp(&self) -> bool {
        self.status_flag.contains(StatusFlag::PROCESSOR_AS_BSP_BIT)
    }

    pub const fn is_enabled(&self) -> bool {
        self.status_flag.contains(StatusFlag::PROCESSOR_ENABLED_BIT)
    }

    pub const fn is_healthy(&self) -> bool {
        self.status_flag
            .contains(StatusFlag::PROCESSOR_HEALTH_STATUS_BIT)
    }
}

/// Services for discovering processors and running work on the secondary ones.
///
/// Handles are positions in the platform processor table. Everything except
/// [`who_am_i`](MultiProcessor::who_am_i) is meant to be called from the primary.
pub trait MultiProcessor {
    fn processor_count(&self) -> ProcessorCount;

    /// Fails with [`MpError::InvalidParameter`] for a handle past the table.
    fn processor_info(&self, handle: usize) -> Result<ProcessorInformation>;

    /// Runs the request on every enabled secondary.
    ///
    /// If any of them is busy nothing is started and [`MpError::NotReady`] is returned.
    /// After a timeout, `failed` lists the processors that did not finish.
    fn startup_all_aps(
        &self,
        request: &DispatchRequest,
        failed: Option<&mut Vec<usize>>,
    ) -> Result<()>;

    /// Runs the request on one secondary. `finished` is set once a blocking request
    /// returned from the target.
    ///
    /// A non-blocking request writes `false` to `finished` before returning and never
    /// updates it afterwards. Wait on the request's event instead.
    fn startup_this_ap(
        &self,
        handle: usize,
        request: &DispatchRequest,
        finished: Option<&mut bool>,
    ) -> Result<()>;

    /// Always [`MpError::Unsupported`].
    fn switch_bsp(&self, handle: usize, enable_old_bsp: bool) -> Result<()>;

    /// Enabling powers the processor on into its parking stub. Disabling keeps it
    /// powered but excludes it from dispatch and from the enabled count.
    fn enable_disable_ap(&self, handle: usize, enable: bool, health: Option<u32>) -> Result<()>;

    /// Handle of the executing processor. Callable from any processor.
    fn who_am_i(&self) -> usize;
}

impl<P: Platform> MultiProcessor for MpServices<P> {
    fn processor_count(&self) -> ProcessorCount {
        ProcessorCount {
            total: self.directory.count(),
            enabled: self.count_enabled(),
        }
    }

    fn processor_info(&self, handle: usize) -> Result<ProcessorInformation> {
        let Some(coordinate) = self.directory.coordinate_of(handle) else {
            return Err(MpError::InvalidParameter);
        };

        let mut status_flag = StatusFlag::PROCESSOR_HEALTH_STATUS_BIT;
        if handle == self.current_handle() {
            status_flag |= StatusFlag::PROCESSOR_AS_BSP_BIT;
        }
        if !self.records[handle].is_disabled() && self.is_on(handle) {
            status_flag |= StatusFlag::PROCESSOR_ENABLED_BIT;
        }

        Ok(ProcessorInformation {
            processor_id: coordinate.mpid(),
            status_flag,
            location: CpuPhysicalLocation {
                package: coordinate.cluster as u32,
                core: coordinate.core as u32,
                thread: 0,
            },
        })
    }

    fn startup_all_aps(
        &self,
        request: &DispatchRequest,
        failed: Option<&mut Vec<usize>>,
    ) -> Result<()> {
        self.startup_all(request, failed)
    }

    fn startup_this_ap(
        &self,
        handle: usize,
        request: &DispatchRequest,
        finished: Option<&mut bool>,
    ) -> Result<()> {
        self.startup_one(handle, request, finished)
    }

    fn switch_bsp(&self, handle: usize, enable_old_bsp: bool) -> Result<()> {
        log::warn!(
            "switching the primary to {} (keep old: {}) is not supported",
            handle,
            enable_old_bsp
        );
        Err(MpError::Unsupported)
    }

    fn enable_disable_ap(&self, handle: usize, enable: bool, health: Option<u32>) -> Result<()> {
        self.set_enabled(handle, enable, health)
    }

    fn who_am_i(&self) -> usize {
        self.current_handle()
    }
}
