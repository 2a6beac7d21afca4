//! Secondary processor bring-up and dispatch
//!
//! Secondary processors are driven through a per-processor mailbox. The dispatch procedure
//! is as follows:
//!
//! 1. On first use, a mailbox page is allocated for the target, the parking stub is
//!    copied into it and patched with the addresses of its own stack and data slots, and
//!    the page is made uncached. See [`stub`] for the stub layout.
//! 2. The work (procedure, argument, completion group) is stored in the target's record,
//!    then the landing function address is posted into the mailbox jump slot.
//! 3. PSCI `CPU_ON` starts the target at the mailbox base. A processor that is already
//!    parked answers `ALREADY_ON`, which is just as good.
//! 4. The primary broadcasts the wake-up SGI. Every parked processor leaves `wfi`, and
//!    the ones with a non-zero jump slot call the landing function.
//! 5. The landing function runs the procedure, clears the jump slot and completes the
//!    group. The last member of a group signals its event, which the primary may be
//!    waiting on.
//!
//! A processor is busy for as long as its jump slot is non-zero.

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::{
    config::MpConfig,
    platform::Platform,
    topology::{CoreCoordinate, ProcessorDirectory},
    util::Spinlock,
    MpError, Result,
};

mod ap_entry;
mod dispatch;
pub mod mailbox;
mod power;
mod service;
pub mod stub;

pub use dispatch::{DispatchRequest, ExecutionMode, Procedure};
pub use service::{
    CpuPhysicalLocation, MultiProcessor, ProcessorCount, ProcessorInformation, StatusFlag,
};

use dispatch::Work;
use mailbox::Mailbox;

/// Runtime state of one processor, addressed by the secondary through the mailbox
/// context slot.
pub(crate) struct ProcessorRecord<P: Platform> {
    handle: usize,
    mailbox: Spinlock<Option<Mailbox>>,
    work: Spinlock<Option<Work<P>>>,
    disabled: AtomicBool,
}

impl<P: Platform> ProcessorRecord<P> {
    fn new(handle: usize) -> Self {
        Self {
            handle,
            mailbox: Spinlock::new(None),
            work: Spinlock::new(None),
            disabled: AtomicBool::new(false),
        }
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }
}

/// Multiprocessor services for the processors listed by the platform.
///
/// The processor that constructs the services is the primary and the only one allowed
/// to dispatch work. Once a mailbox is live it is never freed, so parked processors keep
/// a valid stub to sleep in even after the services are dropped.
pub struct MpServices<P: Platform> {
    platform: Arc<P>,
    directory: ProcessorDirectory,
    records: Box<[ProcessorRecord<P>]>,
    primary: usize,
    config: MpConfig,
}

impl<P: Platform> MpServices<P> {
    pub fn new(platform: Arc<P>, config: MpConfig) -> Result<Self> {
        log::info!(
            "psci mp services for {} built {} ({})",
            env!("BUILD_TARGET"),
            env!("BUILD_DATE"),
            env!("PROFILE")
        );

        let directory = ProcessorDirectory::from_source(&*platform).map_err(|e| {
            log::error!("no usable processor table: {}", e);
            e
        })?;
        let records = (0..directory.count())
            .map(ProcessorRecord::new)
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let mut services = Self {
            platform,
            directory,
            records,
            primary: 0,
            config,
        };
        services.primary = services.current_handle();

        log::info!(
            "{} processors, primary is {} ({})",
            services.directory.count(),
            services.primary,
            services.coordinate(services.primary)
        );
        Ok(services)
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn directory(&self) -> &ProcessorDirectory {
        &self.directory
    }

    pub fn config(&self) -> &MpConfig {
        &self.config
    }

    pub fn primary(&self) -> usize {
        self.primary
    }

    /// Mailbox of `handle`, if one was created.
    pub fn mailbox(&self, handle: usize) -> Option<Mailbox> {
        self.records.get(handle).and_then(|r| *r.mailbox.lock())
    }

    pub fn is_busy(&self, handle: usize) -> bool {
        self.mailbox(handle).map_or(false, |m| m.is_busy())
    }

    fn coordinate(&self, handle: usize) -> CoreCoordinate {
        self.directory.entries()[handle]
    }

    /// Handle of the executing processor.
    ///
    /// Panics when the processor is missing from the directory: the platform table does
    /// not describe the machine.
    fn current_handle(&self) -> usize {
        let mpidr = self.platform.current_mpidr();
        let coordinate = CoreCoordinate::from_mpidr(mpidr);
        match self.directory.handle_of(coordinate) {
            Some(handle) => handle,
            None => panic!(
                "executing processor {} (mpidr 0x{:x}) is not in the processor table",
                coordinate, mpidr
            ),
        }
    }

    fn ensure_primary_caller(&self) -> Result<usize> {
        let caller = self.current_handle();
        if caller != self.primary {
            log::warn!("processor {} is not the primary", caller);
            return Err(MpError::DeviceError);
        }
        Ok(caller)
    }

    /// Value for the mailbox context slot and the `CPU_ON` context argument.
    fn record_context(&self, handle: usize) -> u64 {
        &self.records[handle] as *const ProcessorRecord<P> as u64
    }

    fn ensure_mailbox(&self, handle: usize) -> Result<Mailbox> {
        let mut slot = self.records[handle].mailbox.lock();
        if let Some(mailbox) = *slot {
            return Ok(mailbox);
        }

        let mailbox = Mailbox::create(&*self.platform).map_err(|e| {
            log::error!("mailbox for processor {} failed: {}", handle, e);
            e
        })?;

        #[cfg(feature = "dbg-mailbox")]
        log::debug!(
            "processor {} ({}) parks at 0x{:x}",
            handle,
            self.coordinate(handle),
            mailbox.base()
        );

        *slot = Some(mailbox);
        Ok(mailbox)
    }
}
