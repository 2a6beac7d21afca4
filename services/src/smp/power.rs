use core::sync::atomic::Ordering;

use super::MpServices;
use crate::{platform::Platform, psci::AffinityState, MpError, Result};

impl<P: Platform> MpServices<P> {
    /// `ON_PENDING` is reported as on.
    pub(crate) fn is_on(&self, handle: usize) -> bool {
        self.platform.affinity_info(self.coordinate(handle)).is_on()
    }

    /// Processors that are on and not soft-disabled.
    ///
    /// Panics when the primary does not report as on.
    pub(crate) fn count_enabled(&self) -> usize {
        assert!(
            self.is_on(self.primary),
            "primary processor {} reports as off",
            self.coordinate(self.primary)
        );

        (0..self.directory.count())
            .filter(|&handle| !self.records[handle].is_disabled() && self.is_on(handle))
            .count()
    }

    /// Polls `AFFINITY_INFO` until the processor is on. A processor still pending after
    /// the configured number of polls, or reported off, is not enabled.
    pub(crate) fn wait_until_enabled(&self, handle: usize) -> bool {
        let coordinate = self.coordinate(handle);
        let mut attempts = 0;

        loop {
            match self.platform.affinity_info(coordinate) {
                AffinityState::On => return true,
                AffinityState::OnPending if attempts < self.config.enable_poll_attempts => {
                    attempts += 1;
                    self.platform.stall(self.config.enable_poll_interval_us);
                }
                AffinityState::OnPending => {
                    log::warn!(
                        "processor {} ({}) still pending after {} polls",
                        handle,
                        coordinate,
                        attempts
                    );
                    return false;
                }
                AffinityState::Off | AffinityState::Other(_) => {
                    #[cfg(feature = "dbg-dispatch")]
                    log::trace!("processor {} ({}) is not on", handle, coordinate);
                    return false;
                }
            }
        }
    }

    /// Starts `handle` in its parking stub, creating the mailbox first if needed.
    pub(crate) fn power_on(&self, handle: usize) -> Result<()> {
        let mailbox = self.ensure_mailbox(handle)?;
        let coordinate = self.coordinate(handle);

        let ret = self.platform.cpu_on(
            coordinate,
            mailbox.entry_point(),
            self.record_context(handle),
        );
        if !ret.is_started() {
            log::warn!(
                "CPU_ON for processor {} ({}) returned {:?}",
                handle,
                coordinate,
                ret
            );
            return Err(MpError::Unsupported);
        }
        Ok(())
    }

    pub(crate) fn set_enabled(&self, handle: usize, enable: bool, health: Option<u32>) -> Result<()> {
        if handle >= self.directory.count() {
            return Err(MpError::NotFound);
        }
        let caller = self.ensure_primary_caller()?;
        if handle == caller {
            return Err(MpError::InvalidParameter);
        }
        if let Some(health) = health {
            log::info!("processor {} health flag 0x{:x} ignored", handle, health);
        }

        let record = &self.records[handle];
        if enable {
            record.disabled.store(false, Ordering::Release);
            self.power_on(handle)?;
            log::debug!("processor {} ({}) enabled", handle, self.coordinate(handle));
        } else {
            if self.is_busy(handle) {
                return Err(MpError::NotReady);
            }
            record.disabled.store(true, Ordering::Release);
            log::debug!("processor {} ({}) disabled", handle, self.coordinate(handle));
        }
        Ok(())
    }
}
