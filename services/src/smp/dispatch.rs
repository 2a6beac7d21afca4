//! Dispatch of caller work to parked secondary processors

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use super::{ap_entry::secondary_entry, mailbox::Mailbox, MpServices};
use crate::{
    platform::{EventHandle, EventService, Platform},
    MpError, Result,
};

/// Work run on a secondary processor.
pub type Procedure = extern "C" fn(argument: usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One processor at a time, by ascending handle.
    Sequential,
    Concurrent,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest {
    pub procedure: Procedure,
    pub argument: usize,
    pub mode: ExecutionMode,
    /// Event signalled when the work is done. Without one the call blocks.
    pub wait_event: Option<EventHandle>,
    /// Bound on a blocking call, `0` waits forever.
    ///
    /// Ignored when `wait_event` is set: a non-blocking dispatch has no deadline and its
    /// event is signalled only once the work is done.
    pub timeout_us: u64,
}

impl DispatchRequest {
    pub fn new(procedure: Procedure, argument: usize) -> Self {
        Self {
            procedure,
            argument,
            mode: ExecutionMode::Concurrent,
            wait_event: None,
            timeout_us: 0,
        }
    }

    pub fn sequential(mut self) -> Self {
        self.mode = ExecutionMode::Sequential;
        self
    }

    pub fn with_wait_event(mut self, event: EventHandle) -> Self {
        self.wait_event = Some(event);
        self
    }

    pub fn with_timeout_us(mut self, timeout_us: u64) -> Self {
        self.timeout_us = timeout_us;
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.wait_event.is_none()
    }
}

/// Counts outstanding work of one dispatch and signals its event when the last member
/// completes.
///
/// An event the group owns is held twice: once by the members as a whole and once by the
/// primary. Whichever lets go last closes it, so a primary that gave up waiting leaves the
/// close to the last late member.
pub(crate) struct CompletionGroup<E: EventService> {
    remaining: AtomicUsize,
    holds: AtomicUsize,
    owns_event: bool,
    event: EventHandle,
    events: Arc<E>,
}

impl<E: EventService> CompletionGroup<E> {
    fn new(events: Arc<E>, event: EventHandle, members: usize, owns_event: bool) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(members),
            holds: AtomicUsize::new(if members == 0 { 1 } else { 2 }),
            owns_event,
            event,
            events,
        })
    }

    pub(crate) fn complete(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.events.signal_event(self.event);
            self.release();
        }
    }

    /// Drops a member that will never run, without signalling.
    fn withdraw(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.release();
        }
    }

    /// Gives up one hold on the event, closing it when it was the last.
    ///
    /// The primary calls this once, when it no longer waits on the event.
    fn release(&self) {
        if self.owns_event && self.holds.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.events.close_event(self.event);
        }
    }

    #[cfg(test)]
    fn is_settled(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }
}

pub(crate) struct Work<P: Platform> {
    pub(crate) procedure: Procedure,
    pub(crate) argument: usize,
    pub(crate) mailbox: Mailbox,
    pub(crate) completion: Arc<CompletionGroup<P>>,
}

#[derive(Debug, Clone, Copy)]
struct Deadline(u64);

impl Deadline {
    fn has_passed(self, now: u64) -> bool {
        now >= self.0
    }
}

impl<P: Platform> MpServices<P> {
    fn deadline(&self, request: &DispatchRequest) -> Option<Deadline> {
        (request.is_blocking() && request.timeout_us != 0).then(|| {
            Deadline(
                self.platform
                    .now_micros()
                    .saturating_add(request.timeout_us),
            )
        })
    }

    /// Stores the work and posts the landing function, then powers the target on.
    ///
    /// On failure the member is withdrawn from `completion` unless the target already
    /// picked the work up.
    fn arm(
        &self,
        handle: usize,
        request: &DispatchRequest,
        completion: &Arc<CompletionGroup<P>>,
    ) -> Result<()> {
        let mailbox = match self.ensure_mailbox(handle) {
            Ok(mailbox) => mailbox,
            Err(e) => {
                completion.withdraw();
                return Err(e);
            }
        };

        *self.records[handle].work.lock() = Some(Work {
            procedure: request.procedure,
            argument: request.argument,
            mailbox,
            completion: completion.clone(),
        });

        let context = self.record_context(handle);
        mailbox.post(handle as u32, secondary_entry::<P> as usize, context);

        let coordinate = self.coordinate(handle);
        let ret = self
            .platform
            .cpu_on(coordinate, mailbox.entry_point(), context);
        if !ret.is_started() {
            log::warn!(
                "CPU_ON for processor {} ({}) returned {:?}",
                handle,
                coordinate,
                ret
            );
            if self.disarm(handle) {
                completion.withdraw();
            }
            return Err(MpError::Unsupported);
        }

        #[cfg(feature = "dbg-dispatch")]
        log::trace!("processor {} ({}) armed", handle, coordinate);
        Ok(())
    }

    /// Takes back work the target has not started. Returns `false` when it already did.
    fn disarm(&self, handle: usize) -> bool {
        let mut work = self.records[handle].work.lock();
        match work.take() {
            Some(work) => {
                work.mailbox.clear_jump();
                true
            }
            None => false,
        }
    }

    fn wait_for_completion(&self, event: EventHandle, deadline: Option<Deadline>) -> Result<()> {
        let Some(deadline) = deadline else {
            self.platform.wait_event(&[event]);
            return Ok(());
        };

        loop {
            if self.platform.check_event(event) {
                return Ok(());
            }
            if deadline.has_passed(self.platform.now_micros()) {
                return Err(MpError::Timeout);
            }
            self.platform.stall(self.config.completion_poll_interval_us);
        }
    }

    /// Enabled, idle secondaries in ascending order. Fails without side effects when one
    /// of them is busy.
    fn collect_targets(&self) -> Result<Vec<usize>> {
        let mut targets = Vec::new();
        for handle in 0..self.directory.count() {
            if handle == self.primary || self.records[handle].is_disabled() {
                continue;
            }
            if !self.wait_until_enabled(handle) {
                continue;
            }
            if self.is_busy(handle) {
                log::warn!("processor {} is still busy", handle);
                return Err(MpError::NotReady);
            }
            targets.push(handle);
        }
        Ok(targets)
    }

    pub(crate) fn startup_all(
        &self,
        request: &DispatchRequest,
        mut failed: Option<&mut Vec<usize>>,
    ) -> Result<()> {
        self.ensure_primary_caller()?;
        if let Some(failed) = failed.as_deref_mut() {
            failed.clear();
        }

        let targets = self.collect_targets()?;
        if targets.is_empty() {
            return Err(MpError::NotStarted);
        }

        #[cfg(feature = "dbg-dispatch")]
        log::debug!("dispatching {:?} to processors {:?}", request.mode, targets);

        let deadline = self.deadline(request);
        let unfinished = match request.mode {
            ExecutionMode::Sequential => self.run_sequential(&targets, request, deadline)?,
            ExecutionMode::Concurrent => self.run_concurrent(&targets, request, deadline)?,
        };

        if unfinished.is_empty() {
            return Ok(());
        }
        log::warn!("processors {:?} did not finish in time", unfinished);
        if let Some(failed) = failed {
            failed.extend_from_slice(&unfinished);
        }
        Err(MpError::Timeout)
    }

    /// Returns the handles that did not finish before the deadline.
    fn run_sequential(
        &self,
        targets: &[usize],
        request: &DispatchRequest,
        deadline: Option<Deadline>,
    ) -> Result<Vec<usize>> {
        let event = self.platform.create_event()?;

        // The event is reused across targets. Only the group of the last target, or of
        // the one that failed or timed out, gets released; earlier ones keep their
        // primary hold and never close it.
        for (i, &handle) in targets.iter().enumerate() {
            let group = CompletionGroup::new(self.platform.clone(), event, 1, true);
            if let Err(e) = self.arm(handle, request, &group) {
                group.release();
                return Err(e);
            }
            self.platform.broadcast_to_others();

            if self.wait_for_completion(event, deadline).is_err() {
                // `handle` closes the event once it is done
                group.release();
                return Ok(targets[i..].to_vec());
            }
            if i + 1 == targets.len() {
                group.release();
            }
        }

        if let Some(wait_event) = request.wait_event {
            self.platform.signal_event(wait_event);
        }
        Ok(Vec::new())
    }

    fn run_concurrent(
        &self,
        targets: &[usize],
        request: &DispatchRequest,
        deadline: Option<Deadline>,
    ) -> Result<Vec<usize>> {
        let (event, internal) = match request.wait_event {
            Some(event) => (event, false),
            None => (self.platform.create_event()?, true),
        };
        let group = CompletionGroup::new(self.platform.clone(), event, targets.len(), internal);

        for (i, &handle) in targets.iter().enumerate() {
            if let Err(e) = self.arm(handle, request, &group) {
                for _ in &targets[i + 1..] {
                    group.withdraw();
                }
                for &armed in &targets[..i] {
                    if self.disarm(armed) {
                        group.withdraw();
                    }
                }
                group.release();
                return Err(e);
            }
        }

        self.platform.broadcast_to_others();
        if !internal {
            return Ok(Vec::new());
        }

        match self.wait_for_completion(event, deadline) {
            Ok(()) => {
                group.release();
                Ok(Vec::new())
            }
            Err(_) => {
                let unfinished: Vec<usize> = targets
                    .iter()
                    .copied()
                    .filter(|&handle| self.is_busy(handle))
                    .collect();
                // the last late member closes the event
                group.release();
                Ok(unfinished)
            }
        }
    }

    pub(crate) fn startup_one(
        &self,
        handle: usize,
        request: &DispatchRequest,
        finished: Option<&mut bool>,
    ) -> Result<()> {
        if handle >= self.directory.count() {
            return Err(MpError::NotFound);
        }
        let caller = self.ensure_primary_caller()?;
        if handle == caller || self.records[handle].is_disabled() {
            return Err(MpError::InvalidParameter);
        }
        if !self.wait_until_enabled(handle) {
            return Err(MpError::NotStarted);
        }
        if self.is_busy(handle) {
            return Err(MpError::NotReady);
        }

        let (event, internal) = match request.wait_event {
            Some(event) => (event, false),
            None => (self.platform.create_event()?, true),
        };
        let group = CompletionGroup::new(self.platform.clone(), event, 1, internal);
        if let Err(e) = self.arm(handle, request, &group) {
            group.release();
            return Err(e);
        }
        self.platform.broadcast_to_others();

        let done = if internal {
            let waited = self.wait_for_completion(event, self.deadline(request));
            if waited.is_err() {
                log::warn!("processor {} did not finish in time", handle);
            }
            group.release();
            waited.map(|()| true)
        } else {
            Ok(false)
        };

        if let Some(finished) = finished {
            *finished = matches!(done, Ok(true));
        }
        done.map(|_| ())
    }
}
