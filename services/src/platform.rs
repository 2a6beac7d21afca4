//! Services consumed from the platform
//!
//! [`MpServices`](crate::MpServices) is generic over a [`Platform`], which is any type
//! implementing every collaborator trait below. Methods marked as secondary-safe are also
//! called from secondary processors while they finish dispatched work.

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::{
    psci::{AffinityState, PsciReturn},
    topology::CoreCoordinate,
    Result,
};

pub const PAGE_SIZE: usize = 0x1000;

/// Source of the ordered processor table.
pub trait TopologySource {
    /// Returns [`MpError::NotFound`](crate::MpError::NotFound) when the platform did not
    /// publish a table.
    fn processor_table(&self) -> Result<Vec<CoreCoordinate>>;
}

/// Identity of the executing processor. Secondary-safe.
pub trait CoreIdentity {
    fn current_mpidr(&self) -> u64;
}

pub trait PowerCoordinator {
    fn affinity_info(&self, target: CoreCoordinate) -> AffinityState;
    fn cpu_on(&self, target: CoreCoordinate, entry_point: usize, context: u64) -> PsciReturn;
}

/// Wake-up interrupt delivered to every processor except the caller.
pub trait WakeBroadcast {
    fn broadcast_to_others(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle(pub usize);

/// Completion events of the host environment.
///
/// A successful [`wait_event`](EventService::wait_event) or
/// [`check_event`](EventService::check_event) consumes the signal.
pub trait EventService {
    fn create_event(&self) -> Result<EventHandle>;
    /// Secondary-safe.
    fn signal_event(&self, event: EventHandle);
    /// Blocks until one of `events` is signalled and returns its index.
    fn wait_event(&self, events: &[EventHandle]) -> usize;
    fn check_event(&self, event: EventHandle) -> bool;
    fn close_event(&self, event: EventHandle);
}

bitflags! {
    /// Memory attributes as understood by the host's memory attribute service.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryAttributes: u64 {
        /// Uncached, strongly ordered.
        const UC = 0x1;
        const WC = 0x2;
        const WT = 0x4;
        const WB = 0x8;
        const XP = 0x4000;
        const RO = 0x20000;
    }
}

pub trait PageAllocator {
    /// Returns the base address of `pages` contiguous, page-aligned pages.
    fn allocate_pages(&self, pages: usize) -> Result<usize>;

    /// # Safety
    ///
    /// `base` and `pages` must describe an allocation returned by
    /// [`allocate_pages`](PageAllocator::allocate_pages) that nothing references anymore.
    unsafe fn free_pages(&self, base: usize, pages: usize);

    /// Changes the attributes of a range. Implementations clean the range from the data
    /// cache before making it uncached.
    fn set_memory_attributes(
        &self,
        base: usize,
        length: usize,
        attributes: MemoryAttributes,
    ) -> Result<()>;
}

pub trait Timer {
    fn stall(&self, micros: u64);
    /// Monotonic time in microseconds.
    fn now_micros(&self) -> u64;
}

pub trait Platform:
    TopologySource
    + CoreIdentity
    + PowerCoordinator
    + WakeBroadcast
    + EventService
    + PageAllocator
    + Timer
    + Send
    + Sync
{
}

impl<T> Platform for T where
    T: TopologySource
        + CoreIdentity
        + PowerCoordinator
        + WakeBroadcast
        + EventService
        + PageAllocator
        + Timer
        + Send
        + Sync
{
}
