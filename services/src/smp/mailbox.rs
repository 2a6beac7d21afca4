use core::{
    slice,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use super::stub::{
    CONTEXT_OFFSET, JUMP_ADDRESS_OFFSET, MAILBOX_SIZE, PARKING_STUB, PROCESSOR_ID_OFFSET,
};
use crate::{
    platform::{MemoryAttributes, PageAllocator, PAGE_SIZE},
    Result,
};

/// Parking region of one secondary processor.
///
/// The region starts with the parking stub, which is also the `CPU_ON` entry point. The
/// data slots at `0x800` are shared with the processor parked in the stub: the primary
/// only writes a jump address into an idle mailbox, and the parked processor only clears
/// it after the dispatched work returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mailbox {
    base: usize,
}

impl Mailbox {
    pub const PAGES: usize = MAILBOX_SIZE / PAGE_SIZE;

    /// Allocates a region, installs the parking stub and makes it uncached.
    pub fn create<A: PageAllocator + ?Sized>(allocator: &A) -> Result<Self> {
        let base = allocator.allocate_pages(Self::PAGES)?;

        // SAFETY: the allocator handed out `PAGES` fresh pages at `base`
        let region = unsafe { slice::from_raw_parts_mut(base as *mut u8, MAILBOX_SIZE) };
        PARKING_STUB.install(base, region);

        if let Err(e) =
            allocator.set_memory_attributes(base, MAILBOX_SIZE, MemoryAttributes::UC)
        {
            log::error!(
                "failed to make mailbox at 0x{:x} uncached: {}, releasing it",
                base,
                e
            );
            // SAFETY: nothing has seen `base` yet
            unsafe { allocator.free_pages(base, Self::PAGES) };
            return Err(e);
        }

        #[cfg(feature = "dbg-mailbox")]
        log::trace!(
            "mailbox at 0x{:x}: stub 0x{:x} bytes, stack top 0x{:x}",
            base,
            PARKING_STUB.code().len(),
            base + super::stub::STACK_TOP_OFFSET
        );

        Ok(Self { base })
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// Address handed to `CPU_ON`.
    pub fn entry_point(&self) -> usize {
        self.base
    }

    fn slot64(&self, offset: usize) -> &AtomicU64 {
        // SAFETY: the mailbox is live for the services' lifetime and the slot is 8-byte
        // aligned inside it
        unsafe { AtomicU64::from_ptr((self.base + offset) as *mut u64) }
    }

    fn slot32(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: see `slot64`
        unsafe { AtomicU32::from_ptr((self.base + offset) as *mut u32) }
    }

    pub fn processor_id(&self) -> u32 {
        self.slot32(PROCESSOR_ID_OFFSET).load(Ordering::Acquire)
    }

    pub fn jump_address(&self) -> u64 {
        self.slot64(JUMP_ADDRESS_OFFSET).load(Ordering::Acquire)
    }

    pub fn context(&self) -> u64 {
        self.slot64(CONTEXT_OFFSET).load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.jump_address() != 0
    }

    /// Hands a jump target to the parked processor. The jump address is written last.
    pub fn post(&self, processor_id: u32, jump: usize, context: u64) {
        debug_assert!(jump != 0);

        self.slot32(PROCESSOR_ID_OFFSET)
            .store(processor_id, Ordering::Relaxed);
        self.slot64(CONTEXT_OFFSET).store(context, Ordering::Relaxed);
        self.slot64(JUMP_ADDRESS_OFFSET)
            .store(jump as u64, Ordering::Release);

        #[cfg(feature = "dbg-mailbox")]
        log::trace!(
            "mailbox 0x{:x}: posted jump 0x{:x} for processor {}",
            self.base,
            jump,
            processor_id
        );
    }

    pub fn clear_jump(&self) {
        self.slot64(JUMP_ADDRESS_OFFSET).store(0, Ordering::Release);
    }
}
