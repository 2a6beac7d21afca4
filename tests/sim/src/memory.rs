use std::{
    alloc::{alloc, dealloc, Layout},
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use psci_mp_services::{
    platform::{MemoryAttributes, PAGE_SIZE},
    MpError, Result,
};

struct Region {
    pages: usize,
    attributes: MemoryAttributes,
}

/// Page pool backed by the host allocator. Fresh pages are filled with `0xA5`.
#[derive(Default)]
pub(crate) struct MemoryPool {
    regions: Mutex<HashMap<usize, Region>>,
    allocations: AtomicUsize,
    fail_allocation: AtomicBool,
    fail_attributes: AtomicBool,
}

fn layout(pages: usize) -> Layout {
    Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap()
}

impl MemoryPool {
    pub(crate) fn allocate(&self, pages: usize) -> Result<usize> {
        if pages == 0 || self.fail_allocation.load(Ordering::Relaxed) {
            return Err(MpError::OutOfResources);
        }
        let base = unsafe { alloc(layout(pages)) };
        if base.is_null() {
            return Err(MpError::OutOfResources);
        }
        unsafe { base.write_bytes(0xA5, pages * PAGE_SIZE) };

        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.regions.lock().unwrap().insert(
            base as usize,
            Region {
                pages,
                attributes: MemoryAttributes::WB,
            },
        );
        Ok(base as usize)
    }

    pub(crate) fn free(&self, base: usize, pages: usize) {
        let region = self.regions.lock().unwrap().remove(&base);
        match region {
            Some(region) => {
                assert_eq!(region.pages, pages, "freeing 0x{:x} with the wrong size", base);
                unsafe { dealloc(base as *mut u8, layout(pages)) };
            }
            None => panic!("freeing unknown region 0x{:x}", base),
        }
    }

    pub(crate) fn set_attributes(
        &self,
        base: usize,
        length: usize,
        attributes: MemoryAttributes,
    ) -> Result<()> {
        if self.fail_attributes.load(Ordering::Relaxed) {
            return Err(MpError::Unsupported);
        }
        let mut regions = self.regions.lock().unwrap();
        match regions.get_mut(&base) {
            Some(region) if length <= region.pages * PAGE_SIZE => {
                region.attributes = attributes;
                Ok(())
            }
            _ => Err(MpError::InvalidParameter),
        }
    }

    pub(crate) fn attributes_of(&self, base: usize) -> Option<MemoryAttributes> {
        self.regions
            .lock()
            .unwrap()
            .get(&base)
            .map(|r| r.attributes)
    }

    pub(crate) fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    pub(crate) fn live_regions(&self) -> usize {
        self.regions.lock().unwrap().len()
    }

    pub(crate) fn set_fail_allocation(&self, fail: bool) {
        self.fail_allocation.store(fail, Ordering::Relaxed);
    }

    pub(crate) fn set_fail_attributes(&self, fail: bool) {
        self.fail_attributes.store(fail, Ordering::Relaxed);
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        let regions = self.regions.get_mut().unwrap();
        for (base, region) in regions.drain() {
            unsafe { dealloc(base as *mut u8, layout(region.pages)) };
        }
    }
}
