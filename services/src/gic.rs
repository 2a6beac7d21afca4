//! Wake-up interrupt through a GICv2 distributor

use core::ptr;

use crate::{platform::WakeBroadcast, MpError, Result};

const GICD_SGIR: usize = 0xF00;

const SGIR_TARGET_LIST_FILTER_SHIFT: u32 = 24;
const SGIR_CPU_TARGET_LIST_SHIFT: u32 = 16;
const SGIR_INTID_MASK: u32 = 0xF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SgiTargetFilter {
    TargetList = 0,
    AllButSelf = 1,
    SelfOnly = 2,
}

#[derive(Debug)]
pub struct GicV2Sgi {
    distributor_base: usize,
    sgi_id: u8,
}

impl GicV2Sgi {
    /// # Safety
    ///
    /// `distributor_base` must be the mapped base of a GICv2 distributor that stays
    /// mapped while this value is in use.
    pub unsafe fn new(distributor_base: usize, sgi_id: u8) -> Result<Self> {
        if sgi_id as u32 > SGIR_INTID_MASK {
            return Err(MpError::InvalidParameter);
        }
        Ok(Self {
            distributor_base,
            sgi_id,
        })
    }

    pub const fn sgir_value(filter: SgiTargetFilter, target_list: u8, sgi_id: u8) -> u32 {
        ((filter as u32) << SGIR_TARGET_LIST_FILTER_SHIFT)
            | ((target_list as u32) << SGIR_CPU_TARGET_LIST_SHIFT)
            | (sgi_id as u32 & SGIR_INTID_MASK)
    }

    pub fn send(&self, filter: SgiTargetFilter, target_list: u8) {
        let value = Self::sgir_value(filter, target_list, self.sgi_id);
        unsafe {
            ptr::write_volatile((self.distributor_base + GICD_SGIR) as *mut u32, value);
        }
    }
}

impl WakeBroadcast for GicV2Sgi {
    fn broadcast_to_others(&self) {
        // the target list is ignored with this filter
        self.send(SgiTargetFilter::AllButSelf, 0);
    }
}
