use aarch64_cpu::registers::{Readable, MPIDR_EL1};
use core::arch::asm;

use crate::{
    platform::CoreIdentity,
    psci::{Conduit, SmcArgs},
};

/// PSCI through the secure monitor.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmcConduit;

impl Conduit for SmcConduit {
    fn call(&self, args: &mut SmcArgs) {
        unsafe {
            asm!(
                "smc #0",
                inout("x0") args.arg0,
                inout("x1") args.arg1,
                inout("x2") args.arg2,
                inout("x3") args.arg3,
                // SMCCC 1.0 allows the callee to corrupt x4-x17
                out("x4") _, out("x5") _, out("x6") _, out("x7") _,
                out("x8") _, out("x9") _, out("x10") _, out("x11") _,
                out("x12") _, out("x13") _, out("x14") _, out("x15") _,
                out("x16") _, out("x17") _,
                options(nostack),
            );
        }
    }
}

/// PSCI through the hypervisor, for firmware running as a guest.
#[derive(Debug, Default, Clone, Copy)]
pub struct HvcConduit;

impl Conduit for HvcConduit {
    fn call(&self, args: &mut SmcArgs) {
        unsafe {
            asm!(
                "hvc #0",
                inout("x0") args.arg0,
                inout("x1") args.arg1,
                inout("x2") args.arg2,
                inout("x3") args.arg3,
                out("x4") _, out("x5") _, out("x6") _, out("x7") _,
                out("x8") _, out("x9") _, out("x10") _, out("x11") _,
                out("x12") _, out("x13") _, out("x14") _, out("x15") _,
                out("x16") _, out("x17") _,
                options(nostack),
            );
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MpidrRegister;

impl CoreIdentity for MpidrRegister {
    fn current_mpidr(&self) -> u64 {
        MPIDR_EL1.get()
    }
}
