//! Multiprocessor bring-up and dispatch for AArch64 firmware
//!
//! The primary processor discovers the secondaries from a platform table, powers them on
//! through PSCI into a parking stub, and dispatches work to them one at a time or all at
//! once. Everything the services need from the environment is a trait in [`platform`];
//! [`psci::Psci`], [`gic::GicV2Sgi`] and the [`arch`] helpers implement the hardware
//! facing parts.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod gic;
pub mod platform;
pub mod psci;
pub mod smp;
pub mod topology;
pub mod util;

pub use config::MpConfig;
pub use error::{MpError, Result};
pub use smp::{
    CpuPhysicalLocation, DispatchRequest, ExecutionMode, MpServices, MultiProcessor, Procedure,
    ProcessorCount, ProcessorInformation, StatusFlag,
};
