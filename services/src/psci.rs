//! PSCI calls used for processor bring-up
//!
//! Only the two functions the services need are encoded here: `AFFINITY_INFO` to query a
//! processor and `CPU_ON` to start one at the parking stub. The register call itself is
//! delegated to a [`Conduit`].

use crate::{platform::PowerCoordinator, topology::CoreCoordinate};

pub const PSCI_CPU_ON_AARCH64: u32 = 0xC400_0003;
pub const PSCI_AFFINITY_INFO_AARCH64: u32 = 0xC400_0004;

pub const PSCI_AFFINITY_LEVEL_0: u64 = 0;

pub const PSCI_AFFINITY_INFO_ON: i64 = 0;
pub const PSCI_AFFINITY_INFO_OFF: i64 = 1;
pub const PSCI_AFFINITY_INFO_ON_PENDING: i64 = 2;

pub const PSCI_RET_SUCCESS: i64 = 0;
pub const PSCI_RET_NOT_SUPPORTED: i64 = -1;
pub const PSCI_RET_INVALID_PARAMETERS: i64 = -2;
pub const PSCI_RET_DENIED: i64 = -3;
pub const PSCI_RET_ALREADY_ON: i64 = -4;
pub const PSCI_RET_ON_PENDING: i64 = -5;
pub const PSCI_RET_INTERNAL_FAILURE: i64 = -6;
pub const PSCI_RET_NOT_PRESENT: i64 = -7;
pub const PSCI_RET_DISABLED: i64 = -8;
pub const PSCI_RET_INVALID_ADDRESS: i64 = -9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffinityState {
    On,
    Off,
    OnPending,
    Other(i64),
}

impl AffinityState {
    pub fn from_raw(raw: u64) -> Self {
        match raw as i64 {
            PSCI_AFFINITY_INFO_ON => Self::On,
            PSCI_AFFINITY_INFO_OFF => Self::Off,
            PSCI_AFFINITY_INFO_ON_PENDING => Self::OnPending,
            other => Self::Other(other),
        }
    }

    /// A processor transitioning to the running state counts as on.
    pub fn is_on(self) -> bool {
        matches!(self, Self::On | Self::OnPending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsciReturn {
    Success,
    NotSupported,
    InvalidParameters,
    Denied,
    AlreadyOn,
    OnPending,
    InternalFailure,
    NotPresent,
    Disabled,
    InvalidAddress,
    Unknown(i64),
}

impl PsciReturn {
    pub fn from_raw(raw: u64) -> Self {
        match raw as i64 {
            PSCI_RET_SUCCESS => Self::Success,
            PSCI_RET_NOT_SUPPORTED => Self::NotSupported,
            PSCI_RET_INVALID_PARAMETERS => Self::InvalidParameters,
            PSCI_RET_DENIED => Self::Denied,
            PSCI_RET_ALREADY_ON => Self::AlreadyOn,
            PSCI_RET_ON_PENDING => Self::OnPending,
            PSCI_RET_INTERNAL_FAILURE => Self::InternalFailure,
            PSCI_RET_NOT_PRESENT => Self::NotPresent,
            PSCI_RET_DISABLED => Self::Disabled,
            PSCI_RET_INVALID_ADDRESS => Self::InvalidAddress,
            other => Self::Unknown(other),
        }
    }

    /// `CPU_ON` outcomes after which the target is parked in the stub.
    pub fn is_started(self) -> bool {
        matches!(self, Self::Success | Self::AlreadyOn)
    }
}

/// Register block of an SMC/HVC call: function id and arguments in, result in `arg0`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SmcArgs {
    pub arg0: u64,
    pub arg1: u64,
    pub arg2: u64,
    pub arg3: u64,
}

/// Issues a synchronous firmware call.
pub trait Conduit {
    fn call(&self, args: &mut SmcArgs);
}

impl<C: Conduit + ?Sized> Conduit for &C {
    fn call(&self, args: &mut SmcArgs) {
        (**self).call(args)
    }
}

/// PSCI client over a conduit.
#[derive(Debug, Clone, Copy)]
pub struct Psci<C> {
    conduit: C,
}

impl<C: Conduit> Psci<C> {
    pub const fn new(conduit: C) -> Self {
        Self { conduit }
    }

    pub fn conduit(&self) -> &C {
        &self.conduit
    }

    pub fn affinity_info(&self, target: CoreCoordinate) -> AffinityState {
        let mut args = SmcArgs {
            arg0: PSCI_AFFINITY_INFO_AARCH64 as u64,
            arg1: target.psci_target(),
            arg2: PSCI_AFFINITY_LEVEL_0,
            arg3: 0,
        };
        self.conduit.call(&mut args);
        AffinityState::from_raw(args.arg0)
    }

    pub fn cpu_on(&self, target: CoreCoordinate, entry_point: usize, context: u64) -> PsciReturn {
        let mut args = SmcArgs {
            arg0: PSCI_CPU_ON_AARCH64 as u64,
            arg1: target.psci_target(),
            arg2: entry_point as u64,
            arg3: context,
        };
        self.conduit.call(&mut args);
        PsciReturn::from_raw(args.arg0)
    }
}

impl<C: Conduit> PowerCoordinator for Psci<C> {
    fn affinity_info(&self, target: CoreCoordinate) -> AffinityState {
        Psci::affinity_info(self, target)
    }

    fn cpu_on(&self, target: CoreCoordinate, entry_point: usize, context: u64) -> PsciReturn {
        Psci::cpu_on(self, target, entry_point, context)
    }
}
