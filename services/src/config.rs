//! Runtime knobs for [`MpServices`](crate::MpServices).

/// Polling parameters used while waiting on secondary processors.
///
/// Debug output is configured separately through the `dbg-*` cargo features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpConfig {
    /// How many times a processor reported as `ON_PENDING` is re-queried before it is
    /// considered not enabled.
    pub enable_poll_attempts: u32,
    /// Stall between two `AFFINITY_INFO` queries, in microseconds.
    pub enable_poll_interval_us: u64,
    /// Stall between two completion checks when a dispatch timeout is set, in microseconds.
    pub completion_poll_interval_us: u64,
}

impl MpConfig {
    pub const fn new_default() -> Self {
        Self {
            enable_poll_attempts: 100,
            enable_poll_interval_us: 10,
            completion_poll_interval_us: 10,
        }
    }
}

impl Default for MpConfig {
    fn default() -> Self {
        Self::new_default()
    }
}
