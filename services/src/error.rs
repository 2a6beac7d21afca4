use thiserror_no_std::Error;

/// Outcome kinds reported by the multiprocessor services.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpError {
    /// Null or contradictory input, or the target is the calling processor.
    #[error("invalid parameter")]
    InvalidParameter,
    /// Handle out of range, or the platform processor table is missing.
    #[error("not found")]
    NotFound,
    /// The operation must be issued from the primary processor.
    #[error("operation called from a secondary processor")]
    DeviceError,
    /// The target processor is still running previously dispatched work.
    #[error("target processor is busy")]
    NotReady,
    /// No processor qualified for the request.
    #[error("no processor was started")]
    NotStarted,
    /// The operation is not available, or the platform rejected a power-on call.
    #[error("unsupported")]
    Unsupported,
    #[error("out of resources")]
    OutOfResources,
    #[error("timed out waiting for dispatched work")]
    Timeout,
}

pub type Result<T, E = MpError> = core::result::Result<T, E>;
