//! Device facade error type.

use thiserror::Error;

/// Errors produced by [`Device`](super::Device) implementations.
///
/// All of these are fatal to the current run: there is no partial-success
/// state anywhere in the binding path, and no retry short of recreating the
/// whole program object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// A named program or entrypoint is unknown to the program object.
    #[error("unknown program or entrypoint: {0}")]
    Resolution(String),

    /// A GPU allocation failed.
    #[error("GPU allocation of {size} bytes failed")]
    ResourceExhausted {
        /// Requested allocation size in bytes.
        size: u64,
    },

    /// Any other native-API call returned a failure status.
    #[error("device operation failed: {0}")]
    OperationFailed(String),

    /// The device-removed check tripped after waiting on the completion
    /// fence.
    #[error("GPU device lost")]
    DeviceLost,

    /// The device does not report support for work-graph execution.
    #[error("device does not report support for work graphs")]
    FeatureNotSupported,
}

pub type DeviceResult<T> = Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeviceError::Resolution("NoSuchGraph".to_string());
        assert_eq!(err.to_string(), "unknown program or entrypoint: NoSuchGraph");

        let err = DeviceError::ResourceExhausted { size: 4096 };
        assert_eq!(err.to_string(), "GPU allocation of 4096 bytes failed");

        assert_eq!(DeviceError::DeviceLost.to_string(), "GPU device lost");
    }
}
