//! Top-level sandbox error type.

use thiserror::Error;

use crate::backend::DeviceError;
use crate::compiler::CompileError;

/// Errors surfaced by the sandbox shell.
///
/// Every variant is fatal to the current run. The sandbox propagates them to
/// the caller instead of aborting, so an embedding application can decide
/// whether to retry graph initialization from scratch.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Shader library compilation failed.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A device facade operation failed.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The graph declares no entrypoints, so there is no node to feed
    /// host-issued input records to. Rejected before any GPU submission.
    #[error("graph \"{graph}\" has no entrypoints to feed")]
    NoEntrypoints {
        /// Name of the offending graph program.
        graph: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SandboxError::NoEntrypoints {
            graph: "WorkGraphTest".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "graph \"WorkGraphTest\" has no entrypoints to feed"
        );

        let err = SandboxError::from(DeviceError::DeviceLost);
        assert_eq!(err.to_string(), "GPU device lost");
    }
}
