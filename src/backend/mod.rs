//! Device backend abstraction.
//!
//! Provides the [`Device`] facade trait the sandbox drives, the GPU-facing
//! types shared between backends, and a host-memory [`DummyDevice`] backend
//! for running without GPU hardware.

pub mod device;
pub mod dummy;
pub mod error;
pub mod types;

pub use device::{Device, GraphProgramDescriptor};
pub use dummy::DummyDevice;
pub use error::{DeviceError, DeviceResult};
pub use types::*;
