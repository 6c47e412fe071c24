//! Work-graph state resolution and input preparation.

pub mod context;
pub mod inputs;

pub use context::WorkGraphContext;
