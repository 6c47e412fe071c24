//! Work-graph sandbox.
//!
//! A small demonstration crate for exercising a GPU work-graph execution
//! model behind a backend-agnostic device facade. The sandbox compiles a
//! shader library, registers a named graph program with the device, resolves
//! the GPU-side state the execution engine needs (backing memory and the
//! local-root-arguments table), dispatches the graph, and reads results back
//! for inspection.
//!
//! # Layout
//! - [`backend`] - Device facade trait, GPU-facing types, and the host-memory
//!   [`DummyDevice`] reference backend
//! - [`compiler`] - Shader library compilation (WGSL through naga) and graph
//!   reflection metadata
//! - [`graph`] - Work-graph resource binding ([`WorkGraphContext`]) and
//!   dispatch input construction
//! - [`sandbox`] - The orchestration shell tying the above together
//!
//! # Example
//!
//! ```no_run
//! use workgraph_sandbox::{DummyDevice, sandbox, SandboxConfig};
//!
//! let mut device = DummyDevice::new();
//! let report = sandbox::run(&mut device, &SandboxConfig::default()).unwrap();
//! println!("{} nodes, {} entrypoints", report.num_nodes, report.num_entrypoints);
//! ```

pub mod backend;
pub mod compiler;
pub mod error;
pub mod graph;
pub mod sandbox;

pub use backend::{Device, DeviceError, DummyDevice};
pub use compiler::{CompileError, ExecutionParams, GraphLibrary, ShaderCompiler};
pub use error::SandboxError;
pub use graph::WorkGraphContext;
pub use sandbox::RunReport;

/// Graph program name the default sandbox shader registers.
pub const DEFAULT_GRAPH_NAME: &str = "WorkGraphTest";

/// The work graph exercised when no shader file is supplied.
pub const DEFAULT_GRAPH_SOURCE: &str = include_str!("../shaders/workgraph_sandbox.wgsl");

/// Configuration for a sandbox run.
///
/// Replaces the process-wide globals of a typical throwaway sample (selected
/// filename, collections flag) with explicit state passed into the entry
/// point.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Shader library source text.
    pub source: String,
    /// Name used for the source in diagnostics (usually the file name).
    pub source_name: String,
    /// Name of the graph program registered inside the library.
    pub graph_name: String,
    /// Compile node shaders into a collection object first, then include the
    /// existing collection in the executable program.
    pub use_collections: bool,
    /// Compile-time shader defines, applied before parsing.
    pub defines: Vec<(String, String)>,
    /// Size of the scratch UAV buffer the graph writes into, in u32 units.
    pub output_buffer_uints: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_GRAPH_SOURCE.to_string(),
            source_name: "workgraph_sandbox.wgsl".to_string(),
            graph_name: DEFAULT_GRAPH_NAME.to_string(),
            use_collections: false,
            defines: Vec::new(),
            output_buffer_uints: 1 << 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.graph_name, DEFAULT_GRAPH_NAME);
        assert!(!config.use_collections);
        assert!(config.source.contains("@compute"));
    }
}
