//! Common utilities for sandbox integration tests.

use workgraph_sandbox::SandboxConfig;

/// Where dispatch input records are handed over from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Records passed from host memory with the dispatch call.
    Cpu,
    /// Records and their descriptors uploaded to GPU buffers first.
    Gpu,
}

impl InputMode {
    pub fn from_gpu_memory(self) -> bool {
        matches!(self, InputMode::Gpu)
    }
}

/// A single-entrypoint graph with a local-root-arguments scenario: slots 0
/// and 2 used, slot 1 left to the unused sentinel.
pub fn three_node_graph(num_records: u32, mode: InputMode) -> String {
    format!(
        r#"
//@graph(name = "WorkGraphTest")
//@params(num_records_per_entrypoint = {num_records}, feed_graph_inputs_from_gpu_memory = {from_gpu}, num_uints_to_print = 8)

@group(0) @binding(0)
var<storage, read_write> output: array<u32>;

//@node(name = "entryNode", entry, record_stride = 8, local_args = 0)
@compute @workgroup_size(1)
fn entryNode(@builtin(global_invocation_id) gid: vec3<u32>) {{
    output[gid.x] = gid.x;
}}

//@node(name = "workerNode", local_args = 2)
@compute @workgroup_size(32)
fn workerNode(@builtin(global_invocation_id) gid: vec3<u32>) {{
    output[gid.x] = output[gid.x] * 2u;
}}

@compute @workgroup_size(32)
fn leafNode(@builtin(global_invocation_id) gid: vec3<u32>) {{
    output[gid.x] = output[gid.x] + 1u;
}}
"#,
        from_gpu = mode.from_gpu_memory(),
    )
}

/// A graph with two entrypoints, the second with a record size that needs
/// rounding up to whole u32s.
pub fn two_entry_graph(num_records: u32, mode: InputMode) -> String {
    format!(
        r#"
//@graph(name = "WorkGraphTest")
//@params(num_records_per_entrypoint = {num_records}, feed_graph_inputs_from_gpu_memory = {from_gpu}, num_uints_to_print = 8)

@group(0) @binding(0)
var<storage, read_write> output: array<u32>;

//@node(name = "firstEntry", entry, record_stride = 8)
@compute @workgroup_size(1)
fn firstEntry(@builtin(global_invocation_id) gid: vec3<u32>) {{
    output[gid.x] = gid.x;
}}

//@node(name = "secondEntry", entry, record_stride = 6)
@compute @workgroup_size(1)
fn secondEntry(@builtin(global_invocation_id) gid: vec3<u32>) {{
    output[gid.x] = gid.x + 1u;
}}
"#,
        from_gpu = mode.from_gpu_memory(),
    )
}

/// A valid shader library whose graph has no entrypoints at all.
pub const NO_ENTRYPOINT_GRAPH: &str = r#"
@group(0) @binding(0)
var<storage, read_write> output: array<u32>;

@compute @workgroup_size(1)
fn internalOnly(@builtin(global_invocation_id) gid: vec3<u32>) {
    output[gid.x] = 0u;
}
"#;

/// Build a run configuration around the given source, with a small output
/// buffer so tests stay cheap.
pub fn test_config(source: String) -> SandboxConfig {
    SandboxConfig {
        source,
        source_name: "test_graph.wgsl".to_string(),
        output_buffer_uints: 256,
        ..SandboxConfig::default()
    }
}
