//! Sandbox orchestration.
//!
//! [`run`] is the whole sample in one pass: compile the shader library,
//! register the graph program, resolve its dispatch state, generate and
//! stage input records, dispatch, drain the queue, and read the output UAV
//! back for inspection. Every GPU object created along the way is released
//! before returning, on the error paths included.

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, Device, DeviceError, GpuAddressRangeAndStride,
    GraphProgramDescriptor, GraphProgramHandle, HeapKind, MemoryRequirements,
};
use crate::compiler::{ExecutionParams, GraphLibrary, ShaderCompiler};
use crate::error::SandboxError;
use crate::graph::inputs::{build_entrypoint_records, stage_inputs};
use crate::graph::WorkGraphContext;
use crate::SandboxConfig;

/// What a sandbox run observed, for callers and tests to inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub num_nodes: u32,
    pub num_entrypoints: u32,
    pub memory_requirements: MemoryRequirements,
    /// The resolved local-root-arguments table range, when the graph has
    /// one.
    pub local_root_arguments_table: Option<GpuAddressRangeAndStride>,
    /// Total input records fed across all entrypoints.
    pub num_records_dispatched: u32,
    /// Leading words of the output UAV after the run.
    pub output_words: Vec<u32>,
    /// Host-side wall time spent in dispatch and queue drain.
    pub elapsed: std::time::Duration,
}

/// Compile, bind, dispatch, and read back one graph program.
pub fn run(device: &mut dyn Device, config: &SandboxConfig) -> Result<RunReport, SandboxError> {
    if !device.supports_work_graphs() {
        return Err(DeviceError::FeatureNotSupported.into());
    }

    log::info!(
        "compiling \"{}\" (graph \"{}\")",
        config.source_name,
        config.graph_name
    );
    let library = ShaderCompiler::new().compile_library(&config.source, &config.defines)?;
    let program = device.create_graph_program(&GraphProgramDescriptor {
        library: &library,
        use_collections: config.use_collections,
    })?;
    let result = run_graph(device, config, &library, program);
    device.destroy_graph_program(program);
    match &result {
        Ok(report) => log_output(report),
        Err(err) => log::error!("sandbox run failed: {err}"),
    }
    result
}

fn run_graph(
    device: &mut dyn Device,
    config: &SandboxConfig,
    library: &GraphLibrary,
    program: GraphProgramHandle,
) -> Result<RunReport, SandboxError> {
    let mut context = WorkGraphContext::initialize(device, program, &config.graph_name)?;
    let result = dispatch_and_read(device, config, library.params(), &context);
    context.destroy(device);
    result
}

fn dispatch_and_read(
    device: &mut dyn Device,
    config: &SandboxConfig,
    params: ExecutionParams,
    context: &WorkGraphContext,
) -> Result<RunReport, SandboxError> {
    if context.num_entrypoints() == 0 {
        return Err(SandboxError::NoEntrypoints {
            graph: config.graph_name.clone(),
        });
    }
    log_graph_contents(device, context)?;

    let output_size = config.output_buffer_uints as u64 * 4;
    let output = device.create_buffer(&BufferDescriptor {
        label: Some("sandbox output".to_string()),
        size: output_size,
        usage: BufferUsage::UNORDERED_ACCESS | BufferUsage::COPY_SRC,
        heap: HeapKind::Default,
    })?;
    let result = dispatch_with_output(device, config, params, context, output);
    device.destroy_buffer(output);
    result
}

fn dispatch_with_output(
    device: &mut dyn Device,
    config: &SandboxConfig,
    params: ExecutionParams,
    context: &WorkGraphContext,
    output: BufferHandle,
) -> Result<RunReport, SandboxError> {
    device.set_root_unordered_access_view(0, output)?;

    let node_inputs =
        build_entrypoint_records(device, context, params.num_records_per_entrypoint)?;
    let num_records_dispatched = node_inputs.iter().map(|i| i.num_records).sum();

    let staged = stage_inputs(device, node_inputs, params.feed_graph_inputs_from_gpu_memory)?;
    // Drain setup uploads before the dispatch that references them.
    let started = std::time::Instant::now();
    let dispatched = device
        .flush_and_wait()
        .and_then(|_| device.dispatch_graph(&context.binding(), &staged.inputs))
        .and_then(|_| device.flush_and_wait());
    let elapsed = started.elapsed();
    staged.destroy(device);
    dispatched?;
    log::debug!("dispatch and drain took {elapsed:?}");

    let output_words = read_back(device, config, params, output)?;
    Ok(RunReport {
        num_nodes: context.num_nodes(),
        num_entrypoints: context.num_entrypoints(),
        memory_requirements: context.memory_requirements(),
        local_root_arguments_table: context.local_root_arguments_table(),
        num_records_dispatched,
        output_words,
        elapsed,
    })
}

/// Log the graph's contents the way the report to a console reads: every
/// node with its local-root-arguments slot, every entrypoint with its
/// record size.
fn log_graph_contents(
    device: &dyn Device,
    context: &WorkGraphContext,
) -> Result<(), SandboxError> {
    let program = context.program();
    let graph_index = context.graph_index();
    for node_index in 0..context.num_nodes() {
        let id = device.node_id(program, graph_index, node_index)?;
        match device.node_local_root_arguments_table_index(program, graph_index, node_index)? {
            Some(slot) => {
                log::info!("node {node_index}: {id}, local root arguments slot {slot}")
            }
            None => log::info!("node {node_index}: {id}"),
        }
    }
    for entrypoint_index in 0..context.num_entrypoints() {
        let id = device.entrypoint_id(program, graph_index, entrypoint_index)?;
        let record_size = device.entrypoint_record_size(program, graph_index, entrypoint_index)?;
        log::info!("entrypoint {entrypoint_index}: {id}, {record_size}-byte records");
    }
    Ok(())
}

/// Copy the output UAV into a readback-heap buffer, drain the queue, and
/// read the leading words out.
fn read_back(
    device: &mut dyn Device,
    config: &SandboxConfig,
    params: ExecutionParams,
    output: BufferHandle,
) -> Result<Vec<u32>, SandboxError> {
    let output_size = config.output_buffer_uints as u64 * 4;
    let readback = device.create_buffer(&BufferDescriptor {
        label: Some("sandbox readback".to_string()),
        size: output_size,
        usage: BufferUsage::COPY_DST,
        heap: HeapKind::Readback,
    })?;

    let num_words = params.num_uints_to_print.min(config.output_buffer_uints);
    let read = device
        .copy_buffer(output, readback)
        .and_then(|_| device.flush_and_wait())
        .and_then(|_| device.read_buffer(readback, 0, num_words as u64 * 4));
    device.destroy_buffer(readback);
    let data = read?;

    Ok(data
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn log_output(report: &RunReport) {
    log::info!(
        "dispatched {} records across {} entrypoints",
        report.num_records_dispatched,
        report.num_entrypoints
    );
    for (i, word) in report.output_words.iter().enumerate() {
        log::info!("UAV[{i}] = {word:#010x}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    #[test]
    fn test_default_run_succeeds() {
        let mut device = DummyDevice::new();
        let report = run(&mut device, &SandboxConfig::default()).unwrap();
        assert_eq!(report.num_nodes, 3);
        assert_eq!(report.num_entrypoints, 1);
        assert!(report.local_root_arguments_table.is_some());
        assert_eq!(report.num_records_dispatched, 4);
        // Everything the run created has been released again.
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_run_rejects_graph_without_entrypoints() {
        let config = SandboxConfig {
            source: "@compute @workgroup_size(1) fn lonely() {}".to_string(),
            ..SandboxConfig::default()
        };
        let mut device = DummyDevice::new();
        let err = run(&mut device, &config).unwrap_err();
        assert!(matches!(err, SandboxError::NoEntrypoints { .. }));
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_run_without_work_graph_support() {
        let mut device = DummyDevice::without_work_graphs();
        let err = run(&mut device, &SandboxConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Device(DeviceError::FeatureNotSupported)
        ));
    }

    #[test]
    fn test_run_surfaces_compile_errors() {
        let config = SandboxConfig {
            source: "fn broken( {".to_string(),
            ..SandboxConfig::default()
        };
        let mut device = DummyDevice::new();
        let err = run(&mut device, &config).unwrap_err();
        assert!(matches!(err, SandboxError::Compile(_)));
    }
}
