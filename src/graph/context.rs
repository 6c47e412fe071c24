//! Per-graph GPU state resolution.
//!
//! [`WorkGraphContext::initialize`] resolves everything a graph dispatch
//! needs from a created program object: the dispatch identifier, the graph
//! index, backing memory sized to the graph's stated maximum, and the
//! local-root-arguments table. Initialization is all-or-nothing; on any
//! failure every allocation made so far is released before the error is
//! returned, so a failed context never leaks GPU memory.

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, Device, DeviceResult, GpuAddressRange,
    GpuAddressRangeAndStride, GraphProgramHandle, HeapKind, MemoryRequirements,
    ProgramIdentifier, WorkGraphBinding, WorkGraphFlags, LOCAL_ROOT_ARGS_UNUSED,
};

/// Resolved GPU state for one graph inside a program object.
///
/// Owns the backing-memory and local-root-arguments buffers; call
/// [`destroy`](Self::destroy) to release them. Does not own the program
/// object itself.
#[derive(Debug)]
pub struct WorkGraphContext {
    program: GraphProgramHandle,
    identifier: ProgramIdentifier,
    graph_index: u32,
    requirements: MemoryRequirements,
    num_nodes: u32,
    num_entrypoints: u32,
    backing_buffer: Option<BufferHandle>,
    backing_range: GpuAddressRange,
    local_args_buffer: Option<BufferHandle>,
    local_args_table: Option<GpuAddressRangeAndStride>,
}

impl WorkGraphContext {
    /// Resolve the named graph's dispatch state and allocate its GPU
    /// resources.
    pub fn initialize(
        device: &mut dyn Device,
        program: GraphProgramHandle,
        graph_name: &str,
    ) -> DeviceResult<Self> {
        let identifier = device.program_identifier(program, graph_name)?;
        let graph_index = device.work_graph_index(program, graph_name)?;
        let requirements = device.memory_requirements(program, graph_index)?;
        let num_nodes = device.num_nodes(program, graph_index)?;
        let num_entrypoints = device.num_entrypoints(program, graph_index)?;

        let mut context = Self {
            program,
            identifier,
            graph_index,
            requirements,
            num_nodes,
            num_entrypoints,
            backing_buffer: None,
            backing_range: GpuAddressRange::default(),
            local_args_buffer: None,
            local_args_table: None,
        };
        if let Err(err) = context.allocate(device) {
            context.destroy(device);
            return Err(err);
        }

        log::info!(
            "graph \"{graph_name}\": {num_nodes} nodes, {num_entrypoints} entrypoints, \
             backing memory {} bytes",
            context.backing_range.size_in_bytes
        );
        Ok(context)
    }

    fn allocate(&mut self, device: &mut dyn Device) -> DeviceResult<()> {
        // Sized to the stated maximum so the execution engine never runs
        // starved. A tighter size would also be valid at any granularity
        // step above the minimum.
        if self.requirements.max_size_in_bytes > 0 {
            let buffer = device.create_buffer(&BufferDescriptor {
                label: Some("work graph backing memory".to_string()),
                size: self.requirements.max_size_in_bytes,
                usage: BufferUsage::UNORDERED_ACCESS,
                heap: HeapKind::Default,
            })?;
            self.backing_buffer = Some(buffer);
            self.backing_range = GpuAddressRange {
                start_address: device.buffer_gpu_address(buffer)?,
                size_in_bytes: self.requirements.max_size_in_bytes,
            };
        }
        self.build_local_root_arguments_table(device)
    }

    /// Build the local-root-arguments table in two passes: find the highest
    /// slot any node uses, then fill every slot with the unused sentinel and
    /// overwrite each used slot with its own index. A node reading its local
    /// root arguments thus sees either its table slot number or the
    /// sentinel.
    fn build_local_root_arguments_table(&mut self, device: &mut dyn Device) -> DeviceResult<()> {
        let mut max_index = None;
        for node_index in 0..self.num_nodes {
            let slot = device.node_local_root_arguments_table_index(
                self.program,
                self.graph_index,
                node_index,
            )?;
            if let Some(slot) = slot {
                max_index = Some(max_index.map_or(slot, |m: u32| m.max(slot)));
            }
        }
        // No node declares local root arguments; the binding omits the
        // table entirely.
        let Some(max_index) = max_index else {
            return Ok(());
        };

        let stride = std::mem::size_of::<u32>() as u64;
        let num_entries = max_index as u64 + 1;
        let mut entries = vec![LOCAL_ROOT_ARGS_UNUSED; num_entries as usize];
        for node_index in 0..self.num_nodes {
            let slot = device.node_local_root_arguments_table_index(
                self.program,
                self.graph_index,
                node_index,
            )?;
            if let Some(slot) = slot {
                entries[slot as usize] = slot;
            }
        }

        let buffer = device.create_buffer_init(
            &BufferDescriptor {
                label: Some("local root arguments table".to_string()),
                size: num_entries * stride,
                usage: BufferUsage::COPY_DST,
                heap: HeapKind::Default,
            },
            bytemuck::cast_slice(&entries),
        )?;
        self.local_args_buffer = Some(buffer);
        self.local_args_table = Some(GpuAddressRangeAndStride {
            start_address: device.buffer_gpu_address(buffer)?,
            size_in_bytes: num_entries * stride,
            stride_in_bytes: stride,
        });
        log::debug!("local root arguments table: {num_entries} entries");
        Ok(())
    }

    /// The dispatch binding for this graph.
    ///
    /// Always requests backing-memory initialization: nothing here reuses
    /// graph state across dispatches, and running on stale backing memory
    /// without the flag is a correctness bug.
    pub fn binding(&self) -> WorkGraphBinding {
        WorkGraphBinding {
            program: self.program,
            identifier: self.identifier,
            flags: WorkGraphFlags::INITIALIZE,
            backing_memory: self.backing_range,
            local_root_arguments_table: self.local_args_table,
        }
    }

    pub fn program(&self) -> GraphProgramHandle {
        self.program
    }

    pub fn graph_index(&self) -> u32 {
        self.graph_index
    }

    pub fn memory_requirements(&self) -> MemoryRequirements {
        self.requirements
    }

    pub fn num_nodes(&self) -> u32 {
        self.num_nodes
    }

    pub fn num_entrypoints(&self) -> u32 {
        self.num_entrypoints
    }

    /// The local-root-arguments table range, when any node declares one.
    pub fn local_root_arguments_table(&self) -> Option<GpuAddressRangeAndStride> {
        self.local_args_table
    }

    /// Release the context's GPU allocations.
    pub fn destroy(&mut self, device: &mut dyn Device) {
        if let Some(buffer) = self.backing_buffer.take() {
            device.destroy_buffer(buffer);
        }
        if let Some(buffer) = self.local_args_buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.backing_range = GpuAddressRange::default();
        self.local_args_table = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyDevice, GraphProgramDescriptor};
    use crate::compiler::ShaderCompiler;

    fn make_program(device: &mut DummyDevice, source: &str) -> GraphProgramHandle {
        let library = ShaderCompiler::new().compile_library(source, &[]).unwrap();
        device
            .create_graph_program(&GraphProgramDescriptor {
                library: &library,
                use_collections: false,
            })
            .unwrap()
    }

    const THREE_NODE_GRAPH: &str = r#"
//@graph(name = "TestGraph")
//@node(name = "entryNode", entry, record_stride = 8, local_args = 0)
@compute @workgroup_size(1)
fn entryNode() {}

//@node(name = "workerNode", local_args = 2)
@compute @workgroup_size(1)
fn workerNode() {}

@compute @workgroup_size(1)
fn leafNode() {}
"#;

    #[test]
    fn test_initialize_resolves_graph_state() {
        let mut device = DummyDevice::new();
        let program = make_program(&mut device, THREE_NODE_GRAPH);
        let context = WorkGraphContext::initialize(&mut device, program, "TestGraph").unwrap();

        assert_eq!(context.num_nodes(), 3);
        assert_eq!(context.num_entrypoints(), 1);
        let requirements = context.memory_requirements();
        assert!(requirements.max_size_in_bytes >= requirements.min_size_in_bytes);

        let binding = context.binding();
        assert!(binding.flags.contains(WorkGraphFlags::INITIALIZE));
        assert_eq!(
            binding.backing_memory.size_in_bytes,
            requirements.max_size_in_bytes
        );
        assert_ne!(binding.backing_memory.start_address, 0);
    }

    #[test]
    fn test_local_root_arguments_table_layout() {
        let mut device = DummyDevice::new();
        let program = make_program(&mut device, THREE_NODE_GRAPH);
        let context = WorkGraphContext::initialize(&mut device, program, "TestGraph").unwrap();

        // Highest used slot is 2, so the table holds slots 0..=2 with a
        // u32 stride.
        let table = context.local_root_arguments_table().unwrap();
        assert_eq!(table.stride_in_bytes, 4);
        assert_eq!(table.size_in_bytes, 12);

        // Slot 0 and 2 hold their own index, slot 1 the unused sentinel.
        let buffer = context.local_args_buffer.unwrap();
        let data = device.read_buffer(buffer, 0, 12).unwrap();
        let words: Vec<u32> = data
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(words, vec![0, LOCAL_ROOT_ARGS_UNUSED, 2]);
    }

    #[test]
    fn test_no_local_root_arguments_means_no_table() {
        let source = r#"
//@graph(name = "TestGraph")
//@node(name = "solo", entry, record_stride = 4)
@compute @workgroup_size(1)
fn solo() {}
"#;
        let mut device = DummyDevice::new();
        let program = make_program(&mut device, source);
        let context = WorkGraphContext::initialize(&mut device, program, "TestGraph").unwrap();
        assert!(context.local_root_arguments_table().is_none());
        assert!(context.binding().local_root_arguments_table.is_none());
    }

    #[test]
    fn test_initialize_unknown_graph_name() {
        let mut device = DummyDevice::new();
        let program = make_program(&mut device, THREE_NODE_GRAPH);
        let err =
            WorkGraphContext::initialize(&mut device, program, "NoSuchGraph").unwrap_err();
        assert_eq!(
            err,
            crate::backend::DeviceError::Resolution("NoSuchGraph".to_string())
        );
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_failed_initialize_releases_allocations() {
        let mut device = DummyDevice::new();
        let program = make_program(&mut device, THREE_NODE_GRAPH);

        device.set_allocation_limit(Some(8));

        let err = WorkGraphContext::initialize(&mut device, program, "TestGraph").unwrap_err();
        assert!(matches!(
            err,
            crate::backend::DeviceError::ResourceExhausted { .. }
        ));
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_backing_memory_is_unordered_access() {
        let mut device = DummyDevice::new();
        let program = make_program(&mut device, THREE_NODE_GRAPH);
        let context = WorkGraphContext::initialize(&mut device, program, "TestGraph").unwrap();

        let backing = context.backing_buffer.unwrap();
        let usage = device.buffer_usage(backing).unwrap();
        assert!(usage.contains(BufferUsage::UNORDERED_ACCESS));
    }

    #[test]
    fn test_repeated_initialize_resolves_identical_state() {
        let mut device = DummyDevice::new();
        let program = make_program(&mut device, THREE_NODE_GRAPH);
        let first = WorkGraphContext::initialize(&mut device, program, "TestGraph").unwrap();
        let second = WorkGraphContext::initialize(&mut device, program, "TestGraph").unwrap();

        assert_eq!(first.memory_requirements(), second.memory_requirements());
        assert_eq!(first.num_nodes(), second.num_nodes());
        assert_eq!(first.num_entrypoints(), second.num_entrypoints());

        // The bindings match in everything but the buffer addresses, which
        // belong to distinct allocations.
        let a = first.binding();
        let b = second.binding();
        assert_eq!(a.identifier, b.identifier);
        assert_eq!(a.flags, b.flags);
        assert_eq!(
            a.backing_memory.size_in_bytes,
            b.backing_memory.size_in_bytes
        );
        let table_a = a.local_root_arguments_table.unwrap();
        let table_b = b.local_root_arguments_table.unwrap();
        assert_eq!(table_a.size_in_bytes, table_b.size_in_bytes);
        assert_eq!(table_a.stride_in_bytes, table_b.stride_in_bytes);
        assert_ne!(
            a.backing_memory.start_address,
            b.backing_memory.start_address
        );
    }

    #[test]
    fn test_destroy_releases_buffers() {
        let mut device = DummyDevice::new();
        let program = make_program(&mut device, THREE_NODE_GRAPH);
        let mut context = WorkGraphContext::initialize(&mut device, program, "TestGraph").unwrap();
        assert_eq!(device.live_buffer_count(), 2);
        context.destroy(&mut device);
        assert_eq!(device.live_buffer_count(), 0);
    }
}
