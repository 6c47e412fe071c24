//! Host-memory device backend.
//!
//! [`DummyDevice`] implements the full [`Device`] surface without touching
//! any GPU API. Buffers live in host vectors behind fabricated GPU virtual
//! addresses, program reflection is served straight from the compiled
//! library metadata, and a graph dispatch is simulated by consuming the
//! input records and writing the leading `u32` of each one into the bound
//! root UAV, in record order.
//!
//! The simulation is deterministic, which is what makes it useful: tests
//! assert byte-exact reflection results, binding layouts, and output
//! contents. It also enforces the contracts a real driver leaves to
//! undefined behavior, in particular dispatching into backing memory that
//! was never initialized.

use std::collections::{HashMap, HashSet};

use crate::compiler::NodeMetadata;

use super::device::{Device, GraphProgramDescriptor};
use super::error::{DeviceError, DeviceResult};
use super::types::{
    BufferDescriptor, BufferHandle, BufferUsage, GpuAddress, GraphInputs, GraphProgramHandle,
    MemoryRequirements, NodeCpuInput, NodeId, ProgramIdentifier, WorkGraphBinding, WorkGraphFlags,
};

const GPU_ADDRESS_BASE: GpuAddress = 0x1000_0000;
const GPU_ADDRESS_ALIGNMENT: u64 = 256;

// Deterministic per-node requirement figures, so tests can predict sizes.
const BACKING_MIN_PER_NODE: u64 = 4096;
const BACKING_MAX_PER_NODE: u64 = 65536;
const BACKING_GRANULARITY: u64 = 4096;

struct DummyBuffer {
    data: Vec<u8>,
    gpu_address: GpuAddress,
    usage: BufferUsage,
}

struct DummyProgram {
    name: String,
    nodes: Vec<NodeMetadata>,
    /// Indices into `nodes` of the entrypoints, in declaration order.
    entrypoints: Vec<usize>,
}

/// Device backend backed by host memory.
pub struct DummyDevice {
    supports_work_graphs: bool,
    buffers: HashMap<u64, DummyBuffer>,
    next_buffer_id: u64,
    next_gpu_address: GpuAddress,
    programs: HashMap<u64, DummyProgram>,
    next_program_id: u64,
    root_uavs: HashMap<u32, BufferHandle>,
    /// Backing memory start addresses that have seen an INITIALIZE dispatch.
    initialized_backings: HashSet<GpuAddress>,
    allocation_limit: Option<u64>,
    device_lost: bool,
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyDevice {
    pub fn new() -> Self {
        Self {
            supports_work_graphs: true,
            buffers: HashMap::new(),
            next_buffer_id: 1,
            next_gpu_address: GPU_ADDRESS_BASE,
            programs: HashMap::new(),
            next_program_id: 1,
            root_uavs: HashMap::new(),
            initialized_backings: HashSet::new(),
            allocation_limit: None,
            device_lost: false,
        }
    }

    /// A device that reports no work-graph support.
    pub fn without_work_graphs() -> Self {
        Self {
            supports_work_graphs: false,
            ..Self::new()
        }
    }

    /// Number of live (not yet destroyed) buffers.
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Usage flags a live buffer was created with.
    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<BufferUsage> {
        self.buffers.get(&buffer.0).map(|b| b.usage)
    }

    /// Fail any allocation larger than `limit` bytes with
    /// [`DeviceError::ResourceExhausted`].
    pub fn set_allocation_limit(&mut self, limit: Option<u64>) {
        self.allocation_limit = limit;
    }

    /// Make the next [`Device::flush_and_wait`] report a removed device.
    pub fn simulate_device_loss(&mut self) {
        self.device_lost = true;
    }

    fn buffer(&self, handle: BufferHandle) -> DeviceResult<&DummyBuffer> {
        self.buffers
            .get(&handle.0)
            .ok_or_else(|| DeviceError::OperationFailed("unknown buffer handle".to_string()))
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> DeviceResult<&mut DummyBuffer> {
        self.buffers
            .get_mut(&handle.0)
            .ok_or_else(|| DeviceError::OperationFailed("unknown buffer handle".to_string()))
    }

    fn program(&self, handle: GraphProgramHandle) -> DeviceResult<&DummyProgram> {
        self.programs
            .get(&handle.0)
            .ok_or_else(|| DeviceError::OperationFailed("unknown program handle".to_string()))
    }

    fn graph(&self, handle: GraphProgramHandle, graph_index: u32) -> DeviceResult<&DummyProgram> {
        let program = self.program(handle)?;
        // One graph per program object.
        if graph_index != 0 {
            return Err(DeviceError::OperationFailed(format!(
                "graph index {graph_index} out of range"
            )));
        }
        Ok(program)
    }

    fn node(
        &self,
        handle: GraphProgramHandle,
        graph_index: u32,
        node_index: u32,
    ) -> DeviceResult<&NodeMetadata> {
        let program = self.graph(handle, graph_index)?;
        program.nodes.get(node_index as usize).ok_or_else(|| {
            DeviceError::OperationFailed(format!("node index {node_index} out of range"))
        })
    }

    fn entrypoint(
        &self,
        handle: GraphProgramHandle,
        graph_index: u32,
        entrypoint_index: u32,
    ) -> DeviceResult<&NodeMetadata> {
        let program = self.graph(handle, graph_index)?;
        let node_index = *program
            .entrypoints
            .get(entrypoint_index as usize)
            .ok_or_else(|| {
                DeviceError::OperationFailed(format!(
                    "entrypoint index {entrypoint_index} out of range"
                ))
            })?;
        Ok(&program.nodes[node_index])
    }

    /// Read bytes from the fabricated GPU address space.
    fn read_gpu_memory(&self, address: GpuAddress, size: u64) -> DeviceResult<Vec<u8>> {
        for buffer in self.buffers.values() {
            let end = buffer.gpu_address + buffer.data.len() as u64;
            if address >= buffer.gpu_address && address + size <= end {
                let offset = (address - buffer.gpu_address) as usize;
                return Ok(buffer.data[offset..offset + size as usize].to_vec());
            }
        }
        Err(DeviceError::OperationFailed(format!(
            "GPU address range {address:#x}+{size} maps to no live buffer"
        )))
    }

    fn check_gpu_range(&self, address: GpuAddress, size: u64) -> DeviceResult<()> {
        if size == 0 {
            return Ok(());
        }
        self.read_gpu_memory(address, size).map(|_| ())
    }

    fn validate_binding(&self, binding: &WorkGraphBinding) -> DeviceResult<()> {
        let program = self.program(binding.program)?;
        if binding.identifier != ProgramIdentifier(binding.program.0) {
            return Err(DeviceError::OperationFailed(
                "program identifier does not match program object".to_string(),
            ));
        }

        let requirements = derive_memory_requirements(program.nodes.len() as u64);
        let backing = binding.backing_memory;
        if backing.size_in_bytes < requirements.min_size_in_bytes {
            return Err(DeviceError::OperationFailed(format!(
                "backing memory of {} bytes is below the {}-byte minimum",
                backing.size_in_bytes, requirements.min_size_in_bytes
            )));
        }
        self.check_gpu_range(backing.start_address, backing.size_in_bytes)?;

        if !binding.flags.contains(WorkGraphFlags::INITIALIZE)
            && !self.initialized_backings.contains(&backing.start_address)
        {
            return Err(DeviceError::OperationFailed(
                "dispatch into backing memory that was never initialized".to_string(),
            ));
        }

        let max_local_index = program
            .nodes
            .iter()
            .filter_map(|n| n.local_root_arguments_table_index)
            .max();
        if let Some(max_index) = max_local_index {
            let table = binding.local_root_arguments_table.ok_or_else(|| {
                DeviceError::OperationFailed(
                    "graph declares local root arguments but no table is bound".to_string(),
                )
            })?;
            if table.stride_in_bytes < std::mem::size_of::<u32>() as u64 {
                return Err(DeviceError::OperationFailed(format!(
                    "local-root-arguments stride of {} bytes is too small",
                    table.stride_in_bytes
                )));
            }
            let needed = (max_index as u64 + 1) * table.stride_in_bytes;
            if table.size_in_bytes < needed {
                return Err(DeviceError::OperationFailed(format!(
                    "local-root-arguments table of {} bytes cannot hold slot {max_index}",
                    table.size_in_bytes
                )));
            }
            self.check_gpu_range(table.start_address, table.size_in_bytes)?;
        }
        Ok(())
    }

    /// Flatten the dispatch inputs to the leading `u32` of every record, in
    /// consumption order. GPU-resident descriptors are chased through the
    /// fabricated address space.
    fn collect_record_heads(
        &self,
        program: GraphProgramHandle,
        inputs: &GraphInputs,
    ) -> DeviceResult<Vec<u32>> {
        let mut heads = Vec::new();
        match inputs {
            GraphInputs::NodeCpu(input) => {
                self.collect_cpu_input(program, input, &mut heads)?;
            }
            GraphInputs::MultiNodeCpu(node_inputs) => {
                for input in node_inputs {
                    self.collect_cpu_input(program, input, &mut heads)?;
                }
            }
            GraphInputs::NodeGpu { descriptor_address } => {
                let raw = self.read_gpu_memory(
                    *descriptor_address,
                    std::mem::size_of::<super::types::NodeGpuInput>() as u64,
                )?;
                let descriptor: super::types::NodeGpuInput = bytemuck::pod_read_unaligned(&raw);
                self.collect_gpu_input(program, &descriptor, &mut heads)?;
            }
            GraphInputs::MultiNodeGpu { descriptor_address } => {
                let raw = self.read_gpu_memory(
                    *descriptor_address,
                    std::mem::size_of::<super::types::MultiNodeGpuInput>() as u64,
                )?;
                let multi: super::types::MultiNodeGpuInput = bytemuck::pod_read_unaligned(&raw);
                for i in 0..multi.num_node_inputs as u64 {
                    let raw = self.read_gpu_memory(
                        multi.node_inputs_address + i * multi.node_input_stride_in_bytes,
                        std::mem::size_of::<super::types::NodeGpuInput>() as u64,
                    )?;
                    let descriptor: super::types::NodeGpuInput =
                        bytemuck::pod_read_unaligned(&raw);
                    self.collect_gpu_input(program, &descriptor, &mut heads)?;
                }
            }
        }
        Ok(heads)
    }

    fn collect_cpu_input(
        &self,
        program: GraphProgramHandle,
        input: &NodeCpuInput,
        heads: &mut Vec<u32>,
    ) -> DeviceResult<()> {
        self.check_entrypoint_index(program, input.entrypoint_index)?;
        let stride = input.record_stride_in_bytes as usize;
        let needed = input.num_records as usize * stride;
        if input.records.len() < needed {
            return Err(DeviceError::OperationFailed(format!(
                "record data of {} bytes is short of {needed}",
                input.records.len()
            )));
        }
        for i in 0..input.num_records as usize {
            if stride >= 4 {
                let offset = i * stride;
                let mut word = [0u8; 4];
                word.copy_from_slice(&input.records[offset..offset + 4]);
                heads.push(u32::from_le_bytes(word));
            }
        }
        Ok(())
    }

    fn collect_gpu_input(
        &self,
        program: GraphProgramHandle,
        descriptor: &super::types::NodeGpuInput,
        heads: &mut Vec<u32>,
    ) -> DeviceResult<()> {
        self.check_entrypoint_index(program, descriptor.entrypoint_index)?;
        for i in 0..descriptor.num_records as u64 {
            if descriptor.record_stride_in_bytes >= 4 {
                let raw = self.read_gpu_memory(
                    descriptor.records_address + i * descriptor.record_stride_in_bytes,
                    4,
                )?;
                let mut word = [0u8; 4];
                word.copy_from_slice(&raw);
                heads.push(u32::from_le_bytes(word));
            }
        }
        Ok(())
    }

    fn check_entrypoint_index(
        &self,
        program: GraphProgramHandle,
        entrypoint_index: u32,
    ) -> DeviceResult<()> {
        let program = self.program(program)?;
        if entrypoint_index as usize >= program.entrypoints.len() {
            return Err(DeviceError::Resolution(format!(
                "entrypoint index {entrypoint_index}"
            )));
        }
        Ok(())
    }
}

fn derive_memory_requirements(num_nodes: u64) -> MemoryRequirements {
    MemoryRequirements {
        min_size_in_bytes: num_nodes * BACKING_MIN_PER_NODE,
        max_size_in_bytes: num_nodes * BACKING_MAX_PER_NODE,
        size_granularity_in_bytes: BACKING_GRANULARITY,
    }
}

impl Device for DummyDevice {
    fn supports_work_graphs(&self) -> bool {
        self.supports_work_graphs
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> DeviceResult<BufferHandle> {
        if let Some(limit) = self.allocation_limit {
            if desc.size > limit {
                return Err(DeviceError::ResourceExhausted { size: desc.size });
            }
        }
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;

        let gpu_address = self.next_gpu_address;
        let span = desc.size.max(1).next_multiple_of(GPU_ADDRESS_ALIGNMENT);
        self.next_gpu_address += span;

        log::trace!(
            "dummy device: create buffer {:?} ({} bytes) at {gpu_address:#x}",
            desc.label,
            desc.size
        );
        self.buffers.insert(
            id,
            DummyBuffer {
                data: vec![0; desc.size as usize],
                gpu_address,
                usage: desc.usage,
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> DeviceResult<BufferHandle> {
        let handle = self.create_buffer(desc)?;
        self.write_buffer(handle, 0, data)?;
        Ok(handle)
    }

    fn buffer_gpu_address(&self, buffer: BufferHandle) -> DeviceResult<GpuAddress> {
        Ok(self.buffer(buffer)?.gpu_address)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> DeviceResult<()> {
        let buffer = self.buffer_mut(buffer)?;
        let end = offset as usize + data.len();
        if end > buffer.data.len() {
            return Err(DeviceError::OperationFailed(format!(
                "write of {} bytes at offset {offset} overruns {}-byte buffer",
                data.len(),
                buffer.data.len()
            )));
        }
        buffer.data[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle) -> DeviceResult<()> {
        let data = self.buffer(src)?.data.clone();
        let dst = self.buffer_mut(dst)?;
        if dst.data.len() != data.len() {
            return Err(DeviceError::OperationFailed(format!(
                "copy between buffers of {} and {} bytes",
                data.len(),
                dst.data.len()
            )));
        }
        dst.data.copy_from_slice(&data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> DeviceResult<Vec<u8>> {
        let buffer = self.buffer(buffer)?;
        let end = (offset + size) as usize;
        if end > buffer.data.len() {
            return Err(DeviceError::OperationFailed(format!(
                "read of {size} bytes at offset {offset} overruns {}-byte buffer",
                buffer.data.len()
            )));
        }
        Ok(buffer.data[offset as usize..end].to_vec())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer.0).is_none() {
            log::warn!("dummy device: destroying unknown buffer {buffer:?}");
        }
    }

    fn create_graph_program(
        &mut self,
        desc: &GraphProgramDescriptor<'_>,
    ) -> DeviceResult<GraphProgramHandle> {
        if !self.supports_work_graphs {
            return Err(DeviceError::FeatureNotSupported);
        }
        if desc.library.code().is_empty() {
            return Err(DeviceError::OperationFailed(
                "empty shader library".to_string(),
            ));
        }
        let nodes: Vec<NodeMetadata> = desc.library.nodes().to_vec();
        let entrypoints = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_entrypoint)
            .map(|(i, _)| i)
            .collect();

        let id = self.next_program_id;
        self.next_program_id += 1;
        log::trace!(
            "dummy device: create graph program \"{}\" ({} nodes, collections: {})",
            desc.library.graph_name(),
            nodes.len(),
            desc.use_collections
        );
        self.programs.insert(
            id,
            DummyProgram {
                name: desc.library.graph_name().to_string(),
                nodes,
                entrypoints,
            },
        );
        Ok(GraphProgramHandle(id))
    }

    fn destroy_graph_program(&mut self, program: GraphProgramHandle) {
        if self.programs.remove(&program.0).is_none() {
            log::warn!("dummy device: destroying unknown program {program:?}");
        }
    }

    fn program_identifier(
        &self,
        program: GraphProgramHandle,
        name: &str,
    ) -> DeviceResult<ProgramIdentifier> {
        let registered = self.program(program)?;
        if registered.name != name {
            return Err(DeviceError::Resolution(name.to_string()));
        }
        Ok(ProgramIdentifier(program.0))
    }

    fn work_graph_index(&self, program: GraphProgramHandle, name: &str) -> DeviceResult<u32> {
        let registered = self.program(program)?;
        if registered.name != name {
            return Err(DeviceError::Resolution(name.to_string()));
        }
        Ok(0)
    }

    fn memory_requirements(
        &self,
        program: GraphProgramHandle,
        graph_index: u32,
    ) -> DeviceResult<MemoryRequirements> {
        let graph = self.graph(program, graph_index)?;
        Ok(derive_memory_requirements(graph.nodes.len() as u64))
    }

    fn num_nodes(&self, program: GraphProgramHandle, graph_index: u32) -> DeviceResult<u32> {
        Ok(self.graph(program, graph_index)?.nodes.len() as u32)
    }

    fn num_entrypoints(&self, program: GraphProgramHandle, graph_index: u32) -> DeviceResult<u32> {
        Ok(self.graph(program, graph_index)?.entrypoints.len() as u32)
    }

    fn node_id(
        &self,
        program: GraphProgramHandle,
        graph_index: u32,
        node_index: u32,
    ) -> DeviceResult<NodeId> {
        Ok(self.node(program, graph_index, node_index)?.id.clone())
    }

    fn node_local_root_arguments_table_index(
        &self,
        program: GraphProgramHandle,
        graph_index: u32,
        node_index: u32,
    ) -> DeviceResult<Option<u32>> {
        Ok(self
            .node(program, graph_index, node_index)?
            .local_root_arguments_table_index)
    }

    fn entrypoint_id(
        &self,
        program: GraphProgramHandle,
        graph_index: u32,
        entrypoint_index: u32,
    ) -> DeviceResult<NodeId> {
        Ok(self
            .entrypoint(program, graph_index, entrypoint_index)?
            .id
            .clone())
    }

    fn entrypoint_record_size(
        &self,
        program: GraphProgramHandle,
        graph_index: u32,
        entrypoint_index: u32,
    ) -> DeviceResult<u32> {
        Ok(self
            .entrypoint(program, graph_index, entrypoint_index)?
            .record_size_in_bytes)
    }

    fn set_root_unordered_access_view(
        &mut self,
        slot: u32,
        buffer: BufferHandle,
    ) -> DeviceResult<()> {
        self.buffer(buffer)?;
        self.root_uavs.insert(slot, buffer);
        Ok(())
    }

    fn dispatch_graph(
        &mut self,
        binding: &WorkGraphBinding,
        inputs: &GraphInputs,
    ) -> DeviceResult<()> {
        if !self.supports_work_graphs {
            return Err(DeviceError::FeatureNotSupported);
        }
        self.validate_binding(binding)?;
        if binding.flags.contains(WorkGraphFlags::INITIALIZE) {
            self.initialized_backings
                .insert(binding.backing_memory.start_address);
        }

        let heads = self.collect_record_heads(binding.program, inputs)?;
        let output = *self.root_uavs.get(&0).ok_or_else(|| {
            DeviceError::OperationFailed("no root UAV bound at slot 0".to_string())
        })?;
        log::trace!(
            "dummy device: dispatch graph program {:?}, {} records",
            binding.program,
            heads.len()
        );
        for (i, head) in heads.iter().enumerate() {
            self.write_buffer(output, i as u64 * 4, &head.to_le_bytes())?;
        }
        Ok(())
    }

    fn flush_and_wait(&mut self) -> DeviceResult<()> {
        // All work completes synchronously; only the device-removed check
        // remains.
        if self.device_lost {
            return Err(DeviceError::DeviceLost);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::{BufferUsage, GpuAddressRange, HeapKind};
    use super::*;
    use crate::compiler::ShaderCompiler;
    use crate::compiler::GraphLibrary;

    fn test_library() -> GraphLibrary {
        let source = r#"
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
        ShaderCompiler::new().compile_library(source, &[]).unwrap()
    }

    fn uav_descriptor(size: u64) -> BufferDescriptor {
        BufferDescriptor {
            label: Some("test uav".to_string()),
            size,
            usage: BufferUsage::UNORDERED_ACCESS | BufferUsage::COPY_SRC,
            heap: HeapKind::Default,
        }
    }

    #[test]
    fn test_buffer_round_trip() {
        let mut device = DummyDevice::new();
        let buffer = device.create_buffer(&uav_descriptor(16)).unwrap();
        device.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        let data = device.read_buffer(buffer, 0, 16).unwrap();
        assert_eq!(&data[4..8], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_gpu_addresses_are_unique_and_aligned() {
        let mut device = DummyDevice::new();
        let a = device.create_buffer(&uav_descriptor(100)).unwrap();
        let b = device.create_buffer(&uav_descriptor(100)).unwrap();
        let addr_a = device.buffer_gpu_address(a).unwrap();
        let addr_b = device.buffer_gpu_address(b).unwrap();
        assert_ne!(addr_a, addr_b);
        assert_eq!(addr_a % GPU_ADDRESS_ALIGNMENT, 0);
        assert_eq!(addr_b % GPU_ADDRESS_ALIGNMENT, 0);
    }

    #[test]
    fn test_allocation_limit() {
        let mut device = DummyDevice::new();
        device.set_allocation_limit(Some(1024));
        let err = device.create_buffer(&uav_descriptor(4096)).unwrap_err();
        assert_eq!(err, DeviceError::ResourceExhausted { size: 4096 });
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_program_reflection() {
        let mut device = DummyDevice::new();
        let library = test_library();
        let program = device
            .create_graph_program(&GraphProgramDescriptor {
                library: &library,
                use_collections: false,
            })
            .unwrap();

        let index = device.work_graph_index(program, "TestGraph").unwrap();
        assert_eq!(index, 0);
        assert_eq!(device.num_nodes(program, index).unwrap(), 3);
        assert_eq!(device.num_entrypoints(program, index).unwrap(), 1);
        assert_eq!(
            device.node_id(program, index, 0).unwrap(),
            NodeId::new("entryNode", 0)
        );
        assert_eq!(
            device
                .node_local_root_arguments_table_index(program, index, 0)
                .unwrap(),
            Some(0)
        );
        assert_eq!(
            device
                .node_local_root_arguments_table_index(program, index, 2)
                .unwrap(),
            None
        );
        assert_eq!(device.entrypoint_record_size(program, index, 0).unwrap(), 8);
    }

    #[test]
    fn test_unknown_graph_name() {
        let mut device = DummyDevice::new();
        let library = test_library();
        let program = device
            .create_graph_program(&GraphProgramDescriptor {
                library: &library,
                use_collections: false,
            })
            .unwrap();
        let err = device.work_graph_index(program, "NoSuchGraph").unwrap_err();
        assert_eq!(err, DeviceError::Resolution("NoSuchGraph".to_string()));
    }

    #[test]
    fn test_no_work_graph_support() {
        let mut device = DummyDevice::without_work_graphs();
        let library = test_library();
        let err = device
            .create_graph_program(&GraphProgramDescriptor {
                library: &library,
                use_collections: false,
            })
            .unwrap_err();
        assert_eq!(err, DeviceError::FeatureNotSupported);
    }

    #[test]
    fn test_dispatch_requires_initialized_backing() {
        let mut device = DummyDevice::new();
        let library = test_library();
        let program = device
            .create_graph_program(&GraphProgramDescriptor {
                library: &library,
                use_collections: false,
            })
            .unwrap();
        let index = device.work_graph_index(program, "TestGraph").unwrap();
        let requirements = device.memory_requirements(program, index).unwrap();

        let backing = device
            .create_buffer(&uav_descriptor(requirements.max_size_in_bytes))
            .unwrap();
        let output = device.create_buffer(&uav_descriptor(64)).unwrap();
        device.set_root_unordered_access_view(0, output).unwrap();

        let table = device.create_buffer(&uav_descriptor(16)).unwrap();
        let binding = WorkGraphBinding {
            program,
            identifier: device.program_identifier(program, "TestGraph").unwrap(),
            flags: WorkGraphFlags::NONE,
            backing_memory: GpuAddressRange {
                start_address: device.buffer_gpu_address(backing).unwrap(),
                size_in_bytes: requirements.max_size_in_bytes,
            },
            local_root_arguments_table: Some(super::super::types::GpuAddressRangeAndStride {
                start_address: device.buffer_gpu_address(table).unwrap(),
                size_in_bytes: 16,
                stride_in_bytes: 4,
            }),
        };
        let inputs = GraphInputs::NodeCpu(NodeCpuInput {
            entrypoint_index: 0,
            num_records: 1,
            record_stride_in_bytes: 8,
            records: vec![0; 8],
        });

        let err = device.dispatch_graph(&binding, &inputs).unwrap_err();
        assert!(matches!(err, DeviceError::OperationFailed(_)));

        let binding = WorkGraphBinding {
            flags: WorkGraphFlags::INITIALIZE,
            ..binding
        };
        device.dispatch_graph(&binding, &inputs).unwrap();

        // Once initialized, later dispatches may omit the flag.
        let binding = WorkGraphBinding {
            flags: WorkGraphFlags::NONE,
            ..binding
        };
        device.dispatch_graph(&binding, &inputs).unwrap();
    }

    #[test]
    fn test_dispatch_writes_record_heads() {
        let mut device = DummyDevice::new();
        let library = test_library();
        let program = device
            .create_graph_program(&GraphProgramDescriptor {
                library: &library,
                use_collections: false,
            })
            .unwrap();
        let index = device.work_graph_index(program, "TestGraph").unwrap();
        let requirements = device.memory_requirements(program, index).unwrap();

        let backing = device
            .create_buffer(&uav_descriptor(requirements.max_size_in_bytes))
            .unwrap();
        let table = device.create_buffer(&uav_descriptor(16)).unwrap();
        let output = device.create_buffer(&uav_descriptor(64)).unwrap();
        device.set_root_unordered_access_view(0, output).unwrap();

        let mut records = Vec::new();
        for value in [7u32, 11, 13] {
            records.extend_from_slice(&value.to_le_bytes());
            records.extend_from_slice(&3u32.to_le_bytes());
        }
        let binding = WorkGraphBinding {
            program,
            identifier: device.program_identifier(program, "TestGraph").unwrap(),
            flags: WorkGraphFlags::INITIALIZE,
            backing_memory: GpuAddressRange {
                start_address: device.buffer_gpu_address(backing).unwrap(),
                size_in_bytes: requirements.max_size_in_bytes,
            },
            local_root_arguments_table: Some(super::super::types::GpuAddressRangeAndStride {
                start_address: device.buffer_gpu_address(table).unwrap(),
                size_in_bytes: 16,
                stride_in_bytes: 4,
            }),
        };
        device
            .dispatch_graph(
                &binding,
                &GraphInputs::NodeCpu(NodeCpuInput {
                    entrypoint_index: 0,
                    num_records: 3,
                    record_stride_in_bytes: 8,
                    records,
                }),
            )
            .unwrap();
        device.flush_and_wait().unwrap();

        let data = device.read_buffer(output, 0, 12).unwrap();
        let words: Vec<u32> = data
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(words, vec![7, 11, 13]);
    }

    #[test]
    fn test_device_loss_surfaces_on_flush() {
        let mut device = DummyDevice::new();
        device.flush_and_wait().unwrap();
        device.simulate_device_loss();
        assert_eq!(device.flush_and_wait().unwrap_err(), DeviceError::DeviceLost);
    }
}
