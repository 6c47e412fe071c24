//! The device facade trait.
//!
//! [`Device`] is the single seam between the sandbox and a GPU backend. It
//! deliberately mirrors the surface a native work-graph sample consumes:
//! committed buffer creation, GPU virtual address queries, program object
//! creation and reflection, root bindings, graph dispatch, and a blocking
//! submit-and-wait.
//!
//! The model is single-threaded and synchronous: every call blocks the
//! calling thread until the backend accepts it, and [`Device::flush_and_wait`]
//! fully drains the queue. Setup uploads are ordered against the dispatch
//! that references them by draining the queue in between rather than
//! pipelining.

use crate::compiler::GraphLibrary;

use super::error::DeviceResult;
use super::types::{
    BufferDescriptor, BufferHandle, GpuAddress, GraphInputs, GraphProgramHandle,
    MemoryRequirements, NodeId, ProgramIdentifier, WorkGraphBinding,
};

/// Descriptor for creating a graph program object from a compiled library.
///
/// The program registers under the name the library itself declares
/// ([`GraphLibrary::graph_name`]); callers resolve it afterwards by name
/// and get a resolution error on a mismatch.
#[derive(Debug, Clone, Copy)]
pub struct GraphProgramDescriptor<'a> {
    /// The compiled shader library containing the node shaders.
    pub library: &'a GraphLibrary,
    /// Compile the node shaders into a collection object first and include
    /// the existing collection in the executable. Functionally identical;
    /// exists to exercise the cost-spreading path of the native API.
    pub use_collections: bool,
}

/// Graphics device facade.
///
/// Implemented by real backends and by [`DummyDevice`](super::DummyDevice)
/// for GPU-less runs. All failures surface as
/// [`DeviceError`](super::DeviceError) values; implementations must not
/// panic on bad input.
pub trait Device {
    /// Whether the device reports hardware/driver support for work-graph
    /// execution.
    fn supports_work_graphs(&self) -> bool;

    // Resources

    /// Create a committed buffer.
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> DeviceResult<BufferHandle>;

    /// Create a committed buffer and synchronously upload initial data.
    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> DeviceResult<BufferHandle>;

    /// Query a buffer's GPU virtual address.
    fn buffer_gpu_address(&self, buffer: BufferHandle) -> DeviceResult<GpuAddress>;

    /// Write data into a buffer at the given offset.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> DeviceResult<()>;

    /// Copy the full contents of one buffer into another of equal size.
    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle) -> DeviceResult<()>;

    /// Read back data from a buffer. Callers copy into a readback-heap
    /// buffer first; reading a device-local buffer directly is a backend
    /// convenience, not a guarantee.
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> DeviceResult<Vec<u8>>;

    /// Destroy a buffer.
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // Program objects and reflection

    /// Create a graph program object from a compiled library.
    fn create_graph_program(
        &mut self,
        desc: &GraphProgramDescriptor<'_>,
    ) -> DeviceResult<GraphProgramHandle>;

    /// Destroy a program object, invalidating its handle and identifier.
    fn destroy_graph_program(&mut self, program: GraphProgramHandle);

    /// Resolve the dispatch-time identifier of a named graph program.
    fn program_identifier(
        &self,
        program: GraphProgramHandle,
        name: &str,
    ) -> DeviceResult<ProgramIdentifier>;

    /// Resolve a named graph's index within the program's graph table.
    /// Distinct from the program identifier; used for all per-graph queries.
    fn work_graph_index(&self, program: GraphProgramHandle, name: &str) -> DeviceResult<u32>;

    /// Query the backing memory requirements of a graph.
    fn memory_requirements(
        &self,
        program: GraphProgramHandle,
        graph_index: u32,
    ) -> DeviceResult<MemoryRequirements>;

    /// Number of nodes in a graph.
    fn num_nodes(&self, program: GraphProgramHandle, graph_index: u32) -> DeviceResult<u32>;

    /// Number of entrypoints (nodes reachable directly from host-issued
    /// input records) in a graph.
    fn num_entrypoints(&self, program: GraphProgramHandle, graph_index: u32) -> DeviceResult<u32>;

    /// Identity of a node.
    fn node_id(
        &self,
        program: GraphProgramHandle,
        graph_index: u32,
        node_index: u32,
    ) -> DeviceResult<NodeId>;

    /// A node's slot in the local-root-arguments table, or `None` when the
    /// node declares no local root arguments.
    fn node_local_root_arguments_table_index(
        &self,
        program: GraphProgramHandle,
        graph_index: u32,
        node_index: u32,
    ) -> DeviceResult<Option<u32>>;

    /// Identity of an entrypoint.
    fn entrypoint_id(
        &self,
        program: GraphProgramHandle,
        graph_index: u32,
        entrypoint_index: u32,
    ) -> DeviceResult<NodeId>;

    /// Size in bytes of one input record for an entrypoint.
    fn entrypoint_record_size(
        &self,
        program: GraphProgramHandle,
        graph_index: u32,
        entrypoint_index: u32,
    ) -> DeviceResult<u32>;

    // Execution

    /// Bind a buffer as the root unordered-access view at the given slot for
    /// subsequent dispatches.
    fn set_root_unordered_access_view(
        &mut self,
        slot: u32,
        buffer: BufferHandle,
    ) -> DeviceResult<()>;

    /// Record and submit a graph dispatch using a previously built binding.
    fn dispatch_graph(
        &mut self,
        binding: &WorkGraphBinding,
        inputs: &GraphInputs,
    ) -> DeviceResult<()>;

    /// Drain the command queue: submit pending work, wait on the completion
    /// fence, and check the device-removed status. A hung device is only
    /// detected here, after the fact, and is fatal.
    fn flush_and_wait(&mut self) -> DeviceResult<()>;
}
