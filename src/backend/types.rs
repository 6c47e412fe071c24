//! Types shared between the sandbox and device backends.

use std::fmt;

use bytemuck::{Pod, Zeroable};

/// GPU virtual address.
pub type GpuAddress = u64;

/// Sentinel marking an unused slot in the local-root-arguments table.
///
/// Matches the all-bits-set convention of the native API: a node whose
/// local-arguments slot was never populated reads this value.
pub const LOCAL_ROOT_ARGS_UNUSED: u32 = u32::MAX;

/// Handle to a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a compiled, loaded graph program inside a larger state object.
///
/// Created once after the shader library and graph subobject are registered
/// with the device; immutable thereafter. Invalidated when the owning
/// program object is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphProgramHandle(pub(crate) u64);

/// Dispatch-time program identifier, resolved from the program name.
///
/// Opaque to the host; only meaningful to the device that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramIdentifier(pub(crate) u64);

/// GPU-visible scratch space requirements for running a graph.
///
/// Queried once per graph, read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryRequirements {
    /// Minimum backing memory the execution engine can run with.
    pub min_size_in_bytes: u64,
    /// Backing memory size at which adding more gains nothing.
    pub max_size_in_bytes: u64,
    /// Valid sizes between min and max step by this granularity.
    pub size_granularity_in_bytes: u64,
}

/// A range of GPU virtual address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuAddressRange {
    pub start_address: GpuAddress,
    pub size_in_bytes: u64,
}

/// A range of GPU virtual address space with a fixed record stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuAddressRangeAndStride {
    pub start_address: GpuAddress,
    pub size_in_bytes: u64,
    pub stride_in_bytes: u64,
}

/// Identity of a node within a graph program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    /// Node name as registered in the shader library.
    pub name: String,
    /// Array index for arrayed nodes; zero for plain nodes.
    pub array_index: u32,
}

impl NodeId {
    pub fn new(name: impl Into<String>, array_index: u32) -> Self {
        Self {
            name: name.into(),
            array_index,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.array_index != 0 {
            write!(f, "({},{})", self.name, self.array_index)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Buffer usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const NONE: Self = Self(0);
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    /// Unordered (read/write) access by the execution engine.
    pub const UNORDERED_ACCESS: Self = Self(1 << 2);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Memory heap a buffer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeapKind {
    /// Device-local memory.
    #[default]
    Default,
    /// Host-visible memory for CPU-to-GPU transfers.
    Upload,
    /// Host-visible memory for GPU-to-CPU readback.
    Readback,
}

/// Buffer descriptor.
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub heap: HeapKind,
}

impl Default for BufferDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: 0,
            usage: BufferUsage::NONE,
            heap: HeapKind::Default,
        }
    }
}

/// Behavior flags for a work-graph program binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGraphFlags(u32);

impl WorkGraphFlags {
    pub const NONE: Self = Self(0);
    /// Ask the execution engine to (re)initialize the backing memory before
    /// running the graph. Required the first time a backing allocation is
    /// used, and whenever the graph's internal state has changed since the
    /// last run; reusing stale backing memory without it is a correctness
    /// bug, not an optimization miss.
    pub const INITIALIZE: Self = Self(1 << 0);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for WorkGraphFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// The complete, immutable bundle a graph dispatch command consumes.
///
/// Produced by [`WorkGraphContext::initialize`](crate::graph::WorkGraphContext::initialize);
/// everything the device needs to issue a dispatch for one graph program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGraphBinding {
    pub program: GraphProgramHandle,
    pub identifier: ProgramIdentifier,
    pub flags: WorkGraphFlags,
    pub backing_memory: GpuAddressRange,
    /// Absent when no node in the graph declares local root arguments.
    pub local_root_arguments_table: Option<GpuAddressRangeAndStride>,
}

/// Host-supplied input records for one graph entrypoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCpuInput {
    /// Index of the entrypoint these records feed.
    pub entrypoint_index: u32,
    /// Number of records in `records`.
    pub num_records: u32,
    /// Distance between successive records, in bytes.
    pub record_stride_in_bytes: u32,
    /// Raw record data, `num_records * record_stride_in_bytes` bytes.
    pub records: Vec<u8>,
}

/// GPU-resident input record descriptor for one entrypoint.
///
/// Written verbatim into device memory when graph inputs are fed from GPU
/// buffers, so the layout is part of the device ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct NodeGpuInput {
    pub entrypoint_index: u32,
    pub num_records: u32,
    pub records_address: GpuAddress,
    pub record_stride_in_bytes: u64,
}

/// GPU-resident descriptor for feeding multiple entrypoints at once.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct MultiNodeGpuInput {
    pub num_node_inputs: u32,
    pub _padding: u32,
    pub node_inputs_address: GpuAddress,
    pub node_input_stride_in_bytes: u64,
}

/// Graph dispatch inputs, covering the four dispatch modes of the native
/// API: records handed over from host memory or already resident in GPU
/// memory, for a single entrypoint or several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphInputs {
    NodeCpu(NodeCpuInput),
    MultiNodeCpu(Vec<NodeCpuInput>),
    /// Address of a [`NodeGpuInput`] in device memory.
    NodeGpu { descriptor_address: GpuAddress },
    /// Address of a [`MultiNodeGpuInput`] in device memory.
    MultiNodeGpu { descriptor_address: GpuAddress },
}
