//! Graph input record generation and staging.
//!
//! Input records are generated per entrypoint from its reflected record
//! size: the first `u32` of each record is the record's index, every
//! further `u32` is filled with 3. Record strides are the record size
//! rounded up to whole `u32`s.
//!
//! [`stage_inputs`] then turns the records into one of the four dispatch
//! input modes: host records for a single entrypoint or for all of them,
//! or the same two shapes with the records and their descriptors resident
//! in GPU memory.

use bytemuck::bytes_of;

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, Device, DeviceResult, GraphInputs, HeapKind,
    MultiNodeGpuInput, NodeCpuInput, NodeGpuInput,
};

use super::context::WorkGraphContext;

/// Filler for every record word past the leading index.
const RECORD_FILL_WORD: u32 = 3;

/// Round a record size up to whole `u32`s.
fn record_stride(record_size_in_bytes: u32) -> u32 {
    record_size_in_bytes.div_ceil(4) * 4
}

/// Generate `num_records` input records for every entrypoint of the graph.
pub fn build_entrypoint_records(
    device: &dyn Device,
    context: &WorkGraphContext,
    num_records: u32,
) -> DeviceResult<Vec<NodeCpuInput>> {
    let mut inputs = Vec::with_capacity(context.num_entrypoints() as usize);
    for entrypoint_index in 0..context.num_entrypoints() {
        let record_size = device.entrypoint_record_size(
            context.program(),
            context.graph_index(),
            entrypoint_index,
        )?;
        let stride = record_stride(record_size);

        let mut records = Vec::with_capacity((num_records * stride) as usize);
        for record_index in 0..num_records {
            for word in 0..stride / 4 {
                let value = if word == 0 {
                    record_index
                } else {
                    RECORD_FILL_WORD
                };
                records.extend_from_slice(&value.to_le_bytes());
            }
        }
        inputs.push(NodeCpuInput {
            entrypoint_index,
            num_records,
            record_stride_in_bytes: stride,
            records,
        });
    }
    Ok(inputs)
}

/// Staged dispatch inputs plus the transient GPU buffers backing them.
///
/// The buffers must outlive the dispatch; release them with
/// [`destroy`](Self::destroy) after the queue has drained.
pub struct StagedInputs {
    pub inputs: GraphInputs,
    staging: Vec<BufferHandle>,
}

impl StagedInputs {
    pub fn destroy(self, device: &mut dyn Device) {
        for buffer in self.staging {
            device.destroy_buffer(buffer);
        }
    }
}

/// Turn per-entrypoint records into dispatch inputs.
///
/// With `from_gpu_memory` unset the records are handed over from host
/// memory as-is. Otherwise the records and their input descriptors are
/// uploaded into GPU buffers first and the dispatch references them by
/// address.
pub fn stage_inputs(
    device: &mut dyn Device,
    node_inputs: Vec<NodeCpuInput>,
    from_gpu_memory: bool,
) -> DeviceResult<StagedInputs> {
    if !from_gpu_memory {
        let inputs = if node_inputs.len() == 1 {
            let mut node_inputs = node_inputs;
            GraphInputs::NodeCpu(node_inputs.remove(0))
        } else {
            GraphInputs::MultiNodeCpu(node_inputs)
        };
        return Ok(StagedInputs {
            inputs,
            staging: Vec::new(),
        });
    }

    let mut staging = Vec::new();
    let result = stage_gpu_inputs(device, &node_inputs, &mut staging);
    match result {
        Ok(inputs) => Ok(StagedInputs { inputs, staging }),
        Err(err) => {
            for buffer in staging {
                device.destroy_buffer(buffer);
            }
            Err(err)
        }
    }
}

fn stage_gpu_inputs(
    device: &mut dyn Device,
    node_inputs: &[NodeCpuInput],
    staging: &mut Vec<BufferHandle>,
) -> DeviceResult<GraphInputs> {
    let mut descriptors = Vec::with_capacity(node_inputs.len());
    for input in node_inputs {
        let records_address = if input.records.is_empty() {
            0
        } else {
            let buffer = upload(device, "graph input records", &input.records, staging)?;
            device.buffer_gpu_address(buffer)?
        };
        descriptors.push(NodeGpuInput {
            entrypoint_index: input.entrypoint_index,
            num_records: input.num_records,
            records_address,
            record_stride_in_bytes: input.record_stride_in_bytes as u64,
        });
    }

    if descriptors.len() == 1 {
        let buffer = upload(
            device,
            "graph input descriptor",
            bytes_of(&descriptors[0]),
            staging,
        )?;
        return Ok(GraphInputs::NodeGpu {
            descriptor_address: device.buffer_gpu_address(buffer)?,
        });
    }

    let array = upload(
        device,
        "graph input descriptors",
        bytemuck::cast_slice(&descriptors),
        staging,
    )?;
    let multi = MultiNodeGpuInput {
        num_node_inputs: descriptors.len() as u32,
        _padding: 0,
        node_inputs_address: device.buffer_gpu_address(array)?,
        node_input_stride_in_bytes: std::mem::size_of::<NodeGpuInput>() as u64,
    };
    let buffer = upload(device, "multi graph input descriptor", bytes_of(&multi), staging)?;
    Ok(GraphInputs::MultiNodeGpu {
        descriptor_address: device.buffer_gpu_address(buffer)?,
    })
}

fn upload(
    device: &mut dyn Device,
    label: &str,
    data: &[u8],
    staging: &mut Vec<BufferHandle>,
) -> DeviceResult<BufferHandle> {
    let buffer = device.create_buffer_init(
        &BufferDescriptor {
            label: Some(label.to_string()),
            size: data.len() as u64,
            usage: BufferUsage::COPY_DST,
            heap: HeapKind::Default,
        },
        data,
    )?;
    staging.push(buffer);
    Ok(buffer)
}
