use crate::{
    tree::{BoundingBox, LeafLayer},
    Error, Result,
};
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    start: u32,
    chunk: u32,
    workgroups: u32,
    _pad: u32,
}

/// Returns the processed leaf scan shader for the given layout.
#[inline]
pub fn leaf_scan_shader(dims: usize, degree: usize, workgroup_size: u32) -> String {
    include_str!("leaf_scan.wgsl")
        .replace("#WORKGROUP_SIZE", &(workgroup_size.to_string() + "u"))
        .replace("#DIMS", &(dims.to_string() + "u"))
        .replace("#DEGREE", &(degree.to_string() + "u"))
}

/// Runs `f` inside validation and out-of-memory error scopes and reports a captured error as
/// [`Error::Device`].
pub(crate) fn checked<T>(device: &wgpu::Device, what: &str, f: impl FnOnce() -> T) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = pollster::block_on(device.pop_error_scope());
    let memory = pollster::block_on(device.pop_error_scope());

    match validation.or(memory) {
        Some(error) => Err(Error::Device(format!("{what}: {error}"))),
        None => Ok(value),
    }
}

/// All the `wgpu` resources of a search session: the resident leaf layer, the per-jump inputs,
/// the per-group counters and the scan pipeline.
pub struct WgpuResources {
    buffer_boundary: wgpu::Buffer,
    buffer_counts: wgpu::Buffer,
    buffer_query: wgpu::Buffer,
    buffer_params: wgpu::Buffer,
    buffer_hits: wgpu::Buffer,
    buffer_visits: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    pipeline: wgpu::ComputePipeline,
    workgroups: u32,
    leaf_count: u32,
}

impl WgpuResources {
    /// Copies `leaves` to the device and creates the scan pipeline.
    pub fn new<const D: usize>(
        device: &wgpu::Device,
        leaves: &LeafLayer<D>,
        workgroups: u32,
    ) -> Result<Self> {
        let limits = device.limits();
        let boundary_size = std::mem::size_of_val(leaves.boundary()) as u64;
        if boundary_size > u64::from(limits.max_storage_buffer_binding_size) {
            return Err(Error::Device(format!(
                "leaf layer of {boundary_size} bytes exceeds the device storage binding limit of {}",
                limits.max_storage_buffer_binding_size
            )));
        }
        if workgroups > limits.max_compute_workgroups_per_dimension {
            return Err(Error::Device(format!(
                "{workgroups} work-groups exceed the device limit of {}",
                limits.max_compute_workgroups_per_dimension
            )));
        }

        let workgroup_size = leaves.degree().next_power_of_two() as u32;
        let counters = vec![0u32; workgroups as usize];

        checked(device, "staging leaf layer", || {
            let storage = |label: &str, contents: &[u8]| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                })
            };
            let counter = |label: &str| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(&counters),
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC,
                })
            };

            let buffer_boundary = storage("Boundary buffer", bytemuck::cast_slice(leaves.boundary()));
            let buffer_counts = storage("Counts buffer", bytemuck::cast_slice(leaves.counts()));
            let buffer_query = storage("Query buffer", bytemuck::cast_slice(&vec![0.0f32; 2 * D]));
            let buffer_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Params buffer"),
                contents: bytemuck::bytes_of(&<Params as bytemuck::Zeroable>::zeroed()),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            let buffer_hits = counter("Hits buffer");
            let buffer_visits = counter("Visits buffer");

            let entry = |binding, ty| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty,
                count: None,
            };
            let storage_ty = |read_only| wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            };
            let bind_group_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Leaf scan layout"),
                    entries: &[
                        entry(0, storage_ty(true)),
                        entry(1, storage_ty(true)),
                        entry(2, storage_ty(true)),
                        entry(
                            3,
                            wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                        ),
                        entry(4, storage_ty(false)),
                        entry(5, storage_ty(false)),
                    ],
                });

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Leaf scan bind group"),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer_boundary.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: buffer_counts.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: buffer_query.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: buffer_params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: buffer_hits.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: buffer_visits.as_entire_binding(),
                    },
                ],
            });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Leaf scan pipeline layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Leaf scan shader"),
                source: wgpu::ShaderSource::Wgsl(
                    leaf_scan_shader(D, leaves.degree(), workgroup_size).into(),
                ),
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Leaf scan pipeline"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: "main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });

            Self {
                buffer_boundary,
                buffer_counts,
                buffer_query,
                buffer_params,
                buffer_hits,
                buffer_visits,
                bind_group,
                pipeline,
                workgroups,
                leaf_count: leaves.len() as u32,
            }
        })
    }

    /// Number of resident leaf nodes.
    #[inline]
    pub fn leaf_count(&self) -> u32 {
        self.leaf_count
    }

    /// Size in bytes of the resident leaf layer.
    #[inline]
    pub fn resident_size(&self) -> u64 {
        self.buffer_boundary.size() + self.buffer_counts.size()
    }

    /// Scans leaf nodes `start..start + chunk` against `query` and waits for completion.
    pub fn scan<const D: usize>(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        query: &BoundingBox<[f32; D]>,
        start: u32,
        chunk: u32,
    ) -> Result<()> {
        let bounds: Vec<f32> = query.min.iter().chain(&query.max).copied().collect();
        let params = Params {
            start,
            chunk,
            workgroups: self.workgroups,
            _pad: 0,
        };

        checked(device, "scanning leaf nodes", || {
            queue.write_buffer(&self.buffer_query, 0, bytemuck::cast_slice(&bounds));
            queue.write_buffer(&self.buffer_params, 0, bytemuck::bytes_of(&params));

            let mut encoder =
                device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
            encoder.push_debug_group("Scan leaf nodes");
            {
                let mut compute_pass =
                    encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
                compute_pass.set_pipeline(&self.pipeline);
                compute_pass.set_bind_group(0, &self.bind_group, &[]);
                compute_pass.dispatch_workgroups(self.workgroups, 1, 1);
            }
            encoder.pop_debug_group();

            queue.submit([encoder.finish()]);
            device.poll(wgpu::Maintain::Wait);
        })
    }

    /// Zeroes the per-group counters.
    pub fn reset_counters(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<()> {
        let zeros = vec![0u32; self.workgroups as usize];
        checked(device, "resetting counters", || {
            queue.write_buffer(&self.buffer_hits, 0, bytemuck::cast_slice(&zeros));
            queue.write_buffer(&self.buffer_visits, 0, bytemuck::cast_slice(&zeros));
            queue.submit(std::iter::empty());
        })
    }

    /// Reads the per-group hit and visit counters back from the device.
    pub async fn read_counters(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<(Vec<u32>, Vec<u32>)> {
        let size = self.buffer_hits.size();
        let buffer_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging buffer"),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            size: 2 * size,
            mapped_at_creation: false,
        });

        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(&self.buffer_hits, 0, &buffer_staging, 0, size);
        encoder.copy_buffer_to_buffer(&self.buffer_visits, 0, &buffer_staging, size, size);
        queue.submit([encoder.finish()]);

        let (sender, receiver) = flume::bounded(1);

        let buffer = buffer_staging.slice(..);
        buffer.map_async(wgpu::MapMode::Read, move |r| {
            // The receiver outlives the mapping, a failed send only means it was dropped early.
            let _ = sender.send(r);
        });

        device.poll(wgpu::Maintain::Wait);
        receiver
            .recv_async()
            .await
            .map_err(|e| Error::Device(format!("counter readback was cancelled: {e}")))?
            .map_err(|e| Error::Device(format!("could not map counters: {e}")))?;

        let view = buffer.get_mapped_range();
        let counters: &[u32] = bytemuck::cast_slice(&view);
        let workgroups = self.workgroups as usize;
        let output = (
            counters[..workgroups].to_vec(),
            counters[workgroups..2 * workgroups].to_vec(),
        );

        drop(view);
        buffer_staging.unmap();

        Ok(output)
    }
}

impl std::fmt::Debug for WgpuResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuResources")
            .field("workgroups", &self.workgroups)
            .field("leaf_count", &self.leaf_count)
            .field("resident_size", &self.resident_size())
            .finish_non_exhaustive()
    }
}
