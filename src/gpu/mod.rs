//! Leaf scanning on the GPU with [wgpu](https://github.com/gfx-rs/wgpu).

mod resources;

pub use resources::*;

use crate::{
    compute_method::{GroupCounters, LeafScanner},
    tree::{BoundingBox, LeafLayer},
    Error, Result,
};

/// Requests a [`wgpu::Device`] and its [`wgpu::Queue`] from the default adapter.
///
/// Fails with [`Error::Device`] when no adapter is available.
pub async fn request_device() -> Result<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::default();

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            ..Default::default()
        })
        .await
        .ok_or_else(|| Error::Device("no compatible adapter found".into()))?;

    log::info!("Using adapter {:?}", adapter.get_info().name);

    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
            },
            None,
        )
        .await
        .map_err(|e| Error::Device(format!("could not open device: {e}")))
}

/// Leaf scanner dispatching one compute pass per scan on a [`wgpu::Device`].
///
/// The leaf layer stays resident on the device from [`LeafScanner::stage`] until the scanner is
/// dropped or staged again. Each scan writes the query and the node range, dispatches
/// `workgroups` work-groups of `degree.next_power_of_two()` invocations and blocks until the
/// device is idle.
pub struct GpuScanner<'a> {
    /// [`wgpu::Device`] used for the computation.
    pub device: &'a wgpu::Device,
    /// [`wgpu::Queue`] used for the computation.
    pub queue: &'a wgpu::Queue,
    workgroups: u32,
    resources: Option<WgpuResources>,
}

impl<'a> GpuScanner<'a> {
    /// Creates a new [`GpuScanner`] dispatching `workgroups` work-groups per scan.
    #[inline]
    pub fn new(device: &'a wgpu::Device, queue: &'a wgpu::Queue, workgroups: u32) -> Self {
        Self {
            device,
            queue,
            workgroups,
            resources: None,
        }
    }

    /// Device resources of the staged leaf layer, if any.
    #[inline]
    pub fn resources(&self) -> Option<&WgpuResources> {
        self.resources.as_ref()
    }

    fn staged(&self, start: u32, chunk: u32) -> Result<&WgpuResources> {
        let resources = self
            .resources
            .as_ref()
            .ok_or_else(|| Error::Device("no leaf layer staged".into()))?;

        if u64::from(start) + u64::from(chunk) > u64::from(resources.leaf_count()) {
            return Err(Error::Device(format!(
                "scan of leaf nodes {start}..{} exceeds the {} staged nodes",
                u64::from(start) + u64::from(chunk),
                resources.leaf_count()
            )));
        }
        Ok(resources)
    }
}

impl<const D: usize> LeafScanner<D> for GpuScanner<'_> {
    fn stage(&mut self, leaves: &LeafLayer<D>) -> Result<()> {
        // Release the previous copy before allocating the new one.
        self.resources = None;

        let resources = WgpuResources::new(self.device, leaves, self.workgroups)?;
        log::debug!(
            "Leaf layer resident on device: {} nodes, {} bytes",
            resources.leaf_count(),
            resources.resident_size()
        );
        self.resources = Some(resources);
        Ok(())
    }

    #[inline]
    fn workgroups(&self) -> u32 {
        self.workgroups
    }

    fn scan(&mut self, query: &BoundingBox<[f32; D]>, start: u32, chunk: u32) -> Result<()> {
        self.staged(start, chunk)?
            .scan(self.device, self.queue, query, start, chunk)
    }

    fn counters(&mut self) -> Result<GroupCounters> {
        let resources = self.staged(0, 0)?;
        let (hits, visits) = pollster::block_on(resources.read_counters(self.device, self.queue))?;
        Ok(GroupCounters { hits, visits })
    }

    fn reset_counters(&mut self) -> Result<()> {
        self.staged(0, 0)?.reset_counters(self.device, self.queue)
    }
}

impl std::fmt::Debug for GpuScanner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuScanner")
            .field("workgroups", &self.workgroups)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}
