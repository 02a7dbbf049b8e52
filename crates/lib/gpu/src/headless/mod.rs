// Copyright (C) 2023-2024 gigablaster

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Device that runs everything on CPU.
//!
//! Command lists do nothing, only fences move. Queues can be paused to keep
//! work "in flight" and every submission is recorded, which is enough to
//! drive the frame loop without a GPU.

mod swapchain;
mod sync;

use std::{
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use arrayvec::ArrayVec;
use log::debug;

use crate::{
    AcquireStatus, BackendError, BackendResult, BufferDesc, Device, DsvDesc, Format,
    HeapProperties, MemoryRequest, MemoryRequirements, PresentStatus, QueueKind, RawResource,
    RtvDesc, SamplerDesc, SrvDesc, SrvDimension, SubmitBatch, TextureDesc, UavDesc,
};

pub use swapchain::HeadlessSwapchain;
pub use sync::{BatchRecord, HeadlessFence, HeadlessQueue};

use sync::PendingBatch;

const BUFFER_ALIGNMENT: u64 = 256;
const TEXTURE_ALIGNMENT: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessCommandList(u64);

impl HeadlessCommandList {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessBuffer {
    pub id: u64,
    pub desc: BufferDesc,
    pub sparse: bool,
}

#[derive(Debug, Clone)]
pub struct HeadlessTexture {
    pub id: u64,
    pub desc: TextureDesc,
    pub sparse: bool,
}

#[derive(Debug)]
pub struct HeadlessMemory {
    pub id: u64,
    pub size: u64,
    pub memory_types: u32,
}

#[derive(Debug)]
pub struct HeadlessView {
    pub id: u64,
    pub resource: u64,
}

#[derive(Debug)]
pub struct HeadlessSampler {
    pub id: u64,
    pub desc: SamplerDesc,
}

/// Objects created and not yet destroyed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LiveObjects {
    pub buffers: usize,
    pub textures: usize,
    pub memory: usize,
    pub views: usize,
    pub samplers: usize,
    pub fences: usize,
    pub swapchains: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessStats {
    pub views_created: u64,
    pub samplers_created: u64,
    pub submits: u64,
}

#[derive(Debug, Default)]
struct Counters {
    buffers: AtomicUsize,
    textures: AtomicUsize,
    memory: AtomicUsize,
    views: AtomicUsize,
    samplers: AtomicUsize,
    fences: AtomicUsize,
    swapchains: AtomicUsize,
    views_created: AtomicU64,
    samplers_created: AtomicU64,
    submits: AtomicU64,
}

fn inc(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::AcqRel);
}

fn dec(counter: &AtomicUsize) {
    counter.fetch_sub(1, Ordering::AcqRel);
}

#[derive(Debug)]
pub struct HeadlessDevice {
    queues: ArrayVec<HeadlessQueue, 3>,
    memory_types: Vec<HeapProperties>,
    next_id: AtomicU64,
    fail_submit: AtomicBool,
    counters: Counters,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Device with all queue kinds and memory layout of a typical discrete GPU.
    pub fn new() -> Self {
        Self {
            queues: QueueKind::ALL.into_iter().map(HeadlessQueue::new).collect(),
            memory_types: vec![
                HeapProperties::DEVICE_LOCAL,
                HeapProperties::HOST_VISIBLE | HeapProperties::HOST_COHERENT,
                HeapProperties::DEVICE_LOCAL
                    | HeapProperties::HOST_VISIBLE
                    | HeapProperties::HOST_COHERENT,
                HeapProperties::HOST_VISIBLE
                    | HeapProperties::HOST_COHERENT
                    | HeapProperties::HOST_CACHED,
            ],
            next_id: AtomicU64::new(1),
            fail_submit: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub fn with_memory_types(mut self, memory_types: &[HeapProperties]) -> Self {
        assert!(memory_types.len() <= 32, "At most 32 memory types supported");
        self.memory_types = memory_types.to_vec();
        self
    }

    pub fn with_queues(mut self, queues: &[QueueKind]) -> Self {
        self.queues = queues.iter().copied().map(HeadlessQueue::new).collect();
        self
    }

    pub fn command_list(&self) -> HeadlessCommandList {
        HeadlessCommandList(self.next_id())
    }

    /// Work submitted to a paused queue stays pending until `resume`.
    pub fn pause(&self, kind: QueueKind) {
        if let Some(queue) = self.find_queue(kind) {
            queue.set_paused(true);
        }
    }

    pub fn resume(&self, kind: QueueKind) {
        if let Some(queue) = self.find_queue(kind) {
            queue.set_paused(false);
        }
        self.execute();
    }

    /// Next `submit` call fails with device loss and records nothing.
    pub fn fail_next_submit(&self) {
        self.fail_submit.store(true, Ordering::Release);
    }

    /// Every submit call to the queue, batch by batch.
    pub fn submissions(&self, kind: QueueKind) -> Vec<Vec<BatchRecord>> {
        self.find_queue(kind)
            .map(HeadlessQueue::log)
            .unwrap_or_default()
    }

    pub fn live(&self) -> LiveObjects {
        let counters = &self.counters;
        LiveObjects {
            buffers: counters.buffers.load(Ordering::Acquire),
            textures: counters.textures.load(Ordering::Acquire),
            memory: counters.memory.load(Ordering::Acquire),
            views: counters.views.load(Ordering::Acquire),
            samplers: counters.samplers.load(Ordering::Acquire),
            fences: counters.fences.load(Ordering::Acquire),
            swapchains: counters.swapchains.load(Ordering::Acquire),
        }
    }

    pub fn stats(&self) -> HeadlessStats {
        let counters = &self.counters;
        HeadlessStats {
            views_created: counters.views_created.load(Ordering::Acquire),
            samplers_created: counters.samplers_created.load(Ordering::Acquire),
            submits: counters.submits.load(Ordering::Acquire),
        }
    }

    pub fn create_swapchain(
        &self,
        image_count: u32,
        format: Format,
        extent: [u32; 2],
    ) -> HeadlessSwapchain {
        let desc = TextureDesc::color_attachment(format, extent);
        let images = (0..image_count)
            .map(|_| {
                (
                    HeadlessTexture {
                        id: self.next_id(),
                        desc,
                        sparse: false,
                    },
                    desc,
                )
            })
            .collect();
        inc(&self.counters.swapchains);

        HeadlessSwapchain::new(images)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn find_queue(&self, kind: QueueKind) -> Option<&HeadlessQueue> {
        self.queues.iter().find(|queue| queue.kind() == kind)
    }

    fn all_memory_types(&self) -> u32 {
        match self.memory_types.len() {
            32 => !0,
            count => (1 << count) - 1,
        }
    }

    /// Runs queues until nothing can move. Signal on one queue may unblock
    /// another one, so it loops.
    fn execute(&self) {
        while self
            .queues
            .iter()
            .fold(false, |progress, queue| queue.execute() || progress)
        {}
    }

    fn texture_size(desc: &TextureDesc) -> u64 {
        let block = desc.format.block_size().max(1) as u64;
        let layers = desc.array_layers.max(1) as u64 * desc.samples.count() as u64;
        (0..desc.mip_levels.max(1))
            .map(|mip| {
                desc.extent
                    .iter()
                    .map(|axis| (*axis >> mip).max(1) as u64)
                    .product::<u64>()
            })
            .sum::<u64>()
            * block
            * layers
    }

    fn resource_id(resource: &RawResource<Self>) -> u64 {
        match resource {
            RawResource::Buffer(buffer) => buffer.id,
            RawResource::Texture(texture) => texture.id,
        }
    }

    fn create_view(&self, resource: &RawResource<Self>) -> HeadlessView {
        inc(&self.counters.views);
        self.counters.views_created.fetch_add(1, Ordering::AcqRel);
        HeadlessView {
            id: self.next_id(),
            resource: Self::resource_id(resource),
        }
    }
}

impl Device for HeadlessDevice {
    type Queue = HeadlessQueue;
    type CommandList = HeadlessCommandList;
    type Fence = HeadlessFence;
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type Memory = HeadlessMemory;
    type View = HeadlessView;
    type Sampler = HeadlessSampler;
    type Swapchain = HeadlessSwapchain;

    fn name(&self) -> &str {
        "headless"
    }

    fn queue(&self, kind: QueueKind) -> Option<HeadlessQueue> {
        self.find_queue(kind).cloned()
    }

    fn submit(&self, queue: &HeadlessQueue, batches: &[SubmitBatch<Self>]) -> BackendResult<()> {
        if self.fail_submit.swap(false, Ordering::AcqRel) {
            return Err(BackendError::DeviceLost);
        }
        let record = batches
            .iter()
            .map(|batch| BatchRecord {
                waits: batch
                    .waits
                    .iter()
                    .map(|wait| (wait.fence.raw().id(), wait.value))
                    .collect(),
                command_lists: batch.command_lists.iter().map(|list| list.id()).collect(),
                signals: batch
                    .signals
                    .iter()
                    .map(|signal| (signal.fence.raw().id(), signal.value))
                    .collect(),
            })
            .collect();
        let pending = batches
            .iter()
            .map(|batch| PendingBatch {
                waits: batch
                    .waits
                    .iter()
                    .map(|wait| (wait.fence.raw().clone(), wait.value))
                    .collect(),
                signals: batch
                    .signals
                    .iter()
                    .map(|signal| (signal.fence.raw().clone(), signal.value))
                    .collect(),
            })
            .collect();
        queue.enqueue(record, pending);
        self.counters.submits.fetch_add(1, Ordering::AcqRel);
        self.execute();

        Ok(())
    }

    fn wait_queue_idle(&self, queue: &HeadlessQueue) -> BackendResult<()> {
        queue.wait_idle();
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> BackendResult<HeadlessFence> {
        inc(&self.counters.fences);
        Ok(HeadlessFence::new(self.next_id(), initial_value))
    }

    fn fence_value(&self, fence: &HeadlessFence) -> BackendResult<u64> {
        Ok(fence.value())
    }

    fn wait_fence(
        &self,
        fence: &HeadlessFence,
        value: u64,
        timeout: Option<Duration>,
    ) -> BackendResult<bool> {
        Ok(fence.wait(value, timeout))
    }

    fn signal_fence(&self, fence: &HeadlessFence, value: u64) -> BackendResult<()> {
        fence.signal(value);
        self.execute();
        Ok(())
    }

    fn destroy_fence(&self, _fence: HeadlessFence) {
        dec(&self.counters.fences);
    }

    fn memory_types(&self) -> &[HeapProperties] {
        &self.memory_types
    }

    fn create_buffer(
        &self,
        desc: &BufferDesc,
        sparse: bool,
        name: Option<&str>,
    ) -> BackendResult<(HeadlessBuffer, MemoryRequirements)> {
        if desc.size == 0 {
            return Err(BackendError::NotSupported);
        }
        let buffer = HeadlessBuffer {
            id: self.next_id(),
            desc: *desc,
            sparse,
        };
        inc(&self.counters.buffers);
        debug!("Buffer {} {:?} created", buffer.id, name);

        Ok((
            buffer,
            MemoryRequirements {
                size: desc.size,
                alignment: BUFFER_ALIGNMENT,
                memory_type_bits: self.all_memory_types(),
            },
        ))
    }

    fn create_texture(
        &self,
        desc: &TextureDesc,
        sparse: bool,
        name: Option<&str>,
    ) -> BackendResult<(HeadlessTexture, MemoryRequirements)> {
        if desc.extent.contains(&0)
            || desc.format == Format::Unknown
            || desc.mip_levels > u32::BITS
        {
            return Err(BackendError::NotSupported);
        }
        let texture = HeadlessTexture {
            id: self.next_id(),
            desc: *desc,
            sparse,
        };
        inc(&self.counters.textures);
        debug!("Texture {} {:?} created", texture.id, name);

        Ok((
            texture,
            MemoryRequirements {
                size: Self::texture_size(desc),
                alignment: TEXTURE_ALIGNMENT,
                memory_type_bits: self.all_memory_types(),
            },
        ))
    }

    fn destroy_buffer(&self, _buffer: HeadlessBuffer) {
        dec(&self.counters.buffers);
    }

    fn destroy_texture(&self, _texture: HeadlessTexture) {
        dec(&self.counters.textures);
    }

    fn allocate_memory(&self, request: &MemoryRequest) -> BackendResult<HeadlessMemory> {
        if request.memory_types & self.all_memory_types() == 0 {
            return Err(BackendError::NotSupported);
        }
        inc(&self.counters.memory);

        Ok(HeadlessMemory {
            id: self.next_id(),
            size: request.size,
            memory_types: request.memory_types,
        })
    }

    fn free_memory(&self, _memory: HeadlessMemory) {
        dec(&self.counters.memory);
    }

    fn bind_memory(
        &self,
        resource: &RawResource<Self>,
        memory: &HeadlessMemory,
    ) -> BackendResult<()> {
        let size = match resource {
            RawResource::Buffer(buffer) => buffer.desc.size,
            RawResource::Texture(texture) => Self::texture_size(&texture.desc),
        };
        if memory.size < size {
            return Err(BackendError::Other(format!(
                "Memory block {} is too small: {} < {}",
                memory.id, memory.size, size
            )));
        }

        Ok(())
    }

    fn create_shader_resource_view(
        &self,
        resource: &RawResource<Self>,
        desc: &SrvDesc,
    ) -> BackendResult<HeadlessView> {
        if let (RawResource::Texture(texture), SrvDimension::TextureCube { .. }) =
            (resource, &desc.dimension)
        {
            if !texture.desc.cube_compatible {
                return Err(BackendError::ViewDimensionMismatch);
            }
        }

        Ok(self.create_view(resource))
    }

    fn create_unordered_access_view(
        &self,
        resource: &RawResource<Self>,
        _desc: &UavDesc,
    ) -> BackendResult<HeadlessView> {
        Ok(self.create_view(resource))
    }

    fn create_render_target_view(
        &self,
        resource: &RawResource<Self>,
        _desc: &RtvDesc,
    ) -> BackendResult<HeadlessView> {
        Ok(self.create_view(resource))
    }

    fn create_depth_stencil_view(
        &self,
        resource: &RawResource<Self>,
        desc: &DsvDesc,
    ) -> BackendResult<HeadlessView> {
        let format = match (resource, desc.format) {
            (RawResource::Texture(texture), Format::Unknown) => texture.desc.format,
            (_, format) => format,
        };
        if !format.is_depth() {
            return Err(BackendError::NotSupported);
        }

        Ok(self.create_view(resource))
    }

    fn destroy_view(&self, _view: HeadlessView) {
        dec(&self.counters.views);
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> BackendResult<HeadlessSampler> {
        inc(&self.counters.samplers);
        self.counters.samplers_created.fetch_add(1, Ordering::AcqRel);

        Ok(HeadlessSampler {
            id: self.next_id(),
            desc: *desc,
        })
    }

    fn destroy_sampler(&self, _sampler: HeadlessSampler) {
        dec(&self.counters.samplers);
    }

    fn swapchain_images(
        &self,
        swapchain: &HeadlessSwapchain,
    ) -> BackendResult<Vec<(HeadlessTexture, TextureDesc)>> {
        Ok(swapchain.images().to_vec())
    }

    fn acquire_next_image(
        &self,
        swapchain: &HeadlessSwapchain,
        _timeout: Duration,
    ) -> BackendResult<AcquireStatus> {
        Ok(swapchain.acquire())
    }

    fn present(
        &self,
        _queue: &HeadlessQueue,
        swapchain: &HeadlessSwapchain,
        image_index: u32,
    ) -> BackendResult<PresentStatus> {
        swapchain.present(image_index)
    }

    fn destroy_swapchain(&self, _swapchain: HeadlessSwapchain) {
        dec(&self.counters.swapchains);
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use crate::{
        BufferDesc, BufferUsage, Device, DsvDesc, Fence, Format, QueueKind, RawResource,
        SrvDesc, SubmitBatch, TextureDesc,
    };

    use super::HeadlessDevice;

    #[test]
    fn wait_blocks_on_dependency() {
        let device = Arc::new(HeadlessDevice::new());
        let gate = Arc::new(Fence::new(&device, 0).unwrap());
        let done = Arc::new(Fence::new(&device, 0).unwrap());
        let queue = device.queue(QueueKind::Compute).unwrap();
        device
            .submit(
                &queue,
                &[SubmitBatch::default()
                    .wait(&gate, 1)
                    .command_list(device.command_list())
                    .signal(&done, 1)],
            )
            .unwrap();
        assert!(!done.wait_timeout(1, Duration::from_millis(5)).unwrap());
        gate.signal(1).unwrap();
        assert!(done.wait_timeout(1, Duration::from_millis(100)).unwrap());
        device.wait_queue_idle(&queue).unwrap();
    }

    #[test]
    fn failure_is_one_shot() {
        let device = HeadlessDevice::new();
        let queue = device.queue(QueueKind::Graphics).unwrap();
        device.fail_next_submit();
        assert!(device.submit(&queue, &[SubmitBatch::default()]).is_err());
        assert!(device.submit(&queue, &[SubmitBatch::default()]).is_ok());
        assert_eq!(1, device.submissions(QueueKind::Graphics).len());
        assert_eq!(1, device.stats().submits);
    }

    #[test]
    fn cube_view_needs_cube_texture() {
        let device = HeadlessDevice::new();
        let (flat, _) = device
            .create_texture(&TextureDesc::texture(Format::Rgba8Unorm, [16, 16]), false, None)
            .unwrap();
        let (cube, _) = device
            .create_texture(&TextureDesc::cubemap(Format::Rgba8Unorm, [16, 16]), false, None)
            .unwrap();
        assert!(device
            .create_shader_resource_view(&RawResource::Texture(flat), &SrvDesc::cube())
            .is_err());
        let view = device
            .create_shader_resource_view(&RawResource::Texture(cube), &SrvDesc::cube())
            .unwrap();
        device.destroy_view(view);
    }

    #[test]
    fn depth_view_needs_depth_format() {
        let device = HeadlessDevice::new();
        let (color, _) = device
            .create_texture(&TextureDesc::texture(Format::Rgba8Unorm, [16, 16]), false, None)
            .unwrap();
        let (depth, _) = device
            .create_texture(
                &TextureDesc::depth_stencil_attachment(Format::D24S8, [16, 16]),
                false,
                None,
            )
            .unwrap();
        assert!(device
            .create_depth_stencil_view(&RawResource::Texture(color), &DsvDesc::texture_2d(0))
            .is_err());
        assert!(device
            .create_depth_stencil_view(&RawResource::Texture(depth), &DsvDesc::texture_2d(0))
            .is_ok());
    }

    #[test]
    fn texture_size_counts_mips_and_layers() {
        let desc = TextureDesc::texture(Format::Rgba8Unorm, [4, 4])
            .mip_levels(3)
            .array_layers(2);
        // 16 + 4 + 1 texels per layer.
        assert_eq!(21 * 4 * 2, HeadlessDevice::texture_size(&desc));
    }

    #[test]
    fn too_many_mips_rejected() {
        let device = HeadlessDevice::new();
        let desc = TextureDesc::texture(Format::Rgba8Unorm, [16, 16]).mip_levels(40);
        assert!(device.create_texture(&desc, false, None).is_err());
        let desc = TextureDesc::texture(Format::Rgba8Unorm, [16, 16]).mip_levels(32);
        assert!(device.create_texture(&desc, false, None).is_ok());
    }

    #[test]
    fn empty_buffer_rejected() {
        let device = HeadlessDevice::new();
        assert!(device
            .create_buffer(&BufferDesc::new(0, BufferUsage::Vertex), false, None)
            .is_err());
    }
}
