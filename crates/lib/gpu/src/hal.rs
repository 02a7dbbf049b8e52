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

//! Backend seam.
//!
//! Everything above this module (queues, caches, disposer, device resources) is
//! written once against [`Device`]. A backend provides raw handles and thin
//! wrappers around driver entry points, nothing more: no caching, no lifetime
//! tracking, no ordering.

use std::{fmt::Debug, time::Duration};

use crate::{
    BackendResult, BufferDesc, DsvDesc, HeapProperties, RtvDesc, SamplerDesc, SrvDesc,
    SubmitBatch, TextureDesc, UavDesc,
};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueKind {
    Graphics,
    Compute,
    Copy,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::Graphics, QueueKind::Compute, QueueKind::Copy];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    /// Bit `i` is set when memory type `i` can back the resource.
    pub memory_type_bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequest {
    pub size: u64,
    pub alignment: u64,
    pub memory_types: u32,
    pub properties: HeapProperties,
    pub dedicated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    Acquired(u32),
    Timeout,
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    OutOfDate,
}

pub enum RawResource<D: Device> {
    Buffer(D::Buffer),
    Texture(D::Texture),
}

impl<D: Device> RawResource<D> {
    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer(_))
    }

    pub fn as_buffer(&self) -> Option<&D::Buffer> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            Self::Texture(_) => None,
        }
    }

    pub fn as_texture(&self) -> Option<&D::Texture> {
        match self {
            Self::Buffer(_) => None,
            Self::Texture(texture) => Some(texture),
        }
    }
}

impl<D: Device> Clone for RawResource<D> {
    fn clone(&self) -> Self {
        match self {
            Self::Buffer(buffer) => Self::Buffer(buffer.clone()),
            Self::Texture(texture) => Self::Texture(texture.clone()),
        }
    }
}

impl<D: Device> Debug for RawResource<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffer(buffer) => f.debug_tuple("Buffer").field(buffer).finish(),
            Self::Texture(texture) => f.debug_tuple("Texture").field(texture).finish(),
        }
    }
}

pub trait Device: Send + Sync + Sized + 'static {
    type Queue: Clone + Send + Sync + Debug;
    type CommandList: Clone + Send + Sync + Debug;
    type Fence: Clone + Send + Sync + Debug;
    type Buffer: Clone + Send + Sync + Debug;
    type Texture: Clone + Send + Sync + Debug;
    type Memory: Send + Sync + Debug;
    type View: Send + Sync + Debug;
    type Sampler: Send + Sync + Debug;
    type Swapchain: Send + Sync + Debug;

    fn name(&self) -> &str;

    fn queue(&self, kind: QueueKind) -> Option<Self::Queue>;

    /// Hands all batches to the queue in one call. Inside every batch waits
    /// happen before command lists execute, signals happen after.
    fn submit(&self, queue: &Self::Queue, batches: &[SubmitBatch<Self>]) -> BackendResult<()>;

    fn wait_queue_idle(&self, queue: &Self::Queue) -> BackendResult<()>;

    fn create_fence(&self, initial_value: u64) -> BackendResult<Self::Fence>;

    fn fence_value(&self, fence: &Self::Fence) -> BackendResult<u64>;

    /// Blocks until fence reaches `value`. Returns `false` on timeout, `None`
    /// waits forever.
    fn wait_fence(
        &self,
        fence: &Self::Fence,
        value: u64,
        timeout: Option<Duration>,
    ) -> BackendResult<bool>;

    fn signal_fence(&self, fence: &Self::Fence, value: u64) -> BackendResult<()>;

    fn destroy_fence(&self, fence: Self::Fence);

    fn memory_types(&self) -> &[HeapProperties];

    fn create_buffer(
        &self,
        desc: &BufferDesc,
        sparse: bool,
        name: Option<&str>,
    ) -> BackendResult<(Self::Buffer, MemoryRequirements)>;

    fn create_texture(
        &self,
        desc: &TextureDesc,
        sparse: bool,
        name: Option<&str>,
    ) -> BackendResult<(Self::Texture, MemoryRequirements)>;

    fn destroy_buffer(&self, buffer: Self::Buffer);

    fn destroy_texture(&self, texture: Self::Texture);

    fn allocate_memory(&self, request: &MemoryRequest) -> BackendResult<Self::Memory>;

    fn free_memory(&self, memory: Self::Memory);

    fn bind_memory(&self, resource: &RawResource<Self>, memory: &Self::Memory)
        -> BackendResult<()>;

    fn create_shader_resource_view(
        &self,
        resource: &RawResource<Self>,
        desc: &SrvDesc,
    ) -> BackendResult<Self::View>;

    fn create_unordered_access_view(
        &self,
        resource: &RawResource<Self>,
        desc: &UavDesc,
    ) -> BackendResult<Self::View>;

    fn create_render_target_view(
        &self,
        resource: &RawResource<Self>,
        desc: &RtvDesc,
    ) -> BackendResult<Self::View>;

    fn create_depth_stencil_view(
        &self,
        resource: &RawResource<Self>,
        desc: &DsvDesc,
    ) -> BackendResult<Self::View>;

    fn destroy_view(&self, view: Self::View);

    fn create_sampler(&self, desc: &SamplerDesc) -> BackendResult<Self::Sampler>;

    fn destroy_sampler(&self, sampler: Self::Sampler);

    fn swapchain_images(
        &self,
        swapchain: &Self::Swapchain,
    ) -> BackendResult<Vec<(Self::Texture, TextureDesc)>>;

    fn acquire_next_image(
        &self,
        swapchain: &Self::Swapchain,
        timeout: Duration,
    ) -> BackendResult<AcquireStatus>;

    fn present(
        &self,
        queue: &Self::Queue,
        swapchain: &Self::Swapchain,
        image_index: u32,
    ) -> BackendResult<PresentStatus>;

    fn destroy_swapchain(&self, swapchain: Self::Swapchain);
}
