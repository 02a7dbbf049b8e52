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

use std::{fmt::Debug, sync::Arc};

use log::warn;
use smol_str::SmolStr;

use crate::{
    BackendError, BackendResult, BufferDesc, DepthStencil, Device, DsvDesc, HeapAllocator,
    HeapBinding, HeapProperties, RawResource, RenderTarget, RtvDesc, ShaderResource, SrvDesc,
    TextureDesc, UavDesc, UnorderedAccess, ViewCache, ViewKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Own dedicated memory block.
    Committed,
    /// Suballocated from a shared heap block.
    Placed,
    /// Sparse resource, memory isn't bound at creation.
    Reserved,
    /// Image owned by a swap chain.
    SwapChain,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ResourceDesc {
    Buffer(BufferDesc),
    Texture(TextureDesc),
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceCreateDesc<'a> {
    pub desc: ResourceDesc,
    pub kind: ResourceKind,
    pub required: HeapProperties,
    pub denied: HeapProperties,
    pub name: Option<&'a str>,
}

impl<'a> ResourceCreateDesc<'a> {
    pub fn buffer(desc: BufferDesc) -> Self {
        Self::new(ResourceDesc::Buffer(desc))
    }

    pub fn texture(desc: TextureDesc) -> Self {
        Self::new(ResourceDesc::Texture(desc))
    }

    fn new(desc: ResourceDesc) -> Self {
        Self {
            desc,
            kind: ResourceKind::Placed,
            required: HeapProperties::DEVICE_LOCAL,
            denied: HeapProperties::empty(),
            name: None,
        }
    }

    /// CPU writes, GPU reads once. Typical staging buffer.
    pub fn upload(desc: BufferDesc) -> Self {
        Self::buffer(desc)
            .heap(HeapProperties::HOST_VISIBLE | HeapProperties::HOST_COHERENT)
            .deny(HeapProperties::DEVICE_LOCAL)
    }

    /// GPU writes, CPU reads back.
    pub fn readback(desc: BufferDesc) -> Self {
        Self::buffer(desc).heap(HeapProperties::HOST_VISIBLE | HeapProperties::HOST_CACHED)
    }

    pub fn committed(mut self) -> Self {
        self.kind = ResourceKind::Committed;
        self
    }

    pub fn placed(mut self) -> Self {
        self.kind = ResourceKind::Placed;
        self
    }

    pub fn reserved(mut self) -> Self {
        self.kind = ResourceKind::Reserved;
        self
    }

    pub fn heap(mut self, required: HeapProperties) -> Self {
        self.required = required;
        self
    }

    pub fn deny(mut self, denied: HeapProperties) -> Self {
        self.denied = denied;
        self
    }

    pub fn name(mut self, value: &'a str) -> Self {
        self.name = Some(value);
        self
    }
}

/// Buffer or texture together with its memory and views.
///
/// Heap binding is set once at creation. Only view caches change later.
pub struct Resource<D: Device> {
    device: Arc<D>,
    kind: ResourceKind,
    desc: ResourceDesc,
    raw: RawResource<D>,
    binding: Option<HeapBinding<D>>,
    srv: ViewCache<D, ShaderResource>,
    uav: ViewCache<D, UnorderedAccess>,
    rtv: ViewCache<D, RenderTarget>,
    dsv: ViewCache<D, DepthStencil>,
    name: Option<SmolStr>,
}

impl<D: Device> Resource<D> {
    /// Creates resource and binds memory to it.
    ///
    /// `Ok(None)` means no heap matches requested properties.
    pub fn new(
        device: &Arc<D>,
        heap: &Arc<HeapAllocator<D>>,
        create: &ResourceCreateDesc,
    ) -> BackendResult<Option<Self>> {
        let sparse = match create.kind {
            ResourceKind::SwapChain => return Err(BackendError::NotSupported),
            ResourceKind::Reserved => true,
            ResourceKind::Committed | ResourceKind::Placed => false,
        };
        let (raw, requirements) = match &create.desc {
            ResourceDesc::Buffer(desc) => {
                let (buffer, requirements) = device.create_buffer(desc, sparse, create.name)?;
                (RawResource::Buffer(buffer), requirements)
            }
            ResourceDesc::Texture(desc) => {
                let (texture, requirements) = device.create_texture(desc, sparse, create.name)?;
                (RawResource::Texture(texture), requirements)
            }
        };

        let binding = if sparse {
            None
        } else {
            let binding = match heap.allocate(
                &requirements,
                create.required,
                create.denied,
                create.kind == ResourceKind::Committed,
            ) {
                Ok(Some(binding)) => binding,
                Ok(None) => {
                    warn!(
                        "Can't place {} {:?}: no heap satisfies request",
                        create.name.unwrap_or("resource"),
                        create.desc
                    );
                    Self::destroy_raw(device, raw);
                    return Ok(None);
                }
                Err(err) => {
                    Self::destroy_raw(device, raw);
                    return Err(err);
                }
            };
            if let Err(err) = device.bind_memory(&raw, binding.memory()) {
                Self::destroy_raw(device, raw);
                return Err(err);
            }
            Some(binding)
        };

        Ok(Some(Self::with_raw(
            device,
            create.kind,
            create.desc,
            raw,
            binding,
            create.name,
        )))
    }

    pub(crate) fn swapchain_image(device: &Arc<D>, raw: D::Texture, desc: TextureDesc) -> Self {
        Self::with_raw(
            device,
            ResourceKind::SwapChain,
            ResourceDesc::Texture(desc),
            RawResource::Texture(raw),
            None,
            None,
        )
    }

    fn with_raw(
        device: &Arc<D>,
        kind: ResourceKind,
        desc: ResourceDesc,
        raw: RawResource<D>,
        binding: Option<HeapBinding<D>>,
        name: Option<&str>,
    ) -> Self {
        Self {
            device: device.clone(),
            kind,
            desc,
            srv: ViewCache::new(Some(raw.clone())),
            uav: ViewCache::new(Some(raw.clone())),
            rtv: ViewCache::new(Some(raw.clone())),
            dsv: ViewCache::new(Some(raw.clone())),
            raw,
            binding,
            name: name.map(SmolStr::new),
        }
    }

    fn destroy_raw(device: &D, raw: RawResource<D>) {
        match raw {
            RawResource::Buffer(buffer) => device.destroy_buffer(buffer),
            RawResource::Texture(texture) => device.destroy_texture(texture),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn raw(&self) -> &RawResource<D> {
        &self.raw
    }

    pub fn heap_binding(&self) -> Option<&HeapBinding<D>> {
        self.binding.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn srv(&self, desc: &SrvDesc) -> Arc<D::View> {
        self.view(&self.srv, desc)
    }

    pub fn uav(&self, desc: &UavDesc) -> Arc<D::View> {
        self.view(&self.uav, desc)
    }

    pub fn rtv(&self, desc: &RtvDesc) -> Arc<D::View> {
        self.view(&self.rtv, desc)
    }

    pub fn dsv(&self, desc: &DsvDesc) -> Arc<D::View> {
        self.view(&self.dsv, desc)
    }

    pub fn try_srv(&self, desc: &SrvDesc) -> BackendResult<Arc<D::View>> {
        self.srv.get_or_create(&self.device, desc)
    }

    pub fn try_uav(&self, desc: &UavDesc) -> BackendResult<Arc<D::View>> {
        self.uav.get_or_create(&self.device, desc)
    }

    /// Number of live views of all kinds.
    pub fn view_count(&self) -> usize {
        self.srv.len() + self.uav.len() + self.rtv.len() + self.dsv.len()
    }

    pub(crate) fn clear_views(&self) {
        self.srv.clear(&self.device);
        self.uav.clear(&self.device);
        self.rtv.clear(&self.device);
        self.dsv.clear(&self.device);
    }

    fn view<K: ViewKind<D>>(&self, cache: &ViewCache<D, K>, desc: &K::Desc) -> Arc<K::Raw> {
        cache
            .get_or_create(&self.device, desc)
            .unwrap_or_else(|err| {
                panic!(
                    "Failed to create {} {:?} of {}: {}",
                    K::NAME,
                    desc,
                    self.name().unwrap_or("unnamed resource"),
                    err
                )
            })
    }
}

impl<D: Device> Debug for Resource<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("desc", &self.desc)
            .field("raw", &self.raw)
            .field("binding", &self.binding)
            .finish()
    }
}

impl<D: Device> Drop for Resource<D> {
    fn drop(&mut self) {
        self.clear_views();
        if self.kind != ResourceKind::SwapChain {
            Self::destroy_raw(&self.device, self.raw.clone());
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::{
        headless::HeadlessDevice, BufferDesc, BufferUsage, DsvDesc, Format, HeapAllocator,
        HeapProperties, RtvDesc, SrvDesc, TextureDesc, UavDesc,
    };

    use super::{Resource, ResourceCreateDesc, ResourceKind};

    fn setup() -> (Arc<HeadlessDevice>, Arc<HeapAllocator<HeadlessDevice>>) {
        let device = Arc::new(HeadlessDevice::new());
        let heap = Arc::new(HeapAllocator::new(device.clone()));
        (device, heap)
    }

    #[test]
    fn views_are_idempotent() {
        let (device, heap) = setup();
        let texture = Resource::new(
            &device,
            &heap,
            &ResourceCreateDesc::texture(
                TextureDesc::color_attachment(Format::Rgba8Unorm, [128, 128])
                    .usage(crate::TextureUsage::all()),
            )
            .name("target"),
        )
        .unwrap()
        .unwrap();
        assert!(Arc::ptr_eq(
            &texture.srv(&SrvDesc::texture_2d()),
            &texture.srv(&SrvDesc::texture_2d())
        ));
        assert!(Arc::ptr_eq(
            &texture.rtv(&RtvDesc::texture_2d(0)),
            &texture.rtv(&RtvDesc::texture_2d(0))
        ));
        texture.uav(&UavDesc::texture_2d(0));
        assert_eq!(3, texture.view_count());
        assert_eq!(Some("target"), texture.name());
    }

    #[test]
    fn drop_frees_everything() {
        let (device, heap) = setup();
        let buffer = Resource::new(
            &device,
            &heap,
            &ResourceCreateDesc::buffer(BufferDesc::structured(64, 16, BufferUsage::Storage))
                .committed(),
        )
        .unwrap()
        .unwrap();
        buffer.srv(&SrvDesc::structured(0, 64, 16));
        buffer.uav(&UavDesc::raw(0, 256));
        assert!(buffer.heap_binding().unwrap().is_dedicated());
        assert_eq!(1, device.live().buffers);
        assert_eq!(1, device.live().memory);
        assert_eq!(2, device.live().views);

        drop(buffer);
        let live = device.live();
        assert_eq!(0, live.buffers);
        assert_eq!(0, live.memory);
        assert_eq!(0, live.views);
        assert_eq!(0, heap.stats().allocations);
    }

    #[test]
    fn no_heap_gives_none() {
        let (device, heap) = setup();
        let resource = Resource::new(
            &device,
            &heap,
            &ResourceCreateDesc::buffer(BufferDesc::new(256, BufferUsage::Uniform))
                .heap(HeapProperties::DEVICE_LOCAL)
                .deny(HeapProperties::DEVICE_LOCAL),
        )
        .unwrap();
        assert!(resource.is_none());
        assert_eq!(0, device.live().buffers);
    }

    #[test]
    fn upload_buffer_avoids_device_memory() {
        let (device, heap) = setup();
        let staging = Resource::new(
            &device,
            &heap,
            &ResourceCreateDesc::upload(BufferDesc::new(4096, BufferUsage::Source)),
        )
        .unwrap()
        .unwrap();
        let properties = staging.heap_binding().unwrap().properties();
        assert!(properties.contains(HeapProperties::HOST_VISIBLE));
        assert!(!properties.contains(HeapProperties::DEVICE_LOCAL));
        assert_eq!(ResourceKind::Placed, staging.kind());
    }

    #[test]
    fn reserved_has_no_memory() {
        let (device, heap) = setup();
        let sparse = Resource::new(
            &device,
            &heap,
            &ResourceCreateDesc::texture(TextureDesc::texture(Format::Rgba8Unorm, [4096, 4096]))
                .reserved(),
        )
        .unwrap()
        .unwrap();
        assert!(sparse.heap_binding().is_none());
        assert_eq!(0, device.live().memory);
    }

    #[test]
    #[should_panic]
    fn texture_view_of_buffer_is_fatal() {
        let (device, heap) = setup();
        let buffer = Resource::new(
            &device,
            &heap,
            &ResourceCreateDesc::buffer(BufferDesc::new(256, BufferUsage::Storage)),
        )
        .unwrap()
        .unwrap();
        buffer.dsv(&DsvDesc::texture_2d(0));
    }

    #[test]
    fn fallible_views() {
        let (device, heap) = setup();
        let buffer = Resource::new(
            &device,
            &heap,
            &ResourceCreateDesc::buffer(BufferDesc::new(256, BufferUsage::Storage)),
        )
        .unwrap()
        .unwrap();
        assert!(buffer.try_srv(&SrvDesc::texture_2d()).is_err());
        assert!(buffer.try_uav(&UavDesc::raw(0, 64)).is_ok());
    }
}
