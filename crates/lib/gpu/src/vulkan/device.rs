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

use std::{
    ffi::{CStr, CString},
    slice,
    sync::Arc,
    time::Duration,
};

use arrayvec::ArrayVec;
use ash::{extensions::khr, vk};
use gpu_alloc::{Dedicated, Request};
use gpu_alloc_ash::{device_properties, AshMemoryDevice};
use log::{info, warn};
use parking_lot::Mutex;

use crate::{
    AcquireStatus, BackendError, BackendResult, BufferDesc, Device, DeviceConfig, DsvDesc,
    DsvDimension, FenceValue, Filter, Format, HeapProperties, MemoryRequest, MemoryRequirements,
    PresentStatus, QueueKind, RawResource, RtvDesc, RtvDimension, SamplerDesc, SrvDesc,
    SrvDimension, SubmitBatch, TextureDesc, TextureDimension, UavDesc, UavDimension, ALL_LAYERS,
    ALL_MIPS,
};

use super::{
    conv::{aspect_of, usage_flags},
    GpuAllocator, GpuMemory, Instance, PhysicalDevice, VulkanSwapchain,
};

/// Queue handle. Queues of one family share `vk::Queue` and its lock.
#[derive(Debug, Clone)]
pub struct VulkanQueue {
    pub(crate) raw: vk::Queue,
    family: u32,
    kind: QueueKind,
    lock: Arc<Mutex<()>>,
}

impl VulkanQueue {
    pub fn raw(&self) -> vk::Queue {
        self.raw
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VulkanBuffer {
    pub(crate) raw: vk::Buffer,
    pub desc: BufferDesc,
}

impl VulkanBuffer {
    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VulkanTexture {
    pub(crate) raw: vk::Image,
    pub desc: TextureDesc,
}

impl VulkanTexture {
    pub fn raw(&self) -> vk::Image {
        self.raw
    }
}

#[derive(Debug)]
pub enum VulkanView {
    Image(vk::ImageView),
    TexelBuffer(vk::BufferView),
    /// Structured and raw buffer access doesn't need a view object.
    Range {
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
    },
}

struct ImageViewRange {
    view_type: vk::ImageViewType,
    format: Format,
    aspect: vk::ImageAspectFlags,
    base_mip: u32,
    mip_count: u32,
    base_layer: u32,
    layer_count: u32,
}

pub struct VulkanDevice {
    pub(crate) instance: Instance,
    pub(crate) pdevice: PhysicalDevice,
    pub(crate) raw: ash::Device,
    pub(crate) swapchain_loader: Option<khr::Swapchain>,
    queues: ArrayVec<VulkanQueue, 3>,
    families: ArrayVec<u32, 3>,
    memory_allocator: Mutex<GpuAllocator>,
    memory_types: Vec<HeapProperties>,
    name: String,
}

impl VulkanDevice {
    /// Loads Vulkan, picks physical device and creates logical device with
    /// queues enabled in `config`.
    pub fn create(config: &DeviceConfig, instance_extensions: &[&CStr]) -> BackendResult<Self> {
        let instance = Instance::new(config, instance_extensions)?;
        let pdevice = PhysicalDevice::select(PhysicalDevice::enumerate(&instance)?)?;
        Self::new(instance, pdevice, config)
    }

    pub fn new(
        instance: Instance,
        pdevice: PhysicalDevice,
        config: &DeviceConfig,
    ) -> BackendResult<Self> {
        if !pdevice.is_queue_flag_supported(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER | vk::QueueFlags::COMPUTE,
        ) {
            return Err(BackendError::NoSuitableDevice);
        };

        let mut device_extension_names = Vec::new();
        if instance.surface_loader().is_ok() {
            device_extension_names.push(khr::Swapchain::name().as_ptr());
        }
        for ext in &device_extension_names {
            let ext = unsafe { CStr::from_ptr(*ext) }.to_string_lossy();
            if !pdevice.is_extension_supported(&ext) {
                return Err(BackendError::ExtensionNotFound(ext.into_owned()));
            }
        }

        let mut families = ArrayVec::<u32, 3>::new();
        let mut kinds = ArrayVec::<(QueueKind, u32), 3>::new();
        for kind in &config.queues {
            let family = pdevice
                .family(*kind)
                .ok_or(BackendError::NoSuitableQueue)?
                .index;
            if !families.contains(&family) {
                families.push(family);
            }
            kinds.push((*kind, family));
        }

        let priorities = [1.0];
        let queue_info = families
            .iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect::<ArrayVec<_, 3>>();

        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: pdevice.features.sampler_anisotropy,
            sparse_binding: pdevice.features.sparse_binding,
            sparse_residency_buffer: pdevice.features.sparse_residency_buffer,
            sparse_residency_image2_d: pdevice.features.sparse_residency_image2_d,
            ..Default::default()
        };
        let mut timeline_semaphore =
            vk::PhysicalDeviceVulkan12Features::builder().timeline_semaphore(true);
        let mut synchronization2 =
            vk::PhysicalDeviceVulkan13Features::builder().synchronization2(true);

        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_info)
            .enabled_extension_names(&device_extension_names)
            .enabled_features(&features)
            .push_next(&mut timeline_semaphore)
            .push_next(&mut synchronization2)
            .build();

        let device = unsafe {
            instance
                .raw
                .create_device(pdevice.raw, &device_create_info, None)?
        };

        let family_queues = families
            .iter()
            .map(|family| {
                (
                    *family,
                    unsafe { device.get_device_queue(*family, 0) },
                    Arc::new(Mutex::new(())),
                )
            })
            .collect::<ArrayVec<_, 3>>();
        let queues = kinds
            .iter()
            .filter_map(|(kind, family)| {
                family_queues
                    .iter()
                    .find(|(index, _, _)| index == family)
                    .map(|(_, raw, lock)| VulkanQueue {
                        raw: *raw,
                        family: *family,
                        kind: *kind,
                        lock: lock.clone(),
                    })
            })
            .collect::<ArrayVec<_, 3>>();
        queues.iter().for_each(|queue| {
            info!("{:?} queue uses family {}", queue.kind, queue.family);
        });

        let allocator_config = gpu_alloc::Config {
            dedicated_threshold: config.dedicated_threshold,
            preferred_dedicated_threshold: config.preferred_dedicated_threshold,
            transient_dedicated_threshold: config.dedicated_threshold / 2,
            final_free_list_chunk: config.final_free_list_chunk,
            minimal_buddy_size: 256,
            starting_free_list_chunk: config.starting_free_list_chunk,
            initial_buddy_dedicated_size: 128 * 1024 * 1024,
        };
        let allocator_props =
            unsafe { device_properties(&instance.raw, Instance::vulkan_version(), pdevice.raw) }?;
        let memory_allocator = GpuAllocator::new(allocator_config, allocator_props);

        let memory_types = pdevice.memory_properties.memory_types
            [..pdevice.memory_properties.memory_type_count as usize]
            .iter()
            .map(|memory_type| HeapProperties::from(memory_type.property_flags))
            .collect();

        let swapchain_loader = instance
            .surface_loader()
            .is_ok()
            .then(|| khr::Swapchain::new(&instance.raw, &device));

        let name = pdevice.name();
        info!("Vulkan device {} created", name);

        Ok(Self {
            instance,
            pdevice,
            raw: device,
            swapchain_loader,
            queues,
            families,
            memory_allocator: Mutex::new(memory_allocator),
            memory_types,
            name,
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.pdevice
    }

    pub fn set_object_name<T: vk::Handle>(&self, object: T, name: &str) {
        if let Some(debug_utils) = self.instance.get_debug_utils() {
            let Ok(name) = CString::new(name) else {
                warn!("Object name {:?} contains NUL", name);
                return;
            };
            let name_info = vk::DebugUtilsObjectNameInfoEXT::builder()
                .object_type(T::TYPE)
                .object_handle(object.as_raw())
                .object_name(&name)
                .build();
            if let Err(err) =
                unsafe { debug_utils.set_debug_utils_object_name(self.raw.handle(), &name_info) }
            {
                warn!("Can't set object name: {:?}", err);
            }
        }
    }

    /// Resources are shared between all enabled queue families without
    /// ownership transfers.
    fn sharing(&self) -> (vk::SharingMode, &[u32]) {
        if self.families.len() > 1 {
            (vk::SharingMode::CONCURRENT, self.families.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[])
        }
    }

    fn semaphore_info(fence_value: &FenceValue<Self>) -> vk::SemaphoreSubmitInfo {
        vk::SemaphoreSubmitInfo::builder()
            .semaphore(*fence_value.fence.raw())
            .value(fence_value.value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .build()
    }

    fn create_image_view(
        &self,
        texture: &VulkanTexture,
        range: ImageViewRange,
    ) -> BackendResult<VulkanView> {
        let desc = &texture.desc;
        let mip_count = if range.mip_count == ALL_MIPS {
            desc.mip_levels.saturating_sub(range.base_mip)
        } else {
            range.mip_count
        };
        let layer_count = if range.layer_count == ALL_LAYERS {
            desc.array_layers.saturating_sub(range.base_layer)
        } else {
            range.layer_count
        };
        if mip_count == 0
            || layer_count == 0
            || range.base_mip + mip_count > desc.mip_levels
            || range.base_layer + layer_count > desc.array_layers
        {
            return Err(BackendError::NotSupported);
        }
        let format = match range.format {
            Format::Unknown => desc.format,
            format => format,
        };
        let info = vk::ImageViewCreateInfo::builder()
            .image(texture.raw)
            .view_type(range.view_type)
            .format(format.into())
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: range.aspect,
                base_mip_level: range.base_mip,
                level_count: mip_count,
                base_array_layer: range.base_layer,
                layer_count,
            })
            .build();

        Ok(VulkanView::Image(unsafe {
            self.raw.create_image_view(&info, None)
        }?))
    }

    /// Typed access goes through a texel buffer view, everything else is a
    /// plain range.
    fn create_buffer_view(
        &self,
        buffer: &VulkanBuffer,
        format: Format,
        first_element: u64,
        num_elements: u32,
        stride: u32,
        raw: bool,
    ) -> BackendResult<VulkanView> {
        let typed = stride == 0 && !raw && format != Format::Unknown;
        let element_size = match (typed, raw) {
            (true, _) => format.block_size(),
            (false, true) => 4,
            (false, false) => stride.max(buffer.desc.stride),
        } as u64;
        if element_size == 0 {
            return Err(BackendError::NotSupported);
        }
        let offset = first_element * element_size;
        let size = num_elements as u64 * element_size;
        if offset + size > buffer.desc.size {
            return Err(BackendError::NotSupported);
        }
        if typed {
            let info = vk::BufferViewCreateInfo::builder()
                .buffer(buffer.raw)
                .format(format.into())
                .offset(offset)
                .range(size)
                .build();
            Ok(VulkanView::TexelBuffer(unsafe {
                self.raw.create_buffer_view(&info, None)
            }?))
        } else {
            Ok(VulkanView::Range {
                buffer: buffer.raw,
                offset,
                size,
            })
        }
    }
}

fn expect_texture(resource: &RawResource<VulkanDevice>) -> BackendResult<&VulkanTexture> {
    resource
        .as_texture()
        .ok_or(BackendError::ViewDimensionMismatch)
}

fn expect_buffer(resource: &RawResource<VulkanDevice>) -> BackendResult<&VulkanBuffer> {
    resource
        .as_buffer()
        .ok_or(BackendError::ViewDimensionMismatch)
}

fn expect_dimension(texture: &VulkanTexture, dimension: TextureDimension) -> BackendResult<()> {
    if texture.desc.dimension == dimension {
        Ok(())
    } else {
        Err(BackendError::ViewDimensionMismatch)
    }
}

/// Sampled views of depth-stencil images see depth only.
fn sampled_aspect(format: Format) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

fn view_format(format: Format, texture: &VulkanTexture) -> Format {
    match format {
        Format::Unknown => texture.desc.format,
        format => format,
    }
}

impl Device for VulkanDevice {
    type Queue = VulkanQueue;
    type CommandList = vk::CommandBuffer;
    type Fence = vk::Semaphore;
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type Memory = GpuMemory;
    type View = VulkanView;
    type Sampler = vk::Sampler;
    type Swapchain = VulkanSwapchain;

    fn name(&self) -> &str {
        &self.name
    }

    fn queue(&self, kind: QueueKind) -> Option<VulkanQueue> {
        self.queues.iter().find(|queue| queue.kind == kind).cloned()
    }

    fn submit(&self, queue: &VulkanQueue, batches: &[SubmitBatch<Self>]) -> BackendResult<()> {
        puffin::profile_function!();
        let waits = batches
            .iter()
            .map(|batch| {
                batch
                    .waits
                    .iter()
                    .map(Self::semaphore_info)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let command_buffers = batches
            .iter()
            .map(|batch| {
                batch
                    .command_lists
                    .iter()
                    .map(|cb| vk::CommandBufferSubmitInfo::builder().command_buffer(*cb).build())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let signals = batches
            .iter()
            .map(|batch| {
                batch
                    .signals
                    .iter()
                    .map(Self::semaphore_info)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let infos = (0..batches.len())
            .map(|index| {
                vk::SubmitInfo2::builder()
                    .wait_semaphore_infos(&waits[index])
                    .command_buffer_infos(&command_buffers[index])
                    .signal_semaphore_infos(&signals[index])
                    .build()
            })
            .collect::<Vec<_>>();

        let _lock = queue.lock();
        unsafe { self.raw.queue_submit2(queue.raw, &infos, vk::Fence::null()) }?;

        Ok(())
    }

    fn wait_queue_idle(&self, queue: &VulkanQueue) -> BackendResult<()> {
        puffin::profile_function!();
        let _lock = queue.lock();
        unsafe { self.raw.queue_wait_idle(queue.raw) }?;

        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> BackendResult<vk::Semaphore> {
        let mut timeline_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::builder().push_next(&mut timeline_info);

        Ok(unsafe { self.raw.create_semaphore(&info, None) }?)
    }

    fn fence_value(&self, fence: &vk::Semaphore) -> BackendResult<u64> {
        Ok(unsafe { self.raw.get_semaphore_counter_value(*fence) }?)
    }

    fn wait_fence(
        &self,
        fence: &vk::Semaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> BackendResult<bool> {
        let timeout = timeout.map_or(u64::MAX, |timeout| {
            timeout.as_nanos().min(u64::MAX as u128) as u64
        });
        let info = vk::SemaphoreWaitInfo::builder()
            .semaphores(slice::from_ref(fence))
            .values(slice::from_ref(&value));
        match unsafe { self.raw.wait_semaphores(&info, timeout) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn signal_fence(&self, fence: &vk::Semaphore, value: u64) -> BackendResult<()> {
        let info = vk::SemaphoreSignalInfo::builder()
            .semaphore(*fence)
            .value(value);
        unsafe { self.raw.signal_semaphore(&info) }?;

        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Semaphore) {
        unsafe { self.raw.destroy_semaphore(fence, None) };
    }

    fn memory_types(&self) -> &[HeapProperties] {
        &self.memory_types
    }

    fn create_buffer(
        &self,
        desc: &BufferDesc,
        sparse: bool,
        name: Option<&str>,
    ) -> BackendResult<(VulkanBuffer, MemoryRequirements)> {
        if desc.size == 0 || (sparse && self.pdevice.features.sparse_binding == vk::FALSE) {
            return Err(BackendError::NotSupported);
        }
        let (sharing_mode, families) = self.sharing();
        let flags = if sparse {
            vk::BufferCreateFlags::SPARSE_BINDING
        } else {
            vk::BufferCreateFlags::empty()
        };
        let info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(desc.usage.into())
            .flags(flags)
            .sharing_mode(sharing_mode)
            .queue_family_indices(families)
            .build();
        let raw = unsafe { self.raw.create_buffer(&info, None) }?;
        if let Some(name) = name {
            self.set_object_name(raw, name);
        }
        let requirements = unsafe { self.raw.get_buffer_memory_requirements(raw) };

        Ok((
            VulkanBuffer { raw, desc: *desc },
            MemoryRequirements {
                size: requirements.size,
                alignment: requirements.alignment,
                memory_type_bits: requirements.memory_type_bits,
            },
        ))
    }

    fn create_texture(
        &self,
        desc: &TextureDesc,
        sparse: bool,
        name: Option<&str>,
    ) -> BackendResult<(VulkanTexture, MemoryRequirements)> {
        if desc.extent.contains(&0)
            || desc.format == Format::Unknown
            || (sparse && self.pdevice.features.sparse_binding == vk::FALSE)
        {
            return Err(BackendError::NotSupported);
        }
        let (sharing_mode, families) = self.sharing();
        let mut flags = vk::ImageCreateFlags::empty();
        if desc.cube_compatible {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }
        if sparse {
            flags |= vk::ImageCreateFlags::SPARSE_BINDING;
        }
        let info = vk::ImageCreateInfo::builder()
            .image_type(desc.dimension.into())
            .format(desc.format.into())
            .extent(vk::Extent3D {
                width: desc.extent[0],
                height: desc.extent[1],
                depth: desc.extent[2],
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples.into())
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage.into())
            .flags(flags)
            .sharing_mode(sharing_mode)
            .queue_family_indices(families)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build();
        let raw = unsafe { self.raw.create_image(&info, None) }?;
        if let Some(name) = name {
            self.set_object_name(raw, name);
        }
        let requirements = unsafe { self.raw.get_image_memory_requirements(raw) };

        Ok((
            VulkanTexture { raw, desc: *desc },
            MemoryRequirements {
                size: requirements.size,
                alignment: requirements.alignment,
                memory_type_bits: requirements.memory_type_bits,
            },
        ))
    }

    fn destroy_buffer(&self, buffer: VulkanBuffer) {
        unsafe { self.raw.destroy_buffer(buffer.raw, None) };
    }

    fn destroy_texture(&self, texture: VulkanTexture) {
        unsafe { self.raw.destroy_image(texture.raw, None) };
    }

    fn allocate_memory(&self, request: &MemoryRequest) -> BackendResult<GpuMemory> {
        puffin::profile_function!();
        let gpu_request = Request {
            size: request.size,
            align_mask: request.alignment.max(1) - 1,
            usage: usage_flags(request.properties),
            memory_types: request.memory_types,
        };
        let mut allocator = self.memory_allocator.lock();
        let device = AshMemoryDevice::wrap(&self.raw);

        Ok(if request.dedicated {
            unsafe { allocator.alloc_with_dedicated(device, gpu_request, Dedicated::Required) }
        } else {
            unsafe { allocator.alloc(device, gpu_request) }
        }?)
    }

    fn free_memory(&self, memory: GpuMemory) {
        let mut allocator = self.memory_allocator.lock();
        unsafe { allocator.dealloc(AshMemoryDevice::wrap(&self.raw), memory) };
    }

    fn bind_memory(&self, resource: &RawResource<Self>, memory: &GpuMemory) -> BackendResult<()> {
        match resource {
            RawResource::Buffer(buffer) => unsafe {
                self.raw
                    .bind_buffer_memory(buffer.raw, *memory.memory(), memory.offset())
            }?,
            RawResource::Texture(texture) => unsafe {
                self.raw
                    .bind_image_memory(texture.raw, *memory.memory(), memory.offset())
            }?,
        }

        Ok(())
    }

    fn create_shader_resource_view(
        &self,
        resource: &RawResource<Self>,
        desc: &SrvDesc,
    ) -> BackendResult<VulkanView> {
        if let SrvDimension::Buffer {
            first_element,
            num_elements,
            stride,
            raw,
        } = desc.dimension
        {
            let buffer = expect_buffer(resource)?;
            return self.create_buffer_view(
                buffer,
                desc.format,
                first_element,
                num_elements,
                stride,
                raw,
            );
        }

        let texture = expect_texture(resource)?;
        let format = view_format(desc.format, texture);
        let aspect = sampled_aspect(format);
        let range = match desc.dimension {
            SrvDimension::Buffer { .. } => unreachable!(),
            SrvDimension::Texture1D {
                most_detailed_mip,
                mip_levels,
            } => {
                expect_dimension(texture, TextureDimension::Texture1D)?;
                ImageViewRange {
                    view_type: vk::ImageViewType::TYPE_1D,
                    format,
                    aspect,
                    base_mip: most_detailed_mip,
                    mip_count: mip_levels,
                    base_layer: 0,
                    layer_count: 1,
                }
            }
            SrvDimension::Texture1DArray {
                most_detailed_mip,
                mip_levels,
                first_array_slice,
                array_size,
            } => {
                expect_dimension(texture, TextureDimension::Texture1D)?;
                ImageViewRange {
                    view_type: vk::ImageViewType::TYPE_1D_ARRAY,
                    format,
                    aspect,
                    base_mip: most_detailed_mip,
                    mip_count: mip_levels,
                    base_layer: first_array_slice,
                    layer_count: array_size,
                }
            }
            SrvDimension::Texture2D {
                most_detailed_mip,
                mip_levels,
                plane_slice,
            } => {
                expect_dimension(texture, TextureDimension::Texture2D)?;
                if plane_slice != 0 {
                    return Err(BackendError::NotSupported);
                }
                ImageViewRange {
                    view_type: vk::ImageViewType::TYPE_2D,
                    format,
                    aspect,
                    base_mip: most_detailed_mip,
                    mip_count: mip_levels,
                    base_layer: 0,
                    layer_count: 1,
                }
            }
            SrvDimension::Texture2DArray {
                most_detailed_mip,
                mip_levels,
                first_array_slice,
                array_size,
            } => {
                expect_dimension(texture, TextureDimension::Texture2D)?;
                ImageViewRange {
                    view_type: vk::ImageViewType::TYPE_2D_ARRAY,
                    format,
                    aspect,
                    base_mip: most_detailed_mip,
                    mip_count: mip_levels,
                    base_layer: first_array_slice,
                    layer_count: array_size,
                }
            }
            SrvDimension::Texture2DMs => {
                expect_dimension(texture, TextureDimension::Texture2D)?;
                ImageViewRange {
                    view_type: vk::ImageViewType::TYPE_2D,
                    format,
                    aspect,
                    base_mip: 0,
                    mip_count: 1,
                    base_layer: 0,
                    layer_count: 1,
                }
            }
            SrvDimension::Texture3D {
                most_detailed_mip,
                mip_levels,
            } => {
                expect_dimension(texture, TextureDimension::Texture3D)?;
                ImageViewRange {
                    view_type: vk::ImageViewType::TYPE_3D,
                    format,
                    aspect,
                    base_mip: most_detailed_mip,
                    mip_count: mip_levels,
                    base_layer: 0,
                    layer_count: 1,
                }
            }
            SrvDimension::TextureCube {
                most_detailed_mip,
                mip_levels,
            } => {
                if !texture.desc.cube_compatible {
                    return Err(BackendError::ViewDimensionMismatch);
                }
                ImageViewRange {
                    view_type: vk::ImageViewType::CUBE,
                    format,
                    aspect,
                    base_mip: most_detailed_mip,
                    mip_count: mip_levels,
                    base_layer: 0,
                    layer_count: 6,
                }
            }
        };

        self.create_image_view(texture, range)
    }

    fn create_unordered_access_view(
        &self,
        resource: &RawResource<Self>,
        desc: &UavDesc,
    ) -> BackendResult<VulkanView> {
        if let UavDimension::Buffer {
            first_element,
            num_elements,
            stride,
            raw,
        } = desc.dimension
        {
            let buffer = expect_buffer(resource)?;
            return self.create_buffer_view(
                buffer,
                desc.format,
                first_element,
                num_elements,
                stride,
                raw,
            );
        }

        let texture = expect_texture(resource)?;
        let format = view_format(desc.format, texture);
        let aspect = vk::ImageAspectFlags::COLOR;
        let (view_type, dimension, mip_slice, base_layer, layer_count) = match desc.dimension {
            UavDimension::Buffer { .. } => unreachable!(),
            UavDimension::Texture1D { mip_slice } => (
                vk::ImageViewType::TYPE_1D,
                TextureDimension::Texture1D,
                mip_slice,
                0,
                1,
            ),
            UavDimension::Texture1DArray {
                mip_slice,
                first_array_slice,
                array_size,
            } => (
                vk::ImageViewType::TYPE_1D_ARRAY,
                TextureDimension::Texture1D,
                mip_slice,
                first_array_slice,
                array_size,
            ),
            UavDimension::Texture2D {
                mip_slice,
                plane_slice,
            } => {
                if plane_slice != 0 {
                    return Err(BackendError::NotSupported);
                }
                (
                    vk::ImageViewType::TYPE_2D,
                    TextureDimension::Texture2D,
                    mip_slice,
                    0,
                    1,
                )
            }
            UavDimension::Texture2DArray {
                mip_slice,
                first_array_slice,
                array_size,
            } => (
                vk::ImageViewType::TYPE_2D_ARRAY,
                TextureDimension::Texture2D,
                mip_slice,
                first_array_slice,
                array_size,
            ),
            // Storage views of volumes always see full depth.
            UavDimension::Texture3D { mip_slice, .. } => (
                vk::ImageViewType::TYPE_3D,
                TextureDimension::Texture3D,
                mip_slice,
                0,
                1,
            ),
        };
        expect_dimension(texture, dimension)?;

        self.create_image_view(
            texture,
            ImageViewRange {
                view_type,
                format,
                aspect,
                base_mip: mip_slice,
                mip_count: 1,
                base_layer,
                layer_count,
            },
        )
    }

    fn create_render_target_view(
        &self,
        resource: &RawResource<Self>,
        desc: &RtvDesc,
    ) -> BackendResult<VulkanView> {
        let texture = expect_texture(resource)?;
        let format = view_format(desc.format, texture);
        let (view_type, dimension, mip_slice, base_layer, layer_count) = match desc.dimension {
            RtvDimension::Buffer { .. } => return Err(BackendError::NotSupported),
            RtvDimension::Texture1D { mip_slice } => (
                vk::ImageViewType::TYPE_1D,
                TextureDimension::Texture1D,
                mip_slice,
                0,
                1,
            ),
            RtvDimension::Texture2D {
                mip_slice,
                plane_slice,
            } => {
                if plane_slice != 0 {
                    return Err(BackendError::NotSupported);
                }
                (
                    vk::ImageViewType::TYPE_2D,
                    TextureDimension::Texture2D,
                    mip_slice,
                    0,
                    1,
                )
            }
            RtvDimension::Texture2DArray {
                mip_slice,
                first_array_slice,
                array_size,
            } => (
                vk::ImageViewType::TYPE_2D_ARRAY,
                TextureDimension::Texture2D,
                mip_slice,
                first_array_slice,
                array_size,
            ),
            RtvDimension::Texture2DMs => (
                vk::ImageViewType::TYPE_2D,
                TextureDimension::Texture2D,
                0,
                0,
                1,
            ),
            RtvDimension::Texture3D { mip_slice, .. } => (
                vk::ImageViewType::TYPE_3D,
                TextureDimension::Texture3D,
                mip_slice,
                0,
                1,
            ),
        };
        expect_dimension(texture, dimension)?;

        self.create_image_view(
            texture,
            ImageViewRange {
                view_type,
                format,
                aspect: vk::ImageAspectFlags::COLOR,
                base_mip: mip_slice,
                mip_count: 1,
                base_layer,
                layer_count,
            },
        )
    }

    fn create_depth_stencil_view(
        &self,
        resource: &RawResource<Self>,
        desc: &DsvDesc,
    ) -> BackendResult<VulkanView> {
        let texture = expect_texture(resource)?;
        let format = view_format(desc.format, texture);
        if !format.is_depth() {
            return Err(BackendError::NotSupported);
        }
        let (view_type, dimension, mip_slice, base_layer, layer_count) = match desc.dimension {
            DsvDimension::Texture1D { mip_slice } => (
                vk::ImageViewType::TYPE_1D,
                TextureDimension::Texture1D,
                mip_slice,
                0,
                1,
            ),
            DsvDimension::Texture1DArray {
                mip_slice,
                first_array_slice,
                array_size,
            } => (
                vk::ImageViewType::TYPE_1D_ARRAY,
                TextureDimension::Texture1D,
                mip_slice,
                first_array_slice,
                array_size,
            ),
            DsvDimension::Texture2D { mip_slice } => (
                vk::ImageViewType::TYPE_2D,
                TextureDimension::Texture2D,
                mip_slice,
                0,
                1,
            ),
            DsvDimension::Texture2DArray {
                mip_slice,
                first_array_slice,
                array_size,
            } => (
                vk::ImageViewType::TYPE_2D_ARRAY,
                TextureDimension::Texture2D,
                mip_slice,
                first_array_slice,
                array_size,
            ),
            DsvDimension::Texture2DMs => (
                vk::ImageViewType::TYPE_2D,
                TextureDimension::Texture2D,
                0,
                0,
                1,
            ),
        };
        expect_dimension(texture, dimension)?;

        self.create_image_view(
            texture,
            ImageViewRange {
                view_type,
                format,
                aspect: aspect_of(format),
                base_mip: mip_slice,
                mip_count: 1,
                base_layer,
                layer_count,
            },
        )
    }

    fn destroy_view(&self, view: VulkanView) {
        match view {
            VulkanView::Image(view) => unsafe { self.raw.destroy_image_view(view, None) },
            VulkanView::TexelBuffer(view) => unsafe { self.raw.destroy_buffer_view(view, None) },
            VulkanView::Range { .. } => {}
        }
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> BackendResult<vk::Sampler> {
        let anisotropy = desc.anisotropy_level > 0
            && desc.texel_filter == Filter::Linear
            && self.pdevice.features.sampler_anisotropy == vk::TRUE;
        let max_anisotropy = desc
            .anisotropy_level
            .min(self.pdevice.properties.limits.max_sampler_anisotropy as u32);
        let address_mode = desc.address_mode.into();
        let sampler_create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.texel_filter.into())
            .min_filter(desc.texel_filter.into())
            .mipmap_mode(desc.mipmap_filter.into())
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .max_lod(vk::LOD_CLAMP_NONE)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy { max_anisotropy as f32 } else { 1.0 })
            .compare_enable(desc.compare.is_some())
            .compare_op(desc.compare.map_or(vk::CompareOp::NEVER, |op| op.into()))
            .build();

        Ok(unsafe { self.raw.create_sampler(&sampler_create_info, None) }?)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.raw.destroy_sampler(sampler, None) };
    }

    fn swapchain_images(
        &self,
        swapchain: &VulkanSwapchain,
    ) -> BackendResult<Vec<(VulkanTexture, TextureDesc)>> {
        Ok(swapchain
            .images()
            .iter()
            .map(|raw| {
                let texture = VulkanTexture {
                    raw: *raw,
                    desc: swapchain.desc(),
                };
                (texture, swapchain.desc())
            })
            .collect())
    }

    fn acquire_next_image(
        &self,
        swapchain: &VulkanSwapchain,
        timeout: Duration,
    ) -> BackendResult<AcquireStatus> {
        swapchain.acquire(self, timeout)
    }

    fn present(
        &self,
        queue: &VulkanQueue,
        swapchain: &VulkanSwapchain,
        image_index: u32,
    ) -> BackendResult<PresentStatus> {
        swapchain.present(self, queue, image_index)
    }

    fn destroy_swapchain(&self, swapchain: VulkanSwapchain) {
        swapchain.destroy(self);
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(err) = unsafe { self.raw.device_wait_idle() } {
            warn!("Device wait idle failed: {:?}", err);
        }
        info!("Cleanup...");
        unsafe {
            self.memory_allocator
                .lock()
                .cleanup(AshMemoryDevice::wrap(&self.raw));
            self.raw.destroy_device(None);
        }
    }
}
