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

use std::{fmt::Debug, slice, time::Duration};

use ash::{extensions::khr, vk};
use log::{info, warn};
use parking_lot::Mutex;

use crate::{
    AcquireStatus, BackendError, BackendResult, Device, PresentStatus, QueueKind, TextureDesc,
};

use super::{conv::format_from_vk, VulkanDevice, VulkanQueue};

/// Swap chain over a platform surface. Owns the surface from the moment it's
/// created.
pub struct VulkanSwapchain {
    raw: vk::SwapchainKHR,
    surface: vk::SurfaceKHR,
    loader: khr::Swapchain,
    images: Vec<vk::Image>,
    desc: TextureDesc,
    acquire_fence: vk::Fence,
    rendering_finished: Vec<vk::Semaphore>,
    acquire_lock: Mutex<()>,
}

impl Debug for VulkanSwapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSwapchain")
            .field("raw", &self.raw)
            .field("images", &self.images)
            .field("desc", &self.desc)
            .finish()
    }
}

impl VulkanSwapchain {
    pub fn new(
        device: &VulkanDevice,
        surface: vk::SurfaceKHR,
        resolution: [u32; 2],
    ) -> BackendResult<Self> {
        info!(
            "Create swapchain for resolution {} x {}",
            resolution[0], resolution[1]
        );
        let loader = device
            .swapchain_loader
            .clone()
            .ok_or_else(|| BackendError::ExtensionNotFound("VK_KHR_swapchain".into()))?;
        let surface_loader = device.instance.surface_loader()?;
        let pdevice = device.pdevice.raw();

        let family = device
            .queue(QueueKind::Graphics)
            .ok_or(BackendError::QueueNotEnabled(QueueKind::Graphics))?
            .family();
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(pdevice, family, surface)
        }?;
        if !supported {
            return Err(BackendError::NotSupported);
        }

        let surface_capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(pdevice, surface)
        }?;
        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(pdevice, surface) }?;
        let format = Self::select_surface_format(&formats).ok_or(BackendError::NoSuitableFormat)?;

        let mut desired_image_count = 3u32.max(surface_capabilities.min_image_count);
        if surface_capabilities.max_image_count != 0 {
            desired_image_count = desired_image_count.min(surface_capabilities.max_image_count);
        }
        info!("Swapchain image count {}", desired_image_count);

        let surface_resolution = match surface_capabilities.current_extent.width {
            u32::MAX => vk::Extent2D {
                width: resolution[0],
                height: resolution[1],
            },
            _ => surface_capabilities.current_extent,
        };
        if surface_resolution.width == 0 || surface_resolution.height == 0 {
            warn!("Can't create swapchain for surface with zero size");
            return Err(BackendError::NotSupported);
        }

        let present_mode_preferences = [vk::PresentModeKHR::FIFO_RELAXED, vk::PresentModeKHR::FIFO];
        let present_modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(pdevice, surface) }?;
        let present_mode = present_mode_preferences
            .into_iter()
            .find(|mode| present_modes.contains(mode))
            .unwrap_or(vk::PresentModeKHR::FIFO);
        info!(
            "Swapchain format: {:?}, presentation mode: {:?}",
            format.format, present_mode
        );

        let pre_transform = if surface_capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            surface_capabilities.current_transform
        };

        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(desired_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(surface_resolution)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1)
            .build();

        let raw = unsafe { loader.create_swapchain(&swapchain_create_info, None) }?;
        let images = unsafe { loader.get_swapchain_images(raw) }?;
        images.iter().enumerate().for_each(|(index, image)| {
            device.set_object_name(*image, &format!("swapchain_image_{}", index));
        });

        let acquire_fence = unsafe {
            device
                .raw
                .create_fence(&vk::FenceCreateInfo::default(), None)
        }?;
        let rendering_finished = (0..images.len())
            .map(|index| -> BackendResult<vk::Semaphore> {
                let semaphore = unsafe {
                    device
                        .raw
                        .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                }?;
                device.set_object_name(semaphore, &format!("Rendering semaphore #{}", index));
                Ok(semaphore)
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let desc = TextureDesc::color_attachment(
            format_from_vk(format.format),
            [surface_resolution.width, surface_resolution.height],
        );

        Ok(Self {
            raw,
            surface,
            loader,
            images,
            desc,
            acquire_fence,
            rendering_finished,
            acquire_lock: Mutex::new(()),
        })
    }

    fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
        let prefered = [
            vk::SurfaceFormatKHR {
                format: vk::Format::A2B10G10R10_UNORM_PACK32,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        prefered.into_iter().find(|format| formats.contains(format))
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.raw
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    pub(super) fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Returns once the image is actually free, so work submitted after this
    /// call needs no extra wait.
    pub(super) fn acquire(
        &self,
        device: &VulkanDevice,
        timeout: Duration,
    ) -> BackendResult<AcquireStatus> {
        puffin::profile_scope!("wait for swapchain");
        let _lock = self.acquire_lock.lock();
        let timeout = timeout.as_nanos().min(u64::MAX as u128) as u64;
        match unsafe {
            self.loader.acquire_next_image(
                self.raw,
                timeout,
                vk::Semaphore::null(),
                self.acquire_fence,
            )
        } {
            Ok((index, _)) => {
                unsafe {
                    device.raw.wait_for_fences(
                        slice::from_ref(&self.acquire_fence),
                        true,
                        u64::MAX,
                    )?;
                    device
                        .raw
                        .reset_fences(slice::from_ref(&self.acquire_fence))?;
                }
                Ok(AcquireStatus::Acquired(index))
            }
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Ok(AcquireStatus::Timeout),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    /// Everything submitted to `queue` before this call finishes before the
    /// image is shown.
    pub(super) fn present(
        &self,
        device: &VulkanDevice,
        queue: &VulkanQueue,
        image_index: u32,
    ) -> BackendResult<PresentStatus> {
        puffin::profile_scope!("present");
        let semaphore = *self
            .rendering_finished
            .get(image_index as usize)
            .ok_or_else(|| {
                BackendError::Other(format!("Swap chain has no image {}", image_index))
            })?;
        let signal = vk::SemaphoreSubmitInfo::builder()
            .semaphore(semaphore)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .build();
        let submit = vk::SubmitInfo2::builder()
            .signal_semaphore_infos(slice::from_ref(&signal))
            .build();
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(slice::from_ref(&semaphore))
            .swapchains(slice::from_ref(&self.raw))
            .image_indices(slice::from_ref(&image_index))
            .build();

        let _lock = queue.lock();
        unsafe {
            device
                .raw
                .queue_submit2(queue.raw, slice::from_ref(&submit), vk::Fence::null())
        }?;
        match unsafe { self.loader.queue_present(queue.raw, &present_info) } {
            Ok(_) => Ok(PresentStatus::Presented),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    pub(super) fn destroy(self, device: &VulkanDevice) {
        if let Err(err) = unsafe { device.raw.device_wait_idle() } {
            warn!("Wait idle before swapchain destruction failed: {:?}", err);
        }
        unsafe {
            for semaphore in &self.rendering_finished {
                device.raw.destroy_semaphore(*semaphore, None);
            }
            device.raw.destroy_fence(self.acquire_fence, None);
            self.loader.destroy_swapchain(self.raw, None);
        }
        match device.instance.surface_loader() {
            Ok(surface_loader) => unsafe { surface_loader.destroy_surface(self.surface, None) },
            Err(err) => warn!("Surface leaked: {}", err),
        }
    }
}
