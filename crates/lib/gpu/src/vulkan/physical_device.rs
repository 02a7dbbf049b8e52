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

use std::ffi::CStr;

use ash::vk;
use log::info;

use crate::{BackendError, BackendResult, QueueKind};

use super::Instance;

#[derive(Debug, Clone, Copy)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
}

impl QueueFamily {
    pub fn is_supported(&self, flags: vk::QueueFlags) -> bool {
        self.properties.queue_count > 0 && self.properties.queue_flags.contains(flags)
    }

    fn is_exactly(&self, flags: vk::QueueFlags, excluded: vk::QueueFlags) -> bool {
        self.is_supported(flags) && !self.properties.queue_flags.intersects(excluded)
    }
}

#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    pub(crate) raw: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: Vec<QueueFamily>,
    extensions: Vec<String>,
}

impl PhysicalDevice {
    pub fn enumerate(instance: &Instance) -> BackendResult<Vec<Self>> {
        let devices = unsafe { instance.raw.enumerate_physical_devices() }?;
        devices
            .into_iter()
            .map(|raw| -> BackendResult<Self> {
                let properties = unsafe { instance.raw.get_physical_device_properties(raw) };
                let memory_properties =
                    unsafe { instance.raw.get_physical_device_memory_properties(raw) };
                let features = unsafe { instance.raw.get_physical_device_features(raw) };
                let queue_families =
                    unsafe { instance.raw.get_physical_device_queue_family_properties(raw) }
                        .into_iter()
                        .enumerate()
                        .map(|(index, properties)| QueueFamily {
                            index: index as u32,
                            properties,
                        })
                        .collect();
                let extensions =
                    unsafe { instance.raw.enumerate_device_extension_properties(raw) }?
                        .iter()
                        .map(|x| {
                            unsafe { CStr::from_ptr(x.extension_name.as_ptr()) }
                                .to_string_lossy()
                                .into_owned()
                        })
                        .collect();

                Ok(Self {
                    raw,
                    properties,
                    memory_properties,
                    features,
                    queue_families,
                    extensions,
                })
            })
            .collect()
    }

    /// Picks the best device able to run Vulkan 1.3 with a universal queue.
    /// Discrete GPUs go first, then integrated ones.
    pub fn select(devices: Vec<Self>) -> BackendResult<Self> {
        let device = devices
            .into_iter()
            .filter(|device| {
                device.properties.api_version >= Instance::vulkan_version()
                    && device.family(QueueKind::Graphics).is_some()
            })
            .min_by_key(|device| match device.properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                _ => 3,
            })
            .ok_or(BackendError::NoSuitableDevice)?;
        info!(
            "Selected device {} ({:?})",
            device.name(),
            device.properties.device_type
        );

        Ok(device)
    }

    pub fn raw(&self) -> vk::PhysicalDevice {
        self.raw
    }

    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    pub fn is_queue_flag_supported(&self, flags: vk::QueueFlags) -> bool {
        self.queue_families
            .iter()
            .any(|family| family.is_supported(flags))
    }

    pub fn is_extension_supported(&self, name: &str) -> bool {
        self.extensions.iter().any(|x| x == name)
    }

    pub fn get_queue(&self, flags: vk::QueueFlags) -> Option<QueueFamily> {
        self.queue_families
            .iter()
            .find(|family| family.is_supported(flags))
            .copied()
    }

    /// Family that serves given queue kind. Compute and copy prefer dedicated
    /// families and fall back to the universal one.
    pub fn family(&self, kind: QueueKind) -> Option<QueueFamily> {
        let universal =
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let dedicated = |flags, excluded| {
            self.queue_families
                .iter()
                .find(|family| family.is_exactly(flags, excluded))
                .copied()
        };
        match kind {
            QueueKind::Graphics => self.get_queue(universal),
            QueueKind::Compute => dedicated(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS)
                .or_else(|| self.get_queue(universal)),
            QueueKind::Copy => dedicated(
                vk::QueueFlags::TRANSFER,
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            )
            .or_else(|| dedicated(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS))
            .or_else(|| self.get_queue(universal)),
        }
    }
}

#[cfg(test)]
mod test {
    use ash::vk;

    use crate::QueueKind;

    use super::{PhysicalDevice, QueueFamily};

    fn device(families: &[vk::QueueFlags]) -> PhysicalDevice {
        PhysicalDevice {
            raw: vk::PhysicalDevice::null(),
            properties: vk::PhysicalDeviceProperties::default(),
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            features: vk::PhysicalDeviceFeatures::default(),
            queue_families: families
                .iter()
                .enumerate()
                .map(|(index, flags)| QueueFamily {
                    index: index as u32,
                    properties: vk::QueueFamilyProperties {
                        queue_flags: *flags,
                        queue_count: 1,
                        ..Default::default()
                    },
                })
                .collect(),
            extensions: vec!["VK_KHR_swapchain".into()],
        }
    }

    const UNIVERSAL: vk::QueueFlags = vk::QueueFlags::from_raw(
        vk::QueueFlags::GRAPHICS.as_raw()
            | vk::QueueFlags::COMPUTE.as_raw()
            | vk::QueueFlags::TRANSFER.as_raw(),
    );

    #[test]
    fn dedicated_families_preferred() {
        let device = device(&[
            UNIVERSAL,
            vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::TRANSFER,
        ]);
        assert_eq!(0, device.family(QueueKind::Graphics).unwrap().index);
        assert_eq!(1, device.family(QueueKind::Compute).unwrap().index);
        assert_eq!(2, device.family(QueueKind::Copy).unwrap().index);
    }

    #[test]
    fn falls_back_to_universal() {
        let device = device(&[UNIVERSAL]);
        assert_eq!(0, device.family(QueueKind::Compute).unwrap().index);
        assert_eq!(0, device.family(QueueKind::Copy).unwrap().index);
    }

    #[test]
    fn copy_falls_back_to_async_compute() {
        let device = device(&[UNIVERSAL, vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER]);
        assert_eq!(1, device.family(QueueKind::Copy).unwrap().index);
    }

    #[test]
    fn no_universal_family() {
        let device = device(&[vk::QueueFlags::GRAPHICS, vk::QueueFlags::COMPUTE]);
        assert!(device.family(QueueKind::Graphics).is_none());
        assert!(device.is_extension_supported("VK_KHR_swapchain"));
    }
}
