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

use thiserror::Error;

#[cfg(feature = "vulkan")]
use ash::vk;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Out of device memory")]
    OutOfDeviceMemory,
    #[error("Out of host memory")]
    OutOfHostMemory,
    #[error("Too many objects")]
    TooManyObjects,
    #[error("Device lost")]
    DeviceLost,
    #[error("Not supported")]
    NotSupported,
    #[error("Vulkan not found or failed to load")]
    VulkanFailedToLoad,
    #[error("Can't find suitable device")]
    NoSuitableDevice,
    #[error("Extension {0} not found")]
    ExtensionNotFound(String),
    #[error("Can't find suitable queue")]
    NoSuitableQueue,
    #[error("Queue {0:?} isn't enabled")]
    QueueNotEnabled(crate::QueueKind),
    #[error("Can't find suitable surface format")]
    NoSuitableFormat,
    #[error("View descriptor doesn't match resource type")]
    ViewDimensionMismatch,
    #[error("View cache isn't bound to a resource")]
    UnboundViewCache,
    #[error("Timeout")]
    Timeout,
    #[error("Unexpected backend result: {0}")]
    Other(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(feature = "vulkan")]
impl From<vk::Result> for BackendError {
    fn from(value: vk::Result) -> Self {
        match value {
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED
            | vk::Result::ERROR_FEATURE_NOT_PRESENT
            | vk::Result::ERROR_IMAGE_USAGE_NOT_SUPPORTED_KHR => Self::NotSupported,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfDeviceMemory,
            vk::Result::ERROR_TOO_MANY_OBJECTS => Self::TooManyObjects,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::Timeout,
            vk::Result::ERROR_EXTENSION_NOT_PRESENT => {
                Self::ExtensionNotFound("unknown".into())
            }
            _ => Self::Other(format!("{:?}", value)),
        }
    }
}

#[cfg(feature = "vulkan")]
impl From<ash::LoadingError> for BackendError {
    fn from(_: ash::LoadingError) -> Self {
        Self::VulkanFailedToLoad
    }
}

#[cfg(feature = "vulkan")]
impl From<gpu_alloc::AllocationError> for BackendError {
    fn from(value: gpu_alloc::AllocationError) -> Self {
        match value {
            gpu_alloc::AllocationError::NoCompatibleMemoryTypes => Self::NotSupported,
            gpu_alloc::AllocationError::OutOfDeviceMemory => Self::OutOfDeviceMemory,
            gpu_alloc::AllocationError::OutOfHostMemory => Self::OutOfHostMemory,
            gpu_alloc::AllocationError::TooManyObjects => Self::TooManyObjects,
        }
    }
}
