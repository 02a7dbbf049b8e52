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

//! Vulkan 1.3 backend.
//!
//! Fences are timeline semaphores, batches go through `vkQueueSubmit2`,
//! memory is suballocated with `gpu-alloc`.

mod conv;
mod device;
mod instance;
mod physical_device;
mod swapchain;

use ash::vk;

pub use device::*;
pub use instance::*;
pub use physical_device::*;
pub use swapchain::*;

pub type GpuAllocator = gpu_alloc::GpuAllocator<vk::DeviceMemory>;
pub type GpuMemory = gpu_alloc::MemoryBlock<vk::DeviceMemory>;
