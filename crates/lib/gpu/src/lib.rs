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

mod buffer;
mod config;
mod device_resources;
mod disposer;
mod error;
mod fence;
mod format;
mod hal;
mod heap;
mod queue;
mod resource;
mod submission;
mod swapchain;
mod texture;
mod view;
mod view_cache;

pub mod headless;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use buffer::*;
pub use config::*;
pub use device_resources::*;
pub use disposer::*;
pub use error::*;
pub use fence::*;
pub use format::*;
pub use hal::*;
pub use heap::*;
pub use queue::*;
pub use resource::*;
pub use submission::*;
pub use swapchain::*;
pub use texture::*;
pub use view::*;
pub use view_cache::*;
