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

use ash::vk;

use crate::{
    AddressMode, BufferUsage, CompareOp, Filter, Format, HeapProperties, TextureDimension,
    TextureSamples, TextureUsage,
};

impl From<Format> for vk::Format {
    fn from(value: Format) -> Self {
        match value {
            Format::Unknown => vk::Format::UNDEFINED,
            Format::R8Unorm => vk::Format::R8_UNORM,
            Format::Rg8Unorm => vk::Format::R8G8_UNORM,
            Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            Format::Rgb10A2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
            Format::R16Float => vk::Format::R16_SFLOAT,
            Format::Rg16Float => vk::Format::R16G16_SFLOAT,
            Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            Format::R32Uint => vk::Format::R32_UINT,
            Format::R32Float => vk::Format::R32_SFLOAT,
            Format::Rg32Float => vk::Format::R32G32_SFLOAT,
            Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
            Format::D16 => vk::Format::D16_UNORM,
            Format::D24S8 => vk::Format::D24_UNORM_S8_UINT,
            Format::D32 => vk::Format::D32_SFLOAT,
            Format::D32S8 => vk::Format::D32_SFLOAT_S8_UINT,
        }
    }
}

/// Swap chain formats we know how to describe.
pub(super) fn format_from_vk(format: vk::Format) -> Format {
    match format {
        vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => Format::Bgra8Srgb,
        vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::Rgba8Srgb,
        vk::Format::A2B10G10R10_UNORM_PACK32 => Format::Rgb10A2Unorm,
        vk::Format::R16G16B16A16_SFLOAT => Format::Rgba16Float,
        _ => Format::Unknown,
    }
}

pub(super) fn aspect_of(format: Format) -> vk::ImageAspectFlags {
    match (format.is_depth(), format.has_stencil()) {
        (true, true) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        (true, false) => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

impl From<BufferUsage> for vk::BufferUsageFlags {
    fn from(value: BufferUsage) -> Self {
        let mut result = vk::BufferUsageFlags::empty();
        if value.contains(BufferUsage::Vertex) {
            result |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if value.contains(BufferUsage::Index) {
            result |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if value.contains(BufferUsage::Uniform) {
            result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if value.contains(BufferUsage::Storage) {
            result |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if value.contains(BufferUsage::Destination) {
            result |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        if value.contains(BufferUsage::Source) {
            result |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if value.contains(BufferUsage::Indirect) {
            result |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }
        if value.contains(BufferUsage::UniformTexel) {
            result |= vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER;
        }
        if value.contains(BufferUsage::StorageTexel) {
            result |= vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER;
        }

        result
    }
}

impl From<TextureUsage> for vk::ImageUsageFlags {
    fn from(value: TextureUsage) -> Self {
        let mut result = vk::ImageUsageFlags::empty();
        if value.contains(TextureUsage::Sampled) {
            result |= vk::ImageUsageFlags::SAMPLED;
        }
        if value.contains(TextureUsage::Storage) {
            result |= vk::ImageUsageFlags::STORAGE;
        }
        if value.contains(TextureUsage::ColorTarget) {
            result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if value.contains(TextureUsage::DepthStencilTarget) {
            result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if value.contains(TextureUsage::Destination) {
            result |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if value.contains(TextureUsage::Source) {
            result |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        result
    }
}

impl From<TextureSamples> for vk::SampleCountFlags {
    fn from(value: TextureSamples) -> Self {
        match value {
            TextureSamples::None => vk::SampleCountFlags::TYPE_1,
            TextureSamples::MSAA2 => vk::SampleCountFlags::TYPE_2,
            TextureSamples::MSAA4 => vk::SampleCountFlags::TYPE_4,
            TextureSamples::MSAA8 => vk::SampleCountFlags::TYPE_8,
        }
    }
}

impl From<TextureDimension> for vk::ImageType {
    fn from(value: TextureDimension) -> Self {
        match value {
            TextureDimension::Texture1D => vk::ImageType::TYPE_1D,
            TextureDimension::Texture2D => vk::ImageType::TYPE_2D,
            TextureDimension::Texture3D => vk::ImageType::TYPE_3D,
        }
    }
}

impl From<Filter> for vk::Filter {
    fn from(value: Filter) -> Self {
        match value {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

impl From<Filter> for vk::SamplerMipmapMode {
    fn from(value: Filter) -> Self {
        match value {
            Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
            Filter::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

impl From<AddressMode> for vk::SamplerAddressMode {
    fn from(value: AddressMode) -> Self {
        match value {
            AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

impl From<CompareOp> for vk::CompareOp {
    fn from(value: CompareOp) -> Self {
        match value {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

impl From<vk::MemoryPropertyFlags> for HeapProperties {
    fn from(value: vk::MemoryPropertyFlags) -> Self {
        let mut result = HeapProperties::empty();
        if value.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            result |= HeapProperties::DEVICE_LOCAL;
        }
        if value.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            result |= HeapProperties::HOST_VISIBLE;
        }
        if value.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
            result |= HeapProperties::HOST_COHERENT;
        }
        if value.contains(vk::MemoryPropertyFlags::HOST_CACHED) {
            result |= HeapProperties::HOST_CACHED;
        }
        if value.contains(vk::MemoryPropertyFlags::LAZILY_ALLOCATED) {
            result |= HeapProperties::LAZILY_ALLOCATED;
        }

        result
    }
}

/// Allocator hints for a request. Memory type mask is already filtered, this
/// only steers `gpu-alloc` between candidates.
pub(super) fn usage_flags(properties: HeapProperties) -> gpu_alloc::UsageFlags {
    let mut usage = gpu_alloc::UsageFlags::empty();
    if properties.contains(HeapProperties::DEVICE_LOCAL) {
        usage |= gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS;
    }
    if properties.contains(HeapProperties::HOST_VISIBLE) {
        usage |= gpu_alloc::UsageFlags::HOST_ACCESS;
        if properties.contains(HeapProperties::HOST_CACHED) {
            usage |= gpu_alloc::UsageFlags::DOWNLOAD;
        } else {
            usage |= gpu_alloc::UsageFlags::UPLOAD;
        }
    }
    if properties.contains(HeapProperties::LAZILY_ALLOCATED) {
        usage |= gpu_alloc::UsageFlags::TRANSIENT;
    }

    usage
}

#[cfg(test)]
mod test {
    use ash::vk;

    use crate::{Format, HeapProperties};

    use super::{aspect_of, format_from_vk, usage_flags};

    #[test]
    fn depth_aspect() {
        assert_eq!(vk::ImageAspectFlags::COLOR, aspect_of(Format::Rgba8Unorm));
        assert_eq!(vk::ImageAspectFlags::DEPTH, aspect_of(Format::D32));
        assert_eq!(
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            aspect_of(Format::D24S8)
        );
    }

    #[test]
    fn swapchain_formats_map_back() {
        let vk_format: vk::Format = Format::Bgra8Srgb.into();
        assert_eq!(Format::Bgra8Srgb, format_from_vk(vk_format));
        assert_eq!(Format::Unknown, format_from_vk(vk::Format::R4G4_UNORM_PACK8));
    }

    #[test]
    fn memory_flags_convert() {
        let properties = HeapProperties::from(
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(
            HeapProperties::HOST_VISIBLE | HeapProperties::HOST_COHERENT,
            properties
        );
        assert!(usage_flags(properties).contains(gpu_alloc::UsageFlags::UPLOAD));
        assert!(usage_flags(HeapProperties::DEVICE_LOCAL)
            .contains(gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS));
    }
}
