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

use bitflags::bitflags;

use crate::Format;

#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
pub enum TextureDimension {
    Texture1D,
    #[default]
    Texture2D,
    Texture3D,
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
    pub struct TextureUsage: u32 {
        const Sampled = 1;
        const Storage = 2;
        const ColorTarget = 4;
        const DepthStencilTarget = 8;
        const Destination = 16;
        const Source = 32;
    }
}

#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
pub enum TextureSamples {
    #[default]
    None,
    MSAA2,
    MSAA4,
    MSAA8,
}

impl TextureSamples {
    pub fn count(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::MSAA2 => 2,
            Self::MSAA4 => 4,
            Self::MSAA8 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    /// Width, height and depth. Unused axes are 1.
    pub extent: [u32; 3],
    pub array_layers: u32,
    pub mip_levels: u32,
    pub samples: TextureSamples,
    pub format: Format,
    pub usage: TextureUsage,
    pub cube_compatible: bool,
}

impl TextureDesc {
    pub fn new(format: Format, extent: [u32; 2]) -> Self {
        Self {
            dimension: TextureDimension::Texture2D,
            extent: [extent[0], extent[1], 1],
            array_layers: 1,
            mip_levels: 1,
            samples: TextureSamples::None,
            format,
            usage: TextureUsage::empty(),
            cube_compatible: false,
        }
    }

    pub fn texture(format: Format, extent: [u32; 2]) -> Self {
        Self::new(format, extent).usage(TextureUsage::Sampled | TextureUsage::Destination)
    }

    pub fn cubemap(format: Format, extent: [u32; 2]) -> Self {
        let mut desc = Self::texture(format, extent).array_layers(6);
        desc.cube_compatible = true;
        desc
    }

    pub fn color_attachment(format: Format, extent: [u32; 2]) -> Self {
        Self::new(format, extent).usage(TextureUsage::ColorTarget | TextureUsage::Sampled)
    }

    pub fn depth_stencil_attachment(format: Format, extent: [u32; 2]) -> Self {
        Self::new(format, extent).usage(TextureUsage::DepthStencilTarget)
    }

    pub fn volume(format: Format, extent: [u32; 3]) -> Self {
        Self {
            dimension: TextureDimension::Texture3D,
            extent,
            ..Self::texture(format, [extent[0], extent[1]])
        }
    }

    pub fn usage(mut self, value: TextureUsage) -> Self {
        self.usage = value;
        self
    }

    pub fn mip_levels(mut self, value: u32) -> Self {
        self.mip_levels = value;
        self
    }

    pub fn array_layers(mut self, value: u32) -> Self {
        self.array_layers = value;
        self
    }

    pub fn samples(mut self, value: TextureSamples) -> Self {
        self.samples = value;
        self
    }

    pub fn dimension(mut self, value: TextureDimension) -> Self {
        self.dimension = value;
        self
    }
}
