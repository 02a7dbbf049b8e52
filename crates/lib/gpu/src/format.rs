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

#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Format {
    #[default]
    Unknown,
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    Rgb10A2Unorm,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Uint,
    R32Float,
    Rg32Float,
    Rgba32Float,
    D16,
    D24S8,
    D32,
    D32S8,
}

impl Format {
    pub fn is_depth(&self) -> bool {
        matches!(self, Self::D16 | Self::D24S8 | Self::D32 | Self::D32S8)
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::D24S8 | Self::D32S8)
    }

    /// Size of one texel or buffer element in bytes.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R8Unorm => 1,
            Self::Rg8Unorm | Self::R16Float | Self::D16 => 2,
            Self::Rgba8Unorm
            | Self::Rgba8Srgb
            | Self::Bgra8Unorm
            | Self::Bgra8Srgb
            | Self::Rgb10A2Unorm
            | Self::Rg16Float
            | Self::R32Uint
            | Self::R32Float
            | Self::D24S8
            | Self::D32 => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::D32S8 => 8,
            Self::Rgba32Float => 16,
        }
    }
}
