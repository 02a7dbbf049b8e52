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

bitflags! {
    #[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        const Vertex = 1;
        const Index = 2;
        const Uniform = 4;
        const Storage = 8;
        const Destination = 16;
        const Source = 32;
        const Indirect = 64;
        const UniformTexel = 128;
        const StorageTexel = 256;
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    /// Element stride for structured access, zero for raw buffers.
    pub stride: u32,
}

impl BufferDesc {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            size,
            usage,
            stride: 0,
        }
    }

    pub fn structured(count: u64, stride: u32, usage: BufferUsage) -> Self {
        Self {
            size: count * stride as u64,
            usage,
            stride,
        }
    }

    pub fn stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }
}
