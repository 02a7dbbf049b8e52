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

//! View descriptors.
//!
//! Every descriptor is a plain value with a dimension enum inside. Equality and
//! hashing look at the dimension tag first and only then at the fields of the
//! active variant, so a buffer view and a texture view never collide in a
//! cache even if their numbers happen to match.

use std::{fmt::Debug, hash::Hash};

use crate::{BackendError, BackendResult, Device, Format, RawResource};

/// Use every mip level starting from the most detailed one.
pub const ALL_MIPS: u32 = u32::MAX;
/// Use every array layer starting from the first one.
pub const ALL_LAYERS: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum SrvDimension {
    Buffer {
        first_element: u64,
        num_elements: u32,
        /// Zero means typed access through the view format.
        stride: u32,
        raw: bool,
    },
    Texture1D {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    Texture1DArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        most_detailed_mip: u32,
        mip_levels: u32,
        plane_slice: u32,
    },
    Texture2DArray {
        most_detailed_mip: u32,
        mip_levels: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2DMs,
    Texture3D {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    TextureCube {
        most_detailed_mip: u32,
        mip_levels: u32,
    },
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct SrvDesc {
    /// `Format::Unknown` takes format from the resource.
    pub format: Format,
    pub dimension: SrvDimension,
}

impl SrvDesc {
    pub fn texture_2d() -> Self {
        Self {
            format: Format::Unknown,
            dimension: SrvDimension::Texture2D {
                most_detailed_mip: 0,
                mip_levels: ALL_MIPS,
                plane_slice: 0,
            },
        }
    }

    pub fn texture_2d_array(first_array_slice: u32, array_size: u32) -> Self {
        Self {
            format: Format::Unknown,
            dimension: SrvDimension::Texture2DArray {
                most_detailed_mip: 0,
                mip_levels: ALL_MIPS,
                first_array_slice,
                array_size,
            },
        }
    }

    pub fn cube() -> Self {
        Self {
            format: Format::Unknown,
            dimension: SrvDimension::TextureCube {
                most_detailed_mip: 0,
                mip_levels: ALL_MIPS,
            },
        }
    }

    pub fn structured(first_element: u64, num_elements: u32, stride: u32) -> Self {
        Self {
            format: Format::Unknown,
            dimension: SrvDimension::Buffer {
                first_element,
                num_elements,
                stride,
                raw: false,
            },
        }
    }

    pub fn typed(format: Format, first_element: u64, num_elements: u32) -> Self {
        Self {
            format,
            dimension: SrvDimension::Buffer {
                first_element,
                num_elements,
                stride: 0,
                raw: false,
            },
        }
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn is_buffer_view(&self) -> bool {
        matches!(self.dimension, SrvDimension::Buffer { .. })
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum UavDimension {
    Buffer {
        first_element: u64,
        num_elements: u32,
        stride: u32,
        raw: bool,
    },
    Texture1D {
        mip_slice: u32,
    },
    Texture1DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        mip_slice: u32,
        plane_slice: u32,
    },
    Texture2DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture3D {
        mip_slice: u32,
        first_w_slice: u32,
        w_size: u32,
    },
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct UavDesc {
    pub format: Format,
    pub dimension: UavDimension,
}

impl UavDesc {
    pub fn texture_2d(mip_slice: u32) -> Self {
        Self {
            format: Format::Unknown,
            dimension: UavDimension::Texture2D {
                mip_slice,
                plane_slice: 0,
            },
        }
    }

    pub fn structured(first_element: u64, num_elements: u32, stride: u32) -> Self {
        Self {
            format: Format::Unknown,
            dimension: UavDimension::Buffer {
                first_element,
                num_elements,
                stride,
                raw: false,
            },
        }
    }

    pub fn raw(first_element: u64, num_elements: u32) -> Self {
        Self {
            format: Format::R32Uint,
            dimension: UavDimension::Buffer {
                first_element,
                num_elements,
                stride: 0,
                raw: true,
            },
        }
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn is_buffer_view(&self) -> bool {
        matches!(self.dimension, UavDimension::Buffer { .. })
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum RtvDimension {
    Buffer {
        first_element: u64,
        num_elements: u32,
    },
    Texture1D {
        mip_slice: u32,
    },
    Texture2D {
        mip_slice: u32,
        plane_slice: u32,
    },
    Texture2DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2DMs,
    Texture3D {
        mip_slice: u32,
        first_w_slice: u32,
        w_size: u32,
    },
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct RtvDesc {
    pub format: Format,
    pub dimension: RtvDimension,
}

impl RtvDesc {
    pub fn texture_2d(mip_slice: u32) -> Self {
        Self {
            format: Format::Unknown,
            dimension: RtvDimension::Texture2D {
                mip_slice,
                plane_slice: 0,
            },
        }
    }

    pub fn texture_2d_ms() -> Self {
        Self {
            format: Format::Unknown,
            dimension: RtvDimension::Texture2DMs,
        }
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn is_buffer_view(&self) -> bool {
        matches!(self.dimension, RtvDimension::Buffer { .. })
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum DsvDimension {
    Texture1D {
        mip_slice: u32,
    },
    Texture1DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2D {
        mip_slice: u32,
    },
    Texture2DArray {
        mip_slice: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    Texture2DMs,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct DsvDesc {
    pub format: Format,
    pub read_only_depth: bool,
    pub read_only_stencil: bool,
    pub dimension: DsvDimension,
}

impl DsvDesc {
    pub fn texture_2d(mip_slice: u32) -> Self {
        Self {
            format: Format::Unknown,
            read_only_depth: false,
            read_only_stencil: false,
            dimension: DsvDimension::Texture2D { mip_slice },
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only_depth = true;
        self.read_only_stencil = true;
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }
}

#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
pub struct SamplerDesc {
    pub texel_filter: Filter,
    pub mipmap_filter: Filter,
    pub address_mode: AddressMode,
    pub anisotropy_level: u32,
    pub compare: Option<CompareOp>,
}

impl SamplerDesc {
    pub fn new(texel_filter: Filter, mipmap_filter: Filter, address_mode: AddressMode) -> Self {
        Self {
            texel_filter,
            mipmap_filter,
            address_mode,
            anisotropy_level: 0,
            compare: None,
        }
    }

    pub fn anisotropy(mut self, level: u32) -> Self {
        self.anisotropy_level = level;
        self
    }

    pub fn compare(mut self, op: CompareOp) -> Self {
        self.compare = Some(op);
        self
    }
}

/// Selects creation and destruction entry points for one kind of view.
pub trait ViewKind<D: Device>: 'static {
    type Desc: Debug + Clone + Hash + Eq + Send + Sync;
    type Raw: Debug + Send + Sync;

    const NAME: &'static str;

    fn create(
        device: &D,
        owner: Option<&RawResource<D>>,
        desc: &Self::Desc,
    ) -> BackendResult<Self::Raw>;

    fn destroy(device: &D, raw: Self::Raw);
}

pub struct ShaderResource;
pub struct UnorderedAccess;
pub struct RenderTarget;
pub struct DepthStencil;
pub struct SamplerState;

fn owner_matches<D: Device>(
    owner: Option<&RawResource<D>>,
    buffer_view: bool,
) -> BackendResult<&RawResource<D>> {
    let owner = owner.ok_or(BackendError::UnboundViewCache)?;
    if owner.is_buffer() != buffer_view {
        return Err(BackendError::ViewDimensionMismatch);
    }

    Ok(owner)
}

impl<D: Device> ViewKind<D> for ShaderResource {
    type Desc = SrvDesc;
    type Raw = D::View;

    const NAME: &'static str = "shader resource view";

    fn create(
        device: &D,
        owner: Option<&RawResource<D>>,
        desc: &SrvDesc,
    ) -> BackendResult<D::View> {
        let owner = owner_matches(owner, desc.is_buffer_view())?;
        device.create_shader_resource_view(owner, desc)
    }

    fn destroy(device: &D, raw: D::View) {
        device.destroy_view(raw);
    }
}

impl<D: Device> ViewKind<D> for UnorderedAccess {
    type Desc = UavDesc;
    type Raw = D::View;

    const NAME: &'static str = "unordered access view";

    fn create(
        device: &D,
        owner: Option<&RawResource<D>>,
        desc: &UavDesc,
    ) -> BackendResult<D::View> {
        let owner = owner_matches(owner, desc.is_buffer_view())?;
        device.create_unordered_access_view(owner, desc)
    }

    fn destroy(device: &D, raw: D::View) {
        device.destroy_view(raw);
    }
}

impl<D: Device> ViewKind<D> for RenderTarget {
    type Desc = RtvDesc;
    type Raw = D::View;

    const NAME: &'static str = "render target view";

    fn create(
        device: &D,
        owner: Option<&RawResource<D>>,
        desc: &RtvDesc,
    ) -> BackendResult<D::View> {
        let owner = owner_matches(owner, desc.is_buffer_view())?;
        device.create_render_target_view(owner, desc)
    }

    fn destroy(device: &D, raw: D::View) {
        device.destroy_view(raw);
    }
}

impl<D: Device> ViewKind<D> for DepthStencil {
    type Desc = DsvDesc;
    type Raw = D::View;

    const NAME: &'static str = "depth stencil view";

    fn create(
        device: &D,
        owner: Option<&RawResource<D>>,
        desc: &DsvDesc,
    ) -> BackendResult<D::View> {
        let owner = owner_matches(owner, false)?;
        device.create_depth_stencil_view(owner, desc)
    }

    fn destroy(device: &D, raw: D::View) {
        device.destroy_view(raw);
    }
}

impl<D: Device> ViewKind<D> for SamplerState {
    type Desc = SamplerDesc;
    type Raw = D::Sampler;

    const NAME: &'static str = "sampler";

    fn create(
        device: &D,
        _owner: Option<&RawResource<D>>,
        desc: &SamplerDesc,
    ) -> BackendResult<D::Sampler> {
        device.create_sampler(desc)
    }

    fn destroy(device: &D, raw: D::Sampler) {
        device.destroy_sampler(raw);
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::hash_map::DefaultHasher,
        hash::{Hash, Hasher},
    };

    use crate::Format;

    use super::{SrvDesc, SrvDimension, UavDesc, UavDimension};

    fn hash<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn different_dimensions_never_equal() {
        let line = SrvDesc {
            format: Format::Unknown,
            dimension: SrvDimension::Texture1D {
                most_detailed_mip: 0,
                mip_levels: 1,
            },
        };
        let volume = SrvDesc {
            format: Format::Unknown,
            dimension: SrvDimension::Texture3D {
                most_detailed_mip: 0,
                mip_levels: 1,
            },
        };
        assert_ne!(line, volume);
        assert_ne!(hash(&line), hash(&volume));
    }

    #[test]
    fn same_dimension_same_fields_equal() {
        let a = SrvDesc::structured(16, 128, 32);
        let b = SrvDesc::structured(16, 128, 32);
        assert_eq!(a, b);
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn active_variant_fields_are_compared() {
        let a = UavDesc::texture_2d(0);
        let b = UavDesc::texture_2d(1);
        assert_ne!(a, b);
        let c = UavDesc {
            format: Format::Unknown,
            dimension: UavDimension::Texture2DArray {
                mip_slice: 0,
                first_array_slice: 0,
                array_size: 1,
            },
        };
        assert_ne!(a, c);
    }

    #[test]
    fn buffer_views_detected() {
        assert!(SrvDesc::typed(Format::R32Float, 0, 64).is_buffer_view());
        assert!(!SrvDesc::texture_2d().is_buffer_view());
        assert!(UavDesc::raw(0, 64).is_buffer_view());
    }
}
