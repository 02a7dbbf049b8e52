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

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bitflags::bitflags;
use log::warn;

use crate::{BackendResult, Device, MemoryRequest, MemoryRequirements};

bitflags! {
    #[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
    pub struct HeapProperties: u32 {
        const DEVICE_LOCAL = 1;
        const HOST_VISIBLE = 2;
        const HOST_COHERENT = 4;
        const HOST_CACHED = 8;
        const LAZILY_ALLOCATED = 16;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub allocations: u64,
    pub bytes: u64,
}

/// Picks memory types and hands out memory blocks.
pub struct HeapAllocator<D: Device> {
    device: Arc<D>,
    memory_types: Vec<HeapProperties>,
    allocations: AtomicU64,
    bytes: AtomicU64,
}

impl<D: Device> HeapAllocator<D> {
    pub fn new(device: Arc<D>) -> Self {
        let memory_types = device.memory_types().to_vec();
        Self {
            device,
            memory_types,
            allocations: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn memory_types(&self) -> &[HeapProperties] {
        &self.memory_types
    }

    /// Mask of memory types that are allowed by `mask`, have every `required`
    /// property and none of `denied` ones.
    pub fn select(&self, mask: u32, required: HeapProperties, denied: HeapProperties) -> u32 {
        self.memory_types
            .iter()
            .enumerate()
            .take(32)
            .filter(|(index, properties)| {
                mask & (1 << index) != 0
                    && properties.contains(required)
                    && !properties.intersects(denied)
            })
            .fold(0, |acc, (index, _)| acc | (1 << index))
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            allocations: self.allocations.load(Ordering::Acquire),
            bytes: self.bytes.load(Ordering::Acquire),
        }
    }

    /// Allocates a block for a resource with given requirements.
    ///
    /// Returns `None` when no memory type fits.
    pub fn allocate(
        self: &Arc<Self>,
        requirements: &MemoryRequirements,
        required: HeapProperties,
        denied: HeapProperties,
        dedicated: bool,
    ) -> BackendResult<Option<HeapBinding<D>>> {
        let memory_types = self.select(requirements.memory_type_bits, required, denied);
        if memory_types == 0 {
            warn!(
                "No memory type has {:?} without {:?} (mask {:#b})",
                required, denied, requirements.memory_type_bits
            );
            return Ok(None);
        }
        let properties = self.memory_types[memory_types.trailing_zeros() as usize];
        let memory = self.device.allocate_memory(&MemoryRequest {
            size: requirements.size,
            alignment: requirements.alignment.max(1),
            memory_types,
            properties: required,
            dedicated,
        })?;
        self.allocations.fetch_add(1, Ordering::AcqRel);
        self.bytes.fetch_add(requirements.size, Ordering::AcqRel);

        Ok(Some(HeapBinding {
            heap: self.clone(),
            memory: Some(memory),
            properties,
            dedicated,
            size: requirements.size,
        }))
    }

    fn free(&self, memory: D::Memory, size: u64) {
        self.device.free_memory(memory);
        self.allocations.fetch_sub(1, Ordering::AcqRel);
        self.bytes.fetch_sub(size, Ordering::AcqRel);
    }
}

/// Memory block backing one resource. Returned to the heap on drop.
pub struct HeapBinding<D: Device> {
    heap: Arc<HeapAllocator<D>>,
    memory: Option<D::Memory>,
    properties: HeapProperties,
    dedicated: bool,
    size: u64,
}

impl<D: Device> HeapBinding<D> {
    pub fn memory(&self) -> &D::Memory {
        self.memory
            .as_ref()
            .expect("Heap binding always holds memory until dropped")
    }

    /// Properties of the first memory type that satisfied the request.
    pub fn properties(&self) -> HeapProperties {
        self.properties
    }

    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl<D: Device> Debug for HeapBinding<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapBinding")
            .field("memory", &self.memory)
            .field("properties", &self.properties)
            .field("dedicated", &self.dedicated)
            .field("size", &self.size)
            .finish()
    }
}

impl<D: Device> Drop for HeapBinding<D> {
    fn drop(&mut self) {
        if let Some(memory) = self.memory.take() {
            self.heap.free(memory, self.size);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::{headless::HeadlessDevice, MemoryRequirements};

    use super::{HeapAllocator, HeapProperties};

    fn heap() -> Arc<HeapAllocator<HeadlessDevice>> {
        Arc::new(HeapAllocator::new(Arc::new(
            HeadlessDevice::new().with_memory_types(&[
                HeapProperties::DEVICE_LOCAL,
                HeapProperties::HOST_VISIBLE | HeapProperties::HOST_COHERENT,
                HeapProperties::DEVICE_LOCAL
                    | HeapProperties::HOST_VISIBLE
                    | HeapProperties::HOST_COHERENT,
                HeapProperties::HOST_VISIBLE
                    | HeapProperties::HOST_COHERENT
                    | HeapProperties::HOST_CACHED,
            ]),
        )))
    }

    #[test]
    fn select_required() {
        let heap = heap();
        assert_eq!(
            0b0101,
            heap.select(!0, HeapProperties::DEVICE_LOCAL, HeapProperties::empty())
        );
        assert_eq!(
            0b1110,
            heap.select(!0, HeapProperties::HOST_VISIBLE, HeapProperties::empty())
        );
    }

    #[test]
    fn select_denied() {
        let heap = heap();
        assert_eq!(
            0b0010,
            heap.select(
                !0,
                HeapProperties::HOST_VISIBLE,
                HeapProperties::DEVICE_LOCAL | HeapProperties::HOST_CACHED
            )
        );
    }

    #[test]
    fn select_respects_resource_mask() {
        let heap = heap();
        assert_eq!(
            0b0100,
            heap.select(0b0100, HeapProperties::DEVICE_LOCAL, HeapProperties::empty())
        );
        assert_eq!(
            0,
            heap.select(0b0010, HeapProperties::DEVICE_LOCAL, HeapProperties::empty())
        );
    }

    #[test]
    fn nothing_fits() {
        let heap = heap();
        let requirements = MemoryRequirements {
            size: 256,
            alignment: 16,
            memory_type_bits: !0,
        };
        let binding = heap
            .allocate(
                &requirements,
                HeapProperties::LAZILY_ALLOCATED,
                HeapProperties::empty(),
                false,
            )
            .unwrap();
        assert!(binding.is_none());
        assert_eq!(0, heap.stats().allocations);
    }

    #[test]
    fn binding_returns_memory() {
        let heap = heap();
        let requirements = MemoryRequirements {
            size: 4096,
            alignment: 256,
            memory_type_bits: !0,
        };
        let binding = heap
            .allocate(
                &requirements,
                HeapProperties::HOST_VISIBLE,
                HeapProperties::DEVICE_LOCAL,
                true,
            )
            .unwrap()
            .unwrap();
        assert!(binding
            .properties()
            .contains(HeapProperties::HOST_VISIBLE | HeapProperties::HOST_COHERENT));
        assert!(binding.is_dedicated());
        assert_eq!(1, heap.stats().allocations);
        assert_eq!(4096, heap.stats().bytes);
        drop(binding);
        assert_eq!(0, heap.stats().allocations);
        assert_eq!(0, heap.stats().bytes);
    }
}
