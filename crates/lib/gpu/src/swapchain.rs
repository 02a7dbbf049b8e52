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

use std::{sync::Arc, time::Duration};

use log::{error, info};

use crate::{AcquireStatus, BackendResult, CommandQueue, Device, PresentStatus, Resource};

/// Backend swap chain with its images exposed as resources.
///
/// Images have no heap binding and their raw textures belong to the swap chain.
pub struct Swapchain<D: Device> {
    device: Arc<D>,
    raw: Option<D::Swapchain>,
    images: Vec<Arc<Resource<D>>>,
}

impl<D: Device> Swapchain<D> {
    pub fn new(device: &Arc<D>, raw: D::Swapchain) -> BackendResult<Self> {
        let images = match device.swapchain_images(&raw) {
            Ok(images) => images,
            Err(err) => {
                device.destroy_swapchain(raw);
                return Err(err);
            }
        };
        let images = images
            .into_iter()
            .map(|(texture, desc)| Arc::new(Resource::swapchain_image(device, texture, desc)))
            .collect::<Vec<_>>();
        info!("Created swap chain with {} images", images.len());

        Ok(Self {
            device: device.clone(),
            raw: Some(raw),
            images,
        })
    }

    pub fn raw(&self) -> &D::Swapchain {
        self.raw
            .as_ref()
            .expect("Swap chain is alive until dropped")
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: u32) -> &Arc<Resource<D>> {
        &self.images[index as usize]
    }

    /// Timeout is an expected outcome and reported as a status, not an error.
    pub fn acquire(&self, timeout: Duration) -> BackendResult<AcquireStatus> {
        puffin::profile_function!();
        self.device.acquire_next_image(self.raw(), timeout)
    }

    pub fn present(
        &self,
        queue: &CommandQueue<D>,
        image_index: u32,
    ) -> BackendResult<PresentStatus> {
        puffin::profile_function!();
        queue.present(self.raw(), image_index)
    }
}

impl<D: Device> Drop for Swapchain<D> {
    fn drop(&mut self) {
        for (index, image) in self.images.iter().enumerate() {
            if Arc::strong_count(image) > 1 {
                if cfg!(debug_assertions) {
                    panic!("Swap chain image {} is still referenced on destroy", index);
                }
                error!(
                    "Swap chain image {} is still referenced on destroy, dropping its views",
                    index
                );
                // Views must go before the images they look at.
                image.clear_views();
            }
        }
        self.images.clear();
        if let Some(raw) = self.raw.take() {
            self.device.destroy_swapchain(raw);
        }
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use crate::{
        headless::HeadlessDevice, AcquireStatus, CommandQueue, Format, PresentStatus, QueueKind,
        ResourceKind, RtvDesc,
    };

    use super::Swapchain;

    fn swapchain(device: &Arc<HeadlessDevice>) -> Swapchain<HeadlessDevice> {
        let raw = device.create_swapchain(3, Format::Bgra8Srgb, [640, 480]);
        Swapchain::new(device, raw).unwrap()
    }

    #[test]
    fn images_are_swapchain_owned() {
        let device = Arc::new(HeadlessDevice::new());
        let swapchain = swapchain(&device);
        assert_eq!(3, swapchain.image_count());
        let image = swapchain.image(0);
        assert_eq!(ResourceKind::SwapChain, image.kind());
        assert!(image.heap_binding().is_none());
        image.rtv(&RtvDesc::texture_2d(0));
        assert_eq!(1, device.live().views);
        drop(swapchain);
        assert_eq!(0, device.live().views);
        assert_eq!(0, device.live().swapchains);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn held_image_on_destroy_panics() {
        let device = Arc::new(HeadlessDevice::new());
        let swapchain = swapchain(&device);
        let _image = swapchain.image(0).clone();
        drop(swapchain);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn held_image_loses_views_on_destroy() {
        let device = Arc::new(HeadlessDevice::new());
        let swapchain = swapchain(&device);
        let image = swapchain.image(0).clone();
        image.rtv(&RtvDesc::texture_2d(0));
        drop(swapchain);
        assert_eq!(0, image.view_count());
        assert_eq!(0, device.live().views);
        assert_eq!(0, device.live().swapchains);
    }

    #[test]
    fn acquire_rotates_images() {
        let device = Arc::new(HeadlessDevice::new());
        let queue = CommandQueue::new(&device, QueueKind::Graphics).unwrap();
        let swapchain = swapchain(&device);
        for expected in [0, 1, 2, 0] {
            let status = swapchain.acquire(Duration::from_millis(10)).unwrap();
            assert_eq!(AcquireStatus::Acquired(expected), status);
            assert_eq!(
                PresentStatus::Presented,
                swapchain.present(&queue, expected).unwrap()
            );
        }
        assert_eq!(4, swapchain.raw().presented());
    }

    #[test]
    fn acquire_timeout_is_status() {
        let device = Arc::new(HeadlessDevice::new());
        let swapchain = swapchain(&device);
        swapchain.raw().set_blocked(true);
        assert_eq!(
            AcquireStatus::Timeout,
            swapchain.acquire(Duration::from_millis(5)).unwrap()
        );
        swapchain.raw().set_blocked(false);
        assert_eq!(
            AcquireStatus::Acquired(0),
            swapchain.acquire(Duration::from_millis(5)).unwrap()
        );
    }

    #[test]
    fn out_of_date_reported() {
        let device = Arc::new(HeadlessDevice::new());
        let swapchain = swapchain(&device);
        swapchain.raw().set_out_of_date(true);
        assert_eq!(
            AcquireStatus::OutOfDate,
            swapchain.acquire(Duration::from_millis(5)).unwrap()
        );
    }
}
