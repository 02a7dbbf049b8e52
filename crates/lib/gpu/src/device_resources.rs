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

//! Frame orchestration.
//!
//! [`DeviceResources`] owns queues, heap and disposer and ties them into a
//! frame loop:
//!
//! ```text
//! begin_frame -> record, add to chains, acquire used resources -> end_frame
//! ```
//!
//! `end_frame` submits every queue, remembers fence values of the frame and
//! waits for the oldest frame in flight before running garbage collection. An
//! object acquired during a frame is therefore destroyed only after GPU is done
//! with that frame.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use arrayvec::ArrayVec;
use log::{debug, error, info};
use parking_lot::Mutex;

use crate::{
    BackendError, BackendResult, CommandQueue, Device, DeviceConfig, Disposer, HeapAllocator,
    QueueKind, Resource, ResourceCreateDesc, SamplerDesc, SamplerState, Swapchain, ViewCache,
};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct DisposableKey(u64);

type FrameValues = ArrayVec<(QueueKind, u64), 3>;

struct FrameState {
    index: usize,
    slots: Vec<FrameValues>,
    in_frame: bool,
}

pub struct DeviceResources<D: Device> {
    device: Arc<D>,
    config: DeviceConfig,
    queues: ArrayVec<Arc<CommandQueue<D>>, 3>,
    heap: Arc<HeapAllocator<D>>,
    disposer: Mutex<Disposer<DisposableKey>>,
    samplers: ViewCache<D, SamplerState>,
    frame: Mutex<FrameState>,
    frame_number: AtomicU64,
    next_key: AtomicU64,
    shut_down: AtomicBool,
}

impl<D: Device> DeviceResources<D> {
    pub fn new(device: Arc<D>, config: DeviceConfig) -> BackendResult<Self> {
        let queues = config
            .queues
            .iter()
            .map(|kind| CommandQueue::new(&device, *kind).map(Arc::new))
            .collect::<BackendResult<ArrayVec<_, 3>>>()?;
        let heap = Arc::new(HeapAllocator::new(device.clone()));
        let frames = config.frames_in_flight as usize;
        info!(
            "Device resources on {}: {} queues, {} frames in flight",
            device.name(),
            queues.len(),
            frames
        );

        Ok(Self {
            disposer: Mutex::new(Disposer::new(config.frames_in_flight)),
            samplers: ViewCache::default(),
            frame: Mutex::new(FrameState {
                index: 0,
                slots: vec![FrameValues::new(); frames],
                in_frame: false,
            }),
            frame_number: AtomicU64::new(0),
            next_key: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            device,
            config,
            queues,
            heap,
        })
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn heap(&self) -> &Arc<HeapAllocator<D>> {
        &self.heap
    }

    pub fn queue(&self, kind: QueueKind) -> Option<&Arc<CommandQueue<D>>> {
        self.queues.iter().find(|queue| queue.kind() == kind)
    }

    /// Submits collected work of one queue outside of frame loop. Returns
    /// value of queue fence that marks completion.
    pub fn queue_submit(&self, kind: QueueKind) -> BackendResult<u64> {
        self.queue(kind)
            .ok_or(BackendError::QueueNotEnabled(kind))?
            .submit_from_chain()
    }

    /// `Ok(None)` when no heap satisfies requested properties.
    pub fn create_resource(
        &self,
        desc: &ResourceCreateDesc,
    ) -> BackendResult<Option<Arc<Resource<D>>>> {
        Ok(Resource::new(&self.device, &self.heap, desc)?.map(Arc::new))
    }

    pub fn create_swapchain(&self, raw: D::Swapchain) -> BackendResult<Swapchain<D>> {
        Swapchain::new(&self.device, raw)
    }

    pub fn sampler(&self, desc: &SamplerDesc) -> BackendResult<Arc<D::Sampler>> {
        self.samplers.get_or_create(&self.device, desc)
    }

    /// Hands resource over to disposer. Resource is destroyed once nothing
    /// references it and frames that might use it are complete.
    pub fn track(&self, resource: Arc<Resource<D>>) -> DisposableKey {
        let key = DisposableKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        self.disposer
            .lock()
            .create_disposable(key, move || drop(resource));

        key
    }

    /// Marks tracked resource as used by current frame.
    pub fn acquire(&self, key: DisposableKey) {
        self.disposer.lock().acquire(key);
    }

    /// Drops owning reference taken by `track`.
    pub fn release(&self, key: DisposableKey) {
        self.disposer.lock().remove_reference(key);
    }

    /// Destroys resource after frames in flight are done with it.
    pub fn retire(&self, resource: Arc<Resource<D>>) {
        let key = self.track(resource);
        let mut disposer = self.disposer.lock();
        disposer.acquire(key);
        disposer.remove_reference(key);
    }

    pub fn with_disposer<R>(&self, cb: impl FnOnce(&mut Disposer<DisposableKey>) -> R) -> R {
        cb(&mut self.disposer.lock())
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number.load(Ordering::Acquire)
    }

    /// Blocks until GPU is done with the frame that used the same slot.
    ///
    /// # Panics
    ///
    /// If frame is already started.
    pub fn begin_frame(&self) -> BackendResult<()> {
        puffin::profile_function!();
        let mut frame = self.frame.lock();
        assert!(!frame.in_frame, "Frame is already started");
        self.wait_values(&frame.slots[frame.index])?;
        frame.in_frame = true;

        Ok(())
    }

    /// Submits all queues and collects garbage.
    ///
    /// Frame state is unlocked before waiting for the oldest frame in flight.
    ///
    /// # Panics
    ///
    /// If frame wasn't started.
    pub fn end_frame(&self) -> BackendResult<()> {
        puffin::profile_function!();
        let mut frame = self.frame.lock();
        assert!(frame.in_frame, "end_frame called without begin_frame");
        frame.in_frame = false;

        let values = self
            .queues
            .iter()
            .map(|queue| Ok((queue.kind(), queue.submit_from_chain()?)))
            .collect::<BackendResult<FrameValues>>()?;
        let index = frame.index;
        frame.slots[index] = values;
        frame.index = (index + 1) % frame.slots.len();
        let oldest = frame.slots[frame.index].clone();
        let frame_number = self.frame_number.fetch_add(1, Ordering::AcqRel) + 1;
        drop(frame);

        self.wait_values(&oldest)?;
        let disposed = self.disposer.lock().gc();
        debug!("Frame {} done, {} objects disposed", frame_number, disposed);

        Ok(())
    }

    /// Waits for GPU and destroys everything disposer holds.
    pub fn shutdown(&self) -> BackendResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Shutting down device resources");
        for queue in &self.queues {
            queue.wait_idle()?;
        }
        let disposed = self.disposer.lock().reset();
        self.samplers.clear(&self.device);
        debug!("Disposed {} objects on shutdown", disposed);

        Ok(())
    }

    fn wait_values(&self, values: &FrameValues) -> BackendResult<()> {
        puffin::profile_function!();
        for (kind, value) in values {
            if let Some(queue) = self.queue(*kind) {
                queue.wait_value_complete(*value)?;
            }
        }

        Ok(())
    }
}

impl<D: Device> Drop for DeviceResources<D> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!("Device resources shutdown failed: {}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread, time::Duration};

    use crate::{
        headless::HeadlessDevice, AddressMode, BufferDesc, BufferUsage, DeviceConfig, Filter,
        Format, HeapProperties, QueueKind, Resource, ResourceCreateDesc, SamplerDesc, SrvDesc,
        TextureDesc,
    };

    use super::DeviceResources;

    fn resources(frames: u32) -> (Arc<HeadlessDevice>, DeviceResources<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::new());
        let resources = DeviceResources::new(
            device.clone(),
            DeviceConfig::default().frames_in_flight(frames),
        )
        .unwrap();
        (device, resources)
    }

    fn buffer(resources: &DeviceResources<HeadlessDevice>) -> Arc<Resource<HeadlessDevice>> {
        resources
            .create_resource(&ResourceCreateDesc::buffer(BufferDesc::new(
                1024,
                BufferUsage::Storage,
            )))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn retired_resource_outlives_frames_in_flight() {
        let (device, resources) = resources(2);
        resources.begin_frame().unwrap();
        let used = buffer(&resources);
        resources.retire(used);
        assert_eq!(1, device.live().buffers);
        resources.end_frame().unwrap();
        assert_eq!(1, device.live().buffers);

        resources.begin_frame().unwrap();
        resources.end_frame().unwrap();
        assert_eq!(0, device.live().buffers);
    }

    #[test]
    fn acquired_every_frame_lives() {
        let (device, resources) = resources(3);
        let key = resources.track(buffer(&resources));
        for _ in 0..5 {
            resources.begin_frame().unwrap();
            resources.acquire(key);
            resources.end_frame().unwrap();
        }
        resources.release(key);
        assert_eq!(1, device.live().buffers);
        for _ in 0..3 {
            resources.begin_frame().unwrap();
            resources.end_frame().unwrap();
        }
        assert_eq!(0, device.live().buffers);
        assert!(resources.with_disposer(|disposer| disposer.is_empty()));
    }

    #[test]
    fn end_frame_submits_all_queues() {
        let (device, resources) = resources(2);
        let list = device.command_list();
        resources
            .queue(QueueKind::Graphics)
            .unwrap()
            .chain()
            .add_command_list(0, list.clone());
        resources.begin_frame().unwrap();
        resources.end_frame().unwrap();

        for kind in QueueKind::ALL {
            assert_eq!(1, device.submissions(kind).len());
            assert_eq!(1, resources.queue(kind).unwrap().last_submitted_value());
        }
        assert_eq!(
            vec![list.id()],
            device.submissions(QueueKind::Graphics)[0][0].command_lists
        );
        assert_eq!(1, resources.frame_number());
    }

    #[test]
    fn frames_wait_for_gpu() {
        let (device, resources) = resources(2);
        let resources = Arc::new(resources);
        device.pause(QueueKind::Graphics);
        resources.begin_frame().unwrap();
        resources.end_frame().unwrap();

        // Second frame must wait for the first one on its end.
        let frame = {
            let resources = resources.clone();
            thread::spawn(move || {
                resources.begin_frame().unwrap();
                resources.end_frame().unwrap();
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!frame.is_finished());
        device.resume(QueueKind::Graphics);
        frame.join().unwrap();
        assert_eq!(2, resources.frame_number());
    }

    #[test]
    fn frame_number_readable_while_waiting() {
        let (device, resources) = resources(1);
        let resources = Arc::new(resources);
        device.pause(QueueKind::Graphics);
        let frame = {
            let resources = resources.clone();
            thread::spawn(move || {
                resources.begin_frame().unwrap();
                resources.end_frame().unwrap();
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!frame.is_finished());
        assert_eq!(1, resources.frame_number());
        device.resume(QueueKind::Graphics);
        frame.join().unwrap();
    }

    #[test]
    #[should_panic]
    fn nested_frame_panics() {
        let (_device, resources) = resources(2);
        resources.begin_frame().unwrap();
        resources.begin_frame().unwrap();
    }

    #[test]
    fn samplers_are_shared() {
        let (device, resources) = resources(2);
        let desc = SamplerDesc::new(Filter::Linear, Filter::Linear, AddressMode::Repeat);
        let a = resources.sampler(&desc).unwrap();
        let b = resources.sampler(&desc).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        drop((a, b));
        assert_eq!(1, device.live().samplers);
        resources.shutdown().unwrap();
        assert_eq!(0, device.live().samplers);
    }

    #[test]
    fn shutdown_destroys_pending() {
        let (device, resources) = resources(3);
        let texture = resources
            .create_resource(&ResourceCreateDesc::texture(TextureDesc::texture(
                Format::Rgba8Unorm,
                [32, 32],
            )))
            .unwrap()
            .unwrap();
        texture.srv(&SrvDesc::texture_2d());
        resources.begin_frame().unwrap();
        resources.retire(texture);
        resources.end_frame().unwrap();
        assert_eq!(1, device.live().textures);
        drop(resources);
        let live = device.live();
        assert_eq!(0, live.textures);
        assert_eq!(0, live.views);
        assert_eq!(0, live.memory);
        assert_eq!(0, live.fences);
    }

    #[test]
    fn missing_heap_is_recoverable() {
        let (_device, resources) = resources(2);
        let resource = resources
            .create_resource(
                &ResourceCreateDesc::buffer(BufferDesc::new(64, BufferUsage::Uniform))
                    .heap(HeapProperties::LAZILY_ALLOCATED),
            )
            .unwrap();
        assert!(resource.is_none());
    }

    #[test]
    fn submit_outside_frame() {
        let (device, resources) = resources(2);
        resources
            .queue(QueueKind::Copy)
            .unwrap()
            .chain()
            .add_command_list(0, device.command_list());
        assert_eq!(1, resources.queue_submit(QueueKind::Copy).unwrap());
        assert_eq!(2, resources.queue_submit(QueueKind::Copy).unwrap());
    }
}
