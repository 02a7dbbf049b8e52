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

use std::sync::Arc;

use log::{error, info};
use parking_lot::Mutex;

use crate::{
    BackendError, BackendResult, Device, Fence, FenceValue, PresentStatus, QueueKind,
    SubmissionChain, SubmitBatch,
};

/// One hardware queue with its execution fence.
///
/// Every submission through `submit` or `submit_from_chain` signals the
/// execution fence with next value, so a returned value can be waited on to
/// know that work is done.
pub struct CommandQueue<D: Device> {
    device: Arc<D>,
    kind: QueueKind,
    raw: D::Queue,
    /// Last value handed to the driver. Locked for the whole submit so values
    /// reach the queue in the same order they are produced.
    last_value: Mutex<u64>,
    chain: SubmissionChain<D>,
    fence: Arc<Fence<D>>,
}

impl<D: Device> CommandQueue<D> {
    pub fn new(device: &Arc<D>, kind: QueueKind) -> BackendResult<Self> {
        let raw = device
            .queue(kind)
            .ok_or(BackendError::QueueNotEnabled(kind))?;
        let fence = Arc::new(Fence::new(device, 0)?);
        info!("Created {:?} queue on {}", kind, device.name());

        Ok(Self {
            device: device.clone(),
            kind,
            raw,
            last_value: Mutex::new(0),
            chain: SubmissionChain::default(),
            fence,
        })
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn raw(&self) -> &D::Queue {
        &self.raw
    }

    pub fn fence(&self) -> &Arc<Fence<D>> {
        &self.fence
    }

    pub fn chain(&self) -> &SubmissionChain<D> {
        &self.chain
    }

    pub fn last_submitted_value(&self) -> u64 {
        *self.last_value.lock()
    }

    pub fn completed_value(&self) -> BackendResult<u64> {
        self.fence.completed_value()
    }

    /// Submits caller-built batches and signals execution fence after the
    /// last one. Returns the signaled value.
    pub fn submit(&self, mut batches: Vec<SubmitBatch<D>>) -> BackendResult<u64> {
        puffin::profile_function!();
        let mut last_value = self.last_value.lock();
        let value = *last_value + 1;
        if batches.is_empty() {
            batches.push(SubmitBatch::default());
        }
        if let Some(last) = batches.last_mut() {
            last.signals.push(FenceValue::new(&self.fence, value));
        }
        self.device.submit(&self.raw, &batches)?;
        *last_value = value;

        Ok(value)
    }

    /// Drains the submission chain into one submit call.
    ///
    /// Chain lock is released before driver is called.
    pub fn submit_from_chain(&self) -> BackendResult<u64> {
        let batches = self.chain.drain();
        self.submit(batches)
    }

    /// Makes queue wait for a fence without any work attached.
    pub fn submit_wait(&self, fence: &Arc<Fence<D>>, value: u64) -> BackendResult<()> {
        let _guard = self.last_value.lock();
        self.device
            .submit(&self.raw, &[SubmitBatch::default().wait(fence, value)])
    }

    /// Signals a fence once everything submitted before is done.
    pub fn submit_signal(&self, fence: &Arc<Fence<D>>, value: u64) -> BackendResult<()> {
        let _guard = self.last_value.lock();
        self.device
            .submit(&self.raw, &[SubmitBatch::default().signal(fence, value)])
    }

    pub fn wait_value_complete(&self, value: u64) -> BackendResult<()> {
        self.fence.wait(value)
    }

    pub fn wait_idle(&self) -> BackendResult<()> {
        puffin::profile_function!();
        let value = self.last_submitted_value();
        self.fence.wait(value)?;
        self.device.wait_queue_idle(&self.raw)
    }

    pub fn present(
        &self,
        swapchain: &D::Swapchain,
        image_index: u32,
    ) -> BackendResult<PresentStatus> {
        let _guard = self.last_value.lock();
        self.device.present(&self.raw, swapchain, image_index)
    }
}

impl<D: Device> Drop for CommandQueue<D> {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            error!("Failed to wait for {:?} queue: {}", self.kind, err);
        }
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use crate::{headless::HeadlessDevice, Fence, QueueKind, SubmitBatch};

    use super::CommandQueue;

    fn queue() -> (Arc<HeadlessDevice>, CommandQueue<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::new());
        let queue = CommandQueue::new(&device, QueueKind::Graphics).unwrap();
        (device, queue)
    }

    #[test]
    fn end_to_end() {
        let (device, queue) = queue();
        let fence_id = queue.fence().raw().id();
        let list = device.command_list();
        queue.chain().add_command_list(2, list.clone());

        assert_eq!(1, queue.submit_from_chain().unwrap());
        let log = device.submissions(QueueKind::Graphics);
        assert_eq!(1, log.len());
        assert_eq!(1, log[0].len());
        assert!(log[0][0].waits.is_empty());
        assert_eq!(vec![list.id()], log[0][0].command_lists);
        assert_eq!(vec![(fence_id, 1)], log[0][0].signals);

        assert_eq!(2, queue.submit_from_chain().unwrap());
        let log = device.submissions(QueueKind::Graphics);
        assert_eq!(2, log.len());
        assert!(log[1].iter().all(|batch| batch.command_lists.is_empty()));
        assert_eq!(vec![(fence_id, 2)], log[1][0].signals);
        assert!(!queue.chain().has_submission(2));

        queue.wait_value_complete(2).unwrap();
        assert_eq!(2, queue.completed_value().unwrap());
    }

    #[test]
    fn values_are_monotonic() {
        let (device, queue) = queue();
        let mut last = 0;
        for index in 0..8 {
            let value = if index % 2 == 0 {
                queue.submit_from_chain().unwrap()
            } else {
                queue
                    .submit(vec![SubmitBatch::default().command_list(device.command_list())])
                    .unwrap()
            };
            assert!(value > last);
            last = value;
        }
    }

    #[test]
    fn fence_signaled_after_last_batch() {
        let (device, queue) = queue();
        let fence_id = queue.fence().raw().id();
        queue.chain().prepend_command_list(device.command_list());
        queue.chain().add_command_list(1, device.command_list());
        queue.chain().add_command_list(3, device.command_list());
        queue.submit_from_chain().unwrap();

        let log = device.submissions(QueueKind::Graphics);
        assert_eq!(3, log[0].len());
        assert!(log[0][0].signals.is_empty());
        assert!(log[0][1].signals.is_empty());
        assert_eq!(vec![(fence_id, 1)], log[0][2].signals);
    }

    #[test]
    fn waits_for_paused_work() {
        let (device, queue) = queue();
        device.pause(QueueKind::Graphics);
        let value = queue
            .submit(vec![SubmitBatch::default().command_list(device.command_list())])
            .unwrap();
        assert_eq!(0, queue.completed_value().unwrap());
        assert!(!queue
            .fence()
            .wait_timeout(value, Duration::from_millis(10))
            .unwrap());
        device.resume(QueueKind::Graphics);
        queue.wait_value_complete(value).unwrap();
        queue.wait_idle().unwrap();
    }

    #[test]
    fn cross_queue_handoff() {
        let device = Arc::new(HeadlessDevice::new());
        let graphics = CommandQueue::new(&device, QueueKind::Graphics).unwrap();
        let copy = CommandQueue::new(&device, QueueKind::Copy).unwrap();
        let upload = Arc::new(Fence::new(&device, 0).unwrap());

        device.pause(QueueKind::Copy);
        copy.submit_signal(&upload, 1).unwrap();
        graphics.submit_wait(&upload, 1).unwrap();
        let value = graphics.submit_from_chain().unwrap();
        assert_eq!(1, value);
        assert_eq!(0, graphics.completed_value().unwrap());

        device.resume(QueueKind::Copy);
        graphics.wait_value_complete(value).unwrap();
        assert_eq!(1, upload.completed_value().unwrap());
        // Lightweight paths don't touch execution fence.
        assert_eq!(0, copy.last_submitted_value());
    }

    #[test]
    fn failed_submit_keeps_value() {
        let (device, queue) = queue();
        device.fail_next_submit();
        assert!(queue.submit_from_chain().is_err());
        assert_eq!(0, queue.last_submitted_value());
        assert_eq!(1, queue.submit_from_chain().unwrap());
    }

    #[test]
    fn missing_queue() {
        let device = Arc::new(HeadlessDevice::new().with_queues(&[QueueKind::Graphics]));
        assert!(CommandQueue::new(&device, QueueKind::Compute).is_err());
    }
}
