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

use std::{fmt::Debug, sync::Arc, time::Duration};

use crate::{BackendResult, Device};

/// Monotonic counter shared between CPU and GPU.
pub struct Fence<D: Device> {
    device: Arc<D>,
    raw: D::Fence,
}

impl<D: Device> Fence<D> {
    pub fn new(device: &Arc<D>, initial_value: u64) -> BackendResult<Self> {
        let raw = device.create_fence(initial_value)?;
        Ok(Self {
            device: device.clone(),
            raw,
        })
    }

    pub fn raw(&self) -> &D::Fence {
        &self.raw
    }

    pub fn completed_value(&self) -> BackendResult<u64> {
        self.device.fence_value(&self.raw)
    }

    pub fn is_complete(&self, value: u64) -> BackendResult<bool> {
        Ok(self.completed_value()? >= value)
    }

    pub fn wait(&self, value: u64) -> BackendResult<()> {
        puffin::profile_function!();
        self.device.wait_fence(&self.raw, value, None)?;

        Ok(())
    }

    /// Returns `false` if fence didn't reach `value` in time.
    pub fn wait_timeout(&self, value: u64, timeout: Duration) -> BackendResult<bool> {
        puffin::profile_function!();
        self.device.wait_fence(&self.raw, value, Some(timeout))
    }

    /// Signals from CPU side.
    pub fn signal(&self, value: u64) -> BackendResult<()> {
        self.device.signal_fence(&self.raw, value)
    }
}

impl<D: Device> Debug for Fence<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fence").field(&self.raw).finish()
    }
}

impl<D: Device> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.raw.clone());
    }
}

/// Fence together with a value to wait for or to signal.
pub struct FenceValue<D: Device> {
    pub fence: Arc<Fence<D>>,
    pub value: u64,
}

impl<D: Device> FenceValue<D> {
    pub fn new(fence: &Arc<Fence<D>>, value: u64) -> Self {
        Self {
            fence: fence.clone(),
            value,
        }
    }
}

impl<D: Device> Clone for FenceValue<D> {
    fn clone(&self) -> Self {
        Self {
            fence: self.fence.clone(),
            value: self.value,
        }
    }
}

impl<D: Device> Debug for FenceValue<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FenceValue")
            .field("fence", self.fence.raw())
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread, time::Duration};

    use crate::headless::HeadlessDevice;

    use super::Fence;

    #[test]
    fn starts_at_initial_value() {
        let device = Arc::new(HeadlessDevice::new());
        let fence = Fence::new(&device, 5).unwrap();
        assert_eq!(5, fence.completed_value().unwrap());
        assert!(fence.is_complete(5).unwrap());
        assert!(!fence.is_complete(6).unwrap());
    }

    #[test]
    fn wait_timeout_reports_miss() {
        let device = Arc::new(HeadlessDevice::new());
        let fence = Fence::new(&device, 0).unwrap();
        assert!(!fence.wait_timeout(1, Duration::from_millis(10)).unwrap());
        fence.signal(1).unwrap();
        assert!(fence.wait_timeout(1, Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn wait_wakes_on_signal_from_other_thread() {
        let device = Arc::new(HeadlessDevice::new());
        let fence = Arc::new(Fence::new(&device, 0).unwrap());
        let signaler = {
            let fence = fence.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                fence.signal(3).unwrap();
            })
        };
        fence.wait(3).unwrap();
        assert_eq!(3, fence.completed_value().unwrap());
        signaler.join().unwrap();
    }

    #[test]
    fn destroyed_on_drop() {
        let device = Arc::new(HeadlessDevice::new());
        let fence = Fence::new(&device, 0).unwrap();
        assert_eq!(1, device.live().fences);
        drop(fence);
        assert_eq!(0, device.live().fences);
    }
}
