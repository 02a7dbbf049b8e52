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

use parking_lot::Mutex;

use crate::{AcquireStatus, BackendError, BackendResult, PresentStatus, TextureDesc};

use super::HeadlessTexture;

#[derive(Debug, Default)]
struct State {
    next: u32,
    blocked: bool,
    out_of_date: bool,
    presented: u64,
}

/// Round robin swap chain. Acquire can be blocked to emulate a stalled
/// presentation engine.
#[derive(Debug)]
pub struct HeadlessSwapchain {
    images: Vec<(HeadlessTexture, TextureDesc)>,
    state: Mutex<State>,
}

impl HeadlessSwapchain {
    pub(super) fn new(images: Vec<(HeadlessTexture, TextureDesc)>) -> Self {
        Self {
            images,
            state: Mutex::default(),
        }
    }

    pub(super) fn images(&self) -> &[(HeadlessTexture, TextureDesc)] {
        &self.images
    }

    /// Blocked swap chain times out on every acquire.
    pub fn set_blocked(&self, value: bool) {
        self.state.lock().blocked = value;
    }

    pub fn set_out_of_date(&self, value: bool) {
        self.state.lock().out_of_date = value;
    }

    pub fn presented(&self) -> u64 {
        self.state.lock().presented
    }

    pub(super) fn acquire(&self) -> AcquireStatus {
        let mut state = self.state.lock();
        if state.out_of_date {
            AcquireStatus::OutOfDate
        } else if state.blocked || self.images.is_empty() {
            AcquireStatus::Timeout
        } else {
            let index = state.next;
            state.next = (index + 1) % self.images.len() as u32;
            AcquireStatus::Acquired(index)
        }
    }

    pub(super) fn present(&self, image_index: u32) -> BackendResult<PresentStatus> {
        if image_index as usize >= self.images.len() {
            return Err(BackendError::Other(format!(
                "Swap chain has no image {}",
                image_index
            )));
        }
        let mut state = self.state.lock();
        if state.out_of_date {
            return Ok(PresentStatus::OutOfDate);
        }
        state.presented += 1;

        Ok(PresentStatus::Presented)
    }
}
