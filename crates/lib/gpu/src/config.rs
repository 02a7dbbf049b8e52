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

use std::time::Duration;

use arrayvec::ArrayVec;
use smol_str::SmolStr;

use crate::QueueKind;

pub const DEFAULT_FRAMES_IN_FLIGHT: u32 = 2;
pub const MAX_FRAMES_IN_FLIGHT: u32 = 8;

/// Device and frame loop settings.
///
/// `frames_in_flight` is how far CPU is allowed to run ahead of GPU. It sizes
/// the frame ring in `DeviceResources` and is the number of frames disposer
/// keeps acquired object alive.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub frames_in_flight: u32,
    pub queues: ArrayVec<QueueKind, 3>,
    pub validation: bool,
    pub app_name: SmolStr,
    pub dedicated_threshold: u64,
    pub preferred_dedicated_threshold: u64,
    pub starting_free_list_chunk: u64,
    pub final_free_list_chunk: u64,
    pub acquire_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            queues: [QueueKind::Graphics, QueueKind::Compute, QueueKind::Copy]
                .into_iter()
                .collect(),
            validation: cfg!(debug_assertions),
            app_name: SmolStr::new_inline("dess"),
            dedicated_threshold: 64 * 1024 * 1024,
            preferred_dedicated_threshold: 16 * 1024 * 1024,
            starting_free_list_chunk: 256 * 1024,
            final_free_list_chunk: 1024 * 1024,
            acquire_timeout: Duration::from_millis(100),
        }
    }
}

impl DeviceConfig {
    pub fn frames_in_flight(mut self, value: u32) -> Self {
        assert!(
            (1..=MAX_FRAMES_IN_FLIGHT).contains(&value),
            "frames_in_flight must be in 1..={}",
            MAX_FRAMES_IN_FLIGHT
        );
        self.frames_in_flight = value;
        self
    }

    pub fn queues(mut self, queues: &[QueueKind]) -> Self {
        self.queues.clear();
        for queue in queues {
            if !self.queues.contains(queue) {
                self.queues.push(*queue);
            }
        }
        self
    }

    pub fn validation(mut self, value: bool) -> Self {
        self.validation = value;
        self
    }

    pub fn app_name(mut self, value: &str) -> Self {
        self.app_name = SmolStr::new(value);
        self
    }

    pub fn dedicated_threshold(mut self, value: u64) -> Self {
        self.dedicated_threshold = value;
        self
    }

    pub fn acquire_timeout(mut self, value: Duration) -> Self {
        self.acquire_timeout = value;
        self
    }

    pub fn has_queue(&self, kind: QueueKind) -> bool {
        self.queues.contains(&kind)
    }
}

#[cfg(test)]
mod test {
    use crate::QueueKind;

    use super::DeviceConfig;

    #[test]
    fn default_enables_all_queues() {
        let config = DeviceConfig::default();
        assert_eq!(2, config.frames_in_flight);
        assert!(config.has_queue(QueueKind::Graphics));
        assert!(config.has_queue(QueueKind::Compute));
        assert!(config.has_queue(QueueKind::Copy));
    }

    #[test]
    fn queue_list_deduplicated() {
        let config = DeviceConfig::default().queues(&[
            QueueKind::Graphics,
            QueueKind::Graphics,
            QueueKind::Copy,
        ]);
        assert_eq!(2, config.queues.len());
        assert!(!config.has_queue(QueueKind::Compute));
    }

    #[test]
    #[should_panic]
    fn zero_frames_in_flight_rejected() {
        let _ = DeviceConfig::default().frames_in_flight(0);
    }
}
