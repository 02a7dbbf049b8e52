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
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::QueueKind;

#[derive(Debug)]
struct FenceState {
    id: u64,
    value: Mutex<u64>,
    reached: Condvar,
}

/// Software timeline fence.
#[derive(Debug, Clone)]
pub struct HeadlessFence(Arc<FenceState>);

impl HeadlessFence {
    pub(super) fn new(id: u64, value: u64) -> Self {
        Self(Arc::new(FenceState {
            id,
            value: Mutex::new(value),
            reached: Condvar::new(),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub(super) fn value(&self) -> u64 {
        *self.0.value.lock()
    }

    /// Values never go back.
    pub(super) fn signal(&self, value: u64) {
        let mut current = self.0.value.lock();
        if value > *current {
            *current = value;
            self.0.reached.notify_all();
        }
    }

    pub(super) fn wait(&self, value: u64, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut current = self.0.value.lock();
        while *current < value {
            match deadline {
                Some(deadline) => {
                    if self.0.reached.wait_until(&mut current, deadline).timed_out() {
                        return *current >= value;
                    }
                }
                None => self.0.reached.wait(&mut current),
            }
        }

        true
    }
}

/// What the device got in one batch, with fences and command lists replaced
/// by their ids.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub waits: Vec<(u64, u64)>,
    pub command_lists: Vec<u64>,
    pub signals: Vec<(u64, u64)>,
}

#[derive(Debug)]
pub(super) struct PendingBatch {
    pub waits: Vec<(HeadlessFence, u64)>,
    pub signals: Vec<(HeadlessFence, u64)>,
}

impl PendingBatch {
    fn is_ready(&self) -> bool {
        self.waits.iter().all(|(fence, value)| fence.value() >= *value)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PendingBatch>,
    paused: bool,
    log: Vec<Vec<BatchRecord>>,
}

#[derive(Debug)]
struct QueueInner {
    kind: QueueKind,
    state: Mutex<QueueState>,
    idle: Condvar,
}

/// Software queue. Batches run in submission order once their waits are met.
#[derive(Debug, Clone)]
pub struct HeadlessQueue(Arc<QueueInner>);

impl HeadlessQueue {
    pub(super) fn new(kind: QueueKind) -> Self {
        Self(Arc::new(QueueInner {
            kind,
            state: Mutex::default(),
            idle: Condvar::new(),
        }))
    }

    pub fn kind(&self) -> QueueKind {
        self.0.kind
    }

    pub(super) fn enqueue(&self, record: Vec<BatchRecord>, batches: Vec<PendingBatch>) {
        let mut state = self.0.state.lock();
        state.log.push(record);
        state.pending.extend(batches);
    }

    pub(super) fn set_paused(&self, paused: bool) {
        self.0.state.lock().paused = paused;
    }

    pub(super) fn log(&self) -> Vec<Vec<BatchRecord>> {
        self.0.state.lock().log.clone()
    }

    /// Executes everything that can run now. Returns `true` if anything ran.
    pub(super) fn execute(&self) -> bool {
        let mut state = self.0.state.lock();
        let mut progress = false;
        while !state.paused {
            match state.pending.front() {
                Some(batch) if batch.is_ready() => {}
                _ => break,
            }
            if let Some(batch) = state.pending.pop_front() {
                batch
                    .signals
                    .iter()
                    .for_each(|(fence, value)| fence.signal(*value));
                progress = true;
            }
        }
        if state.pending.is_empty() {
            self.0.idle.notify_all();
        }

        progress
    }

    pub(super) fn wait_idle(&self) {
        let mut state = self.0.state.lock();
        while !state.pending.is_empty() {
            self.0.idle.wait(&mut state);
        }
    }
}

#[cfg(test)]
mod test {
    use std::{thread, time::Duration};

    use crate::QueueKind;

    use super::{HeadlessFence, HeadlessQueue, PendingBatch};

    #[test]
    fn fence_never_goes_back() {
        let fence = HeadlessFence::new(0, 5);
        fence.signal(3);
        assert_eq!(5, fence.value());
        fence.signal(8);
        assert_eq!(8, fence.value());
    }

    #[test]
    fn fence_wait_times_out() {
        let fence = HeadlessFence::new(0, 0);
        assert!(!fence.wait(1, Some(Duration::from_millis(5))));
        assert!(fence.wait(0, Some(Duration::from_millis(5))));
    }

    #[test]
    fn fence_wait_blocks_until_signaled() {
        let fence = HeadlessFence::new(0, 0);
        let signaler = {
            let fence = fence.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                fence.signal(2);
            })
        };
        assert!(fence.wait(2, None));
        signaler.join().unwrap();
    }

    #[test]
    fn queue_is_fifo() {
        let queue = HeadlessQueue::new(QueueKind::Graphics);
        let gate = HeadlessFence::new(0, 0);
        let done = HeadlessFence::new(1, 0);
        queue.enqueue(
            Vec::new(),
            vec![
                PendingBatch {
                    waits: vec![(gate.clone(), 1)],
                    signals: vec![(done.clone(), 1)],
                },
                PendingBatch {
                    waits: Vec::new(),
                    signals: vec![(done.clone(), 2)],
                },
            ],
        );
        assert!(!queue.execute());
        assert_eq!(0, done.value());
        gate.signal(1);
        assert!(queue.execute());
        assert_eq!(2, done.value());
        queue.wait_idle();
    }

    #[test]
    fn paused_queue_holds_work() {
        let queue = HeadlessQueue::new(QueueKind::Copy);
        let done = HeadlessFence::new(0, 0);
        queue.set_paused(true);
        queue.enqueue(
            Vec::new(),
            vec![PendingBatch {
                waits: Vec::new(),
                signals: vec![(done.clone(), 1)],
            }],
        );
        assert!(!queue.execute());
        queue.set_paused(false);
        assert!(queue.execute());
        assert_eq!(1, done.value());
    }
}
