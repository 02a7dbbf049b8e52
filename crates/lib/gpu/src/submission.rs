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

//! Not yet submitted work of one queue.
//!
//! Producers that don't know about each other put their command lists under
//! an order key. Once per frame the chain is turned into a list of batches:
//! prepended work first, then every non-empty key in ascending order.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt::Debug,
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{Device, Fence, FenceValue};

/// One atomic unit of queue work. Waits happen before command lists run,
/// signals after they finish.
pub struct SubmitBatch<D: Device> {
    pub waits: Vec<FenceValue<D>>,
    pub command_lists: Vec<D::CommandList>,
    pub signals: Vec<FenceValue<D>>,
}

impl<D: Device> Default for SubmitBatch<D> {
    fn default() -> Self {
        Self {
            waits: Vec::new(),
            command_lists: Vec::new(),
            signals: Vec::new(),
        }
    }
}

impl<D: Device> SubmitBatch<D> {
    pub fn wait(mut self, fence: &Arc<Fence<D>>, value: u64) -> Self {
        self.waits.push(FenceValue::new(fence, value));
        self
    }

    pub fn command_list(mut self, command_list: D::CommandList) -> Self {
        self.command_lists.push(command_list);
        self
    }

    pub fn signal(mut self, fence: &Arc<Fence<D>>, value: u64) -> Self {
        self.signals.push(FenceValue::new(fence, value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.waits.is_empty() && self.command_lists.is_empty() && self.signals.is_empty()
    }
}

impl<D: Device> Clone for SubmitBatch<D> {
    fn clone(&self) -> Self {
        Self {
            waits: self.waits.clone(),
            command_lists: self.command_lists.clone(),
            signals: self.signals.clone(),
        }
    }
}

impl<D: Device> Debug for SubmitBatch<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitBatch")
            .field("waits", &self.waits)
            .field("command_lists", &self.command_lists)
            .field("signals", &self.signals)
            .finish()
    }
}

struct Pending<D: Device> {
    waits: VecDeque<FenceValue<D>>,
    command_lists: VecDeque<D::CommandList>,
    signals: VecDeque<FenceValue<D>>,
}

impl<D: Device> Default for Pending<D> {
    fn default() -> Self {
        Self {
            waits: VecDeque::new(),
            command_lists: VecDeque::new(),
            signals: VecDeque::new(),
        }
    }
}

impl<D: Device> Pending<D> {
    fn is_empty(&self) -> bool {
        self.waits.is_empty() && self.command_lists.is_empty() && self.signals.is_empty()
    }

    fn to_batch(&self) -> SubmitBatch<D> {
        SubmitBatch {
            waits: self.waits.iter().cloned().collect(),
            command_lists: self.command_lists.iter().cloned().collect(),
            signals: self.signals.iter().cloned().collect(),
        }
    }

    fn take_batch(&mut self) -> SubmitBatch<D> {
        SubmitBatch {
            waits: self.waits.drain(..).collect(),
            command_lists: self.command_lists.drain(..).collect(),
            signals: self.signals.drain(..).collect(),
        }
    }

    fn clear(&mut self) {
        self.waits.clear();
        self.command_lists.clear();
        self.signals.clear();
    }
}

struct ChainState<D: Device> {
    prepend: Pending<D>,
    ordered: BTreeMap<u32, Pending<D>>,
}

pub struct SubmissionChain<D: Device> {
    state: Mutex<ChainState<D>>,
}

impl<D: Device> Default for SubmissionChain<D> {
    fn default() -> Self {
        Self {
            state: Mutex::new(ChainState {
                prepend: Pending::default(),
                ordered: BTreeMap::new(),
            }),
        }
    }
}

impl<D: Device> SubmissionChain<D> {
    /// Most recently prepended command list runs first.
    pub fn prepend_command_list(&self, command_list: D::CommandList) {
        self.state
            .lock()
            .prepend
            .command_lists
            .push_front(command_list);
    }

    pub fn prepend_signal_fence(&self, fence: &Arc<Fence<D>>, value: u64) {
        self.state
            .lock()
            .prepend
            .signals
            .push_front(FenceValue::new(fence, value));
    }

    pub fn prepend_wait_fence(&self, fence: &Arc<Fence<D>>, value: u64) {
        self.state
            .lock()
            .prepend
            .waits
            .push_front(FenceValue::new(fence, value));
    }

    pub fn add_command_list(&self, order: u32, command_list: D::CommandList) {
        self.state
            .lock()
            .ordered
            .entry(order)
            .or_default()
            .command_lists
            .push_back(command_list);
    }

    pub fn add_signal_fence(&self, order: u32, fence: &Arc<Fence<D>>, value: u64) {
        self.state
            .lock()
            .ordered
            .entry(order)
            .or_default()
            .signals
            .push_back(FenceValue::new(fence, value));
    }

    pub fn add_wait_fence(&self, order: u32, fence: &Arc<Fence<D>>, value: u64) {
        self.state
            .lock()
            .ordered
            .entry(order)
            .or_default()
            .waits
            .push_back(FenceValue::new(fence, value));
    }

    /// Order key holds at least one command list.
    pub fn has_command(&self, order: u32) -> bool {
        self.state
            .lock()
            .ordered
            .get(&order)
            .map(|pending| !pending.command_lists.is_empty())
            .unwrap_or(false)
    }

    /// Order key holds anything: command lists, waits or signals.
    pub fn has_submission(&self, order: u32) -> bool {
        self.state
            .lock()
            .ordered
            .get(&order)
            .map(|pending| !pending.is_empty())
            .unwrap_or(false)
    }

    pub fn has_prepended_submission(&self) -> bool {
        !self.state.lock().prepend.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.prepend.is_empty() && state.ordered.values().all(Pending::is_empty)
    }

    /// Batches in submission order. Chain is left untouched.
    pub fn finalize(&self) -> Vec<SubmitBatch<D>> {
        let state = self.state.lock();
        Self::ordered(&*state).map(Pending::to_batch).collect()
    }

    /// Forgets all collected work. Known order keys stay in place.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.prepend.clear();
        state.ordered.values_mut().for_each(Pending::clear);
    }

    /// Same as `finalize` followed by `reset`, under one lock.
    pub fn drain(&self) -> Vec<SubmitBatch<D>> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let mut batches = Vec::with_capacity(state.ordered.len() + 1);
        if !state.prepend.is_empty() {
            batches.push(state.prepend.take_batch());
        }
        batches.extend(
            state
                .ordered
                .values_mut()
                .filter(|pending| !pending.is_empty())
                .map(Pending::take_batch),
        );

        batches
    }

    fn ordered(state: &ChainState<D>) -> impl Iterator<Item = &Pending<D>> {
        std::iter::once(&state.prepend)
            .chain(state.ordered.values())
            .filter(|pending| !pending.is_empty())
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread};

    use crate::{headless::HeadlessDevice, Fence};

    use super::SubmissionChain;

    fn ids(batch: &super::SubmitBatch<HeadlessDevice>) -> Vec<u64> {
        batch.command_lists.iter().map(|list| list.id()).collect()
    }

    #[test]
    fn prepend_then_ascending_keys() {
        let device = HeadlessDevice::new();
        let chain = SubmissionChain::<HeadlessDevice>::default();
        let lists = (0..4).map(|_| device.command_list()).collect::<Vec<_>>();
        chain.add_command_list(5, lists[0].clone());
        chain.add_command_list(1, lists[1].clone());
        chain.add_command_list(3, lists[2].clone());
        chain.prepend_command_list(lists[3].clone());

        let batches = chain.finalize();
        assert_eq!(4, batches.len());
        assert_eq!(vec![lists[3].id()], ids(&batches[0]));
        assert_eq!(vec![lists[1].id()], ids(&batches[1]));
        assert_eq!(vec![lists[2].id()], ids(&batches[2]));
        assert_eq!(vec![lists[0].id()], ids(&batches[3]));
    }

    #[test]
    fn later_prepends_run_first() {
        let device = HeadlessDevice::new();
        let chain = SubmissionChain::<HeadlessDevice>::default();
        let first = device.command_list();
        let second = device.command_list();
        chain.prepend_command_list(first.clone());
        chain.prepend_command_list(second.clone());
        let batches = chain.finalize();
        assert_eq!(1, batches.len());
        assert_eq!(vec![second.id(), first.id()], ids(&batches[0]));
    }

    #[test]
    fn empty_keys_skipped() {
        let device = Arc::new(HeadlessDevice::new());
        let fence = Arc::new(Fence::new(&device, 0).unwrap());
        let chain = SubmissionChain::<HeadlessDevice>::default();
        chain.add_command_list(2, device.command_list());
        chain.reset();
        chain.add_signal_fence(4, &fence, 1);

        assert!(!chain.has_submission(2));
        assert!(chain.has_submission(4));
        assert!(!chain.has_command(4));
        let batches = chain.finalize();
        assert_eq!(1, batches.len());
        assert!(batches[0].command_lists.is_empty());
        assert_eq!(1, batches[0].signals[0].value);
    }

    #[test]
    fn waits_and_signals_stay_with_their_key() {
        let device = Arc::new(HeadlessDevice::new());
        let upload = Arc::new(Fence::new(&device, 0).unwrap());
        let chain = SubmissionChain::<HeadlessDevice>::default();
        chain.add_wait_fence(7, &upload, 3);
        chain.add_command_list(7, device.command_list());
        chain.add_signal_fence(7, &upload, 4);
        let batches = chain.finalize();
        assert_eq!(1, batches.len());
        assert_eq!(3, batches[0].waits[0].value);
        assert_eq!(1, batches[0].command_lists.len());
        assert_eq!(4, batches[0].signals[0].value);
    }

    #[test]
    fn reset_clears_everything() {
        let device = Arc::new(HeadlessDevice::new());
        let fence = Arc::new(Fence::new(&device, 0).unwrap());
        let chain = SubmissionChain::<HeadlessDevice>::default();
        chain.prepend_wait_fence(&fence, 1);
        chain.add_command_list(1, device.command_list());
        chain.add_command_list(9, device.command_list());
        chain.finalize();
        chain.reset();

        assert!(!chain.has_prepended_submission());
        assert!(!chain.has_submission(1));
        assert!(!chain.has_submission(9));
        assert!(chain.is_empty());
        assert!(chain.finalize().is_empty());
    }

    #[test]
    fn finalize_is_repeatable() {
        let device = HeadlessDevice::new();
        let chain = SubmissionChain::<HeadlessDevice>::default();
        chain.add_command_list(0, device.command_list());
        assert_eq!(1, chain.finalize().len());
        assert_eq!(1, chain.finalize().len());
    }

    #[test]
    fn drain_empties_chain() {
        let device = HeadlessDevice::new();
        let chain = SubmissionChain::<HeadlessDevice>::default();
        chain.prepend_command_list(device.command_list());
        chain.add_command_list(3, device.command_list());
        assert_eq!(2, chain.drain().len());
        assert!(chain.is_empty());
        assert!(chain.drain().is_empty());
    }

    #[test]
    fn concurrent_producers() {
        let device = Arc::new(HeadlessDevice::new());
        let chain = Arc::new(SubmissionChain::<HeadlessDevice>::default());
        let producers = (0..4u32)
            .map(|order| {
                let device = device.clone();
                let chain = chain.clone();
                thread::spawn(move || {
                    for _ in 0..16 {
                        chain.add_command_list(order, device.command_list());
                    }
                })
            })
            .collect::<Vec<_>>();
        producers
            .into_iter()
            .for_each(|producer| producer.join().unwrap());

        let batches = chain.finalize();
        assert_eq!(4, batches.len());
        assert!(batches.iter().all(|batch| batch.command_lists.len() == 16));
    }
}
