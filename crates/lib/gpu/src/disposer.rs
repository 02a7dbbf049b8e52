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

//! Deferred destruction of objects that GPU may still use.
//!
//! Objects are destroyed only inside [`Disposer::gc`] or [`Disposer::reset`],
//! never when their reference count drops.

use std::{collections::HashMap, fmt::Debug, hash::Hash};

use log::{debug, error};

pub type Destructor = Box<dyn FnOnce() + Send>;

struct Disposable {
    ref_count: u32,
    /// Frames until reference taken by `acquire` is dropped.
    frames_left: u32,
    acquired: bool,
    destructor: Destructor,
}

/// Reference counted registry of pending destructions.
///
/// Not synchronized, callers wrap it into a lock when needed.
pub struct Disposer<K: Hash + Eq + Copy + Debug> {
    frames: u32,
    entries: HashMap<K, Disposable>,
}

impl<K: Hash + Eq + Copy + Debug> Disposer<K> {
    /// `frames` is how many frame boundaries a reference taken by `acquire`
    /// lives.
    pub fn new(frames: u32) -> Self {
        assert!(frames > 0, "Disposer needs at least one frame of delay");
        Self {
            frames,
            entries: HashMap::new(),
        }
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Registers an object with single owning reference.
    pub fn create_disposable(&mut self, key: K, destructor: impl FnOnce() + Send + 'static) {
        let old = self.entries.insert(
            key,
            Disposable {
                ref_count: 1,
                frames_left: 0,
                acquired: false,
                destructor: Box::new(destructor),
            },
        );
        assert!(old.is_none(), "Disposable {:?} registered twice", key);
    }

    /// Keeps object alive while command lists recorded this frame may run.
    pub fn acquire(&mut self, key: K) {
        let frames = self.frames;
        let entry = self.entry(key);
        if !entry.acquired {
            entry.acquired = true;
            entry.ref_count += 1;
        }
        entry.frames_left = frames;
    }

    pub fn remove_reference(&mut self, key: K) {
        let entry = self.entry(key);
        // Reference taken by `acquire` is only dropped by `gc`.
        assert!(
            entry.ref_count > u32::from(entry.acquired),
            "Double free of disposable {:?}",
            key
        );
        entry.ref_count -= 1;
    }

    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn ref_count(&self, key: K) -> Option<u32> {
        self.entries.get(&key).map(|entry| entry.ref_count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advances one frame and destroys everything nobody references.
    ///
    /// Returns number of destroyed objects.
    pub fn gc(&mut self) -> usize {
        puffin::profile_function!();
        for entry in self.entries.values_mut().filter(|entry| entry.acquired) {
            entry.frames_left = entry.frames_left.saturating_sub(1);
            if entry.frames_left == 0 {
                entry.acquired = false;
                entry.ref_count = entry
                    .ref_count
                    .checked_sub(1)
                    .expect("Acquired disposable lost its acquire reference");
            }
        }
        let dead = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.ref_count == 0)
            .map(|(key, _)| *key)
            .collect::<Vec<_>>();
        let destructors = dead
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .map(|entry| entry.destructor)
            .collect::<Vec<_>>();
        let count = destructors.len();
        destructors.into_iter().for_each(|destructor| destructor());
        if count > 0 {
            debug!("Disposed {} objects, {} pending", count, self.entries.len());
        }

        count
    }

    /// Destroys everything regardless of references. Only safe when GPU is idle.
    pub fn reset(&mut self) -> usize {
        let count = self.entries.len();
        self.entries
            .drain()
            .map(|(_, entry)| entry.destructor)
            .collect::<Vec<_>>()
            .into_iter()
            .for_each(|destructor| destructor());

        count
    }

    fn entry(&mut self, key: K) -> &mut Disposable {
        self.entries
            .get_mut(&key)
            .unwrap_or_else(|| panic!("Unknown disposable {:?}", key))
    }
}

impl<K: Hash + Eq + Copy + Debug> Drop for Disposer<K> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            error!(
                "Disposer dropped with {} live objects, leaking them",
                self.entries.len()
            );
            self.entries
                .drain()
                .for_each(|(_, entry)| std::mem::forget(entry.destructor));
        }
    }
}
