// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Slot-based plugin registry.
//!
//! The registry owns the shared half of each plugin; worker threads keep
//! the sandbox itself. A worker detaching after a fatal error clears its
//! own slot under the list lock. The lock is held only for slot updates
//! and snapshots, never across plugin calls.

use parking_lot::Mutex;
use std::sync::Arc;

pub struct Registry<T> {
    slots: Mutex<Vec<Option<Arc<T>>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Add an entry, reusing the first free slot. Returns the slot index.
    pub fn add(&self, item: Arc<T>) -> usize {
        let mut slots = self.slots.lock();
        if let Some(idx) = slots.iter().position(Option::is_none) {
            slots[idx] = Some(item);
            return idx;
        }
        slots.push(Some(item));
        slots.len() - 1
    }

    /// Null a slot (worker detach or administrative removal).
    pub fn clear(&self, idx: usize) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(idx) {
            *slot = None;
        }
    }

    /// Snapshot the live entries.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.slots.lock().iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
