// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cooperative shutdown signal shared across the runtime.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    flag: Mutex<bool>,
    cv: Condvar,
}

/// Cloneable shutdown handle. Workers check it between messages and use
/// [`wait_timeout`](Shutdown::wait_timeout) instead of bare sleeps so a
/// shutdown interrupts every suspension point.
#[derive(Clone)]
pub struct Shutdown(Arc<Inner>);

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            flag: Mutex::new(false),
            cv: Condvar::new(),
        }))
    }

    pub fn trigger(&self) {
        let mut flag = self.0.flag.lock();
        *flag = true;
        self.0.cv.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.0.flag.lock()
    }

    /// Sleep up to `dur`; returns true when shutdown was triggered.
    pub fn wait_timeout(&self, dur: Duration) -> bool {
        let mut flag = self.0.flag.lock();
        if *flag {
            return true;
        }
        self.0.cv.wait_for(&mut flag, dur);
        *flag
    }

    /// Block until triggered.
    pub fn wait(&self) {
        let mut flag = self.0.flag.lock();
        while !*flag {
            self.0.cv.wait(&mut flag);
        }
    }
}

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;
