// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Producer throttling when a queue outruns its slowest reader.
//!
//! Backpressure engages on a rollover when the file-id gap between writer
//! and minimum reader exceeds the configured bound, or when free disk drops
//! below the configured number of roll-sized blocks. Once engaged, every
//! injection pays ~100 ms until the queue has fully caught up *and* the
//! disk condition has cleared.

use crate::shutdown::Shutdown;
use hs_storage::QueueWriter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Per-injection throttle while engaged.
const THROTTLE: Duration = Duration::from_millis(100);

/// Release checks are rate limited to one per second.
const CHECK_INTERVAL: Duration = Duration::from_secs(1);

pub struct Backpressure {
    /// File-id gap bound; zero disables.
    limit: u64,
    /// Free-disk bound in roll-sized blocks; zero disables.
    df_limit: u64,
    roll_size: u64,
    engaged: AtomicBool,
    last_check: Mutex<Option<Instant>>,
}

impl Backpressure {
    pub fn new(limit: u64, df_limit: u64, roll_size: u64) -> Self {
        Self {
            limit,
            df_limit,
            roll_size,
            engaged: AtomicBool::new(false),
            last_check: Mutex::new(None),
        }
    }

    pub fn engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    /// Evaluate the engage conditions after an append that rolled the file.
    pub fn after_roll(&self, queue: &QueueWriter) {
        if self.engaged() {
            return;
        }
        if self.limit > 0 && queue.backlog() > self.limit {
            self.engaged.store(true, Ordering::Release);
            warn!(queue = %queue.kind(), "applying backpressure (checkpoint)");
            return;
        }
        if self.df_limit > 0 && self.disk_blocks_free(queue) <= self.df_limit {
            self.engaged.store(true, Ordering::Release);
            warn!(queue = %queue.kind(), "applying backpressure (disk)");
        }
    }

    /// Throttle the calling producer while engaged, re-checking release at
    /// most once per second. The sleep is shutdown aware.
    pub fn throttle(&self, queue: &QueueWriter, shutdown: &Shutdown) {
        if !self.engaged() {
            return;
        }
        {
            let mut last = self.last_check.lock();
            let due = last.map(|t| t.elapsed() >= CHECK_INTERVAL).unwrap_or(true);
            if due {
                *last = Some(Instant::now());
                let disk_ok = self.df_limit == 0 || self.disk_blocks_free(queue) > self.df_limit;
                // even when disk triggered, stay engaged until the queue
                // has caught up too
                if queue.backlog() == 0 && disk_ok {
                    self.engaged.store(false, Ordering::Release);
                    warn!(queue = %queue.kind(), "releasing backpressure");
                    return;
                }
            }
        }
        shutdown.wait_timeout(THROTTLE);
    }

    fn disk_blocks_free(&self, queue: &QueueWriter) -> u64 {
        match fs2::available_space(queue.dir()) {
            Ok(bytes) => bytes / self.roll_size.max(1),
            Err(e) => {
                warn!(queue = %queue.kind(), error = %e, "disk free probe failed");
                u64::MAX
            }
        }
    }
}

#[cfg(test)]
#[path = "backpressure_tests.rs"]
mod tests;
