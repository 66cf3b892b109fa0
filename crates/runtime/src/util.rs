// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Small shared helpers for the plugin runtimes.

use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

/// Nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Record a plugin's termination error next to its state
/// (`{output_path}/{plugin}.err`).
pub fn write_error_file(output_path: &Path, plugin: &str, error: &str) {
    let path = output_path.join(format!("{plugin}.err"));
    if let Err(e) = std::fs::write(&path, error) {
        warn!(plugin, path = %path.display(), error = %e, "could not write error file");
    }
}

/// Remove a stale termination error file when a plugin starts cleanly.
pub fn clear_error_file(output_path: &Path, plugin: &str) {
    let _ = std::fs::remove_file(output_path.join(format!("{plugin}.err")));
}

/// A shared-infrastructure failure that compromises durability: log and
/// exit the process.
pub fn fatal(what: &str, err: &dyn std::fmt::Display) -> ! {
    error!(what, error = %err, "fatal runtime error");
    std::process::exit(1);
}

/// Join worker threads, abandoning any that outlive `timeout`.
pub fn join_with_timeout(
    handles: Vec<(String, std::thread::JoinHandle<()>)>,
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;
    for (name, handle) in handles {
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!(plugin = %name, "worker thread panicked");
            }
        } else {
            // a plugin blocked in a native call; nothing safe to do but
            // leave it behind
            warn!(plugin = %name, "worker did not stop in time, abandoning thread");
        }
    }
}
