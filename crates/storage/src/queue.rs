// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only message queues.
//!
//! A queue is a directory of numbered log files (`{id}.log`) holding frames
//! back to back. One writer appends under a mutex and rolls to the next id
//! at the size threshold; any number of readers tail the files
//! independently, each tracking its own `(id, offset)` position.

use hs_core::codec;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

/// Queue I/O failure. Writer-side failures are fatal to the process;
/// the runtime makes that call, not this crate.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl QueueError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }
}

/// The two on-disk queues between pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Input,
    Analysis,
}

impl QueueKind {
    /// Subdirectory of the output path holding this queue's log files.
    pub fn dir(&self) -> &'static str {
        match self {
            QueueKind::Input => "input",
            QueueKind::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir())
    }
}

/// A byte position within a queue: the file id and the offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueuePosition {
    pub id: u64,
    pub offset: u64,
}

impl QueuePosition {
    pub fn new(id: u64, offset: u64) -> Self {
        Self { id, offset }
    }
}

impl std::fmt::Display for QueuePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.id, self.offset)
    }
}

/// Result of one append.
#[derive(Debug, Clone, Copy)]
pub struct Append {
    /// Position immediately after the written frame.
    pub pos: QueuePosition,
    /// Whether this append crossed the roll threshold.
    pub rolled: bool,
    /// Frame bytes written (header + payload).
    pub frame_len: usize,
}

/// Path of one queue log file.
pub fn log_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.log"))
}

fn parse_log_id(name: &str) -> Option<u64> {
    name.strip_suffix(".log")?.parse().ok()
}

/// Smallest file id present in a queue directory.
pub fn find_first_id(dir: &Path) -> Option<u64> {
    scan_ids(dir, |_| true).min()
}

/// Smallest file id strictly greater than `after`.
pub fn find_next_id(dir: &Path, after: u64) -> Option<u64> {
    scan_ids(dir, move |id| id > after).min()
}

/// Largest file id present in a queue directory.
pub fn find_last_id(dir: &Path) -> Option<u64> {
    scan_ids(dir, |_| true).max()
}

fn scan_ids(dir: &Path, keep: impl Fn(u64) -> bool) -> impl Iterator<Item = u64> {
    std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|e| e.file_name().to_str().and_then(parse_log_id))
        .filter(move |id| keep(*id))
}

struct WriterInner {
    file: File,
    id: u64,
    offset: u64,
}

/// The single writer of one queue.
///
/// Appends and position snapshots take the internal mutex; the minimum
/// reader id is a separate atomic so the checkpoint writer can publish the
/// prune watermark without contending with producers.
pub struct QueueWriter {
    kind: QueueKind,
    dir: PathBuf,
    roll_size: u64,
    inner: Mutex<WriterInner>,
    min_reader_id: AtomicU64,
}

impl QueueWriter {
    /// Open the queue for append, resuming at `start_id`.
    pub fn open(
        output_path: &Path,
        kind: QueueKind,
        roll_size: u64,
        start_id: u64,
    ) -> Result<Self, QueueError> {
        let dir = output_path.join(kind.dir());
        std::fs::create_dir_all(&dir).map_err(|e| QueueError::io(&dir, e))?;
        let (file, offset) = open_append(&dir, start_id)?;
        Ok(Self {
            kind,
            dir,
            roll_size,
            inner: Mutex::new(WriterInner {
                file,
                id: start_id,
                offset,
            }),
            min_reader_id: AtomicU64::new(start_id),
        })
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Frame `payload` and append it, rolling to the next file id when the
    /// threshold is crossed. Frames are never split across files.
    pub fn append(&self, payload: &[u8]) -> Result<Append, QueueError> {
        let frame = codec::encode_frame(payload);
        let mut inner = self.inner.lock();
        let path = log_path(&self.dir, inner.id);
        inner
            .file
            .write_all(&frame)
            .map_err(|e| QueueError::io(&path, e))?;
        inner.offset += frame.len() as u64;
        let pos = QueuePosition::new(inner.id, inner.offset);
        let mut rolled = false;
        if inner.offset >= self.roll_size {
            inner
                .file
                .sync_data()
                .map_err(|e| QueueError::io(&path, e))?;
            inner.id += 1;
            let (file, offset) = open_append(&self.dir, inner.id)?;
            inner.file = file;
            inner.offset = offset;
            rolled = true;
            debug!(queue = %self.kind, id = inner.id, "rolled queue file");
        }
        Ok(Append {
            pos,
            rolled,
            frame_len: frame.len(),
        })
    }

    /// Snapshot the current `(id, offset)` pair.
    pub fn position(&self) -> QueuePosition {
        let inner = self.inner.lock();
        QueuePosition::new(inner.id, inner.offset)
    }

    /// Publish the minimum reader id; files below it may be reclaimed.
    /// Monotone non-decreasing.
    pub fn set_min_reader_id(&self, id: u64) {
        self.min_reader_id.fetch_max(id, Ordering::Release);
    }

    pub fn min_reader_id(&self) -> u64 {
        self.min_reader_id.load(Ordering::Acquire)
    }

    /// File-id gap between the writer and the slowest reader.
    pub fn backlog(&self) -> u64 {
        let id = self.inner.lock().id;
        id.saturating_sub(self.min_reader_id())
    }
}

fn open_append(dir: &Path, id: u64) -> Result<(File, u64), QueueError> {
    let path = log_path(dir, id);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| QueueError::io(&path, e))?;
    let offset = file
        .metadata()
        .map_err(|e| QueueError::io(&path, e))?
        .len();
    Ok((file, offset))
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
