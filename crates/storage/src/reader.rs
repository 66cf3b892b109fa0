// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tailing queue reader with frame resync and file advancement.
//!
//! The reader keeps a grow-only buffer with two cursors: `readpos` marks how
//! much of the buffer is filled from the file, `scanpos` how far frame
//! scanning has consumed it. Garbage between frames is skipped one byte at a
//! time past a bad marker, or wholesale when no marker is present.
//!
//! Advancement: when the current file is exhausted past the roll threshold,
//! probe `{id+1}.log` once per poll cycle; after [`SKIP_CYCLES`] failed
//! probes, scan the directory for the next existing id and jump the gap.
//! A reader that cannot open its *first* file for [`SKIP_CYCLES`] cycles
//! reports a stale checkpoint so the owner can decide where to restart.

use crate::queue::{self, QueueError, QueueKind, QueuePosition};
use hs_core::codec::{self, ScanOutcome};
use hs_core::Message;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Poll cycles to wait on a missing file before probing the directory.
pub const SKIP_CYCLES: u32 = 60;

const READ_CHUNK: usize = 8 * 1024;

/// One step of [`QueueReader::poll`].
#[derive(Debug)]
pub enum Poll {
    /// The next decoded message.
    Message(Message),
    /// Nothing readable right now; sleep a cycle and poll again.
    Waiting,
    /// The checkpointed file has not appeared after [`SKIP_CYCLES`] cycles;
    /// the position is likely stale (pruned files, manual cleanup).
    Stale,
}

pub struct QueueReader {
    dir: PathBuf,
    kind: QueueKind,
    /// Consumer name, for log lines.
    name: String,
    roll_size: u64,
    max_message_size: usize,
    file: Option<File>,
    id: u64,
    /// Bytes consumed from the current file (the read position).
    offset: u64,
    buf: Vec<u8>,
    scanpos: usize,
    readpos: usize,
    /// Keep probing id+1 even below the roll threshold (a successful probe
    /// implies the roll size shrank across a restart).
    probe_next: bool,
    /// One id+1 probe below the threshold per file, covering a roll size
    /// that grew across a restart.
    checked_next: bool,
    wait_cycles: u32,
    open_cycles: u32,
}

impl QueueReader {
    pub fn new(
        output_path: &Path,
        kind: QueueKind,
        name: &str,
        roll_size: u64,
        max_message_size: usize,
        pos: QueuePosition,
    ) -> Self {
        Self {
            dir: output_path.join(kind.dir()),
            kind,
            name: name.to_owned(),
            roll_size,
            max_message_size,
            file: None,
            id: pos.id,
            offset: pos.offset,
            buf: Vec::new(),
            scanpos: 0,
            readpos: 0,
            probe_next: false,
            checked_next: false,
            wait_cycles: 0,
            open_cycles: 0,
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Raw read position (ahead of the last returned message by whatever is
    /// still buffered).
    pub fn position(&self) -> QueuePosition {
        QueuePosition::new(self.id, self.offset)
    }

    /// Position just past the last message returned by
    /// [`poll`](Self::poll); this is what belongs in a reader checkpoint.
    pub fn consumed_position(&self) -> QueuePosition {
        QueuePosition::new(
            self.id,
            self.offset
                .saturating_sub((self.readpos - self.scanpos) as u64),
        )
    }

    /// Drop all state and restart from `pos`.
    pub fn reset_to(&mut self, pos: QueuePosition) {
        self.file = None;
        self.id = pos.id;
        self.offset = pos.offset;
        self.buf.clear();
        self.scanpos = 0;
        self.readpos = 0;
        self.probe_next = false;
        self.checked_next = false;
        self.wait_cycles = 0;
        self.open_cycles = 0;
    }

    /// Newest position in the queue directory (used to recover from a stale
    /// checkpoint).
    pub fn tail_position(&self) -> QueuePosition {
        QueuePosition::new(queue::find_last_id(&self.dir).unwrap_or(0), 0)
    }

    /// Oldest position in the queue directory.
    pub fn head_position(&self) -> QueuePosition {
        QueuePosition::new(queue::find_first_id(&self.dir).unwrap_or(0), 0)
    }

    /// Advance one cycle: return the next message if one is buffered or
    /// readable, otherwise report `Waiting`/`Stale`. Never blocks.
    pub fn poll(&mut self) -> Result<Poll, QueueError> {
        if self.file.is_none() && !self.open_current()? {
            self.open_cycles += 1;
            if self.open_cycles > SKIP_CYCLES {
                self.open_cycles = 0;
                return Ok(Poll::Stale);
            }
            return Ok(Poll::Waiting);
        }
        self.open_cycles = 0;

        loop {
            if let Some(m) = self.find_buffered() {
                return Ok(Poll::Message(m));
            }
            if self.refill()? == 0 {
                break;
            }
        }

        // end of file: consider moving to the next id
        if self.offset >= self.roll_size || self.probe_next {
            if self.open_next(self.id + 1)? {
                return self.poll();
            }
            self.probe_next = true;
            self.wait_cycles += 1;
            if self.wait_cycles > SKIP_CYCLES {
                self.wait_cycles = 0;
                if let Some(next) = queue::find_next_id(&self.dir, self.id) {
                    if next > self.id + 1 {
                        warn!(
                            queue = %self.kind,
                            name = %self.name,
                            skipped = next - self.id - 1,
                            "queue files missing, skipping ahead"
                        );
                        if self.open_next(next)? {
                            return self.poll();
                        }
                    }
                }
            }
        } else if !self.checked_next {
            // the roll threshold may have grown across a restart, leaving
            // this file complete below it; check for a successor once
            self.checked_next = true;
            if self.open_next(self.id + 1)? {
                return self.poll();
            }
        }
        Ok(Poll::Waiting)
    }

    fn open_current(&mut self) -> Result<bool, QueueError> {
        let path = queue::log_path(&self.dir, self.id);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(QueueError::io(&path, e)),
        };
        if self.offset > 0 {
            file.seek(SeekFrom::Start(self.offset))
                .map_err(|e| QueueError::io(&path, e))?;
        }
        info!(queue = %self.kind, name = %self.name, id = self.id, offset = self.offset,
              "opened queue file");
        self.file = Some(file);
        Ok(true)
    }

    fn open_next(&mut self, id: u64) -> Result<bool, QueueError> {
        let path = queue::log_path(&self.dir, id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(QueueError::io(&path, e)),
        };
        info!(queue = %self.kind, name = %self.name, id, "advanced to next queue file");
        self.file = Some(file);
        self.id = id;
        self.offset = 0;
        self.probe_next = false;
        self.checked_next = false;
        self.wait_cycles = 0;
        Ok(true)
    }

    /// Scan the buffered window for the next frame, resyncing past garbage.
    fn find_buffered(&mut self) -> Option<Message> {
        while self.scanpos < self.readpos {
            let window = &self.buf[self.scanpos..self.readpos];
            match codec::scan_frame(window, self.max_message_size) {
                ScanOutcome::Frame { start, payload } => {
                    if start > 0 {
                        self.log_discard(start);
                    }
                    let bytes = &self.buf[self.scanpos + payload.start..self.scanpos + payload.end];
                    match codec::decode_message(bytes) {
                        Ok(m) => {
                            self.scanpos += payload.end;
                            return Some(m);
                        }
                        Err(e) => {
                            warn!(
                                queue = %self.kind,
                                name = %self.name,
                                offset = self.consumed_position().offset,
                                error = %e,
                                "message decode failed, resyncing"
                            );
                            self.scanpos += start + 1;
                        }
                    }
                }
                ScanOutcome::Garbage { discard } => {
                    self.log_discard(discard);
                    self.scanpos += discard;
                }
                ScanOutcome::Partial { start } => {
                    if start > 0 {
                        self.log_discard(start);
                        self.scanpos += start;
                    }
                    return None;
                }
            }
        }
        None
    }

    fn log_discard(&self, bytes: usize) {
        warn!(
            queue = %self.kind,
            name = %self.name,
            offset = self
                .offset
                .saturating_sub((self.readpos - self.scanpos) as u64),
            bytes,
            "discarded bytes"
        );
    }

    /// Compact the consumed prefix and read the next chunk from the file.
    fn refill(&mut self) -> Result<usize, QueueError> {
        if self.scanpos > 0 {
            self.buf.copy_within(self.scanpos..self.readpos, 0);
            self.readpos -= self.scanpos;
            self.scanpos = 0;
        }
        self.buf.resize(self.readpos + READ_CHUNK, 0);
        let path = queue::log_path(&self.dir, self.id);
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let n = file
            .read(&mut self.buf[self.readpos..])
            .map_err(|e| QueueError::io(&path, e))?;
        self.readpos += n;
        self.offset += n as u64;
        self.buf.truncate(self.readpos);
        Ok(n)
    }
}

#[cfg(test)]
#[path = "reader_tests.rs"]
mod tests;
