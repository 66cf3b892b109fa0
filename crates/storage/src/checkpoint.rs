// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable key to checkpoint-value map with atomic rewrite.
//!
//! The store backs `{output_path}/hindsight.cp`: one assignment per line,
//! rewritten in a single pass to a `.tmp` file, fsynced, renamed over the
//! canonical file, and made durable with a directory fsync. Keys:
//!
//! - `{queue}->{plugin}`: a reader position, rendered `'id:offset'`
//! - `{plugin}`: a plugin-private opaque checkpoint (number or string)
//! - `input` / `analysis`: the queue writer's current position
//!
//! Loading executes each line as `key = value`; unrecognized lines are
//! ignored so newer files stay readable by older builds.

use crate::queue::{self, QueueKind, QueuePosition};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Checkpoint file name within the output path.
pub const CHECKPOINT_FILE: &str = "hindsight.cp";

/// Longest accepted string checkpoint.
pub const MAX_TEXT_LEN: usize = 8 * 1024;

/// Store failure. Persistence failures are fatal to the process.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("string checkpoint of {0} bytes exceeds {MAX_TEXT_LEN}")]
    TextTooLarge(usize),
}

/// One checkpoint value.
#[derive(Debug, Clone, PartialEq)]
pub enum Checkpoint {
    Number(f64),
    Text(String),
    Position(QueuePosition),
}

impl Checkpoint {
    /// Parse a `"{id}:{offset}"` rendering back into a position.
    pub fn as_position(&self) -> Option<QueuePosition> {
        match self {
            Checkpoint::Position(pos) => Some(*pos),
            Checkpoint::Text(s) => {
                let (id, offset) = s.split_once(':')?;
                Some(QueuePosition::new(id.parse().ok()?, offset.parse().ok()?))
            }
            Checkpoint::Number(_) => None,
        }
    }
}

/// The durable checkpoint store.
pub struct CheckpointStore {
    path: PathBuf,
    tmp_path: PathBuf,
    map: Mutex<BTreeMap<String, Checkpoint>>,
}

impl CheckpointStore {
    /// Open the store, loading the canonical file when present.
    pub fn open(output_path: &Path) -> Result<Self, CheckpointError> {
        let path = output_path.join(CHECKPOINT_FILE);
        let tmp_path = output_path.join(format!("{CHECKPOINT_FILE}.tmp"));
        let mut map = BTreeMap::new();
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                for line in text.lines() {
                    match parse_line(line) {
                        Some((key, value)) => {
                            map.insert(key, value);
                        }
                        None if line.trim().is_empty() => {}
                        None => warn!(line, "ignoring unrecognized checkpoint line"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(CheckpointError::Io { path, source }),
        }
        Ok(Self {
            path,
            tmp_path,
            map: Mutex::new(map),
        })
    }

    pub fn get(&self, key: &str) -> Option<Checkpoint> {
        self.map.lock().get(key).cloned()
    }

    /// Set a value; string checkpoints are bounded.
    pub fn set(&self, key: &str, value: Checkpoint) -> Result<(), CheckpointError> {
        if let Checkpoint::Text(s) = &value {
            if s.len() > MAX_TEXT_LEN {
                return Err(CheckpointError::TextTooLarge(s.len()));
            }
        }
        self.map.lock().insert(key.to_owned(), value);
        Ok(())
    }

    pub fn remove(&self, key: &str) {
        self.map.lock().remove(key);
    }

    fn reader_key(kind: QueueKind, plugin: &str) -> String {
        format!("{}->{}", kind.dir(), plugin)
    }

    /// Record a reader position.
    pub fn update_reader(&self, kind: QueueKind, plugin: &str, pos: QueuePosition) {
        self.map
            .lock()
            .insert(Self::reader_key(kind, plugin), Checkpoint::Position(pos));
    }

    pub fn remove_reader(&self, kind: QueueKind, plugin: &str) {
        self.map.lock().remove(&Self::reader_key(kind, plugin));
    }

    /// Resolve a reader position; a missing or unparseable entry falls back
    /// to the smallest file id present in the queue directory.
    pub fn lookup_reader(
        &self,
        output_path: &Path,
        kind: QueueKind,
        plugin: &str,
    ) -> QueuePosition {
        if let Some(pos) = self
            .get(&Self::reader_key(kind, plugin))
            .and_then(|cp| cp.as_position())
        {
            return pos;
        }
        let dir = output_path.join(kind.dir());
        QueuePosition::new(queue::find_first_id(&dir).unwrap_or(0), 0)
    }

    /// Record a queue writer position under the bare queue-name key.
    pub fn update_writer(&self, kind: QueueKind, pos: QueuePosition) {
        self.map
            .lock()
            .insert(kind.dir().to_owned(), Checkpoint::Position(pos));
    }

    pub fn lookup_writer(&self, kind: QueueKind) -> Option<QueuePosition> {
        self.get(kind.dir()).and_then(|cp| cp.as_position())
    }

    /// Rewrite the canonical file atomically: one pass under the lock into
    /// `.tmp`, fsync, rename, directory fsync.
    pub fn write(&self) -> Result<(), CheckpointError> {
        let mut text = String::new();
        {
            let map = self.map.lock();
            for (key, value) in map.iter() {
                render_line(&mut text, key, value);
            }
        }

        let mut tmp = File::create(&self.tmp_path).map_err(|e| self.io(&self.tmp_path, e))?;
        tmp.write_all(text.as_bytes())
            .map_err(|e| self.io(&self.tmp_path, e))?;
        tmp.sync_all().map_err(|e| self.io(&self.tmp_path, e))?;
        drop(tmp);
        std::fs::rename(&self.tmp_path, &self.path)
            .map_err(|e| self.io(&self.path, e))?;
        if let Some(parent) = self.path.parent() {
            let dir = File::open(parent).map_err(|e| self.io(parent, e))?;
            dir.sync_all().map_err(|e| self.io(parent, e))?;
        }
        Ok(())
    }

    fn io(&self, path: &Path, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: path.to_owned(),
            source,
        }
    }
}

fn render_line(out: &mut String, key: &str, value: &Checkpoint) {
    out.push_str("_G['");
    out.push_str(key);
    out.push_str("'] = ");
    match value {
        Checkpoint::Number(n) => {
            out.push_str(&n.to_string());
        }
        Checkpoint::Text(s) => {
            out.push('\'');
            escape_into(out, s);
            out.push('\'');
        }
        Checkpoint::Position(pos) => {
            out.push('\'');
            out.push_str(&pos.to_string());
            out.push('\'');
        }
    }
    out.push('\n');
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Parse one `key = value` line, accepting both the bare and the
/// `_G['key']` key forms and single- or double-quoted strings.
fn parse_line(line: &str) -> Option<(String, Checkpoint)> {
    let line = line.trim();
    let (raw_key, raw_value) = line.split_once('=')?;
    let raw_key = raw_key.trim();
    let raw_value = raw_value.trim();

    let key = if let Some(stripped) = raw_key.strip_prefix("_G[") {
        let inner = stripped.strip_suffix(']')?;
        strip_quotes(inner)?
    } else {
        raw_key.to_string()
    };
    if key.is_empty() {
        return None;
    }

    let value = if let Some(text) = strip_quotes(raw_value) {
        Checkpoint::Text(unescape(&text))
    } else {
        Checkpoint::Number(raw_value.parse().ok()?)
    };
    Some((key, value))
}

fn strip_quotes(s: &str) -> Option<String> {
    for quote in ['\'', '"'] {
        if let Some(inner) = s
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Some(inner.to_string());
        }
    }
    None
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
