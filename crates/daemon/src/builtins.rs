// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugins compiled into the daemon.
//!
//! These exercise the whole pipeline out of the box: `heartbeat` produces
//! messages, `counter` aggregates them, `tee` writes matched payloads to a
//! file. Site-specific plugins register additional factories on the engine
//! before the daemon starts.

use hs_core::{Field, FieldValue, Message};
use hs_sandbox::{
    Host, NativeEngine, ProcessResult, Sandbox, SandboxError, SandboxSpec,
};
use hs_storage::Checkpoint;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Register every built-in on an engine.
pub fn register_builtins(engine: &mut NativeEngine) {
    engine.register("heartbeat", |spec| Ok(Box::new(Heartbeat::new(spec))));
    engine.register("counter", |spec| Ok(Box::new(Counter::new(spec))));
    engine.register("tee", |spec| {
        Tee::new(spec).map(|t| Box::new(t) as Box<dyn Sandbox>)
    });
}

fn cfg_u64(spec: &SandboxSpec, key: &str, default: u64) -> u64 {
    spec.config
        .get(key)
        .and_then(|v| v.as_integer())
        .map(|v| v as u64)
        .unwrap_or(default)
}

fn cfg_str(spec: &SandboxSpec, key: &str) -> Option<String> {
    spec.config
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

/// Input plugin emitting `batch` messages per poll with a numeric
/// checkpoint, resuming the sequence across restarts.
struct Heartbeat {
    batch: u64,
    msg_type: String,
}

impl Heartbeat {
    fn new(spec: &SandboxSpec) -> Self {
        Self {
            batch: cfg_u64(spec, "batch", 1).max(1),
            msg_type: cfg_str(spec, "type").unwrap_or_else(|| "heartbeat".to_owned()),
        }
    }
}

impl Sandbox for Heartbeat {
    fn init(&mut self) -> Result<(), SandboxError> {
        Ok(())
    }

    fn process_message(
        &mut self,
        _msg: Option<&Message>,
        checkpoint: Option<&Checkpoint>,
        _sequence_id: Option<u64>,
        host: &mut dyn Host,
    ) -> ProcessResult {
        let mut n = match checkpoint {
            Some(Checkpoint::Number(v)) => *v as u64,
            _ => 0,
        };
        for _ in 0..self.batch {
            n += 1;
            let mut m = Message::default();
            m.msg_type = Some(self.msg_type.clone());
            m.payload = Some(format!("beat {n}"));
            m.fields = vec![Field::new("seq", FieldValue::Integer(vec![n as i64]))];
            if let Err(e) = host.inject_message(m, Some(Checkpoint::Number(n as f64))) {
                return ProcessResult::Fatal(e.to_string());
            }
        }
        ProcessResult::Sent
    }

    fn timer_event(&mut self, _now_ns: i64, _shutdown: bool, _host: &mut dyn Host) -> ProcessResult {
        ProcessResult::Sent
    }
}

/// Analysis plugin counting matched messages per type, reporting on its
/// ticker and carrying the totals across restarts when data is preserved.
struct Counter {
    seen: u64,
    report_type: String,
}

impl Counter {
    fn new(spec: &SandboxSpec) -> Self {
        let mut counter = Self {
            seen: 0,
            report_type: cfg_str(spec, "report_type").unwrap_or_else(|| "counter.report".into()),
        };
        if let Some(path) = &spec.state_path {
            if let Ok(text) = std::fs::read_to_string(path) {
                if let Ok(seen) = text.trim().parse() {
                    counter.seen = seen;
                }
            }
        }
        counter
    }
}

impl Sandbox for Counter {
    fn init(&mut self) -> Result<(), SandboxError> {
        Ok(())
    }

    fn process_message(
        &mut self,
        _msg: Option<&Message>,
        _checkpoint: Option<&Checkpoint>,
        _sequence_id: Option<u64>,
        _host: &mut dyn Host,
    ) -> ProcessResult {
        self.seen += 1;
        ProcessResult::Sent
    }

    fn timer_event(&mut self, _now_ns: i64, shutdown: bool, host: &mut dyn Host) -> ProcessResult {
        if shutdown {
            return ProcessResult::Sent;
        }
        let mut m = Message::default();
        m.msg_type = Some(self.report_type.clone());
        m.payload = Some(self.seen.to_string());
        m.fields = vec![Field::new(
            "count",
            FieldValue::Integer(vec![self.seen as i64]),
        )];
        match host.inject_message(m, None) {
            Ok(()) => ProcessResult::Sent,
            Err(e) => ProcessResult::Fatal(e.to_string()),
        }
    }

    fn destroy(self: Box<Self>, state_path: Option<&Path>) -> Option<String> {
        let path = state_path?;
        std::fs::write(path, self.seen.to_string())
            .err()
            .map(|e| format!("{}: {e}", path.display()))
    }
}

/// Output plugin appending matched payloads to a file, one per line.
struct Tee {
    path: PathBuf,
    /// Longest line written, reported as the output high-water mark.
    max_line: u64,
}

impl Tee {
    fn new(spec: &SandboxSpec) -> Result<Self, SandboxError> {
        let path = cfg_str(spec, "path")
            .map(PathBuf::from)
            .ok_or_else(|| SandboxError::Create(format!("{}: path must be set", spec.name)))?;
        Ok(Self { path, max_line: 0 })
    }
}

impl Sandbox for Tee {
    fn init(&mut self) -> Result<(), SandboxError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SandboxError::Init(format!("{}: {e}", self.path.display())))?;
        }
        Ok(())
    }

    fn process_message(
        &mut self,
        msg: Option<&Message>,
        _checkpoint: Option<&Checkpoint>,
        _sequence_id: Option<u64>,
        _host: &mut dyn Host,
    ) -> ProcessResult {
        let Some(msg) = msg else {
            return ProcessResult::Sent;
        };
        let line = msg.payload.as_deref().unwrap_or_default();
        let write = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        match write {
            Ok(()) => {
                self.max_line = self.max_line.max(line.len() as u64 + 1);
                ProcessResult::Sent
            }
            // the sink may come back; retry rather than drop
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ProcessResult::Fatal(format!("{}: {e}", self.path.display()))
            }
            Err(_) => ProcessResult::Retry,
        }
    }

    fn timer_event(&mut self, _now_ns: i64, _shutdown: bool, _host: &mut dyn Host) -> ProcessResult {
        ProcessResult::Sent
    }

    fn usage(&self) -> hs_sandbox::ResourceUsage {
        hs_sandbox::ResourceUsage {
            out_max: self.max_line,
            ..Default::default()
        }
    }
}

#[cfg(test)]
#[path = "builtins_tests.rs"]
mod tests;
