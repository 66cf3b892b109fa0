// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Closure-scripted sandboxes for tests.

use crate::{Host, ProcessResult, ResourceUsage, Sandbox, SandboxError};
use hs_core::Message;
use hs_storage::Checkpoint;
use std::path::Path;

/// Arguments of one `process_message` call, bundled for scripting.
pub struct ProcessArgs<'a> {
    pub msg: Option<&'a Message>,
    pub checkpoint: Option<&'a Checkpoint>,
    pub sequence_id: Option<u64>,
}

type ProcessFn = dyn FnMut(ProcessArgs<'_>, &mut dyn Host) -> ProcessResult + Send;
type TimerFn = dyn FnMut(i64, bool, &mut dyn Host) -> ProcessResult + Send;

/// A sandbox whose behavior is supplied as closures.
///
/// The default instance succeeds at init, returns `Sent` from every call,
/// and reports zero resource usage.
pub struct FakeSandbox {
    init_error: Option<String>,
    on_process: Box<ProcessFn>,
    on_timer: Box<TimerFn>,
    on_destroy: Option<Box<dyn FnOnce(Option<&Path>) -> Option<String> + Send>>,
    usage: ResourceUsage,
    stopped: bool,
}

impl Default for FakeSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self {
            init_error: None,
            on_process: Box::new(|_, _| ProcessResult::Sent),
            on_timer: Box::new(|_, _, _| ProcessResult::Sent),
            on_destroy: None,
            usage: ResourceUsage::default(),
            stopped: false,
        }
    }

    /// Make `init` fail with the given error.
    pub fn failing_init(mut self, error: &str) -> Self {
        self.init_error = Some(error.to_owned());
        self
    }

    pub fn on_process<F>(mut self, f: F) -> Self
    where
        F: FnMut(ProcessArgs<'_>, &mut dyn Host) -> ProcessResult + Send + 'static,
    {
        self.on_process = Box::new(f);
        self
    }

    pub fn on_timer<F>(mut self, f: F) -> Self
    where
        F: FnMut(i64, bool, &mut dyn Host) -> ProcessResult + Send + 'static,
    {
        self.on_timer = Box::new(f);
        self
    }

    pub fn on_destroy<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Option<&Path>) -> Option<String> + Send + 'static,
    {
        self.on_destroy = Some(Box::new(f));
        self
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = usage;
        self
    }
}

impl Sandbox for FakeSandbox {
    fn init(&mut self) -> Result<(), SandboxError> {
        match self.init_error.take() {
            Some(e) => Err(SandboxError::Init(e)),
            None => Ok(()),
        }
    }

    fn process_message(
        &mut self,
        msg: Option<&Message>,
        checkpoint: Option<&Checkpoint>,
        sequence_id: Option<u64>,
        host: &mut dyn Host,
    ) -> ProcessResult {
        if self.stopped {
            return ProcessResult::Fatal("shutting down".into());
        }
        (self.on_process)(
            ProcessArgs {
                msg,
                checkpoint,
                sequence_id,
            },
            host,
        )
    }

    fn timer_event(&mut self, now_ns: i64, shutdown: bool, host: &mut dyn Host) -> ProcessResult {
        if self.stopped && !shutdown {
            return ProcessResult::Fatal("shutting down".into());
        }
        (self.on_timer)(now_ns, shutdown, host)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn usage(&self) -> ResourceUsage {
        self.usage
    }

    fn destroy(mut self: Box<Self>, state_path: Option<&Path>) -> Option<String> {
        self.on_destroy.take().and_then(|f| f(state_path))
    }
}

/// A host that records calls instead of reaching a queue.
#[derive(Default)]
pub struct RecordingHost {
    pub injected: Vec<(Message, Option<Checkpoint>)>,
    pub acks: Vec<Option<u64>>,
}

impl Host for RecordingHost {
    fn inject_message(
        &mut self,
        msg: Message,
        checkpoint: Option<Checkpoint>,
    ) -> Result<(), crate::InjectError> {
        self.injected.push((msg, checkpoint));
        Ok(())
    }

    fn update_checkpoint(&mut self, sequence_id: Option<u64>) {
        self.acks.push(sequence_id);
    }
}
