// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The sandbox seam: everything the pipeline runtime requires of a plugin
//! execution engine.
//!
//! The runtime never talks to a concrete engine; it drives a
//! [`host::SandboxHost`] wrapping a boxed [`Sandbox`] obtained from a
//! [`SandboxEngine`]. The shipped [`NativeEngine`] hosts plugins compiled
//! into the binary and registered by name; an embedded interpreter or an
//! out-of-process runner would slot in behind the same traits.

pub mod host;
mod native;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

use hs_core::{Message, PluginKind};
use hs_storage::Checkpoint;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use native::NativeEngine;

/// Resource budget applied to one sandboxed plugin.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeLimits {
    pub memory_bytes: u64,
    pub instructions: u64,
    pub output_bytes: u64,
    pub max_message_size: usize,
}

/// Usage a sandbox reports back for stats and budget enforcement.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUsage {
    pub mem_cur: u64,
    pub mem_max: u64,
    pub out_max: u64,
    pub ins_max: u64,
}

/// Engine and lifecycle failures.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("unknown plugin source {0:?}")]
    UnknownSource(String),
    #[error("create failed: {0}")]
    Create(String),
    #[error("init failed: {0}")]
    Init(String),
    #[error("terminated: {0}")]
    Terminated(String),
}

/// Disposition of one `process_message` or `timer_event` call.
///
/// Everything but `Fatal` advances or retries; `Fatal` terminates the
/// plugin instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// Delivered; checkpoint immediately.
    Sent,
    /// Dropped after an unrecoverable per-message error; log and advance.
    Fail,
    /// Transient delivery failure; sleep and retry the same message.
    Retry,
    /// Buffered for a later batch ack; defer the checkpoint.
    Batch,
    /// Queued for asynchronous delivery; checkpoint on the matching ack.
    Async,
    /// The plugin is done for: record the error and detach it.
    Fatal(String),
}

/// Why the host refused an injected message.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("message of {size} bytes exceeds max_message_size {max}")]
    TooLarge { size: usize, max: usize },
    #[error("{0}")]
    BadCheckpoint(String),
    #[error("inject_message is not available in this context")]
    Unsupported,
}

/// Everything needed to construct one sandboxed plugin.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub kind: PluginKind,
    pub name: String,
    /// Plugin source as configured (`filename`); the engine resolves it.
    pub source: PathBuf,
    pub limits: RuntimeLimits,
    /// Free-form settings from the plugin config file.
    pub config: toml::Table,
    /// Where to persist state on destroy, when preservation is enabled.
    pub state_path: Option<PathBuf>,
}

/// Host callbacks available to a plugin during `process_message` and
/// `timer_event`. Calls nest on the plugin's thread and complete before the
/// driving call returns.
pub trait Host {
    /// Emit a message onto the stage's queue, optionally updating the
    /// plugin's private checkpoint (input plugins only).
    fn inject_message(
        &mut self,
        msg: Message,
        checkpoint: Option<Checkpoint>,
    ) -> Result<(), InjectError>;

    /// Acknowledge delivery (output plugins only). `Some(id)` acknowledges
    /// an asynchronously delivered sequence id; `None` flushes a batch,
    /// committing everything delivered so far.
    fn update_checkpoint(&mut self, sequence_id: Option<u64>);
}

/// One hosted plugin instance. Exactly one thread drives a sandbox at a
/// time; the registry hands each instance to its worker thread.
pub trait Sandbox: Send {
    /// Run top-level plugin code. Called once before any other operation.
    fn init(&mut self) -> Result<(), SandboxError>;

    /// Drive the plugin: an input plugin polls with its private checkpoint,
    /// analysis/output plugins receive a matched message (output also gets
    /// the next sequence id).
    fn process_message(
        &mut self,
        msg: Option<&Message>,
        checkpoint: Option<&Checkpoint>,
        sequence_id: Option<u64>,
        host: &mut dyn Host,
    ) -> ProcessResult;

    /// Fire the plugin's timer callback.
    fn timer_event(&mut self, now_ns: i64, shutdown: bool, host: &mut dyn Host) -> ProcessResult;

    /// Request cooperative cancellation: the plugin must fail out of its
    /// next yield point rather than keep running.
    fn stop(&mut self) {}

    fn usage(&self) -> ResourceUsage {
        ResourceUsage::default()
    }

    /// Release resources, serializing state to `state_path` when given.
    /// Returns error text when state preservation failed.
    fn destroy(self: Box<Self>, state_path: Option<&Path>) -> Option<String> {
        let _ = state_path;
        None
    }
}

/// A factory for sandboxes; the runtime owns one engine for all plugins.
pub trait SandboxEngine: Send + Sync {
    fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>, SandboxError>;
}
