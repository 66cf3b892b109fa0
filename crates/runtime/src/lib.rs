// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The Hindsight pipeline runtime: plugin registries, the input, analysis,
//! and output stage runtimes, the checkpoint/stats writer, backpressure,
//! and the shared shutdown signal.
//!
//! Each worker thread is its own failure domain: a plugin that terminates
//! is detached without disturbing its neighbors, while failures of shared
//! infrastructure (queue writers, the checkpoint store) take the process
//! down to protect durability.

mod analysis;
mod backpressure;
mod checkpoint_writer;
mod context;
mod inject;
mod input;
mod output;
mod registry;
mod shutdown;
#[cfg(test)]
mod test_helpers;
mod util;

use hs_core::ConfigError;
use hs_matcher::MatcherError;
use hs_sandbox::SandboxError;
use hs_storage::{CheckpointError, QueueError};
use std::path::PathBuf;
use thiserror::Error;

pub use analysis::{AnalysisRuntime, AnalysisShared, ANALYSIS_READER};
pub use backpressure::Backpressure;
pub use checkpoint_writer::CheckpointWriter;
pub use context::PipelineContext;
pub use input::{InputPlugin, InputRuntime, InputState};
pub use output::{OutputRuntime, OutputShared, OutputState};
pub use registry::Registry;
pub use shutdown::Shutdown;
pub use util::{now_ns, write_error_file};

/// Construction-time runtime failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Matcher(#[from] MatcherError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
