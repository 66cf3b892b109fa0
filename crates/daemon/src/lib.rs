// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Hindsight daemon (hindsightd)
//!
//! Hosts the three-stage plugin pipeline: input plugins fill the input
//! queue, the analysis pool consumes it and fills the analysis queue, and
//! output plugins drain both into external sinks, all with checkpointed
//! at-least-once resumption.

pub mod bootstrap;
pub mod builtins;

pub use bootstrap::Daemon;
pub use builtins::register_builtins;
