// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Core types for the Hindsight pipeline: the message record, the on-disk
//! frame codec, running statistics, and configuration.

pub mod codec;
pub mod config;
mod message;
mod stats;

pub use config::{
    load_plugin_configs, Config, ConfigError, PluginConfig, PluginDefaults, PluginKind, ReadQueue,
};
pub use message::{Field, FieldRef, FieldValue, Message, DEFAULT_SEVERITY, UUID_SIZE};
pub use stats::{PluginStats, RunningStats};
