// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon and plugin configuration.
//!
//! The main config is a single TOML file named on the command line; plugin
//! configs are TOML files under `{run_path}/{input|analysis|output}/`.
//! Loading is deliberately thin: deserialize, apply per-type defaults,
//! validate, hand back a struct.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Which stage a plugin runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Input,
    Analysis,
    Output,
}

impl PluginKind {
    /// Subdirectory of `run_path` holding this kind's plugin configs.
    pub fn dir(&self) -> &'static str {
        match self {
            PluginKind::Input => "input",
            PluginKind::Analysis => "analysis",
            PluginKind::Output => "output",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir())
    }
}

/// Which queue(s) an output plugin consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadQueue {
    Input,
    #[default]
    Both,
    Analysis,
}

impl ReadQueue {
    pub fn reads_input(&self) -> bool {
        matches!(self, ReadQueue::Input | ReadQueue::Both)
    }

    pub fn reads_analysis(&self) -> bool {
        matches!(self, ReadQueue::Analysis | ReadQueue::Both)
    }
}

/// Per-type default resource settings, overridable per plugin.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PluginDefaults {
    pub memory_limit: u64,
    pub instruction_limit: u64,
    pub output_limit: u64,
    /// Seconds between timer events; zero disables the ticker.
    pub ticker_interval: u64,
    pub preserve_data: bool,
}

impl Default for PluginDefaults {
    fn default() -> Self {
        Self {
            memory_limit: 8 * 1024 * 1024,
            instruction_limit: 1_000_000,
            output_limit: 64 * 1024,
            ticker_interval: 0,
            preserve_data: false,
        }
    }
}

/// The daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Queue, checkpoint, and stats file root.
    pub output_path: PathBuf,
    /// Queue file roll threshold in bytes.
    #[serde(default = "default_output_size")]
    pub output_size: u64,
    /// Plugin config root.
    pub run_path: PathBuf,
    /// Staging directory scanned by the (out of scope) load watcher.
    #[serde(default)]
    pub load_path: Option<PathBuf>,
    #[serde(default = "default_analysis_threads")]
    pub analysis_threads: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Queue-file gap between writer and slowest reader before producers
    /// are throttled; zero disables.
    #[serde(default)]
    pub backpressure: u64,
    /// Free-disk threshold in output_size blocks; zero disables.
    #[serde(default)]
    pub backpressure_df: u64,
    #[serde(default)]
    pub input_defaults: PluginDefaults,
    #[serde(default)]
    pub analysis_defaults: PluginDefaults,
    #[serde(default)]
    pub output_defaults: PluginDefaults,
}

fn default_output_size() -> u64 {
    64 * 1024 * 1024
}

fn default_analysis_threads() -> usize {
    1
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let cfg: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source: Box::new(source),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.output_size == 0 {
            return Err(ConfigError::Invalid("output_size must be non-zero".into()));
        }
        if self.analysis_threads == 0 {
            return Err(ConfigError::Invalid(
                "analysis_threads must be at least 1".into(),
            ));
        }
        if self.max_message_size < 1024 {
            return Err(ConfigError::Invalid(
                "max_message_size must be at least 1024".into(),
            ));
        }
        Ok(())
    }

    pub fn defaults_for(&self, kind: PluginKind) -> &PluginDefaults {
        match kind {
            PluginKind::Input => &self.input_defaults,
            PluginKind::Analysis => &self.analysis_defaults,
            PluginKind::Output => &self.output_defaults,
        }
    }
}

/// Raw per-plugin file; unset limits fall back to the type defaults.
#[derive(Debug, Deserialize)]
struct RawPluginConfig {
    filename: String,
    #[serde(default)]
    message_matcher: Option<String>,
    #[serde(default)]
    memory_limit: Option<u64>,
    #[serde(default)]
    instruction_limit: Option<u64>,
    #[serde(default)]
    output_limit: Option<u64>,
    #[serde(default)]
    ticker_interval: Option<u64>,
    #[serde(default)]
    preserve_data: Option<bool>,
    #[serde(default)]
    thread: Option<u32>,
    #[serde(default)]
    async_buffer_size: Option<usize>,
    #[serde(default)]
    read_queue: Option<ReadQueue>,
    #[serde(default)]
    rm_cp_terminate: bool,
    #[serde(default)]
    shutdown_terminate: bool,
    /// Free-form settings handed to the sandbox.
    #[serde(flatten)]
    config: toml::Table,
}

/// A fully resolved plugin configuration.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// `{kind}.{file stem}`, e.g. `input.heartbeat`.
    pub name: String,
    pub kind: PluginKind,
    pub filename: String,
    pub message_matcher: Option<String>,
    pub memory_limit: u64,
    pub instruction_limit: u64,
    pub output_limit: u64,
    pub ticker_interval: u64,
    pub preserve_data: bool,
    /// Analysis worker pinning; hashed from the name when unset.
    pub thread: Option<u32>,
    /// Async checkpoint ring size; zero means async acks are not allowed.
    pub async_buffer_size: usize,
    pub read_queue: ReadQueue,
    /// Drop the plugin's reader checkpoints when it terminates.
    pub rm_cp_terminate: bool,
    /// Bring the whole daemon down when this plugin terminates.
    pub shutdown_terminate: bool,
    pub config: toml::Table,
}

impl PluginConfig {
    pub fn load(
        path: &Path,
        kind: PluginKind,
        defaults: &PluginDefaults,
    ) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let raw: RawPluginConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source: Box::new(source),
        })?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::Invalid(format!("bad plugin filename: {path:?}")))?;

        let cfg = Self {
            name: format!("{}.{}", kind.dir(), stem),
            kind,
            filename: raw.filename,
            message_matcher: raw.message_matcher,
            memory_limit: raw.memory_limit.unwrap_or(defaults.memory_limit),
            instruction_limit: raw.instruction_limit.unwrap_or(defaults.instruction_limit),
            output_limit: raw.output_limit.unwrap_or(defaults.output_limit),
            ticker_interval: raw.ticker_interval.unwrap_or(defaults.ticker_interval),
            preserve_data: raw.preserve_data.unwrap_or(defaults.preserve_data),
            thread: raw.thread,
            async_buffer_size: raw.async_buffer_size.unwrap_or(0),
            read_queue: raw.read_queue.unwrap_or_default(),
            rm_cp_terminate: raw.rm_cp_terminate,
            shutdown_terminate: raw.shutdown_terminate,
            config: raw.config,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.filename.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{}: filename must be set",
                self.name
            )));
        }
        match self.kind {
            PluginKind::Input => {
                if self.message_matcher.is_some() {
                    return Err(ConfigError::Invalid(format!(
                        "{}: input plugins take no message_matcher",
                        self.name
                    )));
                }
            }
            PluginKind::Analysis | PluginKind::Output => {
                if self.message_matcher.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "{}: message_matcher must be set",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Load every plugin config of `kind` under `run_path`.
///
/// A file that fails to load is reported in the error list but does not
/// stop the rest from loading.
pub fn load_plugin_configs(
    run_path: &Path,
    kind: PluginKind,
    defaults: &PluginDefaults,
) -> (Vec<PluginConfig>, Vec<ConfigError>) {
    let dir = run_path.join(kind.dir());
    let mut loaded = Vec::new();
    let mut failed = Vec::new();
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(source) => {
            failed.push(ConfigError::Io { path: dir, source });
            return (loaded, failed);
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        match PluginConfig::load(&path, kind, defaults) {
            Ok(cfg) => loaded.push(cfg),
            Err(e) => failed.push(e),
        }
    }
    loaded.sort_by(|a, b| a.name.cmp(&b.name));
    (loaded, failed)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
