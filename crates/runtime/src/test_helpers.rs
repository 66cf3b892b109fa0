// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for the runtime tests.

use crate::context::PipelineContext;
use hs_core::{Config, PluginConfig, PluginDefaults, PluginKind, ReadQueue};
use hs_sandbox::host::SandboxHost;
use hs_sandbox::testing::FakeSandbox;
use hs_sandbox::{NativeEngine, RuntimeLimits, Sandbox, SandboxError, SandboxSpec};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn test_config(root: &Path) -> Config {
    Config {
        output_path: root.join("output"),
        output_size: 1024,
        run_path: root.join("run"),
        load_path: None,
        analysis_threads: 2,
        max_message_size: 64 * 1024,
        hostname: "testhost".into(),
        backpressure: 0,
        backpressure_df: 0,
        input_defaults: PluginDefaults::default(),
        analysis_defaults: PluginDefaults::default(),
        output_defaults: PluginDefaults::default(),
    }
}

pub fn test_context(root: &Path) -> Arc<PipelineContext> {
    PipelineContext::new(test_config(root)).unwrap()
}

pub fn plugin_cfg(kind: PluginKind, stem: &str) -> PluginConfig {
    PluginConfig {
        name: format!("{}.{}", kind.dir(), stem),
        kind,
        filename: "fake".into(),
        message_matcher: None,
        memory_limit: 0,
        instruction_limit: 0,
        output_limit: 0,
        ticker_interval: 0,
        preserve_data: false,
        thread: None,
        async_buffer_size: 0,
        read_queue: ReadQueue::Both,
        rm_cp_terminate: false,
        shutdown_terminate: false,
        config: toml::Table::new(),
    }
}

/// Wrap a scripted sandbox in an initialized host.
pub fn host_for(kind: PluginKind, name: &str, sandbox: FakeSandbox) -> SandboxHost {
    let cell = std::sync::Mutex::new(Some(sandbox));
    let mut engine = NativeEngine::new();
    engine.register("fake", move |_| {
        cell.lock()
            .ok()
            .and_then(|mut c| c.take())
            .map(|s| Box::new(s) as Box<dyn Sandbox>)
            .ok_or_else(|| SandboxError::Create("factory exhausted".into()))
    });
    let spec = SandboxSpec {
        kind,
        name: name.to_owned(),
        source: "fake".into(),
        limits: RuntimeLimits {
            memory_bytes: 0,
            instructions: 0,
            output_bytes: 0,
            max_message_size: 64 * 1024,
        },
        config: toml::Table::new(),
        state_path: None,
    };
    let mut host = SandboxHost::create(&engine, spec).unwrap();
    host.init().unwrap();
    host
}

/// Spin until `cond` holds or the timeout elapses; panics on timeout.
pub fn wait_until(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}
