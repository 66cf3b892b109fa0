// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Input plugin runtime: one thread per plugin, polling `process_message`
//! and writing whatever the plugin injects to the input queue.

use crate::context::PipelineContext;
use crate::inject;
use crate::registry::Registry;
use crate::util;
use hs_core::{PluginConfig, PluginStats};
use hs_sandbox::host::SandboxHost;
use hs_sandbox::{Host, InjectError, ProcessResult};
use hs_storage::{Checkpoint, QueueKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Shared half of an input plugin; the worker thread owns the sandbox.
pub struct InputPlugin {
    pub name: String,
    pub stop: AtomicBool,
    pub state: Mutex<InputState>,
}

/// Guarded by the plugin's state lock (never held across sandbox calls).
#[derive(Default)]
pub struct InputState {
    /// The plugin's private checkpoint, updated on every inject.
    pub checkpoint: Option<Checkpoint>,
    pub stats: PluginStats,
    /// Messages injected since the last stats interval.
    pub im_delta: u64,
    /// Set by the checkpoint writer to request a timing sample.
    pub sample: bool,
}

pub struct InputRuntime {
    ctx: Arc<PipelineContext>,
    registry: Arc<Registry<InputPlugin>>,
    threads: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl InputRuntime {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            registry: Arc::new(Registry::new()),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> Arc<Registry<InputPlugin>> {
        self.registry.clone()
    }

    /// Spawn the worker thread for a created-and-initialized plugin.
    pub fn start_plugin(&self, host: SandboxHost, cfg: PluginConfig) {
        let name = cfg.name.clone();
        let plugin = Arc::new(InputPlugin {
            name: name.clone(),
            stop: AtomicBool::new(false),
            state: Mutex::new(InputState {
                // resume the private checkpoint recorded at last shutdown
                checkpoint: self.ctx.store.get(&name),
                ..Default::default()
            }),
        });
        let slot = self.registry.add(plugin.clone());
        util::clear_error_file(&self.ctx.cfg.output_path, &name);

        let ctx = self.ctx.clone();
        let registry = self.registry.clone();
        let handle = std::thread::spawn(move || {
            run_plugin(ctx, registry, slot, plugin, host, cfg);
        });
        self.threads.lock().push((name, handle));
    }

    /// Flip every plugin's stop flag; workers notice between polls.
    pub fn stop_all(&self) {
        for plugin in self.registry.snapshot() {
            plugin.stop.store(true, Ordering::Release);
        }
    }

    /// Bounded join of all worker threads.
    pub fn join(&self, timeout: Duration) {
        let handles = std::mem::take(&mut *self.threads.lock());
        util::join_with_timeout(handles, timeout);
    }
}

/// Host callbacks for one input worker.
struct InputHostCtx<'a> {
    ctx: &'a PipelineContext,
    plugin: &'a InputPlugin,
}

impl Host for InputHostCtx<'_> {
    fn inject_message(
        &mut self,
        msg: hs_core::Message,
        checkpoint: Option<Checkpoint>,
    ) -> Result<(), InjectError> {
        if let Some(Checkpoint::Position(_)) = &checkpoint {
            return Err(InjectError::BadCheckpoint(
                "input checkpoints must be a number or a string".into(),
            ));
        }
        if let Some(Checkpoint::Text(s)) = &checkpoint {
            if s.len() > hs_storage::MAX_TEXT_LEN {
                return Err(InjectError::BadCheckpoint(format!(
                    "string checkpoint of {} bytes exceeds {}",
                    s.len(),
                    hs_storage::MAX_TEXT_LEN
                )));
            }
        }
        let append = inject::inject_message(
            self.ctx,
            QueueKind::Input,
            &self.plugin.name,
            msg,
            false,
        )?;
        let mut state = self.plugin.state.lock();
        state.stats.im_cnt += 1;
        state.stats.im_bytes += append.frame_len as u64;
        state.im_delta += 1;
        if let Some(cp) = checkpoint {
            state.checkpoint = Some(cp);
        }
        Ok(())
    }

    fn update_checkpoint(&mut self, _sequence_id: Option<u64>) {
        // meaningful for output plugins only
    }
}

fn run_plugin(
    ctx: Arc<PipelineContext>,
    registry: Arc<Registry<InputPlugin>>,
    slot: usize,
    plugin: Arc<InputPlugin>,
    mut host: SandboxHost,
    cfg: PluginConfig,
) {
    info!(plugin = %plugin.name, "starting");
    let ticker = Duration::from_secs(cfg.ticker_interval);
    let mut fatal_error: Option<String> = None;

    loop {
        let checkpoint = plugin.state.lock().checkpoint.clone();
        let sample = {
            let mut state = plugin.state.lock();
            std::mem::take(&mut state.sample)
        };

        let started = sample.then(Instant::now);
        let result = {
            let mut host_ctx = InputHostCtx {
                ctx: &ctx,
                plugin: &plugin,
            };
            host.process(None, checkpoint.as_ref(), None, &mut host_ctx)
        };
        {
            let mut state = plugin.state.lock();
            state.stats.pm_cnt += 1;
            if let Some(t) = started {
                state.stats.pm.update(t.elapsed().as_nanos() as f64);
            }
            let usage = host.usage();
            state.stats.mem_cur = usage.mem_cur;
            state.stats.mem_max = usage.mem_max;
            state.stats.out_max = usage.out_max;
            state.stats.ins_max = usage.ins_max;
            if matches!(result, ProcessResult::Fail) {
                state.stats.pm_failures += 1;
            }
        }

        match result {
            ProcessResult::Fatal(err) => {
                fatal_error = Some(err);
                break;
            }
            ProcessResult::Fail => {
                if let Some(err) = host.last_error() {
                    warn!(plugin = %plugin.name, error = err, "process_message failed");
                }
            }
            _ => {}
        }

        if plugin.stop.load(Ordering::Acquire) {
            break;
        }
        if cfg.ticker_interval == 0 {
            // run-once plugin
            break;
        }
        if ctx.shutdown.wait_timeout(ticker) || plugin.stop.load(Ordering::Acquire) {
            break;
        }
    }

    // hold the final checkpoint so a restart resumes where we left off
    if let Some(cp) = plugin.state.lock().checkpoint.clone() {
        if let Err(e) = ctx.store.set(&plugin.name, cp) {
            warn!(plugin = %plugin.name, error = %e, "final checkpoint not recorded");
        }
    }

    let stopping = plugin.stop.load(Ordering::Acquire) || ctx.shutdown.is_set();
    if let Some(err) = host.destroy() {
        warn!(plugin = %plugin.name, error = %err, "state not preserved");
    }
    match fatal_error {
        None if stopping => {
            // leave the registry entry for the final stats pass; the
            // daemon owns teardown from here
            info!(plugin = %plugin.name, "shutting down");
        }
        None => {
            // a run-once plugin that finished its work
            info!(plugin = %plugin.name, "detaching");
            registry.clear(slot);
        }
        Some(err) => {
            info!(plugin = %plugin.name, error = %err, "detaching");
            util::write_error_file(&ctx.cfg.output_path, &plugin.name, &err);
            registry.clear(slot);
            if cfg.shutdown_terminate {
                info!(plugin = %plugin.name, "shutting down on terminate");
                ctx.shutdown.trigger();
            }
        }
    }
}

#[cfg(test)]
#[path = "input_tests.rs"]
mod tests;
