// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon assembly: build the pipeline context, load every plugin config,
//! construct matchers and sandboxes, and run the stage runtimes plus the
//! checkpoint writer.
//!
//! A plugin that fails to load (bad matcher, unknown source, init error)
//! is logged and skipped; the rest of the system starts normally.

use hs_core::{load_plugin_configs, Config, PluginConfig, PluginKind};
use hs_matcher::Matcher;
use hs_runtime::{
    write_error_file, AnalysisRuntime, CheckpointWriter, InputRuntime, OutputRuntime,
    PipelineContext, RuntimeError, Shutdown,
};
use hs_sandbox::host::SandboxHost;
use hs_sandbox::{RuntimeLimits, SandboxEngine, SandboxSpec};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

/// How long workers get to stop before their threads are abandoned.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Daemon {
    ctx: Arc<PipelineContext>,
    inputs: InputRuntime,
    analysis: AnalysisRuntime,
    outputs: OutputRuntime,
    cp_writer: Arc<CheckpointWriter>,
    cp_thread: Option<JoinHandle<()>>,
}

impl Daemon {
    /// Bring the whole pipeline up.
    pub fn start(cfg: Config, engine: Arc<dyn SandboxEngine>) -> Result<Self, RuntimeError> {
        for kind in [PluginKind::Input, PluginKind::Analysis, PluginKind::Output] {
            let dir = cfg.run_path.join(kind.dir());
            std::fs::create_dir_all(&dir)
                .map_err(|source| RuntimeError::Io { path: dir, source })?;
        }
        let ctx = PipelineContext::new(cfg)?;

        let inputs = InputRuntime::new(ctx.clone());
        let analysis = AnalysisRuntime::new(ctx.clone());
        let outputs = OutputRuntime::new(ctx.clone());

        for pcfg in scan_configs(&ctx, PluginKind::Input) {
            if let Some(host) = build_host(&ctx, engine.as_ref(), &pcfg) {
                inputs.start_plugin(host, pcfg);
            }
        }
        for pcfg in scan_configs(&ctx, PluginKind::Analysis) {
            let Some(matcher) = build_matcher(&ctx, &pcfg) else {
                continue;
            };
            if let Some(host) = build_host(&ctx, engine.as_ref(), &pcfg) {
                analysis.add_plugin(host, matcher, &pcfg);
            }
        }
        analysis.start();
        for pcfg in scan_configs(&ctx, PluginKind::Output) {
            let Some(matcher) = build_matcher(&ctx, &pcfg) else {
                continue;
            };
            if let Some(host) = build_host(&ctx, engine.as_ref(), &pcfg) {
                outputs.start_plugin(host, matcher, pcfg);
            }
        }

        let cp_writer = Arc::new(CheckpointWriter::new(
            ctx.clone(),
            inputs.registry(),
            analysis.registry(),
            analysis.reader_pos(),
            outputs.registry(),
        ));
        let cp_thread = {
            let cp_writer = cp_writer.clone();
            Some(std::thread::spawn(move || cp_writer.run()))
        };

        info!(
            inputs = inputs.registry().len(),
            analysis = analysis.registry().len(),
            outputs = outputs.registry().len(),
            "pipeline started"
        );
        Ok(Self {
            ctx,
            inputs,
            analysis,
            outputs,
            cp_writer,
            cp_thread,
        })
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.ctx.shutdown.clone()
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Orderly stop: flip every stop flag, bounded-join the workers, then
    /// write the final checkpoint.
    pub fn shutdown(&mut self) {
        info!("shutting down");
        self.ctx.shutdown.trigger();
        self.inputs.stop_all();
        self.analysis.stop_all();
        self.outputs.stop_all();

        self.inputs.join(JOIN_TIMEOUT);
        self.analysis.join(JOIN_TIMEOUT);
        self.outputs.join(JOIN_TIMEOUT);

        if let Some(handle) = self.cp_thread.take() {
            let _ = handle.join();
        }
        self.cp_writer.flush();
        info!("shutdown complete");
    }
}

fn scan_configs(ctx: &PipelineContext, kind: PluginKind) -> Vec<PluginConfig> {
    let (loaded, failed) =
        load_plugin_configs(&ctx.cfg.run_path, kind, ctx.cfg.defaults_for(kind));
    for e in failed {
        error!(error = %e, "plugin config rejected");
    }
    loaded
}

fn build_matcher(ctx: &PipelineContext, pcfg: &PluginConfig) -> Option<Matcher> {
    let source = pcfg.message_matcher.as_deref().unwrap_or_default();
    match Matcher::new(source) {
        Ok(m) => Some(m),
        Err(e) => {
            error!(plugin = %pcfg.name, matcher = source, error = %e, "invalid message_matcher");
            write_error_file(&ctx.cfg.output_path, &pcfg.name, &e.to_string());
            None
        }
    }
}

fn build_host(
    ctx: &PipelineContext,
    engine: &dyn SandboxEngine,
    pcfg: &PluginConfig,
) -> Option<SandboxHost> {
    let state_path = pcfg
        .preserve_data
        .then(|| ctx.cfg.output_path.join(format!("{}.data", pcfg.name)));
    let spec = SandboxSpec {
        kind: pcfg.kind,
        name: pcfg.name.clone(),
        source: PathBuf::from(&pcfg.filename),
        limits: RuntimeLimits {
            memory_bytes: pcfg.memory_limit,
            instructions: pcfg.instruction_limit,
            output_bytes: pcfg.output_limit,
            max_message_size: ctx.cfg.max_message_size,
        },
        config: pcfg.config.clone(),
        state_path,
    };
    let mut host = match SandboxHost::create(engine, spec) {
        Ok(h) => h,
        Err(e) => {
            error!(plugin = %pcfg.name, error = %e, "plugin not started");
            write_error_file(&ctx.cfg.output_path, &pcfg.name, &e.to_string());
            return None;
        }
    };
    if let Err(e) = host.init() {
        error!(plugin = %pcfg.name, error = %e, "plugin init failed");
        write_error_file(&ctx.cfg.output_path, &pcfg.name, &e.to_string());
        return None;
    }
    Some(host)
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;
