// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Analysis plugin runtime.
//!
//! A fixed pool of worker threads, each owning the plugins hashed onto it,
//! plus one reader thread that consumes the input queue in order and fans
//! every message out to all workers. The reader advances the stage's
//! checkpoint only after every worker has finished the message, so analysis
//! order within a plugin always matches input-queue order.

use crate::context::PipelineContext;
use crate::inject;
use crate::registry::Registry;
use crate::util::{self, now_ns};
use hs_core::{Message, PluginConfig, PluginStats};
use hs_matcher::Matcher;
use hs_sandbox::host::SandboxHost;
use hs_sandbox::{Host, InjectError, ProcessResult};
use hs_storage::{Checkpoint, Poll, QueueKind, QueuePosition, QueueReader};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Reader-position key for the whole analysis stage.
pub const ANALYSIS_READER: &str = "analysis";

/// Shared half of an analysis plugin, for stats collection.
pub struct AnalysisShared {
    pub name: String,
    pub stop: AtomicBool,
    pub state: Mutex<AnalysisState>,
}

#[derive(Default)]
pub struct AnalysisState {
    pub stats: PluginStats,
    pub mm_delta: u64,
    pub pm_delta: u64,
    pub sample: bool,
}

/// A plugin owned by its worker thread.
struct AnalysisPlugin {
    shared: Arc<AnalysisShared>,
    slot: usize,
    host: SandboxHost,
    matcher: Matcher,
    ticker_interval: u64,
    ticker_expires: i64,
    shutdown_terminate: bool,
}

enum WorkItem {
    Message(Arc<Message>),
    /// Idle tick driving timer events.
    Tick(i64),
    Shutdown,
}

pub struct AnalysisRuntime {
    ctx: Arc<PipelineContext>,
    threads: usize,
    registry: Arc<Registry<AnalysisShared>>,
    /// Published by the reader thread after each fan-out round.
    reader_pos: Arc<Mutex<QueuePosition>>,
    /// Plugins staged before `start` partitions them across workers.
    pending: Mutex<Vec<(usize, AnalysisPlugin)>>,
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl AnalysisRuntime {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        let threads = ctx.cfg.analysis_threads;
        Self {
            ctx,
            threads,
            registry: Arc::new(Registry::new()),
            reader_pos: Arc::new(Mutex::new(QueuePosition::default())),
            pending: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> Arc<Registry<AnalysisShared>> {
        self.registry.clone()
    }

    pub fn reader_pos(&self) -> Arc<Mutex<QueuePosition>> {
        self.reader_pos.clone()
    }

    /// Stage a plugin on its worker: the configured `thread`, or a hash of
    /// the plugin name, modulo the pool size.
    pub fn add_plugin(&self, host: SandboxHost, matcher: Matcher, cfg: &PluginConfig) {
        let worker = match cfg.thread {
            Some(t) => t as usize % self.threads,
            None => {
                let mut hasher = DefaultHasher::new();
                cfg.name.hash(&mut hasher);
                hasher.finish() as usize % self.threads
            }
        };
        let shared = Arc::new(AnalysisShared {
            name: cfg.name.clone(),
            stop: AtomicBool::new(false),
            state: Mutex::new(AnalysisState::default()),
        });
        let slot = self.registry.add(shared.clone());
        util::clear_error_file(&self.ctx.cfg.output_path, &cfg.name);
        let plugin = AnalysisPlugin {
            shared,
            slot,
            host,
            matcher,
            ticker_interval: cfg.ticker_interval,
            ticker_expires: now_ns() + cfg.ticker_interval as i64 * 1_000_000_000,
            shutdown_terminate: cfg.shutdown_terminate,
        };
        self.pending.lock().push((worker, plugin));
    }

    /// Spawn the worker pool and the reader thread.
    pub fn start(&self) {
        let mut buckets: Vec<Vec<AnalysisPlugin>> = (0..self.threads).map(|_| Vec::new()).collect();
        for (worker, plugin) in self.pending.lock().drain(..) {
            buckets[worker].push(plugin);
        }

        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let mut work_txs = Vec::with_capacity(self.threads);
        let mut handles = self.handles.lock();
        for (tid, bucket) in buckets.into_iter().enumerate() {
            let (work_tx, work_rx) = std::sync::mpsc::channel::<WorkItem>();
            work_txs.push(work_tx);
            let ctx = self.ctx.clone();
            let registry = self.registry.clone();
            let done = done_tx.clone();
            handles.push((
                format!("analysis worker {tid}"),
                std::thread::spawn(move || worker_thread(ctx, registry, tid, bucket, work_rx, done)),
            ));
        }

        let ctx = self.ctx.clone();
        let reader_pos = self.reader_pos.clone();
        handles.push((
            "analysis reader".to_owned(),
            std::thread::spawn(move || reader_thread(ctx, reader_pos, work_txs, done_rx)),
        ));
    }

    /// Flip every plugin's stop flag; workers skip stopped plugins.
    pub fn stop_all(&self) {
        for plugin in self.registry.snapshot() {
            plugin.stop.store(true, Ordering::Release);
        }
    }

    pub fn join(&self, timeout: Duration) {
        let handles = std::mem::take(&mut *self.handles.lock());
        util::join_with_timeout(handles, timeout);
    }
}

fn reader_thread(
    ctx: Arc<PipelineContext>,
    reader_pos: Arc<Mutex<QueuePosition>>,
    work_txs: Vec<Sender<WorkItem>>,
    done_rx: Receiver<()>,
) {
    let start =
        ctx.store
            .lookup_reader(&ctx.cfg.output_path, QueueKind::Input, ANALYSIS_READER);
    *reader_pos.lock() = start;
    let mut reader = QueueReader::new(
        &ctx.cfg.output_path,
        QueueKind::Input,
        ANALYSIS_READER,
        ctx.cfg.output_size,
        ctx.cfg.max_message_size,
        start,
    );
    info!(position = %start, "analysis reader starting");

    let fan_out = |item: &Arc<Message>| {
        for tx in &work_txs {
            let _ = tx.send(WorkItem::Message(item.clone()));
        }
        for _ in &work_txs {
            let _ = done_rx.recv();
        }
    };

    let mut last_tick = Instant::now();
    while !ctx.shutdown.is_set() {
        match reader.poll() {
            Ok(Poll::Message(m)) => {
                fan_out(&Arc::new(m));
                *reader_pos.lock() = reader.consumed_position();
            }
            Ok(Poll::Waiting) => {
                if last_tick.elapsed() >= Duration::from_secs(1) {
                    last_tick = Instant::now();
                    for tx in &work_txs {
                        let _ = tx.send(WorkItem::Tick(now_ns()));
                    }
                    for _ in &work_txs {
                        let _ = done_rx.recv();
                    }
                }
                if ctx.shutdown.wait_timeout(Duration::from_secs(1)) {
                    break;
                }
            }
            Ok(Poll::Stale) => {
                let head = reader.head_position();
                warn!(position = %head, "analysis reader checkpoint was reset");
                reader.reset_to(head);
                *reader_pos.lock() = head;
            }
            Err(e) => {
                warn!(error = %e, "analysis reader error");
                if ctx.shutdown.wait_timeout(Duration::from_secs(1)) {
                    break;
                }
            }
        }
    }

    ctx.store
        .update_reader(QueueKind::Input, ANALYSIS_READER, reader.consumed_position());
    for tx in &work_txs {
        let _ = tx.send(WorkItem::Shutdown);
    }
    info!("analysis reader stopped");
}

/// Host callbacks for an analysis worker: injected messages go to the
/// analysis queue stamped with the plugin's name as logger.
struct AnalysisHostCtx<'a> {
    ctx: &'a PipelineContext,
    plugin: &'a AnalysisShared,
}

impl Host for AnalysisHostCtx<'_> {
    fn inject_message(
        &mut self,
        msg: Message,
        _checkpoint: Option<Checkpoint>,
    ) -> Result<(), InjectError> {
        let append = inject::inject_message(
            self.ctx,
            QueueKind::Analysis,
            &self.plugin.name,
            msg,
            true,
        )?;
        let mut state = self.plugin.state.lock();
        state.stats.im_cnt += 1;
        state.stats.im_bytes += append.frame_len as u64;
        Ok(())
    }

    fn update_checkpoint(&mut self, _sequence_id: Option<u64>) {
        // meaningful for output plugins only
    }
}

fn worker_thread(
    ctx: Arc<PipelineContext>,
    registry: Arc<Registry<AnalysisShared>>,
    tid: usize,
    mut plugins: Vec<AnalysisPlugin>,
    work_rx: Receiver<WorkItem>,
    done_tx: Sender<()>,
) {
    info!(tid, plugins = plugins.len(), "analysis worker starting");
    for item in work_rx.iter() {
        match item {
            WorkItem::Shutdown => break,
            WorkItem::Message(msg) => {
                run_message(&ctx, &registry, &mut plugins, &msg);
                let _ = done_tx.send(());
            }
            WorkItem::Tick(now) => {
                run_tick(&ctx, &registry, &mut plugins, now);
                let _ = done_tx.send(());
            }
        }
    }

    // cooperative shutdown: final timer event, then teardown
    let now = now_ns();
    for mut plugin in plugins.drain(..) {
        if plugin.host.is_running() {
            let mut host_ctx = AnalysisHostCtx {
                ctx: &ctx,
                plugin: &plugin.shared,
            };
            if let ProcessResult::Fatal(err) = plugin.host.timer(now, true, &mut host_ctx) {
                warn!(plugin = %plugin.shared.name, error = %err, "terminated");
            }
        }
        if let Some(err) = plugin.host.destroy() {
            warn!(plugin = %plugin.shared.name, error = %err, "state not preserved");
        }
    }
    info!(tid, "analysis worker stopped");
}

fn run_message(
    ctx: &PipelineContext,
    registry: &Registry<AnalysisShared>,
    plugins: &mut Vec<AnalysisPlugin>,
    msg: &Arc<Message>,
) {
    let mut failed: Vec<usize> = Vec::new();
    for (idx, plugin) in plugins.iter_mut().enumerate() {
        if plugin.shared.stop.load(Ordering::Acquire) {
            continue;
        }
        let sample = {
            let mut state = plugin.shared.state.lock();
            state.mm_delta += 1;
            std::mem::take(&mut state.sample)
        };

        let mm_started = sample.then(Instant::now);
        let matched = plugin.matcher.eval(msg);
        let mm_elapsed = mm_started.map(|t| t.elapsed().as_nanos() as f64);

        let mut fatal: Option<String> = None;
        if matched {
            let pm_started = sample.then(Instant::now);
            let result = {
                let mut host_ctx = AnalysisHostCtx {
                    ctx,
                    plugin: &plugin.shared,
                };
                plugin.host.process(Some(msg.as_ref()), None, None, &mut host_ctx)
            };
            let mut state = plugin.shared.state.lock();
            state.stats.pm_cnt += 1;
            state.pm_delta += 1;
            if let Some(t) = pm_started {
                state.stats.pm.update(t.elapsed().as_nanos() as f64);
            }
            update_usage(&mut state.stats, &plugin.host);
            match result {
                ProcessResult::Fatal(err) => {
                    fatal = Some(err);
                }
                ProcessResult::Fail => {
                    state.stats.pm_failures += 1;
                    drop(state);
                    if let Some(err) = plugin.host.last_error() {
                        warn!(plugin = %plugin.shared.name, error = err, "process_message failed");
                    }
                }
                _ => {}
            }
        }
        if let Some(elapsed) = mm_elapsed {
            plugin.shared.state.lock().stats.mm.update(elapsed);
        }
        if let Some(err) = fatal {
            warn!(plugin = %plugin.shared.name, error = %err, "terminated");
            util::write_error_file(&ctx.cfg.output_path, &plugin.shared.name, &err);
            failed.push(idx);
        }
    }
    detach_failed(ctx, registry, plugins, failed);
}

fn run_tick(
    ctx: &PipelineContext,
    registry: &Registry<AnalysisShared>,
    plugins: &mut Vec<AnalysisPlugin>,
    now: i64,
) {
    let mut failed: Vec<usize> = Vec::new();
    for (idx, plugin) in plugins.iter_mut().enumerate() {
        if plugin.shared.stop.load(Ordering::Acquire) {
            continue;
        }
        if plugin.ticker_interval == 0 || now < plugin.ticker_expires {
            continue;
        }
        plugin.ticker_expires = now + plugin.ticker_interval as i64 * 1_000_000_000;
        let sample = std::mem::take(&mut plugin.shared.state.lock().sample);
        let started = sample.then(Instant::now);
        let result = {
            let mut host_ctx = AnalysisHostCtx {
                ctx,
                plugin: &plugin.shared,
            };
            plugin.host.timer(now, false, &mut host_ctx)
        };
        {
            let mut state = plugin.shared.state.lock();
            if let Some(t) = started {
                state.stats.te.update(t.elapsed().as_nanos() as f64);
            }
            update_usage(&mut state.stats, &plugin.host);
        }
        if let ProcessResult::Fatal(err) = result {
            warn!(plugin = %plugin.shared.name, error = %err, "terminated");
            util::write_error_file(&ctx.cfg.output_path, &plugin.shared.name, &err);
            failed.push(idx);
        }
    }
    detach_failed(ctx, registry, plugins, failed);
}

fn update_usage(stats: &mut PluginStats, host: &SandboxHost) {
    let usage = host.usage();
    stats.mem_cur = usage.mem_cur;
    stats.mem_max = usage.mem_max;
    stats.out_max = usage.out_max;
    stats.ins_max = usage.ins_max;
}

/// Remove fatally failed plugins from this worker's list and the registry.
fn detach_failed(
    ctx: &PipelineContext,
    registry: &Registry<AnalysisShared>,
    plugins: &mut Vec<AnalysisPlugin>,
    failed: Vec<usize>,
) {
    for idx in failed.into_iter().rev() {
        let mut plugin = plugins.remove(idx);
        registry.clear(plugin.slot);
        if let Some(err) = plugin.host.destroy() {
            warn!(plugin = %plugin.shared.name, error = %err, "state not preserved");
        }
        if plugin.shutdown_terminate {
            info!(plugin = %plugin.shared.name, "shutting down on terminate");
            ctx.shutdown.trigger();
        }
    }
}

#[cfg(test)]
#[path = "analysis_tests.rs"]
mod tests;
