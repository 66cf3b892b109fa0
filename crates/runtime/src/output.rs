// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output plugin runtime.
//!
//! One thread per plugin, reading the input queue, the analysis queue, or
//! both (oldest message first when both are live). Delivery acknowledgement
//! comes in four flavors: synchronous (`Sent`), batched (`Batch` + flush),
//! asynchronous (`Async` + sequence-id acks through a ring buffer), and
//! retry. The committed checkpoint only ever moves forward, and async acks
//! commit the highest *contiguous* acknowledged prefix, so a crash never
//! skips an unacknowledged message.

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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shared half of an output plugin.
pub struct OutputShared {
    pub name: String,
    pub stop: AtomicBool,
    pub state: Mutex<OutputState>,
}

#[derive(Default)]
pub struct OutputState {
    pub stats: PluginStats,
    pub mm_delta: u64,
    pub pm_delta: u64,
    pub te_delta: u64,
    pub sample: bool,
    /// Acknowledged positions, per queue read. Monotone non-decreasing.
    pub committed_input: Option<QueuePosition>,
    pub committed_analysis: Option<QueuePosition>,
}

fn commit(shared: &OutputShared, input: Option<QueuePosition>, analysis: Option<QueuePosition>) {
    let mut state = shared.state.lock();
    if let Some(pos) = input {
        if newer(pos, state.committed_input) {
            state.committed_input = Some(pos);
        }
    }
    if let Some(pos) = analysis {
        if newer(pos, state.committed_analysis) {
            state.committed_analysis = Some(pos);
        }
    }
}

fn newer(pos: QueuePosition, committed: Option<QueuePosition>) -> bool {
    match committed {
        None => true,
        Some(c) => (pos.id, pos.offset) > (c.id, c.offset),
    }
}

/// Ring of in-flight positions for asynchronous acknowledgement.
///
/// `store` records the positions consumed for a sequence id before the
/// plugin sees the message; `ack` marks ids delivered and returns the
/// positions of the highest contiguous acknowledged prefix.
pub(crate) struct AsyncRing {
    slots: Vec<RingSlot>,
    /// Lowest sequence id not yet committed.
    next_commit: u64,
}

#[derive(Clone, Copy, Default)]
struct RingSlot {
    seq: u64,
    input: Option<QueuePosition>,
    analysis: Option<QueuePosition>,
    acked: bool,
    used: bool,
}

impl AsyncRing {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            slots: vec![RingSlot::default(); size.max(1)],
            next_commit: 1,
        }
    }

    pub(crate) fn store(
        &mut self,
        seq: u64,
        input: Option<QueuePosition>,
        analysis: Option<QueuePosition>,
    ) {
        let idx = (seq % self.slots.len() as u64) as usize;
        if self.slots[idx].used && !self.slots[idx].acked {
            debug!(
                seq,
                evicted = self.slots[idx].seq,
                "async ring overwrote an unacknowledged slot"
            );
        }
        self.slots[idx] = RingSlot {
            seq,
            input,
            analysis,
            acked: false,
            used: true,
        };
    }

    pub(crate) fn ack(
        &mut self,
        seq: u64,
    ) -> Option<(Option<QueuePosition>, Option<QueuePosition>)> {
        let len = self.slots.len() as u64;
        {
            let slot = &mut self.slots[(seq % len) as usize];
            if slot.used && slot.seq == seq {
                slot.acked = true;
            }
        }
        let mut latest = None;
        loop {
            let idx = (self.next_commit % len) as usize;
            let slot = &mut self.slots[idx];
            if slot.used && slot.seq == self.next_commit && slot.acked {
                latest = Some((slot.input, slot.analysis));
                slot.used = false;
                self.next_commit += 1;
            } else {
                break;
            }
        }
        latest
    }
}

struct QueueSide {
    kind: QueueKind,
    reader: QueueReader,
    pending: Option<Message>,
    /// Position just past the message most recently handed to the plugin.
    cur: QueuePosition,
}

pub struct OutputRuntime {
    ctx: Arc<PipelineContext>,
    registry: Arc<Registry<OutputShared>>,
    threads: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl OutputRuntime {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            registry: Arc::new(Registry::new()),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> Arc<Registry<OutputShared>> {
        self.registry.clone()
    }

    pub fn start_plugin(&self, host: SandboxHost, matcher: Matcher, cfg: PluginConfig) {
        let ctx = &self.ctx;
        let name = cfg.name.clone();
        util::clear_error_file(&ctx.cfg.output_path, &name);

        let side = |kind: QueueKind| -> QueueSide {
            let pos = ctx.store.lookup_reader(&ctx.cfg.output_path, kind, &name);
            QueueSide {
                kind,
                reader: QueueReader::new(
                    &ctx.cfg.output_path,
                    kind,
                    &name,
                    ctx.cfg.output_size,
                    ctx.cfg.max_message_size,
                    pos,
                ),
                pending: None,
                cur: pos,
            }
        };

        let input = if cfg.read_queue.reads_input() {
            Some(side(QueueKind::Input))
        } else {
            ctx.store.remove_reader(QueueKind::Input, &name);
            None
        };
        let analysis = if cfg.read_queue.reads_analysis() {
            Some(side(QueueKind::Analysis))
        } else {
            ctx.store.remove_reader(QueueKind::Analysis, &name);
            None
        };

        let shared = Arc::new(OutputShared {
            name: name.clone(),
            stop: AtomicBool::new(false),
            state: Mutex::new(OutputState {
                committed_input: input.as_ref().map(|s| s.cur),
                committed_analysis: analysis.as_ref().map(|s| s.cur),
                ..Default::default()
            }),
        });
        let slot = self.registry.add(shared.clone());

        let ring = (cfg.async_buffer_size > 0).then(|| AsyncRing::new(cfg.async_buffer_size));
        let ticker_expires = now_ns() + cfg.ticker_interval as i64 * 1_000_000_000;
        let worker = Worker {
            ctx: self.ctx.clone(),
            registry: self.registry.clone(),
            slot,
            shared,
            host,
            matcher,
            cfg,
            input,
            analysis,
            sequence_id: 0,
            ring,
            batching: false,
            ticker_expires,
        };
        let handle = std::thread::spawn(move || worker.run());
        self.threads.lock().push((name, handle));
    }

    pub fn stop_all(&self) {
        for plugin in self.registry.snapshot() {
            plugin.stop.store(true, Ordering::Release);
        }
    }

    pub fn join(&self, timeout: Duration) {
        let handles = std::mem::take(&mut *self.threads.lock());
        util::join_with_timeout(handles, timeout);
    }
}

/// Host callbacks for one in-flight `process`/`timer` call.
struct OutputHostCtx<'a> {
    ctx: &'a PipelineContext,
    shared: &'a OutputShared,
    ring: &'a mut Option<AsyncRing>,
    batching: &'a mut bool,
    cur_input: Option<QueuePosition>,
    cur_analysis: Option<QueuePosition>,
}

impl Host for OutputHostCtx<'_> {
    fn inject_message(
        &mut self,
        msg: Message,
        _checkpoint: Option<Checkpoint>,
    ) -> Result<(), InjectError> {
        // output plugins feed derived messages back into the input queue
        let append =
            inject::inject_message(self.ctx, QueueKind::Input, &self.shared.name, msg, true)?;
        let mut state = self.shared.state.lock();
        state.stats.im_cnt += 1;
        state.stats.im_bytes += append.frame_len as u64;
        Ok(())
    }

    fn update_checkpoint(&mut self, sequence_id: Option<u64>) {
        match sequence_id {
            Some(seq) => {
                if let Some(ring) = self.ring.as_mut() {
                    if let Some((input, analysis)) = ring.ack(seq) {
                        commit(self.shared, input, analysis);
                    }
                }
            }
            None => {
                if *self.batching {
                    commit(self.shared, self.cur_input, self.cur_analysis);
                    *self.batching = false;
                }
            }
        }
    }
}

struct Worker {
    ctx: Arc<PipelineContext>,
    registry: Arc<Registry<OutputShared>>,
    slot: usize,
    shared: Arc<OutputShared>,
    host: SandboxHost,
    matcher: Matcher,
    cfg: PluginConfig,
    input: Option<QueueSide>,
    analysis: Option<QueueSide>,
    sequence_id: u64,
    ring: Option<AsyncRing>,
    batching: bool,
    ticker_expires: i64,
}

impl Worker {
    fn run(mut self) {
        info!(plugin = %self.shared.name, "starting");
        let mut fatal: Option<String> = None;

        while !self.stopped() {
            self.fill_side(true);
            self.fill_side(false);

            let next = self.pick_next();
            match next {
                Some(from_input) => {
                    let msg = self.take_pending(from_input);
                    if let Err(err) = self.deliver(&msg) {
                        fatal = Some(err);
                        break;
                    }
                }
                None => {
                    if let Err(err) = self.fire_timer(false) {
                        fatal = Some(err);
                        break;
                    }
                    if self.ctx.shutdown.wait_timeout(Duration::from_secs(1)) {
                        break;
                    }
                    continue;
                }
            }
            if let Err(err) = self.fire_timer(false) {
                fatal = Some(err);
                break;
            }
        }

        self.finish(fatal);
    }

    fn stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire) || self.ctx.shutdown.is_set()
    }

    /// Poll one side for its next pending message.
    fn fill_side(&mut self, input_side: bool) {
        let Some(side) = (if input_side {
            self.input.as_mut()
        } else {
            self.analysis.as_mut()
        }) else {
            return;
        };
        if side.pending.is_some() {
            return;
        }
        match side.reader.poll() {
            Ok(Poll::Message(m)) => side.pending = Some(m),
            Ok(Poll::Waiting) => {}
            Ok(Poll::Stale) => {
                // the recorded position points at pruned history; restart
                // from the newest file
                let tail = side.reader.tail_position();
                warn!(plugin = %self.shared.name, queue = %side.kind, position = %tail,
                      "checkpoint was reset");
                side.reader.reset_to(tail);
                side.cur = tail;
                match side.kind {
                    QueueKind::Input => commit(&self.shared, Some(tail), None),
                    QueueKind::Analysis => commit(&self.shared, None, Some(tail)),
                }
            }
            Err(e) => {
                warn!(plugin = %self.shared.name, queue = %side.kind, error = %e, "read error");
            }
        }
    }

    /// Oldest timestamp wins when both queues have a message pending.
    fn pick_next(&self) -> Option<bool> {
        let input_ts = self
            .input
            .as_ref()
            .and_then(|s| s.pending.as_ref())
            .map(|m| m.timestamp);
        let analysis_ts = self
            .analysis
            .as_ref()
            .and_then(|s| s.pending.as_ref())
            .map(|m| m.timestamp);
        match (input_ts, analysis_ts) {
            (Some(i), Some(a)) => Some(i <= a),
            (Some(_), None) => Some(true),
            (None, Some(_)) => Some(false),
            (None, None) => None,
        }
    }

    fn take_pending(&mut self, from_input: bool) -> Message {
        let side = if from_input {
            self.input.as_mut()
        } else {
            self.analysis.as_mut()
        };
        // pick_next guaranteed the side and the message exist
        let side = match side {
            Some(s) => s,
            None => unreachable!("picked a side that is not configured"),
        };
        side.cur = side.reader.consumed_position();
        match side.pending.take() {
            Some(m) => m,
            None => unreachable!("picked a side with no pending message"),
        }
    }

    fn deliver(&mut self, msg: &Message) -> Result<(), String> {
        let sample = {
            let mut state = self.shared.state.lock();
            state.mm_delta += 1;
            std::mem::take(&mut state.sample)
        };

        let mm_started = sample.then(Instant::now);
        let matched = self.matcher.eval(msg);
        if let Some(t) = mm_started {
            self.shared.state.lock().stats.mm.update(t.elapsed().as_nanos() as f64);
        }
        if !matched {
            return Ok(());
        }

        let seq = self.sequence_id + 1;
        if let Some(ring) = self.ring.as_mut() {
            ring.store(
                seq,
                self.input.as_ref().map(|s| s.cur),
                self.analysis.as_ref().map(|s| s.cur),
            );
        }

        let mut result = self.call_process(msg, seq, sample);
        while result == ProcessResult::Retry {
            if self.stopped() {
                return Ok(());
            }
            let err = self.host.last_error().unwrap_or_default().to_owned();
            debug!(plugin = %self.shared.name, seq, error = %err, "retrying message");
            if self.ctx.shutdown.wait_timeout(Duration::from_secs(1)) {
                return Ok(());
            }
            result = self.call_process(msg, seq, false);
        }

        match result {
            ProcessResult::Sent => {
                self.sequence_id = seq;
                self.batching = false;
                self.bump_pm_delta();
                self.advance(seq);
            }
            ProcessResult::Fail => {
                let mut state = self.shared.state.lock();
                state.stats.pm_failures += 1;
                drop(state);
                if let Some(err) = self.host.last_error() {
                    if !err.is_empty() {
                        warn!(plugin = %self.shared.name, error = err, "process_message failed");
                    }
                }
                self.sequence_id = seq;
                self.bump_pm_delta();
                self.advance(seq);
            }
            ProcessResult::Batch => {
                self.sequence_id = seq;
                self.batching = true;
                self.bump_pm_delta();
            }
            ProcessResult::Async => {
                if self.ring.is_none() {
                    let err =
                        "cannot use async checkpointing without a configured buffer".to_owned();
                    self.host.terminate(&err);
                    return Err(err);
                }
                self.sequence_id = seq;
                self.bump_pm_delta();
            }
            ProcessResult::Fatal(err) => return Err(err),
            ProcessResult::Retry => {} // stopped mid-retry
        }
        Ok(())
    }

    fn bump_pm_delta(&self) {
        self.shared.state.lock().pm_delta += 1;
    }

    /// Advance the committed checkpoint for a synchronously settled message.
    fn advance(&mut self, seq: u64) {
        if let Some(ring) = self.ring.as_mut() {
            if let Some((input, analysis)) = ring.ack(seq) {
                commit(&self.shared, input, analysis);
            }
        } else {
            commit(
                &self.shared,
                self.input.as_ref().map(|s| s.cur),
                self.analysis.as_ref().map(|s| s.cur),
            );
        }
    }

    fn call_process(&mut self, msg: &Message, seq: u64, sample: bool) -> ProcessResult {
        let started = sample.then(Instant::now);
        let result = {
            let mut host_ctx = OutputHostCtx {
                ctx: &self.ctx,
                shared: &self.shared,
                ring: &mut self.ring,
                batching: &mut self.batching,
                cur_input: self.input.as_ref().map(|s| s.cur),
                cur_analysis: self.analysis.as_ref().map(|s| s.cur),
            };
            self.host.process(Some(msg), None, Some(seq), &mut host_ctx)
        };
        let mut state = self.shared.state.lock();
        state.stats.pm_cnt += 1;
        if let Some(t) = started {
            state.stats.pm.update(t.elapsed().as_nanos() as f64);
        }
        let usage = self.host.usage();
        state.stats.mem_cur = usage.mem_cur;
        state.stats.mem_max = usage.mem_max;
        state.stats.out_max = usage.out_max;
        state.stats.ins_max = usage.ins_max;
        result
    }

    fn fire_timer(&mut self, shutdown: bool) -> Result<(), String> {
        if self.cfg.ticker_interval == 0 && !shutdown {
            return Ok(());
        }
        let now = now_ns();
        if !shutdown && now < self.ticker_expires {
            return Ok(());
        }
        self.ticker_expires = now + self.cfg.ticker_interval as i64 * 1_000_000_000;
        let sample = std::mem::take(&mut self.shared.state.lock().sample);
        let started = sample.then(Instant::now);
        let result = {
            let mut host_ctx = OutputHostCtx {
                ctx: &self.ctx,
                shared: &self.shared,
                ring: &mut self.ring,
                batching: &mut self.batching,
                cur_input: self.input.as_ref().map(|s| s.cur),
                cur_analysis: self.analysis.as_ref().map(|s| s.cur),
            };
            self.host.timer(now, shutdown, &mut host_ctx)
        };
        {
            let mut state = self.shared.state.lock();
            state.te_delta += 1;
            if let Some(t) = started {
                state.stats.te.update(t.elapsed().as_nanos() as f64);
            }
        }
        match result {
            ProcessResult::Fatal(err) => Err(err),
            _ => Ok(()),
        }
    }

    fn finish(mut self, fatal: Option<String>) {
        if self.host.is_running() {
            let _ = self.fire_timer(true);
        }

        // hold the committed checkpoints for the next start
        let (committed_input, committed_analysis) = {
            let state = self.shared.state.lock();
            (state.committed_input, state.committed_analysis)
        };
        if let (Some(_), Some(pos)) = (&self.input, committed_input) {
            self.ctx
                .store
                .update_reader(QueueKind::Input, &self.shared.name, pos);
        }
        if let (Some(_), Some(pos)) = (&self.analysis, committed_analysis) {
            self.ctx
                .store
                .update_reader(QueueKind::Analysis, &self.shared.name, pos);
        }

        match fatal {
            None => {
                info!(plugin = %self.shared.name, "shutting down");
                if let Some(err) = self.host.destroy() {
                    warn!(plugin = %self.shared.name, error = %err, "state not preserved");
                }
            }
            Some(err) => {
                info!(plugin = %self.shared.name, error = %err, "detaching");
                util::write_error_file(&self.ctx.cfg.output_path, &self.shared.name, &err);
                if self.cfg.rm_cp_terminate {
                    if self.input.is_some() {
                        self.ctx
                            .store
                            .remove_reader(QueueKind::Input, &self.shared.name);
                    }
                    if self.analysis.is_some() {
                        self.ctx
                            .store
                            .remove_reader(QueueKind::Analysis, &self.shared.name);
                    }
                }
                if let Some(derr) = self.host.destroy() {
                    warn!(plugin = %self.shared.name, error = %derr, "state not preserved");
                }
                self.registry.clear(self.slot);
                if self.cfg.shutdown_terminate {
                    info!(plugin = %self.shared.name, "shutting down on terminate");
                    self.ctx.shutdown.trigger();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
