// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Once-per-second checkpoint consolidation and periodic stats files.
//!
//! Each pass pulls every plugin's checkpoint into the store, snapshots both
//! queue writers, computes the per-queue minimum reader id, publishes it as
//! the prune watermark, and rewrites `hindsight.cp` atomically. Every sixth
//! pass additionally writes `plugins.tsv` and `utilization.tsv`; stats file
//! failures are non-fatal (the interval deltas are simply lost), checkpoint
//! file failures are fatal.

use crate::analysis::{AnalysisShared, ANALYSIS_READER};
use crate::context::PipelineContext;
use crate::input::InputPlugin;
use crate::output::OutputShared;
use crate::registry::Registry;
use crate::util;
use hs_core::PluginStats;
use hs_storage::{QueueKind, QueuePosition};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Stats are sampled and written every N passes (10 times a minute).
const SAMPLE_PASSES: u64 = 6;

/// Stats interval in nanoseconds, for the utilization percentages.
const INTERVAL_NS: u64 = SAMPLE_PASSES * 1_000_000_000;

pub struct CheckpointWriter {
    ctx: Arc<PipelineContext>,
    inputs: Arc<Registry<InputPlugin>>,
    analysis: Arc<Registry<AnalysisShared>>,
    analysis_reader: Arc<Mutex<QueuePosition>>,
    outputs: Arc<Registry<OutputShared>>,
}

struct StatsRow {
    name: String,
    stats: PluginStats,
    /// Messages handled since the last stats pass.
    msgs: u64,
    mm_delta: u64,
    pm_delta: u64,
    te_delta: u64,
}

impl CheckpointWriter {
    pub fn new(
        ctx: Arc<PipelineContext>,
        inputs: Arc<Registry<InputPlugin>>,
        analysis: Arc<Registry<AnalysisShared>>,
        analysis_reader: Arc<Mutex<QueuePosition>>,
        outputs: Arc<Registry<OutputShared>>,
    ) -> Self {
        Self {
            ctx,
            inputs,
            analysis,
            analysis_reader,
            outputs,
        }
    }

    /// Run until shutdown; call [`flush`](Self::flush) once more after the
    /// workers have stopped.
    pub fn run(&self) {
        let mut pass = 0u64;
        loop {
            pass += 1;
            self.pass(pass % SAMPLE_PASSES == 0);
            if self.ctx.shutdown.wait_timeout(Duration::from_secs(1)) {
                return;
            }
        }
    }

    /// One final consolidation after the workers have written their
    /// terminal checkpoints.
    pub fn flush(&self) {
        self.pass(false);
    }

    fn pass(&self, sample: bool) {
        let store = &self.ctx.store;
        let mut rows: Vec<StatsRow> = Vec::new();

        // input plugins: private checkpoints + stats
        for plugin in self.inputs.snapshot() {
            let mut state = plugin.state.lock();
            if let Some(cp) = state.checkpoint.clone() {
                if let Err(e) = store.set(&plugin.name, cp) {
                    warn!(plugin = %plugin.name, error = %e, "checkpoint not recorded");
                }
            }
            if sample {
                state.sample = true;
                rows.push(StatsRow {
                    name: plugin.name.clone(),
                    stats: state.stats.clone(),
                    msgs: state.im_delta,
                    mm_delta: 0,
                    pm_delta: 0,
                    te_delta: 0,
                });
                state.im_delta = 0;
            }
        }
        store.update_writer(QueueKind::Input, self.ctx.input_queue.position());

        // the analysis stage's single reader position
        let analysis_pos = *self.analysis_reader.lock();
        store.update_reader(QueueKind::Input, ANALYSIS_READER, analysis_pos);
        let mut min_input_id = analysis_pos.id;

        for plugin in self.analysis.snapshot() {
            let mut state = plugin.state.lock();
            if sample {
                state.sample = true;
                rows.push(StatsRow {
                    name: plugin.name.clone(),
                    stats: state.stats.clone(),
                    msgs: state.mm_delta,
                    mm_delta: state.mm_delta,
                    pm_delta: state.pm_delta,
                    te_delta: 0,
                });
                state.mm_delta = 0;
                state.pm_delta = 0;
            }
        }
        store.update_writer(QueueKind::Analysis, self.ctx.analysis_queue.position());
        let mut min_analysis_id = self.ctx.analysis_queue.position().id;

        // output plugins: committed reader positions + stats
        for plugin in self.outputs.snapshot() {
            let mut state = plugin.state.lock();
            if let Some(pos) = state.committed_input {
                store.update_reader(QueueKind::Input, &plugin.name, pos);
                min_input_id = min_input_id.min(pos.id);
            }
            if let Some(pos) = state.committed_analysis {
                store.update_reader(QueueKind::Analysis, &plugin.name, pos);
                min_analysis_id = min_analysis_id.min(pos.id);
            }
            if sample {
                state.sample = true;
                rows.push(StatsRow {
                    name: plugin.name.clone(),
                    stats: state.stats.clone(),
                    msgs: state.mm_delta,
                    mm_delta: state.mm_delta,
                    pm_delta: state.pm_delta,
                    te_delta: state.te_delta,
                });
                state.mm_delta = 0;
                state.pm_delta = 0;
                state.te_delta = 0;
            }
        }

        // publish the prune watermarks
        self.ctx.input_queue.set_min_reader_id(min_input_id);
        self.ctx.analysis_queue.set_min_reader_id(min_analysis_id);

        if sample {
            if let Err(e) = write_stats_files(&self.ctx.cfg.output_path, &rows) {
                warn!(error = %e, "stats files not written");
            }
        }

        if let Err(e) = store.write() {
            util::fatal("checkpoint write", &e);
        }
    }
}

/// Banker's rounding of `n / d` to a whole percentage.
fn round_percentage(n: u64, d: u64) -> u64 {
    if d == 0 {
        return 0;
    }
    let p = n * 1000 / d;
    let r = p % 10;
    let p = p / 10;
    if r > 5 || (r == 5 && p % 2 == 1) {
        p + 1
    } else {
        p
    }
}

fn write_stats_files(output_path: &Path, rows: &[StatsRow]) -> std::io::Result<()> {
    let mut plugins = String::from(
        "Plugin\tInject Message Count\tInject Message Bytes\t\
         Process Message Count\tProcess Message Failures\t\
         Current Memory\tMax Memory\tMax Output\tMax Instructions\t\
         Message Matcher Avg (ns)\tMessage Matcher SD (ns)\t\
         Process Message Avg (ns)\tProcess Message SD (ns)\t\
         Timer Event Avg (ns)\tTimer Event SD (ns)\n",
    );
    let mut utilization =
        String::from("Plugin\tMessages\t% Utilization\t% Matcher\t% Process\t% Timer\n");

    for row in rows {
        let s = &row.stats;
        plugins.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.0}\t{:.0}\t{:.0}\t{:.0}\t{:.0}\t{:.0}\n",
            row.name,
            s.im_cnt,
            s.im_bytes,
            s.pm_cnt,
            s.pm_failures,
            s.mem_cur,
            s.mem_max,
            s.out_max,
            s.ins_max,
            s.mm.mean(),
            s.mm.sd(),
            s.pm.mean(),
            s.pm.sd(),
            s.te.mean(),
            s.te.sd(),
        ));

        let mm_ns = (s.mm.mean() * row.mm_delta as f64) as u64;
        let pm_ns = (s.pm.mean() * row.pm_delta as f64) as u64;
        let te_ns = (s.te.mean() * row.te_delta as f64) as u64;
        utilization.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            row.name,
            row.msgs,
            round_percentage(mm_ns + pm_ns + te_ns, INTERVAL_NS),
            round_percentage(mm_ns, INTERVAL_NS),
            round_percentage(pm_ns, INTERVAL_NS),
            round_percentage(te_ns, INTERVAL_NS),
        ));
    }

    write_atomic(&output_path.join("plugins.tsv"), &plugins)?;
    write_atomic(&output_path.join("utilization.tsv"), &utilization)
}

fn write_atomic(path: &Path, text: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tsv.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
#[path = "checkpoint_writer_tests.rs"]
mod tests;
