// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{host_for, plugin_cfg, test_context, wait_until};
use hs_core::{codec, Message, PluginKind};
use hs_matcher::Matcher;
use hs_sandbox::testing::FakeSandbox;
use hs_sandbox::ProcessResult;
use hs_storage::{Poll, QueueKind, QueuePosition, QueueReader};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn enqueue(ctx: &PipelineContext, msg_type: &str, severity: i32, ts: i64) {
    let mut m = Message::new([ts as u8; 16], ts);
    m.msg_type = Some(msg_type.into());
    m.severity = severity;
    ctx.input_queue.append(&codec::encode_message(&m)).unwrap();
}

fn counting_sandbox(counter: Arc<AtomicU64>) -> FakeSandbox {
    FakeSandbox::new().on_process(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        ProcessResult::Sent
    })
}

#[test]
fn matcher_selects_messages() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    for (t, s, ts) in [("T", 3, 1), ("T", 7, 2), ("U", 3, 3), ("T", 4, 4)] {
        enqueue(&ctx, t, s, ts);
    }

    let runtime = AnalysisRuntime::new(ctx.clone());
    let hits = Arc::new(AtomicU64::new(0));
    let cfg = plugin_cfg(PluginKind::Analysis, "selective");
    let host = host_for(PluginKind::Analysis, &cfg.name, counting_sandbox(hits.clone()));
    let matcher = Matcher::new("Severity < 5 && Type == 'T'").unwrap();
    runtime.add_plugin(host, matcher, &cfg);
    runtime.start();

    wait_until("both matches", Duration::from_secs(5), || {
        hits.load(Ordering::SeqCst) == 2
    });
    // give the non-matching messages a chance to (wrongly) arrive
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    ctx.shutdown.trigger();
    runtime.join(Duration::from_secs(5));
}

#[test]
fn injected_messages_reach_the_analysis_queue() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    enqueue(&ctx, "T", 3, 1);

    let runtime = AnalysisRuntime::new(ctx.clone());
    let sandbox = FakeSandbox::new().on_process(|args, host| {
        let mut derived = Message::default();
        derived.payload = args.msg.and_then(|m| m.msg_type.clone());
        host.inject_message(derived, None).unwrap();
        ProcessResult::Sent
    });
    let cfg = plugin_cfg(PluginKind::Analysis, "derive");
    let host = host_for(PluginKind::Analysis, &cfg.name, sandbox);
    runtime.add_plugin(host, Matcher::new("TRUE").unwrap(), &cfg);
    runtime.start();

    let mut reader = QueueReader::new(
        &ctx.cfg.output_path,
        QueueKind::Analysis,
        "test",
        ctx.cfg.output_size,
        ctx.cfg.max_message_size,
        QueuePosition::default(),
    );
    let mut derived = None;
    wait_until("derived message", Duration::from_secs(5), || {
        if let Ok(Poll::Message(m)) = reader.poll() {
            derived = Some(m);
        }
        derived.is_some()
    });
    let m = derived.unwrap();
    assert_eq!(m.payload.as_deref(), Some("T"));
    // the host stamps the producing plugin as logger
    assert_eq!(m.logger.as_deref(), Some("analysis.derive"));

    ctx.shutdown.trigger();
    runtime.join(Duration::from_secs(5));
}

#[test]
fn fatal_plugin_is_isolated_from_its_neighbor() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());

    let runtime = AnalysisRuntime::new(ctx.clone());

    // both plugins pinned to the same worker thread
    let survivor_hits = Arc::new(AtomicU64::new(0));
    let mut survivor_cfg = plugin_cfg(PluginKind::Analysis, "survivor");
    survivor_cfg.thread = Some(0);
    let survivor = host_for(
        PluginKind::Analysis,
        &survivor_cfg.name,
        counting_sandbox(survivor_hits.clone()),
    );
    runtime.add_plugin(survivor, Matcher::new("TRUE").unwrap(), &survivor_cfg);

    let mut bomb_cfg = plugin_cfg(PluginKind::Analysis, "bomb");
    bomb_cfg.thread = Some(0);
    let bomb = host_for(
        PluginKind::Analysis,
        &bomb_cfg.name,
        FakeSandbox::new().on_process(|_, _| ProcessResult::Fatal("bad message".into())),
    );
    runtime.add_plugin(bomb, Matcher::new("TRUE").unwrap(), &bomb_cfg);

    runtime.start();
    assert_eq!(runtime.registry().len(), 2);

    enqueue(&ctx, "T", 1, 1);
    enqueue(&ctx, "T", 1, 2);
    enqueue(&ctx, "T", 1, 3);

    wait_until("survivor sees them all", Duration::from_secs(5), || {
        survivor_hits.load(Ordering::SeqCst) == 3
    });
    // the failed plugin detached after its first message
    assert_eq!(runtime.registry().len(), 1);
    let err = std::fs::read_to_string(ctx.cfg.output_path.join("analysis.bomb.err")).unwrap();
    assert_eq!(err, "bad message");
    assert!(!ctx.shutdown.is_set());

    ctx.shutdown.trigger();
    runtime.join(Duration::from_secs(5));
}

#[test]
fn reader_checkpoint_advances_after_fan_out() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    enqueue(&ctx, "T", 1, 1);
    enqueue(&ctx, "T", 1, 2);

    let runtime = AnalysisRuntime::new(ctx.clone());
    let hits = Arc::new(AtomicU64::new(0));
    let cfg = plugin_cfg(PluginKind::Analysis, "count");
    let host = host_for(PluginKind::Analysis, &cfg.name, counting_sandbox(hits.clone()));
    runtime.add_plugin(host, Matcher::new("TRUE").unwrap(), &cfg);
    let reader_pos = runtime.reader_pos();
    runtime.start();

    wait_until("messages consumed", Duration::from_secs(5), || {
        hits.load(Ordering::SeqCst) == 2
    });
    wait_until("position published", Duration::from_secs(5), || {
        reader_pos.lock().offset == ctx.input_queue.position().offset
    });

    ctx.shutdown.trigger();
    runtime.join(Duration::from_secs(5));

    // the stage checkpoint is persisted for restart
    let pos = ctx
        .store
        .get("input->analysis")
        .and_then(|cp| cp.as_position())
        .unwrap();
    assert_eq!(pos, ctx.input_queue.position());
}

#[test]
fn timer_events_fire_on_idle() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());

    let runtime = AnalysisRuntime::new(ctx.clone());
    let ticks = Arc::new(AtomicU64::new(0));
    let ticks2 = ticks.clone();
    let sandbox = FakeSandbox::new().on_timer(move |_, _, _| {
        ticks2.fetch_add(1, Ordering::SeqCst);
        ProcessResult::Sent
    });
    let mut cfg = plugin_cfg(PluginKind::Analysis, "tick");
    cfg.ticker_interval = 1;
    let host = host_for(PluginKind::Analysis, &cfg.name, sandbox);
    runtime.add_plugin(host, Matcher::new("FALSE").unwrap(), &cfg);
    runtime.start();

    wait_until("a timer event", Duration::from_secs(10), || {
        ticks.load(Ordering::SeqCst) >= 1
    });

    ctx.shutdown.trigger();
    runtime.join(Duration::from_secs(5));
}
