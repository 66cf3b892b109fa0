// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{host_for, plugin_cfg, test_context, wait_until};
use hs_core::{codec, Message, PluginKind, ReadQueue};
use hs_matcher::Matcher;
use hs_sandbox::testing::FakeSandbox;
use hs_sandbox::ProcessResult;
use hs_storage::QueueKind;
use parking_lot::Mutex as PlMutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

fn enqueue(ctx: &PipelineContext, kind: QueueKind, payload: &str, ts: i64) {
    let mut m = Message::new([ts as u8; 16], ts);
    m.payload = Some(payload.into());
    ctx.queue(kind).append(&codec::encode_message(&m)).unwrap();
}

fn pos(p: (u64, u64)) -> QueuePosition {
    QueuePosition::new(p.0, p.1)
}

// ---------------------------------------------------------------------------
// async ring: highest contiguous acknowledged prefix
// ---------------------------------------------------------------------------

#[test]
fn ring_commits_in_order_acks() {
    let mut ring = AsyncRing::new(4);
    for seq in 1..=3u64 {
        ring.store(seq, Some(pos((0, seq * 10))), None);
    }
    assert_eq!(ring.ack(1), Some((Some(pos((0, 10))), None)));
    assert_eq!(ring.ack(2), Some((Some(pos((0, 20))), None)));
    assert_eq!(ring.ack(3), Some((Some(pos((0, 30))), None)));
}

#[test]
fn ring_holds_back_gapped_acks() {
    let mut ring = AsyncRing::new(4);
    for seq in 1..=3u64 {
        ring.store(seq, Some(pos((0, seq * 10))), None);
    }
    // 2 acked first: nothing committable yet
    assert_eq!(ring.ack(2), None);
    // 1 arrives: the contiguous prefix is now 1..=2
    assert_eq!(ring.ack(1), Some((Some(pos((0, 20))), None)));
    assert_eq!(ring.ack(3), Some((Some(pos((0, 30))), None)));
}

#[test]
fn ring_scenario_out_of_order_batch() {
    // ids 1..6 acked in order 2, 1, 3, 5, 4, 6
    let mut ring = AsyncRing::new(8);
    for seq in 1..=6u64 {
        ring.store(seq, Some(pos((0, seq * 100))), None);
    }
    assert_eq!(ring.ack(2), None);
    assert_eq!(ring.ack(1), Some((Some(pos((0, 200))), None)));
    assert_eq!(ring.ack(3), Some((Some(pos((0, 300))), None)));
    // 5 without 4: committed stays at 3
    assert_eq!(ring.ack(5), None);
    // 4 arrives: prefix runs through 5
    assert_eq!(ring.ack(4), Some((Some(pos((0, 500))), None)));
    assert_eq!(ring.ack(6), Some((Some(pos((0, 600))), None)));
}

#[test]
fn ring_ignores_unknown_and_duplicate_acks() {
    let mut ring = AsyncRing::new(4);
    ring.store(1, Some(pos((0, 10))), None);
    assert_eq!(ring.ack(9), None);
    assert_eq!(ring.ack(1), Some((Some(pos((0, 10))), None)));
    assert_eq!(ring.ack(1), None);
}

#[test]
fn ring_wraps_slots() {
    let mut ring = AsyncRing::new(2);
    ring.store(1, Some(pos((0, 10))), None);
    ring.store(2, Some(pos((0, 20))), None);
    assert_eq!(ring.ack(1), Some((Some(pos((0, 10))), None)));
    ring.store(3, Some(pos((0, 30))), None); // reuses slot 1
    assert_eq!(ring.ack(3), None);
    assert_eq!(ring.ack(2), Some((Some(pos((0, 30))), None)));
}

// ---------------------------------------------------------------------------
// committed checkpoint monotonicity
// ---------------------------------------------------------------------------

#[test]
fn commit_never_regresses() {
    let shared = OutputShared {
        name: "output.t".into(),
        stop: Default::default(),
        state: PlMutex::new(OutputState::default()),
    };
    commit(&shared, Some(pos((1, 100))), None);
    commit(&shared, Some(pos((1, 50))), None);
    commit(&shared, Some(pos((0, 900))), None);
    assert_eq!(shared.state.lock().committed_input, Some(pos((1, 100))));
    commit(&shared, Some(pos((2, 0))), None);
    assert_eq!(shared.state.lock().committed_input, Some(pos((2, 0))));
}

// ---------------------------------------------------------------------------
// worker behavior against real queues
// ---------------------------------------------------------------------------

#[test]
fn delivers_matched_messages_and_commits() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    enqueue(&ctx, QueueKind::Input, "one", 1);
    enqueue(&ctx, QueueKind::Input, "two", 2);

    let seen = Arc::new(PlMutex::new(Vec::new()));
    let seen2 = seen.clone();
    let sandbox = FakeSandbox::new().on_process(move |args, _| {
        seen2
            .lock()
            .push(args.msg.and_then(|m| m.payload.clone()).unwrap_or_default());
        ProcessResult::Sent
    });

    let runtime = OutputRuntime::new(ctx.clone());
    let mut cfg = plugin_cfg(PluginKind::Output, "sink");
    cfg.read_queue = ReadQueue::Input;
    let host = host_for(PluginKind::Output, &cfg.name, sandbox);
    runtime.start_plugin(host, Matcher::new("TRUE").unwrap(), cfg);

    wait_until("both delivered", Duration::from_secs(5), || {
        seen.lock().len() == 2
    });
    assert_eq!(*seen.lock(), vec!["one".to_string(), "two".to_string()]);

    let registry = runtime.registry();
    wait_until("checkpoint committed", Duration::from_secs(5), || {
        registry
            .snapshot()
            .first()
            .and_then(|p| p.state.lock().committed_input)
            .map(|p| p.offset == ctx.input_queue.position().offset)
            .unwrap_or(false)
    });

    ctx.shutdown.trigger();
    runtime.join(Duration::from_secs(5));

    // the committed position lands in the store for restart
    let stored = ctx
        .store
        .get("input->output.sink")
        .and_then(|cp| cp.as_position())
        .unwrap();
    assert_eq!(stored, ctx.input_queue.position());
}

#[test]
fn interleaves_queues_by_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    enqueue(&ctx, QueueKind::Input, "i1", 10);
    enqueue(&ctx, QueueKind::Input, "i2", 30);
    enqueue(&ctx, QueueKind::Analysis, "a1", 20);
    enqueue(&ctx, QueueKind::Analysis, "a2", 40);

    let seen = Arc::new(PlMutex::new(Vec::new()));
    let seen2 = seen.clone();
    let sandbox = FakeSandbox::new().on_process(move |args, _| {
        seen2
            .lock()
            .push(args.msg.and_then(|m| m.payload.clone()).unwrap_or_default());
        ProcessResult::Sent
    });

    let runtime = OutputRuntime::new(ctx.clone());
    let cfg = plugin_cfg(PluginKind::Output, "both");
    let host = host_for(PluginKind::Output, &cfg.name, sandbox);
    runtime.start_plugin(host, Matcher::new("TRUE").unwrap(), cfg);

    wait_until("all four delivered", Duration::from_secs(5), || {
        seen.lock().len() == 4
    });
    assert_eq!(
        *seen.lock(),
        vec![
            "i1".to_string(),
            "a1".to_string(),
            "i2".to_string(),
            "a2".to_string()
        ]
    );

    ctx.shutdown.trigger();
    runtime.join(Duration::from_secs(5));
}

#[test]
fn async_acks_commit_contiguous_prefix_only() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    for ts in 1..=3 {
        enqueue(&ctx, QueueKind::Input, "m", ts);
    }

    // every message returns Async; ack 2 then 1 arrive via the timer
    let acked = Arc::new(AtomicU64::new(0));
    let acked2 = acked.clone();
    let pending = Arc::new(PlMutex::new(Vec::new()));
    let pending2 = pending.clone();
    let sandbox = FakeSandbox::new()
        .on_process(move |args, _| {
            pending2.lock().push(args.sequence_id.unwrap_or_default());
            ProcessResult::Async
        })
        .on_timer(move |_, _, host| {
            let mut p = pending
                .lock()
                .drain(..)
                .collect::<Vec<_>>();
            // deliberately acknowledge newest first
            p.sort_unstable_by(|a, b| b.cmp(a));
            for seq in p {
                host.update_checkpoint(Some(seq));
                acked2.fetch_add(1, AtomicOrdering::SeqCst);
            }
            ProcessResult::Sent
        });

    let runtime = OutputRuntime::new(ctx.clone());
    let mut cfg = plugin_cfg(PluginKind::Output, "asink");
    cfg.read_queue = ReadQueue::Input;
    cfg.async_buffer_size = 4;
    cfg.ticker_interval = 1;
    let host = host_for(PluginKind::Output, &cfg.name, sandbox);
    runtime.start_plugin(host, Matcher::new("TRUE").unwrap(), cfg);

    wait_until("all acked", Duration::from_secs(10), || {
        acked.load(AtomicOrdering::SeqCst) == 3
    });
    let registry = runtime.registry();
    wait_until("committed to the tail", Duration::from_secs(5), || {
        registry
            .snapshot()
            .first()
            .and_then(|p| p.state.lock().committed_input)
            .map(|p| p.offset == ctx.input_queue.position().offset)
            .unwrap_or(false)
    });

    ctx.shutdown.trigger();
    runtime.join(Duration::from_secs(5));
}

#[test]
fn async_without_ring_terminates_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    enqueue(&ctx, QueueKind::Input, "m", 1);

    let sandbox = FakeSandbox::new().on_process(|_, _| ProcessResult::Async);
    let runtime = OutputRuntime::new(ctx.clone());
    let mut cfg = plugin_cfg(PluginKind::Output, "noring");
    cfg.read_queue = ReadQueue::Input;
    let host = host_for(PluginKind::Output, &cfg.name, sandbox);
    runtime.start_plugin(host, Matcher::new("TRUE").unwrap(), cfg);

    let registry = runtime.registry();
    wait_until("plugin detached", Duration::from_secs(5), || {
        registry.is_empty()
    });
    let err = std::fs::read_to_string(ctx.cfg.output_path.join("output.noring.err")).unwrap();
    assert!(err.contains("async"), "{err}");
    runtime.join(Duration::from_secs(5));
    ctx.shutdown.trigger();
}

#[test]
fn batch_then_flush_commits_current_position() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    for ts in 1..=3 {
        enqueue(&ctx, QueueKind::Input, "m", ts);
    }

    let calls = Arc::new(AtomicU64::new(0));
    let calls2 = calls.clone();
    let sandbox = FakeSandbox::new().on_process(move |_, host| {
        let n = calls2.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        if n < 3 {
            ProcessResult::Batch
        } else {
            // flush: everything batched so far is now delivered
            host.update_checkpoint(None);
            ProcessResult::Sent
        }
    });

    let runtime = OutputRuntime::new(ctx.clone());
    let mut cfg = plugin_cfg(PluginKind::Output, "batcher");
    cfg.read_queue = ReadQueue::Input;
    let host = host_for(PluginKind::Output, &cfg.name, sandbox);
    runtime.start_plugin(host, Matcher::new("TRUE").unwrap(), cfg);

    let registry = runtime.registry();
    wait_until("batch committed", Duration::from_secs(5), || {
        registry
            .snapshot()
            .first()
            .and_then(|p| p.state.lock().committed_input)
            .map(|p| p.offset == ctx.input_queue.position().offset)
            .unwrap_or(false)
    });

    ctx.shutdown.trigger();
    runtime.join(Duration::from_secs(5));
}

#[test]
fn retry_redelivers_same_message_and_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    enqueue(&ctx, QueueKind::Input, "flaky", 1);

    let attempts = Arc::new(PlMutex::new(Vec::new()));
    let attempts2 = attempts.clone();
    let sandbox = FakeSandbox::new().on_process(move |args, _| {
        let mut a = attempts2.lock();
        a.push((
            args.sequence_id.unwrap_or_default(),
            args.msg.and_then(|m| m.payload.clone()).unwrap_or_default(),
        ));
        if a.len() < 2 {
            ProcessResult::Retry
        } else {
            ProcessResult::Sent
        }
    });

    let runtime = OutputRuntime::new(ctx.clone());
    let mut cfg = plugin_cfg(PluginKind::Output, "retrier");
    cfg.read_queue = ReadQueue::Input;
    let host = host_for(PluginKind::Output, &cfg.name, sandbox);
    runtime.start_plugin(host, Matcher::new("TRUE").unwrap(), cfg);

    wait_until("retried once", Duration::from_secs(10), || {
        attempts.lock().len() == 2
    });
    let a = attempts.lock().clone();
    assert_eq!(a[0], a[1]);

    ctx.shutdown.trigger();
    runtime.join(Duration::from_secs(5));
}
