// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{host_for, plugin_cfg, test_context, wait_until};
use hs_core::{Message, PluginKind};
use hs_sandbox::testing::FakeSandbox;
use hs_sandbox::ProcessResult;
use hs_storage::{Checkpoint, Poll, QueueKind, QueuePosition, QueueReader};
use std::time::Duration;

fn emit_three() -> FakeSandbox {
    FakeSandbox::new().on_process(|_, host| {
        for (n, cp) in [(1u8, "a"), (2, "b"), (3, "c")] {
            let mut m = Message::new([n; 16], i64::from(n));
            m.payload = Some(format!("m{n}"));
            host.inject_message(m, Some(Checkpoint::Text(cp.into())))
                .unwrap();
        }
        ProcessResult::Sent
    })
}

#[test]
fn run_once_plugin_writes_queue_and_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    let runtime = InputRuntime::new(ctx.clone());

    let cfg = plugin_cfg(PluginKind::Input, "emitter");
    let host = host_for(PluginKind::Input, &cfg.name, emit_three());
    runtime.start_plugin(host, cfg);
    runtime.join(Duration::from_secs(5));

    // three frames land in input/0.log in order
    let mut reader = QueueReader::new(
        &ctx.cfg.output_path,
        QueueKind::Input,
        "test",
        ctx.cfg.output_size,
        ctx.cfg.max_message_size,
        QueuePosition::default(),
    );
    let mut seen = Vec::new();
    while let Ok(Poll::Message(m)) = reader.poll() {
        seen.push(m.timestamp);
        if seen.len() == 3 {
            break;
        }
    }
    assert_eq!(seen, vec![1, 2, 3]);

    // the final opaque checkpoint is held for the restart
    assert_eq!(
        ctx.store.get("input.emitter"),
        Some(Checkpoint::Text("c".into()))
    );
}

#[test]
fn host_fills_message_plumbing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    let runtime = InputRuntime::new(ctx.clone());

    let sandbox = FakeSandbox::new().on_process(|_, host| {
        // no uuid, timestamp, or hostname supplied
        host.inject_message(Message::default(), None).unwrap();
        ProcessResult::Sent
    });
    let cfg = plugin_cfg(PluginKind::Input, "bare");
    let host = host_for(PluginKind::Input, &cfg.name, sandbox);
    runtime.start_plugin(host, cfg);
    runtime.join(Duration::from_secs(5));

    let mut reader = QueueReader::new(
        &ctx.cfg.output_path,
        QueueKind::Input,
        "test",
        ctx.cfg.output_size,
        ctx.cfg.max_message_size,
        QueuePosition::default(),
    );
    let m = match reader.poll().unwrap() {
        Poll::Message(m) => m,
        other => panic!("expected message, got {other:?}"),
    };
    assert_ne!(m.uuid, [0; 16]);
    assert!(m.timestamp > 0);
    assert_eq!(m.hostname.as_deref(), Some("testhost"));
}

#[test]
fn plugin_sees_resumed_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    ctx.store
        .set("input.resume", Checkpoint::Text("resume-here".into()))
        .unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let sandbox = FakeSandbox::new().on_process(move |args, _| {
        let _ = tx.send(args.checkpoint.cloned());
        ProcessResult::Sent
    });
    let runtime = InputRuntime::new(ctx.clone());
    let cfg = plugin_cfg(PluginKind::Input, "resume");
    let host = host_for(PluginKind::Input, &cfg.name, sandbox);
    runtime.start_plugin(host, cfg);
    runtime.join(Duration::from_secs(5));

    assert_eq!(
        rx.recv().unwrap(),
        Some(Checkpoint::Text("resume-here".into()))
    );
}

#[test]
fn fatal_plugin_detaches_and_writes_error_file() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    let runtime = InputRuntime::new(ctx.clone());

    let sandbox =
        FakeSandbox::new().on_process(|_, _| ProcessResult::Fatal("exploded on poll".into()));
    let cfg = plugin_cfg(PluginKind::Input, "bomb");
    let host = host_for(PluginKind::Input, &cfg.name, sandbox);
    runtime.start_plugin(host, cfg);
    runtime.join(Duration::from_secs(5));

    assert!(runtime.registry().is_empty());
    let err = std::fs::read_to_string(ctx.cfg.output_path.join("input.bomb.err")).unwrap();
    assert_eq!(err, "exploded on poll");
}

#[test]
fn ticker_plugin_stops_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    let runtime = InputRuntime::new(ctx.clone());

    let sandbox = FakeSandbox::new().on_process(|_, host| {
        host.inject_message(Message::new([9; 16], 9), None).unwrap();
        ProcessResult::Sent
    });
    let mut cfg = plugin_cfg(PluginKind::Input, "ticker");
    cfg.ticker_interval = 3600; // would sleep an hour between polls
    let host = host_for(PluginKind::Input, &cfg.name, sandbox);
    runtime.start_plugin(host, cfg);

    let registry = runtime.registry();
    wait_until("first poll", Duration::from_secs(5), || {
        registry
            .snapshot()
            .first()
            .map(|p| p.state.lock().stats.im_cnt >= 1)
            .unwrap_or(false)
    });
    ctx.shutdown.trigger();
    runtime.join(Duration::from_secs(5));
}

#[test]
fn shutdown_terminate_takes_the_process_down() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    let runtime = InputRuntime::new(ctx.clone());

    let sandbox = FakeSandbox::new().on_process(|_, _| ProcessResult::Fatal("done".into()));
    let mut cfg = plugin_cfg(PluginKind::Input, "critical");
    cfg.shutdown_terminate = true;
    let host = host_for(PluginKind::Input, &cfg.name, sandbox);
    runtime.start_plugin(host, cfg);
    runtime.join(Duration::from_secs(5));

    assert!(ctx.shutdown.is_set());
}
