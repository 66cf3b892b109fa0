// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::testing::{FakeSandbox, RecordingHost};
use crate::{NativeEngine, ResourceUsage};
use hs_core::PluginKind;

fn limits() -> RuntimeLimits {
    RuntimeLimits {
        memory_bytes: 1024,
        instructions: 1000,
        output_bytes: 512,
        max_message_size: 64 * 1024,
    }
}

fn spec(name: &str) -> SandboxSpec {
    SandboxSpec {
        kind: PluginKind::Input,
        name: name.to_owned(),
        source: "fake".into(),
        limits: limits(),
        config: toml::Table::new(),
        state_path: None,
    }
}

fn engine_with(factory: impl Fn() -> FakeSandbox + Send + Sync + 'static) -> NativeEngine {
    let mut engine = NativeEngine::new();
    engine.register("fake", move |_| Ok(Box::new(factory())));
    engine
}

#[test]
fn lifecycle_progression() {
    let engine = engine_with(FakeSandbox::new);
    let mut host = SandboxHost::create(&engine, spec("p")).unwrap();
    assert_eq!(host.state(), LifecycleState::Created);

    host.init().unwrap();
    assert_eq!(host.state(), LifecycleState::Initialized);

    let mut ctx = RecordingHost::default();
    assert_eq!(host.process(None, None, None, &mut ctx), ProcessResult::Sent);
    assert_eq!(host.state(), LifecycleState::Running);

    host.stop();
    assert_eq!(host.state(), LifecycleState::Stopping);

    host.destroy();
    assert_eq!(host.state(), LifecycleState::Terminated);
}

#[test]
fn process_before_init_is_fatal() {
    let engine = engine_with(FakeSandbox::new);
    let mut host = SandboxHost::create(&engine, spec("p")).unwrap();
    let mut ctx = RecordingHost::default();
    assert!(matches!(
        host.process(None, None, None, &mut ctx),
        ProcessResult::Fatal(_)
    ));
}

#[test]
fn init_failure_terminates() {
    let engine = engine_with(|| FakeSandbox::new().failing_init("boom"));
    let mut host = SandboxHost::create(&engine, spec("p")).unwrap();
    assert!(host.init().is_err());
    assert_eq!(host.state(), LifecycleState::Terminated);
    assert_eq!(host.last_error(), Some("boom"));
}

#[test]
fn fatal_result_records_error() {
    let engine = engine_with(|| {
        FakeSandbox::new().on_process(|_, _| ProcessResult::Fatal("bad return".into()))
    });
    let mut host = SandboxHost::create(&engine, spec("p")).unwrap();
    host.init().unwrap();
    let mut ctx = RecordingHost::default();
    assert!(matches!(
        host.process(None, None, None, &mut ctx),
        ProcessResult::Fatal(_)
    ));
    assert_eq!(host.state(), LifecycleState::Terminated);
    assert_eq!(host.last_error(), Some("bad return"));

    // further calls stay fatal without touching the sandbox
    assert!(matches!(
        host.process(None, None, None, &mut ctx),
        ProcessResult::Fatal(_)
    ));
}

#[yare::parameterized(
    memory       = { ResourceUsage { mem_cur: 2048, ..Default::default() }, "memory" },
    instructions = { ResourceUsage { ins_max: 5000, ..Default::default() }, "instruction" },
    output       = { ResourceUsage { out_max: 4096, ..Default::default() }, "output" },
)]
fn budget_overrun_terminates(usage: ResourceUsage, what: &str) {
    let engine = engine_with(move || FakeSandbox::new().with_usage(usage));
    let mut host = SandboxHost::create(&engine, spec("p")).unwrap();
    host.init().unwrap();
    let mut ctx = RecordingHost::default();
    match host.process(None, None, None, &mut ctx) {
        ProcessResult::Fatal(e) => assert!(e.contains(what), "{e}"),
        other => panic!("expected fatal, got {other:?}"),
    }
}

#[test]
fn usage_within_budget_passes_through() {
    let usage = ResourceUsage {
        mem_cur: 100,
        mem_max: 200,
        out_max: 50,
        ins_max: 10,
    };
    let engine = engine_with(move || FakeSandbox::new().with_usage(usage));
    let mut host = SandboxHost::create(&engine, spec("p")).unwrap();
    host.init().unwrap();
    let mut ctx = RecordingHost::default();
    assert_eq!(host.process(None, None, None, &mut ctx), ProcessResult::Sent);
    assert_eq!(host.usage().mem_max, 200);
}

#[test]
fn destroy_reports_state_error() {
    let engine = engine_with(|| FakeSandbox::new().on_destroy(|_| Some("write failed".into())));
    let mut host = SandboxHost::create(&engine, spec("p")).unwrap();
    host.init().unwrap();
    assert_eq!(host.destroy(), Some("write failed".into()));
    // second destroy is a no-op
    assert_eq!(host.destroy(), None);
}
