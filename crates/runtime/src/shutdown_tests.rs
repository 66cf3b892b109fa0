// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Instant;

#[test]
fn starts_unset() {
    let s = Shutdown::new();
    assert!(!s.is_set());
    assert!(!s.wait_timeout(Duration::from_millis(1)));
}

#[test]
fn trigger_is_sticky() {
    let s = Shutdown::new();
    s.trigger();
    assert!(s.is_set());
    assert!(s.wait_timeout(Duration::from_millis(1)));
    assert!(s.wait_timeout(Duration::from_millis(1)));
}

#[test]
fn wakes_a_sleeping_waiter() {
    let s = Shutdown::new();
    let s2 = s.clone();
    let handle = std::thread::spawn(move || {
        let started = Instant::now();
        assert!(s2.wait_timeout(Duration::from_secs(30)));
        started.elapsed()
    });
    std::thread::sleep(Duration::from_millis(50));
    s.trigger();
    let waited = handle.join().unwrap();
    assert!(waited < Duration::from_secs(5), "waited {waited:?}");
}

#[test]
fn wait_returns_after_trigger() {
    let s = Shutdown::new();
    let s2 = s.clone();
    let handle = std::thread::spawn(move || s2.wait());
    s.trigger();
    handle.join().unwrap();
}
