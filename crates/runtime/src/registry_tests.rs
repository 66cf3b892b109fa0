// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::Arc;

#[test]
fn add_and_snapshot() {
    let registry: Registry<String> = Registry::new();
    assert!(registry.is_empty());
    registry.add(Arc::new("a".to_string()));
    registry.add(Arc::new("b".to_string()));
    let names: Vec<String> = registry.snapshot().iter().map(|s| (**s).clone()).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn clear_frees_the_slot_for_reuse() {
    let registry: Registry<u32> = Registry::new();
    let a = registry.add(Arc::new(1));
    let b = registry.add(Arc::new(2));
    assert_ne!(a, b);

    registry.clear(a);
    assert_eq!(registry.len(), 1);

    // the freed slot is reused before the vector grows
    let c = registry.add(Arc::new(3));
    assert_eq!(c, a);
    assert_eq!(registry.len(), 2);
}

#[test]
fn clear_out_of_range_is_ignored() {
    let registry: Registry<u32> = Registry::new();
    registry.clear(7);
    assert!(registry.is_empty());
}
