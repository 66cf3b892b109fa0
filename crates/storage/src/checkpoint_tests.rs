// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::queue::QueueKind;
use tempfile::tempdir;

#[test]
fn empty_store_round_trips() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    store.write().unwrap();
    assert!(dir.path().join(CHECKPOINT_FILE).exists());
    let reopened = CheckpointStore::open(dir.path()).unwrap();
    assert_eq!(reopened.get("anything"), None);
}

#[test]
fn values_survive_rewrite_bitwise() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    store
        .set("input.counter", Checkpoint::Number(421.5))
        .unwrap();
    store
        .set("input.tailer", Checkpoint::Text("file7:line 12".into()))
        .unwrap();
    store.update_reader(QueueKind::Input, "output.sink", QueuePosition::new(3, 9000));
    store.update_writer(QueueKind::Analysis, QueuePosition::new(8, 12));
    store.write().unwrap();

    let reopened = CheckpointStore::open(dir.path()).unwrap();
    assert_eq!(
        reopened.get("input.counter"),
        Some(Checkpoint::Number(421.5))
    );
    assert_eq!(
        reopened.get("input.tailer"),
        Some(Checkpoint::Text("file7:line 12".into()))
    );
    assert_eq!(
        reopened
            .get("input->output.sink")
            .and_then(|cp| cp.as_position()),
        Some(QueuePosition::new(3, 9000))
    );
    assert_eq!(
        reopened.lookup_writer(QueueKind::Analysis),
        Some(QueuePosition::new(8, 12))
    );
}

#[yare::parameterized(
    newline   = { "a\nb" },
    quote     = { "it's" },
    backslash = { "c:\\path" },
    carriage  = { "a\rb" },
    equals    = { "k=v" },
    empty     = { "" },
)]
fn text_escaping_round_trips(text: &str) {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    store.set("key", Checkpoint::Text(text.into())).unwrap();
    store.write().unwrap();
    let reopened = CheckpointStore::open(dir.path()).unwrap();
    assert_eq!(reopened.get("key"), Some(Checkpoint::Text(text.into())));
}

#[test]
fn file_format_is_assignments() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    store
        .set("input.heartbeat", Checkpoint::Text("c".into()))
        .unwrap();
    store.write().unwrap();
    let text = std::fs::read_to_string(dir.path().join(CHECKPOINT_FILE)).unwrap();
    assert!(text.contains("_G['input.heartbeat'] = 'c'"), "{text}");
}

#[test]
fn load_accepts_bare_and_double_quoted_forms() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join(CHECKPOINT_FILE),
        "last_output_id = 7\n_G[\"x\"] = \"quoted\"\ngibberish line\n",
    )
    .unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    assert_eq!(store.get("last_output_id"), Some(Checkpoint::Number(7.0)));
    assert_eq!(store.get("x"), Some(Checkpoint::Text("quoted".into())));
    assert_eq!(store.get("gibberish line"), None);
}

#[test]
fn oversize_text_rejected() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let big = "x".repeat(MAX_TEXT_LEN + 1);
    assert!(matches!(
        store.set("k", Checkpoint::Text(big)),
        Err(CheckpointError::TextTooLarge(_))
    ));
}

#[test]
fn lookup_reader_falls_back_to_directory_scan() {
    let dir = tempdir().unwrap();
    let q = dir.path().join("input");
    std::fs::create_dir_all(&q).unwrap();
    std::fs::write(q.join("5.log"), b"").unwrap();
    std::fs::write(q.join("9.log"), b"").unwrap();

    let store = CheckpointStore::open(dir.path()).unwrap();
    assert_eq!(
        store.lookup_reader(dir.path(), QueueKind::Input, "output.sink"),
        QueuePosition::new(5, 0)
    );

    // an explicit entry wins over the scan
    store.update_reader(QueueKind::Input, "output.sink", QueuePosition::new(9, 42));
    assert_eq!(
        store.lookup_reader(dir.path(), QueueKind::Input, "output.sink"),
        QueuePosition::new(9, 42)
    );
}

#[test]
fn lookup_reader_defaults_to_zero_when_empty() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    assert_eq!(
        store.lookup_reader(dir.path(), QueueKind::Analysis, "p"),
        QueuePosition::new(0, 0)
    );
}

#[test]
fn remove_reader_clears_entry() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    store.update_reader(QueueKind::Input, "p", QueuePosition::new(1, 2));
    store.remove_reader(QueueKind::Input, "p");
    assert_eq!(store.get("input->p"), None);
}

#[test]
fn rewrite_replaces_not_appends() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    store.set("k", Checkpoint::Number(1.0)).unwrap();
    store.write().unwrap();
    store.set("k", Checkpoint::Number(2.0)).unwrap();
    store.write().unwrap();

    let text = std::fs::read_to_string(dir.path().join(CHECKPOINT_FILE)).unwrap();
    assert_eq!(text.matches("_G['k']").count(), 1);
    let reopened = CheckpointStore::open(dir.path()).unwrap();
    assert_eq!(reopened.get("k"), Some(Checkpoint::Number(2.0)));
}

#[test]
fn no_tmp_file_left_behind() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    store.set("k", Checkpoint::Number(1.0)).unwrap();
    store.write().unwrap();
    assert!(!dir.path().join("hindsight.cp.tmp").exists());
}
