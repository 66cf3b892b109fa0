// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

fn payload(n: usize) -> Vec<u8> {
    vec![0x42; n]
}

#[test]
fn append_advances_offset() {
    let dir = tempdir().unwrap();
    let w = QueueWriter::open(dir.path(), QueueKind::Input, 1024 * 1024, 0).unwrap();

    let a = w.append(&payload(100)).unwrap();
    assert_eq!(a.pos.id, 0);
    assert_eq!(a.pos.offset, a.frame_len as u64);
    assert!(!a.rolled);

    let b = w.append(&payload(100)).unwrap();
    assert_eq!(b.pos.offset, (a.frame_len + b.frame_len) as u64);
    assert_eq!(w.position(), b.pos);

    let on_disk = std::fs::metadata(log_path(&dir.path().join("input"), 0))
        .unwrap()
        .len();
    assert_eq!(on_disk, b.pos.offset);
}

#[test]
fn rollover_at_threshold() {
    let dir = tempdir().unwrap();
    let w = QueueWriter::open(dir.path(), QueueKind::Input, 256, 0).unwrap();

    let mut rolled_at = None;
    for i in 0..10 {
        let a = w.append(&payload(64)).unwrap();
        if a.rolled {
            rolled_at = Some((i, a.pos));
            break;
        }
    }
    let (_, pos) = rolled_at.expect("threshold never crossed");
    // the frame that crossed the threshold stayed in the old file
    assert_eq!(pos.id, 0);
    assert!(pos.offset >= 256);
    assert_eq!(w.position().id, 1);
    assert_eq!(w.position().offset, 0);

    let input_dir = dir.path().join("input");
    assert!(log_path(&input_dir, 0).exists());
    assert!(log_path(&input_dir, 1).exists());
}

#[test]
fn reopen_resumes_offset() {
    let dir = tempdir().unwrap();
    {
        let w = QueueWriter::open(dir.path(), QueueKind::Analysis, 1024, 3).unwrap();
        w.append(&payload(10)).unwrap();
    }
    let w = QueueWriter::open(dir.path(), QueueKind::Analysis, 1024, 3).unwrap();
    let pos = w.position();
    assert_eq!(pos.id, 3);
    assert!(pos.offset > 0);
}

#[test]
fn min_reader_id_is_monotone() {
    let dir = tempdir().unwrap();
    let w = QueueWriter::open(dir.path(), QueueKind::Input, 1024, 0).unwrap();
    assert_eq!(w.min_reader_id(), 0);
    w.set_min_reader_id(4);
    w.set_min_reader_id(2); // lower value must not regress the watermark
    assert_eq!(w.min_reader_id(), 4);
}

#[test]
fn backlog_counts_file_gap() {
    let dir = tempdir().unwrap();
    let w = QueueWriter::open(dir.path(), QueueKind::Input, 64, 0).unwrap();
    for _ in 0..6 {
        w.append(&payload(64)).unwrap();
    }
    assert_eq!(w.position().id, 6);
    assert_eq!(w.backlog(), 6);
    w.set_min_reader_id(5);
    assert_eq!(w.backlog(), 1);
}

#[test]
fn id_scans() {
    let dir = tempdir().unwrap();
    let q = dir.path().join("input");
    std::fs::create_dir_all(&q).unwrap();
    assert_eq!(find_first_id(&q), None);

    for id in [3u64, 7, 12] {
        std::fs::write(log_path(&q, id), b"").unwrap();
    }
    std::fs::write(q.join("notalog.txt"), b"").unwrap();
    std::fs::write(q.join("9.tmp"), b"").unwrap();

    assert_eq!(find_first_id(&q), Some(3));
    assert_eq!(find_last_id(&q), Some(12));
    assert_eq!(find_next_id(&q, 3), Some(7));
    assert_eq!(find_next_id(&q, 7), Some(12));
    assert_eq!(find_next_id(&q, 12), None);
}
