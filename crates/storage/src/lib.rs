// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! On-disk state for the Hindsight pipeline: append-only queues, tailing
//! readers, and the durable checkpoint store.

mod checkpoint;
mod queue;
mod reader;

pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, CHECKPOINT_FILE, MAX_TEXT_LEN,
};
pub use queue::{
    find_first_id, find_last_id, find_next_id, log_path, Append, QueueError, QueueKind,
    QueuePosition, QueueWriter,
};
pub use reader::{Poll, QueueReader, SKIP_CYCLES};
