// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared `inject_message` path: fill message plumbing, frame, append,
//! apply backpressure.

use crate::context::PipelineContext;
use crate::util::{self, now_ns};
use hs_core::{codec, Message};
use hs_sandbox::InjectError;
use hs_storage::{Append, QueueKind};
use uuid::Uuid;

/// Inject one plugin-produced message into a queue.
///
/// Queue write failures are fatal to the process (durability is gone);
/// everything else surfaces as an [`InjectError`] terminating only the
/// calling plugin.
pub(crate) fn inject_message(
    ctx: &PipelineContext,
    kind: QueueKind,
    plugin: &str,
    mut msg: Message,
    stamp_logger: bool,
) -> Result<Append, InjectError> {
    if msg.uuid == [0; 16] {
        msg.uuid = *Uuid::new_v4().as_bytes();
    }
    if msg.timestamp == 0 {
        msg.timestamp = now_ns();
    }
    if msg.hostname.is_none() {
        msg.hostname = Some(ctx.cfg.hostname.clone());
    }
    if stamp_logger && msg.logger.is_none() {
        msg.logger = Some(plugin.to_owned());
    }

    let payload = codec::encode_message(&msg);
    if payload.len() > ctx.cfg.max_message_size {
        return Err(InjectError::TooLarge {
            size: payload.len(),
            max: ctx.cfg.max_message_size,
        });
    }

    let queue = ctx.queue(kind);
    let append = match queue.append(&payload) {
        Ok(a) => a,
        Err(e) => util::fatal("queue append", &e),
    };

    let bp = ctx.backpressure(kind);
    if append.rolled {
        bp.after_roll(queue);
    }
    bp.throttle(queue, &ctx.shutdown);
    Ok(append)
}
