// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared infrastructure handed to every runtime: configuration, queues,
//! checkpoint store, backpressure, and the shutdown signal.

use crate::backpressure::Backpressure;
use crate::shutdown::Shutdown;
use crate::RuntimeError;
use hs_core::Config;
use hs_storage::{CheckpointStore, QueueKind, QueueWriter};
use std::sync::Arc;

pub struct PipelineContext {
    pub cfg: Config,
    pub store: CheckpointStore,
    pub input_queue: QueueWriter,
    pub analysis_queue: QueueWriter,
    pub input_bp: Backpressure,
    pub analysis_bp: Backpressure,
    pub shutdown: Shutdown,
}

impl PipelineContext {
    /// Open the checkpoint store and both queues, resuming writer ids from
    /// the recorded positions.
    pub fn new(cfg: Config) -> Result<Arc<Self>, RuntimeError> {
        std::fs::create_dir_all(&cfg.output_path).map_err(|source| {
            RuntimeError::Io {
                path: cfg.output_path.clone(),
                source,
            }
        })?;
        let store = CheckpointStore::open(&cfg.output_path)?;
        let input_id = store
            .lookup_writer(QueueKind::Input)
            .map(|pos| pos.id)
            .unwrap_or(0);
        let analysis_id = store
            .lookup_writer(QueueKind::Analysis)
            .map(|pos| pos.id)
            .unwrap_or(0);
        let input_queue =
            QueueWriter::open(&cfg.output_path, QueueKind::Input, cfg.output_size, input_id)?;
        let analysis_queue = QueueWriter::open(
            &cfg.output_path,
            QueueKind::Analysis,
            cfg.output_size,
            analysis_id,
        )?;
        let input_bp = Backpressure::new(cfg.backpressure, cfg.backpressure_df, cfg.output_size);
        let analysis_bp = Backpressure::new(cfg.backpressure, cfg.backpressure_df, cfg.output_size);
        Ok(Arc::new(Self {
            cfg,
            store,
            input_queue,
            analysis_queue,
            input_bp,
            analysis_bp,
            shutdown: Shutdown::new(),
        }))
    }

    pub fn queue(&self, kind: QueueKind) -> &QueueWriter {
        match kind {
            QueueKind::Input => &self.input_queue,
            QueueKind::Analysis => &self.analysis_queue,
        }
    }

    pub fn backpressure(&self, kind: QueueKind) -> &Backpressure {
        match kind {
            QueueKind::Input => &self.input_bp,
            QueueKind::Analysis => &self.analysis_bp,
        }
    }
}
