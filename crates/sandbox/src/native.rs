// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine hosting plugins compiled into the binary.
//!
//! A plugin config's `filename` is resolved by its stem against a factory
//! registry; the daemon registers its built-ins at startup and tests
//! register closures.

use crate::{Sandbox, SandboxEngine, SandboxError, SandboxSpec};
use std::collections::HashMap;
use std::sync::Arc;

type Factory = dyn Fn(&SandboxSpec) -> Result<Box<dyn Sandbox>, SandboxError> + Send + Sync;

/// Registry-backed sandbox engine.
#[derive(Default, Clone)]
pub struct NativeEngine {
    factories: HashMap<String, Arc<Factory>>,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a source name.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&SandboxSpec) -> Result<Box<dyn Sandbox>, SandboxError> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_owned(), Arc::new(factory));
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl SandboxEngine for NativeEngine {
    fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>, SandboxError> {
        let key = spec
            .source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| SandboxError::UnknownSource(key.to_owned()))?;
        factory(spec)
    }
}

#[cfg(test)]
#[path = "native_tests.rs"]
mod tests;
