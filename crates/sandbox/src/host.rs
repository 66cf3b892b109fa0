// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle wrapper around one sandbox instance.
//!
//! The host enforces the created/initialized/running/stopping/terminated
//! progression, converts resource-budget violations into
//! termination, and keeps the last error text for the plugin's `.err` file.

use crate::{
    Host, ProcessResult, ResourceUsage, RuntimeLimits, Sandbox, SandboxEngine, SandboxError,
    SandboxSpec,
};
use hs_core::Message;
use hs_storage::Checkpoint;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initialized,
    Running,
    Stopping,
    Terminated,
}

/// One hosted plugin with its lifecycle state.
pub struct SandboxHost {
    name: String,
    sandbox: Option<Box<dyn Sandbox>>,
    state: LifecycleState,
    last_error: Option<String>,
    limits: RuntimeLimits,
    state_path: Option<PathBuf>,
    usage: ResourceUsage,
}

impl SandboxHost {
    /// Construct the sandbox through the engine.
    pub fn create(engine: &dyn SandboxEngine, spec: SandboxSpec) -> Result<Self, SandboxError> {
        let sandbox = engine.create(&spec)?;
        Ok(Self {
            name: spec.name,
            sandbox: Some(sandbox),
            state: LifecycleState::Created,
            last_error: None,
            limits: spec.limits,
            state_path: spec.state_path,
            usage: ResourceUsage::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::Initialized | LifecycleState::Running
        )
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn usage(&self) -> ResourceUsage {
        self.usage
    }

    /// Run the plugin's top-level code.
    pub fn init(&mut self) -> Result<(), SandboxError> {
        if self.state != LifecycleState::Created {
            return Err(SandboxError::Init(format!(
                "{}: init from state {:?}",
                self.name, self.state
            )));
        }
        match self.sandbox.as_mut() {
            Some(sandbox) => match sandbox.init() {
                Ok(()) => {
                    self.state = LifecycleState::Initialized;
                    Ok(())
                }
                Err(e) => {
                    self.terminate(&e.to_string());
                    Err(e)
                }
            },
            None => Err(SandboxError::Terminated("sandbox already destroyed".into())),
        }
    }

    /// Drive `process_message`, folding protocol violations and budget
    /// overruns into termination.
    pub fn process(
        &mut self,
        msg: Option<&Message>,
        checkpoint: Option<&Checkpoint>,
        sequence_id: Option<u64>,
        host: &mut dyn Host,
    ) -> ProcessResult {
        let Some(sandbox) = self.runnable() else {
            return ProcessResult::Fatal(self.terminated_error());
        };
        let result = sandbox.process_message(msg, checkpoint, sequence_id, host);
        self.absorb(result)
    }

    /// Drive `timer_event`.
    pub fn timer(&mut self, now_ns: i64, shutdown: bool, host: &mut dyn Host) -> ProcessResult {
        let Some(sandbox) = self.runnable() else {
            return ProcessResult::Fatal(self.terminated_error());
        };
        let result = sandbox.timer_event(now_ns, shutdown, host);
        self.absorb(result)
    }

    /// Request cooperative cancellation at the plugin's next yield point.
    pub fn stop(&mut self) {
        if let Some(sandbox) = self.sandbox.as_mut() {
            sandbox.stop();
        }
        if self.state != LifecycleState::Terminated {
            self.state = LifecycleState::Stopping;
        }
    }

    /// Force the plugin into the terminated state with an error.
    pub fn terminate(&mut self, error: &str) {
        warn!(plugin = %self.name, error, "sandbox terminated");
        self.state = LifecycleState::Terminated;
        self.last_error = Some(error.to_owned());
    }

    /// Release the sandbox, persisting state when configured. Returns the
    /// engine's error text when state serialization failed.
    pub fn destroy(&mut self) -> Option<String> {
        let sandbox = self.sandbox.take()?;
        self.state = LifecycleState::Terminated;
        sandbox.destroy(self.state_path.as_deref())
    }

    fn runnable(&mut self) -> Option<&mut Box<dyn Sandbox>> {
        match self.state {
            LifecycleState::Initialized => {
                self.state = LifecycleState::Running;
                self.sandbox.as_mut()
            }
            // a stopping plugin still gets its in-flight call
            LifecycleState::Running | LifecycleState::Stopping => self.sandbox.as_mut(),
            LifecycleState::Created | LifecycleState::Terminated => None,
        }
    }

    fn terminated_error(&self) -> String {
        self.last_error
            .clone()
            .unwrap_or_else(|| "not runnable".to_owned())
    }

    fn absorb(&mut self, result: ProcessResult) -> ProcessResult {
        if let Some(sandbox) = self.sandbox.as_ref() {
            self.usage = sandbox.usage();
        }
        if let ProcessResult::Fatal(err) = &result {
            self.terminate(err);
            return result;
        }
        if let Some(err) = self.over_budget() {
            self.terminate(&err);
            return ProcessResult::Fatal(err);
        }
        result
    }

    fn over_budget(&self) -> Option<String> {
        if self.limits.memory_bytes > 0 && self.usage.mem_cur > self.limits.memory_bytes {
            return Some(format!(
                "memory limit exceeded: {} > {}",
                self.usage.mem_cur, self.limits.memory_bytes
            ));
        }
        if self.limits.instructions > 0 && self.usage.ins_max > self.limits.instructions {
            return Some(format!(
                "instruction limit exceeded: {} > {}",
                self.usage.ins_max, self.limits.instructions
            ));
        }
        if self.limits.output_bytes > 0 && self.usage.out_max > self.limits.output_bytes {
            return Some(format!(
                "output limit exceeded: {} > {}",
                self.usage.out_max, self.limits.output_bytes
            ));
        }
        None
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
