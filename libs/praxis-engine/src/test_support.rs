//! Hand-written fakes shared by the unit tests. No external toolchain or
//! sandbox is needed to exercise grading semantics.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use praxis_common::types::{ProblemDefinition, ResourceLimits, TestCase};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::engine::ProgressSink;
use crate::error::{SandboxError, ToolchainError};
use crate::sandbox::{RunOutput, Sandbox};
use crate::toolchain::{Artifact, CompilationResult, Toolchain};

pub fn ok_output(stdout: &[u8]) -> RunOutput {
    RunOutput {
        stdout: stdout.to_vec(),
        exit_code: Some(0),
        duration_ms: 5,
        peak_memory_bytes: 1024 * 1024,
        ..RunOutput::default()
    }
}

pub fn timeout_output() -> RunOutput {
    RunOutput {
        timed_out: true,
        duration_ms: 2_000,
        ..RunOutput::default()
    }
}

pub fn crash_output(exit_code: i32) -> RunOutput {
    RunOutput {
        exit_code: Some(exit_code),
        duration_ms: 5,
        ..RunOutput::default()
    }
}

pub fn problem_with_cases(fail_fast: bool, cases: &[(&str, &str, &str)]) -> ProblemDefinition {
    ProblemDefinition {
        id: "test-problem".to_string(),
        starter_source: String::new(),
        reference_source: None,
        test_cases: cases
            .iter()
            .map(|(label, input, expected)| TestCase {
                label: label.to_string(),
                input: input.as_bytes().to_vec(),
                expected_output: expected.as_bytes().to_vec(),
            })
            .collect(),
        limits: ResourceLimits::default(),
        compare: Default::default(),
        expected_exit_code: 0,
        fail_fast,
    }
}

pub fn dummy_artifact() -> Artifact {
    let scratch = tempfile::tempdir().expect("tempdir");
    let binary = scratch.path().join("main");
    Artifact::new(binary, scratch)
}

/// Sandbox that replays a fixed sequence of outputs and records the inputs
/// it was fed, in order.
pub struct ScriptedSandbox {
    outputs: Mutex<VecDeque<RunOutput>>,
    pub inputs: Mutex<Vec<Vec<u8>>>,
    delay: Option<Duration>,
    cancel_after_run: Mutex<Option<CancelToken>>,
}

impl ScriptedSandbox {
    pub fn new(outputs: Vec<RunOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            inputs: Mutex::new(Vec::new()),
            delay: None,
            cancel_after_run: Mutex::new(None),
        }
    }

    /// Sleep this long inside every run, to open race windows for
    /// cancellation and admission tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Trip the given token right after the first run finishes.
    pub fn cancel_after_first_run(&self, cancel: &CancelToken) {
        *self.cancel_after_run.lock().unwrap() = Some(cancel.clone());
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn run(
        &self,
        _binary: &Path,
        input: &[u8],
        _limits: &ResourceLimits,
        cancel: &CancelToken,
    ) -> Result<RunOutput, SandboxError> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            }
        }

        self.inputs.lock().unwrap().push(input.to_vec());
        let output = self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted sandbox ran out of outputs");

        if let Some(token) = self.cancel_after_run.lock().unwrap().take() {
            token.cancel();
        }
        Ok(output)
    }
}

pub enum ToolchainScript {
    Succeed,
    FailWith(String),
    Fault,
}

/// Toolchain that never touches a real compiler.
pub struct ScriptedToolchain {
    script: ToolchainScript,
}

impl ScriptedToolchain {
    pub fn succeeding() -> Self {
        Self {
            script: ToolchainScript::Succeed,
        }
    }

    pub fn failing(diagnostics: &str) -> Self {
        Self {
            script: ToolchainScript::FailWith(diagnostics.to_string()),
        }
    }

    pub fn faulting() -> Self {
        Self {
            script: ToolchainScript::Fault,
        }
    }
}

#[async_trait]
impl Toolchain for ScriptedToolchain {
    async fn compile(&self, _source_code: &str) -> Result<CompilationResult, ToolchainError> {
        match &self.script {
            ToolchainScript::Succeed => Ok(CompilationResult::success(
                dummy_artifact(),
                String::new(),
            )),
            ToolchainScript::FailWith(diag) => Ok(CompilationResult::failure(diag.clone())),
            ToolchainScript::Fault => Err(ToolchainError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "compiler missing",
            ))),
        }
    }
}

/// Progress sink that records which problems were reported as passed.
#[derive(Default)]
pub struct RecordingSink {
    pub passed: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn problem_passed(&self, problem_id: &str, _submission_id: Uuid, _at: DateTime<Utc>) {
        self.passed.lock().unwrap().push(problem_id.to_string());
    }
}
