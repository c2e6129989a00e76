/// Toolchain Driver - External Compiler Behind a Narrow Interface
///
/// **Core Responsibility:**
/// Turn source text into a runnable artifact exactly once per grading.
///
/// **Critical Architectural Boundary:**
/// - The engine does not implement a compiler; it invokes one
/// - A failing compile (bad submission) is a successful `CompilationResult`
///   with raw stderr as diagnostics
/// - A compiler that cannot be launched or that hangs is a
///   `ToolchainError`, surfaced as infrastructure trouble upstream
///
/// The artifact owns its scratch directory: dropping it removes the binary
/// on every exit path, including cancellation and faults.
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::ToolchainError;

/// Compiled, runnable output of one submission. Exclusively owned by the
/// grading that produced it, never shared across submissions.
pub struct Artifact {
    binary: PathBuf,
    _scratch: TempDir,
}

impl Artifact {
    pub fn new(binary: PathBuf, scratch: TempDir) -> Self {
        Self {
            binary,
            _scratch: scratch,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

/// Outcome of one compilation attempt.
pub struct CompilationResult {
    pub succeeded: bool,
    pub artifact: Option<Artifact>,
    /// Raw toolchain stderr, reported verbatim. Warnings appear here even
    /// on success.
    pub diagnostics: String,
}

impl CompilationResult {
    pub fn success(artifact: Artifact, diagnostics: String) -> Self {
        Self {
            succeeded: true,
            artifact: Some(artifact),
            diagnostics,
        }
    }

    pub fn failure(diagnostics: String) -> Self {
        Self {
            succeeded: false,
            artifact: None,
            diagnostics,
        }
    }
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn compile(&self, source_code: &str) -> Result<CompilationResult, ToolchainError>;
}

/// Production toolchain: a configurable C++ compiler invoked as a child
/// process with a hard timeout.
pub struct GccToolchain {
    compiler: PathBuf,
    args: Vec<String>,
    scratch_root: PathBuf,
    timeout: Duration,
}

impl GccToolchain {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            compiler: config.compiler.path.clone(),
            args: config.compiler.args.clone(),
            scratch_root: config.scratch_root.clone(),
            timeout: Duration::from_millis(config.compile_timeout_ms),
        }
    }
}

#[async_trait]
impl Toolchain for GccToolchain {
    #[tracing::instrument(skip(self, source_code), fields(source_bytes = source_code.len()))]
    async fn compile(&self, source_code: &str) -> Result<CompilationResult, ToolchainError> {
        std::fs::create_dir_all(&self.scratch_root).map_err(ToolchainError::Scratch)?;
        let scratch = tempfile::Builder::new()
            .prefix("praxis-build-")
            .tempdir_in(&self.scratch_root)
            .map_err(ToolchainError::Scratch)?;

        let source_path = scratch.path().join("main.cpp");
        tokio::fs::write(&source_path, source_code)
            .await
            .map_err(ToolchainError::Scratch)?;
        let binary_path = scratch.path().join("main");

        let mut cmd = Command::new(&self.compiler);
        cmd.args(&self.args)
            .arg(&source_path)
            .arg("-o")
            .arg(&binary_path)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout must not leave a compiler
            // process behind.
            .kill_on_drop(true);

        let timeout_ms = self.timeout.as_millis() as u64;
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ToolchainError::TimedOut(timeout_ms))?
            .map_err(ToolchainError::Spawn)?;

        let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            debug!("compilation succeeded");
            Ok(CompilationResult::success(
                Artifact::new(binary_path, scratch),
                diagnostics,
            ))
        } else {
            warn!(
                exit_code = output.status.code(),
                error_preview = diagnostics.lines().next().unwrap_or(""),
                "compilation failed"
            );
            Ok(CompilationResult::failure(diagnostics))
        }
    }
}
