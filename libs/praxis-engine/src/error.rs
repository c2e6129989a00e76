use thiserror::Error;

/// Faults from the compiler driver. A submission that fails to compile is
/// NOT an error here; it is a successful `CompilationResult` with
/// `succeeded == false`. These variants are infrastructure faults.
#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("failed to launch compiler: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("compilation did not finish within {0} ms")]
    TimedOut(u64),
    #[error("scratch directory error: {0}")]
    Scratch(#[source] std::io::Error),
}

/// Faults from one sandboxed run. A nonzero exit code or a killed process is
/// a normal `RunOutput`, not an error; these are faults of the sandbox
/// itself.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("cancelled")]
    Cancelled,
    #[error("failed to spawn sandboxed process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("scratch directory error: {0}")]
    Scratch(#[source] std::io::Error),
    #[error("sandbox i/o fault: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything that can abort a grading before a user-facing verdict exists.
/// The engine maps each of these onto a `SystemError` verdict; none escape
/// the public contract.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("cancelled")]
    Cancelled,
    #[error("overloaded")]
    Overloaded,
    #[error("invalid problem: {0}")]
    InvalidProblem(String),
    #[error("toolchain fault: {0}")]
    Toolchain(#[from] ToolchainError),
    #[error("sandbox fault: {0}")]
    Sandbox(SandboxError),
    #[error("internal fault: {0}")]
    Internal(String),
}

impl From<SandboxError> for GradeError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Cancelled => GradeError::Cancelled,
            other => GradeError::Sandbox(other),
        }
    }
}
