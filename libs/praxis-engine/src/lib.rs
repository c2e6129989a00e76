/// Praxis Grading Engine
///
/// **Core Responsibility:**
/// Turn one untrusted C++ submission plus a problem definition into a single
/// immutable `Verdict`: compile once, run every test case in an isolated
/// process sandbox, compare outputs under the problem's whitespace policy.
///
/// **Architecture:**
/// - `toolchain` knows HOW to compile (external compiler behind a trait)
/// - `sandbox` knows HOW to execute one program under limits
/// - `comparator` knows WHAT counts as matching output
/// - `case_runner` drives the sandbox across a problem's cases
/// - `engine` orchestrates, owns the bounded worker pools, and maps every
///   internal fault into the verdict taxonomy
///
/// No component retains state past one grading, so unrelated submissions
/// grade concurrently without shared mutable state beyond the pools.
pub mod cancel;
pub mod case_runner;
pub mod comparator;
pub mod config;
pub mod engine;
pub mod error;
pub mod sandbox;
pub mod store;
pub mod toolchain;

#[cfg(test)]
pub(crate) mod test_support;

pub use cancel::CancelToken;
pub use config::{CompilerConfig, EngineConfig};
pub use engine::{GradingEngine, GradingHandle, ProgressSink};
pub use error::{GradeError, SandboxError, ToolchainError};
pub use sandbox::{ProcessSandbox, RunOutput, Sandbox};
pub use store::{DirProblemStore, ProblemStore};
pub use toolchain::{Artifact, CompilationResult, GccToolchain, Toolchain};
