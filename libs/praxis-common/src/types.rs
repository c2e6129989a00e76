use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Serde representation for output/input byte fields.
///
/// Problem files are authored by hand, so UTF-8 payloads read and write as
/// plain JSON strings. Anything a graded program actually printed may be
/// arbitrary bytes, and those serialize as a byte array instead. Either form
/// round-trips byte-for-byte.
pub mod byte_field {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Raw(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(value) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => serializer.collect_seq(value.iter()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.into_bytes(),
            Repr::Raw(bytes) => bytes,
        })
    }
}

/// Resource budget for one sandboxed run.
///
/// CPU and wall clock are enforced independently: a spinning loop burns the
/// CPU budget, a program blocked on stdin burns the wall budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub cpu_time_ms: u64,
    pub wall_time_ms: u64,
    pub memory_bytes: u64,
    pub output_byte_cap: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time_ms: 2_000,
            wall_time_ms: 5_000,
            memory_bytes: 256 * 1024 * 1024,
            output_byte_cap: 64 * 1024,
        }
    }
}

/// Output comparison policy, explicit per problem.
///
/// Defaults match beginner stdout grading: a missing trailing newline or a
/// space at the end of a line is not a wrong answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparePolicy {
    pub trim_trailing_whitespace: bool,
    pub trim_trailing_newlines: bool,
    pub collapse_internal_whitespace: bool,
}

impl Default for ComparePolicy {
    fn default() -> Self {
        Self {
            trim_trailing_whitespace: true,
            trim_trailing_newlines: true,
            collapse_internal_whitespace: false,
        }
    }
}

/// One (input, expected output) pair. Case order within a problem is
/// authored order and drives first-failure reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub label: String,
    #[serde(with = "byte_field", default)]
    pub input: Vec<u8>,
    #[serde(with = "byte_field", default)]
    pub expected_output: Vec<u8>,
}

/// Immutable, offline-authored problem definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDefinition {
    pub id: String,
    #[serde(default)]
    pub starter_source: String,
    /// Canonical solution used only for self-test, never part of grading.
    #[serde(default)]
    pub reference_source: Option<String>,
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub compare: ComparePolicy,
    /// Exit code a correct run must report. 0 for almost every problem.
    #[serde(default)]
    pub expected_exit_code: i32,
    /// Stop grading at the first failing case instead of running all cases.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
}

fn default_fail_fast() -> bool {
    true
}

impl ProblemDefinition {
    pub fn validate(&self) -> Result<(), String> {
        if self.test_cases.is_empty() {
            return Err(format!("problem '{}' has no test cases", self.id));
        }
        Ok(())
    }
}

/// One grading request. Created by the caller, consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub problem_id: String,
    pub source_code: String,
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(problem_id: impl Into<String>, source_code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            problem_id: problem_id.into(),
            source_code: source_code.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Why a specific attempted case did not pass. Recorded distinctly so the
/// presentation layer can say "timed out" rather than "wrong answer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseFailure {
    TimedOut,
    MemoryExceeded,
    NonZeroExit,
    OutputMismatch,
}

/// Outcome of one attempted test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub label: String,
    pub passed: bool,
    #[serde(with = "byte_field", default)]
    pub actual_output: Vec<u8>,
    /// Output was cut at the problem's byte cap. Explicit flag, never an
    /// inline marker string.
    pub output_truncated: bool,
    /// None when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub memory_exceeded: bool,
    pub duration_ms: u64,
    pub peak_memory_bytes: u64,
    pub failure: Option<CaseFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    /// The submission did not compile; no case was attempted.
    CompileError,
    /// Every case was attempted and passed.
    Passed,
    /// An attempted case did not pass.
    Failed,
    /// The program itself faulted (nonzero exit or fatal signal) before a
    /// plain output mismatch was observed.
    Crashed,
    /// Infrastructure fault, cancellation, or overload. Never the
    /// learner's fault.
    SystemError,
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VerdictStatus::CompileError => "compile_error",
            VerdictStatus::Passed => "passed",
            VerdictStatus::Failed => "failed",
            VerdictStatus::Crashed => "crashed",
            VerdictStatus::SystemError => "system_error",
        };
        f.write_str(s)
    }
}

/// First non-passing case, by authored index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirstFailure {
    pub index: usize,
    pub case: CaseResult,
}

/// Terminal, immutable outcome of one grading.
///
/// `case_results` mirrors the authored case order and is truncated after the
/// first failure when the problem grades fail-fast; cases absent from the
/// list were never attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    /// Raw toolchain stderr. Present only for `CompileError`.
    #[serde(default)]
    pub compile_diagnostics: Option<String>,
    /// Infrastructure diagnostic. Present only for `SystemError`.
    #[serde(default)]
    pub system_diagnostics: Option<String>,
    pub case_results: Vec<CaseResult>,
    pub first_failure: Option<FirstFailure>,
    pub total_duration_ms: u64,
    pub peak_memory_bytes: u64,
}

impl Verdict {
    pub fn compile_error(diagnostics: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::CompileError,
            compile_diagnostics: Some(diagnostics.into()),
            system_diagnostics: None,
            case_results: Vec::new(),
            first_failure: None,
            total_duration_ms: 0,
            peak_memory_bytes: 0,
        }
    }

    pub fn system_error(diagnostics: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::SystemError,
            compile_diagnostics: None,
            system_diagnostics: Some(diagnostics.into()),
            case_results: Vec::new(),
            first_failure: None,
            total_duration_ms: 0,
            peak_memory_bytes: 0,
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == VerdictStatus::Passed
    }
}
