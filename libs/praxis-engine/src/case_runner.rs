/// Case Runner - One Artifact, All Test Cases
///
/// **Core Responsibility:**
/// Drive the sandbox across a problem's test cases in authored order and
/// judge each run, so first-failure reporting is deterministic and
/// reproducible.
///
/// Cases for one submission never run in parallel: the compiled artifact is
/// not guaranteed safe for concurrent execution, and reordering would break
/// fail-fast semantics. One run-pool slot is held per case, never longer
/// than one run.
use praxis_common::types::{CaseFailure, CaseResult, ProblemDefinition, TestCase};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::comparator;
use crate::error::GradeError;
use crate::sandbox::{RunOutput, Sandbox};
use crate::toolchain::Artifact;

/// Execute the problem's cases against one compiled artifact.
///
/// Under fail-fast the returned vector stops after the first failing case;
/// later cases were never attempted, which is distinct from attempted and
/// failed.
pub async fn run_cases(
    sandbox: &dyn Sandbox,
    artifact: &Artifact,
    problem: &ProblemDefinition,
    run_slots: &Semaphore,
    cancel: &CancelToken,
) -> Result<Vec<CaseResult>, GradeError> {
    let mut results = Vec::with_capacity(problem.test_cases.len());

    for (index, case) in problem.test_cases.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(GradeError::Cancelled);
        }

        let slot = tokio::select! {
            permit = run_slots.acquire() => permit
                .map_err(|_| GradeError::Internal("run pool closed".to_string()))?,
            _ = cancel.cancelled() => return Err(GradeError::Cancelled),
        };

        let output = sandbox
            .run(artifact.binary(), &case.input, &problem.limits, cancel)
            .await?;
        drop(slot);

        let result = judge_case(case, &output, problem);
        debug!(
            case = index,
            label = %result.label,
            passed = result.passed,
            failure = ?result.failure,
            duration_ms = result.duration_ms,
            "case judged"
        );

        let passed = result.passed;
        results.push(result);

        if !passed && problem.fail_fast {
            debug!(failed_case = index, "fail-fast, skipping remaining cases");
            break;
        }
    }

    Ok(results)
}

/// A case passes iff the run stayed within its budgets, exited with the
/// expected code, and the comparator accepts the output. The first failing
/// check, in that order, becomes the recorded reason.
fn judge_case(case: &TestCase, output: &RunOutput, problem: &ProblemDefinition) -> CaseResult {
    let failure = if output.timed_out {
        Some(CaseFailure::TimedOut)
    } else if output.memory_exceeded {
        Some(CaseFailure::MemoryExceeded)
    } else if output.exit_code != Some(problem.expected_exit_code) {
        Some(CaseFailure::NonZeroExit)
    } else if !comparator::compare(&output.stdout, &case.expected_output, &problem.compare) {
        Some(CaseFailure::OutputMismatch)
    } else {
        None
    };

    CaseResult {
        label: case.label.clone(),
        passed: failure.is_none(),
        actual_output: output.stdout.clone(),
        output_truncated: output.stdout_truncated,
        exit_code: output.exit_code,
        timed_out: output.timed_out,
        memory_exceeded: output.memory_exceeded,
        duration_ms: output.duration_ms,
        peak_memory_bytes: output.peak_memory_bytes,
        failure,
    }
}
