/// Grading Engine - High-Level Orchestration
///
/// **Responsibility:**
/// Own the full Submission -> Verdict lifecycle: admission, compile-once,
/// run-many via the case runner, verdict assembly.
///
/// **State machine:**
/// Queued -> Compiling -> CompileError (terminal)
///                     -> Running -> Passed | Failed | Crashed (terminal)
/// Any internal fault, cancellation, or overload -> SystemError (terminal).
/// No fault ever escapes `grade` as an unstructured error, and nothing is
/// retried silently - the caller may resubmit explicitly.
///
/// **Resource model:**
/// The compile and run semaphores are the only shared mutable state and are
/// owned per engine instance, so independent engines (one per tenant, one
/// per test) coexist without ambient globals. Tokio semaphores are fair, so
/// queued submissions proceed in arrival order.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use praxis_common::types::{
    CaseFailure, CaseResult, FirstFailure, ProblemDefinition, Submission, Verdict, VerdictStatus,
};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::case_runner;
use crate::config::EngineConfig;
use crate::error::GradeError;
use crate::sandbox::{ProcessSandbox, Sandbox};
use crate::store::ProblemStore;
use crate::toolchain::{GccToolchain, Toolchain};

/// Collaborator notified when a submission passes, so the reward ledger can
/// do its bookkeeping. The engine only emits the event.
pub trait ProgressSink: Send + Sync {
    fn problem_passed(&self, problem_id: &str, submission_id: Uuid, submitted_at: DateTime<Utc>);
}

pub struct GradingEngine {
    toolchain: Arc<dyn Toolchain>,
    sandbox: Arc<dyn Sandbox>,
    compile_slots: Arc<Semaphore>,
    run_slots: Arc<Semaphore>,
    max_pending: Option<usize>,
    pending: Arc<AtomicUsize>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl GradingEngine {
    /// Engine with the production toolchain and process sandbox.
    pub fn new(config: &EngineConfig) -> Self {
        let toolchain = Arc::new(GccToolchain::new(config));
        let sandbox = Arc::new(ProcessSandbox::new(config.scratch_root.clone()));
        Self::with_parts(toolchain, sandbox, config)
    }

    /// Engine over explicit collaborators. This is the seam for swapping in
    /// a remote execution service or test doubles.
    pub fn with_parts(
        toolchain: Arc<dyn Toolchain>,
        sandbox: Arc<dyn Sandbox>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            toolchain,
            sandbox,
            compile_slots: Arc::new(Semaphore::new(config.max_concurrent_compiles)),
            run_slots: Arc::new(Semaphore::new(config.max_concurrent_runs)),
            max_pending: config.max_pending,
            pending: Arc::new(AtomicUsize::new(0)),
            progress: None,
        }
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Grade one submission to completion. Suspends for compilation and
    /// every sandboxed run; always returns a verdict, never an error.
    pub async fn grade(&self, problem: &ProblemDefinition, submission: &Submission) -> Verdict {
        self.grade_with_cancel(problem, submission, &CancelToken::new())
            .await
    }

    /// Resolve the problem from a read-only store, then grade.
    pub async fn grade_by_id(
        &self,
        store: &dyn ProblemStore,
        problem_id: &str,
        source_code: &str,
    ) -> Verdict {
        match store.get(problem_id) {
            Some(problem) => {
                let submission = Submission::new(problem_id, source_code);
                self.grade(&problem, &submission).await
            }
            None => Verdict::system_error(format!("unknown problem '{problem_id}'")),
        }
    }

    /// Start a grading as a cancellable task.
    pub fn submit(
        self: &Arc<Self>,
        problem: ProblemDefinition,
        submission: Submission,
    ) -> GradingHandle {
        let id = submission.id;
        let cancel = CancelToken::new();
        let engine = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            engine
                .grade_with_cancel(&problem, &submission, &token)
                .await
        });
        GradingHandle { id, cancel, task }
    }

    pub async fn grade_with_cancel(
        &self,
        problem: &ProblemDefinition,
        submission: &Submission,
        cancel: &CancelToken,
    ) -> Verdict {
        match self.try_grade(problem, submission, cancel).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(
                    submission_id = %submission.id,
                    problem_id = %problem.id,
                    error = %err,
                    "grading aborted"
                );
                Verdict::system_error(err.to_string())
            }
        }
    }

    #[instrument(
        skip(self, problem, submission, cancel),
        fields(
            submission_id = %submission.id,
            problem_id = %problem.id,
            case_count = problem.test_cases.len()
        )
    )]
    async fn try_grade(
        &self,
        problem: &ProblemDefinition,
        submission: &Submission,
        cancel: &CancelToken,
    ) -> Result<Verdict, GradeError> {
        let started = Instant::now();
        let _admission = self.admit()?;
        problem.validate().map_err(GradeError::InvalidProblem)?;

        if cancel.is_cancelled() {
            return Err(GradeError::Cancelled);
        }

        // Compile exactly once; the artifact serves every case.
        let compiled = {
            let _slot = tokio::select! {
                permit = self.compile_slots.acquire() => permit
                    .map_err(|_| GradeError::Internal("compile pool closed".to_string()))?,
                _ = cancel.cancelled() => return Err(GradeError::Cancelled),
            };
            tokio::select! {
                result = self.toolchain.compile(&submission.source_code) => result?,
                _ = cancel.cancelled() => return Err(GradeError::Cancelled),
            }
        };

        if !compiled.succeeded {
            info!(submission_id = %submission.id, "compile error");
            let mut verdict = Verdict::compile_error(compiled.diagnostics);
            verdict.total_duration_ms = started.elapsed().as_millis() as u64;
            return Ok(verdict);
        }

        let artifact = compiled.artifact.ok_or_else(|| {
            GradeError::Internal("toolchain reported success without an artifact".to_string())
        })?;

        let case_results = case_runner::run_cases(
            self.sandbox.as_ref(),
            &artifact,
            problem,
            &self.run_slots,
            cancel,
        )
        .await?;
        // Artifact (and its scratch directory) is dropped here on every
        // path out of this function.
        drop(artifact);

        let verdict = assemble_verdict(problem, case_results, started);
        info!(
            submission_id = %submission.id,
            status = %verdict.status,
            cases = verdict.case_results.len(),
            total_ms = verdict.total_duration_ms,
            "grading complete"
        );

        if verdict.is_passed() {
            if let Some(sink) = &self.progress {
                sink.problem_passed(&problem.id, submission.id, submission.submitted_at);
            }
        }

        Ok(verdict)
    }

    /// FIFO admission with an optional ceiling: beyond capacity the caller
    /// gets an immediate overload instead of an unbounded queue.
    fn admit(&self) -> Result<AdmissionGuard, GradeError> {
        let in_flight = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.max_pending {
            if in_flight > max {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                warn!(in_flight, max, "admission ceiling hit");
                return Err(GradeError::Overloaded);
            }
        }
        Ok(AdmissionGuard(Arc::clone(&self.pending)))
    }
}

struct AdmissionGuard(Arc<AtomicUsize>);

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A grading in flight: await the verdict, or cancel it. Cancellation tears
/// down any in-flight sandbox process and reports a system error, never a
/// misleading failure.
pub struct GradingHandle {
    id: Uuid,
    cancel: CancelToken,
    task: JoinHandle<Verdict>,
}

impl GradingHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn verdict(self) -> Verdict {
        match self.task.await {
            Ok(verdict) => verdict,
            Err(err) => Verdict::system_error(format!("grading task failed: {err}")),
        }
    }
}

fn assemble_verdict(
    problem: &ProblemDefinition,
    case_results: Vec<CaseResult>,
    started: Instant,
) -> Verdict {
    let attempted_all = case_results.len() == problem.test_cases.len();
    let first_failure = case_results
        .iter()
        .position(|c| !c.passed)
        .map(|index| FirstFailure {
            index,
            case: case_results[index].clone(),
        });

    // The case runner only stops early after a failure.
    debug_assert!(attempted_all || first_failure.is_some());

    let status = match &first_failure {
        None => VerdictStatus::Passed,
        Some(failure) if failure.case.failure == Some(CaseFailure::NonZeroExit) => {
            VerdictStatus::Crashed
        }
        Some(_) => VerdictStatus::Failed,
    };

    let peak_memory_bytes = case_results
        .iter()
        .map(|c| c.peak_memory_bytes)
        .max()
        .unwrap_or(0);

    Verdict {
        status,
        compile_diagnostics: None,
        system_diagnostics: None,
        case_results,
        first_failure,
        total_duration_ms: started.elapsed().as_millis() as u64,
        peak_memory_bytes,
    }
}
