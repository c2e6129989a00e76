// CLI commands: grade a submission, verify a problem catalog.
use std::path::Path;

use anyhow::{bail, Context, Result};
use praxis_common::types::{ProblemDefinition, Submission, Verdict, VerdictStatus};
use praxis_engine::{DirProblemStore, EngineConfig, GradingEngine, ProblemStore};

pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

/// Resolve a problem from an explicit JSON file, or by id from the catalog.
fn resolve_problem(problem: &str, problems_dir: &Path) -> Result<ProblemDefinition> {
    let as_path = Path::new(problem);
    if as_path.is_file() {
        let raw = std::fs::read_to_string(as_path)
            .with_context(|| format!("failed to read {}", as_path.display()))?;
        let problem: ProblemDefinition = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", as_path.display()))?;
        return Ok(problem);
    }

    let store = DirProblemStore::load(problems_dir)?;
    store
        .get(problem)
        .with_context(|| format!("no problem '{}' in {}", problem, problems_dir.display()))
}

pub async fn grade(
    config: &EngineConfig,
    problem: &str,
    source: &Path,
    problems_dir: &Path,
    exhaustive: bool,
    json: bool,
) -> Result<i32> {
    let mut problem = resolve_problem(problem, problems_dir)?;
    if exhaustive {
        problem.fail_fast = false;
    }

    let source_code = std::fs::read_to_string(source)
        .with_context(|| format!("failed to read {}", source.display()))?;

    let engine = GradingEngine::new(config);
    let submission = Submission::new(&problem.id, &source_code);
    let verdict = engine.grade(&problem, &submission).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_summary(&problem.id, &verdict);
    }

    Ok(exit_code_for(verdict.status))
}

fn print_summary(problem_id: &str, verdict: &Verdict) {
    println!("{problem_id}: {}", verdict.status);

    match verdict.status {
        VerdictStatus::CompileError => {
            if let Some(diagnostics) = &verdict.compile_diagnostics {
                println!("{diagnostics}");
            }
        }
        VerdictStatus::SystemError => {
            if let Some(diagnostics) = &verdict.system_diagnostics {
                println!("{diagnostics}");
            }
        }
        _ => {
            for (index, case) in verdict.case_results.iter().enumerate() {
                let mark = if case.passed { "ok" } else { "FAIL" };
                println!(
                    "  [{index}] {} .. {mark} ({} ms, {} KB)",
                    case.label,
                    case.duration_ms,
                    case.peak_memory_bytes / 1024
                );
            }
            if let Some(failure) = &verdict.first_failure {
                println!(
                    "first failure: case {} ({}), reason: {:?}",
                    failure.index, failure.case.label, failure.case.failure
                );
            }
            println!(
                "total: {} ms, peak memory: {} KB",
                verdict.total_duration_ms,
                verdict.peak_memory_bytes / 1024
            );
        }
    }
}

fn exit_code_for(status: VerdictStatus) -> i32 {
    match status {
        VerdictStatus::Passed => 0,
        VerdictStatus::CompileError | VerdictStatus::Failed | VerdictStatus::Crashed => 1,
        VerdictStatus::SystemError => 2,
    }
}

/// Grade every reference solution against its own cases. A catalog where
/// a reference does not pass its own problem is broken.
pub async fn check(config: &EngineConfig, problems_dir: &Path) -> Result<i32> {
    let store = DirProblemStore::load(problems_dir)?;
    if store.is_empty() {
        bail!("no problems found in {}", problems_dir.display());
    }

    let engine = GradingEngine::new(config);
    let mut broken = 0usize;
    let mut skipped = 0usize;

    for id in store.ids() {
        let problem = store.get(&id).expect("id came from the store");
        let Some(reference) = problem.reference_source.clone() else {
            println!("{id}: skipped (no reference solution)");
            skipped += 1;
            continue;
        };

        let submission = Submission::new(&id, &reference);
        let verdict = engine.grade(&problem, &submission).await;
        if verdict.is_passed() {
            println!("{id}: ok ({} cases)", verdict.case_results.len());
        } else {
            broken += 1;
            println!("{id}: BROKEN ({})", verdict.status);
            if let Some(failure) = &verdict.first_failure {
                println!(
                    "  case {} ({}): {:?}",
                    failure.index, failure.case.label, failure.case.failure
                );
            }
            if let Some(diagnostics) = verdict
                .compile_diagnostics
                .as_ref()
                .or(verdict.system_diagnostics.as_ref())
            {
                println!("  {diagnostics}");
            }
        }
    }

    println!(
        "checked {} problems: {} broken, {} skipped",
        store.len(),
        broken,
        skipped
    );
    Ok(if broken == 0 { 0 } else { 1 })
}
