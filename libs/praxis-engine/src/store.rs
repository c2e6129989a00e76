//! Problem catalog loaded from disk. The engine only reads from it; problem
//! authoring happens out of band.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use praxis_common::types::ProblemDefinition;
use tracing::{info, warn};

pub trait ProblemStore: Send + Sync {
    fn get(&self, id: &str) -> Option<ProblemDefinition>;
    fn ids(&self) -> Vec<String>;
}

/// Store backed by a directory of `*.json` problem definitions, loaded once
/// at startup. Invalid files fail the load rather than silently vanishing
/// from the catalog.
#[derive(Debug)]
pub struct DirProblemStore {
    problems: HashMap<String, ProblemDefinition>,
}

impl DirProblemStore {
    pub fn load(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read problem directory {}", dir.display()))?;

        let mut problems = HashMap::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let problem: ProblemDefinition = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            if let Err(reason) = problem.validate() {
                bail!("invalid problem in {}: {}", path.display(), reason);
            }

            if let Some(previous) = problems.insert(problem.id.clone(), problem) {
                warn!(problem_id = %previous.id, "duplicate problem id, later file wins");
            }
        }

        info!(count = problems.len(), dir = %dir.display(), "problem catalog loaded");
        Ok(Self { problems })
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

impl ProblemStore for DirProblemStore {
    fn get(&self, id: &str) -> Option<ProblemDefinition> {
        self.problems.get(id).cloned()
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.problems.keys().cloned().collect();
        ids.sort();
        ids
    }
}
