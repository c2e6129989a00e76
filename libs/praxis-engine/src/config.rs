// Engine configuration: worker pool sizes, scratch space, compiler command.
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// External compiler invocation. The engine drives it through a narrow
/// interface and never interprets its output beyond exit code and stderr.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("g++"),
            args: vec![
                "-O2".to_string(),
                "-std=c++17".to_string(),
                "-pipe".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Simultaneous compilations across all gradings.
    pub max_concurrent_compiles: usize,
    /// Simultaneous sandboxed runs across all gradings. Typically larger
    /// than the compile pool; runs are cheaper than compiles.
    pub max_concurrent_runs: usize,
    /// Admission ceiling. `None` queues arrivals without bound (FIFO);
    /// `Some(n)` fails the (n+1)th in-flight grading fast as overloaded.
    pub max_pending: Option<usize>,
    /// Root under which every grading gets its own scratch directory.
    pub scratch_root: PathBuf,
    pub compile_timeout_ms: u64,
    pub compiler: CompilerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_compiles: 2,
            max_concurrent_runs: 8,
            max_pending: None,
            scratch_root: std::env::temp_dir().join("praxis"),
            compile_timeout_ms: 10_000,
            compiler: CompilerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("engine config file not found: {}", config_path.display());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;

        let config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_compiles == 0 {
            bail!("max_concurrent_compiles must be at least 1");
        }
        if self.max_concurrent_runs == 0 {
            bail!("max_concurrent_runs must be at least 1");
        }
        if self.max_pending == Some(0) {
            bail!("max_pending of 0 would reject every submission");
        }
        Ok(())
    }
}
