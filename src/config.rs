//! Run configuration.
//!
//! Loaded from a TOML file (every field has a default), then adjusted by
//! `MORT_*` environment variables, then by CLI flags in the binary.

use crate::error::{MortError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Patterns excluded when copying a repository into the sandbox.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    "__pycache__",
    "*.pyc",
    ".pytest_cache",
    ".venv",
    ".venv_testing",
    "venv",
    "env",
    "node_modules",
    ".chunk_cache",
    "outputs",
    "oracle_outputs",
    ".temp_testing",
    ".DS_Store",
    "*.egg-info",
    ".tox",
    "htmlcov",
    "*.so",
    "*.dylib",
    "*.dll",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MortConfig {
    pub sandbox: SandboxConfig,
    pub execution: ExecutionConfig,
    pub concern: ConcernConfig,
    pub judge: JudgeConfig,
    pub llm: LlmConfig,
    pub oracle: OracleConfig,
    /// Where mutants, tests and metadata.json are written
    pub output_dir: PathBuf,
}

impl Default for MortConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            execution: ExecutionConfig::default(),
            concern: ConcernConfig::default(),
            judge: JudgeConfig::default(),
            llm: LlmConfig::default(),
            oracle: OracleConfig::default(),
            output_dir: PathBuf::from("outputs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Isolated virtualenv inside the master copy, dependencies installed
    Venv,
    /// Use `interpreter` as-is, no installation
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub temp_dir: PathBuf,
    pub exclude: Vec<String>,
    pub runtime: RuntimeMode,
    /// Interpreter used to create the venv (or run tests in `system` mode)
    pub interpreter: PathBuf,
    pub venv_dir: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from(".temp_testing"),
            exclude: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            runtime: RuntimeMode::Venv,
            interpreter: PathBuf::from("python3"),
            venv_dir: ".venv_testing".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Worker threads; must be at least 1
    pub max_workers: usize,
    pub test_timeout_secs: u64,
    /// Optional cap on mutable chunks per run; `None` processes all of them
    pub max_chunks: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            test_timeout_secs: 20,
            max_chunks: None,
        }
    }
}

impl ExecutionConfig {
    pub fn worker_count(&self) -> usize {
        self.max_workers.max(1)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs.max(1))
    }
}

/// The concern category mutations should target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcernConfig {
    pub description: String,
    /// A concrete example of the violation pattern
    pub example_diff: String,
}

impl Default for ConcernConfig {
    fn default() -> Self {
        Self {
            description: "Privacy violations in user data handling:\n\
                - Logging personally identifiable information (emails, names, IDs) without sanitization\n\
                - Exposing password hashes, salts, or authentication tokens in responses\n\
                - Missing authorization checks allowing unauthorized data access\n\
                - Storing sensitive data unencrypted or in application logs"
                .to_string(),
            example_diff: "Real bug example: User profile endpoint returned password_hash and \
                salt_hex fields in JSON response, exposing sensitive authentication data. \
                Fix removed these fields from public() method."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub enabled: bool,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Oracle inference (`mort oracle`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Mutants requested per chunk
    pub mutants: usize,
    /// Filtering stops once this many mutants survive
    pub max_valid: usize,
    /// Pause for a human edit of each inferred oracle
    pub review: bool,
    /// Where oracle tests, metadata.json and bug_report.txt are written
    pub output_dir: PathBuf,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            mutants: 10,
            max_valid: 5,
            review: false,
            output_dir: PathBuf::from("oracle_outputs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    Command,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    /// Program and arguments; the prompt is written to its stdin
    pub command: Vec<String>,
    pub ollama_url: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Command,
            command: Vec::new(),
            ollama_url: "http://127.0.0.1:11434".to_string(),
            model: "llama3.1".to_string(),
        }
    }
}

impl MortConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| MortError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run can honour.
    pub fn validate(&self) -> Result<()> {
        if self.execution.max_workers == 0 {
            return Err(MortError::Config(
                "execution.max_workers must be at least 1".to_string(),
            ));
        }
        if self.oracle.mutants == 0 || self.oracle.max_valid == 0 {
            return Err(MortError::Config(
                "oracle.mutants and oracle.max_valid must be at least 1".to_string(),
            ));
        }
        let cpus = num_cpus::get();
        if self.execution.max_workers > cpus {
            log::warn!(
                "max_workers = {} exceeds the {} available CPUs; test runs will contend",
                self.execution.max_workers,
                cpus
            );
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        log::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| MortError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if given (defaults otherwise) and apply environment overrides.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(workers) = lookup("MORT_MAX_WORKERS")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|v| (1..=64).contains(v))
        {
            self.execution.max_workers = workers;
        }
        if let Some(secs) = lookup("MORT_TEST_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|v| (1..=3600).contains(v))
        {
            self.execution.test_timeout_secs = secs;
        }
        if let Some(url) = lookup("MORT_OLLAMA_URL").filter(|s| !s.trim().is_empty()) {
            self.llm.ollama_url = url;
        }
        if let Some(model) = lookup("MORT_MODEL").filter(|s| !s.trim().is_empty()) {
            self.llm.model = model;
        }
    }
}
