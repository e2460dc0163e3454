//! # MORT - Mutation-guided Test Generation
//!
//! Generates concern-targeted mutants of a Python module, validates each one
//! in an isolated sandbox and keeps only those paired with a killing test.
//!
//! ## Architecture
//!
//! - **Sandbox Manager**: dependency-provisioned master copy plus per-worker clones
//! - **Test Runner**: framework detection, timeout-bounded execution, outcome classification
//! - **Mutation Pipeline**: generation, syntactic/build/equivalence gates, test cross-validation
//! - **Parallel Scheduler**: bounded thread pool, one lazily-created sandbox per worker
//! - **Workflow Orchestrator**: dedup against prior runs, chunking, teardown
//! - **Oracle Inference**: several mutants per chunk generalised into an oracle,
//!   whose test is run against the original to surface latent bugs
//!
//! ## Example
//!
//! ```no_run
//! use mort::{build_orchestrator, llm::CommandClient, MortConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = MortConfig::default();
//!     let client = Arc::new(CommandClient::from_argv(&["llm".to_string()])?);
//!     let mut orchestrator = build_orchestrator(&config, Path::new("."), client)?;
//!
//!     let report = orchestrator.run_workflow(Path::new("app/users.py"), Path::new("tests/test_users.py"))?;
//!     orchestrator.metadata_store(Path::new("app/users.py")).persist(&report)?;
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod framework;
pub mod llm;
pub mod logging;
pub mod metadata;
pub mod normalize;
pub mod oracle;
pub mod pipeline;
pub mod process;
pub mod runner;
pub mod sandbox;
pub mod scheduler;
pub mod stitch;
pub mod types;
pub mod workflow;

pub use config::{MortConfig, RuntimeMode};
pub use error::{MortError, Result};
pub use metadata::MetadataStore;
pub use oracle::{OracleOrchestrator, OracleReport};
pub use pipeline::{MutationPipeline, RunInputs};
pub use runner::{TestExecutor, TestOutcome, TestRunner};
pub use sandbox::{SandboxManager, SandboxProvider};
pub use scheduler::{ParallelScheduler, SchedulerSummary};
pub use types::*;
pub use workflow::WorkflowOrchestrator;

use llm::{CompletionClient, LlmCollaborators};
use oracle::{FileReview, OracleReviewer};
use sandbox::{RuntimeProvisioner, SystemProvisioner, VenvProvisioner};
use std::path::Path;
use std::sync::Arc;

/// Runtime provisioner selected by `[sandbox] runtime`.
pub fn provisioner_from_config(config: &MortConfig) -> Box<dyn RuntimeProvisioner> {
    match config.sandbox.runtime {
        RuntimeMode::Venv => Box::new(VenvProvisioner::new(
            config.sandbox.interpreter.clone(),
            config.sandbox.venv_dir.clone(),
        )),
        RuntimeMode::System => Box::new(SystemProvisioner {
            interpreter: config.sandbox.interpreter.clone(),
        }),
    }
}

/// Wire the stock components for `repo`: indentation chunker, subprocess test
/// runner and all four collaborators over `client`.
pub fn build_orchestrator(
    config: &MortConfig,
    repo: &Path,
    client: Arc<dyn CompletionClient>,
) -> Result<WorkflowOrchestrator> {
    config.validate()?;
    log::info!("Repository: {}", repo.display());
    log::info!("Workers: {}", config.execution.worker_count());
    log::info!("Test timeout: {}s", config.execution.test_timeout().as_secs());
    log::info!("Runtime: {:?}", config.sandbox.runtime);
    log::info!("Judge: {}", if config.judge.enabled { "enabled" } else { "disabled" });

    let sandbox = SandboxManager::new(repo, &config.sandbox.temp_dir, provisioner_from_config(config))?;
    let collaborators = Arc::new(LlmCollaborators::new(client));
    let executor = Arc::new(TestRunner::new(config.execution.test_timeout()));

    let mut pipeline = MutationPipeline::new(
        collaborators.clone(),
        collaborators.clone(),
        collaborators.clone(),
        executor,
        config.concern.clone(),
    );
    if config.judge.enabled {
        pipeline = pipeline.with_judge(collaborators);
    }

    Ok(WorkflowOrchestrator::new(
        sandbox,
        Arc::new(chunker::IndentChunker),
        pipeline,
        config,
    ))
}

/// Wire oracle inference for `repo` over `client`. Oracles are written under
/// `[oracle] output_dir` for review; with `review = true` the run pauses on
/// stdin after each one.
pub fn build_oracle_orchestrator(
    config: &MortConfig,
    repo: &Path,
    client: Arc<dyn CompletionClient>,
) -> Result<OracleOrchestrator> {
    config.validate()?;
    log::info!("Repository: {}", repo.display());
    log::info!("Mutants per chunk: {} (keeping at most {})", config.oracle.mutants, config.oracle.max_valid);
    log::info!("Oracle review: {}", if config.oracle.review { "interactive" } else { "file only" });

    let sandbox = SandboxManager::new(repo, &config.sandbox.temp_dir, provisioner_from_config(config))?;
    let collaborators = Arc::new(LlmCollaborators::new(client));
    let executor = Arc::new(TestRunner::new(config.execution.test_timeout()));
    let reviewer: Arc<dyn OracleReviewer> = if config.oracle.review {
        Arc::new(FileReview::interactive(&config.oracle.output_dir))
    } else {
        Arc::new(FileReview::new(&config.oracle.output_dir))
    };

    let pipeline = oracle::OraclePipeline::new(
        collaborators.clone(),
        collaborators,
        executor,
        reviewer,
        config.concern.clone(),
        &config.oracle,
    );
    Ok(OracleOrchestrator::new(
        sandbox,
        Arc::new(chunker::IndentChunker),
        pipeline,
        config,
    ))
}
