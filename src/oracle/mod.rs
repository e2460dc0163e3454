//! Oracle Inference - latent bug detection from mutant analysis
//!
//! The mutation workflow keeps one validated mutant per chunk. Oracle
//! inference instead asks for several mutants of a chunk, keeps those that
//! survive the syntactic, parse and equivalence filters, and has the
//! collaborator generalise them into an *oracle*: the properties the original
//! code must satisfy so that every mutant breaks at least one. A test built
//! from the oracle then runs against the unmodified original in a worker
//! sandbox. A failure there means the original already violates its own
//! oracle, which points at a latent bug.
//!
//! Chunks are processed one after another in a single worker sandbox.

pub mod pipeline;
pub mod report;
pub mod review;

pub use pipeline::OraclePipeline;
pub use report::OracleStore;
pub use review::{AcceptOracle, FileReview, OracleReviewer};

use crate::collaborators::Chunker;
use crate::config::MortConfig;
use crate::error::{MortError, Result};
use crate::runner::TestOutcome;
use crate::sandbox::SandboxManager;
use crate::types::{Chunk, ChunkType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// What running the oracle test against the original says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugVerdict {
    /// The oracle test fails on the original
    BugsDetected,
    NoBugs,
    /// The oracle test does not build, so it says nothing either way
    TestDoesNotBuild,
}

impl BugVerdict {
    pub fn from_outcome(outcome: TestOutcome) -> Self {
        match outcome {
            TestOutcome::BuildsPasses => BugVerdict::NoBugs,
            TestOutcome::BuildsFails => BugVerdict::BugsDetected,
            TestOutcome::DoesNotBuild => BugVerdict::TestDoesNotBuild,
        }
    }

    /// `None` when the test did not build.
    pub fn bugs_detected(&self) -> Option<bool> {
        match self {
            BugVerdict::BugsDetected => Some(true),
            BugVerdict::NoBugs => Some(false),
            BugVerdict::TestDoesNotBuild => None,
        }
    }
}

impl fmt::Display for BugVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BugVerdict::BugsDetected => "BUGS DETECTED",
            BugVerdict::NoBugs => "NO BUGS DETECTED",
            BugVerdict::TestDoesNotBuild => "TEST BUILD FAILED",
        })
    }
}

/// Why a chunk produced no oracle verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleAbandon {
    NoMutants,
    NoValidMutants,
    InferenceFailed,
    ReviewFailed,
    TestGenerationFailed,
}

impl OracleAbandon {
    pub fn describe(&self) -> &'static str {
        match self {
            OracleAbandon::NoMutants => "no mutants generated",
            OracleAbandon::NoValidMutants => "no valid mutants after filtering",
            OracleAbandon::InferenceFailed => "failed to infer oracle",
            OracleAbandon::ReviewFailed => "oracle review failed",
            OracleAbandon::TestGenerationFailed => "failed to generate oracle test",
        }
    }
}

impl fmt::Display for OracleAbandon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Everything learned about one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleResult {
    pub chunk_id: String,
    pub chunk_type: ChunkType,
    pub mutants_generated: usize,
    pub valid_mutants: usize,
    /// The oracle after review
    pub oracle: String,
    pub test_code: String,
    pub verdict: BugVerdict,
    /// Valid mutants the oracle test kills; measured only when the original passes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutants_killed: Option<usize>,
}

impl OracleResult {
    pub fn bugs_detected(&self) -> Option<bool> {
        self.verdict.bugs_detected()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleOutcome {
    Completed(OracleResult),
    Abandoned { chunk_id: String, reason: OracleAbandon },
}

impl OracleOutcome {
    pub fn chunk_id(&self) -> &str {
        match self {
            OracleOutcome::Completed(result) => &result.chunk_id,
            OracleOutcome::Abandoned { chunk_id, .. } => chunk_id,
        }
    }

    pub fn completed(&self) -> Option<&OracleResult> {
        match self {
            OracleOutcome::Completed(result) => Some(result),
            OracleOutcome::Abandoned { .. } => None,
        }
    }

    pub fn abandon_reason(&self) -> Option<OracleAbandon> {
        match self {
            OracleOutcome::Abandoned { reason, .. } => Some(*reason),
            OracleOutcome::Completed(_) => None,
        }
    }

    pub(crate) fn abandoned(chunk_id: &str, reason: OracleAbandon) -> Self {
        OracleOutcome::Abandoned {
            chunk_id: chunk_id.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbandonedChunk {
    pub chunk_id: String,
    pub reason: OracleAbandon,
}

/// Aggregate of one oracle run; also the `metadata.json` layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleReport {
    pub code_file: String,
    pub concern: String,
    pub functions_processed: usize,
    pub bugs_found: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    pub results: Vec<OracleResult>,
    #[serde(default)]
    pub abandoned: Vec<AbandonedChunk>,
}

impl OracleReport {
    pub fn from_outcomes(code_file: &str, concern: &str, outcomes: Vec<OracleOutcome>) -> Self {
        let mut results = Vec::new();
        let mut abandoned = Vec::new();
        for outcome in outcomes {
            match outcome {
                OracleOutcome::Completed(result) => results.push(result),
                OracleOutcome::Abandoned { chunk_id, reason } => abandoned.push(AbandonedChunk { chunk_id, reason }),
            }
        }
        let bugs_found = results.iter().filter(|r| r.bugs_detected() == Some(true)).count();

        Self {
            code_file: code_file.to_string(),
            concern: concern.to_string(),
            functions_processed: results.len(),
            bugs_found,
            generated_at: Some(Utc::now()),
            results,
            abandoned,
        }
    }
}

/// Drives oracle inference over one code file.
pub struct OracleOrchestrator {
    sandbox: SandboxManager,
    chunker: Arc<dyn Chunker>,
    pipeline: OraclePipeline,
    exclude: Vec<String>,
    max_chunks: Option<usize>,
    output_dir: PathBuf,
}

impl OracleOrchestrator {
    pub fn new(
        sandbox: SandboxManager,
        chunker: Arc<dyn Chunker>,
        pipeline: OraclePipeline,
        config: &MortConfig,
    ) -> Self {
        Self {
            sandbox,
            chunker,
            pipeline,
            exclude: config.sandbox.exclude.clone(),
            max_chunks: config.execution.max_chunks,
            output_dir: config.oracle.output_dir.clone(),
        }
    }

    pub fn sandbox(&self) -> &SandboxManager {
        &self.sandbox
    }

    /// Store holding oracle results for `code_file`.
    pub fn store(&self, code_file: &Path) -> OracleStore {
        OracleStore::for_code_file(&self.output_dir, code_file)
    }

    /// Infer and check an oracle for every mutable chunk of `code_file`.
    ///
    /// Fails only when the run cannot start; chunks that yield no verdict are
    /// listed in [`OracleReport::abandoned`].
    pub fn run(&mut self, code_file: &Path, test_file: &Path) -> Result<OracleReport> {
        let start = Instant::now();
        log::info!("==================================================");
        log::info!("Oracle inference: {}", code_file.display());
        log::info!("Tests: {}", test_file.display());
        log::info!("==================================================");

        let code_relpath = self.sandbox.get_relative_path(code_file)?;
        let test_relpath = self.sandbox.get_relative_path(test_file)?;

        let code = fs::read_to_string(code_file).map_err(|e| MortError::io(code_file, e))?;
        let existing_tests = fs::read_to_string(test_file).map_err(|e| MortError::io(test_file, e))?;
        let file_data = self
            .chunker
            .extract_chunks(&code, &code_relpath.to_string_lossy())?;

        let mut chunks: Vec<&Chunk> = file_data.mutable_chunks();
        if let Some(limit) = self.max_chunks {
            chunks.truncate(limit);
        }
        log::info!(
            "Found {} chunks, {} suitable for oracle inference",
            file_data.chunks.len(),
            chunks.len()
        );

        let master = self.sandbox.create_master_copy(self.exclude.as_slice())?;
        log::info!("Master sandbox ready: {}", master.display());
        let worker = self.sandbox.create_worker_copy(0)?;
        let target = worker.target(&code_relpath, &test_relpath);

        let mut outcomes = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            log::info!("--- Function {}/{}: {} ---", index + 1, chunks.len(), chunk.chunk_id);
            outcomes.push(
                self.pipeline
                    .process_chunk(chunk, &file_data, &existing_tests, &target),
            );
        }

        if let Err(e) = self.sandbox.cleanup_worker_copies() {
            log::warn!("Worker sandbox cleanup failed: {}", e);
        }

        let report = OracleReport::from_outcomes(
            &file_data.file_path,
            &self.pipeline.concern().description,
            outcomes,
        );
        log::info!("==================================================");
        log::info!(
            "ORACLE INFERENCE COMPLETE in {:.1}s: {} processed, {} with bugs, {} abandoned",
            start.elapsed().as_secs_f64(),
            report.functions_processed,
            report.bugs_found,
            report.abandoned.len()
        );
        log::info!("==================================================");
        Ok(report)
    }
}
