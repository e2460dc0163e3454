//! Workflow Orchestrator - top-level driver for one code file
//!
//! Loads the prior run's mutation index, builds the master sandbox, chunks the
//! code file and hands the mutable chunks to the [`ParallelScheduler`].
//! Persisting the report is left to the caller (see [`crate::metadata`]).

use crate::collaborators::Chunker;
use crate::config::{ExecutionConfig, MortConfig};
use crate::error::{MortError, Result};
use crate::metadata::MetadataStore;
use crate::pipeline::{MutationPipeline, RunInputs};
use crate::sandbox::SandboxManager;
use crate::scheduler::ParallelScheduler;
use crate::types::{Chunk, WorkflowReport};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub struct WorkflowOrchestrator {
    sandbox: SandboxManager,
    chunker: Arc<dyn Chunker>,
    pipeline: MutationPipeline,
    execution: ExecutionConfig,
    exclude: Vec<String>,
    output_dir: PathBuf,
}

impl WorkflowOrchestrator {
    pub fn new(
        sandbox: SandboxManager,
        chunker: Arc<dyn Chunker>,
        pipeline: MutationPipeline,
        config: &MortConfig,
    ) -> Self {
        Self {
            sandbox,
            chunker,
            pipeline,
            execution: config.execution.clone(),
            exclude: config.sandbox.exclude.clone(),
            output_dir: config.output_dir.clone(),
        }
    }

    pub fn sandbox(&self) -> &SandboxManager {
        &self.sandbox
    }

    /// Metadata store holding results for `code_file`.
    pub fn metadata_store(&self, code_file: &Path) -> MetadataStore {
        MetadataStore::for_code_file(&self.output_dir, code_file)
    }

    /// Run the whole validation workflow for `code_file` against `test_file`.
    ///
    /// Returns `Err` only when the run could not start (sandbox provisioning,
    /// unreadable inputs, chunking). A run in which every chunk was discarded
    /// is still `Ok`.
    pub fn run_workflow(&mut self, code_file: &Path, test_file: &Path) -> Result<WorkflowReport> {
        let start = Instant::now();
        log::info!("==================================================");
        log::info!("MORT workflow: {}", code_file.display());
        log::info!("Tests: {}", test_file.display());
        log::info!("==================================================");

        let existing_ids = self.metadata_store(code_file).load_existing_ids();

        let code_relpath = self.sandbox.get_relative_path(code_file)?;
        let test_relpath = self.sandbox.get_relative_path(test_file)?;
        log::info!("Relative paths: code={}, test={}", code_relpath.display(), test_relpath.display());

        let master = self.sandbox.create_master_copy(self.exclude.as_slice())?;
        log::info!("Master sandbox ready: {}", master.display());

        let code = fs::read_to_string(code_file).map_err(|e| MortError::io(code_file, e))?;
        let existing_tests = fs::read_to_string(test_file).map_err(|e| MortError::io(test_file, e))?;

        let file_data = self
            .chunker
            .extract_chunks(&code, &code_relpath.to_string_lossy())?;
        let mut chunks: Vec<&Chunk> = file_data.mutable_chunks();
        if let Some(limit) = self.execution.max_chunks {
            if chunks.len() > limit {
                log::info!("Limiting run to {} of {} mutable chunks", limit, chunks.len());
                chunks.truncate(limit);
            }
        }
        log::info!(
            "Found {} chunks ({} mutable, {} already processed)",
            file_data.chunks.len(),
            chunks.len(),
            chunks.iter().filter(|c| existing_ids.contains(&c.chunk_id)).count()
        );

        let inputs = RunInputs {
            file_data: &file_data,
            existing_tests: &existing_tests,
            existing_ids: &existing_ids,
        };
        let scheduler = ParallelScheduler::new(
            &self.pipeline,
            &self.sandbox,
            self.execution.worker_count(),
            code_relpath,
            test_relpath,
        );
        let mut summary = scheduler.run(&chunks, inputs);

        match self.sandbox.cleanup_worker_copies() {
            Ok(removed) => log::info!("Removed {} worker sandboxes", removed),
            Err(e) => log::warn!("Worker sandbox cleanup failed: {}", e),
        }

        // Completion order is nondeterministic; report in file order.
        let position: HashMap<&str, usize> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.chunk_id.as_str(), i))
            .collect();
        summary
            .accepted
            .sort_by_key(|r| position.get(r.chunk_id.as_str()).copied().unwrap_or(usize::MAX));

        for (chunk_id, reason) in &summary.failed {
            log::debug!("  {}: {}", chunk_id, reason);
        }
        log::info!("==================================================");
        log::info!(
            "WORKFLOW COMPLETE in {:.1}s: {} successful, {} skipped, {} failed (of {})",
            start.elapsed().as_secs_f64(),
            summary.accepted.len(),
            summary.skipped.len(),
            summary.failed.len(),
            chunks.len()
        );
        log::info!("==================================================");

        let total_chunks = chunks.len();
        Ok(WorkflowReport {
            successful_count: summary.accepted.len(),
            skipped_count: summary.skipped.len(),
            failed_count: summary.failed.len(),
            mutants: summary.accepted,
            total_chunks,
            file_data,
        })
    }
}
