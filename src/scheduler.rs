//! Parallel Scheduler - fans chunks out over a bounded pool of OS threads
//!
//! Each worker thread owns a [`WorkerContext`] holding its private sandbox,
//! created on first use and reused for every later chunk on that thread.
//! Chunks are handed out through a crossbeam channel and outcomes come back on
//! a second channel in completion order.

use crate::pipeline::{MutationPipeline, RunInputs};
use crate::sandbox::{SandboxProvider, WorkerSandbox};
use crate::types::{Chunk, ChunkOutcome, DiscardReason, ValidationResult};
use crate::{chunk_info, chunk_warn};
use crossbeam::channel;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Instant;

/// Per-thread state. Never shared between threads.
#[derive(Debug)]
pub struct WorkerContext {
    pub worker_id: usize,
    sandbox: Option<WorkerSandbox>,
    pub processed: usize,
}

impl WorkerContext {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            sandbox: None,
            processed: 0,
        }
    }

    pub fn sandbox(&self) -> Option<&WorkerSandbox> {
        self.sandbox.as_ref()
    }
}

/// Aggregated outcomes of a scheduler run.
#[derive(Debug, Clone, Default)]
pub struct SchedulerSummary {
    pub accepted: Vec<ValidationResult>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, DiscardReason)>,
}

impl SchedulerSummary {
    pub fn record(&mut self, outcome: ChunkOutcome) {
        match outcome {
            ChunkOutcome::Accepted(result) => self.accepted.push(result),
            ChunkOutcome::Skipped { chunk_id } => self.skipped.push(chunk_id),
            ChunkOutcome::Discarded { chunk_id, reason } => self.failed.push((chunk_id, reason)),
        }
    }

    pub fn total(&self) -> usize {
        self.accepted.len() + self.skipped.len() + self.failed.len()
    }
}

pub struct ParallelScheduler<'a> {
    pipeline: &'a MutationPipeline,
    sandboxes: &'a dyn SandboxProvider,
    max_workers: usize,
    code_relpath: PathBuf,
    test_relpath: PathBuf,
}

impl<'a> ParallelScheduler<'a> {
    pub fn new(
        pipeline: &'a MutationPipeline,
        sandboxes: &'a dyn SandboxProvider,
        max_workers: usize,
        code_relpath: PathBuf,
        test_relpath: PathBuf,
    ) -> Self {
        Self {
            pipeline,
            sandboxes,
            max_workers: max_workers.max(1),
            code_relpath,
            test_relpath,
        }
    }

    /// Process every chunk and return the aggregate.
    pub fn run(&self, chunks: &[&Chunk], inputs: RunInputs<'_>) -> SchedulerSummary {
        let total = chunks.len();
        let mut summary = SchedulerSummary::default();
        if total == 0 {
            return summary;
        }

        let workers = self.max_workers.min(total);
        log::info!("Processing {} chunks with {} workers", total, workers);
        let start = Instant::now();

        let (job_tx, job_rx) = channel::unbounded::<(usize, &Chunk)>();
        let (result_tx, result_rx) = channel::unbounded::<ChunkOutcome>();
        for (index, chunk) in chunks.iter().enumerate() {
            // The receiver is alive until the scope below ends.
            let _ = job_tx.send((index, *chunk));
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            let mut spawned = 0;
            for worker_id in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let spawn = std::thread::Builder::new()
                    .name(format!("mort-worker-{}", worker_id))
                    .spawn_scoped(scope, move || {
                        let mut ctx = WorkerContext::new(worker_id);
                        for (index, chunk) in job_rx.iter() {
                            let outcome = self.process_chunk_with_index(&mut ctx, index, total, chunk, &inputs);
                            if result_tx.send(outcome).is_err() {
                                break;
                            }
                        }
                        log::debug!("Worker {} finished after {} chunks", worker_id, ctx.processed);
                    });
                match spawn {
                    Ok(_) => spawned += 1,
                    Err(e) => log::error!("Failed to spawn worker {}: {}", worker_id, e),
                }
            }
            drop(result_tx);

            if spawned == 0 {
                log::warn!("No worker threads available; processing on the calling thread");
                let mut ctx = WorkerContext::new(0);
                for (index, chunk) in job_rx.iter() {
                    summary.record(self.process_chunk_with_index(&mut ctx, index, total, chunk, &inputs));
                }
            }

            for outcome in result_rx.iter() {
                summary.record(outcome);
            }
        });

        log::info!(
            "Scheduler finished in {:.1}s: {} accepted, {} skipped, {} failed",
            start.elapsed().as_secs_f64(),
            summary.accepted.len(),
            summary.skipped.len(),
            summary.failed.len()
        );
        summary
    }

    /// Run one chunk on the calling worker, creating its sandbox if needed.
    ///
    /// Panics inside the pipeline are contained here and reported as
    /// [`DiscardReason::Panicked`].
    pub fn process_chunk_with_index(
        &self,
        ctx: &mut WorkerContext,
        index: usize,
        total: usize,
        chunk: &Chunk,
        inputs: &RunInputs<'_>,
    ) -> ChunkOutcome {
        let id = chunk.chunk_id.as_str();
        ctx.processed += 1;
        chunk_info!(id, "[{}/{}] worker {} picked up chunk", index + 1, total, ctx.worker_id);

        // Known chunks need no sandbox.
        if inputs.existing_ids.contains(id) {
            chunk_info!(id, "Already processed in a previous run - SKIP");
            return ChunkOutcome::Skipped {
                chunk_id: id.to_string(),
            };
        }

        if ctx.sandbox.is_none() {
            match self.sandboxes.create_worker_copy(ctx.worker_id) {
                Ok(sandbox) => {
                    log::info!("Worker {} sandbox: {}", ctx.worker_id, sandbox.path.display());
                    ctx.sandbox = Some(sandbox);
                }
                Err(e) => {
                    chunk_warn!(id, "Worker {} sandbox unavailable: {}", ctx.worker_id, e);
                    return ChunkOutcome::discarded(id, DiscardReason::WorkerSandboxUnavailable);
                }
            }
        }
        let Some(sandbox) = ctx.sandbox.as_ref() else {
            return ChunkOutcome::discarded(id, DiscardReason::WorkerSandboxUnavailable);
        };
        let target = sandbox.target(&self.code_relpath, &self.test_relpath);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.process_chunk(chunk, inputs, &target)))
            .unwrap_or_else(|payload| {
                chunk_warn!(id, "Chunk processing panicked: {}", panic_message(payload.as_ref()));
                ChunkOutcome::discarded(id, DiscardReason::Panicked)
            });

        match &outcome {
            ChunkOutcome::Accepted(result) => chunk_info!(id, "SUCCESS (hash {})", result.hash),
            ChunkOutcome::Skipped { .. } => chunk_info!(id, "SKIPPED"),
            ChunkOutcome::Discarded { reason, .. } => chunk_info!(id, "FAILED: {}", reason),
        }
        outcome
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{EquivalenceOracle, MutationProposer, MutationRequest, TestProposer};
    use crate::config::ConcernConfig;
    use crate::error::MortError;
    use crate::runner::{SandboxTarget, TestExecutor, TestOutcome};
    use crate::types::{ChunkContext, ChunkType, FileData};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Accepts every chunk except `boom`, which panics.
    struct Happy;

    impl MutationProposer for Happy {
        fn propose_mutation(&self, req: &MutationRequest<'_>) -> anyhow::Result<Option<String>> {
            if req.chunk.chunk_id == "boom" {
                panic!("proposer exploded");
            }
            Ok(Some(format!("{}# mutated\nx = 2\n", req.chunk.original_code)))
        }
    }

    impl TestProposer for Happy {
        fn propose_test(&self, _: &str, _: &str, _: &str) -> anyhow::Result<Option<String>> {
            Ok(Some("def test_x():\n    pass\n".to_string()))
        }
    }

    impl EquivalenceOracle for Happy {
        fn is_equivalent(&self, _: &str, _: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    /// Mutant passes the old suite; the new test passes on the original only.
    impl TestExecutor for Happy {
        fn run_tests(&self, candidate: &str, test: &str, _: &SandboxTarget) -> TestOutcome {
            let mutated = candidate.contains("# mutated");
            if test.contains("test_x") && mutated {
                TestOutcome::BuildsFails
            } else {
                TestOutcome::BuildsPasses
            }
        }
    }

    /// Hands out fake sandboxes; fails the first `failures` requests.
    struct FakeSandboxes {
        failures: AtomicUsize,
        created: Mutex<Vec<usize>>,
    }

    impl SandboxProvider for FakeSandboxes {
        fn create_worker_copy(&self, worker_id: usize) -> crate::error::Result<WorkerSandbox> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(MortError::MasterMissing);
            }
            self.created.lock().push(worker_id);
            Ok(WorkerSandbox {
                worker_id,
                path: PathBuf::from(format!("/sandbox/{}", worker_id)),
                runtime: PathBuf::from("python3"),
            })
        }
    }

    fn chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            chunk_type: ChunkType::Function,
            original_code: format!("def {}():\n    return 1\n", id),
            is_mutable: true,
            context: ChunkContext::default(),
        }
    }

    fn pipeline() -> MutationPipeline {
        let happy = Arc::new(Happy);
        MutationPipeline::new(happy.clone(), happy.clone(), happy.clone(), happy, ConcernConfig::default())
    }

    fn run(ids: &[&str], existing: &[&str], workers: usize, failures: usize) -> (SchedulerSummary, Vec<usize>) {
        let chunks: Vec<Chunk> = ids.iter().map(|id| chunk(id)).collect();
        let full: String = chunks.iter().map(|c| c.original_code.as_str()).collect();
        let data = FileData::new("m.py", chunks, full);
        let existing: HashSet<String> = existing.iter().map(|s| s.to_string()).collect();
        let sandboxes = FakeSandboxes {
            failures: AtomicUsize::new(failures),
            created: Mutex::new(Vec::new()),
        };
        let pipeline = pipeline();
        let scheduler = ParallelScheduler::new(
            &pipeline,
            &sandboxes,
            workers,
            PathBuf::from("m.py"),
            PathBuf::from("test_m.py"),
        );

        let refs: Vec<&Chunk> = data.chunks.iter().collect();
        let summary = scheduler.run(
            &refs,
            RunInputs {
                file_data: &data,
                existing_tests: "",
                existing_ids: &existing,
            },
        );
        let created = sandboxes.created.lock().clone();
        (summary, created)
    }

    #[test]
    fn test_all_chunks_accounted_for() {
        let (summary, created) = run(&["a", "b", "c", "d", "e"], &["b"], 3, 0);
        assert_eq!(summary.total(), 5);
        assert_eq!(summary.accepted.len(), 4);
        assert_eq!(summary.skipped, vec!["b".to_string()]);
        assert!(created.len() <= 3);
    }

    #[test]
    fn test_panic_is_contained() {
        let (summary, _) = run(&["a", "boom", "c"], &[], 2, 0);
        assert_eq!(summary.accepted.len(), 2);
        assert_eq!(summary.failed, vec![("boom".to_string(), DiscardReason::Panicked)]);
    }

    #[test]
    fn test_sandbox_failure_is_retried_on_next_chunk() {
        let (summary, created) = run(&["a", "b", "c"], &[], 1, 1);
        assert_eq!(summary.failed, vec![("a".to_string(), DiscardReason::WorkerSandboxUnavailable)]);
        assert_eq!(summary.accepted.len(), 2);
        // One worker, one successful creation reused for both later chunks.
        assert_eq!(created, vec![0]);
    }

    #[test]
    fn test_skipped_chunks_need_no_sandbox() {
        let (summary, created) = run(&["a", "b"], &["a", "b"], 2, 0);
        assert_eq!(summary.skipped.len(), 2);
        assert!(created.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let (summary, _) = run(&[], &[], 4, 0);
        assert_eq!(summary.total(), 0);
    }
}
