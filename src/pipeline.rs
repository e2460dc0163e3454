//! Mutation Validation Pipeline
//!
//! Drives one chunk through generation, the syntactic-difference gate, the
//! build/pass gate, the equivalence gate, test generation and the two-sided
//! cross-validation of the new test. Every gate is a hard discard; gates never
//! return errors.

use crate::collaborators::{
    EquivalenceOracle, JudgeRequest, MutationProposer, MutationRequest, QualityJudge, TestProposer,
};
use crate::config::ConcernConfig;
use crate::normalize;
use crate::runner::{SandboxTarget, TestExecutor, TestOutcome};
use crate::stitch;
use crate::types::{Chunk, ChunkOutcome, DiscardReason, FileData, ValidationResult};
use crate::{chunk_debug, chunk_info, chunk_warn};
use std::collections::HashSet;
use std::sync::Arc;

/// Read-only inputs shared by every chunk of a run.
#[derive(Debug, Clone, Copy)]
pub struct RunInputs<'a> {
    pub file_data: &'a FileData,
    pub existing_tests: &'a str,
    /// Chunk ids already accepted by a previous run
    pub existing_ids: &'a HashSet<String>,
}

pub struct MutationPipeline {
    proposer: Arc<dyn MutationProposer>,
    test_proposer: Arc<dyn TestProposer>,
    oracle: Arc<dyn EquivalenceOracle>,
    judge: Option<Arc<dyn QualityJudge>>,
    executor: Arc<dyn TestExecutor>,
    concern: ConcernConfig,
}

impl MutationPipeline {
    pub fn new(
        proposer: Arc<dyn MutationProposer>,
        test_proposer: Arc<dyn TestProposer>,
        oracle: Arc<dyn EquivalenceOracle>,
        executor: Arc<dyn TestExecutor>,
        concern: ConcernConfig,
    ) -> Self {
        Self {
            proposer,
            test_proposer,
            oracle,
            judge: None,
            executor,
            concern,
        }
    }

    pub fn with_judge(mut self, judge: Arc<dyn QualityJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    /// Take `chunk` through every gate, running tests in `target`.
    pub fn process_chunk(&self, chunk: &Chunk, inputs: &RunInputs<'_>, target: &SandboxTarget) -> ChunkOutcome {
        let id = chunk.chunk_id.as_str();
        let file_data = inputs.file_data;
        let discard = |reason: DiscardReason| {
            chunk_info!(id, "{} - DISCARD", reason);
            ChunkOutcome::discarded(id, reason)
        };

        if inputs.existing_ids.contains(id) {
            chunk_info!(id, "Already processed in a previous run - SKIP");
            return ChunkOutcome::Skipped {
                chunk_id: id.to_string(),
            };
        }

        // Step 1: mutation
        chunk_info!(id, "Generating mutant");
        let class_context = stitch::class_context(chunk, file_data);
        let request = MutationRequest {
            concern: &self.concern.description,
            example_diff: &self.concern.example_diff,
            chunk,
            class_context: class_context.as_deref(),
            existing_tests: inputs.existing_tests,
        };
        let mutated_chunk = match self.proposer.propose_mutation(&request) {
            Ok(Some(code)) if !code.trim().is_empty() => code,
            Ok(_) => return discard(DiscardReason::GenerationFailed),
            Err(e) => {
                chunk_warn!(id, "Mutation proposer failed: {:#}", e);
                return discard(DiscardReason::GenerationFailed);
            }
        };

        let mutated_file = stitch::stitch_file(file_data, id, &mutated_chunk);

        // Step 2: syntactic difference
        if normalize::is_syntactically_identical(&chunk.original_code, &mutated_chunk) {
            return discard(DiscardReason::SyntacticallyIdentical);
        }
        chunk_debug!(id, "Syntactically different");

        // Step 3: mutant builds and still passes the existing suite
        chunk_info!(id, "Validating mutant against existing tests");
        match self.executor.run_tests(&mutated_file, inputs.existing_tests, target) {
            TestOutcome::DoesNotBuild => return discard(DiscardReason::DoesNotBuild),
            TestOutcome::BuildsFails => return discard(DiscardReason::BreaksExistingTests),
            TestOutcome::BuildsPasses => chunk_debug!(id, "Mutant builds and passes"),
        }

        // Step 4: equivalence
        chunk_info!(id, "Checking equivalence");
        match self.oracle.is_equivalent(&file_data.full_code, &mutated_file) {
            Ok(false) => chunk_debug!(id, "Non-equivalent"),
            Ok(true) => return discard(DiscardReason::EquivalentMutant),
            Err(e) => {
                // An unknown answer cannot be trusted as "different".
                chunk_warn!(id, "Equivalence oracle failed: {:#}", e);
                return discard(DiscardReason::EquivalentMutant);
            }
        }

        // Step 5: killing test
        chunk_info!(id, "Generating test to kill mutant");
        let new_test = match self
            .test_proposer
            .propose_test(&file_data.full_code, &mutated_file, inputs.existing_tests)
        {
            Ok(Some(test)) if !test.trim().is_empty() => test,
            Ok(_) => return discard(DiscardReason::TestGenerationFailed),
            Err(e) => {
                chunk_warn!(id, "Test proposer failed: {:#}", e);
                return discard(DiscardReason::TestGenerationFailed);
            }
        };

        // Step 6a: the new test passes on the original
        chunk_info!(id, "Validating generated test");
        if !self.executor.run_tests(&file_data.full_code, &new_test, target).passes() {
            return discard(DiscardReason::TestFailsOnOriginal);
        }
        chunk_debug!(id, "Test passes on original");

        // Step 6b: and fails on the mutant
        match self.executor.run_tests(&mutated_file, &new_test, target) {
            TestOutcome::DoesNotBuild => return discard(DiscardReason::TestBreaksOnMutant),
            TestOutcome::BuildsPasses => return discard(DiscardReason::TestDoesNotKillMutant),
            TestOutcome::BuildsFails => chunk_info!(id, "Test kills mutant"),
        }

        // Step 7: optional scoring, never a gate
        let scores = self.judge.as_ref().and_then(|judge| {
            let request = JudgeRequest {
                original_code: &chunk.original_code,
                mutated_code: &mutated_chunk,
                original_test: inputs.existing_tests,
                new_test: &new_test,
                concern: &self.concern.description,
                example_diff: &self.concern.example_diff,
            };
            match judge.judge(&request) {
                Ok(scores) => scores,
                Err(e) => {
                    chunk_warn!(id, "Quality judge failed: {:#}", e);
                    None
                }
            }
        });
        match &scores {
            Some(scores) => {
                for (name, value) in scores {
                    chunk_debug!(id, "score {}: {}", name, value);
                }
            }
            None => chunk_debug!(id, "No quality scores"),
        }

        let hash = result_hash(id, &mutated_chunk, &new_test);
        chunk_info!(id, "Accepted (hash {})", hash);

        ChunkOutcome::Accepted(ValidationResult {
            chunk_id: id.to_string(),
            chunk_type: chunk.chunk_type,
            original_chunk: chunk.original_code.clone(),
            mutated_chunk,
            mutated_file,
            test: new_test,
            scores,
            hash,
        })
    }
}

/// First 12 hex chars of blake3 over `chunk_id|mutated_code|test_code`.
pub fn result_hash(chunk_id: &str, mutated_code: &str, test_code: &str) -> String {
    let content = format!("{}|{}|{}", chunk_id, mutated_code, test_code);
    blake3::hash(content.as_bytes()).to_hex()[..12].to_string()
}
