//! Per-chunk oracle inference: mutants, filters, oracle, review, test, verdict.

use super::review::OracleReviewer;
use super::{BugVerdict, OracleAbandon, OracleOutcome, OracleResult};
use crate::collaborators::{EquivalenceOracle, MutationRequest, OracleProposer};
use crate::config::{ConcernConfig, OracleConfig};
use crate::normalize;
use crate::runner::{PythonSyntaxChecker, SandboxTarget, SyntaxChecker, TestExecutor, TestOutcome};
use crate::stitch;
use crate::types::{Chunk, FileData};
use crate::{chunk_debug, chunk_info, chunk_warn};
use std::sync::Arc;

pub struct OraclePipeline {
    proposer: Arc<dyn OracleProposer>,
    equivalence: Arc<dyn EquivalenceOracle>,
    executor: Arc<dyn TestExecutor>,
    reviewer: Arc<dyn OracleReviewer>,
    syntax: Box<dyn SyntaxChecker>,
    concern: ConcernConfig,
    mutants: usize,
    max_valid: usize,
}

impl OraclePipeline {
    pub fn new(
        proposer: Arc<dyn OracleProposer>,
        equivalence: Arc<dyn EquivalenceOracle>,
        executor: Arc<dyn TestExecutor>,
        reviewer: Arc<dyn OracleReviewer>,
        concern: ConcernConfig,
        config: &OracleConfig,
    ) -> Self {
        Self {
            proposer,
            equivalence,
            executor,
            reviewer,
            syntax: Box::new(PythonSyntaxChecker),
            concern,
            mutants: config.mutants.max(1),
            max_valid: config.max_valid.max(1),
        }
    }

    pub fn with_syntax_checker(mut self, syntax: Box<dyn SyntaxChecker>) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn concern(&self) -> &ConcernConfig {
        &self.concern
    }

    /// Run the whole inference for `chunk`, executing tests in `target`.
    pub fn process_chunk(
        &self,
        chunk: &Chunk,
        file_data: &FileData,
        existing_tests: &str,
        target: &SandboxTarget,
    ) -> OracleOutcome {
        let id = chunk.chunk_id.as_str();
        let abandon = |reason: OracleAbandon| {
            chunk_info!(id, "{} - ABANDON", reason);
            OracleOutcome::abandoned(id, reason)
        };

        // Step 1: several mutants at once
        chunk_info!(id, "Generating {} mutants", self.mutants);
        let class_context = stitch::class_context(chunk, file_data);
        let request = MutationRequest {
            concern: &self.concern.description,
            example_diff: &self.concern.example_diff,
            chunk,
            class_context: class_context.as_deref(),
            existing_tests,
        };
        let mutants = match self.proposer.propose_mutants(&request, self.mutants) {
            Ok(mutants) if !mutants.is_empty() => mutants,
            Ok(_) => return abandon(OracleAbandon::NoMutants),
            Err(e) => {
                chunk_warn!(id, "Mutant generation failed: {:#}", e);
                return abandon(OracleAbandon::NoMutants);
            }
        };
        chunk_info!(id, "Generated {} mutants", mutants.len());

        // Steps 2-4: identity, parse and equivalence filters
        let valid = self.filter_mutants(chunk, file_data, &mutants, target);
        if valid.is_empty() {
            return abandon(OracleAbandon::NoValidMutants);
        }
        chunk_info!(id, "Retained {} valid mutants", valid.len());

        // Step 5: oracle
        let oracle = match self
            .proposer
            .infer_oracle(&chunk.original_code, &valid, &self.concern.description)
        {
            Ok(Some(oracle)) if !oracle.trim().is_empty() => oracle,
            Ok(_) => return abandon(OracleAbandon::InferenceFailed),
            Err(e) => {
                chunk_warn!(id, "Oracle inference failed: {:#}", e);
                return abandon(OracleAbandon::InferenceFailed);
            }
        };
        chunk_debug!(id, "Oracle inferred ({} chars)", oracle.len());

        // Step 6: review
        let oracle = match self.reviewer.review(&file_data.file_path, id, &oracle) {
            Ok(reviewed) => reviewed,
            Err(e) => {
                chunk_warn!(id, "Oracle review failed: {}", e);
                return abandon(OracleAbandon::ReviewFailed);
            }
        };

        // Step 7: test from the oracle
        chunk_info!(id, "Generating oracle test");
        let test_code = match self
            .proposer
            .oracle_test(&chunk.original_code, &oracle, id, existing_tests)
        {
            Ok(Some(test)) if !test.trim().is_empty() => test,
            Ok(_) => return abandon(OracleAbandon::TestGenerationFailed),
            Err(e) => {
                chunk_warn!(id, "Oracle test generation failed: {:#}", e);
                return abandon(OracleAbandon::TestGenerationFailed);
            }
        };

        // Step 8: the original against its own oracle
        chunk_info!(id, "Running oracle test against the original");
        let verdict = BugVerdict::from_outcome(self.executor.run_tests(&file_data.full_code, &test_code, target));
        chunk_info!(id, "{}", verdict);

        // A passing oracle test should still tell the mutants apart.
        let mutants_killed = (verdict == BugVerdict::NoBugs).then(|| {
            let killed = valid
                .iter()
                .filter(|mutant| {
                    let mutated_file = stitch::stitch_file(file_data, id, mutant);
                    self.executor.run_tests(&mutated_file, &test_code, target) == TestOutcome::BuildsFails
                })
                .count();
            chunk_info!(id, "Oracle test kills {}/{} valid mutants", killed, valid.len());
            killed
        });

        OracleOutcome::Completed(OracleResult {
            chunk_id: id.to_string(),
            chunk_type: chunk.chunk_type,
            mutants_generated: mutants.len(),
            valid_mutants: valid.len(),
            oracle,
            test_code,
            verdict,
            mutants_killed,
        })
    }

    /// Mutants that differ from the chunk, parse once stitched in, and are not
    /// equivalent. Stops after `max_valid`.
    fn filter_mutants(
        &self,
        chunk: &Chunk,
        file_data: &FileData,
        mutants: &[String],
        target: &SandboxTarget,
    ) -> Vec<String> {
        let id = chunk.chunk_id.as_str();
        let mut valid = Vec::new();

        for (index, mutant) in mutants.iter().enumerate() {
            let n = index + 1;
            if normalize::is_syntactically_identical(&chunk.original_code, mutant) {
                chunk_debug!(id, "Mutant {}: syntactically identical", n);
                continue;
            }

            let mutated_file = stitch::stitch_file(file_data, id, mutant);
            match self.syntax.check(&mutated_file, &target.runtime) {
                Ok(true) => {}
                Ok(false) => {
                    chunk_debug!(id, "Mutant {}: does not parse", n);
                    continue;
                }
                Err(e) => {
                    chunk_warn!(id, "Mutant {}: syntax check could not run: {}", n, e);
                    continue;
                }
            }

            match self.equivalence.is_equivalent(&file_data.full_code, &mutated_file) {
                Ok(false) => {}
                Ok(true) => {
                    chunk_debug!(id, "Mutant {}: equivalent", n);
                    continue;
                }
                Err(e) => {
                    chunk_warn!(id, "Mutant {}: equivalence oracle failed: {:#}", n, e);
                    continue;
                }
            }

            chunk_debug!(id, "Mutant {}: valid", n);
            valid.push(mutant.clone());
            if valid.len() >= self.max_valid {
                break;
            }
        }
        valid
    }
}
