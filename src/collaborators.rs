//! Interfaces to the external collaborators driven by the pipeline.
//!
//! Implementations live outside the engine (see [`crate::llm`] for the
//! prompt-driven ones and [`crate::chunker`] for the Python chunker), so the
//! fallible methods return `anyhow::Result`.

use crate::error::Result;
use crate::types::{Chunk, FileData, QualityScores};

/// Splits a source file into ordered chunks.
pub trait Chunker: Send + Sync {
    fn extract_chunks(&self, code: &str, file_path: &str) -> Result<FileData>;
}

/// Everything a proposer sees when asked to mutate one chunk.
#[derive(Debug, Clone, Copy)]
pub struct MutationRequest<'a> {
    pub concern: &'a str,
    pub example_diff: &'a str,
    pub chunk: &'a Chunk,
    /// Class header plus sibling chunks, for methods
    pub class_context: Option<&'a str>,
    pub existing_tests: &'a str,
}

pub trait MutationProposer: Send + Sync {
    /// Replacement code for the chunk, or `None` if nothing usable came back.
    fn propose_mutation(&self, request: &MutationRequest<'_>) -> anyhow::Result<Option<String>>;
}

pub trait TestProposer: Send + Sync {
    /// A test suite that should pass on `original_file` and fail on `mutated_file`.
    fn propose_test(
        &self,
        original_file: &str,
        mutated_file: &str,
        existing_tests: &str,
    ) -> anyhow::Result<Option<String>>;
}

pub trait EquivalenceOracle: Send + Sync {
    fn is_equivalent(&self, original_file: &str, mutated_file: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Copy)]
pub struct JudgeRequest<'a> {
    pub original_code: &'a str,
    pub mutated_code: &'a str,
    pub original_test: &'a str,
    pub new_test: &'a str,
    pub concern: &'a str,
    pub example_diff: &'a str,
}

pub trait QualityJudge: Send + Sync {
    fn judge(&self, request: &JudgeRequest<'_>) -> anyhow::Result<Option<QualityScores>>;
}

/// The prompt-driven roles of oracle inference.
pub trait OracleProposer: Send + Sync {
    /// Up to `count` alternative mutants of the chunk, each a full replacement.
    fn propose_mutants(&self, request: &MutationRequest<'_>, count: usize) -> anyhow::Result<Vec<String>>;

    /// A plain-language statement of the behaviour every mutant breaks.
    fn infer_oracle(&self, chunk_code: &str, mutants: &[String], concern: &str) -> anyhow::Result<Option<String>>;

    /// The existing test file extended with checks for `oracle`.
    fn oracle_test(
        &self,
        chunk_code: &str,
        oracle: &str,
        chunk_id: &str,
        existing_tests: &str,
    ) -> anyhow::Result<Option<String>>;
}
