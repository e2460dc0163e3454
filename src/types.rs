//! Core data types shared by the chunker, pipeline, scheduler and workflow.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of source unit a chunk represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Method,
    Class,
    /// Code between definitions (imports, constants, main blocks)
    Gap,
    Unknown,
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkType::Function => "function",
            ChunkType::Method => "method",
            ChunkType::Class => "class",
            ChunkType::Gap => "gap",
            ChunkType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Positional context of a chunk inside its file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkContext {
    pub parent_class: Option<String>,
    pub class_header: Option<String>,
    /// 1-based, inclusive
    pub line_start: usize,
    /// 1-based, inclusive
    pub line_end: usize,
    #[serde(default)]
    pub indentation: usize,
    #[serde(default)]
    pub decorators: Vec<String>,
}

/// A named, ordered unit of source code extracted from a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub chunk_type: ChunkType,
    pub original_code: String,
    pub is_mutable: bool,
    pub context: ChunkContext,
}

/// A chunked source file.
///
/// Invariant: concatenating `chunks[*].original_code` in order yields `full_code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub file_path: String,
    pub chunks: Vec<Chunk>,
    pub full_code: String,
}

impl FileData {
    pub fn new(file_path: impl Into<String>, chunks: Vec<Chunk>, full_code: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            chunks,
            full_code: full_code.into(),
        }
    }

    /// Chunks eligible for mutation, in file order.
    pub fn mutable_chunks(&self) -> Vec<&Chunk> {
        self.chunks.iter().filter(|c| c.is_mutable).collect()
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.chunk_id == chunk_id)
    }

    /// Concatenation of every chunk's original code.
    pub fn reconstruct(&self) -> String {
        self.chunks.iter().map(|c| c.original_code.as_str()).collect()
    }

    pub fn reconstructs_exactly(&self) -> bool {
        self.reconstruct() == self.full_code
    }
}

/// Free-form score map produced by a quality judge.
pub type QualityScores = serde_json::Map<String, serde_json::Value>;

/// Terminal record of a chunk that survived every gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub chunk_id: String,
    pub chunk_type: ChunkType,
    pub original_chunk: String,
    pub mutated_chunk: String,
    pub mutated_file: String,
    pub test: String,
    pub scores: Option<QualityScores>,
    /// Content hash over (chunk_id, mutated chunk, test)
    pub hash: String,
}

/// Why a pipeline attempt was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    GenerationFailed,
    SyntacticallyIdentical,
    DoesNotBuild,
    BreaksExistingTests,
    EquivalentMutant,
    TestGenerationFailed,
    TestFailsOnOriginal,
    TestBreaksOnMutant,
    TestDoesNotKillMutant,
    WorkerSandboxUnavailable,
    Panicked,
}

impl DiscardReason {
    pub fn describe(&self) -> &'static str {
        match self {
            DiscardReason::GenerationFailed => "failed to generate mutant",
            DiscardReason::SyntacticallyIdentical => "syntactically identical",
            DiscardReason::DoesNotBuild => "mutant doesn't build",
            DiscardReason::BreaksExistingTests => "mutant fails existing tests",
            DiscardReason::EquivalentMutant => "equivalent mutant",
            DiscardReason::TestGenerationFailed => "failed to generate test",
            DiscardReason::TestFailsOnOriginal => "test fails on original",
            DiscardReason::TestBreaksOnMutant => "test doesn't build with mutant",
            DiscardReason::TestDoesNotKillMutant => "test doesn't kill mutant",
            DiscardReason::WorkerSandboxUnavailable => "worker sandbox unavailable",
            DiscardReason::Panicked => "chunk processing panicked",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Result of driving one chunk through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// Already present in prior-run metadata
    Skipped { chunk_id: String },
    Accepted(ValidationResult),
    Discarded {
        chunk_id: String,
        reason: DiscardReason,
    },
}

impl ChunkOutcome {
    pub fn chunk_id(&self) -> &str {
        match self {
            ChunkOutcome::Skipped { chunk_id } => chunk_id,
            ChunkOutcome::Accepted(result) => &result.chunk_id,
            ChunkOutcome::Discarded { chunk_id, .. } => chunk_id,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ChunkOutcome::Skipped { .. })
    }

    pub fn accepted(&self) -> Option<&ValidationResult> {
        match self {
            ChunkOutcome::Accepted(result) => Some(result),
            _ => None,
        }
    }

    pub fn discard_reason(&self) -> Option<DiscardReason> {
        match self {
            ChunkOutcome::Discarded { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub(crate) fn discarded(chunk_id: &str, reason: DiscardReason) -> Self {
        ChunkOutcome::Discarded {
            chunk_id: chunk_id.to_string(),
            reason,
        }
    }
}

/// Aggregate returned by a completed (non-aborted) workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub file_data: FileData,
    pub mutants: Vec<ValidationResult>,
    /// Number of mutable chunks considered
    pub total_chunks: usize,
    pub successful_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
}

impl WorkflowReport {
    /// True when the run completed but no chunk survived validation.
    pub fn is_empty(&self) -> bool {
        self.mutants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, code: &str, mutable: bool) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            chunk_type: if mutable { ChunkType::Function } else { ChunkType::Gap },
            original_code: code.to_string(),
            is_mutable: mutable,
            context: ChunkContext::default(),
        }
    }

    #[test]
    fn test_mutable_chunks_preserve_order() {
        let data = FileData::new(
            "m.py",
            vec![
                chunk("gap_0", "import os\n\n", false),
                chunk("a", "def a():\n    return 1\n", true),
                chunk("b", "def b():\n    return 2\n", true),
            ],
            "import os\n\ndef a():\n    return 1\ndef b():\n    return 2\n",
        );

        let ids: Vec<&str> = data.mutable_chunks().iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(data.reconstructs_exactly());
    }

    #[test]
    fn test_chunk_type_serializes_lowercase() {
        let json = serde_json::to_string(&ChunkType::Method).unwrap();
        assert_eq!(json, "\"method\"");
    }

    #[test]
    fn test_outcome_accessors() {
        let skipped = ChunkOutcome::Skipped { chunk_id: "x".to_string() };
        assert!(skipped.is_skipped());
        assert_eq!(skipped.chunk_id(), "x");

        let discarded = ChunkOutcome::discarded("y", DiscardReason::EquivalentMutant);
        assert_eq!(discarded.discard_reason(), Some(DiscardReason::EquivalentMutant));
        assert!(discarded.accepted().is_none());
    }
}
