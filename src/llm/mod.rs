//! Prompt-driven implementations of the pipeline collaborators.
//!
//! One [`CompletionClient`] backs every role, including the oracle inference
//! ones; each role renders its prompt, sends it, and extracts the part of the
//! reply it needs.

pub mod client;
pub mod prompts;
pub mod response;

pub use client::{CommandClient, CompletionClient};
#[cfg(feature = "ollama")]
pub use client::OllamaClient;

use crate::collaborators::{
    EquivalenceOracle, JudgeRequest, MutationProposer, MutationRequest, OracleProposer, QualityJudge, TestProposer,
};
use crate::logging::preview;
use crate::types::QualityScores;
use anyhow::Result;
use std::sync::Arc;

/// Mutation proposer, test proposer, equivalence oracle and judge over a
/// single completion backend.
#[derive(Clone)]
pub struct LlmCollaborators {
    client: Arc<dyn CompletionClient>,
}

impl LlmCollaborators {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    fn ask(&self, role: &str, prompt: &str) -> Result<String> {
        log::debug!("LLM call ({}): prompt {} chars", role, prompt.len());
        let reply = self.client.complete(prompt)?;
        log::debug!("LLM reply ({}): {} chars: {}", role, reply.len(), preview(&reply, 100));
        Ok(reply)
    }
}

impl MutationProposer for LlmCollaborators {
    fn propose_mutation(&self, request: &MutationRequest<'_>) -> Result<Option<String>> {
        let reply = self.ask("mutant", &prompts::mutation(request))?;
        Ok(response::extract_code(&reply))
    }
}

impl TestProposer for LlmCollaborators {
    fn propose_test(&self, original_file: &str, mutated_file: &str, existing_tests: &str) -> Result<Option<String>> {
        let reply = self.ask("test", &prompts::killing_test(original_file, mutated_file, existing_tests))?;
        Ok(response::extract_code(&reply))
    }
}

impl EquivalenceOracle for LlmCollaborators {
    fn is_equivalent(&self, original_file: &str, mutated_file: &str) -> Result<bool> {
        let reply = self.ask("equivalence", &prompts::equivalence(original_file, mutated_file))?;
        Ok(response::is_affirmative(&reply))
    }
}

impl QualityJudge for LlmCollaborators {
    fn judge(&self, request: &JudgeRequest<'_>) -> Result<Option<QualityScores>> {
        let reply = self.ask("judge", &prompts::judge(request))?;
        Ok(response::parse_scores(&reply))
    }
}

impl OracleProposer for LlmCollaborators {
    fn propose_mutants(&self, request: &MutationRequest<'_>, count: usize) -> Result<Vec<String>> {
        let reply = self.ask("mutants", &prompts::multiple_mutants(request, count))?;
        Ok(response::extract_mutants(&reply, count))
    }

    fn infer_oracle(&self, chunk_code: &str, mutants: &[String], concern: &str) -> Result<Option<String>> {
        let reply = self.ask("oracle", &prompts::oracle_inference(chunk_code, mutants, concern))?;
        let oracle = reply.trim();
        Ok((!oracle.is_empty()).then(|| oracle.to_string()))
    }

    fn oracle_test(&self, chunk_code: &str, oracle: &str, chunk_id: &str, existing_tests: &str) -> Result<Option<String>> {
        let reply = self.ask(
            "oracle test",
            &prompts::oracle_test(chunk_code, oracle, chunk_id, existing_tests),
        )?;
        Ok(response::extract_code(&reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Replays canned replies and records prompts.
    struct Scripted {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl CompletionClient for Scripted {
        fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                anyhow::bail!("no scripted reply left");
            }
            Ok(replies.remove(0))
        }
    }

    fn collaborators(replies: &[&str]) -> (LlmCollaborators, Arc<Scripted>) {
        let scripted = Arc::new(Scripted {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        });
        (LlmCollaborators::new(scripted.clone()), scripted)
    }

    #[test]
    fn test_equivalence_and_test_roles() {
        let (llm, scripted) = collaborators(&["No. The mutant logs the email.", "```python\ndef test_x():\n    assert True\n```"]);

        assert!(!llm.is_equivalent("a = 1", "a = 2").unwrap());
        let test = llm.propose_test("a = 1", "a = 2", "").unwrap().unwrap();
        assert_eq!(test, "def test_x():\n    assert True\n");

        let prompts = scripted.prompts.lock();
        assert!(prompts[0].contains("a = 2"));
        assert!(prompts[1].contains("extra test cases"));
    }

    #[test]
    fn test_judge_unparseable_reply_is_none() {
        let (llm, _) = collaborators(&["I liked it a lot"]);
        let req = JudgeRequest {
            original_code: "",
            mutated_code: "",
            original_test: "",
            new_test: "",
            concern: "",
            example_diff: "",
        };
        assert!(llm.judge(&req).unwrap().is_none());
    }

    #[test]
    fn test_oracle_roles() {
        let (llm, scripted) = collaborators(&[
            "```python\ndef f():\n    return 2\n```\n```python\ndef f():\n    return 3\n```",
            "  f returns 1 for every input.\n",
            "   ",
        ]);
        let chunk = crate::types::Chunk {
            chunk_id: "f".to_string(),
            chunk_type: crate::types::ChunkType::Function,
            original_code: "def f():\n    return 1\n".to_string(),
            is_mutable: true,
            context: Default::default(),
        };
        let request = MutationRequest {
            concern: "privacy",
            example_diff: "",
            chunk: &chunk,
            class_context: None,
            existing_tests: "",
        };

        let mutants = llm.propose_mutants(&request, 5).unwrap();
        assert_eq!(mutants.len(), 2);
        let oracle = llm.infer_oracle(&chunk.original_code, &mutants, "privacy").unwrap();
        assert_eq!(oracle.as_deref(), Some("f returns 1 for every input."));
        assert!(llm.oracle_test(&chunk.original_code, "f returns 1", "f", "").unwrap().is_none());

        let prompts = scripted.prompts.lock();
        assert!(prompts[0].contains("Write 5 different mutated versions"));
        assert!(prompts[1].contains("Mutant 2:"));
        assert!(prompts[2].contains("f returns 1"));
    }

    #[test]
    fn test_backend_error_propagates() {
        let (llm, _) = collaborators(&[]);
        assert!(llm.is_equivalent("a", "b").is_err());
    }
}
