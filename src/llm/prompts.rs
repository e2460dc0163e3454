//! Prompt templates.

use crate::collaborators::{JudgeRequest, MutationRequest};
use crate::types::ChunkType;

pub fn mutation(req: &MutationRequest<'_>) -> String {
    let chunk = req.chunk;
    let (location, class_section) = match (chunk.chunk_type, &chunk.context.parent_class, req.class_context) {
        (ChunkType::Method, Some(class), Some(ctx)) => (
            format!("This is a method of the '{}' class.", class),
            format!("\nFULL CLASS CONTEXT (for dependencies only):\n'''{}'''\n", ctx),
        ),
        _ => (format!("This is a standalone {}.", chunk.chunk_type), String::new()),
    };

    format!(
        "CONTEXT: {concern}\n\n\
         {location}\n\n\
         CODE TO MUTATE:\n'''{code}'''\n\
         {class_section}\n\
         EXISTING TESTS:\n'''{tests}'''\n\n\
         INSTRUCTION: Write a mutated version of the code above that introduces a SUBTLE bug \
         of the kind described, similar to: {diff}\n\n\
         Requirements:\n\
         1. All existing tests must still pass with the bug in place\n\
         2. Do not remove functionality outright; introduce edge cases or partial failures\n\
         3. The bug must be realistic, something that could ship in real code\n\
         4. Keep the signature and overall structure unchanged\n\
         5. Wrap ONLY the changed lines in '# MUTANT START' and '# MUTANT END' comments\n\n\
         Return the COMPLETE mutated code in a single ```python block.",
        concern = req.concern,
        location = location,
        code = chunk.original_code,
        class_section = class_section,
        tests = req.existing_tests,
        diff = req.example_diff,
    )
}

pub fn equivalence(original: &str, mutated: &str) -> String {
    format!(
        "Below are two slightly different versions of a Python module.\n\
         First version:\n'''{original}'''\n\
         Second version:\n'''{mutated}'''\n\
         INSTRUCTION: If both versions always behave exactly the same, answer only 'yes'. \
         Otherwise answer 'no' and explain how executing the first version can behave \
         differently from the second."
    )
}

pub fn killing_test(original: &str, mutated: &str, existing_tests: &str) -> String {
    format!(
        "Below are two versions of a Python module under test: the original, correct version \
         and a mutated version containing a bug delimited by '# MUTANT START' and '# MUTANT END'. \
         They are followed by the existing test file for the original.\n\
         Original version:\n'''{original}'''\n\
         Mutated version:\n'''{mutated}'''\n\
         Existing tests:\n'''{existing_tests}'''\n\
         INSTRUCTION: Write an extended version of the test file with extra test cases that fail \
         on the mutated version but pass on the original. Return the complete file in a single \
         ```python block."
    )
}

pub fn multiple_mutants(req: &MutationRequest<'_>, count: usize) -> String {
    format!(
        "CONTEXT: {concern}\n\n\
         CODE TO MUTATE:\n'''{code}'''\n\n\
         INSTRUCTION: Write {count} different mutated versions of the code above. Each version \
         introduces one realistic, subtle bug of the kind described, similar to: {diff}\n\n\
         Requirements:\n\
         1. Every version differs from the others in the bug it introduces\n\
         2. Keep the signature, indentation and overall structure unchanged\n\
         3. Wrap ONLY the changed lines in '# MUTANT START' and '# MUTANT END' comments\n\n\
         Return each COMPLETE mutated version in its own ```python block.",
        concern = req.concern,
        code = req.chunk.original_code,
        count = count,
        diff = req.example_diff,
    )
}

pub fn oracle_inference(chunk_code: &str, mutants: &[String], concern: &str) -> String {
    let listing: String = mutants
        .iter()
        .enumerate()
        .map(|(i, m)| format!("Mutant {}:\n'''{}'''\n", i + 1, m))
        .collect();
    format!(
        "CONCERN: {concern}\n\n\
         Original code:\n'''{chunk_code}'''\n\n\
         Each of the following mutants introduces a bug related to the concern:\n{listing}\n\
         INSTRUCTION: Infer the oracle for the original code: the properties its behaviour must \
         satisfy so that every mutant above would violate at least one of them. State each \
         property as a short, testable sentence about inputs and observable outputs or side \
         effects. Do not describe the mutants themselves."
    )
}

pub fn oracle_test(chunk_code: &str, oracle: &str, chunk_id: &str, existing_tests: &str) -> String {
    format!(
        "Code under test ({chunk_id}):\n'''{chunk_code}'''\n\n\
         Oracle (properties the code must satisfy):\n'''{oracle}'''\n\n\
         Existing test file:\n'''{existing_tests}'''\n\n\
         INSTRUCTION: Extend the existing test file with test cases that check every property \
         of the oracle for {chunk_id}. Follow the style, imports and fixtures of the existing \
         file and keep its tests. Return the complete file in a single ```python block."
    )
}

pub fn judge(req: &JudgeRequest<'_>) -> String {
    format!(
        "You are reviewing an automatically generated mutant and the test written to catch it.\n\
         CONCERN: {concern}\n\
         REFERENCE BUG: {diff}\n\n\
         Original code:\n'''{original}'''\n\
         Mutated code:\n'''{mutated}'''\n\
         Existing tests:\n'''{old_test}'''\n\
         New tests:\n'''{new_test}'''\n\n\
         Score each criterion from 1 (poor) to 5 (excellent) and reply with a single JSON object:\n\
         {{\"realism\": n, \"relevance\": n, \"subtlety\": n, \"test_quality\": n}}",
        concern = req.concern,
        diff = req.example_diff,
        original = req.original_code,
        mutated = req.mutated_code,
        old_test = req.original_test,
        new_test = req.new_test,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkContext};

    fn method_chunk() -> Chunk {
        Chunk {
            chunk_id: "Users.public".to_string(),
            chunk_type: ChunkType::Method,
            original_code: "    def public(self):\n        return {'id': self.id}\n".to_string(),
            is_mutable: true,
            context: ChunkContext {
                parent_class: Some("Users".to_string()),
                class_header: Some("class Users:\n".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_mutation_prompt_includes_class_context_for_methods() {
        let chunk = method_chunk();
        let req = MutationRequest {
            concern: "privacy",
            example_diff: "leaked hash",
            chunk: &chunk,
            class_context: Some("class Users:\n    ...\n"),
            existing_tests: "def test_public(): pass",
        };
        let prompt = mutation(&req);
        assert!(prompt.contains("method of the 'Users' class"));
        assert!(prompt.contains("FULL CLASS CONTEXT"));
        assert!(prompt.contains("def test_public(): pass"));
        assert!(prompt.contains("leaked hash"));
    }

    #[test]
    fn test_mutation_prompt_for_function_has_no_class_section() {
        let mut chunk = method_chunk();
        chunk.chunk_type = ChunkType::Function;
        chunk.context = ChunkContext::default();
        let req = MutationRequest {
            concern: "privacy",
            example_diff: "",
            chunk: &chunk,
            class_context: None,
            existing_tests: "",
        };
        let prompt = mutation(&req);
        assert!(prompt.contains("standalone function"));
        assert!(!prompt.contains("FULL CLASS CONTEXT"));
    }

    #[test]
    fn test_oracle_inference_lists_every_mutant() {
        let mutants = vec!["return 2".to_string(), "return 3".to_string()];
        let prompt = oracle_inference("return 1", &mutants, "privacy");
        assert!(prompt.contains("Mutant 1:\n'''return 2'''"));
        assert!(prompt.contains("Mutant 2:\n'''return 3'''"));
        assert!(prompt.contains("CONCERN: privacy"));
    }

    #[test]
    fn test_judge_prompt_requests_json() {
        let req = JudgeRequest {
            original_code: "a",
            mutated_code: "b",
            original_test: "c",
            new_test: "d",
            concern: "privacy",
            example_diff: "e",
        };
        assert!(judge(&req).contains("{\"realism\": n"));
    }
}
