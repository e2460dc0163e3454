//! Pulling code, JSON and yes/no answers out of free-form completions.

use crate::types::QualityScores;
use regex::Regex;
use std::sync::OnceLock;

fn code_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:python|py)?[ \t]*\r?\n(.*?)```").expect("code block regex is valid"))
}

fn json_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("json block regex is valid"))
}

fn json_raw_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)(\{.*\})").expect("json regex is valid"))
}

/// Code from the first fenced block, or the whole reply if there is none.
///
/// `// MUTANT` markers are rewritten to Python comments. Blank results are `None`.
pub fn extract_code(text: &str) -> Option<String> {
    let code = match code_block_re().captures(text).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => {
            log::debug!("No fenced code block in completion; using raw text");
            text
        }
    };

    let code = code.replace("// MUTANT", "# MUTANT");
    if code.trim().is_empty() {
        None
    } else {
        Some(code)
    }
}

fn mutant_section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?si)(?://|#)[ \t]*MUTANT[ \t]+START[^\n]*\n(.*?)(?://|#)[ \t]*MUTANT[ \t]+END")
            .expect("mutant section regex is valid")
    })
}

/// Every mutant in a multi-mutant reply, at most `limit`.
///
/// Each fenced block is one mutant. Without fences, each `MUTANT START` /
/// `MUTANT END` section is one.
pub fn extract_mutants(text: &str, limit: usize) -> Vec<String> {
    let fenced: Vec<&str> = code_block_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect();
    let sections: Vec<&str> = if fenced.is_empty() {
        mutant_section_re()
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .collect()
    } else {
        fenced
    };

    sections
        .into_iter()
        .filter(|code| !code.trim().is_empty())
        .map(|code| code.replace("// MUTANT", "# MUTANT"))
        .take(limit)
        .collect()
}

/// The JSON object in a reply: fenced first, then the outermost braces.
pub fn extract_json(text: &str) -> Option<&str> {
    json_block_re()
        .captures(text)
        .or_else(|| json_raw_re().captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn parse_scores(text: &str) -> Option<QualityScores> {
    let json = extract_json(text)?;
    match serde_json::from_str::<serde_json::Value>(json) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Judge reply is not valid JSON: {}", e);
            None
        }
    }
}

/// Whether an equivalence answer says "yes".
pub fn is_affirmative(answer: &str) -> bool {
    answer
        .trim_start_matches(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == '*')
        .to_lowercase()
        .starts_with("yes")
}
