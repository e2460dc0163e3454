//! Oracle results on disk.
//!
//! ```text
//! <oracle_output_dir>/<file_stem>/metadata.json
//! <oracle_output_dir>/<file_stem>/test_<chunk stem>.py
//! <oracle_output_dir>/<file_stem>/bug_report.txt
//! ```

use super::{BugVerdict, OracleReport};
use crate::error::{MortError, Result};
use crate::metadata::{chunk_file_stem, code_file_dir, METADATA_FILE};
use std::fs;
use std::path::{Path, PathBuf};

pub const BUG_REPORT_FILE: &str = "bug_report.txt";

const RULE: &str = "================================================================================";
const THIN_RULE: &str = "--------------------------------------------------------------------------------";

pub struct OracleStore {
    dir: PathBuf,
}

impl OracleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn for_code_file(output_dir: &Path, code_file: &Path) -> Self {
        Self::new(code_file_dir(output_dir, code_file))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every oracle test, `metadata.json` and the bug report.
    pub fn persist(&self, report: &OracleReport) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| MortError::io(&self.dir, e))?;

        for result in &report.results {
            let path = self.dir.join(test_file_name(&result.chunk_id));
            fs::write(&path, &result.test_code).map_err(|e| MortError::io(&path, e))?;
            log::info!("  Test saved: {}", path.display());
        }

        let path = self.dir.join(METADATA_FILE);
        let tmp = self.dir.join(format!("{}.tmp", METADATA_FILE));
        let json = serde_json::to_string_pretty(report).map_err(|e| MortError::Metadata(e.to_string()))?;
        fs::write(&tmp, json).map_err(|e| MortError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| MortError::io(&path, e))?;
        log::info!("Metadata: {}", path.display());

        let path = self.dir.join(BUG_REPORT_FILE);
        fs::write(&path, render_bug_report(report)).map_err(|e| MortError::io(&path, e))?;
        log::info!("Bug report: {}", path.display());
        Ok(())
    }

    pub fn load(&self) -> Result<Option<OracleReport>> {
        let path = self.dir.join(METADATA_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MortError::io(&path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| MortError::Metadata(format!("{}: {}", path.display(), e)))
    }
}

fn test_file_name(chunk_id: &str) -> String {
    format!("test_{}.py", chunk_file_stem(chunk_id))
}

/// Human-readable summary, one section per processed function.
pub fn render_bug_report(report: &OracleReport) -> String {
    let mut lines = vec![
        RULE.to_string(),
        "BUG DETECTION REPORT".to_string(),
        RULE.to_string(),
        String::new(),
        format!("Code File: {}", report.code_file),
        format!("Concern: {}", report.concern.lines().next().unwrap_or_default()),
        format!("Functions Processed: {}", report.functions_processed),
        format!("Bugs Found: {}", report.bugs_found),
        String::new(),
    ];

    for result in &report.results {
        lines.push(THIN_RULE.to_string());
        lines.push(format!("Function: {}", result.chunk_id));
        lines.push(format!("Mutants Generated: {}", result.mutants_generated));
        lines.push(format!("Valid Mutants: {}", result.valid_mutants));

        match result.verdict {
            BugVerdict::BugsDetected => {
                lines.push(format!("STATUS: [X] {}", result.verdict));
                lines.push(String::new());
                lines.push("ORACLE SPECIFICATION:".to_string());
                lines.push(result.oracle.trim_end().to_string());
                lines.push(String::new());
                lines.push("RECOMMENDATION:".to_string());
                lines.push(format!("Review the test file: {}", test_file_name(&result.chunk_id)));
                lines.push("Run the tests to see the specific failures and fix the violations they expose.".to_string());
            }
            BugVerdict::NoBugs => {
                lines.push(format!("STATUS: [OK] {}", result.verdict));
                if let Some(killed) = result.mutants_killed {
                    lines.push(format!("Oracle test kills {}/{} valid mutants", killed, result.valid_mutants));
                }
            }
            BugVerdict::TestDoesNotBuild => lines.push(format!("STATUS: [?] {}", result.verdict)),
        }
        lines.push(String::new());
    }

    if !report.abandoned.is_empty() {
        lines.push(THIN_RULE.to_string());
        lines.push("NOT PROCESSED:".to_string());
        for entry in &report.abandoned {
            lines.push(format!("  {}: {}", entry.chunk_id, entry.reason));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}
