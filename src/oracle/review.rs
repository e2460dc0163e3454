//! Human review of inferred oracles.
//!
//! [`FileReview`] writes each oracle to `<dir>/<file_stem>/<chunk>_oracle.txt`.
//! A `<chunk>_oracle_validated.txt` next to it, hand-written or left over
//! from an earlier run, replaces the inferred text. In interactive mode the
//! run pauses after writing so the file can be edited in place.

use crate::error::{MortError, Result};
use crate::metadata::{chunk_file_stem, code_file_dir};
use parking_lot::Mutex;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub trait OracleReviewer: Send + Sync {
    /// The oracle to build tests from: `oracle` itself or an edited version.
    fn review(&self, code_file: &str, chunk_id: &str, oracle: &str) -> Result<String>;
}

/// Uses every inferred oracle unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptOracle;

impl OracleReviewer for AcceptOracle {
    fn review(&self, _code_file: &str, _chunk_id: &str, oracle: &str) -> Result<String> {
        Ok(oracle.to_string())
    }
}

pub struct FileReview {
    dir: PathBuf,
    input: Option<Mutex<Box<dyn BufRead + Send>>>,
}

impl FileReview {
    /// Writes oracles for inspection and honours validated files, never pauses.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            input: None,
        }
    }

    /// Pauses for Enter on stdin after writing each oracle.
    pub fn interactive(dir: impl Into<PathBuf>) -> Self {
        Self::with_input(dir, Box::new(BufReader::new(std::io::stdin())))
    }

    pub fn with_input(dir: impl Into<PathBuf>, input: Box<dyn BufRead + Send>) -> Self {
        Self {
            dir: dir.into(),
            input: Some(Mutex::new(input)),
        }
    }

    pub fn oracle_path(&self, code_file: &str, chunk_id: &str) -> PathBuf {
        code_file_dir(&self.dir, Path::new(code_file)).join(format!("{}_oracle.txt", chunk_file_stem(chunk_id)))
    }

    pub fn validated_path(&self, code_file: &str, chunk_id: &str) -> PathBuf {
        code_file_dir(&self.dir, Path::new(code_file))
            .join(format!("{}_oracle_validated.txt", chunk_file_stem(chunk_id)))
    }

    fn wait_for_edit(&self, input: &Mutex<Box<dyn BufRead + Send>>, oracle_path: &Path, validated: &Path) -> Result<()> {
        eprintln!("\n=== ORACLE REVIEW ===");
        eprintln!("Oracle saved to: {}", oracle_path.display());
        eprintln!("Edit it in place, or save a replacement as:");
        eprintln!("  {}", validated.display());
        eprintln!("Press Enter to continue...");

        let mut line = String::new();
        input
            .lock()
            .read_line(&mut line)
            .map_err(|e| MortError::io(Path::new("<stdin>"), e))?;
        Ok(())
    }
}

fn read_if_present(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => Ok(Some(text)),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MortError::io(path, e)),
    }
}

impl OracleReviewer for FileReview {
    fn review(&self, code_file: &str, chunk_id: &str, oracle: &str) -> Result<String> {
        let oracle_path = self.oracle_path(code_file, chunk_id);
        let validated = self.validated_path(code_file, chunk_id);
        if let Some(dir) = oracle_path.parent() {
            fs::create_dir_all(dir).map_err(|e| MortError::io(dir, e))?;
        }
        fs::write(&oracle_path, oracle).map_err(|e| MortError::io(&oracle_path, e))?;
        log::info!("[{}] Oracle saved to {}", chunk_id, oracle_path.display());

        if let Some(input) = &self.input {
            self.wait_for_edit(input, &oracle_path, &validated)?;
        }

        if let Some(text) = read_if_present(&validated)? {
            log::info!("[{}] Using validated oracle from {}", chunk_id, validated.display());
            return Ok(text);
        }
        if self.input.is_some() {
            if let Some(text) = read_if_present(&oracle_path)? {
                return Ok(text);
            }
        }
        Ok(oracle.to_string())
    }
}
