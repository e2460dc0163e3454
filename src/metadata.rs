//! Persisted run results and the existing-mutation index.
//!
//! Layout under the output directory, one folder per code file:
//!
//! ```text
//! <output_dir>/<file_stem>/metadata.json
//! <output_dir>/<file_stem>/mutant_<chunk stem>.py
//! <output_dir>/<file_stem>/test_<chunk stem>.py
//! ```
//!
//! where the chunk stem comes from [`chunk_file_stem`]:
//!
//! ```text
//! hash_password -> hash_password
//! User.public   -> User-public
//! ```

use crate::error::{MortError, Result};
use crate::types::{ChunkType, QualityScores, ValidationResult, WorkflowReport};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(default)]
    pub successful_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mutants: Vec<MutantEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutantEntry {
    pub chunk_id: String,
    pub chunk_type: ChunkType,
    #[serde(default)]
    pub hash: String,
    pub files: MutantFiles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<QualityScores>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutantFiles {
    pub mutant: String,
    pub test: String,
}

impl MutantFiles {
    pub fn for_chunk(chunk_id: &str) -> Self {
        let stem = chunk_file_stem(chunk_id);
        Self {
            mutant: format!("mutant_{}.py", stem),
            test: format!("test_{}.py", stem),
        }
    }
}

/// `<output_dir>/<file_stem>`: the folder holding results for `code_file`.
pub fn code_file_dir(output_dir: &Path, code_file: &Path) -> PathBuf {
    let stem = code_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    output_dir.join(stem)
}

/// File-name-safe form of a chunk id, distinct for distinct ids.
///
/// Word characters are kept, the `.` between class and method becomes `-`,
/// and anything else is `%XX`-escaped byte by byte. `User.public` and a
/// function `User_public` therefore map to different files.
pub fn chunk_file_stem(chunk_id: &str) -> String {
    let mut stem = String::with_capacity(chunk_id.len());
    for c in chunk_id.chars() {
        match c {
            '.' => stem.push('-'),
            c if c.is_alphanumeric() || c == '_' => stem.push(c),
            c => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    stem.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }
    stem
}

/// Reads and writes one code file's output folder.
pub struct MetadataStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store for `code_file` under `output_dir` (`<output_dir>/<file_stem>`).
    pub fn for_code_file(output_dir: &Path, code_file: &Path) -> Self {
        Self::new(code_file_dir(output_dir, code_file))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Prior metadata, `None` if there is none yet.
    pub fn load(&self) -> Result<Option<Metadata>> {
        let path = self.metadata_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MortError::io(&path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| MortError::Metadata(format!("{}: {}", path.display(), e)))
    }

    /// Chunk ids accepted by previous runs. Unreadable metadata counts as none.
    pub fn load_existing_ids(&self) -> HashSet<String> {
        match self.load() {
            Ok(Some(metadata)) => {
                let ids: HashSet<String> = metadata.mutants.into_iter().map(|m| m.chunk_id).collect();
                log::info!("Loaded metadata: {} existing mutants found", ids.len());
                ids
            }
            Ok(None) => HashSet::new(),
            Err(e) => {
                log::warn!("Could not load metadata, starting fresh: {}", e);
                HashSet::new()
            }
        }
    }

    /// Write each accepted mutant and its test, then merge the new entries into
    /// `metadata.json` (entries for the same chunk are replaced).
    pub fn persist(&self, report: &WorkflowReport) -> Result<Metadata> {
        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.dir).map_err(|e| MortError::io(&self.dir, e))?;

        let now = Utc::now();
        let mut entries = Vec::with_capacity(report.mutants.len());
        for mutant in &report.mutants {
            entries.push(self.write_mutant(mutant, now)?);
        }

        let mut metadata = match self.load() {
            Ok(prior) => prior.unwrap_or_default(),
            Err(e) => {
                log::warn!("Replacing unreadable metadata: {}", e);
                Metadata::default()
            }
        };
        let new_ids: HashSet<&str> = entries.iter().map(|e| e.chunk_id.as_str()).collect();
        metadata.mutants.retain(|m| !new_ids.contains(m.chunk_id.as_str()));
        metadata.mutants.extend(entries);
        metadata.total_chunks = report.total_chunks;
        metadata.successful_count = metadata.mutants.len();
        metadata.updated_at = Some(now);

        let path = self.metadata_path();
        let tmp = self.dir.join(format!("{}.tmp", METADATA_FILE));
        let json = serde_json::to_string_pretty(&metadata).map_err(|e| MortError::Metadata(e.to_string()))?;
        fs::write(&tmp, json).map_err(|e| MortError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| MortError::io(&path, e))?;

        log::info!("Metadata: {}", path.display());
        Ok(metadata)
    }

    fn write_mutant(&self, mutant: &ValidationResult, now: DateTime<Utc>) -> Result<MutantEntry> {
        let files = MutantFiles::for_chunk(&mutant.chunk_id);

        let mutant_path = self.dir.join(&files.mutant);
        fs::write(&mutant_path, &mutant.mutated_file).map_err(|e| MortError::io(&mutant_path, e))?;
        let test_path = self.dir.join(&files.test);
        fs::write(&test_path, &mutant.test).map_err(|e| MortError::io(&test_path, e))?;

        log::info!("  {} -> {}, {}", mutant.chunk_id, files.mutant, files.test);
        Ok(MutantEntry {
            chunk_id: mutant.chunk_id.clone(),
            chunk_type: mutant.chunk_type,
            hash: mutant.hash.clone(),
            files,
            created_at: Some(now),
            scores: mutant.scores.clone(),
        })
    }
}
