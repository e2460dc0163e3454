//! Sandbox Manager - master/worker copies of the target repository
//!
//! The master copy is built once per run: the repository tree minus excluded
//! entries, plus a provisioned runtime. Each worker thread then leases a full
//! copy of the master. Workers never write back into the master.

use crate::error::{MortError, Result};
use crate::process;
use crate::runner::SandboxTarget;
use regex::RegexSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// Marker in worker directory names; cleanup removes anything carrying it.
const WORKER_MARKER: &str = "_worker_";

/// Installs an isolated runtime into a freshly copied master.
pub trait RuntimeProvisioner: Send + Sync {
    /// Provision the runtime inside `sandbox` and return the interpreter path.
    fn provision(&self, sandbox: &Path) -> Result<PathBuf>;
}

/// `python -m venv` plus dependency installation.
#[derive(Debug, Clone)]
pub struct VenvProvisioner {
    pub interpreter: PathBuf,
    pub venv_dir: String,
}

impl VenvProvisioner {
    pub fn new(interpreter: impl Into<PathBuf>, venv_dir: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            venv_dir: venv_dir.into(),
        }
    }

    fn venv_python(venv: &Path) -> PathBuf {
        if cfg!(windows) {
            venv.join("Scripts").join("python.exe")
        } else {
            venv.join("bin").join("python")
        }
    }

    fn run_step(stage: &'static str, mut cmd: Command, sandbox: &Path) -> Result<()> {
        cmd.current_dir(sandbox);
        let out = process::run_captured(cmd).map_err(|e| MortError::provision(stage, e.to_string()))?;
        if !out.success() {
            return Err(MortError::provision(stage, out.stderr.trim().to_string()));
        }
        Ok(())
    }
}

impl RuntimeProvisioner for VenvProvisioner {
    fn provision(&self, sandbox: &Path) -> Result<PathBuf> {
        let venv = sandbox.join(&self.venv_dir);
        log::info!("Creating virtual environment: {}", venv.display());

        let mut cmd = Command::new(&self.interpreter);
        cmd.args(["-m", "venv"]).arg(&venv);
        Self::run_step("venv", cmd, sandbox)?;

        let python = Self::venv_python(&venv);
        if !python.exists() {
            return Err(MortError::provision(
                "venv",
                format!("interpreter not found at {}", python.display()),
            ));
        }

        let mut install = Command::new(&python);
        install.args(["-m", "pip", "install", "--quiet"]);
        if sandbox.join("requirements.txt").is_file() {
            log::info!("Installing dependencies from requirements.txt");
            install.args(["-r", "requirements.txt"]);
            Self::run_step("dependencies", install, sandbox)?;
        } else if sandbox.join("pyproject.toml").is_file() {
            log::info!("Installing project from pyproject.toml");
            install.arg(".");
            Self::run_step("dependencies", install, sandbox)?;
        } else {
            log::warn!("No requirements.txt or pyproject.toml found; skipping dependency install");
        }

        Ok(python)
    }
}

/// Uses a configured interpreter as-is.
#[derive(Debug, Clone)]
pub struct SystemProvisioner {
    pub interpreter: PathBuf,
}

impl RuntimeProvisioner for SystemProvisioner {
    fn provision(&self, _sandbox: &Path) -> Result<PathBuf> {
        log::info!("Using system interpreter: {}", self.interpreter.display());
        Ok(self.interpreter.clone())
    }
}

/// Shell-style (`*`, `?`) patterns matched against single path components.
#[derive(Debug, Clone)]
pub struct ExcludeMatcher {
    set: RegexSet,
}

impl ExcludeMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let regexes: Vec<String> = patterns.iter().map(|p| glob_to_regex(p.as_ref())).collect();
        let set = RegexSet::new(&regexes).map_err(|e| MortError::Config(format!("bad exclude pattern: {}", e)))?;
        Ok(Self { set })
    }

    pub fn empty() -> Self {
        Self { set: RegexSet::empty() }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.set.is_match(name)
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

/// A provisioned master copy.
#[derive(Debug, Clone)]
struct Master {
    path: PathBuf,
    runtime: PathBuf,
}

/// One worker's private copy of the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSandbox {
    pub worker_id: usize,
    pub path: PathBuf,
    /// Interpreter inside this copy (or the shared system interpreter)
    pub runtime: PathBuf,
}

impl WorkerSandbox {
    pub fn target(&self, code_relpath: &Path, test_relpath: &Path) -> SandboxTarget {
        SandboxTarget {
            root: self.path.clone(),
            code_relpath: code_relpath.to_path_buf(),
            test_relpath: test_relpath.to_path_buf(),
            runtime: self.runtime.clone(),
        }
    }
}

/// Source of per-worker sandbox copies.
pub trait SandboxProvider: Sync {
    fn create_worker_copy(&self, worker_id: usize) -> Result<WorkerSandbox>;
}

pub struct SandboxManager {
    repo_path: PathBuf,
    repo_name: String,
    temp_root: PathBuf,
    provisioner: Box<dyn RuntimeProvisioner>,
    master: Option<Master>,
}

impl SandboxManager {
    pub fn new(repo_path: &Path, temp_dir: &Path, provisioner: Box<dyn RuntimeProvisioner>) -> Result<Self> {
        let repo_path = fs::canonicalize(repo_path).map_err(|e| MortError::io(repo_path, e))?;
        fs::create_dir_all(temp_dir).map_err(|e| MortError::io(temp_dir, e))?;
        let temp_root = fs::canonicalize(temp_dir).map_err(|e| MortError::io(temp_dir, e))?;
        let repo_name = repo_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo".to_string());

        Ok(Self {
            repo_path,
            repo_name,
            temp_root,
            provisioner,
            master: None,
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn master_path(&self) -> Option<&Path> {
        self.master.as_ref().map(|m| m.path.as_path())
    }

    /// Interpreter recorded by the last successful provisioning.
    pub fn runtime_path(&self) -> Option<&Path> {
        self.master.as_ref().map(|m| m.runtime.as_path())
    }

    /// Stable per-repository master directory name.
    pub fn master_dir_name(&self) -> String {
        let hash = blake3::hash(self.repo_path.to_string_lossy().as_bytes());
        format!("{}_master_{}", self.repo_name, &hash.to_hex()[..8])
    }

    /// Build (or rebuild) the master copy and provision its runtime.
    ///
    /// Any failure removes the partial master and is fatal for the run.
    pub fn create_master_copy<S: AsRef<str>>(&mut self, exclude_patterns: &[S]) -> Result<PathBuf> {
        let master = self.temp_root.join(self.master_dir_name());
        log::info!("Creating master copy: {}", master.display());

        self.master = None;
        if master.exists() {
            fs::remove_dir_all(&master).map_err(|e| MortError::provision("cleanup", e.to_string()))?;
        }

        match self.build_master(&master, exclude_patterns) {
            Ok(runtime) => {
                log::info!("Master copy ready, runtime: {}", runtime.display());
                self.master = Some(Master {
                    path: master.clone(),
                    runtime,
                });
                Ok(master)
            }
            Err(e) => {
                log::error!("Master copy failed: {}", e);
                let _ = fs::remove_dir_all(&master);
                Err(e)
            }
        }
    }

    fn build_master<S: AsRef<str>>(&self, master: &Path, exclude_patterns: &[S]) -> Result<PathBuf> {
        let matcher = ExcludeMatcher::new(exclude_patterns)?;
        let copied = copy_tree(&self.repo_path, master, &matcher, Some(&self.temp_root))
            .map_err(|e| MortError::provision("copy", e.to_string()))?;
        log::debug!("Copied {} files into master", copied);

        self.provisioner.provision(master)
    }

    /// Copy the master, environment included, into a fresh worker directory.
    pub fn create_worker_copy(&self, worker_id: usize) -> Result<WorkerSandbox> {
        self.copy_master(worker_id)
    }

    fn copy_master(&self, worker_id: usize) -> Result<WorkerSandbox> {
        let master = self.master.as_ref().ok_or(MortError::MasterMissing)?;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}{}{}_{}", self.repo_name, WORKER_MARKER, worker_id, &suffix[..8]);
        let path = self.temp_root.join(name);

        log::debug!("Creating worker {} sandbox: {}", worker_id, path.display());
        if let Err(e) = copy_tree(&master.path, &path, &ExcludeMatcher::empty(), None) {
            let _ = fs::remove_dir_all(&path);
            return Err(e);
        }

        let runtime = match master.runtime.strip_prefix(&master.path) {
            Ok(rel) => path.join(rel),
            Err(_) => master.runtime.clone(),
        };

        Ok(WorkerSandbox {
            worker_id,
            path,
            runtime,
        })
    }

    /// Remove every worker directory under the temp root. Returns how many went.
    ///
    /// A directory that cannot be removed is logged and skipped; the rest are
    /// still removed.
    pub fn cleanup_worker_copies(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.temp_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(MortError::io(&self.temp_root, e)),
        };

        let mut removed = 0;
        let mut failed = 0;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry in {}: {}", self.temp_root.display(), e);
                    failed += 1;
                    continue;
                }
            };
            if !entry.file_name().to_string_lossy().contains(WORKER_MARKER) {
                continue;
            }
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    log::warn!("Failed to remove worker sandbox {}: {}", path.display(), e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            log::warn!("Removed {} worker sandboxes, {} left behind", removed, failed);
        } else {
            log::info!("Removed {} worker sandboxes", removed);
        }
        Ok(removed)
    }

    /// Path of `file_path` relative to the repository root.
    pub fn get_relative_path(&self, file_path: &Path) -> Result<PathBuf> {
        if file_path.is_relative() {
            return Ok(file_path.to_path_buf());
        }
        let resolved = fs::canonicalize(file_path).unwrap_or_else(|_| file_path.to_path_buf());
        resolved
            .strip_prefix(&self.repo_path)
            .map(Path::to_path_buf)
            .map_err(|_| MortError::OutsideRepository {
                path: file_path.to_path_buf(),
                repo: self.repo_path.clone(),
            })
    }
}

impl SandboxProvider for SandboxManager {
    fn create_worker_copy(&self, worker_id: usize) -> Result<WorkerSandbox> {
        self.copy_master(worker_id)
    }
}

/// Recursively copy `src` into `dst`, skipping entries whose file name matches
/// `exclude` and the `skip` subtree. Symlinks are recreated, not followed.
fn copy_tree(src: &Path, dst: &Path, exclude: &ExcludeMatcher, skip: Option<&Path>) -> Result<u64> {
    fs::create_dir_all(dst).map_err(|e| MortError::io(dst, e))?;

    let walker = WalkDir::new(src).follow_links(false).into_iter().filter_entry(|e| {
        if e.depth() == 0 {
            return true;
        }
        if skip.map(|s| e.path() == s).unwrap_or(false) {
            return false;
        }
        !exclude.is_excluded(&e.file_name().to_string_lossy())
    });

    let mut files = 0;
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            MortError::io(path, e.into())
        })?;
        if entry.depth() == 0 {
            continue;
        }

        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| MortError::io(&target, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| MortError::io(entry.path(), e))?;
            files += 1;
        }
    }

    Ok(files)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).map_err(|e| MortError::io(src, e))?;
    std::os::unix::fs::symlink(&link, dst).map_err(|e| MortError::io(dst, e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        return Ok(());
    }
    fs::copy(src, dst).map(|_| ()).map_err(|e| MortError::io(src, e))
}
