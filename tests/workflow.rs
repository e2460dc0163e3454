use mort::chunker::IndentChunker;
use mort::collaborators::{EquivalenceOracle, MutationProposer, MutationRequest, TestProposer};
use mort::runner::SandboxTarget;
use mort::sandbox::RuntimeProvisioner;
use mort::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CALC: &str = r#"import math


def add(a, b):
    return a + b


def sub(a, b):
    return a - b


if __name__ == "__main__":
    print(add(1, 2), math.pi)
"#;

const CALC_TESTS: &str = "from app.calc import add, sub


def test_add():
    assert add(1, 2) == 3
";

const KILLING_TEST: &str = "def test_kills():\n    pass\n";

/// Shifts every return value by one; proposes a fixed killing test.
struct Collaborators {
    proposals: AtomicUsize,
    produce_mutants: bool,
}

impl MutationProposer for Collaborators {
    fn propose_mutation(&self, request: &MutationRequest<'_>) -> anyhow::Result<Option<String>> {
        self.proposals.fetch_add(1, Ordering::SeqCst);
        if !self.produce_mutants {
            return Ok(None);
        }
        Ok(Some(request.chunk.original_code.replace("return ", "return 1 + ")))
    }
}

impl TestProposer for Collaborators {
    fn propose_test(&self, _: &str, _: &str, _: &str) -> anyhow::Result<Option<String>> {
        Ok(Some(KILLING_TEST.to_string()))
    }
}

impl EquivalenceOracle for Collaborators {
    fn is_equivalent(&self, _: &str, _: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Writes the candidate into the sandbox and checks nobody else touched it.
#[derive(Default)]
struct SandboxCheckingExecutor {
    roots: Mutex<HashSet<PathBuf>>,
    clobbered: AtomicUsize,
}

impl TestExecutor for SandboxCheckingExecutor {
    fn run_tests(&self, candidate_code: &str, test_code: &str, target: &SandboxTarget) -> TestOutcome {
        self.roots.lock().insert(target.root.clone());

        let code_path = target.code_path();
        fs::write(&code_path, candidate_code).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        if fs::read_to_string(&code_path).unwrap() != candidate_code {
            self.clobbered.fetch_add(1, Ordering::SeqCst);
        }

        let mutated = candidate_code.contains("return 1 + ");
        if mutated && test_code.contains("test_kills") {
            TestOutcome::BuildsFails
        } else {
            TestOutcome::BuildsPasses
        }
    }
}

struct FakeVenv;

impl RuntimeProvisioner for FakeVenv {
    fn provision(&self, sandbox: &Path) -> mort::Result<PathBuf> {
        let bin = sandbox.join(".venv_testing").join("bin");
        fs::create_dir_all(&bin).map_err(|e| MortError::io(&bin, e))?;
        let python = bin.join("python");
        fs::write(&python, "").map_err(|e| MortError::io(&python, e))?;
        Ok(python)
    }
}

struct BrokenVenv;

impl RuntimeProvisioner for BrokenVenv {
    fn provision(&self, _: &Path) -> mort::Result<PathBuf> {
        Err(MortError::provision("dependencies", "pip exited with status 1"))
    }
}

struct Fixture {
    repo: tempfile::TempDir,
    temp: tempfile::TempDir,
    out: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let repo = tempfile::tempdir().unwrap();
        fs::create_dir_all(repo.path().join("app")).unwrap();
        fs::create_dir_all(repo.path().join("tests")).unwrap();
        fs::write(repo.path().join("app/__init__.py"), "").unwrap();
        fs::write(repo.path().join("app/calc.py"), CALC).unwrap();
        fs::write(repo.path().join("tests/test_calc.py"), CALC_TESTS).unwrap();
        fs::write(repo.path().join("requirements.txt"), "pytest\n").unwrap();

        Self {
            repo,
            temp: tempfile::tempdir().unwrap(),
            out: tempfile::tempdir().unwrap(),
        }
    }

    fn code(&self) -> PathBuf {
        self.repo.path().join("app/calc.py")
    }

    fn tests(&self) -> PathBuf {
        self.repo.path().join("tests/test_calc.py")
    }

    fn config(&self, workers: usize) -> MortConfig {
        let mut config = MortConfig::default();
        config.output_dir = self.out.path().to_path_buf();
        config.execution.max_workers = workers;
        config
    }

    fn orchestrator(
        &self,
        config: &MortConfig,
        provisioner: Box<dyn RuntimeProvisioner>,
        collaborators: Arc<Collaborators>,
        executor: Arc<SandboxCheckingExecutor>,
    ) -> WorkflowOrchestrator {
        let sandbox = SandboxManager::new(self.repo.path(), self.temp.path(), provisioner).unwrap();
        let pipeline = MutationPipeline::new(
            collaborators.clone(),
            collaborators.clone(),
            collaborators,
            executor,
            config.concern.clone(),
        );
        WorkflowOrchestrator::new(sandbox, Arc::new(IndentChunker), pipeline, config)
    }

    fn worker_dirs(&self) -> usize {
        fs::read_dir(self.temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("_worker_"))
            .count()
    }
}

fn collaborators(produce_mutants: bool) -> Arc<Collaborators> {
    Arc::new(Collaborators {
        proposals: AtomicUsize::new(0),
        produce_mutants,
    })
}

#[test]
fn full_run_accepts_every_mutable_chunk() {
    let fx = Fixture::new();
    let config = fx.config(2);
    let executor = Arc::new(SandboxCheckingExecutor::default());
    let mut orchestrator = fx.orchestrator(&config, Box::new(FakeVenv), collaborators(true), executor.clone());

    let report = orchestrator.run_workflow(&fx.code(), &fx.tests()).unwrap();

    assert_eq!(report.total_chunks, 2);
    assert_eq!(report.successful_count, 2);
    assert_eq!(report.skipped_count, 0);
    assert_eq!(report.failed_count, 0);
    let ids: Vec<&str> = report.mutants.iter().map(|m| m.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["add", "sub"]);

    for mutant in &report.mutants {
        assert_eq!(mutant.hash.len(), 12);
        assert_eq!(mutant.test, KILLING_TEST);
        assert!(mutant.mutated_file.contains("return 1 + "));
        assert!(mutant.mutated_file.contains("if __name__ == \"__main__\":"));
    }

    // Workers are removed; the master stays for inspection.
    assert_eq!(fx.worker_dirs(), 0);
    assert!(orchestrator.sandbox().master_path().unwrap().join("app/calc.py").is_file());
    assert_eq!(fs::read_to_string(fx.code()).unwrap(), CALC);
}

#[test]
fn parallel_workers_never_share_a_sandbox() {
    let fx = Fixture::new();
    let config = fx.config(2);
    let executor = Arc::new(SandboxCheckingExecutor::default());
    let mut orchestrator = fx.orchestrator(&config, Box::new(FakeVenv), collaborators(true), executor.clone());

    orchestrator.run_workflow(&fx.code(), &fx.tests()).unwrap();

    assert_eq!(executor.clobbered.load(Ordering::SeqCst), 0);
    let roots = executor.roots.lock();
    assert!(!roots.is_empty() && roots.len() <= 2);
    let master = orchestrator.sandbox().master_path().unwrap();
    for root in roots.iter() {
        assert_ne!(root.as_path(), master);
        assert!(root.file_name().unwrap().to_string_lossy().contains("_worker_"));
        assert!(!root.starts_with(fx.repo.path()));
    }
}

#[test]
fn rerun_skips_persisted_chunks_without_asking_the_proposer() {
    let fx = Fixture::new();
    let config = fx.config(2);

    let mut first = fx.orchestrator(
        &config,
        Box::new(FakeVenv),
        collaborators(true),
        Arc::new(SandboxCheckingExecutor::default()),
    );
    let report = first.run_workflow(&fx.code(), &fx.tests()).unwrap();
    let store = first.metadata_store(&fx.code());
    store.persist(&report).unwrap();
    assert!(store.dir().join("mutant_add.py").is_file());
    assert!(store.dir().join("test_sub.py").is_file());

    let second_collaborators = collaborators(true);
    let mut second = fx.orchestrator(
        &config,
        Box::new(FakeVenv),
        second_collaborators.clone(),
        Arc::new(SandboxCheckingExecutor::default()),
    );
    let rerun = second.run_workflow(&fx.code(), &fx.tests()).unwrap();

    assert_eq!(rerun.skipped_count, 2);
    assert_eq!(rerun.successful_count, 0);
    assert_eq!(second_collaborators.proposals.load(Ordering::SeqCst), 0);
    assert_eq!(fx.worker_dirs(), 0);
}

#[test]
fn provisioning_failure_aborts_the_run() {
    let fx = Fixture::new();
    let config = fx.config(2);
    let proposer = collaborators(true);
    let mut orchestrator = fx.orchestrator(
        &config,
        Box::new(BrokenVenv),
        proposer.clone(),
        Arc::new(SandboxCheckingExecutor::default()),
    );

    let err = orchestrator.run_workflow(&fx.code(), &fx.tests()).unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, MortError::SandboxProvision { stage: "dependencies", .. }));
    assert_eq!(proposer.proposals.load(Ordering::SeqCst), 0);
}

#[test]
fn run_without_survivors_is_ok_and_empty() {
    let fx = Fixture::new();
    let config = fx.config(3);
    let proposer = collaborators(false);
    let mut orchestrator = fx.orchestrator(
        &config,
        Box::new(FakeVenv),
        proposer.clone(),
        Arc::new(SandboxCheckingExecutor::default()),
    );

    let report = orchestrator.run_workflow(&fx.code(), &fx.tests()).unwrap();

    assert!(report.is_empty());
    assert_eq!(report.successful_count, 0);
    assert_eq!(report.failed_count, 2);
    assert_eq!(proposer.proposals.load(Ordering::SeqCst), 2);
}

#[test]
fn max_chunks_limits_the_run() {
    let fx = Fixture::new();
    let mut config = fx.config(1);
    config.execution.max_chunks = Some(1);
    let proposer = collaborators(true);
    let mut orchestrator = fx.orchestrator(
        &config,
        Box::new(FakeVenv),
        proposer.clone(),
        Arc::new(SandboxCheckingExecutor::default()),
    );

    let report = orchestrator.run_workflow(&fx.code(), &fx.tests()).unwrap();

    assert_eq!(report.total_chunks, 1);
    assert_eq!(report.mutants[0].chunk_id, "add");
    assert_eq!(proposer.proposals.load(Ordering::SeqCst), 1);
}

#[test]
fn code_outside_the_repository_is_rejected() {
    let fx = Fixture::new();
    let elsewhere = tempfile::tempdir().unwrap();
    let stray = elsewhere.path().join("stray.py");
    fs::write(&stray, CALC).unwrap();

    let config = fx.config(1);
    let mut orchestrator = fx.orchestrator(
        &config,
        Box::new(FakeVenv),
        collaborators(true),
        Arc::new(SandboxCheckingExecutor::default()),
    );

    let err = orchestrator.run_workflow(&stray, &fx.tests()).unwrap_err();
    assert!(matches!(err, MortError::OutsideRepository { .. }));
}
