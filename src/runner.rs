//! Test execution inside a sandbox.
//!
//! A run writes the candidate code and test file into the sandbox, picks the
//! framework, executes it under a timeout and folds the output into a
//! three-way [`TestOutcome`].

use crate::framework::{FrameworkClassifier, KeywordClassifier};
use crate::process::{self, ExecOutcome, ProcessOutput};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    BuildsPasses,
    BuildsFails,
    DoesNotBuild,
}

impl TestOutcome {
    pub fn builds(&self) -> bool {
        !matches!(self, TestOutcome::DoesNotBuild)
    }

    pub fn passes(&self) -> bool {
        matches!(self, TestOutcome::BuildsPasses)
    }
}

/// Where a test run happens: the sandbox root, the files to overwrite in it,
/// and the interpreter to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxTarget {
    pub root: PathBuf,
    pub code_relpath: PathBuf,
    pub test_relpath: PathBuf,
    pub runtime: PathBuf,
}

impl SandboxTarget {
    pub fn code_path(&self) -> PathBuf {
        self.root.join(&self.code_relpath)
    }

    pub fn test_path(&self) -> PathBuf {
        self.root.join(&self.test_relpath)
    }
}

/// Runs a test file against a candidate code file.
pub trait TestExecutor: Send + Sync {
    fn run_tests(&self, candidate_code: &str, test_code: &str, target: &SandboxTarget) -> TestOutcome;
}

/// Decides whether source text parses.
pub trait SyntaxChecker: Send + Sync {
    /// `Ok(false)` means the source does not parse; `Err` means the check
    /// itself could not run.
    fn check(&self, source: &str, runtime: &Path) -> std::io::Result<bool>;
}

/// Parses with the target interpreter's `ast` module; the source is fed on
/// stdin so nothing touches the sandbox.
#[derive(Debug, Clone, Default)]
pub struct PythonSyntaxChecker;

const AST_PARSE: &str = "import ast,sys; ast.parse(sys.stdin.read())";

impl SyntaxChecker for PythonSyntaxChecker {
    fn check(&self, source: &str, runtime: &Path) -> std::io::Result<bool> {
        let mut child = Command::new(runtime)
            .args(["-c", AST_PARSE])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(source.as_bytes())?;
        }
        Ok(child.wait()?.success())
    }
}

/// Subprocess-backed [`TestExecutor`].
pub struct TestRunner {
    timeout: Duration,
    classifier: Box<dyn FrameworkClassifier>,
    syntax: Box<dyn SyntaxChecker>,
}

impl TestRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            classifier: Box::new(KeywordClassifier),
            syntax: Box::new(PythonSyntaxChecker),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn FrameworkClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_syntax_checker(mut self, syntax: Box<dyn SyntaxChecker>) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn try_run(&self, candidate_code: &str, test_code: &str, target: &SandboxTarget) -> anyhow::Result<TestOutcome> {
        if !self.syntax.check(candidate_code, &target.runtime)? {
            log::debug!("Candidate for {} does not parse", target.code_relpath.display());
            return Ok(TestOutcome::DoesNotBuild);
        }

        write_file(&target.code_path(), candidate_code)?;
        write_file(&target.test_path(), test_code)?;

        let framework = self.classifier.classify(test_code);
        log::debug!(
            "Running {} with {} in {}",
            target.test_relpath.display(),
            framework,
            target.root.display()
        );

        let cmd = framework.command(&target.runtime, &target.root, &target.test_relpath);
        match process::run_with_timeout(cmd, self.timeout)? {
            ExecOutcome::Completed(output) => Ok(classify_output(&output)),
            ExecOutcome::TimedOut { elapsed } => {
                log::warn!(
                    "Test run timed out after {:.1}s: {}",
                    elapsed.as_secs_f64(),
                    target.test_relpath.display()
                );
                Ok(TestOutcome::BuildsFails)
            }
        }
    }
}

impl TestExecutor for TestRunner {
    fn run_tests(&self, candidate_code: &str, test_code: &str, target: &SandboxTarget) -> TestOutcome {
        match self.try_run(candidate_code, test_code, target) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Test execution failed in {}: {:#}", target.root.display(), e);
                TestOutcome::BuildsFails
            }
        }
    }
}

/// Fold captured output into a [`TestOutcome`].
pub fn classify_output(output: &ProcessOutput) -> TestOutcome {
    let stderr = output.stderr.as_str();

    if stderr.contains("ImportError") || stderr.contains("ModuleNotFoundError") {
        return TestOutcome::DoesNotBuild;
    }
    if stderr.contains("SyntaxError") || stderr.contains("IndentationError") {
        return TestOutcome::DoesNotBuild;
    }
    // Collection errors: nothing ran, so nothing failed.
    if stderr.contains("ERROR") && !output.stdout.contains("FAILED") {
        return TestOutcome::DoesNotBuild;
    }

    if output.success() {
        TestOutcome::BuildsPasses
    } else {
        TestOutcome::BuildsFails
    }
}

fn write_file(path: &Path, content: &str) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn output(code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
        use std::os::unix::process::ExitStatusExt;
        ProcessOutput {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn python() -> Option<PathBuf> {
        let ok = Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        ok.then(|| PathBuf::from("python3"))
    }

    #[test]
    fn test_outcome_predicates() {
        assert!(TestOutcome::BuildsPasses.builds() && TestOutcome::BuildsPasses.passes());
        assert!(TestOutcome::BuildsFails.builds() && !TestOutcome::BuildsFails.passes());
        assert!(!TestOutcome::DoesNotBuild.builds() && !TestOutcome::DoesNotBuild.passes());
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_output() {
        assert_eq!(classify_output(&output(0, "2 passed", "")), TestOutcome::BuildsPasses);
        assert_eq!(classify_output(&output(1, "1 failed", "")), TestOutcome::BuildsFails);
        assert_eq!(
            classify_output(&output(1, "", "ModuleNotFoundError: No module named 'x'")),
            TestOutcome::DoesNotBuild
        );
        assert_eq!(
            classify_output(&output(1, "", "IndentationError: unexpected indent")),
            TestOutcome::DoesNotBuild
        );
        // unittest reports failing assertions on stderr as "FAIL:", errors as "ERROR:"
        assert_eq!(
            classify_output(&output(1, "", "ERROR: test_x (tests.test_a)")),
            TestOutcome::DoesNotBuild
        );
        assert_eq!(
            classify_output(&output(1, "test_a FAILED", "ERROR in teardown")),
            TestOutcome::BuildsFails
        );
    }

    #[test]
    fn test_python_syntax_checker() {
        let Some(python) = python() else { return };
        let checker = PythonSyntaxChecker;
        assert!(checker.check("def f(x):\n    return x + 1\n", &python).unwrap());
        assert!(!checker.check("def f(x)\n    return x +\n", &python).unwrap());
    }

    fn unittest_target(root: &Path, python: PathBuf) -> SandboxTarget {
        SandboxTarget {
            root: root.to_path_buf(),
            code_relpath: PathBuf::from("calc.py"),
            test_relpath: PathBuf::from("test_calc.py"),
            runtime: python,
        }
    }

    const TEST_CALC: &str = "import unittest\nfrom calc import add\n\n\
        class TestCalc(unittest.TestCase):\n    def test_add(self):\n        self.assertEqual(add(2, 2), 4)\n";

    #[test]
    fn test_runner_three_way_outcomes() {
        let Some(python) = python() else { return };
        let dir = tempfile::tempdir().unwrap();
        let target = unittest_target(dir.path(), python);
        let runner = TestRunner::new(Duration::from_secs(30));

        let good = "def add(a, b):\n    return a + b\n";
        let wrong = "def add(a, b):\n    return a - b\n";
        let broken = "def add(a, b)\n    return a +\n";

        assert_eq!(runner.run_tests(good, TEST_CALC, &target), TestOutcome::BuildsPasses);
        assert_eq!(runner.run_tests(wrong, TEST_CALC, &target), TestOutcome::BuildsFails);
        assert_eq!(runner.run_tests(broken, TEST_CALC, &target), TestOutcome::DoesNotBuild);

        // The last successfully parsed candidate is what remains on disk.
        let on_disk = std::fs::read_to_string(target.code_path()).unwrap();
        assert_eq!(on_disk, wrong);
    }

    #[test]
    fn test_runner_timeout_is_builds_fails() {
        let Some(python) = python() else { return };
        let dir = tempfile::tempdir().unwrap();
        let target = unittest_target(dir.path(), python);
        let runner = TestRunner::new(Duration::from_secs(1));

        let sleepy = "import unittest\nimport time\n\n\
            class TestSlow(unittest.TestCase):\n    def test_sleep(self):\n        time.sleep(30)\n";
        let start = std::time::Instant::now();
        assert_eq!(
            runner.run_tests("X = 1\n", sleepy, &target),
            TestOutcome::BuildsFails
        );
        assert!(start.elapsed() < Duration::from_secs(15));
    }

    #[test]
    fn test_missing_interpreter_is_builds_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = unittest_target(dir.path(), PathBuf::from("/no/such/python"));
        let runner = TestRunner::new(Duration::from_secs(1));
        assert_eq!(runner.run_tests("X = 1\n", TEST_CALC, &target), TestOutcome::BuildsFails);
    }
}
