//! Test framework detection.
//!
//! The heuristic lives behind [`FrameworkClassifier`] so it can be swapped
//! without touching the runner.

use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestFramework {
    Pytest,
    Unittest,
}

impl TestFramework {
    /// Build the command that runs `test_relpath` from the sandbox root.
    pub fn command(&self, runtime: &Path, sandbox: &Path, test_relpath: &Path) -> Command {
        let mut cmd = Command::new(runtime);
        cmd.current_dir(sandbox);
        match self {
            TestFramework::Pytest => {
                cmd.args(["-m", "pytest"]).arg(sandbox.join(test_relpath)).arg("-v");
            }
            TestFramework::Unittest => {
                cmd.args(["-m", "unittest"]).arg(module_name(test_relpath)).arg("-v");
            }
        }
        cmd
    }
}

impl std::fmt::Display for TestFramework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestFramework::Pytest => write!(f, "pytest"),
            TestFramework::Unittest => write!(f, "unittest"),
        }
    }
}

/// Decides which framework a test file is written for.
pub trait FrameworkClassifier: Send + Sync {
    fn classify(&self, test_code: &str) -> TestFramework;
}

/// Keyword-counting classifier.
///
/// Tie-break: pytest wins only with strictly more indicators; otherwise any
/// unittest indicator selects unittest; with no indicators at all the more
/// permissive pytest is used (it also collects unittest-style classes).
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

const PYTEST_INDICATORS: &[&str] = &["import pytest", "from pytest import", "@pytest.", "def test_"];

const UNITTEST_INDICATORS: &[&str] = &[
    "import unittest",
    "from unittest import",
    "unittest.TestCase",
    "class Test",
];

impl FrameworkClassifier for KeywordClassifier {
    fn classify(&self, test_code: &str) -> TestFramework {
        let count = |indicators: &[&str]| indicators.iter().filter(|i| test_code.contains(*i)).count();
        let pytest = count(PYTEST_INDICATORS);
        let unittest = count(UNITTEST_INDICATORS);

        if pytest > unittest {
            TestFramework::Pytest
        } else if unittest > 0 {
            TestFramework::Unittest
        } else {
            TestFramework::Pytest
        }
    }
}

/// `tests/test_users.py` -> `tests.test_users`
fn module_name(test_relpath: &Path) -> String {
    let s = test_relpath.to_string_lossy().replace(['/', '\\'], ".");
    s.strip_suffix(".py").map(str::to_string).unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pytest_file() {
        let code = "import pytest\n\n@pytest.fixture\ndef svc():\n    pass\n\ndef test_x(svc):\n    assert True\n";
        assert_eq!(KeywordClassifier.classify(code), TestFramework::Pytest);
    }

    #[test]
    fn test_unittest_file() {
        let code = "import unittest\n\nclass TestUsers(unittest.TestCase):\n    def test_a(self):\n        pass\n";
        // 1 pytest indicator (def test_) vs 3 unittest indicators
        assert_eq!(KeywordClassifier.classify(code), TestFramework::Unittest);
    }

    #[test]
    fn test_tie_prefers_unittest_when_present() {
        let code = "import unittest\ndef test_a():\n    pass\n";
        assert_eq!(KeywordClassifier.classify(code), TestFramework::Unittest);
    }

    #[test]
    fn test_no_signal_defaults_to_pytest() {
        assert_eq!(KeywordClassifier.classify("assert 1 == 1\n"), TestFramework::Pytest);
    }

    #[test]
    fn test_module_name() {
        assert_eq!(module_name(Path::new("tests/test_users.py")), "tests.test_users");
        assert_eq!(module_name(Path::new("test_flat.py")), "test_flat");
    }

    #[test]
    fn test_unittest_command_uses_module() {
        let cmd = TestFramework::Unittest.command(
            Path::new("/venv/bin/python"),
            Path::new("/sandbox"),
            Path::new("tests/test_users.py"),
        );
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-m", "unittest", "tests.test_users", "-v"]);
    }
}
