use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use passk_core::{is_known_problem, RunnerConfig};
use regex::Regex;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum SampleRunnerError {
    #[error("Reference module {path:?} not readable: {source}")]
    Reference {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Tests directory {0:?} does not exist")]
    MissingTests(PathBuf),
}

pub type Result<T> = std::result::Result<T, SampleRunnerError>;

/// Decides whether one candidate implementation passes its problem's suite.
///
/// Every failure mode of the candidate (syntax error, timeout, failed
/// assertion, crash) is reported as `false`.
#[async_trait]
pub trait SampleRunner: Send + Sync {
    async fn run(&self, problem: &str, candidate: &str) -> bool;
}

const OVERRIDE_MARKER: &str = "# === Override injected ===";

/// Runs pytest against the reference module with the candidate appended, in a
/// fresh temp directory per call.
pub struct PytestRunner {
    python: String,
    reference: String,
    tests_dir: PathBuf,
    timeout: Duration,
}

impl PytestRunner {
    pub fn new(config: &RunnerConfig) -> Result<Self> {
        let reference = std::fs::read_to_string(&config.reference_module).map_err(|source| {
            SampleRunnerError::Reference {
                path: config.reference_module.clone(),
                source,
            }
        })?;

        if !config.tests_dir.is_dir() {
            return Err(SampleRunnerError::MissingTests(config.tests_dir.clone()));
        }

        Ok(Self {
            python: config.python.clone(),
            reference,
            tests_dir: config.tests_dir.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// `Ok` when pytest exits cleanly; otherwise the reason the candidate failed.
    async fn evaluate(&self, problem: &str, candidate: &str) -> std::result::Result<(), String> {
        if !defines_function(candidate, problem) {
            return Err(format!("candidate does not define `{}`", problem));
        }

        let workspace = TempDir::new().map_err(|e| e.to_string())?;
        self.stage(workspace.path(), candidate)
            .map_err(|e| format!("staging failed: {}", e))?;

        let mut pytest = Command::new(&self.python);
        pytest
            .args(["-m", "pytest", "-q", "-k", problem, "tests"])
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = pytest
            .spawn()
            .map_err(|e| format!("could not start {}: {}", self.python, e))?;

        // Dropping the wait future on timeout kills pytest.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("timed out after {}ms", self.timeout.as_millis()))?
            .map_err(|e| e.to_string())?;

        if output.status.success() {
            return Ok(());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        // pytest's summary is the last line of stdout.
        let verdict = stdout
            .lines()
            .rev()
            .chain(stderr.lines().rev())
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default();
        Err(format!("pytest {}: {}", output.status, verdict.trim()))
    }

    /// Lay out `problems/` (reference + override) and a copy of the tests.
    fn stage(&self, root: &Path, candidate: &str) -> std::io::Result<()> {
        let package = root.join("problems");
        std::fs::create_dir_all(&package)?;
        std::fs::write(package.join("__init__.py"), "")?;

        let combined = format!(
            "{}\n\n{}\n{}\n",
            self.reference.trim_end(),
            OVERRIDE_MARKER,
            candidate
        );
        std::fs::write(package.join("problems.py"), combined)?;

        copy_tests(&self.tests_dir, &root.join("tests"))
    }
}

#[async_trait]
impl SampleRunner for PytestRunner {
    async fn run(&self, problem: &str, candidate: &str) -> bool {
        if !is_known_problem(problem) {
            tracing::warn!("Scoring unknown problem: {}", problem);
        }

        let start = Instant::now();
        let outcome = self.evaluate(problem, candidate).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(_) => {
                tracing::debug!("{} passed in {:.0}ms", problem, elapsed_ms);
                true
            }
            Err(reason) => {
                tracing::debug!("{} failed in {:.0}ms: {}", problem, elapsed_ms, reason);
                false
            }
        }
    }
}

fn function_def_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^\s*def\s+(\w+)\s*\(").expect("valid regex"))
}

/// Names of every function defined in Python source.
pub fn extract_function_names(code: &str) -> Vec<String> {
    function_def_pattern()
        .captures_iter(code)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn defines_function(code: &str, name: &str) -> bool {
    extract_function_names(code).iter().any(|f| f == name)
}

/// Mirror `src` into `dst`, leaving out bytecode caches.
fn copy_tests(src: &Path, dst: &Path) -> std::io::Result<()> {
    let walker = WalkDir::new(src)
        .into_iter()
        .filter_entry(|e| e.file_name() != "__pycache__");

    for entry in walker {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}
