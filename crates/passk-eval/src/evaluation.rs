use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use passk_core::{OutcomeRecord, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use crate::runner::SampleRunner;
use crate::store::ResultsStore;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvalEvent {
    Started { total: u32 },
    SampleScored { current: u32, total: u32, record: OutcomeRecord },
    Cancelled { completed: u32 },
    Done { completed: u32 },
}

/// One generated sample waiting to be scored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleJob {
    pub problem: String,
    pub model_family: String,
    pub model_name: String,
    pub strategy: String,
    pub sample_id: u64,
    pub path: PathBuf,
}

impl SampleJob {
    pub fn to_record(&self, passed: bool) -> OutcomeRecord {
        OutcomeRecord {
            problem: self.problem.clone(),
            model_family: self.model_family.clone(),
            model_name: self.model_name.clone(),
            strategy: self.strategy.clone(),
            sample_id: self.sample_id,
            passed,
        }
    }
}

/// `sample_<id>.py` -> id
fn parse_sample_id(file_name: &str) -> Option<u64> {
    file_name
        .strip_suffix(".py")?
        .strip_prefix("sample_")?
        .parse()
        .ok()
}

/// `<family>-<model>`, split on the first dash.
fn split_model_dir(name: &str) -> Option<(&str, &str)> {
    name.split_once('-')
        .filter(|(family, model)| !family.is_empty() && !model.is_empty())
}

/// Prunes `<family>-<model>` directories that lack the family prefix.
fn has_family_prefix(entry: &DirEntry) -> bool {
    if entry.depth() != 2 || !entry.file_type().is_dir() {
        return true;
    }
    let keep = entry
        .file_name()
        .to_str()
        .and_then(split_model_dir)
        .is_some();
    if !keep {
        tracing::warn!("Skipping model directory without family prefix: {:?}", entry.path());
    }
    keep
}

fn job_from_path(root: &Path, path: &Path) -> Option<SampleJob> {
    let parts: Vec<&str> = path
        .strip_prefix(root)
        .ok()?
        .iter()
        .map(|part| part.to_str())
        .collect::<Option<_>>()?;
    let [problem, model_dir, strategy, file_name] = parts.as_slice() else {
        return None;
    };
    let (family, model) = split_model_dir(model_dir)?;

    Some(SampleJob {
        problem: problem.to_string(),
        model_family: family.to_string(),
        model_name: model.to_string(),
        strategy: strategy.to_string(),
        sample_id: parse_sample_id(file_name)?,
        path: path.to_path_buf(),
    })
}

/// Walk `<root>/<problem>/<family>-<model>/<strategy>/sample_<id>.py`.
///
/// Jobs come back sorted so repeated runs score samples in the same order.
pub fn discover_samples(root: &Path) -> Result<Vec<SampleJob>> {
    let walker = WalkDir::new(root)
        .max_depth(4)
        .into_iter()
        .filter_entry(has_family_prefix);

    let mut jobs = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.depth() != 4 || entry.file_type().is_dir() {
            continue;
        }

        match job_from_path(root, entry.path()) {
            Some(job) => jobs.push(job),
            None => tracing::debug!("Skipping non-sample file {:?}", entry.path()),
        }
    }

    jobs.sort_by(|a, b| {
        (&a.problem, &a.model_family, &a.model_name, &a.strategy, a.sample_id).cmp(&(
            &b.problem,
            &b.model_family,
            &b.model_name,
            &b.strategy,
            b.sample_id,
        ))
    });

    tracing::info!("Discovered {} samples under {:?}", jobs.len(), root);
    Ok(jobs)
}

/// Scores samples on a bounded pool and appends each outcome to the store.
pub struct Evaluator {
    runner: Arc<dyn SampleRunner>,
    concurrency: usize,
}

impl Evaluator {
    pub fn new(runner: Arc<dyn SampleRunner>, concurrency: usize) -> Self {
        Self {
            runner,
            concurrency: concurrency.max(1),
        }
    }

    /// `None` if cancellation arrived before the sample started. A sample
    /// that has started always runs to completion and yields a record.
    async fn score(
        runner: Arc<dyn SampleRunner>,
        job: SampleJob,
        cancel: CancellationToken,
    ) -> Option<OutcomeRecord> {
        if cancel.is_cancelled() {
            return None;
        }

        let passed = match tokio::fs::read_to_string(&job.path).await {
            Ok(candidate) => runner.run(&job.problem, &candidate).await,
            Err(e) => {
                tracing::warn!("Could not read sample {:?}: {}", job.path, e);
                false
            }
        };

        Some(job.to_record(passed))
    }

    /// Returns the records scored before completion or cancellation.
    pub async fn run(
        &self,
        jobs: Vec<SampleJob>,
        store: &mut ResultsStore,
        cancel: CancellationToken,
        tx: mpsc::Sender<EvalEvent>,
    ) -> Result<Vec<OutcomeRecord>> {
        let total = jobs.len() as u32;
        let _ = tx.send(EvalEvent::Started { total }).await;
        tracing::info!(
            "Scoring {} samples with {} workers",
            total,
            self.concurrency
        );

        let mut outcomes = stream::iter(jobs)
            .map(|job| Self::score(self.runner.clone(), job, cancel.clone()))
            .buffer_unordered(self.concurrency);

        let mut records = Vec::with_capacity(total as usize);

        while let Some(outcome) = outcomes.next().await {
            let Some(record) = outcome else {
                continue;
            };

            store.append(&record)?;
            records.push(record.clone());

            let _ = tx
                .send(EvalEvent::SampleScored {
                    current: records.len() as u32,
                    total,
                    record,
                })
                .await;
        }

        let completed = records.len() as u32;
        match cancel.is_cancelled() {
            true => {
                tracing::info!("Evaluation cancelled after {}/{} samples", completed, total);
                let _ = tx.send(EvalEvent::Cancelled { completed }).await;
            }
            false => {
                tracing::info!("Evaluation finished: {} samples scored", completed);
                let _ = tx.send(EvalEvent::Done { completed }).await;
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use passk_core::StoreMode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::store::scan;

    /// Passes any candidate containing "PASS".
    struct MarkerRunner;

    #[async_trait]
    impl SampleRunner for MarkerRunner {
        async fn run(&self, _problem: &str, candidate: &str) -> bool {
            candidate.contains("PASS")
        }
    }

    /// Cancels the run from inside the first samples, then takes a while to
    /// finish them.
    struct CancellingRunner {
        cancel: CancellationToken,
        started: AtomicUsize,
    }

    #[async_trait]
    impl SampleRunner for CancellingRunner {
        async fn run(&self, _problem: &str, _candidate: &str) -> bool {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            tokio::time::sleep(Duration::from_millis(50)).await;
            true
        }
    }

    fn write_sample(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn fixture(root: &Path) {
        write_sample(root, "two_sum/google-models_gemini-2.5-flash/cot/sample_0.py", "PASS");
        write_sample(root, "two_sum/google-models_gemini-2.5-flash/cot/sample_1.py", "fail");
        write_sample(root, "two_sum/google-models_gemini-2.5-flash/self_repair/sample_0.py", "PASS");
        write_sample(root, "nth_fib/llama-llama3.2/cot/sample_3.py", "PASS");
        write_sample(root, "nth_fib/llama-llama3.2/cot/notes.txt", "ignored");
        write_sample(root, "nth_fib/nofamily/cot/sample_0.py", "PASS");
    }

    async fn drain(mut rx: mpsc::Receiver<EvalEvent>) -> Vec<EvalEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_parse_sample_id() {
        assert_eq!(parse_sample_id("sample_0.py"), Some(0));
        assert_eq!(parse_sample_id("sample_12.py"), Some(12));
        assert_eq!(parse_sample_id("sample_x.py"), None);
        assert_eq!(parse_sample_id("sample_1.txt"), None);
    }

    #[test]
    fn test_split_model_dir_on_first_dash() {
        assert_eq!(
            split_model_dir("google-models_gemini-2.5-flash"),
            Some(("google", "models_gemini-2.5-flash"))
        );
        assert_eq!(split_model_dir("llama-llama3.2"), Some(("llama", "llama3.2")));
        assert_eq!(split_model_dir("nofamily"), None);
        assert_eq!(split_model_dir("-model"), None);
    }

    #[test]
    fn test_discover_samples_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());

        let jobs = discover_samples(dir.path()).unwrap();
        let ids: Vec<(&str, &str, u64)> = jobs
            .iter()
            .map(|j| (j.problem.as_str(), j.strategy.as_str(), j.sample_id))
            .collect();

        assert_eq!(
            ids,
            vec![
                ("nth_fib", "cot", 3),
                ("two_sum", "cot", 0),
                ("two_sum", "cot", 1),
                ("two_sum", "self_repair", 0),
            ]
        );
        assert_eq!(jobs[1].model_family, "google");
        assert_eq!(jobs[1].model_name, "models_gemini-2.5-flash");
    }

    #[tokio::test]
    async fn test_run_scores_and_persists_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        let generations = dir.path().join("raw_generations");
        fixture(&generations);
        let results = dir.path().join("results.jsonl");

        let jobs = discover_samples(&generations).unwrap();
        let mut store = ResultsStore::open(&results, StoreMode::Overwrite).unwrap();
        let evaluator = Evaluator::new(Arc::new(MarkerRunner), 2);
        let (tx, rx) = mpsc::channel(64);

        let records = evaluator
            .run(jobs, &mut store, CancellationToken::new(), tx)
            .await
            .unwrap();
        drop(store);

        assert_eq!(records.len(), 4);
        assert_eq!(records.iter().filter(|r| r.passed).count(), 3);

        let mut persisted = scan(&results).unwrap();
        let mut expected = records.clone();
        persisted.sort_by_key(|r| (r.problem.clone(), r.strategy.clone(), r.sample_id));
        expected.sort_by_key(|r| (r.problem.clone(), r.strategy.clone(), r.sample_id));
        assert_eq!(persisted, expected);

        let events = drain(rx).await;
        assert!(matches!(events.first(), Some(EvalEvent::Started { total: 4 })));
        assert!(matches!(events.last(), Some(EvalEvent::Done { completed: 4 })));
    }

    #[tokio::test]
    async fn test_cancelled_run_scores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let generations = dir.path().join("raw_generations");
        fixture(&generations);

        let jobs = discover_samples(&generations).unwrap();
        let mut store =
            ResultsStore::open(&dir.path().join("results.jsonl"), StoreMode::Overwrite).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, rx) = mpsc::channel(64);

        let records = Evaluator::new(Arc::new(MarkerRunner), 4)
            .run(jobs, &mut store, cancel, tx)
            .await
            .unwrap();

        assert!(records.is_empty());
        assert_eq!(store.written(), 0);
        let events = drain(rx).await;
        assert!(matches!(events.last(), Some(EvalEvent::Cancelled { completed: 0 })));
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_samples_finish() {
        let dir = tempfile::tempdir().unwrap();
        let generations = dir.path().join("raw_generations");
        fixture(&generations);
        let results = dir.path().join("results.jsonl");

        let jobs = discover_samples(&generations).unwrap();
        assert_eq!(jobs.len(), 4);
        let mut store = ResultsStore::open(&results, StoreMode::Overwrite).unwrap();
        let cancel = CancellationToken::new();
        let runner = Arc::new(CancellingRunner {
            cancel: cancel.clone(),
            started: AtomicUsize::new(0),
        });
        let (tx, rx) = mpsc::channel(64);

        let records = Evaluator::new(runner.clone(), 2)
            .run(jobs, &mut store, cancel, tx)
            .await
            .unwrap();
        drop(store);

        // Both workers had started before the first cancel; nothing after.
        assert_eq!(runner.started.load(Ordering::SeqCst), 2);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.passed));

        let mut persisted = scan(&results).unwrap();
        let mut expected = records.clone();
        persisted.sort_by_key(|r| (r.problem.clone(), r.strategy.clone(), r.sample_id));
        expected.sort_by_key(|r| (r.problem.clone(), r.strategy.clone(), r.sample_id));
        assert_eq!(persisted, expected);

        let events = drain(rx).await;
        assert!(matches!(events.last(), Some(EvalEvent::Cancelled { completed: 2 })));
    }

    #[tokio::test]
    async fn test_unreadable_sample_is_a_fail() {
        let dir = tempfile::tempdir().unwrap();
        let job = SampleJob {
            problem: "two_sum".to_string(),
            model_family: "f1".to_string(),
            model_name: "m1".to_string(),
            strategy: "cot".to_string(),
            sample_id: 0,
            path: dir.path().join("missing.py"),
        };

        let record = Evaluator::score(Arc::new(MarkerRunner), job, CancellationToken::new()).await;
        assert_eq!(record.map(|r| r.passed), Some(false));
    }
}
