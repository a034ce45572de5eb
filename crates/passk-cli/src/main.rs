use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use passk_core::{build_table, summarize, EvalConfig, StoreMode};
use passk_eval::{
    discover_samples, render, render_summary, scan, EvalEvent, Evaluator, OutputFormat,
    PytestRunner, ResultsStore, SampleRunner,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "passk")]
#[command(version)]
#[command(about = "passk - score generated code samples and aggregate pass@k", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate a results store into a pass@k table
    Aggregate {
        /// Results store (JSONL, one outcome record per line)
        results: Option<PathBuf>,

        /// k values to report (repeat or comma-separate; default 1,5)
        #[arg(short = 'k', long = "ks", value_delimiter = ',')]
        ks: Vec<u32>,

        /// Output format (table, json, csv)
        #[arg(short, long, default_value = "table")]
        output: OutputFormat,

        /// Decimal digits in the rendered values
        #[arg(long)]
        precision: Option<u32>,

        /// Also print per-model means across problems
        #[arg(long)]
        summary: bool,
    },

    /// Score a single sample against its problem's test suite
    Score {
        /// Problem identifier (e.g. two_sum)
        #[arg(short, long)]
        problem: String,

        /// Python file holding the candidate function
        #[arg(short, long)]
        sample_path: PathBuf,
    },

    /// Score every generated sample, record outcomes and write pass@k metrics
    Evaluate {
        /// Root of <problem>/<family>-<model>/<strategy>/sample_<id>.py
        #[arg(short, long, default_value = "runs/raw_generations")]
        generations: PathBuf,

        /// Results store to write (overrides config)
        #[arg(long)]
        results: Option<PathBuf>,

        /// Metrics JSON to write (overrides config)
        #[arg(long)]
        metrics: Option<PathBuf>,

        /// Keep existing records instead of resetting the store
        #[arg(long)]
        append: bool,

        /// Samples scored in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Per-sample time limit in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn env_override<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={}", key, raw);
            None
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EvalConfig> {
    let mut config = match path {
        Some(p) => EvalConfig::load(p).with_context(|| format!("Failed to load config {:?}", p))?,
        None => EvalConfig::default(),
    };

    if let Some(python) = env_override::<String>("PASSK_PYTHON") {
        config.runner.python = python;
    }
    if let Some(timeout_ms) = env_override("PASSK_TIMEOUT_MS") {
        config.runner.timeout_ms = timeout_ms;
    }
    if let Some(concurrency) = env_override("PASSK_CONCURRENCY") {
        config.runner.concurrency = concurrency;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        true => EnvFilter::new("debug"),
        false => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Aggregate {
            results,
            ks,
            output,
            precision,
            summary,
        } => {
            if !ks.is_empty() {
                config.aggregate.ks = ks;
            }
            if let Some(precision) = precision {
                config.aggregate.precision = precision;
            }
            let path = results.unwrap_or_else(|| config.store.results_path.clone());
            cmd_aggregate(&config, &path, output, summary)?
        }
        Commands::Score {
            problem,
            sample_path,
        } => cmd_score(&config, &problem, &sample_path).await?,
        Commands::Evaluate {
            generations,
            results,
            metrics,
            append,
            concurrency,
            timeout_ms,
        } => {
            if let Some(results) = results {
                config.store.results_path = results;
            }
            if let Some(metrics) = metrics {
                config.store.metrics_path = metrics;
            }
            if append {
                config.store.mode = StoreMode::Append;
            }
            if let Some(concurrency) = concurrency {
                config.runner.concurrency = concurrency;
            }
            if let Some(timeout_ms) = timeout_ms {
                config.runner.timeout_ms = timeout_ms;
            }
            config.validate()?;
            cmd_evaluate(&config, &generations).await?
        }
    }

    Ok(())
}

/// Everything `passk aggregate` prints, or the reason it must exit non-zero.
fn aggregate_report(
    config: &EvalConfig,
    results_path: &Path,
    output: OutputFormat,
    summary: bool,
) -> Result<String> {
    config.aggregate.validate()?;
    let ks = &config.aggregate.ks;
    let precision = config.aggregate.precision;

    let records = scan(results_path)
        .with_context(|| format!("Failed to read results store {:?}", results_path))?;
    let rows = build_table(&records, ks);

    let mut report = render(&rows, ks, output, precision)?;
    if output == OutputFormat::Json {
        report.push('\n');
    }
    if summary {
        report.push('\n');
        report.push_str(&render_summary(&summarize(&rows, ks), precision));
    }

    Ok(report)
}

fn cmd_aggregate(
    config: &EvalConfig,
    results_path: &Path,
    output: OutputFormat,
    summary: bool,
) -> Result<()> {
    print!("{}", aggregate_report(config, results_path, output, summary)?);
    Ok(())
}

async fn cmd_score(config: &EvalConfig, problem: &str, sample_path: &Path) -> Result<()> {
    let runner = PytestRunner::new(&config.runner)?;
    let candidate = std::fs::read_to_string(sample_path)
        .with_context(|| format!("Failed to read sample {:?}", sample_path))?;

    let passed = runner.run(problem, &candidate).await;

    println!(
        "{}",
        serde_json::json!({
            "problem": problem,
            "sample_path": sample_path,
            "pass": passed,
        })
    );

    Ok(())
}

async fn cmd_evaluate(config: &EvalConfig, generations: &Path) -> Result<()> {
    let jobs = discover_samples(generations)
        .with_context(|| format!("Failed to scan generations under {:?}", generations))?;
    if jobs.is_empty() {
        tracing::warn!("No samples found under {:?}", generations);
    }

    let runner = Arc::new(PytestRunner::new(&config.runner)?);
    let mut store = ResultsStore::open(&config.store.results_path, config.store.mode)?;
    let evaluator = Evaluator::new(runner, config.runner.concurrency);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight samples");
            ctrl_c.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel(64);
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                EvalEvent::Started { total } => println!("Scoring {} samples...", total),
                EvalEvent::SampleScored {
                    current,
                    total,
                    record,
                } => println!(
                    "  [{}/{}] {} {}/{} {} sample_{}: {}",
                    current,
                    total,
                    record.problem,
                    record.model_family,
                    record.model_name,
                    record.strategy,
                    record.sample_id,
                    if record.passed { "pass" } else { "fail" }
                ),
                EvalEvent::Cancelled { completed } => {
                    println!("Cancelled after {} samples", completed)
                }
                EvalEvent::Done { completed } => println!("Scored {} samples", completed),
            }
        }
    });

    evaluator.run(jobs, &mut store, cancel, tx).await?;
    let _ = progress.await;

    let results_path = store.path().to_path_buf();
    drop(store);

    let records = scan(&results_path)
        .with_context(|| format!("Failed to read results store {:?}", results_path))?;
    let ks = &config.aggregate.ks;
    let rows = build_table(&records, ks);

    let metrics_path = &config.store.metrics_path;
    if let Some(parent) = metrics_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        metrics_path,
        render(&rows, ks, OutputFormat::Json, config.aggregate.precision)?,
    )
    .with_context(|| format!("Failed to write metrics {:?}", metrics_path))?;

    println!();
    print!(
        "{}",
        render(&rows, ks, OutputFormat::Table, config.aggregate.precision)?
    );
    println!();
    println!("=== Aggregated pass@k written to {} ===", metrics_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{"problem": "two_sum", "model_family": "f1", "model_name": "m1", "strategy": "cot", "sample_id": 0, "passed": true}"#;

    #[test]
    fn test_aggregate_empty_store_prints_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        std::fs::write(&path, "").unwrap();

        let report =
            aggregate_report(&EvalConfig::default(), &path, OutputFormat::Table, false).unwrap();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("problem"));
        assert!(lines[0].ends_with("pass@5"));

        let json =
            aggregate_report(&EvalConfig::default(), &path, OutputFormat::Json, false).unwrap();
        assert_eq!(json, "[]\n");
    }

    #[test]
    fn test_aggregate_unreadable_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");

        let err = aggregate_report(&EvalConfig::default(), &path, OutputFormat::Table, false)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read results store"));
    }

    #[test]
    fn test_aggregate_malformed_record_names_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        std::fs::write(&path, format!("{}\n{{\"problem\": \"two_sum\"\n", RECORD)).unwrap();

        let err = aggregate_report(&EvalConfig::default(), &path, OutputFormat::Csv, false)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_aggregate_rejects_bad_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        std::fs::write(&path, format!("{}\n", RECORD)).unwrap();

        let mut config = EvalConfig::default();
        config.aggregate.ks = vec![1, 1];
        assert!(aggregate_report(&config, &path, OutputFormat::Json, false).is_err());

        let mut config = EvalConfig::default();
        config.aggregate.precision = 400;
        assert!(aggregate_report(&config, &path, OutputFormat::Json, false).is_err());

        config.aggregate.precision = 2;
        let report = aggregate_report(&config, &path, OutputFormat::Table, true).unwrap();
        assert!(report.contains("1.00"));
        assert!(report.contains("Summary (mean across problems):"));
    }
}
