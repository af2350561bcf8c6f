//! CLI command implementations for ANN benchmarks.
//!
//! - Download: fetch datasets into the data directory
//! - Index: build (or reuse) index artifacts without benchmarking
//! - Bench: build or reuse, run the adaptive trial loop, record results
//! - Results: print the summary table of a dataset
//! - Tuning: dump the tuning table as JSON

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use numa_ann_bench::config::{default_result_dir, default_threads, DEFAULT_TAG};
use numa_ann_bench::dataset::{dataset_base, DEFAULT_BASE_URL};
use numa_ann_bench::trial::{
    DEFAULT_MAX_ELAPSED, DEFAULT_MIN_TRIALS, DEFAULT_STD_DEV_STOP_THRESHOLD,
};
use numa_ann_bench::{
    fetch_dataset_with_timeout, BackendRegistry, BenchSession, ResultStore, RunReport,
    RunnerKind, SessionConfig, TrialPolicy, TuningConfig,
};

// ============================================================================
// Shared arguments
// ============================================================================

#[derive(Parser, Debug, Clone)]
pub struct DatasetArgs {
    /// Dataset file names (repeatable). Defaults to every dataset in the tuning table.
    #[arg(long = "dataset")]
    pub datasets: Vec<String>,

    /// Directory holding downloaded datasets
    #[arg(long, default_value = "ann/data")]
    pub data_dir: PathBuf,

    /// Base URL datasets are downloaded from
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Tuning table (JSON). Defaults to the built-in table.
    #[arg(long)]
    pub tuning: Option<PathBuf>,

    /// Give up on a download after this many seconds (default: never)
    #[arg(long)]
    pub download_timeout: Option<f64>,
}

impl DatasetArgs {
    fn download_timeout(&self) -> Result<Option<Duration>> {
        self.download_timeout
            .map(|secs| seconds("--download-timeout", secs))
            .transpose()
    }

    fn load_tuning(&self) -> Result<TuningConfig> {
        match &self.tuning {
            Some(path) => TuningConfig::load(path),
            None => Ok(TuningConfig::default()),
        }
    }

    fn resolve_datasets(&self, tuning: &TuningConfig) -> Vec<String> {
        if self.datasets.is_empty() {
            tuning.dataset_names()
        } else {
            self.datasets.clone()
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct RunnerArgs {
    /// Runners to use: ivf (faiss), tree (annoy), graph (usearch), flat (exact)
    #[arg(long = "runner", default_value = "flat")]
    pub runners: Vec<RunnerKind>,

    /// Directory holding index artifacts
    #[arg(long, default_value = "ann/indices")]
    pub index_dir: PathBuf,

    /// Rebuild indexes even if they already exist
    #[arg(long)]
    pub recreate_index: bool,

    /// Worker threads per runner (default: available parallelism)
    #[arg(long)]
    pub threads: Option<usize>,
}

/// Parse a non-negative number of seconds given on the command line.
fn seconds(flag: &str, secs: f64) -> Result<Duration> {
    if secs < 0.0 {
        anyhow::bail!("{} must not be negative, got {}", flag, secs);
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) => Ok(duration),
        Err(e) => anyhow::bail!("{} {} is not a valid duration: {}", flag, secs, e),
    }
}

fn session_config(
    datasets: &DatasetArgs,
    runners: &RunnerArgs,
    tuning: &TuningConfig,
) -> Result<SessionConfig> {
    Ok(SessionConfig::default()
        .with_data_dir(&datasets.data_dir)
        .with_base_url(&datasets.base_url)
        .with_download_timeout(datasets.download_timeout()?)
        .with_datasets(datasets.resolve_datasets(tuning))
        .with_index_dir(&runners.index_dir)
        .with_runners(runners.runners.clone())
        .with_recreate_index(runners.recreate_index)
        .with_threads(runners.threads.unwrap_or_else(default_threads)))
}

// ============================================================================
// Download Command
// ============================================================================

#[derive(Parser)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub datasets: DatasetArgs,
}

pub fn download(args: DownloadArgs) -> Result<()> {
    let tuning = args.datasets.load_tuning()?;
    let timeout = args.datasets.download_timeout()?;
    for name in args.datasets.resolve_datasets(&tuning) {
        let path = fetch_dataset_with_timeout(
            &name,
            &args.datasets.data_dir,
            &args.datasets.base_url,
            timeout,
        )?;
        println!("{}: {}", name, path.display());
    }
    Ok(())
}

// ============================================================================
// Index Command
// ============================================================================

#[derive(Parser)]
pub struct IndexArgs {
    #[command(flatten)]
    pub datasets: DatasetArgs,

    #[command(flatten)]
    pub runners: RunnerArgs,
}

pub fn index(args: IndexArgs) -> Result<()> {
    let tuning = args.datasets.load_tuning()?;
    let config = session_config(&args.datasets, &args.runners, &tuning)?.with_bench(false);

    let session = BenchSession::new(config, tuning, BackendRegistry::default());
    for report in session.run()? {
        println!(
            "{} {} {}",
            report.key.dataset,
            if report.index_built { "built" } else { "reused" },
            report.index_path.display()
        );
    }
    Ok(())
}

// ============================================================================
// Bench Command
// ============================================================================

#[derive(Parser)]
pub struct BenchArgs {
    #[command(flatten)]
    pub datasets: DatasetArgs,

    #[command(flatten)]
    pub runners: RunnerArgs,

    /// Experiment tag naming the system condition (e.g. interleave-all)
    #[arg(long, default_value = DEFAULT_TAG)]
    pub tag: String,

    /// Directory for result tables (default: results/<cpu>_<arch>/ann)
    #[arg(long)]
    pub result_dir: Option<PathBuf>,

    /// Minimum trials before the stability check may stop the loop
    #[arg(long, default_value_t = DEFAULT_MIN_TRIALS)]
    pub min_trials: usize,

    /// Wall-clock ceiling for one trial loop, in seconds
    #[arg(long, default_value_t = DEFAULT_MAX_ELAPSED.as_secs_f64())]
    pub max_elapsed: f64,

    /// Stop once the stddev of trial times (seconds) is at or below this
    #[arg(long, default_value_t = DEFAULT_STD_DEV_STOP_THRESHOLD)]
    pub std_threshold: f64,

    /// Do not write the per-trial table
    #[arg(long)]
    pub no_details: bool,
}

pub fn bench(args: BenchArgs) -> Result<()> {
    let tuning = args.datasets.load_tuning()?;
    let policy = TrialPolicy::default()
        .with_min_trials(args.min_trials)
        .with_max_elapsed(seconds("--max-elapsed", args.max_elapsed)?)
        .with_std_dev_stop_threshold(args.std_threshold);
    let config = session_config(&args.datasets, &args.runners, &tuning)?
        .with_tag(args.tag.clone())
        .with_result_dir(args.result_dir.clone().unwrap_or_else(default_result_dir))
        .with_record_details(!args.no_details)
        .with_policy(policy);

    let session = BenchSession::new(config, tuning, BackendRegistry::default());
    let config = session.config();
    println!("=== ANN Benchmark ===");
    println!("Tag: {}", config.tag);
    println!("Results: {}", config.result_dir.display());
    println!("Threads: {}", config.threads);

    let reports = session.run()?;
    print_reports(&reports);
    Ok(())
}

fn print_reports(reports: &[RunReport]) {
    println!(
        "\n{:<28} {:<8} {:>6} {:>8} {:>12} {:>12}",
        "dataset", "runner", "runs", "recall", "time (s)", "qps"
    );
    for report in reports {
        if let Some(outcome) = &report.outcome {
            let agg = &outcome.aggregate;
            println!(
                "{:<28} {:<8} {:>6} {:>8.4} {:>12.4} {:>12.1}",
                report.key.dataset,
                report.key.runner,
                agg.nb_runs,
                agg.recall.mean,
                agg.time.mean,
                agg.qps.mean
            );
        }
    }
}

// ============================================================================
// Results Command
// ============================================================================

#[derive(Parser)]
pub struct ResultsArgs {
    /// Dataset to show (file name or base name)
    #[arg(long)]
    pub dataset: String,

    /// Directory for result tables (default: results/<cpu>_<arch>/ann)
    #[arg(long)]
    pub result_dir: Option<PathBuf>,

    /// Show the per-trial table instead of the summary
    #[arg(long)]
    pub details: bool,
}

pub fn results(args: ResultsArgs) -> Result<()> {
    let store = ResultStore::new(args.result_dir.unwrap_or_else(default_result_dir));
    let base = dataset_base(&args.dataset);

    if args.details {
        let table = store.load_details(base)?;
        println!(
            "{:<10} {:<24} {:>4} {:>8} {:>12} {:>12}",
            "runner", "tag", "run", "recall", "time (s)", "qps"
        );
        for row in table.rows() {
            println!(
                "{:<10} {:<24} {:>4} {:>8.4} {:>12.4} {:>12.1}",
                row.runner_name, row.tag, row.run_id, row.recall, row.total_time, row.qps
            );
        }
        return Ok(());
    }

    let table = store.load_summary(base)?;
    if table.is_empty() {
        println!("No results in {}", store.summary_path(base).display());
        return Ok(());
    }
    println!(
        "{:<10} {:>5} {:<24} {:>8} {:>16} {:>20}",
        "runner", "runs", "tag", "recall", "time (s)", "qps"
    );
    for row in table.rows() {
        println!(
            "{:<10} {:>5} {:<24} {:>8.4} {:>8.4} ± {:<6.4} {:>10.1} ± {:<8.1}",
            row.runner_name,
            row.nb_runs,
            row.tag,
            row.mean_recall,
            row.mean_time,
            row.std_time,
            row.mean_qps,
            row.std_qps
        );
    }
    Ok(())
}

// ============================================================================
// Datasets / Tuning Commands
// ============================================================================

#[derive(Parser)]
pub struct TuningArgs {
    /// Tuning table to show (JSON). Defaults to the built-in table.
    #[arg(long)]
    pub tuning: Option<PathBuf>,

    /// Write the table to this file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

pub fn list_datasets() -> Result<()> {
    let tuning = TuningConfig::default();
    println!("Reference datasets:\n");
    for name in tuning.dataset_names() {
        let distance = tuning.distance(&name)?;
        println!("  {:<28} {}", name, distance);
    }

    let backends = BackendRegistry::default();
    println!("\nRunners:\n");
    for kind in RunnerKind::ALL {
        let status = if backends.contains(kind) {
            "built in"
        } else {
            "needs a registered backend"
        };
        println!("  {:<8} .{:<8} {}", kind, kind.index_extension(), status);
    }

    #[cfg(not(feature = "hdf5"))]
    {
        println!("\nHDF5 datasets: Enable with --features hdf5 (requires libhdf5)");
    }
    println!("\nAny directory holding train.fvecs, test.fvecs and neighbors.ivecs");
    println!("under the data directory can be used as a dataset as well.");

    println!("\n--- Usage Examples ---\n");
    println!("Benchmark the exact baseline on SIFT:");
    println!("  bench_ann bench --dataset sift-128-euclidean.hdf5 --runner flat --tag node0\n");
    println!("Show recorded results:");
    println!("  bench_ann results --dataset sift-128-euclidean");
    Ok(())
}

pub fn tuning(args: TuningArgs) -> Result<()> {
    let tuning = match &args.tuning {
        Some(path) => TuningConfig::load(path)?,
        None => TuningConfig::default(),
    };
    match &args.output {
        Some(path) => {
            tuning.save(path)?;
            println!("Tuning table written to {}", path.display());
        }
        None => {
            let json =
                serde_json::to_string_pretty(&tuning).context("Failed to serialize tuning table")?;
            println!("{}", json);
        }
    }
    Ok(())
}
