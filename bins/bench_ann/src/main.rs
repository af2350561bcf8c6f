//! ANN benchmark CLI tool.
//!
//! Measures recall and QPS of ANN indexes under a named system condition
//! (the experiment tag) and records the results per dataset.
//!
//! ## Commands
//!
//! ```bash
//! # Download datasets
//! bench_ann download --dataset sift-128-euclidean.hdf5 --data-dir ./ann/data
//!
//! # Build indexes only
//! bench_ann index --dataset sift-128-euclidean.hdf5 --runner flat
//!
//! # Benchmark under a tag (rerunning the same tag overwrites its rows)
//! numactl --interleave=all bench_ann bench --runner flat --tag interleave-all
//!
//! # Show recorded results
//! bench_ann results --dataset sift-128-euclidean
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use numa_ann_bench::telemetry;

mod commands;

#[derive(Parser)]
#[command(name = "bench_ann")]
#[command(version, about = "ANN benchmark tool for memory-placement experiments")]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download benchmark datasets
    Download(commands::DownloadArgs),

    /// Build (or reuse) index artifacts
    Index(commands::IndexArgs),

    /// Build or reuse indexes, run the trial loop, record results
    Bench(commands::BenchArgs),

    /// Print recorded results for a dataset
    Results(commands::ResultsArgs),

    /// List reference datasets
    Datasets,

    /// Print the tuning table as JSON
    Tuning(commands::TuningArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        telemetry::init_dev_subscriber(tracing::Level::DEBUG);
    } else {
        telemetry::init_dev_subscriber_with_env_filter();
    }

    match cli.command {
        Commands::Download(args) => commands::download(args),
        Commands::Index(args) => commands::index(args),
        Commands::Bench(args) => commands::bench(args),
        Commands::Results(args) => commands::results(args),
        Commands::Datasets => commands::list_datasets(),
        Commands::Tuning(args) => commands::tuning(args),
    }
}
