//! Approximate nearest-neighbor benchmark harness.
//!
//! Measures recall and throughput of ANN indexes under different system
//! conditions (memory placement, page replication, ...) identified by a
//! free-form experiment tag. Each (dataset, runner, tag) key owns one summary
//! row and one block of per-trial rows in CSV tables that are rewritten
//! atomically, so repeated sessions overwrite their own results and leave
//! everyone else's alone.
//!
//! ```no_run
//! use numa_ann_bench::{BackendRegistry, BenchSession, SessionConfig, TuningConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = SessionConfig::default().with_tag("interleave-all");
//! let session = BenchSession::new(config, TuningConfig::default(), BackendRegistry::default());
//! for report in session.run()? {
//!     println!("{}: {:?}", report.key, report.summary);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dataset;
pub mod distance;
pub mod error;
pub mod metrics;
pub mod record;
pub mod runner;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod trial;

pub use config::{DatasetTuning, SessionConfig, TuningConfig};
pub use dataset::{fetch_dataset, fetch_dataset_with_timeout, Dataset};
pub use distance::Distance;
pub use error::{classify, BenchError};
pub use metrics::{MetricAccumulator, Metrics, SeriesStats};
pub use record::{DetailRow, ResultKey, SummaryRow};
pub use runner::{
    AnnIndex, BackendRegistry, FlatIndex, IndexConfig, QueryBatch, RunnerKind, RunnerParams,
};
pub use session::{BenchSession, RunReport};
pub use store::{ResultStore, ResultTable};
pub use trial::{
    run_trials, run_trials_with, RunAggregate, StopReason, Trial, TrialOutcome, TrialPolicy,
};
