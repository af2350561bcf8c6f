//! Result rows persisted by the [`ResultStore`](crate::store::ResultStore).

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::trial::{RunAggregate, Trial};

/// Identifies one logical experiment.
///
/// The dataset selects the table; (runner, tag) selects the rows within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey {
    pub dataset: String,
    pub runner: String,
    pub tag: String,
}

impl ResultKey {
    pub fn new(
        dataset: impl Into<String>,
        runner: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            runner: runner.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.dataset, self.runner, self.tag)
    }
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// One row of the summary table.
///
/// Field order is the column order on disk. The timestamp columns may be
/// absent in tables written by older versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub runner_name: String,
    pub nb_runs: usize,
    pub tag: String,
    pub mean_recall: f64,
    pub mean_time: f64,
    pub std_time: f64,
    pub mean_qps: f64,
    pub std_qps: f64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

impl SummaryRow {
    pub const HEADER: [&'static str; 10] = [
        "runner_name",
        "nb_runs",
        "tag",
        "mean_recall",
        "mean_time",
        "std_time",
        "mean_qps",
        "std_qps",
        "start_time",
        "end_time",
    ];

    pub fn from_aggregate(key: &ResultKey, agg: &RunAggregate) -> Self {
        Self {
            runner_name: key.runner.clone(),
            nb_runs: agg.nb_runs,
            tag: key.tag.clone(),
            mean_recall: agg.recall.mean,
            mean_time: agg.time.mean,
            std_time: agg.time.std,
            mean_qps: agg.qps.mean,
            std_qps: agg.qps.std,
            start_time: Some(timestamp(&agg.started_at)),
            end_time: Some(timestamp(&agg.ended_at)),
        }
    }

    /// (runner_name, nb_runs, tag) ascending.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        self.runner_name
            .cmp(&other.runner_name)
            .then(self.nb_runs.cmp(&other.nb_runs))
            .then_with(|| self.tag.cmp(&other.tag))
    }
}

/// One row of the per-trial detail table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRow {
    pub runner_name: String,
    pub tag: String,
    pub run_id: usize,
    pub recall: f64,
    pub total_time: f64,
    pub qps: f64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

impl DetailRow {
    pub const HEADER: [&'static str; 8] = [
        "runner_name",
        "tag",
        "run_id",
        "recall",
        "total_time",
        "qps",
        "start_time",
        "end_time",
    ];

    pub fn from_trial(key: &ResultKey, run_id: usize, trial: &Trial) -> Self {
        Self {
            runner_name: key.runner.clone(),
            tag: key.tag.clone(),
            run_id,
            recall: trial.recall,
            total_time: trial.elapsed_s,
            qps: trial.qps,
            start_time: Some(timestamp(&trial.started_at)),
            end_time: Some(timestamp(&trial.ended_at)),
        }
    }

    /// (runner_name, tag, run_id) ascending, keeping each block contiguous.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        self.runner_name
            .cmp(&other.runner_name)
            .then_with(|| self.tag.cmp(&other.tag))
            .then(self.run_id.cmp(&other.run_id))
    }
}
