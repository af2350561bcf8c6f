//! Benchmark configuration.
//!
//! - [`TuningConfig`]: per-dataset runner parameters and distance family,
//!   passed explicitly to a session (JSON on disk).
//! - [`SessionConfig`]: directories, dataset/runner selection, experiment tag,
//!   and the trial stopping policy.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dataset::DEFAULT_BASE_URL;
use crate::distance::Distance;
use crate::error::BenchError;
use crate::runner::{GraphParams, IvfParams, RunnerKind, RunnerParams, TreeParams};
pub use crate::trial::TrialPolicy;

/// Tag used when the caller does not name the system condition.
pub const DEFAULT_TAG: &str = "default";

/// Tuning for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetTuning {
    /// Distance family. When absent it is parsed from the dataset name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<Distance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ivf: Option<IvfParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<TreeParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphParams>,
}

impl DatasetTuning {
    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn with_ivf(mut self, nlist: usize, nprobe: usize) -> Self {
        self.ivf = Some(IvfParams { nlist, nprobe });
        self
    }

    pub fn with_tree(mut self, trees: usize, search_k: usize) -> Self {
        self.tree = Some(TreeParams { trees, search_k });
        self
    }

    pub fn with_graph(mut self, expansion_search: usize) -> Self {
        self.graph = Some(GraphParams { expansion_search });
        self
    }

    /// Parameters for `kind`. The flat baseline needs none.
    pub fn params(&self, kind: RunnerKind) -> Option<RunnerParams> {
        match kind {
            RunnerKind::Ivf => self.ivf.map(RunnerParams::Ivf),
            RunnerKind::Tree => self.tree.map(RunnerParams::Tree),
            RunnerKind::Graph => self.graph.map(RunnerParams::Graph),
            RunnerKind::Flat => Some(RunnerParams::Flat),
        }
    }
}

/// Dataset file name → tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TuningConfig {
    datasets: BTreeMap<String, DatasetTuning>,
}

impl Default for TuningConfig {
    /// The three reference datasets with the parameters used in the
    /// memory-placement study.
    fn default() -> Self {
        Self::empty()
            .with_dataset(
                "glove-100-angular.hdf5",
                DatasetTuning::default()
                    .with_distance(Distance::Cosine)
                    .with_ivf(100, 20)
                    .with_tree(100, 200_000)
                    .with_graph(4000),
            )
            .with_dataset(
                "sift-128-euclidean.hdf5",
                DatasetTuning::default()
                    .with_distance(Distance::L2)
                    .with_ivf(100, 10)
                    .with_tree(100, 40_000)
                    .with_graph(256),
            )
            .with_dataset(
                "gist-960-euclidean.hdf5",
                DatasetTuning::default()
                    .with_distance(Distance::L2)
                    .with_ivf(100, 10)
                    .with_tree(100, 500_000)
                    .with_graph(3000),
            )
    }
}

impl TuningConfig {
    pub fn empty() -> Self {
        Self {
            datasets: BTreeMap::new(),
        }
    }

    pub fn with_dataset(mut self, name: impl Into<String>, tuning: DatasetTuning) -> Self {
        self.datasets.insert(name.into(), tuning);
        self
    }

    pub fn dataset_names(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    pub fn get(&self, dataset: &str) -> Option<&DatasetTuning> {
        self.datasets.get(dataset)
    }

    /// Distance family for `dataset`: explicit tuning first, then the
    /// `<name>-<dim>-<family>` naming convention.
    pub fn distance(&self, dataset: &str) -> Result<Distance, BenchError> {
        match self.get(dataset).and_then(|t| t.distance) {
            Some(d) => Ok(d),
            None => Distance::from_dataset_name(dataset),
        }
    }

    /// Runner parameters for `kind` on `dataset`, or an unsupported
    /// configuration error when the table has none.
    pub fn runner_params(
        &self,
        dataset: &str,
        kind: RunnerKind,
    ) -> Result<RunnerParams, BenchError> {
        if kind == RunnerKind::Flat {
            return Ok(RunnerParams::Flat);
        }
        self.get(dataset)
            .and_then(|t| t.params(kind))
            .ok_or_else(|| {
                BenchError::unsupported(format!(
                    "no {} tuning parameters for dataset '{}'",
                    kind, dataset
                ))
            })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tuning config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse tuning config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize tuning config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write tuning config {}", path.display()))?;
        Ok(())
    }
}

/// Settings for one benchmark session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where datasets are cached.
    pub data_dir: PathBuf,
    /// Where index artifacts are written.
    pub index_dir: PathBuf,
    /// Where result tables are written.
    pub result_dir: PathBuf,
    /// Dataset file names to process, in order.
    pub datasets: Vec<String>,
    /// Runners to build and benchmark, in order.
    pub runners: Vec<RunnerKind>,
    /// Experiment tag identifying the system condition.
    pub tag: String,
    /// Worker threads handed to each runner.
    pub threads: usize,
    /// Rebuild index artifacts even when present.
    pub recreate_index: bool,
    /// Run the trial loop after building (otherwise build only).
    pub bench: bool,
    /// Also persist per-trial rows.
    pub record_details: bool,
    /// Base URL datasets are downloaded from.
    pub base_url: String,
    /// Deadline for one whole dataset download. `None` never times out.
    pub download_timeout: Option<Duration>,
    pub policy: TrialPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("ann/data"),
            index_dir: PathBuf::from("ann/indices"),
            result_dir: default_result_dir(),
            datasets: TuningConfig::default().dataset_names(),
            runners: vec![RunnerKind::Flat],
            tag: DEFAULT_TAG.to_string(),
            threads: default_threads(),
            recreate_index: false,
            bench: true,
            record_details: true,
            base_url: DEFAULT_BASE_URL.to_string(),
            download_timeout: None,
            policy: TrialPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    pub fn with_index_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_dir = path.into();
        self
    }

    pub fn with_result_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.result_dir = path.into();
        self
    }

    pub fn with_datasets(mut self, datasets: Vec<String>) -> Self {
        self.datasets = datasets;
        self
    }

    pub fn with_runners(mut self, runners: Vec<RunnerKind>) -> Self {
        self.runners = runners;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_recreate_index(mut self, recreate: bool) -> Self {
        self.recreate_index = recreate;
        self
    }

    pub fn with_bench(mut self, bench: bool) -> Self {
        self.bench = bench;
        self
    }

    pub fn with_record_details(mut self, record: bool) -> Self {
        self.record_details = record;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_download_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: TrialPolicy) -> Self {
        self.policy = policy;
        self
    }
}

pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// `results/<platform>/ann`
pub fn default_result_dir() -> PathBuf {
    Path::new("results").join(platform_tag()).join("ann")
}

/// `<cpu brand>_<arch>` with parentheses dropped and whitespace runs
/// replaced by `_`, e.g. `Intel_R_Xeon_R_Gold_6230_CPU_@_2.10GHz_x86_64`.
pub fn platform_tag() -> String {
    let brand = fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|info| cpu_brand(&info))
        .unwrap_or_else(|| "unknown-cpu".to_string());
    format!("{}_{}", sanitize_brand(&brand), std::env::consts::ARCH)
}

fn cpu_brand(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|line| line.starts_with("model name"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, brand)| brand.trim().to_string())
}

fn sanitize_brand(brand: &str) -> String {
    brand
        .replace(['(', ')'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_tuning_covers_reference_datasets() {
        let tuning = TuningConfig::default();
        assert_eq!(tuning.dataset_names().len(), 3);
        assert_eq!(
            tuning.runner_params("sift-128-euclidean.hdf5", RunnerKind::Tree).unwrap(),
            RunnerParams::Tree(TreeParams {
                trees: 100,
                search_k: 40_000
            })
        );
        assert_eq!(
            tuning.distance("glove-100-angular.hdf5").unwrap(),
            Distance::Cosine
        );
    }

    #[test]
    fn test_missing_runner_params_is_unsupported() {
        let tuning = TuningConfig::empty()
            .with_dataset("tiny-4-euclidean", DatasetTuning::default().with_ivf(4, 2));
        assert!(tuning.runner_params("tiny-4-euclidean", RunnerKind::Ivf).is_ok());
        assert!(tuning.runner_params("tiny-4-euclidean", RunnerKind::Flat).is_ok());
        assert!(matches!(
            tuning.runner_params("tiny-4-euclidean", RunnerKind::Graph),
            Err(BenchError::UnsupportedConfig(_))
        ));
    }

    #[test]
    fn test_distance_falls_back_to_name() {
        let tuning = TuningConfig::empty();
        assert_eq!(tuning.distance("deep-96-angular.hdf5").unwrap(), Distance::Cosine);
        assert!(tuning.distance("mystery").is_err());
    }

    #[test]
    fn test_tuning_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tuning.json");
        let tuning = TuningConfig::default();
        tuning.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"search_k\": 500000"));
        assert_eq!(TuningConfig::load(&path).unwrap(), tuning);
    }

    #[test]
    fn test_sanitize_brand() {
        assert_eq!(
            sanitize_brand("Intel(R) Xeon(R) Gold 6230 CPU @ 2.10GHz"),
            "IntelR_XeonR_Gold_6230_CPU_@_2.10GHz"
        );
        let info = "processor\t: 0\nmodel name\t: AMD EPYC 7302 16-Core Processor\n";
        assert_eq!(
            cpu_brand(info).as_deref(),
            Some("AMD EPYC 7302 16-Core Processor")
        );
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::default()
            .with_tag("interleaved-memory")
            .with_threads(4)
            .with_runners(vec![RunnerKind::Ivf, RunnerKind::Graph]);
        assert_eq!(config.tag, "interleaved-memory");
        assert_eq!(config.threads, 4);
        assert_eq!(config.runners.len(), 2);
        assert!(config.bench);
    }
}
