//! Benchmark session: per dataset, fetch → build or reuse each runner's index
//! → adaptive trial loop → persist.
//!
//! Every dataset and runner is validated (distance family, tuning, backend)
//! before the first download or index build, so a bad configuration fails
//! without leaving partial artifacts behind.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{SessionConfig, TuningConfig};
use crate::dataset::{dataset_base, fetch_dataset_with_timeout, Dataset};
use crate::record::{ResultKey, SummaryRow};
use crate::runner::{AnnIndex, BackendRegistry, IndexConfig, RunnerKind};
use crate::store::ResultStore;
use crate::trial::{run_trials, TrialOutcome};

/// What happened for one (dataset, runner) pair.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub key: ResultKey,
    pub kind: RunnerKind,
    pub index_path: PathBuf,
    /// False when an existing artifact was reused.
    pub index_built: bool,
    /// `None` when the session only builds indexes.
    pub outcome: Option<TrialOutcome>,
    pub summary: Option<SummaryRow>,
}

struct RunnerPlan {
    kind: RunnerKind,
    config: IndexConfig,
    index: Box<dyn AnnIndex>,
}

pub struct BenchSession {
    config: SessionConfig,
    tuning: TuningConfig,
    backends: BackendRegistry,
    store: ResultStore,
}

impl BenchSession {
    pub fn new(config: SessionConfig, tuning: TuningConfig, backends: BackendRegistry) -> Self {
        let store = ResultStore::new(config.result_dir.clone());
        Self {
            config,
            tuning,
            backends,
            store,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// `<index_dir>/<dataset_base>.<ext>`
    pub fn index_path(&self, dataset: &str, kind: RunnerKind) -> PathBuf {
        self.config
            .index_dir
            .join(format!("{}.{}", dataset_base(dataset), kind.index_extension()))
    }

    /// Run every configured dataset in order.
    pub fn run(&self) -> Result<Vec<RunReport>> {
        let mut plans = Vec::with_capacity(self.config.datasets.len());
        for dataset in &self.config.datasets {
            plans.push((dataset.as_str(), self.plan(dataset)?));
        }

        let mut reports = Vec::new();
        for (dataset, runners) in plans {
            reports.extend(self.run_dataset(dataset, runners)?);
        }
        Ok(reports)
    }

    fn plan(&self, dataset: &str) -> Result<Vec<RunnerPlan>> {
        let distance = self
            .tuning
            .distance(dataset)
            .with_context(|| format!("Dataset {}", dataset))?;

        self.config
            .runners
            .iter()
            .map(|&kind| -> Result<RunnerPlan> {
                let params = self.tuning.runner_params(dataset, kind)?;
                let index = self.backends.create(kind)?;
                Ok(RunnerPlan {
                    kind,
                    config: IndexConfig { distance, params },
                    index,
                })
            })
            .collect()
    }

    fn run_dataset(&self, dataset: &str, runners: Vec<RunnerPlan>) -> Result<Vec<RunReport>> {
        let path = fetch_dataset_with_timeout(
            dataset,
            &self.config.data_dir,
            &self.config.base_url,
            self.config.download_timeout,
        )?;
        let data = Dataset::load(&path)
            .with_context(|| format!("Failed to load dataset {}", path.display()))?;
        let k = data.k();
        tracing::info!(
            "Dataset {}: {} train, {} test, dim {}, k {}",
            dataset,
            data.train.len(),
            data.test.len(),
            data.dim(),
            k
        );

        let base = dataset_base(dataset);
        let mut reports = Vec::with_capacity(runners.len());
        for mut plan in runners {
            let index_path = self.index_path(dataset, plan.kind);
            let index_built = self.build_or_reuse(&mut plan, &data, &index_path)?;
            let key = ResultKey::new(base, plan.index.name(), self.config.tag.clone());

            let (outcome, summary) = if self.config.bench {
                let (outcome, summary) = self.bench(&mut plan, &data, &index_path, &key, k)?;
                (Some(outcome), Some(summary))
            } else {
                (None, None)
            };

            reports.push(RunReport {
                key,
                kind: plan.kind,
                index_path,
                index_built,
                outcome,
                summary,
            });
        }
        Ok(reports)
    }

    fn build_or_reuse(
        &self,
        plan: &mut RunnerPlan,
        data: &Dataset,
        index_path: &Path,
    ) -> Result<bool> {
        if index_path.exists() && !self.config.recreate_index {
            tracing::info!("Reusing {} index {}", plan.kind, index_path.display());
            return Ok(false);
        }

        fs::create_dir_all(&self.config.index_dir).with_context(|| {
            format!(
                "Failed to create index directory {}",
                self.config.index_dir.display()
            )
        })?;
        tracing::info!("Building {} index {}", plan.kind, index_path.display());
        plan.index
            .create_index(&data.train, index_path, &plan.config)
            .with_context(|| format!("Failed to build {} index", plan.kind))?;
        Ok(true)
    }

    fn bench(
        &self,
        plan: &mut RunnerPlan,
        data: &Dataset,
        index_path: &Path,
        key: &ResultKey,
        k: usize,
    ) -> Result<(TrialOutcome, SummaryRow)> {
        plan.index
            .load_index(&data.train, index_path, self.config.threads, &plan.config)
            .with_context(|| format!("Failed to load {} index", plan.kind))?;

        let label = format!("{}/{}", key.dataset, key.runner);
        let outcome = run_trials(
            plan.index.as_ref(),
            &data.test,
            &data.neighbors,
            k,
            &self.config.policy,
            &label,
        )?;

        let summary = self.store.upsert_summary(key, &outcome.aggregate)?;
        if self.config.record_details {
            self.store.upsert_details(key, &outcome.trials)?;
        }

        let agg = &outcome.aggregate;
        tracing::info!(
            "[{}] Recall@{}: {:.4}  Time: {:.4}s ± {:.4}  QPS: {:.1} ± {:.1}  ({} runs, {:?})",
            label,
            k,
            agg.recall.mean,
            agg.time.mean,
            agg.time.std,
            agg.qps.mean,
            agg.qps.std,
            agg.nb_runs,
            outcome.stop_reason
        );
        Ok((outcome, summary))
    }
}
