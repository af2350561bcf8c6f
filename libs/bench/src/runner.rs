//! Index runners: the collaborator contract the trial loop measures.
//!
//! A runner is anything implementing [`AnnIndex`]. The harness selects
//! runners by [`RunnerKind`], a closed set chosen explicitly by the caller,
//! and instantiates them through a [`BackendRegistry`]. Only the exact
//! [`FlatIndex`] baseline ships with the crate; IVF, tree and graph backends
//! wrap third-party libraries and are registered by the embedding program.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::{read_fvecs, write_fvecs};
use crate::distance::Distance;
use crate::error::BenchError;

/// Index family under test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// Inverted-file index (faiss IVF-Flat in the reference setup).
    Ivf,
    /// Random-projection forest (annoy).
    Tree,
    /// Proximity graph (usearch).
    Graph,
    /// Exact brute-force baseline.
    Flat,
}

impl RunnerKind {
    pub const ALL: [RunnerKind; 4] = [
        RunnerKind::Ivf,
        RunnerKind::Tree,
        RunnerKind::Graph,
        RunnerKind::Flat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerKind::Ivf => "ivf",
            RunnerKind::Tree => "tree",
            RunnerKind::Graph => "graph",
            RunnerKind::Flat => "flat",
        }
    }

    /// File extension of the on-disk index artifact.
    pub fn index_extension(&self) -> &'static str {
        match self {
            RunnerKind::Ivf => "ivf",
            RunnerKind::Tree => "ann",
            RunnerKind::Graph => "usearch",
            RunnerKind::Flat => "flat",
        }
    }
}

impl FromStr for RunnerKind {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ivf" | "faiss" => Ok(RunnerKind::Ivf),
            "tree" | "annoy" => Ok(RunnerKind::Tree),
            "graph" | "usearch" => Ok(RunnerKind::Graph),
            "flat" | "exact" => Ok(RunnerKind::Flat),
            other => Err(BenchError::unsupported(format!("unknown runner '{}'", other))),
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvfParams {
    /// Number of inverted lists (build time).
    pub nlist: usize,
    /// Lists scanned per query (search time).
    pub nprobe: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Number of trees (build time).
    pub trees: usize,
    /// Nodes inspected per query (search time).
    pub search_k: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphParams {
    /// Candidate list size during search.
    pub expansion_search: usize,
}

/// Tuning parameters for one runner on one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerParams {
    Ivf(IvfParams),
    Tree(TreeParams),
    Graph(GraphParams),
    Flat,
}

/// Everything a runner needs besides the vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexConfig {
    pub distance: Distance,
    pub params: RunnerParams,
}

/// Output of one query batch.
#[derive(Debug, Clone, Default)]
pub struct QueryBatch {
    /// Predicted neighbor ids, one row per query.
    pub neighbors: Vec<Vec<usize>>,
    /// Time spent in the batch as measured by the runner.
    pub elapsed_s: f64,
}

/// Contract between the benchmark core and an ANN library.
///
/// `query_batch` may parallelise internally; callers only see the elapsed time.
pub trait AnnIndex: Send {
    /// Name written to the result tables (e.g. `faiss`).
    fn name(&self) -> &str;

    /// Build an index over `train` and write it to `path`.
    fn create_index(&mut self, train: &[Vec<f32>], path: &Path, config: &IndexConfig)
        -> Result<()>;

    /// Load a previously built index for querying with `threads` workers.
    fn load_index(
        &mut self,
        train: &[Vec<f32>],
        path: &Path,
        threads: usize,
        config: &IndexConfig,
    ) -> Result<()>;

    /// Return the top-k neighbor ids for every query.
    fn query_batch(&self, queries: &[Vec<f32>], k: usize) -> Result<QueryBatch>;
}

type Factory = Box<dyn Fn() -> Box<dyn AnnIndex> + Send + Sync>;

/// Maps each [`RunnerKind`] to a constructor for its backend.
pub struct BackendRegistry {
    factories: HashMap<RunnerKind, Factory>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl BackendRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the backends shipped in this crate (the flat baseline).
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(RunnerKind::Flat, || Box::new(FlatIndex::new()));
        registry
    }

    /// Register (or replace) the backend for `kind`.
    pub fn register<F>(&mut self, kind: RunnerKind, factory: F)
    where
        F: Fn() -> Box<dyn AnnIndex> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
    }

    pub fn contains(&self, kind: RunnerKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<RunnerKind> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Instantiate the backend for `kind`.
    pub fn create(&self, kind: RunnerKind) -> Result<Box<dyn AnnIndex>, BenchError> {
        self.factories
            .get(&kind)
            .map(|factory| factory())
            .ok_or_else(|| {
                BenchError::unsupported(format!(
                    "no backend registered for runner '{}' (available: {})",
                    kind,
                    self.kinds()
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

/// Exact brute-force index.
///
/// The artifact is an fvecs copy of the training vectors. Queries fan out over
/// a dedicated rayon pool sized by `load_index`'s thread count.
#[derive(Default)]
pub struct FlatIndex {
    vectors: Vec<Vec<f32>>,
    distance: Option<Distance>,
    pool: Option<rayon::ThreadPool>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn top_k(&self, distance: Distance, query: &[f32], k: usize) -> Vec<usize> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, distance.compute(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.into_iter().take(k).map(|(i, _)| i).collect()
    }
}

impl AnnIndex for FlatIndex {
    fn name(&self) -> &str {
        "flat"
    }

    fn create_index(
        &mut self,
        train: &[Vec<f32>],
        path: &Path,
        _config: &IndexConfig,
    ) -> Result<()> {
        tracing::info!(
            "Creating flat index {} ({} vectors)",
            path.display(),
            train.len()
        );
        write_fvecs(path, train)
            .with_context(|| format!("Failed to write flat index {}", path.display()))
    }

    fn load_index(
        &mut self,
        train: &[Vec<f32>],
        path: &Path,
        threads: usize,
        config: &IndexConfig,
    ) -> Result<()> {
        let vectors = read_fvecs(path)
            .with_context(|| format!("Failed to read flat index {}", path.display()))?;
        if vectors.len() != train.len() {
            anyhow::bail!(
                "flat index {} holds {} vectors, dataset has {}; rebuild the index",
                path.display(),
                vectors.len(),
                train.len()
            );
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
            .context("Failed to build query thread pool")?;

        tracing::info!(
            "Index loaded {}, vectors={}, distance={}, threads={}",
            path.display(),
            vectors.len(),
            config.distance,
            threads.max(1)
        );

        self.vectors = vectors;
        self.distance = Some(config.distance);
        self.pool = Some(pool);
        Ok(())
    }

    fn query_batch(&self, queries: &[Vec<f32>], k: usize) -> Result<QueryBatch> {
        let (Some(pool), Some(distance)) = (&self.pool, self.distance) else {
            anyhow::bail!("flat index queried before load_index");
        };

        let start = Instant::now();
        let neighbors: Vec<Vec<usize>> = pool.install(|| {
            queries
                .par_iter()
                .map(|q| self.top_k(distance, q, k))
                .collect()
        });
        let elapsed_s = start.elapsed().as_secs_f64();

        Ok(QueryBatch {
            neighbors,
            elapsed_s,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn flat_config() -> IndexConfig {
        IndexConfig {
            distance: Distance::L2,
            params: RunnerParams::Flat,
        }
    }

    #[test]
    fn test_runner_kind_aliases() {
        assert_eq!("faiss".parse::<RunnerKind>().unwrap(), RunnerKind::Ivf);
        assert_eq!("annoy".parse::<RunnerKind>().unwrap(), RunnerKind::Tree);
        assert_eq!("USEARCH".parse::<RunnerKind>().unwrap(), RunnerKind::Graph);
        assert!("hnswlib".parse::<RunnerKind>().is_err());
    }

    #[test]
    fn test_every_kind_parses_back_with_distinct_extension() {
        let mut extensions = std::collections::HashSet::new();
        for kind in RunnerKind::ALL {
            assert_eq!(kind.as_str().parse::<RunnerKind>().unwrap(), kind);
            assert!(extensions.insert(kind.index_extension()));
        }
    }

    #[test]
    fn test_registry_missing_backend_is_unsupported() {
        let registry = BackendRegistry::with_builtin();
        assert!(registry.contains(RunnerKind::Flat));
        let err = registry.create(RunnerKind::Ivf).err().unwrap();
        assert!(matches!(err, BenchError::UnsupportedConfig(msg) if msg.contains("ivf")));
    }

    #[test]
    fn test_flat_index_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiny.flat");
        let train = vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![5.0, 5.0],
        ];

        let mut index = FlatIndex::new();
        index.create_index(&train, &path, &flat_config()).unwrap();
        index.load_index(&train, &path, 2, &flat_config()).unwrap();

        let batch = index
            .query_batch(&[vec![0.9, 0.1], vec![4.0, 4.0]], 2)
            .unwrap();
        assert_eq!(batch.neighbors, vec![vec![1, 0], vec![3, 1]]);
        assert!(batch.elapsed_s >= 0.0);
    }

    #[test]
    fn test_flat_index_query_before_load() {
        let index = FlatIndex::new();
        assert!(index.query_batch(&[vec![0.0]], 1).is_err());
    }

    #[test]
    fn test_flat_index_stale_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stale.flat");
        let mut index = FlatIndex::new();
        index
            .create_index(&[vec![1.0], vec![2.0]], &path, &flat_config())
            .unwrap();

        let err = index
            .load_index(&[vec![1.0]], &path, 1, &flat_config())
            .unwrap_err();
        assert!(err.to_string().contains("rebuild"));
    }
}
