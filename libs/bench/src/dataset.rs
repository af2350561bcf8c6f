//! Benchmark datasets: fetching and loading.
//!
//! Two on-disk layouts are understood:
//!
//! | Layout | Path | Contents |
//! |--------|------|----------|
//! | ann-benchmarks HDF5 (`hdf5` feature) | `<name>.hdf5` | `train`, `test`, `neighbors` datasets |
//! | fvecs bundle | directory | `train.fvecs`, `test.fvecs`, `neighbors.ivecs` |
//!
//! The ground-truth table width is the `k` used for Recall@k.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::BenchError;
use crate::store::sibling_temp_file;

/// Deadline for establishing a download connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// ann-benchmarks mirror used by the reference setup.
pub const DEFAULT_BASE_URL: &str = "http://ann-benchmarks.com";

pub const TRAIN_FILE: &str = "train.fvecs";
pub const TEST_FILE: &str = "test.fvecs";
pub const NEIGHBORS_FILE: &str = "neighbors.ivecs";

/// Vectors and ground truth for one benchmark dataset.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// Database vectors the index is built over.
    pub train: Vec<Vec<f32>>,
    /// Query vectors.
    pub test: Vec<Vec<f32>>,
    /// True nearest neighbor ids, one row per query.
    pub neighbors: Vec<Vec<usize>>,
}

impl Dataset {
    /// Load a dataset, picking the reader from the path layout.
    pub fn load(path: &Path) -> Result<Self> {
        let dataset = if path.is_dir() {
            Self::load_fvecs_bundle(path)?
        } else if path.extension().is_some_and(|ext| ext == "hdf5") {
            Self::load_hdf5(path)?
        } else {
            return Err(BenchError::Dataset(format!(
                "unrecognized dataset layout: {}",
                path.display()
            ))
            .into());
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Load a directory holding `train.fvecs`, `test.fvecs`, `neighbors.ivecs`.
    pub fn load_fvecs_bundle(dir: &Path) -> Result<Self> {
        let train = read_fvecs(&dir.join(TRAIN_FILE))?;
        let test = read_fvecs(&dir.join(TEST_FILE))?;
        let neighbors = read_ivecs(&dir.join(NEIGHBORS_FILE))?
            .iter()
            .map(|row| neighbor_ids(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            train,
            test,
            neighbors,
        })
    }

    /// Write this dataset as an fvecs bundle.
    pub fn save_fvecs_bundle(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        write_fvecs(&dir.join(TRAIN_FILE), &self.train)?;
        write_fvecs(&dir.join(TEST_FILE), &self.test)?;
        let neighbors: Vec<Vec<i32>> = self
            .neighbors
            .iter()
            .map(|row| row.iter().map(|&id| id as i32).collect())
            .collect();
        write_ivecs(&dir.join(NEIGHBORS_FILE), &neighbors)
    }

    #[cfg(feature = "hdf5")]
    pub fn load_hdf5(path: &Path) -> Result<Self> {
        let file = hdf5::File::open(path)
            .with_context(|| format!("Failed to open HDF5 file {}", path.display()))?;

        let read_f32 = |name: &str| -> Result<Vec<Vec<f32>>> {
            let ds = file
                .dataset(name)
                .map_err(|e| BenchError::Dataset(format!("'{}' is not a dataset: {}", name, e)))?;
            let arr = ds.read_2d::<f32>()?;
            Ok(arr.outer_iter().map(|row| row.to_vec()).collect())
        };

        let train = read_f32("train")?;
        let test = read_f32("test")?;
        let neighbors_ds = file.dataset("neighbors").map_err(|e| {
            BenchError::Dataset(format!("'neighbors' is not a dataset: {}", e))
        })?;
        let neighbors = neighbors_ds
            .read_2d::<i32>()?
            .outer_iter()
            .map(|row| neighbor_ids(&row.to_vec()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            train,
            test,
            neighbors,
        })
    }

    #[cfg(not(feature = "hdf5"))]
    pub fn load_hdf5(path: &Path) -> Result<Self> {
        Err(BenchError::unsupported(format!(
            "{} is an HDF5 dataset; rebuild with --features hdf5 (requires libhdf5)",
            path.display()
        ))
        .into())
    }

    /// Width of the ground-truth table.
    pub fn k(&self) -> usize {
        self.neighbors.first().map(|row| row.len()).unwrap_or(0)
    }

    pub fn dim(&self) -> usize {
        self.train.first().map(|v| v.len()).unwrap_or(0)
    }

    fn validate(&self) -> Result<(), BenchError> {
        if self.train.is_empty() || self.test.is_empty() {
            return Err(BenchError::Dataset(
                "dataset has no train or test vectors".to_string(),
            ));
        }
        if self.neighbors.len() != self.test.len() {
            return Err(BenchError::Dataset(format!(
                "{} ground-truth rows for {} test vectors",
                self.neighbors.len(),
                self.test.len()
            )));
        }
        let k = self.k();
        if k == 0 || self.neighbors.iter().any(|row| row.len() != k) {
            return Err(BenchError::Dataset(
                "ground-truth rows must be non-empty and of equal width".to_string(),
            ));
        }
        let dim = self.dim();
        if self
            .train
            .iter()
            .chain(self.test.iter())
            .any(|v| v.len() != dim)
        {
            return Err(BenchError::Dataset(format!(
                "vectors must all have {} dimensions",
                dim
            )));
        }
        Ok(())
    }
}

fn neighbor_ids(row: &[i32]) -> Result<Vec<usize>, BenchError> {
    row.iter()
        .map(|&id| {
            usize::try_from(id)
                .map_err(|_| BenchError::Dataset(format!("negative neighbor id {}", id)))
        })
        .collect()
}

/// Strip a trailing `.hdf5` from a dataset name
/// (`sift-128-euclidean.hdf5` → `sift-128-euclidean`).
pub fn dataset_base(name: &str) -> &str {
    name.strip_suffix(".hdf5").unwrap_or(name)
}

/// Make sure `name` exists under `data_dir`, downloading it from
/// `<base_url>/<name>` if it does not. The download has no overall deadline.
///
/// An existing file is trusted as-is. The download lands in a temporary file
/// next to the destination and is renamed into place only once complete, so an
/// interrupted fetch never looks cached.
pub fn fetch_dataset(name: &str, data_dir: &Path, base_url: &str) -> Result<PathBuf> {
    fetch_dataset_with_timeout(name, data_dir, base_url, None)
}

/// [`fetch_dataset`] with an optional deadline covering the whole transfer,
/// body included. `None` waits as long as the server keeps sending.
pub fn fetch_dataset_with_timeout(
    name: &str,
    data_dir: &Path,
    base_url: &str,
    timeout: Option<Duration>,
) -> Result<PathBuf> {
    let path = data_dir.join(name);
    if path.exists() {
        tracing::debug!("Dataset {} already present at {}", name, path.display());
        return Ok(path);
    }

    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let url = format!("{}/{}", base_url.trim_end_matches('/'), name);
    tracing::info!("Downloading {} from {} ...", name, url);

    let fetch_err = |e: reqwest::Error| BenchError::Fetch {
        url: url.clone(),
        status: e.to_string(),
    };
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
        .map_err(fetch_err)?;
    let mut response = client.get(&url).send().map_err(fetch_err)?;
    if !response.status().is_success() {
        return Err(BenchError::Fetch {
            url: url.clone(),
            status: response.status().to_string(),
        }
        .into());
    }

    let mut tmp = sibling_temp_file(&path, data_dir)
        .with_context(|| format!("Failed to create temporary file in {}", data_dir.display()))?;
    let bytes = response.copy_to(tmp.as_file_mut()).map_err(fetch_err)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path)
        .with_context(|| format!("Failed to move download into {}", path.display()))?;

    tracing::info!("Downloaded {} ({} bytes) to {}", name, bytes, path.display());
    Ok(path)
}

/// Read all vectors from an fvecs file.
///
/// Each record is a little-endian `i32` dimension followed by that many `f32`s.
pub fn read_fvecs(path: &Path) -> Result<Vec<Vec<f32>>> {
    read_vecs(path, f32::from_le_bytes)
}

/// Read all vectors from an ivecs file (same framing, `i32` components).
pub fn read_ivecs(path: &Path) -> Result<Vec<Vec<i32>>> {
    read_vecs(path, i32::from_le_bytes)
}

fn read_vecs<T>(path: &Path, decode: fn([u8; 4]) -> T) -> Result<Vec<Vec<T>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open vector file: {}", path.display()))?;
    let mut remaining = file
        .metadata()
        .with_context(|| format!("Failed to stat vector file: {}", path.display()))?
        .len();
    let mut reader = BufReader::new(file);
    let mut vectors = Vec::new();

    loop {
        let mut dim_buf = [0u8; 4];
        match reader.read_exact(&mut dim_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("Failed to read vector dimension"),
        }
        remaining = remaining.saturating_sub(4);
        let dim = i32::from_le_bytes(dim_buf);
        if dim < 0 {
            anyhow::bail!("negative dimension {} in {}", dim, path.display());
        }
        let payload = dim as u64 * 4;
        if payload > remaining {
            return Err(BenchError::Dataset(format!(
                "vector of dimension {} overruns {} ({} bytes left)",
                dim,
                path.display(),
                remaining
            ))
            .into());
        }
        remaining -= payload;

        let mut vector = Vec::with_capacity(dim as usize);
        for _ in 0..dim {
            let mut val_buf = [0u8; 4];
            reader
                .read_exact(&mut val_buf)
                .with_context(|| format!("Truncated vector in {}", path.display()))?;
            vector.push(decode(val_buf));
        }
        vectors.push(vector);
    }

    Ok(vectors)
}

/// Write vectors in fvecs framing.
pub fn write_fvecs(path: &Path, vectors: &[Vec<f32>]) -> Result<()> {
    write_vecs(path, vectors, |v| v.to_le_bytes())
}

/// Write vectors in ivecs framing.
pub fn write_ivecs(path: &Path, vectors: &[Vec<i32>]) -> Result<()> {
    write_vecs(path, vectors, |v| v.to_le_bytes())
}

fn write_vecs<T: Copy>(path: &Path, vectors: &[Vec<T>], encode: fn(T) -> [u8; 4]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create vector file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for vector in vectors {
        writer.write_all(&(vector.len() as i32).to_le_bytes())?;
        for &v in vector {
            writer.write_all(&encode(v))?;
        }
    }
    writer.flush()?;
    Ok(())
}
