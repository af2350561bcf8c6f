//! Durable result tables with upsert-by-key semantics.
//!
//! Every update is read → drop rows for (runner, tag) → append → sort →
//! rewrite the whole file. The rewrite goes to a temporary file in the same
//! directory which is then renamed over the table, so readers see either the
//! old table or the new one. Concurrent writers to the same table are not
//! supported.
//!
//! | Table | File | Key |
//! |-------|------|-----|
//! | summary | `<dataset>.csv` | (runner_name, tag) |
//! | detail | `<dataset>.runs.csv` | (runner_name, tag, run_id) |

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::BenchError;
use crate::record::{DetailRow, ResultKey, SummaryRow};
use crate::trial::{RunAggregate, Trial};

/// A row type stored in a [`ResultTable`].
pub trait TableRow: Serialize + DeserializeOwned + Clone {
    fn header() -> &'static [&'static str];
    fn runner_name(&self) -> &str;
    fn tag(&self) -> &str;
    fn table_cmp(&self, other: &Self) -> Ordering;

    fn matches(&self, runner: &str, tag: &str) -> bool {
        self.runner_name() == runner && self.tag() == tag
    }
}

impl TableRow for SummaryRow {
    fn header() -> &'static [&'static str] {
        &Self::HEADER
    }
    fn runner_name(&self) -> &str {
        &self.runner_name
    }
    fn tag(&self) -> &str {
        &self.tag
    }
    fn table_cmp(&self, other: &Self) -> Ordering {
        self.sort_cmp(other)
    }
}

impl TableRow for DetailRow {
    fn header() -> &'static [&'static str] {
        &Self::HEADER
    }
    fn runner_name(&self) -> &str {
        &self.runner_name
    }
    fn tag(&self) -> &str {
        &self.tag
    }
    fn table_cmp(&self, other: &Self) -> Ordering {
        self.sort_cmp(other)
    }
}

/// In-memory copy of one result table.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable<R> {
    rows: Vec<R>,
}

impl<R> Default for ResultTable<R> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<R: TableRow> ResultTable<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<R>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows belonging to (runner, tag), in table order.
    pub fn rows_for<'a>(&'a self, runner: &'a str, tag: &'a str) -> impl Iterator<Item = &'a R> {
        self.rows.iter().filter(move |r| r.matches(runner, tag))
    }

    /// Read a table; a missing file is an empty table.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(BenchError::storage(path, e).into()),
        };

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
        let rows = reader
            .deserialize::<R>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BenchError::storage(path, e))?;
        Ok(Self { rows })
    }

    /// Replace every row of (runner, tag) with `new_rows`, then re-sort.
    ///
    /// Every new row must itself belong to (runner, tag); otherwise the table
    /// is left untouched.
    pub fn replace(
        &mut self,
        runner: &str,
        tag: &str,
        new_rows: Vec<R>,
    ) -> Result<(), BenchError> {
        if let Some(stray) = new_rows.iter().find(|r| !r.matches(runner, tag)) {
            return Err(BenchError::KeyMismatch {
                expected: format!("{}/{}", runner, tag),
                found: format!("{}/{}", stray.runner_name(), stray.tag()),
            });
        }
        self.rows.retain(|r| !r.matches(runner, tag));
        self.rows.extend(new_rows);
        // stable: rows comparing equal keep their relative order
        self.rows.sort_by(|a, b| a.table_cmp(b));
        Ok(())
    }

    /// Rewrite the whole table at `path` atomically.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| BenchError::storage(&dir, e))?;

        let mut tmp =
            sibling_temp_file(path, &dir).map_err(|e| BenchError::storage(path, e))?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            writer
                .write_record(R::header())
                .map_err(|e| BenchError::storage(path, e))?;
            for row in &self.rows {
                writer
                    .serialize(row)
                    .map_err(|e| BenchError::storage(path, e))?;
            }
            writer.flush().map_err(|e| BenchError::storage(path, e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| BenchError::storage(path, e))?;
        tmp.persist(path)
            .map_err(|e| BenchError::storage(path, e.error))?;
        Ok(())
    }
}

/// Temporary file in `dir` that will replace `path` on persist.
///
/// It takes over the permissions of the file it replaces, or `0o644` when
/// there is none yet, instead of the owner-only mode temporary files are
/// created with.
pub(crate) fn sibling_temp_file(path: &Path, dir: &Path) -> std::io::Result<NamedTempFile> {
    let tmp = NamedTempFile::new_in(dir)?;
    match fs::metadata(path) {
        Ok(meta) => tmp.as_file().set_permissions(meta.permissions())?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tmp.as_file()
                    .set_permissions(fs::Permissions::from_mode(0o644))?;
            }
        }
        Err(e) => return Err(e),
    }
    Ok(tmp)
}

/// Result tables for all datasets under one directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn summary_path(&self, dataset: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", dataset))
    }

    pub fn detail_path(&self, dataset: &str) -> PathBuf {
        self.dir.join(format!("{}.runs.csv", dataset))
    }

    pub fn load_summary(&self, dataset: &str) -> Result<ResultTable<SummaryRow>> {
        ResultTable::load(&self.summary_path(dataset))
    }

    pub fn load_details(&self, dataset: &str) -> Result<ResultTable<DetailRow>> {
        ResultTable::load(&self.detail_path(dataset))
    }

    /// Replace the summary row for `key` with `row`.
    pub fn upsert_summary_row(&self, key: &ResultKey, row: SummaryRow) -> Result<()> {
        let path = self.summary_path(&key.dataset);
        let mut table = ResultTable::<SummaryRow>::load(&path)?;
        table.replace(&key.runner, &key.tag, vec![row])?;
        table.write_atomic(&path)?;
        tracing::debug!("Summary for {} written to {}", key, path.display());
        Ok(())
    }

    /// Replace the summary row for `key` with one built from `aggregate`.
    pub fn upsert_summary(&self, key: &ResultKey, aggregate: &RunAggregate) -> Result<SummaryRow> {
        let row = SummaryRow::from_aggregate(key, aggregate);
        self.upsert_summary_row(key, row.clone())?;
        Ok(row)
    }

    /// Replace the block of detail rows for `key`, numbering run ids 1..=N.
    pub fn upsert_details(&self, key: &ResultKey, trials: &[Trial]) -> Result<Vec<DetailRow>> {
        let path = self.detail_path(&key.dataset);
        let rows: Vec<DetailRow> = trials
            .iter()
            .enumerate()
            .map(|(i, trial)| DetailRow::from_trial(key, i + 1, trial))
            .collect();

        let mut table = ResultTable::<DetailRow>::load(&path)?;
        table.replace(&key.runner, &key.tag, rows.clone())?;
        table.write_atomic(&path)?;
        tracing::debug!(
            "{} detail rows for {} written to {}",
            rows.len(),
            key,
            path.display()
        );
        Ok(rows)
    }
}
