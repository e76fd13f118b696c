//! Partitioning of output tables by a key column.
//!
//! [`PartitionSink`] is the seam the pipeline hands finished tables to.
//! [`LocalPartitionSink`] writes one Parquet file per distinct key under
//! `<dst>/<table>/<key>/<source stem>.parquet` and records an audit sidecar of
//! row counts and id bounds per key.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, StringArray, UInt64Array};
use arrow::compute::{cast, concat_batches, take_record_batch};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info};
use thiserror::Error;

use crate::columnar::{ColumnarError, read_parquet, write_parquet};

/// Directory name used for rows whose key is null.
pub const NULL_PARTITION: &str = "_null";

/// Errors raised while partitioning a table.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PartitionError {
    /// Reading the table or writing a partition failed.
    #[error(transparent)]
    Columnar(#[from] ColumnarError),
    /// The table has no column with the requested key name.
    #[error("{path} has no partition column `{column}`")]
    MissingKey {
        /// Table being partitioned.
        path: Utf8PathBuf,
        /// Requested key column.
        column: String,
    },
    /// The table has no `id` column.
    #[error("{path} has no `id` column")]
    MissingId {
        /// Table being partitioned.
        path: Utf8PathBuf,
    },
    /// The table path has no file name.
    #[error("table path {path} has no file name")]
    NoFileName {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// Selecting the rows of a partition failed.
    #[error("Arrow error partitioning {path}: {source}")]
    Arrow {
        /// Table being partitioned.
        path: Utf8PathBuf,
        /// Underlying Arrow error.
        #[source]
        source: ArrowError,
    },
}

/// Rows written for one key value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    /// Key value; `None` for rows whose key is null.
    pub key: Option<String>,
    /// Rows in the partition.
    pub rows: usize,
    /// Lexically smallest entity id in the partition.
    pub min_id: Option<String>,
    /// Lexically largest entity id in the partition.
    pub max_id: Option<String>,
}

/// Outcome of partitioning one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionReport {
    /// One summary per key, ordered by key with the null key first.
    pub partitions: Vec<PartitionSummary>,
}

impl PartitionReport {
    /// Total rows across every partition.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.partitions.iter().map(|summary| summary.rows).sum()
    }
}

/// Destination for finished tables.
pub trait PartitionSink {
    /// Split the table at `path` by `key_column` and publish the parts under
    /// the `table` namespace.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError`] when the table cannot be read or a part
    /// cannot be written.
    fn partition(
        &self,
        table: &str,
        path: &Utf8Path,
        key_column: &str,
    ) -> Result<PartitionReport, PartitionError>;
}

/// Writes partitions to a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalPartitionSink {
    dst_dir: Utf8PathBuf,
    audit_dir: Utf8PathBuf,
}

impl LocalPartitionSink {
    /// Sink writing partitions below `dst_dir` and sidecars below `audit_dir`.
    #[must_use]
    pub fn new(dst_dir: &Utf8Path, audit_dir: &Utf8Path) -> Self {
        Self {
            dst_dir: dst_dir.to_path_buf(),
            audit_dir: audit_dir.to_path_buf(),
        }
    }

    /// Path of the partition file for `key` of `table`.
    #[must_use]
    pub fn partition_path(&self, table: &str, key: Option<&str>, stem: &str) -> Utf8PathBuf {
        let dir = key.map_or_else(|| NULL_PARTITION.to_owned(), sanitise_key);
        self.dst_dir
            .join(table)
            .join(dir)
            .join(format!("{stem}.parquet"))
    }

    /// Path of the audit sidecar for the table file `file_name`.
    #[must_use]
    pub fn audit_path(&self, table: &str, file_name: &str) -> Utf8PathBuf {
        self.audit_dir.join(table).join(file_name)
    }
}

/// Map a key value onto a single safe path component.
///
/// Characters outside `[A-Za-z0-9_-]` become `_`, and a key that would start
/// with `.` or be empty gains a leading `_`.
#[must_use]
pub fn sanitise_key(key: &str) -> String {
    let mut cleaned: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || key.starts_with('.') {
        cleaned.insert(0, '_');
    }
    cleaned
}

fn audit_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, true),
        Field::new("rows", DataType::UInt64, false),
        Field::new("min_id", DataType::Utf8, true),
        Field::new("max_id", DataType::Utf8, true),
    ]))
}

fn audit_batch(report: &PartitionReport) -> Result<RecordBatch, ArrowError> {
    let parts = &report.partitions;
    let keys: ArrayRef = Arc::new(StringArray::from_iter(
        parts.iter().map(|summary| summary.key.as_deref()),
    ));
    let rows: ArrayRef = Arc::new(UInt64Array::from_iter_values(
        parts.iter().map(|summary| summary.rows as u64),
    ));
    let min_ids: ArrayRef = Arc::new(StringArray::from_iter(
        parts.iter().map(|summary| summary.min_id.as_deref()),
    ));
    let max_ids: ArrayRef = Arc::new(StringArray::from_iter(
        parts.iter().map(|summary| summary.max_id.as_deref()),
    ));
    RecordBatch::try_new(audit_schema(), vec![keys, rows, min_ids, max_ids])
}

/// Row indices per key, keys in sorted order with null first.
fn group_rows(keys: &StringArray) -> BTreeMap<Option<String>, Vec<u64>> {
    let mut groups: BTreeMap<Option<String>, Vec<u64>> = BTreeMap::new();
    for (row, key) in keys.iter().enumerate() {
        groups
            .entry(key.map(str::to_owned))
            .or_default()
            .push(row as u64);
    }
    groups
}

fn id_bounds(ids: &StringArray) -> (Option<String>, Option<String>) {
    let min = ids.iter().flatten().min().map(str::to_owned);
    let max = ids.iter().flatten().max().map(str::to_owned);
    (min, max)
}

impl PartitionSink for LocalPartitionSink {
    fn partition(
        &self,
        table: &str,
        path: &Utf8Path,
        key_column: &str,
    ) -> Result<PartitionReport, PartitionError> {
        let arrow_err = |source| PartitionError::Arrow {
            path: path.to_path_buf(),
            source,
        };
        let (Some(stem), Some(file_name)) = (path.file_stem(), path.file_name()) else {
            return Err(PartitionError::NoFileName {
                path: path.to_path_buf(),
            });
        };
        let (schema, batches) = read_parquet(path)?;
        let combined = concat_batches(&schema, &batches).map_err(arrow_err)?;
        let key_values = combined
            .column_by_name(key_column)
            .ok_or_else(|| PartitionError::MissingKey {
                path: path.to_path_buf(),
                column: key_column.to_owned(),
            })?;
        let keys = cast(key_values, &DataType::Utf8).map_err(arrow_err)?;
        let id_position = schema
            .index_of("id")
            .map_err(|_| PartitionError::MissingId {
                path: path.to_path_buf(),
            })?;

        let mut report = PartitionReport::default();
        for (key, rows) in group_rows(keys.as_string::<i32>()) {
            let indices = UInt64Array::from(rows);
            let part = take_record_batch(&combined, &indices).map_err(arrow_err)?;
            let ids = cast(part.column(id_position), &DataType::Utf8).map_err(arrow_err)?;
            let (min_id, max_id) = id_bounds(ids.as_string::<i32>());
            let target = self.partition_path(table, key.as_deref(), stem);
            let written = write_parquet(&target, Arc::clone(&schema), &[part])?;
            debug!("Wrote partition: path={target}, rows={written}");
            report.partitions.push(PartitionSummary {
                key,
                rows: written,
                min_id,
                max_id,
            });
        }

        let sidecar = self.audit_path(table, file_name);
        let audit = audit_batch(&report).map_err(arrow_err)?;
        write_parquet(&sidecar, audit_schema(), &[audit])?;
        info!(
            "Partitioned table: table={table}, source={path}, key={key_column}, partitions={}, rows={}",
            report.partitions.len(),
            report.rows()
        );
        Ok(report)
    }
}
