//! Parquet file helpers shared by the table writers.
//!
//! Every output file is written through a [`ParquetSink`], which stages the
//! bytes next to the target and renames on commit. Readers of the target path
//! therefore only ever see complete files.

use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use thiserror::Error;
use wikiflat_fs::{StagedFile, ensure_parent_dir, open_utf8_file};

/// Errors raised while reading or writing Parquet files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ColumnarError {
    /// Filesystem access failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Parquet encoding or decoding failed.
    #[error("Parquet error on {path}: {source}")]
    Parquet {
        /// File being accessed.
        path: Utf8PathBuf,
        /// Underlying Parquet error.
        #[source]
        source: ParquetError,
    },
    /// A record batch could not be decoded.
    #[error("Arrow error on {path}: {source}")]
    Arrow {
        /// File being accessed.
        path: Utf8PathBuf,
        /// Underlying Arrow error.
        #[source]
        source: ArrowError,
    },
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build()
}

/// A Parquet file under construction.
pub struct ParquetSink {
    path: Utf8PathBuf,
    writer: ArrowWriter<StagedFile>,
    rows: usize,
}

impl ParquetSink {
    /// Start a staged Parquet file that will land at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ColumnarError`] when the parent directory or staging file
    /// cannot be created.
    pub fn create(path: &Utf8Path, schema: SchemaRef) -> Result<Self, ColumnarError> {
        let io_err = |source| ColumnarError::Io {
            path: path.to_path_buf(),
            source,
        };
        ensure_parent_dir(path).map_err(io_err)?;
        let staged = StagedFile::create(path).map_err(io_err)?;
        let writer = ArrowWriter::try_new(staged, schema, Some(writer_properties())).map_err(
            |source| ColumnarError::Parquet {
                path: path.to_path_buf(),
                source,
            },
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    /// Append `batch` to the file.
    ///
    /// # Errors
    ///
    /// Returns [`ColumnarError::Parquet`] when encoding fails or the batch
    /// schema does not match.
    pub fn write(&mut self, batch: &RecordBatch) -> Result<(), ColumnarError> {
        self.writer
            .write(batch)
            .map_err(|source| ColumnarError::Parquet {
                path: self.path.clone(),
                source,
            })?;
        self.rows += batch.num_rows();
        Ok(())
    }

    /// Rows written so far.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Finish the footer and move the file into place, returning its row
    /// count.
    ///
    /// # Errors
    ///
    /// Returns [`ColumnarError`] when the footer cannot be written or the
    /// rename fails. The target is left untouched in that case.
    pub fn commit(self) -> Result<usize, ColumnarError> {
        let Self { path, writer, rows } = self;
        let staged = writer
            .into_inner()
            .map_err(|source| ColumnarError::Parquet {
                path: path.clone(),
                source,
            })?;
        staged
            .commit()
            .map_err(|source| ColumnarError::Io { path, source })?;
        Ok(rows)
    }
}

/// Write `batches` to `path` in one staged step.
///
/// # Errors
///
/// Returns [`ColumnarError`] when any batch fails to encode or the file cannot
/// be committed.
pub fn write_parquet(
    path: &Utf8Path,
    schema: SchemaRef,
    batches: &[RecordBatch],
) -> Result<usize, ColumnarError> {
    let mut sink = ParquetSink::create(path, schema)?;
    for batch in batches {
        sink.write(batch)?;
    }
    sink.commit()
}

/// Read every record batch of `path` along with the file's Arrow schema.
///
/// # Errors
///
/// Returns [`ColumnarError`] when the file cannot be opened or decoded.
pub fn read_parquet(path: &Utf8Path) -> Result<(SchemaRef, Vec<RecordBatch>), ColumnarError> {
    let file = open_utf8_file(path)
        .map_err(|source| ColumnarError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .into_std();
    let parquet_err = |source| ColumnarError::Parquet {
        path: path.to_path_buf(),
        source,
    };
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(parquet_err)?;
    let schema = builder.schema().clone();
    let reader = builder.build().map_err(parquet_err)?;
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ColumnarError::Arrow {
            path: path.to_path_buf(),
            source,
        })?;
    Ok((schema, batches))
}
