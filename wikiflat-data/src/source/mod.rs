//! Streaming reader for source Parquet files.
//!
//! A source file holds one row per entity: an `id` column plus the nested
//! `labels`, `descriptions`, `aliases`, `sitelinks` and `claims` sections.
//! Sections may be stored as JSON text or as Arrow nested types; the reader
//! hands both out as JSON text so downstream code has one decoding path.
//! Nested sections are rendered only when [`SourceEntity::section`] is called,
//! so entities that are read and skipped never pay for JSON rendering.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::json::LineDelimitedWriter;
use arrow::record_batch::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::errors::ParquetError;
use serde_json::{Map, Value};
use thiserror::Error;
use wikiflat_fs::open_utf8_file;

const ID_COLUMN: &str = "id";
const READ_BATCH_ROWS: usize = 1024;

/// Nested per-entity sections of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Language-keyed names.
    Labels,
    /// Language-keyed short descriptions.
    Descriptions,
    /// Language-keyed lists of alternative names.
    Aliases,
    /// Site-keyed article links.
    Sitelinks,
    /// Property-keyed statements.
    Claims,
}

impl Section {
    /// Every section in source column order.
    pub const ALL: [Self; 5] = [
        Self::Labels,
        Self::Descriptions,
        Self::Aliases,
        Self::Sitelinks,
        Self::Claims,
    ];

    /// Column name in the source file.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Labels => "labels",
            Self::Descriptions => "descriptions",
            Self::Aliases => "aliases",
            Self::Sitelinks => "sitelinks",
            Self::Claims => "claims",
        }
    }
}

/// One entity's cell of a nested section, kept as a single-row Arrow slice.
#[derive(Debug, Clone)]
pub struct NestedCell {
    path: Arc<Utf8PathBuf>,
    column: &'static str,
    cell: ArrayRef,
}

impl PartialEq for NestedCell {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.column == other.column
            && self.cell.as_ref() == other.cell.as_ref()
    }
}

impl NestedCell {
    fn render(&self) -> Result<String, SourceError> {
        let rendered = render_nested(self.column, &self.cell).map_err(|message| {
            SourceError::RenderJson {
                path: self.path.to_path_buf(),
                column: self.column,
                message,
            }
        })?;
        Ok(rendered
            .into_iter()
            .next()
            .flatten()
            .unwrap_or_else(|| Value::Null.to_string()))
    }
}

/// Contents of one section of one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionText {
    /// JSON text stored as a string column.
    Text(String),
    /// Arrow nested value, rendered to JSON text on access.
    Nested(NestedCell),
}

impl SectionText {
    /// JSON text of the section.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::RenderJson`] when a nested value cannot be
    /// rendered.
    pub fn render(&self) -> Result<Cow<'_, str>, SourceError> {
        match self {
            Self::Text(text) => Ok(Cow::Borrowed(text)),
            Self::Nested(cell) => cell.render().map(Cow::Owned),
        }
    }

    /// Whether the section still awaits rendering.
    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        matches!(self, Self::Nested(_))
    }
}

impl From<String> for SectionText {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for SectionText {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// One entity as read from a source file.
///
/// Sections not requested from [`SourceReader::open`], absent from the file,
/// or null in the row are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceEntity {
    /// Entity identifier, e.g. `Q64`.
    pub id: String,
    /// `labels` section.
    pub labels: Option<SectionText>,
    /// `descriptions` section.
    pub descriptions: Option<SectionText>,
    /// `aliases` section.
    pub aliases: Option<SectionText>,
    /// `sitelinks` section.
    pub sitelinks: Option<SectionText>,
    /// `claims` section.
    pub claims: Option<SectionText>,
}

impl SourceEntity {
    /// JSON text of `section`, rendering nested values on demand.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::RenderJson`] when a nested value cannot be
    /// rendered.
    pub fn section(&self, section: Section) -> Result<Option<Cow<'_, str>>, SourceError> {
        let slot = match section {
            Section::Labels => &self.labels,
            Section::Descriptions => &self.descriptions,
            Section::Aliases => &self.aliases,
            Section::Sitelinks => &self.sitelinks,
            Section::Claims => &self.claims,
        };
        slot.as_ref().map(SectionText::render).transpose()
    }

    const fn section_mut(&mut self, section: Section) -> &mut Option<SectionText> {
        match section {
            Section::Labels => &mut self.labels,
            Section::Descriptions => &mut self.descriptions,
            Section::Aliases => &mut self.aliases,
            Section::Sitelinks => &mut self.sitelinks,
            Section::Claims => &mut self.claims,
        }
    }
}

/// Errors raised while reading a source file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// The file could not be opened.
    #[error("failed to open source file {path}: {source}")]
    Open {
        /// Source file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The Parquet footer or pages could not be read.
    #[error("failed to read Parquet source {path}: {source}")]
    Parquet {
        /// Source file path.
        path: Utf8PathBuf,
        /// Underlying Parquet error.
        #[source]
        source: ParquetError,
    },
    /// A record batch could not be decoded or converted.
    #[error("failed to decode record batch from {path}: {source}")]
    Arrow {
        /// Source file path.
        path: Utf8PathBuf,
        /// Underlying Arrow error.
        #[source]
        source: ArrowError,
    },
    /// The file has no `id` column.
    #[error("source file {path} has no `id` column")]
    MissingId {
        /// Source file path.
        path: Utf8PathBuf,
    },
    /// A row has a null `id`.
    #[error("source file {path} has a null id at row {row}")]
    NullId {
        /// Source file path.
        path: Utf8PathBuf,
        /// Zero-based row number within the file.
        row: usize,
    },
    /// A nested section could not be rendered as JSON text.
    #[error("failed to render column {column} of {path} as JSON: {message}")]
    RenderJson {
        /// Source file path.
        path: Utf8PathBuf,
        /// Column being rendered.
        column: &'static str,
        /// Description of the failure.
        message: String,
    },
}

/// Decoded form of one section column within a record batch.
enum SectionColumn {
    Text(Vec<Option<String>>),
    Nested(&'static str, ArrayRef),
}

impl SectionColumn {
    fn take(&mut self, row: usize, path: &Arc<Utf8PathBuf>) -> Option<SectionText> {
        match self {
            Self::Text(texts) => texts.get_mut(row)?.take().map(SectionText::Text),
            Self::Nested(column, array) => (row < array.len() && !array.is_null(row)).then(|| {
                SectionText::Nested(NestedCell {
                    path: Arc::clone(path),
                    column: *column,
                    cell: array.slice(row, 1),
                })
            }),
        }
    }
}

/// Streams [`SourceEntity`] values out of one Parquet file.
pub struct SourceReader {
    path: Arc<Utf8PathBuf>,
    total: usize,
    sections: Vec<Section>,
    batches: ParquetRecordBatchReader,
    pending: VecDeque<SourceEntity>,
    rows_read: usize,
}

impl SourceReader {
    /// Open `path`, decoding only the requested `sections`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Open`] or [`SourceError::Parquet`] when the file
    /// cannot be opened or its footer is unreadable, and
    /// [`SourceError::MissingId`] when it lacks an `id` column.
    pub fn open(path: &Utf8Path, sections: &[Section]) -> Result<Self, SourceError> {
        let file = open_utf8_file(path)
            .map_err(|source| SourceError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .into_std();
        let parquet_err = |source| SourceError::Parquet {
            path: path.to_path_buf(),
            source,
        };
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(parquet_err)?;
        let total = usize::try_from(builder.metadata().file_metadata().num_rows()).unwrap_or(0);

        let root_names: Vec<&str> = builder
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().as_str())
            .collect();
        if !root_names.contains(&ID_COLUMN) {
            return Err(SourceError::MissingId {
                path: path.to_path_buf(),
            });
        }
        let present: Vec<Section> = sections
            .iter()
            .copied()
            .filter(|section| root_names.contains(&section.column()))
            .collect();
        let roots: Vec<usize> = root_names
            .iter()
            .enumerate()
            .filter(|(_, name)| {
                **name == ID_COLUMN || present.iter().any(|section| section.column() == **name)
            })
            .map(|(index, _)| index)
            .collect();
        let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
        let batches = builder
            .with_projection(mask)
            .with_batch_size(READ_BATCH_ROWS)
            .build()
            .map_err(parquet_err)?;

        Ok(Self {
            path: Arc::new(path.to_path_buf()),
            total,
            sections: present,
            batches,
            pending: VecDeque::new(),
            rows_read: 0,
        })
    }

    /// Path of the file being read.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Number of entities recorded in the file footer.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.total
    }

    /// Whether the file holds no entities.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn decode(&mut self, batch: &RecordBatch) -> Result<(), SourceError> {
        let id_column = batch
            .column_by_name(ID_COLUMN)
            .ok_or_else(|| SourceError::MissingId {
                path: self.path.to_path_buf(),
            })?;
        let ids = self.utf8(id_column)?;
        let mut columns = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            let Some(column) = batch.column_by_name(section.column()) else {
                continue;
            };
            columns.push((*section, self.section_column(section.column(), column)?));
        }

        let strings = ids.as_string::<i32>();
        for row in 0..batch.num_rows() {
            if strings.is_null(row) {
                return Err(SourceError::NullId {
                    path: self.path.to_path_buf(),
                    row: self.rows_read + row,
                });
            }
            let mut entity = SourceEntity {
                id: strings.value(row).to_owned(),
                ..SourceEntity::default()
            };
            for (section, column) in &mut columns {
                *entity.section_mut(*section) = column.take(row, &self.path);
            }
            self.pending.push_back(entity);
        }
        self.rows_read += batch.num_rows();
        Ok(())
    }

    fn utf8(&self, column: &ArrayRef) -> Result<ArrayRef, SourceError> {
        cast(column, &DataType::Utf8).map_err(|source| SourceError::Arrow {
            path: self.path.to_path_buf(),
            source,
        })
    }

    fn section_column(
        &self,
        name: &'static str,
        column: &ArrayRef,
    ) -> Result<SectionColumn, SourceError> {
        if matches!(column.data_type(), DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View) {
            let strings = self.utf8(column)?;
            return Ok(SectionColumn::Text(
                strings
                    .as_string::<i32>()
                    .iter()
                    .map(|value| value.map(str::to_owned))
                    .collect(),
            ));
        }
        Ok(SectionColumn::Nested(name, Arc::clone(column)))
    }
}

/// Render a nested Arrow column to one JSON text per row via `arrow::json`.
fn render_nested(name: &str, column: &ArrayRef) -> Result<Vec<Option<String>>, String> {
    let schema = Schema::new(vec![Field::new(name, column.data_type().clone(), true)]);
    let single = RecordBatch::try_new(Arc::new(schema), vec![Arc::clone(column)])
        .map_err(|err| err.to_string())?;
    let mut writer = LineDelimitedWriter::new(Vec::new());
    writer.write(&single).map_err(|err| err.to_string())?;
    writer.finish().map_err(|err| err.to_string())?;
    let bytes = writer.into_inner();
    let text = String::from_utf8(bytes).map_err(|err| err.to_string())?;
    text.lines()
        .map(|line| {
            let mut row: Map<String, Value> =
                serde_json::from_str(line).map_err(|err| err.to_string())?;
            Ok(row
                .remove(name)
                .filter(|value| !value.is_null())
                .map(|value| value.to_string()))
        })
        .collect()
}

impl Iterator for SourceReader {
    type Item = Result<SourceEntity, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entity) = self.pending.pop_front() {
                return Some(Ok(entity));
            }
            let batch = match self.batches.next()? {
                Ok(batch) => batch,
                Err(source) => {
                    return Some(Err(SourceError::Arrow {
                        path: self.path.to_path_buf(),
                        source,
                    }));
                }
            };
            if let Err(err) = self.decode(&batch) {
                return Some(Err(err));
            }
        }
    }
}

#[cfg(test)]
mod tests;
