//! Flattening of the language- and site-keyed entity sections.
//!
//! `labels`, `descriptions`, `aliases` and `sitelinks` share one shape: an
//! object keyed by language (or site) code. Each section of a slice of
//! entities becomes a wide struct column with one sub-field per key seen,
//! which [`unpivot_struct`] turns into long rows. Null values are dropped and
//! alias lists are exploded to one row per alias.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, ListArray, ListBuilder, StringArray, StringBuilder, StructArray,
};
use arrow::compute::{filter_record_batch, is_not_null};
use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, warn};
use serde_json::{Map, Value};
use thiserror::Error;
use wikiflat_core::kind_of;

use crate::columnar::{ColumnarError, ParquetSink};
use crate::source::{Section, SourceEntity, SourceError, SourceReader};
use crate::unpivot::{UnpivotError, unpivot_struct};

/// Entities flattened per record batch.
pub const DEFAULT_SLICE_ROWS: usize = 1000;

/// The four tables derived from keyed entity sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimpleTable {
    /// `labels(id, language, value)`.
    Labels,
    /// `descriptions(id, language, value)`.
    Descriptions,
    /// `aliases(id, language, value)`, one row per alias.
    Aliases,
    /// `links(id, site, title)`.
    Links,
}

impl SimpleTable {
    /// Every simple table.
    pub const ALL: [Self; 4] = [Self::Labels, Self::Descriptions, Self::Aliases, Self::Links];

    /// Output table name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Labels => "labels",
            Self::Descriptions => "descriptions",
            Self::Aliases => "aliases",
            Self::Links => "links",
        }
    }

    /// Source section the table is built from.
    #[must_use]
    pub const fn section(self) -> Section {
        match self {
            Self::Labels => Section::Labels,
            Self::Descriptions => Section::Descriptions,
            Self::Aliases => Section::Aliases,
            Self::Links => Section::Sitelinks,
        }
    }

    /// Name of the key column (`language` or `site`).
    #[must_use]
    pub const fn key_column(self) -> &'static str {
        match self {
            Self::Links => "site",
            Self::Labels | Self::Descriptions | Self::Aliases => "language",
        }
    }

    /// Name of the value column (`value` or `title`).
    #[must_use]
    pub const fn value_column(self) -> &'static str {
        match self {
            Self::Links => "title",
            Self::Labels | Self::Descriptions | Self::Aliases => "value",
        }
    }

    const fn text_field(self) -> &'static str {
        match self {
            Self::Links => "title",
            Self::Labels | Self::Descriptions | Self::Aliases => "value",
        }
    }

    /// Arrow schema of the output table.
    #[must_use]
    pub fn schema(self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(self.key_column(), DataType::Utf8, false),
            Field::new(self.value_column(), DataType::Utf8, false),
        ]))
    }

    /// Output path for this table of `source`: `<output>/<table>/<file name>`.
    #[must_use]
    pub fn output_path(self, output_dir: &Utf8Path, source: &Utf8Path) -> Utf8PathBuf {
        let file_name = source.file_name().unwrap_or(source.as_str());
        output_dir.join(self.name()).join(file_name)
    }
}

/// Errors raised while flattening simple tables.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TablesError {
    /// The source file could not be read.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// An output file could not be written.
    #[error(transparent)]
    Columnar(#[from] ColumnarError),
    /// A section could not be unpivoted.
    #[error("failed to unpivot {table}: {source}")]
    Unpivot {
        /// Table being built.
        table: &'static str,
        /// Underlying unpivot error.
        #[source]
        source: UnpivotError,
    },
    /// An intermediate batch could not be assembled.
    #[error("failed to assemble {table}: {source}")]
    Arrow {
        /// Table being built.
        table: &'static str,
        /// Underlying Arrow error.
        #[source]
        source: ArrowError,
    },
}

/// Row counts per simple table for one source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TablesReport {
    /// Entities read.
    pub entities: usize,
    /// Rows in `labels`.
    pub labels: usize,
    /// Rows in `descriptions`.
    pub descriptions: usize,
    /// Rows in `aliases`.
    pub aliases: usize,
    /// Rows in `links`.
    pub links: usize,
}

impl TablesReport {
    /// Rows written for `table`.
    #[must_use]
    pub const fn rows(&self, table: SimpleTable) -> usize {
        match table {
            SimpleTable::Labels => self.labels,
            SimpleTable::Descriptions => self.descriptions,
            SimpleTable::Aliases => self.aliases,
            SimpleTable::Links => self.links,
        }
    }

    const fn rows_mut(&mut self, table: SimpleTable) -> &mut usize {
        match table {
            SimpleTable::Labels => &mut self.labels,
            SimpleTable::Descriptions => &mut self.descriptions,
            SimpleTable::Aliases => &mut self.aliases,
            SimpleTable::Links => &mut self.links,
        }
    }
}

/// Write the four simple tables of `source` under `output_dir`.
///
/// Entities are flattened `slice_rows` at a time. Each table lands at
/// [`SimpleTable::output_path`] once complete.
///
/// # Errors
///
/// Returns [`TablesError`] when the source cannot be read or an output file
/// cannot be written. Sections holding invalid JSON are logged and skipped.
pub fn write_simple_tables(
    source: &Utf8Path,
    output_dir: &Utf8Path,
    slice_rows: usize,
) -> Result<TablesReport, TablesError> {
    let sections: Vec<Section> = SimpleTable::ALL.map(SimpleTable::section).to_vec();
    let reader = SourceReader::open(source, &sections)?;
    let mut sinks = Vec::with_capacity(SimpleTable::ALL.len());
    for table in SimpleTable::ALL {
        let sink = ParquetSink::create(&table.output_path(output_dir, source), table.schema())?;
        sinks.push((table, sink));
    }

    let mut report = TablesReport::default();
    let mut slice: Vec<SourceEntity> = Vec::with_capacity(slice_rows.max(1));
    for entity in reader {
        slice.push(entity?);
        if slice.len() >= slice_rows.max(1) {
            flush_slice(&slice, &mut sinks)?;
            report.entities += slice.len();
            slice.clear();
        }
    }
    if !slice.is_empty() {
        flush_slice(&slice, &mut sinks)?;
        report.entities += slice.len();
    }

    for (table, sink) in sinks {
        *report.rows_mut(table) = sink.commit()?;
    }
    debug!(
        "Wrote simple tables: source={source}, entities={}, labels={}, descriptions={}, aliases={}, links={}",
        report.entities, report.labels, report.descriptions, report.aliases, report.links
    );
    Ok(report)
}

fn flush_slice(
    slice: &[SourceEntity],
    sinks: &mut [(SimpleTable, ParquetSink)],
) -> Result<(), TablesError> {
    for (table, sink) in sinks.iter_mut() {
        let batch = flatten(*table, slice)?;
        if batch.num_rows() > 0 {
            sink.write(&batch)?;
        }
    }
    Ok(())
}

/// Flatten one section of `entities` into the table's long rows.
///
/// # Errors
///
/// Returns [`TablesError`] when a nested section cannot be rendered or the
/// intermediate batches cannot be assembled.
pub fn flatten(table: SimpleTable, entities: &[SourceEntity]) -> Result<RecordBatch, TablesError> {
    let arrow_err = |source| TablesError::Arrow {
        table: table.name(),
        source,
    };
    let sections: Vec<Option<Map<String, Value>>> = entities
        .iter()
        .map(|entity| parse_section(table, entity))
        .collect::<Result<_, _>>()?;
    let keys = key_union(&sections);
    if keys.is_empty() {
        return Ok(RecordBatch::new_empty(table.schema()));
    }

    let wide = match table {
        SimpleTable::Aliases => alias_struct(&keys, &sections),
        SimpleTable::Labels | SimpleTable::Descriptions | SimpleTable::Links => {
            text_struct(table, &keys, &sections)
        }
    }
    .map_err(arrow_err)?;
    let ids: ArrayRef = Arc::new(StringArray::from_iter_values(
        entities.iter().map(|entity| entity.id.as_str()),
    ));
    let batch = RecordBatch::try_from_iter([
        ("id", ids),
        (table.name(), Arc::new(wide) as ArrayRef),
    ])
    .map_err(arrow_err)?;

    let long = unpivot_struct(&batch, table.name(), table.key_column(), table.value_column())
        .map_err(|source| TablesError::Unpivot {
            table: table.name(),
            source,
        })?;
    let present = long
        .column_by_name(table.value_column())
        .map(|values| is_not_null(values.as_ref()))
        .transpose()
        .map_err(arrow_err)?;
    let kept = match present {
        Some(mask) => filter_record_batch(&long, &mask).map_err(arrow_err)?,
        None => long,
    };

    match table {
        SimpleTable::Aliases => explode_aliases(&kept).map_err(arrow_err),
        SimpleTable::Labels | SimpleTable::Descriptions | SimpleTable::Links => {
            RecordBatch::try_new(table.schema(), kept.columns().to_vec()).map_err(arrow_err)
        }
    }
}

fn parse_section(
    table: SimpleTable,
    entity: &SourceEntity,
) -> Result<Option<Map<String, Value>>, SourceError> {
    let Some(text) = entity.section(table.section())? else {
        return Ok(None);
    };
    Ok(match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Some(map),
        Ok(Value::Null) => None,
        Ok(Value::Array(items)) if items.is_empty() => None,
        Ok(other) => {
            warn!(
                "Skipped {}: entity={} (expected an object, found {})",
                table.name(),
                entity.id,
                kind_of(&other)
            );
            None
        }
        Err(err) => {
            warn!("Skipped {}: entity={} (invalid JSON: {err})", table.name(), entity.id);
            None
        }
    })
}

/// Keys across all sections, in first-seen order.
fn key_union(sections: &[Option<Map<String, Value>>]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for map in sections.iter().flatten() {
        for key in map.keys() {
            if seen.insert(key.as_str()) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

/// Extract the text of one keyed entry: a bare string or a record carrying
/// `value` (labels, descriptions) or `title` (sitelinks).
fn entry_text<'a>(table: SimpleTable, entry: &'a Value) -> Option<&'a str> {
    match entry {
        Value::String(text) => Some(text),
        Value::Object(record) => record.get(table.text_field()).and_then(Value::as_str),
        _ => None,
    }
}

fn text_struct(
    table: SimpleTable,
    keys: &[String],
    sections: &[Option<Map<String, Value>>],
) -> Result<StructArray, ArrowError> {
    let mut fields = Vec::with_capacity(keys.len());
    let mut children: Vec<ArrayRef> = Vec::with_capacity(keys.len());
    for key in keys {
        let values: StringArray = sections
            .iter()
            .map(|section| {
                section
                    .as_ref()
                    .and_then(|map| map.get(key))
                    .and_then(|entry| entry_text(table, entry))
            })
            .collect();
        fields.push(Field::new(key, DataType::Utf8, true));
        children.push(Arc::new(values));
    }
    StructArray::try_new(Fields::from(fields), children, None)
}

/// Alias lists hold bare strings or `{language, value}` records; a single
/// bare string is treated as a one-element list.
fn alias_texts(entry: &Value) -> Vec<&str> {
    match entry {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| entry_text(SimpleTable::Aliases, item))
            .collect(),
        other => entry_text(SimpleTable::Aliases, other).into_iter().collect(),
    }
}

fn alias_struct(
    keys: &[String],
    sections: &[Option<Map<String, Value>>],
) -> Result<StructArray, ArrowError> {
    let item = Arc::new(Field::new("item", DataType::Utf8, true));
    let mut fields = Vec::with_capacity(keys.len());
    let mut children: Vec<ArrayRef> = Vec::with_capacity(keys.len());
    for key in keys {
        let mut builder = ListBuilder::new(StringBuilder::new()).with_field(Arc::clone(&item));
        for section in sections {
            match section.as_ref().and_then(|map| map.get(key)) {
                Some(entry) => {
                    let texts = alias_texts(entry);
                    if texts.is_empty() {
                        builder.append_null();
                    } else {
                        for text in texts {
                            builder.values().append_value(text);
                        }
                        builder.append(true);
                    }
                }
                None => builder.append_null(),
            }
        }
        let list: ListArray = builder.finish();
        fields.push(Field::new(key, list.data_type().clone(), true));
        children.push(Arc::new(list));
    }
    StructArray::try_new(Fields::from(fields), children, None)
}

fn explode_aliases(long: &RecordBatch) -> Result<RecordBatch, ArrowError> {
    let table = SimpleTable::Aliases;
    let column = |name: &str| {
        long.column_by_name(name).ok_or_else(|| {
            ArrowError::SchemaError(format!("aliases batch lacks column {name}"))
        })
    };
    let ids = column("id")?.as_string::<i32>();
    let languages = column(table.key_column())?.as_string::<i32>();
    let lists = column(table.value_column())?.as_list::<i32>();

    let mut out_ids = StringBuilder::new();
    let mut out_languages = StringBuilder::new();
    let mut out_values = StringBuilder::new();
    for row in 0..long.num_rows() {
        if lists.is_null(row) {
            continue;
        }
        let aliases = lists.value(row);
        for alias in aliases.as_string::<i32>().iter().flatten() {
            out_ids.append_value(ids.value(row));
            out_languages.append_value(languages.value(row));
            out_values.append_value(alias);
        }
    }
    RecordBatch::try_new(
        table.schema(),
        vec![
            Arc::new(out_ids.finish()),
            Arc::new(out_languages.finish()),
            Arc::new(out_values.finish()),
        ],
    )
}
