//! Arrow representation of the final claims table.
//!
//! [`claims_schema`] is derived from [`FinalColumn::ALL`], so the column
//! order and types written here always match the rows the core crate
//! produces. Batches read back from disk are checked against it with
//! [`classify_schema`] and brought into line with [`conform_batch`].

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray, new_null_array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use log::warn;
use thiserror::Error;
use wikiflat_core::{Cell, ClaimRow, ColumnKind, FinalColumn};

/// Arrow type of a final column kind.
#[must_use]
pub const fn arrow_type(kind: ColumnKind) -> DataType {
    match kind {
        ColumnKind::Utf8 => DataType::Utf8,
        ColumnKind::Float64 => DataType::Float64,
        ColumnKind::Int64 => DataType::Int64,
    }
}

/// Schema of the claims table and of every batch file.
#[must_use]
pub fn claims_schema() -> SchemaRef {
    let fields: Vec<Field> = FinalColumn::ALL
        .iter()
        .map(|column| {
            Field::new(
                column.name(),
                arrow_type(column.kind()),
                !column.is_required(),
            )
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// Convert coalesced rows into one record batch of [`claims_schema`].
///
/// # Errors
///
/// Returns an [`ArrowError`] if the assembled columns do not fit the schema.
pub fn rows_to_batch(rows: &[ClaimRow]) -> Result<RecordBatch, ArrowError> {
    let columns: Vec<ArrayRef> = FinalColumn::ALL
        .iter()
        .map(|column| column_array(*column, rows))
        .collect();
    RecordBatch::try_new(claims_schema(), columns)
}

fn column_array(column: FinalColumn, rows: &[ClaimRow]) -> ArrayRef {
    match column.kind() {
        ColumnKind::Utf8 => Arc::new(
            rows.iter()
                .map(|row| match row.cell(column) {
                    Cell::Utf8(value) => value,
                    Cell::Float64(_) | Cell::Int64(_) => None,
                })
                .collect::<StringArray>(),
        ),
        ColumnKind::Float64 => Arc::new(
            rows.iter()
                .map(|row| match row.cell(column) {
                    Cell::Float64(value) => value,
                    Cell::Utf8(_) | Cell::Int64(_) => None,
                })
                .collect::<Float64Array>(),
        ),
        ColumnKind::Int64 => Arc::new(
            rows.iter()
                .map(|row| match row.cell(column) {
                    Cell::Int64(value) => value,
                    Cell::Utf8(_) | Cell::Float64(_) => None,
                })
                .collect::<Int64Array>(),
        ),
    }
}

/// How a persisted schema relates to [`claims_schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaFit {
    /// Same columns with the same types.
    Exact,
    /// Some optional columns are missing; they are widened with nulls.
    Subset {
        /// Names of the missing columns.
        missing: Vec<String>,
    },
    /// Extra columns are present; they are projected away.
    Superset {
        /// Names of the extra columns.
        extra: Vec<String>,
    },
}

/// Persisted schema that cannot be reconciled automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SchemaDrift {
    /// A known column has an unexpected type.
    #[error("column {column} is {found}, expected {expected}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Type of the final schema.
        expected: DataType,
        /// Type found on disk.
        found: DataType,
    },
    /// A column that is always populated is absent.
    #[error("required column {column} is missing")]
    MissingRequired {
        /// Column name.
        column: String,
    },
    /// Columns are both missing and unexpected.
    #[error("columns {missing:?} are missing and {extra:?} are unexpected")]
    Divergent {
        /// Columns of the final schema that are absent.
        missing: Vec<String>,
        /// Columns not part of the final schema.
        extra: Vec<String>,
    },
}

/// Classify `schema` against [`claims_schema`].
///
/// # Errors
///
/// Returns [`SchemaDrift`] for type mismatches, missing required columns, or
/// schemas that both lack and add columns.
pub fn classify_schema(schema: &Schema) -> Result<SchemaFit, SchemaDrift> {
    let mut missing = Vec::new();
    for column in FinalColumn::ALL {
        let expected = arrow_type(column.kind());
        match schema.field_with_name(column.name()) {
            Ok(field) if *field.data_type() == expected => {}
            Ok(field) => {
                return Err(SchemaDrift::TypeMismatch {
                    column: column.name().to_owned(),
                    expected,
                    found: field.data_type().clone(),
                });
            }
            Err(_) if column.is_required() => {
                return Err(SchemaDrift::MissingRequired {
                    column: column.name().to_owned(),
                });
            }
            Err(_) => missing.push(column.name().to_owned()),
        }
    }
    let extra: Vec<String> = schema
        .fields()
        .iter()
        .map(|field| field.name())
        .filter(|name| !FinalColumn::ALL.iter().any(|column| column.name() == name.as_str()))
        .cloned()
        .collect();
    match (missing.is_empty(), extra.is_empty()) {
        (true, true) => Ok(SchemaFit::Exact),
        (false, true) => Ok(SchemaFit::Subset { missing }),
        (true, false) => Ok(SchemaFit::Superset { extra }),
        (false, false) => Err(SchemaDrift::Divergent { missing, extra }),
    }
}

/// Errors raised while conforming a batch to [`claims_schema`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConformError {
    /// The batch schema cannot be reconciled.
    #[error("schema drift: {0}")]
    Drift(#[from] SchemaDrift),
    /// The reconciled batch could not be assembled.
    #[error("failed to assemble conformed batch: {0}")]
    Arrow(#[from] ArrowError),
}

/// Rebuild `batch` with exactly the columns of [`claims_schema`], in order.
///
/// Missing optional columns become all-null; extra columns are dropped and
/// logged.
///
/// # Errors
///
/// Returns [`ConformError::Drift`] when [`classify_schema`] rejects the
/// batch schema.
pub fn conform_batch(batch: &RecordBatch) -> Result<RecordBatch, ConformError> {
    let fit = classify_schema(&batch.schema())?;
    if let SchemaFit::Superset { extra } = &fit {
        warn!("Dropped unexpected claims columns: {extra:?}");
    }
    let columns: Vec<ArrayRef> = FinalColumn::ALL
        .iter()
        .map(|column| {
            batch.column_by_name(column.name()).map_or_else(
                || new_null_array(&arrow_type(column.kind()), batch.num_rows()),
                Arc::clone,
            )
        })
        .collect();
    Ok(RecordBatch::try_new(claims_schema(), columns)?)
}

#[cfg(test)]
mod tests;
