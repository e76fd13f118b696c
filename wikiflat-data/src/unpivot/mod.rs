//! Long-format expansion of Arrow struct columns.
//!
//! [`unpivot_struct`] turns a struct column into two columns: one naming the
//! sub-field and one carrying its value. Every other column of the batch is
//! repeated alongside. Output is row-major: all sub-fields of input row 0,
//! then all sub-fields of row 1, and so on.
//!
//! Sub-field names live only in the variable column, so a sub-field that
//! shares its name with a kept column never replaces that column.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, StringArray, new_null_array};
use arrow::compute::interleave;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use thiserror::Error;

/// Errors raised while unpivoting a struct column.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UnpivotError {
    /// The requested column does not exist in the batch.
    #[error("column {column:?} not found")]
    MissingColumn {
        /// Name of the absent column.
        column: String,
    },
    /// The requested column exists but is not struct-typed.
    #[error("column {column:?} is {found}, expected a struct")]
    NotStruct {
        /// Name of the column.
        column: String,
        /// The column's actual data type.
        found: DataType,
    },
    /// The struct's sub-fields do not share one data type.
    #[error("sub-field {field:?} of {column:?} is {found}, expected {expected}")]
    MixedFieldTypes {
        /// Name of the struct column.
        column: String,
        /// First sub-field whose type differs.
        field: String,
        /// Type shared by the preceding sub-fields.
        expected: DataType,
        /// Type of the offending sub-field.
        found: DataType,
    },
    /// An output column name is already taken.
    #[error("output column {name:?} collides with an existing column")]
    NameCollision {
        /// The colliding name.
        name: String,
    },
    /// Arrow rejected the assembled output.
    #[error("failed to assemble unpivoted batch: {source}")]
    Arrow {
        /// Underlying Arrow error.
        #[from]
        source: ArrowError,
    },
}

/// Expand `struct_column` of `batch` into long format.
///
/// The result keeps every other column in its original order, followed by
/// `variable_name` (UTF-8 sub-field names) and `value_name` (sub-field
/// values). A null struct row yields null values for each sub-field.
///
/// # Errors
///
/// Returns [`UnpivotError`] when the column is absent or not a struct, when
/// its sub-fields have differing types, or when either output name collides
/// with a kept column or with the other output name.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use arrow::array::{ArrayRef, StringArray, StructArray};
/// use arrow::datatypes::{DataType, Field};
/// use arrow::record_batch::RecordBatch;
/// use wikiflat_data::unpivot::unpivot_struct;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let labels = StructArray::from(vec![
///     (
///         Arc::new(Field::new("en", DataType::Utf8, true)),
///         Arc::new(StringArray::from(vec![Some("Berlin")])) as ArrayRef,
///     ),
///     (
///         Arc::new(Field::new("de", DataType::Utf8, true)),
///         Arc::new(StringArray::from(vec![Some("Berlin")])) as ArrayRef,
///     ),
/// ]);
/// let ids: ArrayRef = Arc::new(StringArray::from(vec!["Q64"]));
/// let batch = RecordBatch::try_from_iter([("id", ids), ("labels", Arc::new(labels) as ArrayRef)])?;
///
/// let long = unpivot_struct(&batch, "labels", "language", "value")?;
/// assert_eq!(long.num_rows(), 2);
/// assert_eq!(long.schema().field(1).name(), "language");
/// # Ok(())
/// # }
/// ```
pub fn unpivot_struct(
    batch: &RecordBatch,
    struct_column: &str,
    variable_name: &str,
    value_name: &str,
) -> Result<RecordBatch, UnpivotError> {
    let schema = batch.schema();
    let (position, _) =
        schema
            .column_with_name(struct_column)
            .ok_or_else(|| UnpivotError::MissingColumn {
                column: struct_column.to_owned(),
            })?;
    let target = batch
        .columns()
        .get(position)
        .ok_or_else(|| UnpivotError::MissingColumn {
            column: struct_column.to_owned(),
        })?;
    let structs = target
        .as_struct_opt()
        .ok_or_else(|| UnpivotError::NotStruct {
            column: struct_column.to_owned(),
            found: target.data_type().clone(),
        })?;
    let value_type = shared_field_type(struct_column, structs.fields())?;

    let kept: Vec<(Arc<Field>, ArrayRef)> = schema
        .fields()
        .iter()
        .zip(batch.columns())
        .enumerate()
        .filter(|(index, _)| *index != position)
        .map(|(_, (field, column))| (Arc::clone(field), Arc::clone(column)))
        .collect();
    check_collisions(&kept, variable_name, value_name)?;

    let width = structs.num_columns();
    let rows = batch.num_rows();
    let repeat: Vec<(usize, usize)> = (0..rows)
        .flat_map(|row| std::iter::repeat_n((0, row), width))
        .collect();

    let mut fields: Vec<Arc<Field>> = Vec::with_capacity(kept.len() + 2);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(kept.len() + 2);
    for (field, column) in &kept {
        fields.push(Arc::clone(field));
        columns.push(interleave(&[column.as_ref()], &repeat)?);
    }

    let names: Vec<&str> = structs
        .fields()
        .iter()
        .map(|field| field.name().as_str())
        .collect();
    let variables: Vec<&str> = (0..rows).flat_map(|_| names.iter().copied()).collect();
    fields.push(Arc::new(Field::new(variable_name, DataType::Utf8, false)));
    columns.push(Arc::new(StringArray::from(variables)));

    let null_slot = new_null_array(&value_type, 1);
    let mut sources: Vec<&dyn Array> = structs
        .columns()
        .iter()
        .map(|column| column.as_ref())
        .collect();
    sources.push(null_slot.as_ref());
    let picks: Vec<(usize, usize)> = (0..rows)
        .flat_map(|row| {
            let is_null = structs.is_null(row);
            (0..width).map(move |field| if is_null { (width, 0) } else { (field, row) })
        })
        .collect();
    fields.push(Arc::new(Field::new(value_name, value_type, true)));
    columns.push(interleave(&sources, &picks)?);

    let output = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    Ok(output)
}

fn shared_field_type(
    column: &str,
    fields: &arrow::datatypes::Fields,
) -> Result<DataType, UnpivotError> {
    let mut iter = fields.iter();
    let Some(first) = iter.next() else {
        return Ok(DataType::Null);
    };
    let expected = first.data_type();
    if let Some(odd) = iter.find(|field| field.data_type() != expected) {
        return Err(UnpivotError::MixedFieldTypes {
            column: column.to_owned(),
            field: odd.name().clone(),
            expected: expected.clone(),
            found: odd.data_type().clone(),
        });
    }
    Ok(expected.clone())
}

fn check_collisions(
    kept: &[(Arc<Field>, ArrayRef)],
    variable_name: &str,
    value_name: &str,
) -> Result<(), UnpivotError> {
    if variable_name == value_name {
        return Err(UnpivotError::NameCollision {
            name: value_name.to_owned(),
        });
    }
    for name in [variable_name, value_name] {
        if kept.iter().any(|(field, _)| field.name() == name) {
            return Err(UnpivotError::NameCollision {
                name: name.to_owned(),
            });
        }
    }
    Ok(())
}
