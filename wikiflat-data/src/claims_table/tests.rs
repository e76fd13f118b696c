//! Unit tests for the claims table schema.

use super::*;
use arrow::array::AsArray;
use arrow::datatypes::Float64Type;
use rstest::rstest;
use serde_json::json;
use wikiflat_core::normalise_entity;

fn berlin_rows() -> Vec<ClaimRow> {
    let claims = json!({
        "P625": [{
            "rank": "normal",
            "mainsnak": {
                "property": "P625",
                "datatype": "globe-coordinate",
                "property-labels": {"en": "coordinate location"},
                "datavalue": {"latitude": 52, "longitude": 13.4, "globe": "Q2"}
            }
        }]
    });
    let map = claims.as_object().expect("object");
    normalise_entity("Q64", map).expect("normalised").rows
}

fn schema_of(columns: &[(&str, DataType)]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|(name, data_type)| Field::new(*name, data_type.clone(), true))
            .collect::<Vec<_>>(),
    )
}

fn final_fields_without(skip: &[&str]) -> Vec<(&'static str, DataType)> {
    FinalColumn::ALL
        .iter()
        .filter(|column| !skip.contains(&column.name()))
        .map(|column| (column.name(), arrow_type(column.kind())))
        .collect()
}

#[rstest]
fn schema_follows_final_column_order() {
    let schema = claims_schema();
    let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    let expected: Vec<_> = FinalColumn::ALL.iter().map(|c| c.name()).collect();
    assert_eq!(names, expected);
    assert!(!schema.field(0).is_nullable(), "id is required");
    assert_eq!(
        schema.field_with_name("ts_precision").expect("field").data_type(),
        &DataType::Int64
    );
}

#[rstest]
fn rows_become_typed_columns() {
    let rows = berlin_rows();
    let batch = rows_to_batch(&rows).expect("batch");

    assert_eq!(batch.num_rows(), 1);
    let latitude = batch
        .column_by_name("latitude")
        .expect("latitude")
        .as_primitive::<Float64Type>();
    assert!(latitude.value(0).total_cmp(&52.0).is_eq());
    let language = batch
        .column_by_name("language")
        .expect("language")
        .as_string::<i32>();
    assert_eq!(language.value(0), "en");
}

#[rstest]
fn exact_schema_is_recognised() {
    assert_eq!(classify_schema(&claims_schema()), Ok(SchemaFit::Exact));
}

#[rstest]
fn subset_is_widened_with_nulls() {
    let narrow = schema_of(&final_fields_without(&["mlt-language", "globe"]));
    assert_eq!(
        classify_schema(&narrow),
        Ok(SchemaFit::Subset {
            missing: vec!["globe".to_owned(), "mlt-language".to_owned()],
        })
    );

    let full = rows_to_batch(&berlin_rows()).expect("batch");
    let keep: Vec<usize> = full
        .schema()
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, field)| field.name() != "globe")
        .map(|(index, _)| index)
        .collect();
    let projected = full.project(&keep).expect("projection");

    let conformed = conform_batch(&projected).expect("conformed");
    assert_eq!(conformed.schema(), claims_schema());
    assert!(conformed.column_by_name("globe").expect("globe").is_null(0));
}

#[rstest]
fn superset_is_projected() {
    let mut columns = final_fields_without(&[]);
    columns.push(("qualifiers", DataType::Utf8));
    assert_eq!(
        classify_schema(&schema_of(&columns)),
        Ok(SchemaFit::Superset {
            extra: vec!["qualifiers".to_owned()],
        })
    );
}

#[rstest]
#[case::type_change(schema_of(&[("id", DataType::Int64)]))]
#[case::missing_required(schema_of(&final_fields_without(&["rank"])))]
#[case::divergent({
    let mut columns = final_fields_without(&["globe"]);
    columns.push(("qualifiers", DataType::Utf8));
    schema_of(&columns)
})]
fn drift_requires_review(#[case] schema: Schema) {
    assert!(classify_schema(&schema).is_err());
}
