//! Unit tests for the source reader.

use super::*;
use crate::test_support::{EntityFixture, Workspace, write_batch, write_source};
use arrow::array::{StringArray, StructArray};
use rstest::rstest;
use serde_json::json;

#[rstest]
fn reads_json_text_sections() {
    let workspace = Workspace::new();
    let path = workspace.join("chunk_0-0.parquet");
    write_source(
        &path,
        &[
            EntityFixture::bare("Q1").with_labels(json!({"en": "universe"})),
            EntityFixture::bare("Q2"),
        ],
    );

    let reader = SourceReader::open(&path, &Section::ALL).expect("open source");
    assert_eq!(reader.len(), 2);
    let entities: Vec<_> = reader
        .collect::<Result<_, _>>()
        .expect("entities decode");

    let [first, second] = entities.as_slice() else {
        panic!("expected two entities, got {}", entities.len());
    };
    assert_eq!(first.id, "Q1");
    assert_eq!(
        first.section(Section::Labels).expect("labels render").as_deref(),
        Some(r#"{"en":"universe"}"#)
    );
    assert_eq!(second.id, "Q2");
    assert_eq!(second.labels, None);
}

#[rstest]
fn unrequested_sections_are_not_decoded() {
    let workspace = Workspace::new();
    let path = workspace.join("chunk_0-0.parquet");
    write_source(
        &path,
        &[EntityFixture::bare("Q1")
            .with_labels(json!({"en": "universe"}))
            .with_claims(json!({"P31": []}))],
    );

    let mut reader = SourceReader::open(&path, &[Section::Claims]).expect("open source");
    let entity = reader
        .next()
        .expect("one entity")
        .expect("entity decodes");
    assert_eq!(entity.labels, None);
    assert_eq!(
        entity.section(Section::Claims).expect("claims render").as_deref(),
        Some(r#"{"P31":[]}"#)
    );
}

#[rstest]
fn nested_struct_sections_are_rendered_as_json() {
    let workspace = Workspace::new();
    let path = workspace.join("nested.parquet");
    let labels = StructArray::from(vec![
        (
            Arc::new(Field::new("en", DataType::Utf8, true)),
            Arc::new(StringArray::from(vec![Some("Berlin"), None])) as ArrayRef,
        ),
        (
            Arc::new(Field::new("fr", DataType::Utf8, true)),
            Arc::new(StringArray::from(vec![Some("Berlin"), Some("Paris")])) as ArrayRef,
        ),
    ]);
    let ids: ArrayRef = Arc::new(StringArray::from(vec!["Q64", "Q90"]));
    let batch = RecordBatch::try_from_iter([("id", ids), ("labels", Arc::new(labels) as ArrayRef)])
        .expect("batch");
    write_batch(&path, &batch);

    let entities: Vec<_> = SourceReader::open(&path, &[Section::Labels])
        .expect("open source")
        .collect::<Result<_, _>>()
        .expect("entities decode");

    let decoded: Vec<Value> = entities
        .iter()
        .map(|entity| {
            let text = entity
                .section(Section::Labels)
                .expect("labels render")
                .expect("labels present");
            serde_json::from_str(&text).expect("labels are JSON")
        })
        .collect();
    assert_eq!(
        decoded,
        vec![json!({"en": "Berlin", "fr": "Berlin"}), json!({"fr": "Paris"})]
    );
}

#[rstest]
fn nested_sections_render_only_when_asked() {
    let workspace = Workspace::new();
    let path = workspace.join("nested-claims.parquet");
    let claims = StructArray::from(vec![(
        Arc::new(Field::new("P31", DataType::Utf8, true)),
        Arc::new(StringArray::from(vec![Some("Q5"), Some("Q515")])) as ArrayRef,
    )]);
    let ids: ArrayRef = Arc::new(StringArray::from(vec!["Q1", "Q2"]));
    let batch = RecordBatch::try_from_iter([("id", ids), ("claims", Arc::new(claims) as ArrayRef)])
        .expect("batch");
    write_batch(&path, &batch);

    let entities: Vec<SourceEntity> = SourceReader::open(&path, &[Section::Claims])
        .expect("open source")
        .collect::<Result<_, _>>()
        .expect("entities decode");

    assert!(
        entities
            .iter()
            .all(|entity| entity.claims.as_ref().is_some_and(SectionText::is_deferred)),
        "reading must not render nested claims"
    );
    let [_, second] = entities.as_slice() else {
        panic!("expected two entities, got {}", entities.len());
    };
    let text = second
        .section(Section::Claims)
        .expect("claims render")
        .expect("claims present");
    let decoded: Value = serde_json::from_str(&text).expect("claims are JSON");
    assert_eq!(decoded, json!({"P31": "Q515"}));
}

#[rstest]
fn files_without_ids_are_rejected() {
    let workspace = Workspace::new();
    let path = workspace.join("no-id.parquet");
    let names: ArrayRef = Arc::new(StringArray::from(vec!["x"]));
    let batch = RecordBatch::try_from_iter([("name", names)]).expect("batch");
    write_batch(&path, &batch);

    let err = SourceReader::open(&path, &Section::ALL)
        .err()
        .expect("missing id must fail");
    assert!(matches!(err, SourceError::MissingId { .. }), "{err:?}");
}

#[rstest]
fn missing_files_report_the_path() {
    let workspace = Workspace::new();
    let path = workspace.join("absent.parquet");

    let err = SourceReader::open(&path, &Section::ALL)
        .err()
        .expect("absent file must fail");
    match err {
        SourceError::Open { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error {other:?}"),
    }
}
