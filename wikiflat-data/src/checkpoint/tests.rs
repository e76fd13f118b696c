//! Unit tests for the batch checkpoint driver.

use super::*;
use crate::claims_table::claims_schema;
use crate::source::{Section, SourceReader};
use crate::test_support::{
    EntityFixture, Workspace, numbered_entities, read_strings, write_batch, write_source,
};
use arrow::array::{ArrayRef, StringArray};
use arrow::record_batch::RecordBatch;
use rstest::rstest;
use std::cell::Cell;


/// Counts invocations and delegates to the engine.
#[derive(Default)]
struct CountingNormaliser {
    calls: Cell<usize>,
}

impl ClaimsNormaliser for CountingNormaliser {
    fn normalise(
        &self,
        entity_id: &str,
        claims: &Map<String, Value>,
    ) -> Result<EntityRows, ClaimError> {
        self.calls.set(self.calls.get() + 1);
        EngineNormaliser.normalise(entity_id, claims)
    }
}

/// Files every entity's rows under one fixed id.
struct MislabellingNormaliser;

impl ClaimsNormaliser for MislabellingNormaliser {
    fn normalise(
        &self,
        _entity_id: &str,
        claims: &Map<String, Value>,
    ) -> Result<EntityRows, ClaimError> {
        normalise_entity("Q1", claims)
    }
}

fn run_file(
    source: &Utf8Path,
    batch_dir: &Utf8Path,
    normaliser: &dyn ClaimsNormaliser,
    batch_size: usize,
) -> Result<CheckpointReport, CheckpointError> {
    let reader = SourceReader::open(source, &[Section::Claims]).expect("open source");
    let expected = reader.len();
    let options = CheckpointOptions::default().with_batch_size(batch_size);
    BatchCheckpointer::new(batch_dir, normaliser, options).run(reader, expected)
}

#[rstest]
#[case(250, 100, 0, "batch-0-of-3.parquet")]
#[case(1200, 100, 3, "batch-03-of-12.parquet")]
#[case(7, 1, 6, "batch-6-of-7.parquet")]
fn batch_files_are_zero_padded(
    #[case] entities: usize,
    #[case] batch_size: usize,
    #[case] batch: usize,
    #[case] expected: &str,
) {
    assert_eq!(BatchPlan::new(entities, batch_size).file_name(batch), expected);
}

#[rstest]
#[case(0, 0)]
#[case(99, 0)]
#[case(100, 1)]
#[case(249, 2)]
fn batches_are_index_stable(#[case] index: usize, #[case] batch: usize) {
    assert_eq!(BatchPlan::new(250, 100).batch_of(index), batch);
}

#[rstest]
fn last_batch_may_be_short() {
    let plan = BatchPlan::new(5, 2);
    assert_eq!(plan.batches(), 3);
    let sizes: Vec<_> = (0..plan.batches()).map(|b| plan.entities_in(b)).collect();
    assert_eq!(sizes, [2, 2, 1]);
}

#[rstest]
fn zero_batch_size_is_treated_as_one() {
    assert_eq!(BatchPlan::new(3, 0).batches(), 3);
    assert_eq!(CheckpointOptions::default().with_batch_size(0).batch_size(), 1);
}

#[rstest]
fn rerun_skips_every_existing_batch() {
    let workspace = Workspace::new();
    let source = workspace.join("chunk_0-0.parquet");
    write_source(&source, &numbered_entities(5));
    let batch_dir = workspace.join("tmp/chunk_0-0");

    let first = CountingNormaliser::default();
    let report = run_file(&source, &batch_dir, &first, 2).expect("first run");
    assert_eq!(first.calls.get(), 5);
    assert_eq!(report.batches_written, 3);
    assert_eq!(report.rows, 10);

    let second = CountingNormaliser::default();
    let rerun = run_file(&source, &batch_dir, &second, 2).expect("second run");
    assert_eq!(second.calls.get(), 0);
    assert_eq!(rerun.batches_skipped, 3);
    assert_eq!(rerun.batches_written, 0);
    assert_eq!(rerun.entities, 5);
}

#[rstest]
fn only_missing_batches_are_redone() {
    let workspace = Workspace::new();
    let source = workspace.join("chunk_0-0.parquet");
    write_source(&source, &numbered_entities(5));
    let batch_dir = workspace.join("tmp");
    run_file(&source, &batch_dir, &EngineNormaliser, 2).expect("first run");
    let plan = BatchPlan::new(5, 2);
    std::fs::remove_file(batch_dir.join(plan.file_name(1))).expect("drop batch 1");

    let counting = CountingNormaliser::default();
    let report = run_file(&source, &batch_dir, &counting, 2).expect("resume");

    assert_eq!(counting.calls.get(), 2);
    assert_eq!(report.batches_written, 1);
    assert_eq!(report.batches_skipped, 2);
}

#[rstest]
fn concatenation_preserves_batch_order() {
    let workspace = Workspace::new();
    let source = workspace.join("chunk_0-0.parquet");
    write_source(&source, &numbered_entities(5));
    let batch_dir = workspace.join("tmp");
    let options = CheckpointOptions::default().with_batch_size(2);
    let checkpointer = BatchCheckpointer::new(&batch_dir, &EngineNormaliser, options);
    let reader = SourceReader::open(&source, &[Section::Claims]).expect("open source");
    checkpointer.run(reader, 5).expect("run");
    let target = workspace.join("out/claims/chunk_0-0.parquet");

    let rows = checkpointer
        .concatenate(&BatchPlan::new(5, 2), &target)
        .expect("concatenate");

    assert_eq!(rows, 10);
    let ids = read_strings(&target, "id");
    let mut order: Vec<String> = ids.into_iter().flatten().collect();
    order.dedup();
    assert_eq!(order, ["Q1", "Q2", "Q3", "Q4", "Q5"]);
}

#[rstest]
fn entities_without_rows_still_produce_a_batch_file() {
    let workspace = Workspace::new();
    let source = workspace.join("chunk_0-0.parquet");
    write_source(
        &source,
        &[
            EntityFixture::bare("Q1"),
            EntityFixture::bare("Q2").with_claims(serde_json::json!([])),
        ],
    );
    let batch_dir = workspace.join("tmp");

    let report = run_file(&source, &batch_dir, &EngineNormaliser, 10).expect("run");

    assert_eq!(report.batches_written, 1);
    assert_eq!(report.rows, 0);
    assert!(batch_dir.join("batch-0-of-1.parquet").is_file());
}

#[rstest]
fn undecodable_claims_are_counted_and_skipped() {
    let workspace = Workspace::new();
    let source = workspace.join("chunk_0-0.parquet");
    let ids: ArrayRef = Arc::new(StringArray::from(vec!["Q1", "Q2"]));
    let claims: ArrayRef = Arc::new(StringArray::from(vec![
        Some("{\"P31\": ["),
        Some("\"not an object\""),
    ]));
    let batch = RecordBatch::try_from_iter([("id", ids), ("claims", claims)]).expect("batch");
    write_batch(&source, &batch);

    let report = run_file(&source, &workspace.join("tmp"), &EngineNormaliser, 10).expect("run");

    assert_eq!(report.undecodable_entities, 2);
    assert_eq!(report.rows, 0);
}

#[rstest]
fn distinct_id_mismatch_is_fatal_and_discards_the_batch() {
    let workspace = Workspace::new();
    let source = workspace.join("chunk_0-0.parquet");
    let mut entities = numbered_entities(1);
    entities.extend(numbered_entities(1));
    write_source(&source, &entities);
    let batch_dir = workspace.join("tmp");

    let err = run_file(&source, &batch_dir, &EngineNormaliser, 2).expect_err("mismatch");

    match err {
        CheckpointError::BatchCountMismatch {
            path,
            expected,
            found,
        } => {
            assert_eq!((expected, found), (2, 1));
            assert!(!path.exists(), "mismatched batch must not be kept");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[rstest]
fn rows_filed_under_another_entity_are_rejected_per_entity() {
    let workspace = Workspace::new();
    let source = workspace.join("chunk_0-0.parquet");
    write_source(&source, &numbered_entities(3));
    let batch_dir = workspace.join("tmp");

    let err = run_file(&source, &batch_dir, &MislabellingNormaliser, 1).expect_err("mislabelled");

    match err {
        CheckpointError::Normalise {
            entity,
            source: ClaimError::IdentityViolation { expected, found },
        } => {
            assert_eq!(entity, "Q2");
            assert_eq!(expected, "Q2");
            assert_eq!(found, vec!["Q1".to_owned()]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    let plan = BatchPlan::new(3, 1);
    assert!(batch_dir.join(plan.file_name(0)).exists());
    assert!(!batch_dir.join(plan.file_name(1)).exists());
}

#[rstest]
#[case(3)]
#[case(7)]
fn entity_count_must_match_the_plan(#[case] expected: usize) {
    let workspace = Workspace::new();
    let source = workspace.join("chunk_0-0.parquet");
    write_source(&source, &numbered_entities(5));
    let reader = SourceReader::open(&source, &[Section::Claims]).expect("open source");
    let checkpointer = BatchCheckpointer::new(
        &workspace.join("tmp"),
        &EngineNormaliser,
        CheckpointOptions::default(),
    );

    let err = checkpointer.run(reader, expected).expect_err("count mismatch");

    assert!(
        matches!(err, CheckpointError::EntityCountMismatch { expected: e, .. } if e == expected),
        "unexpected error {err:?}"
    );
}

#[rstest]
fn cancellation_stops_before_the_next_batch() {
    let workspace = Workspace::new();
    let source = workspace.join("chunk_0-0.parquet");
    write_source(&source, &numbered_entities(4));
    let batch_dir = workspace.join("tmp");
    let flag = Arc::new(AtomicBool::new(true));
    let options = CheckpointOptions::default()
        .with_batch_size(2)
        .with_cancel_flag(Arc::clone(&flag));
    let reader = SourceReader::open(&source, &[Section::Claims]).expect("open source");

    let err = BatchCheckpointer::new(&batch_dir, &EngineNormaliser, options)
        .run(reader, 4)
        .expect_err("cancelled");

    assert!(matches!(err, CheckpointError::Cancelled { batches_written: 0 }));
    assert!(!batch_dir.join("batch-0-of-2.parquet").exists());
}

#[rstest]
fn narrower_batches_are_widened_on_concatenation() {
    let workspace = Workspace::new();
    let batch_dir = workspace.join("tmp");
    let ids: ArrayRef = Arc::new(StringArray::from(vec!["Q1"]));
    let text = |value: &str| Arc::new(StringArray::from(vec![value])) as ArrayRef;
    let narrow = RecordBatch::try_from_iter([
        ("id", ids),
        ("rank", text("normal")),
        ("property", text("P856")),
        ("datatype", text("url")),
        ("datavalue", text("https://example.org")),
    ])
    .expect("batch");
    write_batch(&batch_dir.join("batch-0-of-1.parquet"), &narrow);
    let checkpointer =
        BatchCheckpointer::new(&batch_dir, &EngineNormaliser, CheckpointOptions::default());
    let target = workspace.join("claims.parquet");

    let rows = checkpointer
        .concatenate(&BatchPlan::new(1, 100), &target)
        .expect("concatenate");

    assert_eq!(rows, 1);
    let (schema, _) = read_parquet(&target).expect("read claims");
    assert_eq!(schema.fields(), claims_schema().fields());
}

#[rstest]
fn divergent_batches_need_review() {
    let workspace = Workspace::new();
    let batch_dir = workspace.join("tmp");
    let ids: ArrayRef = Arc::new(StringArray::from(vec!["Q1"]));
    let text = |value: &str| Arc::new(StringArray::from(vec![value])) as ArrayRef;
    let odd = RecordBatch::try_from_iter([
        ("id", ids),
        ("rank", text("normal")),
        ("property", text("P856")),
        ("datatype", text("url")),
        ("qualifiers", text("{}")),
    ])
    .expect("batch");
    write_batch(&batch_dir.join("batch-0-of-1.parquet"), &odd);
    let checkpointer =
        BatchCheckpointer::new(&batch_dir, &EngineNormaliser, CheckpointOptions::default());

    let err = checkpointer
        .concatenate(&BatchPlan::new(1, 100), &workspace.join("claims.parquet"))
        .expect_err("drift");

    assert!(matches!(err, CheckpointError::SchemaDrift { .. }), "{err:?}");
}

#[rstest]
fn missing_batches_block_concatenation() {
    let workspace = Workspace::new();
    let checkpointer = BatchCheckpointer::new(
        &workspace.join("tmp"),
        &EngineNormaliser,
        CheckpointOptions::default(),
    );

    let err = checkpointer
        .concatenate(&BatchPlan::new(1, 100), &workspace.join("claims.parquet"))
        .expect_err("missing batch");

    assert!(matches!(err, CheckpointError::MissingBatch { .. }), "{err:?}");
}
