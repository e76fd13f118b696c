//! Unit tests for the per-file state store.

use super::*;
use crate::test_support::Workspace;
use rstest::{fixture, rstest};

mod behaviour;

struct StoreFixture {
    workspace: Workspace,
    store: StateStore,
}

fn empty_store() -> StoreFixture {
    let workspace = Workspace::new();
    let store = StateStore::new(&workspace.join("state")).expect("state store");
    StoreFixture { workspace, store }
}

#[fixture]
fn store() -> StoreFixture {
    empty_store()
}

fn source(name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from("data").join(name)
}

#[rstest]
fn ordinals_follow_declaration_order() {
    let ordinals: Vec<u8> = Stage::ALL.iter().map(|stage| stage.ordinal()).collect();
    assert_eq!(ordinals, [0, 1, 2, 3, 4, 5, 6]);
    for stage in Stage::ALL {
        assert_eq!(Stage::from_ordinal(stage.ordinal()), Some(stage));
    }
    assert_eq!(Stage::from_ordinal(7), None);
    assert_eq!(Stage::PostCheck.to_string(), "POST_CHECK");
}

#[rstest]
fn records_are_one_json_line_per_stem(store: StoreFixture) {
    store
        .store
        .record(&source("chunk_0-1.parquet"), Stage::Pull)
        .expect("record");

    let path = store.workspace.join("state/chunk_0-1.jsonl");
    let text = std::fs::read_to_string(&path).expect("read record");
    assert_eq!(text, "{\"step\":1}\n");
}

#[rstest]
fn advancing_reports_the_previous_stage(store: StoreFixture) {
    let file = source("chunk_0-1.parquet");
    let first = store.store.record(&file, Stage::Init).expect("init");
    let second = store.store.record(&file, Stage::Process).expect("process");

    assert_eq!(
        first,
        Transition::Advanced {
            from: None,
            to: Stage::Init
        }
    );
    assert_eq!(
        second,
        Transition::Advanced {
            from: Some(Stage::Init),
            to: Stage::Process
        }
    );
    assert_eq!(store.store.stage_of(&file).expect("stage"), Some(Stage::Process));
}

#[rstest]
fn rerecording_a_stage_is_a_no_op(store: StoreFixture) {
    let file = source("chunk_0-1.parquet");
    store.store.record(&file, Stage::Pull).expect("pull");

    let again = store.store.record(&file, Stage::Pull).expect("pull again");

    assert_eq!(again, Transition::Unchanged);
}

#[rstest]
fn moving_backwards_is_rejected(store: StoreFixture) {
    let file = source("chunk_0-1.parquet");
    store.store.record(&file, Stage::Partition).expect("partition");

    let err = store.store.record(&file, Stage::Pull).expect_err("backwards");

    match err {
        StateError::Backwards { from, to, .. } => {
            assert_eq!((from, to), (Stage::Partition, Stage::Pull));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(
        store.store.stage_of(&file).expect("stage"),
        Some(Stage::Partition)
    );
}

#[rstest]
fn complete_is_terminal(store: StoreFixture) {
    let file = source("chunk_0-1.parquet");
    store.store.record(&file, Stage::Complete).expect("complete");

    assert_eq!(
        store.store.record(&file, Stage::Complete).expect("same stage"),
        Transition::Unchanged
    );
    let err = store.store.record(&file, Stage::Init).expect_err("terminal");
    assert!(matches!(err, StateError::Terminal { .. }), "{err:?}");
}

#[rstest]
fn unknown_steps_are_reported(store: StoreFixture) {
    let path = store.workspace.join("state/chunk_0-0.jsonl");
    wikiflat_fs::write_atomically(&path, b"{\"step\": 9}\n").expect("write");

    let err = store
        .store
        .stage_of(&source("chunk_0-0.parquet"))
        .expect_err("unknown step");

    assert!(matches!(err, StateError::UnknownStep { step: 9, .. }), "{err:?}");
}

#[rstest]
fn listing_sorts_by_chunk_then_part(store: StoreFixture) {
    for name in ["chunk_10-0", "chunk_2-11", "chunk_2-3", "chunk_0-5"] {
        store
            .store
            .record(&source(&format!("{name}.parquet")), Stage::Init)
            .expect("record");
    }

    let states = store.store.all().expect("all");

    let keys: Vec<_> = states.iter().map(|s| (s.chunk, s.part)).collect();
    assert_eq!(
        keys,
        [
            (Some(0), Some(5)),
            (Some(2), Some(3)),
            (Some(2), Some(11)),
            (Some(10), Some(0)),
        ]
    );
}

#[rstest]
fn missing_directory_lists_nothing(store: StoreFixture) {
    assert!(store.store.all().expect("all").is_empty());
    assert_eq!(store.store.next_chunk().expect("next"), None);
}

#[rstest]
#[case::all_complete(&[("chunk_0-0", Stage::Complete), ("chunk_1-0", Stage::Complete)], None)]
#[case::lowest_open(&[("chunk_3-0", Stage::Init), ("chunk_1-0", Stage::Pull)], Some(1))]
#[case::skips_finished(&[("chunk_0-0", Stage::Complete), ("chunk_4-2", Stage::PostCheck)], Some(4))]
#[case::ignores_unnumbered(&[("latest-all", Stage::Init), ("chunk_5-0", Stage::Init)], Some(5))]
fn next_chunk_is_the_lowest_unfinished(
    store: StoreFixture,
    #[case] records: &[(&str, Stage)],
    #[case] expected: Option<u64>,
) {
    for (name, stage) in records {
        store
            .store
            .record(&source(&format!("{name}.parquet")), *stage)
            .expect("record");
    }

    assert_eq!(store.store.next_chunk().expect("next"), expected);
}

#[rstest]
fn files_in_filters_by_chunk_and_stage(store: StoreFixture) {
    store
        .store
        .record(&source("chunk_1-0.parquet"), Stage::Init)
        .expect("record");
    store
        .store
        .record(&source("chunk_1-1.parquet"), Stage::Process)
        .expect("record");
    store
        .store
        .record(&source("chunk_2-0.parquet"), Stage::Init)
        .expect("record");

    let pending = store
        .store
        .files_in(1, Stage::Init..=Stage::Pull)
        .expect("files");

    let stems: Vec<_> = pending.iter().map(|s| s.stem.as_str()).collect();
    assert_eq!(stems, ["chunk_1-0"]);
}

#[rstest]
fn init_files_keeps_existing_records(store: StoreFixture) {
    let existing = source("chunk_0-0.parquet");
    store.store.record(&existing, Stage::Partition).expect("record");

    let added = store
        .store
        .init_files(&[existing.clone(), source("chunk_0-1.parquet")])
        .expect("init");

    assert_eq!(added, 1);
    assert_eq!(
        store.store.stage_of(&existing).expect("stage"),
        Some(Stage::Partition)
    );
    assert_eq!(
        store
            .store
            .stage_of(&source("chunk_0-1.parquet"))
            .expect("stage"),
        Some(Stage::Init)
    );
}
