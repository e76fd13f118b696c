//! Behavioural coverage for chunk selection and file discovery.

use super::*;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::Cell;

const FILES: [&str; 4] = [
    "chunk_1-0.parquet",
    "chunk_1-1.parquet",
    "chunk_2-0.parquet",
    "chunk_2-1.parquet",
];

/// Scenario state shared by the chunk state steps.
struct ChunkWorld {
    fixture: StoreFixture,
    next: Cell<Option<u64>>,
    added: Cell<Option<usize>>,
}

impl ChunkWorld {
    fn files() -> Vec<Utf8PathBuf> {
        FILES.iter().map(|name| source(name)).collect()
    }
}

#[fixture]
fn chunk_world() -> ChunkWorld {
    ChunkWorld {
        fixture: empty_store(),
        next: Cell::new(None),
        added: Cell::new(None),
    }
}

#[given("a dump split into chunks one and two")]
fn dump_with_two_chunks(#[from(chunk_world)] world: &ChunkWorld) {
    let added = world
        .fixture
        .store
        .init_files(&ChunkWorld::files())
        .unwrap_or_else(|err| panic!("init files: {err}"));
    assert_eq!(added, FILES.len());
}

#[given("every file of chunk one is complete")]
fn chunk_one_complete(#[from(chunk_world)] world: &ChunkWorld) {
    for name in FILES.iter().filter(|name| name.starts_with("chunk_1-")) {
        world
            .fixture
            .store
            .record(&source(name), Stage::Complete)
            .unwrap_or_else(|err| panic!("complete {name}: {err}"));
    }
}

#[when("I ask for the next chunk")]
fn ask_next_chunk(#[from(chunk_world)] world: &ChunkWorld) {
    let next = world
        .fixture
        .store
        .next_chunk()
        .unwrap_or_else(|err| panic!("next chunk: {err}"));
    world.next.set(next);
}

#[when("the files are discovered again")]
fn rediscover(#[from(chunk_world)] world: &ChunkWorld) {
    let added = world
        .fixture
        .store
        .init_files(&ChunkWorld::files())
        .unwrap_or_else(|err| panic!("init files: {err}"));
    world.added.set(Some(added));
}

#[then("chunk two is selected")]
fn chunk_two_selected(#[from(chunk_world)] world: &ChunkWorld) {
    assert_eq!(world.next.get(), Some(2));
}

#[then("no file is registered twice")]
fn nothing_registered(#[from(chunk_world)] world: &ChunkWorld) {
    assert_eq!(world.added.get(), Some(0));
}

#[then("chunk one stays complete")]
fn chunk_one_stays_complete(#[from(chunk_world)] world: &ChunkWorld) {
    let complete = world
        .fixture
        .store
        .files_in(1, Stage::Complete..=Stage::Complete)
        .unwrap_or_else(|err| panic!("files in chunk one: {err}"));
    assert_eq!(complete.len(), 2);
}

#[scenario(path = "tests/features/chunk_state.feature", index = 0)]
fn next_chunk_skips_finished_chunks(chunk_world: ChunkWorld) {
    let _ = chunk_world;
}

#[scenario(path = "tests/features/chunk_state.feature", index = 1)]
fn rediscovery_keeps_progress(chunk_world: ChunkWorld) {
    let _ = chunk_world;
}
