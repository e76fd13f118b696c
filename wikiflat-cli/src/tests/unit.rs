//! Unit tests covering the `init` and `status` commands.

use super::helpers::{Scratch, output_text, write_chunk_zero};
use super::*;
use crate::workspace::{
    InitConfig, StatusConfig, init_config_from_layers_for_test, init_workspace, run_init_with,
    run_status_with,
};
use camino::Utf8Path;
use rstest::rstest;
use wikiflat_data::{Stage, StateStore};

#[rstest]
fn init_requires_a_root() {
    let err = InitConfig::try_from(InitArgs::default()).expect_err("missing root");
    match err {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, ARG_ROOT);
            assert_eq!(env, ENV_INIT_ROOT);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn status_requires_a_root() {
    let err = StatusConfig::try_from(StatusArgs::default()).expect_err("missing root");
    assert_eq!(
        err.to_string(),
        format!("missing {ARG_ROOT} (set --{ARG_ROOT} or {ENV_STATUS_ROOT})")
    );
}

#[rstest]
fn init_creates_the_layout_and_registers_local_files() {
    let scratch = Scratch::new();
    let root = scratch.root();
    write_chunk_zero(&root.join("data"));
    let config = InitConfig {
        root: root.clone(),
        source_dir: None,
    };

    let added = init_workspace(&config).expect("init");

    assert_eq!(added, 2);
    for dir in ["data", "tmp", "output", "state"] {
        assert!(root.join(dir).is_dir(), "{dir} should exist");
    }
    assert!(root.join("state/chunk_0-1.jsonl").is_file());
}

#[rstest]
fn init_registers_mirrored_files_once() {
    let scratch = Scratch::new();
    write_chunk_zero(&scratch.source_dir());
    let args = InitArgs {
        root: Some(scratch.root()),
        source_dir: Some(scratch.source_dir()),
    };
    let mut first = Vec::new();
    run_init_with(args.clone(), &mut first).expect("first init");
    let mut second = Vec::new();
    run_init_with(args, &mut second).expect("second init");

    assert_eq!(output_text(first), "registered 2 files\n");
    assert_eq!(output_text(second), "registered 0 files\n");
    assert!(
        !scratch.root().join("data/chunk_0-0.parquet").exists(),
        "init only registers files; fetching happens while processing"
    );
}

#[rstest]
fn init_rejects_a_missing_source_dir() {
    let scratch = Scratch::new();
    let config = InitConfig {
        root: scratch.root(),
        source_dir: Some(scratch.join("absent")),
    };

    let err = init_workspace(&config).expect_err("missing source dir");

    match err {
        CliError::MissingDirectory { field, .. } => assert_eq!(field, ARG_SOURCE_DIR),
        other => panic!("expected MissingDirectory, found {other:?}"),
    }
}

#[rstest]
fn init_layers_prefer_cli_over_env_over_file() {
    use ortho_config::MergeComposer;
    use serde_json::json;

    let scratch = Scratch::new();
    let mut composer = MergeComposer::new();
    composer.push_file(
        json!({
            "root": scratch.join("from-file").as_str(),
            "source_dir": scratch.join("file-mirror").as_str(),
        }),
        None,
    );
    composer.push_environment(json!({ "root": scratch.join("from-env").as_str() }));
    composer.push_cli(json!({ "source_dir": scratch.join("cli-mirror").as_str() }));

    let config = init_config_from_layers_for_test(composer.layers()).expect("merged config");

    assert_eq!(config.root, scratch.join("from-env"));
    assert_eq!(config.source_dir, Some(scratch.join("cli-mirror")));
}

#[rstest]
fn init_layers_map_configuration_errors() {
    use ortho_config::MergeComposer;
    use serde_json::json;

    let mut composer = MergeComposer::new();
    composer.push_cli(json!({ "root": 42 }));

    let err = init_config_from_layers_for_test(composer.layers()).expect_err("invalid layer");
    assert!(matches!(err, CliError::Configuration(_)), "{err:?}");
}

#[rstest]
fn status_lists_files_in_chunk_order() {
    let scratch = Scratch::new();
    let root = scratch.root();
    let state = StateStore::new(&root.join("state")).expect("state store");
    state
        .init_files(&["chunk_1-0.parquet", "chunk_0-2.parquet", "stray.parquet"])
        .expect("register");
    state
        .record(Utf8Path::new("chunk_0-2.parquet"), Stage::Complete)
        .expect("complete");
    let args = StatusArgs { root: Some(root) };
    let mut out = Vec::new();

    run_status_with(args, &mut out).expect("status");

    assert_eq!(
        output_text(out),
        "-\t-\tINIT\tstray\n\
         0\t2\tCOMPLETE\tchunk_0-2\n\
         1\t0\tINIT\tchunk_1-0\n\
         next chunk: 1\n"
    );
}

#[rstest]
fn status_of_an_empty_workspace() {
    let scratch = Scratch::new();
    let mut out = Vec::new();

    run_status_with(
        StatusArgs {
            root: Some(scratch.root()),
        },
        &mut out,
    )
    .expect("status");

    assert_eq!(output_text(out), "next chunk: none\n");
}

#[rstest]
fn status_surfaces_corrupt_records() {
    let scratch = Scratch::new();
    let root = scratch.root();
    wikiflat_fs::write_atomically(&root.join("state/chunk_0-0.jsonl"), b"{\"step\": 9}\n")
        .expect("write record");
    let mut out = Vec::new();

    let err = run_status_with(StatusArgs { root: Some(root) }, &mut out).expect_err("bad step");

    assert!(matches!(err, CliError::State(_)), "{err:?}");
}
