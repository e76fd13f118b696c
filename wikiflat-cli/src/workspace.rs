//! `init` and `status` commands: workspace layout and recorded progress.

use std::io::Write;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use wikiflat_data::{
    EngineNormaliser, FileState, LocalMirror, LocalPartitionSink, Pipeline, PipelineConfig,
    StateStore,
};

use crate::{ARG_ROOT, ARG_SOURCE_DIR, CliError, ENV_INIT_ROOT, ENV_STATUS_ROOT};

/// CLI arguments for the `init` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Create the data, tmp, output and state directories below \
                 the workspace root and register every source file at INIT. \
                 Files are listed from the source directory when one is \
                 given, otherwise from the workspace data directory. Files \
                 that already have a state record keep it.",
    about = "Prepare a workspace and register source files"
)]
#[ortho_config(prefix = "WIKIFLAT")]
pub(crate) struct InitArgs {
    /// Workspace root directory.
    #[arg(long = ARG_ROOT, value_name = "dir")]
    #[serde(default)]
    pub(crate) root: Option<Utf8PathBuf>,
    /// Directory mirroring the dump's source files.
    #[arg(long = ARG_SOURCE_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) source_dir: Option<Utf8PathBuf>,
}

impl InitArgs {
    pub(crate) fn into_config(self) -> Result<InitConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        InitConfig::try_from(merged)
    }
}

/// Resolved `init` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InitConfig {
    pub(crate) root: Utf8PathBuf,
    pub(crate) source_dir: Option<Utf8PathBuf>,
}

impl TryFrom<InitArgs> for InitConfig {
    type Error = CliError;

    fn try_from(args: InitArgs) -> Result<Self, Self::Error> {
        let root = args.root.ok_or(CliError::MissingArgument {
            field: ARG_ROOT,
            env: ENV_INIT_ROOT,
        })?;
        Ok(Self {
            root,
            source_dir: args.source_dir,
        })
    }
}

/// CLI arguments for the `status` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(about = "Print the recorded stage of every source file")]
#[ortho_config(prefix = "WIKIFLAT")]
pub(crate) struct StatusArgs {
    /// Workspace root directory.
    #[arg(long = ARG_ROOT, value_name = "dir")]
    #[serde(default)]
    pub(crate) root: Option<Utf8PathBuf>,
}

impl StatusArgs {
    pub(crate) fn into_config(self) -> Result<StatusConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        StatusConfig::try_from(merged)
    }
}

/// Resolved `status` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusConfig {
    pub(crate) root: Utf8PathBuf,
}

impl TryFrom<StatusArgs> for StatusConfig {
    type Error = CliError;

    fn try_from(args: StatusArgs) -> Result<Self, Self::Error> {
        let root = args.root.ok_or(CliError::MissingArgument {
            field: ARG_ROOT,
            env: ENV_STATUS_ROOT,
        })?;
        Ok(Self { root })
    }
}

/// Fail unless `path` is an existing directory.
pub(crate) fn require_dir(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
    match wikiflat_fs::is_dir(path) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CliError::MissingDirectory {
            field,
            path: path.to_path_buf(),
        }),
        Err(source) => Err(CliError::InspectDirectory {
            field,
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn create_layout(layout: &PipelineConfig) -> Result<(), CliError> {
    for dir in [
        &layout.data_dir,
        &layout.tmp_dir,
        &layout.output_dir,
        &layout.state_dir,
    ] {
        wikiflat_fs::ensure_dir(dir).map_err(|source| CliError::CreateDirectory {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(())
}

pub(super) fn run_init(args: InitArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    run_init_with(args, &mut stdout)
}

pub(super) fn run_init_with(args: InitArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    let added = init_workspace(&config)?;
    writeln!(writer, "registered {added} files").map_err(CliError::WriteOutput)
}

pub(crate) fn init_workspace(config: &InitConfig) -> Result<usize, CliError> {
    if let Some(dir) = &config.source_dir {
        require_dir(dir, ARG_SOURCE_DIR)?;
    }
    let layout = PipelineConfig::under(&config.root);
    create_layout(&layout)?;
    let sink = LocalPartitionSink::new(&config.root.join("partitions"), &config.root.join("audit"));
    let mut pipeline = Pipeline::new(layout, &EngineNormaliser, &sink)?;
    if let Some(dir) = &config.source_dir {
        pipeline = pipeline.with_catalog(Arc::new(LocalMirror::new(dir)));
    }
    let added = pipeline.discover()?;
    info!("Initialised workspace: root={}, added={added}", config.root);
    Ok(added)
}

pub(super) fn run_status(args: StatusArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    run_status_with(args, &mut stdout)
}

pub(super) fn run_status_with(args: StatusArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    let state = StateStore::new(&PipelineConfig::under(&config.root).state_dir)?;
    let files = state.all()?;
    let next = state.next_chunk()?;
    write_status(writer, &files, next).map_err(CliError::WriteOutput)
}

fn write_status(
    writer: &mut dyn Write,
    files: &[FileState],
    next: Option<u64>,
) -> std::io::Result<()> {
    for file in files {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            index_label(file.chunk),
            index_label(file.part),
            file.stage,
            file.stem
        )?;
    }
    let next_label = next.map_or_else(|| "none".to_owned(), |chunk| chunk.to_string());
    writeln!(writer, "next chunk: {next_label}")
}

fn index_label(index: Option<u64>) -> String {
    index.map_or_else(|| "-".to_owned(), |value| value.to_string())
}

#[cfg(test)]
pub(crate) fn init_config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<InitConfig, CliError> {
    let merged = InitArgs::merge_from_layers(layers).map_err(CliError::from)?;
    InitConfig::try_from(merged)
}
