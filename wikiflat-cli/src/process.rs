//! `process` command: run unfinished chunks through the pipeline.

use std::io::Write;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use wikiflat_data::checkpoint::DEFAULT_BATCH_SIZE;
use wikiflat_data::prefetch::{DEFAULT_BUDGET_BYTES, DEFAULT_MAX_AHEAD};
use wikiflat_data::{
    ChunkReport, EngineNormaliser, LocalMirror, LocalPartitionSink, Pipeline, PipelineConfig,
    PrefetchOptions,
};

use crate::workspace::require_dir;
use crate::{
    ARG_AUDIT_DIR, ARG_BATCH_SIZE, ARG_CHUNK, ARG_PARTITION_DIR, ARG_PREFETCH_BUDGET_BYTES,
    ARG_PREFETCH_MAX_AHEAD, ARG_ROOT, ARG_SOURCE_DIR, CliError, ENV_PROCESS_ROOT,
};

/// CLI arguments for the `process` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Process every unfinished chunk of the workspace in order, \
                 writing the labels, descriptions, aliases, links and claims \
                 tables of each source file and partitioning them by \
                 language or site. Progress is recorded per file, so an \
                 interrupted run resumes where it stopped. With a source \
                 directory, missing files are copied in on demand and \
                 upcoming chunks are prefetched in the background.",
    about = "Process and partition unfinished chunks"
)]
#[ortho_config(prefix = "WIKIFLAT")]
pub(crate) struct ProcessArgs {
    /// Workspace root directory.
    #[arg(long = ARG_ROOT, value_name = "dir")]
    #[serde(default)]
    pub(crate) root: Option<Utf8PathBuf>,
    /// Directory mirroring the dump's source files.
    #[arg(long = ARG_SOURCE_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) source_dir: Option<Utf8PathBuf>,
    /// Entities per claims batch.
    #[arg(long = ARG_BATCH_SIZE, value_name = "count")]
    #[serde(default)]
    pub(crate) batch_size: Option<usize>,
    /// Destination of partitioned tables (default: `<root>/partitions`).
    #[arg(long = ARG_PARTITION_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) partition_dir: Option<Utf8PathBuf>,
    /// Destination of partition audit sidecars (default: `<root>/audit`).
    #[arg(long = ARG_AUDIT_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) audit_dir: Option<Utf8PathBuf>,
    /// Bytes of source files the prefetcher may hold locally.
    #[arg(long = ARG_PREFETCH_BUDGET_BYTES, value_name = "bytes")]
    #[serde(default)]
    pub(crate) prefetch_budget_bytes: Option<u64>,
    /// Chunks the prefetcher may look ahead; 0 disables prefetching.
    #[arg(long = ARG_PREFETCH_MAX_AHEAD, value_name = "count")]
    #[serde(default)]
    pub(crate) prefetch_max_ahead: Option<usize>,
    /// Run only this chunk.
    #[arg(long = ARG_CHUNK, value_name = "index")]
    #[serde(default)]
    pub(crate) chunk: Option<u64>,
}

impl ProcessArgs {
    pub(crate) fn into_config(self) -> Result<ProcessConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ProcessConfig::try_from(merged)
    }
}

/// Resolved `process` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProcessConfig {
    pub(crate) layout: PipelineConfig,
    pub(crate) source_dir: Option<Utf8PathBuf>,
    pub(crate) partition_dir: Utf8PathBuf,
    pub(crate) audit_dir: Utf8PathBuf,
    pub(crate) prefetch: Option<PrefetchOptions>,
    pub(crate) chunk: Option<u64>,
}

impl TryFrom<ProcessArgs> for ProcessConfig {
    type Error = CliError;

    fn try_from(args: ProcessArgs) -> Result<Self, Self::Error> {
        let root = args.root.ok_or(CliError::MissingArgument {
            field: ARG_ROOT,
            env: ENV_PROCESS_ROOT,
        })?;
        let batch_size = args.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(CliError::ZeroValue {
                field: ARG_BATCH_SIZE,
            });
        }
        let mut layout = PipelineConfig::under(&root);
        layout.batch_size = batch_size;

        let max_ahead = args.prefetch_max_ahead.unwrap_or(DEFAULT_MAX_AHEAD);
        let prefetch = (max_ahead > 0).then(|| {
            PrefetchOptions::default()
                .with_budget_bytes(args.prefetch_budget_bytes.unwrap_or(DEFAULT_BUDGET_BYTES))
                .with_max_ahead(max_ahead)
        });

        Ok(Self {
            partition_dir: args
                .partition_dir
                .unwrap_or_else(|| root.join("partitions")),
            audit_dir: args.audit_dir.unwrap_or_else(|| root.join("audit")),
            layout,
            source_dir: args.source_dir,
            prefetch,
            chunk: args.chunk,
        })
    }
}

pub(super) fn run_process(args: ProcessArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    run_process_with(args, &mut stdout)
}

pub(super) fn run_process_with(args: ProcessArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    let reports = execute_process(&config)?;
    write_reports(writer, &reports).map_err(CliError::WriteOutput)
}

pub(crate) fn execute_process(config: &ProcessConfig) -> Result<Vec<ChunkReport>, CliError> {
    let sink = LocalPartitionSink::new(&config.partition_dir, &config.audit_dir);
    let mut pipeline = Pipeline::new(config.layout.clone(), &EngineNormaliser, &sink)?;
    if let Some(dir) = &config.source_dir {
        require_dir(dir, ARG_SOURCE_DIR)?;
        pipeline = pipeline.with_catalog(Arc::new(LocalMirror::new(dir)));
    }
    pipeline.discover()?;
    let reports = match config.chunk {
        Some(chunk) => vec![pipeline.run_chunk(chunk)?],
        None => pipeline.run(config.prefetch)?,
    };
    Ok(reports)
}

fn write_reports(writer: &mut dyn Write, reports: &[ChunkReport]) -> std::io::Result<()> {
    if reports.is_empty() {
        return writeln!(writer, "nothing to process");
    }
    for report in reports {
        writeln!(
            writer,
            "chunk {}: files={} fetched={} processed={} partitioned={}",
            report.chunk, report.files, report.fetched, report.processed, report.partitioned
        )?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<ProcessConfig, CliError> {
    let merged = ProcessArgs::merge_from_layers(layers).map_err(CliError::from)?;
    ProcessConfig::try_from(merged)
}
