//! End-to-end processing of source files and chunks.
//!
//! A [`Pipeline`] owns the directory layout and the state store. For each file
//! of a chunk it walks the stages in order, skipping work already recorded:
//!
//! 1. PULL: make sure the source file is in the data directory, fetching it
//!    through the [`SourceCatalog`] when one is configured.
//! 2. PROCESS: write the four simple tables, then checkpoint and concatenate
//!    the claims table.
//! 3. PARTITION: hand every table to the [`PartitionSink`].
//!
//! Publication (PUSH and POST_CHECK) belongs to the sink, so a partitioned
//! file moves straight to COMPLETE.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use camino::{Utf8Path, Utf8PathBuf};
use log::{info, warn};
use thiserror::Error;
use wikiflat_fs::{is_file, list_files};

use crate::checkpoint::{
    BatchCheckpointer, BatchPlan, CheckpointError, CheckpointOptions, CheckpointReport,
    ClaimsNormaliser, DEFAULT_BATCH_SIZE,
};
use crate::partition::{PartitionError, PartitionSink};
use crate::prefetch::{
    PrefetchError, PrefetchEvent, PrefetchHandle, PrefetchOptions, SourceCatalog, fetch_file,
    spawn_prefetch,
};
use crate::source::{Section, SourceError, SourceReader};
use crate::state::{FileState, Stage, StateError, StateStore};
use crate::tables::{
    DEFAULT_SLICE_ROWS, SimpleTable, TablesError, TablesReport, write_simple_tables,
};

const SOURCE_SUFFIX: &str = ".parquet";

/// A table produced for every source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputTable {
    /// One of the flattened entity sections.
    Simple(SimpleTable),
    /// The normalised claims table.
    Claims,
}

impl OutputTable {
    /// Every output table, claims last.
    pub const ALL: [Self; 5] = [
        Self::Simple(SimpleTable::Labels),
        Self::Simple(SimpleTable::Descriptions),
        Self::Simple(SimpleTable::Aliases),
        Self::Simple(SimpleTable::Links),
        Self::Claims,
    ];

    /// Directory name of the table.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Simple(table) => table.name(),
            Self::Claims => "claims",
        }
    }

    /// Column the table is partitioned by.
    #[must_use]
    pub const fn partition_key(self) -> &'static str {
        match self {
            Self::Simple(table) => table.key_column(),
            Self::Claims => "language",
        }
    }

    /// Output path for this table of `source`: `<output>/<table>/<file name>`.
    #[must_use]
    pub fn output_path(self, output_dir: &Utf8Path, source: &Utf8Path) -> Utf8PathBuf {
        match self {
            Self::Simple(table) => table.output_path(output_dir, source),
            Self::Claims => {
                let file_name = source.file_name().unwrap_or(source.as_str());
                output_dir.join(self.name()).join(file_name)
            }
        }
    }
}

/// Directory layout and tuning for a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Source files, named `chunk_<chunk>-<part>.parquet`.
    pub data_dir: Utf8PathBuf,
    /// Batch files, one subdirectory per source stem.
    pub tmp_dir: Utf8PathBuf,
    /// Output tables, one subdirectory per table.
    pub output_dir: Utf8PathBuf,
    /// Per-file state records.
    pub state_dir: Utf8PathBuf,
    /// Entities per claims batch.
    pub batch_size: usize,
    /// Entities flattened at a time for the simple tables.
    pub slice_rows: usize,
}

impl PipelineConfig {
    /// Standard layout below `root`: `data`, `tmp`, `output` and `state`.
    #[must_use]
    pub fn under(root: &Utf8Path) -> Self {
        Self {
            data_dir: root.join("data"),
            tmp_dir: root.join("tmp"),
            output_dir: root.join("output"),
            state_dir: root.join("state"),
            batch_size: DEFAULT_BATCH_SIZE,
            slice_rows: DEFAULT_SLICE_ROWS,
        }
    }

    /// Location of the source file with `stem`.
    #[must_use]
    pub fn source_path(&self, stem: &str) -> Utf8PathBuf {
        self.data_dir.join(format!("{stem}{SOURCE_SUFFIX}"))
    }

    /// Batch directory for `source`.
    #[must_use]
    pub fn batch_dir(&self, source: &Utf8Path) -> Utf8PathBuf {
        self.tmp_dir.join(source.file_stem().unwrap_or(source.as_str()))
    }
}

/// Errors raised while running the pipeline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// The state store failed.
    #[error(transparent)]
    State(#[from] StateError),
    /// A source file could not be read.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The simple tables could not be written.
    #[error(transparent)]
    Tables(#[from] Box<TablesError>),
    /// Claims processing failed.
    #[error(transparent)]
    Checkpoint(#[from] Box<CheckpointError>),
    /// Partitioning failed.
    #[error(transparent)]
    Partition(#[from] PartitionError),
    /// Fetching a source file failed.
    #[error(transparent)]
    Fetch(#[from] PrefetchError),
    /// A directory could not be inspected.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being inspected.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A source file is absent and no catalog can supply it.
    #[error("source file {path} is missing and no catalog lists it")]
    MissingSource {
        /// Expected location.
        path: Utf8PathBuf,
    },
}

/// Outcome of processing one source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileReport {
    /// Simple table row counts.
    pub tables: TablesReport,
    /// Claims checkpoint summary.
    pub claims: CheckpointReport,
    /// Rows in the concatenated claims table.
    pub claims_rows: usize,
}

/// Outcome of running one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkReport {
    /// Chunk index.
    pub chunk: u64,
    /// Files of the chunk that were not yet complete.
    pub files: usize,
    /// Files fetched from the catalog.
    pub fetched: usize,
    /// Files processed.
    pub processed: usize,
    /// Files partitioned.
    pub partitioned: usize,
}

/// Drives source files through the stages.
pub struct Pipeline<'a> {
    config: PipelineConfig,
    state: StateStore,
    normaliser: &'a dyn ClaimsNormaliser,
    sink: &'a dyn PartitionSink,
    catalog: Option<Arc<dyn SourceCatalog>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Pipeline<'a> {
    /// Build a pipeline over `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::State`] when the state store cannot be opened.
    pub fn new(
        config: PipelineConfig,
        normaliser: &'a dyn ClaimsNormaliser,
        sink: &'a dyn PartitionSink,
    ) -> Result<Self, PipelineError> {
        let state = StateStore::new(&config.state_dir)?;
        Ok(Self {
            config,
            state,
            normaliser,
            sink,
            catalog: None,
            cancel: None,
        })
    }

    /// Fetch missing source files through `catalog`.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn SourceCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Stop claims processing between batches once `flag` is set.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Directory layout in use.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// State store in use.
    #[must_use]
    pub const fn state(&self) -> &StateStore {
        &self.state
    }

    /// Register every known source file at INIT, returning the number added.
    ///
    /// Files come from the catalog when one is configured, otherwise from the
    /// data directory.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the listing or the state store fails.
    pub fn discover(&self) -> Result<usize, PipelineError> {
        let files: Vec<Utf8PathBuf> = match &self.catalog {
            Some(catalog) => catalog
                .list()
                .map_err(PrefetchError::from)?
                .into_iter()
                .filter(|file| file.name.ends_with(SOURCE_SUFFIX))
                .map(|file| Utf8PathBuf::from(file.name))
                .collect(),
            None => list_files(&self.config.data_dir, SOURCE_SUFFIX).map_err(|source| {
                PipelineError::Io {
                    path: self.config.data_dir.clone(),
                    source,
                }
            })?,
        };
        Ok(self.state.init_files(&files)?)
    }

    /// Write all five tables of `source`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when any table cannot be produced.
    pub fn process_file(&self, source: &Utf8Path) -> Result<FileReport, PipelineError> {
        let tables = write_simple_tables(source, &self.config.output_dir, self.config.slice_rows)
            .map_err(Box::new)?;

        let reader = SourceReader::open(source, &[Section::Claims])?;
        let expected = reader.len();
        let mut options = CheckpointOptions::default().with_batch_size(self.config.batch_size);
        if let Some(flag) = &self.cancel {
            options = options.with_cancel_flag(Arc::clone(flag));
        }
        let checkpointer =
            BatchCheckpointer::new(&self.config.batch_dir(source), self.normaliser, options);
        let claims = checkpointer.run(reader, expected).map_err(Box::new)?;
        let plan = BatchPlan::new(expected, self.config.batch_size);
        let target = OutputTable::Claims.output_path(&self.config.output_dir, source);
        let claims_rows = checkpointer.concatenate(&plan, &target).map_err(Box::new)?;

        info!(
            "Processed file: source={source}, entities={}, claims_rows={claims_rows}",
            claims.entities
        );
        Ok(FileReport {
            tables,
            claims,
            claims_rows,
        })
    }

    /// Partition every output table of `source`, returning the rows handed
    /// to the sink.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Partition`] when the sink fails.
    pub fn partition_file(&self, source: &Utf8Path) -> Result<usize, PipelineError> {
        let mut rows = 0;
        for table in OutputTable::ALL {
            let path = table.output_path(&self.config.output_dir, source);
            let report = self
                .sink
                .partition(table.name(), &path, table.partition_key())?;
            rows += report.rows();
        }
        Ok(rows)
    }

    /// Make sure `source` is present locally; returns whether it was fetched.
    fn pull(&self, source: &Utf8Path) -> Result<bool, PipelineError> {
        let present = is_file(source).map_err(|err| PipelineError::Io {
            path: source.to_path_buf(),
            source: err,
        })?;
        if present {
            return Ok(false);
        }
        let missing = || PipelineError::MissingSource {
            path: source.to_path_buf(),
        };
        let catalog = self.catalog.as_ref().ok_or_else(missing)?;
        let name = source.file_name().ok_or_else(missing)?;
        let listing = catalog.list().map_err(PrefetchError::from)?;
        let remote = listing
            .iter()
            .find(|file| file.name == name)
            .ok_or_else(missing)?;
        fetch_file(catalog.as_ref(), &self.config.data_dir, remote)?;
        Ok(true)
    }

    fn start_prefetch(
        &self,
        catalog: &Arc<dyn SourceCatalog>,
        chunk: u64,
        options: PrefetchOptions,
    ) -> Option<PrefetchHandle> {
        spawn_prefetch(Arc::clone(catalog), &self.config.data_dir, chunk, options)
            .inspect_err(|err| warn!("Prefetch not started: chunk={chunk}, error={err}"))
            .ok()
    }

    fn advance(&self, file: &FileState, report: &mut ChunkReport) -> Result<(), PipelineError> {
        let source = self.config.source_path(&file.stem);
        // PULL marks an attempted fetch, so a file left there pulls again.
        if file.stage <= Stage::Pull {
            self.state.record(&source, Stage::Pull)?;
            if self.pull(&source)? {
                report.fetched += 1;
            }
        }
        if file.stage < Stage::Process {
            self.process_file(&source)?;
            self.state.record(&source, Stage::Process)?;
            report.processed += 1;
        }
        if file.stage < Stage::Partition {
            self.partition_file(&source)?;
            self.state.record(&source, Stage::Partition)?;
            report.partitioned += 1;
        }
        self.state.record(&source, Stage::Complete)?;
        Ok(())
    }

    /// Bring every unfinished file of `chunk` to COMPLETE.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for the first file that fails; earlier files
    /// keep their recorded progress.
    pub fn run_chunk(&self, chunk: u64) -> Result<ChunkReport, PipelineError> {
        let pending = self.state.files_in(chunk, Stage::Init..=Stage::PostCheck)?;
        let mut report = ChunkReport {
            chunk,
            files: pending.len(),
            ..ChunkReport::default()
        };
        for file in &pending {
            self.advance(file, &mut report)?;
        }
        info!(
            "Completed chunk: chunk={chunk}, files={}, fetched={}, processed={}, partitioned={}",
            report.files, report.fetched, report.processed, report.partitioned
        );
        Ok(report)
    }

    /// Run chunks in order until none is left unfinished.
    ///
    /// With `prefetch` set and a catalog configured, upcoming chunks are
    /// fetched in the background while each chunk runs. Prefetch failures
    /// are logged and never fail the run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for the first chunk that fails.
    pub fn run(
        &self,
        prefetch: Option<PrefetchOptions>,
    ) -> Result<Vec<ChunkReport>, PipelineError> {
        let mut reports = Vec::new();
        while let Some(chunk) = self.state.next_chunk()? {
            let worker = match (prefetch, &self.catalog) {
                (Some(options), Some(catalog)) => self.start_prefetch(catalog, chunk, options),
                _ => None,
            };
            let outcome = self.run_chunk(chunk);
            if let Some(handle) = worker {
                if outcome.is_err() {
                    handle.cancel();
                }
                match handle.join() {
                    Ok(events) => log_prefetch_events(&events),
                    Err(err) => warn!("Prefetch worker lost: error={err}"),
                }
            }
            reports.push(outcome?);
        }
        Ok(reports)
    }
}

fn log_prefetch_events(events: &[PrefetchEvent]) {
    for event in events {
        match event {
            PrefetchEvent::Failed { name, message } => warn!(
                "Prefetch failed: file={}, error={message}",
                name.as_deref().unwrap_or("-")
            ),
            PrefetchEvent::Finished { files, bytes } => {
                info!("Prefetched files: files={files}, bytes={bytes}");
            }
            PrefetchEvent::Planned { .. }
            | PrefetchEvent::Fetched { .. }
            | PrefetchEvent::Cancelled => {}
        }
    }
}
