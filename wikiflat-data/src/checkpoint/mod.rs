//! Resumable, batch-checkpointed claims processing for one source file.
//!
//! Entities are assigned to batches by position: entity `i` belongs to batch
//! `i / batch_size`. Each batch is persisted as one immutable Parquet file
//! named `batch-{b}-of-{n}.parquet` with both numbers zero-padded to the
//! digit count of `n`. A batch whose file already exists is skipped without
//! decoding its entities, so rerunning after an interruption only redoes the
//! unfinished batch.
//!
//! After every write the file is read back and its distinct-id count is
//! compared with the number of entities that contributed rows. Once all
//! batches exist they are concatenated, in index order, into the claims
//! table of the source file.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrow::array::{Array, AsArray};
use arrow::error::ArrowError;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use thiserror::Error;
use wikiflat_core::{ClaimError, ClaimRow, EntityRows, normalise_entity, verify_entity_identity};
use wikiflat_fs::{ensure_dir, is_file, remove_file_if_exists};

use crate::claims_table::{
    ConformError, classify_schema, claims_schema, conform_batch, rows_to_batch,
};
use crate::columnar::{ColumnarError, ParquetSink, read_parquet, write_parquet};
use crate::source::{Section, SourceEntity, SourceError};

/// Entities per batch when not configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Options for [`BatchCheckpointer`].
#[derive(Debug, Clone)]
pub struct CheckpointOptions {
    batch_size: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for CheckpointOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: None,
        }
    }
}

impl CheckpointOptions {
    /// Set the number of entities per batch. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Stop between batches once `flag` is set.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Entities per batch.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Index-stable assignment of entities to batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    entities: usize,
    batch_size: usize,
    batches: usize,
}

impl BatchPlan {
    /// Plan `entities` entities in batches of `batch_size` (at least one).
    ///
    /// # Examples
    ///
    /// ```
    /// use wikiflat_data::checkpoint::BatchPlan;
    ///
    /// let plan = BatchPlan::new(250, 100);
    /// assert_eq!(plan.batches(), 3);
    /// assert_eq!(plan.batch_of(199), 1);
    /// assert_eq!(plan.entities_in(2), 50);
    /// assert_eq!(plan.file_name(0), "batch-0-of-3.parquet");
    /// ```
    #[must_use]
    pub const fn new(entities: usize, batch_size: usize) -> Self {
        let size = if batch_size == 0 { 1 } else { batch_size };
        Self {
            entities,
            batch_size: size,
            batches: entities.div_ceil(size),
        }
    }

    /// Number of batches.
    #[must_use]
    pub const fn batches(&self) -> usize {
        self.batches
    }

    /// Number of entities planned.
    #[must_use]
    pub const fn entities(&self) -> usize {
        self.entities
    }

    /// Batch holding the entity at zero-based position `index`.
    #[must_use]
    pub const fn batch_of(&self, index: usize) -> usize {
        match index.checked_div(self.batch_size) {
            Some(batch) => batch,
            None => 0,
        }
    }

    /// Entities in `batch`; only the last batch may be short.
    #[must_use]
    pub const fn entities_in(&self, batch: usize) -> usize {
        let start = batch.saturating_mul(self.batch_size);
        let end = start.saturating_add(self.batch_size);
        let capped = if end < self.entities { end } else { self.entities };
        capped.saturating_sub(start)
    }

    /// File name of `batch`, zero-padded to the digit count of the batch total.
    #[must_use]
    pub fn file_name(&self, batch: usize) -> String {
        let total = self.batches;
        let width = total.to_string().len();
        format!("batch-{batch:0width$}-of-{total:0width$}.parquet")
    }
}

/// Normalises one entity's claims; a seam for observing the driver.
pub trait ClaimsNormaliser {
    /// Normalise the decoded `claims` object of `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`ClaimError`] when rows violate entity identity.
    fn normalise(
        &self,
        entity_id: &str,
        claims: &Map<String, Value>,
    ) -> Result<EntityRows, ClaimError>;
}

/// [`ClaimsNormaliser`] backed by [`normalise_entity`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineNormaliser;

impl ClaimsNormaliser for EngineNormaliser {
    fn normalise(
        &self,
        entity_id: &str,
        claims: &Map<String, Value>,
    ) -> Result<EntityRows, ClaimError> {
        normalise_entity(entity_id, claims)
    }
}

/// Counters reported by a checkpointed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointReport {
    /// Entities seen, including those of skipped batches.
    pub entities: usize,
    /// Batch files written by this run.
    pub batches_written: usize,
    /// Batches whose files already existed.
    pub batches_skipped: usize,
    /// Rows written by this run.
    pub rows: usize,
    /// Malformed claims dropped.
    pub skipped_claims: usize,
    /// Claims that expanded candidates but matched no language.
    pub anomalies: usize,
    /// Claims whose label sets were empty.
    pub empty_label_sets: usize,
    /// Entities whose claims JSON could not be decoded.
    pub undecodable_entities: usize,
}

/// Errors that halt checkpointed processing of a file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CheckpointError {
    /// The source could not be read.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// A batch or table file could not be read or written.
    #[error(transparent)]
    Columnar(#[from] ColumnarError),
    /// The batch directory could not be prepared or inspected.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Normalisation produced rows for a different entity.
    #[error("entity {entity} failed normalisation: {source}")]
    Normalise {
        /// Entity being normalised.
        entity: String,
        /// Underlying claim error.
        #[source]
        source: ClaimError,
    },
    /// Rows could not be converted to a record batch.
    #[error("failed to build batch {path}: {source}")]
    Arrow {
        /// Batch file being built.
        path: Utf8PathBuf,
        /// Underlying Arrow error.
        #[source]
        source: ArrowError,
    },
    /// A written batch holds a different number of ids than contributed.
    #[error("batch {path} holds {found} distinct ids, expected {expected}")]
    BatchCountMismatch {
        /// Batch file.
        path: Utf8PathBuf,
        /// Entities that contributed rows.
        expected: usize,
        /// Distinct ids read back.
        found: usize,
    },
    /// The source yielded a different number of entities than planned.
    #[error("source yielded {found} entities, expected {expected}")]
    EntityCountMismatch {
        /// Entities planned from the file footer.
        expected: usize,
        /// Entities actually seen.
        found: usize,
    },
    /// A batch file is absent at concatenation time.
    #[error("batch file {path} is missing")]
    MissingBatch {
        /// Expected batch file.
        path: Utf8PathBuf,
    },
    /// A persisted batch no longer fits the claims schema.
    #[error("batch {path} needs review: {source}")]
    SchemaDrift {
        /// Offending batch file.
        path: Utf8PathBuf,
        /// Classification failure.
        #[source]
        source: Box<ConformError>,
    },
    /// Processing stopped because cancellation was requested.
    #[error("cancelled after {batches_written} new batches")]
    Cancelled {
        /// Batches written before stopping.
        batches_written: usize,
    },
}

/// Rows gathered for the batch currently being filled.
#[derive(Debug)]
struct BatchAccumulator {
    index: usize,
    rows: Vec<ClaimRow>,
    entities: usize,
    contributing: usize,
}

impl BatchAccumulator {
    const fn new(index: usize) -> Self {
        Self {
            index,
            rows: Vec::new(),
            entities: 0,
            contributing: 0,
        }
    }

    fn absorb(&mut self, rows: Vec<ClaimRow>) {
        self.entities += 1;
        if !rows.is_empty() {
            self.contributing += 1;
        }
        self.rows.extend(rows);
    }
}

/// State of the batch the current entity falls into.
#[derive(Debug)]
enum Slot {
    Skipping(usize),
    Filling(BatchAccumulator),
}

impl Slot {
    const fn index(&self) -> usize {
        match self {
            Self::Skipping(index) => *index,
            Self::Filling(acc) => acc.index,
        }
    }
}

/// Drives claims normalisation for one source file through batch files.
pub struct BatchCheckpointer<'a> {
    batch_dir: Utf8PathBuf,
    normaliser: &'a dyn ClaimsNormaliser,
    options: CheckpointOptions,
}

impl<'a> BatchCheckpointer<'a> {
    /// Create a driver persisting batches under `batch_dir`.
    #[must_use]
    pub fn new(
        batch_dir: &Utf8Path,
        normaliser: &'a dyn ClaimsNormaliser,
        options: CheckpointOptions,
    ) -> Self {
        Self {
            batch_dir: batch_dir.to_path_buf(),
            normaliser,
            options,
        }
    }

    /// Directory holding the batch files.
    #[must_use]
    pub fn batch_dir(&self) -> &Utf8Path {
        &self.batch_dir
    }

    /// Path of `batch` under the plan.
    #[must_use]
    pub fn batch_path(&self, plan: &BatchPlan, batch: usize) -> Utf8PathBuf {
        self.batch_dir.join(plan.file_name(batch))
    }

    /// Normalise `entities` into batch files, skipping batches already on
    /// disk. `expected` is the entity count the plan is built from.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] on I/O failure, identity violations,
    /// read-back count mismatches, cancellation, or when the source yields a
    /// different number of entities than `expected`.
    pub fn run<I>(
        &self,
        entities: I,
        expected: usize,
    ) -> Result<CheckpointReport, CheckpointError>
    where
        I: IntoIterator<Item = Result<SourceEntity, SourceError>>,
    {
        let plan = BatchPlan::new(expected, self.options.batch_size());
        ensure_dir(&self.batch_dir).map_err(|source| CheckpointError::Io {
            path: self.batch_dir.clone(),
            source,
        })?;

        let mut report = CheckpointReport::default();
        let mut slot: Option<Slot> = None;
        for (position, item) in entities.into_iter().enumerate() {
            let entity = item?;
            if position >= plan.entities() {
                return Err(CheckpointError::EntityCountMismatch {
                    expected,
                    found: position + 1,
                });
            }
            let batch = plan.batch_of(position);
            if slot.as_ref().map(Slot::index) != Some(batch) {
                if let Some(Slot::Filling(done)) = slot.take() {
                    self.write_batch(&plan, done, &mut report)?;
                }
                if self.options.is_cancelled() {
                    return Err(CheckpointError::Cancelled {
                        batches_written: report.batches_written,
                    });
                }
                slot = Some(self.open_slot(&plan, batch, &mut report)?);
            }
            report.entities += 1;
            if let Some(Slot::Filling(acc)) = slot.as_mut() {
                let rows = self.normalise(&entity, &mut report)?;
                acc.absorb(rows);
            }
        }
        if let Some(Slot::Filling(done)) = slot.take() {
            self.write_batch(&plan, done, &mut report)?;
        }
        if report.entities != expected {
            return Err(CheckpointError::EntityCountMismatch {
                expected,
                found: report.entities,
            });
        }
        info!(
            "Checkpointed claims: dir={}, entities={}, written={}, skipped={}, rows={}, skipped_claims={}",
            self.batch_dir,
            report.entities,
            report.batches_written,
            report.batches_skipped,
            report.rows,
            report.skipped_claims
        );
        Ok(report)
    }

    fn open_slot(
        &self,
        plan: &BatchPlan,
        batch: usize,
        report: &mut CheckpointReport,
    ) -> Result<Slot, CheckpointError> {
        let path = self.batch_path(plan, batch);
        let exists = is_file(&path).map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;
        if exists {
            debug!("Skipped existing batch: path={path}");
            report.batches_skipped += 1;
            Ok(Slot::Skipping(batch))
        } else {
            Ok(Slot::Filling(BatchAccumulator::new(batch)))
        }
    }

    fn normalise(
        &self,
        entity: &SourceEntity,
        report: &mut CheckpointReport,
    ) -> Result<Vec<ClaimRow>, CheckpointError> {
        let Some(text) = entity.section(Section::Claims)? else {
            return Ok(Vec::new());
        };
        let mut bytes = text.into_owned().into_bytes();
        let claims = match simd_json::serde::from_slice::<Value>(&mut bytes) {
            Ok(Value::Object(map)) => map,
            Ok(Value::Null) => return Ok(Vec::new()),
            Ok(Value::Array(items)) if items.is_empty() => return Ok(Vec::new()),
            Ok(_) => {
                warn!("Skipped entity claims: entity={} (claims is not an object)", entity.id);
                report.undecodable_entities += 1;
                return Ok(Vec::new());
            }
            Err(err) => {
                warn!("Skipped entity claims: entity={} (invalid JSON: {err})", entity.id);
                report.undecodable_entities += 1;
                return Ok(Vec::new());
            }
        };
        let normalised = self
            .normaliser
            .normalise(&entity.id, &claims)
            .and_then(|found| verify_entity_identity(&entity.id, &found.rows).map(|()| found))
            .map_err(|source| CheckpointError::Normalise {
                entity: entity.id.clone(),
                source,
            })?;
        report.skipped_claims += normalised.skipped.len();
        report.anomalies += normalised.anomalies;
        report.empty_label_sets += normalised.empty_label_sets;
        Ok(normalised.rows)
    }

    fn write_batch(
        &self,
        plan: &BatchPlan,
        acc: BatchAccumulator,
        report: &mut CheckpointReport,
    ) -> Result<(), CheckpointError> {
        let path = self.batch_path(plan, acc.index);
        let batch = rows_to_batch(&acc.rows).map_err(|source| CheckpointError::Arrow {
            path: path.clone(),
            source,
        })?;
        let rows = write_parquet(&path, claims_schema(), &[batch])?;

        let found = distinct_ids(&path)?;
        if found != acc.contributing {
            remove_file_if_exists(&path).map_err(|source| CheckpointError::Io {
                path: path.clone(),
                source,
            })?;
            return Err(CheckpointError::BatchCountMismatch {
                path,
                expected: acc.contributing,
                found,
            });
        }
        debug!(
            "Wrote batch: path={path}, entities={}/{}, rows={rows}",
            acc.entities,
            plan.entities_in(acc.index)
        );
        report.batches_written += 1;
        report.rows += rows;
        Ok(())
    }

    /// Concatenate every batch of `plan`, in index order, into `target`.
    ///
    /// Batches with a narrower or wider schema are conformed to the claims
    /// schema. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::MissingBatch`] when a batch file is absent,
    /// [`CheckpointError::SchemaDrift`] when a batch cannot be conformed, and
    /// [`CheckpointError::Columnar`] on read or write failure.
    pub fn concatenate(
        &self,
        plan: &BatchPlan,
        target: &Utf8Path,
    ) -> Result<usize, CheckpointError> {
        let mut sink = ParquetSink::create(target, claims_schema())?;
        for batch in 0..plan.batches() {
            let path = self.batch_path(plan, batch);
            let exists = is_file(&path).map_err(|source| CheckpointError::Io {
                path: path.clone(),
                source,
            })?;
            if !exists {
                return Err(CheckpointError::MissingBatch { path });
            }
            let (schema, batches) = read_parquet(&path)?;
            classify_schema(&schema).map_err(|drift| CheckpointError::SchemaDrift {
                path: path.clone(),
                source: Box::new(ConformError::Drift(drift)),
            })?;
            for record in &batches {
                let conformed = conform_batch(record).map_err(|source| {
                    CheckpointError::SchemaDrift {
                        path: path.clone(),
                        source: Box::new(source),
                    }
                })?;
                sink.write(&conformed)?;
            }
        }
        let rows = sink.commit()?;
        info!(
            "Wrote claims table: path={target}, batches={}, rows={rows}",
            plan.batches()
        );
        Ok(rows)
    }
}

fn distinct_ids(path: &Utf8Path) -> Result<usize, CheckpointError> {
    let (_, batches) = read_parquet(path)?;
    let mut ids: HashSet<String> = HashSet::new();
    for batch in &batches {
        let Some(column) = batch.column_by_name("id") else {
            continue;
        };
        let Some(strings) = column.as_string_opt::<i32>() else {
            continue;
        };
        for row in 0..strings.len() {
            if strings.is_valid(row) {
                ids.insert(strings.value(row).to_owned());
            }
        }
    }
    Ok(ids.len())
}

#[cfg(test)]
mod tests;
