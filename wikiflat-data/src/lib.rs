//! Columnar I/O and the resumable processing pipeline for wikiflat.
//!
//! Responsibilities:
//! - Read source Parquet files into [`source::SourceEntity`] records.
//! - Flatten labels, descriptions, aliases and sitelinks into long tables.
//! - Checkpoint claims normalisation in fixed-size batch files and assemble
//!   the claims table.
//! - Track per-file progress on disk and pick the next chunk to run.
//! - Partition finished tables by language or site, and prefetch upcoming
//!   chunks in the background.
//!
//! Boundaries:
//! - Claim semantics live in `wikiflat-core`; this crate only moves rows.
//! - Remote catalogs and publication targets are reached through the
//!   [`prefetch::SourceCatalog`] and [`partition::PartitionSink`] traits.
//!
//! Invariants:
//! - Every file that marks progress is staged and renamed into place.
//! - No global mutable state.

pub mod checkpoint;
pub mod claims_table;
pub mod columnar;
pub mod partition;
pub mod pipeline;
pub mod prefetch;
pub mod source;
pub mod state;
pub mod tables;
pub mod unpivot;

#[cfg(test)]
pub(crate) mod test_support;

pub use checkpoint::{
    BatchCheckpointer, BatchPlan, CheckpointError, CheckpointOptions, CheckpointReport,
    ClaimsNormaliser, EngineNormaliser,
};
pub use claims_table::{SchemaDrift, SchemaFit, claims_schema, classify_schema};
pub use partition::{LocalPartitionSink, PartitionError, PartitionReport, PartitionSink};
pub use pipeline::{ChunkReport, FileReport, OutputTable, Pipeline, PipelineConfig, PipelineError};
pub use prefetch::{
    LocalMirror, PrefetchEvent, PrefetchHandle, PrefetchOptions, RemoteFile, SourceCatalog,
    spawn_prefetch,
};
pub use source::{NestedCell, Section, SectionText, SourceEntity, SourceReader};
pub use state::{FileState, Stage, StateError, StateStore};
pub use tables::{SimpleTable, TablesReport, write_simple_tables};
pub use unpivot::unpivot_struct;
