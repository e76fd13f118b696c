//! Facade crate for the wikiflat claims engine.
//!
//! This crate re-exports the claim normalisation types and, behind the `data`
//! feature, the columnar pipeline that drives them over a dump.

#![forbid(unsafe_code)]

pub use wikiflat_core::{
    ClaimError, ClaimRow, Datatype, EntityRows, FinalColumn, IntermediateRow, Rank, TotalRow,
    normalise_claim, normalise_entity,
};

#[cfg(feature = "data")]
pub use wikiflat_data::{
    ChunkReport, ClaimsNormaliser, EngineNormaliser, LocalMirror, LocalPartitionSink,
    PartitionSink, Pipeline, PipelineConfig, PipelineError, PrefetchOptions, SourceCatalog, Stage,
    StateStore,
};
