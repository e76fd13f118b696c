//! Core domain logic for the wikiflat engine.
//!
//! The crate turns one entity's raw claims into flat, language-resolved rows.
//! It owns no I/O: callers hand in decoded JSON and receive [`ClaimRow`]
//! values, leaving persistence to `wikiflat-data`.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use wikiflat_core::normalise_entity;
//!
//! # fn main() -> Result<(), wikiflat_core::ClaimError> {
//! let claims = json!({
//!     "P1476": [{
//!         "rank": "normal",
//!         "mainsnak": {
//!             "property": "P1476",
//!             "datatype": "monolingualtext",
//!             "property-labels": [{"key": "en", "value": "title"}],
//!             "datavalue": {"text": "Hamlet", "language": "en"}
//!         }
//!     }]
//! });
//! let rows = normalise_entity("Q41567", claims.as_object().into_iter().flatten())?;
//! assert_eq!(rows.rows.len(), 1);
//! assert_eq!(rows.rows[0].language.as_deref(), Some("en"));
//! # Ok(())
//! # }
//! ```

pub mod claims;

pub use claims::{
    Cell, ClaimError, ClaimOutcome, ClaimRow, ColumnKind, Datatype, EntityRows, FinalColumn,
    IntermediateRow, Label, LabelSet, PayloadLabels, Rank, SkippedClaim, TotalRow, kind_of,
    match_languages, normalise_claim, normalise_entity, verify_entity_identity,
};
