//! Claims normalisation.
//!
//! A claim's `mainsnak` carries a datatype tag, a language-keyed list of
//! property labels and a datatype-dependent `datavalue`. Normalisation turns
//! each claim into zero or more rows, one per resolved language:
//!
//! 1. [`payload`] decodes the claim into a typed [`payload::Payload`].
//! 2. [`normalise`] dispatches on the datatype, pairing languages through the
//!    [`matcher`] where the payload carries its own labels.
//! 3. [`schema`] widens each [`IntermediateRow`] to the [`TotalRow`] and
//!    coalesces it into the final [`ClaimRow`].

mod datatype;
mod error;
mod label;
pub mod matcher;
pub mod normalise;
pub mod payload;
pub mod schema;

pub use datatype::{Datatype, Rank};
pub use error::ClaimError;
pub use label::{Label, LabelSet, PayloadLabels, kind_of};
pub use matcher::{LabelIndex, LanguageMatch, MatchOutcome, match_languages};
pub use normalise::{
    ClaimOutcome, CommonFields, DatatypeValue, EntityRows, IntermediateRow, SkippedClaim,
    normalise_claim, normalise_entity,
};
pub use schema::{
    Cell, ClaimRow, ColumnKind, FinalColumn, TOTAL_COLUMNS, TotalRow, verify_entity_identity,
};
