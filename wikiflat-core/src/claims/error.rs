//! Errors raised while normalising claims.

use thiserror::Error;

use super::Datatype;

/// Errors produced while decoding or normalising a claim.
///
/// Everything except [`ClaimError::IdentityViolation`] is scoped to a single
/// claim: the entity loop logs the claim and carries on. An identity
/// violation means rows were attributed to the wrong entity and halts the
/// source file.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ClaimError {
    /// The claim JSON did not deserialise into a statement.
    #[error("claim is not a statement object: {message}")]
    Decode {
        /// Deserialiser message.
        message: String,
    },
    /// The statement has no `mainsnak`.
    #[error("claim has no mainsnak")]
    MissingMainsnak,
    /// The mainsnak has no `datavalue` (e.g. `novalue`/`somevalue` snaks).
    #[error("claim for {property} has no datavalue")]
    MissingDatavalue {
        /// Property code of the claim.
        property: String,
    },
    /// A mandatory string field was absent.
    #[error("claim is missing required field `{field}`")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },
    /// The datatype tag is outside the closed set.
    #[error("unknown datatype tag `{datatype}`")]
    UnknownDatatype {
        /// Tag as found in the claim.
        datatype: String,
    },
    /// The rank is not preferred, normal or deprecated.
    #[error("unknown rank `{rank}`")]
    UnknownRank {
        /// Rank as found in the claim.
        rank: String,
    },
    /// The `datavalue` does not have the shape its datatype requires.
    #[error("malformed {datatype} datavalue: {reason}")]
    MalformedPayload {
        /// Datatype whose decoder rejected the payload.
        datatype: Datatype,
        /// What was wrong.
        reason: String,
    },
    /// A language-keyed label list could not be read.
    #[error("malformed `{field}` label list: {reason}")]
    MalformedLabels {
        /// Field holding the label list.
        field: &'static str,
        /// What was wrong.
        reason: String,
    },
    /// Rows for one entity carried a different entity id.
    #[error("rows for entity {expected} referenced {found:?}")]
    IdentityViolation {
        /// Entity the claim belongs to.
        expected: String,
        /// Distinct ids found in the coalesced rows.
        found: Vec<String>,
    },
}

impl ClaimError {
    /// Whether the error must halt processing of the whole source file.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::IdentityViolation { .. })
    }
}
