//! Datatype dispatch from decoded claims to intermediate rows.

use log::{debug, warn};
use serde_json::Value;

use super::matcher::match_languages;
use super::payload::{DecodedClaim, GlobeCoordinate, Payload, Quantity, TimeValue, decode_claim};
use super::schema::{ClaimRow, TotalRow, verify_entity_identity};
use super::{ClaimError, Datatype, LabelSet, PayloadLabels, Rank};

/// Columns shared by every datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonFields {
    /// Entity the claim belongs to.
    pub id: String,
    /// Statement rank.
    pub rank: Rank,
    /// Property code.
    pub property: String,
    /// Datatype tag.
    pub datatype: Datatype,
    /// Language of the paired property label.
    pub property_label_lang: Option<String>,
    /// Property label in that language.
    pub property_label: Option<String>,
}

/// Datatype-specific columns of an intermediate row.
#[derive(Debug, Clone, PartialEq)]
pub enum DatatypeValue {
    /// Bare-string payload.
    Scalar {
        /// The payload itself.
        datavalue: String,
    },
    /// Entity reference with the label matched to the row's language.
    Wikibase {
        /// Referenced entity id.
        id: String,
        /// Label of the referenced entity.
        label: Option<String>,
        /// Language of `label`; `None` for a universal label.
        label_lang: Option<String>,
    },
    /// Coordinates.
    Globe(GlobeCoordinate),
    /// Quantity with the unit label matched to the row's language.
    Quantity {
        /// Amount.
        amount: Option<String>,
        /// Unit entity URI.
        unit: Option<String>,
        /// Upper bound.
        upper_bound: Option<String>,
        /// Lower bound.
        lower_bound: Option<String>,
        /// Unit label.
        unit_label: Option<String>,
        /// Language of `unit_label`.
        unit_label_lang: Option<String>,
    },
    /// Point in time.
    Time(TimeValue),
    /// Text in a single language.
    MonolingualText {
        /// Text content.
        text: Option<String>,
        /// Language of the text.
        language: Option<String>,
    },
}

/// One claim row in its datatype's own shape, before schema unification.
#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateRow {
    /// Shared columns.
    pub common: CommonFields,
    /// Datatype-specific columns.
    pub value: DatatypeValue,
}

/// Rows produced for one claim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimOutcome {
    /// Rows in property-label order.
    pub rows: Vec<IntermediateRow>,
    /// Candidate rows produced before language filtering.
    pub expanded: usize,
}

impl ClaimOutcome {
    /// No rows because the claim carried no labels to expand.
    #[must_use]
    pub const fn is_empty_label_set(&self) -> bool {
        self.rows.is_empty() && self.expanded == 0
    }

    /// No rows even though candidates were expanded: the label sets share no
    /// language.
    #[must_use]
    pub const fn is_anomalous(&self) -> bool {
        self.rows.is_empty() && self.expanded > 0
    }
}

/// Normalise one raw claim belonging to `entity_id`.
///
/// # Errors
///
/// Returns the [`ClaimError`] raised while decoding the claim. Callers
/// normally log and skip the claim.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use wikiflat_core::normalise_claim;
///
/// # fn main() -> Result<(), wikiflat_core::ClaimError> {
/// let claim = json!({
///     "rank": "normal",
///     "mainsnak": {
///         "property": "P31",
///         "datatype": "wikibase-item",
///         "property-labels": {"en": "instance of", "fr": "nature de"},
///         "datavalue": {"id": "Q5", "labels": {"en": "human", "de": "Mensch"}}
///     }
/// });
/// let outcome = normalise_claim("Q42", &claim)?;
/// assert_eq!(outcome.rows.len(), 1);
/// # Ok(())
/// # }
/// ```
pub fn normalise_claim(entity_id: &str, claim: &Value) -> Result<ClaimOutcome, ClaimError> {
    let decoded = decode_claim(claim)?;
    Ok(dispatch(entity_id, decoded))
}

fn dispatch(entity_id: &str, claim: DecodedClaim) -> ClaimOutcome {
    let DecodedClaim {
        property,
        rank,
        datatype,
        property_labels,
        payload,
    } = claim;
    let base = CommonFields {
        id: entity_id.to_owned(),
        rank,
        property,
        datatype,
        property_label_lang: None,
        property_label: None,
    };
    match payload {
        Payload::Scalar(datavalue) => {
            per_property_label(&base, &property_labels, &DatatypeValue::Scalar { datavalue })
        }
        Payload::Wikibase { id, labels } => wikibase_rows(&base, &property_labels, id, labels),
        Payload::Globe(coordinate) => {
            per_property_label(&base, &property_labels, &DatatypeValue::Globe(coordinate))
        }
        Payload::Quantity(quantity) => quantity_rows(&base, &property_labels, quantity),
        Payload::Time(time) => {
            per_property_label(&base, &property_labels, &DatatypeValue::Time(time))
        }
        Payload::MonolingualText { text, language } => {
            monolingual_row(base, &property_labels, text, language)
        }
    }
}

fn with_property_label(base: &CommonFields, language: &str, label: &str) -> CommonFields {
    CommonFields {
        property_label_lang: Some(language.to_owned()),
        property_label: Some(label.to_owned()),
        ..base.clone()
    }
}

/// One row per property-label language; nothing on the payload side to match.
fn per_property_label(
    base: &CommonFields,
    property_labels: &LabelSet,
    value: &DatatypeValue,
) -> ClaimOutcome {
    let rows = property_labels
        .iter()
        .map(|label| IntermediateRow {
            common: with_property_label(base, &label.language, &label.text),
            value: value.clone(),
        })
        .collect();
    ClaimOutcome {
        rows,
        expanded: property_labels.len(),
    }
}

fn wikibase_rows(
    base: &CommonFields,
    property_labels: &LabelSet,
    id: String,
    labels: PayloadLabels,
) -> ClaimOutcome {
    match labels {
        PayloadLabels::Keyed(payload_labels) => {
            let outcome = match_languages(property_labels, &payload_labels);
            let rows = outcome
                .matches
                .iter()
                .map(|pair| IntermediateRow {
                    common: with_property_label(base, pair.language, pair.property_label),
                    value: DatatypeValue::Wikibase {
                        id: id.clone(),
                        label: Some(pair.payload_label.to_owned()),
                        label_lang: Some(pair.language.to_owned()),
                    },
                })
                .collect();
            ClaimOutcome {
                rows,
                expanded: outcome.expanded,
            }
        }
        // Universal label: nothing to pair, so the language stays unknown.
        PayloadLabels::Bare(text) => universal_wikibase_row(base, id, Some(text)),
        PayloadLabels::Empty => universal_wikibase_row(base, id, None),
    }
}

fn universal_wikibase_row(base: &CommonFields, id: String, label: Option<String>) -> ClaimOutcome {
    ClaimOutcome {
        rows: vec![IntermediateRow {
            common: base.clone(),
            value: DatatypeValue::Wikibase {
                id,
                label,
                label_lang: None,
            },
        }],
        expanded: 1,
    }
}

fn quantity_rows(
    base: &CommonFields,
    property_labels: &LabelSet,
    quantity: Quantity,
) -> ClaimOutcome {
    let Quantity {
        amount,
        unit,
        upper_bound,
        lower_bound,
        unit_labels,
    } = quantity;
    let value = |unit_label: Option<String>, unit_label_lang: Option<String>| {
        DatatypeValue::Quantity {
            amount: amount.clone(),
            unit: unit.clone(),
            upper_bound: upper_bound.clone(),
            lower_bound: lower_bound.clone(),
            unit_label,
            unit_label_lang,
        }
    };
    match unit_labels {
        PayloadLabels::Keyed(labels) => {
            let outcome = match_languages(property_labels, &labels);
            let rows = outcome
                .matches
                .iter()
                .map(|pair| IntermediateRow {
                    common: with_property_label(base, pair.language, pair.property_label),
                    value: value(
                        Some(pair.payload_label.to_owned()),
                        Some(pair.language.to_owned()),
                    ),
                })
                .collect();
            ClaimOutcome {
                rows,
                expanded: outcome.expanded,
            }
        }
        // Dimensionless, or a unit label with no language to pair.
        PayloadLabels::Bare(text) => {
            per_property_label(base, property_labels, &value(Some(text), None))
        }
        PayloadLabels::Empty => per_property_label(base, property_labels, &value(None, None)),
    }
}

fn monolingual_row(
    base: CommonFields,
    property_labels: &LabelSet,
    text: Option<String>,
    language: Option<String>,
) -> ClaimOutcome {
    let property_label = language
        .as_deref()
        .and_then(|lang| property_labels.get(lang))
        .map(str::to_owned);
    ClaimOutcome {
        rows: vec![IntermediateRow {
            common: CommonFields {
                property_label_lang: language.clone(),
                property_label,
                ..base
            },
            value: DatatypeValue::MonolingualText { text, language },
        }],
        expanded: 1,
    }
}

/// A claim dropped while normalising an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedClaim {
    /// Property key the claim was listed under.
    pub property: String,
    /// Position within that property's claim list.
    pub position: usize,
    /// Why the claim was rejected.
    pub error: ClaimError,
}

/// Coalesced rows for one entity together with per-claim bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityRows {
    /// Final rows, in claim order.
    pub rows: Vec<ClaimRow>,
    /// Claims rejected as malformed.
    pub skipped: Vec<SkippedClaim>,
    /// Claims that produced no rows because they had no labels to expand.
    pub empty_label_sets: usize,
    /// Claims that produced no rows although candidates were expanded.
    pub anomalies: usize,
}

/// Normalise and coalesce every claim of one entity.
///
/// `claims` yields `(property key, claim list)` pairs, as found in the
/// entity's `claims` object. A malformed claim is logged and recorded in
/// [`EntityRows::skipped`]; the remaining claims are still processed.
///
/// # Errors
///
/// Returns [`ClaimError::IdentityViolation`] when coalesced rows carry an id
/// other than `entity_id`.
pub fn normalise_entity<'a>(
    entity_id: &str,
    claims: impl IntoIterator<Item = (&'a String, &'a Value)>,
) -> Result<EntityRows, ClaimError> {
    let mut out = EntityRows::default();
    for (property, list) in claims {
        let Some(entries) = list.as_array() else {
            warn!(
                "Skipped claims: entity={entity_id}, property={property} (claim list is not an array)"
            );
            out.skipped.push(SkippedClaim {
                property: property.clone(),
                position: 0,
                error: ClaimError::Decode {
                    message: "claim list is not an array".to_owned(),
                },
            });
            continue;
        };
        for (position, claim) in entries.iter().enumerate() {
            match normalise_claim(entity_id, claim) {
                Ok(outcome) => collect_outcome(entity_id, property, outcome, &mut out)?,
                Err(error) => {
                    warn!(
                        "Skipped malformed claim: entity={entity_id}, property={property}, position={position} ({error}); claim={claim}"
                    );
                    out.skipped.push(SkippedClaim {
                        property: property.clone(),
                        position,
                        error,
                    });
                }
            }
        }
    }
    Ok(out)
}

fn collect_outcome(
    entity_id: &str,
    property: &str,
    outcome: ClaimOutcome,
    out: &mut EntityRows,
) -> Result<(), ClaimError> {
    if outcome.is_empty_label_set() {
        debug!("Claim yielded no rows: entity={entity_id}, property={property} (empty label set)");
        out.empty_label_sets += 1;
        return Ok(());
    }
    if outcome.is_anomalous() {
        warn!(
            "Claim yielded no rows: entity={entity_id}, property={property} ({} candidates, no shared language)",
            outcome.expanded
        );
        out.anomalies += 1;
        return Ok(());
    }
    let rows: Vec<ClaimRow> = outcome
        .rows
        .into_iter()
        .map(TotalRow::from)
        .map(ClaimRow::from)
        .collect();
    verify_entity_identity(entity_id, &rows)?;
    out.rows.extend(rows);
    Ok(())
}
