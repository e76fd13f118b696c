//! Pairs property-label languages with payload-label languages.
//!
//! Only the property-label list is expanded. Candidates are kept when their
//! language is a member of the payload's language set and the payload text is
//! fetched with one hash lookup, so a claim with `P` property labels and `L`
//! payload labels costs `O(P + L)` rather than materialising `P × L` pairs.

use std::collections::HashMap;

use super::LabelSet;

/// Hash index over a payload's labels, keyed by language.
#[derive(Debug, Default)]
pub struct LabelIndex<'a> {
    by_language: HashMap<&'a str, &'a str>,
}

impl<'a> LabelIndex<'a> {
    /// Index `labels`, keeping the first text for each language.
    #[must_use]
    pub fn new(labels: &'a LabelSet) -> Self {
        let mut by_language = HashMap::with_capacity(labels.len());
        for label in labels {
            by_language
                .entry(label.language.as_str())
                .or_insert(label.text.as_str());
        }
        Self { by_language }
    }

    /// Whether the payload has a label in `language`.
    #[must_use]
    pub fn contains(&self, language: &str) -> bool {
        self.by_language.contains_key(language)
    }

    /// Payload text in `language`.
    #[must_use]
    pub fn get(&self, language: &str) -> Option<&'a str> {
        self.by_language.get(language).copied()
    }

    /// Number of distinct payload languages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_language.len()
    }

    /// Whether the payload has no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_language.is_empty()
    }
}

/// One language present on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageMatch<'a> {
    /// Shared language code.
    pub language: &'a str,
    /// Property label in that language.
    pub property_label: &'a str,
    /// Payload label in that language.
    pub payload_label: &'a str,
}

/// Matches for one claim plus the size of the candidate expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome<'a> {
    /// Matches in property-label order.
    pub matches: Vec<LanguageMatch<'a>>,
    /// Property-label candidates considered before the membership filter.
    ///
    /// Zero means the claim had no property labels; a positive value with no
    /// matches means the two label sets share no language.
    pub expanded: usize,
}

/// Pair every property label with the payload label of the same language.
///
/// # Examples
///
/// ```
/// use wikiflat_core::{LabelSet, match_languages};
///
/// let property = LabelSet::from_pairs([("en", "instance of"), ("fr", "nature de"), ("de", "ist ein")]);
/// let payload = LabelSet::from_pairs([("fr", "ville"), ("es", "ciudad")]);
/// let outcome = match_languages(&property, &payload);
/// assert_eq!(outcome.expanded, 3);
/// assert_eq!(outcome.matches.len(), 1);
/// assert_eq!(outcome.matches[0].payload_label, "ville");
/// ```
#[must_use]
pub fn match_languages<'a>(
    property_labels: &'a LabelSet,
    payload_labels: &'a LabelSet,
) -> MatchOutcome<'a> {
    let index = LabelIndex::new(payload_labels);
    let matches = property_labels
        .iter()
        .filter(|candidate| index.contains(&candidate.language))
        .filter_map(|candidate| {
            index.get(&candidate.language).map(|payload_label| LanguageMatch {
                language: candidate.language.as_str(),
                property_label: candidate.text.as_str(),
                payload_label,
            })
        })
        .collect();
    MatchOutcome {
        matches,
        expanded: property_labels.len(),
    }
}
