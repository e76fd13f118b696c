//! Language-keyed label lists.
//!
//! Dumps encode a label list either as an array of `{key, value}` records or
//! as an object keyed by language code, where each value is plain text or a
//! `{language, value}` record. Both decode to the same [`LabelSet`].

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::ClaimError;

/// One label and the language it is written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    /// Language code, e.g. `en`.
    pub language: String,
    /// Label text.
    pub text: String,
}

/// Ordered labels with at most one entry per language.
///
/// Entry order follows the source; when a language repeats, the first entry
/// wins and later ones are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    /// Decode a label list from JSON.
    ///
    /// `null` decodes to an empty set. Entries whose text is `null` are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::MalformedLabels`] for scalars and for entries
    /// without a string language key.
    pub fn from_json(field: &'static str, value: &Value) -> Result<Self, ClaimError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Array(entries) => Self::from_records(field, entries),
            Value::Object(map) => Self::from_map(field, map),
            other => Err(ClaimError::MalformedLabels {
                field,
                reason: format!("expected a list or object, found {}", kind_of(other)),
            }),
        }
    }

    fn from_records(field: &'static str, entries: &[Value]) -> Result<Self, ClaimError> {
        let mut set = Self::default();
        let mut seen = HashSet::new();
        for entry in entries {
            let record = entry.as_object().ok_or_else(|| ClaimError::MalformedLabels {
                field,
                reason: format!("expected a {{key, value}} record, found {}", kind_of(entry)),
            })?;
            let language = record
                .get("key")
                .and_then(Value::as_str)
                .ok_or_else(|| ClaimError::MalformedLabels {
                    field,
                    reason: "record has no string `key`".to_owned(),
                })?;
            if let Some(text) = label_text(field, record.get("value"))? {
                set.push_first(&mut seen, language, text);
            }
        }
        Ok(set)
    }

    fn from_map(field: &'static str, map: &Map<String, Value>) -> Result<Self, ClaimError> {
        let mut set = Self::default();
        let mut seen = HashSet::new();
        for (language, value) in map {
            if let Some(text) = label_text(field, Some(value))? {
                set.push_first(&mut seen, language, text);
            }
        }
        Ok(set)
    }

    fn push_first(&mut self, seen: &mut HashSet<String>, language: &str, text: String) {
        if seen.insert(language.to_owned()) {
            self.labels.push(Label {
                language: language.to_owned(),
                text,
            });
        }
    }

    /// Build a set from `(language, text)` pairs, keeping the first of any
    /// repeated language.
    pub fn from_pairs<L, T>(pairs: impl IntoIterator<Item = (L, T)>) -> Self
    where
        L: Into<String>,
        T: Into<String>,
    {
        let mut set = Self::default();
        let mut seen = HashSet::new();
        for (language, text) in pairs {
            let lang: String = language.into();
            set.push_first(&mut seen, &lang, text.into());
        }
        set
    }

    /// Labels in source order.
    #[must_use]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Iterate over the labels in source order.
    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.labels.iter()
    }

    /// Number of languages in the set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the set holds no labels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Text of the label in `language`, if present.
    #[must_use]
    pub fn get(&self, language: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|label| label.language == language)
            .map(|label| label.text.as_str())
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.labels.iter()
    }
}

/// Labels embedded in a payload (`wikibase-item` labels, `quantity` unit
/// labels).
///
/// Besides the keyed list, payloads occasionally carry a single bare string
/// or nothing at all; neither can be matched against property labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadLabels {
    /// A non-empty language-keyed list.
    Keyed(LabelSet),
    /// One label with no language attached.
    Bare(String),
    /// Absent, `null` or an empty list.
    Empty,
}

impl PayloadLabels {
    /// Decode payload labels from an optional JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::MalformedLabels`] when the value is neither a
    /// string nor a decodable label list.
    pub fn from_json(field: &'static str, value: Option<&Value>) -> Result<Self, ClaimError> {
        match value {
            None | Some(Value::Null) => Ok(Self::Empty),
            Some(Value::String(text)) => Ok(Self::Bare(text.clone())),
            Some(other) => {
                let set = LabelSet::from_json(field, other)?;
                Ok(if set.is_empty() {
                    Self::Empty
                } else {
                    Self::Keyed(set)
                })
            }
        }
    }
}

fn label_text(field: &'static str, value: Option<&Value>) -> Result<Option<String>, ClaimError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        // Native dump shape: {"language": "en", "value": "..."}
        Some(Value::Object(record)) => label_text(field, record.get("value")),
        Some(other) => Err(ClaimError::MalformedLabels {
            field,
            reason: format!("label text must be a string, found {}", kind_of(other)),
        }),
    }
}

/// Describe the JSON kind of `value` for diagnostics, e.g. "a list".
#[must_use]
pub const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
