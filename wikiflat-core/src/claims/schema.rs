//! Schema unification and coalescing.
//!
//! Every [`IntermediateRow`] widens to the fixed-width [`TotalRow`], with
//! `None` in the columns its datatype does not use. [`ClaimRow`] then folds
//! the mutually exclusive language and value columns into one each:
//!
//! - `language`: first of `wikibase-label-lang`, `unit-label-lang`,
//!   `property-label-lang`.
//! - `datavalue`: first of the string `datavalue`, `wikibase-id`, `amount`,
//!   `time`, `mlt-text`.

use std::collections::BTreeSet;

use super::normalise::{DatatypeValue, IntermediateRow};
use super::payload::{GlobeCoordinate, TimeValue};
use super::{ClaimError, Datatype, Rank};

/// Every column of [`TotalRow`], in order.
pub const TOTAL_COLUMNS: [&str; 29] = [
    "id",
    "rank",
    "property",
    "datatype",
    "property-label-lang",
    "property-label",
    "datavalue",
    "wikibase-id",
    "wikibase-label",
    "wikibase-label-lang",
    "latitude",
    "longitude",
    "altitude",
    "precision",
    "globe",
    "amount",
    "unit",
    "upperBound",
    "lowerBound",
    "unit-label",
    "unit-label-lang",
    "time",
    "timezone",
    "before",
    "after",
    "ts_precision",
    "calendarmodel",
    "mlt-text",
    "mlt-language",
];

/// Physical type of a final column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// UTF-8 text.
    Utf8,
    /// 64-bit float.
    Float64,
    /// 64-bit signed integer.
    Int64,
}

/// Columns of the final claims table, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(missing_docs, reason = "variants mirror the column names returned by `name`")]
pub enum FinalColumn {
    Id,
    Rank,
    Property,
    Datatype,
    Language,
    PropertyLabel,
    Datavalue,
    Latitude,
    Longitude,
    Altitude,
    Precision,
    Globe,
    Unit,
    UpperBound,
    LowerBound,
    UnitLabel,
    Timezone,
    Before,
    After,
    TsPrecision,
    Calendarmodel,
    WikibaseLabel,
    MltLanguage,
}

impl FinalColumn {
    /// All columns in table order.
    pub const ALL: [Self; 23] = [
        Self::Id,
        Self::Rank,
        Self::Property,
        Self::Datatype,
        Self::Language,
        Self::PropertyLabel,
        Self::Datavalue,
        Self::Latitude,
        Self::Longitude,
        Self::Altitude,
        Self::Precision,
        Self::Globe,
        Self::Unit,
        Self::UpperBound,
        Self::LowerBound,
        Self::UnitLabel,
        Self::Timezone,
        Self::Before,
        Self::After,
        Self::TsPrecision,
        Self::Calendarmodel,
        Self::WikibaseLabel,
        Self::MltLanguage,
    ];

    /// Column name as written to disk.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Rank => "rank",
            Self::Property => "property",
            Self::Datatype => "datatype",
            Self::Language => "language",
            Self::PropertyLabel => "property-label",
            Self::Datavalue => "datavalue",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Altitude => "altitude",
            Self::Precision => "precision",
            Self::Globe => "globe",
            Self::Unit => "unit",
            Self::UpperBound => "upperBound",
            Self::LowerBound => "lowerBound",
            Self::UnitLabel => "unit-label",
            Self::Timezone => "timezone",
            Self::Before => "before",
            Self::After => "after",
            Self::TsPrecision => "ts_precision",
            Self::Calendarmodel => "calendarmodel",
            Self::WikibaseLabel => "wikibase-label",
            Self::MltLanguage => "mlt-language",
        }
    }

    /// Physical type of the column.
    #[must_use]
    pub const fn kind(self) -> ColumnKind {
        match self {
            Self::Latitude | Self::Longitude | Self::Altitude | Self::Precision => {
                ColumnKind::Float64
            }
            Self::Timezone | Self::Before | Self::After | Self::TsPrecision => ColumnKind::Int64,
            _ => ColumnKind::Utf8,
        }
    }

    /// Whether the column is always populated.
    #[must_use]
    pub const fn is_required(self) -> bool {
        matches!(
            self,
            Self::Id | Self::Rank | Self::Property | Self::Datatype
        )
    }
}

/// Borrowed value of one cell of a [`ClaimRow`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    /// Text cell.
    Utf8(Option<&'a str>),
    /// Float cell.
    Float64(Option<f64>),
    /// Integer cell.
    Int64(Option<i64>),
}

/// An intermediate row widened to every column any datatype can produce.
#[derive(Debug, Clone, PartialEq)]
#[expect(missing_docs, reason = "fields mirror `TOTAL_COLUMNS`")]
pub struct TotalRow {
    pub id: String,
    pub rank: Rank,
    pub property: String,
    pub datatype: Datatype,
    pub property_label_lang: Option<String>,
    pub property_label: Option<String>,
    pub datavalue: Option<String>,
    pub wikibase_id: Option<String>,
    pub wikibase_label: Option<String>,
    pub wikibase_label_lang: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub precision: Option<f64>,
    pub globe: Option<String>,
    pub amount: Option<String>,
    pub unit: Option<String>,
    pub upper_bound: Option<String>,
    pub lower_bound: Option<String>,
    pub unit_label: Option<String>,
    pub unit_label_lang: Option<String>,
    pub time: Option<String>,
    pub timezone: Option<i64>,
    pub before: Option<i64>,
    pub after: Option<i64>,
    pub ts_precision: Option<i64>,
    pub calendarmodel: Option<String>,
    pub mlt_text: Option<String>,
    pub mlt_language: Option<String>,
}

impl TotalRow {
    const fn with_common(
        id: String,
        rank: Rank,
        property: String,
        datatype: Datatype,
        property_label_lang: Option<String>,
        property_label: Option<String>,
    ) -> Self {
        Self {
            id,
            rank,
            property,
            datatype,
            property_label_lang,
            property_label,
            datavalue: None,
            wikibase_id: None,
            wikibase_label: None,
            wikibase_label_lang: None,
            latitude: None,
            longitude: None,
            altitude: None,
            precision: None,
            globe: None,
            amount: None,
            unit: None,
            upper_bound: None,
            lower_bound: None,
            unit_label: None,
            unit_label_lang: None,
            time: None,
            timezone: None,
            before: None,
            after: None,
            ts_precision: None,
            calendarmodel: None,
            mlt_text: None,
            mlt_language: None,
        }
    }
}

impl From<IntermediateRow> for TotalRow {
    fn from(row: IntermediateRow) -> Self {
        let IntermediateRow { common, value } = row;
        let mut total = Self::with_common(
            common.id,
            common.rank,
            common.property,
            common.datatype,
            common.property_label_lang,
            common.property_label,
        );
        match value {
            DatatypeValue::Scalar { datavalue } => total.datavalue = Some(datavalue),
            DatatypeValue::Wikibase {
                id,
                label,
                label_lang,
            } => {
                total.wikibase_id = Some(id);
                total.wikibase_label = label;
                total.wikibase_label_lang = label_lang;
            }
            DatatypeValue::Globe(GlobeCoordinate {
                latitude,
                longitude,
                altitude,
                precision,
                globe,
            }) => {
                total.latitude = latitude;
                total.longitude = longitude;
                total.altitude = altitude;
                total.precision = precision;
                total.globe = globe;
            }
            DatatypeValue::Quantity {
                amount,
                unit,
                upper_bound,
                lower_bound,
                unit_label,
                unit_label_lang,
            } => {
                total.amount = amount;
                total.unit = unit;
                total.upper_bound = upper_bound;
                total.lower_bound = lower_bound;
                total.unit_label = unit_label;
                total.unit_label_lang = unit_label_lang;
            }
            DatatypeValue::Time(TimeValue {
                time,
                timezone,
                before,
                after,
                ts_precision,
                calendarmodel,
            }) => {
                total.time = time;
                total.timezone = timezone;
                total.before = before;
                total.after = after;
                total.ts_precision = ts_precision;
                total.calendarmodel = calendarmodel;
            }
            DatatypeValue::MonolingualText { text, language } => {
                total.mlt_text = text;
                total.mlt_language = language;
            }
        }
        total
    }
}

/// One row of the final claims table.
#[derive(Debug, Clone, PartialEq)]
#[expect(missing_docs, reason = "fields mirror `FinalColumn`")]
pub struct ClaimRow {
    pub id: String,
    pub rank: Rank,
    pub property: String,
    pub datatype: Datatype,
    pub language: Option<String>,
    pub property_label: Option<String>,
    pub datavalue: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub precision: Option<f64>,
    pub globe: Option<String>,
    pub unit: Option<String>,
    pub upper_bound: Option<String>,
    pub lower_bound: Option<String>,
    pub unit_label: Option<String>,
    pub timezone: Option<i64>,
    pub before: Option<i64>,
    pub after: Option<i64>,
    pub ts_precision: Option<i64>,
    pub calendarmodel: Option<String>,
    pub wikibase_label: Option<String>,
    pub mlt_language: Option<String>,
}

impl From<TotalRow> for ClaimRow {
    fn from(row: TotalRow) -> Self {
        let language = row
            .wikibase_label_lang
            .or(row.unit_label_lang)
            .or(row.property_label_lang);
        let datavalue = row
            .datavalue
            .or(row.wikibase_id)
            .or(row.amount)
            .or(row.time)
            .or(row.mlt_text);
        Self {
            id: row.id,
            rank: row.rank,
            property: row.property,
            datatype: row.datatype,
            language,
            property_label: row.property_label,
            datavalue,
            latitude: row.latitude,
            longitude: row.longitude,
            altitude: row.altitude,
            precision: row.precision,
            globe: row.globe,
            unit: row.unit,
            upper_bound: row.upper_bound,
            lower_bound: row.lower_bound,
            unit_label: row.unit_label,
            timezone: row.timezone,
            before: row.before,
            after: row.after,
            ts_precision: row.ts_precision,
            calendarmodel: row.calendarmodel,
            wikibase_label: row.wikibase_label,
            mlt_language: row.mlt_language,
        }
    }
}

impl ClaimRow {
    /// Value of `column` in this row.
    #[must_use]
    pub fn cell(&self, column: FinalColumn) -> Cell<'_> {
        match column {
            FinalColumn::Id => Cell::Utf8(Some(&self.id)),
            FinalColumn::Rank => Cell::Utf8(Some(self.rank.as_str())),
            FinalColumn::Property => Cell::Utf8(Some(&self.property)),
            FinalColumn::Datatype => Cell::Utf8(Some(self.datatype.as_str())),
            FinalColumn::Language => Cell::Utf8(self.language.as_deref()),
            FinalColumn::PropertyLabel => Cell::Utf8(self.property_label.as_deref()),
            FinalColumn::Datavalue => Cell::Utf8(self.datavalue.as_deref()),
            FinalColumn::Latitude => Cell::Float64(self.latitude),
            FinalColumn::Longitude => Cell::Float64(self.longitude),
            FinalColumn::Altitude => Cell::Float64(self.altitude),
            FinalColumn::Precision => Cell::Float64(self.precision),
            FinalColumn::Globe => Cell::Utf8(self.globe.as_deref()),
            FinalColumn::Unit => Cell::Utf8(self.unit.as_deref()),
            FinalColumn::UpperBound => Cell::Utf8(self.upper_bound.as_deref()),
            FinalColumn::LowerBound => Cell::Utf8(self.lower_bound.as_deref()),
            FinalColumn::UnitLabel => Cell::Utf8(self.unit_label.as_deref()),
            FinalColumn::Timezone => Cell::Int64(self.timezone),
            FinalColumn::Before => Cell::Int64(self.before),
            FinalColumn::After => Cell::Int64(self.after),
            FinalColumn::TsPrecision => Cell::Int64(self.ts_precision),
            FinalColumn::Calendarmodel => Cell::Utf8(self.calendarmodel.as_deref()),
            FinalColumn::WikibaseLabel => Cell::Utf8(self.wikibase_label.as_deref()),
            FinalColumn::MltLanguage => Cell::Utf8(self.mlt_language.as_deref()),
        }
    }
}

/// Check that every row belongs to `entity_id`.
///
/// # Errors
///
/// Returns [`ClaimError::IdentityViolation`] listing the distinct ids found
/// when any row carries a different id.
pub fn verify_entity_identity(entity_id: &str, rows: &[ClaimRow]) -> Result<(), ClaimError> {
    if rows.iter().all(|row| row.id == entity_id) {
        return Ok(());
    }
    let found: BTreeSet<&str> = rows.iter().map(|row| row.id.as_str()).collect();
    Err(ClaimError::IdentityViolation {
        expected: entity_id.to_owned(),
        found: found.into_iter().map(str::to_owned).collect(),
    })
}
