//! Typed decoding of one raw claim.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::label::kind_of;
use super::{ClaimError, Datatype, LabelSet, PayloadLabels, Rank};

#[derive(Debug, Deserialize)]
struct RawStatement {
    #[serde(default)]
    mainsnak: Option<RawMainsnak>,
    #[serde(default)]
    rank: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMainsnak {
    #[serde(default)]
    property: Option<String>,
    #[serde(default)]
    datatype: Option<String>,
    #[serde(rename = "property-labels", default)]
    property_labels: Value,
    #[serde(default)]
    datavalue: Value,
}

/// A claim whose mainsnak has been validated and decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedClaim {
    /// Property code, e.g. `P31`.
    pub property: String,
    /// Statement rank.
    pub rank: Rank,
    /// Datatype tag.
    pub datatype: Datatype,
    /// Property labels, one per language.
    pub property_labels: LabelSet,
    /// Datatype-specific payload.
    pub payload: Payload,
}

/// Decoded `datavalue`, one variant per datatype family.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Bare-string datatypes.
    Scalar(String),
    /// `wikibase-item` and `wikibase-property`.
    Wikibase {
        /// Referenced entity id.
        id: String,
        /// Labels of the referenced entity.
        labels: PayloadLabels,
    },
    /// `globe-coordinate`.
    Globe(GlobeCoordinate),
    /// `quantity`.
    Quantity(Quantity),
    /// `time`.
    Time(TimeValue),
    /// `monolingualtext`.
    MonolingualText {
        /// Text content.
        text: Option<String>,
        /// Language the text is written in.
        language: Option<String>,
    },
}

/// `globe-coordinate` payload with every number widened to `f64`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobeCoordinate {
    /// Latitude in degrees.
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    pub longitude: Option<f64>,
    /// Altitude, rarely present.
    pub altitude: Option<f64>,
    /// Coordinate precision in degrees.
    pub precision: Option<f64>,
    /// Globe entity URI.
    pub globe: Option<String>,
}

/// `quantity` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    /// Signed decimal amount as written in the dump.
    pub amount: Option<String>,
    /// Unit entity URI, `"1"` when dimensionless.
    pub unit: Option<String>,
    /// Upper bound of the amount.
    pub upper_bound: Option<String>,
    /// Lower bound of the amount.
    pub lower_bound: Option<String>,
    /// Labels of the unit entity.
    pub unit_labels: PayloadLabels,
}

/// `time` payload. The dump's `precision` field is exposed as
/// `ts_precision` so it never collides with the coordinate precision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeValue {
    /// ISO-8601-like timestamp.
    pub time: Option<String>,
    /// Offset from UTC in minutes.
    pub timezone: Option<i64>,
    /// Uncertainty before the timestamp.
    pub before: Option<i64>,
    /// Uncertainty after the timestamp.
    pub after: Option<i64>,
    /// Timestamp precision code.
    pub ts_precision: Option<i64>,
    /// Calendar model entity URI.
    pub calendarmodel: Option<String>,
}

/// Decode one statement from its JSON form.
///
/// # Errors
///
/// Returns a [`ClaimError`] describing the first structural problem found:
/// a missing `mainsnak` or `datavalue`, an unknown tag or rank, or a payload
/// that does not fit its datatype.
pub fn decode_claim(claim: &Value) -> Result<DecodedClaim, ClaimError> {
    let raw = RawStatement::deserialize(claim).map_err(|err| ClaimError::Decode {
        message: err.to_string(),
    })?;
    let mainsnak = raw.mainsnak.ok_or(ClaimError::MissingMainsnak)?;
    let property = mainsnak
        .property
        .ok_or(ClaimError::MissingField { field: "property" })?;
    if mainsnak.datavalue.is_null() {
        return Err(ClaimError::MissingDatavalue { property });
    }
    let rank = raw
        .rank
        .ok_or(ClaimError::MissingField { field: "rank" })?
        .parse::<Rank>()?;
    let datatype = mainsnak
        .datatype
        .ok_or(ClaimError::MissingField { field: "datatype" })?
        .parse::<Datatype>()?;
    let property_labels = LabelSet::from_json("property-labels", &mainsnak.property_labels)?;
    let payload = decode_payload(datatype, &mainsnak.datavalue)?;
    Ok(DecodedClaim {
        property,
        rank,
        datatype,
        property_labels,
        payload,
    })
}

fn decode_payload(datatype: Datatype, datavalue: &Value) -> Result<Payload, ClaimError> {
    match datatype {
        Datatype::CommonsMedia
        | Datatype::GeoShape
        | Datatype::TabularData
        | Datatype::Url
        | Datatype::ExternalId
        | Datatype::String
        | Datatype::MusicalNotation
        | Datatype::Math
        | Datatype::EntitySchema
        | Datatype::WikibaseLexeme
        | Datatype::WikibaseForm
        | Datatype::WikibaseSense => scalar_text(datatype, datavalue).map(Payload::Scalar),
        Datatype::WikibaseItem | Datatype::WikibaseProperty => {
            decode_wikibase(&Fields::new(datatype, datavalue)?)
        }
        Datatype::GlobeCoordinate => decode_globe(&Fields::new(datatype, datavalue)?),
        Datatype::Quantity => decode_quantity(&Fields::new(datatype, datavalue)?),
        Datatype::Time => decode_time(&Fields::new(datatype, datavalue)?),
        Datatype::MonolingualText => {
            let fields = Fields::new(datatype, datavalue)?;
            Ok(Payload::MonolingualText {
                text: fields.text("text")?,
                language: fields.text("language")?,
            })
        }
    }
}

fn decode_wikibase(fields: &Fields<'_>) -> Result<Payload, ClaimError> {
    let id = fields
        .text("id")?
        .ok_or_else(|| fields.malformed("missing `id`".to_owned()))?;
    let labels = PayloadLabels::from_json("labels", fields.get("labels"))?;
    Ok(Payload::Wikibase { id, labels })
}

fn decode_globe(fields: &Fields<'_>) -> Result<Payload, ClaimError> {
    Ok(Payload::Globe(GlobeCoordinate {
        latitude: fields.float("latitude")?,
        longitude: fields.float("longitude")?,
        altitude: fields.float("altitude")?,
        precision: fields.float("precision")?,
        globe: fields.text("globe")?,
    }))
}

fn decode_quantity(fields: &Fields<'_>) -> Result<Payload, ClaimError> {
    Ok(Payload::Quantity(Quantity {
        amount: fields.text("amount")?,
        unit: fields.text("unit")?,
        upper_bound: fields.text("upperBound")?,
        lower_bound: fields.text("lowerBound")?,
        unit_labels: PayloadLabels::from_json("unit-labels", fields.get("unit-labels"))?,
    }))
}

fn decode_time(fields: &Fields<'_>) -> Result<Payload, ClaimError> {
    Ok(Payload::Time(TimeValue {
        time: fields.text("time")?,
        timezone: fields.integer("timezone")?,
        before: fields.integer("before")?,
        after: fields.integer("after")?,
        ts_precision: fields.integer("precision")?,
        calendarmodel: fields.text("calendarmodel")?,
    }))
}

fn scalar_text(datatype: Datatype, value: &Value) -> Result<String, ClaimError> {
    render_scalar(value).ok_or_else(|| ClaimError::MalformedPayload {
        datatype,
        reason: format!("expected a bare string, found {}", kind_of(value)),
    })
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

struct Fields<'a> {
    datatype: Datatype,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn new(datatype: Datatype, datavalue: &'a Value) -> Result<Self, ClaimError> {
        let map = datavalue
            .as_object()
            .ok_or_else(|| ClaimError::MalformedPayload {
                datatype,
                reason: format!("expected an object, found {}", kind_of(datavalue)),
            })?;
        Ok(Self { datatype, map })
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.map.get(name)
    }

    fn malformed(&self, reason: String) -> ClaimError {
        ClaimError::MalformedPayload {
            datatype: self.datatype,
            reason,
        }
    }

    fn text(&self, name: &str) -> Result<Option<String>, ClaimError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => render_scalar(value).map(Some).ok_or_else(|| {
                self.malformed(format!("`{name}` must be a scalar, found {}", kind_of(value)))
            }),
        }
    }

    fn float(&self, name: &str) -> Result<Option<f64>, ClaimError> {
        let parsed = match self.get(name) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(number)) => number.as_f64(),
            Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
            Some(_) => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| self.malformed(format!("`{name}` is not a number")))
    }

    fn integer(&self, name: &str) -> Result<Option<i64>, ClaimError> {
        let parsed = match self.get(name) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(number)) => number.as_i64(),
            Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
            Some(_) => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| self.malformed(format!("`{name}` is not an integer")))
    }
}
