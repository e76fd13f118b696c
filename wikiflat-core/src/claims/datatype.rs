//! Closed tag sets carried by every claim.

use std::fmt;
use std::str::FromStr;

use super::ClaimError;

/// Shape of a claim's `datavalue`, keyed by the `mainsnak.datatype` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    /// `commonsMedia`
    CommonsMedia,
    /// `geo-shape`
    GeoShape,
    /// `tabular-data`
    TabularData,
    /// `url`
    Url,
    /// `external-id`
    ExternalId,
    /// `string`
    String,
    /// `musical-notation`
    MusicalNotation,
    /// `math`
    Math,
    /// `entity-schema`
    EntitySchema,
    /// `wikibase-lexeme`
    WikibaseLexeme,
    /// `wikibase-form`
    WikibaseForm,
    /// `wikibase-sense`
    WikibaseSense,
    /// `wikibase-item`
    WikibaseItem,
    /// `wikibase-property`
    WikibaseProperty,
    /// `globe-coordinate`
    GlobeCoordinate,
    /// `quantity`
    Quantity,
    /// `time`
    Time,
    /// `monolingualtext`
    MonolingualText,
}

impl Datatype {
    /// Every tag whose `datavalue` is a bare string.
    pub const SCALAR_STRING: [Self; 12] = [
        Self::CommonsMedia,
        Self::GeoShape,
        Self::TabularData,
        Self::Url,
        Self::ExternalId,
        Self::String,
        Self::MusicalNotation,
        Self::Math,
        Self::EntitySchema,
        Self::WikibaseLexeme,
        Self::WikibaseForm,
        Self::WikibaseSense,
    ];

    /// Wire spelling of the tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CommonsMedia => "commonsMedia",
            Self::GeoShape => "geo-shape",
            Self::TabularData => "tabular-data",
            Self::Url => "url",
            Self::ExternalId => "external-id",
            Self::String => "string",
            Self::MusicalNotation => "musical-notation",
            Self::Math => "math",
            Self::EntitySchema => "entity-schema",
            Self::WikibaseLexeme => "wikibase-lexeme",
            Self::WikibaseForm => "wikibase-form",
            Self::WikibaseSense => "wikibase-sense",
            Self::WikibaseItem => "wikibase-item",
            Self::WikibaseProperty => "wikibase-property",
            Self::GlobeCoordinate => "globe-coordinate",
            Self::Quantity => "quantity",
            Self::Time => "time",
            Self::MonolingualText => "monolingualtext",
        }
    }

    /// Whether the `datavalue` is used as-is with no payload-side labels.
    #[must_use]
    pub const fn is_scalar_string(self) -> bool {
        matches!(
            self,
            Self::CommonsMedia
                | Self::GeoShape
                | Self::TabularData
                | Self::Url
                | Self::ExternalId
                | Self::String
                | Self::MusicalNotation
                | Self::Math
                | Self::EntitySchema
                | Self::WikibaseLexeme
                | Self::WikibaseForm
                | Self::WikibaseSense
        )
    }
}

impl FromStr for Datatype {
    type Err = ClaimError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let parsed = match tag {
            "commonsMedia" => Self::CommonsMedia,
            "geo-shape" => Self::GeoShape,
            "tabular-data" => Self::TabularData,
            "url" => Self::Url,
            "external-id" => Self::ExternalId,
            "string" => Self::String,
            "musical-notation" => Self::MusicalNotation,
            "math" => Self::Math,
            "entity-schema" => Self::EntitySchema,
            "wikibase-lexeme" => Self::WikibaseLexeme,
            "wikibase-form" => Self::WikibaseForm,
            "wikibase-sense" => Self::WikibaseSense,
            "wikibase-item" => Self::WikibaseItem,
            "wikibase-property" => Self::WikibaseProperty,
            "globe-coordinate" => Self::GlobeCoordinate,
            "quantity" => Self::Quantity,
            "time" => Self::Time,
            "monolingualtext" => Self::MonolingualText,
            other => {
                return Err(ClaimError::UnknownDatatype {
                    datatype: other.to_owned(),
                });
            }
        };
        Ok(parsed)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statement rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rank {
    /// `preferred`
    Preferred,
    /// `normal`
    Normal,
    /// `deprecated`
    Deprecated,
}

impl Rank {
    /// Wire spelling of the rank.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preferred => "preferred",
            Self::Normal => "normal",
            Self::Deprecated => "deprecated",
        }
    }
}

impl FromStr for Rank {
    type Err = ClaimError;

    fn from_str(rank: &str) -> Result<Self, Self::Err> {
        match rank {
            "preferred" => Ok(Self::Preferred),
            "normal" => Ok(Self::Normal),
            "deprecated" => Ok(Self::Deprecated),
            other => Err(ClaimError::UnknownRank {
                rank: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
