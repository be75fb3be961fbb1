//! Known track fields
//!
//! The set of queryable fields is closed: every field has a fixed storage
//! column and value kind, so unknown names are rejected up front instead of
//! being looked up reflectively.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// How a field's values are stored and compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Single text column, matched case-insensitively
    Text,
    /// Single numeric column
    Numeric,
    /// One child row per value
    Multi,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Text => write!(f, "text"),
            FieldKind::Numeric => write!(f, "numeric"),
            FieldKind::Multi => write!(f, "multi"),
        }
    }
}

/// A field of an indexed track
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Artist,
    Title,
    Album,
    Genre,
    Label,
    Comment,
    Year,
    Bpm,
    Rating,
    Crate,
    Tag,
    /// Working-tree path; not part of the metadata log
    Path,
}

impl Field {
    /// Every known field, in display order
    pub const ALL: [Field; 12] = [
        Field::Artist,
        Field::Title,
        Field::Album,
        Field::Genre,
        Field::Label,
        Field::Comment,
        Field::Year,
        Field::Bpm,
        Field::Rating,
        Field::Crate,
        Field::Tag,
        Field::Path,
    ];

    /// Text fields searched by bare words
    pub const FULL_TEXT: [Field; 6] = [
        Field::Artist,
        Field::Title,
        Field::Album,
        Field::Genre,
        Field::Label,
        Field::Comment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Artist => "artist",
            Field::Title => "title",
            Field::Album => "album",
            Field::Genre => "genre",
            Field::Label => "label",
            Field::Comment => "comment",
            Field::Year => "year",
            Field::Bpm => "bpm",
            Field::Rating => "rating",
            Field::Crate => "crate",
            Field::Tag => "tag",
            Field::Path => "path",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Artist
            | Field::Title
            | Field::Album
            | Field::Genre
            | Field::Label
            | Field::Comment
            | Field::Path => FieldKind::Text,
            Field::Year | Field::Bpm | Field::Rating => FieldKind::Numeric,
            Field::Crate | Field::Tag => FieldKind::Multi,
        }
    }

    /// Legacy names accepted for this field
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Field::Bpm => &["tempo"],
            Field::Crate => &["crates"],
            Field::Tag => &["tags"],
            _ => &[],
        }
    }

    /// Column on the `tracks` table, `None` for multi-valued fields
    pub fn column(&self) -> Option<&'static str> {
        match self.kind() {
            FieldKind::Multi => None,
            _ => Some(self.as_str()),
        }
    }

    /// Whether the value comes from the metadata log
    pub fn is_metadata(&self) -> bool {
        *self != Field::Path
    }

    /// Look up a field by canonical name or alias (case-insensitive)
    pub fn from_name(name: &str) -> Option<Field> {
        let lower = name.to_ascii_lowercase();
        Field::ALL
            .into_iter()
            .find(|f| f.as_str() == lower || f.aliases().contains(&lower.as_str()))
    }

    /// Look up a metadata log field; `path` is not a metadata field
    pub fn from_metadata_name(name: &str) -> Option<Field> {
        Field::from_name(name).filter(Field::is_metadata)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized field name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField(pub String);

impl fmt::Display for UnknownField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown field '{}'", self.0)
    }
}

impl std::error::Error for UnknownField {}

impl FromStr for Field {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::from_name(s).ok_or_else(|| UnknownField(s.to_string()))
    }
}
