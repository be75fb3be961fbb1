//! Cache type definitions
//!
//! All structs used for cached track data and build/query results.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::field::Field;

// =========================================================================
// Cached Track
// =========================================================================

/// An indexed track: a metadata key that maps to a working-tree file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CachedTrack {
    pub key: String,
    pub path: String,
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub crates: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl CachedTrack {
    pub fn new(key: &str, path: &str, present: bool) -> Self {
        Self {
            key: key.to_string(),
            path: path.to_string(),
            present,
            ..Default::default()
        }
    }

    pub(crate) fn text_slot(&mut self, field: Field) -> Option<&mut Option<String>> {
        match field {
            Field::Artist => Some(&mut self.artist),
            Field::Title => Some(&mut self.title),
            Field::Album => Some(&mut self.album),
            Field::Genre => Some(&mut self.genre),
            Field::Label => Some(&mut self.label),
            Field::Comment => Some(&mut self.comment),
            _ => None,
        }
    }

    pub(crate) fn numeric_slot(&mut self, field: Field) -> Option<&mut Option<f64>> {
        match field {
            Field::Year => Some(&mut self.year),
            Field::Bpm => Some(&mut self.bpm),
            Field::Rating => Some(&mut self.rating),
            _ => None,
        }
    }

    pub(crate) fn multi_slot(&mut self, field: Field) -> Option<&mut Vec<String>> {
        match field {
            Field::Crate => Some(&mut self.crates),
            Field::Tag => Some(&mut self.tags),
            _ => None,
        }
    }

    /// Values of a multi-valued field
    pub fn values(&self, field: Field) -> &[String] {
        match field {
            Field::Crate => &self.crates,
            Field::Tag => &self.tags,
            _ => &[],
        }
    }

    /// Display form of any field, `None` when unset
    pub fn display(&self, field: Field) -> Option<String> {
        let text = |v: &Option<String>| v.clone();
        match field {
            Field::Artist => text(&self.artist),
            Field::Title => text(&self.title),
            Field::Album => text(&self.album),
            Field::Genre => text(&self.genre),
            Field::Label => text(&self.label),
            Field::Comment => text(&self.comment),
            Field::Year => self.year.map(format_number),
            Field::Bpm => self.bpm.map(format_number),
            Field::Rating => self.rating.map(format_number),
            Field::Crate | Field::Tag => {
                let values = self.values(field);
                (!values.is_empty()).then(|| values.join(", "))
            }
            Field::Path => Some(self.path.clone()),
        }
    }
}

/// Render a number without a trailing `.0` when it is integral
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// =========================================================================
// Cache State
// =========================================================================

/// The singleton "last synchronized" record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheState {
    /// Metadata branch the index mirrors
    pub branch: String,
    /// Branch commit the index reflects, `None` if the branch did not exist
    pub branch_commit: Option<String>,
    /// Working-tree HEAD the key locations reflect
    pub head_commit: Option<String>,
    pub keys_total: usize,
    pub warnings: usize,
    pub synced_at: DateTime<Utc>,
}

// =========================================================================
// Operation Result Types
// =========================================================================

/// How a build ended up running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    /// Every row rewritten from the branch tip
    Full,
    /// Only changed keys touched
    Incremental,
    /// Nothing changed since the last build
    UpToDate,
    /// Incremental refresh replaced by a full build after a history rewrite
    FullAfterRewrite,
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Full => write!(f, "full"),
            BuildMode::Incremental => write!(f, "incremental"),
            BuildMode::UpToDate => write!(f, "up to date"),
            BuildMode::FullAfterRewrite => write!(f, "full (history rewritten)"),
        }
    }
}

/// Statistics from a build or refresh
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildStats {
    pub mode: BuildMode,
    pub keys_total: usize,
    pub keys_updated: usize,
    pub keys_removed: usize,
    pub warnings: usize,
    pub duration_ms: u64,
}

impl BuildStats {
    pub(crate) fn new(mode: BuildMode) -> Self {
        Self {
            mode,
            keys_total: 0,
            keys_updated: 0,
            keys_removed: 0,
            warnings: 0,
            duration_ms: 0,
        }
    }
}

/// Cache statistics
#[derive(Debug, Default, Serialize)]
pub struct CacheStats {
    pub total_tracks: usize,
    pub present_tracks: usize,
    pub metadata_objects: usize,
    pub values_by_field: HashMap<String, usize>,
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(128.5), "128.5");
        assert_eq!(format_number(-3.0), "-3");
    }

    #[test]
    fn test_display_fields() {
        let mut track = CachedTrack::new("K", "music/a.mp3", true);
        track.bpm = Some(124.0);
        track.crates = vec!["Peak".into(), "Warmup".into()];
        assert_eq!(track.display(Field::Bpm).as_deref(), Some("124"));
        assert_eq!(track.display(Field::Crate).as_deref(), Some("Peak, Warmup"));
        assert_eq!(track.display(Field::Tag), None);
        assert_eq!(track.display(Field::Path).as_deref(), Some("music/a.mp3"));
    }
}
