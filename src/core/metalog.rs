//! Metadata change-log decoding
//!
//! Each tracked key has a `<key>.log.met` file on the metadata branch. Every
//! line records one change at a logical time:
//!
//! ```text
//! 1507541153.566038914s artist +Foo genre +house -techno
//! ```
//!
//! `+value` sets a value and `-value` unsets it; values prefixed with `!` are
//! base64 encoded. Replaying the log in time order yields the set of values
//! currently held by each field.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

/// Logical timestamp of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogTime {
    pub secs: u64,
    pub nanos: u32,
}

impl LogTime {
    /// Parse `<secs>[.<fraction>]s`
    pub fn parse(token: &str) -> Option<Self> {
        let body = token.strip_suffix('s')?;
        let (secs, frac) = match body.split_once('.') {
            Some((s, f)) => (s, f),
            None => (body, ""),
        };
        if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let secs = secs.parse().ok()?;
        // Normalise the fraction to nanoseconds, dropping sub-nanosecond digits
        let mut digits: String = frac.chars().take(9).collect();
        while digits.len() < 9 {
            digits.push('0');
        }
        let nanos = digits.parse().ok()?;

        Some(Self { secs, nanos })
    }
}

impl fmt::Display for LogTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.secs, self.nanos)
    }
}

/// Set or unset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogOp {
    Set,
    Unset,
}

/// A single field change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub time: LogTime,
    pub field: String,
    pub op: LogOp,
    pub value: String,
}

impl LogEntry {
    /// Replay order: time, then a fixed secondary key so entries sharing a
    /// timestamp resolve the same way whatever order they were written in.
    /// Set sorts before Unset, so an unset wins a tie with a set.
    fn replay_cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.field.cmp(&other.field))
            .then_with(|| self.value.cmp(&other.value))
            .then_with(|| self.op.cmp(&other.op))
    }
}

/// The raw change log of one key
#[derive(Debug, Clone, Default)]
pub struct MetadataRecord {
    pub key: String,
    pub entries: Vec<LogEntry>,
}

/// Field → currently set values. Fields with no values are never present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMetadata {
    fields: BTreeMap<String, BTreeSet<String>>,
}

impl ResolvedMetadata {
    pub fn get(&self, field: &str) -> Option<&BTreeSet<String>> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.fields.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, BTreeSet<String>> {
        self.fields
    }
}

impl MetadataRecord {
    /// Recompute the current value set of every field from the whole log
    pub fn resolve(&self) -> ResolvedMetadata {
        let mut ordered: Vec<&LogEntry> = self.entries.iter().collect();
        ordered.sort_by(|a, b| a.replay_cmp(b));

        let mut fields: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entry in ordered {
            match entry.op {
                LogOp::Set => {
                    fields
                        .entry(entry.field.clone())
                        .or_default()
                        .insert(entry.value.clone());
                }
                LogOp::Unset => {
                    if let Some(values) = fields.get_mut(&entry.field) {
                        values.remove(&entry.value);
                    }
                }
            }
        }
        fields.retain(|_, values| !values.is_empty());

        ResolvedMetadata { fields }
    }
}

/// Decode a key's raw log bytes. Malformed lines are skipped and counted in
/// `warnings`; decoding itself never fails.
pub fn decode(key: &str, raw: &[u8], warnings: &mut usize) -> MetadataRecord {
    let mut record = MetadataRecord {
        key: key.to_string(),
        entries: Vec::new(),
    };

    for (lineno, line) in raw.split(|b| *b == b'\n').enumerate() {
        let line = match std::str::from_utf8(line) {
            Ok(l) => l.trim(),
            Err(_) => {
                debug!(key, line = lineno + 1, "metadata line is not UTF-8");
                *warnings += 1;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok(entries) => record.entries.extend(entries),
            Err(reason) => {
                debug!(key, line = lineno + 1, reason, "skipping malformed metadata line");
                *warnings += 1;
            }
        }
    }

    record
}

fn parse_line(line: &str) -> Result<Vec<LogEntry>, &'static str> {
    let mut tokens = line.split_ascii_whitespace();
    let time = tokens
        .next()
        .and_then(LogTime::parse)
        .ok_or("bad timestamp")?;

    let mut entries = Vec::new();
    let mut field: Option<String> = None;
    let mut field_has_value = false;

    for token in tokens {
        let (op, encoded) = match token.as_bytes()[0] {
            b'+' => (LogOp::Set, &token[1..]),
            b'-' => (LogOp::Unset, &token[1..]),
            _ => {
                if field.is_some() && !field_has_value {
                    return Err("field without values");
                }
                field = Some(token.to_lowercase());
                field_has_value = false;
                continue;
            }
        };

        let name = field.as_ref().ok_or("value without field")?;
        let value = decode_value(encoded)?;
        entries.push(LogEntry {
            time,
            field: name.clone(),
            op,
            value,
        });
        field_has_value = true;
    }

    if field.is_none() || !field_has_value {
        return Err("field without values");
    }

    Ok(entries)
}

fn decode_value(encoded: &str) -> Result<String, &'static str> {
    if encoded.is_empty() {
        return Err("empty value");
    }
    match encoded.strip_prefix('!') {
        Some(b64) => {
            let bytes = STANDARD.decode(b64).map_err(|_| "bad base64 value")?;
            String::from_utf8(bytes).map_err(|_| "base64 value is not UTF-8")
        }
        None => Ok(encoded.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(raw: &str) -> (BTreeMap<String, BTreeSet<String>>, usize) {
        let mut warnings = 0;
        let record = decode("KEY", raw.as_bytes(), &mut warnings);
        (record.resolve().into_inner(), warnings)
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_log_time() {
        let t = LogTime::parse("1507541153.566038914s").unwrap();
        assert_eq!(t.secs, 1507541153);
        assert_eq!(t.nanos, 566038914);
        assert_eq!(LogTime::parse("12s").unwrap().nanos, 0);
        assert_eq!(LogTime::parse("1.5s").unwrap().nanos, 500_000_000);
        assert!(LogTime::parse("12").is_none());
        assert!(LogTime::parse("abc s").is_none());
    }

    #[test]
    fn test_resolves_final_state() {
        let (fields, warnings) = resolve(
            "1s artist +A rating +3 crate +X\n\
             2s rating -3 +5 crate +Y\n",
        );
        assert_eq!(warnings, 0);
        assert_eq!(fields["artist"], set(&["A"]));
        assert_eq!(fields["rating"], set(&["5"]));
        assert_eq!(fields["crate"], set(&["X", "Y"]));
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let forward = "1s artist +A rating +3 crate +X\n2s rating -3 +5 crate +Y\n3s genre +dub\n4s genre -dub\n";
        let shuffled = "4s genre -dub\n2s crate +Y rating -3 +5\n3s genre +dub\n1s crate +X artist +A rating +3\n";

        let (a, _) = resolve(forward);
        let (b, _) = resolve(shuffled);
        assert_eq!(a, b);
        assert_eq!(
            a,
            BTreeMap::from([
                ("artist".to_string(), set(&["A"])),
                ("crate".to_string(), set(&["X", "Y"])),
                ("rating".to_string(), set(&["5"])),
            ])
        );
    }

    #[test]
    fn test_unset_wins_tie_at_same_time() {
        let (a, _) = resolve("5s genre +house\n5s genre -house\n");
        let (b, _) = resolve("5s genre -house\n5s genre +house\n");
        assert!(a.get("genre").is_none());
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let (fields, _) = resolve("1s genre +a\n2s genre -a\n");
        assert!(fields.is_empty());
    }

    #[test]
    fn test_base64_values() {
        // "Hello World" contains a space, so it is stored encoded
        let (fields, warnings) = resolve("1s title +!SGVsbG8gV29ybGQ=\n");
        assert_eq!(warnings, 0);
        assert_eq!(fields["title"], set(&["Hello World"]));
    }

    #[test]
    fn test_field_names_are_lowercased() {
        let (fields, _) = resolve("1s Artist +A\n");
        assert!(fields.contains_key("artist"));
    }

    #[test]
    fn test_malformed_lines_are_counted_and_skipped() {
        let (fields, warnings) = resolve(
            "garbage line\n\
             1s +orphan\n\
             2s artist\n\
             3s title +!!!notbase64\n\
             4s artist +Good\n",
        );
        assert_eq!(warnings, 4);
        assert_eq!(fields["artist"], set(&["Good"]));
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn test_invalid_utf8_line_is_counted() {
        let mut warnings = 0;
        let raw = b"1s artist +A\n\xff\xfe bad\n";
        let record = decode("KEY", raw, &mut warnings);
        assert_eq!(warnings, 1);
        assert_eq!(record.entries.len(), 1);
    }

    #[test]
    fn test_log_time_display() {
        let t = LogTime { secs: 3, nanos: 5 };
        assert_eq!(t.to_string(), "3.000000005s");
    }
}
