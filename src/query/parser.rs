//! Query text parser
//!
//! ```text
//! query    := or_group (("|" | "OR") or_group)*
//! or_group := clause+
//! clause   := ["-"] (field ":" filter | text_term)
//! filter   := '""' | "=" value | ("<" | "<=" | ">" | ">=") number
//!           | number "-" number | value
//! value    := word | quoted
//! ```
//!
//! Field names are checked while parsing, so a typo like `artsit:foo` is an
//! error and never silently becomes a text search.

use std::ops::Range;

use super::ast::{Clause, FieldFilter, FilterOp, OrGroup, SearchQuery, TextTerm};
use super::error::QueryError;
use super::executor::fts_tokens;
use crate::core::field::{Field, FieldKind};

/// Parse query text into a [`SearchQuery`]
pub fn parse(text: &str) -> Result<SearchQuery, QueryError> {
    Parser { src: text, pos: 0 }.parse_query()
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    /// End of a clause: whitespace, `|` or end of input
    fn at_boundary(&self) -> bool {
        match self.peek() {
            None => true,
            Some(c) => c.is_whitespace() || c == '|',
        }
    }

    /// Span of the character under the cursor (empty at end of input)
    fn char_span(&self) -> Range<usize> {
        let len = self.peek().map_or(0, char::len_utf8);
        self.pos..self.pos + len
    }

    fn error(&self, span: Range<usize>, message: impl Into<String>, help: Option<&str>) -> QueryError {
        QueryError::syntax(self.src, span, message, help)
    }

    fn parse_query(mut self) -> Result<SearchQuery, QueryError> {
        let mut groups = Vec::new();
        let mut clauses = Vec::new();

        loop {
            self.skip_ws();
            if self.peek().is_none() {
                break;
            }

            if let Some(len) = self.or_operator() {
                if clauses.is_empty() {
                    return Err(self.error(
                        self.pos..self.pos + len,
                        "OR needs a condition on both sides",
                        None,
                    ));
                }
                groups.push(OrGroup {
                    clauses: std::mem::take(&mut clauses),
                });
                self.pos += len;
                continue;
            }

            clauses.push(self.parse_clause()?);
        }

        if clauses.is_empty() {
            let end = self.src.len();
            return Err(if groups.is_empty() {
                self.error(
                    0..end,
                    "empty query",
                    Some("give at least one search word or field filter such as artist:burial"),
                )
            } else {
                self.error(end..end, "OR needs a condition on both sides", None)
            });
        }
        groups.push(OrGroup { clauses });

        Ok(SearchQuery { groups })
    }

    /// Length of an OR operator at the cursor, if there is one
    fn or_operator(&self) -> Option<usize> {
        let rest = self.rest();
        if rest.starts_with('|') {
            return Some(1);
        }
        let after = rest.strip_prefix("OR")?;
        match after.chars().next() {
            None => Some(2),
            Some(c) if c.is_whitespace() || c == '|' => Some(2),
            Some(_) => None,
        }
    }

    fn parse_clause(&mut self) -> Result<Clause, QueryError> {
        let start = self.pos;

        let negated = self.peek() == Some('-');
        if negated {
            self.bump();
            if self.at_boundary() {
                return Err(self.error(
                    start..self.pos,
                    "'-' must be followed by a search word or filter",
                    None,
                ));
            }
        }

        if let Some((name, name_span)) = self.field_prefix() {
            return self
                .parse_filter(name, name_span, negated, start)
                .map(Clause::Filter);
        }

        let value = self.parse_value()?;
        if fts_tokens(&value).is_empty() {
            return Err(self.error(
                start..self.pos,
                "search text has no letters or digits",
                None,
            ));
        }

        Ok(Clause::Text(TextTerm { value, negated }))
    }

    /// Consume `name:` when the cursor is on an identifier followed by a colon
    fn field_prefix(&mut self) -> Option<(&'a str, Range<usize>)> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return None,
        }
        let end = chars
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map_or(rest.len(), |(i, _)| i);

        if !rest[end..].starts_with(':') {
            return None;
        }

        let span = self.pos..self.pos + end;
        self.pos += end + 1;
        Some((&rest[..end], span))
    }

    fn parse_filter(
        &mut self,
        name: &str,
        name_span: Range<usize>,
        negated: bool,
        clause_start: usize,
    ) -> Result<FieldFilter, QueryError> {
        let field = Field::from_name(name).ok_or_else(|| QueryError::UnknownField {
            src: self.src.to_string(),
            span: name_span.clone().into(),
            name: name.to_string(),
        })?;

        if self.at_boundary() {
            return Err(self.error(
                name_span.start..self.pos,
                format!("missing value after '{}:'", name),
                Some("use field:\"\" to find tracks where the field is unset"),
            ));
        }

        let op = if self.rest().starts_with("\"\"") && self.boundary_after(2) {
            self.pos += 2;
            FilterOp::Empty
        } else if self.peek() == Some('=') {
            self.bump();
            let value_start = self.pos;
            let value = self.parse_value()?;
            if value.is_empty() {
                return Err(self.error(
                    value_start..self.pos,
                    "missing value after '='",
                    Some("use field:\"\" to find tracks where the field is unset"),
                ));
            }
            FilterOp::Equals(value)
        } else if let Some((len, make)) = comparison(self.rest()) {
            self.pos += len;
            let number_start = self.pos;
            let word = self.parse_value()?;
            let number = parse_number(&word).ok_or_else(|| {
                self.error(
                    number_start..self.pos,
                    format!("expected a number, found '{}'", word),
                    None,
                )
            })?;
            make(number)
        } else {
            let quoted = self.peek() == Some('"');
            let value_start = self.pos;
            let value = self.parse_value()?;
            match split_range(&value) {
                Some((start, end)) if !quoted && field.kind() == FieldKind::Numeric => {
                    if start > end {
                        return Err(self.error(
                            value_start..self.pos,
                            format!("range start {} is greater than its end {}", start, end),
                            Some("write ranges low to high, e.g. bpm:120-130"),
                        ));
                    }
                    FilterOp::Range { start, end }
                }
                _ => FilterOp::Contains(value),
            }
        };

        let filter = FieldFilter { field, op, negated };
        filter
            .validate()
            .map_err(|e| e.at(self.src, clause_start..self.pos))?;
        Ok(filter)
    }

    fn boundary_after(&self, len: usize) -> bool {
        match self.rest()[len..].chars().next() {
            None => true,
            Some(c) => c.is_whitespace() || c == '|',
        }
    }

    /// A bare word or a quoted string
    fn parse_value(&mut self) -> Result<String, QueryError> {
        if self.peek() == Some('"') {
            let value = self.parse_quoted()?;
            if !self.at_boundary() {
                return Err(self.error(
                    self.char_span(),
                    "expected a space after the closing quote",
                    None,
                ));
            }
            return Ok(value);
        }

        let start = self.pos;
        while !self.at_boundary() {
            self.bump();
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn parse_quoted(&mut self) -> Result<String, QueryError> {
        let open = self.pos;
        self.bump();

        let mut value = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(self.error(
                        open..self.src.len(),
                        "unterminated quoted string",
                        Some("close the string with a matching \""),
                    ))
                }
                Some('"') => break,
                Some('\\') => match self.peek() {
                    Some(c @ ('"' | '\\')) => {
                        self.bump();
                        value.push(c);
                    }
                    _ => value.push('\\'),
                },
                Some(c) => value.push(c),
            }
        }

        Ok(value)
    }
}

type MakeOp = fn(f64) -> FilterOp;

/// Comparison operator at the start of `rest`, longest match first
fn comparison(rest: &str) -> Option<(usize, MakeOp)> {
    let ops: [(&str, MakeOp); 4] = [
        (">=", FilterOp::AtLeast),
        ("<=", FilterOp::AtMost),
        (">", FilterOp::GreaterThan),
        ("<", FilterOp::LessThan),
    ];
    ops.into_iter()
        .find(|(token, _)| rest.starts_with(*token))
        .map(|(token, make)| (token.len(), make))
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Split `a-b` into two numbers; the first `-` may belong to a negative start
fn split_range(value: &str) -> Option<(f64, f64)> {
    value
        .match_indices('-')
        .filter(|(i, _)| *i > 0)
        .find_map(|(i, _)| Some((parse_number(&value[..i])?, parse_number(&value[i + 1..])?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(field: Field, op: FilterOp) -> Clause {
        Clause::Filter(FieldFilter::new(field, op))
    }

    fn groups(query: &SearchQuery) -> Vec<Vec<Clause>> {
        query.groups.iter().map(|g| g.clauses.clone()).collect()
    }

    #[test]
    fn test_and_within_group() {
        let query = parse("artist:Foo bpm:>140").unwrap();
        assert_eq!(
            groups(&query),
            vec![vec![
                filter(Field::Artist, FilterOp::Contains("Foo".into())),
                filter(Field::Bpm, FilterOp::GreaterThan(140.0)),
            ]]
        );
    }

    #[test]
    fn test_or_groups_and_negation() {
        let query = parse("-genre:ambient genre:house | genre:techno").unwrap();
        assert_eq!(
            groups(&query),
            vec![
                vec![
                    Clause::Filter(
                        FieldFilter::new(Field::Genre, FilterOp::Contains("ambient".into())).negate()
                    ),
                    filter(Field::Genre, FilterOp::Contains("house".into())),
                ],
                vec![filter(Field::Genre, FilterOp::Contains("techno".into()))],
            ]
        );
    }

    #[test]
    fn test_or_keyword() {
        let query = parse("burial OR kode9").unwrap();
        assert_eq!(query.groups.len(), 2);
        // lowercase "or" is just a word
        let query = parse("this or that").unwrap();
        assert_eq!(query.groups.len(), 1);
        assert_eq!(query.groups[0].clauses.len(), 3);
    }

    #[test]
    fn test_operators() {
        let cases = [
            ("rating:>=4", FilterOp::AtLeast(4.0)),
            ("rating:<=2", FilterOp::AtMost(2.0)),
            ("bpm:<100", FilterOp::LessThan(100.0)),
            ("bpm:120-130", FilterOp::Range { start: 120.0, end: 130.0 }),
            ("year:-5-3", FilterOp::Range { start: -5.0, end: 3.0 }),
            ("genre:=House", FilterOp::Equals("House".into())),
            ("genre:\"\"", FilterOp::Empty),
        ];
        for (text, op) in cases {
            let query = parse(text).unwrap();
            match &query.groups[0].clauses[0] {
                Clause::Filter(f) => assert_eq!(f.op, op, "{}", text),
                other => panic!("{}: unexpected clause {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_quoted_values_keep_punctuation() {
        let query = parse(r#"title:"Don't Stop | Go: \"Remix\"" label:=Hyperdub"#).unwrap();
        assert_eq!(
            groups(&query),
            vec![vec![
                filter(Field::Title, FilterOp::Contains("Don't Stop | Go: \"Remix\"".into())),
                filter(Field::Label, FilterOp::Equals("Hyperdub".into())),
            ]]
        );
    }

    #[test]
    fn test_text_terms() {
        let query = parse("\"deep house\" -vocal").unwrap();
        assert_eq!(
            groups(&query),
            vec![vec![
                Clause::Text(TextTerm::new("deep house")),
                Clause::Text(TextTerm {
                    value: "vocal".into(),
                    negated: true
                }),
            ]]
        );
    }

    #[test]
    fn test_alias_maps_to_canonical_field() {
        let query = parse("tempo:>170 crates:Peak").unwrap();
        assert_eq!(
            groups(&query),
            vec![vec![
                filter(Field::Bpm, FilterOp::GreaterThan(170.0)),
                filter(Field::Crate, FilterOp::Contains("Peak".into())),
            ]]
        );
    }

    #[test]
    fn test_range_syntax_on_text_field_is_substring() {
        let query = parse("title:24-7").unwrap();
        assert_eq!(
            groups(&query),
            vec![vec![filter(Field::Title, FilterOp::Contains("24-7".into()))]]
        );
    }

    #[test]
    fn test_unknown_field_is_an_error() {
        match parse("artsit:burial") {
            Err(QueryError::UnknownField { name, span, .. }) => {
                assert_eq!(name, "artsit");
                assert_eq!(span.offset(), 0);
                assert_eq!(span.len(), 6);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors() {
        let bad = [
            "",
            "   ",
            "| burial",
            "burial |",
            "burial OR",
            "artist:",
            "title:\"unterminated",
            "title:\"a\"b",
            "bpm:>fast",
            "bpm:140-120",
            "genre:=",
            "- burial",
            "&&",
        ];
        for text in bad {
            assert!(
                matches!(parse(text), Err(QueryError::Syntax { .. })),
                "expected syntax error for {:?}",
                text
            );
        }
    }

    #[test]
    fn test_field_type_errors() {
        for text in ["genre:>5", "crate:1-2x", "rating:great", "title:<=3"] {
            let result = parse(text);
            if text == "crate:1-2x" {
                // not a range, just a substring
                assert!(result.is_ok());
                continue;
            }
            assert!(
                matches!(result, Err(QueryError::FieldType { .. })),
                "expected field type error for {:?}",
                text
            );
        }
    }

    #[test]
    fn test_error_span_points_at_offending_text() {
        match parse("artist:burial bpm:>fast") {
            Err(QueryError::Syntax { span, .. }) => {
                assert_eq!(span.offset(), 19);
                assert_eq!(span.len(), 4);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_display_round_trips_through_parser() {
        for text in [
            "artist:Foo bpm:>140",
            "-genre:ambient genre:house | genre:techno",
            "title:\"two words\" rating:4-5 crate:\"\"",
        ] {
            let query = parse(text).unwrap();
            assert_eq!(parse(&query.to_string()).unwrap(), query);
        }
    }
}
