//! Rendering of search results and raw query rows
//!
//! Line-oriented formats (tsv, csv, path, key) are written as rows arrive;
//! document formats (json, yaml, md) are buffered and written at the end.

use std::io::Write;

use miette::{IntoDiagnostic, Result};

use crate::cli::helpers::truncate_str;
use crate::cli::OutputFormat;
use crate::core::{CachedTrack, Field};

/// Columns printed for a track, in order
const TRACK_FIELDS: [Field; 10] = [
    Field::Path,
    Field::Artist,
    Field::Title,
    Field::Album,
    Field::Genre,
    Field::Year,
    Field::Bpm,
    Field::Rating,
    Field::Crate,
    Field::Tag,
];

/// Widest cell in a markdown table
const MD_CELL_WIDTH: usize = 48;

fn track_header() -> Vec<String> {
    let mut header: Vec<String> = TRACK_FIELDS.iter().map(|f| f.to_string()).collect();
    header.push("present".to_string());
    header.push("key".to_string());
    header
}

fn track_row(track: &CachedTrack) -> Vec<String> {
    let mut row: Vec<String> = TRACK_FIELDS
        .iter()
        .map(|f| track.display(*f).unwrap_or_default())
        .collect();
    row.push(if track.present { "yes" } else { "no" }.to_string());
    row.push(track.key.clone());
    row
}

fn delimited<W: Write>(out: W, delimiter: u8) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(if delimiter == b'\t' {
            csv::QuoteStyle::Never
        } else {
            csv::QuoteStyle::Necessary
        })
        .from_writer(out)
}

/// Tabs and newlines would break a TSV row
fn tsv_cell(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

/// Incremental writer for search results
pub enum TrackSink<W: Write> {
    Lines { out: W, keys: bool },
    Delimited { writer: csv::Writer<W>, tsv: bool },
    Buffered {
        out: W,
        format: OutputFormat,
        tracks: Vec<CachedTrack>,
    },
}

impl<W: Write> TrackSink<W> {
    pub fn new(out: W, format: OutputFormat) -> Result<Self> {
        let sink = match format {
            OutputFormat::Path | OutputFormat::Key => TrackSink::Lines {
                out,
                keys: format == OutputFormat::Key,
            },
            OutputFormat::Auto | OutputFormat::Tsv | OutputFormat::Csv => {
                let tsv = format != OutputFormat::Csv;
                let mut writer = delimited(out, if tsv { b'\t' } else { b',' });
                writer.write_record(track_header()).into_diagnostic()?;
                TrackSink::Delimited { writer, tsv }
            }
            OutputFormat::Json | OutputFormat::Yaml | OutputFormat::Md => TrackSink::Buffered {
                out,
                format,
                tracks: Vec::new(),
            },
        };
        Ok(sink)
    }

    pub fn write(&mut self, track: CachedTrack) -> Result<()> {
        match self {
            TrackSink::Lines { out, keys } => {
                let value = if *keys { &track.key } else { &track.path };
                writeln!(out, "{}", value).into_diagnostic()
            }
            TrackSink::Delimited { writer, tsv } => {
                let mut row = track_row(&track);
                if *tsv {
                    row = row.iter().map(|c| tsv_cell(c)).collect();
                }
                writer.write_record(&row).into_diagnostic()
            }
            TrackSink::Buffered { tracks, .. } => {
                tracks.push(track);
                Ok(())
            }
        }
    }

    pub fn finish(self) -> Result<()> {
        match self {
            TrackSink::Lines { mut out, .. } => out.flush().into_diagnostic(),
            TrackSink::Delimited { mut writer, .. } => writer.flush().into_diagnostic(),
            TrackSink::Buffered {
                mut out,
                format,
                tracks,
            } => {
                match format {
                    OutputFormat::Json => {
                        let json = serde_json::to_string_pretty(&tracks).into_diagnostic()?;
                        writeln!(out, "{}", json).into_diagnostic()?;
                    }
                    OutputFormat::Yaml => {
                        let yaml = serde_yml::to_string(&tracks).into_diagnostic()?;
                        write!(out, "{}", yaml).into_diagnostic()?;
                    }
                    _ => {
                        let rows: Vec<Vec<String>> = tracks.iter().map(track_row).collect();
                        write_markdown(&mut out, &track_header(), &rows)?;
                    }
                }
                out.flush().into_diagnostic()
            }
        }
    }
}

fn md_cell(value: &str) -> String {
    truncate_str(&tsv_cell(value), MD_CELL_WIDTH).replace('|', "\\|")
}

fn write_markdown<W: Write>(out: &mut W, columns: &[String], rows: &[Vec<String>]) -> Result<()> {
    let header: Vec<String> = columns.iter().map(|c| md_cell(c)).collect();
    writeln!(out, "| {} |", header.join(" | ")).into_diagnostic()?;
    writeln!(out, "|{}", "---|".repeat(columns.len())).into_diagnostic()?;
    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| md_cell(c)).collect();
        writeln!(out, "| {} |", cells.join(" | ")).into_diagnostic()?;
    }
    Ok(())
}

/// Write the rows of a raw SQL query
pub fn write_rows<W: Write>(
    mut out: W,
    format: OutputFormat,
    columns: &[String],
    rows: &[Vec<String>],
) -> Result<()> {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => {
            let objects: Vec<serde_json::Map<String, serde_json::Value>> = rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .zip(row)
                        .map(|(col, val)| (col.clone(), serde_json::Value::String(val.clone())))
                        .collect()
                })
                .collect();
            if format == OutputFormat::Json {
                let json = serde_json::to_string_pretty(&objects).into_diagnostic()?;
                writeln!(out, "{}", json).into_diagnostic()?;
            } else {
                let yaml = serde_yml::to_string(&objects).into_diagnostic()?;
                write!(out, "{}", yaml).into_diagnostic()?;
            }
        }
        OutputFormat::Md => write_markdown(&mut out, columns, rows)?,
        // Single-column formats print the first column only
        OutputFormat::Path | OutputFormat::Key => {
            for row in rows {
                writeln!(out, "{}", row.first().map(String::as_str).unwrap_or(""))
                    .into_diagnostic()?;
            }
        }
        OutputFormat::Auto | OutputFormat::Tsv | OutputFormat::Csv => {
            let tsv = format != OutputFormat::Csv;
            let mut writer = delimited(&mut out, if tsv { b'\t' } else { b',' });
            writer.write_record(columns).into_diagnostic()?;
            for row in rows {
                if tsv {
                    let cells: Vec<String> = row.iter().map(|c| tsv_cell(c)).collect();
                    writer.write_record(&cells).into_diagnostic()?;
                } else {
                    writer.write_record(row).into_diagnostic()?;
                }
            }
            writer.flush().into_diagnostic()?;
        }
    }
    out.flush().into_diagnostic()
}
