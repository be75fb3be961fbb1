//! `crate-index fields` command - List the queryable fields

use console::style;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::{Field, FieldKind};

#[derive(clap::Args, Debug)]
pub struct FieldsArgs {
    /// Only list fields of this kind
    #[arg(long, value_parser = ["text", "numeric", "multi"])]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
struct FieldInfo {
    name: &'static str,
    kind: FieldKind,
    full_text: bool,
    aliases: &'static [&'static str],
}

fn field_infos(kind: Option<&str>) -> Vec<FieldInfo> {
    Field::ALL
        .into_iter()
        .filter(|f| kind.map_or(true, |k| f.kind().to_string() == k))
        .map(|f| FieldInfo {
            name: f.as_str(),
            kind: f.kind(),
            full_text: Field::FULL_TEXT.contains(&f),
            aliases: f.aliases(),
        })
        .collect()
}

pub fn run(args: FieldsArgs, global: &GlobalOpts) -> Result<()> {
    let fields = field_infos(args.kind.as_deref());

    match global.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&fields).into_diagnostic()?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yml::to_string(&fields).into_diagnostic()?);
        }
        OutputFormat::Tsv | OutputFormat::Csv => {
            let sep = if global.format == OutputFormat::Csv { "," } else { "\t" };
            println!("{}", ["name", "kind", "full_text", "aliases"].join(sep));
            for info in &fields {
                println!(
                    "{}",
                    [
                        info.name.to_string(),
                        info.kind.to_string(),
                        info.full_text.to_string(),
                        info.aliases.join(" "),
                    ]
                    .join(sep)
                );
            }
        }
        _ => {
            println!(
                "{:<10} {:<8} {:<10} {}",
                style("FIELD").bold(),
                style("KIND").bold(),
                style("FULL-TEXT").bold(),
                style("ALIASES").bold()
            );
            for info in &fields {
                println!(
                    "{:<10} {:<8} {:<10} {}",
                    style(info.name).cyan(),
                    info.kind,
                    if info.full_text { "yes" } else { "" },
                    info.aliases.join(", ")
                );
            }
        }
    }

    Ok(())
}
