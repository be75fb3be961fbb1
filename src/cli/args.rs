//! CLI argument definitions using clap derive

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cli::commands::{
    completions::CompletionsArgs, fields::FieldsArgs, index::IndexCommands, search::SearchArgs,
};

#[derive(Parser)]
#[command(name = "crate-index")]
#[command(author, version, about = "Search a git-annex music collection by its metadata")]
#[command(long_about = "Mirrors the metadata logs of a git-annex branch into a local SQLite index and answers field queries against it.")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug)]
pub struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "auto")]
    pub format: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Collection root (default: auto-detect from the current directory)
    #[arg(long, global = true, env = "CRATE_INDEX_REPO")]
    pub repo: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and inspect the local index
    #[command(subcommand)]
    Index(IndexCommands),

    /// Search tracks with a field query
    Search(SearchArgs),

    /// List the fields a query can use
    Fields(FieldsArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Automatically detect based on context (tsv table for listings)
    #[default]
    Auto,
    /// Tab-separated values (for piping)
    Tsv,
    /// JSON format (for programming)
    Json,
    /// CSV format (for spreadsheets)
    Csv,
    /// YAML format
    Yaml,
    /// Markdown tables
    Md,
    /// Just working-tree paths, one per line
    Path,
    /// Just annex keys, one per line
    Key,
}

impl OutputFormat {
    /// Resolve `auto` against a configured default format name
    pub fn or_configured(self, configured: Option<&str>) -> Self {
        if self != OutputFormat::Auto {
            return self;
        }
        configured
            .and_then(|name| OutputFormat::from_str(name, true).ok())
            .unwrap_or(OutputFormat::Auto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_takes_trailing_words() {
        let cli = Cli::try_parse_from(["crate-index", "search", "artist:burial", "bpm:>130"])
            .unwrap();
        match cli.command {
            Commands::Search(args) => assert_eq!(args.query, vec!["artist:burial", "bpm:>130"]),
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_verbose_counts() {
        let cli = Cli::try_parse_from(["crate-index", "-vv", "fields"]).unwrap();
        assert_eq!(cli.global.verbose, 2);
    }

    #[test]
    fn test_format_falls_back_to_config() {
        assert_eq!(OutputFormat::Auto.or_configured(Some("json")), OutputFormat::Json);
        assert_eq!(OutputFormat::Csv.or_configured(Some("json")), OutputFormat::Csv);
        assert_eq!(OutputFormat::Auto.or_configured(Some("bogus")), OutputFormat::Auto);
        assert_eq!(OutputFormat::Auto.or_configured(None), OutputFormat::Auto);
    }
}
