//! `crate-index index` command - Manage the track index
//!
//! The index is a local SQLite database under the git directory that stores:
//! - One row per annexed file with its resolved metadata
//! - A full-text index over the descriptive fields
//! - The branch commit it was last synchronized to
//!
//! The index is disposable: `index clear` followed by a build always recovers.

use clap::Subcommand;
use console::style;
use miette::{IntoDiagnostic, Result};

use crate::cli::helpers::{delete_index, discover_collection, format_size, open_index};
use crate::cli::output::write_rows;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::{AnnexStore, BuildMode, BuildStats};

#[derive(Subcommand, Debug)]
pub enum IndexCommands {
    /// Bring the index up to date with the metadata branch
    Build {
        /// Rebuild every row instead of applying changes since the last build
        #[arg(long)]
        full: bool,
    },

    /// Show what the index reflects and how large it is
    Status,

    /// Execute a read-only SQL statement against the index
    Query {
        /// SQL statement to execute
        sql: String,
    },

    /// Delete the index database
    Clear,
}

pub fn run(cmd: IndexCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        IndexCommands::Build { full } => run_build(full, global),
        IndexCommands::Status => run_status(global),
        IndexCommands::Query { sql } => run_query(&sql, global),
        IndexCommands::Clear => run_clear(global),
    }
}

fn run_build(full: bool, global: &GlobalOpts) -> Result<()> {
    let (collection, config, mut cache) = open_index(global)?;
    let store = AnnexStore::new(collection.root());
    let format = global.format.or_configured(config.default_format.as_deref());

    if !global.quiet && format == OutputFormat::Auto {
        let action = if full { "Rebuilding" } else { "Updating" };
        eprintln!(
            "{} {} index from {}...",
            style("→").blue(),
            action,
            style(config.branch()).cyan()
        );
    }

    let stats = cache.build(&store, config.branch(), full)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stats).into_diagnostic()?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yml::to_string(&stats).into_diagnostic()?);
        }
        _ => {
            if !global.quiet {
                print_build_summary(&stats);
            }
        }
    }

    Ok(())
}

fn print_build_summary(stats: &BuildStats) {
    if stats.mode == BuildMode::UpToDate {
        println!("{} Index is up to date", style("✓").green());
        println!("  Tracks:  {}", stats.keys_total);
        return;
    }

    println!(
        "{} Index built in {}ms ({})",
        style("✓").green(),
        stats.duration_ms,
        stats.mode
    );
    println!("  Tracks:  {}", style(stats.keys_total).cyan());
    if stats.keys_updated > 0 {
        println!("  Updated: {}", style(stats.keys_updated).yellow());
    }
    if stats.keys_removed > 0 {
        println!("  Removed: {}", style(stats.keys_removed).red());
    }
    if stats.warnings > 0 {
        println!(
            "  {} {} malformed metadata entr{} skipped (run with -v for details)",
            style("!").yellow(),
            stats.warnings,
            if stats.warnings == 1 { "y" } else { "ies" }
        );
    }
}

fn run_status(global: &GlobalOpts) -> Result<()> {
    let (_collection, config, cache) = open_index(global)?;
    let state = cache.state()?;
    let stats = cache.statistics()?;

    let format = global.format.or_configured(config.default_format.as_deref());
    if matches!(format, OutputFormat::Json | OutputFormat::Yaml) {
        let value = serde_json::json!({
            "path": cache.path(),
            "state": state,
            "statistics": stats,
        });
        if format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&value).into_diagnostic()?);
        } else {
            print!("{}", serde_yml::to_string(&value).into_diagnostic()?);
        }
        return Ok(());
    }

    println!("{}", style("Index Status").bold());
    println!("{}", style("─".repeat(40)).dim());
    println!("  Location:        {}", cache.path().display());

    match &state {
        Some(state) => {
            println!("  Branch:          {}", style(&state.branch).cyan());
            println!(
                "  Branch commit:   {}",
                state.branch_commit.as_deref().unwrap_or("(branch missing)")
            );
            println!(
                "  HEAD:            {}",
                state.head_commit.as_deref().unwrap_or("(unborn)")
            );
            println!(
                "  Synchronized:    {}",
                state.synced_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if state.warnings > 0 {
                println!("  Warnings:        {}", style(state.warnings).yellow());
            }
        }
        None => {
            println!(
                "  Synchronized:    {} (run `crate-index index build`)",
                style("never").yellow()
            );
        }
    }

    println!("  Tracks:          {}", style(stats.total_tracks).cyan());
    println!("  Present locally: {}", style(stats.present_tracks).cyan());
    println!("  Metadata logs:   {}", stats.metadata_objects);
    println!("  Database size:   {}", format_size(stats.db_size_bytes));

    if !stats.values_by_field.is_empty() {
        println!();
        println!("  {}", style("Multi-valued fields:").bold());
        let mut fields: Vec<_> = stats.values_by_field.iter().collect();
        fields.sort_by_key(|(k, _)| *k);
        for (field, count) in fields {
            println!("    {:<6} {}", field, count);
        }
    }

    Ok(())
}

fn run_query(sql: &str, global: &GlobalOpts) -> Result<()> {
    let (_collection, config, cache) = open_index(global)?;

    let columns = cache.query_columns(sql)?;
    let rows = cache.query_raw(sql)?;

    let format = global.format.or_configured(config.default_format.as_deref());
    write_rows(std::io::stdout().lock(), format, &columns, &rows)
}

fn run_clear(global: &GlobalOpts) -> Result<()> {
    let collection = discover_collection(global)?;
    let removed = delete_index(&collection.index_path())?;

    if !global.quiet {
        if removed {
            println!("{} Index cleared", style("✓").green());
        } else {
            println!("{} No index to clear", style("✓").green());
        }
    }

    Ok(())
}
