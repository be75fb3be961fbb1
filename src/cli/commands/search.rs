//! `crate-index search` command - Query tracks by metadata
//!
//! The query is parsed and validated before the collection is touched, so a
//! typo fails fast even outside a repository. Before running, the index is
//! refreshed unless another process is already building it.

use console::style;
use miette::{IntoDiagnostic, Result};
use tracing::debug;

use crate::cli::helpers::open_index;
use crate::cli::output::TrackSink;
use crate::cli::GlobalOpts;
use crate::core::AnnexStore;
use crate::query::{parse, CompiledQuery, SearchQuery};

#[derive(clap::Args, Debug)]
pub struct SearchArgs {
    /// Query words, e.g. `artist:burial bpm:>130 -crate:warmup | genre:dub`
    ///
    /// With no query every indexed track is listed.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub query: Vec<String>,

    /// Limit number of results
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,

    /// Show only the number of matching tracks
    #[arg(long)]
    pub count: bool,

    /// Search the index as it is, without refreshing it first
    #[arg(long)]
    pub no_refresh: bool,

    /// Print the parsed query and its SQL condition instead of running it
    #[arg(long)]
    pub explain: bool,
}

impl SearchArgs {
    fn query_text(&self) -> String {
        self.query.join(" ")
    }

    fn parsed(&self) -> Result<SearchQuery> {
        let text = self.query_text();
        if text.trim().is_empty() {
            return Ok(SearchQuery::match_all());
        }
        Ok(parse(&text)?)
    }
}

pub fn run(args: SearchArgs, global: &GlobalOpts) -> Result<()> {
    let query = args.parsed()?;
    let compiled = CompiledQuery::compile(&query)?;

    if args.explain {
        let value = serde_json::json!({
            "query": args.query_text(),
            "parsed": query,
            "compiled": compiled,
        });
        println!("{}", serde_json::to_string_pretty(&value).into_diagnostic()?);
        return Ok(());
    }

    let (collection, config, mut cache) = open_index(global)?;

    if config.auto_refresh() && !args.no_refresh {
        let store = AnnexStore::new(collection.root());
        match cache.try_build(&store, config.branch(), false)? {
            Some(stats) => debug!(mode = %stats.mode, tracks = stats.keys_total, "index refreshed"),
            None => {
                if !global.quiet {
                    eprintln!(
                        "{} index is being rebuilt elsewhere; results may be stale",
                        style("!").yellow()
                    );
                }
            }
        }
    }

    if args.count {
        println!("{}", compiled.count(&cache)?);
        return Ok(());
    }

    let compiled = compiled.with_limit(args.limit.or(config.default_limit));
    let format = global.format.or_configured(config.default_format.as_deref());

    let mut sink = TrackSink::new(std::io::stdout().lock(), format)?;
    let mut failed = None;
    let shown = compiled.for_each(&cache, |track| {
        if failed.is_none() {
            if let Err(e) = sink.write(track) {
                failed = Some(e);
            }
        }
    })?;
    if let Some(e) = failed {
        return Err(e);
    }
    sink.finish()?;

    if shown == 0 && !global.quiet {
        eprintln!("{}", style("No matching tracks").dim());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> SearchArgs {
        SearchArgs {
            query: words.iter().map(|w| w.to_string()).collect(),
            limit: None,
            count: false,
            no_refresh: false,
            explain: false,
        }
    }

    #[test]
    fn test_empty_query_lists_everything() {
        assert_eq!(args(&[]).parsed().unwrap(), SearchQuery::match_all());
    }

    #[test]
    fn test_words_are_joined() {
        let parsed = args(&["artist:burial", "|", "genre:dub"]).parsed().unwrap();
        assert_eq!(parsed.groups.len(), 2);
    }

    #[test]
    fn test_bad_query_fails() {
        assert!(args(&["bpm:>fast"]).parsed().is_err());
    }
}
