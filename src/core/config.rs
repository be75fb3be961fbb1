//! Configuration management with layered hierarchy

use serde::Deserialize;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::core::Collection;

/// Metadata branch mirrored by default
pub const DEFAULT_BRANCH: &str = "git-annex";

/// crate-index configuration with layered hierarchy
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Branch holding the metadata logs
    pub branch: Option<String>,

    /// Refresh the index before searching
    pub auto_refresh: Option<bool>,

    /// Row limit applied to searches without `--limit`
    pub default_limit: Option<usize>,

    /// Default output format
    pub default_format: Option<String>,
}

impl Config {
    /// Load configuration from all sources, merging in priority order
    pub fn load(collection: Option<&Collection>) -> Self {
        let mut config = Config::default();

        // 1. Built-in defaults (accessors below)

        // 2. Global user config (~/.config/crate-index/config.yaml)
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global) = Self::read_file(&global_path) {
                config.merge(global);
            }
        }

        // 3. Collection config (.crate-index.yaml)
        if let Some(collection) = collection {
            if let Some(local) = Self::read_file(&collection.config_path()) {
                config.merge(local);
            }
        }

        // 4. Environment variables
        config.merge(Self::from_env(|name| std::env::var(name).ok()));

        config
    }

    fn read_file(path: &Path) -> Option<Config> {
        if !path.exists() {
            return None;
        }
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_yml::from_str::<Config>(&contents) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
                None
            }
        }
    }

    /// Read `CRATE_INDEX_*` variables through `lookup`
    fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Config {
        Config {
            branch: lookup("CRATE_INDEX_BRANCH").filter(|b| !b.is_empty()),
            auto_refresh: lookup("CRATE_INDEX_AUTO_REFRESH").and_then(|v| parse_bool(&v)),
            default_limit: lookup("CRATE_INDEX_LIMIT").and_then(|v| v.parse().ok()),
            default_format: lookup("CRATE_INDEX_FORMAT").filter(|f| !f.is_empty()),
        }
    }

    /// Get the path to the global config file
    fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "crate-index")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Merge another config into this one (other takes precedence)
    fn merge(&mut self, other: Config) {
        if other.branch.is_some() {
            self.branch = other.branch;
        }
        if other.auto_refresh.is_some() {
            self.auto_refresh = other.auto_refresh;
        }
        if other.default_limit.is_some() {
            self.default_limit = other.default_limit;
        }
        if other.default_format.is_some() {
            self.default_format = other.default_format;
        }
    }

    /// The metadata branch name
    pub fn branch(&self) -> &str {
        self.branch.as_deref().unwrap_or(DEFAULT_BRANCH)
    }

    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh.unwrap_or(true)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.branch(), "git-annex");
        assert!(config.auto_refresh());
        assert_eq!(config.default_limit, None);
    }

    #[test]
    fn test_merge_prefers_later_layer() {
        let mut config: Config = serde_yml::from_str("branch: meta\ndefault_limit: 50\n").unwrap();
        let local: Config = serde_yml::from_str("auto_refresh: false\ndefault_limit: 10\n").unwrap();
        config.merge(local);

        assert_eq!(config.branch(), "meta");
        assert!(!config.auto_refresh());
        assert_eq!(config.default_limit, Some(10));
    }

    #[test]
    fn test_env_layer() {
        let vars: HashMap<&str, &str> = [
            ("CRATE_INDEX_BRANCH", "annex-meta"),
            ("CRATE_INDEX_AUTO_REFRESH", "no"),
            ("CRATE_INDEX_LIMIT", "bogus"),
        ]
        .into_iter()
        .collect();
        let env = Config::from_env(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(env.branch.as_deref(), Some("annex-meta"));
        assert_eq!(env.auto_refresh, Some(false));
        assert_eq!(env.default_limit, None);
        assert_eq!(env.default_format, None);
    }

    #[test]
    fn test_collection_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".crate-index.yaml"), "default_format: json\n").unwrap();

        let collection = Collection::discover_from(tmp.path()).unwrap();
        let local = Config::read_file(&collection.config_path()).unwrap();
        assert_eq!(local.default_format.as_deref(), Some("json"));
    }
}
