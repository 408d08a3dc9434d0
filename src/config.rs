//! Configuration for the indexing gateway.
//!
//! Layered loading in the usual order: built-in defaults, then
//! `feedsearch.toml`, then environment variables prefixed with `FEEDSEARCH_`
//! (double underscore separates nested levels, e.g.
//! `FEEDSEARCH_TUNING__PACING_MS=500`).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Where the index lives: a directory on disk, or RAM for ephemeral use.
    #[serde(default)]
    pub index: IndexLocation,

    /// Language tag used when an operation carries no culture,
    /// e.g. "en" or "en-US".
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Writer and worker tuning knobs.
    #[serde(default)]
    pub tuning: Tuning,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backing store for the index.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IndexLocation {
    Disk { path: PathBuf },
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Tuning {
    /// Segments accumulated before the merge policy schedules a merge.
    #[serde(default = "default_merge_factor")]
    pub merge_factor: usize,

    /// Buffered mutations before the writer commits a segment. Sized for a
    /// feed of ~50 items (~100 KB) as the working-set heuristic.
    #[serde(default = "default_buffered_docs")]
    pub buffered_docs: usize,

    /// Pause between drain batches, amortizing writer open/close across
    /// bursts from feed-refresh waves.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level filter ("error", "warn", "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `worker = "debug"`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_language() -> String {
    "en".to_string()
}
fn default_merge_factor() -> usize {
    20
}
fn default_buffered_docs() -> usize {
    50
}
fn default_pacing_ms() -> u64 {
    5000
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index: IndexLocation::default(),
            default_language: default_language(),
            tuning: Tuning::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexLocation {
    fn default() -> Self {
        IndexLocation::Disk {
            path: PathBuf::from(".feedsearch/index"),
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            merge_factor: default_merge_factor(),
            buffered_docs: default_buffered_docs(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file("feedsearch.toml"))
            .merge(Env::prefixed("FEEDSEARCH_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Settings backed by RAM, for tests and ephemeral hosts.
    pub fn in_memory() -> Self {
        Self {
            index: IndexLocation::Memory,
            ..Self::default()
        }
    }

    /// Settings backed by a directory on disk.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            index: IndexLocation::Disk { path: path.into() },
            ..Self::default()
        }
    }
}
