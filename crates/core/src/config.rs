//! Config file parsing for `~/.config/audible-metadata/config.toml`.
//!
//! Use `lookup_options_from_config` and `genre_map_from_config` to turn the
//! loaded config into the values an `AudibleSource` is built from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::genres::GenreTagMap;
use crate::identify::LookupOptions;
use crate::query::Endpoints;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub genres: GenreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_detail_host")]
    pub detail_host: String,
    #[serde(default = "default_site_host")]
    pub site_host: String,
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_detail_timeout")]
    pub detail_timeout_secs: u64,
    #[serde(default = "default_stagger")]
    pub stagger_ms: u64,
    #[serde(default = "default_poll")]
    pub poll_ms: u64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

fn default_api_host() -> String {
    Endpoints::AUDIBLE_API_URL.to_string()
}
fn default_detail_host() -> String {
    Endpoints::AUDNEXUS_URL.to_string()
}
fn default_site_host() -> String {
    Endpoints::AUDIBLE_URL.to_string()
}
fn default_search_timeout() -> u64 {
    30
}
fn default_detail_timeout() -> u64 {
    20
}
fn default_stagger() -> u64 {
    100
}
fn default_poll() -> u64 {
    200
}
fn default_max_results() -> u32 {
    25
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            api_host: default_api_host(),
            detail_host: default_detail_host(),
            site_host: default_site_host(),
            search_timeout_secs: default_search_timeout(),
            detail_timeout_secs: default_detail_timeout(),
            stagger_ms: default_stagger(),
            poll_ms: default_poll(),
            max_results: default_max_results(),
        }
    }
}

/// User-editable genre → tag table. Keys are matched case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenreConfig {
    #[serde(default)]
    pub mappings: BTreeMap<String, Vec<String>>,
}

impl Default for GenreConfig {
    fn default() -> Self {
        let table: &[(&str, &[&str])] = &[
            ("Biographies & Memoirs", &["Biography"]),
            ("Business & Careers", &["Business"]),
            ("Children's Audiobooks", &["Children's"]),
            ("Comedy & Humor", &["Humour"]),
            ("Fantasy", &["Fantasy"]),
            ("Health & Wellness", &["Health"]),
            ("History", &["History"]),
            ("Horror", &["Horror"]),
            ("Literature & Fiction", &["Fiction"]),
            ("Mystery, Thriller & Suspense", &["Mystery", "Thriller"]),
            ("Politics & Social Sciences", &["Politics"]),
            ("Relationships, Parenting & Personal Development", &["Self Help"]),
            ("Religion & Spirituality", &["Religion"]),
            ("Romance", &["Romance"]),
            ("Science & Engineering", &["Science"]),
            ("Science Fiction", &["Science Fiction"]),
            ("Science Fiction & Fantasy", &["Science Fiction", "Fantasy"]),
            ("Teen & Young Adult", &["Young Adult"]),
        ];
        let mappings = table
            .iter()
            .map(|(genre, tags)| {
                (
                    genre.to_string(),
                    tags.iter().map(|t| t.to_string()).collect(),
                )
            })
            .collect();
        Self { mappings }
    }
}

/// Load config from the default path (`~/.config/audible-metadata/config.toml`).
/// A missing or unreadable file yields the defaults.
pub fn load_config() -> AppConfig {
    let Some(path) = config_path() else {
        return AppConfig::default();
    };
    match load_config_from(&path) {
        Ok(cfg) => cfg,
        Err(ConfigError::Io(_)) => AppConfig::default(),
        Err(e) => {
            tracing::warn!("Ignoring config at {}: {}", path.display(), e);
            AppConfig::default()
        }
    }
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<AppConfig>(&content)?)
}

pub fn save_config_to(cfg: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

/// Return the default config file path (for init and show).
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("audible-metadata");
        p.push("config.toml");
        p
    })
}

/// Set a dotted key such as `lookup.stagger_ms`. Genre mappings are set as
/// `genres.<genre name>` with a comma-separated tag list; an empty list
/// removes the mapping.
pub fn set_config_key(cfg: &mut AppConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    match key.split_once('.') {
        Some(("lookup", sub)) => match sub {
            "api_host" => cfg.lookup.api_host = value.to_string(),
            "detail_host" => cfg.lookup.detail_host = value.to_string(),
            "site_host" => cfg.lookup.site_host = value.to_string(),
            "search_timeout_secs" => cfg.lookup.search_timeout_secs = number(key, value)?,
            "detail_timeout_secs" => cfg.lookup.detail_timeout_secs = number(key, value)?,
            "stagger_ms" => cfg.lookup.stagger_ms = number(key, value)?,
            "poll_ms" => cfg.lookup.poll_ms = number(key, value)?,
            "max_results" => cfg.lookup.max_results = number(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        },
        Some(("genres", genre)) if !genre.is_empty() => {
            let tags: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
            if tags.is_empty() {
                cfg.genres.mappings.remove(genre);
            } else {
                cfg.genres.mappings.insert(genre.to_string(), tags);
            }
        }
        _ => return Err(ConfigError::UnknownKey(key.to_string())),
    }
    Ok(())
}

pub fn endpoints_from_config(c: &LookupConfig) -> Endpoints {
    Endpoints {
        api_host: c.api_host.trim_end_matches('/').to_string(),
        detail_host: c.detail_host.trim_end_matches('/').to_string(),
        site_host: c.site_host.trim_end_matches('/').to_string(),
        max_results: c.max_results,
    }
}

pub fn lookup_options_from_config(c: &LookupConfig) -> LookupOptions {
    LookupOptions {
        search_timeout: Duration::from_secs(c.search_timeout_secs.max(1)),
        detail_timeout: Duration::from_secs(c.detail_timeout_secs.max(1)),
        stagger: Duration::from_millis(c.stagger_ms),
        poll_interval: Duration::from_millis(c.poll_ms.max(1)),
    }
}

pub fn genre_map_from_config(c: &GenreConfig) -> GenreTagMap {
    GenreTagMap::from_table(&c.mappings)
}
