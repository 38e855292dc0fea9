use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_BASE_URL;
use crate::autocomplete::DEFAULT_DEBOUNCE;
use crate::comments::COMMENTS_PER_PAGE;
use crate::feed::{POSTS_PER_PAGE, SCROLL_FETCH_THRESHOLD};

const DEFAULT_ENV_PREFIX: &str = "IMGFLOW";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub comments: CommentsConfig,
    #[serde(default)]
    pub autocomplete: AutocompleteConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Session cookie of a logged-in member; guests leave it empty.
    #[serde(default)]
    pub session_cookie: String,
    /// Username the session belongs to.
    #[serde(default)]
    pub username: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            session_cookie: String::new(),
            username: String::new(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("imgflow-tui/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_feed_page_size")]
    pub page_size: usize,
    /// Distance from the bottom, in rows, that triggers the next page.
    #[serde(default = "default_scroll_threshold")]
    pub scroll_threshold: f32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_feed_page_size(),
            scroll_threshold: default_scroll_threshold(),
        }
    }
}

fn default_feed_page_size() -> usize {
    POSTS_PER_PAGE
}

fn default_scroll_threshold() -> f32 {
    SCROLL_FETCH_THRESHOLD
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentsConfig {
    #[serde(default = "default_comments_page_size")]
    pub page_size: usize,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            page_size: default_comments_page_size(),
        }
    }
}

fn default_comments_page_size() -> usize {
    COMMENTS_PER_PAGE
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutocompleteConfig {
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for AutocompleteConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
        }
    }
}

fn default_debounce() -> Duration {
    DEFAULT_DEBOUNCE
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: i64,
    #[serde(default = "default_media_ttl_duration", with = "humantime_serde")]
    pub default_ttl: Duration,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_size_bytes: default_max_size_bytes(),
            default_ttl: default_media_ttl_duration(),
            workers: default_workers(),
        }
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("imgflow"))
}

fn default_max_size_bytes() -> i64 {
    200 * 1024 * 1024
}

fn default_media_ttl_duration() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    let path = options.config_file.clone().or_else(default_config_path);
    if let Some(path) = path.filter(|path| path.exists()) {
        cfg = read_config_file(&path)?;
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("config: read {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("config: parse {}", path.display()))?;
    Ok(config)
}

/// Applies `<PREFIX>_SECTION__FIELD` variables on top of `cfg`.
fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    let overrides: HashMap<String, String> = env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&upper_prefix)
                .map(|stripped| (stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect();

    for (key, value) in overrides {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "server.base_url" => cfg.server.base_url = value,
        "server.user_agent" => cfg.server.user_agent = value,
        "server.session_cookie" => cfg.server.session_cookie = value,
        "server.username" => cfg.server.username = value,
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.feed.page_size = parsed.max(1);
            }
        }
        "feed.scroll_threshold" => {
            if let Ok(parsed) = value.parse::<f32>() {
                cfg.feed.scroll_threshold = parsed;
            }
        }
        "comments.page_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.comments.page_size = parsed.max(1);
            }
        }
        "autocomplete.debounce" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.autocomplete.debounce = duration;
            }
        }
        "media.cache_dir" => cfg.media.cache_dir = Some(PathBuf::from(value)),
        "media.max_size_bytes" => {
            if let Ok(parsed) = value.parse::<i64>() {
                cfg.media.max_size_bytes = parsed;
            }
        }
        "media.default_ttl" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.media.default_ttl = duration;
            }
        }
        "media.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.workers = parsed;
            }
        }
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("imgflow").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn isolated(dir: &Path, prefix: &str) -> LoadOptions {
        LoadOptions {
            config_file: Some(dir.join("missing.yaml")),
            env_prefix: Some(prefix.into()),
        }
    }

    #[test]
    fn defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(isolated(dir.path(), "IMGFLOW_TEST_DEFAULTS")).unwrap();
        assert_eq!(cfg.feed.page_size, 20);
        assert_eq!(cfg.comments.page_size, 30);
        assert_eq!(cfg.autocomplete.debounce, Duration::from_millis(300));
        assert_eq!(cfg.server.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn file_values_and_humantime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "server:\n  base_url: https://imgflow.example/\nautocomplete:\n  debounce: 150ms\nmedia:\n  default_ttl: 2h\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("IMGFLOW_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.server.base_url, "https://imgflow.example/");
        assert_eq!(cfg.autocomplete.debounce, Duration::from_millis(150));
        assert_eq!(cfg.media.default_ttl, Duration::from_secs(7200));
        assert_eq!(cfg.feed.page_size, 20);
    }

    #[test]
    fn env_overrides() {
        let dir = tempdir().unwrap();
        env::set_var("IMGFLOW_TEST_ENV_FEED__PAGE_SIZE", "12");
        env::set_var("IMGFLOW_TEST_ENV_SERVER__USERNAME", "cat");
        let cfg = load(isolated(dir.path(), "IMGFLOW_TEST_ENV")).unwrap();
        env::remove_var("IMGFLOW_TEST_ENV_FEED__PAGE_SIZE");
        env::remove_var("IMGFLOW_TEST_ENV_SERVER__USERNAME");
        assert_eq!(cfg.feed.page_size, 12);
        assert_eq!(cfg.server.username, "cat");
    }
}
