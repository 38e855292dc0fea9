use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::api;
use crate::autocomplete::{self, Availability, AvailabilityField, FieldKey, QueryDebouncer};
use crate::config::{self, Config};
use crate::data::{self, ImageLoader, SuggestionSource};
use crate::dispatch::{self, Response};
use crate::engagement::Viewer;
use crate::feed::FeedOptions;
use crate::media;
use crate::model::ResourceScope;
use crate::preferences::Preferences;
use crate::storage;
use crate::ui;

const LOG_ENV: &str = "IMGFLOW_LOG";
const LOG_FILE: &str = "imgflow.log";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub scope: ResourceScope,
    pub config_file: Option<PathBuf>,
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = load_config(options.config_file.clone())?;
    let _log_guard = init_logging(&cfg);

    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);
    let preferences = Preferences::new(store.clone());
    let client = Arc::new(build_client(&cfg)?);
    let backend = Arc::new(data::ApiBackend::new(client.clone()));

    let media_cfg = media::Config {
        cache_dir: cfg.media.cache_dir.clone(),
        max_size_bytes: cfg.media.max_size_bytes,
        default_ttl: cfg.media.default_ttl,
        workers: cfg.media.workers,
        base_url: Some(client.base_url().clone()),
        http_client: None,
    };
    let thumbnails = match media::ThumbnailCache::new(store.clone(), media_cfg) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "app: thumbnail cache unavailable");
            None
        }
    };
    let images: Arc<dyn ImageLoader> = match &thumbnails {
        Some(cache) => cache.clone(),
        None => Arc::new(data::InstantImages),
    };
    let thumbnail_size = thumbnails.clone().map(|cache| {
        let lookup: ui::ThumbnailSize = Arc::new(move |url: &str| {
            cache
                .lookup(url)
                .map(|entry| (entry.width.max(0) as u32, entry.height.max(0) as u32))
        });
        lookup
    });

    let viewer = viewer_from(&cfg);
    let status_message = match &viewer {
        Viewer::Member { username } => format!("Signed in as {username}. Loading posts…"),
        Viewer::Guest => "Browsing as guest. Loading posts…".to_string(),
    };

    let mut model = ui::Model::new(ui::Options {
        services: ui::Services {
            content: backend.clone(),
            comments: backend.clone(),
            votes: backend.clone(),
            suggestions: backend.clone(),
            publisher: backend,
            images,
            thumbnail_size,
        },
        preferences,
        viewer,
        scope: options.scope,
        feed: FeedOptions {
            page_size: cfg.feed.page_size,
            scroll_threshold: cfg.feed.scroll_threshold,
        },
        comments_page_size: cfg.comments.page_size,
        debounce: cfg.autocomplete.debounce,
        links: Some(client),
        status_message,
    });
    model.run()?;

    drop(model);
    drop(thumbnails);
    info!("app: exiting");
    Ok(())
}

/// Asks the server whether `name` is free, through the same debounced
/// lookup the sign-up form uses.
pub fn check_username(name: &str, config_file: Option<PathBuf>) -> Result<Availability> {
    let cfg = load_config(config_file)?;
    let client = Arc::new(build_client(&cfg)?);
    let source: Arc<dyn SuggestionSource> = Arc::new(data::ApiBackend::new(client));
    Ok(check_availability(name, &source, &cfg))
}

fn check_availability(name: &str, source: &Arc<dyn SuggestionSource>, cfg: &Config) -> Availability {
    let (dispatcher, mailbox) = dispatch::inline_channel();
    let mut debouncer = QueryDebouncer::new();
    let mut field = AvailabilityField::new(FieldKey::Username, cfg.autocomplete.debounce);

    let now = Instant::now();
    field.on_input(name, now, &mut debouncer);
    autocomplete::run_due(&mut debouncer, now + cfg.autocomplete.debounce, source, &dispatcher);
    for response in mailbox.drain() {
        if let Response::Availability {
            query_id, result, ..
        } = response
        {
            field.handle_availability(query_id, result);
        }
    }
    field.status().clone()
}

fn load_config(config_file: Option<PathBuf>) -> Result<Config> {
    config::load(config::LoadOptions {
        config_file,
        ..Default::default()
    })
    .context("load config")
}

fn build_client(cfg: &Config) -> Result<api::Client> {
    api::Client::new(api::ClientConfig {
        base_url: cfg.server.base_url.clone(),
        user_agent: cfg.server.user_agent.clone(),
        session_cookie: Some(cfg.server.session_cookie.clone()),
        http_client: None,
    })
    .context("build api client")
}

fn viewer_from(cfg: &Config) -> Viewer {
    let cookie = cfg.server.session_cookie.trim();
    let username = cfg.server.username.trim();
    match (cookie.is_empty(), username.is_empty()) {
        (false, false) => Viewer::Member {
            username: username.to_string(),
        },
        (false, true) => {
            warn!("app: session cookie set without a username, browsing as guest");
            Viewer::Guest
        }
        _ => Viewer::Guest,
    }
}

/// Logs go to a file in the cache dir; the terminal belongs to the UI.
fn init_logging(cfg: &Config) -> Option<WorkerGuard> {
    let dir = cfg.media.cache_dir.clone()?;
    fs::create_dir_all(&dir).ok()?;
    let appender = tracing_appender::rolling::never(&dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()
        .map(|()| guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockSuggestionSource;

    fn source() -> Arc<dyn SuggestionSource> {
        Arc::new(MockSuggestionSource::new(Vec::<String>::new()))
    }

    #[test]
    fn username_check_reports_taken_and_free() {
        let cfg = Config::default();
        assert_eq!(check_availability("cat", &source(), &cfg), Availability::Taken);
        assert_eq!(check_availability("kitten", &source(), &cfg), Availability::Available);
        assert_eq!(check_availability("  ", &source(), &cfg), Availability::Unknown);
    }

    #[test]
    fn members_need_cookie_and_username() {
        let mut cfg = Config::default();
        assert_eq!(viewer_from(&cfg), Viewer::Guest);
        cfg.server.session_cookie = "abc".into();
        assert_eq!(viewer_from(&cfg), Viewer::Guest);
        cfg.server.username = "cat".into();
        assert_eq!(
            viewer_from(&cfg),
            Viewer::Member {
                username: "cat".into()
            }
        );
    }
}
