//! Incremental gallery loading.
//!
//! A [`FeedLoader`] pages through one [`ResourceScope`], appending each page
//! into its render sink as the reader nears the bottom. A fetch is only
//! finished once the thumbnails it introduced have settled and the sink has
//! been relaid out; until then further scroll triggers are dropped.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::data::{ContentSource, ImageLoader, RenderSink};
use crate::dispatch::{Dispatcher, Response};
use crate::model::{ContentItem, PageCursor, ResourceScope, SortKey};

pub const POSTS_PER_PAGE: usize = 20;
/// Distance from the bottom of the content, in content units, that counts
/// as "near the bottom".
pub const SCROLL_FETCH_THRESHOLD: f32 = 400.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub viewport_height: f32,
    pub scroll_offset: f32,
    pub content_height: f32,
}

impl ScrollMetrics {
    pub fn distance_to_bottom(&self) -> f32 {
        self.content_height - (self.viewport_height + self.scroll_offset)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeedOptions {
    pub page_size: usize,
    pub scroll_threshold: f32,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            page_size: POSTS_PER_PAGE,
            scroll_threshold: SCROLL_FETCH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fetching,
    SettlingImages,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    request_id: u64,
    page: u32,
    stage: Stage,
}

pub struct FeedLoader<S> {
    source: Arc<dyn ContentSource>,
    images: Arc<dyn ImageLoader>,
    dispatcher: Dispatcher,
    sink: S,
    scope: ResourceScope,
    cursor: PageCursor,
    options: FeedOptions,
    monitoring: bool,
    in_flight: Option<InFlight>,
    rendered: usize,
}

impl<S: RenderSink<ContentItem>> FeedLoader<S> {
    pub fn new(
        source: Arc<dyn ContentSource>,
        images: Arc<dyn ImageLoader>,
        dispatcher: Dispatcher,
        sink: S,
        scope: ResourceScope,
        options: FeedOptions,
    ) -> Self {
        Self {
            source,
            images,
            dispatcher,
            sink,
            scope,
            cursor: PageCursor::new(SortKey::default()),
            options: FeedOptions {
                page_size: options.page_size.max(1),
                ..options
            },
            monitoring: false,
            in_flight: None,
            rendered: 0,
        }
    }

    pub fn initialize(&mut self, sort: SortKey) {
        self.cursor = PageCursor::new(sort);
        self.monitoring = true;
        self.fetch(0);
    }

    pub fn reload(&mut self, sort: SortKey) {
        self.sink.clear();
        self.rendered = 0;
        self.cursor = PageCursor::new(sort);
        // Monitoring is dropped once a listing runs dry; re-arm it.
        self.monitoring = true;
        self.fetch(0);
    }

    pub fn set_scope(&mut self, scope: ResourceScope) {
        self.scope = scope;
        self.reload(self.cursor.sort);
    }

    pub fn on_scroll(&mut self, metrics: ScrollMetrics) {
        if metrics.distance_to_bottom() <= self.options.scroll_threshold {
            self.on_scroll_proximity();
        }
    }

    pub fn on_scroll_proximity(&mut self) {
        if !self.monitoring || self.cursor.exhausted {
            return;
        }
        if self.in_flight.is_some() {
            debug!(page = self.cursor.index, "feed: fetch in flight, scroll trigger dropped");
            return;
        }
        self.fetch(self.cursor.next_page());
    }

    fn fetch(&mut self, page: u32) {
        let request_id = self.dispatcher.ticket();
        if let Some(previous) = self.in_flight.replace(InFlight {
            request_id,
            page,
            stage: Stage::Fetching,
        }) {
            debug!(request_id = previous.request_id, "feed: superseding in-flight fetch");
        }

        info!(scope = %self.scope.describe(), page, sort = %self.cursor.sort, "feed: fetching page");
        let source = self.source.clone();
        let scope = self.scope.clone();
        let sort = self.cursor.sort;
        self.dispatcher.spawn(move || Response::FeedPage {
            request_id,
            page,
            result: source.fetch_page(&scope, page, sort),
        });
    }

    /// Applies a fetched page. A failure leaves the cursor where it was so
    /// the next scroll trigger retries the same page.
    pub fn handle_page(
        &mut self,
        request_id: u64,
        page: u32,
        result: Result<Vec<ContentItem>>,
    ) -> Result<()> {
        let Some(current) = self.in_flight else {
            debug!(request_id, "feed: page arrived with nothing in flight");
            return Ok(());
        };
        if current.request_id != request_id || current.stage != Stage::Fetching {
            debug!(request_id, "feed: discarding superseded page");
            return Ok(());
        }

        let items = match result {
            Ok(items) => items,
            Err(err) => {
                warn!(page, error = %format!("{err:#}"), "feed: page fetch failed");
                self.in_flight = None;
                return Err(err);
            }
        };

        self.cursor.advance(page);
        self.sink.append(&items);
        self.rendered += items.len();

        if items.len() < self.options.page_size {
            info!(page, count = items.len(), "feed: listing exhausted");
            self.cursor.exhausted = true;
            self.monitoring = false;
        }

        self.in_flight = Some(InFlight {
            stage: Stage::SettlingImages,
            ..current
        });
        let images = self.images.clone();
        let urls: Vec<String> = items
            .iter()
            .map(|item| item.thumbnail_url.clone())
            .filter(|url| !url.is_empty())
            .collect();
        self.dispatcher.spawn(move || {
            images.settle(&urls);
            Response::FeedImagesSettled { request_id }
        });
        Ok(())
    }

    pub fn handle_images_settled(&mut self, request_id: u64) {
        match self.in_flight {
            Some(current)
                if current.request_id == request_id && current.stage == Stage::SettlingImages =>
            {
                self.sink.relayout();
                self.in_flight = None;
            }
            _ => debug!(request_id, "feed: ignoring stale image barrier"),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    pub fn scope(&self) -> &ResourceScope {
        &self.scope
    }

    pub fn rendered(&self) -> usize {
        self.rendered
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
