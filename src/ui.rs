use std::collections::HashMap;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use tracing::{debug, info, warn};
use unicode_width::UnicodeWidthStr;

use crate::api;
use crate::autocomplete::{self, FieldAction, FieldKey, Focus, NavKey, QueryDebouncer, SuggestionField, SuggestionState};
use crate::comments::{self, CommentNode, CommentThread};
use crate::composer::{self, Composer};
use crate::data::{
    CommentSource, ContentSource, ImageLoader, PostPublisher, RenderSink, SuggestionSource,
    VoteService,
};
use crate::dispatch::{self, Dispatcher, Mailbox, Response};
use crate::engagement::{self, Engagement, Interaction, Viewer, VoteTarget};
use crate::error::{InteractionError, Notice};
use crate::feed::{FeedLoader, FeedOptions, ScrollMetrics};
use crate::markup;
use crate::model::{ContentItem, FlowCard, PostDetail, PostId, ResourceScope};
use crate::preferences::Preferences;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);
const COMMENT_DEPTH_COLORS: [Color; 6] = [
    Color::Rgb(250, 179, 135),
    Color::Rgb(166, 227, 161),
    Color::Rgb(203, 166, 247),
    Color::Rgb(245, 194, 231),
    Color::Rgb(137, 220, 235),
    Color::Rgb(249, 226, 175),
];

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const TICK_RATE: Duration = Duration::from_millis(120);
const RELATIVE_TIME_REFRESH: Duration = Duration::from_secs(30);

/// Content units per terminal row, so scroll thresholds read like pixels.
pub const ROW_UNITS: f32 = 16.0;
const MIN_COLUMN_WIDTH: u16 = 24;
const TILE_CHROME_ROWS: u16 = 3;
const DEFAULT_THUMB_ROWS: u16 = 6;
const MIN_THUMB_ROWS: u16 = 3;
const MAX_THUMB_ROWS: u16 = 16;

fn comment_depth_color(depth: usize) -> Color {
    COMMENT_DEPTH_COLORS[depth % COMMENT_DEPTH_COLORS.len()]
}

/// Pixel size of a settled thumbnail, when known.
pub type ThumbnailSize = Arc<dyn Fn(&str) -> Option<(u32, u32)> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub column: usize,
    pub top: u16,
    pub height: u16,
    pub size: Option<(u32, u32)>,
}

impl Placement {
    fn bottom(&self) -> u16 {
        self.top.saturating_add(self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Up,
    Down,
    Left,
    Right,
}

/// Masonry gallery. Appended posts stay unplaced until the next relayout,
/// which drops each tile into the currently shortest column.
pub struct GallerySink {
    items: Vec<ContentItem>,
    placements: Vec<Placement>,
    columns: usize,
    column_width: u16,
    content_rows: u16,
    sizes: Option<ThumbnailSize>,
}

impl GallerySink {
    pub fn new(sizes: Option<ThumbnailSize>) -> Self {
        Self {
            items: Vec::new(),
            placements: Vec::new(),
            columns: 1,
            column_width: MIN_COLUMN_WIDTH,
            content_rows: 0,
            sizes,
        }
    }

    /// Fits the column count to `width`; relays out when it changed.
    pub fn resize(&mut self, width: u16) -> bool {
        let columns = (width / MIN_COLUMN_WIDTH).max(1);
        let column_width = (width / columns).max(1);
        if columns as usize == self.columns && column_width == self.column_width {
            return false;
        }
        self.columns = columns as usize;
        self.column_width = column_width;
        if !self.placements.is_empty() {
            self.relayout();
        }
        true
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn column_width(&self) -> u16 {
        self.column_width
    }

    pub fn content_rows(&self) -> u16 {
        self.content_rows
    }

    /// Nearest placed tile from `index` in the given direction.
    pub fn step(&self, index: usize, step: Step) -> Option<usize> {
        let current = self.placements.get(index)?;
        let candidates = self.placements.iter().enumerate().filter(|(i, _)| *i != index);
        match step {
            Step::Down => candidates
                .filter(|(_, p)| p.column == current.column && p.top > current.top)
                .min_by_key(|(_, p)| p.top)
                .map(|(i, _)| i),
            Step::Up => candidates
                .filter(|(_, p)| p.column == current.column && p.top < current.top)
                .max_by_key(|(_, p)| p.top)
                .map(|(i, _)| i),
            Step::Left | Step::Right => {
                let column = if step == Step::Left {
                    current.column.checked_sub(1)?
                } else {
                    current.column + 1
                };
                candidates
                    .filter(|(_, p)| p.column == column)
                    .min_by_key(|(_, p)| p.top.abs_diff(current.top))
                    .map(|(i, _)| i)
            }
        }
    }

    fn thumbnail(&self, item: &ContentItem) -> (u16, Option<(u32, u32)>) {
        let size = self
            .sizes
            .as_ref()
            .and_then(|lookup| lookup(&item.thumbnail_url))
            .filter(|(w, h)| *w > 0 && *h > 0);
        let rows = match size {
            // Terminal cells are roughly twice as tall as they are wide.
            Some((w, h)) => {
                let inner = u64::from(self.column_width.saturating_sub(2).max(1));
                let rows = inner * u64::from(h) / (u64::from(w) * 2);
                rows.clamp(u64::from(MIN_THUMB_ROWS), u64::from(MAX_THUMB_ROWS)) as u16
            }
            None => DEFAULT_THUMB_ROWS,
        };
        (rows, size)
    }
}

impl RenderSink<ContentItem> for GallerySink {
    fn append(&mut self, items: &[ContentItem]) {
        self.items.extend_from_slice(items);
    }

    fn prepend(&mut self, item: &ContentItem) {
        self.items.insert(0, item.clone());
        self.placements.clear();
    }

    fn clear(&mut self) {
        self.items.clear();
        self.placements.clear();
        self.content_rows = 0;
    }

    fn relayout(&mut self) {
        let tiles: Vec<(u16, Option<(u32, u32)>)> =
            self.items.iter().map(|item| self.thumbnail(item)).collect();
        let mut heights = vec![0u16; self.columns];
        self.placements = tiles
            .into_iter()
            .map(|(thumb_rows, size)| {
                let column = heights
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, height)| **height)
                    .map(|(column, _)| column)
                    .unwrap_or(0);
                let height = thumb_rows + TILE_CHROME_ROWS;
                let top = heights[column];
                heights[column] = top.saturating_add(height);
                Placement {
                    column,
                    top,
                    height,
                    size,
                }
            })
            .collect();
        self.content_rows = heights.into_iter().max().unwrap_or(0);
    }
}

pub struct Services {
    pub content: Arc<dyn ContentSource>,
    pub comments: Arc<dyn CommentSource>,
    pub votes: Arc<dyn VoteService>,
    pub suggestions: Arc<dyn SuggestionSource>,
    pub publisher: Arc<dyn PostPublisher>,
    pub images: Arc<dyn ImageLoader>,
    pub thumbnail_size: Option<ThumbnailSize>,
}

pub struct Options {
    pub services: Services,
    pub preferences: Preferences,
    pub viewer: Viewer,
    pub scope: ResourceScope,
    pub feed: FeedOptions,
    pub comments_page_size: usize,
    pub debounce: Duration,
    /// Builds browser links; absent when no server is configured.
    pub links: Option<Arc<api::Client>>,
    pub status_message: String,
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= TICK_RATE {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

struct CommentDraft {
    text: String,
    error: Option<String>,
}

struct PostView {
    item: ContentItem,
    thread: CommentThread,
    list: ListState,
    comment_draft: Option<CommentDraft>,
    /// Author and media, once `/api/posts/{id}` answers.
    detail: Option<PostDetail>,
}

impl PostView {
    fn selected_comment(&self) -> Option<u64> {
        let index = self.list.selected()?;
        self.thread.visible().get(index).map(|node| node.id)
    }

    fn clamp_selection(&mut self) {
        let count = self.thread.visible().len();
        let selected = match (self.list.selected(), count) {
            (_, 0) => None,
            (Some(index), _) => Some(index.min(count - 1)),
            (None, _) => Some(0),
        };
        self.list.select(selected);
    }

    fn move_selection(&mut self, delta: isize) {
        let count = self.thread.visible().len();
        if count == 0 {
            return;
        }
        let current = self.list.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, count as isize - 1);
        self.list.select(Some(next as usize));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComposeField {
    Title,
    Media,
    Description,
    Flows,
    Visibility,
}

impl ComposeField {
    const ORDER: [ComposeField; 5] = [
        ComposeField::Title,
        ComposeField::Media,
        ComposeField::Description,
        ComposeField::Flows,
        ComposeField::Visibility,
    ];

    fn cycle(self, forward: bool) -> Self {
        let len = Self::ORDER.len();
        let index = Self::ORDER.iter().position(|f| *f == self).unwrap_or(0);
        let next = if forward {
            (index + 1) % len
        } else {
            (index + len - 1) % len
        };
        Self::ORDER[next]
    }

    fn label(self) -> &'static str {
        match self {
            ComposeField::Title => "Title",
            ComposeField::Media => "Add file",
            ComposeField::Description => "Description",
            ComposeField::Flows => "Flows",
            ComposeField::Visibility => "Visibility",
        }
    }
}

struct ComposeView {
    composer: Composer,
    field: ComposeField,
    media_path: String,
    description: String,
    error: Option<String>,
}

enum View {
    Gallery,
    Post(Box<PostView>),
    Compose(Box<ComposeView>),
}

enum Overlay {
    FlowSearch(SuggestionField),
    TitleSearch(String),
}

pub struct Model {
    services: Services,
    preferences: Preferences,
    viewer: Viewer,
    interaction: Interaction,
    dispatcher: Dispatcher,
    mailbox: Mailbox,
    debouncer: QueryDebouncer,
    debounce: Duration,
    feed: FeedLoader<GallerySink>,
    comments_page_size: usize,
    links: Option<Arc<api::Client>>,
    post_votes: HashMap<PostId, Engagement>,
    flows: Vec<FlowCard>,
    view: View,
    overlay: Option<Overlay>,
    notice: Option<&'static str>,
    selected_tile: usize,
    gallery_offset: u16,
    gallery_rows: u16,
    status_message: String,
    spinner: Spinner,
    needs_redraw: bool,
    last_time_refresh: Instant,
}

impl Model {
    pub fn new(options: Options) -> Self {
        let (dispatcher, mailbox) = dispatch::channel();
        Self::with_channel(options, dispatcher, mailbox)
    }

    pub fn with_channel(options: Options, dispatcher: Dispatcher, mailbox: Mailbox) -> Self {
        let Options {
            services,
            preferences,
            viewer,
            scope,
            feed,
            comments_page_size,
            debounce,
            links,
            status_message,
        } = options;
        let sink = GallerySink::new(services.thumbnail_size.clone());
        let mut loader = FeedLoader::new(
            services.content.clone(),
            services.images.clone(),
            dispatcher.clone(),
            sink,
            scope,
            feed,
        );
        loader.initialize(preferences.post_sorting());
        let interaction = Interaction::for_viewer(&viewer);
        let content = services.content.clone();
        dispatcher.spawn(move || Response::FlowsOverview {
            result: content.flows_overview(),
        });
        info!(viewer = ?viewer, scope = %loader.scope().describe(), "ui: starting");

        Self {
            services,
            preferences,
            viewer,
            interaction,
            dispatcher,
            mailbox,
            debouncer: QueryDebouncer::new(),
            debounce,
            feed: loader,
            comments_page_size,
            links,
            post_votes: HashMap::new(),
            flows: Vec::new(),
            view: View::Gallery,
            overlay: None,
            notice: None,
            selected_tile: 0,
            gallery_offset: 0,
            gallery_rows: 0,
            status_message,
            spinner: Spinner::new(),
            needs_redraw: true,
            last_time_refresh: Instant::now(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let mut timeout = TICK_RATE
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));
            if let Some(deadline) = self.debouncer.next_deadline() {
                timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
            }

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {err:#}");
                                self.mark_dirty();
                            }
                        }
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if self.fire_due(Instant::now()) > 0 {
                self.mark_dirty();
            }

            if last_tick.elapsed() >= TICK_RATE {
                last_tick = Instant::now();
                self.tick(last_tick);
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        match &self.view {
            View::Gallery => self.feed.is_loading(),
            View::Post(view) => view.thread.is_loading(),
            View::Compose(view) => view.composer.is_submitting(),
        }
    }

    fn tick(&mut self, now: Instant) {
        if self.is_loading() {
            if self.spinner.advance() {
                self.mark_dirty();
            }
        } else {
            self.spinner.reset();
        }
        if now.duration_since(self.last_time_refresh) >= RELATIVE_TIME_REFRESH {
            self.last_time_refresh = now;
            if let View::Post(view) = &mut self.view {
                view.thread.refresh_relative_times(Utc::now());
                self.needs_redraw = true;
            }
        }
    }

    /// Sends every lookup whose debounce delay has elapsed by `now`.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        autocomplete::run_due(
            &mut self.debouncer,
            now,
            &self.services.suggestions,
            &self.dispatcher,
        )
    }

    /// Applies every queued response. Returns whether anything arrived.
    pub fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Some(response) = self.mailbox.try_recv() {
            self.handle_response(response);
            changed = true;
        }
        changed
    }

    fn handle_response(&mut self, response: Response) {
        match response {
            Response::FeedPage {
                request_id,
                page,
                result,
            } => {
                if let Err(err) = self.feed.handle_page(request_id, page, result) {
                    self.status_message = format!("Could not load posts: {err:#}");
                }
            }
            Response::FeedImagesSettled { request_id } => {
                self.feed.handle_images_settled(request_id);
                if !self.feed.is_loading() {
                    self.status_message = self.gallery_status();
                }
                self.check_scroll();
            }
            Response::RootComments {
                post_id,
                request_id,
                page,
                result,
            } => {
                let Some(view) = self.post_view_for(&post_id) else {
                    debug!(post = %post_id, "ui: comments for a closed post");
                    return;
                };
                let outcome = view.thread.handle_root_page(request_id, page, result);
                view.clamp_selection();
                if let Err(err) = outcome {
                    self.status_message = format!("Could not load comments: {err:#}");
                }
            }
            Response::Replies {
                post_id,
                comment_id,
                result,
            } => {
                let Some(view) = self.post_view_for(&post_id) else {
                    return;
                };
                let outcome = view.thread.handle_replies(comment_id, result);
                view.clamp_selection();
                if let Err(err) = outcome {
                    self.status_message = format!("Could not load replies: {err:#}");
                }
            }
            Response::ReplyPosted {
                post_id,
                comment_id,
                result,
            } => {
                let Some(view) = self.post_view_for(&post_id) else {
                    return;
                };
                let outcome = view.thread.handle_reply_posted(comment_id, result);
                view.clamp_selection();
                self.status_message = match outcome {
                    Ok(()) => "Reply posted.".to_string(),
                    Err(err) => format!("Reply failed: {err:#}"),
                };
            }
            Response::CommentPosted { post_id, result } => {
                let Some(view) = self.post_view_for(&post_id) else {
                    return;
                };
                match view.thread.handle_comment_posted(result) {
                    Ok(()) => {
                        view.comment_draft = None;
                        view.list.select(Some(0));
                        self.status_message = "Comment posted.".to_string();
                    }
                    Err(err) => {
                        if let Some(draft) = view.comment_draft.as_mut() {
                            draft.error = Some(format!("{err:#}"));
                        }
                        self.status_message = format!("Comment failed: {err:#}");
                    }
                }
            }
            Response::Vote {
                target,
                generation,
                error,
            } => {
                let rolled_back = match &target {
                    VoteTarget::Post(post_id) => self
                        .post_votes
                        .get_mut(post_id)
                        .is_some_and(|engagement| engagement.settle(generation, error.as_deref())),
                    VoteTarget::Comment { post_id, .. } => {
                        match self.post_view_for(post_id) {
                            Some(view) => {
                                view.thread.handle_vote(&target, generation, error.as_deref())
                            }
                            None => false,
                        }
                    }
                };
                if rolled_back {
                    self.status_message =
                        format!("Vote failed: {}", error.as_deref().unwrap_or("unknown error"));
                }
            }
            Response::Suggestions {
                field,
                query_id,
                result,
            } => match (field, &mut self.overlay, &mut self.view) {
                (FieldKey::FlowSearch, Some(Overlay::FlowSearch(search)), _) => {
                    search.handle_suggestions(query_id, result);
                }
                (FieldKey::ComposerFlows, _, View::Compose(view)) => {
                    view.composer
                        .flow_field_mut()
                        .handle_suggestions(query_id, result);
                }
                _ => debug!(?field, query_id, "ui: suggestions for a closed field"),
            },
            Response::Availability {
                field, query_id, ..
            } => {
                debug!(?field, query_id, "ui: availability result with no open field");
            }
            Response::FlowsOverview { result } => match result {
                Ok(flows) => self.flows = flows,
                Err(err) => warn!(error = %format!("{err:#}"), "ui: flows overview failed"),
            },
            Response::PostDetail { post_id, result } => {
                let Some(view) = self.post_view_for(&post_id) else {
                    debug!(post = %post_id, "ui: detail for a closed post");
                    return;
                };
                match result {
                    Ok(detail) => view.detail = Some(detail),
                    Err(err) => self.status_message = format!("Could not load post: {err:#}"),
                }
            }
            Response::PostCreated { result } => {
                let View::Compose(view) = &mut self.view else {
                    return;
                };
                match view.composer.handle_created(result) {
                    Ok(post_id) => {
                        self.view = View::Gallery;
                        self.status_message = format!("Published post {post_id}.");
                        self.reset_gallery();
                        let sort = self.feed.cursor().sort;
                        self.feed.reload(sort);
                    }
                    Err(err) => {
                        view.error = Some(format!("Upload failed: {err:#}"));
                    }
                }
            }
        }
    }

    fn post_view_for(&mut self, post_id: &str) -> Option<&mut PostView> {
        match &mut self.view {
            View::Post(view) if view.item.id == post_id => Some(view.as_mut()),
            _ => None,
        }
    }

    fn gallery_status(&self) -> String {
        let cursor = self.feed.cursor();
        let mut status = format!(
            "{} · {} · {} posts",
            self.feed.scope().describe(),
            cursor.sort.label(),
            self.feed.rendered()
        );
        if cursor.exhausted {
            status.push_str(" · end of listing");
        }
        status
    }

    fn reset_gallery(&mut self) {
        self.selected_tile = 0;
        self.gallery_offset = 0;
    }

    /// Reports the gallery viewport to the loader so it can fetch ahead.
    fn check_scroll(&mut self) {
        if self.gallery_rows == 0 {
            return;
        }
        let metrics = ScrollMetrics {
            viewport_height: f32::from(self.gallery_rows) * ROW_UNITS,
            scroll_offset: f32::from(self.gallery_offset) * ROW_UNITS,
            content_height: f32::from(self.feed.sink().content_rows()) * ROW_UNITS,
        };
        self.feed.on_scroll(metrics);
    }

    fn ensure_tile_visible(&mut self) {
        let Some(placement) = self.feed.sink().placements().get(self.selected_tile).copied() else {
            return;
        };
        if placement.top < self.gallery_offset {
            self.gallery_offset = placement.top;
        } else if self.gallery_rows > 0
            && placement.bottom() > self.gallery_offset.saturating_add(self.gallery_rows)
        {
            self.gallery_offset = placement.bottom().saturating_sub(self.gallery_rows);
        }
        self.check_scroll();
    }

    fn scroll_gallery(&mut self, rows: i32) {
        let max_offset = self
            .feed
            .sink()
            .content_rows()
            .saturating_sub(self.gallery_rows);
        let offset = (i32::from(self.gallery_offset) + rows).clamp(0, i32::from(max_offset));
        self.gallery_offset = offset as u16;
        self.check_scroll();
    }

    fn report(&mut self, err: InteractionError) {
        match err {
            InteractionError::Denied(notice) => self.notice = Some(notice.message()),
            other => self.status_message = other.to_string(),
        }
    }

    fn selected_post_id(&self) -> Option<PostId> {
        match &self.view {
            View::Post(view) => Some(view.item.id.clone()),
            _ => self
                .feed
                .sink()
                .items()
                .get(self.selected_tile)
                .map(|item| item.id.clone()),
        }
    }

    fn open_in_browser(&mut self) -> Result<()> {
        let Some(post_id) = self.selected_post_id() else {
            return Ok(());
        };
        let Some(client) = self.links.as_ref() else {
            self.status_message = "No server configured for links.".to_string();
            return Ok(());
        };
        let url = client.post_page_url(&post_id)?;
        webbrowser::open(url.as_str()).context("ui: open browser")?;
        self.status_message = format!("Opened {url}");
        Ok(())
    }

    fn open_post(&mut self, index: usize) {
        let Some(item) = self.feed.sink().items().get(index).cloned() else {
            return;
        };
        self.post_votes.entry(item.id.clone()).or_insert_with(|| {
            Engagement::new(VoteTarget::Post(item.id.clone()), item.has_engaged, item.score)
        });
        let mut thread = CommentThread::new(
            item.id.clone(),
            item.comment_count,
            self.interaction,
            self.services.comments.clone(),
            self.services.votes.clone(),
            self.dispatcher.clone(),
            self.preferences.clone(),
            self.comments_page_size,
        );
        thread.initialize();
        let content = self.services.content.clone();
        let post_id = item.id.clone();
        self.dispatcher.spawn(move || Response::PostDetail {
            result: content.fetch_post(&post_id),
            post_id,
        });
        self.status_message = format!("Loading comments for {}…", display_title(&item));
        self.view = View::Post(Box::new(PostView {
            item,
            thread,
            list: ListState::default(),
            comment_draft: None,
            detail: None,
        }));
    }

    fn open_composer(&mut self) {
        if !self.viewer.is_member() {
            self.status_message = "You must be logged in to create a post.".to_string();
            return;
        }
        self.view = View::Compose(Box::new(ComposeView {
            composer: Composer::new(composer::flow_field(self.debounce)),
            field: ComposeField::Title,
            media_path: String::new(),
            description: String::new(),
            error: None,
        }));
        self.status_message = "New post".to_string();
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        self.mark_dirty();
        if self.notice.take().is_some() {
            return Ok(false);
        }
        if self.overlay.is_some() {
            self.handle_overlay_key(key);
            return Ok(false);
        }
        match self.view {
            View::Gallery => self.handle_gallery_key(key),
            View::Post(_) => self.handle_post_key(key),
            View::Compose(_) => {
                self.handle_compose_key(key);
                Ok(false)
            }
        }
    }

    fn handle_gallery_key(&mut self, key: KeyEvent) -> Result<bool> {
        let step = match key.code {
            KeyCode::Char('j') | KeyCode::Down => Some(Step::Down),
            KeyCode::Char('k') | KeyCode::Up => Some(Step::Up),
            KeyCode::Char('h') | KeyCode::Left => Some(Step::Left),
            KeyCode::Char('l') | KeyCode::Right => Some(Step::Right),
            _ => None,
        };
        if let Some(step) = step {
            if let Some(next) = self.feed.sink().step(self.selected_tile, step) {
                self.selected_tile = next;
            } else if step == Step::Down {
                self.feed.on_scroll_proximity();
            }
            self.ensure_tile_visible();
            return Ok(false);
        }

        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::PageDown => self.scroll_gallery(i32::from(self.gallery_rows.max(1))),
            KeyCode::PageUp => self.scroll_gallery(-i32::from(self.gallery_rows.max(1))),
            KeyCode::Enter => self.open_post(self.selected_tile),
            KeyCode::Char('s') => {
                let sort = self.feed.cursor().sort.next();
                self.preferences.set_post_sorting(sort)?;
                self.reset_gallery();
                self.feed.reload(sort);
                self.status_message = format!("Sorting by {}…", sort.label());
            }
            KeyCode::Char('r') => {
                let sort = self.feed.cursor().sort;
                self.reset_gallery();
                self.feed.reload(sort);
                self.status_message = format!("Reloading {}…", self.feed.scope().describe());
            }
            KeyCode::Char('g') => self.change_scope(ResourceScope::Public),
            KeyCode::Char(digit @ '1'..='9') => {
                let index = digit as usize - '1' as usize;
                if let Some(flow) = self.flows.get(index) {
                    self.change_scope(ResourceScope::Flow(flow.name.clone()));
                }
            }
            KeyCode::Char('/') => {
                self.overlay = Some(Overlay::FlowSearch(SuggestionField::new(
                    FieldKey::FlowSearch,
                    self.debounce,
                )));
            }
            KeyCode::Char('?') => self.overlay = Some(Overlay::TitleSearch(String::new())),
            KeyCode::Char('n') => self.open_composer(),
            KeyCode::Char('o') => self.open_in_browser()?,
            _ => {}
        }
        Ok(false)
    }

    fn change_scope(&mut self, scope: ResourceScope) {
        self.status_message = format!("Loading {}…", scope.describe());
        self.reset_gallery();
        self.feed.set_scope(scope);
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) {
        let Some(overlay) = self.overlay.as_mut() else {
            return;
        };
        match overlay {
            Overlay::TitleSearch(title) => match key.code {
                KeyCode::Esc => self.overlay = None,
                KeyCode::Enter => {
                    let title = title.trim().to_string();
                    self.overlay = None;
                    if !title.is_empty() {
                        self.change_scope(ResourceScope::Search { title });
                    }
                }
                KeyCode::Backspace => {
                    title.pop();
                }
                KeyCode::Char(ch) => title.push(ch),
                _ => {}
            },
            Overlay::FlowSearch(field) => {
                let nav = nav_key(key.code);
                match field.handle_key(nav) {
                    FieldAction::Selected(name) | FieldAction::Submitted(name) => {
                        field.clear(&mut self.debouncer);
                        self.overlay = None;
                        if !name.is_empty() {
                            self.change_scope(ResourceScope::Flow(name));
                        }
                        return;
                    }
                    FieldAction::PassThrough if nav == NavKey::Escape => {
                        field.clear(&mut self.debouncer);
                        self.overlay = None;
                        return;
                    }
                    FieldAction::PassThrough if nav == NavKey::Other => {}
                    _ => return,
                }
                let mut text = field.input().to_string();
                match key.code {
                    KeyCode::Backspace => {
                        text.pop();
                    }
                    KeyCode::Char(ch) => text.push(ch),
                    _ => return,
                }
                field.on_input(&text, Instant::now(), &mut self.debouncer);
            }
        }
    }

    fn handle_post_key(&mut self, key: KeyEvent) -> Result<bool> {
        let View::Post(view) = &mut self.view else {
            return Ok(false);
        };
        let view = view.as_mut();

        if let Some(draft) = view.comment_draft.as_mut() {
            match key.code {
                KeyCode::Esc => view.comment_draft = None,
                KeyCode::Enter => {
                    let text = draft.text.clone();
                    match view.thread.submit_top_level_comment(&text) {
                        Ok(()) => self.status_message = "Posting comment…".to_string(),
                        Err(InteractionError::Invalid(err)) => draft.error = Some(err.to_string()),
                        Err(err) => {
                            view.comment_draft = None;
                            self.report(err);
                        }
                    }
                }
                KeyCode::Backspace => {
                    draft.text.pop();
                }
                KeyCode::Char(ch) => {
                    draft.text.push(ch);
                    draft.error = None;
                }
                _ => {}
            }
            return Ok(false);
        }

        if let Some(editor) = view.thread.editor() {
            let mut draft = editor.draft.clone();
            match key.code {
                KeyCode::Esc => {
                    view.thread.cancel_reply_editor();
                }
                KeyCode::Enter => match view.thread.submit_editor() {
                    Ok(()) => self.status_message = "Posting reply…".to_string(),
                    Err(InteractionError::Invalid(_)) => {}
                    Err(err) => self.report(err),
                },
                KeyCode::Backspace => {
                    draft.pop();
                    view.thread.edit_reply_draft(&draft);
                }
                KeyCode::Char(ch) => {
                    draft.push(ch);
                    view.thread.edit_reply_draft(&draft);
                }
                _ => {}
            }
            return Ok(false);
        }

        let selected = view.selected_comment();
        let outcome: Result<(), InteractionError> = match key.code {
            KeyCode::Esc | KeyCode::Char('q') => {
                self.view = View::Gallery;
                self.status_message = self.gallery_status();
                Ok(())
            }
            KeyCode::Char('j') | KeyCode::Down => {
                view.move_selection(1);
                Ok(())
            }
            KeyCode::Char('k') | KeyCode::Up => {
                view.move_selection(-1);
                Ok(())
            }
            KeyCode::Char('u') => {
                let vote = self.post_votes.entry(view.item.id.clone()).or_insert_with(|| {
                    Engagement::new(
                        VoteTarget::Post(view.item.id.clone()),
                        view.item.has_engaged,
                        view.item.score,
                    )
                });
                vote.toggle(self.interaction, self.dispatcher.ticket()).map(|intent| {
                    engagement::send_vote(&self.services.votes, &self.dispatcher, intent);
                })
            }
            KeyCode::Char('v') => match selected {
                Some(id) => view.thread.toggle_comment_vote(id),
                None => Ok(()),
            },
            KeyCode::Enter | KeyCode::Char(' ') => match selected {
                Some(id) => view.thread.toggle_replies_visible(id),
                None => Ok(()),
            },
            KeyCode::Char('r') => match selected {
                Some(id) => view.thread.open_reply_editor(id).map(|_| ()),
                None => Ok(()),
            },
            KeyCode::Char('c') => view
                .thread
                .interaction()
                .require(Notice::CommentOnPost)
                .map(|()| {
                    view.comment_draft = Some(CommentDraft {
                        text: String::new(),
                        error: None,
                    });
                }),
            KeyCode::Char('m') => {
                if view.thread.load_more_roots() {
                    self.status_message = "Loading more comments…".to_string();
                }
                Ok(())
            }
            KeyCode::Char('s') => {
                let sort = view.thread.cursor().sort.next();
                if view.thread.change_sort(sort)? {
                    view.list.select(None);
                    self.status_message = format!("Comments sorted by {}", sort.label());
                }
                Ok(())
            }
            KeyCode::Char('o') => {
                self.open_in_browser()?;
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(err) = outcome {
            self.report(err);
        }
        Ok(false)
    }

    fn handle_compose_key(&mut self, key: KeyEvent) {
        let View::Compose(view) = &mut self.view else {
            return;
        };
        let view = view.as_mut();

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('s') => {
                    match view
                        .composer
                        .submit(&self.services.publisher, &self.dispatcher)
                    {
                        Ok(()) => {
                            view.error = None;
                            self.status_message = "Uploading post…".to_string();
                        }
                        Err(err) => view.error = Some(err.to_string()),
                    }
                }
                KeyCode::Char('d') => {
                    if let Some(last) = view.composer.media().len().checked_sub(1) {
                        view.composer.remove_media(last);
                    }
                }
                _ => {}
            }
            return;
        }

        if view.field == ComposeField::Flows {
            let nav = nav_key(key.code);
            if nav != NavKey::Other {
                match view.composer.flow_key(nav, &mut self.debouncer) {
                    Ok(FieldAction::PassThrough) => {}
                    Ok(_) => {
                        view.error = None;
                        return;
                    }
                    Err(err) => {
                        view.error = Some(err.to_string());
                        return;
                    }
                }
            }
        }

        match key.code {
            KeyCode::Esc => {
                self.debouncer.cancel(&FieldKey::ComposerFlows);
                self.view = View::Gallery;
                self.status_message = self.gallery_status();
            }
            KeyCode::Tab => view.field = view.field.cycle(true),
            KeyCode::BackTab => view.field = view.field.cycle(false),
            KeyCode::Enter => match view.field {
                ComposeField::Title => view.field = view.field.cycle(true),
                ComposeField::Media => {
                    let path = view.media_path.trim().to_string();
                    if path.is_empty() {
                        return;
                    }
                    match view.composer.add_media(Path::new(&path)) {
                        Ok(_) => {
                            view.media_path.clear();
                            view.error = None;
                        }
                        Err(err) => view.error = Some(err.to_string()),
                    }
                }
                ComposeField::Description => {
                    let Some(last) = view.composer.media().len().checked_sub(1) else {
                        view.error = Some("Add a file before describing it.".to_string());
                        return;
                    };
                    match view.composer.set_description(last, &view.description) {
                        Ok(()) => {
                            view.description.clear();
                            view.error = None;
                        }
                        Err(err) => view.error = Some(err.to_string()),
                    }
                }
                ComposeField::Flows => {}
                ComposeField::Visibility => {
                    view.composer.toggle_public();
                }
            },
            KeyCode::Backspace => match view.field {
                ComposeField::Title => {
                    let mut title = view.composer.title().to_string();
                    title.pop();
                    view.composer.set_title(&title);
                }
                ComposeField::Media => {
                    view.media_path.pop();
                }
                ComposeField::Description => {
                    view.description.pop();
                }
                ComposeField::Flows => {
                    let mut text = view.composer.flow_field().input().to_string();
                    if text.is_empty() {
                        if let Some(last) = view.composer.flows().last().cloned() {
                            view.composer.remove_flow(&last);
                        }
                    } else {
                        text.pop();
                        view.composer
                            .flow_input(&text, Instant::now(), &mut self.debouncer);
                    }
                }
                ComposeField::Visibility => {}
            },
            KeyCode::Char(ch) => match view.field {
                ComposeField::Title => {
                    let mut title = view.composer.title().to_string();
                    title.push(ch);
                    view.composer.set_title(&title);
                }
                ComposeField::Media => view.media_path.push(ch),
                ComposeField::Description => view.description.push(ch),
                ComposeField::Flows => {
                    let mut text = view.composer.flow_field().input().to_string();
                    text.push(ch);
                    view.composer
                        .flow_input(&text, Instant::now(), &mut self.debouncer);
                }
                ComposeField::Visibility => {
                    if ch == ' ' {
                        view.composer.toggle_public();
                    }
                }
            },
            _ => {}
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
                .trim()
                .to_string()
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        match self.view {
            View::Gallery => self.draw_gallery(frame, layout[1]),
            View::Post(_) => self.draw_post(frame, layout[1]),
            View::Compose(_) => self.draw_composer(frame, layout[1]),
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);

        if self.overlay.is_some() {
            self.draw_overlay(frame, layout[1]);
        }
        if let Some(message) = self.notice {
            draw_notice(frame, layout[1], message);
        }
    }

    fn footer_text(&self) -> &'static str {
        if self.overlay.is_some() {
            return "Type to search · Tab/↑/↓ choose · Enter apply · Esc close";
        }
        match &self.view {
            View::Gallery => {
                "h/j/k/l move · Enter open · s sort · 1-9 featured flow · / flows · ? search · g all · n new post · o browser · r reload · q quit"
            }
            View::Post(view) if view.comment_draft.is_some() || view.thread.editor().is_some() => {
                "Type your text · Enter send · Esc cancel"
            }
            View::Post(_) => {
                "j/k move · u upvote post · v upvote comment · Enter replies · r reply · c comment · m more · s sort · o browser · Esc back"
            }
            View::Compose(_) => {
                "Tab next field · Enter add/confirm · Space visibility · Ctrl+D drop file · Ctrl+S publish · Esc cancel"
            }
        }
    }

    fn draw_gallery(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .title(Span::styled(
                format!(" {} · {} ", self.feed.scope().describe(), self.feed.cursor().sort.label()),
                Style::default().fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let mut inner = block.inner(area);
        frame.render_widget(block, area);

        if !self.flows.is_empty() && inner.height > 1 {
            let strip = Rect { height: 1, ..inner };
            frame.render_widget(Paragraph::new(flow_strip(&self.flows)), strip);
            inner.y += 1;
            inner.height -= 1;
        }

        let resized = self.feed.sink_mut().resize(inner.width);
        let rows_changed = self.gallery_rows != inner.height;
        self.gallery_rows = inner.height;
        if resized || rows_changed {
            self.ensure_tile_visible();
        }

        let sink = self.feed.sink();
        if sink.placements().is_empty() {
            let message = if self.feed.is_loading() {
                "Loading posts…".to_string()
            } else {
                format!("No posts in {}.", self.feed.scope().describe())
            };
            let paragraph = Paragraph::new(message)
                .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                .alignment(Alignment::Center);
            frame.render_widget(paragraph, inner);
            return;
        }

        let offset = self.gallery_offset;
        let view_bottom = offset.saturating_add(inner.height);
        let column_width = sink.column_width();
        for (index, placement) in sink.placements().iter().enumerate() {
            if placement.bottom() <= offset || placement.top >= view_bottom {
                continue;
            }
            let Some(item) = sink.items().get(index) else {
                continue;
            };
            let visible_top = placement.top.max(offset);
            let visible_bottom = placement.bottom().min(view_bottom);
            let x = inner.x + column_width * placement.column as u16;
            let width = column_width.min(inner.right().saturating_sub(x));
            let tile_area = Rect {
                x,
                y: inner.y + (visible_top - offset),
                width,
                height: visible_bottom - visible_top,
            };
            let engagement = self.post_votes.get(&item.id);
            let tile = tile_paragraph(item, placement, engagement, index == self.selected_tile)
                .scroll((visible_top - placement.top, 0));
            frame.render_widget(tile, tile_area);
        }
    }

    fn draw_post(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let View::Post(view) = &mut self.view else {
            return;
        };
        let editing = view.comment_draft.is_some() || view.thread.editor().is_some();
        let engagement = self.post_votes.get(&view.item.id);
        let header_width = area.width.saturating_sub(2).max(1) as usize;
        let header = post_header(view, engagement, header_width, Utc::now());
        let header_rows = (header.len() as u16 + 2).clamp(4, (area.height / 2).max(4));
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(header_rows),
                Constraint::Min(0),
                Constraint::Length(if editing { 4 } else { 0 }),
            ])
            .split(area);

        let header_block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .style(Style::default().bg(COLOR_PANEL_BG));
        frame.render_widget(Paragraph::new(header).block(header_block), chunks[0]);

        let comments_block = Block::default()
            .title(Span::styled(
                " Comments ",
                Style::default().fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let width = comments_block.inner(chunks[1]).width.max(1) as usize;
        let visible = view.thread.visible();
        let editor_target = view.thread.editor().map(|editor| editor.target);
        let mut items: Vec<ListItem> = visible
            .iter()
            .map(|node| ListItem::new(comment_lines(node, width, editor_target == Some(node.id))))
            .collect();
        if items.is_empty() {
            let message = if view.thread.is_loading() {
                "Loading comments…"
            } else if view.thread.has_comments() {
                "Comments are unavailable right now."
            } else {
                "No comments yet."
            };
            items.push(ListItem::new(Line::from(Span::styled(
                message,
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))));
        } else if !view.thread.cursor().exhausted {
            items.push(ListItem::new(Line::from(Span::styled(
                if view.thread.is_loading() {
                    "Loading more…"
                } else {
                    "m: view more comments"
                },
                Style::default().fg(COLOR_ACCENT),
            ))));
        }
        let list = List::new(items)
            .block(comments_block)
            .highlight_style(Style::default().bg(COLOR_PANEL_SELECTED_BG));
        frame.render_stateful_widget(list, chunks[1], &mut view.list);

        if editing {
            let (title, text, error) = match (&view.comment_draft, view.thread.editor()) {
                (Some(draft), _) => ("New comment", draft.text.clone(), draft.error.clone()),
                (None, Some(editor)) => (
                    "Reply",
                    editor.draft.clone(),
                    editor.error.as_ref().map(ToString::to_string),
                ),
                (None, None) => ("", String::new(), None),
            };
            draw_input(frame, chunks[2], title, &text, error.as_deref());
        }
    }

    fn draw_composer(&self, frame: &mut Frame<'_>, area: Rect) {
        let View::Compose(view) = &self.view else {
            return;
        };
        let composer = &view.composer;
        let block = Block::default()
            .title(Span::styled(
                " New post ",
                Style::default().fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG));

        let field_line = |field: ComposeField, value: String| {
            let focused = view.field == field;
            let label_style = if focused {
                Style::default().fg(COLOR_ACCENT).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(COLOR_TEXT_SECONDARY)
            };
            let cursor = if focused { "▏" } else { "" };
            Line::from(vec![
                Span::styled(format!("{:<12}", field.label()), label_style),
                Span::styled(format!("{value}{cursor}"), Style::default().fg(COLOR_TEXT_PRIMARY)),
            ])
        };

        let mut lines = vec![field_line(ComposeField::Title, composer.title().to_string())];
        lines.push(Line::default());
        for (index, media) in composer.media().iter().enumerate() {
            let description = if media.description.is_empty() {
                String::new()
            } else {
                format!(" · {}", media.description)
            };
            lines.push(Line::from(Span::styled(
                format!("  {}. {} ({}){description}", index + 1, media.file_name(), media.mime),
                Style::default().fg(COLOR_TEXT_PRIMARY),
            )));
        }
        if composer.media().is_empty() {
            lines.push(Line::from(Span::styled(
                "  No files attached.",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }
        lines.push(field_line(ComposeField::Media, view.media_path.clone()));
        lines.push(field_line(ComposeField::Description, view.description.clone()));
        lines.push(Line::default());

        let chips = composer
            .flows()
            .iter()
            .map(|flow| format!("#{flow}"))
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(field_line(
            ComposeField::Flows,
            format!("{chips} {}", composer.flow_field().input()).trim_start().to_string(),
        ));
        lines.extend(suggestion_lines(composer.flow_field()));
        lines.push(Line::default());
        lines.push(field_line(
            ComposeField::Visibility,
            if composer.is_public() { "public" } else { "private" }.to_string(),
        ));
        if let Some(error) = &view.error {
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(COLOR_ERROR),
            )));
        }

        frame.render_widget(
            Paragraph::new(lines).block(block).wrap(Wrap { trim: false }),
            area,
        );
    }

    fn draw_overlay(&self, frame: &mut Frame<'_>, area: Rect) {
        let popup_area = centered_rect(60, 50, area);
        frame.render_widget(Clear, popup_area);
        let (title, lines) = match &self.overlay {
            Some(Overlay::FlowSearch(field)) => {
                let mut lines = vec![Line::from(Span::styled(
                    format!("> {}▏", field.input()),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                ))];
                lines.extend(suggestion_lines(field));
                ("Browse a flow", lines)
            }
            Some(Overlay::TitleSearch(title)) => (
                "Search titles",
                vec![Line::from(Span::styled(
                    format!("> {title}▏"),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                ))],
            ),
            None => return,
        };
        let popup = Paragraph::new(lines)
            .block(
                Block::default()
                    .title(Span::styled(
                        title,
                        Style::default().fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ACCENT))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            )
            .wrap(Wrap { trim: false });
        frame.render_widget(popup, popup_area);
    }
}

fn nav_key(code: KeyCode) -> NavKey {
    match code {
        KeyCode::Tab => NavKey::Tab,
        KeyCode::BackTab => NavKey::BackTab,
        KeyCode::Up => NavKey::Up,
        KeyCode::Down => NavKey::Down,
        KeyCode::Enter => NavKey::Enter,
        KeyCode::Esc => NavKey::Escape,
        _ => NavKey::Other,
    }
}

fn display_title(item: &ContentItem) -> String {
    let title = item.title.trim();
    if title.is_empty() {
        "Untitled".to_string()
    } else {
        title.to_string()
    }
}

fn tile_paragraph(
    item: &ContentItem,
    placement: &Placement,
    engagement: Option<&Engagement>,
    selected: bool,
) -> Paragraph<'static> {
    let border = if selected {
        COLOR_BORDER_FOCUSED
    } else {
        COLOR_BORDER_IDLE
    };
    let background = if selected {
        COLOR_PANEL_SELECTED_BG
    } else {
        COLOR_PANEL_BG
    };
    let (score, engaged) = engagement
        .map(|e| (e.displayed_score(), e.has_engaged()))
        .unwrap_or((item.score, item.has_engaged));

    let thumb_rows = placement.height.saturating_sub(TILE_CHROME_ROWS);
    let label = match placement.size {
        Some((w, h)) => format!("{w}×{h}"),
        None => "image".to_string(),
    };
    let mut lines: Vec<Line<'static>> = (0..thumb_rows)
        .map(|row| {
            let text = if row == thumb_rows / 2 {
                label.clone()
            } else {
                "░".repeat(label.width().max(8))
            };
            Line::from(Span::styled(text, Style::default().fg(COLOR_BORDER_IDLE)))
        })
        .collect();
    lines.push(Line::from(vec![
        Span::styled(
            format!("{} {score}", if engaged { "▲" } else { "△" }),
            Style::default().fg(if engaged { COLOR_SUCCESS } else { COLOR_TEXT_SECONDARY }),
        ),
        Span::styled(
            format!("  ✉ {}  ◉ {}", item.comment_count, item.view_count),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ),
    ]));

    let mut title_style = Style::default().fg(COLOR_TEXT_PRIMARY);
    if selected {
        title_style = title_style.add_modifier(Modifier::BOLD);
    }
    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .title(Span::styled(display_title(item), title_style))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border))
                .style(Style::default().bg(background)),
        )
}

fn comment_lines(node: &CommentNode, width: usize, editing: bool) -> Text<'static> {
    let indent = "  ".repeat(node.depth);
    let available = width.saturating_sub(indent.width()).max(10);
    let meta_style = Style::default()
        .fg(comment_depth_color(node.depth))
        .add_modifier(Modifier::BOLD);
    let engaged = node.engagement.has_engaged();

    let toggle = match (node.reply_count, node.replies_expanded) {
        (0, _) => String::new(),
        (count, false) => format!("  [+{count} replies]"),
        (_, true) => "  [-]".to_string(),
    };
    let mut lines = vec![Line::from(vec![
        Span::raw(indent.clone()),
        Span::styled(node.author.clone(), meta_style),
        Span::styled(
            format!(" · {} · ", node.relative_time),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ),
        Span::styled(
            format!(
                "{} {}",
                if engaged { "▲" } else { "△" },
                node.engagement.displayed_score()
            ),
            Style::default().fg(if engaged { COLOR_SUCCESS } else { COLOR_TEXT_SECONDARY }),
        ),
        Span::styled(toggle, Style::default().fg(COLOR_ACCENT)),
    ])];

    lines.extend(markup_lines(&node.body, &indent, available));
    if editing {
        lines.push(Line::from(Span::styled(
            format!("{indent}↳ replying…"),
            Style::default().fg(COLOR_ACCENT).add_modifier(Modifier::ITALIC),
        )));
    }
    lines.push(Line::default());
    Text::from(lines)
}

/// Renders markdown and rewraps each line to `width` behind `indent`.
fn markup_lines(body: &str, indent: &str, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for line in markup::render(body).lines {
        let style = line
            .spans
            .first()
            .map(|span| span.style)
            .unwrap_or_default();
        let content: String = line.spans.iter().map(|span| span.content.as_ref()).collect();
        if content.is_empty() {
            lines.push(Line::default());
            continue;
        }
        for wrapped in wrap(&content, WrapOptions::new(width)) {
            lines.push(Line::from(Span::styled(
                format!("{indent}{wrapped}"),
                Style::default().fg(COLOR_TEXT_PRIMARY).patch(style),
            )));
        }
    }
    lines
}

/// Title, engagement and counters, then author and media once the detail
/// has loaded.
fn post_header(
    view: &PostView,
    engagement: Option<&Engagement>,
    width: usize,
    now: DateTime<Utc>,
) -> Vec<Line<'static>> {
    let (score, engaged) = engagement
        .map(|e| (e.displayed_score(), e.has_engaged()))
        .unwrap_or((view.item.score, view.item.has_engaged));
    let mut lines = vec![
        Line::from(Span::styled(
            display_title(&view.item),
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::styled(
                format!("{} {score}", if engaged { "▲" } else { "△" }),
                Style::default().fg(if engaged { COLOR_SUCCESS } else { COLOR_TEXT_SECONDARY }),
            ),
            Span::styled(
                format!(
                    "   {} comments · {} views · comments by {}",
                    view.thread.comment_count(),
                    view.item.view_count,
                    view.thread.cursor().sort.label()
                ),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ),
        ]),
    ];
    let Some(detail) = &view.detail else {
        return lines;
    };

    let mut byline = Vec::new();
    if let Some(author) = &detail.author {
        byline.push(format!("by {author}"));
    }
    if let Some(created_at) = detail.created_at {
        byline.push(comments::relative_label(created_at, now));
    }
    if !byline.is_empty() {
        lines.push(Line::from(Span::styled(
            byline.join(" · "),
            Style::default().fg(COLOR_ACCENT),
        )));
    }
    for (index, media) in detail.media.iter().enumerate() {
        lines.push(Line::from(Span::styled(
            format!("{}. {}", index + 1, media.media_url),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )));
        if let Some(description) = media.description.as_deref() {
            lines.extend(markup_lines(description, "   ", width.saturating_sub(3).max(10)));
        }
    }
    lines
}

fn flow_strip(flows: &[FlowCard]) -> Line<'static> {
    let mut spans = vec![Span::styled(
        "Flows ",
        Style::default().fg(COLOR_TEXT_SECONDARY),
    )];
    for (index, flow) in flows.iter().take(9).enumerate() {
        spans.push(Span::styled(
            format!(" {} ", index + 1),
            Style::default().fg(COLOR_BG).bg(COLOR_ACCENT),
        ));
        spans.push(Span::styled(
            format!(" #{}  ", flow.name),
            Style::default().fg(COLOR_ACCENT),
        ));
    }
    Line::from(spans)
}

fn suggestion_lines(field: &SuggestionField) -> Vec<Line<'static>> {
    match field.state() {
        SuggestionState::Idle => Vec::new(),
        SuggestionState::Querying => vec![Line::from(Span::styled(
            "  searching…",
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ))],
        SuggestionState::Showing(items) => items
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let focused = field.focus() == Focus::Suggestion(index);
                let style = if focused {
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .bg(COLOR_PANEL_SELECTED_BG)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(COLOR_TEXT_SECONDARY)
                };
                Line::from(Span::styled(format!("  #{name}"), style))
            })
            .collect(),
    }
}

fn draw_input(frame: &mut Frame<'_>, area: Rect, title: &str, text: &str, error: Option<&str>) {
    let mut lines = vec![Line::from(Span::styled(
        format!("{text}▏"),
        Style::default().fg(COLOR_TEXT_PRIMARY),
    ))];
    if let Some(error) = error {
        lines.push(Line::from(Span::styled(
            error.to_string(),
            Style::default().fg(COLOR_ERROR),
        )));
    }
    let input = Paragraph::new(lines)
        .block(
            Block::default()
                .title(Span::styled(
                    format!(" {title} "),
                    Style::default().fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(COLOR_ACCENT))
                .style(Style::default().bg(COLOR_PANEL_BG)),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(input, area);
}

fn draw_notice(frame: &mut Frame<'_>, area: Rect, message: &str) {
    let popup_area = centered_rect(50, 25, area);
    frame.render_widget(Clear, popup_area);
    let lines = vec![
        Line::from(Span::styled(
            message.to_string(),
            Style::default().fg(COLOR_TEXT_PRIMARY),
        )),
        Line::default(),
        Line::from(Span::styled(
            "Press any key to dismiss.",
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .add_modifier(Modifier::ITALIC),
        )),
    ];
    let popup = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .title(Span::styled(
                    "Log in required",
                    Style::default().fg(COLOR_ERROR).add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(COLOR_ERROR))
                .style(Style::default().bg(COLOR_PANEL_BG)),
        )
        .wrap(Wrap { trim: true });
    frame.render_widget(popup, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}
