//! Debounced suggestion and availability lookups.
//!
//! Every keystroke issues a fresh query id and re-arms the field's debounce
//! slot. Only the response carrying the latest id is ever applied; anything
//! older is dropped, so answers arriving out of order cannot clobber newer
//! state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, warn};

use crate::data::SuggestionSource;
use crate::debounce::Debouncer;
use crate::dispatch::{Dispatcher, Response};
use crate::picker;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    FlowSearch,
    ComposerFlows,
    Username,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Suggestions,
    Availability,
}

/// A lookup waiting for its field's debounce delay to elapse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuery {
    pub field: FieldKey,
    pub kind: QueryKind,
    pub query_id: u64,
    pub value: String,
}

impl PendingQuery {
    pub fn run(self, source: &Arc<dyn SuggestionSource>, dispatcher: &Dispatcher) {
        let source = source.clone();
        debug!(field = ?self.field, query_id = self.query_id, value = %self.value, "autocomplete: query fired");
        dispatcher.spawn(move || match self.kind {
            QueryKind::Suggestions => Response::Suggestions {
                field: self.field,
                query_id: self.query_id,
                result: source.flow_suggestions(&self.value),
            },
            QueryKind::Availability => Response::Availability {
                field: self.field,
                query_id: self.query_id,
                result: source.username_available(&self.value),
            },
        });
    }
}

pub type QueryDebouncer = Debouncer<FieldKey, PendingQuery>;

/// Fires every due lookup.
pub fn run_due(
    debouncer: &mut QueryDebouncer,
    now: Instant,
    source: &Arc<dyn SuggestionSource>,
    dispatcher: &Dispatcher,
) -> usize {
    let due = debouncer.take_due(now);
    let count = due.len();
    for query in due {
        query.run(source, dispatcher);
    }
    count
}

#[derive(Debug, Default, Clone)]
pub struct QueryTracker {
    latest: u64,
}

impl QueryTracker {
    pub fn issue(&mut self) -> u64 {
        self.latest += 1;
        self.latest
    }

    pub fn is_current(&self, query_id: u64) -> bool {
        query_id == self.latest
    }

    /// Makes every outstanding id stale.
    pub fn invalidate(&mut self) {
        self.latest += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestionState {
    Idle,
    Querying,
    Showing(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Input,
    Suggestion(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Tab,
    BackTab,
    Up,
    Down,
    Enter,
    Escape,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldAction {
    /// The key was consumed by the suggestion panel.
    Handled,
    /// The key belongs to the text input.
    PassThrough,
    /// A suggestion was chosen.
    Selected(String),
    /// Enter on the input with this final-normalized text.
    Submitted(String),
    Closed,
}

/// Text input with a suggestion panel and a focus trap over its entries.
#[derive(Debug, Clone)]
pub struct SuggestionField {
    key: FieldKey,
    input: String,
    state: SuggestionState,
    focus: Focus,
    tracker: QueryTracker,
    delay: Duration,
}

impl SuggestionField {
    pub fn new(key: FieldKey, delay: Duration) -> Self {
        Self {
            key,
            input: String::new(),
            state: SuggestionState::Idle,
            focus: Focus::Input,
            tracker: QueryTracker::default(),
            delay,
        }
    }

    pub fn key(&self) -> FieldKey {
        self.key
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn state(&self) -> &SuggestionState {
        &self.state
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SuggestionState::Showing(_))
    }

    pub fn suggestions(&self) -> &[String] {
        match &self.state {
            SuggestionState::Showing(items) => items,
            _ => &[],
        }
    }

    /// Stores the normalized text and schedules a lookup for it. Text that
    /// cannot name a flow cancels any pending lookup and closes the panel.
    pub fn on_input(&mut self, raw: &str, now: Instant, debouncer: &mut QueryDebouncer) {
        self.input = picker::normalize_typing(raw);
        self.focus = Focus::Input;
        let query_id = self.tracker.issue();
        let prefix = picker::normalize_final(&self.input);
        if prefix.is_empty() || !picker::is_valid_flow(&prefix) {
            debouncer.cancel(&self.key);
            self.state = SuggestionState::Idle;
            return;
        }
        self.state = SuggestionState::Querying;
        debouncer.schedule_at(
            self.key,
            now,
            self.delay,
            PendingQuery {
                field: self.key,
                kind: QueryKind::Suggestions,
                query_id,
                value: prefix,
            },
        );
    }

    pub fn handle_suggestions(&mut self, query_id: u64, result: Result<Vec<String>>) {
        if !self.tracker.is_current(query_id) {
            debug!(field = ?self.key, query_id, "autocomplete: stale suggestions dropped");
            return;
        }
        self.focus = Focus::Input;
        self.state = match result {
            Ok(items) if items.is_empty() => SuggestionState::Idle,
            Ok(items) => SuggestionState::Showing(items),
            Err(err) => {
                warn!(field = ?self.key, error = %format!("{err:#}"), "autocomplete: suggestion lookup failed");
                SuggestionState::Idle
            }
        };
    }

    pub fn close(&mut self) {
        self.tracker.invalidate();
        self.state = SuggestionState::Idle;
        self.focus = Focus::Input;
    }

    pub fn clear(&mut self, debouncer: &mut QueryDebouncer) {
        debouncer.cancel(&self.key);
        self.input.clear();
        self.close();
    }

    pub fn handle_key(&mut self, key: NavKey) -> FieldAction {
        let count = self.suggestions().len();
        if count == 0 {
            return match key {
                NavKey::Enter => FieldAction::Submitted(picker::normalize_final(&self.input)),
                NavKey::Escape if self.state == SuggestionState::Querying => {
                    self.close();
                    FieldAction::Closed
                }
                _ => FieldAction::PassThrough,
            };
        }

        match (key, self.focus) {
            (NavKey::Escape, _) => {
                self.close();
                FieldAction::Closed
            }
            (NavKey::Tab | NavKey::Down, Focus::Input) => {
                self.focus = Focus::Suggestion(0);
                FieldAction::Handled
            }
            (NavKey::Tab | NavKey::Down, Focus::Suggestion(i)) => {
                self.focus = Focus::Suggestion((i + 1) % count);
                FieldAction::Handled
            }
            (NavKey::BackTab | NavKey::Up, Focus::Input) => {
                self.focus = Focus::Suggestion(count - 1);
                FieldAction::Handled
            }
            (NavKey::BackTab | NavKey::Up, Focus::Suggestion(i)) => {
                self.focus = Focus::Suggestion((i + count - 1) % count);
                FieldAction::Handled
            }
            (NavKey::Enter, Focus::Suggestion(i)) => {
                let chosen = self.suggestions()[i.min(count - 1)].clone();
                self.input.clear();
                self.close();
                FieldAction::Selected(chosen)
            }
            (NavKey::Enter, Focus::Input) => {
                let text = picker::normalize_final(&self.input);
                self.close();
                FieldAction::Submitted(text)
            }
            (NavKey::Other, _) => {
                self.focus = Focus::Input;
                FieldAction::PassThrough
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Unknown,
    Checking,
    Available,
    Taken,
    Failed,
}

/// Username input that reports whether the name is free.
#[derive(Debug, Clone)]
pub struct AvailabilityField {
    key: FieldKey,
    input: String,
    status: Availability,
    tracker: QueryTracker,
    delay: Duration,
}

impl AvailabilityField {
    pub fn new(key: FieldKey, delay: Duration) -> Self {
        Self {
            key,
            input: String::new(),
            status: Availability::Unknown,
            tracker: QueryTracker::default(),
            delay,
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn status(&self) -> &Availability {
        &self.status
    }

    pub fn on_input(&mut self, raw: &str, now: Instant, debouncer: &mut QueryDebouncer) {
        self.input = raw.to_string();
        let query_id = self.tracker.issue();
        let name = raw.trim();
        if name.is_empty() {
            debouncer.cancel(&self.key);
            self.status = Availability::Unknown;
            return;
        }
        self.status = Availability::Checking;
        debouncer.schedule_at(
            self.key,
            now,
            self.delay,
            PendingQuery {
                field: self.key,
                kind: QueryKind::Availability,
                query_id,
                value: name.to_string(),
            },
        );
    }

    pub fn handle_availability(&mut self, query_id: u64, result: Result<bool>) {
        if !self.tracker.is_current(query_id) {
            debug!(field = ?self.key, query_id, "autocomplete: stale availability dropped");
            return;
        }
        self.status = match result {
            Ok(true) => Availability::Available,
            Ok(false) => Availability::Taken,
            Err(err) => {
                warn!(field = ?self.key, error = %format!("{err:#}"), "autocomplete: availability lookup failed");
                Availability::Failed
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockSuggestionSource;
    use crate::dispatch::{inline_channel, Mailbox};

    const DELAY: Duration = Duration::from_millis(300);

    fn deliver(field: &mut SuggestionField, mailbox: &Mailbox) {
        while let Some(response) = mailbox.try_recv() {
            if let Response::Suggestions {
                query_id, result, ..
            } = response
            {
                field.handle_suggestions(query_id, result);
            }
        }
    }

    fn showing(items: &[&str]) -> SuggestionState {
        SuggestionState::Showing(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn only_last_keystroke_queries() {
        let mock = Arc::new(MockSuggestionSource::new(["cats", "catnip", "dogs"]));
        let source: Arc<dyn SuggestionSource> = mock.clone();
        let (dispatcher, mailbox) = inline_channel();
        let mut debouncer = QueryDebouncer::new();
        let mut field = SuggestionField::new(FieldKey::FlowSearch, DELAY);
        let start = Instant::now();

        field.on_input("c", start, &mut debouncer);
        field.on_input("ca", start + Duration::from_millis(100), &mut debouncer);
        field.on_input("Cat", start + Duration::from_millis(200), &mut debouncer);
        assert_eq!(field.state(), &SuggestionState::Querying);
        assert_eq!(run_due(&mut debouncer, start + Duration::from_millis(400), &source, &dispatcher), 0);
        assert_eq!(run_due(&mut debouncer, start + Duration::from_millis(500), &source, &dispatcher), 1);
        deliver(&mut field, &mailbox);

        assert_eq!(mock.calls(), vec!["cat".to_string()]);
        assert_eq!(field.state(), &showing(&["cats", "catnip"]));
    }

    #[test]
    fn stale_response_is_ignored() {
        let mut field = SuggestionField::new(FieldKey::FlowSearch, DELAY);
        let mut debouncer = QueryDebouncer::new();
        let now = Instant::now();
        field.on_input("ca", now, &mut debouncer);
        let first = debouncer.take_due(now + DELAY).remove(0);
        field.on_input("cat", now + DELAY, &mut debouncer);
        let second = debouncer.take_due(now + DELAY * 2).remove(0);

        field.handle_suggestions(second.query_id, Ok(vec!["cats".into()]));
        field.handle_suggestions(first.query_id, Ok(vec!["cars".into()]));
        assert_eq!(field.state(), &showing(&["cats"]));
    }

    #[test]
    fn empty_input_cancels_and_closes() {
        let mut field = SuggestionField::new(FieldKey::FlowSearch, DELAY);
        let mut debouncer = QueryDebouncer::new();
        let now = Instant::now();
        field.on_input("ca", now, &mut debouncer);
        let query = debouncer.take_due(now + DELAY).remove(0);
        field.on_input("   ", now + DELAY, &mut debouncer);
        assert!(!debouncer.is_pending(&FieldKey::FlowSearch));
        field.handle_suggestions(query.query_id, Ok(vec!["cats".into()]));
        assert_eq!(field.state(), &SuggestionState::Idle);
    }

    #[test]
    fn zero_results_close_panel() {
        let mut field = SuggestionField::new(FieldKey::FlowSearch, DELAY);
        let mut debouncer = QueryDebouncer::new();
        let now = Instant::now();
        field.on_input("zz", now, &mut debouncer);
        let query = debouncer.take_due(now + DELAY).remove(0);
        field.handle_suggestions(query.query_id, Ok(Vec::new()));
        assert_eq!(field.state(), &SuggestionState::Idle);
    }

    fn open_field(items: &[&str]) -> SuggestionField {
        let mut field = SuggestionField::new(FieldKey::ComposerFlows, DELAY);
        let mut debouncer = QueryDebouncer::new();
        let now = Instant::now();
        field.on_input("c", now, &mut debouncer);
        let query = debouncer.take_due(now + DELAY).remove(0);
        field.handle_suggestions(
            query.query_id,
            Ok(items.iter().map(|s| s.to_string()).collect()),
        );
        field
    }

    #[test]
    fn focus_wraps_both_ways() {
        let mut field = open_field(&["a", "b", "c"]);
        assert_eq!(field.handle_key(NavKey::Tab), FieldAction::Handled);
        assert_eq!(field.focus(), Focus::Suggestion(0));
        field.handle_key(NavKey::Tab);
        field.handle_key(NavKey::Down);
        assert_eq!(field.focus(), Focus::Suggestion(2));
        field.handle_key(NavKey::Tab);
        assert_eq!(field.focus(), Focus::Suggestion(0));
        field.handle_key(NavKey::BackTab);
        assert_eq!(field.focus(), Focus::Suggestion(2));
        field.handle_key(NavKey::Up);
        assert_eq!(field.focus(), Focus::Suggestion(1));
    }

    #[test]
    fn other_keys_return_focus_to_input() {
        let mut field = open_field(&["a", "b"]);
        field.handle_key(NavKey::Tab);
        assert_eq!(field.handle_key(NavKey::Other), FieldAction::PassThrough);
        assert_eq!(field.focus(), Focus::Input);
        assert!(field.is_open());
    }

    #[test]
    fn escape_closes_and_selection_commits() {
        let mut field = open_field(&["cats", "catnip"]);
        assert_eq!(field.handle_key(NavKey::Escape), FieldAction::Closed);
        assert!(!field.is_open());

        let mut field = open_field(&["cats", "catnip"]);
        field.handle_key(NavKey::Down);
        field.handle_key(NavKey::Down);
        assert_eq!(
            field.handle_key(NavKey::Enter),
            FieldAction::Selected("catnip".into())
        );
        assert!(!field.is_open());
        assert!(field.input().is_empty());
    }

    #[test]
    fn availability_ignores_stale_answers() {
        let mock = Arc::new(MockSuggestionSource::new(Vec::<String>::new()));
        let source: Arc<dyn SuggestionSource> = mock.clone();
        let (dispatcher, mailbox) = inline_channel();
        let mut debouncer = QueryDebouncer::new();
        let mut field = AvailabilityField::new(FieldKey::Username, DELAY);
        let now = Instant::now();

        field.on_input("cat", now, &mut debouncer);
        run_due(&mut debouncer, now + DELAY, &source, &dispatcher);
        field.on_input("cat2", now + DELAY, &mut debouncer);
        assert_eq!(field.status(), &Availability::Checking);

        if let Some(Response::Availability {
            query_id, result, ..
        }) = mailbox.try_recv()
        {
            field.handle_availability(query_id, result);
        }
        assert_eq!(field.status(), &Availability::Checking);

        run_due(&mut debouncer, now + DELAY * 2, &source, &dispatcher);
        if let Some(Response::Availability {
            query_id, result, ..
        }) = mailbox.try_recv()
        {
            field.handle_availability(query_id, result);
        }
        assert_eq!(field.status(), &Availability::Available);
        assert_eq!(mock.calls(), vec!["cat".to_string(), "cat2".to_string()]);
    }
}
