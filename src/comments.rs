//! Comment tree for one post.
//!
//! Top-level comments are paged like the gallery; replies are fetched whole
//! whenever a node is expanded and merged into the already rendered children
//! by id. A merge never replaces or reorders an existing node, so anything
//! attached to it (its expansion flag, an open reply editor) survives.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::data::{CommentSource, VoteService};
use crate::dispatch::{Dispatcher, Response};
use crate::engagement::{self, Engagement, Interaction, VoteTarget};
use crate::error::{InteractionError, Notice, ValidationError};
use crate::model::{CommentId, CommentRecord, PageCursor, PostId, SortKey};
use crate::preferences::Preferences;

pub const COMMENTS_PER_PAGE: usize = 30;

#[derive(Debug, Clone)]
pub struct CommentNode {
    pub id: CommentId,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub body: String,
    pub engagement: Engagement,
    pub reply_count: i64,
    pub children: Vec<CommentId>,
    pub replies_loaded: bool,
    pub replies_expanded: bool,
    pub relative_time: String,
    pub depth: usize,
}

impl CommentNode {
    fn from_record(post_id: &str, record: CommentRecord, depth: usize, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            engagement: Engagement::new(
                VoteTarget::Comment {
                    post_id: post_id.to_string(),
                    comment_id: record.id,
                },
                record.has_engaged,
                record.score,
            ),
            author: record.author,
            relative_time: relative_label(record.created_at, now),
            created_at: record.created_at,
            body: record.body,
            reply_count: record.reply_count,
            children: Vec::new(),
            replies_loaded: false,
            replies_expanded: false,
            depth,
        }
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        self.relative_time = relative_label(self.created_at, now);
    }
}

/// The single open reply form of a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEditor {
    pub target: CommentId,
    pub draft: String,
    pub error: Option<ValidationError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorOpen {
    Opened,
    Refocused,
    Replaced { previous: CommentId },
}

pub struct CommentThread {
    post_id: PostId,
    source: Arc<dyn CommentSource>,
    votes: Arc<dyn VoteService>,
    dispatcher: Dispatcher,
    preferences: Preferences,
    interaction: Interaction,
    nodes: HashMap<CommentId, CommentNode>,
    roots: Vec<CommentId>,
    cursor: PageCursor,
    page_size: usize,
    root_request: Option<u64>,
    comment_count: i64,
    editor: Option<ReplyEditor>,
}

impl CommentThread {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        post_id: PostId,
        comment_count: i64,
        interaction: Interaction,
        source: Arc<dyn CommentSource>,
        votes: Arc<dyn VoteService>,
        dispatcher: Dispatcher,
        preferences: Preferences,
        page_size: usize,
    ) -> Self {
        Self {
            post_id,
            source,
            votes,
            dispatcher,
            preferences,
            interaction,
            nodes: HashMap::new(),
            roots: Vec::new(),
            cursor: PageCursor::new(SortKey::default()),
            page_size: page_size.max(1),
            root_request: None,
            comment_count,
            editor: None,
        }
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    /// Loads the first page using the remembered comment ordering.
    pub fn initialize(&mut self) {
        let sort = self.preferences.comment_sorting();
        self.load_root_comments(0, sort);
    }

    pub fn load_root_comments(&mut self, page: u32, sort: SortKey) {
        let request_id = self.dispatcher.ticket();
        self.root_request = Some(request_id);
        self.cursor.sort = sort;

        info!(post = %self.post_id, page, %sort, "comments: fetching page");
        let source = self.source.clone();
        let post_id = self.post_id.clone();
        self.dispatcher.spawn(move || Response::RootComments {
            result: source.fetch_comments(&post_id, page, sort),
            post_id,
            request_id,
            page,
        });
    }

    /// "View more": next root page unless one is loading or none remain.
    pub fn load_more_roots(&mut self) -> bool {
        if self.root_request.is_some() || self.cursor.exhausted {
            return false;
        }
        self.load_root_comments(self.cursor.next_page(), self.cursor.sort);
        true
    }

    /// Switches ordering: remembers it, drops every rendered comment and
    /// reloads from the first page. Re-selecting the current order is a no-op.
    pub fn change_sort(&mut self, sort: SortKey) -> Result<bool> {
        if sort == self.cursor.sort && !self.roots.is_empty() {
            return Ok(false);
        }
        self.preferences.set_comment_sorting(sort)?;
        self.nodes.clear();
        self.roots.clear();
        self.editor = None;
        self.cursor = PageCursor::new(sort);
        self.load_root_comments(0, sort);
        Ok(true)
    }

    pub fn handle_root_page(
        &mut self,
        request_id: u64,
        page: u32,
        result: Result<Vec<CommentRecord>>,
    ) -> Result<()> {
        if self.root_request != Some(request_id) {
            debug!(request_id, "comments: discarding superseded page");
            return Ok(());
        }
        self.root_request = None;
        let records = result.inspect_err(|err| {
            warn!(post = %self.post_id, page, error = %format!("{err:#}"), "comments: page fetch failed");
        })?;

        let now = Utc::now();
        let fetched = records.len();
        for record in records {
            if let Some(existing) = self.nodes.get_mut(&record.id) {
                existing.refresh(now);
                continue;
            }
            self.roots.push(record.id);
            self.nodes.insert(
                record.id,
                CommentNode::from_record(&self.post_id, record, 0, now),
            );
        }
        self.cursor.advance(page);
        if fetched < self.page_size {
            self.cursor.exhausted = true;
        }
        Ok(())
    }

    pub fn load_replies(&mut self, comment_id: CommentId, sort: SortKey) {
        let source = self.source.clone();
        let post_id = self.post_id.clone();
        debug!(post = %post_id, comment_id, "comments: fetching replies");
        self.dispatcher.spawn(move || Response::Replies {
            result: source.fetch_replies(&post_id, comment_id, sort),
            post_id,
            comment_id,
        });
    }

    /// Merges a full reply listing into `comment_id`'s rendered children.
    pub fn handle_replies(
        &mut self,
        comment_id: CommentId,
        result: Result<Vec<CommentRecord>>,
    ) -> Result<()> {
        let replies = match result {
            Ok(replies) => replies,
            Err(err) => {
                warn!(comment_id, error = %format!("{err:#}"), "comments: reply fetch failed");
                // Collapse so the next toggle expands and fetches again.
                if let Some(node) = self.nodes.get_mut(&comment_id) {
                    node.replies_loaded = false;
                    node.replies_expanded = false;
                }
                return Err(err);
            }
        };

        let now = Utc::now();
        let Some(parent) = self.nodes.get_mut(&comment_id) else {
            debug!(comment_id, "comments: replies for a node no longer rendered");
            return Ok(());
        };
        parent.reply_count = replies.len() as i64;
        let depth = parent.depth + 1;
        let existing = parent.children.clone();
        for child in &existing {
            if let Some(node) = self.nodes.get_mut(child) {
                node.refresh(now);
            }
        }

        let mut appended = Vec::new();
        for record in replies {
            if existing.contains(&record.id) || self.nodes.contains_key(&record.id) {
                continue;
            }
            appended.push(record.id);
            self.nodes.insert(
                record.id,
                CommentNode::from_record(&self.post_id, record, depth, now),
            );
        }
        if let Some(parent) = self.nodes.get_mut(&comment_id) {
            parent.children.extend(appended);
        }
        Ok(())
    }

    /// Shows or hides replies; the first expansion fetches them.
    pub fn toggle_replies_visible(&mut self, comment_id: CommentId) -> Result<(), InteractionError> {
        let sort = self.cursor.sort;
        let node = self
            .nodes
            .get_mut(&comment_id)
            .ok_or(InteractionError::UnknownComment(comment_id))?;
        let should_fetch = !node.replies_loaded;
        node.replies_loaded = true;
        node.replies_expanded = !node.replies_expanded;
        if should_fetch {
            self.load_replies(comment_id, sort);
        }
        Ok(())
    }

    pub fn open_reply_editor(&mut self, comment_id: CommentId) -> Result<EditorOpen, InteractionError> {
        self.interaction.require(Notice::ReplyToComment)?;
        if !self.nodes.contains_key(&comment_id) {
            return Err(InteractionError::UnknownComment(comment_id));
        }
        let outcome = match self.editor.as_ref() {
            Some(editor) if editor.target == comment_id => return Ok(EditorOpen::Refocused),
            Some(editor) => EditorOpen::Replaced {
                previous: editor.target,
            },
            None => EditorOpen::Opened,
        };
        self.editor = Some(ReplyEditor {
            target: comment_id,
            draft: String::new(),
            error: None,
        });
        Ok(outcome)
    }

    /// Updates the open editor's draft and returns its validity message.
    pub fn edit_reply_draft(&mut self, draft: &str) -> Option<ValidationError> {
        let editor = self.editor.as_mut()?;
        editor.draft = draft.to_string();
        editor.error = if draft.trim().is_empty() {
            Some(ValidationError::EmptyReply)
        } else {
            None
        };
        editor.error.clone()
    }

    pub fn cancel_reply_editor(&mut self) -> Option<ReplyEditor> {
        self.editor.take()
    }

    pub fn submit_editor(&mut self) -> Result<(), InteractionError> {
        let Some(editor) = self.editor.as_ref() else {
            return Ok(());
        };
        let (target, draft) = (editor.target, editor.draft.clone());
        self.submit_reply(target, &draft).inspect_err(|err| {
            if let (InteractionError::Invalid(validation), Some(editor)) = (err, self.editor.as_mut()) {
                editor.error = Some(validation.clone());
            }
        })
    }

    pub fn submit_reply(&mut self, comment_id: CommentId, body: &str) -> Result<(), InteractionError> {
        self.interaction.require(Notice::ReplyToComment)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(ValidationError::EmptyReply.into());
        }
        if !self.nodes.contains_key(&comment_id) {
            return Err(InteractionError::UnknownComment(comment_id));
        }

        self.comment_count += 1;
        let source = self.source.clone();
        let post_id = self.post_id.clone();
        let body = body.to_string();
        self.dispatcher.spawn(move || Response::ReplyPosted {
            result: source.post_reply(&post_id, comment_id, &body),
            post_id,
            comment_id,
        });
        Ok(())
    }

    /// Makes the new reply visible: expands a collapsed node, or runs a
    /// collapse+expand cycle on an open one so the merge picks it up.
    pub fn handle_reply_posted(
        &mut self,
        comment_id: CommentId,
        result: Result<CommentRecord>,
    ) -> Result<()> {
        if let Err(err) = result {
            warn!(comment_id, error = %format!("{err:#}"), "comments: reply failed");
            self.comment_count -= 1;
            return Err(err);
        }

        if self.editor.as_ref().map(|e| e.target) == Some(comment_id) {
            self.editor = None;
        }
        let Some(node) = self.nodes.get_mut(&comment_id) else {
            return Ok(());
        };
        node.replies_loaded = false;
        let expanded = node.replies_expanded;
        if expanded {
            self.toggle_replies_visible(comment_id)?;
        }
        self.toggle_replies_visible(comment_id)?;
        Ok(())
    }

    pub fn submit_top_level_comment(&mut self, body: &str) -> Result<(), InteractionError> {
        self.interaction.require(Notice::CommentOnPost)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(ValidationError::EmptyComment.into());
        }
        let source = self.source.clone();
        let post_id = self.post_id.clone();
        let body = body.to_string();
        self.dispatcher.spawn(move || Response::CommentPosted {
            result: source.post_comment(&post_id, &body),
            post_id,
        });
        Ok(())
    }

    /// Renders the server's canonical record at the top of the list.
    pub fn handle_comment_posted(&mut self, result: Result<CommentRecord>) -> Result<()> {
        let record = result.inspect_err(|err| {
            warn!(post = %self.post_id, error = %format!("{err:#}"), "comments: comment failed");
        })?;
        self.comment_count += 1;
        if self.nodes.contains_key(&record.id) {
            return Ok(());
        }
        self.roots.insert(0, record.id);
        self.nodes.insert(
            record.id,
            CommentNode::from_record(&self.post_id, record, 0, Utc::now()),
        );
        Ok(())
    }

    pub fn toggle_comment_vote(&mut self, comment_id: CommentId) -> Result<(), InteractionError> {
        let node = self
            .nodes
            .get_mut(&comment_id)
            .ok_or(InteractionError::UnknownComment(comment_id))?;
        let intent = node
            .engagement
            .toggle(self.interaction, self.dispatcher.ticket())?;
        engagement::send_vote(&self.votes, &self.dispatcher, intent);
        Ok(())
    }

    pub fn handle_vote(&mut self, target: &VoteTarget, generation: u64, error: Option<&str>) -> bool {
        let VoteTarget::Comment { comment_id, .. } = target else {
            return false;
        };
        match self.nodes.get_mut(comment_id) {
            Some(node) => node.engagement.settle(generation, error),
            None => false,
        }
    }

    pub fn refresh_relative_times(&mut self, now: DateTime<Utc>) {
        for node in self.nodes.values_mut() {
            node.refresh(now);
        }
    }

    /// Rendered comments in display order with replies under expanded
    /// parents.
    pub fn visible(&self) -> Vec<&CommentNode> {
        let mut out = Vec::new();
        let mut stack: Vec<CommentId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            out.push(node);
            if node.replies_expanded {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn node(&self, comment_id: CommentId) -> Option<&CommentNode> {
        self.nodes.get(&comment_id)
    }

    pub fn roots(&self) -> &[CommentId] {
        &self.roots
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    pub fn is_loading(&self) -> bool {
        self.root_request.is_some()
    }

    pub fn comment_count(&self) -> i64 {
        self.comment_count
    }

    pub fn has_comments(&self) -> bool {
        self.comment_count > 0
    }

    pub fn editor(&self) -> Option<&ReplyEditor> {
        self.editor.as_ref()
    }

    pub fn interaction(&self) -> Interaction {
        self.interaction
    }
}

/// Human relative time such as "5 minutes ago" or "in 2 hours".
pub fn relative_label(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(then);
    let seconds = delta.num_seconds();
    if seconds.abs() < 1 {
        return "just now".to_string();
    }
    let magnitude = seconds.unsigned_abs();
    const UNITS: [(u64, &str); 6] = [
        (365 * 24 * 3600, "year"),
        (30 * 24 * 3600, "month"),
        (24 * 3600, "day"),
        (3600, "hour"),
        (60, "minute"),
        (1, "second"),
    ];
    let (size, unit) = UNITS
        .iter()
        .copied()
        .find(|(size, _)| magnitude >= *size)
        .unwrap_or((1, "second"));
    let count = magnitude / size;
    let plural = if count == 1 { "" } else { "s" };
    if seconds > 0 {
        format!("{count} {unit}{plural} ago")
    } else {
        format!("in {count} {unit}{plural}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    use crate::data::{MockCommentSource, MockVoteService};
    use crate::dispatch::{inline_channel, Mailbox};
    use crate::preferences::MemoryPreferences;

    struct Harness {
        thread: CommentThread,
        source: Arc<MockCommentSource>,
        votes: Arc<MockVoteService>,
        mailbox: Mailbox,
        preferences: Preferences,
    }

    fn harness(interaction: Interaction, roots: usize) -> Harness {
        let source = Arc::new(MockCommentSource::new(COMMENTS_PER_PAGE));
        source.seed_roots(roots);
        let (dispatcher, mailbox) = inline_channel();
        let preferences = Preferences::new(Arc::new(MemoryPreferences::default()));
        let votes = Arc::new(MockVoteService::default());
        let thread = CommentThread::new(
            "abcd1234".into(),
            roots as i64,
            interaction,
            source.clone(),
            votes.clone(),
            dispatcher,
            preferences.clone(),
            COMMENTS_PER_PAGE,
        );
        Harness {
            thread,
            source,
            votes,
            mailbox,
            preferences,
        }
    }

    impl Harness {
        fn pump(&mut self) -> Vec<Result<()>> {
            let mut outcomes = Vec::new();
            while let Some(response) = self.mailbox.try_recv() {
                let outcome = match response {
                    Response::RootComments {
                        request_id,
                        page,
                        result,
                        ..
                    } => self.thread.handle_root_page(request_id, page, result),
                    Response::Replies {
                        comment_id, result, ..
                    } => self.thread.handle_replies(comment_id, result),
                    Response::ReplyPosted {
                        comment_id, result, ..
                    } => self.thread.handle_reply_posted(comment_id, result),
                    Response::CommentPosted { result, .. } => {
                        self.thread.handle_comment_posted(result)
                    }
                    Response::Vote {
                        target,
                        generation,
                        error,
                    } => {
                        self.thread.handle_vote(&target, generation, error.as_deref());
                        Ok(())
                    }
                    _ => panic!("unexpected response"),
                };
                outcomes.push(outcome);
            }
            outcomes
        }

        /// A new view of the same post, as after leaving and reopening it.
        fn reopen(&self) -> CommentThread {
            CommentThread::new(
                self.thread.post_id.clone(),
                self.thread.comment_count,
                self.thread.interaction,
                self.source.clone(),
                self.votes.clone(),
                self.thread.dispatcher.clone(),
                self.preferences.clone(),
                COMMENTS_PER_PAGE,
            )
        }

        fn child_ids(&self, id: CommentId) -> Vec<CommentId> {
            self.thread.node(id).unwrap().children.clone()
        }
    }

    fn member() -> Interaction {
        Interaction::Engage
    }

    #[test]
    fn root_pages_exhaust_on_short_page() {
        let mut h = harness(member(), 35);
        h.thread.initialize();
        h.pump();
        assert_eq!(h.thread.roots().len(), 30);
        assert!(!h.thread.cursor().exhausted);

        assert!(h.thread.load_more_roots());
        h.pump();
        assert_eq!(h.thread.roots().len(), 35);
        assert!(h.thread.cursor().exhausted);
        assert!(!h.thread.load_more_roots());
    }

    #[test]
    fn failed_first_root_page_is_requested_again() {
        let mut h = harness(member(), 35);
        h.source.fail_next();
        h.thread.initialize();
        assert!(h.pump().iter().any(|o| o.is_err()));
        assert!(h.thread.roots().is_empty());

        assert!(h.thread.load_more_roots());
        h.pump();
        assert_eq!(
            h.source.calls(),
            vec!["comments abcd1234 page 0", "comments abcd1234 page 0"]
        );
        assert_eq!(h.thread.roots().len(), 30);

        assert!(h.thread.load_more_roots());
        h.pump();
        assert_eq!(h.thread.roots().len(), 35);
    }

    #[test]
    fn reopened_thread_ignores_pages_of_the_previous_view() {
        let mut h = harness(member(), 3);
        h.thread.initialize();
        assert!(h.thread.change_sort(SortKey::Oldest).unwrap());
        let stale = h.mailbox.drain();

        let mut reopened = h.reopen();
        reopened.initialize();
        assert_eq!(reopened.cursor().sort, SortKey::Oldest);
        for response in stale {
            if let Response::RootComments {
                request_id,
                page,
                result,
                ..
            } = response
            {
                reopened.handle_root_page(request_id, page, result).unwrap();
            }
        }
        assert!(reopened.is_loading());
        assert!(reopened.roots().is_empty());

        h.thread = reopened;
        h.pump();
        assert!(!h.thread.is_loading());
        assert_eq!(h.thread.roots().len(), 3);
        assert!(h.thread.cursor().loaded);
    }

    #[test]
    fn late_vote_failure_of_previous_view_keeps_new_toggle() {
        let mut h = harness(member(), 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];
        h.votes.fail_next();
        h.thread.toggle_comment_vote(root).unwrap();
        let stale = h.mailbox.drain();

        h.thread = h.reopen();
        h.thread.initialize();
        h.pump();
        h.thread.toggle_comment_vote(root).unwrap();
        h.pump();
        for response in stale {
            if let Response::Vote {
                target,
                generation,
                error,
            } = response
            {
                assert!(error.is_some());
                assert!(!h.thread.handle_vote(&target, generation, error.as_deref()));
            }
        }
        let node = h.thread.node(root).unwrap();
        assert!(node.engagement.has_engaged());
        assert_eq!(node.engagement.displayed_score(), 1);
    }

    #[test]
    fn failed_reply_fetch_expands_on_retry() {
        let mut h = harness(member(), 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];
        let reply = h.source.add_reply(root, "a");

        h.source.fail_next();
        h.thread.toggle_replies_visible(root).unwrap();
        assert!(h.pump().iter().any(|o| o.is_err()));
        let node = h.thread.node(root).unwrap();
        assert!(!node.replies_expanded);
        assert!(!node.replies_loaded);

        h.thread.toggle_replies_visible(root).unwrap();
        h.pump();
        let node = h.thread.node(root).unwrap();
        assert!(node.replies_expanded);
        assert_eq!(node.children, vec![reply]);
        assert_eq!(h.thread.visible().len(), 2);
    }

    #[test]
    fn reply_merge_is_idempotent_and_ordered() {
        let mut h = harness(member(), 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];
        let first = h.source.add_reply(root, "a");
        let second = h.source.add_reply(root, "b");

        h.thread.toggle_replies_visible(root).unwrap();
        h.pump();
        assert_eq!(h.child_ids(root), vec![first, second]);
        assert!(h.thread.node(root).unwrap().replies_expanded);

        h.thread.load_replies(root, SortKey::Newest);
        h.pump();
        assert_eq!(h.child_ids(root), vec![first, second]);

        let third = h.source.add_reply(root, "c");
        h.thread.load_replies(root, SortKey::Newest);
        h.pump();
        assert_eq!(h.child_ids(root), vec![first, second, third]);
        assert_eq!(h.thread.node(root).unwrap().reply_count, 3);
    }

    #[test]
    fn merge_never_duplicates_known_ids() {
        let mut h = harness(member(), 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];
        let reply = h.source.add_reply(root, "a");
        h.thread.load_replies(root, SortKey::Newest);
        h.thread.load_replies(root, SortKey::Newest);
        h.pump();
        assert_eq!(h.child_ids(root), vec![reply]);
        let visible_ids: Vec<CommentId> = h.thread.visible().iter().map(|n| n.id).collect();
        assert_eq!(visible_ids, vec![root]);
    }

    #[test]
    fn toggle_after_load_does_not_refetch() {
        let mut h = harness(member(), 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];
        h.thread.toggle_replies_visible(root).unwrap();
        h.thread.toggle_replies_visible(root).unwrap();
        h.thread.toggle_replies_visible(root).unwrap();
        h.pump();
        let fetches = h
            .source
            .calls()
            .iter()
            .filter(|call| call.starts_with("replies"))
            .count();
        assert_eq!(fetches, 1);
        assert!(h.thread.node(root).unwrap().replies_expanded);
    }

    #[test]
    fn reply_to_never_expanded_comment_becomes_visible() {
        let mut h = harness(member(), 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];

        h.thread.submit_reply(root, "  first!  ").unwrap();
        assert_eq!(h.thread.comment_count(), 2);
        h.pump();

        let node = h.thread.node(root).unwrap();
        assert!(node.replies_expanded);
        assert_eq!(node.children.len(), 1);
        assert!(h.thread.node(node.children[0]).unwrap().body.starts_with("first!"));
        assert_eq!(h.thread.visible().len(), 2);
    }

    #[test]
    fn reply_to_expanded_comment_reruns_merge() {
        let mut h = harness(member(), 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];
        let existing = h.source.add_reply(root, "a");
        h.thread.toggle_replies_visible(root).unwrap();
        h.pump();

        h.thread.submit_reply(root, "second").unwrap();
        h.pump();
        let node = h.thread.node(root).unwrap();
        assert!(node.replies_expanded);
        assert!(node.replies_loaded);
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.children[0], existing);
    }

    #[test]
    fn blank_reply_is_rejected_before_network() {
        let mut h = harness(member(), 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];
        let calls_before = h.source.calls().len();
        assert_eq!(
            h.thread.submit_reply(root, " \n\t "),
            Err(InteractionError::Invalid(ValidationError::EmptyReply))
        );
        assert_eq!(
            h.thread.submit_top_level_comment(""),
            Err(InteractionError::Invalid(ValidationError::EmptyComment))
        );
        assert_eq!(h.source.calls().len(), calls_before);
        assert_eq!(h.thread.comment_count(), 1);
    }

    #[test]
    fn failed_reply_restores_counter_and_keeps_editor() {
        let mut h = harness(member(), 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];
        h.thread.open_reply_editor(root).unwrap();
        h.thread.edit_reply_draft("hello");
        h.source.fail_next();
        h.thread.submit_editor().unwrap();
        let outcomes = h.pump();
        assert!(outcomes.iter().any(|o| o.is_err()));
        assert_eq!(h.thread.comment_count(), 1);
        assert_eq!(h.thread.editor().unwrap().draft, "hello");
    }

    #[test]
    fn editor_is_single_slot() {
        let mut h = harness(member(), 2);
        h.thread.initialize();
        h.pump();
        let (a, b) = (h.thread.roots()[0], h.thread.roots()[1]);
        assert_eq!(h.thread.open_reply_editor(a), Ok(EditorOpen::Opened));
        h.thread.edit_reply_draft("draft");
        assert_eq!(h.thread.open_reply_editor(a), Ok(EditorOpen::Refocused));
        assert_eq!(h.thread.editor().unwrap().draft, "draft");
        assert_eq!(
            h.thread.open_reply_editor(b),
            Ok(EditorOpen::Replaced { previous: a })
        );
        assert_eq!(h.thread.editor().unwrap().target, b);
        assert_eq!(
            h.thread.edit_reply_draft("  "),
            Some(ValidationError::EmptyReply)
        );
    }

    #[test]
    fn editor_survives_reply_merge() {
        let mut h = harness(member(), 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];
        h.source.add_reply(root, "a");
        h.thread.toggle_replies_visible(root).unwrap();
        h.pump();
        let child = h.child_ids(root)[0];
        h.thread.open_reply_editor(child).unwrap();
        h.thread.edit_reply_draft("keep me");
        h.thread.load_replies(root, SortKey::Newest);
        h.pump();
        assert_eq!(h.thread.editor().unwrap().target, child);
        assert_eq!(h.thread.editor().unwrap().draft, "keep me");
    }

    #[test]
    fn top_level_comment_prepends_canonical_record() {
        let mut h = harness(member(), 2);
        h.thread.initialize();
        h.pump();
        h.thread.submit_top_level_comment("hello there").unwrap();
        assert_eq!(h.thread.comment_count(), 2);
        h.pump();
        assert_eq!(h.thread.comment_count(), 3);
        let first = h.thread.node(h.thread.roots()[0]).unwrap();
        assert_eq!(first.body, "hello there");
        assert_eq!(h.thread.roots().len(), 3);
    }

    #[test]
    fn guests_cannot_reply_or_vote() {
        let mut h = harness(Interaction::ViewOnly, 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];
        assert_eq!(
            h.thread.submit_reply(root, "hi"),
            Err(InteractionError::Denied(Notice::ReplyToComment))
        );
        assert_eq!(
            h.thread.open_reply_editor(root),
            Err(InteractionError::Denied(Notice::ReplyToComment))
        );
        assert_eq!(
            h.thread.toggle_comment_vote(root),
            Err(InteractionError::Denied(Notice::UpvoteComment))
        );
        assert_eq!(
            h.thread.submit_top_level_comment("hi"),
            Err(InteractionError::Denied(Notice::CommentOnPost))
        );
    }

    #[test]
    fn comment_vote_is_optimistic() {
        let mut h = harness(member(), 1);
        h.thread.initialize();
        h.pump();
        let root = h.thread.roots()[0];
        h.thread.toggle_comment_vote(root).unwrap();
        assert_eq!(h.thread.node(root).unwrap().engagement.displayed_score(), 1);
        h.pump();
        assert!(h.thread.node(root).unwrap().engagement.has_engaged());
    }

    #[test]
    fn change_sort_persists_and_reloads() {
        let mut h = harness(member(), 3);
        h.thread.initialize();
        h.pump();
        assert!(!h.thread.change_sort(SortKey::Newest).unwrap());
        assert!(h.thread.change_sort(SortKey::Top).unwrap());
        assert!(h.thread.roots().is_empty());
        assert_eq!(h.preferences.comment_sorting(), SortKey::Top);
        h.pump();
        assert_eq!(h.thread.roots().len(), 3);
        assert_eq!(h.thread.cursor().sort, SortKey::Top);
    }

    #[test]
    fn relative_labels() {
        let now = Utc::now();
        assert_eq!(relative_label(now, now), "just now");
        assert_eq!(relative_label(now - ChronoDuration::minutes(5), now), "5 minutes ago");
        assert_eq!(relative_label(now - ChronoDuration::hours(1), now), "1 hour ago");
        assert_eq!(relative_label(now + ChronoDuration::days(2), now), "in 2 days");
    }
}
