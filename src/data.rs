use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

use crate::api;
use crate::composer::PostSubmission;
use crate::engagement::VoteTarget;
use crate::model::{
    CommentId, CommentRecord, ContentItem, FlowCard, MediaItem, PostDetail, PostId, ResourceScope,
    SortKey,
};

pub trait ContentSource: Send + Sync {
    fn fetch_page(
        &self,
        scope: &ResourceScope,
        page: u32,
        sort: SortKey,
    ) -> Result<Vec<ContentItem>>;
    fn fetch_post(&self, post_id: &str) -> Result<PostDetail>;
    /// Flows featured on the home page, each with a cover thumbnail.
    fn flows_overview(&self) -> Result<Vec<FlowCard>>;
}

pub trait CommentSource: Send + Sync {
    fn fetch_comments(&self, post_id: &str, page: u32, sort: SortKey)
        -> Result<Vec<CommentRecord>>;
    fn fetch_replies(
        &self,
        post_id: &str,
        comment_id: CommentId,
        sort: SortKey,
    ) -> Result<Vec<CommentRecord>>;
    fn post_comment(&self, post_id: &str, body: &str) -> Result<CommentRecord>;
    fn post_reply(&self, post_id: &str, comment_id: CommentId, body: &str)
        -> Result<CommentRecord>;
}

pub trait VoteService: Send + Sync {
    /// `engaged == true` places the vote, `false` removes it.
    fn set_vote(&self, target: &VoteTarget, engaged: bool) -> Result<()>;
}

pub trait SuggestionSource: Send + Sync {
    fn flow_suggestions(&self, prefix: &str) -> Result<Vec<String>>;
    fn username_available(&self, username: &str) -> Result<bool>;
}

pub trait PostPublisher: Send + Sync {
    fn create_post(&self, submission: &PostSubmission) -> Result<PostId>;
}

/// Blocks until every referenced image has either loaded or failed.
pub trait ImageLoader: Send + Sync {
    fn settle(&self, urls: &[String]);
}

/// View-tree container a component projects its state into. Only the owning
/// component writes to it.
pub trait RenderSink<T> {
    fn append(&mut self, items: &[T]);
    fn prepend(&mut self, item: &T);
    fn clear(&mut self);
    /// Recompute the masonry placement after new content settled.
    fn relayout(&mut self);
}

pub struct ApiBackend {
    client: Arc<api::Client>,
}

impl ApiBackend {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ContentSource for ApiBackend {
    fn fetch_page(
        &self,
        scope: &ResourceScope,
        page: u32,
        sort: SortKey,
    ) -> Result<Vec<ContentItem>> {
        self.client
            .posts(scope, page, sort)
            .with_context(|| format!("fetch page {page} of {}", scope.describe()))
    }

    fn fetch_post(&self, post_id: &str) -> Result<PostDetail> {
        self.client
            .post(post_id)
            .with_context(|| format!("fetch post {post_id}"))
    }

    fn flows_overview(&self) -> Result<Vec<FlowCard>> {
        self.client.flows_overview().context("fetch flows overview")
    }
}

impl CommentSource for ApiBackend {
    fn fetch_comments(
        &self,
        post_id: &str,
        page: u32,
        sort: SortKey,
    ) -> Result<Vec<CommentRecord>> {
        self.client
            .comments(post_id, page, sort)
            .context("fetch comments")
    }

    fn fetch_replies(
        &self,
        post_id: &str,
        comment_id: CommentId,
        sort: SortKey,
    ) -> Result<Vec<CommentRecord>> {
        self.client
            .replies(post_id, comment_id, sort)
            .context("fetch replies")
    }

    fn post_comment(&self, post_id: &str, body: &str) -> Result<CommentRecord> {
        self.client.comment(post_id, body).context("post comment")
    }

    fn post_reply(&self, post_id: &str, comment_id: CommentId, body: &str) -> Result<CommentRecord> {
        self.client
            .reply(post_id, comment_id, body)
            .context("post reply")
    }
}

impl VoteService for ApiBackend {
    fn set_vote(&self, target: &VoteTarget, engaged: bool) -> Result<()> {
        self.client.vote(target, engaged)
    }
}

impl SuggestionSource for ApiBackend {
    fn flow_suggestions(&self, prefix: &str) -> Result<Vec<String>> {
        self.client
            .flow_suggestions(prefix)
            .context("fetch flow suggestions")
    }

    fn username_available(&self, username: &str) -> Result<bool> {
        self.client
            .username_available(username)
            .context("check username availability")
    }
}

impl PostPublisher for ApiBackend {
    fn create_post(&self, submission: &PostSubmission) -> Result<PostId> {
        self.client.create_post(submission).context("create post")
    }
}

/// Offline catalogue of `total` synthetic posts, sliced into pages.
pub struct MockContentSource {
    total: usize,
    page_size: usize,
    fail_next: Mutex<bool>,
    calls: Mutex<Vec<(ResourceScope, u32, SortKey)>>,
}

impl MockContentSource {
    pub fn new(total: usize, page_size: usize) -> Self {
        Self {
            total,
            page_size: page_size.max(1),
            fail_next: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }

    pub fn calls(&self) -> Vec<(ResourceScope, u32, SortKey)> {
        self.calls.lock().clone()
    }
}

impl ContentSource for MockContentSource {
    fn fetch_page(
        &self,
        scope: &ResourceScope,
        page: u32,
        sort: SortKey,
    ) -> Result<Vec<ContentItem>> {
        self.calls.lock().push((scope.clone(), page, sort));
        if std::mem::take(&mut *self.fail_next.lock()) {
            bail!("mock: page {page} unavailable");
        }
        let start = (page as usize).saturating_mul(self.page_size);
        let end = (start + self.page_size).min(self.total);
        Ok((start..end).map(|n| mock_item(n, sort)).collect())
    }

    fn fetch_post(&self, post_id: &str) -> Result<PostDetail> {
        let n: usize = post_id
            .trim_start_matches('p')
            .parse()
            .with_context(|| format!("mock: no post {post_id}"))?;
        if n >= self.total {
            bail!("mock: no post {post_id}");
        }
        let item = mock_item(n, SortKey::Newest);
        Ok(PostDetail {
            id: item.id,
            title: item.title,
            author: Some(format!("user{}", n % 7)),
            created_at: Some(Utc::now() - ChronoDuration::hours(n as i64)),
            score: item.score,
            view_count: item.view_count,
            comment_count: item.comment_count,
            media: (0..=n % 3)
                .map(|i| MediaItem {
                    media_url: format!("/static/media/{n}-{i}.webp"),
                    description: (i == 0).then(|| format!("\u{200B}**Shot {n}** from the archive")),
                })
                .collect(),
        })
    }

    fn flows_overview(&self) -> Result<Vec<FlowCard>> {
        Ok(["cats", "landscapes", "memes"]
            .into_iter()
            .map(|name| FlowCard {
                name: name.to_string(),
                thumbnail_url: format!("/static/flows/{name}.webp"),
            })
            .collect())
    }
}

fn mock_item(n: usize, sort: SortKey) -> ContentItem {
    ContentItem {
        id: format!("p{n:07}"),
        thumbnail_url: format!("/static/thumbs/{n}.webp"),
        title: format!("Sample post #{n} ({})", sort.as_str()),
        score: (n % 17) as i64,
        comment_count: (n % 5) as i64,
        view_count: (n * 3) as i64,
        has_engaged: n % 4 == 0,
    }
}

#[derive(Default)]
struct CommentStore {
    roots: Vec<CommentRecord>,
    replies: HashMap<CommentId, Vec<CommentRecord>>,
    next_id: CommentId,
}

/// In-memory comment server. Sorting is ignored; records keep insertion
/// order, except that new top-level comments are listed first.
pub struct MockCommentSource {
    page_size: usize,
    store: Mutex<CommentStore>,
    fail_next: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl MockCommentSource {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            store: Mutex::new(CommentStore {
                next_id: 1,
                ..Default::default()
            }),
            fail_next: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Seeds `count` top-level comments and returns their ids.
    pub fn seed_roots(&self, count: usize) -> Vec<CommentId> {
        let mut store = self.store.lock();
        (0..count)
            .map(|_| {
                let record = mock_comment(&mut store, "seed");
                let id = record.id;
                store.roots.push(record);
                id
            })
            .collect()
    }

    /// Adds a reply as if another user had written it.
    pub fn add_reply(&self, parent: CommentId, body: &str) -> CommentId {
        let mut store = self.store.lock();
        insert_reply(&mut store, parent, body).id
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn check(&self, call: String) -> Result<()> {
        self.calls.lock().push(call.clone());
        if std::mem::take(&mut *self.fail_next.lock()) {
            bail!("mock: {call} failed");
        }
        Ok(())
    }
}

fn mock_comment(store: &mut CommentStore, body: &str) -> CommentRecord {
    let id = store.next_id;
    store.next_id += 1;
    CommentRecord {
        id,
        author: format!("user{}", id % 7),
        created_at: Utc::now() - ChronoDuration::minutes(id as i64),
        body: format!("{body} #{id}"),
        score: 0,
        reply_count: 0,
        has_engaged: false,
    }
}

fn insert_reply(store: &mut CommentStore, parent: CommentId, body: &str) -> CommentRecord {
    let record = mock_comment(store, body);
    store
        .replies
        .entry(parent)
        .or_default()
        .push(record.clone());
    let count = store.replies.get(&parent).map(Vec::len).unwrap_or(0) as i64;
    if let Some(root) = store.roots.iter_mut().find(|c| c.id == parent) {
        root.reply_count = count;
    }
    for list in store.replies.values_mut() {
        if let Some(reply) = list.iter_mut().find(|c| c.id == parent) {
            reply.reply_count = count;
        }
    }
    record
}

impl CommentSource for MockCommentSource {
    fn fetch_comments(
        &self,
        post_id: &str,
        page: u32,
        _sort: SortKey,
    ) -> Result<Vec<CommentRecord>> {
        self.check(format!("comments {post_id} page {page}"))?;
        let store = self.store.lock();
        Ok(store
            .roots
            .iter()
            .skip(page as usize * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect())
    }

    fn fetch_replies(
        &self,
        post_id: &str,
        comment_id: CommentId,
        _sort: SortKey,
    ) -> Result<Vec<CommentRecord>> {
        self.check(format!("replies {post_id}/{comment_id}"))?;
        let store = self.store.lock();
        Ok(store.replies.get(&comment_id).cloned().unwrap_or_default())
    }

    fn post_comment(&self, post_id: &str, body: &str) -> Result<CommentRecord> {
        self.check(format!("comment {post_id}"))?;
        let mut store = self.store.lock();
        let record = mock_comment(&mut store, body);
        let record = CommentRecord {
            created_at: Utc::now(),
            body: body.to_string(),
            ..record
        };
        store.roots.insert(0, record.clone());
        Ok(record)
    }

    fn post_reply(&self, post_id: &str, comment_id: CommentId, body: &str) -> Result<CommentRecord> {
        self.check(format!("reply {post_id}/{comment_id}"))?;
        let mut store = self.store.lock();
        Ok(insert_reply(&mut store, comment_id, body))
    }
}

#[derive(Default)]
pub struct MockVoteService {
    fail_next: Mutex<bool>,
    calls: Mutex<Vec<(VoteTarget, bool)>>,
}

impl MockVoteService {
    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }

    pub fn calls(&self) -> Vec<(VoteTarget, bool)> {
        self.calls.lock().clone()
    }
}

impl VoteService for MockVoteService {
    fn set_vote(&self, target: &VoteTarget, engaged: bool) -> Result<()> {
        self.calls.lock().push((target.clone(), engaged));
        if std::mem::take(&mut *self.fail_next.lock()) {
            bail!("mock: vote rejected");
        }
        Ok(())
    }
}

pub struct MockSuggestionSource {
    flows: Vec<String>,
    taken_usernames: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl MockSuggestionSource {
    pub fn new<I, S>(flows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flows: flows.into_iter().map(Into::into).collect(),
            taken_usernames: vec!["admin".into(), "cat".into()],
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl SuggestionSource for MockSuggestionSource {
    fn flow_suggestions(&self, prefix: &str) -> Result<Vec<String>> {
        self.calls.lock().push(prefix.to_string());
        Ok(self
            .flows
            .iter()
            .filter(|flow| flow.starts_with(prefix))
            .take(8)
            .cloned()
            .collect())
    }

    fn username_available(&self, username: &str) -> Result<bool> {
        self.calls.lock().push(username.to_string());
        Ok(!self.taken_usernames.iter().any(|taken| taken == username))
    }
}

/// Accepts every upload and hands out sequential ids.
#[derive(Default)]
pub struct MockPublisher {
    submissions: Mutex<Vec<PostSubmission>>,
}

impl MockPublisher {
    pub fn submissions(&self) -> Vec<PostSubmission> {
        self.submissions.lock().clone()
    }
}

impl PostPublisher for MockPublisher {
    fn create_post(&self, submission: &PostSubmission) -> Result<PostId> {
        let mut submissions = self.submissions.lock();
        submissions.push(submission.clone());
        Ok(format!("new{:05}", submissions.len()))
    }
}

/// Treats every image as already decoded.
#[derive(Default)]
pub struct InstantImages;

impl ImageLoader for InstantImages {
    fn settle(&self, _urls: &[String]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_catalogue_pages() {
        let source = MockContentSource::new(25, 20);
        let first = source.fetch_page(&ResourceScope::Public, 0, SortKey::Newest).unwrap();
        let second = source.fetch_page(&ResourceScope::Public, 1, SortKey::Newest).unwrap();
        let third = source.fetch_page(&ResourceScope::Public, 2, SortKey::Newest).unwrap();
        assert_eq!((first.len(), second.len(), third.len()), (20, 5, 0));
        assert_eq!(source.calls().len(), 3);
    }

    #[test]
    fn mock_post_detail_matches_card() {
        let source = MockContentSource::new(25, 20);
        let detail = source.fetch_post("p0000004").unwrap();
        assert_eq!(detail.title, "Sample post #4 (newest)");
        assert_eq!(detail.media.len(), 2);
        assert!(detail.media[0].description.is_some());
        assert!(source.fetch_post("p0000099").is_err());
    }

    #[test]
    fn mock_reply_updates_parent_count() {
        let source = MockCommentSource::new(30);
        let roots = source.seed_roots(1);
        source.post_reply("p", roots[0], "hi").unwrap();
        let listed = source.fetch_comments("p", 0, SortKey::Newest).unwrap();
        assert_eq!(listed[0].reply_count, 1);
        assert_eq!(source.fetch_replies("p", roots[0], SortKey::Newest).unwrap().len(), 1);
    }
}
