use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub type PostId = String;
pub type CommentId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Newest,
    Oldest,
    Top,
}

impl SortKey {
    pub const ALL: [SortKey; 3] = [SortKey::Newest, SortKey::Oldest, SortKey::Top];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Newest => "newest",
            SortKey::Oldest => "oldest",
            SortKey::Top => "top",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortKey::Newest => "Newest",
            SortKey::Oldest => "Oldest",
            SortKey::Top => "Top",
        }
    }

    /// Unknown keys fall back to the default ordering.
    pub fn from_key(key: &str) -> Self {
        match key.trim() {
            "oldest" => SortKey::Oldest,
            "top" => SortKey::Top,
            _ => SortKey::Newest,
        }
    }

    pub fn next(&self) -> Self {
        let index = Self::ALL.iter().position(|s| s == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which collection of posts a feed pages through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ResourceScope {
    #[default]
    Public,
    Flow(String),
    Search { title: String },
    User(String),
}

impl ResourceScope {
    pub fn describe(&self) -> String {
        match self {
            ResourceScope::Public => "all posts".to_string(),
            ResourceScope::Flow(name) => format!("flow {name}"),
            ResourceScope::Search { title } => format!("search \"{title}\""),
            ResourceScope::User(name) => format!("posts by {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    /// Last page that loaded; meaningless until `loaded` is set.
    pub index: u32,
    pub sort: SortKey,
    pub exhausted: bool,
    pub loaded: bool,
}

impl PageCursor {
    pub fn new(sort: SortKey) -> Self {
        Self {
            index: 0,
            sort,
            exhausted: false,
            loaded: false,
        }
    }

    /// Page a "load more" asks for: the first one until any page arrived.
    pub fn next_page(&self) -> u32 {
        if self.loaded {
            self.index + 1
        } else {
            0
        }
    }

    pub fn advance(&mut self, page: u32) {
        self.index = page;
        self.loaded = true;
    }
}

/// A post card as returned by the listing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContentItem {
    #[serde(rename = "post_id")]
    pub id: PostId,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default, rename = "views")]
    pub view_count: i64,
    #[serde(default, rename = "has_upvote")]
    pub has_engaged: bool,
}

/// One uploaded file of a post, with its optional markdown caption.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MediaItem {
    pub media_url: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Full post as served by `/api/posts/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PostDetail {
    #[serde(rename = "post_id")]
    pub id: PostId,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "username")]
    pub author: Option<String>,
    #[serde(
        rename = "created_on",
        default,
        deserialize_with = "deserialize_optional_timestamp"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub score: i64,
    #[serde(default, rename = "views")]
    pub view_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

/// Entry of the home page's flow strip.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlowCard {
    pub name: String,
    #[serde(default)]
    pub thumbnail_url: String,
}

/// Canonical comment record as the server returns it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommentRecord {
    pub id: CommentId,
    #[serde(default, rename = "username")]
    pub author: String,
    #[serde(rename = "created_on", deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "content")]
    pub body: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default, rename = "has_upvote")]
    pub has_engaged: bool,
}

/// Accepts RFC 3339 and HTTP-date stamps as well as the naive ISO form the
/// server emits for UTC columns.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => parse_timestamp(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // Flask serialises datetimes as HTTP dates.
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("invalid timestamp {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_falls_back_to_newest() {
        assert_eq!(SortKey::from_key("top"), SortKey::Top);
        assert_eq!(SortKey::from_key("bogus"), SortKey::Newest);
        assert_eq!(SortKey::Top.next(), SortKey::Newest);
    }

    #[test]
    fn decodes_comment_with_naive_timestamp() {
        let json = r#"{
            "id": 7,
            "username": "cat",
            "created_on": "2024-05-01T10:20:30",
            "content": "hello",
            "score": 3,
            "reply_count": 1,
            "has_upvote": true
        }"#;
        let record: CommentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, 7);
        assert_eq!(record.author, "cat");
        assert!(record.has_engaged);
        assert_eq!(record.created_at.to_rfc3339(), "2024-05-01T10:20:30+00:00");
    }

    #[test]
    fn cursor_requests_first_page_until_one_loads() {
        let mut cursor = PageCursor::new(SortKey::Newest);
        assert_eq!(cursor.next_page(), 0);
        cursor.advance(0);
        assert_eq!(cursor.next_page(), 1);
        cursor.advance(1);
        assert_eq!(cursor.next_page(), 2);
    }

    #[test]
    fn decodes_post_detail_with_media() {
        let json = r#"{
            "post_id": "abcd1234",
            "title": "Cats",
            "created_on": "Wed, 01 May 2024 10:20:30 GMT",
            "updated_on": null,
            "score": 5,
            "views": 12,
            "comment_count": 2,
            "media": [
                {"media_url": "/m/1.png", "description": "**first**"},
                {"media_url": "/m/2.png", "description": null}
            ],
            "thumbnail_url": "/t.png"
        }"#;
        let detail: PostDetail = serde_json::from_str(json).unwrap();
        assert_eq!(detail.media.len(), 2);
        assert_eq!(detail.media[0].description.as_deref(), Some("**first**"));
        assert_eq!(detail.media[1].description, None);
        assert_eq!(detail.view_count, 12);
        assert!(detail.author.is_none());
        assert_eq!(detail.created_at.unwrap().to_rfc3339(), "2024-05-01T10:20:30+00:00");
    }

    #[test]
    fn decodes_post_card() {
        let json = r#"{"post_id":"abcd1234","thumbnail_url":"/t.png","title":"Cat","score":2,"comment_count":4,"views":10}"#;
        let item: ContentItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.id, "abcd1234");
        assert_eq!(item.view_count, 10);
        assert!(!item.has_engaged);
    }
}
