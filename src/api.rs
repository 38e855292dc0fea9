use std::time::Duration;

use anyhow::{bail, Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::{multipart, Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{COOKIE, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::composer::PostSubmission;
use crate::engagement::VoteTarget;
use crate::model::{
    CommentId, CommentRecord, ContentItem, FlowCard, PostDetail, PostId, ResourceScope, SortKey,
};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000/";

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Value of the server's `session` cookie for a logged-in member.
    pub session_cookie: Option<String>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    session_cookie: Option<String>,
}

#[derive(Serialize)]
struct NewComment<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct CreatedPost {
    post_id: PostId,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Suggestion {
    Name(String),
    Flow { name: String },
}

impl Suggestion {
    fn into_name(self) -> String {
        match self {
            Suggestion::Name(name) | Suggestion::Flow { name } => name,
        }
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api: user agent required");
        }
        let raw_base = if config.base_url.trim().is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            config.base_url
        };
        let mut base_url =
            Url::parse(&raw_base).with_context(|| format!("api: invalid base url {raw_base}"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .context("api: build http client")?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            session_cookie: config.session_cookie.filter(|c| !c.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Browser link for a post page.
    pub fn post_page_url(&self, post_id: &str) -> Result<Url> {
        self.url(&format!("posts/{}", segment(post_id)), &[])
    }

    pub fn posts(&self, scope: &ResourceScope, page: u32, sort: SortKey) -> Result<Vec<ContentItem>> {
        let url = self.posts_url(scope, page, sort)?;
        self.get_json(url)
    }

    pub fn post(&self, post_id: &str) -> Result<PostDetail> {
        let url = self.url(&format!("api/posts/{}", segment(post_id)), &[])?;
        self.get_json(url)
    }

    pub fn flows_overview(&self) -> Result<Vec<FlowCard>> {
        let url = self.url("api/flows", &[("overview", "1")])?;
        self.get_json(url)
    }

    pub fn comments(&self, post_id: &str, page: u32, sort: SortKey) -> Result<Vec<CommentRecord>> {
        let url = self.url(
            &format!("api/posts/{}/comments", segment(post_id)),
            &[("page", &page.to_string()), ("sort", sort.as_str())],
        )?;
        self.get_json(url)
    }

    pub fn replies(
        &self,
        post_id: &str,
        comment_id: CommentId,
        sort: SortKey,
    ) -> Result<Vec<CommentRecord>> {
        let url = self.url(
            &format!("api/posts/{}/comments/{comment_id}/replies", segment(post_id)),
            &[("sort", sort.as_str())],
        )?;
        self.get_json(url)
    }

    pub fn comment(&self, post_id: &str, body: &str) -> Result<CommentRecord> {
        let url = self.url(&format!("api/posts/{}/comments", segment(post_id)), &[])?;
        let response = self
            .request(Method::POST, url)
            .json(&NewComment { content: body })
            .send()
            .context("api: send comment")?;
        parse_json(check(response)?)
    }

    pub fn reply(&self, post_id: &str, comment_id: CommentId, body: &str) -> Result<CommentRecord> {
        let url = self.url(
            &format!("api/posts/{}/comments/{comment_id}/replies", segment(post_id)),
            &[],
        )?;
        let response = self
            .request(Method::POST, url)
            .json(&NewComment { content: body })
            .send()
            .context("api: send reply")?;
        parse_json(check(response)?)
    }

    /// Places (`engaged`) or removes an upvote.
    pub fn vote(&self, target: &VoteTarget, engaged: bool) -> Result<()> {
        let url = self.vote_url(target)?;
        let method = if engaged { Method::POST } else { Method::DELETE };
        let response = self
            .request(method, url)
            .send()
            .context("api: send vote")?;
        check(response)?;
        Ok(())
    }

    pub fn flow_suggestions(&self, prefix: &str) -> Result<Vec<String>> {
        let url = self.url("api/flow-suggestions", &[("name", prefix)])?;
        let suggestions: Vec<Suggestion> = self.get_json(url)?;
        Ok(suggestions.into_iter().map(Suggestion::into_name).collect())
    }

    /// The username resource answers 404 when nobody has claimed the name.
    pub fn username_available(&self, username: &str) -> Result<bool> {
        let url = self.url(&format!("api/usernames/{}", segment(username)), &[])?;
        let response = self
            .request(Method::GET, url)
            .send()
            .context("api: check username")?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(true),
            status if status.is_success() => Ok(false),
            status => bail!("api: username lookup failed: {status}"),
        }
    }

    pub fn create_post(&self, submission: &PostSubmission) -> Result<PostId> {
        let mut form = multipart::Form::new()
            .text("title", submission.title.clone())
            .text("is_public", submission.is_public.to_string());
        for flow in &submission.flows {
            form = form.text("flow", flow.clone());
        }
        for media in &submission.media {
            form = form
                .file("media_file", &media.path)
                .with_context(|| format!("api: attach {}", media.path.display()))?
                .text("description", media.description.clone());
        }

        let url = self.url("api/posts", &[])?;
        let response = self
            .request(Method::POST, url)
            .multipart(form)
            .send()
            .context("api: upload post")?;
        let created: CreatedPost = parse_json(check(response)?)?;
        Ok(created.post_id)
    }

    fn posts_url(&self, scope: &ResourceScope, page: u32, sort: SortKey) -> Result<Url> {
        let page = page.to_string();
        let paging = [("page", page.as_str()), ("sort", sort.as_str())];
        match scope {
            ResourceScope::Public => self.url("api/posts", &paging),
            ResourceScope::Search { title } => self.url(
                "api/posts",
                &[("title", title.as_str()), paging[0], paging[1]],
            ),
            ResourceScope::Flow(name) => {
                self.url(&format!("api/flows/{}/posts", segment(name)), &paging)
            }
            ResourceScope::User(name) => {
                self.url(&format!("api/users/{}/posts", segment(name)), &paging)
            }
        }
    }

    fn vote_url(&self, target: &VoteTarget) -> Result<Url> {
        match target {
            VoteTarget::Post(post_id) => {
                self.url(&format!("api/posts/{}/upvote", segment(post_id)), &[])
            }
            VoteTarget::Comment {
                post_id,
                comment_id,
            } => self.url(
                &format!("api/posts/{}/comments/{comment_id}/vote", segment(post_id)),
                &[],
            ),
        }
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .with_context(|| format!("api: join {path}"))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().copied());
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "api: request");
        let builder = self
            .http
            .request(method, url)
            .header(USER_AGENT, &self.user_agent);
        match &self.session_cookie {
            Some(cookie) => builder.header(COOKIE, format!("session={cookie}")),
            None => builder,
        }
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T> {
        let response = self
            .request(Method::GET, url.clone())
            .send()
            .with_context(|| format!("api: GET {}", url.path()))?;
        parse_json(check(response)?)
    }
}

fn segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let path = response.url().path().to_string();
    let body = response.text().unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        bail!("api: {path} failed: {status}");
    }
    bail!("api: {path} failed: {status} - {body}");
}

fn parse_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T> {
    let text = response.text().context("api: read body")?;
    serde_json::from_str(&text).context("api: decode body")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::new(ClientConfig {
            base_url: "https://imgflow.example/app".into(),
            user_agent: "imgflow-tests".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn scope_urls() {
        let client = client();
        assert_eq!(
            client
                .posts_url(&ResourceScope::Public, 2, SortKey::Top)
                .unwrap()
                .as_str(),
            "https://imgflow.example/app/api/posts?page=2&sort=top"
        );
        assert_eq!(
            client
                .posts_url(
                    &ResourceScope::Search {
                        title: "red cat".into()
                    },
                    0,
                    SortKey::Newest
                )
                .unwrap()
                .as_str(),
            "https://imgflow.example/app/api/posts?title=red+cat&page=0&sort=newest"
        );
        assert_eq!(
            client
                .posts_url(&ResourceScope::Flow("my-flow".into()), 1, SortKey::Oldest)
                .unwrap()
                .as_str(),
            "https://imgflow.example/app/api/flows/my-flow/posts?page=1&sort=oldest"
        );
    }

    #[test]
    fn vote_urls() {
        let client = client();
        assert_eq!(
            client
                .vote_url(&VoteTarget::Comment {
                    post_id: "abcd1234".into(),
                    comment_id: 9
                })
                .unwrap()
                .path(),
            "/app/api/posts/abcd1234/comments/9/vote"
        );
        assert_eq!(
            client
                .vote_url(&VoteTarget::Post("abcd1234".into()))
                .unwrap()
                .path(),
            "/app/api/posts/abcd1234/upvote"
        );
    }

    #[test]
    fn suggestions_accept_both_shapes() {
        let names: Vec<Suggestion> =
            serde_json::from_str(r#"["cats", {"name": "catnip"}]"#).unwrap();
        let names: Vec<String> = names.into_iter().map(Suggestion::into_name).collect();
        assert_eq!(names, ["cats", "catnip"]);
    }

    #[test]
    fn path_segments_are_escaped() {
        assert_eq!(segment("a b/c"), "a%20b%2Fc");
        assert_eq!(segment("my-flow"), "my-flow");
    }

    #[test]
    fn rejects_empty_user_agent() {
        assert!(Client::new(ClientConfig::default()).is_err());
    }
}
