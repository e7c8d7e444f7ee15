//! XRPC client for the public read API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::api::{PostView, RecordPage, RemoteApi};
use super::pacer::Pacer;
use crate::types::{now_secs, SkyError, SkyResult};

/// Page size used when counting likes or reposts by paging through them.
const COUNT_PAGE_SIZE: usize = 100;

/// Upper bound on pages walked for a single like/repost count.
const MAX_COUNT_PAGES: usize = 100;

/// Connection settings for [`XrpcClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base url of the read service, without the `/xrpc` suffix.
    pub service_url: String,
    /// Bearer token from the external auth collaborator.
    pub access_token: Option<String>,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
    /// Wait used when a 429 response carries no usable hint.
    pub default_retry_after: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_url: "https://public.api.bsky.app".to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(5),
            default_retry_after: Duration::from_secs(300),
        }
    }
}

/// `RemoteApi` over HTTP. Each request is bounded by `request_timeout`,
/// counted from after the pacer admits it; multi-page counts time out per page.
pub struct XrpcClient {
    config: ClientConfig,
    http: Client,
    pacer: Option<Arc<Pacer>>,
}

#[derive(Deserialize)]
struct PostsResponse {
    #[serde(default)]
    posts: Vec<PostView>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LikesResponse {
    #[serde(default)]
    likes: Vec<serde_json::Value>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepostedByResponse {
    #[serde(default)]
    reposted_by: Vec<serde_json::Value>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct ThreadResponse {
    thread: ThreadNode,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadNode {
    #[serde(default)]
    post: Option<PostView>,
    #[serde(default)]
    replies: Vec<serde_json::Value>,
}

impl XrpcClient {
    /// Build a client. Fails only if the TLS backend cannot be initialised.
    pub fn new(config: ClientConfig) -> SkyResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("skyvault/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            http,
            pacer: None,
        })
    }

    /// Space every request through `pacer`.
    pub fn with_pacer(mut self, pacer: Arc<Pacer>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        nsid: &'static str,
        query: &[(&str, String)],
    ) -> SkyResult<T> {
        if let Some(pacer) = &self.pacer {
            pacer.acquire().await;
        }

        let url = format!(
            "{}/xrpc/{}",
            self.config.service_url.trim_end_matches('/'),
            nsid
        );
        let mut request = self.http.get(&url).query(query);
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(nsid, e))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_from(
                response.headers(),
                now_secs(),
                self.config.default_retry_after,
            );
            log::debug!("{} throttled, retry after {:?}", nsid, retry_after);
            return Err(SkyError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SkyError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| classify_transport(nsid, e))
    }
}

fn classify_transport(operation: &str, err: reqwest::Error) -> SkyError {
    if err.is_timeout() {
        SkyError::NetworkTimeout {
            operation: operation.to_string(),
        }
    } else {
        SkyError::Transport(err)
    }
}

/// Derive the wait from a 429 response: `retry-after` in seconds, else the
/// `ratelimit-reset` epoch second, else `fallback`.
pub fn retry_after_from(headers: &HeaderMap, now: i64, fallback: Duration) -> Duration {
    let header_int = |name: &str| -> Option<i64> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(secs) = header_int("retry-after") {
        return Duration::from_secs(secs.max(0) as u64);
    }
    if let Some(reset) = header_int("ratelimit-reset") {
        return Duration::from_secs((reset - now).max(1) as u64);
    }
    fallback
}

#[async_trait]
impl RemoteApi for XrpcClient {
    async fn list_records(
        &self,
        repo: &str,
        collection: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> SkyResult<RecordPage> {
        let mut query = vec![
            ("repo", repo.to_string()),
            ("collection", collection.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        self.get_json("com.atproto.repo.listRecords", &query).await
    }

    async fn get_posts(&self, uris: &[String]) -> SkyResult<Vec<PostView>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        let query: Vec<(&str, String)> = uris.iter().map(|u| ("uris", u.clone())).collect();
        let response: PostsResponse = self.get_json("app.bsky.feed.getPosts", &query).await?;
        Ok(response.posts)
    }

    async fn get_like_count(&self, uri: &str) -> SkyResult<u64> {
        let mut total = 0u64;
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_COUNT_PAGES {
            let mut query = vec![
                ("uri", uri.to_string()),
                ("limit", COUNT_PAGE_SIZE.to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }
            let page: LikesResponse = self.get_json("app.bsky.feed.getLikes", &query).await?;
            total += page.likes.len() as u64;
            match page.cursor {
                Some(next) if !page.likes.is_empty() => cursor = Some(next),
                _ => return Ok(total),
            }
        }
        log::warn!("like count for {} truncated at {}", uri, total);
        Ok(total)
    }

    async fn get_repost_count(&self, uri: &str) -> SkyResult<u64> {
        let mut total = 0u64;
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_COUNT_PAGES {
            let mut query = vec![
                ("uri", uri.to_string()),
                ("limit", COUNT_PAGE_SIZE.to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }
            let page: RepostedByResponse =
                self.get_json("app.bsky.feed.getRepostedBy", &query).await?;
            total += page.reposted_by.len() as u64;
            match page.cursor {
                Some(next) if !page.reposted_by.is_empty() => cursor = Some(next),
                _ => return Ok(total),
            }
        }
        log::warn!("repost count for {} truncated at {}", uri, total);
        Ok(total)
    }

    async fn get_reply_count(&self, uri: &str) -> SkyResult<u64> {
        let query = [
            ("uri", uri.to_string()),
            ("depth", "1".to_string()),
            ("parentHeight", "0".to_string()),
        ];
        let response: ThreadResponse = self.get_json("app.bsky.feed.getPostThread", &query).await?;
        let thread = response.thread;
        Ok(thread
            .post
            .and_then(|p| p.reply_count)
            .unwrap_or(thread.replies.len() as u64))
    }

    fn times_out_requests(&self) -> bool {
        true
    }
}
