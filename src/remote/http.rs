//! reqwest-based feed and media fetcher

use super::{FeedPage, MediaFetcher, SavedFeed, Session};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::types::MediaItem;
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::COOKIE;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

/// Longest body excerpt kept in an error message
const BODY_EXCERPT_LEN: usize = 200;

/// Default extension when the media URL does not carry one
const DEFAULT_EXTENSION: &str = "mp4";

/// Maps unsuccessful responses onto the error taxonomy
///
/// - 429, or a body matching the rate-limit pattern: [`Error::RateLimited`]
/// - 401/403, or a body matching the auth pattern: [`Error::Auth`]
/// - everything else: [`Error::Http`] (5xx retried as transient, 4xx permanent)
#[derive(Clone, Debug)]
pub struct ResponseClassifier {
    rate_limit: Regex,
    auth_failure: Regex,
}

impl ResponseClassifier {
    /// Compile the patterns from the remote configuration
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let rate_limit = Regex::new(&config.rate_limit_pattern).map_err(|e| {
            Error::config("remote.rate_limit_pattern", format!("invalid regex: {e}"))
        })?;
        let auth_failure = Regex::new(&config.auth_failure_pattern).map_err(|e| {
            Error::config("remote.auth_failure_pattern", format!("invalid regex: {e}"))
        })?;
        Ok(Self {
            rate_limit,
            auth_failure,
        })
    }

    /// Error for an unsuccessful response
    pub fn classify(&self, status: StatusCode, body: &str) -> Error {
        let excerpt = excerpt(body);
        if status == StatusCode::TOO_MANY_REQUESTS || self.rate_limit.is_match(body) {
            return Error::RateLimited(format!("HTTP {}: {}", status.as_u16(), excerpt));
        }
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || self.auth_failure.is_match(body)
        {
            return Error::Auth(format!("HTTP {}: {}", status.as_u16(), excerpt));
        }
        Error::Http {
            status: status.as_u16(),
            message: excerpt,
        }
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn build_client(config: &RemoteConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(config.user_agent.clone())
        .build()?)
}

async fn check_response(
    response: reqwest::Response,
    classifier: &ResponseClassifier,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classifier.classify(status, &body))
}

/// Saved-posts listing served as JSON pages
///
/// `GET <feed_url>?cursor=<cursor>` with the session cookies; the body is a
/// [`FeedPage`].
pub struct HttpFeed {
    client: reqwest::Client,
    feed_url: Url,
    classifier: Arc<ResponseClassifier>,
}

impl HttpFeed {
    /// Create a feed client from the remote configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `feed_url` is unset or invalid.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let raw = config
            .feed_url
            .as_deref()
            .ok_or_else(|| Error::config("remote.feed_url", "feed URL is not configured"))?;
        let feed_url = Url::parse(raw)
            .map_err(|e| Error::config("remote.feed_url", format!("invalid URL: {e}")))?;
        Ok(Self {
            client: build_client(config)?,
            feed_url,
            classifier: Arc::new(ResponseClassifier::from_config(config)?),
        })
    }

    fn page_url(&self, cursor: Option<&str>) -> Url {
        let mut url = self.feed_url.clone();
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("cursor", cursor);
        }
        url
    }
}

#[async_trait]
impl SavedFeed for HttpFeed {
    async fn fetch_page(&self, session: &Session, cursor: Option<&str>) -> Result<FeedPage> {
        let url = self.page_url(cursor);
        debug!(url = %url, "fetching feed page");

        let response = self
            .client
            .get(url)
            .header(COOKIE, session.cookie_header())
            .send()
            .await?;
        let response = check_response(response, &self.classifier).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Streams media bodies to disk
///
/// Bytes are written to `<id>.<ext>.part`, synced, then renamed to `<id>.<ext>`, so
/// the final name only ever refers to a complete file. `<ext>` is always one of
/// the media extensions the fetcher was built with, so the file survives the
/// side-artifact purge and is later found as a merge candidate.
pub struct HttpFetcher {
    client: reqwest::Client,
    classifier: Arc<ResponseClassifier>,
    media_extensions: Vec<String>,
}

impl HttpFetcher {
    /// Create a fetcher from the remote configuration
    ///
    /// `media_extensions` is normally `cleanup.media_extensions`; a URL whose
    /// extension is not listed is saved as `mp4`.
    pub fn new(config: &RemoteConfig, media_extensions: &[String]) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            classifier: Arc::new(ResponseClassifier::from_config(config)?),
            media_extensions: media_extensions.to_vec(),
        })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn download(
        &self,
        session: &Session,
        item: &MediaItem,
        target_dir: &Path,
    ) -> Result<PathBuf> {
        let ext = extension_from_url(&item.remote_location, &self.media_extensions);
        let stem = safe_file_stem(item.id.as_str());
        let final_path = target_dir.join(format!("{stem}.{ext}"));
        let part_path = target_dir.join(format!("{stem}.{ext}.part"));

        let response = self
            .client
            .get(&item.remote_location)
            .header(COOKIE, session.cookie_header())
            .send()
            .await?;
        let response = check_response(response, &self.classifier).await?;

        tokio::fs::create_dir_all(target_dir).await?;
        let written = match write_body(response, &part_path).await {
            Ok(written) => written,
            Err(e) => {
                remove_partial(&part_path).await;
                return Err(e);
            }
        };

        if written == 0 {
            remove_partial(&part_path).await;
            return Err(Error::Remote(format!(
                "empty response body for {}",
                item.id
            )));
        }

        tokio::fs::rename(&part_path, &final_path).await?;
        debug!(item = %item.id, path = %final_path.display(), bytes = written, "media written");
        Ok(final_path)
    }
}

async fn write_body(response: reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove partial download");
    }
}

/// Extension of the last URL path segment, lowercase; `mp4` unless it is in `allowed`
pub(crate) fn extension_from_url(location: &str, allowed: &[String]) -> String {
    Url::parse(location)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|name| {
            Path::new(&name)
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
        })
        .filter(|ext| allowed.iter().any(|m| m.eq_ignore_ascii_case(ext)))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Identifier reduced to characters safe in a file name
pub(crate) fn safe_file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() { "item".into() } else { stem }
}
