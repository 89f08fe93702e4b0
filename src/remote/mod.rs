//! Remote collaborators: sessions, the saved-posts feed and media downloads
//!
//! The retrieval engine talks to the remote service only through the traits in
//! this module, so the platform-specific parts stay replaceable:
//!
//! - [`SessionStore`]: hands out an authenticated [`Session`] for an account
//! - [`SavedFeed`]: paginated listing of saved posts
//! - [`MediaFetcher`]: writes one item's bytes into a target directory
//!
//! Reqwest-based implementations ([`HttpFeed`], [`HttpFetcher`]) and a JSON file
//! session store ([`FileSessionStore`]) are provided.

mod http;
mod session;

pub use http::{HttpFeed, HttpFetcher, ResponseClassifier};
pub use session::FileSessionStore;

use crate::error::Result;
use crate::types::MediaItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Authenticated session for one account
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Account the session belongs to
    pub account: String,
    /// Cookies sent with every request
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    /// When the remote service stops accepting the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a session without expiry
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            cookies: BTreeMap::new(),
            expires_at: None,
        }
    }

    /// Whether the session has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// Value for a `Cookie` request header
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// One page of the saved-posts listing
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    /// Items on this page, newest first as reported by the remote
    #[serde(default)]
    pub items: Vec<MediaItem>,
    /// Cursor for the next page; None on the last page
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Source of authenticated sessions
///
/// Acquiring a session (browser cookies, interactive login) happens outside this
/// crate; implementations only persist and validate what was acquired.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Whether a usable session exists for `account`
    async fn is_valid(&self, account: &str) -> Result<bool>;

    /// Load the session for `account`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Auth`] when the session is missing, expired or unusable.
    async fn load(&self, account: &str) -> Result<Session>;
}

/// Paginated listing of the account's saved posts
#[async_trait]
pub trait SavedFeed: Send + Sync {
    /// Fetch one page; `cursor` is None for the first page
    async fn fetch_page(&self, session: &Session, cursor: Option<&str>) -> Result<FeedPage>;
}

/// Downloads one item's media
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Write the item into `target_dir` and return the final path
    ///
    /// Implementations must only return once the bytes are fully written; a partial
    /// file must never carry the final name.
    async fn download(
        &self,
        session: &Session,
        item: &MediaItem,
        target_dir: &Path,
    ) -> Result<PathBuf>;
}
