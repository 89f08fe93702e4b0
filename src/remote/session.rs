//! JSON file session store

use super::{Session, SessionStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Sessions persisted as `session-<account>.json` in one directory
///
/// A session is valid when the file exists, parses, belongs to the requested
/// account and has not expired.
#[derive(Clone, Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the session file for `account`
    pub fn session_path(&self, account: &str) -> Result<PathBuf> {
        if account.is_empty()
            || account.contains(['/', '\\'])
            || account.contains("..")
        {
            return Err(Error::Auth(format!("invalid account name '{account}'")));
        }
        Ok(self.dir.join(format!("session-{account}.json")))
    }

    /// Persist a session, replacing any previous one atomically
    pub async fn save(&self, session: &Session) -> Result<PathBuf> {
        let path = self.session_path(&session.account)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(session)?;
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &path).await?;
        debug!(account = %session.account, path = %path.display(), "session saved");
        Ok(path)
    }

    async fn read(&self, path: &Path, account: &str) -> Result<Session> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Auth(format!("no saved session for '{account}'")));
            }
            Err(e) => return Err(e.into()),
        };

        let session: Session = serde_json::from_slice(&raw).map_err(|e| {
            warn!(path = %path.display(), error = %e, "session file is unreadable");
            Error::Auth(format!("session file for '{account}' is unreadable"))
        })?;

        if session.account != account {
            return Err(Error::Auth(format!(
                "session file for '{account}' belongs to '{}'",
                session.account
            )));
        }
        if session.is_expired_at(Utc::now()) {
            return Err(Error::Auth(format!("session for '{account}' has expired")));
        }
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn is_valid(&self, account: &str) -> Result<bool> {
        match self.load(account).await {
            Ok(_) => Ok(true),
            Err(Error::Auth(reason)) => {
                debug!(account, reason = %reason, "session is not usable");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn load(&self, account: &str) -> Result<Session> {
        let path = self.session_path(account)?;
        self.read(&path, account).await
    }
}
