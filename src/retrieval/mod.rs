//! Retrieval engine: paginated listing, per-item retry and ledger bookkeeping
//!
//! A retrieval run:
//! 1. Authenticate - load a valid session or fail with [`Error::Auth`]
//! 2. List - walk the saved-posts feed page by page, keeping only videos that are
//!    neither in the download ledger nor already seen in this run
//! 3. Download - fetch each item with bounded retry/backoff, confirm the bytes on
//!    disk, purge side artifacts
//! 4. Record - append the ids of every confirmed download to the ledger, once,
//!    whether the run finished, was cancelled or is about to abort

mod cleanup;

pub use cleanup::PurgeStats;

use crate::config::Config;
use crate::error::{Error, FailureKind, Result};
use crate::ledger::Ledger;
use crate::remote::{FeedPage, MediaFetcher, SavedFeed, Session, SessionStore};
use crate::retry::{BackoffPolicy, Classify, RetryError, retry_with_backoff_observed, sleep_or_cancel};
use crate::types::{Event, LocalFile, MediaId, MediaItem};
use futures::{Stream, StreamExt, stream};
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A confirmed download
#[derive(Clone, Debug)]
pub struct DownloadedItem {
    /// Item identifier
    pub id: MediaId,
    /// File on disk
    pub file: LocalFile,
}

/// An item given up on after retries
#[derive(Clone, Debug)]
pub struct FailedItem {
    /// Item identifier
    pub id: MediaId,
    /// Last error
    pub error: String,
}

/// Outcome of [`Retriever::run`]
#[derive(Clone, Debug, Default)]
pub struct RetrievalReport {
    /// Items downloaded and confirmed on disk in this run
    pub downloaded: Vec<DownloadedItem>,
    /// Items skipped because the ledger already had them
    pub skipped_existing: usize,
    /// Items skipped because they are not videos
    pub skipped_non_video: usize,
    /// Items given up on after retries
    pub failed: Vec<FailedItem>,
    /// Identifiers newly written to the ledger
    pub recorded: usize,
    /// Whether the run stopped on cancellation
    pub cancelled: bool,
}

/// Classification of a listed item
#[derive(Clone, Debug)]
enum Listed {
    New(MediaItem),
    AlreadyRecorded(MediaId),
    NotVideo(MediaId),
}

struct ListingState {
    cursor: Option<String>,
    visited_cursors: HashSet<String>,
    pending: VecDeque<MediaItem>,
    seen: HashSet<MediaId>,
    pages: usize,
    exhausted: bool,
}

/// Fetches new saved videos for an account
pub struct Retriever {
    config: Arc<Config>,
    sessions: Arc<dyn SessionStore>,
    feed: Arc<dyn SavedFeed>,
    fetcher: Arc<dyn MediaFetcher>,
    policy: BackoffPolicy,
    event_tx: broadcast::Sender<Event>,
}

impl Retriever {
    /// Create a retriever over the given collaborators
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<dyn SessionStore>,
        feed: Arc<dyn SavedFeed>,
        fetcher: Arc<dyn MediaFetcher>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let policy = BackoffPolicy::from(&config.retry);
        Self {
            config,
            sessions,
            feed,
            fetcher,
            policy,
            event_tx,
        }
    }

    /// Load a valid session for `account`
    ///
    /// # Errors
    ///
    /// [`Error::Auth`] when no usable session exists; the run cannot proceed
    /// until the user logs in again.
    pub async fn authenticate(&self, account: &str) -> Result<Session> {
        if !self.sessions.is_valid(account).await? {
            error!(account, "no valid session");
            return Err(Error::Auth(format!(
                "no valid session for '{account}'"
            )));
        }
        let session = self.sessions.load(account).await?;
        info!(account, "session loaded");
        Ok(session)
    }

    /// Lazily list video items that are neither in `ledger` nor already seen
    ///
    /// Pages are fetched on demand with retry and a politeness delay between
    /// requests. Cancellation ends the stream with [`Error::Cancelled`].
    pub fn fetch_new_items<'a>(
        &'a self,
        session: &'a Session,
        ledger: &'a Ledger,
        cancel: &'a CancellationToken,
    ) -> impl Stream<Item = Result<MediaItem>> + 'a {
        self.listing(session, ledger, cancel)
            .filter_map(|entry| async move {
                match entry {
                    Ok(Listed::New(item)) => Some(Ok(item)),
                    Ok(Listed::AlreadyRecorded(_)) | Ok(Listed::NotVideo(_)) => None,
                    Err(e) => Some(Err(e)),
                }
            })
    }

    fn listing<'a>(
        &'a self,
        session: &'a Session,
        ledger: &'a Ledger,
        cancel: &'a CancellationToken,
    ) -> impl Stream<Item = Result<Listed>> + 'a {
        let initial = ListingState {
            cursor: None,
            visited_cursors: HashSet::new(),
            pending: VecDeque::new(),
            seen: HashSet::new(),
            pages: 0,
            exhausted: false,
        };

        stream::unfold(initial, move |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    if !state.seen.insert(item.id.clone()) {
                        debug!(item = %item.id, "item listed twice, ignoring repeat");
                        continue;
                    }
                    let listed = if !item.is_video() {
                        Listed::NotVideo(item.id)
                    } else if ledger.contains(item.id.as_str()) {
                        Listed::AlreadyRecorded(item.id)
                    } else {
                        Listed::New(item)
                    };
                    return Some((Ok(listed), state));
                }

                if state.exhausted {
                    return None;
                }

                if state.pages > 0 && !self.throttle(cancel).await {
                    state.exhausted = true;
                    return Some((Err(Error::Cancelled), state));
                }

                match self.fetch_page(session, state.cursor.as_deref(), cancel).await {
                    Ok(page) => {
                        state.pages += 1;
                        debug!(
                            page = state.pages,
                            items = page.items.len(),
                            has_next = page.next_cursor.is_some(),
                            "feed page fetched"
                        );
                        state.cursor = match page.next_cursor {
                            Some(next) if !state.visited_cursors.insert(next.clone()) => {
                                warn!(cursor = %next, "feed cursor repeated, stopping pagination");
                                None
                            }
                            other => other,
                        };
                        state.exhausted = state.cursor.is_none();
                        state.pending.extend(page.items);
                    }
                    Err(e) => {
                        state.exhausted = true;
                        return Some((Err(e), state));
                    }
                }
            }
        })
    }

    async fn fetch_page(
        &self,
        session: &Session,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FeedPage> {
        retry_with_backoff_observed(
            &self.policy,
            cancel,
            |_| self.feed.fetch_page(session, cursor),
            |_, kind, delay| {
                self.event_tx
                    .send(Event::Backoff {
                        id: None,
                        delay,
                        rate_limited: kind == FailureKind::RateLimited,
                    })
                    .ok();
            },
        )
        .await
        .map_err(Error::from)
    }

    /// Download one item with the retry policy
    ///
    /// Success means the file exists on disk with a non-zero size. Side artifacts
    /// in the download directory are purged afterwards, never the downloaded file
    /// itself, and the file is confirmed again once the purge is done.
    pub async fn download(
        &self,
        session: &Session,
        item: &MediaItem,
        cancel: &CancellationToken,
    ) -> std::result::Result<LocalFile, RetryError<Error>> {
        let target_dir = &self.config.paths.download_dir;

        let file = retry_with_backoff_observed(
            &self.policy,
            cancel,
            |attempt| async move {
                self.event_tx
                    .send(Event::Downloading {
                        id: item.id.clone(),
                        attempt,
                    })
                    .ok();
                debug!(item = %item.id, attempt, "downloading");
                let path = self.fetcher.download(session, item, target_dir).await?;
                confirm_on_disk(path).await
            },
            |_, kind, delay| {
                self.event_tx
                    .send(Event::Backoff {
                        id: Some(item.id.clone()),
                        delay,
                        rate_limited: kind == FailureKind::RateLimited,
                    })
                    .ok();
            },
        )
        .await?;

        cleanup::purge_side_artifacts(target_dir, &self.config.cleanup, &file.path).await;
        confirm_on_disk(file.path)
            .await
            .map_err(RetryError::Aborted)
    }

    /// Download every new saved video for `account` and record them in `ledger`
    ///
    /// Items that exhaust their retries are reported as failed and skipped. The run
    /// aborts on an authentication failure, or with [`Error::RateLimited`] once
    /// `max_rate_limited_items` consecutive items exhausted their retries on
    /// throttling. Confirmed downloads are written to the ledger in every case.
    pub async fn run(
        &self,
        account: &str,
        ledger: &mut Ledger,
        cancel: &CancellationToken,
    ) -> Result<RetrievalReport> {
        let session = self.authenticate(account).await?;
        let mut report = RetrievalReport::default();

        let outcome = self.download_new(&session, ledger, cancel, &mut report).await;

        let recorded = ledger
            .append(report.downloaded.iter().map(|d| d.id.as_str()))
            .await;

        match (outcome, recorded) {
            (Ok(()), Ok(recorded)) => {
                report.recorded = recorded;
                info!(
                    account,
                    downloaded = report.downloaded.len(),
                    skipped_existing = report.skipped_existing,
                    skipped_non_video = report.skipped_non_video,
                    failed = report.failed.len(),
                    cancelled = report.cancelled,
                    "retrieval complete"
                );
                Ok(report)
            }
            (Ok(()), Err(e)) => Err(e),
            (Err(e), recorded) => {
                match recorded {
                    Ok(n) => info!(recorded = n, "download ledger flushed before abort"),
                    Err(ledger_err) => {
                        error!(error = %ledger_err, "failed to flush download ledger before abort")
                    }
                }
                Err(e)
            }
        }
    }

    async fn download_new(
        &self,
        session: &Session,
        ledger: &Ledger,
        cancel: &CancellationToken,
        report: &mut RetrievalReport,
    ) -> Result<()> {
        let max_rate_limited = self.config.retry.max_rate_limited_items;
        let mut consecutive_rate_limited = 0u32;
        let mut attempted_any = false;

        let listing = self.listing(session, ledger, cancel);
        futures::pin_mut!(listing);

        while let Some(entry) = listing.next().await {
            let item = match entry {
                Ok(Listed::New(item)) => item,
                Ok(Listed::AlreadyRecorded(id)) => {
                    debug!(item = %id, "already downloaded, skipping");
                    report.skipped_existing += 1;
                    continue;
                }
                Ok(Listed::NotVideo(id)) => {
                    debug!(item = %id, "not a video, skipping");
                    report.skipped_non_video += 1;
                    continue;
                }
                Err(Error::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if attempted_any && !self.throttle(cancel).await {
                report.cancelled = true;
                break;
            }
            attempted_any = true;

            match self.download(session, &item, cancel).await {
                Ok(file) => {
                    consecutive_rate_limited = 0;
                    info!(item = %item.id, path = %file.path.display(), size = file.size, "downloaded");
                    self.event_tx
                        .send(Event::Downloaded {
                            id: item.id.clone(),
                            path: file.path.clone(),
                            size: file.size,
                        })
                        .ok();
                    report.downloaded.push(DownloadedItem { id: item.id, file });
                }
                Err(RetryError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(RetryError::Aborted(e)) if e.is_fatal() => {
                    error!(item = %item.id, error = %e, "authentication failed, aborting retrieval");
                    return Err(e);
                }
                Err(RetryError::Aborted(e)) => {
                    consecutive_rate_limited = 0;
                    self.record_failure(report, item.id, &e);
                }
                Err(RetryError::Exhausted { error, attempts }) => {
                    if error.failure_kind() == FailureKind::RateLimited {
                        consecutive_rate_limited += 1;
                    } else {
                        consecutive_rate_limited = 0;
                    }
                    warn!(item = %item.id, attempts, "retries exhausted");
                    self.record_failure(report, item.id, &error);

                    if max_rate_limited > 0 && consecutive_rate_limited >= max_rate_limited {
                        error!(
                            consecutive = consecutive_rate_limited,
                            "remote keeps throttling, aborting retrieval"
                        );
                        return Err(Error::RateLimited(format!(
                            "{consecutive_rate_limited} consecutive items exhausted their retries; try again later"
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    fn record_failure(&self, report: &mut RetrievalReport, id: MediaId, error: &Error) {
        warn!(item = %id, error = %error, "skipping item");
        self.event_tx
            .send(Event::DownloadFailed {
                id: id.clone(),
                error: error.to_string(),
            })
            .ok();
        report.failed.push(FailedItem {
            id,
            error: error.to_string(),
        });
    }

    /// Randomized politeness delay; returns false when cancelled
    async fn throttle(&self, cancel: &CancellationToken) -> bool {
        let throttle = &self.config.throttle;
        if !throttle.enabled {
            return !cancel.is_cancelled();
        }
        let delay = {
            let (min, max) = (throttle.min_delay, throttle.max_delay);
            if min >= max {
                min
            } else {
                let secs = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
        };
        debug!(delay_ms = delay.as_millis(), "throttling");
        sleep_or_cancel(delay, cancel).await
    }
}

/// The file must exist with at least one byte
async fn confirm_on_disk(path: std::path::PathBuf) -> Result<LocalFile> {
    let file = LocalFile::from_path(&path).await.map_err(|e| {
        Error::Remote(format!(
            "downloaded file {} is not readable: {e}",
            path.display()
        ))
    })?;
    if file.size == 0 {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "failed to remove empty download");
        }
        return Err(Error::Remote(format!(
            "downloaded file {} is empty",
            path.display()
        )));
    }
    Ok(file)
}
