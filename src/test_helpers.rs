//! Shared test doubles for the remote collaborators and the media tool.

use crate::config::{Config, NormalizeProfile};
use crate::error::{Error, MediaError};
use crate::media::{MediaCapabilities, MediaTool};
use crate::remote::{FeedPage, MediaFetcher, SavedFeed, Session, SessionStore};
use crate::types::{LocalFile, MediaId, MediaItem, MediaKind, ProbeInfo};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

/// Config with every directory under `root`, millisecond backoff and no throttling
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.download_dir = root.join("downloads");
    config.paths.temp_dir = root.join("temp");
    config.paths.merged_dir = root.join("merged_videos");
    config.paths.log_dir = root.join("logs");
    config.paths.session_dir = root.join("sessions");
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.retry.transient_delay = Duration::from_millis(1);
    config.throttle.enabled = false;
    config.assembly.min_free_space = 0;
    config
}

/// Write `bytes` to `dir/name` with a deterministic mtime of `1_600_000_000 + offset` seconds
pub(crate) async fn write_source(dir: &Path, name: &str, bytes: &[u8], offset: u64) -> LocalFile {
    tokio::fs::create_dir_all(dir).await.unwrap();
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await.unwrap();
    set_mtime(&path, offset);
    LocalFile::from_path(&path).await.unwrap()
}

/// Set the mtime of an existing file to `1_600_000_000 + offset` seconds
pub(crate) fn set_mtime(path: &Path, offset: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(1_600_000_000 + offset))
        .unwrap();
}

pub(crate) fn item(id: &str, kind: MediaKind) -> MediaItem {
    MediaItem {
        id: MediaId::new(id),
        kind,
        remote_location: format!("https://cdn.example/{id}.mp4"),
        caption: None,
        taken_at: None,
    }
}

pub(crate) fn video(id: &str) -> MediaItem {
    item(id, MediaKind::Video)
}

// --- media tool ---

/// Invocation recorded by [`FakeMediaTool`]
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ToolCall {
    Probe(PathBuf),
    Normalize {
        input: PathBuf,
        output: PathBuf,
        silent_audio: bool,
    },
    ConcatCopy {
        inputs: Vec<PathBuf>,
        output: PathBuf,
    },
    ConcatPair {
        first: PathBuf,
        second: PathBuf,
        output: PathBuf,
    },
}

/// Media tool writing real files: normalize copies bytes, concatenation joins them
///
/// Probe reports one second of duration per byte.
#[derive(Default)]
pub(crate) struct FakeMediaTool {
    calls: Mutex<Vec<ToolCall>>,
    silent: Mutex<HashSet<String>>,
    failing_normalize: Mutex<HashSet<String>>,
    /// Stream copy fails for groups larger than this
    copy_limit: Mutex<Option<usize>>,
    pair_fails: AtomicBool,
    probe_fails: AtomicBool,
}

impl FakeMediaTool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn mark_silent(&self, file_name: &str) {
        self.silent.lock().unwrap().insert(file_name.to_string());
    }

    pub(crate) fn fail_normalize(&self, file_name: &str) {
        self.failing_normalize
            .lock()
            .unwrap()
            .insert(file_name.to_string());
    }

    /// Every stream copy fails
    pub(crate) fn fail_copy(&self) {
        *self.copy_limit.lock().unwrap() = Some(0);
    }

    /// Stream copy fails for groups with more than `limit` inputs
    pub(crate) fn fail_copy_above(&self, limit: usize) {
        *self.copy_limit.lock().unwrap() = Some(limit);
    }

    pub(crate) fn set_pair_fails(&self, fails: bool) {
        self.pair_fails.store(fails, Ordering::SeqCst);
    }

    pub(crate) fn set_probe_fails(&self, fails: bool) {
        self.probe_fails.store(fails, Ordering::SeqCst);
    }

    fn record(&self, call: ToolCall) {
        self.calls.lock().unwrap().push(call);
    }

    async fn join(inputs: &[PathBuf], output: &Path) -> crate::Result<()> {
        let mut bytes = Vec::new();
        for input in inputs {
            bytes.extend(tokio::fs::read(input).await?);
        }
        tokio::fs::write(output, bytes).await?;
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn tool_failed(stderr: &str) -> Error {
    MediaError::ToolFailed {
        tool: "ffmpeg".into(),
        status: 1,
        stderr: stderr.into(),
    }
    .into()
}

/// Inverse of the manifest escaping, as ffmpeg's concat demuxer reads it
pub(crate) fn parse_manifest(text: &str) -> Vec<PathBuf> {
    text.lines()
        .filter_map(|line| line.strip_prefix("file '")?.strip_suffix('\''))
        .map(|inner| PathBuf::from(inner.replace("'\\''", "'").replace("\\\\", "\\")))
        .collect()
}

#[async_trait]
impl MediaTool for FakeMediaTool {
    async fn probe(&self, input: &Path) -> crate::Result<ProbeInfo> {
        self.record(ToolCall::Probe(input.to_path_buf()));
        if self.probe_fails.load(Ordering::SeqCst) {
            return Err(MediaError::ProbeFailed {
                path: input.to_path_buf(),
                reason: "scripted".into(),
            }
            .into());
        }
        let size = tokio::fs::metadata(input).await?.len();
        Ok(ProbeInfo {
            duration_secs: Some(size as f64),
            has_video: true,
            has_audio: !self.silent.lock().unwrap().contains(&file_name(input)),
            video_codec: Some("h264".into()),
            audio_codec: Some("aac".into()),
            width: Some(1080),
            height: Some(1920),
        })
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        _profile: &NormalizeProfile,
        add_silent_audio: bool,
    ) -> crate::Result<()> {
        self.record(ToolCall::Normalize {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            silent_audio: add_silent_audio,
        });
        if self
            .failing_normalize
            .lock()
            .unwrap()
            .contains(&file_name(input))
        {
            return Err(tool_failed("Invalid data found when processing input"));
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    async fn concat_copy(&self, manifest: &Path, output: &Path) -> crate::Result<()> {
        let inputs = parse_manifest(&tokio::fs::read_to_string(manifest).await?);
        self.record(ToolCall::ConcatCopy {
            inputs: inputs.clone(),
            output: output.to_path_buf(),
        });
        let limit = *self.copy_limit.lock().unwrap();
        if limit.is_some_and(|limit| inputs.len() > limit) {
            // ffmpeg may leave a truncated output behind
            tokio::fs::write(output, b"partial").await?;
            return Err(tool_failed("Non-monotonous DTS in output stream"));
        }
        Self::join(&inputs, output).await
    }

    async fn concat_pair(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        _profile: &NormalizeProfile,
    ) -> crate::Result<()> {
        self.record(ToolCall::ConcatPair {
            first: first.to_path_buf(),
            second: second.to_path_buf(),
            output: output.to_path_buf(),
        });
        if self.pair_fails.load(Ordering::SeqCst) {
            return Err(tool_failed("Error while filtering"));
        }
        Self::join(&[first.to_path_buf(), second.to_path_buf()], output).await
    }

    fn capabilities(&self) -> MediaCapabilities {
        MediaCapabilities {
            can_transcode: true,
            can_probe: true,
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// --- remote collaborators ---

pub(crate) struct FakeSessions {
    pub(crate) valid: bool,
}

#[async_trait]
impl SessionStore for FakeSessions {
    async fn is_valid(&self, _account: &str) -> crate::Result<bool> {
        Ok(self.valid)
    }

    async fn load(&self, account: &str) -> crate::Result<Session> {
        if self.valid {
            Ok(Session::new(account))
        } else {
            Err(Error::Auth(format!("no saved session for '{account}'")))
        }
    }
}

/// Scripted failure kinds (errors are not `Clone`)
#[derive(Clone, Copy, Debug)]
pub(crate) enum Scripted {
    RateLimited,
    Transient,
    NotFound,
    Auth,
    /// Success that leaves a zero-byte file
    Empty,
}

impl Scripted {
    fn error(self) -> Error {
        match self {
            Scripted::RateLimited => Error::RateLimited("Please wait a few minutes".into()),
            Scripted::Transient => Error::Remote("connection reset".into()),
            Scripted::NotFound => Error::Http {
                status: 404,
                message: "not found".into(),
            },
            Scripted::Auth => Error::Auth("login_required".into()),
            Scripted::Empty => Error::Other("empty".into()),
        }
    }
}

/// Feed serving fixed pages; the cursor of page `n` is `p<n>`
#[derive(Default)]
pub(crate) struct FakeFeed {
    pages: Vec<FeedPage>,
    failures: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
}

impl FakeFeed {
    pub(crate) fn paged(pages: Vec<Vec<MediaItem>>) -> Self {
        let count = pages.len();
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, items)| FeedPage {
                items,
                next_cursor: (i + 1 < count).then(|| format!("p{}", i + 1)),
            })
            .collect();
        Self {
            pages,
            ..Default::default()
        }
    }

    /// Fail the next page requests with these kinds, in order
    pub(crate) fn fail_next(&self, kinds: &[Scripted]) {
        self.failures.lock().unwrap().extend(kinds.iter().copied());
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SavedFeed for FakeFeed {
    async fn fetch_page(&self, _session: &Session, cursor: Option<&str>) -> crate::Result<FeedPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.failures.lock().unwrap().pop_front() {
            return Err(kind.error());
        }
        let index = cursor
            .and_then(|c| c.trim_start_matches('p').parse::<usize>().ok())
            .unwrap_or(0);
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }
}

/// Fetcher writing `<id>.mp4` containing `<id>|` plus `.json`/`.jpg` sidecars
#[derive(Default)]
pub(crate) struct FakeFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<String>>,
    cancel_after: Mutex<Option<(String, CancellationToken)>>,
}

impl FakeFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attempts for `id` fail with these kinds before succeeding
    pub(crate) fn script(&self, id: &str, kinds: &[Scripted]) {
        self.scripts
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .extend(kinds.iter().copied());
    }

    /// Cancel `token` once `id` has been written
    pub(crate) fn cancel_after(&self, id: &str, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((id.to_string(), token));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self, id: &str) -> usize {
        self.calls().iter().filter(|c| *c == id).count()
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn download(
        &self,
        _session: &Session,
        item: &MediaItem,
        target_dir: &Path,
    ) -> crate::Result<PathBuf> {
        let id = item.id.as_str().to_string();
        self.calls.lock().unwrap().push(id.clone());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(|q| q.pop_front());

        tokio::fs::create_dir_all(target_dir).await?;
        let path = target_dir.join(format!("{id}.mp4"));
        match scripted {
            Some(Scripted::Empty) => {
                tokio::fs::write(&path, b"").await?;
                return Ok(path);
            }
            Some(kind) => return Err(kind.error()),
            None => {}
        }

        tokio::fs::write(&path, format!("{id}|")).await?;
        tokio::fs::write(target_dir.join(format!("{id}.json")), b"{}").await?;
        tokio::fs::write(target_dir.join(format!("{id}.jpg")), b"jpg").await?;

        let cancel = self.cancel_after.lock().unwrap().clone();
        if let Some((after, token)) = cancel
            && after == id
        {
            token.cancel();
        }
        Ok(path)
    }
}
