//! Core types for reel-pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Stable identifier of a remote post (e.g. a shortcode)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(pub String);

impl MediaId {
    /// Create a new MediaId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MediaId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MediaId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MediaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a remote post
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Single video post
    Video,
    /// Single image post
    Image,
    /// Multi-item post
    Carousel,
    /// Anything the remote reports that we do not know
    #[serde(other)]
    Other,
}

/// A saved post as enumerated from the remote listing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Unique, stable identifier
    pub id: MediaId,
    /// Post kind; only videos proceed through the pipeline
    pub kind: MediaKind,
    /// Where the media bytes can be fetched from
    pub remote_location: String,
    /// Post caption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// When the post was published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
}

impl MediaItem {
    /// Whether this item is a video
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

/// A file produced by a pipeline stage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFile {
    /// Location on disk
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Production time; merge order follows this value
    pub modified: SystemTime,
}

impl LocalFile {
    /// Read size and modification time from disk
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let meta = tokio::fs::metadata(&path).await?;
        Ok(Self {
            size: meta.len(),
            modified: meta.modified()?,
            path,
        })
    }

    /// File name as a UTF-8 string (lossy)
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Borrow the path
    pub fn as_path(&self) -> &Path {
        &self.path
    }
}

/// Ordered group of inputs concatenated in one invocation
#[derive(Clone, Debug)]
pub struct MergeBatch {
    /// Position of this batch within its level
    pub index: usize,
    /// Inputs in merge order
    pub files: Vec<LocalFile>,
}

/// Result of a successful assembly; handed to the publish collaborator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    /// Output file
    pub path: PathBuf,
    /// Number of source files merged
    pub source_count: usize,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Size in bytes
    pub size: u64,
}

/// Stream layout reported by the probe tool
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    /// Container duration in seconds
    pub duration_secs: Option<f64>,
    /// At least one video stream present
    pub has_video: bool,
    /// At least one audio stream present
    pub has_audio: bool,
    /// Codec of the first video stream
    pub video_codec: Option<String>,
    /// Codec of the first audio stream
    pub audio_codec: Option<String>,
    /// Width of the first video stream
    pub width: Option<u32>,
    /// Height of the first video stream
    pub height: Option<u32>,
}

/// Coordinator state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// Not started
    Idle,
    /// Listing and downloading new items
    Retrieving,
    /// Transcoding to the canonical profile
    Normalizing,
    /// Concatenating normalized files
    Assembling,
    /// Finished (with or without an artifact)
    Done,
    /// Terminal failure
    Failed,
}

impl PipelineState {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Retrieving => "retrieving",
            PipelineState::Normalizing => "normalizing",
            PipelineState::Assembling => "assembling",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome reported by the publish collaborator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    /// Whether the upload went through
    pub success: bool,
    /// Time spent publishing
    pub duration: Duration,
}

/// Events broadcast while a pipeline runs
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Coordinator moved to a new state
    StageChanged {
        /// Previous state
        from: PipelineState,
        /// New state
        to: PipelineState,
    },

    /// An item is being downloaded
    Downloading {
        /// Item identifier
        id: MediaId,
        /// 1-based attempt number
        attempt: u32,
    },

    /// Waiting before the next attempt
    Backoff {
        /// Item identifier, None for page fetches
        id: Option<MediaId>,
        /// Wait length
        delay: Duration,
        /// Whether the wait was caused by throttling
        rate_limited: bool,
    },

    /// Item downloaded and confirmed on disk
    Downloaded {
        /// Item identifier
        id: MediaId,
        /// Path of the downloaded file
        path: PathBuf,
        /// Size in bytes
        size: u64,
    },

    /// Item skipped after exhausting retries
    DownloadFailed {
        /// Item identifier
        id: MediaId,
        /// Error message
        error: String,
    },

    /// One file normalized
    Normalized {
        /// 1-based position
        index: usize,
        /// Number of files in the batch
        total: usize,
        /// Normalized output
        path: PathBuf,
    },

    /// One batch of a merge level concatenated
    BatchMerged {
        /// Merge level, 0 for the source files
        level: usize,
        /// Batch index within the level
        index: usize,
        /// Number of batches in the level
        total: usize,
    },

    /// Stream copy failed, re-encoding pairwise
    MergeFallback {
        /// Number of files in the affected group
        inputs: usize,
    },

    /// Final artifact written
    Assembled {
        /// The artifact
        artifact: FinalArtifact,
    },

    /// Publish collaborator finished
    Published {
        /// Artifact path
        path: PathBuf,
        /// Outcome
        outcome: PublishOutcome,
    },

    /// Run finished with an error
    RunFailed {
        /// Human-readable summary
        error: String,
    },
}

/// Summary of a pipeline run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// State the run ended in
    pub state: PipelineState,
    /// Items downloaded in this run
    pub downloaded: usize,
    /// Items skipped because the ledger already had them
    pub skipped_existing: usize,
    /// Items skipped because they are not videos
    pub skipped_non_video: usize,
    /// Items that failed after all retries
    pub failed: usize,
    /// Files normalized
    pub normalized: usize,
    /// Merged output, if any
    pub artifact: Option<FinalArtifact>,
    /// Publish outcome, if a publisher ran
    pub published: Option<PublishOutcome>,
    /// Whether the run stopped on cancellation
    pub cancelled: bool,
    /// Time spent retrieving
    pub retrieval_time: Duration,
    /// Time spent normalizing
    pub normalize_time: Duration,
    /// Time spent assembling
    pub assembly_time: Duration,
}

impl RunReport {
    pub(crate) fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            downloaded: 0,
            skipped_existing: 0,
            skipped_non_video: 0,
            failed: 0,
            normalized: 0,
            artifact: None,
            published: None,
            cancelled: false,
            retrieval_time: Duration::ZERO,
            normalize_time: Duration::ZERO,
            assembly_time: Duration::ZERO,
        }
    }
}
