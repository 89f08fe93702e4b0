//! Configuration types for reel-pipeline

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory layout for a pipeline instance
///
/// Every directory is created on demand; none is assumed to exist.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Raw downloads (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Normalized temporaries and merge intermediates (default: "./temp")
    ///
    /// Owned exclusively by the running pipeline and cleared at the start of each run.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Final merged outputs (default: "./merged_videos")
    #[serde(default = "default_merged_dir")]
    pub merged_dir: PathBuf,

    /// Ledger files (default: "./logs")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Saved session files (default: "./sessions")
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            temp_dir: default_temp_dir(),
            merged_dir: default_merged_dir(),
            log_dir: default_log_dir(),
            session_dir: default_session_dir(),
        }
    }
}

impl PathsConfig {
    /// Ledger of downloaded post identifiers
    pub fn download_ledger(&self) -> PathBuf {
        self.log_dir.join("downloaded.log")
    }

    /// Ledger of raw file names already consumed by a merge
    pub fn merge_ledger(&self) -> PathBuf {
        self.log_dir.join("merged.log")
    }
}

/// Retry configuration for remote failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per item, including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first rate-limit signal (default: 30 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any rate-limit delay (default: 600 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Growth factor between consecutive rate-limit delays (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Fixed delay after a transient failure (default: 5 seconds)
    #[serde(default = "default_transient_delay", with = "duration_serde")]
    pub transient_delay: Duration,

    /// Add random jitter to rate-limit delays, still bounded by `max_delay` (default: false)
    #[serde(default)]
    pub jitter: bool,

    /// Abort the run after this many consecutive items exhausted their retries
    /// on rate limiting (default: 3)
    #[serde(default = "default_max_rate_limited_items")]
    pub max_rate_limited_items: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            transient_delay: default_transient_delay(),
            jitter: false,
            max_rate_limited_items: default_max_rate_limited_items(),
        }
    }
}

/// Randomized politeness delay between remote requests
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Enable the delay (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lower bound (default: 2 seconds)
    #[serde(default = "default_throttle_min", with = "duration_serde")]
    pub min_delay: Duration,

    /// Upper bound (default: 6 seconds)
    #[serde(default = "default_throttle_max", with = "duration_serde")]
    pub max_delay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay: default_throttle_min(),
            max_delay: default_throttle_max(),
        }
    }
}

/// External tool paths (ffmpeg, ffprobe)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to ffprobe executable (auto-detected if None)
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            search_path: true,
        }
    }
}

/// Canonical profile every input is normalized to before assembly
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizeProfile {
    /// Output width in pixels (default: 1080)
    #[serde(default = "default_width")]
    pub width: u32,
    /// Output height in pixels (default: 1920)
    #[serde(default = "default_height")]
    pub height: u32,
    /// Output frame rate (default: 30)
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Pixel format (default: "yuv420p")
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    /// Audio sample rate in Hz (default: 48000)
    #[serde(default = "default_audio_sample_rate")]
    pub audio_sample_rate: u32,
    /// Video encoder (default: "libx264")
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    /// Encoder preset (default: "fast")
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Constant rate factor (default: 23)
    #[serde(default = "default_crf")]
    pub crf: u8,
    /// Audio encoder (default: "aac")
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    /// Audio bitrate (default: "128k")
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

impl Default for NormalizeProfile {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            pixel_format: default_pixel_format(),
            audio_sample_rate: default_audio_sample_rate(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

/// Assembly (concatenation) settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Maximum inputs per concatenation invocation (default: 10, minimum: 2)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// chrono format string for the output file name (default: "%Y-%m-%d_%H-%M-%S")
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,

    /// Compare output duration against the sum of inputs after merging (default: true)
    #[serde(default = "default_true")]
    pub verify_duration: bool,

    /// Allowed duration drift per input, in seconds (default: 0.5)
    #[serde(default = "default_duration_tolerance")]
    pub duration_tolerance_secs: f64,

    /// Free space that must remain after the merge, in bytes (default: 512 MB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,

    /// Space required as a multiple of the input size (default: 2.0)
    #[serde(default = "default_size_multiplier")]
    pub size_multiplier: f64,

    /// Delete raw downloads once merged (default: false)
    #[serde(default)]
    pub delete_sources_after_merge: bool,

    /// Merge at most N candidates per run, oldest first (default: all)
    ///
    /// Newer candidates stay unmerged and are picked up by later runs.
    #[serde(default)]
    pub max_merge_inputs: Option<usize>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            timestamp_format: default_timestamp_format(),
            verify_duration: true,
            duration_tolerance_secs: default_duration_tolerance(),
            min_free_space: default_min_free_space(),
            size_multiplier: default_size_multiplier(),
            delete_sources_after_merge: false,
            max_merge_inputs: None,
        }
    }
}

/// Side-artifact cleanup in the download directory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Purge non-media files after each download (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extensions considered media; everything else is purged (case-insensitive)
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            media_extensions: default_media_extensions(),
        }
    }
}

/// Remote service endpoints and error classification
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Saved-posts listing endpoint used by `HttpFeed`
    #[serde(default)]
    pub feed_url: Option<String>,

    /// User agent for HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Regex matched against error bodies to detect throttling
    #[serde(default = "default_rate_limit_pattern")]
    pub rate_limit_pattern: String,

    /// Regex matched against error bodies to detect an invalid session
    #[serde(default = "default_auth_failure_pattern")]
    pub auth_failure_pattern: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            feed_url: None,
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            rate_limit_pattern: default_rate_limit_pattern(),
            auth_failure_pattern: default_auth_failure_pattern(),
        }
    }
}

/// Publish script settings
///
/// When `script` is set, the coordinator runs it with the artifact path as the
/// only argument after a successful merge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Program to run (default: none)
    #[serde(default)]
    pub script: Option<PathBuf>,

    /// Kill the script after this long (default: 600 seconds)
    #[serde(default = "default_publish_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Ask the confirmation hook before publishing (default: true)
    #[serde(default = "default_true")]
    pub confirm: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            script: None,
            timeout: default_publish_timeout(),
            confirm: true,
        }
    }
}

/// Main configuration
///
/// Passed into every component at construction time; there is no global state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directory layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Retry/backoff policy for remote calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Politeness delay between remote calls
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// External binaries
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Canonical normalization profile
    #[serde(default)]
    pub profile: NormalizeProfile,

    /// Concatenation settings
    #[serde(default)]
    pub assembly: AssemblyConfig,

    /// Download directory cleanup
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Remote service settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Publish step
    #[serde(default)]
    pub publish: PublishConfig,
}

impl Config {
    /// Load a configuration from a JSON file and validate it
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts", "must be at least 1"));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier.is_infinite() || multiplier <= 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "must be a finite value above 1.0",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(Error::config(
                "retry.initial_delay",
                "must not exceed retry.max_delay",
            ));
        }
        if self.throttle.min_delay > self.throttle.max_delay {
            return Err(Error::config(
                "throttle.min_delay",
                "must not exceed throttle.max_delay",
            ));
        }
        if self.assembly.batch_size < 2 {
            return Err(Error::config("assembly.batch_size", "must be at least 2"));
        }
        if self.assembly.size_multiplier < 1.0 {
            return Err(Error::config(
                "assembly.size_multiplier",
                "must be at least 1.0",
            ));
        }
        if self.assembly.max_merge_inputs == Some(0) {
            return Err(Error::config(
                "assembly.max_merge_inputs",
                "must be at least 1 when set",
            ));
        }
        if self.profile.width == 0 || self.profile.height == 0 || self.profile.fps == 0 {
            return Err(Error::config(
                "profile",
                "width, height and fps must be non-zero",
            ));
        }
        if self.publish.timeout.is_zero() {
            return Err(Error::config("publish.timeout", "must be non-zero"));
        }
        for (key, pattern) in [
            ("remote.rate_limit_pattern", &self.remote.rate_limit_pattern),
            ("remote.auth_failure_pattern", &self.remote.auth_failure_pattern),
        ] {
            regex::Regex::new(pattern)
                .map_err(|e| Error::config(key, format!("invalid regex: {e}")))?;
        }
        Ok(())
    }
}

// Default value functions
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

fn default_merged_dir() -> PathBuf {
    PathBuf::from("merged_videos")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_session_dir() -> PathBuf {
    PathBuf::from("sessions")
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(600)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_transient_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_rate_limited_items() -> u32 {
    3
}

fn default_throttle_min() -> Duration {
    Duration::from_secs(2)
}

fn default_throttle_max() -> Duration {
    Duration::from_secs(6)
}

fn default_width() -> u32 {
    1080
}

fn default_height() -> u32 {
    1920
}

fn default_fps() -> u32 {
    30
}

fn default_pixel_format() -> String {
    "yuv420p".into()
}

fn default_audio_sample_rate() -> u32 {
    48_000
}

fn default_video_codec() -> String {
    "libx264".into()
}

fn default_preset() -> String {
    "fast".into()
}

fn default_crf() -> u8 {
    23
}

fn default_audio_codec() -> String {
    "aac".into()
}

fn default_audio_bitrate() -> String {
    "128k".into()
}

fn default_batch_size() -> usize {
    10
}

fn default_timestamp_format() -> String {
    "%Y-%m-%d_%H-%M-%S".into()
}

fn default_duration_tolerance() -> f64 {
    0.5
}

fn default_min_free_space() -> u64 {
    512 * 1024 * 1024 // 512 MB
}

fn default_size_multiplier() -> f64 {
    2.0
}

fn default_media_extensions() -> Vec<String> {
    vec!["mp4".into(), "mov".into(), "m4v".into()]
}

fn default_user_agent() -> String {
    concat!("reel-pipeline/", env!("CARGO_PKG_VERSION")).into()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_rate_limit_pattern() -> String {
    r"(?i)(too many requests|please wait a few minutes|rate.?limit)".into()
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_auth_failure_pattern() -> String {
    r"(?i)(login_required|login required|checkpoint_required|not logged in)".into()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
