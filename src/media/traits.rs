//! Traits and types for external media tooling

use crate::config::NormalizeProfile;
use crate::types::ProbeInfo;
use async_trait::async_trait;
use std::path::Path;

/// Capabilities of a media tool implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaCapabilities {
    /// Can transcode and concatenate
    pub can_transcode: bool,
    /// Can report stream layout and duration
    pub can_probe: bool,
}

/// Trait for the transcoding/concatenation backend
///
/// Every method writing an output must only return `Ok` once the output exists
/// and is non-empty.
///
/// # Examples
///
/// ```no_run
/// use reel_pipeline::media::{FfmpegTool, MediaTool};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let tool = FfmpegTool::from_path().expect("ffmpeg not found in PATH");
/// let info = tool.probe(Path::new("clip.mp4")).await?;
/// println!("audio present: {}", info.has_audio);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Report duration and stream layout of `input`
    async fn probe(&self, input: &Path) -> crate::Result<ProbeInfo>;

    /// Transcode `input` to the canonical profile
    ///
    /// With `add_silent_audio` a silent track replaces the (missing) input audio.
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        profile: &NormalizeProfile,
        add_silent_audio: bool,
    ) -> crate::Result<()>;

    /// Concatenate the files listed in a concat manifest without re-encoding
    async fn concat_copy(&self, manifest: &Path, output: &Path) -> crate::Result<()>;

    /// Concatenate exactly two files with a re-encoding filter graph
    async fn concat_pair(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        profile: &NormalizeProfile,
    ) -> crate::Result<()>;

    /// Query capabilities of this tool
    fn capabilities(&self) -> MediaCapabilities;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
