//! ffmpeg/ffprobe-backed media tool

use super::traits::{MediaCapabilities, MediaTool};
use crate::config::NormalizeProfile;
use crate::error::MediaError;
use crate::types::ProbeInfo;
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Lines of tool stderr kept in error values
const STDERR_TAIL_LINES: usize = 40;

/// Media tool executing the external `ffmpeg` and `ffprobe` binaries
///
/// Child processes are killed if the awaiting future is dropped.
///
/// # Examples
///
/// ```no_run
/// use reel_pipeline::media::{FfmpegTool, MediaTool};
/// use std::path::PathBuf;
///
/// // Explicit paths
/// let tool = FfmpegTool::new(PathBuf::from("/usr/bin/ffmpeg"), Some(PathBuf::from("/usr/bin/ffprobe")));
///
/// // Or auto-discover from PATH
/// let tool = FfmpegTool::from_path().expect("ffmpeg not found in PATH");
/// assert!(tool.capabilities().can_transcode);
/// ```
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: Option<PathBuf>,
}

impl FfmpegTool {
    /// Create a tool with explicit binary paths
    pub fn new(ffmpeg: PathBuf, ffprobe: Option<PathBuf>) -> Self {
        Self { ffmpeg, ffprobe }
    }

    /// Attempt to find ffmpeg (and optionally ffprobe) in PATH
    ///
    /// Returns `None` if ffmpeg itself is not found.
    pub fn from_path() -> Option<Self> {
        let ffmpeg = which::which("ffmpeg").ok()?;
        let ffprobe = which::which("ffprobe").ok();
        Some(Self::new(ffmpeg, ffprobe))
    }

    async fn run(&self, binary: &Path, tool: &str, args: Vec<OsString>) -> crate::Result<Vec<u8>> {
        debug!(tool, ?args, "running external tool");
        let output = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute {}: {}", tool, e)))?;

        if !output.status.success() {
            return Err(MediaError::ToolFailed {
                tool: tool.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: stderr_tail(&output.stderr),
            }
            .into());
        }
        Ok(output.stdout)
    }

    async fn run_ffmpeg(&self, args: Vec<OsString>, output: &Path) -> crate::Result<()> {
        self.run(&self.ffmpeg, "ffmpeg", args).await?;
        ensure_output(output).await
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe(&self, input: &Path) -> crate::Result<ProbeInfo> {
        let ffprobe = self.ffprobe.as_ref().ok_or_else(|| {
            crate::Error::NotSupported(
                "probing requires the external ffprobe binary. \
                 Configure tools.ffprobe_path or ensure ffprobe is in PATH."
                    .into(),
            )
        })?;
        let stdout = self.run(ffprobe, "ffprobe", probe_args(input)).await?;
        parse_probe_output(&stdout).map_err(|e| {
            MediaError::ProbeFailed {
                path: input.to_path_buf(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        profile: &NormalizeProfile,
        add_silent_audio: bool,
    ) -> crate::Result<()> {
        self.run_ffmpeg(normalize_args(input, output, profile, add_silent_audio), output)
            .await
    }

    async fn concat_copy(&self, manifest: &Path, output: &Path) -> crate::Result<()> {
        self.run_ffmpeg(concat_copy_args(manifest, output), output)
            .await
    }

    async fn concat_pair(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        profile: &NormalizeProfile,
    ) -> crate::Result<()> {
        self.run_ffmpeg(concat_pair_args(first, second, output, profile), output)
            .await
    }

    fn capabilities(&self) -> MediaCapabilities {
        MediaCapabilities {
            can_transcode: true,
            can_probe: self.ffprobe.is_some(),
        }
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

async fn ensure_output(output: &Path) -> crate::Result<()> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(MediaError::EmptyOutput {
            path: output.to_path_buf(),
        }
        .into()),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn args<I, S>(items: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    items.into_iter().map(Into::into).collect()
}

fn encoder_args(profile: &NormalizeProfile) -> Vec<OsString> {
    args([
        "-c:v".to_string(),
        profile.video_codec.clone(),
        "-preset".to_string(),
        profile.preset.clone(),
        "-crf".to_string(),
        profile.crf.to_string(),
        "-pix_fmt".to_string(),
        profile.pixel_format.clone(),
        "-c:a".to_string(),
        profile.audio_codec.clone(),
        "-b:a".to_string(),
        profile.audio_bitrate.clone(),
        "-ar".to_string(),
        profile.audio_sample_rate.to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ])
}

/// Video filter chain fitting any input into the profile's frame
pub(crate) fn video_filter(profile: &NormalizeProfile) -> String {
    let (w, h) = (profile.width, profile.height);
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,\
         setsar=1,fps={fps},format={pix}",
        fps = profile.fps,
        pix = profile.pixel_format
    )
}

pub(crate) fn normalize_args(
    input: &Path,
    output: &Path,
    profile: &NormalizeProfile,
    add_silent_audio: bool,
) -> Vec<OsString> {
    let mut out = args(["-hide_banner", "-nostdin", "-y", "-i"]);
    out.push(input.as_os_str().to_owned());
    if add_silent_audio {
        out.extend(args([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!(
                "anullsrc=channel_layout=stereo:sample_rate={}",
                profile.audio_sample_rate
            ),
        ]));
    }
    out.extend(args(["-map", "0:v:0", "-map"]));
    out.push(if add_silent_audio { "1:a:0" } else { "0:a:0?" }.into());
    out.push("-vf".into());
    out.push(video_filter(profile).into());
    out.extend(encoder_args(profile));
    if add_silent_audio {
        out.push("-shortest".into());
    }
    out.push(output.as_os_str().to_owned());
    out
}

pub(crate) fn concat_copy_args(manifest: &Path, output: &Path) -> Vec<OsString> {
    let mut out = args(["-hide_banner", "-nostdin", "-y", "-f", "concat", "-safe", "0", "-i"]);
    out.push(manifest.as_os_str().to_owned());
    out.extend(args(["-c", "copy", "-movflags", "+faststart"]));
    out.push(output.as_os_str().to_owned());
    out
}

/// Audio filter chain bringing any track to the profile's rate and layout
pub(crate) fn audio_filter(profile: &NormalizeProfile) -> String {
    let rate = profile.audio_sample_rate;
    format!("aresample={rate},aformat=sample_fmts=fltp:sample_rates={rate}:channel_layouts=stereo")
}

/// Both inputs are conformed to the profile inside the graph; the concat filter
/// rejects segments whose size, frame rate or sample rate differ
pub(crate) fn concat_pair_graph(profile: &NormalizeProfile) -> String {
    let (video, audio) = (video_filter(profile), audio_filter(profile));
    format!(
        "[0:v:0]{video}[v0];[0:a:0]{audio}[a0];\
         [1:v:0]{video}[v1];[1:a:0]{audio}[a1];\
         [v0][a0][v1][a1]concat=n=2:v=1:a=1[v][a]"
    )
}

pub(crate) fn concat_pair_args(
    first: &Path,
    second: &Path,
    output: &Path,
    profile: &NormalizeProfile,
) -> Vec<OsString> {
    let mut out = args(["-hide_banner", "-nostdin", "-y", "-i"]);
    out.push(first.as_os_str().to_owned());
    out.push("-i".into());
    out.push(second.as_os_str().to_owned());
    out.push("-filter_complex".into());
    out.push(concat_pair_graph(profile).into());
    out.extend(args(["-map", "[v]", "-map", "[a]"]));
    out.extend(encoder_args(profile));
    out.push(output.as_os_str().to_owned());
    out
}

pub(crate) fn probe_args(input: &Path) -> Vec<OsString> {
    let mut out = args([
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]);
    out.push(input.as_os_str().to_owned());
    out
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output
pub(crate) fn parse_probe_output(stdout: &[u8]) -> Result<ProbeInfo, serde_json::Error> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout)?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(ProbeInfo {
        duration_secs: parsed
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0),
        has_video: video.is_some(),
        has_audio: audio.is_some(),
        video_codec: video.and_then(|s| s.codec_name.clone()),
        audio_codec: audio.and_then(|s| s.codec_name.clone()),
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
    })
}
