//! External media tooling (transcode, concatenate, probe)
//!
//! The core abstraction is the [`MediaTool`] trait. Implementations:
//!
//! - [`FfmpegTool`]: runs the external `ffmpeg`/`ffprobe` binaries
//! - [`NoOpMediaTool`]: stub returning `NotSupported` when ffmpeg is unavailable
//!
//! [`from_config`] picks one the same way for every component: explicit path,
//! then PATH lookup (if enabled), then the stub.

mod ffmpeg;
mod noop;
mod traits;

pub use ffmpeg::FfmpegTool;
pub use noop::NoOpMediaTool;
pub use traits::{MediaCapabilities, MediaTool};

use crate::config::ToolsConfig;
use std::sync::Arc;

/// Select the media tool described by `tools`
pub fn from_config(tools: &ToolsConfig) -> Arc<dyn MediaTool> {
    let ffprobe = tools.ffprobe_path.clone().or_else(|| {
        if tools.search_path {
            which::which("ffprobe").ok()
        } else {
            None
        }
    });

    let tool: Arc<dyn MediaTool> = if let Some(ref ffmpeg) = tools.ffmpeg_path {
        Arc::new(FfmpegTool::new(ffmpeg.clone(), ffprobe))
    } else if tools.search_path {
        match which::which("ffmpeg") {
            Ok(ffmpeg) => Arc::new(FfmpegTool::new(ffmpeg, ffprobe)),
            Err(_) => Arc::new(NoOpMediaTool),
        }
    } else {
        Arc::new(NoOpMediaTool)
    };

    let caps = tool.capabilities();
    tracing::info!(
        media_tool = tool.name(),
        can_transcode = caps.can_transcode,
        can_probe = caps.can_probe,
        "media tool initialized"
    );
    tool
}
