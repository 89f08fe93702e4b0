//! No-op media tool for graceful degradation

use super::traits::{MediaCapabilities, MediaTool};
use crate::config::NormalizeProfile;
use crate::types::ProbeInfo;
use async_trait::async_trait;
use std::path::Path;

const NOT_SUPPORTED: &str = "media processing requires the external ffmpeg binary. \
     Configure tools.ffmpeg_path or ensure ffmpeg is in PATH.";

/// Media tool used when ffmpeg is unavailable
///
/// Every operation returns `Error::NotSupported`, so retrieval can still run
/// while normalization and assembly fail with an actionable message.
pub struct NoOpMediaTool;

#[async_trait]
impl MediaTool for NoOpMediaTool {
    async fn probe(&self, _input: &Path) -> crate::Result<ProbeInfo> {
        Err(crate::Error::NotSupported(NOT_SUPPORTED.into()))
    }

    async fn normalize(
        &self,
        _input: &Path,
        _output: &Path,
        _profile: &NormalizeProfile,
        _add_silent_audio: bool,
    ) -> crate::Result<()> {
        Err(crate::Error::NotSupported(NOT_SUPPORTED.into()))
    }

    async fn concat_copy(&self, _manifest: &Path, _output: &Path) -> crate::Result<()> {
        Err(crate::Error::NotSupported(NOT_SUPPORTED.into()))
    }

    async fn concat_pair(
        &self,
        _first: &Path,
        _second: &Path,
        _output: &Path,
        _profile: &NormalizeProfile,
    ) -> crate::Result<()> {
        Err(crate::Error::NotSupported(NOT_SUPPORTED.into()))
    }

    fn capabilities(&self) -> MediaCapabilities {
        MediaCapabilities {
            can_transcode: false,
            can_probe: false,
        }
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
