//! Normalization stage
//!
//! Transcodes every merge candidate to the canonical [`NormalizeProfile`] so the
//! assembly engine can stream-copy them. Inputs without an audio track get a
//! silent one, giving every normalized file the same stream layout.
//!
//! A single failure aborts the whole batch: assembly assumes a uniform corpus.

use crate::config::{Config, NormalizeProfile};
use crate::error::{Error, MediaError, Result};
use crate::media::MediaTool;
use crate::types::{Event, LocalFile};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-file transcoder to the canonical profile
pub struct Normalizer {
    config: Arc<Config>,
    tool: Arc<dyn MediaTool>,
    event_tx: broadcast::Sender<Event>,
}

impl Normalizer {
    /// Create a normalizer using `tool`
    pub fn new(
        config: Arc<Config>,
        tool: Arc<dyn MediaTool>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            config,
            tool,
            event_tx,
        }
    }

    /// The profile every output conforms to
    pub fn profile(&self) -> &NormalizeProfile {
        &self.config.profile
    }

    /// Transcode `input` into `output`
    ///
    /// The returned file carries the input's modification time so merge order
    /// follows the original production order.
    ///
    /// # Errors
    ///
    /// [`MediaError::NormalizeFailed`] naming the input and carrying the tool's
    /// stderr when the tool fails or leaves no output.
    pub async fn standardize(&self, input: &LocalFile, output: &Path) -> Result<LocalFile> {
        let has_audio = match self.tool.probe(&input.path).await {
            Ok(info) => info.has_audio,
            Err(e) => {
                debug!(file = %input.path.display(), error = %e, "probe failed, assuming audio is present");
                true
            }
        };
        if !has_audio {
            info!(file = %input.path.display(), "no audio track, adding silence");
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if let Err(e) = self
            .tool
            .normalize(&input.path, output, &self.config.profile, !has_audio)
            .await
        {
            remove_quietly(output).await;
            let stderr = match &e {
                Error::Media(media) => media.stderr().unwrap_or_default().to_string(),
                _ => String::new(),
            };
            return Err(MediaError::NormalizeFailed {
                file: input.path.clone(),
                reason: e.to_string(),
                stderr,
            }
            .into());
        }

        let size = match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => {
                remove_quietly(output).await;
                return Err(MediaError::NormalizeFailed {
                    file: input.path.clone(),
                    reason: format!("output {} is missing or empty", output.display()),
                    stderr: String::new(),
                }
                .into());
            }
        };

        inherit_mtime(output, input.modified).await;

        Ok(LocalFile {
            path: output.to_path_buf(),
            size,
            modified: input.modified,
        })
    }

    /// Normalize `files` in order into `<temp_dir>/norm_<NNNN>_<stem>.mp4`
    ///
    /// Stops at the first failure; outputs produced so far are removed. Returns
    /// [`Error::Cancelled`] if cancellation is requested between files.
    pub async fn normalize_all(
        &self,
        files: &[LocalFile],
        cancel: &CancellationToken,
    ) -> Result<Vec<LocalFile>> {
        let temp_dir = &self.config.paths.temp_dir;
        tokio::fs::create_dir_all(temp_dir).await?;

        let total = files.len();
        let mut normalized = Vec::with_capacity(total);
        for (i, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(done = i, total, "normalization cancelled");
                discard(&normalized).await;
                return Err(Error::Cancelled);
            }

            let output = temp_dir.join(normalized_name(i + 1, &file.path));
            debug!(index = i + 1, total, input = %file.path.display(), "normalizing");

            match self.standardize(file, &output).await {
                Ok(out) => {
                    self.event_tx
                        .send(Event::Normalized {
                            index: i + 1,
                            total,
                            path: out.path.clone(),
                        })
                        .ok();
                    normalized.push(out);
                }
                Err(e) => {
                    error!(file = %file.path.display(), error = %e, "normalization failed, aborting batch");
                    discard(&normalized).await;
                    return Err(e);
                }
            }
        }

        info!(count = normalized.len(), "normalization complete");
        Ok(normalized)
    }
}

/// `norm_<NNNN>_<stem>.mp4` with a 1-based index
pub(crate) fn normalized_name(index: usize, source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".into());
    format!("norm_{index:04}_{stem}.mp4")
}

async fn inherit_mtime(path: &Path, modified: SystemTime) {
    let result = async {
        let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        let file = file.into_std().await;
        tokio::task::spawn_blocking(move || file.set_modified(modified))
            .await
            .map_err(std::io::Error::other)?
    }
    .await;
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to copy modification time");
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove file");
    }
}

async fn discard(files: &[LocalFile]) {
    for file in files {
        remove_quietly(&file.path).await;
    }
}
