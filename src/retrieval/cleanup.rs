//! Purge of side artifacts from the download directory

use crate::config::CleanupConfig;
use crate::utils::is_media_file;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Counts reported by a purge
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeStats {
    /// Files removed
    pub deleted: usize,
    /// Files that could not be removed
    pub failed: usize,
}

/// Remove every non-media file directly inside `dir` except `keep`
///
/// Leftover `.part` files, caption `.txt`, metadata `.json` and thumbnail images
/// are deleted; `keep`, files whose extension is listed in `media_extensions` and
/// subdirectories are kept. Failures are logged as warnings and never abort the
/// caller.
pub(crate) async fn purge_side_artifacts(
    dir: &Path,
    config: &CleanupConfig,
    keep: &Path,
) -> PurgeStats {
    use tokio::fs;

    let mut stats = PurgeStats::default();
    if !config.enabled {
        debug!(?dir, "cleanup disabled, skipping");
        return stats;
    }

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?dir, "download directory does not exist, skipping cleanup");
            return stats;
        }
        Err(e) => {
            warn!(?dir, error = %e, "failed to read directory during cleanup");
            return stats;
        }
    };

    let mut files_to_delete: Vec<PathBuf> = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let file_type = match entry.file_type().await {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        let path = entry.path();
        if file_type.is_file() && path != keep && !is_media_file(&path, &config.media_extensions) {
            files_to_delete.push(path);
        }
    }

    for file in &files_to_delete {
        match fs::remove_file(file).await {
            Ok(_) => {
                debug!(?file, "deleted side artifact");
                stats.deleted += 1;
            }
            Err(e) => {
                warn!(?file, error = %e, "failed to delete side artifact");
                stats.failed += 1;
            }
        }
    }

    if stats.deleted > 0 || stats.failed > 0 {
        info!(
            ?dir,
            deleted = stats.deleted,
            failed = stats.failed,
            "download directory cleanup complete"
        );
    }
    stats
}
