//! Assembly engine: concatenates normalized files into one artifact
//!
//! Strategy, per group of inputs:
//! 1. Stream-copy through the concat demuxer (fast, no quality loss)
//! 2. When that fails, a pairwise tournament of re-encoding concatenations
//!
//! Groups larger than `batch_size` are split into `ceil(N/B)` ordered batches,
//! each merged into an intermediate file, and the intermediates are merged one
//! level up until a single file remains.

pub mod manifest;

use crate::config::Config;
use crate::error::{Error, MediaError, Result};
use crate::media::MediaTool;
use crate::types::{Event, FinalArtifact, LocalFile};
use crate::utils::{clear_dir, get_available_space, get_unique_path};
use chrono::{Local, Utc};
use std::collections::VecDeque;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of the scratch directory inside the temp dir
const SCRATCH_DIR: &str = "assembly";

/// Split `n` items into `ceil(n / batch_size)` consecutive ranges of at most `batch_size`
///
/// ```
/// use reel_pipeline::assembly::plan_batches;
///
/// assert_eq!(plan_batches(25, 10), vec![0..10, 10..20, 20..25]);
/// assert!(plan_batches(0, 10).is_empty());
/// ```
pub fn plan_batches(n: usize, batch_size: usize) -> Vec<Range<usize>> {
    let size = batch_size.max(1);
    (0..n).step_by(size).map(|start| start..(start + size).min(n)).collect()
}

/// One round of the pairwise tournament over `n` queued files
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairRound {
    /// Index pairs merged this round, in order
    pub pairs: Vec<(usize, usize)>,
    /// Odd last file carried to the next round unchanged
    pub carry: Option<usize>,
}

impl PairRound {
    /// Number of files entering the next round
    pub fn outputs(&self) -> usize {
        self.pairs.len() + usize::from(self.carry.is_some())
    }
}

/// Plan one tournament round: adjacent pairs, odd last file carried over
///
/// ```
/// use reel_pipeline::assembly::plan_pair_round;
///
/// let round = plan_pair_round(5);
/// assert_eq!(round.pairs, vec![(0, 1), (2, 3)]);
/// assert_eq!(round.carry, Some(4));
/// ```
pub fn plan_pair_round(n: usize) -> PairRound {
    PairRound {
        pairs: (0..n / 2).map(|i| (2 * i, 2 * i + 1)).collect(),
        carry: if n % 2 == 1 { Some(n - 1) } else { None },
    }
}

/// Concatenates normalized files into a timestamped artifact
pub struct Assembler {
    config: Arc<Config>,
    tool: Arc<dyn MediaTool>,
    event_tx: broadcast::Sender<Event>,
}

impl Assembler {
    /// Create an assembler using `tool`
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

    /// Merge `files` into `<output_dir>/<timestamp>.mp4`
    ///
    /// Inputs are ordered by ascending modification time (stable). Intermediate and
    /// manifest files are removed whatever the outcome; the inputs themselves are
    /// never touched.
    ///
    /// # Errors
    ///
    /// - [`MediaError::NoInputs`] for an empty input list
    /// - [`MediaError::InsufficientSpace`] when the pre-flight check fails
    /// - [`MediaError::ConcatFailed`] when a group fails every strategy
    /// - [`Error::Cancelled`] when cancelled between steps
    pub async fn merge(
        &self,
        files: &[LocalFile],
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<FinalArtifact> {
        if files.is_empty() {
            return Err(MediaError::NoInputs.into());
        }

        let mut ordered = files.to_vec();
        ordered.sort_by_key(|f| f.modified);

        tokio::fs::create_dir_all(output_dir).await?;
        self.check_disk_space(&ordered, output_dir)?;

        let stamp = Local::now()
            .format(&self.config.assembly.timestamp_format)
            .to_string();
        let output = get_unique_path(&output_dir.join(format!("{stamp}.mp4")))?;

        let scratch = self.config.paths.temp_dir.join(SCRATCH_DIR);
        clear_dir(&scratch).await?;

        info!(
            inputs = ordered.len(),
            batch_size = self.config.assembly.batch_size,
            output = %output.display(),
            "assembling"
        );

        let inputs: Vec<PathBuf> = ordered.iter().map(|f| f.path.clone()).collect();
        let mut run = MergeRun {
            assembler: self,
            scratch: scratch.clone(),
            cancel,
            counter: 0,
        };
        let result = run.merge_levels(inputs, &output).await;

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            warn!(path = %scratch.display(), error = %e, "failed to remove assembly scratch directory");
        }

        if let Err(e) = result {
            error!(error = %e, "assembly failed");
            remove_quietly(&output).await;
            return Err(e);
        }

        let size = match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => return Err(MediaError::EmptyOutput { path: output }.into()),
        };

        if self.config.assembly.verify_duration {
            self.verify_duration(&ordered, &output).await;
        }

        let artifact = FinalArtifact {
            path: output,
            source_count: ordered.len(),
            created_at: Utc::now(),
            size,
        };
        info!(
            path = %artifact.path.display(),
            sources = artifact.source_count,
            size = artifact.size,
            "assembly complete"
        );
        self.event_tx
            .send(Event::Assembled {
                artifact: artifact.clone(),
            })
            .ok();
        Ok(artifact)
    }

    /// Available space in `output_dir` must cover `inputs × size_multiplier + min_free_space`
    fn check_disk_space(&self, files: &[LocalFile], output_dir: &Path) -> Result<()> {
        let total: u64 = files.iter().map(|f| f.size).sum();
        let assembly = &self.config.assembly;
        let required = ((total as f64) * assembly.size_multiplier) as u64;
        let required = required.saturating_add(assembly.min_free_space);

        match get_available_space(output_dir) {
            Ok(available) if available < required => {
                error!(required, available, "insufficient disk space for assembly");
                Err(MediaError::InsufficientSpace {
                    required,
                    available,
                }
                .into())
            }
            Ok(available) => {
                debug!(required, available, "disk space check passed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "could not determine free disk space, continuing");
                Ok(())
            }
        }
    }

    /// Warn when the artifact's duration drifts from the sum of its inputs
    async fn verify_duration(&self, inputs: &[LocalFile], output: &Path) {
        if !self.tool.capabilities().can_probe {
            debug!("probe unavailable, skipping duration verification");
            return;
        }

        let mut expected = 0.0;
        for input in inputs {
            match self.tool.probe(&input.path).await.map(|p| p.duration_secs) {
                Ok(Some(d)) => expected += d,
                _ => {
                    debug!(file = %input.path.display(), "input duration unknown, skipping verification");
                    return;
                }
            }
        }

        let actual = match self.tool.probe(output).await.map(|p| p.duration_secs) {
            Ok(Some(d)) => d,
            _ => {
                warn!(path = %output.display(), "could not probe merged output duration");
                return;
            }
        };

        let tolerance = self.config.assembly.duration_tolerance_secs * inputs.len() as f64;
        let drift = (actual - expected).abs();
        if drift > tolerance {
            warn!(
                expected_secs = expected,
                actual_secs = actual,
                tolerance_secs = tolerance,
                "merged duration deviates from the sum of inputs"
            );
        } else {
            debug!(expected_secs = expected, actual_secs = actual, "duration verified");
        }
    }
}

/// State of one `merge` call
struct MergeRun<'a> {
    assembler: &'a Assembler,
    scratch: PathBuf,
    cancel: &'a CancellationToken,
    counter: usize,
}

impl MergeRun<'_> {
    fn next_scratch(&mut self, prefix: &str, ext: &str) -> PathBuf {
        self.counter += 1;
        self.scratch
            .join(format!("{prefix}_{:05}.{ext}", self.counter))
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("assembly cancelled");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Batch level by level until at most `batch_size` files remain, then merge into `output`
    async fn merge_levels(&mut self, inputs: Vec<PathBuf>, output: &Path) -> Result<()> {
        let batch_size = self.assembler.config.assembly.batch_size.max(2);
        let mut level = 0;
        let mut current = inputs;

        loop {
            self.check_cancel()?;

            if current.len() <= batch_size {
                self.merge_group(&current, output).await?;
                if level > 0 {
                    remove_all(&current).await;
                }
                return Ok(());
            }

            let batches = plan_batches(current.len(), batch_size);
            let total = batches.len();
            debug!(level, files = current.len(), batches = total, "merging level");

            let mut next = Vec::with_capacity(total);
            for (index, range) in batches.into_iter().enumerate() {
                self.check_cancel()?;
                let intermediate = self.next_scratch(&format!("level{level}"), "mp4");
                if let Err(e) = self.merge_group(&current[range], &intermediate).await {
                    remove_all(&next).await;
                    if level > 0 {
                        remove_all(&current).await;
                    }
                    return Err(e);
                }
                self.assembler
                    .event_tx
                    .send(Event::BatchMerged {
                        level,
                        index,
                        total,
                    })
                    .ok();
                next.push(intermediate);
            }

            if level > 0 {
                remove_all(&current).await;
            }
            current = next;
            level += 1;
        }
    }

    /// Stream-copy `files` into `output`, falling back to the pairwise tournament
    async fn merge_group(&mut self, files: &[PathBuf], output: &Path) -> Result<()> {
        let manifest = self.next_scratch("manifest", "txt");
        manifest::write(&manifest, files).await?;
        let copied = self.assembler.tool.concat_copy(&manifest, output).await;
        remove_quietly(&manifest).await;

        let copy_err = match copied {
            Ok(()) => {
                debug!(inputs = files.len(), output = %output.display(), "stream copy succeeded");
                return Ok(());
            }
            Err(e) => e,
        };
        remove_quietly(output).await;

        if files.len() < 2 {
            return Err(concat_failed(output, files.len(), &copy_err));
        }

        warn!(
            inputs = files.len(),
            error = %copy_err,
            "stream copy failed, falling back to pairwise re-encoding"
        );
        self.assembler
            .event_tx
            .send(Event::MergeFallback {
                inputs: files.len(),
            })
            .ok();

        self.pairwise(files, output).await
    }

    /// Iterative tournament: each round merges adjacent pairs, an odd last file carries over
    async fn pairwise(&mut self, files: &[PathBuf], output: &Path) -> Result<()> {
        // (path, owned): owned entries are intermediates of this tournament
        let mut queue: VecDeque<(PathBuf, bool)> =
            files.iter().map(|p| (p.clone(), false)).collect();
        let mut round = 0;

        while queue.len() > 1 {
            let plan = plan_pair_round(queue.len());
            let last_round = plan.outputs() == 1;
            let entries: Vec<(PathBuf, bool)> = queue.drain(..).collect();
            debug!(round, files = entries.len(), pairs = plan.pairs.len(), "pairwise round");

            for (a, b) in plan.pairs {
                if let Err(e) = self.check_cancel() {
                    discard_owned(&entries).await;
                    discard_owned(queue.make_contiguous()).await;
                    return Err(e);
                }
                let (first, second) = (&entries[a], &entries[b]);
                let target = if last_round {
                    output.to_path_buf()
                } else {
                    self.next_scratch(&format!("pair{round}"), "mp4")
                };

                let merged = self
                    .assembler
                    .tool
                    .concat_pair(&first.0, &second.0, &target, &self.assembler.config.profile)
                    .await;
                if let Err(e) = merged {
                    remove_quietly(&target).await;
                    discard_owned(&entries).await;
                    discard_owned(queue.make_contiguous()).await;
                    return Err(concat_failed(output, files.len(), &e));
                }

                for entry in [first, second] {
                    if entry.1 {
                        remove_quietly(&entry.0).await;
                    }
                }
                queue.push_back((target, !last_round));
            }

            if let Some(carry) = plan.carry {
                queue.push_back(entries[carry].clone());
            }
            round += 1;
        }

        Ok(())
    }
}

fn concat_failed(output: &Path, inputs: usize, cause: &Error) -> Error {
    let stderr = match cause {
        Error::Media(media) => media.stderr().unwrap_or_default().to_string(),
        _ => String::new(),
    };
    MediaError::ConcatFailed {
        output: output.to_path_buf(),
        inputs,
        reason: cause.to_string(),
        stderr,
    }
    .into()
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove file");
    }
}

async fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        remove_quietly(path).await;
    }
}

async fn discard_owned(entries: &[(PathBuf, bool)]) {
    for (path, owned) in entries {
        if *owned {
            remove_quietly(path).await;
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
