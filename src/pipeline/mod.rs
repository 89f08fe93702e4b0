//! Pipeline coordinator
//!
//! Sequences one run: retrieval → normalization → assembly → publish.
//!
//! ```text
//! Idle → Retrieving → Normalizing → Assembling → Done
//!            └────────────┴─────────────┴──────→ Failed
//! ```
//!
//! Ledgers are only written after the output they describe is durable: the
//! download ledger by the retriever once bytes are on disk, the merge ledger here
//! once the artifact exists. A crash in between leaves the ledger behind the
//! filesystem, never ahead of it.

mod publish;

pub use publish::{AutoConfirm, ConfirmationHook, Publisher, ScriptPublisher};

use crate::assembly::Assembler;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::media::MediaTool;
use crate::normalize::Normalizer;
use crate::remote::{MediaFetcher, SavedFeed, SessionStore};
use crate::retrieval::Retriever;
use crate::types::{Event, FinalArtifact, LocalFile, PipelineState, RunReport};
use crate::utils::{clear_dir, list_media_files};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs the fetch-normalize-assemble-publish sequence for an account
pub struct Pipeline {
    config: Arc<Config>,
    retriever: Retriever,
    normalizer: Normalizer,
    assembler: Assembler,
    publisher: Option<Arc<dyn Publisher>>,
    confirmation: Option<Arc<dyn ConfirmationHook>>,
    event_tx: broadcast::Sender<Event>,
}

/// Mutable state of one run
struct Run {
    state: PipelineState,
    report: RunReport,
    event_tx: broadcast::Sender<Event>,
}

impl Run {
    fn transition(&mut self, to: PipelineState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(%from, %to, "pipeline state changed");
        self.state = to;
        self.report.state = to;
        self.event_tx.send(Event::StageChanged { from, to }).ok();
    }
}

impl Pipeline {
    /// Create a coordinator over the given collaborators
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the configuration does not validate.
    pub fn new(
        config: Config,
        sessions: Arc<dyn SessionStore>,
        feed: Arc<dyn SavedFeed>,
        fetcher: Arc<dyn MediaFetcher>,
        tool: Arc<dyn MediaTool>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        // Slow subscribers get Lagged; sends never block
        let (event_tx, _rx) = broadcast::channel(1000);

        let retriever = Retriever::new(
            config.clone(),
            sessions,
            feed,
            fetcher,
            event_tx.clone(),
        );
        let normalizer = Normalizer::new(config.clone(), tool.clone(), event_tx.clone());
        let assembler = Assembler::new(config.clone(), tool, event_tx.clone());
        let publisher = ScriptPublisher::from_config(&config.publish)
            .map(|p| Arc::new(p) as Arc<dyn Publisher>);

        Ok(Self {
            config,
            retriever,
            normalizer,
            assembler,
            publisher,
            confirmation: None,
            event_tx,
        })
    }

    /// Attach the publish collaborator, replacing any configured script
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Attach the hook asked before publishing
    ///
    /// Without a hook, publishing goes ahead unprompted.
    pub fn with_confirmation(mut self, hook: Arc<dyn ConfirmationHook>) -> Self {
        self.confirmation = Some(hook);
        self
    }

    /// Subscribe to progress events
    ///
    /// Multiple subscribers are supported; each receives every event sent after
    /// it subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The validated configuration
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Execute one run for `account`
    ///
    /// Cancellation is a controlled shutdown: the report comes back with
    /// `cancelled` set, everything confirmed so far is recorded, nothing is
    /// published.
    ///
    /// # Errors
    ///
    /// Any error that moves the run to [`PipelineState::Failed`]: authentication,
    /// sustained rate limiting, normalization or assembly failures, ledger I/O.
    pub async fn run(&self, account: &str, cancel: &CancellationToken) -> Result<RunReport> {
        let mut run = Run {
            state: PipelineState::Idle,
            report: RunReport::new(),
            event_tx: self.event_tx.clone(),
        };
        info!(account, "pipeline run starting");

        match self.execute(account, cancel, &mut run).await {
            Ok(()) => {
                run.transition(PipelineState::Done);
                info!(
                    account,
                    downloaded = run.report.downloaded,
                    normalized = run.report.normalized,
                    artifact = ?run.report.artifact.as_ref().map(|a| &a.path),
                    cancelled = run.report.cancelled,
                    "pipeline run finished"
                );
                Ok(run.report)
            }
            Err(Error::Cancelled) => {
                run.report.cancelled = true;
                run.transition(PipelineState::Done);
                info!(account, "pipeline run cancelled");
                Ok(run.report)
            }
            Err(e) => {
                error!(account, stage = %run.state, error = %e, "pipeline run failed");
                run.transition(PipelineState::Failed);
                self.event_tx
                    .send(Event::RunFailed {
                        error: e.to_string(),
                    })
                    .ok();
                Err(e)
            }
        }
    }

    async fn execute(&self, account: &str, cancel: &CancellationToken, run: &mut Run) -> Result<()> {
        self.prepare_dirs().await?;

        run.transition(PipelineState::Retrieving);
        let started = Instant::now();
        let mut downloads = Ledger::open(self.config.paths.download_ledger()).await?;
        let retrieval = self.retriever.run(account, &mut downloads, cancel).await;
        run.report.retrieval_time = started.elapsed();
        let retrieval = retrieval?;

        run.report.downloaded = retrieval.downloaded.len();
        run.report.skipped_existing = retrieval.skipped_existing;
        run.report.skipped_non_video = retrieval.skipped_non_video;
        run.report.failed = retrieval.failed.len();
        if retrieval.cancelled || cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut merged = Ledger::open(self.config.paths.merge_ledger()).await?;
        let candidates = self.merge_candidates(&merged).await?;
        if candidates.is_empty() {
            info!("no new videos to merge");
            return Ok(());
        }

        let artifact = self.merge(&candidates, cancel, run).await?;

        // The artifact is durable; only now do its sources count as merged
        let recorded = merged
            .append(candidates.iter().map(|f| f.file_name()))
            .await?;
        info!(recorded, artifact = %artifact.path.display(), "merge ledger updated");

        if self.config.assembly.delete_sources_after_merge {
            delete_sources(&candidates).await;
        }
        run.report.artifact = Some(artifact.clone());

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        run.transition(PipelineState::Done);
        self.publish(&artifact, run).await;
        Ok(())
    }

    async fn prepare_dirs(&self) -> Result<()> {
        let paths = &self.config.paths;
        for dir in [
            &paths.download_dir,
            &paths.merged_dir,
            &paths.log_dir,
            &paths.session_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        let leftovers = clear_dir(&paths.temp_dir).await?;
        if leftovers > 0 {
            info!(count = leftovers, dir = %paths.temp_dir.display(), "discarded leftovers from an earlier run");
        }
        Ok(())
    }

    /// Media files in the download directory not yet recorded as merged, oldest first
    ///
    /// Includes files downloaded by earlier runs whose merge never completed.
    async fn merge_candidates(&self, merged: &Ledger) -> Result<Vec<LocalFile>> {
        let files = list_media_files(
            &self.config.paths.download_dir,
            &self.config.cleanup.media_extensions,
        )
        .await?;
        let mut candidates: Vec<LocalFile> = files
            .into_iter()
            .filter(|f| !merged.contains(&f.file_name()))
            .collect();

        if let Some(limit) = self.config.assembly.max_merge_inputs
            && candidates.len() > limit
        {
            let deferred = candidates.len() - limit;
            debug!(limit, deferred, "merging the oldest candidates, the rest wait for a later run");
            candidates.truncate(limit);
        }

        info!(count = candidates.len(), "merge candidates selected");
        Ok(candidates)
    }

    async fn merge(
        &self,
        candidates: &[LocalFile],
        cancel: &CancellationToken,
        run: &mut Run,
    ) -> Result<FinalArtifact> {
        run.transition(PipelineState::Normalizing);
        let started = Instant::now();
        let normalized = self.normalizer.normalize_all(candidates, cancel).await;
        run.report.normalize_time = started.elapsed();
        let normalized = normalized?;
        run.report.normalized = normalized.len();

        if cancel.is_cancelled() {
            discard_temporaries(&normalized).await;
            return Err(Error::Cancelled);
        }

        run.transition(PipelineState::Assembling);
        let started = Instant::now();
        let assembled = self
            .assembler
            .merge(&normalized, &self.config.paths.merged_dir, cancel)
            .await;
        run.report.assembly_time = started.elapsed();
        discard_temporaries(&normalized).await;
        assembled
    }

    async fn publish(&self, artifact: &FinalArtifact, run: &mut Run) {
        let Some(publisher) = &self.publisher else {
            debug!("no publisher attached");
            return;
        };

        if self.config.publish.confirm
            && let Some(hook) = &self.confirmation
        {
            let prompt = format!("Publish {}?", artifact.path.display());
            if !hook.confirm(&prompt).await {
                info!(artifact = %artifact.path.display(), "publish declined");
                return;
            }
        }

        info!(publisher = publisher.name(), artifact = %artifact.path.display(), "publishing");
        match publisher.publish(&artifact.path).await {
            Ok(outcome) => {
                if outcome.success {
                    info!(duration_secs = outcome.duration.as_secs_f64(), "published");
                } else {
                    warn!(duration_secs = outcome.duration.as_secs_f64(), "publisher reported failure");
                }
                self.event_tx
                    .send(Event::Published {
                        path: artifact.path.clone(),
                        outcome: outcome.clone(),
                    })
                    .ok();
                run.report.published = Some(outcome);
            }
            Err(e) => {
                // The artifact stays on disk and in the merge ledger either way
                error!(publisher = publisher.name(), error = %e, "publish failed");
            }
        }
    }
}

async fn discard_temporaries(files: &[LocalFile]) {
    for file in files {
        if let Err(e) = tokio::fs::remove_file(&file.path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %file.path.display(), error = %e, "failed to remove normalized file");
        }
    }
}

async fn delete_sources(files: &[LocalFile]) {
    let mut deleted = 0;
    for file in files {
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => deleted += 1,
            Err(e) => warn!(path = %file.path.display(), error = %e, "failed to delete merged source"),
        }
    }
    info!(deleted, "merged sources deleted");
}
