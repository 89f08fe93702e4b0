//! # reel-pipeline
//!
//! Fetches an account's saved videos, normalizes them to one canonical profile
//! and concatenates them into a single timestamped reel.
//!
//! ## Guarantees
//!
//! - **Idempotent** - append-only ledgers mean a video is downloaded once and
//!   merged once, across any number of runs
//! - **Crash-safe** - a ledger entry is written only after the file it describes
//!   is durable on disk
//! - **Polite** - bounded retry with exponential backoff on throttling, and a
//!   randomized delay between remote calls
//! - **Event-driven** - consumers subscribe to progress events, no polling
//!
//! ## Quick Start
//!
//! ```no_run
//! use reel_pipeline::remote::{FileSessionStore, HttpFeed, HttpFetcher};
//! use reel_pipeline::{Config, Pipeline, media};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_json_file(std::path::Path::new("reel.json"))?;
//!
//!     let pipeline = Pipeline::new(
//!         config.clone(),
//!         Arc::new(FileSessionStore::new(&config.paths.session_dir)),
//!         Arc::new(HttpFeed::new(&config.remote)?),
//!         Arc::new(HttpFetcher::new(&config.remote, &config.cleanup.media_extensions)?),
//!         media::from_config(&config.tools),
//!     )?;
//!
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let cancel = CancellationToken::new();
//!     reel_pipeline::cancel_on_signal(cancel.clone());
//!     let report = pipeline.run("my_account", &cancel).await?;
//!     println!("{report:?}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Merge engine (stream copy, batching, pairwise fallback)
pub mod assembly;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Append-only identifier ledger
pub mod ledger;
/// External media tooling
pub mod media;
/// Normalization to the canonical profile
pub mod normalize;
/// Run coordinator
pub mod pipeline;
/// Remote service collaborators
pub mod remote;
/// Saved-video retrieval
pub mod retrieval;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use assembly::Assembler;
pub use config::Config;
pub use error::{Error, FailureKind, LedgerError, MediaError, Result};
pub use ledger::Ledger;
pub use media::{FfmpegTool, MediaTool, NoOpMediaTool};
pub use normalize::Normalizer;
pub use pipeline::{AutoConfirm, ConfirmationHook, Pipeline, Publisher, ScriptPublisher};
pub use retrieval::{RetrievalReport, Retriever};
pub use retry::{BackoffPolicy, Classify, RetryError};
pub use types::{
    Event, FinalArtifact, LocalFile, MediaId, MediaItem, MediaKind, PipelineState,
    PublishOutcome, RunReport,
};

/// Cancel `token` when a termination signal arrives
///
/// Spawns a task on the current runtime and returns immediately. A pipeline run
/// given the same token then shuts down at its next checkpoint, keeping everything
/// confirmed so far. Listens for Ctrl+C everywhere and SIGTERM on unix; a signal
/// that cannot be registered is logged and ignored.
pub fn cancel_on_signal(token: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupted() => {}
            _ = terminated() => {}
            _ = token.cancelled() => return,
        }
        tracing::info!("cancelling pipeline run");
        token.cancel();
    });
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("received interrupt");
}

#[cfg(unix)]
async fn terminated() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
            tracing::info!("received SIGTERM");
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminated() {
    std::future::pending::<()>().await;
}
