//! Run the full pipeline once for one account
//!
//! Usage: cargo run --example run_pipeline -- <account> [config.json]
//!
//! The session file `<session_dir>/session-<account>.json` must already exist, and
//! `remote.feed_url` must point at the saved-posts listing. Set `RUST_LOG` to
//! tune logging (default `reel_pipeline=info`).

use reel_pipeline::remote::{FileSessionStore, HttpFeed, HttpFetcher};
use reel_pipeline::{AutoConfirm, Config, Event, Pipeline, media};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reel_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(account) = args.next() else {
        eprintln!("usage: run_pipeline <account> [config.json]");
        std::process::exit(2);
    };
    let config = match args.next() {
        Some(path) => Config::from_json_file(Path::new(&path))?,
        None => Config::default(),
    };

    let pipeline = Pipeline::new(
        config.clone(),
        Arc::new(FileSessionStore::new(&config.paths.session_dir)),
        Arc::new(HttpFeed::new(&config.remote)?),
        Arc::new(HttpFetcher::new(&config.remote, &config.cleanup.media_extensions)?),
        media::from_config(&config.tools),
    )?
    .with_confirmation(Arc::new(AutoConfirm));

    let mut events = pipeline.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::Downloaded { id, size, .. } => println!("  downloaded {id} ({size} bytes)"),
                Event::DownloadFailed { id, error } => println!("  skipped {id}: {error}"),
                Event::Normalized { index, total, .. } => println!("  normalized {index}/{total}"),
                Event::MergeFallback { inputs } => {
                    println!("  stream copy failed for {inputs} files, re-encoding")
                }
                Event::StageChanged { to, .. } => println!("→ {to}"),
                _ => {}
            }
        }
    });

    let cancel = CancellationToken::new();
    reel_pipeline::cancel_on_signal(cancel.clone());

    let report = pipeline.run(&account, &cancel).await?;

    println!("═══════════════════════════════════════════════════════════");
    println!("  downloaded: {}", report.downloaded);
    println!("  skipped:    {} existing, {} non-video", report.skipped_existing, report.skipped_non_video);
    println!("  failed:     {}", report.failed);
    println!("  normalized: {}", report.normalized);
    match &report.artifact {
        Some(artifact) => println!("  artifact:   {}", artifact.path.display()),
        None => println!("  artifact:   none"),
    }
    if report.cancelled {
        println!("  (cancelled)");
    }
    println!("═══════════════════════════════════════════════════════════");
    Ok(())
}
