//! Publish collaborator and confirmation hook

use crate::config::PublishConfig;
use crate::error::{Error, Result};
use crate::types::PublishOutcome;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Uploads a finished artifact somewhere
///
/// Only the coordinator calls this, once per run, after a successful merge.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish the file at `path`
    async fn publish(&self, path: &Path) -> Result<PublishOutcome>;

    /// Name for logging
    fn name(&self) -> &str;
}

/// Asks whether a step should go ahead
///
/// Stands in for interactive prompts so the core never blocks on stdin.
#[async_trait]
pub trait ConfirmationHook: Send + Sync {
    /// Answer `prompt`; false skips the step
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Confirms everything
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoConfirm;

#[async_trait]
impl ConfirmationHook for AutoConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Runs an external program with the artifact path as its only argument
///
/// The program also sees `REEL_ARTIFACT` in its environment. A zero exit status
/// counts as success; the child is killed once `timeout` elapses.
#[derive(Clone, Debug)]
pub struct ScriptPublisher {
    program: PathBuf,
    timeout: Duration,
}

impl ScriptPublisher {
    /// Publisher running `program`
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Publisher for `publish.script`, if one is configured
    pub fn from_config(config: &PublishConfig) -> Option<Self> {
        config
            .script
            .as_ref()
            .map(|script| Self::new(script.clone(), config.timeout))
    }
}

#[async_trait]
impl Publisher for ScriptPublisher {
    async fn publish(&self, path: &Path) -> Result<PublishOutcome> {
        let started = Instant::now();
        info!(script = %self.program.display(), artifact = %path.display(), "running publish script");

        let child = tokio::process::Command::new(&self.program)
            .arg(path)
            .env("REEL_ARTIFACT", path)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::ExternalTool(format!(
                    "failed to run publish script {}: {e}",
                    self.program.display()
                )));
            }
            Err(_) => {
                warn!(script = %self.program.display(), timeout = ?self.timeout, "publish script timed out");
                return Ok(PublishOutcome {
                    success: false,
                    duration: started.elapsed(),
                });
            }
        };

        let success = output.status.success();
        if !success {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                script = %self.program.display(),
                exit_code = ?output.status.code(),
                stderr = %stderr.trim(),
                "publish script failed"
            );
        }
        Ok(PublishOutcome {
            success,
            duration: started.elapsed(),
        })
    }

    fn name(&self) -> &str {
        "script"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_requires_a_script() {
        assert!(ScriptPublisher::from_config(&PublishConfig::default()).is_none());

        let config = PublishConfig {
            script: Some(PathBuf::from("/usr/local/bin/upload")),
            ..Default::default()
        };
        let publisher = ScriptPublisher::from_config(&config).unwrap();
        assert_eq!(publisher.program, PathBuf::from("/usr/local/bin/upload"));
        assert_eq!(publisher.timeout, config.timeout);
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let publisher = ScriptPublisher::new("/nonexistent/reel-upload", Duration::from_secs(5));
        let err = publisher.publish(Path::new("/tmp/a.mp4")).await.unwrap_err();
        assert!(matches!(err, Error::ExternalTool(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_decides_success() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("reel.mp4");
        std::fs::write(&artifact, b"x").unwrap();

        // `ls <path>` fails for a missing path
        let ls = which::which("ls").unwrap();
        let publisher = ScriptPublisher::new(&ls, Duration::from_secs(5));

        assert!(publisher.publish(&artifact).await.unwrap().success);
        assert!(!publisher.publish(&dir.path().join("missing.mp4")).await.unwrap().success);
    }

    #[tokio::test]
    async fn auto_confirm_says_yes() {
        assert!(AutoConfirm.confirm("publish?").await);
    }
}
