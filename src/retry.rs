//! Bounded retry with a typed backoff policy
//!
//! Every attempt returns a plain `Result<T, E>`; the error is classified through
//! [`Classify`] into a [`FailureKind`] and the [`BackoffPolicy`] decides how long to
//! wait before the next attempt:
//!
//! - `RateLimited`: `initial_delay × multiplier^(n-1)` after the n-th throttling
//!   signal, capped at `max_delay`
//! - `Transient`: fixed `transient_delay`
//! - `Fatal` / `Permanent`: no retry
//!
//! Waits are cancellable through a [`CancellationToken`].
//!
//! # Example
//!
//! ```no_run
//! use reel_pipeline::retry::{BackoffPolicy, retry_with_backoff};
//! use reel_pipeline::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = BackoffPolicy::from(&RetryConfig::default());
//! let cancel = CancellationToken::new();
//! let value = retry_with_backoff(&policy, &cancel, |_attempt| async {
//!     Ok::<_, reel_pipeline::Error>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, FailureKind};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Classification of an error for retry purposes
pub trait Classify {
    /// How this failure should be handled
    fn failure_kind(&self) -> FailureKind;
}

impl Classify for Error {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Auth(_) => FailureKind::Fatal,
            Error::RateLimited(_) => FailureKind::RateLimited,
            Error::Remote(_) => FailureKind::Transient,
            Error::Http { status, .. } if *status >= 500 => FailureKind::Transient,
            Error::Http { .. } => FailureKind::Permanent,
            Error::Network(e) => match e.status().map(|s| s.as_u16()) {
                Some(429) => FailureKind::RateLimited,
                Some(401) | Some(403) => FailureKind::Fatal,
                Some(status) if status >= 500 => FailureKind::Transient,
                Some(_) => FailureKind::Permanent,
                None if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() => {
                    FailureKind::Transient
                }
                None => FailureKind::Permanent,
            },
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::Interrupted => FailureKind::Transient,
                _ => FailureKind::Permanent,
            },
            Error::Config { .. }
            | Error::Serialization(_)
            | Error::Ledger(_)
            | Error::Media(_)
            | Error::ExternalTool(_)
            | Error::NotSupported(_)
            | Error::Cancelled
            | Error::Other(_) => FailureKind::Permanent,
        }
    }
}

/// Wait schedule for a retry loop
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first rate-limit signal
    pub initial_delay: Duration,
    /// Cap for rate-limit delays
    pub max_delay: Duration,
    /// Growth factor between rate-limit delays
    pub multiplier: f64,
    /// Delay after a transient failure
    pub transient_delay: Duration,
    /// Randomize rate-limit delays within `[d(n), min(d(n+1), max_delay))`
    pub jitter: bool,
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            multiplier: config.backoff_multiplier,
            transient_delay: config.transient_delay,
            jitter: config.jitter,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `hits`-th consecutive rate-limit signal (1-based), never above `max_delay`
    pub fn rate_limit_delay(&self, hits: u32) -> Duration {
        let exponent = i32::try_from(hits.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs).min(self.max_delay)
    }

    /// Delay before retrying after a failure of `kind`, or None if it must not be retried
    pub fn delay_for(&self, kind: FailureKind, rate_limit_hits: u32) -> Option<Duration> {
        match kind {
            FailureKind::RateLimited => {
                let base = self.rate_limit_delay(rate_limit_hits);
                if !self.jitter {
                    return Some(base);
                }
                // Below the next step, so jittered delays still grow strictly
                let next = self.rate_limit_delay(rate_limit_hits.saturating_add(1));
                Some(add_jitter(base, next))
            }
            FailureKind::Transient => Some(self.transient_delay),
            FailureKind::Fatal | FailureKind::Permanent => None,
        }
    }
}

/// Why a retry loop gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Cancellation was requested before or between attempts
    Cancelled,
    /// Every attempt failed with a retryable error
    Exhausted {
        /// Last error seen
        error: E,
        /// Attempts made
        attempts: u32,
    },
    /// A fatal or permanent error stopped the loop
    Aborted(E),
}

impl<E> RetryError<E> {
    /// The underlying error, if the loop was not cancelled
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Exhausted { error, .. } | RetryError::Aborted(error) => Some(error),
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Cancelled => write!(f, "cancelled"),
            RetryError::Exhausted { error, attempts } => {
                write!(f, "gave up after {attempts} attempt(s): {error}")
            }
            RetryError::Aborted(error) => write!(f, "{error}"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

impl From<RetryError<Error>> for Error {
    fn from(err: RetryError<Error>) -> Self {
        err.into_inner().unwrap_or(Error::Cancelled)
    }
}

/// Execute an async operation with the policy's retry schedule
///
/// The closure receives the 1-based attempt number.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + std::fmt::Display,
{
    retry_with_backoff_observed(policy, cancel, operation, |_, _, _| {}).await
}

/// Same as [`retry_with_backoff`], calling `on_backoff(error, kind, delay)` before each wait
pub async fn retry_with_backoff_observed<F, Fut, T, E, O>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut operation: F,
    mut on_backoff: O,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + std::fmt::Display,
    O: FnMut(&E, FailureKind, Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    let mut rate_limit_hits = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let kind = error.failure_kind();
        if kind == FailureKind::RateLimited {
            rate_limit_hits += 1;
        }

        let Some(delay) = policy.delay_for(kind, rate_limit_hits) else {
            tracing::error!(error = %error, ?kind, "operation failed with non-retryable error");
            return Err(RetryError::Aborted(error));
        };

        if attempt >= max_attempts {
            tracing::error!(
                error = %error,
                attempts = attempt,
                "operation failed after all retry attempts exhausted"
            );
            return Err(RetryError::Exhausted {
                error,
                attempts: attempt,
            });
        }

        tracing::warn!(
            error = %error,
            ?kind,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis(),
            "operation failed, retrying"
        );
        on_backoff(&error, kind, delay);

        if !sleep_or_cancel(delay, cancel).await {
            tracing::info!(attempt, "retry wait interrupted by cancellation");
            return Err(RetryError::Cancelled);
        }
    }
}

/// Sleep for `delay` unless cancelled first; returns false on cancellation
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Uniform jitter in `[low, high)`; `low` when the range is empty
fn add_jitter(low: Duration, high: Duration) -> Duration {
    if high <= low {
        return low;
    }
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..1.0);
    (low + (high - low).mul_f64(jitter_factor)).min(high.saturating_sub(Duration::from_nanos(1)))
}
