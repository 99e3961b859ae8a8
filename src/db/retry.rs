//! Retry policy for connection acquisition.
//!
//! Some servers refuse connections when they are opened too fast in a row
//! (Oracle listener error 12519, PostgreSQL `too_many_connections`, MySQL
//! `ER_CON_COUNT_ERROR`). Acquisition failing with one of those codes is
//! retried a bounded number of times with a linear backoff; every other
//! failure is final.
//!
//! The policy is a pure value. Waiting goes through a [`Sleeper`] so the
//! timing can be observed in tests without real sleeps.

use crate::error::DirectoryError;
use async_trait::async_trait;
use std::time::Duration;

/// Attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Vendor codes meaning "server overloaded, try again shortly".
pub const DEFAULT_OVERLOAD_CODES: &[&str] = &["12519", "53300", "1040"];

/// Retry decision result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after waiting the given delay
    Retry(Duration),
    /// Do not retry, surface the error
    GiveUp,
}

/// Bounded retry on overload errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    overload_codes: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            overload_codes: DEFAULT_OVERLOAD_CODES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, overload_codes: Vec<String>) -> Self {
        Self {
            max_attempts,
            overload_codes,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn overload_codes(&self) -> &[String] {
        &self.overload_codes
    }

    /// Delay before the next try, after `attempt` failed ones (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(u64::from(attempt))
    }

    /// Check if the error's vendor code marks an overloaded server.
    pub fn is_overload(&self, err: &DirectoryError) -> bool {
        err.sql_state()
            .is_some_and(|code| self.overload_codes.iter().any(|c| c == code))
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed.
    ///
    /// With the default of five attempts the waits are 1, 2, 3 and 4 seconds;
    /// the fifth failure gives up.
    pub fn decide(&self, attempt: u32, err: &DirectoryError) -> RetryDecision {
        if attempt >= self.max_attempts || !self.is_overload(err) {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.backoff(attempt))
    }
}

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
