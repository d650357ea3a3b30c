//! Bounded retries with backoff
//!
//! A [`Retry`] is pure configuration: the total number of attempts (always at least one) and a
//! [`Backoff`] computing the wait after a failed attempt. Attempts are numbered from 1.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::Retryable;
use crate::progress::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// no wait between attempts
    None,
    /// the same delay after every attempt
    #[default]
    Constant,
    /// attempt * delay
    Linear,
    /// attempt² * delay
    Squared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    times: u32,
    backoff: Backoff,
    unit: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self::none()
    }
}

impl Retry {
    pub fn new(times: u32, backoff: Backoff, unit: Duration) -> Self {
        Self {
            times: times.max(1),
            backoff,
            unit,
        }
    }

    /// Single attempt
    pub fn none() -> Self {
        Self::new(1, Backoff::None, Duration::ZERO)
    }

    pub fn constant(times: u32, delay: Duration) -> Self {
        Self::new(times, Backoff::Constant, delay)
    }

    pub fn linear(times: u32, unit: Duration) -> Self {
        Self::new(times, Backoff::Linear, unit)
    }

    pub fn squared(times: u32, unit: Duration) -> Self {
        Self::new(times, Backoff::Squared, unit)
    }

    pub fn after_second(times: u32) -> Self {
        Self::constant(times, Duration::from_secs(1))
    }

    pub fn after_squared_second(times: u32) -> Self {
        Self::squared(times, Duration::from_secs(1))
    }

    pub fn times(&self) -> u32 {
        self.times
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Wait after the failed attempt number `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Constant => self.unit,
            Backoff::Linear => self.unit.saturating_mul(attempt),
            Backoff::Squared => self.unit.saturating_mul(attempt.saturating_mul(attempt)),
        }
    }

    /// Runs `block` until it succeeds, fails with a non-retryable error, or attempts run out
    pub async fn with_sleep<T, E, F, Fut>(&self, block: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.attempt(block, |delay| async move {
            tokio::time::sleep(delay).await;
        })
        .await
    }

    /// Same as [`Retry::with_sleep`] but waits through a reported countdown
    pub async fn with_countdown<T, E, F, Fut>(
        &self,
        reporter: &Reporter,
        operation: &str,
        block: F,
    ) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let message = format!("Retrying {operation}");
        self.attempt(block, |delay| {
            let message = message.clone();
            async move {
                reporter.countdown(&message, delay).await;
            }
        })
        .await
    }

    /// Runs `block` for every attempt, sleeping in between
    ///
    /// Neither success nor failure ends the loop early. Returns every result, or the error of the
    /// last failed attempt when any attempt failed.
    pub async fn with_sleep_till_end<T, E, F, Fut>(&self, mut block: F) -> Result<Vec<T>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut results = Vec::with_capacity(self.times as usize);
        let mut last_error = None;
        for attempt in 1..=self.times {
            match block(attempt).await {
                Ok(value) => results.push(value),
                Err(error) => {
                    tracing::debug!("attempt {}/{} failed, continuing", attempt, self.times);
                    last_error = Some(error);
                }
            }
            if attempt < self.times {
                tokio::time::sleep(self.delay(attempt)).await;
            }
        }
        match last_error {
            Some(error) => Err(error),
            None => Ok(results),
        }
    }

    async fn attempt<T, E, F, Fut, W, WFut>(&self, mut block: F, mut wait: W) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        W: FnMut(Duration) -> WFut,
        WFut: Future<Output = ()>,
    {
        let mut attempt = 1;
        loop {
            match block(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => {
                    tracing::debug!("attempt {} failed, not retrying: {:#}", attempt, error);
                    return Err(error);
                }
                Err(error) if attempt >= self.times => {
                    tracing::warn!("all {} attempts failed, last error: {:#}", self.times, error);
                    return Err(error);
                }
                Err(error) => {
                    let delay = self.delay(attempt);
                    tracing::info!(
                        "attempt {}/{} failed, retrying in {}: {:#}",
                        attempt,
                        self.times,
                        humantime::format_duration(delay),
                        error
                    );
                    wait(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
