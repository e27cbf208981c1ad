// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Bounded exponential backoff shared by binding verification and authorization.
//!
//! Waits happen inline on the calling task: a long backoff directly extends the
//! reconcile that triggered it. There is no cancellation; a run ends on success,
//! on an aborting outcome, or after `steps` attempts.

use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Step/duration/factor policy for a bounded retry loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt
    pub initial: Duration,
    /// Multiplier applied to the delay after every attempt
    pub factor: f64,
    /// Maximum number of attempts
    pub steps: u32,
}

/// Result of a single attempt inside [`BackoffPolicy::run`].
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Failed, try again if steps remain
    Retry(OperatorError),
    /// Failed for good, stop immediately
    Abort(OperatorError),
}

/// Source of waiting, swapped for a recording fake in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

impl BackoffPolicy {
    /// Delay slept after the attempt with the given zero-based index.
    pub fn delay(&self, index: u32) -> Duration {
        self.initial
            .mul_f64(self.factor.powi(i32::try_from(index).unwrap_or(i32::MAX)))
    }

    /// Total time spent sleeping when every attempt is retried.
    pub fn max_wait(&self) -> Duration {
        (0..self.steps.saturating_sub(1)).map(|i| self.delay(i)).sum()
    }

    /// Run `op` until it is done, aborts, or `steps` attempts were made.
    ///
    /// `op` receives the one-based attempt number.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn Sleeper, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut last = None;

        for attempt in 1..=self.steps {
            if attempt > 1 {
                sleeper.sleep(self.delay(attempt - 2)).await;
            }

            match op(attempt).await {
                Attempt::Done(value) => {
                    debug!("{} succeeded on attempt {}", operation, attempt);
                    return Ok(value);
                }
                Attempt::Abort(e) => {
                    warn!("{} aborted on attempt {}: {}", operation, attempt, e);
                    return Err(e);
                }
                Attempt::Retry(e) => {
                    debug!(
                        "{} attempt {}/{} failed: {}",
                        operation, attempt, self.steps, e
                    );
                    last = Some(e);
                }
            }
        }

        let Some(last) = last else {
            return Err(OperatorError::Configuration(format!(
                "backoff policy for {} allows no attempts",
                operation
            )));
        };

        warn!(
            "{} exhausted after {} attempts: {}",
            operation, self.steps, last
        );
        Err(OperatorError::BackoffExhausted {
            operation: operation.to_string(),
            attempts: self.steps,
            last: Box::new(last),
        })
    }
}
