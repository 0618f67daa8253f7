//! Retry utilities with exponential backoff and jitter.
//!
//! This module provides the backoff driver used for all Rancher API calls.
//! Each attempt reports an explicit [`Attempt`] outcome: either the call
//! completed (possibly with a status the caller still has to interpret) or it
//! failed transiently and should be retried. There is no third state.
//!
//! # Example
//!
//! ```ignore
//! use vmc_operator::retry::{retry_with_backoff, Attempt, RetryConfig};
//!
//! let response = retry_with_backoff(&RetryConfig::default(), "cluster list", || async {
//!     match sender.send(&config, &request).await {
//!         Ok(resp) => Attempt::Done(resp),
//!         Err(e) => Attempt::Retry(e),
//!     }
//! })
//! .await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Configuration for operations that may fail transiently.
///
/// Defaults match the Rancher client policy: ten attempts starting at one
/// second, doubling each time, with a small jitter to avoid thundering herd.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts before giving up
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }
}

/// Outcome of a single attempt.
///
/// `Done` terminates the loop with a value; `Retry` records the error and
/// schedules another attempt unless the budget is exhausted.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// The attempt completed; stop retrying
    Done(T),
    /// The attempt failed transiently; retry after backoff
    Retry(E),
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Runs `operation` until it reports [`Attempt::Done`] or `max_attempts`
/// attempts have reported [`Attempt::Retry`]. Exhausting the budget returns
/// the last observed error.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Name for logging purposes
/// * `operation` - The async operation to retry
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Attempt<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Attempt::Done(result) => return Ok(result),
            Attempt::Retry(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                // Jitter: +/-10% of the delay
                let jitter = rand::thread_rng().gen_range(0.9..1.1);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = std::cmp::min(
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier),
                    config.max_delay,
                );
            }
        }
    }
}
