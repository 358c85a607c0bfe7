// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Retry logic with a fixed inter-attempt delay.
//!
//! The delivery paths that use this favor bounded worst-case latency over
//! minimizing request volume, so there is deliberately no exponential
//! backoff: a failed attempt is retried after the same fixed delay until
//! the attempt budget is exhausted.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Configuration for fixed-delay retries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
	/// Total number of attempts, the first one included.
	pub max_attempts: u32,
	/// Delay between attempts.
	pub delay: Duration,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			delay: Duration::from_millis(500),
		}
	}
}

/// Runs `operation` until it succeeds or the attempt budget is exhausted.
///
/// Returns the last error when every attempt fails.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
	E: std::fmt::Display,
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
{
	let attempts = config.max_attempts.max(1);
	let mut last_err = None;

	for attempt in 1..=attempts {
		match operation().await {
			Ok(value) => return Ok(value),
			Err(e) => {
				if attempt < attempts {
					warn!(
						attempt = attempt,
						max_attempts = attempts,
						error = %e,
						"attempt failed, retrying after fixed delay"
					);
					tokio::time::sleep(config.delay).await;
				}
				last_err = Some(e);
			}
		}
	}

	Err(last_err.expect("at least one attempt runs"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	fn fast_config() -> RetryConfig {
		RetryConfig {
			max_attempts: 3,
			delay: Duration::from_millis(1),
		}
	}

	#[tokio::test]
	async fn test_success_on_first_attempt() {
		let calls = AtomicU32::new(0);
		let result: Result<u32, String> = retry(&fast_config(), || {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Ok(42) }
		})
		.await;

		assert_eq!(result.unwrap(), 42);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_retries_until_success() {
		let calls = AtomicU32::new(0);
		let result: Result<u32, String> = retry(&fast_config(), || {
			let n = calls.fetch_add(1, Ordering::SeqCst);
			async move {
				if n < 2 {
					Err("transient".to_string())
				} else {
					Ok(7)
				}
			}
		})
		.await;

		assert_eq!(result.unwrap(), 7);
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn test_exhausts_budget_and_returns_last_error() {
		let calls = AtomicU32::new(0);
		let result: Result<u32, String> = retry(&fast_config(), || {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Err("down".to_string()) }
		})
		.await;

		assert_eq!(result.unwrap_err(), "down");
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}
}
