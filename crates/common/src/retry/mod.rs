//! Retry policy for transient infrastructure failures
//!
//! Exponential backoff with a fixed attempt cap. The final failure is
//! wrapped in [`AppError::RetriesExhausted`] so callers can report which
//! operation gave up and after how many attempts.

use crate::errors::{AppError, Result};
use std::future::Future;
use std::time::Duration;

/// Run `f` up to `max_retries` times, doubling `initial_delay` between
/// attempts. Every attempt's failure is logged at warn level.
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    max_retries: u32,
    initial_delay: Duration,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_error: Option<AppError> = None;

    for attempt in 1..=max_retries {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt,
                    max_retries = max_retries,
                    error = %e,
                    "Operation failed"
                );
                last_error = Some(e);
            }
        }

        if attempt < max_retries {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    Err(AppError::RetriesExhausted {
        operation: operation_name.to_string(),
        attempts: max_retries,
        message: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string()),
    })
}
