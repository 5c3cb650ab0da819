use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Error substrings that identify a rate-limited RPC response.
///
/// Matched against the lowercased error chain; a ledger integration whose
/// rate-limit errors contain none of these will not be retried.
const RATE_LIMIT_MARKERS: [&str; 4] = [
    "rate limit",
    "429",
    "too many requests",
    "over rate limit",
];

/// Retry policy for ledger reads.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(2000),
        }
    }
}

/// Check whether an error chain carries a rate-limit signature.
pub fn is_rate_limited(err: &anyhow::Error) -> bool {
    let message = format!("{err:#}").to_lowercase();
    RATE_LIMIT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Retry `op` with exponential backoff on rate-limited failures.
///
/// Any other error fails fast on the first attempt: a reverted call or a bad
/// address will not heal by waiting. The backoff sleep is raced against
/// `cancel` so shutdown never waits out the remaining delay.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    op: F,
) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !is_rate_limited(&e) {
                    return Err(e);
                }
                last_error = Some(e);

                if attempt + 1 < policy.max_attempts {
                    let delay = policy.base_delay * 2_u32.pow(attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {},
                        _ = cancel.cancelled() => {
                            anyhow::bail!("retry aborted by cancellation");
                        },
                    }
                }
            },
        }
    }

    Err(match last_error {
        Some(e) => e.context(format!(
            "max retries exceeded after {} attempts",
            policy.max_attempts
        )),
        None => anyhow::anyhow!(
            "max retries exceeded after {} attempts",
            policy.max_attempts
        ),
    })
}
