use std::future::Future;
use std::time::Duration;

/// Fixed-delay retry budget for a startup dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Failures tolerated before giving up. The attempt after the last
    /// tolerated failure is the final one.
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("Gave up connecting after {attempts} attempts")]
pub struct ConnectError<E: std::error::Error + 'static> {
    pub attempts: u32,
    #[source]
    pub source: E,
}

/// Run `connect` until it succeeds or `policy.max_retries` failures have
/// been followed by one more failed attempt.
///
/// The delay between attempts never grows.
#[tracing::instrument(name = "Connect with backoff", skip(connect))]
pub async fn connect_with_backoff<T, E, F, Fut>(
    policy: BackoffPolicy,
    mut connect: F,
) -> Result<T, ConnectError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    let mut failures = 0;
    loop {
        match connect().await {
            Ok(handle) => {
                tracing::info!(attempts = failures + 1, "Connected");
                return Ok(handle);
            }
            Err(e) => {
                failures += 1;
                if failures > policy.max_retries {
                    return Err(ConnectError {
                        attempts: failures,
                        source: e,
                    });
                }
                tracing::warn!(
                    error.cause_chain = ?e,
                    attempt = failures,
                    "Could not connect. Retrying..."
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
