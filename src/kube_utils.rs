//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction and the bounded polling used for wait-for-deletion and
//! wait-for-readiness.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::trace;

use crate::Error;

/// Default interval between polling attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default bound on a single wait (deletion observed, record ready)
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll until a condition is met or timeout is reached
///
/// Repeatedly calls `check_fn` until it returns `Ok(true)`. `Ok(false)` and
/// `Err` both mean "not yet"; the last error is included in the timeout
/// message so an unreachable API server is distinguishable from a slow one.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = tokio::time::Instant::now();
    let timeout_msg = timeout_msg.into();
    let mut last_error: Option<String> = None;

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                trace!("Polling condition not yet met, retrying...");
            }
            Err(e) => {
                trace!("Polling check returned error (retrying): {}", e);
                last_error = Some(e.to_string());
            }
        }

        if start.elapsed() >= timeout {
            let message = match last_error {
                Some(err) => format!("{} (last error: {})", timeout_msg, err),
                None => timeout_msg,
            };
            return Err(Error::timeout("poll_until", message));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::configuration("kubeconfig", format!("failed to read kubeconfig: {}", e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::configuration("kubeconfig", format!("failed to load kubeconfig: {}", e))
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::store("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config)
        .map_err(|e| Error::store("create_client", format!("failed to create client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn poll_until_returns_when_condition_holds() {
        let calls = AtomicU32::new(0);
        poll_until(
            Duration::from_secs(10),
            Duration::from_millis(100),
            "never",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<bool, Error>(n >= 2) }
            },
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_times_out_with_last_error() {
        let err = poll_until(
            Duration::from_secs(1),
            Duration::from_millis(100),
            "waiting for ns1/key-secret",
            || async { Err::<bool, Error>(Error::store("get", "connection refused")) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("waiting for ns1/key-secret"));
        assert!(msg.contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_checks_at_least_once_with_zero_timeout() {
        poll_until(Duration::ZERO, Duration::from_millis(100), "x", || async {
            Ok::<bool, Error>(true)
        })
        .await
        .unwrap();
    }
}
