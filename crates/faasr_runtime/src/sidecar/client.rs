use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::errors::FaasrError;

/// Polls `/faasr-echo?message=<nonce>` until the sidecar echoes the same
/// nonce back, or `timeout` elapses. Comparing the echoed body (rather
/// than just the HTTP status) guards against polling a stale sidecar
/// left listening on the same loopback port by a previous invocation.
pub async fn wait_until_ready(
    client: &reqwest::Client,
    port: u16,
    timeout: Duration,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    let nonce = Uuid::new_v4().to_string();
    let url = format!("http://127.0.0.1:{port}/faasr-echo?message={nonce}");
    let deadline = Instant::now() + timeout;

    loop {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                if let Ok(body) = resp.text().await {
                    if body == nonce {
                        return Ok(());
                    }
                }
            }
        }

        if Instant::now() >= deadline {
            return Err(FaasrError::user_function_failure(format!(
                "sidecar on port {port} did not become ready within {timeout:?}"
            ))
            .into());
        }

        tokio::time::sleep(poll_interval).await;
    }
}
