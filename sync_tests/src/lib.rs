//! Shared helpers for the integration tests.

use std::time::Duration;

use sync_client::GameClient;

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Polls `client` until `done` holds or `timeout` passes.
pub async fn poll_until<F>(client: &mut GameClient, timeout: Duration, mut done: F) -> anyhow::Result<()>
where
    F: FnMut(&GameClient) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            client.poll();
            if done(client) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("condition not reached within {timeout:?}"))
}
