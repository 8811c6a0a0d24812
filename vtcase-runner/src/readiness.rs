//! Polls an emulator instance until it accepts connections.
//!
//! Grounded on `_wait_until_target_emulator_is_ready` in
//! `original_source/vts-testing/vts-testing/models/test_executor.py`: a
//! tight ~5ms poll loop against the emulator's HTTP port, bounded by an
//! overall timeout.

use std::time::Duration;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub async fn wait_until_ready(base_url: &str, timeout: Duration) -> bool {
    let client = reqwest::Client::new();
    let deadline = Instant::now() + timeout;
    loop {
        if client.get(base_url).send().await.is_ok() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gives_up_after_timeout_against_a_closed_port() {
        let ready = wait_until_ready("http://127.0.0.1:1", Duration::from_millis(20)).await;
        assert!(!ready);
    }
}
