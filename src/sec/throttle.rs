//! Fixed inter-request delay for SEC EDGAR fair-access compliance

use std::time::Duration;
use tracing::trace;

/// Sleeps a fixed delay before each outbound request.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    delay: Duration,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Wait out the delay. Call once per request, never once per batch.
    pub async fn pace(&self) {
        if self.delay.is_zero() {
            return;
        }
        trace!(delay_ms = self.delay.as_millis() as u64, "Pacing SEC request");
        tokio::time::sleep(self.delay).await;
    }
}
