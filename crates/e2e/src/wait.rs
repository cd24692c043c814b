//! Availability polling - blocks until the started app answers over HTTP

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Per-request bound so one stalled connection cannot eat the whole window
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Stand-in deadline for durations too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + within`, clamped instead of overflowing
pub(crate) fn deadline_after(within: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(within).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Polls HTTP resources with exponential backoff
pub struct AvailabilityWaiter {
    client: reqwest::Client,
    timeout: Duration,
    initial_interval: Duration,
    max_interval: Duration,
}

impl AvailabilityWaiter {
    pub fn new(
        timeout: Duration,
        initial_interval: Duration,
        max_interval: Duration,
    ) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            timeout,
            initial_interval,
            max_interval: max_interval.max(initial_interval),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Return once every resource answers with a success status
    pub async fn wait_for(&self, resources: &[String]) -> E2eResult<()> {
        let start = Instant::now();
        let deadline = deadline_after(self.timeout);
        let mut pending: Vec<&String> = resources.iter().collect();
        let mut interval = self.initial_interval;
        let mut round = 0usize;

        while !pending.is_empty() {
            round += 1;
            let mut still_pending = Vec::with_capacity(pending.len());

            for url in pending {
                if self.is_available(url, round).await {
                    debug!("{} is available after {:?}", url, start.elapsed());
                } else {
                    still_pending.push(url);
                }
            }
            pending = still_pending;

            if pending.is_empty() {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(E2eError::Timeout {
                    resources: pending
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    waited: start.elapsed(),
                });
            }

            sleep(interval.min(deadline - now)).await;
            interval = interval.saturating_mul(2).min(self.max_interval);
        }

        Ok(())
    }

    async fn is_available(&self, url: &str, round: usize) -> bool {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!("{} returned {}", url, resp.status());
                false
            }
            Err(e) => {
                if round == 1 {
                    info!("Waiting for {} to come up...", url);
                }
                // Connection refused is expected while the app is starting
                if !e.is_connect() {
                    warn!("Availability check error for {}: {}", url, e);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}", port)
    }

    #[tokio::test]
    async fn test_empty_resource_set_returns_immediately() {
        let waiter = AvailabilityWaiter::new(
            Duration::from_millis(10),
            Duration::from_millis(5),
            Duration::from_millis(5),
        )
        .unwrap();
        waiter.wait_for(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let waiter =
            AvailabilityWaiter::new(Duration::MAX, Duration::from_millis(5), Duration::MAX)
                .unwrap();
        waiter.wait_for(&[]).await.unwrap();
        assert!(deadline_after(Duration::MAX) > Instant::now());
    }

    #[tokio::test]
    async fn test_unreachable_resource_times_out() {
        let url = closed_port_url();
        let waiter = AvailabilityWaiter::new(
            Duration::from_millis(300),
            Duration::from_millis(20),
            Duration::from_millis(80),
        )
        .unwrap();

        let start = std::time::Instant::now();
        match waiter.wait_for(&[url.clone()]).await {
            Err(E2eError::Timeout { resources, waited }) => {
                assert_eq!(resources, url);
                assert!(waited >= Duration::from_millis(300));
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
