use super::{Connector, ServerConnection};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How hard the connection manager tries before giving up on a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per connection cycle; 0 retries forever
    pub max_attempts: u32,
    /// Delay after the first failure, doubled for each further one
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Start a new connection cycle after an established connection is lost
    pub reconnect_on_loss: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            reconnect_on_loss: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt and no reconnection
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            reconnect_on_loss: false,
            ..Default::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }
}

/// Drives a [`Connector`] with a [`RetryPolicy`]
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Connect to `endpoint`, retrying per policy. The error of the last
    /// attempt is returned once the policy is exhausted.
    pub async fn establish(
        &self,
        server_id: &str,
        endpoint: &str,
    ) -> Result<Arc<dyn ServerConnection>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("Connecting to {} (attempt {})", server_id, attempt);

            match self.connector.connect(endpoint).await {
                Ok(connection) => return Ok(connection),
                Err(e) if e.is_permanent() => return Err(e),
                Err(e) if self.policy.exhausted(attempt) => return Err(e),
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "Connection to {} failed, retrying in {:?}: {}",
                        server_id, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
