use std::time::Duration;

/// Caller session tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
  /// Timeout applied to requests that do not set their own.
  pub default_timeout_ms: u64,
  /// Work queue reclaim deadline, refreshed on every push.
  pub queue_ttl: Duration,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      default_timeout_ms: wire::DEFAULT_TIMEOUT_MS,
      queue_ttl: broker::names::QUEUE_TTL,
    }
  }
}
