use std::time::Duration;

/// Worker session tuning.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
  /// Upper bound on simultaneously running handler invocations.
  pub concurrency: usize,
  /// Server-side watchdog: a handler that reaches neither `done` nor
  /// `error` within this bound gets a synthetic timeout failure published
  /// on its behalf. `None` disables the watchdog.
  pub handler_timeout: Option<Duration>,
  /// How often the liveness record is refreshed.
  pub heartbeat_interval: Duration,
  /// Liveness record expiry; strictly longer than the refresh interval so
  /// a crashed service disappears after at most one missed window.
  pub heartbeat_ttl: Duration,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      concurrency: 1,
      handler_timeout: None,
      heartbeat_interval: Duration::from_secs(60),
      heartbeat_ttl: Duration::from_secs(180),
    }
  }
}
