use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::BrokerError;

/// Receiving half of a channel subscription.
///
/// Yields payloads in publish order; closes when the broker side goes away.
pub struct Subscription {
  rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
  pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
    Self { rx }
  }

  pub async fn recv(&mut self) -> Option<String> {
    self.rx.recv().await
  }
}

/// The broker transport consumed by both session types: list-style queues,
/// publish/subscribe channels, and key/value storage with expiry.
///
/// Implementations serialize wire access internally; a single instance is
/// shared as `Arc<dyn Broker>` by every session in the process. Delivery is
/// at-least-once; the correlation protocol on top tolerates duplicates.
#[async_trait]
pub trait Broker: Send + Sync {
  /// Append a payload to the tail of a named queue.
  async fn push(&self, queue: &str, payload: &str) -> Result<(), BrokerError>;

  /// Take the oldest payload from a named queue, waiting up to `timeout`
  /// for one to arrive (`None` waits indefinitely). Returns `Ok(None)` on
  /// timeout.
  async fn pop(&self, queue: &str, timeout: Option<Duration>) -> Result<Option<String>, BrokerError>;

  /// Publish a payload to every current subscriber of a channel.
  async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError>;

  /// Subscribe to a channel. Messages published before the subscription are
  /// not replayed.
  async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError>;

  async fn get(&self, key: &str) -> Result<Option<String>, BrokerError>;

  /// Store a value. Any previous expiry on the key is cleared.
  async fn set(&self, key: &str, value: &str) -> Result<(), BrokerError>;

  /// Arm or refresh the expiry of a key or queue. Unknown names are a no-op.
  async fn expire(&self, name: &str, ttl: Duration) -> Result<(), BrokerError>;

  /// Keys matching a `prefix*` pattern (or one exact key).
  async fn keys(&self, pattern: &str) -> Result<Vec<String>, BrokerError>;

  /// Values for the given keys, `None` for missing or expired entries.
  async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, BrokerError>;
}
