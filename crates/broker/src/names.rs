//! Shared naming scheme for queues, channels and keys.
//!
//! Both session types must agree on these names; keeping them in one place
//! is what lets a client and a service find each other through the broker
//! without ever exchanging addresses.

use std::time::Duration;

/// Keyspace prefix for liveness records.
pub const SERVICE_KEY_PREFIX: &str = "service:";

/// Pattern matching every liveness record, used by broadcast discovery.
pub const SERVICE_KEY_PATTERN: &str = "service:*";

/// Reclaim deadline for work queues; refreshed on every push so only
/// abandoned queues expire.
pub const QUEUE_TTL: Duration = Duration::from_secs(30 * 60);

/// Work queue name for a service.
pub fn queue(service_name: &str) -> String {
  service_name.to_string()
}

/// Private reply channel for one client instance.
pub fn reply_channel(service_name: &str, client_instance: &str) -> String {
  format!("{service_name}{client_instance}")
}

/// Liveness key advertising that a named service is running.
pub fn liveness_key(service_name: &str) -> String {
  format!("{SERVICE_KEY_PREFIX}{service_name}")
}
