use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
  #[error("Timeout can not be negative (got {0} ms)")]
  InvalidTimeout(i64),

  #[error("Cache ttl can not be negative (got {0} s)")]
  InvalidCacheTtl(i64),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}
