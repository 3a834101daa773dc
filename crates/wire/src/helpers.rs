use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

/// Generate a globally unique identifier for requests and session instances.
pub fn generate_id() -> String {
  uuid::Uuid::new_v4().to_string()
}

/// Serialize a value to its wire form. Returns `None` when the value cannot
/// be represented as JSON.
pub fn serialize<T: Serialize>(value: &T) -> Option<String> {
  serde_json::to_string(value).ok()
}

/// Fail-soft deserialization: a malformed payload yields the default value
/// instead of an error, so a single corrupt message cannot take down a
/// dispatch loop.
pub fn deserialize<T: DeserializeOwned + Default>(payload: &str) -> T {
  serde_json::from_str(payload).unwrap_or_default()
}

/// Hex digest used for cache keys.
pub fn sha256_hex(input: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  format!("{:x}", hasher.finalize())
}
