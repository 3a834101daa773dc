use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::WireError;
use crate::helpers;

/// Applied to requests that never set an explicit timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Per-request delivery options, carried verbatim on the wire.
///
/// A timeout of zero disables the caller-side timer entirely: the request
/// waits for its reply indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
  pub timeout_ms: u64,
  pub fire_and_forget: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cache_ttl_seconds: Option<u64>,
}

impl Default for RequestOptions {
  fn default() -> Self {
    Self {
      timeout_ms: DEFAULT_TIMEOUT_MS,
      fire_and_forget: false,
      cache_ttl_seconds: None,
    }
  }
}

impl RequestOptions {
  /// Set the caller-side timeout. A negative value is rejected here,
  /// synchronously, never at send time.
  pub fn set_timeout_ms(&mut self, ms: i64) -> Result<(), WireError> {
    if ms < 0 {
      return Err(WireError::InvalidTimeout(ms));
    }
    self.timeout_ms = ms as u64;
    Ok(())
  }

  /// Set the cache lifetime for the terminal reply. A negative value is
  /// rejected synchronously.
  pub fn set_cache_seconds(&mut self, seconds: i64) -> Result<(), WireError> {
    if seconds < 0 {
      return Err(WireError::InvalidCacheTtl(seconds));
    }
    self.cache_ttl_seconds = Some(seconds as u64);
    Ok(())
  }
}

/// A call descriptor: one named method invocation and its routing metadata.
///
/// The `id` is generated at construction and never changes; it is the
/// correlation key the caller uses to match reply events back to this
/// request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Request {
  pub id: String,
  pub method: String,
  pub data: Value,
  pub options: RequestOptions,
  /// Stamped exactly once, at first transmission.
  pub sent: Option<DateTime<Utc>>,
  /// Reply address the service publishes results to. Attached by the
  /// sending client at serialization time, not chosen by the builder.
  pub client_id: Option<String>,
  #[serde(skip)]
  cache_key: OnceLock<String>,
}

impl Request {
  pub fn new(method: impl Into<String>, data: Value) -> Self {
    Self {
      id: helpers::generate_id(),
      method: method.into(),
      data,
      options: RequestOptions::default(),
      sent: None,
      client_id: None,
      cache_key: OnceLock::new(),
    }
  }

  /// Stamp the first-transmission timestamp. Later calls keep the original.
  pub fn mark_sent(&mut self) {
    if self.sent.is_none() {
      self.sent = Some(Utc::now());
    }
  }

  /// Whether the caller has already given up on this request. Fire-and-forget
  /// requests and requests with a zero timeout never expire.
  pub fn is_expired(&self) -> bool {
    let Some(sent) = self.sent else {
      return false;
    };
    if self.options.fire_and_forget || self.options.timeout_ms == 0 {
      return false;
    }
    let elapsed = Utc::now().signed_duration_since(sent);
    elapsed >= chrono::Duration::milliseconds(self.options.timeout_ms as i64)
  }

  /// Deterministic cache key: hex digest over the serialized
  /// `{serviceName, method, data, options}` tuple, memoized per request.
  ///
  /// The full options struct participates in the key, so two otherwise
  /// identical calls with different timeouts cache separately.
  pub fn cache_key(&self, service_name: &str) -> &str {
    self.cache_key.get_or_init(|| {
      #[derive(Serialize)]
      #[serde(rename_all = "camelCase")]
      struct KeyParts<'a> {
        service_name: &'a str,
        method: &'a str,
        data: &'a Value,
        options: &'a RequestOptions,
      }

      let parts = helpers::serialize(&KeyParts {
        service_name,
        method: &self.method,
        data: &self.data,
        options: &self.options,
      })
      .unwrap_or_default();

      helpers::sha256_hex(&parts)
    })
  }

  /// Serialize for the work queue, with the reply address attached.
  pub fn to_wire(&self, client_id: &str) -> Option<String> {
    let mut on_wire = self.clone();
    on_wire.client_id = Some(client_id.to_string());
    helpers::serialize(&on_wire)
  }

  /// Fail-soft counterpart of [`Request::to_wire`]: malformed payloads yield
  /// an empty request (blank id and method) that dispatch loops drop.
  pub fn from_wire(payload: &str) -> Self {
    helpers::deserialize(payload)
  }
}
