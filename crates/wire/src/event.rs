use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status carried by a reply event.
///
/// `Succeeded` and `Failed` are terminal and end the request's lifecycle;
/// `Info` and `Progress` may be emitted any number of times before a
/// terminal event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
  Succeeded,
  Failed,
  // A payload with an unrecognized status deserializes to the default, which
  // must not look terminal: the pending entry stays alive until its timer.
  #[default]
  Info,
  Progress,
}

impl EventStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, EventStatus::Succeeded | EventStatus::Failed)
  }
}

/// The reply envelope published on a client's private channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
  pub id: String,
  pub status: EventStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl Event {
  pub fn succeeded(id: impl Into<String>, data: Option<Value>) -> Self {
    Self {
      id: id.into(),
      status: EventStatus::Succeeded,
      data,
      error: None,
    }
  }

  pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      status: EventStatus::Failed,
      data: None,
      error: Some(error.into()),
    }
  }

  pub fn info(id: impl Into<String>, data: Value) -> Self {
    Self {
      id: id.into(),
      status: EventStatus::Info,
      data: Some(data),
      error: None,
    }
  }

  pub fn progress(id: impl Into<String>, data: Value) -> Self {
    Self {
      id: id.into(),
      status: EventStatus::Progress,
      data: Some(data),
      error: None,
    }
  }

  /// Synthetic failure emitted when a handler or caller deadline elapses.
  pub fn timeout(id: impl Into<String>) -> Self {
    Self::failed(id, "Timeout")
  }
}
