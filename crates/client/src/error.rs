use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
  /// The session was shut down; requests built against it can no longer
  /// be dispatched.
  #[error("Client session is not configured (already shut down)")]
  NotConfigured,

  #[error("Transport failure: {0}")]
  Transport(#[from] broker::BrokerError),

  #[error("Request could not be serialized")]
  Encode,

  /// The service replied with a terminal `failed` event.
  #[error("Request failed: {0}")]
  Failed(String),

  /// The caller-side timer won the race against the reply.
  #[error("Request timed out")]
  Timeout,

  /// The reply channel closed before a terminal event arrived (session
  /// shutdown, or a fire-and-forget request that never gets one).
  #[error("Reply channel closed before a terminal event")]
  Closed,

  #[error(transparent)]
  Wire(#[from] wire::WireError),
}
