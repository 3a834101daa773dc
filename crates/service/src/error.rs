use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
  /// Raised at registration time, never during dispatch.
  #[error("Method already registered: {0}")]
  DuplicateMethod(String),

  #[error("Transport failure: {0}")]
  Transport(#[from] broker::BrokerError),
}
