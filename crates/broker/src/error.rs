use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
  #[error("Connection error: {0}")]
  Connection(String),

  #[error("Broker is closed")]
  Closed,
}
