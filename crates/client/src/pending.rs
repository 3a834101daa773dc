use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ClientError;

/// One reply observed for an in-flight request.
///
/// `Info` and `Progress` may arrive any number of times; exactly one of the
/// remaining variants ends the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
  Succeeded { data: Value },
  Failed { error: String },
  Info { data: Value },
  Progress { data: Value },
  /// The local timer fired before a terminal event arrived. Whatever the
  /// service eventually publishes for this request is discarded.
  TimedOut,
}

impl Reply {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, Reply::Info { .. } | Reply::Progress { .. })
  }
}

/// Caller-side handle for one dispatched request.
pub struct Pending {
  id: String,
  rx: mpsc::UnboundedReceiver<Reply>,
}

impl Pending {
  pub(crate) fn new(id: String, rx: mpsc::UnboundedReceiver<Reply>) -> Self {
    Self { id, rx }
  }

  /// Handle for a request that will never be matched (fire-and-forget).
  pub(crate) fn inert(id: String) -> Self {
    let (_, rx) = mpsc::unbounded_channel();
    Self { id, rx }
  }

  /// Correlation id of the underlying request.
  pub fn id(&self) -> &str {
    &self.id
  }

  /// Next reply, `None` once the stream is closed. The stream closes right
  /// after a terminal reply is delivered.
  pub async fn recv(&mut self) -> Option<Reply> {
    self.rx.recv().await
  }

  /// Drain replies until the terminal one and map it to a result, skipping
  /// `info`/`progress` along the way.
  pub async fn result(mut self) -> Result<Value, ClientError> {
    while let Some(reply) = self.rx.recv().await {
      match reply {
        Reply::Succeeded { data } => return Ok(data),
        Reply::Failed { error } => return Err(ClientError::Failed(error)),
        Reply::TimedOut => return Err(ClientError::Timeout),
        Reply::Info { .. } | Reply::Progress { .. } => continue,
      }
    }
    Err(ClientError::Closed)
  }
}
