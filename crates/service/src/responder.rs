use broker::Broker;
use serde_json::Value;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, warn};
use wire::{Event, Request};

struct ResponderInner {
  request_id: String,
  client_id: Option<String>,
  fire_and_forget: bool,
  broker: Arc<dyn Broker>,
  finished: AtomicBool,
  /// Concurrency slot owned by this invocation; handed back the moment a
  /// terminal call lands, not when the handler future finishes. Dropping
  /// the inner releases any slot a misbehaving handler never gave back.
  slot: Mutex<Option<OwnedSemaphorePermit>>,
}

/// Per-invocation reply sink handed to a method handler.
///
/// `done` and `error` are terminal: the first one wins and every later
/// terminal call is a no-op. `info` and `progress` may be called any number
/// of times before that. For a fire-and-forget request nothing is ever
/// published, but terminal calls still release the dispatch loop's
/// concurrency slot.
#[derive(Clone)]
pub struct Responder {
  inner: Arc<ResponderInner>,
}

impl Responder {
  pub(crate) fn new(request: &Request, broker: Arc<dyn Broker>, permit: OwnedSemaphorePermit) -> Self {
    Self {
      inner: Arc::new(ResponderInner {
        request_id: request.id.clone(),
        client_id: request.client_id.clone(),
        fire_and_forget: request.options.fire_and_forget,
        broker,
        finished: AtomicBool::new(false),
        slot: Mutex::new(Some(permit)),
      }),
    }
  }

  /// Correlation id of the request being answered.
  pub fn request_id(&self) -> &str {
    &self.inner.request_id
  }

  /// Whether a terminal call has already landed.
  pub fn is_finished(&self) -> bool {
    self.inner.finished.load(Ordering::SeqCst)
  }

  /// Terminal success.
  pub async fn done(&self, result: Value) {
    self
      .end(Event::succeeded(&self.inner.request_id, Some(result)))
      .await;
  }

  /// Terminal failure.
  pub async fn error(&self, error: impl Display) {
    self
      .end(Event::failed(&self.inner.request_id, error.to_string()))
      .await;
  }

  /// Non-terminal informational event.
  pub async fn info(&self, data: Value) {
    if self.is_finished() {
      return;
    }
    self.publish(Event::info(&self.inner.request_id, data)).await;
  }

  /// Non-terminal progress event.
  pub async fn progress(&self, data: Value) {
    if self.is_finished() {
      return;
    }
    self.publish(Event::progress(&self.inner.request_id, data)).await;
  }

  async fn end(&self, event: Event) {
    // First terminal call wins; the rest are no-ops.
    if self.inner.finished.swap(true, Ordering::SeqCst) {
      return;
    }
    self.publish(event).await;
    // Release the concurrency slot exactly once.
    self.inner.slot.lock().unwrap().take();
  }

  async fn publish(&self, event: Event) {
    if self.inner.fire_and_forget {
      return;
    }
    let Some(client_id) = &self.inner.client_id else {
      debug!(id = %self.inner.request_id, "Request carries no reply address, discarding event");
      return;
    };
    let Some(payload) = wire::serialize(&event) else {
      return;
    };
    // Fire-and-forget at the transport level: no acknowledgement, no retry.
    if let Err(e) = self.inner.broker.publish(client_id, &payload).await {
      warn!(id = %self.inner.request_id, "Failed to publish event: {}", e);
    }
  }
}

impl Drop for ResponderInner {
  fn drop(&mut self) {
    if !self.finished.load(Ordering::SeqCst) {
      debug!(id = %self.request_id, "Handler finished without a terminal call");
    }
  }
}
