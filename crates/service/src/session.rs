//! Worker session: the concurrency-bounded fetch/dispatch loop and the
//! liveness heartbeat.

use broker::{Broker, names};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wire::{Event, Request};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::handler::{FnHandler, Handler, HandlerError};
use crate::responder::Responder;

/// Pause after a dequeue failure so a broken broker connection does not
/// spin the loop hot.
const POP_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Worker session for one named service.
///
/// Register every method, then call [`Service::start`]; registration is a
/// build-time step and rejects duplicates immediately.
pub struct Service {
  name: String,
  instance_id: String,
  broker: Arc<dyn Broker>,
  config: ServiceConfig,
  methods: HashMap<String, Arc<dyn Handler>>,
}

impl Service {
  pub fn new(name: impl Into<String>, broker: Arc<dyn Broker>) -> Self {
    Self::with_config(name, broker, ServiceConfig::default())
  }

  pub fn with_config(name: impl Into<String>, broker: Arc<dyn Broker>, config: ServiceConfig) -> Self {
    Self {
      name: name.into(),
      instance_id: wire::generate_id(),
      broker,
      config,
      methods: HashMap::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Register a handler under a method name.
  pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> Result<(), ServiceError>
  where
    H: Handler + 'static,
  {
    let name = name.into();
    if self.methods.contains_key(&name) {
      return Err(ServiceError::DuplicateMethod(name));
    }
    self.methods.insert(name, Arc::new(handler));
    Ok(())
  }

  /// Register a plain async closure as a handler.
  pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> Result<(), ServiceError>
  where
    F: Fn(Request, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
  {
    self.register(name, FnHandler(handler))
  }

  /// Spawn the dispatch loop and the heartbeat; returns the handle used to
  /// publish events and to shut the session down.
  pub fn start(self) -> ServiceHandle {
    // A zero bound would never dispatch anything; clamp like a default.
    let concurrency = self.config.concurrency.max(1);
    let (shutdown_tx, _) = broadcast::channel(1);

    let inner = Arc::new(ServiceInner {
      name: self.name,
      broker: self.broker,
      config: self.config,
      methods: self.methods,
      semaphore: Arc::new(Semaphore::new(concurrency)),
    });

    info!(
      service = %inner.name,
      instance = %self.instance_id,
      concurrency,
      "Service starting"
    );

    let loop_task = tokio::spawn(run_loop(Arc::clone(&inner), shutdown_tx.subscribe()));
    let heartbeat_task = tokio::spawn(run_heartbeat(Arc::clone(&inner), shutdown_tx.subscribe()));

    ServiceHandle {
      inner,
      shutdown_tx,
      tasks: Mutex::new(vec![loop_task, heartbeat_task]),
    }
  }
}

/// Running worker session.
pub struct ServiceHandle {
  inner: Arc<ServiceInner>,
  shutdown_tx: broadcast::Sender<()>,
  tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceHandle {
  pub fn name(&self) -> &str {
    &self.inner.name
  }

  /// Publish an event on a client's reply channel. Transport-level
  /// fire-and-forget: no acknowledgement is expected or retried.
  pub async fn send_event(&self, client_id: &str, event: &Event) -> Result<(), ServiceError> {
    let Some(payload) = wire::serialize(event) else {
      return Ok(());
    };
    self.inner.broker.publish(client_id, &payload).await?;
    Ok(())
  }

  /// Stop the dispatch loop and the heartbeat. In-flight handlers run to
  /// completion on the runtime. Idempotent.
  pub fn shutdown(&self) {
    let _ = self.shutdown_tx.send(());
    info!(service = %self.inner.name, "Service shutting down");
  }

  /// Wait for the loop and heartbeat tasks to finish after a shutdown.
  pub async fn wait(&self) {
    let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
    for task in tasks {
      let _ = task.await;
    }
  }
}

struct ServiceInner {
  name: String,
  broker: Arc<dyn Broker>,
  config: ServiceConfig,
  methods: HashMap<String, Arc<dyn Handler>>,
  /// The concurrency ledger: permits in use equal handler invocations in
  /// flight (plus the one the loop holds while fetching).
  semaphore: Arc<Semaphore>,
}

impl ServiceInner {
  /// Hand one dequeued payload to its handler. The permit travels into the
  /// responder, which releases it on the first terminal call.
  fn dispatch(&self, payload: String, permit: tokio::sync::OwnedSemaphorePermit) {
    let request = Request::from_wire(&payload);
    if request.id.is_empty() || request.method.is_empty() {
      debug!(service = %self.name, "Dropping malformed work item");
      return;
    }

    // Stale work the caller already gave up on is not worth running.
    if request.is_expired() {
      debug!(service = %self.name, id = %request.id, method = %request.method, "Dropping expired request");
      return;
    }

    let responder = Responder::new(&request, Arc::clone(&self.broker), permit);

    if let Some(limit) = self.config.handler_timeout {
      let watchdog = responder.clone();
      tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        if !watchdog.is_finished() {
          warn!(id = %watchdog.request_id(), "Handler exceeded its deadline");
          watchdog.error("Timeout").await;
        }
      });
    }

    let Some(handler) = self.methods.get(&request.method) else {
      warn!(service = %self.name, method = %request.method, "Method not found");
      tokio::spawn(async move {
        responder.error("Method not found").await;
      });
      return;
    };

    let handler = Arc::clone(handler);
    let service = self.name.clone();
    tokio::spawn(async move {
      let id = request.id.clone();
      let outcome = AssertUnwindSafe(handler.call(request, responder.clone()))
        .catch_unwind()
        .await;
      match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
          // A no-op if the handler already reached a terminal call.
          responder.error(e).await;
        }
        Err(_) => {
          error!(service = %service, id = %id, "Handler panicked");
          responder.error("Handler panicked").await;
        }
      }
    });
  }
}

/// The fetch loop. Self-sustaining: the semaphore blocks fetching while
/// `concurrency` handlers are in flight, and every completion (terminal
/// call, drop, or discard) frees a permit and lets the loop pull again.
async fn run_loop(inner: Arc<ServiceInner>, mut shutdown: broadcast::Receiver<()>) {
  let queue = names::queue(&inner.name);
  loop {
    let permit = tokio::select! {
      permit = Arc::clone(&inner.semaphore).acquire_owned() => match permit {
        Ok(permit) => permit,
        Err(_) => break,
      },
      _ = shutdown.recv() => break,
    };

    // The loop's only true suspension point: block until work arrives.
    let popped = tokio::select! {
      popped = inner.broker.pop(&queue, None) => popped,
      _ = shutdown.recv() => break,
    };

    match popped {
      Ok(Some(payload)) => inner.dispatch(payload, permit),
      Ok(None) => drop(permit),
      Err(e) => {
        // Non-fatal: report and re-arm, favoring availability.
        error!(service = %inner.name, "Dequeue failed: {}", e);
        drop(permit);
        tokio::select! {
          _ = tokio::time::sleep(POP_ERROR_BACKOFF) => {}
          _ = shutdown.recv() => break,
        }
      }
    }
  }
  debug!(service = %inner.name, "Dispatch loop stopped");
}

/// Refresh the liveness record until shutdown. The first refresh happens
/// immediately so broadcast discovery sees the service as soon as it starts.
async fn run_heartbeat(inner: Arc<ServiceInner>, mut shutdown: broadcast::Receiver<()>) {
  let key = names::liveness_key(&inner.name);
  let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
  loop {
    tokio::select! {
      _ = ticker.tick() => {
        if let Err(e) = beat(&inner, &key).await {
          warn!(service = %inner.name, "Heartbeat failed: {}", e);
        }
      }
      _ = shutdown.recv() => break,
    }
  }
  debug!(service = %inner.name, "Heartbeat stopped");
}

async fn beat(inner: &ServiceInner, key: &str) -> Result<(), broker::BrokerError> {
  inner.broker.set(key, &inner.name).await?;
  inner.broker.expire(key, inner.config.heartbeat_ttl).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use broker::MemoryBroker;
  use serde_json::json;

  fn echo_service(broker: Arc<MemoryBroker>) -> Service {
    let mut service = Service::new("svc", broker as Arc<dyn Broker>);
    service
      .register_fn("echo", |request: Request, responder: Responder| async move {
        responder.done(request.data).await;
        Ok(())
      })
      .unwrap();
    service
  }

  /// Serialize a request the way a remote client would put it on the queue.
  fn enqueue_payload(method: &str, data: serde_json::Value, reply_channel: &str) -> (String, String) {
    let mut request = Request::new(method, data);
    request.mark_sent();
    request.options.timeout_ms = 0;
    let id = request.id.clone();
    (id, request.to_wire(reply_channel).unwrap())
  }

  #[test]
  fn test_duplicate_method_rejected_at_registration() {
    let broker = Arc::new(MemoryBroker::new()) as Arc<dyn Broker>;
    let mut service = Service::new("svc", broker);

    service
      .register_fn("echo", |_req, responder: Responder| async move {
        responder.done(json!(null)).await;
        Ok(())
      })
      .unwrap();

    let duplicate = service.register_fn("echo", |_req, responder: Responder| async move {
      responder.done(json!(null)).await;
      Ok(())
    });
    assert!(matches!(duplicate, Err(ServiceError::DuplicateMethod(name)) if name == "echo"));
  }

  #[tokio::test]
  async fn test_dispatch_answers_on_the_reply_channel() {
    let broker = Arc::new(MemoryBroker::new());
    let mut sub = broker.subscribe("caller-1").await.unwrap();
    let handle = echo_service(Arc::clone(&broker)).start();

    let (id, payload) = enqueue_payload("echo", json!({"x": 1}), "caller-1");
    broker.push("svc", &payload).await.unwrap();

    let event: Event = wire::deserialize(&sub.recv().await.unwrap());
    assert_eq!(event.id, id);
    assert_eq!(event.status, wire::EventStatus::Succeeded);
    assert_eq!(event.data, Some(json!({"x": 1})));

    handle.shutdown();
    handle.wait().await;
  }

  #[tokio::test]
  async fn test_method_not_found_becomes_failed_event() {
    let broker = Arc::new(MemoryBroker::new());
    let mut sub = broker.subscribe("caller-1").await.unwrap();
    let handle = echo_service(Arc::clone(&broker)).start();

    let (_, payload) = enqueue_payload("missing", json!(null), "caller-1");
    broker.push("svc", &payload).await.unwrap();

    let event: Event = wire::deserialize(&sub.recv().await.unwrap());
    assert_eq!(event.status, wire::EventStatus::Failed);
    assert_eq!(event.error.as_deref(), Some("Method not found"));

    handle.shutdown();
  }

  #[tokio::test]
  async fn test_handler_error_becomes_failed_event() {
    let broker = Arc::new(MemoryBroker::new());
    let mut sub = broker.subscribe("caller-1").await.unwrap();

    let mut service = Service::new("svc", Arc::clone(&broker) as Arc<dyn Broker>);
    service
      .register_fn("explode", |_req, _responder| async move {
        Err(HandlerError::new("boom"))
      })
      .unwrap();
    let handle = service.start();

    let (_, payload) = enqueue_payload("explode", json!(null), "caller-1");
    broker.push("svc", &payload).await.unwrap();

    let event: Event = wire::deserialize(&sub.recv().await.unwrap());
    assert_eq!(event.status, wire::EventStatus::Failed);
    assert_eq!(event.error.as_deref(), Some("boom"));

    handle.shutdown();
  }

  #[tokio::test]
  async fn test_handler_panic_becomes_failed_event_and_loop_survives() {
    let broker = Arc::new(MemoryBroker::new());
    let mut sub = broker.subscribe("caller-1").await.unwrap();

    let mut service = Service::new("svc", Arc::clone(&broker) as Arc<dyn Broker>);
    service
      .register_fn("panic", |_req, _responder| async move {
        panic!("handler bug");
      })
      .unwrap();
    service
      .register_fn("echo", |request: Request, responder: Responder| async move {
        responder.done(request.data).await;
        Ok(())
      })
      .unwrap();
    let handle = service.start();

    let (_, payload) = enqueue_payload("panic", json!(null), "caller-1");
    broker.push("svc", &payload).await.unwrap();

    let event: Event = wire::deserialize(&sub.recv().await.unwrap());
    assert_eq!(event.status, wire::EventStatus::Failed);
    assert_eq!(event.error.as_deref(), Some("Handler panicked"));

    // The loop is still alive and keeps dispatching.
    let (_, payload) = enqueue_payload("echo", json!("still here"), "caller-1");
    broker.push("svc", &payload).await.unwrap();
    let event: Event = wire::deserialize(&sub.recv().await.unwrap());
    assert_eq!(event.status, wire::EventStatus::Succeeded);

    handle.shutdown();
  }

  #[tokio::test]
  async fn test_expired_request_is_dropped_without_dispatch() {
    let broker = Arc::new(MemoryBroker::new());
    let mut sub = broker.subscribe("caller-1").await.unwrap();
    let handle = echo_service(Arc::clone(&broker)).start();

    let mut request = Request::new("echo", json!(null));
    request.options.timeout_ms = 10;
    request.sent = Some(chrono::Utc::now() - chrono::Duration::seconds(5));
    broker.push("svc", &request.to_wire("caller-1").unwrap()).await.unwrap();

    // Fresh work right behind it still flows.
    let (id, payload) = enqueue_payload("echo", json!("fresh"), "caller-1");
    broker.push("svc", &payload).await.unwrap();

    let event: Event = wire::deserialize(&sub.recv().await.unwrap());
    assert_eq!(event.id, id, "the expired request produced no reply");

    handle.shutdown();
  }

  #[tokio::test]
  async fn test_malformed_payload_does_not_stall_the_loop() {
    let broker = Arc::new(MemoryBroker::new());
    let mut sub = broker.subscribe("caller-1").await.unwrap();
    let handle = echo_service(Arc::clone(&broker)).start();

    broker.push("svc", "%%% not json %%%").await.unwrap();
    let (id, payload) = enqueue_payload("echo", json!(1), "caller-1");
    broker.push("svc", &payload).await.unwrap();

    let event: Event = wire::deserialize(&sub.recv().await.unwrap());
    assert_eq!(event.id, id);

    handle.shutdown();
  }

  #[tokio::test]
  async fn test_watchdog_times_out_a_stuck_handler() {
    let broker = Arc::new(MemoryBroker::new());
    let mut sub = broker.subscribe("caller-1").await.unwrap();

    let config = ServiceConfig {
      handler_timeout: Some(Duration::from_millis(50)),
      ..Default::default()
    };
    let mut service = Service::with_config("svc", Arc::clone(&broker) as Arc<dyn Broker>, config);
    service
      .register_fn("stuck", |_req, _responder| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
      })
      .unwrap();
    let handle = service.start();

    let (_, payload) = enqueue_payload("stuck", json!(null), "caller-1");
    broker.push("svc", &payload).await.unwrap();

    let event: Event = wire::deserialize(&sub.recv().await.unwrap());
    assert_eq!(event.status, wire::EventStatus::Failed);
    assert_eq!(event.error.as_deref(), Some("Timeout"));

    handle.shutdown();
  }

  #[tokio::test]
  async fn test_heartbeat_writes_liveness_record() {
    let broker = Arc::new(MemoryBroker::new());
    let handle = echo_service(Arc::clone(&broker)).start();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let record = broker.get("service:svc").await.unwrap();
    assert_eq!(record.as_deref(), Some("svc"));

    handle.shutdown();
  }
}
