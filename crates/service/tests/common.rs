//! Common test utilities for end-to-end request/reply tests.
//!
//! Every test wires real `Client` and `Service` sessions through a shared
//! in-process `MemoryBroker`, so the full correlation protocol runs: queue
//! push, dispatch, reply publish, and pending-table matching.

use async_trait::async_trait;
use broker::{Broker, BrokerError, MemoryBroker, Subscription};
use serde_json::json;
use service::{Responder, Service, ServiceConfig, ServiceHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wire::Request;

/// Start a service with the standard test methods registered.
///
/// - `echo` answers immediately with the request payload.
/// - `slow` sleeps for `data` milliseconds (default 200) before answering.
/// - `steps` emits two progress events and an info event before succeeding.
/// - `fail` always reports a handler failure.
#[allow(dead_code)]
pub fn start_test_service(broker: &Arc<MemoryBroker>, name: &str, config: ServiceConfig) -> ServiceHandle {
  let mut service = Service::with_config(name, Arc::clone(broker) as Arc<dyn Broker>, config);

  service
    .register_fn("echo", |request: Request, responder: Responder| async move {
      responder.done(request.data).await;
      Ok(())
    })
    .unwrap();

  service
    .register_fn("slow", |request: Request, responder: Responder| async move {
      let delay = request.data.as_u64().unwrap_or(200);
      tokio::time::sleep(Duration::from_millis(delay)).await;
      responder.done(json!("finally")).await;
      Ok(())
    })
    .unwrap();

  service
    .register_fn("steps", |_request: Request, responder: Responder| async move {
      responder.progress(json!(33)).await;
      responder.progress(json!(66)).await;
      responder.info(json!("almost there")).await;
      responder.done(json!("complete")).await;
      Ok(())
    })
    .unwrap();

  service
    .register_fn("fail", |_request: Request, _responder: Responder| async move {
      Err(service::HandlerError::new("handler says no"))
    })
    .unwrap();

  service.start()
}

/// Broker wrapper counting queue pushes and key writes, for asserting that
/// cache hits skip the queue and cache-sourced events are never re-written.
#[allow(dead_code)]
pub struct CountingBroker {
  inner: MemoryBroker,
  pub pushes: AtomicUsize,
  pub sets: AtomicUsize,
}

#[allow(dead_code)]
impl CountingBroker {
  pub fn new() -> Self {
    Self {
      inner: MemoryBroker::new(),
      pushes: AtomicUsize::new(0),
      sets: AtomicUsize::new(0),
    }
  }

  pub fn push_count(&self) -> usize {
    self.pushes.load(Ordering::SeqCst)
  }

  pub fn set_count(&self) -> usize {
    self.sets.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Broker for CountingBroker {
  async fn push(&self, queue: &str, payload: &str) -> Result<(), BrokerError> {
    self.pushes.fetch_add(1, Ordering::SeqCst);
    self.inner.push(queue, payload).await
  }

  async fn pop(&self, queue: &str, timeout: Option<Duration>) -> Result<Option<String>, BrokerError> {
    self.inner.pop(queue, timeout).await
  }

  async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
    self.inner.publish(channel, payload).await
  }

  async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
    self.inner.subscribe(channel).await
  }

  async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
    self.inner.get(key).await
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), BrokerError> {
    self.sets.fetch_add(1, Ordering::SeqCst);
    self.inner.set(key, value).await
  }

  async fn expire(&self, name: &str, ttl: Duration) -> Result<(), BrokerError> {
    self.inner.expire(name, ttl).await
  }

  async fn keys(&self, pattern: &str) -> Result<Vec<String>, BrokerError> {
    self.inner.keys(pattern).await
  }

  async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, BrokerError> {
    self.inner.mget(keys).await
  }
}
