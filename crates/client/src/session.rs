//! Caller session: owns the reply subscription, the pending-request table
//! and the timeout race.

use broker::{Broker, names};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wire::{Event, EventStatus, Request};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::pending::{Pending, Reply};
use crate::request::RequestBuilder;

struct CacheSlot {
  key: String,
  ttl: Duration,
}

struct PendingEntry {
  tx: mpsc::UnboundedSender<Reply>,
  timer: Option<JoinHandle<()>>,
  cache: Option<CacheSlot>,
}

pub(crate) struct ClientInner {
  service_name: String,
  instance_id: String,
  broker: Arc<dyn Broker>,
  config: ClientConfig,
  /// Single-writer guard for the pending table: both completion paths
  /// (event arrival, timer expiry) resolve an entry under this lock, so
  /// exactly one of them can win. Never held across an await.
  pending: Mutex<HashMap<String, PendingEntry>>,
  shut_down: AtomicBool,
  listener: Mutex<Option<JoinHandle<()>>>,
}

/// Caller session bound to one service name.
///
/// Cloning shares the session: all clones use the same reply channel and
/// pending table, and `shutdown` affects them all.
#[derive(Clone)]
pub struct Client {
  inner: Arc<ClientInner>,
}

impl Client {
  pub async fn new(service_name: impl Into<String>, broker: Arc<dyn Broker>) -> Result<Self, ClientError> {
    Self::with_config(service_name, broker, ClientConfig::default()).await
  }

  pub async fn with_config(
    service_name: impl Into<String>,
    broker: Arc<dyn Broker>,
    config: ClientConfig,
  ) -> Result<Self, ClientError> {
    let service_name = service_name.into();
    let instance_id = wire::generate_id();
    let reply_channel = names::reply_channel(&service_name, &instance_id);
    let mut subscription = broker.subscribe(&reply_channel).await?;

    let inner = Arc::new(ClientInner {
      service_name,
      instance_id,
      broker,
      config,
      pending: Mutex::new(HashMap::new()),
      shut_down: AtomicBool::new(false),
      listener: Mutex::new(None),
    });

    // The listener owns only a weak handle so dropping the last `Client`
    // tears the task down instead of keeping the session alive forever.
    let listener = tokio::spawn({
      let weak = Arc::downgrade(&inner);
      async move {
        while let Some(payload) = subscription.recv().await {
          let Some(inner) = weak.upgrade() else { break };
          let event: Event = wire::deserialize(&payload);
          if event.id.is_empty() {
            debug!("Dropping malformed event payload");
            continue;
          }
          inner.on_event(event, false).await;
        }
      }
    });
    *inner.listener.lock().unwrap() = Some(listener);

    info!(
      service = %inner.service_name,
      instance = %inner.instance_id,
      "Client session ready"
    );
    Ok(Self { inner })
  }

  /// Build a request bound to this session. Nothing is sent until the
  /// builder's `send`, `fire` or `broadcast`.
  pub fn request(&self, method: impl Into<String>, data: Value) -> RequestBuilder {
    let mut request = Request::new(method, data);
    request.options.timeout_ms = self.inner.config.default_timeout_ms;
    RequestBuilder::new(self.clone(), request)
  }

  pub fn service_name(&self) -> &str {
    &self.inner.service_name
  }

  /// Channel this session receives replies on.
  pub fn reply_channel(&self) -> String {
    names::reply_channel(&self.inner.service_name, &self.inner.instance_id)
  }

  /// Cancel all pending timers and stop matching replies. Requests already
  /// handed out observe a closed reply stream. Idempotent.
  pub fn shutdown(&self) {
    if self.inner.shut_down.swap(true, Ordering::SeqCst) {
      return;
    }
    if let Some(handle) = self.inner.listener.lock().unwrap().take() {
      handle.abort();
    }
    let entries: Vec<PendingEntry> = {
      let mut pending = self.inner.pending.lock().unwrap();
      pending.drain().map(|(_, entry)| entry).collect()
    };
    for entry in entries {
      if let Some(timer) = entry.timer {
        timer.abort();
      }
    }
    info!(service = %self.inner.service_name, "Client session shut down");
  }

  /// Dispatch entry point used by [`RequestBuilder::send`] and
  /// [`RequestBuilder::fire`].
  pub(crate) async fn dispatch(&self, mut request: Request) -> Result<Pending, ClientError> {
    let inner = &self.inner;
    if inner.shut_down.load(Ordering::SeqCst) {
      return Err(ClientError::NotConfigured);
    }
    request.mark_sent();
    let id = request.id.clone();

    // Launch and never match: no pending entry, no timer, no cache.
    if request.options.fire_and_forget {
      inner.push_to(&inner.service_name, &request).await?;
      return Ok(Pending::inert(id));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let timer = (request.options.timeout_ms > 0).then(|| {
      let weak = Arc::downgrade(inner);
      let id = id.clone();
      let timeout = Duration::from_millis(request.options.timeout_ms);
      tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(inner) = weak.upgrade() {
          inner.resolve_timeout(&id);
        }
      })
    });
    let cache = request.options.cache_ttl_seconds.map(|seconds| CacheSlot {
      key: request.cache_key(&inner.service_name).to_string(),
      ttl: Duration::from_secs(seconds),
    });
    let cache_key = cache.as_ref().map(|slot| slot.key.clone());
    inner
      .pending
      .lock()
      .unwrap()
      .insert(id.clone(), PendingEntry { tx, timer, cache });

    // Cache check before touching the network queue. A hit is fed through
    // the normal matching path, tagged so it never re-writes the cache.
    if let Some(key) = cache_key {
      match inner.broker.get(&key).await {
        Ok(Some(payload)) => {
          let mut event: Event = wire::deserialize(&payload);
          event.id = id.clone();
          debug!(id = %id, "Resolving request from cache");
          inner.on_event(event, true).await;
          return Ok(Pending::new(id, rx));
        }
        Ok(None) => {}
        Err(e) => warn!("Cache lookup failed, dispatching normally: {}", e),
      }
    }

    if let Err(e) = inner.push_to(&inner.service_name, &request).await {
      inner.remove_entry(&id);
      return Err(e);
    }
    Ok(Pending::new(id, rx))
  }

  /// Fan a fire-and-forget copy of the request out to every live service.
  ///
  /// All pushes are attempted; partial delivery is not rolled back. Returns
  /// the number of queues reached, or the first push error observed.
  pub(crate) async fn broadcast(&self, mut request: Request) -> Result<usize, ClientError> {
    let inner = &self.inner;
    if inner.shut_down.load(Ordering::SeqCst) {
      return Err(ClientError::NotConfigured);
    }
    request.options.fire_and_forget = true;
    request.mark_sent();

    let keys = inner.broker.keys(names::SERVICE_KEY_PATTERN).await?;
    let services = inner.broker.mget(&keys).await?;

    let mut reached = 0;
    let mut first_error = None;
    for service in services.into_iter().flatten() {
      match inner.push_to(&service, &request).await {
        Ok(()) => reached += 1,
        Err(e) => {
          first_error.get_or_insert(e);
        }
      }
    }
    match first_error {
      Some(error) => Err(error),
      None => Ok(reached),
    }
  }
}

impl ClientInner {
  async fn push_to(&self, service_name: &str, request: &Request) -> Result<(), ClientError> {
    let reply_to = names::reply_channel(service_name, &self.instance_id);
    let payload = request.to_wire(&reply_to).ok_or(ClientError::Encode)?;
    let queue = names::queue(service_name);
    self.broker.push(&queue, &payload).await?;
    if let Err(e) = self.broker.expire(&queue, self.config.queue_ttl).await {
      warn!("Failed to refresh ttl for queue {}: {}", queue, e);
    }
    Ok(())
  }

  /// Match one event against the pending table. Unknown ids are dropped
  /// silently: late replies after a local timeout, cross-talk on a shared
  /// channel, and stale cache payloads all end up here.
  async fn on_event(&self, event: Event, from_cache: bool) {
    let cache_write = {
      let mut pending = self.pending.lock().unwrap();
      if !event.status.is_terminal() {
        match pending.get(&event.id) {
          Some(entry) => {
            let _ = entry.tx.send(reply_from(&event));
          }
          None => {
            debug!(id = %event.id, status = ?event.status, "Dropping event with no pending request");
          }
        }
        None
      } else if let Some(entry) = pending.remove(&event.id) {
        if let Some(timer) = entry.timer {
          timer.abort();
        }
        let write = match (&entry.cache, from_cache) {
          (Some(slot), false) => {
            wire::serialize(&event).map(|payload| (slot.key.clone(), slot.ttl, payload))
          }
          _ => None,
        };
        // Dropping the sender here closes the caller's reply stream.
        let _ = entry.tx.send(reply_from(&event));
        write
      } else {
        debug!(id = %event.id, status = ?event.status, "Dropping event with no pending request");
        None
      }
    };

    if let Some((key, ttl, payload)) = cache_write {
      if let Err(e) = self.broker.set(&key, &payload).await {
        warn!("Cache write failed: {}", e);
      } else if let Err(e) = self.broker.expire(&key, ttl).await {
        warn!("Cache expire failed: {}", e);
      }
    }
  }

  /// Timer half of the completion race. Losing the race means the entry is
  /// already gone and this is a no-op.
  fn resolve_timeout(&self, id: &str) {
    let entry = self.pending.lock().unwrap().remove(id);
    if let Some(entry) = entry {
      debug!(id, "Request timed out locally");
      let _ = entry.tx.send(Reply::TimedOut);
    }
  }

  fn remove_entry(&self, id: &str) {
    if let Some(entry) = self.pending.lock().unwrap().remove(id)
      && let Some(timer) = entry.timer
    {
      timer.abort();
    }
  }
}

fn reply_from(event: &Event) -> Reply {
  let data = || event.data.clone().unwrap_or(Value::Null);
  match event.status {
    EventStatus::Succeeded => Reply::Succeeded { data: data() },
    EventStatus::Failed => Reply::Failed {
      error: event.error.clone().unwrap_or_else(|| "Unknown error".to_string()),
    },
    EventStatus::Info => Reply::Info { data: data() },
    EventStatus::Progress => Reply::Progress { data: data() },
  }
}
