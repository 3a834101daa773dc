//! In-process broker backed by tokio primitives.
//!
//! Good enough for tests, demos and single-process deployments: FIFO queues
//! with blocking pop, per-channel fan-out pub/sub, and a key/value store
//! with lazily enforced expiry. All bookkeeping sits behind plain mutexes
//! that are never held across an await.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::trace;

use crate::adapter::{Broker, Subscription};
use crate::error::BrokerError;

#[derive(Default)]
struct QueueState {
  items: VecDeque<String>,
  expires_at: Option<Instant>,
}

struct KvEntry {
  value: String,
  expires_at: Option<Instant>,
}

#[derive(Default)]
pub struct MemoryBroker {
  queues: Mutex<HashMap<String, QueueState>>,
  queue_wakeups: Mutex<HashMap<String, Arc<Notify>>>,
  channels: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
  kv: Mutex<HashMap<String, KvEntry>>,
}

impl MemoryBroker {
  pub fn new() -> Self {
    Self::default()
  }

  fn wakeup(&self, queue: &str) -> Arc<Notify> {
    let mut wakeups = self.queue_wakeups.lock().unwrap();
    Arc::clone(wakeups.entry(queue.to_string()).or_default())
  }

  /// Drop a queue's contents if its reclaim deadline has passed.
  fn reclaim_if_expired(state: &mut QueueState, now: Instant) {
    if let Some(deadline) = state.expires_at
      && now >= deadline
    {
      state.items.clear();
      state.expires_at = None;
    }
  }

  fn kv_get(&self, key: &str) -> Option<String> {
    let mut kv = self.kv.lock().unwrap();
    let now = Instant::now();
    let expired = kv
      .get(key)
      .is_some_and(|entry| entry.expires_at.is_some_and(|deadline| now >= deadline));
    if expired {
      kv.remove(key);
      return None;
    }
    kv.get(key).map(|entry| entry.value.clone())
  }
}

#[async_trait]
impl Broker for MemoryBroker {
  async fn push(&self, queue: &str, payload: &str) -> Result<(), BrokerError> {
    {
      let mut queues = self.queues.lock().unwrap();
      let state = queues.entry(queue.to_string()).or_default();
      Self::reclaim_if_expired(state, Instant::now());
      state.items.push_back(payload.to_string());
    }
    self.wakeup(queue).notify_one();
    Ok(())
  }

  async fn pop(&self, queue: &str, timeout: Option<Duration>) -> Result<Option<String>, BrokerError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
      // Take the wakeup handle inside the same lock scope that inspects the
      // queue, so a push between "empty" and "wait" still lands a permit.
      let notify = {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue.to_string()).or_default();
        Self::reclaim_if_expired(state, Instant::now());
        if let Some(item) = state.items.pop_front() {
          if !state.items.is_empty() {
            // Hand the wakeup on: another popper may be parked while items
            // remain (Notify stores at most one permit).
            self.wakeup(queue).notify_one();
          }
          return Ok(Some(item));
        }
        self.wakeup(queue)
      };

      match deadline {
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            return Ok(None);
          }
          if tokio::time::timeout(deadline - now, notify.notified()).await.is_err() {
            return Ok(None);
          }
        }
        None => notify.notified().await,
      }
    }
  }

  async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
    let mut channels = self.channels.lock().unwrap();
    if let Some(subscribers) = channels.get_mut(channel) {
      // Prune subscribers whose receiving half is gone.
      subscribers.retain(|tx| tx.send(payload.to_string()).is_ok());
      trace!(channel, subscribers = subscribers.len(), "published");
    }
    Ok(())
  }

  async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
    let (tx, rx) = mpsc::unbounded_channel();
    self
      .channels
      .lock()
      .unwrap()
      .entry(channel.to_string())
      .or_default()
      .push(tx);
    Ok(Subscription::new(rx))
  }

  async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
    Ok(self.kv_get(key))
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), BrokerError> {
    self.kv.lock().unwrap().insert(
      key.to_string(),
      KvEntry {
        value: value.to_string(),
        expires_at: None,
      },
    );
    Ok(())
  }

  async fn expire(&self, name: &str, ttl: Duration) -> Result<(), BrokerError> {
    let deadline = Instant::now() + ttl;
    {
      let mut queues = self.queues.lock().unwrap();
      if let Some(state) = queues.get_mut(name) {
        state.expires_at = Some(deadline);
        return Ok(());
      }
    }
    if let Some(entry) = self.kv.lock().unwrap().get_mut(name) {
      entry.expires_at = Some(deadline);
    }
    Ok(())
  }

  async fn keys(&self, pattern: &str) -> Result<Vec<String>, BrokerError> {
    let now = Instant::now();
    let kv = self.kv.lock().unwrap();
    let matches = |key: &str| match pattern.strip_suffix('*') {
      Some(prefix) => key.starts_with(prefix),
      None => key == pattern,
    };
    Ok(
      kv.iter()
        .filter(|(key, entry)| matches(key) && !entry.expires_at.is_some_and(|d| now >= d))
        .map(|(key, _)| key.clone())
        .collect(),
    )
  }

  async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, BrokerError> {
    Ok(keys.iter().map(|key| self.kv_get(key)).collect())
  }
}
