use serde_json::Value;
use wire::Request;

use crate::error::ClientError;
use crate::pending::Pending;
use crate::session::Client;

/// Builder for one call, created by [`Client::request`].
///
/// Option setters validate synchronously; nothing touches the broker until
/// `send`, `fire` or `broadcast`.
pub struct RequestBuilder {
  client: Client,
  request: Request,
}

impl RequestBuilder {
  pub(crate) fn new(client: Client, request: Request) -> Self {
    Self { client, request }
  }

  /// Caller-side timeout in milliseconds. Zero disables the timer; negative
  /// values are rejected here, never at send time.
  pub fn timeout_ms(mut self, ms: i64) -> Result<Self, ClientError> {
    self.request.options.set_timeout_ms(ms)?;
    Ok(self)
  }

  /// Cache the terminal reply for this many seconds.
  pub fn cache_seconds(mut self, seconds: i64) -> Result<Self, ClientError> {
    self.request.options.set_cache_seconds(seconds)?;
    Ok(self)
  }

  /// Suppress all reply events and pending-table tracking.
  pub fn fire_and_forget(mut self) -> Self {
    self.request.options.fire_and_forget = true;
    self
  }

  /// Replace the payload.
  pub fn data(mut self, data: Value) -> Self {
    self.request.data = data;
    self
  }

  pub fn request(&self) -> &Request {
    &self.request
  }

  /// Dispatch and track the request. A fire-and-forget request yields an
  /// inert handle that never produces a reply.
  pub async fn send(self) -> Result<Pending, ClientError> {
    self.client.dispatch(self.request).await
  }

  /// Dispatch as fire-and-forget, discarding the handle.
  pub async fn fire(mut self) -> Result<(), ClientError> {
    self.request.options.fire_and_forget = true;
    self.client.dispatch(self.request).await.map(|_| ())
  }

  /// Fan out one fire-and-forget copy to every live service; returns the
  /// number of queues reached.
  pub async fn broadcast(self) -> Result<usize, ClientError> {
    self.client.broadcast(self.request).await
  }
}
