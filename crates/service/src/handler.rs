use async_trait::async_trait;
use std::future::Future;
use thiserror::Error;
use wire::Request;

use crate::responder::Responder;

/// Failure returned by a method handler. Converted into a `failed` reply
/// event; never allowed to take down the dispatch loop.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
  message: String,
}

impl HandlerError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

impl From<String> for HandlerError {
  fn from(message: String) -> Self {
    Self::new(message)
  }
}

impl From<&str> for HandlerError {
  fn from(message: &str) -> Self {
    Self::new(message)
  }
}

/// One registered method. Handlers report through the responder; returning
/// `Err` without having reached a terminal call is shorthand for
/// `responder.error(..)`.
#[async_trait]
pub trait Handler: Send + Sync {
  async fn call(&self, request: Request, responder: Responder) -> Result<(), HandlerError>;
}

/// Adapter letting plain async closures act as handlers.
pub(crate) struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
  F: Fn(Request, Responder) -> Fut + Send + Sync,
  Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
  async fn call(&self, request: Request, responder: Responder) -> Result<(), HandlerError> {
    (self.0)(request, responder).await
  }
}
