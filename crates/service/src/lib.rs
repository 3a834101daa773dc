mod config;
mod error;
mod handler;
mod responder;
mod session;

pub use config::ServiceConfig;
pub use error::ServiceError;
pub use handler::{Handler, HandlerError};
pub use responder::Responder;
pub use session::{Service, ServiceHandle};
