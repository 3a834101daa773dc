mod error;
mod event;
mod helpers;
mod request;

pub use error::WireError;
pub use event::{Event, EventStatus};
pub use helpers::{deserialize, generate_id, serialize, sha256_hex};
pub use request::{DEFAULT_TIMEOUT_MS, Request, RequestOptions};
