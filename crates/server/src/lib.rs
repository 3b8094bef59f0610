//! Hosts the one-time upload route of `upload-bridge`: `POST {base}/_upload/{correlation_id}`.

mod config;
mod responder;
mod router;
mod server;

pub use config::{ConfigError, ServerConfig};
pub use responder::{MethodNotAllowed, NotFound, Responder, ResponseBody, Uploaded};
pub use router::UploadRouter;
pub use server::{Server, ServerBuildError, ServerBuilder};
