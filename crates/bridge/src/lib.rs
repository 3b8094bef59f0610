//! Reads files selected in a browser as a byte stream on the server.
//!
//! A [`RemoteFileStream`] asks the browser agent, through an [`UploadTrigger`], to post
//! the file to a one-time url. The [`UploadIngress`] serving that url looks the stream up
//! in the shared [`UploadRegistry`] and hands it the multipart section of the request,
//! unbuffered. The request is answered once the reader is done with the bytes.

pub mod config;
pub mod error;
pub mod file;
pub mod ingress;
pub mod multipart;
pub mod registry;
pub mod stream;
pub mod trigger;

mod utils;

pub use config::{BridgeConfig, MultipartLimits};
pub use error::{MultipartError, TriggerError, UploadError};
pub use file::{CorrelationId, ElementRef, FileDescriptor, FileInput};
pub use ingress::UploadIngress;
pub use registry::{IncomingStream, Registration, UploadHandler, UploadRegistry, upload_handler_fn};
pub use stream::{ReadProgress, RemoteFileStream, StreamPhase};
pub use trigger::{UploadRequest, UploadTrigger};
