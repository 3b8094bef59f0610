//! Streaming reader for `multipart/form-data` request bodies.
//!
//! [`MultipartDecoder`] is a [`tokio_util::codec::Decoder`] turning raw bytes into
//! [`Message`]s. [`MultipartReader`] drives it over an async reader and hands out one
//! [`Section`] at a time, and [`SectionBody`] turns a borrowed section into an owned
//! [`http_body::Body`].

mod body;
mod content_type;
mod decoder;
mod disposition;
mod message;
mod reader;

pub use body::{SectionBody, SectionSender};
pub use content_type::{declares_empty_body, parse_boundary};
pub use decoder::MultipartDecoder;
pub use disposition::{ContentDisposition, SectionKind};
pub use message::{Message, PayloadItem};
pub use reader::{BodyReader, BodyStream, MultipartReader, Section};
