use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::file::CorrelationId;

/// Errors raised by the multipart codec and [`MultipartReader`](crate::multipart::MultipartReader).
#[derive(Error, Debug)]
pub enum MultipartError {
    #[error("request content type is not multipart/form-data: {content_type}")]
    UnsupportedContentType { content_type: String },

    #[error("missing content-type boundary")]
    MissingBoundary,

    #[error("multipart boundary length limit {max_len} exceeded, current: {current_len}")]
    BoundaryTooLong { current_len: usize, max_len: usize },

    #[error("section header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("section header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid section header: {reason}")]
    InvalidHeader { reason: String },

    #[error("form section has invalid content-disposition value: {reason}")]
    InvalidDisposition { reason: String },

    #[error("invalid multipart boundary line: {reason}")]
    InvalidBoundary { reason: String },

    #[error("multipart body ended before the closing boundary")]
    IncompleteBody,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl MultipartError {
    pub fn unsupported_content_type<S: ToString>(content_type: S) -> Self {
        Self::UnsupportedContentType { content_type: content_type.to_string() }
    }

    pub fn boundary_too_long(current_len: usize, max_len: usize) -> Self {
        Self::BoundaryTooLong { current_len, max_len }
    }

    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_disposition<S: ToString>(str: S) -> Self {
        Self::InvalidDisposition { reason: str.to_string() }
    }

    pub fn invalid_boundary<S: ToString>(str: S) -> Self {
        Self::InvalidBoundary { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

impl From<MultipartError> for io::Error {
    fn from(e: MultipartError) -> Self {
        match e {
            MultipartError::Io { source } => source,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Error raised by an [`UploadTrigger`](crate::trigger::UploadTrigger) implementation.
pub type TriggerError = Box<dyn std::error::Error + Send + Sync>;

/// Every way a remote upload can fail, from registration to the last relayed byte.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("id '{id}' is already registered")]
    DuplicateRegistration { id: CorrelationId },

    #[error("invalid handler id {id}")]
    UnknownHandler { id: String },

    #[error("malformed upload request: {source}")]
    MalformedRequest {
        #[from]
        source: MultipartError,
    },

    #[error("unexpected section in upload request: {reason}")]
    UnexpectedSection { reason: String },

    #[error("timed out waiting for remote upload to start after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("remote upload was cancelled")]
    Cancelled,

    #[error("exception while reading from remote stream: {source}")]
    Io { source: Arc<io::Error> },

    #[error("remote stream is closed")]
    StreamClosed,

    #[error("failed to start remote upload: {source}")]
    Trigger { source: TriggerError },

    #[error("unable to hand over remote stream: {reason}")]
    Handoff { reason: String },
}

impl UploadError {
    pub fn duplicate_registration(id: CorrelationId) -> Self {
        Self::DuplicateRegistration { id }
    }

    pub fn unknown_handler<S: ToString>(id: S) -> Self {
        Self::UnknownHandler { id: id.to_string() }
    }

    pub fn unexpected_section<S: ToString>(str: S) -> Self {
        Self::UnexpectedSection { reason: str.to_string() }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    pub fn io(source: Arc<io::Error>) -> Self {
        Self::Io { source }
    }

    pub fn trigger<E: Into<TriggerError>>(e: E) -> Self {
        Self::Trigger { source: e.into() }
    }

    pub fn handoff<S: ToString>(str: S) -> Self {
        Self::Handoff { reason: str.to_string() }
    }

    /// Returns true when the error means nobody was waiting for the posted id.
    #[inline]
    pub fn is_unknown_handler(&self) -> bool {
        matches!(self, UploadError::UnknownHandler { .. })
    }
}
