use bytes::Bytes;
use http::HeaderMap;

/// One item produced by the [`MultipartDecoder`](super::MultipartDecoder).
///
/// A section is emitted as a `Header`, followed by zero or more `Payload` chunks and a
/// closing [`PayloadItem::Eof`].
#[derive(Debug)]
pub enum Message {
    /// The header block of a new section
    Header(HeaderMap),
    /// A chunk of section content or the end of the section
    Payload(PayloadItem),
}

/// An item of section content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// A chunk of section data
    Chunk(Bytes),
    /// Marks the end of the current section
    Eof,
}

impl Message {
    #[inline]
    pub fn is_header(&self) -> bool {
        matches!(self, Message::Header(_))
    }
}

impl PayloadItem {
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}
