//! Incremental decoder for `multipart/form-data` bodies, as defined in
//! [RFC 7578](https://www.rfc-editor.org/rfc/rfc7578) and
//! [RFC 2046 Section 5.1](https://www.rfc-editor.org/rfc/rfc2046#section-5.1).
//!
//! The decoder never looks further ahead than one delimiter length: section content is
//! released as soon as it cannot be the start of the next boundary, so a file of any
//! size passes through with bounded memory.

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::config::MultipartLimits;
use crate::error::MultipartError;
use crate::multipart::{Message, PayloadItem};
use crate::utils::{ensure, find_subslice};

/// Maximum whitespace allowed between a boundary and its line break.
const MAX_BOUNDARY_PADDING: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Skip anything before the first boundary
    Preamble,
    /// Read what follows a boundary: `--` for the last one, CRLF otherwise
    BoundaryTail,
    /// Read the header block of a section
    Headers,
    /// Read section content up to the next delimiter
    Body,
    /// The closing boundary was seen, the epilogue is discarded
    End,
}

/// A [`Decoder`] turning a multipart body into section [`Message`]s.
#[derive(Debug, Clone)]
pub struct MultipartDecoder {
    state: State,
    /// `--boundary`, the very first line may start with it
    dash_boundary: Bytes,
    /// `\r\n--boundary`, separates sections
    delimiter: Bytes,
    limits: MultipartLimits,
    at_body_start: bool,
    started: bool,
}

impl MultipartDecoder {
    pub fn new(boundary: &str, limits: MultipartLimits) -> Self {
        let dash_boundary = Bytes::from(format!("--{boundary}"));
        let delimiter = Bytes::from(format!("\r\n--{boundary}"));
        Self { state: State::Preamble, dash_boundary, delimiter, limits, at_body_start: true, started: false }
    }

    /// Returns true once the closing boundary has been decoded.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state == State::End
    }

    fn read_preamble(&mut self, src: &mut BytesMut) -> Option<State> {
        if self.at_body_start {
            if src.len() < self.dash_boundary.len() && self.dash_boundary.starts_with(&src[..]) {
                return None;
            }
            self.at_body_start = false;
            if src.starts_with(&self.dash_boundary) {
                src.advance(self.dash_boundary.len());
                return Some(State::BoundaryTail);
            }
        }

        if let Some(index) = find_subslice(src, &self.delimiter) {
            src.advance(index + self.delimiter.len());
            return Some(State::BoundaryTail);
        }

        let keep = self.delimiter.len() - 1;
        if src.len() > keep {
            let discard = src.len() - keep;
            trace!(len = discard, "discard multipart preamble");
            src.advance(discard);
        }
        None
    }

    fn read_boundary_tail(src: &mut BytesMut) -> Result<Option<State>, MultipartError> {
        if src.len() < 2 {
            return Ok(None);
        }

        if src.starts_with(b"--") {
            src.advance(2);
            return Ok(Some(State::End));
        }

        match find_subslice(src, b"\r\n") {
            Some(index) => {
                ensure!(
                    src[..index].iter().all(|b| *b == b' ' || *b == b'\t'),
                    MultipartError::invalid_boundary("unexpected characters after boundary")
                );
                src.advance(index + 2);
                Ok(Some(State::Headers))
            }
            None => {
                ensure!(src.len() <= MAX_BOUNDARY_PADDING, MultipartError::invalid_boundary("boundary line is too long"));
                Ok(None)
            }
        }
    }

    fn read_headers(&self, src: &mut BytesMut) -> Result<Option<HeaderMap>, MultipartError> {
        let max_num = self.limits.max_header_count;
        let max_size = self.limits.max_headers_length;

        let mut parsed = vec![httparse::EMPTY_HEADER; max_num];
        let (header_size, header_map) = match httparse::parse_headers(src, &mut parsed) {
            Ok(Status::Complete((header_size, headers))) => {
                ensure!(header_size <= max_size, MultipartError::too_large_header(header_size, max_size));

                let mut header_map = HeaderMap::with_capacity(headers.len());
                for header in headers {
                    let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(MultipartError::invalid_header)?;
                    let value = HeaderValue::from_bytes(header.value).map_err(MultipartError::invalid_header)?;
                    header_map.append(name, value);
                }
                (header_size, header_map)
            }
            Ok(Status::Partial) => {
                ensure!(src.len() <= max_size, MultipartError::too_large_header(src.len(), max_size));
                return Ok(None);
            }
            Err(httparse::Error::TooManyHeaders) => return Err(MultipartError::too_many_headers(max_num)),
            Err(e) => return Err(MultipartError::invalid_header(e)),
        };

        trace!(header_size, header_count = header_map.len(), "parsed section headers");
        src.advance(header_size);
        Ok(Some(header_map))
    }

    fn read_body(&self, src: &mut BytesMut) -> Option<Result<PayloadItem, State>> {
        match find_subslice(src, &self.delimiter) {
            Some(0) => {
                src.advance(self.delimiter.len());
                Some(Err(State::BoundaryTail))
            }
            Some(index) => Some(Ok(PayloadItem::Chunk(src.split_to(index).freeze()))),
            None => {
                // everything before a possible partial delimiter at the tail is content
                let tail_start = src.len().saturating_sub(self.delimiter.len() - 1);
                let safe = src[tail_start..].iter().position(|b| *b == b'\r').map_or(src.len(), |pos| tail_start + pos);
                if safe == 0 {
                    return None;
                }
                Some(Ok(PayloadItem::Chunk(src.split_to(safe).freeze())))
            }
        }
    }
}

impl Decoder for MultipartDecoder {
    type Item = Message;
    type Error = MultipartError;

    /// Decodes the next section message from the buffer.
    ///
    /// # Returns
    /// - `Ok(Some(Message::Header(_)))` when a section header block is complete
    /// - `Ok(Some(Message::Payload(_)))` for section content and the end of a section
    /// - `Ok(None)` when more data is needed, or the closing boundary was seen
    /// - `Err(MultipartError)` if the body is not valid multipart
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == State::End {
                src.clear();
                return Ok(None);
            }

            if src.is_empty() {
                return Ok(None);
            }
            self.started = true;

            match self.state {
                State::Preamble => match self.read_preamble(src) {
                    Some(state) => self.state = state,
                    None => return Ok(None),
                },

                State::BoundaryTail => match Self::read_boundary_tail(src)? {
                    Some(state) => {
                        trace!(?state, "read boundary");
                        self.state = state;
                    }
                    None => return Ok(None),
                },

                State::Headers => {
                    return match self.read_headers(src)? {
                        Some(header_map) => {
                            self.state = State::Body;
                            Ok(Some(Message::Header(header_map)))
                        }
                        None => Ok(None),
                    };
                }

                State::Body => {
                    return match self.read_body(src) {
                        Some(Ok(item)) => {
                            trace!(len = item.as_bytes().map_or(0, Bytes::len), "read section bytes");
                            Ok(Some(Message::Payload(item)))
                        }
                        Some(Err(state)) => {
                            self.state = state;
                            Ok(Some(Message::Payload(PayloadItem::Eof)))
                        }
                        None => Ok(None),
                    };
                }

                State::End => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }

        match self.state {
            State::End => Ok(None),
            // an empty body carries no sections at all
            State::Preamble if !self.started && src.is_empty() => Ok(None),
            _ => Err(MultipartError::IncompleteBody),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xyz_decoder() -> MultipartDecoder {
        MultipartDecoder::new("xyz", MultipartLimits::default())
    }

    fn decode_all(decoder: &mut MultipartDecoder, input: &[u8]) -> Vec<Message> {
        let mut buffer = BytesMut::from(input);
        let mut messages = vec![];
        while let Some(message) = decoder.decode_eof(&mut buffer).unwrap() {
            messages.push(message);
        }
        messages
    }

    fn section_content(messages: &[Message]) -> Vec<u8> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::Payload(PayloadItem::Chunk(bytes)) => Some(bytes.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_single_section() {
        let body = b"--xyz\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\r\nhello\r\n--xyz--\r\n";
        let mut decoder = xyz_decoder();
        let messages = decode_all(&mut decoder, body);

        assert!(messages[0].is_header());
        match &messages[0] {
            Message::Header(headers) => {
                assert_eq!(headers["content-disposition"], "form-data; name=\"file\"; filename=\"a.txt\"");
            }
            Message::Payload(_) => panic!("expected header"),
        }
        assert_eq!(section_content(&messages), b"hello");
        assert!(matches!(messages.last(), Some(Message::Payload(PayloadItem::Eof))));
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_preamble_and_epilogue_are_skipped() {
        let body = b"this is a preamble\r\n--xyz\r\n\r\ndata\r\n--xyz--\r\nepilogue";
        let mut decoder = xyz_decoder();
        let messages = decode_all(&mut decoder, body);
        assert_eq!(messages.len(), 3);
        assert_eq!(section_content(&messages), b"data");
    }

    #[test]
    fn test_content_split_across_reads() {
        let body: &[u8] = b"--xyz\r\n\r\nline one\r\nline two\r\n--xy\r\n--xyz--";
        let mut decoder = xyz_decoder();
        let mut buffer = BytesMut::new();
        let mut messages = vec![];

        for byte in body {
            buffer.extend_from_slice(&[*byte]);
            while let Some(message) = decoder.decode(&mut buffer).unwrap() {
                messages.push(message);
            }
        }
        while let Some(message) = decoder.decode_eof(&mut buffer).unwrap() {
            messages.push(message);
        }

        assert_eq!(section_content(&messages), b"line one\r\nline two\r\n--xy");
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_zero_length_section() {
        let body = b"--xyz\r\nContent-Disposition: form-data; name=\"f\"; filename=\"e\"\r\n\r\n\r\n--xyz--";
        let mut decoder = xyz_decoder();
        let messages = decode_all(&mut decoder, body);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].is_header());
        assert!(matches!(messages[1], Message::Payload(PayloadItem::Eof)));
    }

    #[test]
    fn test_empty_body_has_no_sections() {
        let mut decoder = xyz_decoder();
        assert!(decode_all(&mut decoder, b"").is_empty());

        let mut decoder = xyz_decoder();
        assert!(decode_all(&mut decoder, b"--xyz--\r\n").is_empty());
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_truncated_body_is_an_error() {
        let mut decoder = xyz_decoder();
        let mut buffer = BytesMut::from(&b"--xyz\r\n\r\npartial"[..]);
        assert!(decoder.decode_eof(&mut buffer).unwrap().is_some());
        assert!(decoder.decode_eof(&mut buffer).unwrap().is_some());
        assert!(matches!(decoder.decode_eof(&mut buffer), Err(MultipartError::IncompleteBody)));
    }

    #[test]
    fn test_header_limits() {
        let limits = MultipartLimits { max_header_count: 1, ..MultipartLimits::default() };
        let mut decoder = MultipartDecoder::new("xyz", limits);
        let mut buffer = BytesMut::from(&b"--xyz\r\nA: 1\r\nB: 2\r\n\r\n"[..]);
        assert!(matches!(decoder.decode(&mut buffer), Err(MultipartError::TooManyHeaders { max_num: 1 })));

        let limits = MultipartLimits { max_headers_length: 8, ..MultipartLimits::default() };
        let mut decoder = MultipartDecoder::new("xyz", limits);
        let mut buffer = BytesMut::from(&b"--xyz\r\nContent-Type: text/plain"[..]);
        assert!(matches!(decoder.decode(&mut buffer), Err(MultipartError::TooLargeHeader { .. })));
    }

    #[test]
    fn test_garbage_after_boundary() {
        let mut decoder = xyz_decoder();
        let mut buffer = BytesMut::from(&b"--xyzjunk\r\n\r\n"[..]);
        assert!(matches!(decoder.decode(&mut buffer), Err(MultipartError::InvalidBoundary { .. })));
    }
}
