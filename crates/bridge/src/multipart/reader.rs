use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes};
use futures::{Stream, StreamExt};
use http::{HeaderMap, Request};
use http_body::Body;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::{debug, trace};

use crate::config::MultipartLimits;
use crate::error::MultipartError;
use crate::multipart::content_type::{declares_empty_body, parse_boundary};
use crate::multipart::{ContentDisposition, Message, MultipartDecoder, PayloadItem, SectionKind};

/// Reader over an http request body, see [`MultipartReader::from_request`].
pub type BodyReader<B> = StreamReader<BodyStream<B>, Bytes>;

/// Reads a `multipart/form-data` body one section at a time.
///
/// The reader never buffers ahead of the section being read: a [`Section`] borrows the
/// reader mutably, and asking for the next section first drains whatever the caller
/// left unread of the current one.
#[derive(Debug)]
pub struct MultipartReader<R> {
    framed: FramedRead<R, MultipartDecoder>,
    in_section: bool,
    finished: bool,
}

impl<B> MultipartReader<BodyReader<B>>
where
    B: Body + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    /// Builds a reader from a request declaring `multipart/form-data` with a boundary.
    ///
    /// A request declaring `Content-Length: 0` yields no sections.
    pub fn from_request(request: Request<B>, limits: &MultipartLimits) -> Result<Self, MultipartError> {
        let (parts, body) = request.into_parts();
        let boundary = parse_boundary(&parts.headers, limits)?;
        let empty = declares_empty_body(&parts.headers) || body.size_hint().exact() == Some(0);

        let mut reader = Self::new(StreamReader::new(BodyStream::new(body)), &boundary, *limits);
        reader.finished = empty;
        Ok(reader)
    }
}

impl<R> MultipartReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, boundary: &str, limits: MultipartLimits) -> Self {
        Self { framed: FramedRead::new(reader, MultipartDecoder::new(boundary, limits)), in_section: false, finished: false }
    }

    /// Returns the next section in wire order, or `None` at the end of the body.
    ///
    /// # Errors
    ///
    /// Fails when the body is not valid multipart, or when the section carries no valid
    /// `Content-Disposition`.
    pub async fn next_section(&mut self) -> Result<Option<Section<'_, R>>, MultipartError> {
        if self.finished {
            return Ok(None);
        }

        if self.in_section {
            self.drain_section().await?;
        }

        match self.framed.next().await {
            Some(Ok(Message::Header(headers))) => {
                let disposition = parse_disposition(&headers)?;
                debug!(name = ?disposition.name(), file_name = ?disposition.file_name(), "read multipart section");
                self.in_section = true;
                Ok(Some(Section { headers, disposition, reader: self }))
            }
            Some(Ok(Message::Payload(_))) => Err(MultipartError::invalid_header("expected section header, found content")),
            Some(Err(e)) => Err(e),
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, MultipartError> {
        if !self.in_section {
            return Ok(None);
        }

        match self.framed.next().await {
            Some(Ok(Message::Payload(PayloadItem::Chunk(bytes)))) => Ok(Some(bytes)),
            Some(Ok(Message::Payload(PayloadItem::Eof))) => {
                self.in_section = false;
                Ok(None)
            }
            Some(Ok(Message::Header(_))) => Err(MultipartError::invalid_header("received header inside section content")),
            Some(Err(e)) => Err(e),
            None => Err(MultipartError::IncompleteBody),
        }
    }

    async fn drain_section(&mut self) -> Result<(), MultipartError> {
        let mut size: usize = 0;
        while let Some(bytes) = self.next_chunk().await? {
            size += bytes.len();
        }
        if size > 0 {
            trace!(size, "skip unread section content");
        }
        Ok(())
    }
}

fn parse_disposition(headers: &HeaderMap) -> Result<ContentDisposition, MultipartError> {
    let value = headers
        .get(http::header::CONTENT_DISPOSITION)
        .ok_or_else(|| MultipartError::invalid_disposition("<missing>"))?
        .to_str()
        .map_err(|_e| MultipartError::invalid_disposition("<not visible ascii>"))?;
    ContentDisposition::parse(value)
}

/// One section of a multipart body with a forward-only cursor over its content.
#[derive(Debug)]
pub struct Section<'r, R> {
    headers: HeaderMap,
    disposition: ContentDisposition,
    reader: &'r mut MultipartReader<R>,
}

impl<R> Section<'_, R>
where
    R: AsyncRead + Unpin,
{
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn disposition(&self) -> &ContentDisposition {
        &self.disposition
    }

    pub fn kind(&self) -> SectionKind {
        self.disposition.kind()
    }

    pub fn is_file(&self) -> bool {
        self.disposition.is_file()
    }

    /// Reads the next chunk of content, `None` once the section is exhausted.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, MultipartError> {
        self.reader.next_chunk().await
    }

    /// Skips the rest of the section.
    pub async fn skip(&mut self) -> Result<(), MultipartError> {
        self.reader.drain_section().await
    }
}

/// Adapts the data frames of an [`http_body::Body`] into a byte stream, dropping trailers.
#[derive(Debug)]
pub struct BodyStream<B> {
    body: B,
}

impl<B> BodyStream<B> {
    pub fn new(body: B) -> Self {
        Self { body }
    }
}

impl<B> Stream for BodyStream<B>
where
    B: Body + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            return match ready!(Pin::new(&mut self.body).poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(mut data) => Poll::Ready(Some(Ok(data.copy_to_bytes(data.remaining())))),
                    // trailers carry nothing the sections need
                    Err(_trailers) => continue,
                },
                Some(Err(e)) => Poll::Ready(Some(Err(io::Error::other(e)))),
                None => Poll::Ready(None),
            };
        }
    }
}
