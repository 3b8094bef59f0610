use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;

use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, SinkExt, StreamExt};

use http_body::{Body, Frame};
use tokio::io::AsyncRead;
use tracing::{error, trace};

use crate::error::MultipartError;
use crate::multipart::{PayloadItem, Section};

type ChunkResult = Result<PayloadItem, MultipartError>;

/// Streams the content of one [`Section`] to a consumer that must own its body.
///
/// The section borrows the request reader, so it cannot be handed to a handler running
/// elsewhere. `SectionBody` is the owned consumer half: each poll sends a oneshot
/// request over a channel, and the [`SectionSender`] half answers it with the next
/// chunk read from the section. Nothing is read from the request until the consumer
/// asks for it.
#[derive(Debug)]
pub struct SectionBody {
    signal: mpsc::Sender<oneshot::Sender<ChunkResult>>,
    receiving: Option<oneshot::Receiver<ChunkResult>>,
}

impl SectionBody {
    fn new(signal: mpsc::Sender<oneshot::Sender<ChunkResult>>) -> Self {
        Self { signal, receiving: None }
    }

    /// Creates the consumer and producer halves for `section`.
    ///
    /// The producer has to be driven with [`SectionSender::send_body`] concurrently with
    /// whatever consumes the body.
    pub fn channel<'s, 'r, R>(section: &'s mut Section<'r, R>) -> (SectionBody, SectionSender<'s, 'r, R>)
    where
        R: AsyncRead + Unpin,
    {
        let (tx, receiver) = mpsc::channel(1);
        (SectionBody::new(tx), SectionSender { section, receiver, eof: false })
    }
}

/// Producer half of a [`SectionBody`].
#[derive(Debug)]
pub struct SectionSender<'s, 'r, R> {
    section: &'s mut Section<'r, R>,
    receiver: mpsc::Receiver<oneshot::Sender<ChunkResult>>,
    eof: bool,
}

impl<R> SectionSender<'_, '_, R>
where
    R: AsyncRead + Unpin,
{
    /// Answers chunk requests until the consumer drops its [`SectionBody`].
    ///
    /// Reaching the end of the section does not stop the sender, a consumer polling past
    /// the end keeps getting end-of-section.
    ///
    /// # Errors
    ///
    /// Returns the parse failure of the section content. The consumer sees the failure as
    /// an io error on its next read.
    pub async fn send_body(&mut self) -> Result<(), MultipartError> {
        while let Some(sender) = self.receiver.next().await {
            if self.eof {
                let _ = sender.send(Ok(PayloadItem::Eof));
                continue;
            }

            match self.section.chunk().await {
                Ok(Some(bytes)) => {
                    trace!(size = bytes.len(), "relay section chunk");
                    let _ = sender.send(Ok(PayloadItem::Chunk(bytes)));
                }
                Ok(None) => {
                    self.eof = true;
                    let _ = sender.send(Ok(PayloadItem::Eof));
                }
                Err(e) => {
                    error!(cause = %e, "failed to read section content");
                    let relayed = io::Error::new(io::ErrorKind::InvalidData, e.to_string());
                    let _ = sender.send(Err(MultipartError::io(relayed)));
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

impl Body for SectionBody {
    type Data = Bytes;
    type Error = MultipartError;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        loop {
            if let Some(oneshot_receiver) = &mut self.receiving {
                let received = ready!(oneshot_receiver.poll_unpin(cx));
                self.receiving.take();
                return match received {
                    Ok(Ok(PayloadItem::Chunk(bytes))) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                    Ok(Ok(PayloadItem::Eof)) => Poll::Ready(None),
                    Ok(Err(e)) => Poll::Ready(Some(Err(e))),
                    Err(_canceled) => Poll::Ready(Some(Err(MultipartError::io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "section content is no longer available",
                    ))))),
                };
            }

            match ready!(self.signal.poll_ready_unpin(cx)) {
                Ok(()) => {
                    let (tx, rx) = oneshot::channel();
                    match self.signal.start_send(tx) {
                        Ok(()) => {
                            self.receiving = Some(rx);
                        }
                        Err(e) => return Poll::Ready(Some(Err(MultipartError::io(io::Error::other(e))))),
                    }
                }
                Err(e) => return Poll::Ready(Some(Err(MultipartError::io(io::Error::other(e))))),
            }
        }
    }
}
