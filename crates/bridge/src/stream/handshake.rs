use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::UploadError;
use crate::registry::{IncomingStream, UploadHandler};

/// Sent to the waiting reader once the upload request arrives.
pub(crate) struct Delivery {
    pub(crate) stream: IncomingStream,
    /// Fired by the reader when it is done with `stream`.
    pub(crate) finished: oneshot::Sender<Result<(), UploadError>>,
}

/// Registry handler of one upload attempt.
///
/// Both signals of the handshake are oneshot channels: the handler fires "stream
/// arrived" with a [`Delivery`], then waits on the "consumer finished" channel it sent
/// along.
pub(crate) struct Handoff {
    arrived: Mutex<Option<oneshot::Sender<Delivery>>>,
}

impl Handoff {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Delivery>) {
        let (tx, rx) = oneshot::channel();
        (Self { arrived: Mutex::new(Some(tx)) }, rx)
    }
}

#[async_trait]
impl UploadHandler for Handoff {
    async fn on_upload(&self, stream: Option<IncomingStream>) -> Result<(), UploadError> {
        let arrived = self.arrived.lock().take().ok_or_else(|| UploadError::handoff("an upload is already in progress"))?;

        // no file section means an empty file
        let stream = stream.unwrap_or_else(|| Box::pin(tokio::io::empty()));
        let (finished, finished_rx) = oneshot::channel();
        arrived
            .send(Delivery { stream, finished })
            .map_err(|_delivery| UploadError::handoff("reader stopped waiting for the upload"))?;

        match finished_rx.await {
            Ok(result) => result,
            Err(_closed) => {
                // the reader went away without signaling, same as a disposal
                debug!("remote stream dropped before finishing");
                Ok(())
            }
        }
    }
}
