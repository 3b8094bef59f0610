use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::UploadError;
use crate::file::{CorrelationId, ElementRef, FileDescriptor};
use crate::registry::{IncomingStream, Registration, UploadRegistry};
use crate::stream::handshake::Handoff;
use crate::trigger::{UploadRequest, UploadTrigger};

/// Where a [`RemoteFileStream`] is in its single upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Nothing requested yet.
    Idle,
    /// Registered, the agent is being told to upload.
    AwaitingUpload,
    /// Waiting for the upload request to arrive.
    AwaitingStream,
    /// Reads are served from the uploaded section.
    Relaying,
    Completed,
    Failed,
}

impl StreamPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamPhase::Completed | StreamPhase::Failed)
    }
}

/// Published after every transition and every successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadProgress {
    pub phase: StreamPhase,
    pub bytes_read: u64,
}

struct Relay {
    stream: IncomingStream,
    finished: Option<oneshot::Sender<Result<(), UploadError>>>,
    delivered: u64,
    registration: Registration,
}

enum State {
    Idle,
    Relaying(Relay),
    Completed,
    Failed,
}

/// Pull-based reader over a file that lives in the browser.
///
/// The first read registers the stream under its correlation id, asks the agent to
/// post the file to the one-time upload url and waits for the upload to arrive. Later
/// reads are served straight from the uploaded section, never beyond the size the
/// agent declared. The upload request is answered once the stream completes, fails,
/// or is dropped.
///
/// Reads take `&self`: a read issued while another one is waiting for the upload
/// waits for the same attempt.
pub struct RemoteFileStream {
    file: FileDescriptor,
    element: ElementRef,
    correlation_id: CorrelationId,
    upload_url: String,
    registry: UploadRegistry,
    trigger: Arc<dyn UploadTrigger>,
    timeout: Duration,
    state: Mutex<State>,
    progress: watch::Sender<ReadProgress>,
    disposed: CancellationToken,
}

/// Why a pending wait or read stopped before producing anything.
enum Interrupt {
    Cancelled,
    Disposed,
}

impl RemoteFileStream {
    pub fn new(
        file: FileDescriptor,
        element: ElementRef,
        correlation_id: CorrelationId,
        upload_url: String,
        registry: UploadRegistry,
        trigger: Arc<dyn UploadTrigger>,
        timeout: Duration,
    ) -> Self {
        let (progress, _) = watch::channel(ReadProgress { phase: StreamPhase::Idle, bytes_read: 0 });
        Self {
            file,
            element,
            correlation_id,
            upload_url,
            registry,
            trigger,
            timeout,
            state: Mutex::new(State::Idle),
            progress,
            disposed: CancellationToken::new(),
        }
    }

    pub fn file(&self) -> &FileDescriptor {
        &self.file
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    pub fn phase(&self) -> StreamPhase {
        self.progress.borrow().phase
    }

    pub fn bytes_read(&self) -> u64 {
        self.progress.borrow().bytes_read
    }

    /// Watches phase changes and the running byte count.
    pub fn subscribe(&self) -> watch::Receiver<ReadProgress> {
        self.progress.subscribe()
    }

    /// Reads up to `buf.len()` bytes, `Ok(0)` marks the end of the file.
    ///
    /// # Errors
    ///
    /// See [`RemoteFileStream::read_with_cancel`].
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, UploadError> {
        self.read_with_cancel(buf, &CancellationToken::new()).await
    }

    /// Reads up to `buf.len()` bytes, aborting when `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`UploadError::DuplicateRegistration`] when another stream waits for the same file
    /// - [`UploadError::Trigger`] when the agent could not be instructed
    /// - [`UploadError::Timeout`] when no upload arrived in time
    /// - [`UploadError::Cancelled`] when `cancel` fired
    /// - [`UploadError::Io`] when reading the uploaded section failed
    /// - [`UploadError::StreamClosed`] for any read after the stream completed, failed or
    ///   was closed, including a read pending while [`RemoteFileStream::close`] runs
    pub async fn read_with_cancel(&self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize, UploadError> {
        let mut state = tokio::select! {
            state = self.state.lock() => state,
            () = cancel.cancelled() => return Err(UploadError::Cancelled),
        };

        if self.disposed.is_cancelled() {
            self.dispose(&mut state);
            return Err(UploadError::StreamClosed);
        }

        if matches!(*state, State::Idle) {
            // stays failed when this future is dropped halfway
            *state = State::Failed;
            match self.open_remote(cancel).await {
                Ok(relay) => {
                    *state = State::Relaying(relay);
                    self.set_phase(StreamPhase::Relaying);
                }
                Err(e) if self.disposed.is_cancelled() => {
                    debug!(correlation_id = %self.correlation_id, cause = %e, "remote stream closed before the upload arrived");
                    *state = State::Completed;
                    self.set_phase(StreamPhase::Completed);
                    return Err(UploadError::StreamClosed);
                }
                Err(e) => {
                    warn!(correlation_id = %self.correlation_id, cause = %e, "remote upload failed to start");
                    self.set_phase(StreamPhase::Failed);
                    return Err(e);
                }
            }
        }

        let State::Relaying(relay) = &mut *state else {
            return Err(UploadError::StreamClosed);
        };

        if buf.is_empty() {
            return Ok(0);
        }

        let remaining = self.file.size_bytes.saturating_sub(relay.delivered);
        let allowed = usize::try_from(remaining).map_or(buf.len(), |remaining| remaining.min(buf.len()));
        if allowed == 0 {
            finish(&mut state, &self.progress, Ok(()));
            return Ok(0);
        }

        let outcome = tokio::select! {
            read = relay.stream.read(&mut buf[..allowed]) => Ok(read),
            () = cancel.cancelled() => Err(Interrupt::Cancelled),
            () = self.disposed.cancelled() => Err(Interrupt::Disposed),
        };

        match outcome {
            Ok(Ok(0)) => {
                debug!(correlation_id = %self.correlation_id, delivered = relay.delivered, "remote stream ended early");
                finish(&mut state, &self.progress, Ok(()));
                Ok(0)
            }
            Ok(Ok(n)) => {
                relay.delivered += n as u64;
                let delivered = relay.delivered;
                trace!(correlation_id = %self.correlation_id, size = n, delivered, "relay remote data");
                self.progress.send_modify(|progress| progress.bytes_read = delivered);
                Ok(n)
            }
            Ok(Err(e)) => {
                let e = Arc::new(e);
                warn!(correlation_id = %self.correlation_id, cause = %e, "remote stream read failed");
                finish(&mut state, &self.progress, Err(UploadError::io(Arc::clone(&e))));
                Err(UploadError::io(e))
            }
            Err(Interrupt::Cancelled) => {
                finish(&mut state, &self.progress, Err(UploadError::Cancelled));
                Err(UploadError::Cancelled)
            }
            Err(Interrupt::Disposed) => {
                finish(&mut state, &self.progress, Ok(()));
                Err(UploadError::StreamClosed)
            }
        }
    }

    async fn open_remote(&self, cancel: &CancellationToken) -> Result<Relay, UploadError> {
        self.set_phase(StreamPhase::AwaitingUpload);

        let (handoff, arrived) = Handoff::new();
        let registration = self.registry.register(self.correlation_id.clone(), Arc::new(handoff))?;

        let request =
            UploadRequest { element: self.element.clone(), file_id: self.file.id, upload_url: self.upload_url.clone() };
        info!(correlation_id = %self.correlation_id, url = %self.upload_url, size = self.file.size_bytes, "request remote upload");

        let triggered = tokio::select! {
            triggered = self.trigger.start_upload(&request) => Ok(triggered),
            () = cancel.cancelled() => Err(Interrupt::Cancelled),
            () = self.disposed.cancelled() => Err(Interrupt::Disposed),
        };
        interrupted(triggered)?.map_err(UploadError::trigger)?;

        // the timeout covers the wait for the upload only, not the trigger call
        self.set_phase(StreamPhase::AwaitingStream);
        let delivery = tokio::select! {
            delivery = arrived => Ok(delivery),
            () = tokio::time::sleep(self.timeout) => return Err(UploadError::timeout(self.timeout)),
            () = cancel.cancelled() => Err(Interrupt::Cancelled),
            () = self.disposed.cancelled() => Err(Interrupt::Disposed),
        };
        let delivery = interrupted(delivery)?.map_err(|_closed| UploadError::handoff("upload handler went away"))?;

        info!(correlation_id = %self.correlation_id, "remote upload arrived");
        Ok(Relay { stream: delivery.stream, finished: Some(delivery.finished), delivered: 0, registration })
    }

    fn set_phase(&self, phase: StreamPhase) {
        debug!(correlation_id = %self.correlation_id, ?phase, "remote stream transition");
        self.progress.send_modify(|progress| progress.phase = phase);
    }

    /// Ends the stream, answering a waiting upload request with success.
    ///
    /// A read pending on the upload or on the uploaded section is interrupted and fails
    /// with [`UploadError::StreamClosed`]. Dropping the stream does the same.
    pub async fn close(&self) {
        self.disposed.cancel();
        let mut state = self.state.lock().await;
        self.dispose(&mut state);
    }

    fn dispose(&self, state: &mut State) {
        if matches!(state, State::Relaying(_)) {
            finish(state, &self.progress, Ok(()));
        } else if matches!(state, State::Idle) {
            *state = State::Completed;
            self.set_phase(StreamPhase::Completed);
        }
    }

    /// Turns the stream into a [`Stream`] of chunks of at most `chunk_size` bytes.
    pub fn into_chunks(self, chunk_size: usize) -> impl Stream<Item = Result<Bytes, UploadError>> + Send {
        let chunk_size = chunk_size.max(1);
        futures::stream::unfold(Some(self), move |stream| async move {
            let stream = stream?;
            let mut buf = vec![0; chunk_size];
            match stream.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(Bytes::from(buf)), Some(stream)))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

fn interrupted<T>(outcome: Result<T, Interrupt>) -> Result<T, UploadError> {
    outcome.map_err(|interrupt| match interrupt {
        Interrupt::Cancelled => UploadError::Cancelled,
        Interrupt::Disposed => UploadError::StreamClosed,
    })
}

/// Moves a relaying stream to its terminal state and answers the upload request.
fn finish(state: &mut State, progress: &watch::Sender<ReadProgress>, result: Result<(), UploadError>) {
    let phase = if result.is_ok() { StreamPhase::Completed } else { StreamPhase::Failed };
    let terminal = if result.is_ok() { State::Completed } else { State::Failed };

    if let State::Relaying(mut relay) = std::mem::replace(state, terminal) {
        debug!(correlation_id = %relay.registration.id(), delivered = relay.delivered, ?phase, "remote stream finished");
        if let Some(finished) = relay.finished.take() {
            let _ = finished.send(result);
        }
    }

    progress.send_modify(|progress| progress.phase = phase);
}

impl Drop for RemoteFileStream {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if matches!(state, State::Relaying(_)) {
            finish(state, &self.progress, Ok(()));
        }
    }
}

impl fmt::Debug for RemoteFileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFileStream")
            .field("correlation_id", &self.correlation_id)
            .field("upload_url", &self.upload_url)
            .field("progress", &*self.progress.borrow())
            .finish_non_exhaustive()
    }
}
