//! Maps correlation ids to the handlers waiting for their upload.
//!
//! The registry is the only state shared between the read path and the upload path.
//! It is constructed once by the hosting service and cloned into both sides.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::error::UploadError;
use crate::file::CorrelationId;

/// The byte stream of an uploaded file section.
pub type IncomingStream = Pin<Box<dyn AsyncRead + Send>>;

/// Receives the stream posted for a registered correlation id.
///
/// `None` means the request carried no file section at all. The returned future
/// resolves once the handler is done with the stream; the upload request is answered
/// only after that.
#[async_trait]
pub trait UploadHandler: Send + Sync {
    async fn on_upload(&self, stream: Option<IncomingStream>) -> Result<(), UploadError>;
}

/// Adapts an async closure into an [`UploadHandler`], see [`upload_handler_fn`].
pub struct UploadHandlerFn<F> {
    f: F,
}

/// Wraps `f` as an [`UploadHandler`].
pub fn upload_handler_fn<F, Fut>(f: F) -> UploadHandlerFn<F>
where
    F: Fn(Option<IncomingStream>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), UploadError>> + Send,
{
    UploadHandlerFn { f }
}

#[async_trait]
impl<F, Fut> UploadHandler for UploadHandlerFn<F>
where
    F: Fn(Option<IncomingStream>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), UploadError>> + Send,
{
    async fn on_upload(&self, stream: Option<IncomingStream>) -> Result<(), UploadError> {
        (self.f)(stream).await
    }
}

impl<F> fmt::Debug for UploadHandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadHandlerFn").finish_non_exhaustive()
    }
}

struct Pending {
    token: u64,
    handler: Arc<dyn UploadHandler>,
}

type PendingMap = DashMap<String, Pending>;

/// Concurrent map from correlation id to the handler waiting for it.
#[derive(Clone, Default)]
pub struct UploadRegistry {
    pending: Arc<PendingMap>,
    next_token: Arc<AtomicU64>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `id`.
    ///
    /// The returned [`Registration`] removes the entry when dropped or unregistered.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::DuplicateRegistration`] when `id` is already registered.
    pub fn register(&self, id: CorrelationId, handler: Arc<dyn UploadHandler>) -> Result<Registration, UploadError> {
        match self.pending.entry(id.as_str().to_owned()) {
            Entry::Occupied(_) => {
                warn!(correlation_id = %id, "duplicate upload registration");
                Err(UploadError::duplicate_registration(id))
            }
            Entry::Vacant(vacant) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Pending { token, handler });
                debug!(correlation_id = %id, "registered upload handler");
                Ok(Registration { id, token, pending: Arc::clone(&self.pending), removed: false })
            }
        }
    }

    /// Hands `stream` to the handler registered for `id` and waits until it is done.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::UnknownHandler`] when nothing is registered for `id`,
    /// otherwise whatever the handler returns.
    pub async fn dispatch(&self, id: &str, stream: Option<IncomingStream>) -> Result<(), UploadError> {
        // the map guard must not live across the handler await
        let handler = self.pending.get(id).map(|pending| Arc::clone(&pending.handler));
        let Some(handler) = handler else {
            warn!(correlation_id = id, "no upload handler registered");
            return Err(UploadError::unknown_handler(id));
        };

        debug!(correlation_id = id, has_stream = stream.is_some(), "dispatch upload");
        handler.on_upload(stream).await
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl fmt::Debug for UploadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRegistry").field("pending", &self.pending.len()).finish()
    }
}

/// Handle of one registry entry, removing it exactly once.
pub struct Registration {
    id: CorrelationId,
    token: u64,
    pending: Arc<PendingMap>,
    removed: bool,
}

impl Registration {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Removes the entry. Calling it again, or dropping the handle afterwards, does
    /// nothing; an entry registered later under the same id is left alone.
    pub fn unregister(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        if self.pending.remove_if(self.id.as_str(), |_, pending| pending.token == self.token).is_some() {
            debug!(correlation_id = %self.id, "unregistered upload handler");
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).field("removed", &self.removed).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::ElementRef;
    use std::sync::atomic::AtomicBool;
    use tokio::io::AsyncReadExt;

    fn id(file_id: u32) -> CorrelationId {
        CorrelationId::new(&ElementRef::new("input"), file_id)
    }

    fn noop() -> Arc<dyn UploadHandler> {
        Arc::new(upload_handler_fn(|_stream| async { Ok(()) }))
    }

    #[test]
    fn duplicate_registration_fails_until_released() {
        let registry = UploadRegistry::new();
        let registration = registry.register(id(1), noop()).unwrap();

        let result = registry.register(id(1), noop());
        assert!(matches!(result, Err(UploadError::DuplicateRegistration { id: ref dup }) if dup.as_str() == "input.1"));

        drop(registration);
        assert!(registry.is_empty());
        let _registration = registry.register(id(1), noop()).unwrap();
        assert!(registry.contains("input.1"));
    }

    #[test]
    fn unregister_is_idempotent_and_skips_newer_entries() {
        let registry = UploadRegistry::new();
        let mut first = registry.register(id(2), noop()).unwrap();
        first.unregister();
        first.unregister();
        assert_eq!(registry.len(), 0);

        let _second = registry.register(id(2), noop()).unwrap();
        drop(first);
        assert!(registry.contains("input.2"));
    }

    #[tokio::test]
    async fn dispatch_unknown_id_never_invokes_handler() {
        let registry = UploadRegistry::new();
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let _registration = registry
            .register(
                id(3),
                Arc::new(upload_handler_fn(move |_stream| {
                    flag.store(true, Ordering::SeqCst);
                    async { Ok(()) }
                })),
            )
            .unwrap();

        let result = registry.dispatch("input.4", None).await;
        assert!(matches!(result, Err(UploadError::UnknownHandler { .. })));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dispatch_hands_stream_and_returns_handler_result() {
        let registry = UploadRegistry::new();
        let _registration = registry
            .register(
                id(5),
                Arc::new(upload_handler_fn(|stream: Option<IncomingStream>| async move {
                    let mut content = String::new();
                    let mut stream = stream.ok_or(UploadError::StreamClosed)?;
                    stream.read_to_string(&mut content).await.map_err(|e| UploadError::io(Arc::new(e)))?;
                    if content == "hello" { Ok(()) } else { Err(UploadError::unexpected_section(content)) }
                })),
            )
            .unwrap();

        let stream: IncomingStream = Box::pin(&b"hello"[..]);
        registry.dispatch("input.5", Some(stream)).await.unwrap();

        let result = registry.dispatch("input.5", None).await;
        assert!(matches!(result, Err(UploadError::StreamClosed)));
    }
}
