//! Receives the upload request posted by the browser agent and feeds the waiting reader.

use http::Request;
use http_body::Body;
use http_body_util::BodyExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

use crate::config::{BridgeConfig, MultipartLimits};
use crate::error::UploadError;
use crate::multipart::{MultipartReader, Section, SectionBody};
use crate::registry::{IncomingStream, UploadRegistry};
use crate::utils::ensure;

/// Handles `POST {base}/_upload/{correlation_id}`, independent of the http server in use.
#[derive(Debug, Clone)]
pub struct UploadIngress {
    registry: UploadRegistry,
    limits: MultipartLimits,
}

impl UploadIngress {
    pub fn new(registry: UploadRegistry, config: &BridgeConfig) -> Self {
        Self { registry, limits: *config.multipart_limits() }
    }

    /// Streams the single file section of `request` to the reader registered for
    /// `correlation_id`, returning once that reader is done with it.
    ///
    /// A body without any section is delivered as an empty upload. The body is never
    /// parsed for an unknown id.
    ///
    /// # Errors
    ///
    /// - [`UploadError::UnknownHandler`] when nobody waits for `correlation_id`
    /// - [`UploadError::MalformedRequest`] when the body is not valid multipart
    /// - [`UploadError::UnexpectedSection`] for a non-file section or a second file section
    /// - whatever the reader reports when it finishes
    pub async fn handle_request<B>(&self, correlation_id: &str, request: Request<B>) -> Result<(), UploadError>
    where
        B: Body + Unpin,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let result = self.receive(correlation_id, request).await;
        match &result {
            Ok(()) => info!(correlation_id, "upload finished"),
            Err(e) => warn!(correlation_id, cause = %e, "upload rejected"),
        }
        result
    }

    async fn receive<B>(&self, correlation_id: &str, request: Request<B>) -> Result<(), UploadError>
    where
        B: Body + Unpin,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ensure!(self.registry.contains(correlation_id), UploadError::unknown_handler(correlation_id));

        let mut reader = MultipartReader::from_request(request, &self.limits)?;
        let mut delivered = false;

        while let Some(mut section) = reader.next_section().await? {
            ensure!(
                section.is_file(),
                UploadError::unexpected_section(format!(
                    "section '{}' is not a file",
                    section.disposition().name().unwrap_or_default()
                ))
            );
            ensure!(!delivered, UploadError::unexpected_section("more than one file section"));

            self.deliver(correlation_id, &mut section).await?;
            delivered = true;
        }

        if !delivered {
            info!(correlation_id, "upload carries no file section");
            self.registry.dispatch(correlation_id, None).await?;
        }

        Ok(())
    }

    /// Hands the section to the registered reader as an owned stream and pumps its
    /// content until the reader is done.
    async fn deliver<R>(&self, correlation_id: &str, section: &mut Section<'_, R>) -> Result<(), UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let (body, mut sender) = SectionBody::channel(section);
        let stream: IncomingStream = Box::pin(StreamReader::new(body.into_data_stream()));

        let dispatch = self.registry.dispatch(correlation_id, Some(stream));
        tokio::pin!(dispatch);

        let mut pump_done = false;
        loop {
            tokio::select! {
                biased;

                result = &mut dispatch => return result,

                pumped = sender.send_body(), if !pump_done => {
                    pump_done = true;
                    if let Err(e) = pumped {
                        // the reader sees the same failure on its next read
                        warn!(correlation_id, cause = %e, "upload body broke off");
                    }
                }
            }
        }
    }
}
