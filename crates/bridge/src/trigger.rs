use async_trait::async_trait;

use crate::error::TriggerError;
use crate::file::ElementRef;

/// What the browser agent needs to post one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub element: ElementRef,
    pub file_id: u32,
    pub upload_url: String,
}

/// Instructs the browser agent to post a file's bytes to a one-time upload url.
///
/// Implementations only acknowledge the instruction, the upload itself arrives later
/// at the ingress.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UploadTrigger: Send + Sync {
    async fn start_upload(&self, request: &UploadRequest) -> Result<(), TriggerError>;
}
