//! Limits and timings for remote uploads.
//!
//! All values are pass-through limits: the multipart codec turns them into parse
//! failures and the remote stream turns the timeout into a failed read.

use std::time::Duration;

use serde::Deserialize;

use crate::file::CorrelationId;

/// Path segment every one-time upload url lives under.
pub const UPLOAD_SEGMENT: &str = "_upload";

/// Name of the route parameter carrying the correlation id.
pub const CORRELATION_ID_PARAM: &str = "correlation_id";

const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 15_000;

/// Configuration shared by the remote stream side and the ingress side.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long a reader waits for the browser agent to post the file.
    upload_timeout_ms: u64,
    /// Path prefix the upload route is mounted under, e.g. `/app`.
    base_path: String,
    multipart: MultipartLimits,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { upload_timeout_ms: DEFAULT_UPLOAD_TIMEOUT_MS, base_path: String::new(), multipart: MultipartLimits::default() }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    #[must_use]
    pub fn with_multipart_limits(mut self, limits: MultipartLimits) -> Self {
        self.multipart = limits;
        self
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn multipart_limits(&self) -> &MultipartLimits {
        &self.multipart
    }

    fn trimmed_base_path(&self) -> &str {
        self.base_path.trim_end_matches('/')
    }

    /// The route pattern the ingress is mounted at, in `matchit` syntax.
    pub fn upload_route(&self) -> String {
        format!("{}/{UPLOAD_SEGMENT}/{{{CORRELATION_ID_PARAM}}}", self.trimmed_base_path())
    }

    /// The one-time url the browser agent posts a file to.
    pub fn upload_url(&self, correlation_id: &CorrelationId) -> String {
        format!("{}/{UPLOAD_SEGMENT}/{correlation_id}", self.trimmed_base_path())
    }
}

/// Limits enforced while parsing a multipart upload body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MultipartLimits {
    pub max_boundary_length: usize,
    pub max_header_count: usize,
    pub max_headers_length: usize,
}

impl Default for MultipartLimits {
    fn default() -> Self {
        Self { max_boundary_length: 128, max_header_count: 16, max_headers_length: 16 * 1024 }
    }
}
