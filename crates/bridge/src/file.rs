//! Files reported by the browser agent, and the input component that owns them.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BridgeConfig;
use crate::registry::UploadRegistry;
use crate::stream::RemoteFileStream;
use crate::trigger::UploadTrigger;

/// A file selected in the browser, as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Scoped to one input element.
    pub id: u32,
    pub last_modified: DateTime<Utc>,
    pub name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// Reference to the rendered input element a file was selected in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binds one pending read to one expected upload request: `<element id>.<file id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(element: &ElementRef, file_id: u32) -> Self {
        Self(format!("{}.{file_id}", element.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server side of one file input element.
///
/// Keeps the file list the agent last reported and builds a [`RemoteFileStream`] per
/// file on request.
pub struct FileInput {
    element: ElementRef,
    registry: UploadRegistry,
    trigger: Arc<dyn UploadTrigger>,
    config: Arc<BridgeConfig>,
    files: RwLock<Vec<FileDescriptor>>,
}

impl FileInput {
    pub fn new(
        element: ElementRef,
        registry: UploadRegistry,
        trigger: Arc<dyn UploadTrigger>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self { element, registry, trigger, config, files: RwLock::new(Vec::new()) }
    }

    /// Replaces the file list with the agent's change notification, a JSON array of
    /// file descriptors.
    ///
    /// # Errors
    ///
    /// Fails when the notification is not a valid descriptor list, the current list is
    /// kept in that case.
    pub fn notify_change(&self, json: &str) -> Result<(), serde_json::Error> {
        let files: Vec<FileDescriptor> = serde_json::from_str(json)?;
        self.set_files(files);
        Ok(())
    }

    pub fn set_files(&self, files: Vec<FileDescriptor>) {
        debug!(element = %self.element, count = files.len(), "file selection changed");
        *self.files.write() = files;
    }

    pub fn files(&self) -> Vec<FileDescriptor> {
        self.files.read().clone()
    }

    /// Builds a stream over the bytes of the listed file `file_id`.
    ///
    /// Nothing is uploaded until the stream is first read.
    pub fn open_read_stream(&self, file_id: u32) -> Option<RemoteFileStream> {
        let file = self.files.read().iter().find(|file| file.id == file_id).cloned()?;
        let correlation_id = CorrelationId::new(&self.element, file.id);
        let upload_url = self.config.upload_url(&correlation_id);

        Some(RemoteFileStream::new(
            file,
            self.element.clone(),
            correlation_id,
            upload_url,
            self.registry.clone(),
            Arc::clone(&self.trigger),
            self.config.upload_timeout(),
        ))
    }
}

impl fmt::Debug for FileInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileInput")
            .field("element", &self.element)
            .field("files", &self.files.read().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamPhase;
    use crate::trigger::MockUploadTrigger;
    use indoc::indoc;

    const CHANGE: &str = indoc! {r#"
        [
          { "id": 0, "lastModified": "2024-05-01T10:00:00Z", "name": "a.txt", "size": 5, "type": "text/plain" },
          { "id": 1, "lastModified": "2024-05-02T08:30:00Z", "name": "b.png", "size": 5000, "type": "image/png" }
        ]
    "#};

    fn input() -> FileInput {
        FileInput::new(
            ElementRef::new("input-1"),
            UploadRegistry::new(),
            Arc::new(MockUploadTrigger::new()),
            Arc::new(BridgeConfig::new().with_base_path("/app")),
        )
    }

    #[test]
    fn correlation_id_joins_element_and_file() {
        let id = CorrelationId::new(&ElementRef::new("input-1"), 42);
        assert_eq!(id.as_str(), "input-1.42");
        assert_eq!(id.to_string(), "input-1.42");
    }

    #[test]
    fn notify_change_replaces_file_list() {
        let input = input();
        input.notify_change(CHANGE).unwrap();

        let files = input.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].name, "b.png");
        assert_eq!(files[1].size_bytes, 5000);
        assert_eq!(files[1].mime_type, "image/png");

        assert!(input.notify_change("not json").is_err());
        assert_eq!(input.files().len(), 2);

        input.notify_change("[]").unwrap();
        assert!(input.files().is_empty());
    }

    #[test]
    fn descriptor_serializes_with_agent_field_names() {
        let input = input();
        input.notify_change(CHANGE).unwrap();
        let json = serde_json::to_value(&input.files()[0]).unwrap();
        assert_eq!(json["size"], 5);
        assert_eq!(json["type"], "text/plain");
        assert_eq!(json["lastModified"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn open_read_stream_for_listed_file_only() {
        let input = input();
        input.notify_change(CHANGE).unwrap();

        let stream = input.open_read_stream(1).expect("file 1 is listed");
        assert_eq!(stream.correlation_id().as_str(), "input-1.1");
        assert_eq!(stream.upload_url(), "/app/_upload/input-1.1");
        assert_eq!(stream.file().size_bytes, 5000);
        assert_eq!(stream.phase(), StreamPhase::Idle);

        assert!(input.open_read_stream(7).is_none());
    }
}
