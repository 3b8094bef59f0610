//! End-to-end uploads: a reader on one side, a simulated browser agent posting to the
//! ingress on the other.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Request;
use http::header::CONTENT_TYPE;
use http_body_util::Full;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use upload_bridge::{
    BridgeConfig, ElementRef, FileInput, RemoteFileStream, StreamPhase, TriggerError, UploadError, UploadIngress,
    UploadRegistry, UploadRequest, UploadTrigger,
};

const BOUNDARY: &str = "----agent-boundary";

/// What the agent sends when told to upload.
#[derive(Clone)]
enum Post {
    File(Bytes),
    NoSection,
    Truncated(Bytes),
    Nothing,
}

fn multipart_body(post: &Post) -> Option<Bytes> {
    let file_section = |content: &Bytes| {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"data.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body
    };

    match post {
        Post::File(content) => {
            let mut body = file_section(content);
            body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
            Some(Bytes::from(body))
        }
        Post::NoSection => Some(Bytes::from(format!("--{BOUNDARY}--\r\n"))),
        Post::Truncated(content) => Some(Bytes::from(file_section(content))),
        Post::Nothing => None,
    }
}

fn upload_request(body: Bytes) -> Request<Full<Bytes>> {
    Request::post("/_upload")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Full::new(body))
        .unwrap()
}

/// Stands in for the browser: posts to the ingress whenever it is told to upload.
struct SimulatedAgent {
    ingress: UploadIngress,
    post: Post,
    uploads: Mutex<Vec<JoinHandle<Result<(), UploadError>>>>,
}

impl SimulatedAgent {
    fn new(ingress: UploadIngress, post: Post) -> Arc<Self> {
        Arc::new(Self { ingress, post, uploads: Mutex::new(Vec::new()) })
    }

    async fn upload_result(&self) -> Result<(), UploadError> {
        let upload = self.uploads.lock().pop().expect("agent posted an upload");
        upload.await.unwrap()
    }
}

#[async_trait]
impl UploadTrigger for SimulatedAgent {
    async fn start_upload(&self, request: &UploadRequest) -> Result<(), TriggerError> {
        let correlation_id = request.upload_url.rsplit('/').next().unwrap_or_default().to_owned();
        if let Some(body) = multipart_body(&self.post) {
            let ingress = self.ingress.clone();
            self.uploads.lock().push(tokio::spawn(async move {
                ingress.handle_request(&correlation_id, upload_request(body)).await
            }));
        }
        Ok(())
    }
}

struct Fixture {
    registry: UploadRegistry,
    ingress: UploadIngress,
    agent: Arc<SimulatedAgent>,
    input: FileInput,
}

fn fixture(post: Post, declared_size: u64, timeout: Duration) -> Fixture {
    let config = Arc::new(BridgeConfig::new().with_upload_timeout(timeout));
    let registry = UploadRegistry::new();
    let ingress = UploadIngress::new(registry.clone(), &config);
    let agent = SimulatedAgent::new(ingress.clone(), post);

    let input = FileInput::new(ElementRef::new("picker"), registry.clone(), Arc::clone(&agent) as _, config);
    input
        .notify_change(&format!(
            r#"[{{ "id": 3, "lastModified": "2024-05-01T10:00:00Z", "name": "data.bin", "size": {declared_size}, "type": "application/octet-stream" }}]"#
        ))
        .unwrap();

    Fixture { registry, ingress, agent, input }
}

fn content(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

async fn read_to_end(stream: &RemoteFileStream, chunk: usize) -> (Vec<u8>, Vec<usize>) {
    let mut buf = vec![0u8; chunk];
    let mut received = vec![];
    let mut reads = vec![];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            return (received, reads);
        }
        reads.push(n);
        received.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn streams_declared_file_in_chunks() {
    let sent = content(5000);
    let fixture = fixture(Post::File(sent.clone()), 5000, Duration::from_secs(5));
    let stream = fixture.input.open_read_stream(3).unwrap();
    assert_eq!(stream.upload_url(), "/_upload/picker.3");

    let (received, reads) = read_to_end(&stream, 1024).await;

    assert_eq!(received, sent);
    assert_eq!(reads.len(), 5);
    assert!(*reads.last().unwrap() <= 1024);
    assert_eq!(stream.read(&mut [0u8; 16]).await.ok(), None);
    assert_eq!(stream.phase(), StreamPhase::Completed);
    assert_eq!(stream.bytes_read(), 5000);

    fixture.agent.upload_result().await.unwrap();
    assert!(fixture.registry.is_empty());
}

#[tokio::test]
async fn times_out_when_nothing_is_posted() {
    let fixture = fixture(Post::Nothing, 10, Duration::from_millis(50));
    let stream = fixture.input.open_read_stream(3).unwrap();

    let result = stream.read(&mut [0u8; 16]).await;
    assert!(matches!(result, Err(UploadError::Timeout { .. })));
    assert!(fixture.registry.is_empty());

    let late = fixture.ingress.handle_request("picker.3", upload_request(multipart_body(&Post::File(content(10))).unwrap()));
    assert!(matches!(late.await, Err(UploadError::UnknownHandler { .. })));
}

#[tokio::test]
async fn caps_delivery_at_declared_size() {
    let sent = content(10_000);
    let fixture = fixture(Post::File(sent.clone()), 100, Duration::from_secs(5));
    let stream = fixture.input.open_read_stream(3).unwrap();

    let (received, _) = read_to_end(&stream, 64).await;

    assert_eq!(received.len(), 100);
    assert_eq!(&received[..], &sent[..100]);
    assert_eq!(stream.phase(), StreamPhase::Completed);
    fixture.agent.upload_result().await.unwrap();
}

#[tokio::test]
async fn dropping_the_reader_mid_relay_completes_the_upload() {
    let fixture = fixture(Post::File(content(4096)), 4096, Duration::from_secs(5));
    let stream = fixture.input.open_read_stream(3).unwrap();

    assert_eq!(stream.read(&mut [0u8; 10]).await.unwrap(), 10);
    assert_eq!(stream.phase(), StreamPhase::Relaying);
    assert!(fixture.registry.contains("picker.3"));

    drop(stream);
    fixture.agent.upload_result().await.unwrap();
    assert!(fixture.registry.is_empty());
}

#[tokio::test]
async fn empty_file_completes_with_or_without_a_section() {
    for post in [Post::NoSection, Post::File(Bytes::new())] {
        let fixture = fixture(post, 0, Duration::from_secs(5));
        let stream = fixture.input.open_read_stream(3).unwrap();

        assert_eq!(stream.read(&mut [0u8; 16]).await.unwrap(), 0);
        assert_eq!(stream.phase(), StreamPhase::Completed);
        fixture.agent.upload_result().await.unwrap();
    }
}

#[tokio::test]
async fn broken_upload_fails_reader_and_request() {
    let fixture = fixture(Post::Truncated(content(300)), 1000, Duration::from_secs(5));
    let stream = fixture.input.open_read_stream(3).unwrap();

    let mut buf = [0u8; 128];
    let error = loop {
        match stream.read(&mut buf).await {
            Ok(n) => assert!(n > 0, "stream must not end cleanly"),
            Err(e) => break e,
        }
    };

    assert!(matches!(error, UploadError::Io { .. }));
    assert_eq!(stream.phase(), StreamPhase::Failed);
    assert!(matches!(fixture.agent.upload_result().await, Err(UploadError::Io { .. })));
}
