/// Boundary used by every generated multipart body.
pub const BOUNDARY: &str = "----bencher-boundary";

#[derive(Debug, Clone)]
pub struct TestCase {
    name: &'static str,
    file: TestFile,
}

impl TestCase {
    pub fn new(name: &'static str, file: TestFile) -> Self {
        Self { name, file }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn file(&self) -> &TestFile {
        &self.file
    }
}

/// A request body fed to the decoder.
#[derive(Debug, Clone)]
pub struct TestFile {
    content: Vec<u8>,
}

impl TestFile {
    /// A multipart body with one file section of `size` bytes named `file_name`.
    ///
    /// The content is binary and contains lone `\r` bytes, so the decoder has to hold back
    /// possible partial delimiters.
    pub fn multipart(file_name: &str, size: usize) -> Self {
        let mut content = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        content.extend((0..size).map(|i| (i % 251) as u8));
        content.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Self { content }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }
}
