//! Test utilities: in-memory archives and mock implementations of the
//! collaborator traits.
//!
//! All mocks use `Arc<Mutex<_>>` (or atomics) so clones share state and
//! tests can assert on recorded calls.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use url::Url;

use crate::error::AppError;
use crate::index::DEFAULT_BASE_URL;
use crate::models::{ArchiveFileReference, ArticleField, ExtractedArticle, ParsedArticle};
use crate::report::{HarvestEvent, HarvestReporter};
use crate::traits::{ArchiveDownload, ArchiveTransport, ContentExtractor, LanguageDetector, OutputSink};
use crate::warc::{ArchiveRecord, Headers, RecordKind};

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Reference to an archive file on the default host.
pub fn reference(name: &str) -> ArchiveFileReference {
    reference_at(DEFAULT_BASE_URL, name)
}

pub fn reference_at(base: &str, name: &str) -> ArchiveFileReference {
    ArchiveFileReference::parse(&Url::parse(base).unwrap(), name).unwrap()
}

// ---------------------------------------------------------------------------
// Archive fixtures
// ---------------------------------------------------------------------------

/// One captured HTTP response, serialized by [`WarcBuilder`].
#[derive(Debug, Clone)]
pub struct RecordFixture {
    kind: RecordKind,
    url: String,
    content_type: String,
    body: Vec<u8>,
}

/// A `text/html; charset=UTF-8` response.
pub fn html_response(url: &str, body: &str) -> RecordFixture {
    RecordFixture {
        kind: RecordKind::Response,
        url: url.to_string(),
        content_type: "text/html; charset=UTF-8".to_string(),
        body: body.as_bytes().to_vec(),
    }
}

pub fn response_with_content_type(url: &str, content_type: &str) -> RecordFixture {
    RecordFixture {
        content_type: content_type.to_string(),
        ..html_response(url, "<p>x</p>")
    }
}

impl RecordFixture {
    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn body_bytes(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    fn warc_headers(&self) -> Headers {
        [
            ("WARC-Type", self.kind.as_str()),
            ("WARC-Target-URI", self.url.as_str()),
            ("Content-Type", "application/http; msgtype=response"),
        ]
        .into_iter()
        .collect()
    }

    /// The record as the reader would produce it.
    pub fn to_record(&self) -> ArchiveRecord {
        let http: Headers = [("Content-Type", self.content_type.as_str())]
            .into_iter()
            .collect();
        ArchiveRecord::new(
            self.kind.clone(),
            self.warc_headers(),
            Some(http),
            self.body.clone(),
        )
    }

    fn http_message(&self) -> Vec<u8> {
        let mut message = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            self.content_type,
            self.body.len()
        )
        .into_bytes();
        message.extend_from_slice(&self.body);
        message
    }
}

/// Builds an uncompressed WARC byte stream.
#[derive(Debug, Default)]
pub struct WarcBuilder {
    data: Vec<u8>,
}

impl WarcBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warcinfo(self) -> Self {
        self.raw_record(
            "warcinfo",
            None,
            "application/warc-fields",
            b"software: harvest-test\r\nformat: WARC File Format 1.1\r\n",
        )
    }

    pub fn record(self, fixture: RecordFixture) -> Self {
        let message = fixture.http_message();
        self.raw_record(
            fixture.kind.as_str(),
            Some(&fixture.url),
            "application/http; msgtype=response",
            &message,
        )
    }

    fn raw_record(mut self, kind: &str, url: Option<&str>, content_type: &str, block: &[u8]) -> Self {
        let mut head = format!("WARC/1.0\r\nWARC-Type: {kind}\r\n");
        if let Some(url) = url {
            head.push_str(&format!("WARC-Target-URI: {url}\r\n"));
        }
        head.push_str(&format!(
            "Content-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
            block.len()
        ));

        self.data.extend_from_slice(head.as_bytes());
        self.data.extend_from_slice(block);
        self.data.extend_from_slice(b"\r\n\r\n");
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }

    pub fn build_gzipped(self) -> Vec<u8> {
        gzip(&self.data)
    }
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Serves registered resources; anything else is an HTTP 404.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    resources: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    archives: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fetched: Arc<Mutex<Vec<String>>>,
    opened: Arc<Mutex<Vec<String>>>,
    panic_on_open: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a small resource returned by `fetch`.
    pub fn add_resource(&self, url: &str, data: Vec<u8>) {
        self.resources.lock().unwrap().insert(url.to_string(), data);
    }

    /// Register an archive streamed by `open`.
    pub fn add_archive(&self, url: &str, data: Vec<u8>) {
        self.archives.lock().unwrap().insert(url.to_string(), data);
    }

    /// Make `open` panic for `url`.
    pub fn panic_on_open(&self, url: &str) {
        self.panic_on_open.lock().unwrap().push(url.to_string());
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

fn not_found(url: &str) -> AppError {
    AppError::HttpError(format!("HTTP 404 Not Found for {url}"))
}

impl ArchiveTransport for MockTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AppError> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.resources
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| not_found(url))
    }

    async fn open(&self, url: &str) -> Result<ArchiveDownload, AppError> {
        self.opened.lock().unwrap().push(url.to_string());
        let panics = self.panic_on_open.lock().unwrap().iter().any(|u| u == url);
        if panics {
            panic!("mock transport panicked opening {url}");
        }
        let data = self
            .archives
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| not_found(url))?;

        Ok(ArchiveDownload {
            content_length: Some(data.len() as u64),
            body: Box::pin(Cursor::new(data)),
        })
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Uses the HTML as article text and `Title: <url>` as title.
#[derive(Clone, Default)]
pub struct MockExtractor {
    fail_on: Vec<String>,
    panic_on: Vec<String>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail for URLs containing `pattern`.
    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_on.push(pattern.to_string());
        self
    }

    /// Panic for URLs containing `pattern`.
    pub fn panicking_on(mut self, pattern: &str) -> Self {
        self.panic_on.push(pattern.to_string());
        self
    }

    /// Block each call for `delay`, to observe overlapping calls.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of calls seen running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl ContentExtractor for MockExtractor {
    fn extract(&self, url: &str, html: &str) -> Result<ParsedArticle, AppError> {
        self.calls.lock().unwrap().push(url.to_string());

        if self.panic_on.iter().any(|p| url.contains(p.as_str())) {
            panic!("mock extractor panic for {url}");
        }
        if self.fail_on.iter().any(|p| url.contains(p.as_str())) {
            return Err(AppError::ExtractionError(format!("No article found at {url}")));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(ParsedArticle {
            title: format!("Title: {url}"),
            text: html.to_string(),
            url: url.to_string(),
            source_domain: Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(|h| format!("{}://{h}", u.scheme())))
                .unwrap_or_default(),
            publish_date: None,
        })
    }
}

// ---------------------------------------------------------------------------
// MockDetector
// ---------------------------------------------------------------------------

/// Returns a fixed language; fails on blank input.
#[derive(Clone)]
pub struct MockDetector {
    language: Option<String>,
    inputs: Arc<Mutex<Vec<String>>>,
}

impl MockDetector {
    pub fn new(language: &str) -> Self {
        Self {
            language: Some(language.to_string()),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A detector that never recognizes a language.
    pub fn failing() -> Self {
        Self {
            language: None,
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

impl LanguageDetector for MockDetector {
    fn detect(&self, text: &str) -> Result<String, AppError> {
        self.inputs.lock().unwrap().push(text.to_string());
        if text.trim().is_empty() {
            return Err(AppError::LanguageError("No text to detect".into()));
        }
        self.language
            .clone()
            .ok_or_else(|| AppError::LanguageError("Language not recognized".into()))
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SinkWrite {
    pub articles: Vec<ExtractedArticle>,
    pub location: PathBuf,
    pub partition_by: Vec<ArticleField>,
}

/// Records every write instead of touching the filesystem.
#[derive(Clone, Default)]
pub struct RecordingSink {
    writes: Arc<Mutex<Vec<SinkWrite>>>,
    fail_for: Option<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail writes whose location contains `fragment`.
    pub fn failing_for(fragment: &str) -> Self {
        Self {
            fail_for: Some(fragment.to_string()),
            ..Self::default()
        }
    }

    pub fn writes(&self) -> Vec<SinkWrite> {
        self.writes.lock().unwrap().clone()
    }
}

impl OutputSink for RecordingSink {
    fn write(
        &self,
        articles: &[ExtractedArticle],
        location: &Path,
        partition_by: &[ArticleField],
    ) -> Result<(), AppError> {
        if let Some(fragment) = &self.fail_for
            && location.to_string_lossy().contains(fragment.as_str())
        {
            return Err(AppError::OutputError(format!(
                "Disk full writing {}",
                location.display()
            )));
        }

        self.writes.lock().unwrap().push(SinkWrite {
            articles: articles.to_vec(),
            location: location.to_path_buf(),
            partition_by: partition_by.to_vec(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Records the kind of every event reported.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|k| **k == kind)
            .count()
    }
}

impl HarvestReporter for RecordingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        let kind = match event {
            HarvestEvent::ListingMonth { .. } => "listing_month",
            HarvestEvent::ListingFailed { .. } => "listing_failed",
            HarvestEvent::FilesResolved { .. } => "files_resolved",
            HarvestEvent::JobStarted { .. } => "job_started",
            HarvestEvent::DownloadFailed { .. } => "download_failed",
            HarvestEvent::StreamingStarted { .. } => "streaming_started",
            HarvestEvent::RecordDiscarded { .. } => "record_discarded",
            HarvestEvent::RecordErrored { .. } => "record_errored",
            HarvestEvent::Counters { .. } => "counters",
            HarvestEvent::Progress { .. } => "progress",
            HarvestEvent::ProgressUnknown { .. } => "progress_unknown",
            HarvestEvent::LimitReached { .. } => "limit_reached",
            HarvestEvent::StreamInterrupted { .. } => "stream_interrupted",
            HarvestEvent::Saving { .. } => "saving",
            HarvestEvent::JobCompleted { .. } => "job_completed",
            HarvestEvent::JobFailed { .. } => "job_failed",
            HarvestEvent::Aggregate { .. } => "aggregate",
            HarvestEvent::EmptyOutputIgnored { .. } => "empty_output_ignored",
            HarvestEvent::Cancelled { .. } => "cancelled",
        };
        self.events.lock().unwrap().push(kind);
    }
}
