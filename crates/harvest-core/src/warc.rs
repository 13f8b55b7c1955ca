//! Forward-only reader for WARC/1.x archive files.
//!
//! Records are framed as a `WARC/<version>` line, a header block, a blank
//! line and exactly `Content-Length` bytes of content. Response records
//! carrying `application/http` content are split into HTTP headers and body.
//! Gzip input is expected to be multi-member (one member per record), as
//! published by Common Crawl.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::bufread::MultiGzDecoder;
use flate2::read::{DeflateDecoder, GzDecoder};

use crate::error::AppError;

/// Longest accepted WARC or HTTP header line, in bytes.
pub const MAX_LINE_LEN: u64 = 64 * 1024;

/// Largest accepted record block, in bytes.
pub const MAX_RECORD_LEN: u64 = 256 * 1024 * 1024;

/// Name/value header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn append_to_last(&mut self, continuation: &str) {
        if let Some((_, value)) = self.entries.last_mut() {
            value.push(' ');
            value.push_str(continuation);
        }
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// Value of the `WARC-Type` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Warcinfo,
    Response,
    Resource,
    Request,
    Metadata,
    Revisit,
    Conversion,
    Continuation,
    Other(String),
}

impl RecordKind {
    pub fn as_str(&self) -> &str {
        match self {
            RecordKind::Warcinfo => "warcinfo",
            RecordKind::Response => "response",
            RecordKind::Resource => "resource",
            RecordKind::Request => "request",
            RecordKind::Metadata => "metadata",
            RecordKind::Revisit => "revisit",
            RecordKind::Conversion => "conversion",
            RecordKind::Continuation => "continuation",
            RecordKind::Other(s) => s,
        }
    }
}

impl From<&str> for RecordKind {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "warcinfo" => RecordKind::Warcinfo,
            "response" => RecordKind::Response,
            "resource" => RecordKind::Resource,
            "request" => RecordKind::Request,
            "metadata" => RecordKind::Metadata,
            "revisit" => RecordKind::Revisit,
            "conversion" => RecordKind::Conversion,
            "continuation" => RecordKind::Continuation,
            other => RecordKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single archive entry. The body can be consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    kind: RecordKind,
    warc_headers: Headers,
    http_headers: Option<Headers>,
    body: Vec<u8>,
}

impl ArchiveRecord {
    pub fn new(
        kind: RecordKind,
        warc_headers: Headers,
        http_headers: Option<Headers>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            warc_headers,
            http_headers,
            body,
        }
    }

    pub fn kind(&self) -> &RecordKind {
        &self.kind
    }

    /// HTTP headers, present only for records holding an HTTP message.
    pub fn http_headers(&self) -> Option<&Headers> {
        self.http_headers.as_ref()
    }

    /// Captured URL (`WARC-Target-URI`).
    pub fn target_uri(&self) -> Option<&str> {
        self.warc_headers.get("WARC-Target-URI")
    }

    /// Consume the record and decode its body as UTF-8 text.
    ///
    /// A `gzip` or `deflate` `Content-Encoding` is undone first.
    pub fn into_text(self) -> Result<String, AppError> {
        let encoding = self
            .http_headers
            .as_ref()
            .and_then(|h| h.get("Content-Encoding"))
            .map(|e| e.trim().to_ascii_lowercase());

        let bytes = match encoding.as_deref() {
            None | Some("") | Some("identity") => self.body,
            Some("gzip") | Some("x-gzip") => inflate(GzDecoder::new(self.body.as_slice()))?,
            Some("deflate") => inflate(DeflateDecoder::new(self.body.as_slice()))?,
            Some(other) => {
                return Err(AppError::DecodeError(format!(
                    "Unsupported content encoding '{other}'"
                )));
            }
        };

        String::from_utf8(bytes).map_err(|e| AppError::DecodeError(e.to_string()))
    }
}

fn inflate(mut decoder: impl Read) -> Result<Vec<u8>, AppError> {
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| AppError::DecodeError(format!("Failed to decompress body: {e}")))?;
    Ok(out)
}

/// Shared count of bytes pulled from the raw (possibly compressed) stream.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn add(&self, n: usize) {
        self.0.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Reader that records how many bytes passed through it.
pub struct CountingReader<R> {
    inner: R,
    counter: ByteCounter,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> (Self, ByteCounter) {
        let counter = ByteCounter::default();
        (
            Self {
                inner,
                counter: counter.clone(),
            },
            counter,
        )
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.add(n);
        Ok(n)
    }
}

/// Boxed buffered reader over a raw or decompressed archive stream.
pub type ArchiveStream = Box<dyn BufRead + Send>;

/// Wrap a raw archive byte stream, decompressing multi-member gzip if asked.
///
/// The returned counter tracks raw bytes consumed, i.e. the position within
/// the file as downloaded.
pub fn open_archive<R>(raw: R, gzipped: bool) -> (WarcReader<ArchiveStream>, ByteCounter)
where
    R: Read + Send + 'static,
{
    let (counting, counter) = CountingReader::new(raw);
    let stream: ArchiveStream = if gzipped {
        Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(counting))))
    } else {
        Box::new(BufReader::new(counting))
    };
    (WarcReader::new(stream), counter)
}

/// Lazy, forward-only iterator over the records of a WARC stream.
///
/// Yields `Err` once on a framing or read failure and ends afterwards.
pub struct WarcReader<R> {
    reader: R,
    done: bool,
}

impl<R: BufRead> WarcReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }

    fn read_record(&mut self) -> Result<Option<ArchiveRecord>, AppError> {
        let mut line = String::new();

        // Skip the blank lines separating records.
        let version = loop {
            line.clear();
            if read_line(&mut self.reader, &mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if !trimmed.is_empty() {
                break trimmed.to_string();
            }
        };

        if !version.starts_with("WARC/") {
            return Err(AppError::ArchiveError(format!(
                "Expected WARC version line, found '{}'",
                truncate(&version, 64)
            )));
        }

        let warc_headers = read_header_block(&mut self.reader)?;

        let length: u64 = warc_headers
            .get("Content-Length")
            .ok_or_else(|| AppError::ArchiveError("Record has no Content-Length".into()))?
            .trim()
            .parse()
            .map_err(|e| AppError::ArchiveError(format!("Invalid Content-Length: {e}")))?;
        if length > MAX_RECORD_LEN {
            return Err(AppError::ArchiveError(format!(
                "Content-Length {length} exceeds the {MAX_RECORD_LEN} byte record limit"
            )));
        }

        let mut block = Vec::new();
        (&mut self.reader).take(length).read_to_end(&mut block)?;
        if (block.len() as u64) < length {
            return Err(AppError::ArchiveError(format!(
                "Truncated record: expected {length} bytes, got {}",
                block.len()
            )));
        }

        let kind = warc_headers
            .get("WARC-Type")
            .map(RecordKind::from)
            .unwrap_or_else(|| RecordKind::Other(String::new()));

        let holds_http = warc_headers
            .get("Content-Type")
            .is_some_and(|ct| ct.trim_start().starts_with("application/http"));

        let (http_headers, body) = if holds_http {
            match split_http_message(&block) {
                Some((headers, body_start)) => (Some(headers), block.split_off(body_start)),
                None => (None, block),
            }
        } else {
            (None, block)
        };

        Ok(Some(ArchiveRecord::new(kind, warc_headers, http_headers, body)))
    }
}

impl<R: BufRead> Iterator for WarcReader<R> {
    type Item = Result<ArchiveRecord, AppError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn read_line<R: BufRead>(reader: &mut R, line: &mut String) -> Result<usize, AppError> {
    let mut raw = Vec::new();
    let n = reader.take(MAX_LINE_LEN).read_until(b'\n', &mut raw)?;
    if n as u64 == MAX_LINE_LEN && raw.last() != Some(&b'\n') {
        return Err(AppError::ArchiveError(format!(
            "Header line longer than {MAX_LINE_LEN} bytes"
        )));
    }
    line.push_str(&String::from_utf8_lossy(&raw));
    Ok(n)
}

fn read_header_block<R: BufRead>(reader: &mut R) -> Result<Headers, AppError> {
    let mut headers = Headers::new();
    let mut line = String::new();

    loop {
        line.clear();
        if read_line(reader, &mut line)? == 0 {
            return Err(AppError::ArchiveError(
                "Unexpected end of stream in record headers".into(),
            ));
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(headers);
        }
        parse_header_line(&mut headers, trimmed);
    }
}

fn parse_header_line(headers: &mut Headers, line: &str) {
    if line.starts_with([' ', '\t']) {
        headers.append_to_last(line.trim());
    } else if let Some((name, value)) = line.split_once(':') {
        headers.push(name.trim(), value.trim());
    }
}

/// Split an HTTP message into headers and the offset where its body starts.
fn split_http_message(block: &[u8]) -> Option<(Headers, usize)> {
    let (head_end, body_start) = find_subslice(block, b"\r\n\r\n")
        .map(|i| (i, i + 4))
        .or_else(|| find_subslice(block, b"\n\n").map(|i| (i, i + 2)))?;

    let head = String::from_utf8_lossy(&block[..head_end]);
    let mut lines = head.lines();
    let status = lines.next()?;
    if !status.starts_with("HTTP/") {
        return None;
    }

    let mut headers = Headers::new();
    for line in lines {
        parse_header_line(&mut headers, line.trim_end_matches('\r'));
    }
    Some((headers, body_start))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
