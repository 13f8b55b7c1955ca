use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tokio::io::AsyncRead;

use crate::error::AppError;
use crate::models::{ArticleField, ExtractedArticle, ParsedArticle};

/// An opened, not yet consumed archive download.
pub struct ArchiveDownload {
    /// Declared size in bytes, used only for progress reporting.
    pub content_length: Option<u64>,
    pub body: Pin<Box<dyn AsyncRead + Send>>,
}

impl fmt::Debug for ArchiveDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveDownload")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Fetches index listings and archive files from the archive host.
///
/// A single attempt per call: a network error or non-success status is
/// returned as an error, never retried.
pub trait ArchiveTransport: Send + Sync + Clone {
    /// Download a small resource completely into memory.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;

    /// Start a streamed download of a (large) archive file.
    fn open(&self, url: &str) -> impl Future<Output = Result<ArchiveDownload, AppError>> + Send;
}

/// Turns a captured HTML page into a structured article.
pub trait ContentExtractor: Send + Sync + Clone {
    fn extract(&self, url: &str, html: &str) -> Result<ParsedArticle, AppError>;
}

/// Detects the language of a piece of text.
pub trait LanguageDetector: Send + Sync + Clone {
    /// Returns a short language code.
    fn detect(&self, text: &str) -> Result<String, AppError>;
}

/// Persists batches of extracted articles.
pub trait OutputSink: Send + Sync + Clone {
    /// Write `articles` under `location`, split by `partition_by` if non-empty.
    ///
    /// Writing repeatedly to the same location appends. An empty batch is a
    /// no-op.
    fn write(
        &self,
        articles: &[ExtractedArticle],
        location: &Path,
        partition_by: &[ArticleField],
    ) -> Result<(), AppError>;
}

/// A sink that drops everything, for dry runs.
#[derive(Debug, Clone)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write(
        &self,
        _articles: &[ExtractedArticle],
        _location: &Path,
        _partition_by: &[ArticleField],
    ) -> Result<(), AppError> {
        Ok(())
    }
}
