pub mod config;
pub mod dispatcher;
pub mod error;
pub mod index;
pub mod job;
pub mod models;
pub mod report;
pub mod traits;
pub mod validator;
pub mod warc;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{DateWindow, FilterCriteria, HarvestConfig, UrlPatterns};
pub use dispatcher::Dispatcher;
pub use error::AppError;
pub use index::ArchiveIndex;
pub use models::{
    ArchiveFileReference, ArticleField, Counters, ExtractedArticle, HarvestReport, JobResult,
    JobState, ParsedArticle,
};
pub use report::{HarvestEvent, HarvestReporter, TracingReporter};
pub use traits::{ArchiveDownload, ArchiveTransport, ContentExtractor, LanguageDetector, NullSink, OutputSink};
