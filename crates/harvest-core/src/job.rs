//! Extraction of the articles held in a single archive file.
//!
//! A job downloads one file, walks its records strictly in order and keeps
//! the eligible ones that the content extractor can turn into articles.
//! Failures of individual records are counted and never end the job; only
//! writing the output can fail a job as a whole.

use std::any::Any;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tokio_util::io::SyncIoBridge;

use crate::config::{HarvestConfig, UrlPatterns};
use crate::error::AppError;
use crate::models::{ArchiveFileReference, Counters, ExtractedArticle, JobResult, JobState};
use crate::report::{HarvestEvent, HarvestReporter};
use crate::traits::{ArchiveDownload, ArchiveTransport, ContentExtractor, LanguageDetector, OutputSink};
use crate::validator::is_eligible;
use crate::warc::{ArchiveRecord, open_archive};

/// Collaborators and settings shared by every job of a run.
#[derive(Clone)]
pub struct JobContext<T, E, L, S> {
    pub transport: T,
    pub extractor: E,
    pub detector: L,
    pub sink: S,
    pub patterns: Arc<UrlPatterns>,
    pub config: Arc<HarvestConfig>,
}

/// Downloads and extracts the articles of one archive file.
pub struct ExtractionJob<T, E, L, S>
where
    T: ArchiveTransport,
    E: ContentExtractor,
    L: LanguageDetector,
    S: OutputSink,
{
    reference: ArchiveFileReference,
    date_crawled: NaiveDate,
    context: JobContext<T, E, L, S>,
    state: JobState,
    download_failed: bool,
    counters: Counters,
    articles: Vec<ExtractedArticle>,
}

impl<T, E, L, S> ExtractionJob<T, E, L, S>
where
    T: ArchiveTransport + 'static,
    E: ContentExtractor + 'static,
    L: LanguageDetector + 'static,
    S: OutputSink + 'static,
{
    pub fn new(reference: ArchiveFileReference, context: JobContext<T, E, L, S>) -> Self {
        let date_crawled = reference.captured_at().date_naive();
        Self {
            reference,
            date_crawled,
            context,
            state: JobState::Idle,
            download_failed: false,
            counters: Counters::default(),
            articles: Vec::new(),
        }
    }

    /// Name used when logging, the archive file's short name.
    pub fn name(&self) -> &str {
        self.reference.short_name()
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Where the job's articles are written.
    pub fn location(&self) -> PathBuf {
        self.context
            .config
            .output_dir()
            .join(format!("{}.parquet", self.reference.short_name()))
    }

    /// Run the whole job: download, iterate records, write the output.
    ///
    /// A failed download still produces a (zero record) result. Record
    /// iteration and writing run on a blocking thread.
    pub async fn run<R>(mut self, reporter: R) -> Result<JobResult, AppError>
    where
        R: HarvestReporter + Clone + 'static,
    {
        reporter.report(HarvestEvent::JobStarted {
            job: self.name(),
            locator: self.reference.locator(),
        });

        let download = self.download(&reporter).await;
        let stream = download.map(|d| (SyncIoBridge::new(d.body), d.content_length));

        tokio::task::spawn_blocking(move || {
            if let Some((body, content_length)) = stream {
                self.iterate_records(body, content_length, &reporter)?;
            }
            self.finalize(&reporter)
        })
        .await
        .map_err(|e| AppError::Generic(format!("Extraction task failed: {e}")))?
    }

    async fn download<R: HarvestReporter>(&mut self, reporter: &R) -> Option<ArchiveDownload> {
        self.state = JobState::Downloading;

        match self.context.transport.open(self.reference.locator()).await {
            Ok(download) => Some(download),
            Err(e) => {
                let error = e.to_string();
                reporter.report(HarvestEvent::DownloadFailed {
                    job: self.name(),
                    error: &error,
                });
                self.download_failed = true;
                None
            }
        }
    }

    /// Walk the records of a raw archive stream.
    ///
    /// Stops at the end of the stream, at the record limit, or when the
    /// stream can no longer be framed. Only an output write failure is
    /// returned as an error.
    pub(crate) fn iterate_records<Rd, R>(
        &mut self,
        raw: Rd,
        content_length: Option<u64>,
        reporter: &R,
    ) -> Result<(), AppError>
    where
        Rd: Read + Send + 'static,
        R: HarvestReporter,
    {
        self.state = JobState::Streaming;
        reporter.report(HarvestEvent::StreamingStarted {
            job: self.name(),
            content_length,
        });

        let (mut records, offset) = open_archive(raw, self.reference.is_gzipped());
        let file_size = content_length.filter(|&n| n > 0);
        let report_every = self.context.config.report_every();
        let limit = self.context.config.record_limit();
        let started = Instant::now();
        let mut seen: u64 = 0;

        loop {
            if seen != 0 && seen % report_every == 0 {
                self.report_progress(started.elapsed(), offset.get(), file_size, reporter);
            }

            if let Some(limit) = limit
                && seen >= limit
            {
                reporter.report(HarvestEvent::LimitReached {
                    job: self.name(),
                    limit,
                });
                break;
            }

            let record = match records.next() {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    let error = e.to_string();
                    reporter.report(HarvestEvent::StreamInterrupted {
                        job: self.name(),
                        error: &error,
                    });
                    break;
                }
                None => break,
            };

            seen += 1;
            self.process_record(record, reporter)?;
        }

        // Dropping the reader closes the underlying download.
        drop(records);
        Ok(())
    }

    fn process_record<R: HarvestReporter>(
        &mut self,
        record: ArchiveRecord,
        reporter: &R,
    ) -> Result<(), AppError> {
        let url = record.target_uri().map(str::to_owned);

        if !is_eligible(&record, &self.context.patterns) {
            self.counters.discarded += 1;
            reporter.report(HarvestEvent::RecordDiscarded {
                job: self.name(),
                url: url.as_deref(),
            });
            return Ok(());
        }

        match self.extract_article(url.as_deref().unwrap_or_default(), record) {
            Ok(article) => {
                self.articles.push(article);
                self.counters.extracted += 1;

                if let Some(n) = self.context.config.flush_every()
                    && self.articles.len() >= n
                {
                    self.flush(reporter)?;
                }
            }
            Err(e) => {
                self.counters.errored += 1;
                let error = e.to_string();
                reporter.report(HarvestEvent::RecordErrored {
                    job: self.name(),
                    url: url.as_deref(),
                    error: &error,
                });
            }
        }
        Ok(())
    }

    /// Decode, extract and detect the language of one eligible record.
    fn extract_article(
        &self,
        url: &str,
        record: ArchiveRecord,
    ) -> Result<ExtractedArticle, AppError> {
        let html = record.into_text()?;

        let extractor = &self.context.extractor;
        let parsed = panic::catch_unwind(AssertUnwindSafe(|| extractor.extract(url, &html)))
            .map_err(|payload| {
                let message = panic_message(payload.as_ref());
                AppError::ExtractionError(format!("Extractor panicked: {message}"))
            })??;

        let sample = if parsed.text.trim().is_empty() {
            parsed.title.as_str()
        } else {
            parsed.text.as_str()
        };
        let detector = &self.context.detector;
        let language = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(sample)))
            .map_err(|payload| {
                let message = panic_message(payload.as_ref());
                AppError::LanguageError(format!("Detector panicked: {message}"))
            })??;

        Ok(ExtractedArticle::new(parsed, self.date_crawled, language))
    }

    fn report_progress<R: HarvestReporter>(
        &self,
        elapsed: Duration,
        offset: u64,
        file_size: Option<u64>,
        reporter: &R,
    ) {
        reporter.report(HarvestEvent::Counters {
            job: self.name(),
            counters: self.counters,
        });

        let Some(file_size) = file_size else {
            reporter.report(HarvestEvent::ProgressUnknown { job: self.name() });
            return;
        };

        if let Some((percent_complete, minutes_left)) = estimate_remaining(elapsed, offset, file_size) {
            reporter.report(HarvestEvent::Progress {
                job: self.name(),
                percent_complete,
                minutes_left,
            });
        }
    }

    /// Write buffered articles to the job's location and clear the buffer.
    fn flush<R: HarvestReporter>(&mut self, reporter: &R) -> Result<(), AppError> {
        let location = self.location();
        reporter.report(HarvestEvent::Saving {
            job: self.name(),
            location: &location,
            articles: self.articles.len(),
        });

        self.context
            .sink
            .write(&self.articles, &location, self.context.config.partition_by())?;
        self.articles.clear();
        Ok(())
    }

    /// Write what is left in the buffer and produce the job's result.
    pub(crate) fn finalize<R: HarvestReporter>(&mut self, reporter: &R) -> Result<JobResult, AppError> {
        self.state = JobState::Finalizing;
        self.flush(reporter)?;

        self.state = if self.download_failed {
            JobState::Failed
        } else {
            JobState::Done
        };
        reporter.report(HarvestEvent::JobCompleted {
            job: self.name(),
            counters: self.counters,
        });

        Ok(JobResult {
            job_name: self.name().to_string(),
            location: self.location(),
            counters: self.counters,
            state: self.state,
        })
    }
}

/// Percent of the file read and estimated minutes left.
///
/// `None` while nothing has been read, to avoid dividing by zero.
pub fn estimate_remaining(elapsed: Duration, offset: u64, file_size: u64) -> Option<(f64, f64)> {
    if file_size == 0 {
        return None;
    }
    let percent_complete = 100.0 * offset as f64 / file_size as f64;
    if percent_complete <= 0.0 {
        return None;
    }
    let percent_remaining = (100.0 - percent_complete).max(0.0);
    let minutes = elapsed.as_secs_f64() / 60.0;
    Some((percent_complete, minutes * percent_remaining / percent_complete))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
